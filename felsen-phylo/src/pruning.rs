//! Felsenstein pruning in log space.
//!
//! Every node carries a vector `lambda_n(s) = ln L_n(s)`, the log probability
//! of the data below `n` given state `s` at `n`. Tips start from their
//! evidence, internal nodes from zero. Walking the pruning order, each child
//! folds `ln sum_i P_si(t) exp(lambda_c(i))` into its parent; the root vector
//! is finally weighted by the root prior. All sums are max-shifted, so deep
//! trees do not underflow.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use felsen_core::{ln_weighted_sum, log_sum_exp, FelsenError, Result};
use tracing::{debug, trace, warn};

use crate::evidence::TipEvidence;
use crate::prior::RootPrior;
use crate::rate::{BinaryRates, RateModel, TransitionMatrix};
use crate::tree::{NodeId, PruningTree};

/// Evaluation settings shared by every call on an engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Distribution of the root state.
    pub root_prior: RootPrior,
    /// Reuse `P(t)` across branches of equal length within one evaluation.
    pub cache_transitions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_prior: RootPrior::Uniform,
            cache_transitions: true,
        }
    }
}

/// Likelihood evaluator bound to one tree and one set of tip observations.
///
/// The engine holds no mutable state: every evaluation allocates its own
/// scratch table, so a single engine can be shared across threads and
/// queried with as many rate settings as needed.
#[derive(Debug, Clone)]
pub struct PruningEngine<'a> {
    tree: &'a PruningTree,
    evidence: TipEvidence,
    config: EngineConfig,
}

impl<'a> PruningEngine<'a> {
    /// Engine with the default configuration (uniform root prior).
    pub fn new(tree: &'a PruningTree, evidence: TipEvidence) -> Result<Self> {
        Self::with_config(tree, evidence, EngineConfig::default())
    }

    /// # Errors
    ///
    /// [`FelsenError::InvalidInput`] when the evidence does not have one row
    /// per tip, [`FelsenError::InvalidPrior`] when a fixed root prior does
    /// not match the evidence's state count.
    pub fn with_config(
        tree: &'a PruningTree,
        evidence: TipEvidence,
        config: EngineConfig,
    ) -> Result<Self> {
        check_tip_count(tree, &evidence)?;
        config.root_prior.check_len(evidence.n_states())?;
        debug!(
            n_tips = evidence.n_tips(),
            n_states = evidence.n_states(),
            cache_transitions = config.cache_transitions,
            "built pruning engine"
        );
        Ok(Self {
            tree,
            evidence,
            config,
        })
    }

    /// The tree every evaluation walks.
    pub fn tree(&self) -> &PruningTree {
        self.tree
    }

    /// Tip observations, fixed for the engine's lifetime.
    pub fn evidence(&self) -> &TipEvidence {
        &self.evidence
    }

    /// Settings applied to every evaluation.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Total log-likelihood of the evidence under `model`.
    ///
    /// Returns `Ok(f64::NEG_INFINITY)` when the data are impossible under
    /// the model.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidInput`] if the model's state count differs from
    /// the evidence, [`FelsenError::NonFiniteLikelihood`] if an intermediate
    /// value becomes NaN or `+inf`, plus whatever the model or root prior
    /// reports.
    pub fn log_likelihood<M: RateModel + ?Sized>(&self, model: &M) -> Result<f64> {
        Ok(self.evaluate(model)?.log_likelihood)
    }

    /// Log-likelihood under the two-state model with gain rate `alpha`
    /// (0 → 1) and loss rate `beta` (1 → 0).
    pub fn log_likelihood_binary(&self, alpha: f64, beta: f64) -> Result<f64> {
        let model = BinaryRates::new(alpha, beta)?;
        self.log_likelihood(&model)
    }

    /// Full evaluation, keeping every node's log conditional likelihoods.
    pub fn evaluate<M: RateModel + ?Sized>(&self, model: &M) -> Result<PruningResult> {
        prune(self.tree, &self.evidence, model, &self.config)
    }
}

/// Outcome of one pruning pass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PruningResult {
    log_likelihood: f64,
    n_states: usize,
    root: NodeId,
    table: Vec<f64>,
    root_prior: Vec<f64>,
}

impl PruningResult {
    /// `ln P(data | tree, model)`.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// `ln L_n(s)` for every state `s` of `node`.
    ///
    /// # Panics
    ///
    /// Panics if `node` is not a node of the evaluated tree.
    pub fn node_log_likelihoods(&self, node: NodeId) -> &[f64] {
        &self.table[node * self.n_states..(node + 1) * self.n_states]
    }

    pub fn root_log_likelihoods(&self) -> &[f64] {
        self.node_log_likelihoods(self.root)
    }

    /// The root prior the total was weighted with.
    pub fn root_prior(&self) -> &[f64] {
        &self.root_prior
    }

    /// Posterior distribution of the root state,
    /// `pi(s) L_root(s) / sum_s' pi(s') L_root(s')`.
    ///
    /// `None` when the data are impossible under the model.
    pub fn root_posterior(&self) -> Option<Vec<f64>> {
        if self.log_likelihood == f64::NEG_INFINITY {
            return None;
        }
        Some(
            self.root_prior
                .iter()
                .zip(self.root_log_likelihoods())
                .map(|(&p, &l)| (p.ln() + l - self.log_likelihood).exp())
                .collect(),
        )
    }
}

fn check_tip_count(tree: &PruningTree, evidence: &TipEvidence) -> Result<()> {
    if evidence.n_tips() != tree.n_tips() {
        return Err(FelsenError::InvalidInput(format!(
            "evidence has {} tip rows but the tree has {} tips",
            evidence.n_tips(),
            tree.n_tips()
        )));
    }
    Ok(())
}

fn non_finite(node: NodeId, value: f64) -> FelsenError {
    warn!(node, value, "likelihood evaluation aborted");
    FelsenError::NonFiniteLikelihood(format!(
        "log-likelihood at node {} became {}",
        node, value
    ))
}

/// One pruning pass over `tree`. Inputs are only read.
pub(crate) fn prune<M: RateModel + ?Sized>(
    tree: &PruningTree,
    evidence: &TipEvidence,
    model: &M,
    config: &EngineConfig,
) -> Result<PruningResult> {
    check_tip_count(tree, evidence)?;
    let d = evidence.n_states();
    if model.n_states() != d {
        return Err(FelsenError::InvalidInput(format!(
            "model has {} states but the evidence has {}",
            model.n_states(),
            d
        )));
    }
    let prior = config.root_prior.resolve(model)?;

    let mut table = vec![0.0; tree.n_nodes() * d];
    for tip in 0..tree.n_tips() {
        table[tip * d..(tip + 1) * d].copy_from_slice(evidence.log_row(tip));
    }

    let mut cache: HashMap<u64, TransitionMatrix> = HashMap::new();
    let mut uncached;
    let mut child_row = vec![0.0; d];

    for branch in tree.branches() {
        // An all-ones tip contributes ln(sum_i P_si) = 0 for every state.
        if tree.is_tip(branch.child) && evidence.is_missing(branch.child) {
            continue;
        }

        let p: &TransitionMatrix = if config.cache_transitions {
            match cache.entry(branch.length.to_bits()) {
                Entry::Occupied(e) => &*e.into_mut(),
                Entry::Vacant(e) => &*e.insert(model.transition_probs(branch.length)?),
            }
        } else {
            uncached = model.transition_probs(branch.length)?;
            &uncached
        };

        child_row.copy_from_slice(&table[branch.child * d..(branch.child + 1) * d]);
        let parent_row = &mut table[branch.parent * d..(branch.parent + 1) * d];
        for (s, acc) in parent_row.iter_mut().enumerate() {
            *acc += ln_weighted_sum(p.row(s), &child_row);
            if acc.is_nan() || *acc == f64::INFINITY {
                return Err(non_finite(branch.parent, *acc));
            }
        }
    }

    let root = tree.root();
    let weighted: Vec<f64> = prior
        .iter()
        .zip(&table[root * d..(root + 1) * d])
        .map(|(&pi, &l)| pi.ln() + l)
        .collect();
    let total = log_sum_exp(&weighted);
    if total.is_nan() || total == f64::INFINITY {
        return Err(non_finite(root, total));
    }

    trace!(
        n_nodes = tree.n_nodes(),
        cached_matrices = cache.len(),
        log_likelihood = total,
        "pruning pass complete"
    );
    Ok(PruningResult {
        log_likelihood: total,
        n_states: d,
        root,
        table,
        root_prior: prior,
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::rate::EqualRates;
    use proptest::prelude::*;

    fn sample_tree(lengths: &[f64]) -> PruningTree {
        PruningTree::from_edges(7, 4, &[4, 4, 5, 5, 6, 6], &[0, 1, 2, 3, 4, 5], lengths).unwrap()
    }

    /// Rename tips by `tip_map` and internal nodes `4..7` by `4 + inner_map`.
    fn relabel(
        tree: &PruningTree,
        states: &[Option<usize>],
        tip_map: &[usize],
        inner_map: &[usize],
    ) -> (PruningTree, Vec<Option<usize>>) {
        let to_new = |n: usize| if n < 4 { tip_map[n] } else { 4 + inner_map[n - 4] };
        let mut parents = vec![None; 7];
        let mut lengths = vec![0.0; 7];
        let mut permuted = vec![None; 4];
        for old in 0..7 {
            parents[to_new(old)] = tree.parent(old).map(to_new);
            lengths[to_new(old)] = tree.branch_length(old).unwrap_or(0.0);
            if old < 4 {
                permuted[to_new(old)] = states[old];
            }
        }
        (PruningTree::from_parents(&parents, &lengths, 4).unwrap(), permuted)
    }

    proptest! {
        #[test]
        fn relabelling_preserves_likelihood(
            lengths in proptest::collection::vec(0.01f64..2.0, 6),
            states in proptest::collection::vec(0usize..3, 4),
            tip_map in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle(),
            inner_map in Just((0..3usize).collect::<Vec<_>>()).prop_shuffle(),
            rate in 0.05f64..3.0,
        ) {
            let tree = sample_tree(&lengths);
            let states: Vec<Option<usize>> = states.into_iter().map(Some).collect();
            let model = EqualRates::new(3, rate).unwrap();
            let base = PruningEngine::new(&tree, TipEvidence::from_states(&states, 3).unwrap())
                .unwrap()
                .log_likelihood(&model)
                .unwrap();

            let (relabelled, permuted) = relabel(&tree, &states, &tip_map, &inner_map);
            let ll = PruningEngine::new(&relabelled, TipEvidence::from_states(&permuted, 3).unwrap())
                .unwrap()
                .log_likelihood(&model)
                .unwrap();
            prop_assert!((ll - base).abs() < 1e-10);
        }

        #[test]
        fn log_likelihood_is_a_log_probability(
            lengths in proptest::collection::vec(0.01f64..3.0, 6),
            states in proptest::collection::vec(0usize..2, 4),
            gain in 0.01f64..5.0,
            loss in 0.01f64..5.0,
        ) {
            let tree = sample_tree(&lengths);
            let states: Vec<Option<usize>> = states.into_iter().map(Some).collect();
            let evidence = TipEvidence::from_states(&states, 2).unwrap();
            let engine = PruningEngine::new(&tree, evidence).unwrap();
            let ll = engine.log_likelihood_binary(gain, loss).unwrap();
            prop_assert!(ll <= 1e-12);
            prop_assert!(ll > f64::NEG_INFINITY);
        }

        #[test]
        fn missing_tip_never_lowers_likelihood(
            lengths in proptest::collection::vec(0.01f64..2.0, 6),
            states in proptest::collection::vec(0usize..3, 4),
            tip in 0usize..4,
            rate in 0.05f64..3.0,
        ) {
            let tree = sample_tree(&lengths);
            let states: Vec<Option<usize>> = states.into_iter().map(Some).collect();
            let evidence = TipEvidence::from_states(&states, 3).unwrap();
            let masked = evidence.with_missing(tip).unwrap();
            let model = EqualRates::new(3, rate).unwrap();
            let full = PruningEngine::new(&tree, evidence).unwrap().log_likelihood(&model).unwrap();
            let less = PruningEngine::new(&tree, masked).unwrap().log_likelihood(&model).unwrap();
            prop_assert!(less >= full - 1e-12);
        }

        #[test]
        fn summed_over_all_patterns_is_one(
            lengths in proptest::collection::vec(0.0f64..2.0, 6),
            gain in 0.05f64..3.0,
            loss in 0.05f64..3.0,
        ) {
            let tree = sample_tree(&lengths);
            let mut total = 0.0;
            for pattern in 0..16usize {
                let states: Vec<Option<usize>> = (0..4).map(|t| Some((pattern >> t) & 1)).collect();
                let evidence = TipEvidence::from_states(&states, 2).unwrap();
                let engine = PruningEngine::new(&tree, evidence).unwrap();
                total += engine.log_likelihood_binary(gain, loss).unwrap().exp();
            }
            prop_assert!((total - 1.0).abs() < 1e-9);
        }
    }
}
