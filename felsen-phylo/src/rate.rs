//! Continuous-time Markov rate models.
//!
//! A [`RateModel`] owns a generator matrix `Q` and exposes the transition
//! probability matrix `P(t) = exp(Qt)` for an elapsed time `t`. Three models
//! are provided:
//!
//! - [`BinaryRates`]: two states parameterised by gain and loss rates, with
//!   the closed-form solution.
//! - [`EqualRates`]: `k` states with one shared rate (the Mk model), also
//!   closed form.
//! - [`RateMatrix`]: an arbitrary validated `D × D` generator. Two-state
//!   matrices reuse the binary closed form; reversible chains are
//!   diagonalized once; everything else uses Padé scaling-and-squaring.

use felsen_core::{FelsenError, Result};
use tracing::debug;

use crate::expm::{self, SymmetricEigen};

/// Default tolerance for generator invariants (row sums, non-negativity).
pub const RATE_TOLERANCE: f64 = 1e-9;

/// Stationary probabilities below this floor send a chain to the Padé path.
const STATIONARY_FLOOR: f64 = 1e-10;

/// A row-stochastic transition probability matrix `P(t)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionMatrix {
    n: usize,
    data: Vec<f64>,
}

impl TransitionMatrix {
    /// Wrap a row-major `n × n` matrix.
    pub fn from_row_major(n: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != n * n {
            return Err(FelsenError::InvalidInput(format!(
                "expected {} entries for a {}x{} matrix, got {}",
                n * n,
                n,
                n,
                data.len()
            )));
        }
        Ok(Self { n, data })
    }

    /// The `n × n` identity, `P(0)` for every model.
    pub fn identity(n: usize) -> Self {
        Self {
            n,
            data: expm::identity(n),
        }
    }

    /// Number of states `n` of this `n × n` matrix.
    pub fn n_states(&self) -> usize {
        self.n
    }

    /// Probability of ending in `to` given a start in `from`.
    pub fn get(&self, from: usize, to: usize) -> f64 {
        self.data[from * self.n + to]
    }

    /// Row `from`: the distribution over end states.
    pub fn row(&self, from: usize) -> &[f64] {
        &self.data[from * self.n..(from + 1) * self.n]
    }

    /// Row-major entries.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Sum of each row; all ones up to round-off.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.row(i).iter().sum()).collect()
    }

    /// Matrix product `self · other`, e.g. `P(t1) P(t2)`.
    pub fn matmul(&self, other: &TransitionMatrix) -> Result<TransitionMatrix> {
        if self.n != other.n {
            return Err(FelsenError::InvalidInput(format!(
                "cannot multiply {}-state and {}-state matrices",
                self.n, other.n
            )));
        }
        Ok(Self {
            n: self.n,
            data: expm::mat_mul(&self.data, &other.data, self.n),
        })
    }

    /// Nested-vector copy, row by row.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.n).map(|i| self.row(i).to_vec()).collect()
    }
}

/// A continuous-time Markov chain over `n_states()` states.
pub trait RateModel {
    /// Number of character states.
    fn n_states(&self) -> usize;

    /// Instantaneous rate matrix Q (N x N).
    fn rate_matrix(&self) -> Vec<Vec<f64>>;

    /// Transition probability matrix P(t) = exp(Qt) for branch length t.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidBranchLength`] if `t` is negative or non-finite.
    fn transition_probs(&self, t: f64) -> Result<TransitionMatrix>;

    /// Stationary distribution `π` with `πQ = 0` and `Σπ = 1`.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidRateMatrix`] if the distribution is not unique.
    fn stationary(&self) -> Result<Vec<f64>>;
}

pub(crate) fn check_time(t: f64) -> Result<()> {
    if !t.is_finite() || t < 0.0 {
        return Err(FelsenError::InvalidBranchLength(format!(
            "elapsed time must be finite and >= 0, got {}",
            t
        )));
    }
    Ok(())
}

/// Closed-form two-state transition matrix.
///
/// `gain` is the 0 → 1 rate and `loss` the 1 → 0 rate. Uses `expm1` so
/// short branches and slow rates keep full precision; each row sums to one
/// by construction.
pub fn binary_transition(gain: f64, loss: f64, t: f64) -> [[f64; 2]; 2] {
    let scale = gain.max(loss);
    if scale == 0.0 {
        return [[1.0, 0.0], [0.0, 1.0]];
    }
    // Ratios taken on rates scaled into [0, 1] so huge rates cannot overflow.
    let (g, l) = (gain / scale, loss / scale);
    let decayed = -(-scale * ((g + l) * t)).exp_m1();
    let p01 = g / (g + l) * decayed;
    let p10 = l / (g + l) * decayed;
    [[1.0 - p01, p01], [p10, 1.0 - p10]]
}

/// Two-state gain/loss model.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinaryRates {
    /// Rate of 0 → 1 transitions.
    pub gain: f64,
    /// Rate of 1 → 0 transitions.
    pub loss: f64,
}

impl BinaryRates {
    /// # Errors
    ///
    /// [`FelsenError::InvalidRateMatrix`] if either rate is negative or not
    /// finite.
    pub fn new(gain: f64, loss: f64) -> Result<Self> {
        let rates = Self { gain, loss };
        rates.check()?;
        Ok(rates)
    }

    fn check(&self) -> Result<()> {
        for (name, rate) in [("gain", self.gain), ("loss", self.loss)] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(FelsenError::InvalidRateMatrix(format!(
                    "{} rate must be finite and >= 0, got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }
}

impl RateModel for BinaryRates {
    fn n_states(&self) -> usize {
        2
    }

    fn rate_matrix(&self) -> Vec<Vec<f64>> {
        vec![vec![-self.gain, self.gain], vec![self.loss, -self.loss]]
    }

    fn transition_probs(&self, t: f64) -> Result<TransitionMatrix> {
        self.check()?;
        check_time(t)?;
        let p = binary_transition(self.gain, self.loss, t);
        Ok(TransitionMatrix {
            n: 2,
            data: vec![p[0][0], p[0][1], p[1][0], p[1][1]],
        })
    }

    fn stationary(&self) -> Result<Vec<f64>> {
        self.check()?;
        binary_stationary(self.gain, self.loss)
    }
}

fn binary_stationary(gain: f64, loss: f64) -> Result<Vec<f64>> {
    let scale = gain.max(loss);
    if scale == 0.0 {
        return Err(FelsenError::InvalidRateMatrix(
            "stationary distribution is not unique: both rates are zero".into(),
        ));
    }
    let (g, l) = (gain / scale, loss / scale);
    Ok(vec![l / (g + l), g / (g + l)])
}

/// Equal-rates (Mk) model: every off-diagonal rate equals `rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EqualRates {
    pub n_states: usize,
    pub rate: f64,
}

impl EqualRates {
    /// # Errors
    ///
    /// [`FelsenError::InvalidRateMatrix`] for fewer than 2 states or a
    /// negative or non-finite rate.
    pub fn new(n_states: usize, rate: f64) -> Result<Self> {
        let model = Self { n_states, rate };
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<()> {
        if self.n_states < 2 {
            return Err(FelsenError::InvalidRateMatrix(format!(
                "need at least 2 states, got {}",
                self.n_states
            )));
        }
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(FelsenError::InvalidRateMatrix(format!(
                "rate must be finite and >= 0, got {}",
                self.rate
            )));
        }
        Ok(())
    }
}

impl RateModel for EqualRates {
    fn n_states(&self) -> usize {
        self.n_states
    }

    fn rate_matrix(&self) -> Vec<Vec<f64>> {
        let k = self.n_states;
        let diag = -(k as f64 - 1.0) * self.rate;
        (0..k)
            .map(|i| (0..k).map(|j| if i == j { diag } else { self.rate }).collect())
            .collect()
    }

    /// P(same) = 1/k + (k-1)/k · e^{-k r t}, P(diff) = 1/k - 1/k · e^{-k r t}.
    fn transition_probs(&self, t: f64) -> Result<TransitionMatrix> {
        self.check()?;
        check_time(t)?;
        let k = self.n_states;
        let kf = k as f64;
        let p_diff = -(-kf * (self.rate * t)).exp_m1() / kf;
        let p_same = 1.0 - (kf - 1.0) * p_diff;
        let mut data = vec![p_diff; k * k];
        for i in 0..k {
            data[i * k + i] = p_same;
        }
        Ok(TransitionMatrix { n: k, data })
    }

    fn stationary(&self) -> Result<Vec<f64>> {
        self.check()?;
        if self.rate == 0.0 {
            return Err(FelsenError::InvalidRateMatrix(
                "stationary distribution is not unique: rate is zero".into(),
            ));
        }
        Ok(vec![1.0 / self.n_states as f64; self.n_states])
    }
}

/// How `exp(Qt)` is evaluated for a validated [`RateMatrix`].
#[derive(Debug, Clone)]
enum Exponentiation {
    TwoState { gain: f64, loss: f64 },
    Reversible(ReversibleDecomposition),
    Pade,
}

/// `Q = D^{-1/2} U Λ Uᵀ D^{1/2}` with `D = diag(π)`, computed once.
#[derive(Debug, Clone)]
struct ReversibleDecomposition {
    sqrt_pi: Vec<f64>,
    inv_sqrt_pi: Vec<f64>,
    eigen: SymmetricEigen,
}

impl ReversibleDecomposition {
    fn new(q: &[f64], n: usize, pi: &[f64]) -> Self {
        let sqrt_pi: Vec<f64> = pi.iter().map(|&p| p.sqrt()).collect();
        let inv_sqrt_pi: Vec<f64> = sqrt_pi.iter().map(|&sp| 1.0 / sp).collect();

        // Symmetrize: B = diag(sqrt(pi)) * Q * diag(1/sqrt(pi)), then average
        // with its transpose to remove round-off asymmetry.
        let mut b = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                b[i * n + j] = sqrt_pi[i] * q[i * n + j] * inv_sqrt_pi[j];
            }
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let avg = 0.5 * (b[i * n + j] + b[j * n + i]);
                b[i * n + j] = avg;
                b[j * n + i] = avg;
            }
        }

        Self {
            sqrt_pi,
            inv_sqrt_pi,
            eigen: SymmetricEigen::new(&b, n),
        }
    }

    /// P(t) = diag(1/sqrt(pi)) * U * exp(Lambda*t) * U^T * diag(sqrt(pi))
    fn transition(&self, t: f64) -> Vec<f64> {
        let n = self.eigen.n;
        let mut p = self.eigen.reconstruct(|l| (l * t).exp());
        for i in 0..n {
            for j in 0..n {
                p[i * n + j] *= self.inv_sqrt_pi[i] * self.sqrt_pi[j];
            }
        }
        p
    }
}

/// A validated CTMC generator over `D ≥ 2` states.
///
/// Construction checks the generator invariants and precomputes the
/// stationary distribution and the exponentiation strategy, so repeated
/// [`RateModel::transition_probs`] calls only pay for the `t`-dependent
/// work.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")
)]
pub struct RateMatrix {
    n: usize,
    q: Vec<f64>,
    stationary: Option<Vec<f64>>,
    method: Exponentiation,
}

impl RateMatrix {
    /// Validate a square generator given as rows.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::with_tolerance(rows, RATE_TOLERANCE)
    }

    /// Like [`RateMatrix::new`] with a custom invariant tolerance.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidInput`] if `tolerance` is negative or not
    /// finite, otherwise as [`RateMatrix::new`].
    pub fn with_tolerance(rows: Vec<Vec<f64>>, tolerance: f64) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(FelsenError::InvalidInput(format!(
                "tolerance must be finite and >= 0, got {}",
                tolerance
            )));
        }
        let n = rows.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(FelsenError::InvalidRateMatrix(format!(
                "matrix is not square: row {} has {} entries, expected {}",
                i,
                row.len(),
                n
            )));
        }
        Self::build(n, rows.concat(), tolerance)
    }

    /// Validate a row-major `n × n` generator.
    pub fn from_row_major(n: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != n * n {
            return Err(FelsenError::InvalidRateMatrix(format!(
                "expected {} entries for {} states, got {}",
                n * n,
                n,
                data.len()
            )));
        }
        Self::build(n, data, RATE_TOLERANCE)
    }

    /// Two-state generator from gain (0 → 1) and loss (1 → 0) rates.
    pub fn binary(gain: f64, loss: f64) -> Result<Self> {
        Self::new(vec![vec![-gain, gain], vec![loss, -loss]])
    }

    fn build(n: usize, q: Vec<f64>, tolerance: f64) -> Result<Self> {
        validate_generator(n, &q, tolerance)?;

        let (stationary, method) = if n == 2 {
            let (gain, loss) = (q[1].max(0.0), q[2].max(0.0));
            (
                binary_stationary(gain, loss).ok(),
                Exponentiation::TwoState { gain, loss },
            )
        } else {
            let stationary = solve_stationary(n, &q).ok();
            let method = match &stationary {
                Some(pi) if is_reversible(n, &q, pi) => {
                    Exponentiation::Reversible(ReversibleDecomposition::new(&q, n, pi))
                }
                _ => Exponentiation::Pade,
            };
            (stationary, method)
        };

        debug!(
            n_states = n,
            method = match method {
                Exponentiation::TwoState { .. } => "closed-form",
                Exponentiation::Reversible(_) => "eigen",
                Exponentiation::Pade => "pade",
            },
            "validated rate matrix"
        );
        Ok(Self {
            n,
            q,
            stationary,
            method,
        })
    }

    /// Rate from `from` to `to`.
    pub fn rate(&self, from: usize, to: usize) -> f64 {
        self.q[from * self.n + to]
    }

    /// True when `exp(Qt)` uses the precomputed eigendecomposition.
    pub fn is_reversible(&self) -> bool {
        matches!(self.method, Exponentiation::Reversible(_))
    }

    /// `exp(Qt)` by scaling-and-squaring regardless of reversibility.
    pub fn transition_probs_pade(&self, t: f64) -> Result<TransitionMatrix> {
        check_time(t)?;
        let qt: Vec<f64> = self.q.iter().map(|x| x * t).collect();
        let data = expm::expm_pade(&qt, self.n)?;
        Ok(TransitionMatrix {
            n: self.n,
            data: clamp_rows(data, self.n),
        })
    }
}

impl RateModel for RateMatrix {
    fn n_states(&self) -> usize {
        self.n
    }

    fn rate_matrix(&self) -> Vec<Vec<f64>> {
        self.q.chunks(self.n).map(<[f64]>::to_vec).collect()
    }

    fn transition_probs(&self, t: f64) -> Result<TransitionMatrix> {
        check_time(t)?;
        if t == 0.0 {
            return Ok(TransitionMatrix::identity(self.n));
        }
        match &self.method {
            Exponentiation::TwoState { gain, loss } => {
                let p = binary_transition(*gain, *loss, t);
                Ok(TransitionMatrix {
                    n: 2,
                    data: vec![p[0][0], p[0][1], p[1][0], p[1][1]],
                })
            }
            Exponentiation::Reversible(decomposition) => Ok(TransitionMatrix {
                n: self.n,
                data: clamp_rows(decomposition.transition(t), self.n),
            }),
            Exponentiation::Pade => self.transition_probs_pade(t),
        }
    }

    fn stationary(&self) -> Result<Vec<f64>> {
        self.stationary.clone().ok_or_else(|| {
            FelsenError::InvalidRateMatrix(
                "stationary distribution is not unique (reducible chain)".into(),
            )
        })
    }
}

impl TryFrom<Vec<Vec<f64>>> for RateMatrix {
    type Error = FelsenError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::new(rows)
    }
}

impl From<RateMatrix> for Vec<Vec<f64>> {
    fn from(matrix: RateMatrix) -> Self {
        matrix.rate_matrix()
    }
}

fn validate_generator(n: usize, q: &[f64], tolerance: f64) -> Result<()> {
    if n < 2 {
        return Err(FelsenError::InvalidRateMatrix(format!(
            "need at least 2 states, got {}",
            n
        )));
    }
    for i in 0..n {
        let row = &q[i * n..(i + 1) * n];
        let mut scale = 1.0f64;
        for (j, &v) in row.iter().enumerate() {
            if !v.is_finite() {
                return Err(FelsenError::InvalidRateMatrix(format!(
                    "entry ({}, {}) is not finite: {}",
                    i, j, v
                )));
            }
            if i != j && v < -tolerance {
                return Err(FelsenError::InvalidRateMatrix(format!(
                    "off-diagonal entry ({}, {}) is negative: {}",
                    i, j, v
                )));
            }
            scale = scale.max(v.abs());
        }
        let sum: f64 = row.iter().sum();
        if sum.abs() > tolerance * scale {
            return Err(FelsenError::InvalidRateMatrix(format!(
                "row {} sums to {}, expected 0",
                i, sum
            )));
        }
    }
    Ok(())
}

/// Solve `πQ = 0`, `Σπ = 1` by replacing the last balance equation with the
/// normalization constraint. Fails when the chain has more than one closed
/// class.
fn solve_stationary(n: usize, q: &[f64]) -> Result<Vec<f64>> {
    let scale = q.iter().fold(0.0f64, |acc, x| acc.max(x.abs()));
    if scale == 0.0 {
        return Err(FelsenError::InvalidRateMatrix(
            "stationary distribution is not unique: all rates are zero".into(),
        ));
    }
    // A = Qᵀ / scale with its last row set to ones.
    let mut a = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            a[i * n + j] = q[j * n + i] / scale;
        }
    }
    for j in 0..n {
        a[(n - 1) * n + j] = 1.0;
    }
    let mut b = vec![0.0; n];
    b[n - 1] = 1.0;

    let mut pi = expm::solve(&a, &b, n, 1).map_err(|_| {
        FelsenError::InvalidRateMatrix(
            "stationary distribution is not unique (reducible chain)".into(),
        )
    })?;
    for p in pi.iter_mut() {
        if *p < 0.0 {
            *p = 0.0;
        }
    }
    let total: f64 = pi.iter().sum();
    for p in pi.iter_mut() {
        *p /= total;
    }
    Ok(pi)
}

/// Detailed balance `π_i Q_ij = π_j Q_ji` with strictly positive `π`.
fn is_reversible(n: usize, q: &[f64], pi: &[f64]) -> bool {
    if pi.iter().any(|&p| p < STATIONARY_FLOOR) {
        return false;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            let forward = pi[i] * q[i * n + j];
            let backward = pi[j] * q[j * n + i];
            let scale = forward.abs().max(backward.abs());
            if (forward - backward).abs() > 1e-9 * scale {
                return false;
            }
        }
    }
    true
}

/// Clamp round-off negatives to zero and renormalize each row.
fn clamp_rows(mut p: Vec<f64>, n: usize) -> Vec<f64> {
    for row in p.chunks_mut(n) {
        let mut sum = 0.0;
        for v in row.iter_mut() {
            if *v < 0.0 {
                *v = 0.0;
            }
            sum += *v;
        }
        if sum > 0.0 && sum.is_finite() {
            for v in row.iter_mut() {
                *v /= sum;
            }
        }
    }
    p
}
