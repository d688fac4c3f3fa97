//! Felsenstein pruning likelihoods for discrete characters on a fixed tree.
//!
//! Features:
//!
//! - **Tree topology**: [`PruningTree`], an index arena with a precomputed pruning order
//! - **Rate models**: [`RateMatrix`], [`BinaryRates`], [`EqualRates`] and the transition matrices they produce
//! - **Tip evidence**: [`TipEvidence`], per-tip conditional likelihoods with missing data
//! - **Root priors**: [`RootPrior`], uniform, stationary or fixed
//! - **Pruning engine**: [`PruningEngine`], log-space evaluation returning a [`PruningResult`]
//! - **Batch evaluation**: [`batch`], many characters on one tree (rayon-backed with `parallel`)
//!
//! ```
//! use felsen_phylo::{PruningEngine, PruningTree, TipEvidence};
//!
//! // Root 2 with tip 0 at distance 0.1 and tip 1 at distance 0.2.
//! let tree = PruningTree::from_edges(3, 2, &[2, 2], &[0, 1], &[0.1, 0.2])?;
//! let evidence = TipEvidence::from_states(&[Some(1), Some(0)], 2)?;
//! let engine = PruningEngine::new(&tree, evidence)?;
//! let ll = engine.log_likelihood_binary(1.0, 2.0)?;
//! assert!(ll < 0.0);
//! # Ok::<(), felsen_core::FelsenError>(())
//! ```

pub mod batch;
pub mod evidence;
pub mod expm;
pub mod prior;
pub mod pruning;
pub mod rate;
pub mod tree;

pub use evidence::TipEvidence;
pub use prior::RootPrior;
pub use pruning::{EngineConfig, PruningEngine, PruningResult};
pub use rate::{BinaryRates, EqualRates, RateMatrix, RateModel, TransitionMatrix};
pub use tree::{Branch, NodeId, PruningTree, TreeLayout};
