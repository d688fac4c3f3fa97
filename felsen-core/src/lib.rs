//! Shared primitives for the felsen likelihood workspace.
//!
//! `felsen-core` provides the foundation the likelihood crates build on:
//!
//! - **Error types**: [`FelsenError`] and [`Result`] for structured error handling
//! - **Log-space arithmetic**: [`log_sum_exp`], [`ln_weighted_sum`]
//! - **Traits**: [`Summarizable`]

pub mod error;
pub mod prob;
pub mod traits;

pub use error::{FelsenError, Result};
pub use prob::{ln_weighted_sum, log_sum_exp};
pub use traits::*;
