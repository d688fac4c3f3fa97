//! Many independent characters on one shared tree.
//!
//! Each character (a gene family, a binary trait, an alignment column) has
//! its own tip evidence and is evaluated with its own pruning pass. With the
//! `parallel` feature enabled the passes run on rayon's thread pool; results
//! always come back in input order.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use felsen_core::{FelsenError, Result};
use tracing::debug;

use crate::evidence::TipEvidence;
use crate::pruning::{prune, EngineConfig};
use crate::rate::RateModel;
use crate::tree::PruningTree;

/// Log-likelihood of each character under its own model.
///
/// `characters[i]` is evaluated with `models[i]`.
///
/// # Errors
///
/// [`FelsenError::InvalidInput`] if the two slices differ in length.
/// Otherwise the error of the lowest-indexed failing character.
pub fn evaluate_characters<M: RateModel + Sync>(
    tree: &PruningTree,
    characters: &[TipEvidence],
    models: &[M],
    config: &EngineConfig,
) -> Result<Vec<f64>> {
    if characters.len() != models.len() {
        return Err(FelsenError::InvalidInput(format!(
            "{} characters but {} models",
            characters.len(),
            models.len()
        )));
    }
    debug!(n_characters = characters.len(), "evaluating characters");

    #[cfg(feature = "parallel")]
    let results: Vec<Result<f64>> = characters
        .par_iter()
        .zip(models.par_iter())
        .map(|(evidence, model)| {
            prune(tree, evidence, model, config).map(|r| r.log_likelihood())
        })
        .collect();

    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<f64>> = characters
        .iter()
        .zip(models)
        .map(|(evidence, model)| {
            prune(tree, evidence, model, config).map(|r| r.log_likelihood())
        })
        .collect();

    results.into_iter().collect()
}

/// Summed log-likelihood of characters that share one model.
///
/// # Errors
///
/// The error of the lowest-indexed failing character.
pub fn evaluate_shared_model<M: RateModel + Sync + ?Sized>(
    tree: &PruningTree,
    characters: &[TipEvidence],
    model: &M,
    config: &EngineConfig,
) -> Result<f64> {
    debug!(
        n_characters = characters.len(),
        "evaluating characters under one model"
    );

    #[cfg(feature = "parallel")]
    let results: Vec<Result<f64>> = characters
        .par_iter()
        .map(|evidence| prune(tree, evidence, model, config).map(|r| r.log_likelihood()))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<f64>> = characters
        .iter()
        .map(|evidence| prune(tree, evidence, model, config).map(|r| r.log_likelihood()))
        .collect();

    let per_character: Vec<f64> = results.into_iter().collect::<Result<_>>()?;
    Ok(per_character.iter().sum())
}
