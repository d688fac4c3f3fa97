//! Root state distribution policies.

use felsen_core::{FelsenError, Result};

use crate::rate::RateModel;

/// Tolerance on the sum of a fixed root prior.
pub const PRIOR_SUM_TOLERANCE: f64 = 1e-8;

/// How the probability of each state at the root is chosen.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RootPrior {
    /// `1/D` for every state.
    #[default]
    Uniform,
    /// Stationary distribution of the rate model being evaluated.
    Stationary,
    /// A caller-supplied distribution.
    Fixed(Vec<f64>),
}

impl RootPrior {
    /// Fixed prior, validated now rather than at evaluation time.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidPrior`] if an entry is negative or non-finite,
    /// or the entries do not sum to 1 within [`PRIOR_SUM_TOLERANCE`].
    pub fn fixed(pi: Vec<f64>) -> Result<Self> {
        check_distribution(&pi, pi.len())?;
        Ok(Self::Fixed(pi))
    }

    /// Prior vector for one evaluation under `model`.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidPrior`] for a fixed prior of the wrong length or
    /// shape, [`FelsenError::InvalidRateMatrix`] when a stationary prior is
    /// requested from a chain without a unique stationary distribution.
    pub fn resolve<M: RateModel + ?Sized>(&self, model: &M) -> Result<Vec<f64>> {
        let n = model.n_states();
        match self {
            Self::Uniform => Ok(vec![1.0 / n as f64; n]),
            Self::Stationary => model.stationary(),
            Self::Fixed(pi) => {
                check_distribution(pi, n)?;
                Ok(pi.clone())
            }
        }
    }

    /// Check a fixed prior against a state count without a model.
    pub(crate) fn check_len(&self, n_states: usize) -> Result<()> {
        match self {
            Self::Fixed(pi) => check_distribution(pi, n_states),
            _ => Ok(()),
        }
    }
}

fn check_distribution(pi: &[f64], n_states: usize) -> Result<()> {
    if pi.len() != n_states {
        return Err(FelsenError::InvalidPrior(format!(
            "prior has {} entries, expected {}",
            pi.len(),
            n_states
        )));
    }
    if pi.len() < 2 {
        return Err(FelsenError::InvalidPrior(format!(
            "prior needs at least 2 states, got {}",
            pi.len()
        )));
    }
    if let Some(&bad) = pi.iter().find(|p| !p.is_finite() || **p < 0.0) {
        return Err(FelsenError::InvalidPrior(format!(
            "prior entries must be finite and >= 0, got {}",
            bad
        )));
    }
    let sum: f64 = pi.iter().sum();
    if (sum - 1.0).abs() > PRIOR_SUM_TOLERANCE {
        return Err(FelsenError::InvalidPrior(format!(
            "prior must sum to 1, got {}",
            sum
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::{BinaryRates, RateMatrix};

    const TOL: f64 = 1e-12;

    #[test]
    fn uniform_resolves_to_flat_vector() {
        let q = RateMatrix::new(vec![
            vec![-2.0, 1.0, 1.0],
            vec![1.0, -2.0, 1.0],
            vec![1.0, 1.0, -2.0],
        ])
        .unwrap();
        let pi = RootPrior::Uniform.resolve(&q).unwrap();
        assert_eq!(pi.len(), 3);
        for p in pi {
            assert!((p - 1.0 / 3.0).abs() < TOL);
        }
    }

    #[test]
    fn stationary_binary_closed_form() {
        let model = BinaryRates::new(1.0, 2.0).unwrap();
        let pi = RootPrior::Stationary.resolve(&model).unwrap();
        assert!((pi[0] - 2.0 / 3.0).abs() < TOL);
        assert!((pi[1] - 1.0 / 3.0).abs() < TOL);
    }

    #[test]
    fn stationary_of_frozen_chain_fails() {
        let model = BinaryRates::new(0.0, 0.0).unwrap();
        assert!(matches!(
            RootPrior::Stationary.resolve(&model),
            Err(FelsenError::InvalidRateMatrix(_))
        ));
    }

    #[test]
    fn fixed_prior_validation() {
        assert!(RootPrior::fixed(vec![0.25, 0.75]).is_ok());
        assert!(RootPrior::fixed(vec![1.0, 0.0]).is_ok());
        for bad in [
            vec![0.5, 0.6],
            vec![-0.1, 1.1],
            vec![f64::NAN, 1.0],
            vec![1.0],
        ] {
            assert!(matches!(
                RootPrior::fixed(bad),
                Err(FelsenError::InvalidPrior(_))
            ));
        }
    }

    #[test]
    fn fixed_prior_length_checked_against_model() {
        let prior = RootPrior::fixed(vec![0.2, 0.3, 0.5]).unwrap();
        let model = BinaryRates::new(1.0, 1.0).unwrap();
        assert!(matches!(
            prior.resolve(&model),
            Err(FelsenError::InvalidPrior(_))
        ));
        assert!(prior.check_len(3).is_ok());
        assert!(prior.check_len(2).is_err());
    }

    #[test]
    fn fixed_prior_within_tolerance() {
        let prior = RootPrior::fixed(vec![0.5, 0.5 + 1e-10]);
        assert!(prior.is_ok());
    }

    #[test]
    fn default_is_uniform() {
        assert_eq!(RootPrior::default(), RootPrior::Uniform);
    }
}
