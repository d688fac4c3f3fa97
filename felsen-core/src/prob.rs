//! Log-space sums for numerically stable likelihood computation.
//!
//! [`log_sum_exp`] and [`ln_weighted_sum`] shift by the largest term before
//! exponentiating, so sums over many tiny or huge terms neither underflow nor
//! overflow.

/// Compute `ln Σ exp(x_i)` with a max shift.
///
/// Returns `-∞` for an empty slice or when every term is `-∞`. NaN and `+∞`
/// terms propagate so callers can detect them.
pub fn log_sum_exp(xs: &[f64]) -> f64 {
    if xs.iter().any(|x| x.is_nan()) {
        return f64::NAN;
    }
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Compute `ln Σ w_i · exp(x_i)` for non-negative weights `w`.
///
/// This is the pruning step: `w` is a row of a transition matrix and `x`
/// the child's log conditional likelihoods. The sum is shifted by the
/// largest `x_i` that carries a positive weight.
pub fn ln_weighted_sum(weights: &[f64], xs: &[f64]) -> f64 {
    debug_assert_eq!(weights.len(), xs.len());
    let mut max = f64::NEG_INFINITY;
    for (&w, &x) in weights.iter().zip(xs) {
        if x.is_nan() || w.is_nan() {
            return f64::NAN;
        }
        if w > 0.0 && x > max {
            max = x;
        }
    }
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = weights
        .iter()
        .zip(xs)
        .filter(|&(&w, _)| w > 0.0)
        .map(|(&w, &x)| w * (x - max).exp())
        .sum();
    max + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-10;

    #[test]
    fn log_sum_exp_matches_naive_for_moderate_values() {
        let xs = [-1.0, -2.0, -0.5];
        let naive: f64 = xs.iter().map(|x: &f64| x.exp()).sum::<f64>().ln();
        assert!((log_sum_exp(&xs) - naive).abs() < TOL);
    }

    #[test]
    fn log_sum_exp_survives_underflow() {
        // exp(-2000) underflows to 0, the shifted form does not.
        let xs = [-2000.0, -2000.0];
        let expected = -2000.0 + 2.0_f64.ln();
        assert!((log_sum_exp(&xs) - expected).abs() < TOL);
    }

    #[test]
    fn log_sum_exp_survives_overflow() {
        let xs = [1000.0, 1000.0];
        assert!((log_sum_exp(&xs) - (1000.0 + 2.0_f64.ln())).abs() < TOL);
    }

    #[test]
    fn log_sum_exp_edge_cases() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY; 3]), f64::NEG_INFINITY);
        assert!(log_sum_exp(&[0.0, f64::NAN]).is_nan());
        assert_eq!(log_sum_exp(&[0.0, f64::INFINITY]), f64::INFINITY);
    }

    #[test]
    fn weighted_sum_matches_direct() {
        let w = [0.7, 0.3];
        let x = [0.2_f64.ln(), 0.9_f64.ln()];
        let direct = (0.7 * 0.2 + 0.3 * 0.9_f64).ln();
        assert!((ln_weighted_sum(&w, &x) - direct).abs() < TOL);
    }

    #[test]
    fn weighted_sum_ignores_zero_weight_terms() {
        // The impossible child state is only reachable through a zero weight.
        let w = [1.0, 0.0];
        let x = [-3.0, f64::NEG_INFINITY];
        assert!((ln_weighted_sum(&w, &x) + 3.0).abs() < TOL);

        // A huge log value behind a zero weight must not dominate the shift.
        let x = [-3.0, 500.0];
        assert!((ln_weighted_sum(&w, &x) + 3.0).abs() < TOL);
    }

    #[test]
    fn weighted_sum_all_impossible() {
        assert_eq!(
            ln_weighted_sum(&[0.5, 0.5], &[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        assert_eq!(ln_weighted_sum(&[0.0, 0.0], &[0.0, 0.0]), f64::NEG_INFINITY);
    }

    #[test]
    fn weighted_sum_propagates_nan() {
        assert!(ln_weighted_sum(&[f64::NAN, 0.5], &[0.0, 0.0]).is_nan());
        assert!(ln_weighted_sum(&[0.5, 0.5], &[f64::NAN, 0.0]).is_nan());
    }
}
