//! Per-tip conditional likelihoods.
//!
//! Row `t` holds `L_t(s)`, the probability of what was observed at tip `t`
//! given that its true state is `s`. An observed state is a one-hot row, a
//! missing observation is the all-ones row, and ambiguity or sequencing error
//! is anything in between. Logarithms are taken once at construction.

use felsen_core::{FelsenError, Result, Summarizable};

/// A `T x D` matrix of tip likelihoods, stored row-major.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")
)]
pub struct TipEvidence {
    n_tips: usize,
    n_states: usize,
    values: Vec<f64>,
    log_values: Vec<f64>,
}

impl TipEvidence {
    /// Build evidence from one row per tip.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidEvidence`] when there are no rows, fewer than
    /// two states, ragged rows, or a row with a negative, non-finite or
    /// all-zero entry set.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        if rows.is_empty() {
            return Err(FelsenError::InvalidEvidence(
                "at least one tip row is required".into(),
            ));
        }
        let n_states = rows[0].len();
        check_state_count(n_states)?;

        let mut values = Vec::with_capacity(rows.len() * n_states);
        for (tip, row) in rows.iter().enumerate() {
            if row.len() != n_states {
                return Err(FelsenError::InvalidEvidence(format!(
                    "tip {} has {} entries, expected {}",
                    tip,
                    row.len(),
                    n_states
                )));
            }
            check_row(tip, row)?;
            values.extend_from_slice(row);
        }
        Ok(Self::from_values(rows.len(), n_states, values))
    }

    /// Build evidence from one observed state per tip; `None` is missing data.
    ///
    /// Binary presence/absence data uses `n_states = 2` with `Some(1)` for
    /// presence and `Some(0)` for absence.
    ///
    /// # Errors
    ///
    /// [`FelsenError::InvalidEvidence`] when a state is `>= n_states`, when
    /// `n_states < 2`, or when `states` is empty.
    pub fn from_states(states: &[Option<usize>], n_states: usize) -> Result<Self> {
        if states.is_empty() {
            return Err(FelsenError::InvalidEvidence(
                "at least one tip state is required".into(),
            ));
        }
        check_state_count(n_states)?;

        let mut values = vec![0.0; states.len() * n_states];
        for (tip, state) in states.iter().enumerate() {
            let row = &mut values[tip * n_states..(tip + 1) * n_states];
            match *state {
                Some(s) if s < n_states => row[s] = 1.0,
                Some(s) => {
                    return Err(FelsenError::InvalidEvidence(format!(
                        "tip {} has state {}, but only {} states exist",
                        tip, s, n_states
                    )))
                }
                None => row.fill(1.0),
            }
        }
        Ok(Self::from_values(states.len(), n_states, values))
    }

    fn from_values(n_tips: usize, n_states: usize, values: Vec<f64>) -> Self {
        let log_values = values.iter().map(|v| v.ln()).collect();
        Self {
            n_tips,
            n_states,
            values,
            log_values,
        }
    }

    /// Copy of this evidence with `tip` replaced by the all-ones row.
    pub fn with_missing(&self, tip: usize) -> Result<Self> {
        self.check_tip(tip)?;
        let mut out = self.clone();
        let range = tip * self.n_states..(tip + 1) * self.n_states;
        out.values[range.clone()].fill(1.0);
        out.log_values[range].fill(0.0);
        Ok(out)
    }

    /// Whether `tip` carries no information (every entry equals 1).
    pub fn is_missing(&self, tip: usize) -> bool {
        tip < self.n_tips && self.row(tip).iter().all(|&v| v == 1.0)
    }

    #[inline]
    pub fn n_tips(&self) -> usize {
        self.n_tips
    }

    #[inline]
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Likelihood row of `tip`.
    ///
    /// # Panics
    ///
    /// Panics if `tip >= n_tips()`.
    pub fn row(&self, tip: usize) -> &[f64] {
        &self.values[tip * self.n_states..(tip + 1) * self.n_states]
    }

    /// Natural log of the likelihood row of `tip`; zero entries are `-inf`.
    ///
    /// # Panics
    ///
    /// Panics if `tip >= n_tips()`.
    pub fn log_row(&self, tip: usize) -> &[f64] {
        &self.log_values[tip * self.n_states..(tip + 1) * self.n_states]
    }

    /// Row-per-tip copy of the likelihood matrix.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values
            .chunks(self.n_states)
            .map(|row| row.to_vec())
            .collect()
    }

    fn check_tip(&self, tip: usize) -> Result<()> {
        if tip >= self.n_tips {
            return Err(FelsenError::InvalidInput(format!(
                "tip {} out of range for {} tips",
                tip, self.n_tips
            )));
        }
        Ok(())
    }
}

fn check_state_count(n_states: usize) -> Result<()> {
    if n_states < 2 {
        return Err(FelsenError::InvalidEvidence(format!(
            "at least 2 states are required, got {}",
            n_states
        )));
    }
    Ok(())
}

fn check_row(tip: usize, row: &[f64]) -> Result<()> {
    if let Some(&bad) = row.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(FelsenError::InvalidEvidence(format!(
            "tip {} has entry {}; entries must be finite and >= 0",
            tip, bad
        )));
    }
    if row.iter().all(|&v| v == 0.0) {
        return Err(FelsenError::InvalidEvidence(format!(
            "tip {} rules out every state",
            tip
        )));
    }
    Ok(())
}

impl TryFrom<Vec<Vec<f64>>> for TipEvidence {
    type Error = FelsenError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_rows(&rows)
    }
}

impl From<TipEvidence> for Vec<Vec<f64>> {
    fn from(evidence: TipEvidence) -> Self {
        evidence.to_rows()
    }
}

impl Summarizable for TipEvidence {
    fn summary(&self) -> String {
        let missing = (0..self.n_tips).filter(|&t| self.is_missing(t)).count();
        format!(
            "TipEvidence: {} tips x {} states ({} missing)",
            self.n_tips, self.n_states, missing
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_states_builds_one_hot_rows() {
        let ev = TipEvidence::from_states(&[Some(1), Some(0), None], 2).unwrap();
        assert_eq!(ev.n_tips(), 3);
        assert_eq!(ev.n_states(), 2);
        assert_eq!(ev.row(0), &[0.0, 1.0]);
        assert_eq!(ev.row(1), &[1.0, 0.0]);
        assert_eq!(ev.row(2), &[1.0, 1.0]);
        assert!(ev.is_missing(2));
        assert!(!ev.is_missing(0));
    }

    #[test]
    fn log_rows_precomputed() {
        let ev = TipEvidence::from_rows(&[vec![0.0, 0.25], vec![1.0, 1.0]]).unwrap();
        assert_eq!(ev.log_row(0)[0], f64::NEG_INFINITY);
        assert!((ev.log_row(0)[1] - 0.25_f64.ln()).abs() < 1e-15);
        assert_eq!(ev.log_row(1), &[0.0, 0.0]);
    }

    #[test]
    fn ambiguous_rows_are_accepted() {
        let ev = TipEvidence::from_rows(&[vec![0.9, 0.1, 0.0]]).unwrap();
        assert_eq!(ev.row(0), &[0.9, 0.1, 0.0]);
    }

    #[test]
    fn rejects_invalid_rows() {
        for rows in [
            vec![vec![0.0, 0.0]],
            vec![vec![-0.1, 1.0]],
            vec![vec![f64::NAN, 1.0]],
            vec![vec![f64::INFINITY, 1.0]],
            vec![vec![1.0, 0.0], vec![1.0]],
            vec![vec![1.0]],
            vec![],
        ] {
            assert!(
                matches!(
                    TipEvidence::from_rows(&rows),
                    Err(FelsenError::InvalidEvidence(_))
                ),
                "rows {:?} should be rejected",
                rows
            );
        }
    }

    #[test]
    fn rejects_out_of_range_state() {
        let err = TipEvidence::from_states(&[Some(0), Some(2)], 2).unwrap_err();
        assert!(matches!(err, FelsenError::InvalidEvidence(_)));
        assert!(TipEvidence::from_states(&[Some(0)], 1).is_err());
        assert!(TipEvidence::from_states(&[], 2).is_err());
    }

    #[test]
    fn with_missing_replaces_one_tip() {
        let ev = TipEvidence::from_states(&[Some(0), Some(1)], 2).unwrap();
        let masked = ev.with_missing(1).unwrap();
        assert_eq!(masked.row(0), ev.row(0));
        assert_eq!(masked.row(1), &[1.0, 1.0]);
        assert_eq!(masked.log_row(1), &[0.0, 0.0]);
        // The source is untouched.
        assert_eq!(ev.row(1), &[0.0, 1.0]);
        assert!(matches!(
            ev.with_missing(2),
            Err(FelsenError::InvalidInput(_))
        ));
    }

    #[test]
    fn rows_round_trip() {
        let rows = vec![vec![1.0, 0.0, 0.5], vec![0.0, 0.0, 1.0]];
        let ev = TipEvidence::try_from(rows.clone()).unwrap();
        let back: Vec<Vec<f64>> = ev.into();
        assert_eq!(back, rows);
    }

    #[test]
    fn summary_counts_missing() {
        let ev = TipEvidence::from_states(&[None, Some(1), None], 3).unwrap();
        assert_eq!(ev.summary(), "TipEvidence: 3 tips x 3 states (2 missing)");
    }
}
