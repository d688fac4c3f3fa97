//! Dense matrix exponentials for rate matrices with more than two states.
//!
//! Matrices are row-major `n × n` slices. Two algorithms are provided:
//!
//! - [`SymmetricEigen`]: cyclic Jacobi diagonalization of a real symmetric
//!   matrix, used for reversible chains after symmetrization.
//! - [`expm_pade`]: scaling-and-squaring with a degree-6 diagonal Padé
//!   approximant, valid for any square matrix.

use felsen_core::{FelsenError, Result};

const JACOBI_MAX_SWEEPS: usize = 100;
const PADE_DEGREE: usize = 6;
const PADE_NORM_LIMIT: f64 = 0.5;

/// `n × n` identity, row-major.
pub fn identity(n: usize) -> Vec<f64> {
    let mut m = vec![0.0; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    m
}

/// Row-major product `a · b` of two `n × n` matrices.
pub fn mat_mul(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            if aik == 0.0 {
                continue;
            }
            for j in 0..n {
                out[i * n + j] += aik * b[k * n + j];
            }
        }
    }
    out
}

/// Maximum absolute row sum. NaN if any entry is NaN.
pub fn inf_norm(a: &[f64], n: usize) -> f64 {
    (0..n)
        .map(|i| a[i * n..(i + 1) * n].iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0, |max: f64, row| if row.is_nan() || row > max { row } else { max })
}

/// Solve `A X = B` for `X` by Gaussian elimination with partial pivoting.
///
/// `a` is `n × n` and `b` is `n × m`, both row-major. Returns `X` (`n × m`).
pub fn solve(a: &[f64], b: &[f64], n: usize, m: usize) -> Result<Vec<f64>> {
    let cols = n + m;
    let mut aug = vec![0.0; n * cols];
    for i in 0..n {
        aug[i * cols..i * cols + n].copy_from_slice(&a[i * n..(i + 1) * n]);
        aug[i * cols + n..(i + 1) * cols].copy_from_slice(&b[i * m..(i + 1) * m]);
    }

    let scale = a.iter().fold(0.0f64, |acc, x| acc.max(x.abs())).max(f64::MIN_POSITIVE);
    for col in 0..n {
        // Partial pivoting
        let mut max_row = col;
        let mut max_val = aug[col * cols + col].abs();
        for row in (col + 1)..n {
            let val = aug[row * cols + col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }
        if max_val <= 1e-13 * scale {
            return Err(FelsenError::InvalidInput(
                "singular matrix in linear solve".into(),
            ));
        }
        if max_row != col {
            for j in 0..cols {
                aug.swap(col * cols + j, max_row * cols + j);
            }
        }
        // Eliminate below
        let pivot = aug[col * cols + col];
        for row in (col + 1)..n {
            let factor = aug[row * cols + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in col..cols {
                let above = aug[col * cols + j];
                aug[row * cols + j] -= factor * above;
            }
        }
    }

    // Back-substitute every right-hand side
    let mut x = vec![0.0; n * m];
    for r in 0..m {
        for i in (0..n).rev() {
            let mut sum = aug[i * cols + n + r];
            for j in (i + 1)..n {
                sum -= aug[i * cols + j] * x[j * m + r];
            }
            x[i * m + r] = sum / aug[i * cols + i];
        }
    }
    Ok(x)
}

/// `exp(A)` by scaling and squaring with a `(6, 6)` Padé approximant.
///
/// `A` is scaled by `2^-s` until `‖A‖∞ ≤ 1/2`, the rational approximant
/// `D(A)⁻¹ N(A)` is evaluated, and the result is squared `s` times.
pub fn expm_pade(a: &[f64], n: usize) -> Result<Vec<f64>> {
    let norm = inf_norm(a, n);
    if !norm.is_finite() {
        return Err(FelsenError::InvalidInput(
            "matrix exponential of a non-finite matrix".into(),
        ));
    }
    let mut squarings = 0u32;
    let mut scaled_norm = norm;
    while scaled_norm > PADE_NORM_LIMIT {
        scaled_norm /= 2.0;
        squarings += 1;
    }
    let scale = 0.5f64.powi(squarings as i32);
    let a: Vec<f64> = a.iter().map(|x| x * scale).collect();

    let mut numer = identity(n);
    let mut denom = identity(n);
    let mut power = identity(n);
    let mut c = 1.0;
    let q = PADE_DEGREE as f64;
    for k in 1..=PADE_DEGREE {
        let kf = k as f64;
        c *= (q - kf + 1.0) / (kf * (2.0 * q - kf + 1.0));
        power = mat_mul(&a, &power, n);
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        for (idx, &p) in power.iter().enumerate() {
            numer[idx] += c * p;
            denom[idx] += sign * c * p;
        }
    }

    let mut result = solve(&denom, &numer, n, n)?;
    for _ in 0..squarings {
        result = mat_mul(&result, &result, n);
    }
    Ok(result)
}

/// Eigendecomposition `A = U Λ Uᵀ` of a real symmetric matrix.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    pub n: usize,
    pub eigenvalues: Vec<f64>,
    /// Column `k` (row-major `vectors[i * n + k]`) is the `k`-th eigenvector.
    pub vectors: Vec<f64>,
}

impl SymmetricEigen {
    /// Diagonalize a symmetric matrix with cyclic Jacobi rotations.
    pub fn new(matrix: &[f64], n: usize) -> Self {
        let mut a = matrix.to_vec();
        let mut v = identity(n);

        let frobenius = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        for _ in 0..JACOBI_MAX_SWEEPS {
            let mut off = 0.0;
            for i in 0..n {
                for j in (i + 1)..n {
                    off += a[i * n + j] * a[i * n + j];
                }
            }
            if off.sqrt() <= 1e-15 * frobenius {
                break;
            }

            for p in 0..n {
                for q in (p + 1)..n {
                    let apq = a[p * n + q];
                    if apq == 0.0 {
                        continue;
                    }
                    let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                    let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;

                    // A ← A J
                    for k in 0..n {
                        let akp = a[k * n + p];
                        let akq = a[k * n + q];
                        a[k * n + p] = c * akp - s * akq;
                        a[k * n + q] = s * akp + c * akq;
                    }
                    // A ← Jᵀ A
                    for k in 0..n {
                        let apk = a[p * n + k];
                        let aqk = a[q * n + k];
                        a[p * n + k] = c * apk - s * aqk;
                        a[q * n + k] = s * apk + c * aqk;
                    }
                    a[p * n + q] = 0.0;
                    a[q * n + p] = 0.0;
                    // V ← V J
                    for k in 0..n {
                        let vkp = v[k * n + p];
                        let vkq = v[k * n + q];
                        v[k * n + p] = c * vkp - s * vkq;
                        v[k * n + q] = s * vkp + c * vkq;
                    }
                }
            }
        }

        let eigenvalues = (0..n).map(|i| a[i * n + i]).collect();
        Self {
            n,
            eigenvalues,
            vectors: v,
        }
    }

    /// `U f(Λ) Uᵀ` for a scalar function applied to the eigenvalues.
    pub fn reconstruct(&self, f: impl Fn(f64) -> f64) -> Vec<f64> {
        let n = self.n;
        let fl: Vec<f64> = self.eigenvalues.iter().map(|&l| f(l)).collect();
        let mut out = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += self.vectors[i * n + k] * fl[k] * self.vectors[j * n + k];
                }
                out[i * n + j] = sum;
            }
        }
        out
    }
}
