//! Design matrices and penalised logistic regression.
//!
//! The logistic model is the propensity-score model used by
//! [`crate::psm`]: an L2 penalty on the slopes (never the intercept) with
//! inverse strength `C`, the same objective as scikit-learn's default
//! `LogisticRegression`, solved here by damped Newton iterations.

use lc_core::{Error, Result};
use lc_prob::math::{ln_clamped, log1pexp, sigmoid};
use nalgebra::{DMatrix, DVector};

/// Name given to the intercept column by [`DesignMatrix::with_intercept`].
pub const INTERCEPT: &str = "const";

#[inline]
fn row_dot(x_row: &[f64], beta: &[f64]) -> f64 {
    debug_assert_eq!(x_row.len(), beta.len());
    x_row.iter().zip(beta).map(|(&x, &b)| x * b).sum()
}

/// Dense row-major design matrix with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    n: usize,
    names: Vec<String>,
    data: Vec<f64>, // length n*p, row-major
}

impl DesignMatrix {
    /// Matrix with `n` rows and no columns.
    pub fn empty(n: usize) -> Self {
        Self { n, names: Vec::new(), data: Vec::new() }
    }

    /// Build from named columns. All columns must have the same length and
    /// contain only finite values.
    pub fn from_columns(names: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(Error::Validation(format!(
                "{} column names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        let n = columns.first().map(|c| c.len()).unwrap_or(0);
        for (name, col) in names.iter().zip(&columns) {
            if col.len() != n {
                return Err(Error::Validation(format!(
                    "column '{}' has length {}, expected {}",
                    name,
                    col.len(),
                    n
                )));
            }
            if let Some(i) = col.iter().position(|v| !v.is_finite()) {
                return Err(Error::Validation(format!(
                    "column '{}' has a missing or non-finite value at row {}",
                    name, i
                )));
            }
        }
        let p = columns.len();
        let mut data = vec![0.0; n * p];
        for (j, col) in columns.iter().enumerate() {
            for (i, &v) in col.iter().enumerate() {
                data[i * p + j] = v;
            }
        }
        Ok(Self { n, names, data })
    }

    pub fn n_rows(&self) -> usize {
        self.n
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        let p = self.n_cols();
        &self.data[i * p..(i + 1) * p]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n_cols() + j]
    }

    /// Copy of column `j`.
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.n).map(|i| self.get(i, j)).collect()
    }

    /// New matrix with a leading [`INTERCEPT`] column of ones.
    pub fn with_intercept(&self) -> Self {
        let p = self.n_cols();
        let mut data = Vec::with_capacity(self.n * (p + 1));
        for i in 0..self.n {
            data.push(1.0);
            data.extend_from_slice(self.row(i));
        }
        let mut names = Vec::with_capacity(p + 1);
        names.push(INTERCEPT.to_string());
        names.extend(self.names.iter().cloned());
        Self { n: self.n, names, data }
    }

    /// Horizontal concatenation `[self | other]`.
    pub fn hstack(&self, other: &Self) -> Result<Self> {
        if self.n != other.n {
            return Err(Error::Validation(format!(
                "cannot stack matrices with {} and {} rows",
                self.n, other.n
            )));
        }
        let (pa, pb) = (self.n_cols(), other.n_cols());
        let mut data = Vec::with_capacity(self.n * (pa + pb));
        for i in 0..self.n {
            data.extend_from_slice(self.row(i));
            data.extend_from_slice(other.row(i));
        }
        let mut names = self.names.clone();
        names.extend(other.names.iter().cloned());
        Ok(Self { n: self.n, names, data })
    }

    /// Rows `rows` in the given order (repeats allowed).
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let p = self.n_cols();
        let mut data = Vec::with_capacity(rows.len() * p);
        for &i in rows {
            data.extend_from_slice(self.row(i));
        }
        Self { n: rows.len(), names: self.names.clone(), data }
    }

    /// Replace every column by `f(column)`; names are kept.
    pub fn map_columns<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>>,
    {
        let cols = (0..self.n_cols())
            .map(|j| f(&self.column(j)))
            .collect::<Result<Vec<_>>>()?;
        if cols.is_empty() {
            return Ok(Self::empty(self.n));
        }
        Self::from_columns(self.names.clone(), cols)
    }

    pub fn to_dmatrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.n, self.n_cols(), &self.data)
    }
}

/// L2-penalised logistic regression.
///
/// Minimises `0.5·‖w‖² + C·Σ_i [log(1+exp(η_i)) − y_i·η_i]` with
/// `η_i = b + x_iᵀw`; the intercept `b` is not penalised.
#[derive(Debug, Clone, Copy)]
pub struct LogisticRegression {
    /// Inverse regularisation strength.
    pub c: f64,
    pub max_iter: usize,
    /// Convergence tolerance on the Newton step (L∞).
    pub tol: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self { c: 1.0, max_iter: 1000, tol: 1e-8 }
    }
}

/// Fitted logistic model.
#[derive(Debug, Clone)]
pub struct LogisticFit {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    pub n_iter: usize,
    pub converged: bool,
    /// Unpenalised log-likelihood at the optimum.
    pub log_likelihood: f64,
    /// Log-likelihood of the intercept-only model.
    pub null_log_likelihood: f64,
}

impl LogisticFit {
    /// P(y = 1 | x) for each row of `x`.
    pub fn predict_proba(&self, x: &DesignMatrix) -> Result<Vec<f64>> {
        if x.n_cols() != self.coefficients.len() {
            return Err(Error::Validation(format!(
                "expected {} feature columns, got {}",
                self.coefficients.len(),
                x.n_cols()
            )));
        }
        Ok((0..x.n_rows())
            .map(|i| sigmoid(self.intercept + row_dot(x.row(i), &self.coefficients)))
            .collect())
    }

    /// McFadden pseudo-R²: `1 − ℓ(model)/ℓ(null)`.
    pub fn pseudo_r_squared(&self) -> f64 {
        if self.null_log_likelihood == 0.0 {
            return f64::NAN;
        }
        1.0 - self.log_likelihood / self.null_log_likelihood
    }
}

impl LogisticRegression {
    pub fn new(c: f64) -> Self {
        Self { c, ..Self::default() }
    }

    fn objective(&self, x: &DesignMatrix, y: &[u8], theta: &[f64]) -> f64 {
        let (b0, w) = (theta[0], &theta[1..]);
        let mut nll = 0.0;
        for i in 0..x.n_rows() {
            let eta = b0 + row_dot(x.row(i), w);
            nll += log1pexp(eta) - (y[i] as f64) * eta;
        }
        self.c * nll + 0.5 * w.iter().map(|v| v * v).sum::<f64>()
    }

    /// Fit `y ~ x` (an intercept is always included; do not add one to `x`).
    pub fn fit(&self, x: &DesignMatrix, y: &[u8]) -> Result<LogisticFit> {
        let n = x.n_rows();
        let p = x.n_cols();
        if n == 0 {
            return Err(Error::Validation("X/y must be non-empty".to_string()));
        }
        if y.len() != n {
            return Err(Error::Validation(format!(
                "y has wrong length: expected n={}, got {}",
                n,
                y.len()
            )));
        }
        if y.iter().any(|&v| v > 1) {
            return Err(Error::Validation("y must contain only 0/1 values".to_string()));
        }
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(Error::Validation(format!("C must be positive, got {}", self.c)));
        }

        let d = p + 1;
        let mut theta = vec![0.0; d];
        let mut f = self.objective(x, y, &theta);
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 0..self.max_iter {
            n_iter = iter + 1;
            let mut grad = DVector::<f64>::zeros(d);
            let mut hess = DMatrix::<f64>::zeros(d, d);
            for i in 0..n {
                let row = x.row(i);
                let mu = sigmoid(theta[0] + row_dot(row, &theta[1..]));
                let err = self.c * (mu - y[i] as f64);
                let wgt = self.c * mu * (1.0 - mu);
                grad[0] += err;
                hess[(0, 0)] += wgt;
                for a in 0..p {
                    grad[1 + a] += err * row[a];
                    hess[(0, 1 + a)] += wgt * row[a];
                    for b in a..p {
                        hess[(1 + a, 1 + b)] += wgt * row[a] * row[b];
                    }
                }
            }
            for a in 0..p {
                grad[1 + a] += theta[1 + a];
                hess[(1 + a, 1 + a)] += 1.0;
            }
            for a in 0..d {
                for b in 0..a {
                    hess[(a, b)] = hess[(b, a)];
                }
            }
            // Perfect separation drives the intercept curvature to zero.
            hess[(0, 0)] += 1e-12;

            let step = match hess.clone().cholesky() {
                Some(ch) => ch.solve(&grad),
                None => hess.lu().solve(&grad).ok_or_else(|| {
                    Error::Computation("logistic Hessian is singular".to_string())
                })?,
            };

            let mut t = 1.0;
            let mut candidate: Vec<f64> = theta.iter().zip(step.iter()).map(|(a, s)| a - s).collect();
            let mut f_new = self.objective(x, y, &candidate);
            while f_new > f && t > 1e-10 {
                t *= 0.5;
                candidate = theta.iter().zip(step.iter()).map(|(a, s)| a - t * s).collect();
                f_new = self.objective(x, y, &candidate);
            }

            let max_step = step.iter().fold(0.0_f64, |m, s| m.max((t * s).abs()));
            theta = candidate;
            f = f_new;
            if max_step < self.tol {
                converged = true;
                break;
            }
        }

        let mut ll = 0.0;
        let mut n_pos = 0usize;
        for i in 0..n {
            let mu = sigmoid(theta[0] + row_dot(x.row(i), &theta[1..]));
            let yi = y[i] as f64;
            ll += yi * ln_clamped(mu, 1e-10) + (1.0 - yi) * ln_clamped(1.0 - mu, 1e-10);
            n_pos += y[i] as usize;
        }
        let p_bar = n_pos as f64 / n as f64;
        let null_ll = n_pos as f64 * ln_clamped(p_bar, 1e-10)
            + (n - n_pos) as f64 * ln_clamped(1.0 - p_bar, 1e-10);

        Ok(LogisticFit {
            intercept: theta[0],
            coefficients: theta[1..].to_vec(),
            n_iter,
            converged,
            log_likelihood: ll,
            null_log_likelihood: null_ll,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ns: &[&str]) -> Vec<String> {
        ns.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_design_matrix_layout() {
        let x = DesignMatrix::from_columns(names(&["a", "b"]), vec![vec![1.0, 2.0], vec![3.0, 4.0]])
            .unwrap();
        assert_eq!(x.row(1), &[2.0, 4.0]);
        assert_eq!(x.column(1), vec![3.0, 4.0]);
        let xi = x.with_intercept();
        assert_eq!(xi.names()[0], INTERCEPT);
        assert_eq!(xi.row(0), &[1.0, 1.0, 3.0]);
        let sel = x.select_rows(&[1, 1, 0]);
        assert_eq!(sel.n_rows(), 3);
        assert_eq!(sel.row(1), &[2.0, 4.0]);
    }

    #[test]
    fn test_design_matrix_rejects_missing() {
        let err = DesignMatrix::from_columns(names(&["gdp"]), vec![vec![1.0, f64::NAN]]).unwrap_err();
        assert!(err.to_string().contains("gdp"));
        assert!(DesignMatrix::from_columns(names(&["a", "b"]), vec![vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_logistic_gradient_vanishes_at_optimum() {
        let xs = vec![-2.0, -1.5, -1.0, -0.5, 0.0, 0.3, 0.5, 1.0, 1.5, 2.0, 2.5, -0.2];
        let y = vec![0, 0, 1, 0, 0, 1, 0, 1, 1, 1, 1, 0];
        let x = DesignMatrix::from_columns(names(&["x"]), vec![xs.clone()]).unwrap();
        let model = LogisticRegression::new(1.0);
        let fit = model.fit(&x, &y).unwrap();
        assert!(fit.converged);
        assert!(fit.coefficients[0] > 0.0);

        // Stationarity of the penalised objective.
        let p = fit.predict_proba(&x).unwrap();
        let g0: f64 = p.iter().zip(&y).map(|(pi, &yi)| pi - yi as f64).sum();
        let g1: f64 = p.iter().zip(&y).zip(&xs).map(|((pi, &yi), xi)| (pi - yi as f64) * xi).sum::<f64>()
            + fit.coefficients[0];
        assert!(g0.abs() < 1e-6, "g0={}", g0);
        assert!(g1.abs() < 1e-6, "g1={}", g1);
        let r2 = fit.pseudo_r_squared();
        assert!(r2 > 0.0 && r2 < 1.0, "pseudo r2 = {}", r2);
    }

    #[test]
    fn test_logistic_stronger_penalty_shrinks() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 / 4.0 - 2.5).collect();
        let y: Vec<u8> = xs.iter().enumerate().map(|(i, &v)| u8::from(v > 0.0 || i % 7 == 0)).collect();
        let x = DesignMatrix::from_columns(names(&["x"]), vec![xs]).unwrap();
        let loose = LogisticRegression::new(10.0).fit(&x, &y).unwrap();
        let tight = LogisticRegression::new(0.01).fit(&x, &y).unwrap();
        assert!(tight.coefficients[0].abs() < loose.coefficients[0].abs());
    }

    #[test]
    fn test_logistic_separable_stays_finite() {
        let x = DesignMatrix::from_columns(names(&["x"]), vec![vec![-3.0, -2.0, -1.0, 1.0, 2.0, 3.0]])
            .unwrap();
        let fit = LogisticRegression::default().fit(&x, &[0, 0, 0, 1, 1, 1]).unwrap();
        assert!(fit.coefficients[0].is_finite());
        assert!(fit.intercept.is_finite());
    }

    #[test]
    fn test_logistic_validation() {
        let x = DesignMatrix::from_columns(names(&["x"]), vec![vec![1.0, 2.0]]).unwrap();
        assert!(LogisticRegression::default().fit(&x, &[0]).is_err());
        assert!(LogisticRegression::default().fit(&x, &[0, 2]).is_err());
        assert!(LogisticRegression::new(0.0).fit(&x, &[0, 1]).is_err());
    }
}
