//! OLS with homoskedastic, HC1 and cluster-robust (CR1) covariance.
//!
//! The cluster-robust estimator is the Liang–Zeger sandwich with the usual
//! small-sample correction:
//!
//! `V = c · (X'X)⁻¹ [Σ_g (X_g'u_g)(X_g'u_g)'] (X'X)⁻¹`,
//! `c = G/(G−1) · (n−1)/(n−k)`.
//!
//! When fixed effects have been absorbed before calling in, `k` includes
//! the absorbed degrees of freedom ([`OlsOptions::absorbed_dof`]) so that
//! the result matches the equivalent dummy-variable regression.
//!
//! # References
//!
//! - Cameron & Miller (2015), "A Practitioner's Guide to Cluster-Robust Inference."
//! - Wooldridge, *Econometric Analysis of Cross Section and Panel Data*, Ch. 10.

use std::collections::BTreeMap;

use lc_core::{Error, Estimate, FitSummary, Result};
use lc_prob::student_t::two_sided_p_value;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::regression::DesignMatrix;

/// Relative pivot tolerance for the rank check.
const RANK_TOL: f64 = 1e-10;

/// Degrees of freedom for t-statistics under clustered inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DofPolicy {
    /// `G − 1`.
    #[default]
    Clusters,
    /// `n − k`.
    Residual,
}

/// Covariance estimator.
#[derive(Debug, Clone, Copy)]
pub enum Variance<'a> {
    Homoskedastic,
    Hc1,
    /// Cluster identifier per observation.
    Cluster(&'a [u64]),
}

/// Options for [`fit_ols`].
#[derive(Debug, Clone, Copy, Default)]
pub struct OlsOptions {
    pub dof: DofPolicy,
    /// Parameters already removed from `X` by fixed-effects absorption.
    pub absorbed_dof: usize,
    /// Total sum of squares of the untransformed outcome. When `y` has been
    /// demeaned by absorption, pass the raw TSS here so that R² is
    /// comparable with the dummy-variable fit.
    pub total_ss: Option<f64>,
}

/// Result of [`fit_ols`].
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub t_stats: Vec<f64>,
    pub p_values: Vec<f64>,
    pub covariance: DMatrix<f64>,
    pub residuals: Vec<f64>,
    pub n_obs: usize,
    /// Columns of `X` plus absorbed parameters.
    pub n_params: usize,
    pub n_clusters: Option<usize>,
    /// Degrees of freedom behind the p-values.
    pub df: f64,
    pub rss: f64,
    pub tss: f64,
    pub r_squared: f64,
    pub adj_r_squared: f64,
}

impl OlsFit {
    /// Coefficient-table row for `name`.
    pub fn estimate(&self, name: &str) -> Option<Estimate> {
        let j = self.names.iter().position(|n| n == name)?;
        Some(self.estimate_at(j))
    }

    pub fn estimate_at(&self, j: usize) -> Estimate {
        Estimate {
            name: self.names[j].clone(),
            coef: self.coefficients[j],
            std_error: self.std_errors[j],
            t_stat: self.t_stats[j],
            p_value: self.p_values[j],
        }
    }

    /// Serializable summary restricted to `keep` (all columns if `None`).
    pub fn summary(&self, keep: Option<&[String]>) -> FitSummary {
        let idx: Vec<usize> = match keep {
            Some(names) => names
                .iter()
                .filter_map(|n| self.names.iter().position(|m| m == n))
                .collect(),
            None => (0..self.names.len()).collect(),
        };
        let mut cov = Vec::with_capacity(idx.len() * idx.len());
        for &a in &idx {
            for &b in &idx {
                cov.push(self.covariance[(a, b)]);
            }
        }
        FitSummary {
            estimates: idx.iter().map(|&j| self.estimate_at(j)).collect(),
            covariance: Some(cov),
            n_obs: self.n_obs,
            n_params: self.n_params,
            n_clusters: self.n_clusters,
            df: self.df,
            r_squared: self.r_squared,
            adj_r_squared: self.adj_r_squared,
            rss: self.rss,
        }
    }
}

/// Indices of columns that are linear combinations of earlier columns.
///
/// Pivot-free Cholesky on `X'X`, processing columns left to right: a column
/// whose remaining pivot falls below `RANK_TOL` times its diagonal is
/// flagged and skipped.
pub fn collinear_columns(xtx: &DMatrix<f64>) -> Vec<usize> {
    let k = xtx.nrows();
    let mut kept: Vec<usize> = Vec::with_capacity(k);
    let mut l_rows: Vec<Vec<f64>> = Vec::with_capacity(k);
    let mut collinear = Vec::new();

    for j in 0..k {
        let diag = xtx[(j, j)];
        if diag.is_nan() || diag <= 0.0 {
            collinear.push(j);
            continue;
        }
        let mut l = Vec::with_capacity(kept.len() + 1);
        for (i, &ki) in kept.iter().enumerate() {
            let mut s = xtx[(ki, j)];
            for m in 0..i {
                s -= l_rows[i][m] * l[m];
            }
            l.push(s / l_rows[i][i]);
        }
        let d = diag - l.iter().map(|v| v * v).sum::<f64>();
        if d <= RANK_TOL * diag {
            collinear.push(j);
        } else {
            l.push(d.sqrt());
            l_rows.push(l);
            kept.push(j);
        }
    }
    collinear
}

/// Group row indices by cluster identifier (sorted by identifier).
fn cluster_index(cluster_ids: &[u64]) -> BTreeMap<u64, Vec<usize>> {
    let mut map: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (i, &cid) in cluster_ids.iter().enumerate() {
        map.entry(cid).or_default().push(i);
    }
    map
}

/// CR1 covariance matrix.
///
/// `k_total` is the parameter count used in the `(n−1)/(n−k)` factor.
pub fn cluster_robust_vcov(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[u64],
    k_total: usize,
) -> Result<DMatrix<f64>> {
    let n = x.nrows();
    let p = x.ncols();
    if cluster_ids.len() != n {
        return Err(Error::Validation(format!(
            "cluster_ids length ({}) != n ({})",
            cluster_ids.len(),
            n
        )));
    }
    let clusters = cluster_index(cluster_ids);
    let g = clusters.len() as f64;
    if clusters.len() < 2 {
        return Err(Error::Validation(format!(
            "cluster-robust covariance needs at least 2 clusters, got {}",
            clusters.len()
        )));
    }
    if n <= k_total {
        return Err(Error::Validation(format!("n ({}) must exceed k ({})", n, k_total)));
    }

    // Meat: outer product of the summed score per cluster.
    let mut meat = DMatrix::zeros(p, p);
    for indices in clusters.values() {
        let mut s_g = vec![0.0_f64; p];
        for &i in indices {
            let e_i = residuals[i];
            for j in 0..p {
                s_g[j] += x[(i, j)] * e_i;
            }
        }
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += s_g[a] * s_g[b];
            }
        }
    }

    let n_f = n as f64;
    let k_f = k_total as f64;
    let correction = (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - k_f));
    Ok((xtx_inv * &meat) * xtx_inv * correction)
}

/// HC1 covariance matrix: `n/(n−k) · (X'X)⁻¹ [Σ_i x_i x_i' u_i²] (X'X)⁻¹`.
pub fn hc1_vcov(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    k_total: usize,
) -> Result<DMatrix<f64>> {
    let n = x.nrows();
    let p = x.ncols();
    if n <= k_total {
        return Err(Error::Validation(format!("n ({}) must exceed k ({})", n, k_total)));
    }
    let mut meat = DMatrix::zeros(p, p);
    for i in 0..n {
        let u2 = residuals[i] * residuals[i];
        for a in 0..p {
            for b in 0..p {
                meat[(a, b)] += x[(i, a)] * x[(i, b)] * u2;
            }
        }
    }
    let n_f = n as f64;
    let correction = n_f / (n_f - k_total as f64);
    Ok((xtx_inv * &meat) * xtx_inv * correction)
}

/// Fit `y = Xβ + u` by OLS.
///
/// `x` must contain every regressor, including the intercept when wanted.
/// A rank-deficient `X` is rejected with the names of the offending columns.
pub fn fit_ols(y: &[f64], x: &DesignMatrix, variance: Variance<'_>, opts: OlsOptions) -> Result<OlsFit> {
    let n = y.len();
    let k = x.n_cols();
    if n == 0 {
        return Err(Error::Validation("y must be non-empty".into()));
    }
    if x.n_rows() != n {
        return Err(Error::Validation(format!("X has {} rows, y has {}", x.n_rows(), n)));
    }
    if k == 0 {
        return Err(Error::Validation("X must have at least 1 column".into()));
    }
    if let Some(i) = y.iter().position(|v| !v.is_finite()) {
        return Err(Error::Validation(format!("y has a missing or non-finite value at row {}", i)));
    }
    let k_total = k + opts.absorbed_dof;
    if n <= k_total {
        return Err(Error::Validation(format!(
            "n ({}) must exceed the number of parameters ({})",
            n, k_total
        )));
    }

    let x_mat = x.to_dmatrix();
    let y_vec = DVector::from_column_slice(y);
    let xtx = x_mat.transpose() * &x_mat;

    let collinear = collinear_columns(&xtx);
    if !collinear.is_empty() {
        let names: Vec<&str> = collinear.iter().map(|&j| x.names()[j].as_str()).collect();
        return Err(Error::Computation(format!(
            "design matrix is rank-deficient; collinear columns: {}",
            names.join(", ")
        )));
    }

    let xtx_inv = xtx
        .clone()
        .try_inverse()
        .ok_or_else(|| Error::Computation("X'X is singular".into()))?;
    let xty = x_mat.transpose() * &y_vec;
    let beta = &xtx_inv * &xty;

    let fitted = &x_mat * &beta;
    let resid = &y_vec - &fitted;
    let rss: f64 = resid.iter().map(|r| r * r).sum();
    let tss = opts.total_ss.unwrap_or_else(|| {
        let m = y.iter().sum::<f64>() / n as f64;
        y.iter().map(|v| (v - m) * (v - m)).sum()
    });
    let n_f = n as f64;
    let k_f = k_total as f64;
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { f64::NAN };
    let adj_r_squared = 1.0 - (1.0 - r_squared) * (n_f - 1.0) / (n_f - k_f);

    let (covariance, n_clusters) = match variance {
        Variance::Homoskedastic => (&xtx_inv * (rss / (n_f - k_f)), None),
        Variance::Hc1 => (hc1_vcov(&x_mat, &resid, &xtx_inv, k_total)?, None),
        Variance::Cluster(ids) => {
            let vc = cluster_robust_vcov(&x_mat, &resid, &xtx_inv, ids, k_total)?;
            (vc, Some(cluster_index(ids).len()))
        }
    };

    let df = match (n_clusters, opts.dof) {
        (Some(g), DofPolicy::Clusters) => (g - 1) as f64,
        _ => n_f - k_f,
    };

    let coefficients: Vec<f64> = beta.iter().copied().collect();
    let std_errors: Vec<f64> = (0..k).map(|j| covariance[(j, j)].max(0.0).sqrt()).collect();
    let t_stats: Vec<f64> = coefficients
        .iter()
        .zip(&std_errors)
        .map(|(b, s)| if *s > 0.0 { b / s } else { f64::NAN })
        .collect();
    let p_values = t_stats
        .iter()
        .map(|&t| two_sided_p_value(t, df))
        .collect::<Result<Vec<f64>>>()?;

    debug!(n, k, k_total, ?n_clusters, df, r_squared, "ols fit");

    Ok(OlsFit {
        names: x.names().to_vec(),
        coefficients,
        std_errors,
        t_stats,
        p_values,
        covariance,
        residuals: resid.iter().copied().collect(),
        n_obs: n,
        n_params: k_total,
        n_clusters,
        df,
        rss,
        tss,
        r_squared,
        adj_r_squared,
    })
}

/// OLS with CR1 cluster-robust standard errors.
pub fn fit_ols_clustered(
    y: &[f64],
    x: &DesignMatrix,
    clusters: &[u64],
    opts: OlsOptions,
) -> Result<OlsFit> {
    fit_ols(y, x, Variance::Cluster(clusters), opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn design(cols: Vec<(&str, Vec<f64>)>) -> DesignMatrix {
        let (names, data): (Vec<String>, Vec<Vec<f64>>) =
            cols.into_iter().map(|(n, c)| (n.to_string(), c)).unzip();
        DesignMatrix::from_columns(names, data).unwrap().with_intercept()
    }

    #[test]
    fn test_exact_fit_recovers_beta() {
        let x1: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let x2: Vec<f64> = (0..12).map(|i| ((i * 5) % 7) as f64).collect();
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| 3.0 - 1.25 * a + 0.75 * b).collect();
        let clusters: Vec<u64> = (0..12).map(|i| i / 3).collect();
        let x = design(vec![("x1", x1), ("x2", x2)]);

        let fit = fit_ols_clustered(&y, &x, &clusters, OlsOptions::default()).unwrap();
        assert_relative_eq!(fit.coefficients[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(fit.coefficients[1], -1.25, epsilon = 1e-9);
        assert_relative_eq!(fit.coefficients[2], 0.75, epsilon = 1e-9);
        assert!(fit.rss < 1e-18);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert_eq!(fit.n_clusters, Some(4));
        assert_relative_eq!(fit.df, 3.0);
    }

    #[test]
    fn test_cr1_matches_hand_computation() {
        // y = a + b x, two clusters of three.
        let xv = vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![1.0, 2.5, 2.9, 4.2, 5.1, 5.8];
        let clusters = vec![1, 1, 1, 2, 2, 2];
        let x = design(vec![("x", xv.clone())]);
        let fit = fit_ols_clustered(&y, &x, &clusters, OlsOptions::default()).unwrap();

        let xm = x.to_dmatrix();
        let xtx_inv = (xm.transpose() * &xm).try_inverse().unwrap();
        let u: Vec<f64> = fit.residuals.clone();
        let mut meat = DMatrix::<f64>::zeros(2, 2);
        for g in [0usize, 3] {
            let s0: f64 = (g..g + 3).map(|i| u[i]).sum();
            let s1: f64 = (g..g + 3).map(|i| xv[i] * u[i]).sum();
            let s = [s0, s1];
            for a in 0..2 {
                for b in 0..2 {
                    meat[(a, b)] += s[a] * s[b];
                }
            }
        }
        let c = 2.0 / 1.0 * (5.0 / 4.0);
        let v = &xtx_inv * meat * &xtx_inv * c;
        assert_relative_eq!(fit.std_errors[1], v[(1, 1)].sqrt(), epsilon = 1e-12);
        assert_relative_eq!(fit.std_errors[0], v[(0, 0)].sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_singleton_clusters_equal_hc1() {
        let xv: Vec<f64> = (0..9).map(|i| (i as f64).sqrt()).collect();
        let y: Vec<f64> = xv.iter().enumerate().map(|(i, v)| 2.0 * v + ((i * 3) % 4) as f64 * 0.3).collect();
        let clusters: Vec<u64> = (0..9).collect();
        let x = design(vec![("x", xv)]);
        let cr1 = fit_ols(&y, &x, Variance::Cluster(&clusters), OlsOptions::default()).unwrap();
        let hc1 = fit_ols(&y, &x, Variance::Hc1, OlsOptions::default()).unwrap();
        for j in 0..2 {
            assert_relative_eq!(cr1.std_errors[j], hc1.std_errors[j], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dof_policy() {
        let xv: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = xv.iter().map(|v| v + if (*v as i64) % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let clusters: Vec<u64> = (0..10).map(|i| i % 5).collect();
        let x = design(vec![("x", xv)]);
        let g = fit_ols_clustered(&y, &x, &clusters, OlsOptions::default()).unwrap();
        let r = fit_ols_clustered(
            &y,
            &x,
            &clusters,
            OlsOptions { dof: DofPolicy::Residual, ..OlsOptions::default() },
        )
        .unwrap();
        assert_relative_eq!(g.df, 4.0);
        assert_relative_eq!(r.df, 8.0);
        assert_relative_eq!(g.std_errors[1], r.std_errors[1]);
        assert!(g.p_values[1] > r.p_values[1]);
    }

    #[test]
    fn test_collinear_columns_named() {
        let a: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| 2.0 * v + 1.0).collect();
        let y: Vec<f64> = a.iter().map(|v| v * 0.5).collect();
        let clusters: Vec<u64> = (0..8).map(|i| i / 2).collect();
        let x = design(vec![("a", a), ("b", b)]);
        let err = fit_ols_clustered(&y, &x, &clusters, OlsOptions::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("collinear columns: b"), "{}", msg);
    }

    #[test]
    fn test_validation() {
        let x = design(vec![("x", vec![1.0, 2.0, 3.0])]);
        // one cluster
        assert!(fit_ols_clustered(&[1.0, 2.0, 4.0], &x, &[1, 1, 1], OlsOptions::default()).is_err());
        // n <= k
        let x2 = design(vec![("x", vec![1.0, 2.0])]);
        assert!(fit_ols_clustered(&[1.0, 2.0], &x2, &[1, 2], OlsOptions::default()).is_err());
        // length mismatch
        assert!(fit_ols_clustered(&[1.0, 2.0], &x, &[1, 2], OlsOptions::default()).is_err());
    }

    #[test]
    fn test_summary_subset() {
        let xv: Vec<f64> = (0..6).map(|i| i as f64).collect();
        let y = vec![0.1, 1.2, 1.9, 3.2, 3.9, 5.1];
        let x = design(vec![("x", xv)]);
        let fit = fit_ols(&y, &x, Variance::Homoskedastic, OlsOptions::default()).unwrap();
        let keep = vec!["x".to_string()];
        let s = fit.summary(Some(keep.as_slice()));
        assert_eq!(s.estimates.len(), 1);
        assert_eq!(s.estimates[0].name, "x");
        assert_eq!(s.covariance.as_ref().map(|c| c.len()), Some(1));
        assert!(fit.estimate("const").is_some());
    }

    proptest! {
        #[test]
        fn prop_noise_free_fit_is_exact(
            b0 in -5.0f64..5.0,
            b1 in -5.0f64..5.0,
            xs in proptest::collection::vec(-10.0f64..10.0, 6..30),
        ) {
            let spread = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
                - xs.iter().cloned().fold(f64::INFINITY, f64::min);
            prop_assume!(spread > 1.0);
            let y: Vec<f64> = xs.iter().map(|x| b0 + b1 * x).collect();
            let x = design(vec![("x", xs.clone())]);
            let fit = fit_ols(&y, &x, Variance::Hc1, OlsOptions::default()).unwrap();
            prop_assert!((fit.coefficients[0] - b0).abs() < 1e-7);
            prop_assert!((fit.coefficients[1] - b1).abs() < 1e-7);
        }
    }
}
