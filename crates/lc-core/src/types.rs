//! Common result types for lcdid estimators

use serde::{Deserialize, Serialize};

/// One row of a coefficient table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    /// Regressor name (e.g. `did`, `ln_pgdp`, `year_2012`).
    pub name: String,
    /// Point estimate.
    pub coef: f64,
    /// Standard error under the fit's variance estimator.
    pub std_error: f64,
    /// `coef / std_error`.
    pub t_stat: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

impl Estimate {
    /// Significance stars at the 1% / 5% / 10% levels.
    pub fn stars(&self) -> &'static str {
        significance_stars(self.p_value)
    }

    /// Regression-table cell: `coef***` over `(se)`.
    pub fn cell(&self) -> (String, String) {
        (format!("{:.4}{}", self.coef, self.stars()), format!("({:.4})", self.std_error))
    }
}

/// `***` for p < 0.01, `**` for p < 0.05, `*` for p < 0.1.
pub fn significance_stars(p: f64) -> &'static str {
    if !p.is_finite() {
        ""
    } else if p < 0.01 {
        "***"
    } else if p < 0.05 {
        "**"
    } else if p < 0.1 {
        "*"
    } else {
        ""
    }
}

/// Summary of a linear fit, independent of how the variance was computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitSummary {
    /// Coefficient table, in design-matrix column order.
    pub estimates: Vec<Estimate>,

    /// Variance-covariance matrix (row-major, k×k). `None` when not retained.
    pub covariance: Option<Vec<f64>>,

    /// Number of observations used.
    pub n_obs: usize,

    /// Number of estimated parameters (including absorbed fixed effects).
    pub n_params: usize,

    /// Number of clusters, if the variance is cluster-robust.
    pub n_clusters: Option<usize>,

    /// Degrees of freedom used for p-values.
    pub df: f64,

    /// R².
    pub r_squared: f64,

    /// Adjusted R².
    pub adj_r_squared: f64,

    /// Residual sum of squares.
    pub rss: f64,
}

impl FitSummary {
    /// Look up a coefficient row by regressor name.
    pub fn get(&self, name: &str) -> Option<&Estimate> {
        self.estimates.iter().find(|e| e.name == name)
    }

    /// Correlation between estimates `i` and `j`. Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let k = self.estimates.len();
        if i >= k || j >= k {
            return None;
        }
        let sigma_i = self.estimates[i].std_error;
        let sigma_j = self.estimates[j].std_error;
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * k + j] / (sigma_i * sigma_j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn est(name: &str, coef: f64, se: f64, p: f64) -> Estimate {
        Estimate { name: name.into(), coef, std_error: se, t_stat: coef / se, p_value: p }
    }

    #[test]
    fn test_stars() {
        assert_eq!(significance_stars(0.001), "***");
        assert_eq!(significance_stars(0.03), "**");
        assert_eq!(significance_stars(0.07), "*");
        assert_eq!(significance_stars(0.5), "");
        assert_eq!(significance_stars(f64::NAN), "");
    }

    #[test]
    fn test_cell_format() {
        let e = est("did", -0.12346, 0.04, 0.004);
        assert_eq!(e.cell(), ("-0.1235***".to_string(), "(0.0400)".to_string()));
    }

    #[test]
    fn test_summary_lookup_and_correlation() {
        let s = FitSummary {
            estimates: vec![est("a", 1.0, 2.0, 0.5), est("b", 1.0, 1.0, 0.5)],
            covariance: Some(vec![4.0, 1.0, 1.0, 1.0]),
            n_obs: 10,
            n_params: 2,
            n_clusters: None,
            df: 8.0,
            r_squared: 0.5,
            adj_r_squared: 0.4,
            rss: 1.0,
        };
        assert_eq!(s.get("b").map(|e| e.coef), Some(1.0));
        assert!(s.get("c").is_none());
        assert!((s.correlation(0, 1).unwrap() - 0.5).abs() < 1e-12);
        assert!(s.correlation(0, 2).is_none());
    }
}
