//! Covariate balance between treated and control samples.
//!
//! The standardized bias of a covariate is
//! `100 · (mean_t − mean_c) / sqrt((var_t + var_c) / 2)` with sample (n−1)
//! variances. A covariate counts as balanced after matching when
//! `|bias| < threshold` (conventionally 10).

use lc_core::{Error, Result};
use lc_prob::student_t::two_sided_p_value;
use lc_prob::summary::{finite, mean, variance};
use serde::{Deserialize, Serialize};

/// Standardized bias (percent) of `treated` relative to `control`.
///
/// NaN values are ignored. Returns 0 when both samples are identical
/// constants and NaN when the pooled deviation is zero otherwise.
pub fn standardized_bias(treated: &[f64], control: &[f64]) -> f64 {
    let diff = mean(treated) - mean(control);
    let pooled = ((variance(treated) + variance(control)) / 2.0).sqrt();
    if diff == 0.0 {
        return 0.0;
    }
    if !(pooled.is_finite() && pooled > 0.0) {
        return f64::NAN;
    }
    100.0 * diff / pooled
}

/// Two-sample t-test with pooled variance. Returns `(t, p)`.
pub fn pooled_t_test(a: &[f64], b: &[f64]) -> Result<(f64, f64)> {
    let (xa, xb) = (finite(a), finite(b));
    let (na, nb) = (xa.len() as f64, xb.len() as f64);
    if xa.len() < 2 || xb.len() < 2 {
        return Err(Error::Validation(format!(
            "t-test needs at least 2 values per group, got {} and {}",
            xa.len(),
            xb.len()
        )));
    }
    let df = na + nb - 2.0;
    let sp2 = ((na - 1.0) * variance(&xa) + (nb - 1.0) * variance(&xb)) / df;
    let se = (sp2 * (1.0 / na + 1.0 / nb)).sqrt();
    let t = if se > 0.0 { (mean(&xa) - mean(&xb)) / se } else { f64::NAN };
    Ok((t, two_sided_p_value(t, df)?))
}

/// Balance of one covariate before and after matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRow {
    pub variable: String,
    pub mean_treated_before: f64,
    pub mean_control_before: f64,
    pub bias_before: f64,
    pub mean_treated_after: f64,
    pub mean_control_after: f64,
    pub bias_after: f64,
    /// `(|bias_before| − |bias_after|) / |bias_before| · 100`; NaN when
    /// there was no bias before matching.
    pub bias_reduction: f64,
    pub t_before: f64,
    pub p_before: f64,
    pub t_after: f64,
    pub p_after: f64,
    pub balanced: bool,
}

fn split(col: &[f64], treat: &[u8], rows: &[usize]) -> (Vec<f64>, Vec<f64>) {
    let mut t = Vec::new();
    let mut c = Vec::new();
    for &i in rows {
        if treat[i] == 1 { t.push(col[i]) } else { c.push(col[i]) }
    }
    (t, c)
}

fn t_test_or_nan(a: &[f64], b: &[f64]) -> (f64, f64) {
    pooled_t_test(a, b).unwrap_or((f64::NAN, f64::NAN))
}

/// Balance table over `before_rows` versus `after_rows` (indices into the
/// covariate columns; repeats allowed).
pub fn balance_table(
    names: &[String],
    covariates: &[&[f64]],
    treat: &[u8],
    before_rows: &[usize],
    after_rows: &[usize],
    threshold: f64,
) -> Result<Vec<BalanceRow>> {
    if names.len() != covariates.len() {
        return Err(Error::Validation("need one name per covariate".into()));
    }
    let n = treat.len();
    if let Some(&i) = before_rows.iter().chain(after_rows).find(|&&i| i >= n) {
        return Err(Error::Validation(format!("row index {} out of range ({} rows)", i, n)));
    }
    let mut out = Vec::with_capacity(names.len());
    for (name, col) in names.iter().zip(covariates) {
        if col.len() != n {
            return Err(Error::Validation(format!(
                "covariate '{}' has length {}, expected {}",
                name,
                col.len(),
                n
            )));
        }
        let (tb, cb) = split(col, treat, before_rows);
        let (ta, ca) = split(col, treat, after_rows);
        let bias_before = standardized_bias(&tb, &cb);
        let bias_after = standardized_bias(&ta, &ca);
        let bias_reduction = if bias_before != 0.0 && bias_before.is_finite() {
            (bias_before.abs() - bias_after.abs()) / bias_before.abs() * 100.0
        } else {
            f64::NAN
        };
        let (t_before, p_before) = t_test_or_nan(&tb, &cb);
        let (t_after, p_after) = t_test_or_nan(&ta, &ca);
        out.push(BalanceRow {
            variable: name.clone(),
            mean_treated_before: mean(&tb),
            mean_control_before: mean(&cb),
            bias_before,
            mean_treated_after: mean(&ta),
            mean_control_after: mean(&ca),
            bias_after,
            bias_reduction,
            t_before,
            p_before,
            t_after,
            p_after,
            balanced: bias_after.abs() < threshold,
        });
    }
    Ok(out)
}
