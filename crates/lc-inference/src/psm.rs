//! Propensity-score nearest-neighbour matching, one cross-section per year.
//!
//! Within each year a penalised logistic model of `treat` on the covariates
//! gives every city a propensity score. Each treated city is paired with the
//! control city of the same year whose score is closest; the pair is kept
//! only if the score distance is within the caliper. Controls are drawn with
//! replacement, so one control may serve several treated cities.

use std::collections::BTreeMap;

use lc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::balance::{BalanceRow, balance_table};
use crate::regression::{DesignMatrix, LogisticRegression};

/// A treated observation and its matched control (row indices).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub treated: usize,
    pub control: usize,
    /// `|score_treated − score_control|`.
    pub distance: f64,
}

/// Nearest-neighbour matching on a precomputed score.
///
/// For every row with `treat == 1`, in row order, find the control with the
/// smallest absolute score difference (ties go to the earliest control) and
/// keep the pair iff that difference is `<= caliper`. Returns an empty list
/// when there are no controls.
pub fn match_nearest_neighbor(scores: &[f64], treat: &[u8], caliper: f64) -> Result<Vec<MatchPair>> {
    if scores.len() != treat.len() {
        return Err(Error::Validation(format!(
            "scores length ({}) != treat length ({})",
            scores.len(),
            treat.len()
        )));
    }
    if caliper.is_nan() || caliper < 0.0 {
        return Err(Error::Validation(format!("caliper must be >= 0, got {}", caliper)));
    }
    if treat.iter().any(|&t| t > 1) {
        return Err(Error::Validation("treat must contain only 0/1 values".into()));
    }
    if let Some(i) = scores.iter().position(|s| !s.is_finite()) {
        return Err(Error::Validation(format!("score at row {} is not finite", i)));
    }

    let controls: Vec<usize> = (0..treat.len()).filter(|&i| treat[i] == 0).collect();
    if controls.is_empty() {
        return Ok(Vec::new());
    }

    let mut pairs = Vec::new();
    for t in (0..treat.len()).filter(|&i| treat[i] == 1) {
        let mut best = controls[0];
        let mut best_d = (scores[t] - scores[best]).abs();
        for &c in &controls[1..] {
            let d = (scores[t] - scores[c]).abs();
            if d < best_d {
                best = c;
                best_d = d;
            }
        }
        if best_d <= caliper {
            pairs.push(MatchPair { treated: t, control: best, distance: best_d });
        }
    }
    Ok(pairs)
}

/// Matching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PsmConfig {
    /// Maximum accepted score distance.
    pub caliper: f64,
    /// Inverse L2 strength of the propensity model.
    pub c: f64,
    pub max_iter: usize,
    /// Overall match rate below which a warning is logged.
    pub min_match_rate: f64,
    /// `|SMD|` threshold (percent) for a covariate to count as balanced.
    pub balance_threshold: f64,
}

impl Default for PsmConfig {
    fn default() -> Self {
        Self { caliper: 0.05, c: 1.0, max_iter: 1000, min_match_rate: 0.5, balance_threshold: 10.0 }
    }
}

/// Per-year matching summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearMatch {
    pub year: i64,
    pub n_obs: usize,
    pub n_treated: usize,
    pub n_control: usize,
    /// Why the year was not matched, if it was skipped.
    pub skipped: Option<String>,
    pub pseudo_r2: f64,
    pub converged: bool,
    pub score_mean: f64,
    pub score_std: f64,
    pub score_min: f64,
    pub score_max: f64,
    pub n_matched: usize,
    pub n_unmatched: usize,
    pub mean_distance: f64,
    pub max_distance: f64,
    pub min_distance: f64,
}

impl YearMatch {
    fn skipped(year: i64, n_obs: usize, n_treated: usize, n_control: usize, reason: &str) -> Self {
        Self {
            year,
            n_obs,
            n_treated,
            n_control,
            skipped: Some(reason.to_string()),
            pseudo_r2: f64::NAN,
            converged: false,
            score_mean: f64::NAN,
            score_std: f64::NAN,
            score_min: f64::NAN,
            score_max: f64::NAN,
            n_matched: 0,
            n_unmatched: n_treated,
            mean_distance: f64::NAN,
            max_distance: f64::NAN,
            min_distance: f64::NAN,
        }
    }
}

/// Result of [`propensity_match`].
#[derive(Debug, Clone)]
pub struct PsmResult {
    /// Propensity score per input row; NaN where the row was not scored.
    pub scores: Vec<f64>,
    pub years: Vec<YearMatch>,
    /// Matched pairs, as indices into the input rows.
    pub pairs: Vec<MatchPair>,
    /// Rows with every covariate present, skipped years included.
    pub usable_rows: Vec<usize>,
    /// Rows dropped up front because a covariate was missing.
    pub n_dropped_missing: usize,
    /// Treated rows in matched years.
    pub n_treated: usize,
    pub match_rate: f64,
}

impl PsmResult {
    /// Rows of the matched sample: each pair contributes its treated row
    /// followed by its control row. Reused controls appear once per pair.
    pub fn matched_rows(&self) -> Vec<usize> {
        self.pairs.iter().flat_map(|p| [p.treated, p.control]).collect()
    }

    /// Balance of every covariate over all usable rows versus the matched
    /// sample.
    pub fn balance(
        &self,
        names: &[String],
        covariates: &[&[f64]],
        treat: &[u8],
        threshold: f64,
    ) -> Result<Vec<BalanceRow>> {
        balance_table(names, covariates, treat, &self.usable_rows, &self.matched_rows(), threshold)
    }
}

fn population_std(xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let m = xs.iter().sum::<f64>() / n;
    (xs.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n).sqrt()
}

/// Year-by-year propensity-score matching.
///
/// Rows with a missing covariate are dropped before anything else. Years
/// without treated or without control rows are skipped with a warning.
pub fn propensity_match(
    years: &[i64],
    treat: &[u8],
    names: &[String],
    covariates: &[&[f64]],
    cfg: &PsmConfig,
) -> Result<PsmResult> {
    let n = years.len();
    if treat.len() != n {
        return Err(Error::Validation(format!("treat length ({}) != n ({})", treat.len(), n)));
    }
    if names.len() != covariates.len() || names.is_empty() {
        return Err(Error::Validation("need one name per covariate and at least one covariate".into()));
    }
    for (name, col) in names.iter().zip(covariates) {
        if col.len() != n {
            return Err(Error::Validation(format!(
                "covariate '{}' has length {}, expected {}",
                name,
                col.len(),
                n
            )));
        }
    }
    if treat.iter().any(|&t| t > 1) {
        return Err(Error::Validation("treat must contain only 0/1 values".into()));
    }

    let usable: Vec<bool> =
        (0..n).map(|i| covariates.iter().all(|c| c[i].is_finite())).collect();
    let n_dropped_missing = usable.iter().filter(|u| !**u).count();
    if n_dropped_missing > 0 {
        warn!(n_dropped_missing, "rows with missing covariates excluded from matching");
    }

    let usable_rows: Vec<usize> = (0..n).filter(|&i| usable[i]).collect();
    let mut by_year: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for &i in &usable_rows {
        by_year.entry(years[i]).or_default().push(i);
    }

    let model = LogisticRegression { c: cfg.c, max_iter: cfg.max_iter, ..LogisticRegression::default() };
    let mut scores = vec![f64::NAN; n];
    let mut summaries = Vec::with_capacity(by_year.len());
    let mut pairs = Vec::new();
    let mut n_treated_total = 0usize;

    for (&year, rows) in &by_year {
        let t_local: Vec<u8> = rows.iter().map(|&i| treat[i]).collect();
        let n_t = t_local.iter().filter(|&&t| t == 1).count();
        let n_c = rows.len() - n_t;
        if n_t == 0 || n_c == 0 {
            let reason = if n_t == 0 { "no treated cities" } else { "no control cities" };
            warn!(year, n_treated = n_t, n_control = n_c, "skipping year: {}", reason);
            summaries.push(YearMatch::skipped(year, rows.len(), n_t, n_c, reason));
            continue;
        }

        let cols: Vec<Vec<f64>> =
            covariates.iter().map(|c| rows.iter().map(|&i| c[i]).collect()).collect();
        let x = DesignMatrix::from_columns(names.to_vec(), cols)?;
        let fit = model.fit(&x, &t_local)?;
        if !fit.converged {
            warn!(year, n_iter = fit.n_iter, "propensity model did not converge");
        }
        let s_local = fit.predict_proba(&x)?;
        for (k, &i) in rows.iter().enumerate() {
            scores[i] = s_local[k];
        }

        let local_pairs = match_nearest_neighbor(&s_local, &t_local, cfg.caliper)?;
        let dists: Vec<f64> = local_pairs.iter().map(|p| p.distance).collect();
        let n_matched = local_pairs.len();
        if n_matched < n_t {
            warn!(year, unmatched = n_t - n_matched, caliper = cfg.caliper, "treated cities outside caliper");
        }
        debug!(year, n_treated = n_t, n_control = n_c, n_matched, "matched year");

        let (mean_d, max_d, min_d) = if dists.is_empty() {
            (f64::NAN, f64::NAN, f64::NAN)
        } else {
            (
                dists.iter().sum::<f64>() / dists.len() as f64,
                dists.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                dists.iter().copied().fold(f64::INFINITY, f64::min),
            )
        };
        summaries.push(YearMatch {
            year,
            n_obs: rows.len(),
            n_treated: n_t,
            n_control: n_c,
            skipped: None,
            pseudo_r2: fit.pseudo_r_squared(),
            converged: fit.converged,
            score_mean: s_local.iter().sum::<f64>() / s_local.len() as f64,
            score_std: population_std(&s_local),
            score_min: s_local.iter().copied().fold(f64::INFINITY, f64::min),
            score_max: s_local.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            n_matched,
            n_unmatched: n_t - n_matched,
            mean_distance: mean_d,
            max_distance: max_d,
            min_distance: min_d,
        });

        pairs.extend(local_pairs.into_iter().map(|p| MatchPair {
            treated: rows[p.treated],
            control: rows[p.control],
            distance: p.distance,
        }));
        n_treated_total += n_t;
    }

    let match_rate =
        if n_treated_total == 0 { f64::NAN } else { pairs.len() as f64 / n_treated_total as f64 };
    if n_treated_total > 0 && match_rate < cfg.min_match_rate {
        warn!(match_rate, floor = cfg.min_match_rate, "low overall match rate");
    }
    info!(
        n_pairs = pairs.len(),
        n_treated = n_treated_total,
        match_rate,
        years = summaries.len(),
        "propensity-score matching done"
    );

    Ok(PsmResult {
        scores,
        years: summaries,
        pairs,
        usable_rows,
        n_dropped_missing,
        n_treated: n_treated_total,
        match_rate,
    })
}
