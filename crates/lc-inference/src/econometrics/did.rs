//! Two-way fixed-effects difference-in-differences and event studies.
//!
//! Both estimators regress the outcome on treatment regressors plus
//! controls with city and year fixed effects, clustering by city. Fixed
//! effects are either dummy columns (LSDV, the textbook form) or absorbed
//! by [`FixedEffectsSolver`]; the two give identical slopes and standard
//! errors for the non-FE regressors.
//!
//! # References
//!
//! - Angrist & Pischke, *Mostly Harmless Econometrics*, Ch. 5.
//! - Beck, Levine & Levkov (2010), "Big Bad Banks?" *Journal of Finance*
//!   (binned event-study window).

use lc_core::{Error, Estimate, FitSummary, Result};
use lc_prob::student_t::critical_value;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::dummies::DummyEncoder;
use super::hdfe::FixedEffectsSolver;
use super::panel::{DofPolicy, OlsFit, OlsOptions, fit_ols_clustered};
use crate::regression::DesignMatrix;

/// How city and year fixed effects enter the regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeMethod {
    /// Intercept plus drop-first city and year dummies.
    #[default]
    Dummies,
    /// Alternating-projection demeaning.
    Absorb,
}

/// Inputs to [`twfe_did`].
#[derive(Debug, Clone, Copy)]
pub struct TwfeSpec<'a> {
    pub y: &'a [f64],
    /// Treatment regressor(s) followed by controls. No intercept.
    pub regressors: &'a DesignMatrix,
    pub entity: &'a [u64],
    pub time: &'a [u64],
    pub clusters: &'a [u64],
    pub method: FeMethod,
    pub dof: DofPolicy,
}

/// Result of [`twfe_did`].
#[derive(Debug, Clone)]
pub struct TwfeFit {
    pub fit: OlsFit,
    pub method: FeMethod,
    /// Names of the non-FE regressors (plus `const` for LSDV).
    pub regressors: Vec<String>,
    pub n_entities: usize,
    pub n_periods: usize,
}

impl TwfeFit {
    /// Coefficient rows for the non-FE regressors.
    pub fn regressor_estimates(&self) -> Vec<Estimate> {
        self.regressors.iter().filter_map(|n| self.fit.estimate(n)).collect()
    }

    pub fn summary(&self) -> FitSummary {
        self.fit.summary(Some(self.regressors.as_slice()))
    }
}

fn count_distinct(ids: &[u64]) -> usize {
    let mut v = ids.to_vec();
    v.sort_unstable();
    v.dedup();
    v.len()
}

/// Two-way fixed-effects OLS with cluster-robust standard errors.
pub fn twfe_did(spec: &TwfeSpec<'_>) -> Result<TwfeFit> {
    let n = spec.y.len();
    if spec.regressors.n_rows() != n
        || spec.entity.len() != n
        || spec.time.len() != n
        || spec.clusters.len() != n
    {
        return Err(Error::Validation("all TWFE inputs must have the same length as y".into()));
    }
    if spec.regressors.n_cols() == 0 {
        return Err(Error::Validation("at least one regressor is required".into()));
    }
    let n_entities = count_distinct(spec.entity);
    let n_periods = count_distinct(spec.time);

    let (fit, regressors) = match spec.method {
        FeMethod::Dummies => {
            let city = DummyEncoder::fit("city", spec.entity)?.transform(spec.entity)?;
            let year = DummyEncoder::fit("year", spec.time)?.transform(spec.time)?;
            let x = spec.regressors.with_intercept().hstack(&city)?.hstack(&year)?;
            let mut names = vec![x.names()[0].clone()];
            names.extend(spec.regressors.names().iter().cloned());
            let opts = OlsOptions { dof: spec.dof, ..OlsOptions::default() };
            (fit_ols_clustered(spec.y, &x, spec.clusters, opts)?, names)
        }
        FeMethod::Absorb => {
            let solver = FixedEffectsSolver::new(&[spec.entity, spec.time])?;
            let y_dm = solver.partial_out(spec.y)?;
            let x_dm = solver.partial_out_matrix(spec.regressors)?;
            let mean = spec.y.iter().sum::<f64>() / n as f64;
            let opts = OlsOptions {
                dof: spec.dof,
                absorbed_dof: solver.absorbed_dof(),
                total_ss: Some(spec.y.iter().map(|v| (v - mean) * (v - mean)).sum()),
            };
            (fit_ols_clustered(&y_dm, &x_dm, spec.clusters, opts)?, spec.regressors.names().to_vec())
        }
    };

    debug!(method = ?spec.method, n, n_entities, n_periods, "twfe fit");
    Ok(TwfeFit { fit, method: spec.method, regressors, n_entities, n_periods })
}

/// Event window: relative years outside `[min, max]` are binned into the
/// endpoints; `reference` is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventWindow {
    pub min: i64,
    pub max: i64,
    pub reference: i64,
}

impl Default for EventWindow {
    fn default() -> Self {
        Self { min: -5, max: 5, reference: -1 }
    }
}

impl EventWindow {
    fn validate(&self) -> Result<()> {
        if self.min >= self.max {
            return Err(Error::Validation(format!(
                "event window min ({}) must be below max ({})",
                self.min, self.max
            )));
        }
        if self.reference < self.min || self.reference > self.max {
            return Err(Error::Validation(format!(
                "reference period {} outside window [{}, {}]",
                self.reference, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Clamp a relative year into the window.
    pub fn bin(&self, rel: i64) -> i64 {
        rel.clamp(self.min, self.max)
    }

    /// Regressor name for a binned relative year.
    pub fn column_name(rel: i64) -> String {
        match rel {
            r if r < 0 => format!("event_pre_{}", -r),
            0 => "event_current".to_string(),
            r => format!("event_post_{}", r),
        }
    }
}

/// Inputs to [`event_study`].
#[derive(Debug, Clone, Copy)]
pub struct EventStudySpec<'a> {
    pub y: &'a [f64],
    /// `year − pilot_year` for treated cities, `None` for controls.
    pub relative_year: &'a [Option<i64>],
    /// Controls (may have zero columns).
    pub controls: &'a DesignMatrix,
    pub entity: &'a [u64],
    pub time: &'a [u64],
    pub clusters: &'a [u64],
    pub window: EventWindow,
    pub method: FeMethod,
    pub dof: DofPolicy,
    /// Confidence intervals are `1 − alpha`.
    pub alpha: f64,
}

/// One lead or lag coefficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTerm {
    pub relative_year: i64,
    /// True for the window endpoints, which absorb the tails.
    pub binned: bool,
    pub estimate: Estimate,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Treated observations in this bin.
    pub n_obs: usize,
}

/// Result of [`event_study`].
#[derive(Debug, Clone)]
pub struct EventStudyFit {
    pub terms: Vec<EventTerm>,
    pub window: EventWindow,
    pub twfe: TwfeFit,
    /// Lead coefficients (before the reference period) significant at 5%.
    pub pre_significant: usize,
    pub n_pre: usize,
}

/// Event-study regression with binned leads and lags.
pub fn event_study(spec: &EventStudySpec<'_>) -> Result<EventStudyFit> {
    spec.window.validate()?;
    let n = spec.y.len();
    if spec.relative_year.len() != n {
        return Err(Error::Validation("relative_year must have the same length as y".into()));
    }
    if !(spec.alpha > 0.0 && spec.alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", spec.alpha)));
    }

    let w = spec.window;
    let binned: Vec<Option<i64>> = spec.relative_year.iter().map(|r| r.map(|v| w.bin(v))).collect();

    let mut rels = Vec::new();
    let mut cols = Vec::new();
    let mut counts = Vec::new();
    for k in w.min..=w.max {
        if k == w.reference {
            continue;
        }
        let col: Vec<f64> = binned.iter().map(|b| if *b == Some(k) { 1.0 } else { 0.0 }).collect();
        let count = col.iter().filter(|&&v| v > 0.0).count();
        if count == 0 {
            warn!(relative_year = k, "no treated observations in event bin; dropped");
            continue;
        }
        rels.push(k);
        cols.push(col);
        counts.push(count);
    }
    if rels.is_empty() {
        return Err(Error::Validation("no treated observations inside the event window".into()));
    }

    let names: Vec<String> = rels.iter().map(|&k| EventWindow::column_name(k)).collect();
    let events = DesignMatrix::from_columns(names.clone(), cols)?;
    let regressors = events.hstack(spec.controls)?;

    let twfe = twfe_did(&TwfeSpec {
        y: spec.y,
        regressors: &regressors,
        entity: spec.entity,
        time: spec.time,
        clusters: spec.clusters,
        method: spec.method,
        dof: spec.dof,
    })?;

    let crit = critical_value(spec.alpha, twfe.fit.df)?;
    let mut terms = Vec::with_capacity(rels.len());
    for ((&k, name), n_obs) in rels.iter().zip(&names).zip(counts) {
        let estimate = twfe
            .fit
            .estimate(name)
            .ok_or_else(|| Error::Computation(format!("missing event coefficient '{}'", name)))?;
        terms.push(EventTerm {
            relative_year: k,
            binned: k == w.min || k == w.max,
            ci_lower: estimate.coef - crit * estimate.std_error,
            ci_upper: estimate.coef + crit * estimate.std_error,
            estimate,
            n_obs,
        });
    }

    let pre: Vec<&EventTerm> = terms.iter().filter(|t| t.relative_year < w.reference).collect();
    let pre_significant = pre.iter().filter(|t| t.estimate.p_value < 0.05).count();
    if pre_significant > 0 {
        warn!(pre_significant, n_pre = pre.len(), "significant pre-treatment coefficients");
    }

    Ok(EventStudyFit { n_pre: pre.len(), pre_significant, terms, window: w, twfe })
}
