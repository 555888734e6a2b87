//! Pipeline stages shared by the subcommands and `lcdid run`.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use lc_inference::{
    BalanceRow, DesignMatrix, EventStudyFit, EventStudySpec, PsmResult, TwfeFit, TwfeSpec, event_study,
    propensity_match, twfe_did,
};
use lc_panel::transform::{fill_missing, filter_years, winsorize};
use lc_panel::{
    CITY, CITY_CODE, Column, DidSummary, MergeReport, PilotAssignment, PilotRoster, SourceSchema, Table,
    WinsorizeSummary, YEAR, apply_did, city, left_join, read_raw, relative_years,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{EventStudyConfig, PsmSection, RegressionConfig, SourceConfig, StudyConfig};

/// Read one source and extract its declared columns.
pub fn load_source(src: &SourceConfig) -> Result<Table> {
    let raw = read_raw(&src.path, &src.read).with_context(|| format!("failed to read {}", src.path.display()))?;
    let table = SourceSchema::new(src.columns.clone())
        .extract(&raw)
        .with_context(|| format!("source '{}' ({})", src.name, src.path.display()))?;
    debug!(source = %src.name, rows = table.n_rows(), cols = table.n_cols(), "loaded source");
    Ok(table)
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceMerge {
    pub source: String,
    pub n_renamed: usize,
    #[serde(flatten)]
    pub report: MergeReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub n_rows: usize,
    pub n_cities: usize,
    pub n_renamed: usize,
    pub merges: Vec<SourceMerge>,
}

/// Base panel with every additional source left-joined onto it.
pub fn load_panel(cfg: &StudyConfig) -> Result<(Table, LoadReport)> {
    let mut panel = load_source(&cfg.panel)?;
    for key in [CITY, YEAR] {
        if !panel.has(key) {
            bail!("panel source '{}' must provide a '{}' column", cfg.panel.name, key);
        }
    }
    let n_renamed = city::canonicalize_column(&mut panel, CITY)?;
    if n_renamed > 0 {
        info!(n_renamed, "normalised panel city names");
    }

    let mut merges = Vec::with_capacity(cfg.sources.len());
    for src in &cfg.sources {
        let mut right = load_source(src)?;
        let n_renamed = city::canonicalize_column(&mut right, &src.merge.right_city)
            .with_context(|| format!("source '{}'", src.name))?;
        let (joined, report) =
            left_join(&panel, &right, &src.merge).with_context(|| format!("merging source '{}'", src.name))?;
        debug!(source = %src.name, added = ?report.added_columns, "joined source onto panel");
        panel = joined;
        merges.push(SourceMerge { source: src.name.clone(), n_renamed, report });
    }

    let report = LoadReport { n_rows: panel.n_rows(), n_cities: panel.unique_cities()?.len(), n_renamed, merges };
    Ok((panel, report))
}

/// Assign pilot years from `roster` and write the DID columns.
pub fn assign_did(table: &mut Table, roster: &PilotRoster) -> Result<(PilotAssignment, DidSummary)> {
    let cities = table.cities()?.to_vec();
    let codes = if table.has(CITY_CODE) { Some(table.num(CITY_CODE)?.to_vec()) } else { None };
    let assignment = roster.assign(&cities, codes.as_deref())?;
    let summary = apply_did(table, &assignment)?;
    info!(
        treated = summary.n_treated_cities,
        control = summary.n_control_cities,
        did_share = summary.did_share,
        "constructed DID variables"
    );
    Ok((assignment, summary))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PrepareReport {
    pub n_rows_before: usize,
    pub n_rows_after: usize,
    /// Values filled per column.
    pub filled: BTreeMap<String, usize>,
    pub derived: Vec<String>,
    pub winsorized: Vec<WinsorizeSummary>,
}

/// Year window, then fill, derive and winsorize, in that order.
pub fn prepare(table: &mut Table, cfg: &StudyConfig) -> Result<PrepareReport> {
    let mut report = PrepareReport { n_rows_before: table.n_rows(), ..PrepareReport::default() };
    if let Some(w) = cfg.years {
        if w.start > w.end {
            bail!("year window start ({}) is after end ({})", w.start, w.end);
        }
        *table = filter_years(table, w.start, w.end)?;
        info!(start = w.start, end = w.end, rows = table.n_rows(), "applied year window");
    }
    for step in &cfg.fill {
        let n = fill_missing(table, &step.column, step.method)
            .with_context(|| format!("filling '{}'", step.column))?;
        *report.filled.entry(step.column.clone()).or_insert(0) += n;
    }
    for d in &cfg.derive {
        let target = d.apply(table).with_context(|| format!("deriving '{}'", d.target()))?;
        report.derived.push(target);
    }
    if let Some(w) = &cfg.winsorize {
        for col in &w.columns {
            let s = winsorize(table, col, w.lower, w.upper).with_context(|| format!("winsorizing '{}'", col))?;
            report.winsorized.push(s);
        }
    }
    report.n_rows_after = table.n_rows();
    Ok(report)
}

/// 0/1 indicator column as bytes.
pub fn indicator(table: &Table, name: &str) -> Result<Vec<u8>> {
    table
        .num(name)?
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if v == 0.0 {
                Ok(0)
            } else if v == 1.0 {
                Ok(1)
            } else {
                bail!("column '{}' must be 0/1, found {} at row {}", name, v, i)
            }
        })
        .collect()
}

pub struct PsmOutput {
    pub result: PsmResult,
    pub balance: Vec<BalanceRow>,
    /// Treated row then control row per pair, with `pscore` and `pair_id`.
    pub matched: Table,
}

pub fn run_psm(table: &Table, sec: &PsmSection) -> Result<PsmOutput> {
    if sec.covariates.is_empty() {
        bail!("psm needs at least one covariate");
    }
    let years = table.years()?;
    let treat = indicator(table, &sec.treat)?;
    let covariates: Vec<&[f64]> = sec.covariates.iter().map(|c| table.num(c)).collect::<lc_core::Result<_>>()?;
    let result = propensity_match(&years, &treat, &sec.covariates, &covariates, &sec.params)?;
    let balance = result.balance(&sec.covariates, &covariates, &treat, sec.params.balance_threshold)?;
    for row in balance.iter().filter(|r| !r.balanced) {
        warn!(variable = %row.variable, bias_after = row.bias_after, "covariate not balanced after matching");
    }

    let rows = result.matched_rows();
    let mut matched = table.select_rows(&rows);
    matched.set("pscore", Column::Num(rows.iter().map(|&i| result.scores[i]).collect()))?;
    matched.set("pair_id", Column::Num((0..rows.len()).map(|k| (k / 2 + 1) as f64).collect()))?;
    Ok(PsmOutput { result, balance, matched })
}

/// Dense ids in sorted label order.
fn dense_ids(labels: &[String]) -> Vec<u64> {
    let mut levels: Vec<&String> = labels.iter().collect();
    levels.sort();
    levels.dedup();
    labels.iter().map(|l| levels.partition_point(|x| *x < l) as u64).collect()
}

/// Complete-case regression sample with FE and cluster identifiers.
struct RegressionSample {
    table: Table,
    y: Vec<f64>,
    entity: Vec<u64>,
    time: Vec<u64>,
    clusters: Vec<u64>,
}

fn regression_sample(table: &Table, outcome: &str, regressors: &[String], cluster: &str) -> Result<RegressionSample> {
    let mut needed = vec![outcome.to_string()];
    needed.extend(regressors.iter().cloned());
    needed.push(cluster.to_string());
    let rows = table.complete_rows(&needed)?;
    if rows.len() < table.n_rows() {
        info!(dropped = table.n_rows() - rows.len(), kept = rows.len(), "dropped incomplete rows from regression sample");
    }
    let sub = table.select_rows(&rows);
    let time = sub
        .years()?
        .into_iter()
        .map(|y| u64::try_from(y).map_err(|_| anyhow::anyhow!("year {} is negative", y)))
        .collect::<Result<Vec<_>>>()?;
    let cluster_col = sub.column(cluster)?;
    let cluster_labels: Vec<String> = (0..sub.n_rows()).map(|i| cluster_col.display(i)).collect();
    Ok(RegressionSample {
        y: sub.num(outcome)?.to_vec(),
        entity: dense_ids(sub.cities()?),
        time,
        clusters: dense_ids(&cluster_labels),
        table: sub,
    })
}

fn design(table: &Table, names: &[String]) -> Result<DesignMatrix> {
    if names.is_empty() {
        return Ok(DesignMatrix::empty(table.n_rows()));
    }
    let cols = names.iter().map(|n| table.num(n).map(<[f64]>::to_vec)).collect::<lc_core::Result<Vec<_>>>()?;
    Ok(DesignMatrix::from_columns(names.to_vec(), cols)?)
}

/// Two-way fixed-effects DID regression on the complete cases of `table`.
pub fn run_twfe(table: &Table, reg: &RegressionConfig) -> Result<TwfeFit> {
    let mut regressors = vec![reg.treatment.clone()];
    regressors.extend(reg.controls.iter().cloned());
    let s = regression_sample(table, &reg.outcome, &regressors, &reg.cluster)?;
    let x = design(&s.table, &regressors)?;
    let fit = twfe_did(&TwfeSpec {
        y: &s.y,
        regressors: &x,
        entity: &s.entity,
        time: &s.time,
        clusters: &s.clusters,
        method: reg.fixed_effects,
        dof: reg.dof,
    })?;
    if let Some(e) = fit.fit.estimate(&reg.treatment) {
        info!(coef = e.coef, se = e.std_error, p = e.p_value, n = fit.fit.n_obs, "DID estimate");
    }
    Ok(fit)
}

/// Event study on `table`, which must carry `pilot_year`.
pub fn run_event_study(table: &Table, reg: &RegressionConfig, es: &EventStudyConfig) -> Result<EventStudyFit> {
    let s = regression_sample(table, &reg.outcome, &reg.controls, &reg.cluster)?;
    let relative = relative_years(&s.table)?;
    let controls = design(&s.table, &reg.controls)?;
    let fit = event_study(&EventStudySpec {
        y: &s.y,
        relative_year: &relative,
        controls: &controls,
        entity: &s.entity,
        time: &s.time,
        clusters: &s.clusters,
        window: es.window,
        method: reg.fixed_effects,
        dof: reg.dof,
        alpha: es.alpha,
    })?;
    if fit.pre_significant > 0 {
        warn!(pre_significant = fit.pre_significant, n_pre = fit.n_pre, "pre-period coefficients significant at 5%");
    }
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_panel::{PilotBatch, SimulationConfig, simulate_panel};

    #[test]
    fn test_dense_ids_sorted() {
        let labels: Vec<String> = ["乙", "甲", "乙", "丙"].iter().map(|s| s.to_string()).collect();
        let ids = dense_ids(&labels);
        assert_eq!(ids[0], ids[2]);
        assert_ne!(ids[0], ids[1]);
        let mut distinct = ids.clone();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct, vec![0, 1, 2]);
    }

    #[test]
    fn test_indicator_rejects_non_binary() {
        let t = Table::from_columns(vec![("treat".into(), Column::Num(vec![0.0, 1.0, 2.0]))]).unwrap();
        assert!(indicator(&t, "treat").is_err());
    }

    #[test]
    fn test_simulated_twfe_recovers_effect_sign() {
        let sim = simulate_panel(&SimulationConfig { n_cities: 40, noise_sd: 0.01, ..SimulationConfig::default() })
            .unwrap();
        let mut panel = sim.table;
        assign_did(&mut panel, &sim.roster).unwrap();
        lc_panel::Derive::Log {
            source: "carbon_intensity".into(),
            target: None,
            policy: lc_panel::LogPolicy::Strict,
        }
        .apply(&mut panel)
        .unwrap();
        let reg = RegressionConfig {
            outcome: "ln_carbon_intensity".into(),
            treatment: "did".into(),
            controls: vec![],
            cluster: CITY.into(),
            fixed_effects: lc_inference::FeMethod::Dummies,
            dof: lc_inference::DofPolicy::Clusters,
            sample: crate::config::Sample::Full,
        };
        let fit = run_twfe(&panel, &reg).unwrap();
        let did = fit.fit.estimate("did").unwrap();
        assert!(did.coef < 0.0);
        assert_eq!(fit.n_entities, 40);
    }

    #[test]
    fn test_assign_did_without_codes_rejects_province_batch() {
        let mut t = Table::from_columns(vec![
            (CITY.into(), Column::Text(vec!["深圳市".into()])),
            (YEAR.into(), Column::Num(vec![2010.0])),
        ])
        .unwrap();
        let roster = PilotRoster {
            batches: vec![PilotBatch { year: 2010, provinces: vec![44], cities: vec![] }],
            aliases: BTreeMap::new(),
        };
        assert!(assign_did(&mut t, &roster).is_err());
    }
}
