//! JSON reports, provenance and result workbooks.

use anyhow::Result;
use lc_inference::{BalanceRow, EventStudyFit, TwfeFit, YearMatch};
use lc_panel::{Column, DiagnosticWarning, Table, write_csv, write_xlsx};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let out = h.finalize();
    let mut s = String::with_capacity(64);
    for b in out {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

#[derive(Debug, Clone, Serialize)]
pub struct InputMeta {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub tool: String,
    pub tool_version: String,
    pub created_unix_ms: u128,
    pub command: String,
    pub inputs: Vec<InputMeta>,
}

impl RunMeta {
    pub fn new(command: &str, inputs: &[&Path]) -> Result<Self> {
        let created_unix_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
        let inputs: Vec<InputMeta> = inputs
            .iter()
            .map(|p| -> Result<InputMeta> { Ok(InputMeta { path: p.display().to_string(), sha256: sha256_file(p)? }) })
            .collect::<Result<_>>()?;
        Ok(Self {
            tool: "lcdid".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            created_unix_ms,
            command: command.to_string(),
            inputs,
        })
    }
}

pub fn fit_json(fit: &TwfeFit) -> serde_json::Value {
    serde_json::json!({
        "fixed_effects": fit.method,
        "n_entities": fit.n_entities,
        "n_periods": fit.n_periods,
        "summary": fit.summary(),
    })
}

pub fn event_json(fit: &EventStudyFit) -> serde_json::Value {
    serde_json::json!({
        "window": fit.window,
        "terms": fit.terms,
        "pre_significant": fit.pre_significant,
        "n_pre": fit.n_pre,
        "model": fit_json(&fit.twfe),
    })
}

fn text(values: Vec<String>) -> Column {
    Column::Text(values)
}

fn num<T>(rows: &[T], f: impl Fn(&T) -> f64) -> Column {
    Column::Num(rows.iter().map(f).collect())
}

/// Publication-style regression table: `coef***` over `(se)` per
/// regressor, one column per model, then N, R², clusters and FE rows.
pub fn regression_table(models: &[(&str, &TwfeFit)]) -> Result<Table> {
    let mut vars: Vec<String> = Vec::new();
    for (_, m) in models {
        for name in &m.regressors {
            if !vars.contains(name) {
                vars.push(name.clone());
            }
        }
    }

    let mut labels = Vec::new();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); models.len()];
    for v in &vars {
        labels.push(v.clone());
        labels.push(String::new());
        for (k, (_, m)) in models.iter().enumerate() {
            let (coef, se) = m.fit.estimate(v).map(|e| e.cell()).unwrap_or_default();
            cells[k].push(coef);
            cells[k].push(se);
        }
    }
    let footer: [(&str, fn(&TwfeFit) -> String); 5] = [
        ("N", |m| m.fit.n_obs.to_string()),
        ("R²", |m| format!("{:.4}", m.fit.r_squared)),
        ("Adj. R²", |m| format!("{:.4}", m.fit.adj_r_squared)),
        ("Clusters", |m| m.fit.n_clusters.map(|g| g.to_string()).unwrap_or_default()),
        ("City & year FE", |_| "Yes".to_string()),
    ];
    for (label, f) in footer {
        labels.push(label.to_string());
        for (k, (_, m)) in models.iter().enumerate() {
            cells[k].push(f(m));
        }
    }

    let mut cols = vec![("variable".to_string(), text(labels))];
    for ((name, _), c) in models.iter().zip(cells) {
        cols.push((name.to_string(), text(c)));
    }
    Ok(Table::from_columns(cols)?)
}

pub fn balance_sheet(rows: &[BalanceRow]) -> Result<Table> {
    Ok(Table::from_columns(vec![
        ("variable".into(), text(rows.iter().map(|r| r.variable.clone()).collect())),
        ("mean_treated_before".into(), num(rows, |r| r.mean_treated_before)),
        ("mean_control_before".into(), num(rows, |r| r.mean_control_before)),
        ("bias_before".into(), num(rows, |r| r.bias_before)),
        ("t_before".into(), num(rows, |r| r.t_before)),
        ("p_before".into(), num(rows, |r| r.p_before)),
        ("mean_treated_after".into(), num(rows, |r| r.mean_treated_after)),
        ("mean_control_after".into(), num(rows, |r| r.mean_control_after)),
        ("bias_after".into(), num(rows, |r| r.bias_after)),
        ("t_after".into(), num(rows, |r| r.t_after)),
        ("p_after".into(), num(rows, |r| r.p_after)),
        ("bias_reduction".into(), num(rows, |r| r.bias_reduction)),
        ("balanced".into(), text(rows.iter().map(|r| if r.balanced { "yes" } else { "no" }.to_string()).collect())),
    ])?)
}

pub fn psm_years_sheet(years: &[YearMatch]) -> Result<Table> {
    Ok(Table::from_columns(vec![
        ("year".into(), num(years, |y| y.year as f64)),
        ("n_obs".into(), num(years, |y| y.n_obs as f64)),
        ("n_treated".into(), num(years, |y| y.n_treated as f64)),
        ("n_control".into(), num(years, |y| y.n_control as f64)),
        ("n_matched".into(), num(years, |y| y.n_matched as f64)),
        ("n_unmatched".into(), num(years, |y| y.n_unmatched as f64)),
        ("pseudo_r2".into(), num(years, |y| y.pseudo_r2)),
        ("score_mean".into(), num(years, |y| y.score_mean)),
        ("score_std".into(), num(years, |y| y.score_std)),
        ("mean_distance".into(), num(years, |y| y.mean_distance)),
        ("max_distance".into(), num(years, |y| y.max_distance)),
        ("skipped".into(), text(years.iter().map(|y| y.skipped.clone().unwrap_or_default()).collect())),
    ])?)
}

pub fn event_sheet(fit: &EventStudyFit) -> Result<Table> {
    let t = &fit.terms;
    Ok(Table::from_columns(vec![
        ("relative_year".into(), num(t, |e| e.relative_year as f64)),
        ("term".into(), text(t.iter().map(|e| e.estimate.name.clone()).collect())),
        ("coef".into(), num(t, |e| e.estimate.coef)),
        ("std_error".into(), num(t, |e| e.estimate.std_error)),
        ("p_value".into(), num(t, |e| e.estimate.p_value)),
        ("ci_lower".into(), num(t, |e| e.ci_lower)),
        ("ci_upper".into(), num(t, |e| e.ci_upper)),
        ("n_obs".into(), num(t, |e| e.n_obs as f64)),
        ("binned".into(), text(t.iter().map(|e| if e.binned { "yes" } else { "" }.to_string()).collect())),
    ])?)
}

pub fn warnings_sheet(warnings: &[DiagnosticWarning]) -> Result<Table> {
    Ok(Table::from_columns(vec![
        ("category".into(), text(warnings.iter().map(|w| w.category.clone()).collect())),
        ("severity".into(), text(warnings.iter().map(|w| w.severity.clone()).collect())),
        ("message".into(), text(warnings.iter().map(|w| w.message.clone()).collect())),
    ])?)
}

/// Write a table as XLSX (`.xlsx`) or CSV (anything else).
pub fn write_panel(path: &Path, table: &Table) -> Result<()> {
    let is_xlsx = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
    if is_xlsx {
        write_xlsx(path, &[("panel", table)])?;
    } else {
        write_csv(path, table)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(sha256_hex(b"abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn test_warnings_sheet_shape() {
        let w = vec![DiagnosticWarning {
            category: "missing".into(),
            severity: "warning".into(),
            message: "x is 30% missing".into(),
        }];
        let t = warnings_sheet(&w).unwrap();
        assert_eq!(t.n_rows(), 1);
        assert_eq!(t.text("severity").unwrap()[0], "warning");
    }
}
