//! Data-quality checks over a city-year panel.
//!
//! Each check appends [`DiagnosticWarning`]s; nothing here mutates the
//! panel. A report passes when no warning is `critical`.

use std::collections::{BTreeMap, BTreeSet};

use lc_core::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pilot::verify_did;
use crate::table::{CITY, CITY_CODE, Column, Table, YEAR};

/// A diagnostic warning with severity.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticWarning {
    /// Warning category.
    pub category: String,
    /// Severity: "info", "warning", "critical".
    pub severity: String,
    /// Human-readable message.
    pub message: String,
}

impl DiagnosticWarning {
    fn new(category: &str, severity: &str, message: String) -> Self {
        Self { category: category.into(), severity: severity.into(), message }
    }
}

fn default_missing_threshold() -> f64 {
    0.2
}

fn default_shared_value_cities() -> usize {
    10
}

fn default_jump_ratio() -> f64 {
    10.0
}

fn default_constant_min_years() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Columns to check; empty means every numeric non-key column.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Columns that will be logged and must be strictly positive.
    #[serde(default)]
    pub log_sources: Vec<String>,
    /// Missing share above which a column is flagged.
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: f64,
    /// Flag a value repeated by at least this many cities in one year.
    #[serde(default = "default_shared_value_cities")]
    pub shared_value_cities: usize,
    /// Flag year-over-year ratios above this (or below its inverse).
    #[serde(default = "default_jump_ratio")]
    pub jump_ratio: f64,
    /// Series shorter than this are not tested for being constant.
    #[serde(default = "default_constant_min_years")]
    pub constant_min_years: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            log_sources: Vec::new(),
            missing_threshold: default_missing_threshold(),
            shared_value_cities: default_shared_value_cities(),
            jump_ratio: default_jump_ratio(),
            constant_min_years: default_constant_min_years(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingRate {
    pub variable: String,
    pub n_missing: usize,
    pub share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub n_obs: usize,
    pub n_cities: usize,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    pub duplicate_keys: Vec<(String, i64)>,
    pub missing: Vec<MissingRate>,
    pub warnings: Vec<DiagnosticWarning>,
    /// True if no critical warnings.
    pub passed: bool,
}

const KEY_COLUMNS: &[&str] = &[CITY, YEAR, CITY_CODE, "pilot_year", "treat", "post", "did"];

/// Run every check on `table`.
pub fn diagnose(table: &Table, cfg: &DiagnosticsConfig) -> Result<DiagnosticsReport> {
    let cities = table.cities()?;
    let years = table.years()?;
    let columns: Vec<String> = if cfg.columns.is_empty() {
        table
            .columns()
            .filter(|(n, c)| matches!(c, Column::Num(_)) && !KEY_COLUMNS.contains(n))
            .map(|(n, _)| n.to_string())
            .collect()
    } else {
        cfg.columns.clone()
    };

    let mut warnings = Vec::new();

    // 1. One row per (city, year).
    let mut counts: BTreeMap<(&str, i64), usize> = BTreeMap::new();
    for (c, &y) in cities.iter().zip(&years) {
        *counts.entry((c.as_str(), y)).or_insert(0) += 1;
    }
    let duplicate_keys: Vec<(String, i64)> =
        counts.iter().filter(|(_, n)| **n > 1).map(|((c, y), _)| (c.to_string(), *y)).collect();
    if !duplicate_keys.is_empty() {
        let (c, y) = &duplicate_keys[0];
        warnings.push(DiagnosticWarning::new(
            "duplicates",
            "critical",
            format!("{} duplicated (city, year) keys, first ({}, {})", duplicate_keys.len(), c, y),
        ));
    }

    // Row indices per city, ordered by year.
    let mut series: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, c) in cities.iter().enumerate() {
        series.entry(c.as_str()).or_default().push(i);
    }
    for rows in series.values_mut() {
        rows.sort_by_key(|&i| years[i]);
    }

    // 2. Missing rates.
    let n = table.n_rows();
    let mut missing = Vec::with_capacity(columns.len());
    for name in &columns {
        let v = table.num(name)?;
        let n_missing = v.iter().filter(|x| x.is_nan()).count();
        let share = if n > 0 { n_missing as f64 / n as f64 } else { 0.0 };
        if share > cfg.missing_threshold {
            warnings.push(DiagnosticWarning::new(
                "missing",
                "warning",
                format!("{} is missing in {:.1}% of rows ({}/{})", name, share * 100.0, n_missing, n),
            ));
        }
        missing.push(MissingRate { variable: name.clone(), n_missing, share });
    }

    // 3. Log sources must be positive.
    for name in &cfg.log_sources {
        let v = table.num(name)?;
        let bad = v.iter().filter(|&&x| x <= 0.0).count();
        if bad > 0 {
            warnings.push(DiagnosticWarning::new(
                "log_domain",
                "warning",
                format!("{} has {} non-positive values; their logs will be missing", name, bad),
            ));
        }
    }

    for name in &columns {
        let v = table.num(name)?;

        // 4. A level that never changes within a city usually means a
        //    positional mix-up or a broadcast constant.
        let constant: Vec<&str> = series
            .iter()
            .filter(|(_, rows)| {
                let obs: Vec<f64> = rows.iter().map(|&i| v[i]).filter(|x| !x.is_nan()).collect();
                obs.len() >= cfg.constant_min_years && obs.iter().all(|&x| x == obs[0])
            })
            .map(|(c, _)| *c)
            .collect();
        if !constant.is_empty() {
            warnings.push(DiagnosticWarning::new(
                "constant_series",
                "warning",
                format!("{} is constant over time in {} cities (e.g. {})", name, constant.len(), constant[0]),
            ));
        }

        // 5. The same value reported by many cities in one year.
        let mut by_year: BTreeMap<i64, BTreeMap<u64, BTreeSet<&str>>> = BTreeMap::new();
        for i in (0..n).filter(|&i| !v[i].is_nan() && v[i] != 0.0) {
            by_year.entry(years[i]).or_default().entry(v[i].to_bits()).or_default().insert(cities[i].as_str());
        }
        for (y, values) in &by_year {
            if let Some((bits, cs)) = values.iter().max_by_key(|(_, cs)| cs.len()) {
                if cs.len() >= cfg.shared_value_cities {
                    warnings.push(DiagnosticWarning::new(
                        "shared_value",
                        "warning",
                        format!("{} = {} in {} cities in {}", name, f64::from_bits(*bits), cs.len(), y),
                    ));
                }
            }
        }

        // 6. Year-over-year jumps.
        let mut jumps = 0usize;
        let mut example = None;
        for (c, rows) in &series {
            for w in rows.windows(2) {
                let (a, b) = (v[w[0]], v[w[1]]);
                if a > 0.0 && b > 0.0 && years[w[1]] == years[w[0]] + 1 {
                    let r = b / a;
                    if r > cfg.jump_ratio || r < 1.0 / cfg.jump_ratio {
                        jumps += 1;
                        example.get_or_insert_with(|| format!("{} {}→{}: {}→{}", c, years[w[0]], years[w[1]], a, b));
                    }
                }
            }
        }
        if let Some(ex) = example {
            warnings.push(DiagnosticWarning::new(
                "jump",
                "info",
                format!("{} changes by more than {}x year over year {} times (e.g. {})", name, cfg.jump_ratio, jumps, ex),
            ));
        }
    }

    // 7. DID identity, when the columns exist.
    if ["pilot_year", "treat", "post", "did"].iter().all(|c| table.has(c)) {
        let bad = verify_did(table)?;
        if !bad.is_empty() {
            warnings.push(DiagnosticWarning::new(
                "did_identity",
                "critical",
                format!("{} rows violate did = treat × post (first row {})", bad.len(), bad[0]),
            ));
        }
    }

    for w in &warnings {
        warn!(category = %w.category, severity = %w.severity, "{}", w.message);
    }
    let passed = !warnings.iter().any(|w| w.severity == "critical");
    Ok(DiagnosticsReport {
        n_obs: n,
        n_cities: series.len(),
        year_min: years.iter().min().copied(),
        year_max: years.iter().max().copied(),
        duplicate_keys,
        missing,
        warnings,
        passed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(cities: &[&str], years: &[f64], x: Vec<f64>) -> Table {
        Table::from_columns(vec![
            (CITY.into(), Column::Text(cities.iter().map(|s| s.to_string()).collect())),
            (YEAR.into(), Column::Num(years.to_vec())),
            ("x".into(), Column::Num(x)),
        ])
        .unwrap()
    }

    fn categories(r: &DiagnosticsReport) -> Vec<&str> {
        r.warnings.iter().map(|w| w.category.as_str()).collect()
    }

    #[test]
    fn test_clean_panel_passes() {
        let t = panel(
            &["甲市", "甲市", "乙市", "乙市"],
            &[2010.0, 2011.0, 2010.0, 2011.0],
            vec![1.0, 1.1, 2.0, 2.2],
        );
        let r = diagnose(&t, &DiagnosticsConfig::default()).unwrap();
        assert!(r.passed);
        assert!(r.warnings.is_empty(), "{:?}", r.warnings);
        assert_eq!((r.year_min, r.year_max), (Some(2010), Some(2011)));
        assert_eq!(r.n_cities, 2);
    }

    #[test]
    fn test_duplicates_are_critical() {
        let t = panel(&["甲市", "甲市"], &[2010.0, 2010.0], vec![1.0, 2.0]);
        let r = diagnose(&t, &DiagnosticsConfig::default()).unwrap();
        assert!(!r.passed);
        assert_eq!(r.duplicate_keys, vec![("甲市".to_string(), 2010)]);
    }

    #[test]
    fn test_constant_jump_missing_log_domain() {
        let nan = f64::NAN;
        let t = panel(
            &["甲市", "甲市", "甲市", "乙市", "乙市", "乙市"],
            &[2010.0, 2011.0, 2012.0, 2010.0, 2011.0, 2012.0],
            vec![5.0, 5.0, 5.0, 1.0, 50.0, nan],
        );
        let cfg = DiagnosticsConfig { log_sources: vec!["x".into()], ..DiagnosticsConfig::default() };
        let r = diagnose(&t, &cfg).unwrap();
        let cats = categories(&r);
        assert!(cats.contains(&"constant_series"));
        assert!(cats.contains(&"jump"));
        assert!(!cats.contains(&"log_domain"));
        assert!(!cats.contains(&"missing"));
        assert!(r.passed);

        let t = panel(&["甲市", "乙市"], &[2010.0, 2010.0], vec![0.0, nan]);
        let r = diagnose(&t, &cfg).unwrap();
        let cats = categories(&r);
        assert!(cats.contains(&"log_domain"));
        assert!(cats.contains(&"missing"));
    }

    #[test]
    fn test_shared_value_across_cities() {
        let names: Vec<String> = (0..12).map(|k| format!("城市{}", k)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let t = panel(&refs, &[2015.0; 12], vec![3.25; 12]);
        let r = diagnose(&t, &DiagnosticsConfig::default()).unwrap();
        assert_eq!(categories(&r), vec!["shared_value"]);
    }

    #[test]
    fn test_broken_did_is_critical() {
        let mut t = panel(&["甲市", "乙市"], &[2010.0, 2011.0], vec![1.0, 2.0]);
        t.set("pilot_year", Column::Num(vec![2010.0, f64::NAN])).unwrap();
        t.set("treat", Column::Num(vec![1.0, 0.0])).unwrap();
        t.set("post", Column::Num(vec![1.0, 0.0])).unwrap();
        t.set("did", Column::Num(vec![0.0, 0.0])).unwrap();
        let r = diagnose(&t, &DiagnosticsConfig::default()).unwrap();
        assert!(!r.passed);
        assert!(categories(&r).contains(&"did_identity"));
    }
}
