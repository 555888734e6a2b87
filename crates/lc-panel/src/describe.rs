//! Descriptive statistics tables.

use lc_core::Result;
use lc_prob::summary::summarize;
use serde::Serialize;

use crate::table::{Column, Table};

#[derive(Debug, Clone, Serialize)]
pub struct DescribeRow {
    pub variable: String,
    pub obs: usize,
    pub mean: f64,
    pub sd: f64,
    pub min: f64,
    pub p50: f64,
    pub max: f64,
    pub missing: usize,
    pub missing_pct: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

/// One row per numeric column in `columns`.
pub fn describe(table: &Table, columns: &[String]) -> Result<Vec<DescribeRow>> {
    let mut out = Vec::with_capacity(columns.len());
    for name in columns {
        let s = summarize(table.num(name)?);
        let total = s.n + s.n_missing;
        out.push(DescribeRow {
            variable: name.clone(),
            obs: s.n,
            mean: s.mean,
            sd: s.std,
            min: s.min,
            p50: s.median,
            max: s.max,
            missing: s.n_missing,
            missing_pct: if total > 0 { 100.0 * s.n_missing as f64 / total as f64 } else { 0.0 },
            skewness: s.skewness,
            kurtosis: s.kurtosis,
        });
    }
    Ok(out)
}

/// `describe` separately for each value of a grouping column (e.g. `treat`).
pub fn describe_by(table: &Table, columns: &[String], group: &str) -> Result<Vec<(String, Vec<DescribeRow>)>> {
    let col = table.column(group)?;
    let mut labels: Vec<String> = (0..table.n_rows()).map(|i| col.display(i)).collect();
    labels.sort();
    labels.dedup();
    let mut out = Vec::with_capacity(labels.len());
    for label in labels {
        let sub = table.filter(|i| col.display(i) == label);
        out.push((label, describe(&sub, columns)?));
    }
    Ok(out)
}

/// Rows as a table for spreadsheet output.
pub fn to_table(rows: &[DescribeRow]) -> Result<Table> {
    let num = |f: fn(&DescribeRow) -> f64| Column::Num(rows.iter().map(f).collect());
    Table::from_columns(vec![
        ("variable".into(), Column::Text(rows.iter().map(|r| r.variable.clone()).collect())),
        ("obs".into(), num(|r| r.obs as f64)),
        ("mean".into(), num(|r| r.mean)),
        ("sd".into(), num(|r| r.sd)),
        ("min".into(), num(|r| r.min)),
        ("p50".into(), num(|r| r.p50)),
        ("max".into(), num(|r| r.max)),
        ("missing".into(), num(|r| r.missing as f64)),
        ("missing_pct".into(), num(|r| r.missing_pct)),
        ("skewness".into(), num(|r| r.skewness)),
        ("kurtosis".into(), num(|r| r.kurtosis)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_describe_with_missing() {
        let t = Table::from_columns(vec![
            ("treat".into(), Column::Num(vec![0.0, 0.0, 1.0, 1.0, 1.0])),
            ("x".into(), Column::Num(vec![1.0, 2.0, 3.0, 4.0, f64::NAN])),
        ])
        .unwrap();
        let rows = describe(&t, &["x".to_string()]).unwrap();
        let r = &rows[0];
        assert_eq!((r.obs, r.missing), (4, 1));
        assert_relative_eq!(r.mean, 2.5);
        assert_relative_eq!(r.p50, 2.5);
        assert_relative_eq!(r.sd, (5.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(r.missing_pct, 20.0);

        let groups = describe_by(&t, &["x".to_string()], "treat").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "0");
        assert_relative_eq!(groups[1].1[0].mean, 3.5);

        let table = to_table(&rows).unwrap();
        assert_eq!(table.n_cols(), 11);
        assert_eq!(table.num("obs").unwrap(), &[4.0]);
        assert!(describe(&t, &["nope".to_string()]).is_err());
    }
}
