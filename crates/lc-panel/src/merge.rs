//! Left joins of source tables onto the panel on (city key, year).

use std::collections::{BTreeMap, BTreeSet};

use lc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::city::match_key;
use crate::table::{CITY, Column, Table, YEAR};

/// What to do when the right table has two rows for one (key, year).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dedupe {
    #[default]
    Error,
    First,
}

fn default_city() -> String {
    CITY.to_string()
}

fn default_year() -> String {
    YEAR.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOptions {
    #[serde(default = "default_city")]
    pub left_city: String,
    #[serde(default = "default_city")]
    pub right_city: String,
    #[serde(default = "default_year")]
    pub year: String,
    #[serde(default)]
    pub dedupe: Dedupe,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { left_city: default_city(), right_city: default_city(), year: default_year(), dedupe: Dedupe::default() }
    }
}

/// Outcome of one join.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub n_left_rows: usize,
    pub n_right_rows: usize,
    pub n_matched_rows: usize,
    pub n_unmatched_rows: usize,
    pub added_columns: Vec<String>,
    /// Left cities whose key never occurs on the right.
    pub unmatched_left: Vec<String>,
    /// Right cities whose key never occurs on the left.
    pub unmatched_right: Vec<String>,
    pub n_duplicates_dropped: usize,
}

fn year_of(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0).then_some(v as i64)
}

/// Left join `right` onto `left`. Every left row is kept; right columns
/// other than the keys are appended, missing where nothing matched.
pub fn left_join(left: &Table, right: &Table, opts: &MergeOptions) -> Result<(Table, MergeReport)> {
    let l_city = left.text(&opts.left_city)?;
    let l_year = left.num(&opts.year)?;
    let r_city = right.text(&opts.right_city)?;
    let r_year = right.num(&opts.year)?;

    let added: Vec<String> =
        right.names().iter().filter(|n| **n != opts.right_city && **n != opts.year).cloned().collect();
    if let Some(clash) = added.iter().find(|n| left.has(n)) {
        return Err(Error::Validation(format!("column '{}' exists on both sides of the merge", clash)));
    }

    let mut index: BTreeMap<(String, i64), usize> = BTreeMap::new();
    let mut duplicates: Vec<(String, i64)> = Vec::new();
    let mut bad_years = 0usize;
    for (i, (c, &y)) in r_city.iter().zip(r_year).enumerate() {
        let Some(y) = year_of(y) else {
            bad_years += 1;
            continue;
        };
        let key = (match_key(c), y);
        if index.contains_key(&key) {
            duplicates.push(key);
        } else {
            index.insert(key, i);
        }
    }
    if bad_years > 0 {
        warn!(rows = bad_years, "right-hand rows without a valid year ignored");
    }
    if !duplicates.is_empty() && opts.dedupe == Dedupe::Error {
        let shown: Vec<String> = duplicates.iter().take(5).map(|(k, y)| format!("({}, {})", k, y)).collect();
        return Err(Error::Validation(format!(
            "{} duplicate right-hand keys, e.g. {}; set dedupe: first to keep the first row",
            duplicates.len(),
            shown.join(", ")
        )));
    }

    let l_keys: Vec<String> = l_city.iter().map(|c| match_key(c)).collect();
    let r_keyset: BTreeSet<&str> = index.keys().map(|(k, _)| k.as_str()).collect();
    let l_keyset: BTreeSet<&str> = l_keys.iter().map(String::as_str).collect();

    let rows: Vec<Option<usize>> = l_keys
        .iter()
        .zip(l_year)
        .map(|(k, &y)| year_of(y).and_then(|y| index.get(&(k.clone(), y)).copied()))
        .collect();

    let mut out = left.clone();
    for name in &added {
        let col = match right.column(name)? {
            Column::Num(v) => Column::Num(rows.iter().map(|r| r.map_or(f64::NAN, |i| v[i])).collect()),
            Column::Text(v) => {
                Column::Text(rows.iter().map(|r| r.map_or_else(String::new, |i| v[i].clone())).collect())
            }
        };
        out.set(name, col)?;
    }

    let unmatched_left: Vec<String> = l_city
        .iter()
        .zip(&l_keys)
        .filter(|(_, k)| !r_keyset.contains(k.as_str()))
        .map(|(c, _)| c.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let unmatched_right: Vec<String> = r_city
        .iter()
        .filter(|c| !l_keyset.contains(match_key(c).as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let n_matched_rows = rows.iter().filter(|r| r.is_some()).count();
    let report = MergeReport {
        n_left_rows: left.n_rows(),
        n_right_rows: right.n_rows(),
        n_matched_rows,
        n_unmatched_rows: left.n_rows() - n_matched_rows,
        added_columns: added,
        unmatched_left,
        unmatched_right,
        n_duplicates_dropped: duplicates.len(),
    };
    if !report.unmatched_left.is_empty() {
        warn!(
            n = report.unmatched_left.len(),
            first = %report.unmatched_left[0],
            "panel cities without a match in source"
        );
    }
    info!(matched = report.n_matched_rows, unmatched = report.n_unmatched_rows, "merged source");
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(v: &[&str]) -> Column {
        Column::Text(v.iter().map(|s| s.to_string()).collect())
    }

    fn panel() -> Table {
        Table::from_columns(vec![
            (CITY.into(), text(&["吉林市", "吉林市", "杭州市", "襄阳市"])),
            (YEAR.into(), Column::Num(vec![2010.0, 2011.0, 2010.0, 2010.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_join_on_normalised_keys() {
        let right = Table::from_columns(vec![
            (CITY.into(), text(&["吉林省吉林市", "杭州", "襄樊市", "拉萨市"])),
            (YEAR.into(), Column::Num(vec![2010.0, 2010.0, 2010.0, 2010.0])),
            ("fdi".into(), Column::Num(vec![1.0, 2.0, 3.0, 4.0])),
        ])
        .unwrap();
        let (out, report) = left_join(&panel(), &right, &MergeOptions::default()).unwrap();
        let fdi = out.num("fdi").unwrap();
        assert_eq!(fdi[0], 1.0);
        assert!(fdi[1].is_nan());
        assert_eq!(fdi[2], 2.0);
        assert_eq!(fdi[3], 3.0);
        assert_eq!(report.n_matched_rows, 3);
        assert_eq!(report.unmatched_right, vec!["拉萨市"]);
        assert!(report.unmatched_left.is_empty());
        assert_eq!(out.n_rows(), 4);
    }

    #[test]
    fn test_duplicate_right_keys() {
        let right = Table::from_columns(vec![
            (CITY.into(), text(&["杭州市", "杭州"])),
            (YEAR.into(), Column::Num(vec![2010.0, 2010.0])),
            ("gdp".into(), Column::Num(vec![5.0, 6.0])),
        ])
        .unwrap();
        assert!(left_join(&panel(), &right, &MergeOptions::default()).is_err());
        let opts = MergeOptions { dedupe: Dedupe::First, ..MergeOptions::default() };
        let (out, report) = left_join(&panel(), &right, &opts).unwrap();
        assert_eq!(out.num("gdp").unwrap()[2], 5.0);
        assert_eq!(report.n_duplicates_dropped, 1);
        assert_eq!(report.unmatched_left, vec!["吉林市", "襄阳市"]);
    }

    #[test]
    fn test_column_clash_rejected() {
        let right = Table::from_columns(vec![
            (CITY.into(), text(&["杭州市"])),
            (YEAR.into(), Column::Num(vec![2010.0])),
        ])
        .unwrap();
        let mut left = panel();
        left.set("gdp", Column::Num(vec![0.0; 4])).unwrap();
        let mut right = right;
        right.set("gdp", Column::Num(vec![1.0])).unwrap();
        assert!(left_join(&left, &right, &MergeOptions::default()).is_err());
    }
}
