//! Derived variables and cleaning steps applied to the panel in place.

use std::collections::BTreeMap;

use lc_core::{Error, Result};
use lc_prob::summary::{finite, mean, quantile_sorted, std_dev};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::table::{Column, Table};

/// Treatment of non-positive levels when taking logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPolicy {
    /// `ln(x)`, missing where `x ≤ 0`.
    #[default]
    Strict,
    /// `ln(1 + x)`, missing where `x ≤ −1`.
    Shift1,
}

pub fn log_values(values: &[f64], policy: LogPolicy) -> Vec<f64> {
    values
        .iter()
        .map(|&v| match policy {
            LogPolicy::Strict if v > 0.0 => v.ln(),
            LogPolicy::Shift1 if v > -1.0 => v.ln_1p(),
            _ => f64::NAN,
        })
        .collect()
}

pub fn square_values(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| v * v).collect()
}

/// `scale · num / den`, missing where the denominator is zero.
pub fn ratio_values(num: &[f64], den: &[f64], scale: f64) -> Vec<f64> {
    num.iter().zip(den).map(|(&a, &b)| if b == 0.0 { f64::NAN } else { scale * a / b }).collect()
}

/// Real values from a price index with `base` as its reference level.
pub fn deflate_values(values: &[f64], index: &[f64], base: f64) -> Vec<f64> {
    values.iter().zip(index).map(|(&v, &p)| if p > 0.0 { v * base / p } else { f64::NAN }).collect()
}

fn default_scale() -> f64 {
    1.0
}

fn default_base() -> f64 {
    100.0
}

/// A derived column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Derive {
    Log {
        source: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        policy: LogPolicy,
    },
    Square {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
    Ratio {
        numerator: String,
        denominator: String,
        target: String,
        #[serde(default = "default_scale")]
        scale: f64,
    },
    Deflate {
        source: String,
        index: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default = "default_base")]
        base: f64,
    },
}

impl Derive {
    pub fn target(&self) -> String {
        match self {
            Derive::Log { source, target, .. } => target.clone().unwrap_or_else(|| format!("ln_{}", source)),
            Derive::Square { source, target } => target.clone().unwrap_or_else(|| format!("{}_sq", source)),
            Derive::Ratio { target, .. } => target.clone(),
            Derive::Deflate { source, target, .. } => target.clone().unwrap_or_else(|| format!("real_{}", source)),
        }
    }

    /// Compute the column and store it; returns its name.
    pub fn apply(&self, table: &mut Table) -> Result<String> {
        let values = match self {
            Derive::Log { source, policy, .. } => log_values(table.num(source)?, *policy),
            Derive::Square { source, .. } => square_values(table.num(source)?),
            Derive::Ratio { numerator, denominator, scale, .. } => {
                ratio_values(table.num(numerator)?, table.num(denominator)?, *scale)
            }
            Derive::Deflate { source, index, base, .. } => {
                deflate_values(table.num(source)?, table.num(index)?, *base)
            }
        };
        let target = self.target();
        let missing = values.iter().filter(|v| v.is_nan()).count();
        debug!(column = %target, missing, "derived column");
        table.set(&target, Column::Num(values))?;
        Ok(target)
    }
}

/// Effect of winsorizing one column.
#[derive(Debug, Clone, Serialize)]
pub struct WinsorizeSummary {
    pub variable: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub n_clipped_low: usize,
    pub n_clipped_high: usize,
    pub mean_before: f64,
    pub std_before: f64,
    pub mean_after: f64,
    pub std_after: f64,
    pub min_after: f64,
    pub max_after: f64,
    /// Relative change of the mean, in percent.
    pub mean_change_pct: f64,
}

/// Clip a column at its `lower` and `upper` quantiles (linear
/// interpolation). Missing values stay missing.
pub fn winsorize(table: &mut Table, column: &str, lower: f64, upper: f64) -> Result<WinsorizeSummary> {
    if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
        return Err(Error::Validation(format!("invalid winsorize quantiles ({}, {})", lower, upper)));
    }
    let values = table.num(column)?.to_vec();
    let mut sorted = finite(&values);
    if sorted.is_empty() {
        return Err(Error::Validation(format!("column '{}' has no values to winsorize", column)));
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let lo = quantile_sorted(&sorted, lower);
    let hi = quantile_sorted(&sorted, upper);
    let clipped: Vec<f64> = values.iter().map(|&v| if v.is_nan() { v } else { v.clamp(lo, hi) }).collect();

    let kept = finite(&clipped);
    let mean_before = mean(&values);
    let mean_after = mean(&clipped);
    let summary = WinsorizeSummary {
        variable: column.to_string(),
        lower_bound: lo,
        upper_bound: hi,
        n_clipped_low: values.iter().filter(|&&v| v < lo).count(),
        n_clipped_high: values.iter().filter(|&&v| v > hi).count(),
        mean_before,
        std_before: std_dev(&values),
        mean_after,
        std_after: std_dev(&clipped),
        min_after: kept.iter().copied().fold(f64::INFINITY, f64::min),
        max_after: kept.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean_change_pct: (mean_after - mean_before) / mean_before * 100.0,
    };
    table.set(column, Column::Num(clipped))?;
    info!(
        column,
        low = summary.n_clipped_low,
        high = summary.n_clipped_high,
        "winsorized"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    /// Global mean of the column.
    Mean,
    /// Linear in year within each city; ends take the nearest observed value.
    #[default]
    Interpolate,
}

/// Fill missing values of `column`; returns how many were filled.
///
/// A city with no observed value at all stays missing under `Interpolate`.
pub fn fill_missing(table: &mut Table, column: &str, method: FillMethod) -> Result<usize> {
    let mut values = table.num(column)?.to_vec();
    let before = values.iter().filter(|v| v.is_nan()).count();
    match method {
        FillMethod::Mean => {
            let m = mean(&values);
            values.iter_mut().filter(|v| v.is_nan()).for_each(|v| *v = m);
        }
        FillMethod::Interpolate => {
            let years = table.years()?;
            let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for (i, c) in table.cities()?.iter().enumerate() {
                groups.entry(c.as_str()).or_default().push(i);
            }
            for rows in groups.values_mut() {
                rows.sort_by_key(|&i| years[i]);
                interpolate_series(&mut values, rows, &years);
            }
        }
    }
    let after = values.iter().filter(|v| v.is_nan()).count();
    table.set(column, Column::Num(values))?;
    Ok(before - after)
}

fn interpolate_series(values: &mut [f64], rows: &[usize], years: &[i64]) {
    let known: Vec<usize> = rows.iter().copied().filter(|&i| !values[i].is_nan()).collect();
    let (Some(&first), Some(&last)) = (known.first(), known.last()) else {
        return;
    };
    let missing: Vec<usize> = rows.iter().copied().filter(|&i| values[i].is_nan()).collect();
    for i in missing {
        let y = years[i];
        values[i] = if y <= years[first] {
            values[first]
        } else if y >= years[last] {
            values[last]
        } else {
            let k = known.partition_point(|&j| years[j] <= y);
            let (a, b) = (known[k - 1], known[k]);
            let w = (y - years[a]) as f64 / (years[b] - years[a]) as f64;
            values[a] + w * (values[b] - values[a])
        };
    }
}

/// Rows with `start ≤ year ≤ end`.
pub fn filter_years(table: &Table, start: i64, end: i64) -> Result<Table> {
    let years = table.years()?;
    Ok(table.filter(|i| (start..=end).contains(&years[i])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{CITY, YEAR};
    use approx::assert_relative_eq;

    fn panel(values: Vec<f64>) -> Table {
        let n = values.len();
        Table::from_columns(vec![
            (CITY.into(), Column::Text((0..n).map(|i| if i < 5 { "甲市".into() } else { "乙市".into() }).collect())),
            (YEAR.into(), Column::Num((0..n).map(|i| 2010.0 + (i % 5) as f64).collect())),
            ("fdi".into(), Column::Num(values)),
        ])
        .unwrap()
    }

    #[test]
    fn test_log_policies() {
        let v = [std::f64::consts::E, 0.0, -0.5];
        let strict = log_values(&v, LogPolicy::Strict);
        assert_relative_eq!(strict[0], 1.0, epsilon = 1e-12);
        assert!(strict[1].is_nan() && strict[2].is_nan());
        let shifted = log_values(&v, LogPolicy::Shift1);
        assert_eq!(shifted[1], 0.0);
        assert_relative_eq!(shifted[2], 0.5f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_derive_ops() {
        let mut t = panel(vec![1.0, 2.0, 0.0, 4.0, 5.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let name = Derive::Square { source: "fdi".into(), target: None }.apply(&mut t).unwrap();
        assert_eq!(name, "fdi_sq");
        assert_eq!(t.num("fdi_sq").unwrap()[3], 16.0);
        Derive::Ratio { numerator: "fdi_sq".into(), denominator: "fdi".into(), target: "r".into(), scale: 100.0 }
            .apply(&mut t)
            .unwrap();
        assert_eq!(t.num("r").unwrap()[1], 200.0);
        assert!(t.num("r").unwrap()[2].is_nan());
        let d: Derive = serde_json::from_str(r#"{"op": "log", "source": "fdi"}"#).unwrap();
        assert_eq!(d.apply(&mut t).unwrap(), "ln_fdi");
        assert!(t.num("ln_fdi").unwrap()[2].is_nan());
        assert_relative_eq!(deflate_values(&[210.0], &[105.0], 100.0)[0], 200.0);
    }

    #[test]
    fn test_winsorize_bounds() {
        let mut t = panel((1..=10).map(|v| v as f64).collect());
        let s = winsorize(&mut t, "fdi", 0.1, 0.9).unwrap();
        // numpy linear quantiles over 1..=10
        assert_relative_eq!(s.lower_bound, 1.9, epsilon = 1e-12);
        assert_relative_eq!(s.upper_bound, 9.1, epsilon = 1e-12);
        assert_eq!((s.n_clipped_low, s.n_clipped_high), (1, 1));
        let v = t.num("fdi").unwrap();
        assert_relative_eq!(v[0], 1.9, epsilon = 1e-12);
        assert_relative_eq!(v[9], 9.1, epsilon = 1e-12);
        assert_relative_eq!(s.mean_after, 5.5, epsilon = 1e-12);
        assert!(winsorize(&mut t, "fdi", 0.9, 0.1).is_err());
    }

    #[test]
    fn test_interpolate_within_city() {
        let nan = f64::NAN;
        let mut t = panel(vec![nan, 2.0, nan, 6.0, nan, nan, nan, nan, nan, nan]);
        let filled = fill_missing(&mut t, "fdi", FillMethod::Interpolate).unwrap();
        assert_eq!(filled, 3);
        let v = t.num("fdi").unwrap();
        assert_eq!(&v[..5], &[2.0, 2.0, 4.0, 6.0, 6.0]);
        assert!(v[5..].iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_fill_mean_and_year_filter() {
        let nan = f64::NAN;
        let mut t = panel(vec![1.0, nan, 3.0, nan, 5.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(fill_missing(&mut t, "fdi", FillMethod::Mean).unwrap(), 2);
        assert_relative_eq!(t.num("fdi").unwrap()[1], 3.0, epsilon = 1e-12);
        let sub = filter_years(&t, 2011, 2012).unwrap();
        assert_eq!(sub.n_rows(), 4);
        assert_eq!(sub.years().unwrap(), vec![2011, 2012, 2011, 2012]);
    }
}
