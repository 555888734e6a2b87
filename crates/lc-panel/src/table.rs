//! In-memory panel table.
//!
//! A [`Table`] is an ordered list of equally long named columns. Numeric
//! columns encode missing values as NaN, text columns as the empty string.

use std::collections::BTreeSet;

use lc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// City name key column.
pub const CITY: &str = "city_name";
/// Year key column.
pub const YEAR: &str = "year";
/// Six-digit administrative code; the first two digits are the province.
pub const CITY_CODE: &str = "city_code";

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Num,
    Text,
}

/// One column of a [`Table`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Num(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Num(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Num(_) => ColumnKind::Num,
            Column::Text(_) => ColumnKind::Text,
        }
    }

    pub fn is_missing(&self, i: usize) -> bool {
        match self {
            Column::Num(v) => v[i].is_nan(),
            Column::Text(v) => v[i].is_empty(),
        }
    }

    /// Cell rendered as text; missing cells render empty.
    pub fn display(&self, i: usize) -> String {
        match self {
            Column::Num(v) if v[i].is_nan() => String::new(),
            Column::Num(v) => format!("{}", v[i]),
            Column::Text(v) => v[i].clone(),
        }
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Num(v) => Column::Num(rows.iter().map(|&i| v[i]).collect()),
            Column::Text(v) => Column::Text(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// Named columns of equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl Table {
    /// Build from `(name, column)` pairs. Names must be unique and every
    /// column must have the same length.
    pub fn from_columns(cols: Vec<(String, Column)>) -> Result<Self> {
        let mut t = Table::default();
        for (name, col) in cols {
            if t.names.contains(&name) {
                return Err(Error::Validation(format!("duplicate column '{}'", name)));
            }
            t.set(&name, col)?;
        }
        Ok(t)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.position(name)
            .map(|j| &self.columns[j])
            .ok_or_else(|| Error::Validation(format!("column '{}' not found", name)))
    }

    /// Numeric column by name.
    pub fn num(&self, name: &str) -> Result<&[f64]> {
        match self.column(name)? {
            Column::Num(v) => Ok(v),
            Column::Text(_) => Err(Error::Validation(format!("column '{}' is not numeric", name))),
        }
    }

    /// Text column by name.
    pub fn text(&self, name: &str) -> Result<&[String]> {
        match self.column(name)? {
            Column::Text(v) => Ok(v),
            Column::Num(_) => Err(Error::Validation(format!("column '{}' is not text", name))),
        }
    }

    /// Replace `name` in place or append it as the last column.
    pub fn set(&mut self, name: &str, col: Column) -> Result<()> {
        if self.columns.is_empty() {
            self.n_rows = col.len();
        } else if col.len() != self.n_rows {
            return Err(Error::Validation(format!(
                "column '{}' has {} rows, table has {}",
                name,
                col.len(),
                self.n_rows
            )));
        }
        match self.position(name) {
            Some(j) => self.columns[j] = col,
            None => {
                self.names.push(name.to_string());
                self.columns.push(col);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Column> {
        let j = self.position(name)?;
        self.names.remove(j);
        let col = self.columns.remove(j);
        if self.columns.is_empty() {
            self.n_rows = 0;
        }
        Some(col)
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if self.has(to) {
            return Err(Error::Validation(format!("cannot rename '{}': '{}' already exists", from, to)));
        }
        let j = self
            .position(from)
            .ok_or_else(|| Error::Validation(format!("column '{}' not found", from)))?;
        self.names[j] = to.to_string();
        Ok(())
    }

    /// Rows at `rows`, in that order (repeats allowed).
    pub fn select_rows(&self, rows: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.select(rows)).collect(),
            n_rows: rows.len(),
        }
    }

    /// Rows for which `keep(i)` holds.
    pub fn filter<F: Fn(usize) -> bool>(&self, keep: F) -> Table {
        let rows: Vec<usize> = (0..self.n_rows).filter(|&i| keep(i)).collect();
        self.select_rows(&rows)
    }

    /// Subset of columns, in the given order.
    pub fn select_columns(&self, names: &[String]) -> Result<Table> {
        let mut out = Vec::with_capacity(names.len());
        for n in names {
            out.push((n.clone(), self.column(n)?.clone()));
        }
        Table::from_columns(out)
    }

    /// The `year` column as integers. Missing or fractional years are errors.
    pub fn years(&self) -> Result<Vec<i64>> {
        self.num(YEAR)?
            .iter()
            .enumerate()
            .map(|(i, &y)| {
                if y.is_finite() && y.fract() == 0.0 {
                    Ok(y as i64)
                } else {
                    Err(Error::Validation(format!("row {}: invalid year {}", i, y)))
                }
            })
            .collect()
    }

    /// The `city_name` column.
    pub fn cities(&self) -> Result<&[String]> {
        self.text(CITY)
    }

    /// Distinct city names, sorted.
    pub fn unique_cities(&self) -> Result<Vec<String>> {
        Ok(self.cities()?.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect())
    }

    /// Stable sort by (city, year).
    pub fn sort_by_key(&self) -> Result<Table> {
        let cities = self.cities()?;
        let years = self.years()?;
        let mut order: Vec<usize> = (0..self.n_rows).collect();
        order.sort_by(|&a, &b| cities[a].cmp(&cities[b]).then(years[a].cmp(&years[b])));
        Ok(self.select_rows(&order))
    }

    /// Rows with no missing value in any of `names`.
    pub fn complete_rows(&self, names: &[String]) -> Result<Vec<usize>> {
        let cols: Vec<&Column> = names.iter().map(|n| self.column(n)).collect::<Result<_>>()?;
        Ok((0..self.n_rows).filter(|&i| cols.iter().all(|c| !c.is_missing(i))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            (CITY.into(), Column::Text(vec!["乙市".into(), "甲市".into(), "甲市".into()])),
            (YEAR.into(), Column::Num(vec![2011.0, 2012.0, 2011.0])),
            ("gdp".into(), Column::Num(vec![1.0, f64::NAN, 3.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_set_replaces_and_checks_length() {
        let mut t = sample();
        t.set("gdp", Column::Num(vec![4.0, 5.0, 6.0])).unwrap();
        assert_eq!(t.n_cols(), 3);
        assert_eq!(t.num("gdp").unwrap(), &[4.0, 5.0, 6.0]);
        assert!(t.set("bad", Column::Num(vec![1.0])).is_err());
        assert!(t.text("gdp").is_err());
        assert!(t.num("missing").is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let r = Table::from_columns(vec![
            ("a".into(), Column::Num(vec![1.0])),
            ("a".into(), Column::Num(vec![2.0])),
        ]);
        assert!(r.is_err());
    }

    #[test]
    fn test_sort_and_select() {
        let t = sample().sort_by_key().unwrap();
        assert_eq!(t.cities().unwrap(), &["乙市", "甲市", "甲市"]);
        assert_eq!(t.years().unwrap(), vec![2011, 2011, 2012]);
        let sub = t.filter(|i| i > 0);
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(t.complete_rows(&["gdp".to_string()]).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_rename_remove_display() {
        let mut t = sample();
        t.rename("gdp", "real_gdp").unwrap();
        assert!(t.rename(CITY, YEAR).is_err());
        assert_eq!(t.column("real_gdp").unwrap().display(1), "");
        assert_eq!(t.column(YEAR).unwrap().display(0), "2011");
        assert!(t.remove("real_gdp").is_some());
        assert!(!t.has("real_gdp"));
    }

    #[test]
    fn test_fractional_year_rejected() {
        let mut t = sample();
        t.set(YEAR, Column::Num(vec![2011.5, 2012.0, 2011.0])).unwrap();
        assert!(t.years().is_err());
    }
}
