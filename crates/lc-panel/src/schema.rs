//! Named-column extraction with load-time checks.
//!
//! Every source declares the columns it contributes by header name. A
//! declared `position` documents where the column is expected; a header that
//! moved is a [`Error::Schema`] at load time instead of a silently shifted
//! variable downstream.

use lc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::io::{Cell, RawSheet};
use crate::table::{Column, ColumnKind, Table};

/// One column taken from a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Header text in the source file.
    pub source: String,
    /// Name in the panel; defaults to `source`.
    #[serde(default)]
    pub target: Option<String>,
    /// Documented zero-based position of the column.
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn num(source: &str, target: &str) -> Self {
        Self { source: source.into(), target: Some(target.into()), position: None, kind: ColumnKind::Num }
    }

    pub fn text(source: &str, target: &str) -> Self {
        Self { kind: ColumnKind::Text, ..Self::num(source, target) }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn target_name(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }
}

/// Declared columns of one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceSchema {
    pub columns: Vec<ColumnSpec>,
}

impl SourceSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Resolve every declared column to its index in `headers`.
    ///
    /// Fails when a column is missing, appears more than once, or sits at a
    /// different index than documented.
    pub fn validate(&self, headers: &[String]) -> Result<Vec<usize>> {
        if self.columns.is_empty() {
            return Err(Error::Schema("no columns declared".into()));
        }
        let mut idx = Vec::with_capacity(self.columns.len());
        let mut problems = Vec::new();
        for spec in &self.columns {
            let hits: Vec<usize> = headers
                .iter()
                .enumerate()
                .filter(|(_, h)| h.trim() == spec.source)
                .map(|(j, _)| j)
                .collect();
            match (hits.as_slice(), spec.position) {
                ([], _) => problems.push(format!("missing column '{}'", spec.source)),
                ([j], Some(p)) if *j != p => problems.push(format!(
                    "column '{}' expected at position {} but found at {}",
                    spec.source, p, j
                )),
                ([j], _) => idx.push(*j),
                (many, _) => problems.push(format!("column '{}' appears {} times", spec.source, many.len())),
            }
        }
        if problems.is_empty() {
            Ok(idx)
        } else {
            Err(Error::Schema(format!("{} (headers: {})", problems.join("; "), headers.join(", "))))
        }
    }

    /// Extract the declared columns by header name.
    pub fn extract(&self, raw: &RawSheet) -> Result<Table> {
        let idx = self.validate(&raw.headers)?;
        self.build(raw, &idx)
    }

    /// Extract by documented positions alone, without consulting headers.
    pub fn extract_positional(&self, raw: &RawSheet) -> Result<Table> {
        let idx: Vec<usize> = self
            .columns
            .iter()
            .map(|c| {
                c.position.ok_or_else(|| Error::Schema(format!("column '{}' has no documented position", c.source)))
            })
            .collect::<Result<_>>()?;
        if let Some(&j) = idx.iter().find(|&&j| j >= raw.headers.len()) {
            return Err(Error::Schema(format!("position {} beyond {} columns", j, raw.headers.len())));
        }
        self.build(raw, &idx)
    }

    fn build(&self, raw: &RawSheet, idx: &[usize]) -> Result<Table> {
        let mut cols = Vec::with_capacity(idx.len());
        for (spec, &j) in self.columns.iter().zip(idx) {
            let col = match spec.kind {
                ColumnKind::Num => {
                    let mut coerced = 0usize;
                    let v = (0..raw.rows.len())
                        .map(|i| match raw.cell(i, j) {
                            Cell::Num(v) => *v,
                            Cell::Empty => f64::NAN,
                            Cell::Text(s) => s.trim().parse::<f64>().unwrap_or_else(|_| {
                                coerced += 1;
                                f64::NAN
                            }),
                        })
                        .collect();
                    if coerced > 0 {
                        warn!(column = %spec.source, coerced, "non-numeric cells read as missing");
                    }
                    Column::Num(v)
                }
                ColumnKind::Text => Column::Text((0..raw.rows.len()).map(|i| raw.cell(i, j).to_text()).collect()),
            };
            cols.push((spec.target_name().to_string(), col));
        }
        Table::from_columns(cols)
    }
}
