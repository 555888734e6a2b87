//! Indicator columns for least-squares dummy-variable (LSDV) fixed effects.

use std::collections::BTreeSet;
use std::fmt::Display;

use lc_core::{Error, Result};

use crate::regression::DesignMatrix;

/// One indicator column per level except the first (sorted) level.
#[derive(Debug, Clone)]
pub struct DummyEncoder<K> {
    prefix: String,
    levels: Vec<K>,
}

impl<K: Ord + Clone + Display> DummyEncoder<K> {
    /// Levels observed in `values`, sorted.
    pub fn fit(prefix: &str, values: &[K]) -> Result<Self> {
        let levels: Vec<K> = values.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if levels.is_empty() {
            return Err(Error::Validation(format!("no levels for fixed effect '{}'", prefix)));
        }
        Ok(Self { prefix: prefix.to_string(), levels })
    }

    /// Omitted reference level.
    pub fn reference(&self) -> &K {
        &self.levels[0]
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    /// Column names, e.g. `year_2011`.
    pub fn names(&self) -> Vec<String> {
        self.levels[1..].iter().map(|l| format!("{}_{}", self.prefix, l)).collect()
    }

    /// Encode `values` (length n) as `n_levels − 1` indicator columns.
    pub fn transform(&self, values: &[K]) -> Result<DesignMatrix> {
        let mut cols = vec![vec![0.0; values.len()]; self.levels.len() - 1];
        for (i, v) in values.iter().enumerate() {
            let pos = self.levels.binary_search(v).map_err(|_| {
                Error::Validation(format!("unknown level '{}' for fixed effect '{}'", v, self.prefix))
            })?;
            if pos > 0 {
                cols[pos - 1][i] = 1.0;
            }
        }
        if cols.is_empty() {
            return Ok(DesignMatrix::empty(values.len()));
        }
        DesignMatrix::from_columns(self.names(), cols)
    }
}
