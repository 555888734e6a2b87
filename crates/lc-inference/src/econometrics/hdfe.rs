//! Fixed-effects absorption by the method of alternating projections (MAP).
//!
//! Each FE dimension is a projection that subtracts group means. One pass is
//! exact for a single dimension; with two or more (city and year) the sweeps
//! repeat until every group mean of the residual is below the tolerance.
//!
//! # References
//!
//! - Gaure (2013), "OLS with multiple high dimensional category variables."
//! - Guimarães & Portugal (2010), "A simple feasible procedure to fit models
//!   with high-dimensional fixed effects." *Stata Journal*.

use std::collections::{BTreeMap, HashSet};

use lc_core::{Error, Result};
use tracing::warn;

use crate::regression::DesignMatrix;

const TOL: f64 = 1e-10;
const MAX_ITER: usize = 10_000;

/// Absorbs one or more categorical fixed effects.
#[derive(Debug, Clone)]
pub struct FixedEffectsSolver {
    n: usize,
    /// Dense level index per observation, one vector per dimension.
    group_of: Vec<Vec<usize>>,
    n_levels: Vec<usize>,
    /// Observation indices per level, one list per dimension.
    members: Vec<Vec<Vec<usize>>>,
}

impl FixedEffectsSolver {
    /// Build from raw identifiers (e.g. city code, year), one slice per
    /// dimension. Identifiers are mapped to dense levels in sorted order.
    pub fn new(dims: &[&[u64]]) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::Validation("at least one FE dimension required".into()));
        }
        let n = dims[0].len();
        if n == 0 {
            return Err(Error::Validation("n must be > 0".into()));
        }
        let mut group_of = Vec::with_capacity(dims.len());
        let mut n_levels = Vec::with_capacity(dims.len());
        let mut members = Vec::with_capacity(dims.len());
        for (d, ids) in dims.iter().enumerate() {
            if ids.len() != n {
                return Err(Error::Validation(format!(
                    "FE dimension {} has length {}, expected {}",
                    d,
                    ids.len(),
                    n
                )));
            }
            let mut levels: BTreeMap<u64, usize> = BTreeMap::new();
            for &id in ids.iter() {
                levels.entry(id).or_insert(0);
            }
            for (pos, slot) in levels.values_mut().enumerate() {
                *slot = pos;
            }
            let dense: Vec<usize> = ids.iter().map(|id| levels[id]).collect();
            let mut idx: Vec<Vec<usize>> = vec![Vec::new(); levels.len()];
            for (i, &g) in dense.iter().enumerate() {
                idx[g].push(i);
            }
            n_levels.push(levels.len());
            group_of.push(dense);
            members.push(idx);
        }
        Ok(Self { n, group_of, n_levels, members })
    }

    /// Residual of `v` after removing every fixed effect.
    pub fn partial_out(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.n {
            return Err(Error::Validation(format!("v length ({}) != n ({})", v.len(), self.n)));
        }
        let mut resid = v.to_vec();
        if self.group_of.len() == 1 {
            self.demean(&mut resid, 0);
            return Ok(resid);
        }
        for _ in 0..MAX_ITER {
            for d in 0..self.group_of.len() {
                self.demean(&mut resid, d);
            }
            if self.max_abs_group_mean(&resid) < TOL {
                return Ok(resid);
            }
        }
        warn!(max_iter = MAX_ITER, "fixed-effects absorption did not converge");
        Ok(resid)
    }

    /// Absorb every column of `x`.
    pub fn partial_out_matrix(&self, x: &DesignMatrix) -> Result<DesignMatrix> {
        x.map_columns(|c| self.partial_out(c))
    }

    /// Parameters consumed by the fixed effects (intercept included).
    ///
    /// One dimension: its level count. Two dimensions: levels of both minus
    /// the connected components of the bipartite level graph. More than two
    /// assumes a single component.
    pub fn absorbed_dof(&self) -> usize {
        let total: usize = self.n_levels.iter().sum();
        match self.group_of.len() {
            1 => self.n_levels[0],
            2 => total - self.connected_components(),
            k => total - (k - 1),
        }
    }

    fn demean(&self, v: &mut [f64], d: usize) {
        for obs in &self.members[d] {
            if obs.is_empty() {
                continue;
            }
            let mean = obs.iter().map(|&i| v[i]).sum::<f64>() / obs.len() as f64;
            for &i in obs {
                v[i] -= mean;
            }
        }
    }

    fn max_abs_group_mean(&self, v: &[f64]) -> f64 {
        let mut max_val = 0.0_f64;
        for dim in &self.members {
            for obs in dim.iter().filter(|o| !o.is_empty()) {
                let m = obs.iter().map(|&i| v[i]).sum::<f64>() / obs.len() as f64;
                max_val = max_val.max(m.abs());
            }
        }
        max_val
    }

    /// Connected components of the (dim 0, dim 1) level graph.
    fn connected_components(&self) -> usize {
        let n0 = self.n_levels[0];
        let mut parent: Vec<usize> = (0..n0 + self.n_levels[1]).collect();
        for i in 0..self.n {
            let a = find(&mut parent, self.group_of[0][i]);
            let b = find(&mut parent, n0 + self.group_of[1][i]);
            if a != b {
                parent[a] = b;
            }
        }
        let mut roots = HashSet::new();
        for node in 0..parent.len() {
            roots.insert(find(&mut parent, node));
        }
        roots.len()
    }
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}
