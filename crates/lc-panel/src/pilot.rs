//! Low-carbon pilot roster and the DID treatment variables.
//!
//! A roster is a list of batches, each with a start year, whole provinces
//! (by two-digit province code) and individually listed cities. Province
//! batches are applied first, then city lists, both in year order; the
//! first assignment a city receives is kept. A city reached under more than
//! one year is reported as a conflict.

use std::collections::{BTreeMap, BTreeSet};

use lc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::city::match_key;
use crate::table::{CITY_CODE, Column, Table, YEAR};

/// One wave of pilots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilotBatch {
    pub year: i64,
    #[serde(default)]
    pub provinces: Vec<u32>,
    #[serde(default)]
    pub cities: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PilotRoster {
    pub batches: Vec<PilotBatch>,
    /// Roster spelling to panel spelling, e.g. a district to its prefecture.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// A city assigned under several pilot years.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PilotConflict {
    pub city: String,
    pub years: Vec<i64>,
    pub assigned: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PilotAssignment {
    /// Panel city name to first pilot year.
    pub pilot_year: BTreeMap<String, i64>,
    pub conflicts: Vec<PilotConflict>,
    /// Roster cities with no counterpart in the panel.
    pub unmatched: Vec<String>,
}

impl PilotAssignment {
    /// Number of assigned cities per pilot year.
    pub fn cities_by_year(&self) -> BTreeMap<i64, usize> {
        let mut out = BTreeMap::new();
        for &y in self.pilot_year.values() {
            *out.entry(y).or_insert(0) += 1;
        }
        out
    }
}

/// Province part of a six-digit administrative code.
pub fn province_of(code: f64) -> Option<u32> {
    (code.is_finite() && (100_000.0..1_000_000.0).contains(&code)).then(|| (code as u32) / 10_000)
}

impl PilotRoster {
    pub fn validate(&self) -> Result<()> {
        if self.batches.is_empty() {
            return Err(Error::Validation("pilot roster has no batches".into()));
        }
        if let Some(b) = self.batches.iter().find(|b| b.provinces.is_empty() && b.cities.is_empty()) {
            return Err(Error::Validation(format!("pilot batch {} lists no provinces or cities", b.year)));
        }
        Ok(())
    }

    /// Assign pilot years to the distinct cities of a panel.
    ///
    /// `codes` holds the administrative code per row, aligned with `cities`;
    /// it is required when any batch lists provinces.
    pub fn assign(&self, cities: &[String], codes: Option<&[f64]>) -> Result<PilotAssignment> {
        self.validate()?;
        if let Some(c) = codes {
            if c.len() != cities.len() {
                return Err(Error::Validation(format!("codes length ({}) != cities ({})", c.len(), cities.len())));
            }
        }

        let mut by_key: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        let mut province: BTreeMap<&str, u32> = BTreeMap::new();
        for (i, c) in cities.iter().enumerate() {
            by_key.entry(match_key(c)).or_default().insert(c.as_str());
            if let Some(p) = codes.and_then(|v| province_of(v[i])) {
                province.entry(c.as_str()).or_insert(p);
            }
        }

        let mut batches: Vec<&PilotBatch> = self.batches.iter().collect();
        batches.sort_by_key(|b| b.year);

        let mut seen: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
        let mut assigned: BTreeMap<&str, i64> = BTreeMap::new();
        let mut unmatched = BTreeSet::new();

        for b in batches.iter().filter(|b| !b.provinces.is_empty()) {
            if codes.is_none() {
                return Err(Error::Validation(format!(
                    "batch {} lists provinces but the panel has no '{}' column",
                    b.year, CITY_CODE
                )));
            }
            for (&city, &p) in &province {
                if b.provinces.contains(&p) {
                    seen.entry(city).or_default().insert(b.year);
                    assigned.entry(city).or_insert(b.year);
                }
            }
        }
        for b in &batches {
            for name in &b.cities {
                let name = self.aliases.get(name).unwrap_or(name);
                match by_key.get(&match_key(name)) {
                    Some(hits) => {
                        for &city in hits {
                            seen.entry(city).or_default().insert(b.year);
                            assigned.entry(city).or_insert(b.year);
                        }
                    }
                    None => {
                        unmatched.insert(name.clone());
                    }
                }
            }
        }

        let conflicts: Vec<PilotConflict> = seen
            .iter()
            .filter(|(_, years)| years.len() > 1)
            .map(|(&city, years)| PilotConflict {
                city: city.to_string(),
                years: years.iter().copied().collect(),
                assigned: assigned[city],
            })
            .collect();
        for c in &conflicts {
            warn!(city = %c.city, years = ?c.years, assigned = c.assigned, "city listed under several pilot years");
        }
        if !unmatched.is_empty() {
            warn!(n = unmatched.len(), cities = ?unmatched, "roster cities not found in panel");
        }

        let out = PilotAssignment {
            pilot_year: assigned.into_iter().map(|(c, y)| (c.to_string(), y)).collect(),
            conflicts,
            unmatched: unmatched.into_iter().collect(),
        };
        info!(treated = out.pilot_year.len(), by_year = ?out.cities_by_year(), "assigned pilot years");
        Ok(out)
    }
}

/// Counts after writing the DID columns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DidSummary {
    pub n_obs: usize,
    pub n_treated_cities: usize,
    pub n_control_cities: usize,
    pub n_treated_obs: usize,
    pub n_did_obs: usize,
    pub did_share: f64,
    pub cities_by_year: BTreeMap<i64, usize>,
}

/// Write `pilot_year` (missing for never-treated), `treat`, `post` and
/// `did = treat · post` into the panel.
pub fn apply_did(table: &mut Table, assignment: &PilotAssignment) -> Result<DidSummary> {
    let years = table.years()?;
    let cities = table.cities()?.to_vec();
    let n = table.n_rows();
    let mut pilot_year = vec![f64::NAN; n];
    let mut treat = vec![0.0; n];
    let mut post = vec![0.0; n];
    let mut did = vec![0.0; n];
    for i in 0..n {
        if let Some(&py) = assignment.pilot_year.get(&cities[i]) {
            pilot_year[i] = py as f64;
            treat[i] = 1.0;
            if years[i] >= py {
                post[i] = 1.0;
            }
            did[i] = treat[i] * post[i];
        }
    }

    let all: BTreeSet<&String> = cities.iter().collect();
    let treated: BTreeSet<&String> = cities.iter().filter(|c| assignment.pilot_year.contains_key(*c)).collect();
    let mut cities_by_year = BTreeMap::new();
    for c in &treated {
        *cities_by_year.entry(assignment.pilot_year[*c]).or_insert(0) += 1;
    }
    let n_did_obs = did.iter().filter(|&&d| d == 1.0).count();
    let summary = DidSummary {
        n_obs: n,
        n_treated_cities: treated.len(),
        n_control_cities: all.len() - treated.len(),
        n_treated_obs: treat.iter().filter(|&&t| t == 1.0).count(),
        n_did_obs,
        did_share: if n > 0 { n_did_obs as f64 / n as f64 } else { f64::NAN },
        cities_by_year,
    };

    table.set("pilot_year", Column::Num(pilot_year))?;
    table.set("treat", Column::Num(treat))?;
    table.set("post", Column::Num(post))?;
    table.set("did", Column::Num(did))?;
    Ok(summary)
}

/// Rows breaking `did = treat · post`, `post = 1[year ≥ pilot_year]` or
/// `post = 0` for never-treated cities.
pub fn verify_did(table: &Table) -> Result<Vec<usize>> {
    let years = table.num(YEAR)?;
    let pilot = table.num("pilot_year")?;
    let treat = table.num("treat")?;
    let post = table.num("post")?;
    let did = table.num("did")?;
    let bad = (0..table.n_rows())
        .filter(|&i| {
            let expected_post = if pilot[i].is_nan() { 0.0 } else { f64::from(u8::from(years[i] >= pilot[i])) };
            let expected_treat = if pilot[i].is_nan() { 0.0 } else { 1.0 };
            did[i] != treat[i] * post[i] || post[i] != expected_post || treat[i] != expected_treat
        })
        .collect();
    Ok(bad)
}

/// `year − pilot_year` per row; `None` for never-treated rows.
pub fn relative_years(table: &Table) -> Result<Vec<Option<i64>>> {
    let years = table.years()?;
    let pilot = table.num("pilot_year")?;
    Ok(years
        .iter()
        .zip(pilot)
        .map(|(&y, &p)| (p.is_finite()).then(|| y - p as i64))
        .collect())
}
