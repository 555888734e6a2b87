//! Study configuration (`lcdid run --config study.yaml`).

use anyhow::{Context, Result};
use lc_inference::{DofPolicy, EventWindow, FeMethod, PsmConfig};
use lc_panel::{ColumnSpec, Derive, DiagnosticsConfig, FillMethod, MergeOptions, PilotRoster, ReadOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One input file and the columns taken from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub read: ReadOptions,
    pub columns: Vec<ColumnSpec>,
    /// Join keys; ignored for the base panel.
    #[serde(default)]
    pub merge: MergeOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RosterSource {
    File { path: PathBuf },
    Inline(PilotRoster),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct YearWindow {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillStep {
    pub column: String,
    #[serde(default)]
    pub method: FillMethod,
}

fn default_lower() -> f64 {
    0.01
}

fn default_upper() -> f64 {
    0.99
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WinsorizeConfig {
    pub columns: Vec<String>,
    #[serde(default = "default_lower")]
    pub lower: f64,
    #[serde(default = "default_upper")]
    pub upper: f64,
}

fn default_treat() -> String {
    "treat".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsmSection {
    pub covariates: Vec<String>,
    #[serde(default = "default_treat")]
    pub treat: String,
    #[serde(flatten)]
    pub params: PsmConfig,
}

/// Which samples the DID regression is run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sample {
    Full,
    Matched,
    #[default]
    Both,
}

fn default_treatment() -> String {
    "did".to_string()
}

fn default_cluster() -> String {
    lc_panel::CITY.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    pub outcome: String,
    #[serde(default = "default_treatment")]
    pub treatment: String,
    #[serde(default)]
    pub controls: Vec<String>,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    #[serde(default)]
    pub fixed_effects: FeMethod,
    #[serde(default)]
    pub dof: DofPolicy,
    #[serde(default)]
    pub sample: Sample,
}

fn default_alpha() -> f64 {
    0.05
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStudyConfig {
    #[serde(default)]
    pub window: EventWindow,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("lcdid_out")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_out_dir")]
    pub dir: PathBuf,
    /// Also write the panel and matched sample as CSV.
    #[serde(default)]
    pub csv: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: default_out_dir(), csv: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Base panel; must provide `city_name` and `year`.
    pub panel: SourceConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub years: Option<YearWindow>,
    #[serde(default)]
    pub roster: Option<RosterSource>,
    #[serde(default)]
    pub fill: Vec<FillStep>,
    #[serde(default)]
    pub derive: Vec<Derive>,
    #[serde(default)]
    pub winsorize: Option<WinsorizeConfig>,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    /// Columns for the descriptive statistics table.
    #[serde(default)]
    pub describe: Vec<String>,
    #[serde(default)]
    pub psm: Option<PsmSection>,
    #[serde(default)]
    pub regression: Option<RegressionConfig>,
    #[serde(default)]
    pub event_study: Option<EventStudyConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

fn parse_by_extension<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let value = if ext == "json" {
        serde_json::from_slice(&bytes).with_context(|| format!("invalid JSON in {}", path.display()))?
    } else {
        // Default: YAML (serde_yaml_ng).
        serde_yaml_ng::from_slice(&bytes).with_context(|| format!("invalid YAML in {}", path.display()))?
    };
    Ok(value)
}

fn resolve(base: &Path, p: &mut PathBuf) {
    if p.is_relative() {
        *p = base.join(&*p);
    }
}

/// Load a study config. Relative paths are resolved against the config
/// file's directory.
pub fn read_study_config(path: &Path) -> Result<StudyConfig> {
    let mut cfg: StudyConfig = parse_by_extension(path)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    resolve(&base, &mut cfg.panel.path);
    for s in &mut cfg.sources {
        resolve(&base, &mut s.path);
    }
    if let Some(RosterSource::File { path }) = &mut cfg.roster {
        resolve(&base, path);
    }
    resolve(&base, &mut cfg.output.dir);
    if cfg.panel.name.is_empty() {
        cfg.panel.name = "panel".to_string();
    }
    for (i, s) in cfg.sources.iter_mut().enumerate() {
        if s.name.is_empty() {
            s.name = format!("source_{}", i + 1);
        }
    }
    Ok(cfg)
}

/// Load a pilot roster file (YAML, or JSON by extension).
pub fn read_roster(path: &Path) -> Result<PilotRoster> {
    let roster: PilotRoster = parse_by_extension(path)?;
    roster.validate()?;
    Ok(roster)
}

impl RosterSource {
    pub fn load(&self) -> Result<PilotRoster> {
        match self {
            RosterSource::File { path } => read_roster(path),
            RosterSource::Inline(r) => {
                r.validate()?;
                Ok(r.clone())
            }
        }
    }
}
