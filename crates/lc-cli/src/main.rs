//! lcdid CLI

mod config;
mod pipeline;
mod report;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use lc_inference::{DofPolicy, EventWindow, FeMethod, PsmConfig, TwfeFit};
use lc_panel::describe::{describe, describe_by, to_table};
use lc_panel::{ReadOptions, SimulationConfig, Table, diagnose, read_table, simulate_panel, write_xlsx};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use config::{
    EventStudyConfig, PsmSection, RegressionConfig, RosterSource, Sample, StudyConfig, read_roster,
    read_study_config,
};
use report::{RunMeta, write_json, write_panel};

#[derive(Parser)]
#[command(name = "lcdid")]
#[command(about = "lcdid - PSM-DID evaluation of China's low-carbon city pilots")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FeArg {
    Dummies,
    Absorb,
}

impl From<FeArg> for FeMethod {
    fn from(v: FeArg) -> Self {
        match v {
            FeArg::Dummies => FeMethod::Dummies,
            FeArg::Absorb => FeMethod::Absorb,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DofArg {
    Clusters,
    Residual,
}

impl From<DofArg> for DofPolicy {
    fn from(v: DofArg) -> Self {
        match v {
            DofArg::Clusters => DofPolicy::Clusters,
            DofArg::Residual => DofPolicy::Residual,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load the configured sources and left-join them onto the base panel
    Merge {
        /// Study config (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Merged panel (.csv or .xlsx)
        #[arg(long)]
        out: PathBuf,

        /// Output file for the merge report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assign pilot years and write `pilot_year`, `treat`, `post`, `did`
    AssignDid {
        /// Panel with `city_name` and `year` (and `city_code` for province batches)
        #[arg(short, long)]
        input: PathBuf,

        /// Pilot roster (YAML or JSON)
        #[arg(long)]
        roster: PathBuf,

        #[arg(long)]
        out: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply the config's year window, fills, derived columns and winsorizing
    Transform {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        config: PathBuf,

        #[arg(long)]
        out: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Data-quality checks
    Diagnose {
        #[arg(short, long)]
        input: PathBuf,

        /// Take thresholds from this study config
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Exit with an error when a critical warning is raised
        #[arg(long)]
        strict: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Descriptive statistics
    Describe {
        #[arg(short, long)]
        input: PathBuf,

        /// Columns to summarise (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Also summarise separately by this column (e.g. `treat`)
        #[arg(long)]
        by: Option<String>,

        /// Workbook with the table(s)
        #[arg(long)]
        xlsx: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Year-by-year propensity-score matching
    Psm {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long, value_delimiter = ',', required = true)]
        covariates: Vec<String>,

        #[arg(long, default_value = "treat")]
        treat: String,

        #[arg(long, default_value = "0.05")]
        caliper: f64,

        /// Inverse L2 strength of the propensity model
        #[arg(long, default_value = "1.0")]
        c: f64,

        /// Matched sample (.csv or .xlsx)
        #[arg(long)]
        out: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Two-way fixed-effects DID regression
    Regress {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        outcome: String,

        #[arg(long, default_value = "did")]
        treatment: String,

        #[arg(long, value_delimiter = ',')]
        controls: Vec<String>,

        #[arg(long, default_value = "city_name")]
        cluster: String,

        #[arg(long, value_enum, default_value = "dummies")]
        fe: FeArg,

        #[arg(long, value_enum, default_value = "clusters")]
        dof: DofArg,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Event study with binned leads and lags
    EventStudy {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(long)]
        outcome: String,

        #[arg(long, value_delimiter = ',')]
        controls: Vec<String>,

        #[arg(long, default_value = "city_name")]
        cluster: String,

        #[arg(long, default_value = "-5", allow_hyphen_values = true)]
        min: i64,

        #[arg(long, default_value = "5")]
        max: i64,

        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        reference: i64,

        #[arg(long, default_value = "0.05")]
        alpha: f64,

        #[arg(long, value_enum, default_value = "dummies")]
        fe: FeArg,

        #[arg(long, value_enum, default_value = "clusters")]
        dof: DofArg,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Whole pipeline from one study config
    Run {
        #[arg(short, long)]
        config: PathBuf,

        /// Run summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Synthetic panel with a known policy effect, plus its roster
    Simulate {
        /// Directory for `panel.csv` and `roster.yaml`
        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long, default_value = "60")]
        n_cities: usize,

        #[arg(long, default_value = "13")]
        n_years: usize,

        #[arg(long, default_value = "-0.08", allow_hyphen_values = true)]
        effect: f64,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Merge { config, out, output } => cmd_merge(&config, &out, output.as_ref()),
        Commands::AssignDid { input, roster, out, output } => {
            cmd_assign_did(&input, &roster, &out, output.as_ref())
        }
        Commands::Transform { input, config, out, output } => {
            cmd_transform(&input, &config, &out, output.as_ref())
        }
        Commands::Diagnose { input, config, strict, output } => {
            cmd_diagnose(&input, config.as_deref(), strict, output.as_ref())
        }
        Commands::Describe { input, columns, by, xlsx, output } => {
            cmd_describe(&input, &columns, by.as_deref(), xlsx.as_deref(), output.as_ref())
        }
        Commands::Psm { input, covariates, treat, caliper, c, out, output } => {
            let sec = PsmSection { covariates, treat, params: PsmConfig { caliper, c, ..PsmConfig::default() } };
            cmd_psm(&input, &sec, out.as_deref(), output.as_ref())
        }
        Commands::Regress { input, outcome, treatment, controls, cluster, fe, dof, output } => {
            let reg = RegressionConfig {
                outcome,
                treatment,
                controls,
                cluster,
                fixed_effects: fe.into(),
                dof: dof.into(),
                sample: Sample::Full,
            };
            cmd_regress(&input, &reg, output.as_ref())
        }
        Commands::EventStudy { input, outcome, controls, cluster, min, max, reference, alpha, fe, dof, output } => {
            let reg = RegressionConfig {
                outcome,
                treatment: "did".to_string(),
                controls,
                cluster,
                fixed_effects: fe.into(),
                dof: dof.into(),
                sample: Sample::Full,
            };
            let es = EventStudyConfig { window: EventWindow { min, max, reference }, alpha };
            cmd_event_study(&input, &reg, &es, output.as_ref())
        }
        Commands::Run { config, output } => cmd_run(&config, output.as_ref()),
        Commands::Simulate { out_dir, n_cities, n_years, effect, seed, output } => {
            let cfg = SimulationConfig { n_cities, n_years, effect, seed, ..SimulationConfig::default() };
            cmd_simulate(&out_dir, &cfg, output.as_ref())
        }
        Commands::Version => {
            println!("lcdid {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_table(path: &Path) -> Result<Table> {
    let table = read_table(path, &ReadOptions::default())?;
    info!(path = %path.display(), rows = table.n_rows(), cols = table.n_cols(), "loaded table");
    Ok(table)
}

fn meta_json(command: &str, inputs: &[&Path]) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(RunMeta::new(command, inputs)?)?)
}

fn cmd_merge(config: &Path, out: &Path, output: Option<&PathBuf>) -> Result<()> {
    let cfg = read_study_config(config)?;
    let (panel, load) = pipeline::load_panel(&cfg)?;
    write_panel(out, &panel)?;
    let mut inputs: Vec<&Path> = vec![config, cfg.panel.path.as_path()];
    inputs.extend(cfg.sources.iter().map(|s| s.path.as_path()));
    write_json(
        output,
        serde_json::json!({
            "meta": meta_json("merge", &inputs)?,
            "panel": out.display().to_string(),
            "load": load,
        }),
    )
}

fn cmd_assign_did(input: &Path, roster: &Path, out: &Path, output: Option<&PathBuf>) -> Result<()> {
    let mut panel = load_table(input)?;
    let r = read_roster(roster)?;
    let (assignment, summary) = pipeline::assign_did(&mut panel, &r)?;
    write_panel(out, &panel)?;
    write_json(
        output,
        serde_json::json!({
            "meta": meta_json("assign-did", &[input, roster])?,
            "panel": out.display().to_string(),
            "summary": summary,
            "conflicts": assignment.conflicts,
            "unmatched": assignment.unmatched,
        }),
    )
}

fn cmd_transform(input: &Path, config: &Path, out: &Path, output: Option<&PathBuf>) -> Result<()> {
    let cfg = read_study_config(config)?;
    let mut panel = load_table(input)?;
    let prep = pipeline::prepare(&mut panel, &cfg)?;
    write_panel(out, &panel)?;
    write_json(
        output,
        serde_json::json!({
            "meta": meta_json("transform", &[input, config])?,
            "panel": out.display().to_string(),
            "prepare": prep,
        }),
    )
}

fn cmd_diagnose(input: &Path, config: Option<&Path>, strict: bool, output: Option<&PathBuf>) -> Result<()> {
    let panel = load_table(input)?;
    let dcfg = match config {
        Some(p) => read_study_config(p)?.diagnostics,
        None => Default::default(),
    };
    let report = diagnose(&panel, &dcfg)?;
    write_json(output, serde_json::to_value(&report)?)?;
    if strict && !report.passed {
        let critical = report.warnings.iter().filter(|w| w.severity == "critical").count();
        bail!("diagnostics failed: {} critical warning(s)", critical);
    }
    Ok(())
}

fn cmd_describe(
    input: &Path,
    columns: &[String],
    by: Option<&str>,
    xlsx: Option<&Path>,
    output: Option<&PathBuf>,
) -> Result<()> {
    let panel = load_table(input)?;
    let rows = describe(&panel, columns)?;
    let groups = match by {
        Some(g) => describe_by(&panel, columns, g)?,
        None => Vec::new(),
    };
    if let Some(path) = xlsx {
        let all = to_table(&rows)?;
        let mut tables = vec![("all".to_string(), all)];
        for (label, r) in &groups {
            tables.push((format!("{}={}", by.unwrap_or(""), label), to_table(r)?));
        }
        let sheets: Vec<(&str, &Table)> = tables.iter().map(|(n, t)| (n.as_str(), t)).collect();
        write_xlsx(path, &sheets)?;
    }
    let by_group: serde_json::Map<String, serde_json::Value> = groups
        .into_iter()
        .map(|(label, r)| -> Result<(String, serde_json::Value)> { Ok((label, serde_json::to_value(r)?)) })
        .collect::<Result<_>>()?;
    write_json(
        output,
        serde_json::json!({
            "meta": meta_json("describe", &[input])?,
            "all": rows,
            "by": by,
            "groups": by_group,
        }),
    )
}

fn psm_json(out: &pipeline::PsmOutput) -> serde_json::Value {
    serde_json::json!({
        "n_pairs": out.result.pairs.len(),
        "n_treated": out.result.n_treated,
        "match_rate": out.result.match_rate,
        "n_dropped_missing": out.result.n_dropped_missing,
        "years": out.result.years,
        "balance": out.balance,
    })
}

fn cmd_psm(input: &Path, sec: &PsmSection, out: Option<&Path>, output: Option<&PathBuf>) -> Result<()> {
    let panel = load_table(input)?;
    let res = pipeline::run_psm(&panel, sec)?;
    if let Some(path) = out {
        write_panel(path, &res.matched)?;
    }
    write_json(
        output,
        serde_json::json!({
            "meta": meta_json("psm", &[input])?,
            "psm": psm_json(&res),
        }),
    )
}

fn cmd_regress(input: &Path, reg: &RegressionConfig, output: Option<&PathBuf>) -> Result<()> {
    let panel = load_table(input)?;
    let fit = pipeline::run_twfe(&panel, reg)?;
    write_json(
        output,
        serde_json::json!({
            "meta": meta_json("regress", &[input])?,
            "outcome": reg.outcome,
            "treatment": reg.treatment,
            "cluster": reg.cluster,
            "dof": reg.dof,
            "result": report::fit_json(&fit),
        }),
    )
}

fn cmd_event_study(
    input: &Path,
    reg: &RegressionConfig,
    es: &EventStudyConfig,
    output: Option<&PathBuf>,
) -> Result<()> {
    let panel = load_table(input)?;
    let fit = pipeline::run_event_study(&panel, reg, es)?;
    write_json(
        output,
        serde_json::json!({
            "meta": meta_json("event-study", &[input])?,
            "outcome": reg.outcome,
            "alpha": es.alpha,
            "dof": reg.dof,
            "result": report::event_json(&fit),
        }),
    )
}

fn cmd_run(config: &Path, output: Option<&PathBuf>) -> Result<()> {
    let cfg: StudyConfig = read_study_config(config)?;
    let out_dir = &cfg.output.dir;
    std::fs::create_dir_all(out_dir)?;

    let (mut panel, load) = pipeline::load_panel(&cfg)?;
    let mut doc = serde_json::Map::new();
    doc.insert("load".into(), serde_json::to_value(&load)?);

    let mut inputs: Vec<PathBuf> = vec![config.to_path_buf(), cfg.panel.path.clone()];
    inputs.extend(cfg.sources.iter().map(|s| s.path.clone()));
    if let Some(roster) = &cfg.roster {
        if let RosterSource::File { path } = roster {
            inputs.push(path.clone());
        }
        let (assignment, summary) = pipeline::assign_did(&mut panel, &roster.load()?)?;
        doc.insert(
            "did".into(),
            serde_json::json!({
                "summary": summary,
                "conflicts": assignment.conflicts,
                "unmatched": assignment.unmatched,
            }),
        );
    }

    let prep = pipeline::prepare(&mut panel, &cfg)?;
    doc.insert("prepare".into(), serde_json::to_value(&prep)?);

    let diagnostics = diagnose(&panel, &cfg.diagnostics)?;
    if !diagnostics.passed {
        warn!("diagnostics raised critical warnings; see report");
    }

    let mut sheets: Vec<(String, Table)> = Vec::new();
    if !cfg.describe.is_empty() {
        let rows = describe(&panel, &cfg.describe)?;
        sheets.push(("describe".into(), to_table(&rows)?));
        let mut groups = serde_json::Map::new();
        if panel.has("treat") {
            for (label, r) in describe_by(&panel, &cfg.describe, "treat")? {
                sheets.push((format!("describe_treat={}", label), to_table(&r)?));
                groups.insert(label, serde_json::to_value(r)?);
            }
        }
        doc.insert("describe".into(), serde_json::json!({ "all": rows, "by_treat": groups }));
    }

    let matched = match &cfg.psm {
        Some(sec) => {
            let res = pipeline::run_psm(&panel, sec)?;
            doc.insert("psm".into(), psm_json(&res));
            sheets.push(("psm_years".into(), report::psm_years_sheet(&res.result.years)?));
            sheets.push(("balance".into(), report::balance_sheet(&res.balance)?));
            Some(res.matched)
        }
        None => None,
    };

    if let Some(reg) = &cfg.regression {
        let mut models: Vec<(&str, TwfeFit)> = Vec::new();
        if matches!(reg.sample, Sample::Full | Sample::Both) {
            models.push(("full", pipeline::run_twfe(&panel, reg)?));
        }
        if matches!(reg.sample, Sample::Matched | Sample::Both) {
            match &matched {
                Some(m) => models.push(("matched", pipeline::run_twfe(m, reg)?)),
                None if reg.sample == Sample::Matched => bail!("regression.sample = matched needs a psm section"),
                None => warn!("no psm section; skipping the matched-sample regression"),
            }
        }
        let refs: Vec<(&str, &TwfeFit)> = models.iter().map(|(n, f)| (*n, f)).collect();
        sheets.push(("regression".into(), report::regression_table(&refs)?));
        let fits: serde_json::Map<String, serde_json::Value> =
            models.iter().map(|(n, f)| (n.to_string(), report::fit_json(f))).collect();
        doc.insert("regression".into(), serde_json::Value::Object(fits));

        if let Some(es) = &cfg.event_study {
            if panel.has("pilot_year") {
                let fit = pipeline::run_event_study(&panel, reg, es)?;
                sheets.push(("event_study".into(), report::event_sheet(&fit)?));
                doc.insert("event_study".into(), report::event_json(&fit));
            } else {
                warn!("event study needs pilot years; configure a roster");
            }
        }
    }

    sheets.push(("diagnostics".into(), report::warnings_sheet(&diagnostics.warnings)?));
    doc.insert("diagnostics".into(), serde_json::to_value(&diagnostics)?);

    let mut files = Vec::new();
    let results_path = out_dir.join("results.xlsx");
    let sheet_refs: Vec<(&str, &Table)> = sheets.iter().map(|(n, t)| (n.as_str(), t)).collect();
    write_xlsx(&results_path, &sheet_refs)?;
    files.push(results_path);

    let mut data_sheets: Vec<(&str, &Table)> = vec![("panel", &panel)];
    if let Some(m) = &matched {
        data_sheets.push(("matched", m));
    }
    let panel_path = out_dir.join("panel.xlsx");
    write_xlsx(&panel_path, &data_sheets)?;
    files.push(panel_path);
    if cfg.output.csv {
        for (name, t) in &data_sheets {
            let p = out_dir.join(format!("{}.csv", name));
            write_panel(&p, t)?;
            files.push(p);
        }
    }

    let input_refs: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
    doc.insert("meta".into(), meta_json("run", &input_refs)?);
    let report_path = out_dir.join("report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&serde_json::Value::Object(doc))?)?;
    files.push(report_path);
    info!(dir = %out_dir.display(), n_files = files.len(), "run complete");

    write_json(
        output,
        serde_json::json!({
            "out_dir": out_dir.display().to_string(),
            "files": files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            "diagnostics_passed": diagnostics.passed,
        }),
    )
}

fn cmd_simulate(out_dir: &Path, cfg: &SimulationConfig, output: Option<&PathBuf>) -> Result<()> {
    let sim = simulate_panel(cfg)?;
    std::fs::create_dir_all(out_dir)?;
    let panel_path = out_dir.join("panel.csv");
    let roster_path = out_dir.join("roster.yaml");
    write_panel(&panel_path, &sim.table)?;
    std::fs::write(&roster_path, serde_yaml_ng::to_string(&sim.roster)?)?;
    write_json(
        output,
        serde_json::json!({
            "panel": panel_path.display().to_string(),
            "roster": roster_path.display().to_string(),
            "n_rows": sim.table.n_rows(),
            "n_treated_cities": sim.pilot_year.len(),
            "true_effect": sim.effect,
            "config": cfg,
        }),
    )
}
