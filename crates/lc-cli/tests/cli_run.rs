use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_lcdid"))
}

fn repo_root() -> PathBuf {
    // crates/lc-cli -> repo root
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..").canonicalize().unwrap()
}

fn fixture_path(name: &str) -> PathBuf {
    repo_root().join("tests/fixtures").join(name)
}

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("lcdid_run_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn s(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn read_json(path: &Path) -> serde_json::Value {
    let bytes = std::fs::read(path).unwrap_or_else(|e| panic!("missing {}: {}", path.display(), e));
    serde_json::from_slice(&bytes).unwrap()
}

fn assert_success(out: &Output, what: &str) {
    assert!(out.status.success(), "{} should succeed, stderr={}", what, String::from_utf8_lossy(&out.stderr));
}

/// Study config over the fixtures; `pgdp_position` is the documented column
/// position of `pgdp` in the panel file.
fn study_yaml(pgdp_position: usize, extra: &str) -> String {
    format!(
        r#"panel:
  path: "{panel}"
  columns:
    - {{ source: city_name, kind: text, position: 0 }}
    - {{ source: city_code, position: 1 }}
    - {{ source: year, position: 2 }}
    - {{ source: pgdp, position: {pgdp_position} }}
    - {{ source: ln_carbon_intensity, position: 4 }}
sources:
  - name: population
    path: "{population}"
    columns:
      - {{ source: 地区, target: city_name, kind: text }}
      - {{ source: 年份, target: year }}
      - {{ source: 人口密度, target: pop_density }}
{extra}"#,
        panel = s(&fixture_path("panel_small.csv")),
        population = s(&fixture_path("population.csv")),
    )
}

fn write_config(name: &str, yaml: &str) -> PathBuf {
    let p = tmp_path(name);
    std::fs::write(&p, yaml).unwrap();
    p
}

#[test]
fn merge_normalises_names_and_reports_unmatched() {
    let cfg = write_config("merge.yaml", &study_yaml(3, ""));
    let panel = tmp_path("merged.csv");
    let json = tmp_path("merge.json");
    let out = run(&["merge", "--config", &s(&cfg), "--out", &s(&panel), "--output", &s(&json)]);
    assert_success(&out, "merge");

    let v = read_json(&json);
    let load = &v["load"];
    assert_eq!(load["n_rows"], 30);
    assert_eq!(load["n_cities"], 6);
    assert_eq!(load["n_renamed"], 2);
    let m = &load["merges"][0];
    assert_eq!(m["source"], "population");
    assert_eq!(m["n_matched_rows"], 25);
    assert_eq!(m["n_unmatched_rows"], 5);
    assert_eq!(m["unmatched_left"], serde_json::json!(["成都市"]));
    assert_eq!(m["unmatched_right"], serde_json::json!(["天津市"]));
    assert_eq!(m["added_columns"], serde_json::json!(["pop_density"]));

    let text = std::fs::read_to_string(&panel).unwrap();
    assert!(text.lines().next().unwrap().ends_with(",pop_density"));
    assert!(text.contains("襄阳市,420600,2008"));
    assert!(text.contains("保定市,130600,2008"));
    assert!(!text.contains("襄樊"));
}

#[test]
fn merge_rejects_misplaced_column() {
    let cfg = write_config("misplaced.yaml", &study_yaml(4, ""));
    let out = run(&["merge", "--config", &s(&cfg), "--out", &s(&tmp_path("never.csv"))]);
    assert!(!out.status.success(), "a misplaced column must fail the load");
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("expected at position"), "stderr={}", stderr);
}

#[test]
fn run_writes_report_and_workbooks() {
    let out_dir = tmp_path("out");
    let extra = format!(
        r#"roster:
  path: "{roster}"
derive:
  - {{ op: log, source: pgdp }}
describe: [ln_carbon_intensity, ln_pgdp]
diagnostics:
  log_sources: [pgdp]
regression:
  outcome: ln_carbon_intensity
  controls: [ln_pgdp]
  sample: full
output:
  dir: "{dir}"
  csv: true
"#,
        roster = s(&fixture_path("roster.yaml")),
        dir = s(&out_dir),
    );
    let cfg = write_config("study.yaml", &study_yaml(3, &extra));
    let summary = tmp_path("summary.json");
    let out = run(&["run", "--config", &s(&cfg), "--output", &s(&summary)]);
    assert_success(&out, "run");

    let sv = read_json(&summary);
    assert_eq!(sv["files"].as_array().unwrap().len(), 4);
    for f in ["results.xlsx", "panel.xlsx", "panel.csv", "report.json"] {
        assert!(out_dir.join(f).is_file(), "missing {}", f);
    }

    let v = read_json(&out_dir.join("report.json"));
    assert_eq!(v["did"]["summary"]["n_treated_cities"], 5);
    assert_eq!(v["prepare"]["derived"], serde_json::json!(["ln_pgdp"]));
    assert_eq!(v["describe"]["all"].as_array().unwrap().len(), 2);
    let est = v["regression"]["full"]["summary"]["estimates"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["name"] == "did")
        .unwrap()
        .clone();
    approx::assert_abs_diff_eq!(est["coef"].as_f64().unwrap(), -0.1120617443423817, epsilon = 1e-8);
    assert!(v["regression"].get("matched").is_none());
    assert_eq!(v["meta"]["command"], "run");
    assert_eq!(v["meta"]["inputs"].as_array().unwrap().len(), 4);
    assert!(v["diagnostics"]["warnings"].is_array());
}

#[test]
fn simulate_then_match_and_event_study() {
    let dir = tmp_path("sim");
    let sim_json = tmp_path("sim.json");
    let out = run(&[
        "simulate",
        "--out-dir",
        &s(&dir),
        "--n-cities",
        "50",
        "--seed",
        "7",
        "--output",
        &s(&sim_json),
    ]);
    assert_success(&out, "simulate");
    let sim = read_json(&sim_json);
    assert_eq!(sim["n_rows"], 50 * 13);
    assert!(sim["n_treated_cities"].as_u64().unwrap() > 0);

    let panel = dir.join("did.csv");
    let out = run(&[
        "assign-did",
        "--input",
        &s(&dir.join("panel.csv")),
        "--roster",
        &s(&dir.join("roster.yaml")),
        "--out",
        &s(&panel),
        "--output",
        &s(&tmp_path("assign.json")),
    ]);
    assert_success(&out, "assign-did");

    let psm_json = tmp_path("psm.json");
    let matched = dir.join("matched.csv");
    let out = run(&[
        "psm",
        "--input",
        &s(&panel),
        "--covariates",
        "secondary_share,pop_density",
        "--caliper",
        "0.1",
        "--out",
        &s(&matched),
        "--output",
        &s(&psm_json),
    ]);
    assert_success(&out, "psm");
    let v = read_json(&psm_json);
    let psm = &v["psm"];
    assert_eq!(psm["years"].as_array().unwrap().len(), 13);
    assert_eq!(psm["balance"].as_array().unwrap().len(), 2);
    let n_pairs = psm["n_pairs"].as_u64().unwrap() as usize;
    let rate = psm["match_rate"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&rate));
    let matched_rows = std::fs::read_to_string(&matched).unwrap().lines().count() - 1;
    assert_eq!(matched_rows, 2 * n_pairs);

    let es_json = tmp_path("es.json");
    let out = run(&[
        "event-study",
        "--input",
        &s(&panel),
        "--outcome",
        "carbon_intensity",
        "--min",
        "-4",
        "--max",
        "4",
        "--output",
        &s(&es_json),
    ]);
    assert_success(&out, "event-study");
    let v = read_json(&es_json);
    let terms = v["result"]["terms"].as_array().unwrap();
    assert!(!terms.is_empty());
    assert!(terms.iter().all(|t| t["relative_year"] != -1));
    assert!(terms.iter().all(|t| (-4..=4).contains(&t["relative_year"].as_i64().unwrap())));
    assert_eq!(v["result"]["window"]["reference"], -1);
    assert_eq!(v["dof"], "clusters");

    let residual_json = tmp_path("es_residual.json");
    let out = run(&[
        "event-study",
        "--input",
        &s(&panel),
        "--outcome",
        "carbon_intensity",
        "--min",
        "-4",
        "--max",
        "4",
        "--dof",
        "residual",
        "--output",
        &s(&residual_json),
    ]);
    assert_success(&out, "event-study --dof residual");
    let r = read_json(&residual_json);
    assert_eq!(r["dof"], "residual");
    let r_terms = r["result"]["terms"].as_array().unwrap();
    assert_eq!(r_terms.len(), terms.len());
    for (c, t) in terms.iter().zip(r_terms) {
        let (se_c, se_r) = (c["estimate"]["std_error"].as_f64().unwrap(), t["estimate"]["std_error"].as_f64().unwrap());
        approx::assert_relative_eq!(se_c, se_r, epsilon = 1e-12);
        // n − k exceeds G − 1 here, so the residual policy gives tighter intervals.
        assert!(t["ci_upper"].as_f64().unwrap() - t["ci_lower"].as_f64().unwrap()
            < c["ci_upper"].as_f64().unwrap() - c["ci_lower"].as_f64().unwrap());
    }
}
