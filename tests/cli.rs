use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn home_path(home: &TempDir) -> &Path {
    home.path()
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_carbonsight")
}

fn run_cmd_with_env(home: &TempDir, args: &[&str], envs: &[(&str, &str)]) -> Output {
    Command::new(bin_path())
        .args(args)
        .env("CARBONSIGHT_HOME", home_path(home))
        .env_remove("RUST_LOG")
        .envs(envs.iter().copied())
        .output()
        .expect("run carbonsight command")
}

fn run_cmd(home: &TempDir, args: &[&str]) -> Output {
    run_cmd_with_env(home, args, &[])
}

fn db_path(home: &TempDir) -> PathBuf {
    home.path().join("data").join("carbonsight.sqlite")
}

fn seed_request(home: &TempDir, request_id: &str, team: &str, model: &str, energy_wh: f64, co2: f64) {
    let conn = Connection::open(db_path(home)).expect("open sqlite");
    conn.execute(
        "INSERT INTO ai_requests (
            request_id, user_id, team_id, model_used, tokens_input, tokens_output,
            energy_wh, co2e_g, cost_usd, latency_ms, prompt_complexity, failed, created_at
         ) VALUES (?1, 'u-1', ?2, ?3, 100, 200, ?4, ?5, 0.001, 450, 0.1, 0, ?6)",
        rusqlite::params![request_id, team, model, energy_wh, co2, Utc::now().to_rfc3339()],
    )
    .expect("insert request row");
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json output")
}

#[test]
fn init_creates_config_and_data_paths() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["init"]);
    assert!(output.status.success());

    assert!(home.path().join("config").exists());
    assert!(home.path().join("data").exists());
    assert!(home.path().join("config").join("config.toml").exists());
    assert!(db_path(&home).exists());
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("temp home");

    assert!(run_cmd(&home, &["init"]).status.success());
    let first = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config after first init");

    assert!(run_cmd(&home, &["init"]).status.success());
    let second = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config after second init");

    assert_eq!(first, second);
}

#[test]
fn team_rejects_invalid_window() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());

    let output = run_cmd(&home, &["team", "platform", "--window", "2d"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported window. Use 1d, 7d, or 30d"));
}

#[test]
fn team_dashboard_aggregates_seeded_rows() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());
    assert!(run_cmd(&home, &["add-team", "platform", "--name", "Platform", "--members", "2"])
        .status
        .success());
    seed_request(&home, "r1", "platform", "gemini-1.5-flash", 100.0, 50.0);
    seed_request(&home, "r2", "platform", "gemini-1.5-flash", 200.0, 150.0);

    let output = run_cmd(&home, &["team", "platform", "--window", "1d"]);
    assert!(output.status.success());
    let dash = stdout_json(&output);
    let summary = &dash["summary"];
    assert_eq!(summary["team_name"], "Platform");
    assert_eq!(summary["member_count"], 2);
    assert_eq!(summary["request_count"], 2);
    assert!((summary["total_energy_kwh"].as_f64().expect("kwh") - 0.3).abs() < 1e-9);
    assert!((summary["total_co2_grams"].as_f64().expect("co2") - 200.0).abs() < 1e-9);
    assert_eq!(summary["rank"], 1);
    assert_eq!(dash["team_leaderboard"][0]["badge"], "Gold");
}

#[test]
fn leaderboard_on_empty_store_reports_insufficient_data() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());

    let output = run_cmd(&home, &["leaderboard", "teams"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["status"], "insufficient_data");
}

#[test]
fn forecast_with_one_day_reports_insufficient_data() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());
    seed_request(&home, "r1", "platform", "gpt-4o", 10.0, 5.0);

    let output = run_cmd(&home, &["forecast", "platform", "--days", "1"]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["status"], "insufficient_data");

    let output = run_cmd(&home, &["forecast", "platform", "--days", "5", "--horizon", "2"]);
    assert!(output.status.success());
    let parsed = stdout_json(&output);
    assert_eq!(parsed["history"].as_array().map(Vec::len), Some(5));
    assert_eq!(
        parsed["forecast"]["projected_values"].as_array().map(Vec::len),
        Some(2)
    );
}

#[test]
fn demo_leaderboard_needs_no_database() {
    let home = TempDir::new().expect("temp home");

    let output = run_cmd(&home, &["leaderboard", "models", "--demo"]);
    assert!(output.status.success());
    let parsed = stdout_json(&output);
    let arr = parsed.as_array().expect("json array");
    assert!(!arr.is_empty());
    assert_eq!(arr[0]["rank"], 1);
    assert!(!db_path(&home).exists());
}

#[test]
fn export_csv_outputs_header_and_escaped_fields() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());
    seed_request(&home, "r1", "open,ai", "gpt\"4o", 1.0, 0.5);

    let output = run_cmd(&home, &["export", "--format", "csv"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(
        "request_id,user_id,team_id,model_used,tokens_input,tokens_output,energy_wh,co2e_g,cost_usd,latency_ms,failed,created_at"
    ));
    assert!(stdout.contains("\"open,ai\",\"gpt\"\"4o\""));
}

#[test]
fn export_json_outputs_valid_array() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());
    seed_request(&home, "r1", "platform", "gpt-4o", 2.5, 1.2);

    let output = run_cmd(&home, &["export", "--format", "json"]);
    assert!(output.status.success());

    let parsed = stdout_json(&output);
    let arr = parsed.as_array().expect("json array");
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["team_id"], "platform");
    assert_eq!(arr[0]["model_used"], "gpt-4o");
    assert_eq!(arr[0]["input_tokens"], 100);
}

#[test]
fn export_rejects_unknown_format() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());

    let output = run_cmd(&home, &["export", "--format", "xml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unsupported export format"));
}

#[test]
fn environment_overrides_config_file() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());

    let output = run_cmd_with_env(
        &home,
        &["show-config"],
        &[("CARBONSIGHT_BUFFER_CAPACITY", "50")],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("buffer_capacity = 50"));

    let on_disk = fs::read_to_string(home.path().join("config").join("config.toml"))
        .expect("read config");
    assert!(on_disk.contains("buffer_capacity = 1000"));
}

#[test]
fn forecast_rejects_out_of_range_days_and_horizon() {
    let home = TempDir::new().expect("temp home");

    for args in [
        ["forecast", "platform", "--days", "200000000"],
        ["forecast", "platform", "--days", "366"],
        ["forecast", "platform", "--horizon", "366"],
    ] {
        let output = run_cmd(&home, &args);
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("invalid value"));
    }

    let output = run_cmd(&home, &["forecast", "research", "--demo", "--days", "365", "--horizon", "365"]);
    assert!(output.status.success());
    let parsed = stdout_json(&output);
    assert_eq!(parsed["history"].as_array().map(Vec::len), Some(365));
}
