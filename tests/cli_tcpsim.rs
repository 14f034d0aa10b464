use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "tcpsim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn run_tcpsim(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tcpsim"))
        .args(args)
        .output()
        .expect("run tcpsim")
}

#[test]
fn prints_banner_metric_rows_and_utilization() {
    let output = run_tcpsim(&["Tahoe", "10", "0.0", "--seed", "7"]);
    assert!(
        output.status.success(),
        "tcpsim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Running TCP Tahoe sender"));
    assert!(stdout.contains("Time\tCongWindow\tEffctWindow\tFlightSize\tSSThresh\tRTOinterval"));
    assert!(stdout.contains("E N D   O F   S E S S I O N"));
    assert!(stdout.contains("Sender utilization:"));

    // One metric row per round, starting at round 1 with one MSS.
    let first_row = stdout
        .lines()
        .find(|l| l.starts_with("1\t"))
        .expect("metric row for the first round");
    assert!(first_row.contains("128"));
}

#[test]
fn rejects_an_unknown_tcp_variant() {
    let output = run_tcpsim(&["Vegas", "10", "0.0"]);
    assert!(!output.status.success(), "expected non-zero exit");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("unknown TCP sender variant"),
        "stderr did not contain the diagnostic: {stderr}"
    );
}

#[test]
fn rejects_missing_arguments() {
    let output = run_tcpsim(&["Reno"]);
    assert!(!output.status.success(), "expected non-zero exit");
}

#[test]
fn rejects_a_loss_rate_outside_the_unit_interval() {
    let output = run_tcpsim(&["Reno", "10", "1.5"]);
    assert!(!output.status.success(), "expected non-zero exit");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("loss rate"));
}

#[test]
fn writes_tick_metrics_as_json() {
    let dir = unique_temp_dir("metrics");
    let out_json = dir.join("metrics.json");

    let output = run_tcpsim(&[
        "NewReno",
        "10",
        "0.0",
        "--seed",
        "7",
        "--metrics-json",
        out_json.to_str().expect("utf-8 path"),
    ]);
    assert!(
        output.status.success(),
        "tcpsim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let raw = fs::read_to_string(&out_json).expect("read metrics.json");
    let v: Value = serde_json::from_str(&raw).expect("parse metrics.json");
    let rows = v.as_array().expect("metrics.json must be a JSON array");
    assert!(!rows.is_empty());
    assert_eq!(
        rows[0].get("cong_window").and_then(|c| c.as_i64()),
        Some(128),
        "the first round starts with one MSS of congestion window"
    );

    let _ = fs::remove_dir_all(&dir);
}
