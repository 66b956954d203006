//! Integration tests for the titrate binary.
//!
//! These tests verify end-to-end behavior including:
//! - Protocol calculations and critical-value confirmation
//! - Monitoring flags raised from recorded readings
//! - Trend output and CSV export
//! - History and preferences persistence

use assert_cmd::Command;
use chrono::{Duration, Utc};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the CLI binary, isolated from the user's config
fn cli(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("titrate"));
    cmd.env("XDG_CONFIG_HOME", dir.join("config"))
        .arg("--data-dir")
        .arg(dir.join("data"));
    cmd
}

fn read_json(dir: &Path, key: &str) -> serde_json::Value {
    let path = dir.join("data").join(format!("{}.json", key));
    let contents = fs::read_to_string(&path).expect("Failed to read stored value");
    serde_json::from_str(&contents).expect("Stored value is not JSON")
}

#[test]
fn test_cli_help() {
    Command::new(assert_cmd::cargo::cargo_bin!("titrate"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Infusion titration decision support"));
}

#[test]
fn test_heparin_therapeutic_logged_to_history() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["heparin", "--aptt", "80"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[THERAPEUTIC] Heparin Protocol"))
        .stdout(predicate::str::contains("No Dose Change"))
        .stdout(predicate::str::contains("Next check: 6 hrs or next morning"));

    let history = read_json(temp_dir.path(), "calculation_history");
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["protocol"], "Heparin Protocol");
    assert_eq!(entries[0]["inputs"], "aPTT: 80");
    assert_eq!(entries[0]["isCritical"], false);
}

#[test]
fn test_critical_value_declined_records_nothing() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["heparin", "--aptt", "250"])
        .write_stdin("n\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Proceed? [y/N]"))
        .stdout(predicate::str::contains("Calculation cancelled"));

    assert!(!temp_dir.path().join("data/calculation_history.json").exists());
}

#[test]
fn test_critical_value_confirmed() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["heparin", "--aptt", "250"])
        .write_stdin("y\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("[CRITICAL]"))
        .stdout(predicate::str::contains("PAGE MD"));

    let history = read_json(temp_dir.path(), "calculation_history");
    assert_eq!(history[0]["isCritical"], true);
}

#[test]
fn test_yes_flag_skips_prompt() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["--yes", "heparin", "--aptt", "20"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Proceed?").not())
        .stdout(predicate::str::contains("Bolus: 80 units/kg"));
}

#[test]
fn test_invalid_input_reported() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["heparin", "--aptt", "-5"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Please enter a valid aPTT value."));
}

#[test]
fn test_insulin_adjust_decrease() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["insulin-adjust", "--rate", "10", "--bg", "120", "--previous-bg", "90"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Decrease rate by 1"))
        .stdout(predicate::str::contains("New rate: 9.0 units/hr"));

    let monitoring = read_json(temp_dir.path(), "monitoringData");
    assert_eq!(monitoring["nonDka"]["bgReadings"][0]["value"], 120.0);
    assert_eq!(monitoring["nonDka"]["infusionRates"][0]["value"], 9.0);
}

#[test]
fn test_insulin_hold_t1dm() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["insulin-adjust", "--rate", "5", "--bg", "75", "--t1dm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[CRITICAL]"))
        .stdout(predicate::str::contains("D5W at 50 cc/hr"));
}

#[test]
fn test_insulin_domain_gap_reported() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["insulin-adjust", "--rate", "5", "--bg", "275"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("outside defined protocol range"));
}

#[test]
fn test_dka_bolus_capped() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["dka", "bolus", "--weight", "150"])
        .assert()
        .success()
        .stdout(predicate::str::contains("10.0 units IV"));
}

#[test]
fn test_dka_bolus_in_pounds() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["dka", "bolus", "--weight", "110", "--lbs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5.0 units IV"));
}

#[test]
fn test_dry_run_does_not_record() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["--dry-run", "dka", "initiation", "--weight", "70"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Start infusion at 7.0 units/hr."))
        .stdout(predicate::str::contains("[Dry run - not recorded]"));

    assert!(!temp_dir.path().join("data/monitoringData.json").exists());
    assert!(!temp_dir.path().join("data/calculation_history.json").exists());
}

#[test]
fn test_high_bg_flag_with_cooldown() {
    let temp_dir = setup_test_dir();
    let start = Utc::now() - Duration::hours(2);
    let record = |minutes: i64, value: &str| {
        let at = (start + Duration::minutes(minutes)).to_rfc3339();
        cli(temp_dir.path())
            .args(["record", "--family", "dka-hhs", "--kind", "glucose", "--value", value])
            .args(["--at", at.as_str()])
            .assert()
            .success()
    };

    record(0, "300").stdout(predicate::str::contains("FLAG").not());
    record(30, "310").stdout(predicate::str::contains(
        "Blood glucose > 250 mg/dL for 2+ consecutive hours. Notify Provider.",
    ));
    record(70, "320").stdout(predicate::str::contains("FLAG").not());
    record(80, "330").stdout(predicate::str::contains("FLAG").not());

    let monitoring = read_json(temp_dir.path(), "monitoringData");
    let flags = monitoring["activeFlags"].as_array().unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0]["type"], "dka-bg-high");
    let id = flags[0]["id"].as_str().unwrap().to_string();

    cli(temp_dir.path())
        .arg("flags")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()));

    cli(temp_dir.path())
        .args(["ack", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Flag acknowledged"));

    cli(temp_dir.path())
        .arg("flags")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active flags"));

    cli(temp_dir.path())
        .args(["flags", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(acknowledged)"));

    cli(temp_dir.path())
        .args(["clear-flag", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Flag cleared"));

    // Clearing again is a no-op
    cli(temp_dir.path())
        .args(["clear-flag", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No flag with id"));
}

#[test]
fn test_trend_status_and_clear_data() {
    let temp_dir = setup_test_dir();
    let at = (Utc::now() - Duration::minutes(30)).to_rfc3339();

    cli(temp_dir.path())
        .args(["record", "--family", "dka-hhs", "--kind", "glucose", "--value", "220", "--at", at.as_str()])
        .assert()
        .success();
    cli(temp_dir.path())
        .args(["record", "--family", "dka-hhs", "--kind", "rate", "--value", "6", "--at", at.as_str()])
        .assert()
        .success();

    cli(temp_dir.path())
        .args(["trend", "--family", "dka-hhs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("220"))
        .stdout(predicate::str::contains("6.0"));

    let csv_path = temp_dir.path().join("trend.csv");
    cli(temp_dir.path())
        .args(["trend", "--family", "dka-hhs", "--csv"])
        .arg(&csv_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 points"));
    let csv = fs::read_to_string(&csv_path).unwrap();
    assert!(csv.starts_with("timestamp,bg,rate\n"));
    assert!(csv.contains(",220.0,6.0"));

    cli(temp_dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total readings: 2"));

    cli(temp_dir.path())
        .args(["clear-data", "--scope", "rates"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 readings"));

    cli(temp_dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total readings: 1"));
}

#[test]
fn test_history_listing_and_clear() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No calculations yet"));

    cli(temp_dir.path())
        .args(["dka", "phase2", "--rate", "5", "--bg", "180"])
        .assert()
        .success();

    cli(temp_dir.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("DKA Phase 2"))
        .stdout(predicate::str::contains("Input:"));

    cli(temp_dir.path())
        .args(["history", "--clear"])
        .assert()
        .success();

    cli(temp_dir.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No calculations yet"));
}

#[test]
fn test_preferences_persist_and_hide_disclaimer() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["heparin", "--aptt", "80"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Clinical decision support only"));

    cli(temp_dir.path())
        .args(["prefs", "--dark-mode", "true", "--accept-disclaimer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dark_mode = true"))
        .stdout(predicate::str::contains("disclaimer_accepted = true"));

    let prefs = read_json(temp_dir.path(), "preferences");
    assert_eq!(prefs["dark_mode"], true);

    cli(temp_dir.path())
        .args(["heparin", "--aptt", "80"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Clinical decision support only").not());
}

#[test]
fn test_trend_with_huge_lookback() {
    let temp_dir = setup_test_dir();
    let at = (Utc::now() - Duration::minutes(10)).to_rfc3339();

    cli(temp_dir.path())
        .args(["record", "--family", "dka-hhs", "--kind", "glucose", "--value", "180", "--at", at.as_str()])
        .assert()
        .success();

    cli(temp_dir.path())
        .args(["trend", "--family", "dka-hhs", "--hours", "3000000000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("180"));
}

#[test]
fn test_future_reading_rejected() {
    let temp_dir = setup_test_dir();
    let start = Utc::now() - Duration::hours(1);
    for minutes in [0, 30] {
        let at = (start + Duration::minutes(minutes)).to_rfc3339();
        cli(temp_dir.path())
            .args(["record", "--family", "dka-hhs", "--kind", "glucose", "--value", "200", "--at", at.as_str()])
            .assert()
            .success();
    }

    let future = (Utc::now() + Duration::days(365)).to_rfc3339();
    cli(temp_dir.path())
        .args(["record", "--family", "dka-hhs", "--kind", "glucose", "--value", "200", "--at", future.as_str()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("is in the future"));

    cli(temp_dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total readings: 2"));
}

#[test]
fn test_negative_previous_bg_counts_as_absent() {
    let temp_dir = setup_test_dir();

    cli(temp_dir.path())
        .args(["insulin-adjust", "--rate", "5", "--bg", "275", "--previous-bg", "-5"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("outside defined protocol range"));
}
