mod common;

use assert_cmd::Command;
use common::{TestWorkspace, ads_schema};
use predicates::str::contains;

fn workspace_with_snapshot() -> (TestWorkspace, std::path::PathBuf) {
    let workspace = TestWorkspace::new();
    let snapshot = workspace.path().join("meta_ads_metrics.yaml");
    ads_schema().save(&snapshot).expect("write snapshot");
    (workspace, snapshot)
}

fn pg_upserter() -> Command {
    Command::cargo_bin("pg-upserter").expect("binary exists")
}

#[test]
fn match_against_snapshot_prints_report() {
    let (workspace, snapshot) = workspace_with_snapshot();
    let input = workspace.write(
        "ads.csv",
        "account_id,campaign_id,spend,id,notes\n123,456,10.5,1,hello\n789,,3,2,\n",
    );

    pg_upserter()
        .args([
            "match",
            "-i",
            input.to_str().unwrap(),
            "--schema-file",
            snapshot.to_str().unwrap(),
            "--ignore",
            "NOTES",
        ])
        .assert()
        .success()
        .stdout(contains("account_id   matched"))
        .stdout(contains("notes        ignored"))
        .stdout(contains("id           missing"));
}

#[test]
fn match_json_output_for_heterogeneous_ndjson() {
    let (workspace, snapshot) = workspace_with_snapshot();
    let input = workspace.write(
        "ads.ndjson",
        "{\"account_id\": \"123\", \"campaign_id\": \"456\", \"spend\": 10.5}\n{\"account_id\": \"789\", \"impressions\": 1000}\n",
    );

    let output = pg_upserter()
        .args([
            "match",
            "-i",
            input.to_str().unwrap(),
            "--schema-file",
            snapshot.to_str().unwrap(),
            "--json",
        ])
        .output()
        .expect("run match");
    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(
        report["matched_columns"],
        serde_json::json!(["account_id", "campaign_id", "impressions", "spend"])
    );
    assert_eq!(report["missing_columns"], serde_json::json!([]));
}

#[test]
fn match_reads_tab_separated_input_with_explicit_format() {
    let (workspace, snapshot) = workspace_with_snapshot();
    let input = workspace.write("ads.txt", "account_id\tspend\n1\t2\n");

    pg_upserter()
        .args([
            "match",
            "-i",
            input.to_str().unwrap(),
            "--schema-file",
            snapshot.to_str().unwrap(),
            "--format",
            "csv",
            "--delimiter",
            "tab",
        ])
        .assert()
        .success()
        .stdout(contains("spend       matched"));
}

#[test]
fn match_reports_unreadable_snapshot() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ads.csv", "a\n1\n");
    let missing = workspace.path().join("missing.yaml");

    pg_upserter()
        .args([
            "match",
            "-i",
            input.to_str().unwrap(),
            "--schema-file",
            missing.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("missing.yaml"));
}

#[test]
fn load_requires_connection_settings() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ads.csv", "account_id\n1\n");

    pg_upserter()
        .args(["load", "-i", input.to_str().unwrap(), "--table", "meta_ads_metrics"])
        .assert()
        .failure()
        .stderr(contains("--user and --dbname are required"));
}

#[test]
fn inspect_rejects_qualified_table_names() {
    pg_upserter()
        .args([
            "inspect",
            "--table",
            "public.meta_ads_metrics",
            "--user",
            "loader",
            "--dbname",
            "ads",
        ])
        .assert()
        .failure()
        .stderr(contains("not a plain identifier"));
}

#[test]
fn config_file_supplies_table_and_connection() {
    let workspace = TestWorkspace::new();
    let config = workspace.write(
        "load.yaml",
        "table: \"bad-name\"\nconnection:\n  user: loader\n  dbname: ads\n",
    );

    pg_upserter()
        .args(["inspect", "--config", config.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("'bad-name' is not a plain identifier"));
}
