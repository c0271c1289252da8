use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/catalog.json")
}

fn sfsearch() -> Command {
    let mut cmd = Command::cargo_bin("sfsearch").unwrap();
    cmd.env_remove("SFSEARCH_CATALOG")
        .env_remove("STOREFRONT_SEARCH_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--catalog")
        .arg(fixture());
    cmd
}

#[test]
fn search_tolerates_typos() {
    sfsearch()
        .args(["search", "lapotp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Gaming Laptop"))
        .stdout(predicate::str::contains("3 results"));
}

#[test]
fn search_json_output() {
    let output = sfsearch()
        .args(["--json", "search", "laptop", "--page-size", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total_pages"], 3);
    assert_eq!(body["pagination"]["has_next"], true);
}

#[test]
fn search_with_filters() {
    let output = sfsearch()
        .args([
            "--json",
            "search",
            "laptop",
            "--category",
            "electronics",
            "--availability",
            "in_stock",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["results"][0]["id"], "p1");
    assert_eq!(body["pagination"]["total_results"], 1);
}

#[test]
fn no_match_is_success() {
    sfsearch()
        .args(["search", "nonexistentproductxyz"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No products matched"));
}

#[test]
fn empty_query_is_invalid_input() {
    sfsearch()
        .args(["search", "  "])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid query"));
}

#[test]
fn inverted_price_range_is_invalid_input() {
    sfsearch()
        .args(["search", "laptop", "--min-price", "100", "--max-price", "10"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid filter"));
}

#[test]
fn unknown_sort_is_invalid_input() {
    sfsearch()
        .args(["search", "laptop", "--sort", "cheapest"])
        .assert()
        .code(2);
}

#[test]
fn missing_catalog_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("sfsearch")
        .unwrap()
        .env_remove("STOREFRONT_SEARCH_CONFIG")
        .arg("--catalog")
        .arg(dir.path().join("absent.json"))
        .args(["search", "laptop"])
        .assert()
        .code(4);
}

#[test]
fn invalid_config_is_config_error() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[cache]\nttl_secs = 0").unwrap();
    sfsearch()
        .arg("--config")
        .arg(config.path())
        .args(["search", "laptop"])
        .assert()
        .code(3);
}

#[test]
fn suggest_replays_history() {
    let mut history = tempfile::NamedTempFile::new().unwrap();
    writeln!(history, "laptop\nlaptop sleeve\nlaptop\ncoffee mug").unwrap();
    let output = sfsearch()
        .args(["--json", "suggest", "lap", "--history"])
        .arg(history.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let queries: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["query"].as_str().unwrap())
        .collect();
    assert_eq!(queries, vec!["laptop", "laptop sleeve"]);
}

#[test]
fn filters_unknown_category_is_invalid_input() {
    sfsearch()
        .args(["filters", "--category", "garden"])
        .assert()
        .code(2);
}

#[test]
fn filters_lists_categories() {
    sfsearch()
        .args(["filters"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Electronics"))
        .stdout(predicate::str::contains("7 products"));
}

#[test]
fn stats_reports_index() {
    let output = sfsearch().args(["--json", "stats"]).output().unwrap();
    assert!(output.status.success());
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["engine"]["indexed_products"], 7);
    assert_eq!(body["engine"]["index_generation"], 1);
    assert!(body["metrics"]["histograms"]["index.build_ms"].is_object());
}
