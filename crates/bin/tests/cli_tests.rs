use assert_cmd::Command;
use httpmock::{Method::GET, MockServer};
use predicates::prelude::*;
use std::path::Path;

fn secq(cache: &Path) -> Command {
    let mut cmd = Command::cargo_bin("secq").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--cache-path")
        .arg(cache)
        .args(["--delay-ms", "0"]);
    cmd
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("secq")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("stress"))
        .stdout(predicate::str::contains("warm"));
}

#[test]
fn fetch_prints_body_and_caches() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/files/company_tickers.json");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"0":{"cik_str":320193,"ticker":"AAPL","title":"Apple Inc."}}"#);
    });
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache.db");
    let url = server.url("/files/company_tickers.json");

    secq(&cache)
        .args(["fetch", &url, "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ticker\": \"AAPL\""))
        .stderr(predicate::str::contains("HTTP 200 (Network"));

    secq(&cache)
        .args(["fetch", &url])
        .assert()
        .success()
        .stderr(predicate::str::contains("HTTP 200 (Cache"));
    mock.assert_calls(1);

    secq(&cache)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:      1"));

    secq(&cache)
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 cached responses"));
}

#[test]
fn fetch_error_status_exits_nonzero() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing.json");
        then.status(404).body("Not Found");
    });
    let dir = tempfile::tempdir().unwrap();

    secq(&dir.path().join("cache.db"))
        .args(["fetch", &server.url("/missing.json")])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Not Found"))
        .stderr(predicate::str::contains("non-success response"))
        .stderr(predicate::str::contains("returned HTTP 404"));
}

#[test]
fn verbose_logs_cache_location() {
    let dir = tempfile::tempdir().unwrap();

    secq(&dir.path().join("cache.db"))
        .args(["-v", "stats"])
        .assert()
        .success()
        .stderr(predicate::str::contains("opening cache"));
}

#[test]
fn fetch_rejects_invalid_url() {
    let dir = tempfile::tempdir().unwrap();

    secq(&dir.path().join("cache.db"))
        .args(["fetch", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid URL"));
}

#[test]
fn warm_once_reports_refreshed_then_fresh() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/submissions/CIK0001067983.json");
        then.status(200).body("{}");
    });
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache.db");
    let url = server.url("/submissions/CIK0001067983.json");

    secq(&cache)
        .args(["warm", "--once", &url])
        .assert()
        .success()
        .stdout(predicate::str::contains("refreshed: 1"));

    secq(&cache)
        .args(["warm", "--once", &url])
        .assert()
        .success()
        .stdout(predicate::str::contains("fresh: 1"));
    mock.assert_calls(1);
}

#[test]
fn stress_reports_totals() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/xbrl/companyfacts/CIK0000320193.json");
        then.status(200).body("{}");
    });
    let dir = tempfile::tempdir().unwrap();

    secq(&dir.path().join("cache.db"))
        .args([
            "stress",
            &server.url("/api/xbrl/companyfacts/CIK0000320193.json"),
            "--requests",
            "6",
            "--parallelism",
            "3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("6 requests"))
        .stdout(predicate::str::contains("ok: 6"));
}
