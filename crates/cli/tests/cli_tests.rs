//! CLI integration tests
use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARTICLE: &str = r#"<!DOCTYPE html>
<html lang="en"><head><title>Tide tables</title>
<meta property="og:title" content="Reading tide tables">
</head><body>
<nav><a href="/">Home</a> <a href="/about">About</a></nav>
<article>
  <h1>Reading tide tables</h1>
  <p>Tide tables list the times of high and low water, and the height of each, for a given harbour and date.</p>
  <p>Heights are given relative to chart datum, which is usually the lowest astronomical tide, so values are positive.</p>
  <p>Between two tides, the water rises or falls by roughly a twelfth, two twelfths, and three twelfths per hour.</p>
</article>
<footer>Copyright</footer>
</body></html>"#;

fn cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("scrapbook")
}

async fn serve_article() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tides"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE, "text/html; charset=utf-8"))
        .mount(&server)
        .await;
    server
}

#[test]
fn test_cli_search() {
    let output = cmd().args(["search", r#"title:"tide tables" harbour"#]).output().unwrap();
    assert!(output.status.success());

    let terms: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        terms,
        serde_json::json!([
            {"field": "title", "value": "tide tables", "quoted": true},
            {"field": "", "value": "harbour", "quoted": false},
        ])
    );
}

#[test]
fn test_cli_search_error() {
    cmd()
        .args(["search", "a:b:c"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("field followed by a field"));
}

#[test]
fn test_cli_resolve() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("example.net.txt"), "body: //article\nstrip: //nav\n").unwrap();
    fs::write(tmp.path().join("global.txt"), "strip_id_or_class: share\n").unwrap();

    let output = cmd()
        .args(["resolve", "www.example.net", "--no-default-sites", "--site-config"])
        .arg(tmp.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["files"], serde_json::json!(["custom/example.net.txt", "custom/global.txt"]));
    assert_eq!(config["body_selectors"], serde_json::json!(["//article"]));
    assert_eq!(config["strip_id_or_class"], serde_json::json!(["share"]));
}

#[test]
fn test_cli_resolve_no_rules() {
    let tmp = TempDir::new().unwrap();
    cmd()
        .args(["resolve", "nothing.example", "--no-default-sites", "--site-config"])
        .arg(tmp.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("No site rules found"));
}

#[test]
fn test_cli_invalid_settings() {
    let tmp = TempDir::new().unwrap();
    let settings = tmp.path().join("scrapbook.toml");
    fs::write(&settings, "unknown_key = true\n").unwrap();

    cmd()
        .args(["resolve", "example.net", "--config"])
        .arg(&settings)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load settings"));
}

#[test]
fn test_cli_completions() {
    cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scrapbook"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fetch_text() {
    let server = serve_article().await;

    cmd()
        .args(["fetch", &format!("{}/tides", server.uri()), "--no-default-sites"])
        .assert()
        .success()
        .stdout(predicate::str::contains("chart datum"))
        .stdout(predicate::str::contains("Copyright").not());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fetch_json() {
    let server = serve_article().await;

    let output = cmd()
        .args(["fetch", &format!("{}/tides", server.uri()), "--no-default-sites", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["drops"][0]["title"], "Reading tide tables");
    assert_eq!(value["drops"][0]["lang"], "en");
    assert!(value["html"].as_str().unwrap().starts_with("<!-- page 1 -->"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fetch_supplied_html() {
    let server = MockServer::start().await;
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("page.html");
    fs::write(&file, ARTICLE).unwrap();

    cmd()
        .args(["fetch", &format!("{}/tides", server.uri()), "--no-default-sites", "-f", "html", "--html"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("twelfths"));

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.path() != "/tides"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fetch_stdin_html() {
    let server = MockServer::start().await;

    cmd()
        .args(["fetch", &format!("{}/tides", server.uri()), "--no-default-sites", "--html", "-"])
        .write_stdin(ARTICLE)
        .assert()
        .success()
        .stdout(predicate::str::contains("low water"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fetch_output_dir() {
    let server = serve_article().await;
    let tmp = TempDir::new().unwrap();

    let output = cmd()
        .args(["fetch", &format!("{}/tides", server.uri()), "--no-default-sites", "-f", "json", "-o"])
        .arg(tmp.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let bookmark: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(bookmark["state"], "loaded");
    assert_eq!(bookmark["title"], "Reading tide tables");

    let uid = bookmark["uid"].as_str().unwrap();
    assert!(tmp.path().join(format!("{uid}.json")).is_file());
    let file_path = bookmark["file_path"].as_str().unwrap();
    assert!(tmp.path().join(format!("{file_path}.zip")).is_file());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fetch_denied_destination() {
    let server = serve_article().await;

    cmd()
        .args(["fetch", &format!("{}/tides", server.uri()), "--no-default-sites", "--denied-ip", "127.0.0.0/8"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Destination not allowed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_fetch_not_found() {
    let server = MockServer::start().await;

    cmd()
        .args(["fetch", &format!("{}/missing", server.uri()), "--no-default-sites"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid status code (404)"));
}

#[test]
fn test_cli_missing_html_file() {
    cmd()
        .args(["fetch", "https://example.net/", "--no-default-sites", "--html", "/nonexistent/page.html"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read file"));
}
