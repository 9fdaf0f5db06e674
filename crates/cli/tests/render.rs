use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const PAGE: &str = r#"<html><body><div id="app"><h1>{{title}}</h1><ul><template data-each="items:item"><li>{{item.name}}</li></template></ul></div></body></html>"#;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[allow(deprecated)]
fn jrx() -> Command {
    let mut cmd = Command::cargo_bin("jrx").expect("binary");
    cmd.env_remove("JRX_APP_ROOT").arg("--quiet");
    cmd
}

fn page_dir() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let page = write(dir.path(), "page.html", PAGE);
    (dir, page)
}

#[test]
fn render_applies_the_state_snapshot() {
    let (dir, page) = page_dir();
    let state = write(
        dir.path(),
        "state.json",
        r#"{"title": "Fish & Chips", "items": [{"id": 1, "name": "Cod"}, {"id": 2, "name": "Plaice"}]}"#,
    );

    jrx()
        .arg("render")
        .arg(&page)
        .arg("--state")
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains("<html>"))
        .stdout(predicate::str::contains("Fish &amp; Chips"))
        .stdout(predicate::str::contains("<li>Cod</li><li>Plaice</li>"));
}

#[test]
fn render_fragment_replays_messages() {
    let (dir, page) = page_dir();
    let state = write(dir.path(), "state.json", r#"{"items": [{"id": 1, "name": "Cod"}]}"#);
    let delta = write(
        dir.path(),
        "delta.json",
        r#"{"k":"items","delta":true,"type":"list","changes":[{"op":"ADD","index":1,"item":{"id":2,"name":"Hake"}}]}"#,
    );

    jrx()
        .args(["render", "--fragment", "--state"])
        .arg(&state)
        .arg("--message")
        .arg(&delta)
        .arg(&page)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("<h1>"))
        .stdout(predicate::str::contains("<li>Cod</li><li>Hake</li>"))
        .stdout(predicate::str::contains("<html>").not());
}

#[test]
fn render_rejects_non_object_state() {
    let (dir, page) = page_dir();
    let state = write(dir.path(), "state.json", "[1, 2]");

    jrx()
        .arg("render")
        .arg(&page)
        .arg("--state")
        .arg(&state)
        .assert()
        .failure()
        .stderr(predicate::str::contains("must hold a JSON object"));
}

#[test]
fn render_reports_missing_page() {
    jrx()
        .args(["render", "/nonexistent/page.html"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn config_file_selects_the_app_root() {
    let dir = TempDir::new().unwrap();
    let page = write(
        dir.path(),
        "page.html",
        r#"<main id="shell"><p>{{greeting}}</p></main>"#,
    );
    let state = write(dir.path(), "state.json", r#"{"greeting": "hello"}"#);
    let config = write(dir.path(), "jrx.toml", "[runtime]\napp_root = \"shell\"\n");

    jrx()
        .arg("--config")
        .arg(&config)
        .args(["render", "--fragment", "--state"])
        .arg(&state)
        .arg(&page)
        .assert()
        .success()
        .stdout(predicate::str::contains("<p>hello</p>"));
}
