//! Integration tests for `sitepack bundle --json` output.
//!
//! These tests verify:
//! - JSON output is always valid JSON with `schema_version` and `ok`
//! - Worker imports produce a separate worker bundle
//! - Failures exit with code 1 and carry a SCREAMING_SNAKE_CASE error code

use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "sitepack-cli", "--bin", "sitepack", "--"]);
    cmd
}

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn is_screaming_snake_case(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

#[test]
fn test_bundle_json_writes_outfile() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.ts", "import { add } from './math';\nconsole.log(add(1, 2));\n");
    write(dir.path(), "src/math.ts", "export function add(a, b) {\n  return a + b;\n}\n");

    let output = cargo_bin()
        .args(["bundle", "src/main.ts", "-o", "out/main.js", "--no-remote", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run bundle command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");

    assert_eq!(json["ok"], true, "stdout: {stdout}");
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["format"], "esm");
    assert_eq!(json["modules"].as_array().unwrap().len(), 2);
    assert!(output.status.success());

    let code = std::fs::read_to_string(dir.path().join("out/main.js")).unwrap();
    assert!(code.contains("function add(a, b)"));
}

#[test]
fn test_bundle_json_worker_import() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "src/ts/main.ts",
        "import url from 'worker:./sieve.ts';\nnew Worker(url);\n",
    );
    write(dir.path(), "src/ts/sieve.ts", "self.onmessage = (e) => postMessage(e.data);\n");

    let output = cargo_bin()
        .args(["bundle", "src/ts/main.ts", "-o", "docs/js/main.min.js", "--no-remote", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run bundle command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(json["ok"], true, "stdout: {stdout}");

    let worker = std::fs::read_to_string(dir.path().join("docs/js/sieve.worker.js")).unwrap();
    assert!(worker.starts_with("const global = globalThis;\n"));
    assert!(dir.path().join("docs/js/sieve.worker.js.map").is_file());

    let main = std::fs::read_to_string(dir.path().join("docs/js/main.min.js")).unwrap();
    assert!(main.contains("\"./js/sieve.worker.js\""));
}

#[test]
fn test_bundle_json_missing_entry_fails() {
    let dir = tempdir().unwrap();

    let output = cargo_bin()
        .args(["bundle", "nope.ts", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run bundle command");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(json["ok"], false);

    let code = json["error"]["code"].as_str().unwrap();
    assert_eq!(code, "BUNDLE_ENTRY_NOT_FOUND");
    assert!(is_screaming_snake_case(code));
}

#[test]
fn test_bundle_invalid_format_is_usage_error() {
    let dir = tempdir().unwrap();

    let output = cargo_bin()
        .args(["bundle", "main.ts", "--format", "amd", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run bundle command");

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_version_json() {
    let output = cargo_bin()
        .args(["version", "--json"])
        .output()
        .expect("Failed to run version command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(json["name"], "sitepack");
    assert!(json["version"].as_str().is_some_and(|v| !v.is_empty()));
}
