#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;

const WORKLOAD: &str = "\
# cat and dog
s 1 0 0 1 cat
s 2 2 1 2 cat dog
m 1 5 the cat chased a dog
m 2 1 bat
r 1 2 1 2
r 2 0
s 3 1 1 1 cat
m 3 2 bat dot
r 3 2 2 3
e 1
m 4 1 cat
r 4 1 3
";

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

fn sifter() -> Command {
    let mut cmd = Command::cargo_bin("sifter").expect("binary built");
    cmd.env_remove("SIFTER_CONFIG").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn run_reports_a_clean_workload() {
    let dir = TempDir::new().unwrap();
    let workload = write(&dir, "workload.txt", WORKLOAD);

    let output = sifter().arg("run").arg(&workload).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(
        stdout.contains("documents=4 queries_started=3 queries_ended=1 checked=4 mismatches=0"),
        "{stdout}"
    );
}

#[test]
fn run_emits_json_with_workers_override() {
    let dir = TempDir::new().unwrap();
    let workload = write(&dir, "workload.txt", WORKLOAD);

    let output = sifter()
        .args(["--format", "json", "--workers", "1", "run"])
        .arg(&workload)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["documents"], 4);
    assert_eq!(report["checked"], 4);
    assert_eq!(report["mismatches"], serde_json::json!([]));
}

#[test]
fn mismatches_exit_with_status_two() {
    let dir = TempDir::new().unwrap();
    let workload = write(&dir, "workload.txt", "s 1 0 0 1 cat\nm 1 1 bat\nr 1 1 1\n");

    let output = sifter()
        .args(["--format", "json", "run"])
        .arg(&workload)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2), "{output:?}");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        report["mismatches"],
        serde_json::json!([{ "doc_id": 1, "expected": [1], "actual": [] }])
    );
}

#[test]
fn malformed_workload_is_an_error() {
    let dir = TempDir::new().unwrap();
    let workload = write(&dir, "workload.txt", "s 1 0 0 2 cat\n");

    let output = sifter().arg("run").arg(&workload).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error: line 1: fewer words than announced"), "{stderr}");
}

#[test]
fn check_config_validates_files() {
    let dir = TempDir::new().unwrap();
    let good = write(&dir, "good.toml", "workers = 2\nblock_size = 1024\n");
    let output = sifter().arg("check-config").arg(&good).output().unwrap();
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("block_size=1024"), "{stdout}");
    assert!(stdout.contains("workers=2"), "{stdout}");

    let bad = write(&dir, "bad.toml", "workers = 0\n");
    let output = sifter().arg("check-config").arg(&bad).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error: config: workers must be at least 1"), "{stderr}");

    let unknown = write(&dir, "unknown.toml", "colour = \"blue\"\n");
    sifter()
        .arg("check-config")
        .arg(&unknown)
        .assert()
        .code(1);
}

#[test]
fn run_honours_config_file() {
    let dir = TempDir::new().unwrap();
    let config = write(&dir, "sifter.toml", "min_word_len = 4\n");
    let workload = write(&dir, "workload.txt", "s 1 0 0 1 cat\n");

    let output = sifter()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg(&workload)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("query word length out of range"), "{stderr}");
}
