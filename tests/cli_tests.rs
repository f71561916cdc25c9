use serde_json::{Value, json};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn write_dump(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("juju.json");
    let dump = json!({
        "version": 1,
        "collections": {
            "txns": [{"_id": "t1", "s": 6}],
            "units": [{"_id": "u/0", "txn-queue": ["t1_a", "t2_b"]}],
            "machines": [{"_id": "0", "txn-queue": ["t1_a"]}]
        }
    });
    fs::write(&path, serde_json::to_string_pretty(&dump).unwrap()).unwrap();
    path
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn txnpurge(args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_txnpurge"))
        .args(args)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(stdin.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_declined_prompt_changes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let dump = write_dump(&temp_dir);
    let original = fs::read_to_string(&dump).unwrap();

    let output = txnpurge(&["--dump", dump.to_str().unwrap()], "n\n");

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("[y/n]"));
    assert_eq!(fs::read_to_string(&dump).unwrap(), original);
}

#[test]
fn test_confirmed_prompt_runs() {
    let temp_dir = TempDir::new().unwrap();
    let dump = write_dump(&temp_dir);

    let output = txnpurge(&["--dump", dump.to_str().unwrap(), "--no-compact"], "yes\n");

    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Repair Summary"));
    assert_eq!(read_json(&dump)["collections"]["units"][0]["txn-queue"], json!(["t1_a"]));
}

#[test]
fn test_only_mandatory_stages() {
    let temp_dir = TempDir::new().unwrap();
    let dump = write_dump(&temp_dir);

    let output = txnpurge(
        &[
            "--dump",
            dump.to_str().unwrap(),
            "--yes",
            "--no-machines",
            "--no-prune",
            "--no-compact",
        ],
        "",
    );

    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));
    let repaired = read_json(&dump);
    let collections = &repaired["collections"];
    assert_eq!(collections["units"][0]["txn-queue"], json!(["t1_a"]));
    assert_eq!(collections["machines"][0]["txn-queue"], json!(["t1_a"]));
    assert_eq!(collections["txns"], json!([{"_id": "t1", "s": 6}]));

    let report = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(report.contains("skipped"));
}

#[test]
fn test_bad_config_exits_2() {
    let temp_dir = TempDir::new().unwrap();
    let dump = write_dump(&temp_dir);
    let original = fs::read_to_string(&dump).unwrap();

    let output = txnpurge(
        &["--dump", dump.to_str().unwrap(), "--yes", "--max-singleton-queue", "0"],
        "",
    );

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(fs::read_to_string(&dump).unwrap(), original);
}

#[test]
fn test_username_without_password_exits_2() {
    let output = txnpurge(&["--yes", "--username", "admin"], "");

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--password"));
}

#[test]
fn test_output_requires_dump() {
    let output = txnpurge(&["--yes", "--output", "out.json"], "");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_dump_exits_1() {
    let temp_dir = TempDir::new().unwrap();
    let absent = temp_dir.path().join("absent.json");

    let output = txnpurge(&["--dump", absent.to_str().unwrap(), "--yes"], "");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to open dump"));
}
