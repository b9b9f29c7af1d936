// End-to-end tests driving the `gstate` binary against on-disk SQLite stores.
//
// Run with: cargo test -p gatherstate-cli --test cli_tests -- --nocapture

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde_json::{json, Value};

fn gstate() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gstate"));
    cmd.env_remove("GSTATE_LOG").env_remove("GSTATE_NOW");
    cmd
}

const CONFIG: &str = r#"
name = "listings"
identifying_fields = ["id"]

[store]
path = "state.db"

[retention]
hours = 12

[input]
file = "fresh.json"
"#;

fn setup(config: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("listings.toml");
    std::fs::write(&config_path, config).unwrap();
    (dir, config_path)
}

fn write_input(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn run_json(config: &Path, now: &str, extra: &[&str]) -> Output {
    gstate()
        .arg("run")
        .arg(config)
        .args(["--json", "--now", now])
        .args(extra)
        .output()
        .expect("gstate run")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "exit code: {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout must be a single JSON value: {e}\nstdout:\n{}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

// ===========================================================================
// gstate run
// ===========================================================================

#[test]
fn two_passes_report_added_changed_removed() {
    let (dir, config) = setup(CONFIG);
    write_input(
        dir.path(),
        "fresh.json",
        r#"[{"id": 1, "price": 10}, {"id": 2, "price": 20}]"#,
    );

    let first = stdout_json(&run_json(&config, "2026-05-04T00:00:00Z", &[]));
    assert_eq!(first["summary"], json!({"added": 2, "changed": 0, "removed": 0}));
    assert_eq!(first["meta"]["pass"], json!("listings"));
    assert_eq!(first["meta"]["retention_seconds"], json!(43_200));

    // id 2 disappears, id 1 changes price; 13h later id 2 is past retention.
    write_input(dir.path(), "fresh.json", r#"[{"id": 1, "price": 12}]"#);
    let second = stdout_json(&run_json(&config, "2026-05-04T13:00:00Z", &[]));
    assert_eq!(second["summary"], json!({"added": 0, "changed": 1, "removed": 1}));

    let changed = &second["results"]["changed"][0];
    assert_eq!(changed["changed"]["price"], json!({"old": 10, "new": 12}));
    assert_eq!(second["results"]["removed"][0]["data"]["id"], json!(2));
    assert_eq!(second["meta"]["stats"]["former"], json!(2));
}

#[test]
fn unseen_record_survives_inside_retention() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", r#"[{"id": "a"}, {"id": "b"}]"#);
    stdout_json(&run_json(&config, "2026-05-04T00:00:00Z", &[]));

    write_input(dir.path(), "fresh.json", r#"[{"id": "a"}]"#);
    let second = stdout_json(&run_json(&config, "2026-05-04T06:00:00Z", &[]));
    assert_eq!(second["summary"], json!({"added": 0, "changed": 0, "removed": 0}));
    assert_eq!(second["meta"]["stats"]["unchanged"], json!(1));
    assert_eq!(second["meta"]["stats"]["retained"], json!(1));

    let dump = gstate()
        .args(["dump", "--json"])
        .arg(&config)
        .output()
        .unwrap();
    let rows = stdout_json(&dump);
    assert_eq!(rows.as_array().unwrap().len(), 2);
}

#[test]
fn input_flag_and_extension_pick_format() {
    let (dir, config) = setup(CONFIG);
    let csv = write_input(dir.path(), "today.csv", "id,price\n1,10\n2,20\n");

    let out = run_json(
        &config,
        "2026-05-04T00:00:00Z",
        &["--input", csv.to_str().unwrap()],
    );
    let report = stdout_json(&out);
    assert_eq!(report["summary"]["added"], json!(2));
    assert_eq!(report["results"]["added"][0]["data"]["price"], json!("10"));
}

#[test]
fn stdin_input_with_explicit_format() {
    let (_dir, config) = setup(CONFIG);
    let mut child = gstate()
        .arg("run")
        .arg(&config)
        .args(["--input", "-", "--format", "ndjson", "--json", "--now", "2026-05-04T00:00:00Z"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"{\"id\": 1}\n{\"id\": 2}\n{\"id\": 1, \"dup\": true}\n")
        .unwrap();
    let out = child.wait_with_output().unwrap();

    let report = stdout_json(&out);
    assert_eq!(report["summary"]["added"], json!(2));
    assert_eq!(report["meta"]["stats"]["duplicates"], json!(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("1 duplicate fresh record(s) dropped"), "{stderr}");
}

#[test]
fn output_file_and_human_summary() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", r#"[{"id": 1}]"#);
    let report_path = dir.path().join("pass.json");

    let out = gstate()
        .arg("run")
        .arg(&config)
        .args(["--now", "2026-05-04T00:00:00Z", "--output"])
        .arg(&report_path)
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(out.stdout.is_empty(), "no --json means nothing on stdout");

    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("pass 'listings': 1 added, 0 changed, 0 removed"), "{stderr}");

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["summary"]["added"], json!(1));
}

// ===========================================================================
// Exit codes
// ===========================================================================

#[test]
fn exit_code_flag_reports_changes() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", r#"[{"id": 1}]"#);

    let first = run_json(&config, "2026-05-04T00:00:00Z", &["--exit-code"]);
    assert_eq!(first.status.code(), Some(1));

    let second = run_json(&config, "2026-05-04T01:00:00Z", &["--exit-code"]);
    assert_eq!(second.status.code(), Some(0));
}

#[test]
fn missing_identifying_field_is_exit_7_and_writes_nothing() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", r#"[{"id": 1}, {"name": "no id"}]"#);

    let out = run_json(&config, "2026-05-04T00:00:00Z", &[]);
    assert_eq!(out.status.code(), Some(7));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("error:"), "{stderr}");
    assert!(stderr.contains("hint:"), "{stderr}");

    let dump = gstate().args(["dump", "--json"]).arg(&config).output().unwrap();
    assert_eq!(stdout_json(&dump), json!([]));
}

#[test]
fn unwritable_report_is_exit_8_but_pass_is_applied() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", r#"[{"id": 1}]"#);
    let report_path = dir.path().join("missing-dir").join("pass.json");

    let out = gstate()
        .arg("run")
        .arg(&config)
        .args(["--now", "2026-05-04T00:00:00Z", "--output"])
        .arg(&report_path)
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(8));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("cannot write output"), "{stderr}");

    let dump = gstate().args(["dump", "--json"]).arg(&config).output().unwrap();
    assert_eq!(stdout_json(&dump).as_array().unwrap().len(), 1);
}

#[test]
fn invalid_config_is_exit_3() {
    let (_dir, config) = setup(
        r#"
name = "x"
identifying_fields = []
[store]
path = "s.db"
"#,
    );
    let out = gstate().arg("validate").arg(&config).output().unwrap();
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn unparseable_input_is_exit_4() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", "[{\"id\": 1},");
    let out = run_json(&config, "2026-05-04T00:00:00Z", &[]);
    assert_eq!(out.status.code(), Some(4));
}

#[test]
fn usage_errors_are_exit_2() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", "[]");

    let bad_now = run_json(&config, "yesterday", &[]);
    assert_eq!(bad_now.status.code(), Some(2));

    let missing = gstate()
        .arg("run")
        .arg(dir.path().join("nope.toml"))
        .output()
        .unwrap();
    assert_eq!(missing.status.code(), Some(2));
}

// ===========================================================================
// gstate validate / dump
// ===========================================================================

#[test]
fn validate_reports_pass_shape() {
    let (_dir, config) = setup(CONFIG);
    let out = gstate().arg("validate").arg(&config).output().unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("valid: pass 'listings' identified by [id]"), "{stderr}");
    assert!(stderr.contains("retention 43200s"), "{stderr}");
}

#[test]
fn dump_text_lists_rows() {
    let (dir, config) = setup(CONFIG);
    write_input(dir.path(), "fresh.json", r#"[{"id": 1, "name": "a"}]"#);
    stdout_json(&run_json(&config, "2026-05-04T00:00:00Z", &[]));

    let out = gstate().arg("dump").arg(&config).output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout.lines().count(), 1);
    assert!(stdout.starts_with("2026-05-04T00:00:00"), "{stdout}");
    assert!(stdout.contains(r#"{"id":1,"name":"a"}"#), "{stdout}");
}
