use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn run_cli(args: &[&str], cwd: &Path, envs: &[(&str, &str)]) -> std::process::Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_forge-cli"));
    command
        .args(args)
        .current_dir(cwd)
        .env_remove("FORGE_APPROVAL_MODE")
        .env_remove("RUST_LOG");
    for (key, value) in envs {
        command.env(key, value);
    }
    command.output().expect("cli process should start")
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("stdout should be utf8")
}

#[test]
fn tools_json_lists_local_tools() {
    let temp = TempDir::new().expect("tempdir should create");
    let output = run_cli(&["tools", "--json"], temp.path(), &[]);
    assert!(output.status.success());

    let value: Value = serde_json::from_str(&stdout_of(&output)).expect("json output should parse");
    let names: Vec<&str> = value
        .as_array()
        .expect("definitions array")
        .iter()
        .filter_map(|definition| definition.get("name").and_then(Value::as_str))
        .collect();
    assert_eq!(
        names,
        vec!["delete_file", "list_dir", "read_file", "shell", "write_file"]
    );
}

#[test]
fn run_yolo_batch_writes_then_reads() {
    let temp = TempDir::new().expect("tempdir should create");
    let batch = r#"[
        {"call_id": "w", "tool_name": "write_file", "arguments": {"path": "notes/a.txt", "content": "hello\n"}},
        {"call_id": "l", "tool_name": "list_dir", "arguments": {}}
    ]"#;

    let output = run_cli(
        &[
            "run",
            "--batch-json",
            batch,
            "--approval-mode",
            "yolo",
            "--no-stream-events",
        ],
        temp.path(),
        &[],
    );

    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = stdout_of(&output);
    assert!(stdout.contains("w write_file success"));
    assert!(stdout.contains("l list_dir success"));
    assert_eq!(
        std::fs::read_to_string(temp.path().join("notes/a.txt")).expect("file should exist"),
        "hello\n"
    );
}

#[test]
fn run_rejects_confirmable_calls_when_not_interactive() {
    let temp = TempDir::new().expect("tempdir should create");
    std::fs::write(temp.path().join("keep.txt"), "keep").expect("fixture should write");
    let batch_file = temp.path().join("batch.json");
    std::fs::write(
        &batch_file,
        r#"[{"call_id": "d", "tool_name": "delete_file", "arguments": {"path": "keep.txt"}}]"#,
    )
    .expect("batch file should write");

    let output = run_cli(
        &[
            "run",
            "--batch-file",
            batch_file.to_str().expect("batch path should be utf8"),
            "--confirm",
            "reject",
            "--event-json",
        ],
        temp.path(),
        &[],
    );

    assert_eq!(output.status.code(), Some(2));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("\"event\":\"batch_complete\""));
    assert!(stdout.contains("d delete_file cancelled"));
    assert!(temp.path().join("keep.txt").exists());
}

#[test]
fn approval_mode_env_enables_yolo() {
    let temp = TempDir::new().expect("tempdir should create");
    std::fs::write(temp.path().join("old.log"), "stale").expect("fixture should write");

    let output = run_cli(
        &[
            "run",
            "--batch-json",
            r#"[{"call_id": "d", "tool_name": "delete_file", "arguments": {"path": "old.log"}}]"#,
            "--confirm",
            "reject",
            "--no-stream-events",
        ],
        temp.path(),
        &[("FORGE_APPROVAL_MODE", "yolo")],
    );

    assert!(output.status.success());
    assert!(!temp.path().join("old.log").exists());
}

#[test]
fn run_reports_unknown_tools_and_escaping_paths() {
    let temp = TempDir::new().expect("tempdir should create");
    let batch = r#"[
        {"call_id": "u", "tool_name": "reed_file", "arguments": {"path": "a.txt"}},
        {"call_id": "p", "tool_name": "read_file", "arguments": {"path": "../secret"}}
    ]"#;

    let output = run_cli(
        &["run", "--batch-json", batch, "--no-stream-events", "--confirm", "reject"],
        temp.path(),
        &[],
    );

    assert_eq!(output.status.code(), Some(2));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("u reed_file error"));
    assert!(stdout.contains("did you mean 'read_file'"));
    assert!(stdout.contains("p read_file error"));
    assert!(stdout.contains("must stay inside the workspace root"));
}
