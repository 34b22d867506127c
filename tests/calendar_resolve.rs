use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn health_reports_version_and_selected_workspace() {
    let workspace = temp_dir("rollbook-health");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let before = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(before["version"].is_string());
    assert!(before["workspacePath"].is_null());

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let after = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(
        after["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn calendar_resolve_applies_weekday_set_and_holidays() {
    let workspace = temp_dir("rollbook-calendar");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    // Spanish weekday names are accepted; 2024-01-03 is a Wednesday holiday.
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "snapshot.load",
        json!({
            "workingDays": ["Lunes", "Miércoles", "viernes"],
            "holidays": [{ "date": "2024-01-03", "reason": "town anniversary" }],
        }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "calendar.resolve",
        json!({ "period": { "start": "2024-01-01", "end": "2024-01-07" } }),
    );
    assert_eq!(result["count"].as_u64(), Some(2));
    assert_eq!(result["days"], json!(["2024-01-01", "2024-01-05"]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn calendar_resolve_defaults_to_the_instructional_week() {
    let workspace = temp_dir("rollbook-calendar-default");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", "snapshot.load", json!({}));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "calendar.resolve",
        json!({ "period": { "start": "2024-01-01", "end": "2024-01-14" } }),
    );
    // Two full weeks minus weekends.
    assert_eq!(result["count"].as_u64(), Some(10));

    drop(stdin);
    let _ = child.wait();
}
