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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn fixture_snapshot() -> serde_json::Value {
    let mut attendance = Vec::new();
    for n in 1..=5 {
        let date = format!("2024-01-0{}", n);
        attendance.push(json!({
            "studentId": "b",
            "date": date,
            "rawStatus": "Presente",
        }));
        attendance.push(json!({
            "studentId": "a",
            "date": date,
            "rawStatus": if n == 3 { "Ausente" } else { "presente" },
        }));
    }
    json!({
        "classrooms": [{ "id": "c1", "grade": "3", "section": "A" }],
        "students": [
            {
                "id": "a",
                "lastName": "Araya",
                "firstName": "Pedro",
                "nationalId": "11.111.111-1",
                "classroomId": "c1"
            },
            {
                "id": "b",
                "lastName": "Bravo",
                "firstName": "Sofia",
                "nationalId": "22.222.222-2",
                "classroomId": "c1"
            }
        ],
        "attendance": attendance,
        "justifications": [{
            "studentId": "a",
            "date": "2024-01-03",
            "reason": "Medical appointment, certificate attached",
            "documentRef": "cert-2024-0103.pdf"
        }],
    })
}

fn preview_params() -> serde_json::Value {
    json!({
        "period": { "start": "2024-01-01", "end": "2024-01-07" },
        "institution": {
            "name": "Escuela Gabriela Mistral",
            "code": "EGM-001",
            "address": "Av. Principal 123",
            "contact": "contacto@egm.cl"
        },
        "operator": { "name": "R. Soto", "role": "inspector" },
        "generatedAt": "2024-02-01T09:30:00",
    })
}

#[test]
fn preview_emits_sections_in_fixed_order_with_locked_statistics() {
    let workspace = temp_dir("rollbook-preview");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", "snapshot.load", fixture_snapshot());

    let result = request_ok(&mut stdin, &mut reader, "3", "reports.preview", preview_params());

    let sections = result["document"]["sections"].as_array().expect("sections");
    let kinds: Vec<&str> = sections
        .iter()
        .map(|s| s["kind"].as_str().expect("kind"))
        .collect();
    assert_eq!(
        kinds,
        vec![
            "cover",
            "summary",
            "classroomGrid",
            "justificationDetail",
            "appendix"
        ]
    );

    // Cover metadata and deterministic timestamp.
    assert_eq!(
        sections[0]["institution"]["name"].as_str(),
        Some("Escuela Gabriela Mistral")
    );
    assert_eq!(sections[0]["generatedAt"].as_str(), Some("2024-02-01 09:30"));

    // Calendar: the first week of 2024 has five applicable days.
    let days = result["days"].as_array().expect("days");
    assert_eq!(days.len(), 5);
    assert_eq!(days[0].as_str(), Some("2024-01-01"));
    assert_eq!(days[4].as_str(), Some("2024-01-05"));

    // Grid: sorted rows, day headers, marks, aggregates, pooled totals.
    let grid = &sections[2];
    assert_eq!(grid["label"].as_str(), Some("3°A"));
    assert_eq!(grid["days"][0]["header"].as_str(), Some("M1"));
    let rows = grid["rows"].as_array().expect("rows");
    assert_eq!(rows[0]["displayName"].as_str(), Some("Araya, Pedro"));
    assert_eq!(rows[0]["marks"], json!(["P", "P", "A", "P", "P"]));
    assert_eq!(rows[0]["percent"].as_i64(), Some(80));
    assert_eq!(rows[1]["displayName"].as_str(), Some("Bravo, Sofia"));
    assert_eq!(rows[1]["percent"].as_i64(), Some(100));
    assert_eq!(grid["totals"]["percent"].as_i64(), Some(90));
    assert_eq!(grid["totals"]["interpretation"].as_str(), Some("excellent"));

    // Justification detail and appendix reference the same document.
    let j = &sections[3]["rows"][0];
    assert_eq!(j["displayName"].as_str(), Some("Araya, Pedro"));
    assert_eq!(j["documentRef"].as_str(), Some("cert-2024-0103.pdf"));
    assert_eq!(
        sections[4]["documents"][0]["reference"].as_str(),
        Some("cert-2024-0103.pdf")
    );

    // Summary carries the overall pooled percentage.
    let lines = sections[1]["lines"].as_array().expect("summary lines");
    let overall = lines
        .iter()
        .find(|l| l["concept"].as_str() == Some("Overall attendance"))
        .expect("overall line");
    assert_eq!(overall["value"].as_str(), Some("90%"));
    assert_eq!(overall["detail"].as_str(), Some("excellent"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn preview_is_deterministic_for_fixed_generated_at() {
    let workspace = temp_dir("rollbook-preview-determinism");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(&mut stdin, &mut reader, "2", "snapshot.load", fixture_snapshot());

    let one = request_ok(&mut stdin, &mut reader, "3", "reports.preview", preview_params());
    let two = request_ok(&mut stdin, &mut reader, "4", "reports.preview", preview_params());
    // Identical documents apart from the per-run id.
    assert_eq!(
        one["document"]["sections"].as_array().map(|s| &s[1..]),
        two["document"]["sections"].as_array().map(|s| &s[1..]),
    );
    assert_eq!(one["days"], two["days"]);
    assert_eq!(one["warnings"], two["warnings"]);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unknown_raw_labels_surface_as_warnings_not_failures() {
    let workspace = temp_dir("rollbook-preview-warnings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut snapshot = fixture_snapshot();
    snapshot["attendance"]
        .as_array_mut()
        .unwrap()
        .push(json!({
            "studentId": "a",
            "date": "2024-01-01",
            "rawStatus": "status-code-77",
        }));
    // Overwrite a's day-1 record with the unknown label by removing the known one.
    let attendance = snapshot["attendance"].as_array_mut().unwrap();
    attendance.retain(|r| {
        !(r["studentId"] == "a"
            && r["date"] == "2024-01-01"
            && r["rawStatus"].as_str() == Some("presente"))
    });
    request_ok(&mut stdin, &mut reader, "2", "snapshot.load", snapshot);

    let result = request_ok(&mut stdin, &mut reader, "3", "reports.preview", preview_params());
    let warnings = result["warnings"].as_array().expect("warnings");
    assert!(warnings
        .iter()
        .any(|w| w.as_str().unwrap_or("").contains("unrecognized attendance status")));

    // The unknown day renders as a no-record mark, and the report is intact.
    let grid = &result["document"]["sections"][2];
    assert_eq!(grid["rows"][0]["marks"][0].as_str(), Some("-"));
    assert_eq!(grid["rows"][0]["percent"].as_i64(), Some(60));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn classroom_filter_narrows_the_report() {
    let workspace = temp_dir("rollbook-preview-filter");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mut snapshot = fixture_snapshot();
    snapshot["classrooms"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "id": "c2", "grade": "4", "section": "B" }));
    snapshot["students"].as_array_mut().unwrap().push(json!({
        "id": "z",
        "lastName": "Zamora",
        "firstName": "Luz",
        "nationalId": "33.333.333-3",
        "classroomId": "c2"
    }));
    request_ok(&mut stdin, &mut reader, "2", "snapshot.load", snapshot);

    let mut params = preview_params();
    params["classroomFilter"] = json!("4°B");
    let result = request_ok(&mut stdin, &mut reader, "3", "reports.preview", params);
    let sections = result["document"]["sections"].as_array().expect("sections");
    let grids: Vec<&serde_json::Value> = sections
        .iter()
        .filter(|s| s["kind"] == "classroomGrid")
        .collect();
    assert_eq!(grids.len(), 1);
    assert_eq!(grids[0]["label"].as_str(), Some("4°B"));

    drop(stdin);
    let _ = child.wait();
}
