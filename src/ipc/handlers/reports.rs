use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{Institution, Operator, ReportPeriod, Snapshot};
use crate::render::{self, Format};
use crate::report::{self, BuildError, Deadline, ReportRequest};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_conn<'a>(state: &'a AppState) -> Result<&'a Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn get_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::new("bad_params", format!("{} must be YYYY-MM-DD", key)))
}

fn get_period(params: &serde_json::Value) -> Result<ReportPeriod, HandlerErr> {
    let period = params
        .get("period")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing params.period"))?;
    Ok(ReportPeriod {
        start: get_date(period, "start")?,
        end: get_date(period, "end")?,
    })
}

fn get_generated_at(params: &serde_json::Value) -> Result<NaiveDateTime, HandlerErr> {
    let Some(raw) = params.get("generatedAt").and_then(|v| v.as_str()) else {
        return Ok(chrono::Local::now().naive_local());
    };
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| {
            HandlerErr::new(
                "bad_params",
                "generatedAt must be YYYY-MM-DDTHH:MM:SS",
            )
        })
}

fn parse_report_request(params: &serde_json::Value) -> Result<ReportRequest, HandlerErr> {
    let institution: Institution = params
        .get("institution")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| HandlerErr::new("bad_params", format!("institution: {}", e)))?
        .unwrap_or_default();
    let operator: Operator = params
        .get("operator")
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| HandlerErr::new("bad_params", format!("operator: {}", e)))?
        .unwrap_or_default();

    Ok(ReportRequest {
        period: get_period(params)?,
        classroom_filter: params
            .get("classroomFilter")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        institution,
        operator,
        generated_at: get_generated_at(params)?,
        run_id: uuid::Uuid::new_v4().to_string(),
        document_digests: HashMap::new(),
    })
}

fn load_snapshot(conn: &Connection) -> Result<Snapshot, HandlerErr> {
    db::load_snapshot(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn handle_calendar_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let period = get_period(&req.params)?;
        let snapshot = load_snapshot(conn)?;
        let days = crate::calendar::resolve_days(&period, &snapshot.config);
        Ok(json!({
            "count": days.len(),
            "days": days.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        }))
    };
    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn handle_reports_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let mut request = parse_report_request(&req.params)?;
        let snapshot = load_snapshot(conn)?;
        if let Some(workspace) = &state.workspace {
            request.document_digests = resolve_document_digests(workspace, &snapshot);
        }
        let outcome = report::run_report(&snapshot, &request, &Deadline::none())
            .map_err(build_err)?;
        let document = serde_json::to_value(&outcome.document)
            .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
        Ok(json!({
            "runId": request.run_id,
            "document": document,
            "days": outcome.days.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            "warnings": outcome.warnings,
        }))
    };
    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn build_err(e: BuildError) -> HandlerErr {
    match e {
        BuildError::Cancelled => HandlerErr::new("cancelled", e.to_string()),
    }
}

/// Probe the workspace documents directory for each referenced supporting
/// document; resolvable files get a SHA-256 digest in the appendix.
fn resolve_document_digests(workspace: &Path, snapshot: &Snapshot) -> HashMap<String, String> {
    let mut digests = HashMap::new();
    let base = workspace.join("documents");
    for j in &snapshot.justifications {
        let Some(reference) = &j.document_ref else {
            continue;
        };
        if digests.contains_key(reference) {
            continue;
        }
        let candidate = base.join(reference);
        if let Ok(bytes) = std::fs::read(&candidate) {
            digests.insert(reference.clone(), sha256_hex(&bytes));
        }
    }
    digests
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn parse_formats(params: &serde_json::Value) -> Vec<String> {
    match params.get("formats").and_then(|v| v.as_array()) {
        Some(list) => list
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        None => Format::ALL.iter().map(|f| f.slug().to_string()).collect(),
    }
}

fn handle_reports_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let inner = || -> Result<serde_json::Value, HandlerErr> {
        let conn = db_conn(state)?;
        let mut request = parse_report_request(&req.params)?;
        let out_dir = req
            .params
            .get("outDir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .ok_or_else(|| HandlerErr::new("bad_params", "missing params.outDir"))?;
        let timeout_ms = req.params.get("timeoutMs").and_then(|v| v.as_u64());
        let formats = parse_formats(&req.params);

        let deadline = Deadline::after_ms(timeout_ms);
        let snapshot = load_snapshot(conn)?;
        if let Some(workspace) = &state.workspace {
            request.document_digests = resolve_document_digests(workspace, &snapshot);
        }
        let outcome = report::run_report(&snapshot, &request, &deadline).map_err(build_err)?;

        std::fs::create_dir_all(&out_dir)
            .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;

        // Each format renders independently; one failure never blocks the
        // others, and nothing is re-derived from raw records here.
        let mut results = Vec::with_capacity(formats.len());
        for name in &formats {
            results.push(export_one(&outcome.document, name, &out_dir, &deadline));
        }

        Ok(json!({
            "runId": request.run_id,
            "warnings": outcome.warnings,
            "results": results,
        }))
    };
    match inner() {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn export_one(
    document: &report::ReportDocument,
    format_name: &str,
    out_dir: &Path,
    deadline: &Deadline,
) -> serde_json::Value {
    let failure = |code: &str, message: String| {
        json!({
            "format": format_name,
            "ok": false,
            "error": { "code": code, "message": message },
        })
    };

    let Some(format) = Format::parse(format_name) else {
        return failure(
            "unsupported_format",
            format!("unsupported export format: {}", format_name),
        );
    };
    if deadline.expired() {
        return failure("cancelled", "export deadline exceeded".to_string());
    }

    let rendered = match render::render(document, format) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(format = format.slug(), error = %e, "renderer failed");
            return failure(e.code(), e.to_string());
        }
    };

    let path = out_dir.join(&rendered.filename);
    if let Err(e) = std::fs::write(&path, &rendered.bytes) {
        return failure("io_failed", e.to_string());
    }

    json!({
        "format": format_name,
        "ok": true,
        "file": path.to_string_lossy(),
        "filename": rendered.filename,
        "mediaType": rendered.media_type,
        "bytes": rendered.bytes.len(),
        "sha256": sha256_hex(&rendered.bytes),
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.resolve" => Some(handle_calendar_resolve(state, req)),
        "reports.preview" => Some(handle_reports_preview(state, req)),
        "reports.export" => Some(handle_reports_export(state, req)),
        _ => None,
    }
}
