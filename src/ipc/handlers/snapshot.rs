use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceRecord, Classroom, Justification, Student, WithdrawalRecord};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HolidayParam {
    date: NaiveDate,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotParams {
    #[serde(default)]
    classrooms: Vec<Classroom>,
    #[serde(default)]
    students: Vec<Student>,
    #[serde(default)]
    attendance: Vec<AttendanceRecord>,
    #[serde(default)]
    withdrawals: Vec<WithdrawalRecord>,
    #[serde(default)]
    working_days: Vec<String>,
    #[serde(default)]
    holidays: Vec<HolidayParam>,
    #[serde(default)]
    justifications: Vec<Justification>,
    #[serde(default = "default_replace")]
    replace: bool,
}

fn default_replace() -> bool {
    true
}

/// Bulk-load the read-only inputs the school administration system hands
/// over for report generation. CRUD-free by design: the whole scope arrives
/// in one call.
fn handle_snapshot_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let params: SnapshotParams = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    let holidays: Vec<(NaiveDate, String)> = params
        .holidays
        .iter()
        .map(|h| (h.date, h.reason.clone()))
        .collect();

    match db::replace_snapshot(
        conn,
        &params.classrooms,
        &params.students,
        &params.attendance,
        &params.withdrawals,
        &params.working_days,
        &holidays,
        &params.justifications,
        params.replace,
    ) {
        Ok(counts) => ok(
            &req.id,
            json!({
                "classrooms": counts.classrooms,
                "students": counts.students,
                "attendance": counts.attendance,
                "withdrawals": counts.withdrawals,
                "workingDays": counts.working_days,
                "holidays": counts.holidays,
                "justifications": counts.justifications,
            }),
        ),
        Err(e) => err(&req.id, "db_write_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "snapshot.load" => Some(handle_snapshot_load(state, req)),
        _ => None,
    }
}
