use crate::model::{
    AttendanceRecord, Authorization, Classroom, Justification, Snapshot, Student,
    WithdrawalRecord, WorkingDayConfig,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::Path;

/// Open (and create if needed) the workspace snapshot database. The engine
/// treats every table as a read-only snapshot supplied by the school
/// administration system; `snapshot.load` is the only writer.
pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollbook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            grade TEXT NOT NULL,
            section TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            national_id TEXT NOT NULL DEFAULT '',
            classroom_id TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_classroom ON students(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            raw_status TEXT NOT NULL,
            entry_time TEXT,
            exit_time TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student_date
         ON attendance_records(student_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS withdrawal_records(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            time TEXT,
            authorization TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_withdrawal_student_date
         ON withdrawal_records(student_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS working_days(
            weekday TEXT PRIMARY KEY
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            date TEXT PRIMARY KEY,
            reason TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS justifications(
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            reason TEXT NOT NULL,
            document_ref TEXT
        )",
        [],
    )?;

    Ok(conn)
}

/// Counts reported back from a bulk snapshot load.
#[derive(Debug, Clone, Default)]
pub struct LoadCounts {
    pub classrooms: usize,
    pub students: usize,
    pub attendance: usize,
    pub withdrawals: usize,
    pub working_days: usize,
    pub holidays: usize,
    pub justifications: usize,
}

#[allow(clippy::too_many_arguments)]
pub fn replace_snapshot(
    conn: &mut Connection,
    classrooms: &[Classroom],
    students: &[Student],
    attendance: &[AttendanceRecord],
    withdrawals: &[WithdrawalRecord],
    working_days: &[String],
    holidays: &[(NaiveDate, String)],
    justifications: &[Justification],
    replace: bool,
) -> anyhow::Result<LoadCounts> {
    let tx = conn.transaction()?;
    if replace {
        for table in [
            "classrooms",
            "students",
            "attendance_records",
            "withdrawal_records",
            "working_days",
            "holidays",
            "justifications",
        ] {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
    }

    for c in classrooms {
        tx.execute(
            "INSERT OR REPLACE INTO classrooms(id, grade, section) VALUES(?, ?, ?)",
            (&c.id, &c.grade, &c.section),
        )?;
    }
    for s in students {
        tx.execute(
            "INSERT OR REPLACE INTO students(id, last_name, first_name, national_id, classroom_id, active)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &s.id,
                &s.last_name,
                &s.first_name,
                &s.national_id,
                &s.classroom_id,
                s.active as i64,
            ),
        )?;
    }
    for a in attendance {
        tx.execute(
            "INSERT INTO attendance_records(student_id, date, raw_status, entry_time, exit_time)
             VALUES(?, ?, ?, ?, ?)",
            (
                &a.student_id,
                a.date.to_string(),
                &a.raw_status,
                &a.entry_time,
                &a.exit_time,
            ),
        )?;
    }
    for w in withdrawals {
        tx.execute(
            "INSERT INTO withdrawal_records(student_id, date, time, authorization)
             VALUES(?, ?, ?, ?)",
            (
                &w.student_id,
                w.date.to_string(),
                &w.time,
                w.authorization.as_str(),
            ),
        )?;
    }
    for day in working_days {
        tx.execute(
            "INSERT OR REPLACE INTO working_days(weekday) VALUES(?)",
            [day],
        )?;
    }
    for (date, reason) in holidays {
        tx.execute(
            "INSERT OR REPLACE INTO holidays(date, reason) VALUES(?, ?)",
            (date.to_string(), reason),
        )?;
    }
    for j in justifications {
        tx.execute(
            "INSERT INTO justifications(student_id, date, reason, document_ref)
             VALUES(?, ?, ?, ?)",
            (&j.student_id, j.date.to_string(), &j.reason, &j.document_ref),
        )?;
    }
    tx.commit()?;

    Ok(LoadCounts {
        classrooms: classrooms.len(),
        students: students.len(),
        attendance: attendance.len(),
        withdrawals: withdrawals.len(),
        working_days: working_days.len(),
        holidays: holidays.len(),
        justifications: justifications.len(),
    })
}

fn parse_date(raw: &str, table: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            tracing::warn!(table = %table, raw = %raw, "skipping row with unparseable date");
            None
        }
    }
}

/// Load the full read-only snapshot for a report run. Rows with unparseable
/// dates or unknown authorization states are skipped with a warning rather
/// than failing the run; a report is always produced from the rows that
/// remain.
pub fn load_snapshot(conn: &Connection) -> anyhow::Result<Snapshot> {
    let mut snapshot = Snapshot::default();

    let mut stmt = conn.prepare("SELECT id, grade, section FROM classrooms")?;
    snapshot.classrooms = stmt
        .query_map([], |r| {
            Ok(Classroom {
                id: r.get(0)?,
                grade: r.get(1)?,
                section: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, last_name, first_name, national_id, classroom_id, active FROM students",
    )?;
    snapshot.students = stmt
        .query_map([], |r| {
            Ok(Student {
                id: r.get(0)?,
                last_name: r.get(1)?,
                first_name: r.get(2)?,
                national_id: r.get(3)?,
                classroom_id: r.get(4)?,
                active: r.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT student_id, date, raw_status, entry_time, exit_time FROM attendance_records",
    )?;
    let attendance_rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, date, raw_status, entry_time, exit_time) in attendance_rows {
        let Some(date) = parse_date(&date, "attendance_records") else {
            continue;
        };
        snapshot.attendance.push(AttendanceRecord {
            student_id,
            date,
            raw_status,
            entry_time,
            exit_time,
        });
    }

    let mut stmt =
        conn.prepare("SELECT student_id, date, time, authorization FROM withdrawal_records")?;
    let withdrawal_rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, date, time, raw_auth) in withdrawal_rows {
        let Some(date) = parse_date(&date, "withdrawal_records") else {
            continue;
        };
        let Some(authorization) = Authorization::parse(&raw_auth) else {
            tracing::warn!(
                student_id = %student_id,
                raw = %raw_auth,
                "skipping withdrawal with unknown authorization state"
            );
            continue;
        };
        snapshot.withdrawals.push(WithdrawalRecord {
            student_id,
            date,
            time,
            authorization,
        });
    }

    let mut stmt = conn.prepare("SELECT weekday FROM working_days")?;
    let weekday_rows = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut weekdays: BTreeSet<String> = BTreeSet::new();
    for raw in &weekday_rows {
        match crate::model::parse_weekday_name(raw) {
            Some(name) => {
                weekdays.insert(name.to_string());
            }
            None => tracing::warn!(raw = %raw, "skipping unknown weekday name in working_days"),
        }
    }

    let mut stmt = conn.prepare("SELECT date FROM holidays")?;
    let holiday_rows = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut holidays: BTreeSet<NaiveDate> = BTreeSet::new();
    for raw in &holiday_rows {
        if let Some(date) = parse_date(raw, "holidays") {
            holidays.insert(date);
        }
    }

    snapshot.config = if weekdays.is_empty() {
        // No configured weekdays: default instructional week.
        WorkingDayConfig {
            holidays,
            ..WorkingDayConfig::default()
        }
    } else {
        WorkingDayConfig { weekdays, holidays }
    };

    let mut stmt =
        conn.prepare("SELECT student_id, date, reason, document_ref FROM justifications")?;
    let justification_rows = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (student_id, date, reason, document_ref) in justification_rows {
        let Some(date) = parse_date(&date, "justifications") else {
            continue;
        };
        snapshot.justifications.push(Justification {
            student_id,
            date,
            reason,
            document_ref,
        });
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace() -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "rollbook-db-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[test]
    fn snapshot_roundtrip_with_defaults() {
        let ws = temp_workspace();
        let mut conn = open_db(&ws).expect("open db");
        let counts = replace_snapshot(
            &mut conn,
            &[Classroom {
                id: "c1".into(),
                grade: "3".into(),
                section: "A".into(),
            }],
            &[Student {
                id: "s1".into(),
                last_name: "Araya".into(),
                first_name: "Pedro".into(),
                national_id: "1-9".into(),
                classroom_id: Some("c1".into()),
                active: true,
            }],
            &[AttendanceRecord {
                student_id: "s1".into(),
                date: d("2024-01-02"),
                raw_status: "presente".into(),
                entry_time: Some("08:01".into()),
                exit_time: None,
            }],
            &[WithdrawalRecord {
                student_id: "s1".into(),
                date: d("2024-01-03"),
                time: Some("11:00".into()),
                authorization: Authorization::Authorized,
            }],
            &[],
            &[(d("2024-01-04"), "town anniversary".into())],
            &[Justification {
                student_id: "s1".into(),
                date: d("2024-01-05"),
                reason: "medical".into(),
                document_ref: None,
            }],
            true,
        )
        .expect("load snapshot");
        assert_eq!(counts.students, 1);

        let snapshot = load_snapshot(&conn).expect("read snapshot");
        assert_eq!(snapshot.classrooms.len(), 1);
        assert_eq!(snapshot.attendance.len(), 1);
        assert_eq!(snapshot.withdrawals.len(), 1);
        assert_eq!(snapshot.justifications.len(), 1);
        // Empty working_days table falls back to the default week; holidays
        // still apply.
        assert_eq!(snapshot.config.weekdays.len(), 5);
        assert!(snapshot.config.holidays.contains(&d("2024-01-04")));
    }

    #[test]
    fn replace_clears_previous_rows() {
        let ws = temp_workspace();
        let mut conn = open_db(&ws).expect("open db");
        for _ in 0..2 {
            replace_snapshot(
                &mut conn,
                &[],
                &[],
                &[AttendanceRecord {
                    student_id: "s1".into(),
                    date: d("2024-01-02"),
                    raw_status: "presente".into(),
                    entry_time: None,
                    exit_time: None,
                }],
                &[],
                &[],
                &[],
                &[],
                true,
            )
            .expect("load");
        }
        let snapshot = load_snapshot(&conn).expect("read");
        assert_eq!(snapshot.attendance.len(), 1);
    }
}
