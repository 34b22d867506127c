use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: String,
    pub grade: String,
    pub section: String,
}

impl Classroom {
    /// Display label, e.g. "3°A". Institution data sometimes carries the
    /// degree symbol inside the grade field already, so the joined label is
    /// normalized to a single symbol.
    pub fn label(&self) -> String {
        normalize_classroom_label(&format!("{}°{}", self.grade, self.section))
    }
}

/// Collapse runs of degree-symbol artifacts ("3°°A", "3º°A") into one "°".
pub fn normalize_classroom_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_degree = false;
    for c in raw.trim().chars() {
        let is_degree = c == '°' || c == 'º';
        if is_degree {
            if !prev_degree {
                out.push('°');
            }
        } else {
            out.push(c);
        }
        prev_degree = is_degree;
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub last_name: String,
    pub first_name: String,
    #[serde(default)]
    pub national_id: String,
    pub classroom_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl Student {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: String,
    pub date: NaiveDate,
    pub raw_status: String,
    #[serde(default)]
    pub entry_time: Option<String>,
    #[serde(default)]
    pub exit_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authorization {
    Authorized,
    Pending,
    Cancelled,
}

impl Authorization {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "authorized" | "autorizado" | "autorizada" => Some(Authorization::Authorized),
            "pending" | "pendiente" => Some(Authorization::Pending),
            "cancelled" | "canceled" | "anulado" | "anulada" => Some(Authorization::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Authorization::Authorized => "authorized",
            Authorization::Pending => "pending",
            Authorization::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRecord {
    pub student_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub time: Option<String>,
    pub authorization: Authorization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Justification {
    pub student_id: String,
    pub date: NaiveDate,
    pub reason: String,
    #[serde(default)]
    pub document_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDayConfig {
    pub weekdays: BTreeSet<String>,
    pub holidays: BTreeSet<NaiveDate>,
}

impl Default for WorkingDayConfig {
    fn default() -> Self {
        WorkingDayConfig {
            weekdays: ["monday", "tuesday", "wednesday", "thursday", "friday"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            holidays: BTreeSet::new(),
        }
    }
}

impl WorkingDayConfig {
    pub fn includes_weekday(&self, wd: Weekday) -> bool {
        self.weekdays.contains(weekday_name(wd))
    }
}

pub fn weekday_name(wd: Weekday) -> &'static str {
    match wd {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Canonical weekday name from institution input. Accepts English names and
/// the Spanish names seen in imported school calendars.
pub fn parse_weekday_name(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "monday" | "lunes" | "mon" => Some("monday"),
        "tuesday" | "martes" | "tue" => Some("tuesday"),
        "wednesday" | "miercoles" | "miércoles" | "wed" => Some("wednesday"),
        "thursday" | "jueves" | "thu" => Some("thursday"),
        "friday" | "viernes" | "fri" => Some("friday"),
        "saturday" | "sabado" | "sábado" | "sat" => Some("saturday"),
        "sunday" | "domingo" | "sun" => Some("sunday"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Institution {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
}

/// Read-only inputs for one report run, loaded from the workspace snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub classrooms: Vec<Classroom>,
    pub students: Vec<Student>,
    pub attendance: Vec<AttendanceRecord>,
    pub withdrawals: Vec<WithdrawalRecord>,
    pub justifications: Vec<Justification>,
    pub config: WorkingDayConfig,
}
