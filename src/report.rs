use crate::aggregate::{self, Aggregates, RosterStudent};
use crate::calendar;
use crate::model::{
    Institution, Justification, Operator, ReportPeriod, Snapshot,
};
use crate::status::{self, DayStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverSection {
    pub institution: Institution,
    pub operator: Operator,
    pub period: ReportPeriod,
    pub generated_at: String,
    pub run_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryLine {
    pub concept: String,
    pub value: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarySection {
    pub lines: Vec<SummaryLine>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayColumn {
    pub date: NaiveDate,
    pub header: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub student_id: String,
    pub display_name: String,
    pub national_id: String,
    pub marks: Vec<String>,
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub excused: u32,
    pub withdrawn: u32,
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridTotals {
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub excused: u32,
    pub withdrawn: u32,
    pub percent: i64,
    pub interpretation: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomGridSection {
    pub label: String,
    pub student_count: u32,
    pub total_days: u32,
    pub days: Vec<DayColumn>,
    pub rows: Vec<GridRow>,
    pub totals: GridTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JustificationRow {
    pub student_id: String,
    pub display_name: String,
    pub classroom_label: String,
    pub date: NaiveDate,
    pub reason_summary: String,
    pub reason: String,
    pub document_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JustificationSection {
    pub rows: Vec<JustificationRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendixDocument {
    pub reference: String,
    pub cited_by: Vec<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendixSection {
    pub documents: Vec<AppendixDocument>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoDataSection {
    pub message: String,
}

/// One renderer-agnostic unit of the report. Renderers dispatch on the
/// variant; every payload is plain tabular data.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Section {
    Cover(CoverSection),
    Summary(SummarySection),
    ClassroomGrid(ClassroomGridSection),
    JustificationDetail(JustificationSection),
    Appendix(AppendixSection),
    NoData(NoDataSection),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub sections: Vec<Section>,
}

impl ReportDocument {
    pub fn cover(&self) -> Option<&CoverSection> {
        self.sections.iter().find_map(|s| match s {
            Section::Cover(c) => Some(c),
            _ => None,
        })
    }

    pub fn summary(&self) -> Option<&SummarySection> {
        self.sections.iter().find_map(|s| match s {
            Section::Summary(c) => Some(c),
            _ => None,
        })
    }

    pub fn grids(&self) -> Vec<&ClassroomGridSection> {
        self.sections
            .iter()
            .filter_map(|s| match s {
                Section::ClassroomGrid(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    pub fn justification(&self) -> Option<&JustificationSection> {
        self.sections.iter().find_map(|s| match s {
            Section::JustificationDetail(j) => Some(j),
            _ => None,
        })
    }

    pub fn appendix(&self) -> Option<&AppendixSection> {
        self.sections.iter().find_map(|s| match s {
            Section::Appendix(a) => Some(a),
            _ => None,
        })
    }

    pub fn no_data(&self) -> Option<&NoDataSection> {
        self.sections.iter().find_map(|s| match s {
            Section::NoData(n) => Some(n),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub enum BuildError {
    Cancelled,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::Cancelled => write!(f, "report generation cancelled before completion"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Cooperative cancellation. Checked between classroom grids and before each
/// render so a timed-out request fails with a typed error instead of leaving
/// a silently partial document.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Deadline(None)
    }

    pub fn after_ms(timeout_ms: Option<u64>) -> Self {
        Deadline(
            timeout_ms
                .map(|ms| Instant::now() + std::time::Duration::from_millis(ms)),
        )
    }

    pub fn expired(&self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub period: ReportPeriod,
    pub classroom_filter: Option<String>,
    pub institution: Institution,
    pub operator: Operator,
    pub generated_at: NaiveDateTime,
    pub run_id: String,
    /// Supporting-document digests resolved by the caller (the builder does
    /// no I/O). Keyed by document reference.
    pub document_digests: HashMap<String, String>,
}

#[derive(Debug)]
pub struct ReportOutcome {
    pub document: ReportDocument,
    pub days: Vec<NaiveDate>,
    pub aggregates: Aggregates,
    pub warnings: Vec<String>,
}

const REASON_SUMMARY_CHARS: usize = 80;

/// Truncate a justification reason for the summary column, on a char
/// boundary, with an ellipsis marker.
pub fn truncate_reason(reason: &str, max_chars: usize) -> String {
    let mut chars = reason.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

/// Full pipeline for one report run: resolve the calendar, reconcile every
/// (student, day) cell, aggregate, and assemble the section sequence.
pub fn run_report(
    snapshot: &Snapshot,
    req: &ReportRequest,
    deadline: &Deadline,
) -> Result<ReportOutcome, BuildError> {
    let mut warnings: Vec<String> = Vec::new();

    let days = calendar::resolve_days(&req.period, &snapshot.config);

    let mut roster = aggregate::build_roster(&snapshot.students, &snapshot.classrooms, &mut warnings);
    if let Some(filter) = &req.classroom_filter {
        let want = crate::model::normalize_classroom_label(filter).to_lowercase();
        roster.retain(|r| r.classroom_label.to_lowercase() == want);
    }

    let matrix = status_matrix(&days, &roster, snapshot, &mut warnings);
    let aggregates = aggregate::aggregate(&days, &roster, &matrix);

    for w in &warnings {
        tracing::warn!(warning = %w, "report data-quality finding");
    }

    let document = build_document(req, &days, &roster, &matrix, &aggregates, snapshot, &warnings, deadline)?;

    Ok(ReportOutcome {
        document,
        days,
        aggregates,
        warnings,
    })
}

/// Reconcile every (student, day) pair into the day-status matrix, keyed by
/// student id and aligned with `days`.
fn status_matrix(
    days: &[NaiveDate],
    roster: &[RosterStudent],
    snapshot: &Snapshot,
    warnings: &mut Vec<String>,
) -> HashMap<String, Vec<DayStatus>> {
    let mut attendance_by_student: HashMap<&str, Vec<crate::model::AttendanceRecord>> =
        HashMap::new();
    for rec in &snapshot.attendance {
        attendance_by_student
            .entry(rec.student_id.as_str())
            .or_default()
            .push(rec.clone());
    }
    let mut withdrawals_by_student: HashMap<&str, Vec<crate::model::WithdrawalRecord>> =
        HashMap::new();
    for rec in &snapshot.withdrawals {
        withdrawals_by_student
            .entry(rec.student_id.as_str())
            .or_default()
            .push(rec.clone());
    }

    let empty_att: Vec<crate::model::AttendanceRecord> = Vec::new();
    let empty_wd: Vec<crate::model::WithdrawalRecord> = Vec::new();

    let mut matrix = HashMap::with_capacity(roster.len());
    for entry in roster {
        let att = attendance_by_student
            .get(entry.student.id.as_str())
            .unwrap_or(&empty_att);
        let wd = withdrawals_by_student
            .get(entry.student.id.as_str())
            .unwrap_or(&empty_wd);
        let mut row = Vec::with_capacity(days.len());
        for day in days {
            let r = status::reconcile(*day, att, wd);
            if let Some(label) = r.unknown_label {
                warnings.push(format!(
                    "unrecognized attendance status {:?} for student {} on {}",
                    label, entry.student.id, day
                ));
            }
            row.push(r.status);
        }
        matrix.insert(entry.student.id.clone(), row);
    }
    matrix
}

#[allow(clippy::too_many_arguments)]
fn build_document(
    req: &ReportRequest,
    days: &[NaiveDate],
    roster: &[RosterStudent],
    matrix: &HashMap<String, Vec<DayStatus>>,
    aggregates: &Aggregates,
    snapshot: &Snapshot,
    warnings: &[String],
    deadline: &Deadline,
) -> Result<ReportDocument, BuildError> {
    let mut sections = Vec::new();

    sections.push(Section::Cover(CoverSection {
        institution: req.institution.clone(),
        operator: req.operator.clone(),
        period: req.period,
        generated_at: req.generated_at.format("%Y-%m-%d %H:%M").to_string(),
        run_id: req.run_id.clone(),
    }));

    sections.push(Section::Summary(summary_section(
        req, days, aggregates, warnings,
    )));

    if aggregates.classrooms.is_empty() || days.is_empty() {
        let message = if days.is_empty() {
            "No applicable school days in the requested period.".to_string()
        } else {
            "No student data for the requested period and filters.".to_string()
        };
        sections.push(Section::NoData(NoDataSection { message }));
        return Ok(ReportDocument { sections });
    }

    let day_columns: Vec<DayColumn> = days
        .iter()
        .map(|d| DayColumn {
            date: *d,
            header: calendar::day_header(*d),
        })
        .collect();

    for classroom in &aggregates.classrooms {
        if deadline.expired() {
            return Err(BuildError::Cancelled);
        }
        let rows: Vec<GridRow> = aggregates
            .students
            .iter()
            .filter(|s| s.classroom_label == classroom.label)
            .map(|s| {
                let marks = match matrix.get(&s.student_id) {
                    Some(row) => row.iter().map(|st| st.mark().to_string()).collect(),
                    None => vec!["-".to_string(); days.len()],
                };
                GridRow {
                    student_id: s.student_id.clone(),
                    display_name: s.display_name.clone(),
                    national_id: s.national_id.clone(),
                    marks,
                    present: s.counts.present,
                    late: s.counts.late,
                    absent: s.counts.absent,
                    excused: s.counts.excused,
                    withdrawn: s.counts.withdrawn,
                    percent: s.percent,
                }
            })
            .collect();
        sections.push(Section::ClassroomGrid(ClassroomGridSection {
            label: classroom.label.clone(),
            student_count: classroom.student_count,
            total_days: classroom.total_days,
            days: day_columns.clone(),
            rows,
            totals: GridTotals {
                present: classroom.counts.present,
                late: classroom.counts.late,
                absent: classroom.counts.absent,
                excused: classroom.counts.excused,
                withdrawn: classroom.counts.withdrawn,
                percent: classroom.percent,
                interpretation: classroom.interpretation.clone(),
            },
        }));
    }

    let justification = justification_section(req, roster, &snapshot.justifications);
    let appendix = appendix_section(req, &justification);
    sections.push(Section::JustificationDetail(justification));
    sections.push(Section::Appendix(appendix));

    Ok(ReportDocument { sections })
}

fn summary_section(
    req: &ReportRequest,
    days: &[NaiveDate],
    aggregates: &Aggregates,
    warnings: &[String],
) -> SummarySection {
    let student_count = aggregates.students.len();
    let attended: u64 = aggregates
        .students
        .iter()
        .map(|s| s.counts.attended() as u64)
        .sum();
    let basis = days.len() as u64 * student_count as u64;
    let overall = aggregate::percentage(attended, basis);

    let lines = vec![
        SummaryLine {
            concept: "Period".to_string(),
            value: format!("{} to {}", req.period.start, req.period.end),
            detail: "inclusive calendar dates".to_string(),
        },
        SummaryLine {
            concept: "Applicable school days".to_string(),
            value: days.len().to_string(),
            detail: "instructional weekdays minus holidays".to_string(),
        },
        SummaryLine {
            concept: "Students".to_string(),
            value: student_count.to_string(),
            detail: match &req.classroom_filter {
                Some(f) => format!("filtered to classroom {}", f),
                None => "all classrooms in scope".to_string(),
            },
        },
        SummaryLine {
            concept: "Classrooms".to_string(),
            value: aggregates.classrooms.len().to_string(),
            detail: String::new(),
        },
        SummaryLine {
            concept: "Overall attendance".to_string(),
            value: format!("{}%", overall),
            detail: aggregate::interpretation(overall).to_string(),
        },
        SummaryLine {
            concept: "Data-quality warnings".to_string(),
            value: warnings.len().to_string(),
            detail: if warnings.is_empty() {
                String::new()
            } else {
                "see server log for details".to_string()
            },
        },
    ];
    SummarySection { lines }
}

fn justification_section(
    req: &ReportRequest,
    roster: &[RosterStudent],
    justifications: &[Justification],
) -> JustificationSection {
    let by_id: HashMap<&str, &RosterStudent> = roster
        .iter()
        .map(|r| (r.student.id.as_str(), r))
        .collect();

    let mut rows: Vec<JustificationRow> = justifications
        .iter()
        .filter(|j| j.date >= req.period.start && j.date <= req.period.end)
        .filter_map(|j| {
            let entry = by_id.get(j.student_id.as_str())?;
            Some(JustificationRow {
                student_id: j.student_id.clone(),
                display_name: entry.student.display_name(),
                classroom_label: entry.classroom_label.clone(),
                date: j.date,
                reason_summary: truncate_reason(&j.reason, REASON_SUMMARY_CHARS),
                reason: j.reason.clone(),
                document_ref: j.document_ref.clone(),
            })
        })
        .collect();

    rows.sort_by(|a, b| {
        a.classroom_label
            .cmp(&b.classroom_label)
            .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
            .then_with(|| a.date.cmp(&b.date))
    });
    JustificationSection { rows }
}

fn appendix_section(req: &ReportRequest, justification: &JustificationSection) -> AppendixSection {
    let mut by_ref: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for row in &justification.rows {
        if let Some(doc) = &row.document_ref {
            by_ref
                .entry(doc.as_str())
                .or_default()
                .push(format!("{} ({})", row.display_name, row.date));
        }
    }
    let documents = by_ref
        .into_iter()
        .map(|(reference, cited_by)| AppendixDocument {
            reference: reference.to_string(),
            cited_by,
            sha256: req.document_digests.get(reference).cloned(),
        })
        .collect();
    AppendixSection { documents }
}
