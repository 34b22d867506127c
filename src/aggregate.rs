use crate::model::{Classroom, Student};
use crate::status::DayStatus;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

/// Label used when a student row arrives without a classroom reference.
/// Data-quality situation, not an error: the student still appears in the
/// report under this synthetic group.
pub const UNASSIGNED_LABEL: &str = "Unassigned";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub present: u32,
    pub late: u32,
    pub absent: u32,
    pub excused: u32,
    pub withdrawn: u32,
    pub no_record: u32,
}

impl StatusCounts {
    pub fn bump(&mut self, status: DayStatus) {
        match status {
            DayStatus::Present => self.present += 1,
            DayStatus::Late => self.late += 1,
            DayStatus::Absent => self.absent += 1,
            DayStatus::Excused => self.excused += 1,
            DayStatus::Withdrawn => self.withdrawn += 1,
            DayStatus::NoRecord => self.no_record += 1,
        }
    }

    pub fn absorb(&mut self, other: &StatusCounts) {
        self.present += other.present;
        self.late += other.late;
        self.absent += other.absent;
        self.excused += other.excused;
        self.withdrawn += other.withdrawn;
        self.no_record += other.no_record;
    }

    /// Days counted toward the attendance rate: everything except an
    /// unexcused absence or a missing record.
    pub fn attended(&self) -> u32 {
        self.present + self.late + self.excused + self.withdrawn
    }
}

/// Integer attendance percentage, round-half-up. A zero basis (no applicable
/// days, or an empty classroom) is defined as 0, never a division error.
pub fn percentage(attended: u64, basis: u64) -> i64 {
    if basis == 0 {
        return 0;
    }
    (100.0 * attended as f64 / basis as f64).round() as i64
}

/// Qualitative bucket for the narrative sections. Thresholds are inclusive
/// on the lower bound.
pub fn interpretation(percent: i64) -> &'static str {
    if percent >= 90 {
        "excellent"
    } else if percent >= 75 {
        "good"
    } else if percent >= 60 {
        "regular"
    } else {
        "needs urgent attention"
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub display_name: String,
    pub national_id: String,
    pub classroom_label: String,
    pub counts: StatusCounts,
    pub total_days: u32,
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomAggregate {
    pub label: String,
    pub student_count: u32,
    pub counts: StatusCounts,
    pub total_days: u32,
    pub percent: i64,
    pub interpretation: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregates {
    pub students: Vec<StudentAggregate>,
    pub classrooms: Vec<ClassroomAggregate>,
}

/// One roster row: a student resolved to their classroom label, in final
/// report order.
#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub student: Student,
    pub classroom_label: String,
}

/// Resolve classroom labels and fix the report ordering: group by classroom
/// label, then surname, then given name, case-insensitively. Students with a
/// dangling or missing classroom reference land in the "Unassigned" group and
/// are reported as warnings.
pub fn build_roster(
    students: &[Student],
    classrooms: &[Classroom],
    warnings: &mut Vec<String>,
) -> Vec<RosterStudent> {
    let labels: HashMap<&str, String> = classrooms
        .iter()
        .map(|c| (c.id.as_str(), c.label()))
        .collect();

    let mut roster: Vec<RosterStudent> = students
        .iter()
        .map(|s| {
            let classroom_label = match s.classroom_id.as_deref() {
                Some(id) => match labels.get(id) {
                    Some(label) => label.clone(),
                    None => {
                        warnings.push(format!(
                            "student {} references unknown classroom {}",
                            s.id, id
                        ));
                        UNASSIGNED_LABEL.to_string()
                    }
                },
                None => {
                    warnings.push(format!("student {} has no classroom reference", s.id));
                    UNASSIGNED_LABEL.to_string()
                }
            };
            RosterStudent {
                student: s.clone(),
                classroom_label,
            }
        })
        .collect();

    roster.sort_by(|a, b| {
        a.classroom_label
            .to_lowercase()
            .cmp(&b.classroom_label.to_lowercase())
            .then_with(|| {
                a.student
                    .last_name
                    .to_lowercase()
                    .cmp(&b.student.last_name.to_lowercase())
            })
            .then_with(|| {
                a.student
                    .first_name
                    .to_lowercase()
                    .cmp(&b.student.first_name.to_lowercase())
            })
    });
    roster
}

/// Compute per-student and per-classroom aggregates from the day-status
/// matrix. `statuses` is keyed by student id and aligned with `days`.
///
/// The classroom percentage pools counts over `total_days * student_count`
/// rather than averaging per-student percentages; the pooled rule is applied
/// uniformly across every report surface.
pub fn aggregate(
    days: &[NaiveDate],
    roster: &[RosterStudent],
    statuses: &HashMap<String, Vec<DayStatus>>,
) -> Aggregates {
    let total_days = days.len() as u32;

    let mut students_out = Vec::with_capacity(roster.len());
    for entry in roster {
        let mut counts = StatusCounts::default();
        if let Some(row) = statuses.get(&entry.student.id) {
            for status in row {
                counts.bump(*status);
            }
        } else {
            counts.no_record = total_days;
        }
        let percent = percentage(counts.attended() as u64, total_days as u64);
        students_out.push(StudentAggregate {
            student_id: entry.student.id.clone(),
            display_name: entry.student.display_name(),
            national_id: entry.student.national_id.clone(),
            classroom_label: entry.classroom_label.clone(),
            counts,
            total_days,
            percent,
        });
    }

    // Roster order is grouped by label, so one linear pass builds the
    // classroom aggregates in the same order the grids will render.
    let mut classrooms_out: Vec<ClassroomAggregate> = Vec::new();
    for student in &students_out {
        match classrooms_out.last_mut() {
            Some(current) if current.label == student.classroom_label => {
                current.student_count += 1;
                current.counts.absorb(&student.counts);
            }
            _ => classrooms_out.push(ClassroomAggregate {
                label: student.classroom_label.clone(),
                student_count: 1,
                counts: student.counts,
                total_days,
                percent: 0,
                interpretation: String::new(),
            }),
        }
    }
    for c in &mut classrooms_out {
        let basis = total_days as u64 * c.student_count as u64;
        c.percent = percentage(c.counts.attended() as u64, basis);
        c.interpretation = interpretation(c.percent).to_string();
    }

    Aggregates {
        students: students_out,
        classrooms: classrooms_out,
    }
}
