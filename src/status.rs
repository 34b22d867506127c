use crate::model::{AttendanceRecord, Authorization, WithdrawalRecord};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical per-day status for one student, derived from the raw records.
/// Never stored; recomputed on every report run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DayStatus {
    Present,
    Late,
    Absent,
    Excused,
    Withdrawn,
    NoRecord,
}

impl DayStatus {
    /// Single-character grid mark.
    pub fn mark(self) -> &'static str {
        match self {
            DayStatus::Present => "P",
            DayStatus::Late => "L",
            DayStatus::Absent => "A",
            DayStatus::Excused => "E",
            DayStatus::Withdrawn => "W",
            DayStatus::NoRecord => "-",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayStatus::Present => "present",
            DayStatus::Late => "late",
            DayStatus::Absent => "absent",
            DayStatus::Excused => "excused",
            DayStatus::Withdrawn => "withdrawn",
            DayStatus::NoRecord => "noRecord",
        }
    }
}

/// Lowercase, strip the accents seen in institution data, and collapse
/// separators so that "Justificación", "justificacion" and "JUSTIFICACION"
/// all hit the same table entry.
fn fold_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_space = true;
    for c in raw.trim().chars() {
        let c = match c.to_lowercase().next().unwrap_or(c) {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            '-' | '_' | '.' | '/' => ' ',
            other => other,
        };
        if c == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Fixed lookup table from the raw status labels institutions actually send
/// (English and Spanish variants, single-letter register codes) to the
/// canonical status. Unknown labels return None; the reconciler maps those
/// to NoRecord and flags them as a data-quality finding.
pub fn normalize_label(raw: &str) -> Option<DayStatus> {
    match fold_label(raw).as_str() {
        "present" | "presente" | "p" | "asistio" | "asistencia" | "attended" | "on time"
        | "a tiempo" => Some(DayStatus::Present),
        "late" | "tardy" | "tarde" | "l" | "t" | "atraso" | "atrasado" | "atrasada"
        | "retraso" | "llegada tardia" => Some(DayStatus::Late),
        "absent" | "ausente" | "a" | "falta" | "falto" | "inasistencia" | "inasistente"
        | "no show" | "no asistio" => Some(DayStatus::Absent),
        "excused" | "excusado" | "excusada" | "justified" | "justificado" | "justificada"
        | "justificacion" | "j" | "e" | "permiso" | "licencia" | "licencia medica" => {
            Some(DayStatus::Excused)
        }
        "withdrawn" | "withdrawal" | "retirado" | "retirada" | "retiro" | "w" | "r"
        | "salida anticipada" | "early release" => Some(DayStatus::Withdrawn),
        _ => None,
    }
}

/// Outcome of collapsing one student's records for one day. When the only
/// evidence was an attendance row with an unrecognized label, that label is
/// carried out so the caller can surface a data-quality warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub status: DayStatus,
    pub unknown_label: Option<String>,
}

impl Reconciliation {
    fn plain(status: DayStatus) -> Self {
        Reconciliation {
            status,
            unknown_label: None,
        }
    }
}

/// Collapse possibly-overlapping records for (student, day) into one status.
///
/// Precedence: an authorized withdrawal beats any attendance record; then the
/// normalized attendance label; then NoRecord. Pure and total: identical
/// inputs always produce identical output and no input panics.
pub fn reconcile(
    day: NaiveDate,
    attendance: &[AttendanceRecord],
    withdrawals: &[WithdrawalRecord],
) -> Reconciliation {
    let authorized_withdrawal = withdrawals
        .iter()
        .any(|w| w.date == day && w.authorization == Authorization::Authorized);
    if authorized_withdrawal {
        return Reconciliation::plain(DayStatus::Withdrawn);
    }

    let Some(record) = attendance.iter().find(|a| a.date == day) else {
        return Reconciliation::plain(DayStatus::NoRecord);
    };

    match normalize_label(&record.raw_status) {
        Some(status) => Reconciliation::plain(status),
        None => Reconciliation {
            status: DayStatus::NoRecord,
            unknown_label: Some(record.raw_status.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn att(date: &str, raw: &str) -> AttendanceRecord {
        AttendanceRecord {
            student_id: "s1".into(),
            date: d(date),
            raw_status: raw.into(),
            entry_time: None,
            exit_time: None,
        }
    }

    fn wd(date: &str, auth: Authorization) -> WithdrawalRecord {
        WithdrawalRecord {
            student_id: "s1".into(),
            date: d(date),
            time: Some("10:30".into()),
            authorization: auth,
        }
    }

    #[test]
    fn authorized_withdrawal_beats_present_attendance() {
        let r = reconcile(
            d("2024-03-04"),
            &[att("2024-03-04", "Presente")],
            &[wd("2024-03-04", Authorization::Authorized)],
        );
        assert_eq!(r.status, DayStatus::Withdrawn);
        assert!(r.unknown_label.is_none());
    }

    #[test]
    fn pending_and_cancelled_withdrawals_do_not_participate() {
        let r = reconcile(
            d("2024-03-04"),
            &[att("2024-03-04", "presente")],
            &[
                wd("2024-03-04", Authorization::Pending),
                wd("2024-03-04", Authorization::Cancelled),
            ],
        );
        assert_eq!(r.status, DayStatus::Present);
    }

    #[test]
    fn label_normalization_is_case_and_accent_insensitive() {
        assert_eq!(normalize_label("PRESENTE"), Some(DayStatus::Present));
        assert_eq!(normalize_label("Atrasó"), Some(DayStatus::Late));
        assert_eq!(normalize_label("atrasado"), Some(DayStatus::Late));
        assert_eq!(normalize_label("Justificación"), Some(DayStatus::Excused));
        assert_eq!(normalize_label("JUSTIFIED"), Some(DayStatus::Excused));
        assert_eq!(normalize_label("No-Show"), Some(DayStatus::Absent));
        assert_eq!(normalize_label("inasistencia"), Some(DayStatus::Absent));
        assert_eq!(normalize_label("Retirado"), Some(DayStatus::Withdrawn));
    }

    #[test]
    fn unknown_label_resolves_to_no_record_with_flag() {
        let r = reconcile(d("2024-03-04"), &[att("2024-03-04", "zzz??")], &[]);
        assert_eq!(r.status, DayStatus::NoRecord);
        assert_eq!(r.unknown_label.as_deref(), Some("zzz??"));
    }

    #[test]
    fn no_records_at_all_is_no_record() {
        let r = reconcile(d("2024-03-04"), &[], &[]);
        assert_eq!(r.status, DayStatus::NoRecord);
        assert!(r.unknown_label.is_none());
    }

    #[test]
    fn records_for_other_days_are_ignored() {
        let r = reconcile(
            d("2024-03-05"),
            &[att("2024-03-04", "presente")],
            &[wd("2024-03-04", Authorization::Authorized)],
        );
        assert_eq!(r.status, DayStatus::NoRecord);
    }
}
