use crate::model::{ReportPeriod, WorkingDayConfig};
use chrono::{Datelike, NaiveDate};

/// Resolve the applicable school days of a period: every date from start to
/// end inclusive whose weekday is instructional and which is not a holiday.
/// An inverted period yields an empty sequence, not an error; downstream
/// aggregation must treat zero applicable days as a 0% basis.
pub fn resolve_days(period: &ReportPeriod, config: &WorkingDayConfig) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    if period.start > period.end {
        return out;
    }
    let mut day = period.start;
    loop {
        if config.includes_weekday(day.weekday()) && !config.holidays.contains(&day) {
            out.push(day);
        }
        if day == period.end {
            break;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    out
}

/// Grid column header for one school day: weekday initial plus day number,
/// e.g. Monday the 3rd -> "M3".
pub fn day_header(date: NaiveDate) -> String {
    let initial = match date.weekday() {
        chrono::Weekday::Mon => 'M',
        chrono::Weekday::Tue => 'T',
        chrono::Weekday::Wed => 'W',
        chrono::Weekday::Thu => 'T',
        chrono::Weekday::Fri => 'F',
        chrono::Weekday::Sat => 'S',
        chrono::Weekday::Sun => 'S',
    };
    format!("{}{}", initial, date.day())
}
