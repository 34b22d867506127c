use super::{or_na, RenderError};
use crate::report::{ClassroomGridSection, ReportDocument};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use std::collections::HashSet;

/// Tabular-workbook renderer: one summary sheet plus one sheet per classroom
/// grid, all values copied verbatim from the section model.
pub fn render(doc: &ReportDocument) -> Result<Vec<u8>, RenderError> {
    let mut workbook = Workbook::new();
    let formats = Formats::new();

    add_summary_sheet(&mut workbook, doc, &formats)?;

    let mut used_names: HashSet<String> = HashSet::new();
    used_names.insert("Summary".to_string());
    for grid in doc.grids() {
        add_grid_sheet(&mut workbook, grid, &formats, &mut used_names)?;
    }

    workbook
        .save_to_buffer()
        .map_err(|e| RenderError::Encode(format!("workbook serialization failed: {e}")))
}

struct Formats {
    title: Format,
    header: Format,
    text: Format,
    mark: Format,
    integer: Format,
    total: Format,
}

impl Formats {
    fn new() -> Self {
        Formats {
            title: Format::new().set_bold(),
            header: Format::new()
                .set_bold()
                .set_align(FormatAlign::Center)
                .set_border(FormatBorder::Thin),
            text: Format::new().set_border(FormatBorder::Thin),
            mark: Format::new()
                .set_align(FormatAlign::Center)
                .set_border(FormatBorder::Thin),
            integer: Format::new()
                .set_num_format("0")
                .set_border(FormatBorder::Thin),
            total: Format::new().set_bold().set_border(FormatBorder::Thin),
        }
    }
}

fn encode_err(e: rust_xlsxwriter::XlsxError) -> RenderError {
    RenderError::Encode(e.to_string())
}

fn add_summary_sheet(
    workbook: &mut Workbook,
    doc: &ReportDocument,
    formats: &Formats,
) -> Result<(), RenderError> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Summary").map_err(encode_err)?;
    sheet.set_column_width(0, 28).ok();
    sheet.set_column_width(1, 30).ok();
    sheet.set_column_width(2, 44).ok();

    let mut row: u32 = 0;
    if let Some(cover) = doc.cover() {
        sheet
            .write_with_format(row, 0, "Attendance and Withdrawal Report", &formats.title)
            .map_err(encode_err)?;
        row += 1;
        let meta: [(&str, &str); 8] = [
            ("Institution", or_na(&cover.institution.name)),
            ("Code", or_na(&cover.institution.code)),
            ("Address", or_na(&cover.institution.address)),
            ("Contact", or_na(&cover.institution.contact)),
            ("Generated by", or_na(&cover.operator.name)),
            ("Role", or_na(&cover.operator.role)),
            ("Generated at", &cover.generated_at),
            ("Run", &cover.run_id),
        ];
        for (concept, value) in meta {
            sheet.write(row, 0, concept).map_err(encode_err)?;
            sheet.write(row, 1, value).map_err(encode_err)?;
            row += 1;
        }
        row += 1;
    }

    if let Some(summary) = doc.summary() {
        for (col, header) in ["Concept", "Value", "Detail"].iter().enumerate() {
            sheet
                .write_with_format(row, col as u16, *header, &formats.header)
                .map_err(encode_err)?;
        }
        row += 1;
        for line in &summary.lines {
            sheet
                .write_with_format(row, 0, line.concept.as_str(), &formats.text)
                .map_err(encode_err)?;
            sheet
                .write_with_format(row, 1, line.value.as_str(), &formats.text)
                .map_err(encode_err)?;
            sheet
                .write_with_format(row, 2, line.detail.as_str(), &formats.text)
                .map_err(encode_err)?;
            row += 1;
        }
    }

    if let Some(no_data) = doc.no_data() {
        row += 1;
        sheet
            .write_with_format(row, 0, no_data.message.as_str(), &formats.title)
            .map_err(encode_err)?;
    }
    Ok(())
}

fn add_grid_sheet(
    workbook: &mut Workbook,
    grid: &ClassroomGridSection,
    formats: &Formats,
    used_names: &mut HashSet<String>,
) -> Result<(), RenderError> {
    let name = sheet_name(&grid.label, used_names);
    let sheet = workbook.add_worksheet();
    sheet.set_name(&name).map_err(encode_err)?;

    write_grid(sheet, grid, formats)?;
    Ok(())
}

fn write_grid(
    sheet: &mut Worksheet,
    grid: &ClassroomGridSection,
    formats: &Formats,
) -> Result<(), RenderError> {
    // Header row: student columns, one column per school day, five aggregate
    // columns, percentage.
    sheet
        .write_with_format(0, 0, "Student", &formats.header)
        .map_err(encode_err)?;
    sheet
        .write_with_format(0, 1, "National ID", &formats.header)
        .map_err(encode_err)?;
    let mut col: u16 = 2;
    for day in &grid.days {
        sheet
            .write_with_format(0, col, day.header.as_str(), &formats.header)
            .map_err(encode_err)?;
        sheet.set_column_width(col, 4).ok();
        col += 1;
    }
    let tail = ["P", "L", "A", "E", "W", "%"];
    for label in tail {
        sheet
            .write_with_format(0, col, label, &formats.header)
            .map_err(encode_err)?;
        sheet.set_column_width(col, 6).ok();
        col += 1;
    }
    sheet.set_column_width(0, 28).ok();
    sheet.set_column_width(1, 14).ok();

    let mut row: u32 = 1;
    for r in &grid.rows {
        sheet
            .write_with_format(row, 0, r.display_name.as_str(), &formats.text)
            .map_err(encode_err)?;
        sheet
            .write_with_format(row, 1, or_na(&r.national_id), &formats.text)
            .map_err(encode_err)?;
        let mut col: u16 = 2;
        for mark in &r.marks {
            sheet
                .write_with_format(row, col, mark.as_str(), &formats.mark)
                .map_err(encode_err)?;
            col += 1;
        }
        let tail = [
            r.present as f64,
            r.late as f64,
            r.absent as f64,
            r.excused as f64,
            r.withdrawn as f64,
            r.percent as f64,
        ];
        for value in tail {
            sheet
                .write_with_format(row, col, value, &formats.integer)
                .map_err(encode_err)?;
            col += 1;
        }
        row += 1;
    }

    // Classroom totals row.
    let t = &grid.totals;
    sheet
        .write_with_format(row, 0, format!("Total ({} students)", grid.student_count), &formats.total)
        .map_err(encode_err)?;
    let mut col: u16 = 2 + grid.days.len() as u16;
    for value in [
        t.present as f64,
        t.late as f64,
        t.absent as f64,
        t.excused as f64,
        t.withdrawn as f64,
        t.percent as f64,
    ] {
        sheet
            .write_with_format(row, col, value, &formats.total)
            .map_err(encode_err)?;
        col += 1;
    }
    sheet
        .write_with_format(row + 1, 0, t.interpretation.as_str(), &formats.total)
        .map_err(encode_err)?;
    Ok(())
}

/// Excel limits sheet names to 31 chars and a restricted character set.
/// Deterministic: sanitize, truncate, then de-duplicate with a numeric
/// suffix.
fn sheet_name(label: &str, used: &mut HashSet<String>) -> String {
    let mut base: String = label
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    if base.trim().is_empty() {
        base = "Classroom".to_string();
    }
    let base: String = base.chars().take(31).collect();

    if used.insert(base.clone()) {
        return base;
    }
    for n in 2.. {
        let suffix = format!(" ({})", n);
        let head: String = base.chars().take(31 - suffix.chars().count()).collect();
        let candidate = format!("{}{}", head, suffix);
        if used.insert(candidate.clone()) {
            return candidate;
        }
    }
    unreachable!("suffix loop always terminates by insertion")
}
