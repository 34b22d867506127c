use super::{or_na, RenderError};
use crate::report::{ClassroomGridSection, ReportDocument};
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Structured-text renderer: the report as labeled prose plus one inline
/// table per classroom, packaged as a minimal WordprocessingML document.
/// The package carries only the parts a .docx reader requires: content
/// types, the package relationship, and the document body.
pub fn render(doc: &ReportDocument) -> Result<Vec<u8>, RenderError> {
    let body = compose_body(doc);

    let cursor = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(cursor);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let entries: [(&str, String); 3] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", PACKAGE_RELS.to_string()),
        ("word/document.xml", document_xml(&body)),
    ];
    for (name, payload) in entries {
        zip.start_file(name, opts)
            .map_err(|e| RenderError::Encode(format!("docx entry {name}: {e}")))?;
        zip.write_all(payload.as_bytes())
            .map_err(|e| RenderError::Encode(format!("docx entry {name}: {e}")))?;
    }
    let cursor = zip
        .finish()
        .map_err(|e| RenderError::Encode(format!("docx finalize: {e}")))?;
    Ok(cursor.into_inner())
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
</Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>"#;

fn document_xml(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}<w:sectPr/></w:body></w:document>"#,
        body
    )
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn heading(out: &mut String, text: &str, size_half_points: u32) {
    out.push_str(&format!(
        "<w:p><w:r><w:rPr><w:b/><w:sz w:val=\"{}\"/></w:rPr><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        size_half_points,
        xml_escape(text)
    ));
}

fn paragraph(out: &mut String, text: &str) {
    out.push_str(&format!(
        "<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
        xml_escape(text)
    ));
}

fn table(out: &mut String, header: &[String], rows: &[Vec<String>]) {
    out.push_str(
        "<w:tbl><w:tblPr><w:tblBorders>\
         <w:top w:val=\"single\" w:sz=\"4\"/><w:bottom w:val=\"single\" w:sz=\"4\"/>\
         <w:left w:val=\"single\" w:sz=\"4\"/><w:right w:val=\"single\" w:sz=\"4\"/>\
         <w:insideH w:val=\"single\" w:sz=\"4\"/><w:insideV w:val=\"single\" w:sz=\"4\"/>\
         </w:tblBorders></w:tblPr>",
    );
    table_row(out, header, true);
    for row in rows {
        table_row(out, row, false);
    }
    out.push_str("</w:tbl>");
}

fn table_row(out: &mut String, cells: &[String], bold: bool) {
    out.push_str("<w:tr>");
    for cell in cells {
        let run_props = if bold { "<w:rPr><w:b/></w:rPr>" } else { "" };
        out.push_str(&format!(
            "<w:tc><w:p><w:r>{}<w:t xml:space=\"preserve\">{}</w:t></w:r></w:p></w:tc>",
            run_props,
            xml_escape(cell)
        ));
    }
    out.push_str("</w:tr>");
}

fn compose_body(doc: &ReportDocument) -> String {
    let mut out = String::new();

    if let Some(cover) = doc.cover() {
        heading(&mut out, "Attendance and Withdrawal Report", 36);
        paragraph(&mut out, or_na(&cover.institution.name));
        paragraph(
            &mut out,
            &format!(
                "Code {} | {} | {}",
                or_na(&cover.institution.code),
                or_na(&cover.institution.address),
                or_na(&cover.institution.contact)
            ),
        );
        paragraph(
            &mut out,
            &format!("Period: {} to {}", cover.period.start, cover.period.end),
        );
        paragraph(
            &mut out,
            &format!(
                "Generated by {} ({}) at {}",
                or_na(&cover.operator.name),
                or_na(&cover.operator.role),
                cover.generated_at
            ),
        );
    }

    if let Some(summary) = doc.summary() {
        heading(&mut out, "Executive summary", 28);
        for line in &summary.lines {
            let text = if line.detail.is_empty() {
                format!("{}: {}", line.concept, line.value)
            } else {
                format!("{}: {} ({})", line.concept, line.value, line.detail)
            };
            paragraph(&mut out, &text);
        }
    }

    if let Some(no_data) = doc.no_data() {
        heading(&mut out, "No data", 28);
        paragraph(&mut out, &no_data.message);
    }

    for grid in doc.grids() {
        compose_grid(&mut out, grid);
    }

    if let Some(section) = doc.justification() {
        heading(&mut out, "Justified absence detail", 28);
        if section.rows.is_empty() {
            paragraph(&mut out, "No justifications in the period.");
        }
        for row in &section.rows {
            paragraph(
                &mut out,
                &format!(
                    "{} - {} - {}: {}",
                    row.classroom_label, row.display_name, row.date, row.reason
                ),
            );
            if let Some(doc_ref) = &row.document_ref {
                paragraph(&mut out, &format!("Supporting document: {}", doc_ref));
            }
        }
    }

    if let Some(section) = doc.appendix() {
        heading(&mut out, "Appendix: supporting documents", 28);
        if section.documents.is_empty() {
            paragraph(&mut out, "No supporting documents referenced.");
        }
        for (idx, document) in section.documents.iter().enumerate() {
            paragraph(&mut out, &format!("{}. {}", idx + 1, document.reference));
            if let Some(digest) = &document.sha256 {
                paragraph(&mut out, &format!("sha256 {}", digest));
            }
            for cited in &document.cited_by {
                paragraph(&mut out, &format!("cited by {}", cited));
            }
        }
    }

    heading(&mut out, "Methodology", 24);
    paragraph(
        &mut out,
        "Statuses are reconciled per student per school day with authorized \
         withdrawals taking precedence over attendance records; attendance \
         percentages count present, late, excused and withdrawn days over the \
         applicable school days of the period. Classroom percentages pool \
         day counts across the classroom roster.",
    );

    out
}

fn compose_grid(out: &mut String, grid: &ClassroomGridSection) {
    heading(out, &format!("Classroom {}", grid.label), 28);
    paragraph(
        out,
        &format!(
            "{} students over {} school days. Classroom attendance {}% ({}).",
            grid.student_count, grid.total_days, grid.totals.percent, grid.totals.interpretation
        ),
    );

    let header: Vec<String> = ["Student", "Daily", "P", "L", "A", "E", "W", "%"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut rows: Vec<Vec<String>> = grid
        .rows
        .iter()
        .map(|r| {
            vec![
                r.display_name.clone(),
                r.marks.concat(),
                r.present.to_string(),
                r.late.to_string(),
                r.absent.to_string(),
                r.excused.to_string(),
                r.withdrawn.to_string(),
                r.percent.to_string(),
            ]
        })
        .collect();
    rows.push(vec![
        "Total".to_string(),
        String::new(),
        grid.totals.present.to_string(),
        grid.totals.late.to_string(),
        grid.totals.absent.to_string(),
        grid.totals.excused.to_string(),
        grid.totals.withdrawn.to_string(),
        grid.totals.percent.to_string(),
    ]);
    table(out, &header, &rows);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_escaping_covers_markup_characters() {
        assert_eq!(xml_escape("a<b>&\"c'"), "a&lt;b&gt;&amp;&quot;c&apos;");
        assert_eq!(xml_escape("3°A"), "3°A");
    }
}
