pub mod docx;
pub mod pdf;
pub mod xlsx;

use crate::report::ReportDocument;
use std::fmt;

/// The three output document kinds. Each renderer consumes only the
/// `ReportDocument`; none re-derives a statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Tabular workbook (.xlsx).
    Workbook,
    /// Paginated print document (.pdf).
    Print,
    /// Narrative text document (.docx).
    Narrative,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Workbook, Format::Print, Format::Narrative];

    pub fn parse(raw: &str) -> Option<Format> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "xlsx" | "workbook" | "excel" => Some(Format::Workbook),
            "pdf" | "print" => Some(Format::Print),
            "docx" | "narrative" | "text" => Some(Format::Narrative),
            _ => None,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Format::Workbook => "workbook",
            Format::Print => "print",
            Format::Narrative => "narrative",
        }
    }

    pub fn ext(self) -> &'static str {
        match self {
            Format::Workbook => "xlsx",
            Format::Print => "pdf",
            Format::Narrative => "docx",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Format::Workbook => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Format::Print => "application/pdf",
            Format::Narrative => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }
}

#[derive(Debug)]
pub enum RenderError {
    /// The requested format name is not one of the supported kinds.
    Unsupported(String),
    /// The format library rejected the document (bad sheet name, encoding
    /// failure, oversized payload).
    Encode(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Unsupported(name) => write!(f, "unsupported export format: {}", name),
            RenderError::Encode(msg) => write!(f, "render failed: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

impl RenderError {
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::Unsupported(_) => "unsupported_format",
            RenderError::Encode(_) => "render_failed",
        }
    }
}

/// One rendered export: raw bytes plus the external contract metadata.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub filename: String,
}

/// `report-<type>-<ISO date>.<ext>`, dated from the cover's generation
/// timestamp.
pub fn filename(doc: &ReportDocument, format: Format) -> String {
    let date: String = doc
        .cover()
        .map(|c| c.generated_at.chars().take(10).collect())
        .unwrap_or_else(|| "undated".to_string());
    format!("report-{}-{}.{}", format.slug(), date, format.ext())
}

/// Placeholder for missing optional metadata: renderers degrade to "N/A"
/// rather than aborting the export.
pub fn or_na(value: &str) -> &str {
    if value.trim().is_empty() {
        "N/A"
    } else {
        value
    }
}

pub fn render(doc: &ReportDocument, format: Format) -> Result<Rendered, RenderError> {
    let bytes = match format {
        Format::Workbook => xlsx::render(doc)?,
        Format::Print => pdf::render(doc)?,
        Format::Narrative => docx::render(doc)?,
    };
    Ok(Rendered {
        bytes,
        media_type: format.media_type(),
        filename: filename(doc, format),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_accepts_ext_and_kind_names() {
        assert_eq!(Format::parse("xlsx"), Some(Format::Workbook));
        assert_eq!(Format::parse("PDF"), Some(Format::Print));
        assert_eq!(Format::parse("narrative"), Some(Format::Narrative));
        assert_eq!(Format::parse("tiff"), None);
    }

    #[test]
    fn na_placeholder_for_blank_metadata() {
        assert_eq!(or_na(""), "N/A");
        assert_eq!(or_na("   "), "N/A");
        assert_eq!(or_na("Escuela"), "Escuela");
    }
}
