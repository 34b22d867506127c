use super::{or_na, RenderError};
use crate::report::{ClassroomGridSection, ReportDocument};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

const PAGE_W: f32 = 595.0;
const PAGE_H: f32 = 842.0;
const MARGIN: f32 = 40.0;
const FOOTER_Y: f32 = 24.0;
const FOOTER_RESERVE: f32 = 40.0;

const BODY_FONT: &str = "F1";
const BOLD_FONT: &str = "F2";

/// Paginated-print renderer: portrait cover + summary, landscape classroom
/// grids (wide grids wrap into day-column chunks, never silently truncated),
/// then justification detail and appendix, with a running footer on every
/// page.
pub fn render(doc: &ReportDocument) -> Result<Vec<u8>, RenderError> {
    let mut composer = Composer::new();

    compose_cover(&mut composer, doc);
    if let Some(no_data) = doc.no_data() {
        composer.gap(20.0);
        composer.line_out(BOLD_FONT, 12.0, MARGIN, &no_data.message);
    }
    for grid in doc.grids() {
        compose_grid(&mut composer, grid);
    }
    compose_justification(&mut composer, doc);
    compose_appendix(&mut composer, doc);

    let footer = FooterInfo::from(doc);
    assemble(composer.pages, &footer)
}

struct FooterInfo {
    institution: String,
    generated: String,
}

impl FooterInfo {
    fn from(doc: &ReportDocument) -> Self {
        match doc.cover() {
            Some(c) => FooterInfo {
                institution: or_na(&c.institution.name).to_string(),
                generated: c.generated_at.clone(),
            },
            None => FooterInfo {
                institution: "N/A".to_string(),
                generated: "N/A".to_string(),
            },
        }
    }
}

struct Page {
    landscape: bool,
    ops: Vec<Operation>,
}

impl Page {
    fn width(&self) -> f32 {
        if self.landscape {
            PAGE_H
        } else {
            PAGE_W
        }
    }

    fn height(&self) -> f32 {
        if self.landscape {
            PAGE_W
        } else {
            PAGE_H
        }
    }
}

/// Flowing page composer: tracks a cursor from the top of the current page
/// and opens a new page when a block would collide with the footer area.
struct Composer {
    pages: Vec<Page>,
    y: f32,
}

impl Composer {
    fn new() -> Self {
        Composer {
            pages: Vec::new(),
            y: 0.0,
        }
    }

    fn start_page(&mut self, landscape: bool) {
        self.pages.push(Page {
            landscape,
            ops: Vec::new(),
        });
        self.y = self.current_height() - MARGIN;
    }

    fn current_height(&self) -> f32 {
        self.pages.last().map(|p| p.height()).unwrap_or(PAGE_H)
    }

    fn ensure_room(&mut self, needed: f32, landscape: bool) {
        let wrong_orientation = self
            .pages
            .last()
            .map(|p| p.landscape != landscape)
            .unwrap_or(true);
        if wrong_orientation || self.y - needed < FOOTER_RESERVE {
            self.start_page(landscape);
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    /// Emit one text line at the cursor and advance it.
    fn line_out(&mut self, font: &str, size: f32, x: f32, text: &str) {
        let y = self.y;
        self.text_at(font, size, x, y, text);
        self.y -= size * 1.35;
    }

    fn text_at(&mut self, font: &str, size: f32, x: f32, y: f32, text: &str) {
        let page = self.pages.last_mut().expect("page started");
        page.ops.push(Operation::new("BT", vec![]));
        page.ops
            .push(Operation::new("Tf", vec![font.into(), size.into()]));
        page.ops
            .push(Operation::new("Td", vec![x.into(), y.into()]));
        page.ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(encode_win_ansi(text))],
        ));
        page.ops.push(Operation::new("ET", vec![]));
    }

    fn rule(&mut self, x1: f32, x2: f32) {
        let y = self.y + 3.0;
        let page = self.pages.last_mut().expect("page started");
        page.ops
            .push(Operation::new("w", vec![0.5f32.into()]));
        page.ops
            .push(Operation::new("m", vec![x1.into(), y.into()]));
        page.ops
            .push(Operation::new("l", vec![x2.into(), y.into()]));
        page.ops.push(Operation::new("S", vec![]));
    }
}

fn compose_cover(composer: &mut Composer, doc: &ReportDocument) {
    composer.start_page(false);
    let Some(cover) = doc.cover() else {
        composer.line_out(BOLD_FONT, 14.0, MARGIN, "Attendance and Withdrawal Report");
        return;
    };

    composer.line_out(BOLD_FONT, 18.0, MARGIN, "Attendance and Withdrawal Report");
    composer.gap(6.0);
    composer.line_out(BODY_FONT, 11.0, MARGIN, or_na(&cover.institution.name));
    composer.line_out(
        BODY_FONT,
        10.0,
        MARGIN,
        &format!(
            "Code {}  |  {}  |  {}",
            or_na(&cover.institution.code),
            or_na(&cover.institution.address),
            or_na(&cover.institution.contact)
        ),
    );
    composer.gap(8.0);
    composer.line_out(
        BODY_FONT,
        10.0,
        MARGIN,
        &format!("Period: {} to {}", cover.period.start, cover.period.end),
    );
    composer.line_out(
        BODY_FONT,
        10.0,
        MARGIN,
        &format!(
            "Generated by {} ({}) at {}",
            or_na(&cover.operator.name),
            or_na(&cover.operator.role),
            cover.generated_at
        ),
    );
    composer.line_out(BODY_FONT, 8.0, MARGIN, &format!("Run {}", cover.run_id));

    if let Some(summary) = doc.summary() {
        composer.gap(16.0);
        composer.line_out(BOLD_FONT, 12.0, MARGIN, "Executive summary");
        composer.rule(MARGIN, PAGE_W - MARGIN);
        composer.gap(6.0);
        for line in &summary.lines {
            composer.ensure_room(14.0, false);
            let y = composer.y;
            composer.text_at(BOLD_FONT, 10.0, MARGIN, y, &line.concept);
            composer.text_at(BODY_FONT, 10.0, MARGIN + 180.0, y, &line.value);
            composer.text_at(BODY_FONT, 9.0, MARGIN + 300.0, y, &line.detail);
            composer.y -= 14.0;
        }
    }
}

/// Char-count width estimate for Helvetica at a given size. Deliberately a
/// heuristic; isolated here so it can be tested and replaced without touching
/// page composition.
pub fn estimate_width(chars: usize, font_size: f32) -> f32 {
    chars as f32 * font_size * 0.55
}

/// How many equal-width columns fit in the available span. Always at least
/// one so a pathological width cannot stall pagination.
pub fn fit_columns(available: f32, col_width: f32) -> usize {
    if col_width <= 0.0 {
        return 1;
    }
    ((available / col_width).floor() as usize).max(1)
}

const GRID_FONT_SIZE: f32 = 8.0;
const GRID_LEADING: f32 = 12.0;
const TAIL_COL_W: f32 = 30.0;
const TAIL_COLS: usize = 6;

fn compose_grid(composer: &mut Composer, grid: &ClassroomGridSection) {
    let name_chars = grid
        .rows
        .iter()
        .map(|r| r.display_name.chars().count())
        .max()
        .unwrap_or(10);
    let name_w = estimate_width(name_chars, GRID_FONT_SIZE).clamp(120.0, 220.0);
    let day_w = estimate_width(3, GRID_FONT_SIZE).max(14.0) + 4.0;
    let tail_w = TAIL_COL_W * TAIL_COLS as f32;
    let available = PAGE_H - 2.0 * MARGIN - name_w - tail_w;
    let days_per_page = fit_columns(available, day_w);

    let day_count = grid.days.len();
    let mut chunk_start = 0;
    loop {
        let chunk_end = (chunk_start + days_per_page).min(day_count);
        compose_grid_chunk(composer, grid, chunk_start..chunk_end, name_w, day_w);
        if chunk_end >= day_count {
            break;
        }
        chunk_start = chunk_end;
    }
}

fn compose_grid_chunk(
    composer: &mut Composer,
    grid: &ClassroomGridSection,
    days: std::ops::Range<usize>,
    name_w: f32,
    day_w: f32,
) {
    composer.start_page(true);
    let title = if days.start == 0 {
        format!(
            "Classroom {}  -  {} students, {} school days",
            grid.label, grid.student_count, grid.total_days
        )
    } else {
        format!("Classroom {} (continued)", grid.label)
    };
    composer.line_out(BOLD_FONT, 11.0, MARGIN, &title);
    composer.gap(4.0);

    let header_row = |composer: &mut Composer| {
        let y = composer.y;
        composer.text_at(BOLD_FONT, GRID_FONT_SIZE, MARGIN, y, "Student");
        let mut x = MARGIN + name_w;
        for idx in days.clone() {
            composer.text_at(BOLD_FONT, GRID_FONT_SIZE, x, y, &grid.days[idx].header);
            x += day_w;
        }
        for label in ["P", "L", "A", "E", "W", "%"] {
            composer.text_at(BOLD_FONT, GRID_FONT_SIZE, x, y, label);
            x += TAIL_COL_W;
        }
        composer.y -= GRID_LEADING;
        composer.rule(MARGIN, x.min(PAGE_H - MARGIN));
    };
    header_row(composer);

    for row in &grid.rows {
        if composer.y - GRID_LEADING < FOOTER_RESERVE {
            composer.start_page(true);
            composer.line_out(
                BOLD_FONT,
                11.0,
                MARGIN,
                &format!("Classroom {} (continued)", grid.label),
            );
            composer.gap(4.0);
            header_row(composer);
        }
        let y = composer.y;
        composer.text_at(BODY_FONT, GRID_FONT_SIZE, MARGIN, y, &row.display_name);
        let mut x = MARGIN + name_w;
        for idx in days.clone() {
            composer.text_at(BODY_FONT, GRID_FONT_SIZE, x, y, &row.marks[idx]);
            x += day_w;
        }
        for value in [
            row.present as i64,
            row.late as i64,
            row.absent as i64,
            row.excused as i64,
            row.withdrawn as i64,
            row.percent,
        ] {
            composer.text_at(BODY_FONT, GRID_FONT_SIZE, x, y, &value.to_string());
            x += TAIL_COL_W;
        }
        composer.y -= GRID_LEADING;
    }

    // Totals under the last row of each chunk.
    composer.ensure_room(2.0 * GRID_LEADING, true);
    let t = &grid.totals;
    let y = composer.y;
    composer.text_at(BOLD_FONT, GRID_FONT_SIZE, MARGIN, y, "Total");
    let mut x = MARGIN + name_w + (days.end - days.start) as f32 * day_w;
    for value in [
        t.present as i64,
        t.late as i64,
        t.absent as i64,
        t.excused as i64,
        t.withdrawn as i64,
        t.percent,
    ] {
        composer.text_at(BOLD_FONT, GRID_FONT_SIZE, x, y, &value.to_string());
        x += TAIL_COL_W;
    }
    composer.y -= GRID_LEADING;
    composer.line_out(
        BODY_FONT,
        GRID_FONT_SIZE,
        MARGIN,
        &format!("Classroom attendance: {}% ({})", t.percent, t.interpretation),
    );
}

/// Greedy word wrap on a character budget. Words longer than the budget are
/// hard-split rather than overflowing the page.
pub fn wrap_chars(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + 1 + word_len > max_chars {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if word_len > max_chars {
            let mut chars = word.chars().peekable();
            while chars.peek().is_some() {
                let piece: String = chars.by_ref().take(max_chars).collect();
                if chars.peek().is_some() {
                    lines.push(piece);
                } else {
                    current_len = piece.chars().count();
                    current = piece;
                }
            }
            continue;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

fn compose_justification(composer: &mut Composer, doc: &ReportDocument) {
    let Some(section) = doc.justification() else {
        return;
    };
    composer.start_page(false);
    composer.line_out(BOLD_FONT, 12.0, MARGIN, "Justified absence detail");
    composer.rule(MARGIN, PAGE_W - MARGIN);
    composer.gap(8.0);

    if section.rows.is_empty() {
        composer.line_out(BODY_FONT, 10.0, MARGIN, "No justifications in the period.");
        return;
    }
    for row in &section.rows {
        let reason_lines = wrap_chars(&row.reason, 95);
        let needed = 14.0 + reason_lines.len() as f32 * 11.0 + 14.0;
        composer.ensure_room(needed, false);
        composer.line_out(
            BOLD_FONT,
            10.0,
            MARGIN,
            &format!("{}  -  {}  -  {}", row.classroom_label, row.display_name, row.date),
        );
        for line in reason_lines {
            composer.line_out(BODY_FONT, 9.0, MARGIN + 12.0, &line);
        }
        if let Some(doc_ref) = &row.document_ref {
            composer.line_out(
                BODY_FONT,
                8.0,
                MARGIN + 12.0,
                &format!("Supporting document: {}", doc_ref),
            );
        }
        composer.gap(6.0);
    }
}

fn compose_appendix(composer: &mut Composer, doc: &ReportDocument) {
    let Some(section) = doc.appendix() else {
        return;
    };
    composer.start_page(false);
    composer.line_out(BOLD_FONT, 12.0, MARGIN, "Appendix: supporting documents");
    composer.rule(MARGIN, PAGE_W - MARGIN);
    composer.gap(8.0);

    if section.documents.is_empty() {
        composer.line_out(BODY_FONT, 10.0, MARGIN, "No supporting documents referenced.");
        return;
    }
    for (idx, document) in section.documents.iter().enumerate() {
        composer.ensure_room(40.0, false);
        composer.line_out(
            BOLD_FONT,
            10.0,
            MARGIN,
            &format!("{}. {}", idx + 1, document.reference),
        );
        if let Some(digest) = &document.sha256 {
            composer.line_out(BODY_FONT, 8.0, MARGIN + 12.0, &format!("sha256 {}", digest));
        }
        for cited in &document.cited_by {
            composer.line_out(BODY_FONT, 9.0, MARGIN + 12.0, &format!("cited by {}", cited));
        }
        composer.gap(4.0);
    }
}

/// Map text to WinAnsi bytes, degrading unmappable characters to '?' instead
/// of failing the whole export.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        let byte = match c {
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '–' => 0x96,
            '—' => 0x97,
            c if (c as u32) < 0x80 => c as u8,
            // Latin-1 block covers the accented characters and the degree
            // symbol used by classroom labels.
            c if (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        };
        // PDF literal strings need parens and backslash escaped.
        match byte {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(byte);
            }
            _ => out.push(byte),
        }
    }
    out
}

fn assemble(pages: Vec<Page>, footer: &FooterInfo) -> Result<Vec<u8>, RenderError> {
    let total = pages.len();
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let body_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            BODY_FONT => body_font_id,
            BOLD_FONT => bold_font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(total);
    for (index, mut page) in pages.into_iter().enumerate() {
        append_footer(&mut page, index + 1, total, footer);
        let content = Content {
            operations: std::mem::take(&mut page.ops),
        };
        let encoded = content
            .encode()
            .map_err(|e| RenderError::Encode(format!("content stream: {e}")))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                page.width().into(),
                page.height().into(),
            ],
            "Resources" => resources_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| RenderError::Encode(format!("pdf serialization failed: {e}")))?;
    Ok(out)
}

fn append_footer(page: &mut Page, number: usize, total: usize, footer: &FooterInfo) {
    let center = format!("Page {} of {}", number, total);
    let right_x = page.width() - MARGIN - estimate_width(footer.generated.chars().count(), 8.0);
    let center_x = (page.width() - estimate_width(center.chars().count(), 8.0)) / 2.0;
    let entries = [
        (MARGIN, footer.institution.as_str()),
        (center_x, center.as_str()),
        (right_x, footer.generated.as_str()),
    ];
    for (x, text) in entries {
        page.ops.push(Operation::new("BT", vec![]));
        page.ops
            .push(Operation::new("Tf", vec![BODY_FONT.into(), 8.0f32.into()]));
        page.ops
            .push(Operation::new("Td", vec![x.into(), FOOTER_Y.into()]));
        page.ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(encode_win_ansi(text))],
        ));
        page.ops.push(Operation::new("ET", vec![]));
    }
}
