//! Transcript export: summary selection, line wrapping, PDF pagination.
//!
//! The exported record contains only the summary-role messages, flattened
//! from markdown to plain text and reflowed against a fixed page geometry.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use pulldown_cmark::{Event, Parser, TagEnd};

use crate::protocol::ChatMessage;

/// Fixed name of the downloadable conversation record.
pub const TRANSCRIPT_FILENAME: &str = "議論記録.pdf";

/// Title drawn at the top of the first page.
const TITLE: &str = "議論記録";

// Page geometry. Y coordinates grow upward from the page bottom.
const PAGE_WIDTH: f64 = 600.0;
const PAGE_HEIGHT: f64 = 800.0;
const MARGIN_X: f64 = 50.0;
const BOTTOM_MARGIN: f64 = 50.0;
const TITLE_SIZE: f64 = 20.0;
const BODY_SIZE: f64 = 12.0;
const LINE_HEIGHT: f64 = 16.0;
const PARAGRAPH_GAP: f64 = 5.0;
const FIRST_PAGE_TOP: f64 = PAGE_HEIGHT - 50.0;
const PAGE_TOP: f64 = PAGE_HEIGHT - 30.0;

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("pdf generation failed: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("could not write transcript file: {0}")]
    Io(#[from] std::io::Error),
}

/// Width of `text` at `size` points under the fallback metrics: half an em
/// per ASCII glyph, a full em for everything else (CJK).
pub fn text_width(text: &str, size: f64) -> f64 {
    text.chars()
        .map(|c| if c.is_ascii() { 0.5 } else { 1.0 })
        .sum::<f64>()
        * size
}

/// Greedy character wrap: grow the current line until the candidate would
/// exceed `max_width`, then flush and start over with the glyph that
/// overflowed. A single glyph wider than `max_width` gets a line of its own.
pub fn wrap_paragraph<F>(text: &str, max_width: f64, measure: F) -> Vec<String>
where
    F: Fn(&str) -> f64,
{
    let mut lines = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        let mut candidate = current.clone();
        candidate.push(ch);
        if measure(&candidate) > max_width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push(ch);
        } else {
            current = candidate;
        }
    }
    lines.push(current);
    lines
}

/// Concatenated text of the summary-role messages, in log order.
pub fn summary_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.is_summary())
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Flatten markdown to plain text, keeping paragraph breaks as newlines.
fn flatten_markdown(input: &str) -> String {
    let mut out = String::new();
    for event in Parser::new(input) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item) => out.push('\n'),
            _ => {}
        }
    }
    out
}

/// Render the summary messages of `messages` into paginated PDF bytes.
pub fn render_summary_pdf(messages: &[ChatMessage]) -> Result<Vec<u8>, TranscriptError> {
    render_pdf(&flatten_markdown(&summary_text(messages)))
}

fn render_pdf(text: &str) -> Result<Vec<u8>, TranscriptError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    // Non-embedded CID font so the Japanese summary renders without
    // shipping a font file. Viewers substitute their own Adobe-Japan1 font.
    let descendant_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType0",
        "BaseFont" => "KozMinPro-Regular",
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Japan1"),
            "Supplement" => 2,
        },
        "DW" => 1000,
    });
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => "KozMinPro-Regular",
        "Encoding" => "UniJIS-UCS2-H",
        "DescendantFonts" => vec![descendant_id.into()],
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let max_width = PAGE_WIDTH - MARGIN_X * 2.0;
    let mut pages: Vec<Vec<Operation>> = Vec::new();
    let mut ops: Vec<Operation> = Vec::new();
    let mut y = FIRST_PAGE_TOP;

    draw_text(&mut ops, MARGIN_X, y, TITLE_SIZE, TITLE);
    y -= 30.0;

    for paragraph in text.split('\n') {
        for line in wrap_paragraph(paragraph, max_width, |s| text_width(s, BODY_SIZE)) {
            draw_text(&mut ops, MARGIN_X, y, BODY_SIZE, &line);
            y -= LINE_HEIGHT;
            if y < BOTTOM_MARGIN {
                pages.push(std::mem::take(&mut ops));
                y = PAGE_TOP;
            }
        }
        y -= PARAGRAPH_GAP;
    }
    pages.push(ops);

    let mut kids: Vec<Object> = Vec::new();
    for operations in pages {
        let content = Content { operations };
        let stream_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => stream_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

fn draw_text(ops: &mut Vec<Operation>, x: f64, y: f64, size: f64, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec!["F1".into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(
            encode_utf16be(text),
            StringFormat::Hexadecimal,
        )],
    ));
    ops.push(Operation::new("ET", vec![]));
}

// The UniJIS-UCS2-H CMap expects UTF-16BE code units.
fn encode_utf16be(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_be_bytes).collect()
}
