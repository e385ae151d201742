//! Table of contents pages, drawn directly with lopdf.
//!
//! Chapter page numbers arrive final; nothing here counts pages. Text uses
//! the standard Helvetica faces, so no fonts are embedded and right
//! alignment relies on the built-in metrics below.

use anyhow::{anyhow, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::BookConfig;
use crate::planner::ChapterInfo;
use crate::template::{substitute_placeholders, PlaceholderContext};

const INCH: f32 = 72.0;

/// Advance widths of ASCII 32..=126 per 1000 units of font size.
#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Regular,
    Bold,
}

impl Face {
    fn resource(self) -> &'static str {
        match self {
            Face::Regular => "F1",
            Face::Bold => "F2",
        }
    }

    fn widths(self) -> &'static [u16; 95] {
        match self {
            Face::Regular => &HELVETICA,
            Face::Bold => &HELVETICA_BOLD,
        }
    }
}

/// Width of `text` in points.
fn text_width(text: &str, face: Face, size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            code @ 32..=126 => u32::from(face.widths()[(code - 32) as usize]),
            _ => 556,
        })
        .sum();
    units as f32 * size / 1000.0
}

/// WinAnsi bytes for `text`. Characters outside Latin-1 become `?`.
fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            code @ 0x20..=0x7e | code @ 0xa0..=0xff => code as u8,
            _ => b'?',
        })
        .collect()
}

/// `#RRGGBB` (or `#RGB`) as PDF colour components.
fn parse_color(value: &str) -> [f32; 3] {
    let hex = value.trim().trim_start_matches('#');
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        _ => hex.to_string(),
    };
    let channel = |i: usize| {
        expanded
            .get(i..i + 2)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .map(|v| f32::from(v) / 255.0)
    };
    match (expanded.len(), channel(0), channel(2), channel(4)) {
        (6, Some(r), Some(g), Some(b)) => [r, g, b],
        _ => {
            warn!("Invalid colour \"{}\", using black", value);
            [0.0, 0.0, 0.0]
        }
    }
}

#[derive(Default)]
struct Canvas {
    operations: Vec<Operation>,
}

impl Canvas {
    fn fill(&mut self, color: [f32; 3]) {
        self.operations
            .push(Operation::new("rg", color.iter().map(|&c| c.into()).collect()));
    }

    fn text(&mut self, x: f32, y: f32, text: &str, face: Face, size: f32) {
        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![face.resource().into(), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::String(encode(text), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }

    fn text_centered(&mut self, center: f32, y: f32, text: &str, face: Face, size: f32) {
        let x = center - text_width(text, face, size) / 2.0;
        self.text(x, y, text, face, size);
    }

    fn text_right(&mut self, right: f32, y: f32, text: &str, face: Face, size: f32) {
        let x = right - text_width(text, face, size);
        self.text(x, y, text, face, size);
    }

    fn line(&mut self, color: [f32; 3], width: f32, from: (f32, f32), to: (f32, f32)) {
        self.operations.extend([
            Operation::new("RG", color.iter().map(|&c| c.into()).collect()),
            Operation::new("w", vec![width.into()]),
            Operation::new("m", vec![from.0.into(), from.1.into()]),
            Operation::new("l", vec![to.0.into(), to.1.into()]),
            Operation::new("S", vec![]),
        ]);
    }

    fn finish(self) -> Content {
        Content {
            operations: self.operations,
        }
    }
}

/// Builds the table of contents. Returns the document and its page count.
pub fn toc_document(
    chapters: &[ChapterInfo],
    book_title: &str,
    config: &BookConfig,
    date: &str,
) -> Result<(Document, usize)> {
    let toc = &config.toc_settings;
    let layout = config.style_settings.page_layout();
    let width = (layout.paper_width * 72.0) as f32;
    let height = (layout.paper_height * 72.0) as f32;

    let context = PlaceholderContext::new()
        .with("title", book_title)
        .with("date", date)
        .with("bookTitle", book_title);
    let footer_right = substitute_placeholders(&config.page_settings.footer_right, &context);
    let footer_color = parse_color(&toc.footer_color);
    let entry_color = parse_color(&toc.entry_color);
    let black = [0.0, 0.0, 0.0];

    let mut pages = Vec::new();
    let mut canvas = Canvas::default();

    canvas.fill(black);
    canvas.text_centered(width / 2.0, height - 1.5 * INCH, book_title, Face::Bold, toc.title_font_size);
    canvas.text_centered(
        width / 2.0,
        height - 2.0 * INCH,
        &toc.subtitle_text,
        Face::Regular,
        toc.subtitle_font_size,
    );
    canvas.line(
        parse_color(&toc.line_color),
        2.0,
        (1.5 * INCH, height - 2.3 * INCH),
        (width - 1.5 * INCH, height - 2.3 * INCH),
    );

    let mut y = height - 3.0 * INCH;
    for (index, chapter) in chapters.iter().enumerate() {
        canvas.fill(entry_color);
        canvas.text(1.5 * INCH, y, &chapter.section, Face::Regular, toc.entry_font_size);
        canvas.fill(black);
        canvas.text_right(
            width - 1.5 * INCH,
            y,
            &format!("Page {}", chapter.page),
            Face::Regular,
            toc.entry_font_size,
        );

        y -= 0.3 * INCH;
        if y < 1.5 * INCH && index + 1 < chapters.len() {
            pages.push(std::mem::take(&mut canvas));
            y = height - 1.5 * INCH;
        }
    }
    pages.push(canvas);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(font(Face::Regular));
    let bold_id = doc.add_object(font(Face::Bold));
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            Face::Regular.resource() => regular_id,
            Face::Bold.resource() => bold_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for mut page in pages {
        page.fill(footer_color);
        page.text(0.8 * INCH, 0.5 * INCH, date, Face::Regular, toc.footer_font_size);
        page.text_right(width - 0.8 * INCH, 0.5 * INCH, &footer_right, Face::Regular, toc.footer_font_size);

        let content = page
            .finish()
            .encode()
            .map_err(|e| anyhow!("Failed to encode table of contents: {}", e))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    Ok((doc, page_count))
}

fn font(face: Face) -> lopdf::Dictionary {
    let base = match face {
        Face::Regular => "Helvetica",
        Face::Bold => "Helvetica-Bold",
    };
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Writes the table of contents to `path` and returns its page count.
pub async fn write_toc(
    path: &Path,
    chapters: &[ChapterInfo],
    book_title: &str,
    config: &BookConfig,
    date: &str,
) -> Result<usize> {
    let (mut doc, pages) = toc_document(chapters, book_title, config, date)?;

    let mut data = Vec::new();
    doc.save_to(&mut data)
        .map_err(|e| anyhow!("Failed to serialize table of contents: {}", e))?;
    fs::write(path, data)
        .await
        .map_err(|e| anyhow!("Failed to write table of contents to {}: {}", path.display(), e))?;

    debug!("Table of contents: {} entries on {} page(s)", chapters.len(), pages);
    Ok(pages)
}
