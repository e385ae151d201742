use anyhow::Result;
use async_trait::async_trait;
use bookbuilder::{PdfRenderer, RenderRequest};
use lopdf::content::Content;
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const LETTER: (i64, i64) = (612, 792);
pub const A4: (i64, i64) = (595, 842);

/// Writes a PDF with `pages` empty pages of `size` points.
pub fn write_pdf(path: &Path, pages: usize, size: (i64, i64)) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), size.0.into(), size.1.into()],
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

/// Stands in for the browser: every request becomes an A4 PDF of fixed
/// length.
pub struct FakeRenderer {
    pages: usize,
    renders: Arc<AtomicUsize>,
}

impl FakeRenderer {
    pub fn new(pages: usize) -> (Self, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        (
            Self {
                pages,
                renders: renders.clone(),
            },
            renders,
        )
    }
}

#[async_trait]
impl PdfRenderer for FakeRenderer {
    async fn render(&mut self, request: &RenderRequest) -> Result<()> {
        write_pdf(&request.output, self.pages, A4)?;
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Width in points of page `number` (1-based).
pub fn page_width(doc: &Document, number: u32) -> f32 {
    let page = doc.get_dictionary(doc.get_pages()[&number]).unwrap();
    page.get(b"MediaBox").unwrap().as_array().unwrap()[2]
        .as_float()
        .unwrap()
}

/// Text drawn with `Tj` on page `number`.
pub fn page_strings(doc: &Document, number: u32) -> Vec<String> {
    let page_id = doc.get_pages()[&number];
    let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
    content
        .operations
        .iter()
        .filter(|op| op.operator == "Tj")
        .filter_map(|op| match op.operands.first() {
            Some(Object::String(bytes, _)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        })
        .collect()
}

/// Outline entries as (title, page number).
pub fn outline(doc: &Document) -> Vec<(String, u32)> {
    let numbers: std::collections::BTreeMap<_, _> =
        doc.get_pages().into_iter().map(|(n, id)| (id, n)).collect();
    let resolve = |object: &Object| -> Object {
        match object {
            Object::Reference(id) => doc.get_object(*id).unwrap().clone(),
            other => other.clone(),
        }
    };

    let catalog = doc.catalog().unwrap();
    let outlines = resolve(catalog.get(b"Outlines").unwrap());
    let mut next = outlines.as_dict().unwrap().get(b"First").ok().cloned();
    let mut entries = Vec::new();
    while let Some(item) = next {
        let item = resolve(&item);
        let item: &Dictionary = item.as_dict().unwrap();
        let title = match item.get(b"Title").unwrap() {
            Object::String(bytes, _) => text_string(bytes),
            other => panic!("unexpected title {:?}", other),
        };
        let dest = match item.get(b"Dest") {
            Ok(dest) => resolve(dest),
            Err(_) => {
                let action = resolve(item.get(b"A").unwrap());
                resolve(action.as_dict().unwrap().get(b"D").unwrap())
            }
        };
        let page = dest.as_array().unwrap()[0].as_reference().unwrap();
        entries.push((title, numbers[&page]));
        next = item.get(b"Next").ok().cloned();
    }
    entries
}

fn text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xfe, 0xff]) {
        Some(utf16) => String::from_utf16_lossy(
            &utf16
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
                .collect::<Vec<_>>(),
        ),
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}
