use anyhow::{anyhow, Result};
use colored::*;
use lopdf::{dictionary, Bookmark, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::planner::ChapterInfo;

/// Page attributes a page may inherit from its page tree ancestors.
const INHERITED: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Number of pages in `path`, or 0 with a warning when it cannot be read.
/// The parsed document is dropped before returning.
pub fn page_count(path: &Path) -> usize {
    match Document::load(path) {
        Ok(document) => document.get_pages().len(),
        Err(e) => {
            warn!("Could not count pages in {}: {}", path.display(), e);
            0
        }
    }
}

/// Concatenates PDFs one at a time. Only the objects of documents already
/// added are held; each source document is dropped as soon as its objects
/// have been moved over.
pub struct PdfMerger {
    objects: BTreeMap<ObjectId, Object>,
    pages: Vec<ObjectId>,
    bookmarks: Vec<(String, usize)>,
    /// Named destinations from every source catalog, keyed by name.
    named_dests: BTreeMap<Vec<u8>, Object>,
    max_id: u32,
    documents: usize,
}

impl PdfMerger {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            pages: Vec::new(),
            bookmarks: Vec::new(),
            named_dests: BTreeMap::new(),
            max_id: 1,
            documents: 0,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Appends every page of `path` and returns how many were added.
    pub async fn add_pdf(&mut self, path: &Path) -> Result<usize> {
        let data = fs::read(path)
            .await
            .map_err(|e| anyhow!("Failed to read PDF file {}: {}", path.display(), e))?;

        let mut document = Document::load_mem(&data)
            .map_err(|e| anyhow!("Failed to parse PDF file {}: {}", path.display(), e))?;

        // Renumber objects to avoid conflicts
        document.renumber_objects_with(self.max_id);
        self.max_id = document.max_id + 1;

        let pages: Vec<ObjectId> = document.get_pages().into_values().collect();
        for &page_id in &pages {
            let inherited = inherited_attributes(&document, page_id);
            if let Ok(Object::Dictionary(page)) = document.get_object_mut(page_id) {
                for (key, value) in inherited {
                    page.set(key, value);
                }
            }
        }

        // Source catalogs are dropped below, so their named destinations
        // move into the merger. A name already taken by an earlier document
        // is suffixed and this document's links follow the new name.
        let mut renames = BTreeMap::new();
        for (name, dest) in named_destinations(&document) {
            let name = if self.named_dests.contains_key(&name) {
                let mut suffix = self.documents;
                let mut renamed = [name.as_slice(), format!("-{}", suffix).as_bytes()].concat();
                while self.named_dests.contains_key(&renamed) {
                    suffix += 1;
                    renamed = [name.as_slice(), format!("-{}", suffix).as_bytes()].concat();
                }
                renames.insert(name, renamed.clone());
                renamed
            } else {
                name
            };
            self.named_dests.insert(name, dest);
        }
        if !renames.is_empty() {
            rename_destinations(&mut document, &renames);
        }

        for (id, object) in std::mem::take(&mut document.objects) {
            if matches!(
                type_name(&object),
                Some(b"Catalog" | b"Pages" | b"Outlines" | b"Outline")
            ) {
                continue;
            }
            self.objects.insert(id, object);
        }

        debug!("Added {} pages from {}", pages.len(), path.display());
        let added = pages.len();
        self.pages.extend(pages);
        self.documents += 1;
        Ok(added)
    }

    /// Bookmarks the page at `page_index` (0-based) of the merged output.
    pub fn add_bookmark(&mut self, title: &str, page_index: usize) {
        self.bookmarks.push((title.to_string(), page_index));
    }

    pub async fn save(self, output_path: &Path) -> Result<()> {
        if self.pages.is_empty() {
            return Err(anyhow!("No PDFs added to merge"));
        }

        info!(
            "Finalizing merged PDF with {} pages from {} documents",
            self.pages.len(),
            self.documents
        );

        let mut merged = Document::with_version("1.5");
        merged.objects = self.objects;
        merged.max_id = self.max_id;

        let pages_id = merged.new_object_id();
        for &page_id in &self.pages {
            if let Ok(Object::Dictionary(page)) = merged.get_object_mut(page_id) {
                page.set("Parent", pages_id);
            }
        }
        merged.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.pages.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
                "Count" => self.pages.len() as i64,
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };
        if !self.named_dests.is_empty() {
            debug!("Keeping {} named destinations", self.named_dests.len());
            let names: Vec<Object> = self
                .named_dests
                .into_iter()
                .flat_map(|(name, dest)| [Object::String(name, StringFormat::Literal), dest])
                .collect();
            let tree_id = merged.add_object(dictionary! { "Names" => names });
            catalog.set("Names", dictionary! { "Dests" => tree_id });
        }
        let catalog_id = merged.add_object(catalog);
        merged.trailer.set("Root", catalog_id);

        for (title, index) in self.bookmarks {
            match self.pages.get(index) {
                Some(&page_id) => {
                    merged.add_bookmark(Bookmark::new(title, [0.0, 0.0, 0.0], 0, page_id), None);
                }
                None => warn!("Bookmark \"{}\" points past the last page, dropped", title),
            }
        }
        if let Some(outline_id) = merged.build_outline() {
            if let Ok(Object::Dictionary(catalog)) = merged.get_object_mut(catalog_id) {
                catalog.set("Outlines", outline_id);
                catalog.set("PageMode", "UseOutlines");
            }
        }

        merged.prune_objects();
        merged.compress();

        let mut data = Vec::new();
        merged
            .save_to(&mut data)
            .map_err(|e| anyhow!("Failed to serialize merged PDF: {}", e))?;

        fs::write(output_path, data)
            .await
            .map_err(|e| anyhow!("Failed to write merged PDF to {}: {}", output_path.display(), e))?;

        Ok(())
    }
}

impl Default for PdfMerger {
    fn default() -> Self {
        Self::new()
    }
}

fn type_name(object: &Object) -> Option<&[u8]> {
    object
        .as_dict()
        .ok()?
        .get(b"Type")
        .ok()?
        .as_name()
        .ok()
}

/// Attributes missing on the page but set on one of its ancestors, nearest
/// ancestor first.
fn inherited_attributes(document: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let Ok(page) = document.get_dictionary(page_id) else {
        return Vec::new();
    };

    let mut found: Vec<(Vec<u8>, Object)> = Vec::new();
    let mut parent = parent_of(document, page);
    let mut depth = 0;
    while let Some(node) = parent {
        for key in INHERITED {
            if !page.has(key) && !found.iter().any(|(k, _)| k.as_slice() == key) {
                if let Ok(value) = node.get(key) {
                    found.push((key.to_vec(), value.clone()));
                }
            }
        }
        depth += 1;
        // Guard against cyclic page trees.
        if depth > 64 {
            break;
        }
        parent = parent_of(document, node);
    }
    found
}

/// Follows one indirect reference.
fn deref<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

/// Named destinations of `document`: the catalog's `/Dests` dictionary and
/// the `/Names` `/Dests` name tree.
fn named_destinations(document: &Document) -> Vec<(Vec<u8>, Object)> {
    let mut found = Vec::new();
    let Ok(catalog) = document.catalog() else {
        return found;
    };

    if let Some(dests) = catalog
        .get(b"Dests")
        .ok()
        .and_then(|o| deref(document, o).as_dict().ok())
    {
        for (name, dest) in dests.iter() {
            found.push((name.clone(), deref(document, dest).clone()));
        }
    }

    let tree = catalog
        .get(b"Names")
        .ok()
        .and_then(|o| deref(document, o).as_dict().ok())
        .and_then(|names| names.get(b"Dests").ok())
        .and_then(|o| deref(document, o).as_dict().ok());
    if let Some(tree) = tree {
        collect_name_tree(document, tree, &mut found, 0);
    }
    found
}

fn collect_name_tree(
    document: &Document,
    node: &Dictionary,
    found: &mut Vec<(Vec<u8>, Object)>,
    depth: usize,
) {
    if depth > 32 {
        return;
    }
    if let Some(names) = node
        .get(b"Names")
        .ok()
        .and_then(|o| deref(document, o).as_array().ok())
    {
        for pair in names.chunks(2) {
            if let [Object::String(name, _), dest] = pair {
                found.push((name.clone(), deref(document, dest).clone()));
            }
        }
    }
    if let Some(kids) = node
        .get(b"Kids")
        .ok()
        .and_then(|o| deref(document, o).as_array().ok())
    {
        for kid in kids {
            if let Ok(kid) = deref(document, kid).as_dict() {
                collect_name_tree(document, kid, found, depth + 1);
            }
        }
    }
}

/// Points `/Dest` entries and GoTo `/D` entries at renamed destinations.
fn rename_destinations(document: &mut Document, renames: &BTreeMap<Vec<u8>, Vec<u8>>) {
    for object in document.objects.values_mut() {
        if let Object::Dictionary(dict) = object {
            rename_targets(dict, renames);
            if let Ok(Object::Dictionary(action)) = dict.get_mut(b"A") {
                rename_targets(action, renames);
            }
        }
    }
}

fn rename_targets(dict: &mut Dictionary, renames: &BTreeMap<Vec<u8>, Vec<u8>>) {
    for key in [b"Dest".as_slice(), b"D".as_slice()] {
        if let Ok(Object::String(name, _) | Object::Name(name)) = dict.get_mut(key) {
            if let Some(renamed) = renames.get(name.as_slice()) {
                *name = renamed.clone();
            }
        }
    }
}

fn parent_of<'a>(document: &'a Document, node: &Dictionary) -> Option<&'a Dictionary> {
    let id = node.get(b"Parent").ok()?.as_reference().ok()?;
    document.get_dictionary(id).ok()
}

/// Merges the book: front cover, table of contents, chapters (one bookmark
/// at each chapter's first page), back cover. A PDF that cannot be read is
/// skipped with a warning. Returns the total page count.
pub async fn merge_book(
    chapters: &[ChapterInfo],
    output_path: &Path,
    toc: &Path,
    front_cover: Option<&Path>,
    back_cover: Option<&Path>,
) -> Result<usize> {
    let mut merger = PdfMerger::new();

    if let Some(cover) = front_cover {
        match merger.add_pdf(cover).await {
            Ok(pages) => info!("Added front cover ({} pages)", pages),
            Err(e) => warn!("Could not add front cover: {}", e),
        }
    }

    match merger.add_pdf(toc).await {
        Ok(pages) => info!("Added table of contents ({} pages)", pages),
        Err(e) => warn!("Could not add table of contents: {}", e),
    }

    for chapter in chapters {
        let start = merger.page_count();
        for pdf in &chapter.files {
            if let Err(e) = merger.add_pdf(pdf).await {
                warn!("{}", format!("Could not add {}: {}", pdf.display(), e).red());
            }
        }
        if merger.page_count() > start {
            merger.add_bookmark(&chapter.section, start);
        } else {
            warn!("Section \"{}\" added no pages, no bookmark", chapter.section);
        }
        debug!(
            "Section \"{}\" merged, {} pages so far",
            chapter.section,
            merger.page_count()
        );
    }

    if let Some(cover) = back_cover {
        match merger.add_pdf(cover).await {
            Ok(pages) => info!("Added back cover ({} pages)", pages),
            Err(e) => warn!("Could not add back cover: {}", e),
        }
    }

    let total = merger.page_count();
    merger.save(output_path).await?;
    info!(
        "Merged {} pages into {}",
        total,
        output_path.display().to_string().green()
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_blank_pdf;
    use std::path::PathBuf;

    fn outline_titles(doc: &Document) -> Vec<(String, u32)> {
        let pages: BTreeMap<ObjectId, u32> =
            doc.get_pages().into_iter().map(|(n, id)| (id, n)).collect();
        let catalog = doc.catalog().unwrap();
        let outlines = doc
            .get_dictionary(catalog.get(b"Outlines").unwrap().as_reference().unwrap())
            .unwrap();

        let mut titles = Vec::new();
        let mut next = outlines.get(b"First").and_then(Object::as_reference).ok();
        while let Some(id) = next {
            let item = doc.get_dictionary(id).unwrap();
            let title = match item.get(b"Title").unwrap() {
                Object::String(bytes, _) => text_string(bytes),
                other => panic!("unexpected title {:?}", other),
            };
            let page = pages[&bookmark_target(doc, item)];
            titles.push((title, page));
            next = item.get(b"Next").and_then(Object::as_reference).ok();
        }
        titles
    }

    /// Page a bookmark jumps to, through `/Dest` or a GoTo action's `/D`.
    fn bookmark_target(doc: &Document, item: &Dictionary) -> ObjectId {
        let dest = match item.get(b"Dest") {
            Ok(dest) => dest,
            Err(_) => deref(doc, item.get(b"A").unwrap())
                .as_dict()
                .unwrap()
                .get(b"D")
                .unwrap(),
        };
        deref(doc, dest).as_array().unwrap()[0].as_reference().unwrap()
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

    #[tokio::test]
    async fn merges_in_book_order_with_bookmarks() {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name);
        write_blank_pdf(&path("cover.pdf"), 1).unwrap();
        write_blank_pdf(&path("toc.pdf"), 1).unwrap();
        write_blank_pdf(&path("a.pdf"), 2).unwrap();
        write_blank_pdf(&path("b.pdf"), 3).unwrap();
        write_blank_pdf(&path("c.pdf"), 1).unwrap();
        write_blank_pdf(&path("back.pdf"), 1).unwrap();

        let chapters = vec![
            ChapterInfo {
                section: "One".to_string(),
                page: 3,
                files: vec![path("a.pdf"), path("b.pdf")],
            },
            ChapterInfo {
                section: "Two".to_string(),
                page: 8,
                files: vec![path("c.pdf")],
            },
        ];

        let output = path("book.pdf");
        let total = merge_book(
            &chapters,
            &output,
            &path("toc.pdf"),
            Some(&path("cover.pdf")),
            Some(&path("back.pdf")),
        )
        .await
        .unwrap();
        assert_eq!(total, 9);

        let doc = Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 9);
        assert_eq!(
            outline_titles(&doc),
            vec![("One".to_string(), 3), ("Two".to_string(), 8)]
        );
    }

    #[tokio::test]
    async fn inherited_page_attributes_survive() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.pdf");
        write_blank_pdf(&source, 2).unwrap();

        let mut merger = PdfMerger::new();
        merger.add_pdf(&source).await.unwrap();
        merger.add_pdf(&source).await.unwrap();
        let output = dir.path().join("out.pdf");
        merger.save(&output).await.unwrap();

        let doc = Document::load(&output).unwrap();
        for page_id in doc.get_pages().values() {
            let page = doc.get_dictionary(*page_id).unwrap();
            assert!(page.has(b"MediaBox"));
            assert!(page.has(b"Resources"));
        }
    }

    #[tokio::test]
    async fn unreadable_pdf_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let toc = dir.path().join("toc.pdf");
        let good = dir.path().join("good.pdf");
        let corrupt = dir.path().join("corrupt.pdf");
        write_blank_pdf(&toc, 1).unwrap();
        write_blank_pdf(&good, 2).unwrap();
        std::fs::write(&corrupt, b"not a pdf").unwrap();

        assert_eq!(page_count(&corrupt), 0);
        assert_eq!(page_count(&good), 2);

        let chapters = vec![ChapterInfo {
            section: "Only".to_string(),
            page: 2,
            files: vec![corrupt, good],
        }];
        let output = dir.path().join("book.pdf");
        let total = merge_book(&chapters, &output, &toc, None, None).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(outline_titles(&Document::load(&output).unwrap()), vec![("Only".to_string(), 2)]);
    }

    /// Two pages; a link on page 1 jumps to the named destination `setup`
    /// on page 2.
    fn write_linked_pdf(path: &Path) {
        write_blank_pdf(path, 2).unwrap();
        let mut doc = Document::load(path).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let link_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 100.into(), 20.into()],
            "Dest" => Object::string_literal("setup"),
        });
        if let Ok(Object::Dictionary(page)) = doc.get_object_mut(pages[0]) {
            page.set("Annots", vec![Object::Reference(link_id)]);
        }
        let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        if let Ok(Object::Dictionary(catalog)) = doc.get_object_mut(catalog_id) {
            catalog.set(
                "Dests",
                dictionary! {
                    "setup" => vec![pages[1].into(), "XYZ".into(), 0.into(), 792.into(), 0.into()],
                },
            );
        }
        doc.save(path).unwrap();
    }

    #[tokio::test]
    async fn named_destinations_keep_links_working() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.pdf");
        let second = dir.path().join("second.pdf");
        write_linked_pdf(&first);
        write_linked_pdf(&second);

        let mut merger = PdfMerger::new();
        merger.add_pdf(&first).await.unwrap();
        merger.add_pdf(&second).await.unwrap();
        let output = dir.path().join("out.pdf");
        merger.save(&output).await.unwrap();

        let doc = Document::load(&output).unwrap();
        let numbers: BTreeMap<ObjectId, u32> =
            doc.get_pages().into_iter().map(|(n, id)| (id, n)).collect();

        let tree = doc.catalog().unwrap().get(b"Names").unwrap();
        let tree = deref(&doc, tree).as_dict().unwrap().get(b"Dests").unwrap();
        let entries = deref(&doc, tree).as_dict().unwrap().get(b"Names").unwrap();
        let mut dests: BTreeMap<Vec<u8>, u32> = BTreeMap::new();
        for pair in deref(&doc, entries).as_array().unwrap().chunks(2) {
            let name = pair[0].as_str().unwrap().to_vec();
            let page = deref(&doc, &pair[1]).as_array().unwrap()[0].as_reference().unwrap();
            dests.insert(name, numbers[&page]);
        }
        assert_eq!(
            dests,
            BTreeMap::from([(b"setup".to_vec(), 2), (b"setup-1".to_vec(), 4)])
        );

        let mut links = Vec::new();
        for (number, page_id) in doc.get_pages() {
            let page = doc.get_dictionary(page_id).unwrap();
            let Ok(annots) = page.get(b"Annots") else {
                continue;
            };
            for annot in deref(&doc, annots).as_array().unwrap() {
                let annot = deref(&doc, annot).as_dict().unwrap();
                let target = annot.get(b"Dest").unwrap().as_str().unwrap().to_vec();
                links.push((number, dests[&target]));
            }
        }
        assert_eq!(links, vec![(1, 2), (3, 4)]);
    }

    #[tokio::test]
    async fn nothing_to_merge_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let merger = PdfMerger::new();
        assert!(merger.save(&dir.path().join("empty.pdf")).await.is_err());

        let missing = PathBuf::from("/nonexistent/toc.pdf");
        assert!(merge_book(&[], &dir.path().join("x.pdf"), &missing, None, None)
            .await
            .is_err());
    }
}
