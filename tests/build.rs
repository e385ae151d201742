mod common;

use bookbuilder::{cleanup, Book, BuildOptions, ConversionReport};
use chrono::NaiveDate;
use common::{outline, page_strings, page_width, write_pdf, FakeRenderer, LETTER};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

fn sample_project(root: &Path) {
    std::fs::create_dir_all(root.join("docs")).unwrap();
    write_pdf(&root.join("cover.pdf"), 1, LETTER).unwrap();
    std::fs::write(root.join("docs/one.md"), "# One\n\nNext: [two](two.md#start)").unwrap();
    std::fs::write(root.join("docs/two.md"), "# Two\n\n## Start").unwrap();
    std::fs::write(
        root.join("order.json"),
        r#"{
            "bookTitle": "Sample",
            "author": "A. Writer",
            "chapters": [
                {"section": "Front Cover", "files": ["cover.pdf"]},
                {"section": "First", "files": ["docs/one.md"]},
                {"section": "Second", "files": ["docs/two.md"]}
            ]
        }"#,
    )
    .unwrap();
}

fn load(root: &Path) -> Book {
    Book::load(BuildOptions {
        order: PathBuf::from("order.json"),
        root: Some(root.to_path_buf()),
        ..Default::default()
    })
    .unwrap()
    .with_date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
}

#[tokio::test]
async fn builds_book_then_reuses_cache() {
    let dir = tempfile::tempdir().unwrap();
    sample_project(dir.path());

    let (renderer, renders) = FakeRenderer::new(2);
    let first = load(dir.path()).build(Box::new(renderer)).await.unwrap();

    assert_eq!(
        first.conversion,
        ConversionReport {
            converted: 2,
            cached: 1,
            failed: 0
        }
    );
    assert_eq!(renders.load(Ordering::SeqCst), 2);
    // cover, table of contents, then the chapters
    let starts: Vec<usize> = first.chapters.iter().map(|c| c.page).collect();
    assert_eq!(starts, vec![3, 5]);
    assert_eq!(first.pages, 6);

    let book = lopdf::Document::load(&first.output).unwrap();
    assert_eq!(book.get_pages().len(), 6);
    // the cover is Letter, everything generated is A4
    assert_eq!(page_width(&book, 1), 612.0);
    assert!((page_width(&book, 2) - 595.0).abs() < 1.0);
    assert!((page_width(&book, 3) - 595.0).abs() < 1.0);
    let toc = page_strings(&book, 2);
    for expected in ["Sample", "First", "Second", "Page 3", "Page 5"] {
        assert!(toc.iter().any(|s| s == expected), "table of contents lacks {expected}");
    }
    assert_eq!(
        outline(&book),
        vec![("First".to_string(), 3), ("Second".to_string(), 5)]
    );
    assert!(dir.path().join("bookbuilder-output/docs/one.pdf").is_file());

    let (renderer, renders) = FakeRenderer::new(2);
    let second = load(dir.path()).build(Box::new(renderer)).await.unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 0);
    assert_eq!(second.conversion.converted, 0);
    assert_eq!(second.conversion.cached, 3);
    assert_eq!(second.chapters, first.chapters);
}

#[tokio::test]
async fn cleanup_removes_intermediate_files() {
    let dir = tempfile::tempdir().unwrap();
    sample_project(dir.path());

    let (renderer, _) = FakeRenderer::new(1);
    let book = load(dir.path());
    book.build(Box::new(renderer)).await.unwrap();

    let preview = cleanup(book.output_dir(), true).await.unwrap();
    // one.pdf, two.pdf, the table of contents and the book
    assert_eq!(preview.files, 4);
    assert!(book.output_dir().exists());

    let done = cleanup(book.output_dir(), false).await.unwrap();
    assert!(done.deleted);
    assert!(!book.output_dir().exists());
    assert!(dir.path().join("docs/one.md").exists());
}
