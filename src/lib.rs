//! # bookbuilder
//!
//! Assembles a book from an ordered manifest of markdown and PDF files.
//!
//! Markdown chapters are rendered to PDF through headless Chromium with
//! per-document headers and footers, cached by modification time, and
//! merged behind a generated table of contents with one bookmark per
//! chapter. EPUB, DOCX and HTML exports go through Pandoc.
//!
//! ## Usage
//!
//! ```bash
//! bookbuilder build --order book.json
//! bookbuilder build --order book.json --format epub
//! ```

mod anchors;
mod builder;
mod cache;
mod cleanup;
mod config;
mod converter;
mod export;
mod manifest;
mod markdown;
mod paths;
mod pdf_merger;
mod planner;
mod renderer;
mod template;
mod toc;

pub use anchors::{build_anchor_map, filename_to_anchor, inject_anchor, rewrite_links, AnchorMap};
pub use builder::{Book, BuildOptions, BuildReport};
pub use cache::{needs_conversion, CacheEntry};
pub use cleanup::{cleanup, CleanupReport};
pub use config::{load_config, BookConfig, PageSettings, StyleSettings, TocSettings};
pub use converter::{convert_all, ConversionOutcome, ConversionReport, Converter};
pub use export::OutputFormat;
pub use manifest::{ChapterSpec, Manifest, BACK_COVER, FRONT_COVER};
pub use markdown::{extract_title, process_details_tags, to_html};
pub use paths::{default_output_dir, list_directory, output_pdf_path, resolve, IgnoreRules};
pub use pdf_merger::{merge_book, page_count, PdfMerger};
pub use planner::{ChapterInfo, PagePlanner};
pub use renderer::{ChromeRenderer, PageLayout, PdfRenderer, RenderQueue, RenderRequest};
pub use toc::write_toc;
