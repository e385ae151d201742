//! Markdown to PDF conversion with caching.

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate};
use colored::*;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::anchors::{build_anchor_map, filename_to_anchor, inject_anchor, rewrite_links, AnchorMap};
use crate::cache::needs_conversion;
use crate::config::BookConfig;
use crate::markdown::{extract_title, process_details_tags, to_html};
use crate::paths::{find_markdown_files, is_markdown, is_pdf, output_pdf_path, IgnoreRules};
use crate::renderer::{PdfRenderer, RenderQueue, RenderRequest};
use crate::template::{
    footer_template, header_template, html_document, substitute_placeholders, PlaceholderContext,
};

/// What happened to one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Freshly rendered to this PDF.
    Converted(PathBuf),
    /// Existing PDF reused: a cache hit, or a PDF source passed through.
    Cached(PathBuf),
    Failed(String),
}

impl ConversionOutcome {
    pub fn pdf(&self) -> Option<&Path> {
        match self {
            Self::Converted(path) | Self::Cached(path) => Some(path),
            Self::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub converted: usize,
    pub cached: usize,
    pub failed: usize,
}

impl ConversionReport {
    pub fn record(&mut self, outcome: &ConversionOutcome) {
        match outcome {
            ConversionOutcome::Converted(_) => self.converted += 1,
            ConversionOutcome::Cached(_) => self.cached += 1,
            ConversionOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Conversion summary: {} converted, {} cached, {} failed",
            self.converted.to_string().green(),
            self.cached.to_string().blue(),
            if self.failed > 0 {
                self.failed.to_string().red()
            } else {
                self.failed.to_string().normal()
            }
        );
    }
}

/// Converts markdown sources into the output tree, one render at a time.
pub struct Converter {
    queue: RenderQueue,
    root: PathBuf,
    output_dir: PathBuf,
    config: BookConfig,
    book_title: String,
    anchors: AnchorMap,
    force: bool,
    date: String,
}

impl Converter {
    pub fn new(
        renderer: Box<dyn PdfRenderer>,
        root: PathBuf,
        output_dir: PathBuf,
        config: BookConfig,
        book_title: String,
    ) -> Self {
        let date = config.page_settings.format_date(Local::now().date_naive());
        Self {
            queue: RenderQueue::spawn(renderer),
            root,
            output_dir,
            config,
            book_title,
            anchors: AnchorMap::default(),
            force: false,
            date,
        }
    }

    pub fn with_anchors(mut self, anchors: AnchorMap) -> Self {
        self.anchors = anchors;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = self.config.page_settings.format_date(date);
        self
    }

    /// Converts one source. Markdown goes through the cache and renderer,
    /// PDFs pass through when present. Errors are folded into
    /// [`ConversionOutcome::Failed`].
    pub async fn convert_file(&self, source: &Path, full_bleed: bool) -> ConversionOutcome {
        if !source.is_file() {
            return ConversionOutcome::Failed(format!("File not found: {}", source.display()));
        }

        if is_pdf(source) {
            return ConversionOutcome::Cached(source.to_path_buf());
        }

        if !is_markdown(source) {
            return ConversionOutcome::Failed(format!(
                "Unsupported file type: {}",
                source.display()
            ));
        }

        let pdf = output_pdf_path(source, &self.root, &self.output_dir);
        match self.render(source, &pdf, full_bleed).await {
            Ok(outcome) => outcome,
            Err(e) => ConversionOutcome::Failed(format!("{:#}", e)),
        }
    }

    /// Renders `markdown` into `pdf` unless the cached PDF is still fresh.
    pub async fn render(&self, markdown: &Path, pdf: &Path, full_bleed: bool) -> Result<ConversionOutcome> {
        if !needs_conversion(markdown, pdf, self.force) {
            debug!("Using cached {}", pdf.display());
            return Ok(ConversionOutcome::Cached(pdf.to_path_buf()));
        }

        info!(
            "Converting {} -> {}",
            markdown.display().to_string().blue(),
            pdf.display().to_string().blue()
        );

        let source = fs::read_to_string(markdown)
            .await
            .map_err(|e| anyhow!("Failed to read {}: {}", markdown.display(), e))?;

        let request = self.prepare(markdown, &source, pdf, full_bleed);

        if let Some(parent) = pdf.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow!("Failed to create directory {}: {}", parent.display(), e))?;
        }

        self.queue.render(request).await?;
        Ok(ConversionOutcome::Converted(pdf.to_path_buf()))
    }

    fn prepare(&self, markdown: &Path, source: &str, pdf: &Path, full_bleed: bool) -> RenderRequest {
        let page_settings = &self.config.page_settings;
        let style = &self.config.style_settings;

        let content = process_details_tags(
            source,
            "pdf",
            &self.config.content_processing.details_tag_handling,
        );
        let content = rewrite_links(&content, &self.anchors);

        let title = extract_title(&content).unwrap_or_else(|| page_settings.header_fallback.clone());
        let filename = markdown
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let context = PlaceholderContext::new()
            .with("title", title.clone())
            .with("filename", filename.clone())
            .with("date", self.date.clone())
            .with("bookTitle", self.book_title.clone());

        let body = inject_anchor(&to_html(&content), &filename_to_anchor(&filename));
        let base_dir = markdown
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let base_href = Url::from_directory_path(&base_dir).ok().map(String::from);

        let page_layout = style.page_layout();
        let (layout, header, footer) = if full_bleed {
            (page_layout.full_bleed(), None, None)
        } else {
            let header = header_template(
                &substitute_placeholders(&page_settings.header, &context),
                style,
                &page_layout,
            );
            let footer = footer_template(
                &substitute_placeholders(&page_settings.footer_left, &context),
                &substitute_placeholders(&page_settings.footer_center, &context),
                &substitute_placeholders(&page_settings.footer_right, &context),
                style,
                &page_layout,
            );
            (page_layout, Some(header), Some(footer))
        };

        RenderRequest {
            html: html_document(&title, &body, base_href.as_deref(), style, &layout, full_bleed),
            base_dir,
            output: pdf.to_path_buf(),
            layout,
            header_template: header,
            footer_template: footer,
        }
    }

    /// Converts `files` in order. Renders are serialized by the queue, so
    /// `max_workers` does not change how many run at once.
    pub async fn convert_files(
        &self,
        files: &[PathBuf],
        max_workers: usize,
    ) -> (Vec<(PathBuf, ConversionOutcome)>, ConversionReport) {
        debug!("Converting {} files (max_workers={}, sequential)", files.len(), max_workers);

        let mut report = ConversionReport::default();
        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let outcome = self.convert_file(file, false).await;
            if let ConversionOutcome::Failed(message) = &outcome {
                warn!("{}", message.red());
            }
            report.record(&outcome);
            outcomes.push((file.clone(), outcome));
        }
        (outcomes, report)
    }

    /// Stops the renderer once all queued renders are done.
    pub async fn shutdown(self) -> Result<()> {
        self.queue.shutdown().await
    }
}

/// Converts every markdown file under `root` into `output_dir`.
pub async fn convert_all(
    renderer: Box<dyn PdfRenderer>,
    root: &Path,
    output_dir: &Path,
    config: BookConfig,
    force: bool,
) -> Result<ConversionReport> {
    let rules = IgnoreRules::from_root(root).exclude(output_dir);

    let files = find_markdown_files(root, &rules);
    if files.is_empty() {
        warn!("No markdown files found in {}", root.display());
        return Ok(ConversionReport::default());
    }
    info!("Found {} markdown files", files.len());

    let book_title = config.defaults.book_title.clone();
    let converter = Converter::new(
        renderer,
        root.to_path_buf(),
        output_dir.to_path_buf(),
        config,
        book_title,
    )
    .with_anchors(build_anchor_map(&files, Some(root)))
    .with_force(force);

    let (_, report) = converter.convert_files(&files, 1).await;
    converter.shutdown().await?;
    report.log_summary();
    Ok(report)
}
