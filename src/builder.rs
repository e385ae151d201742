//! The build pipeline: manifest to finished book.

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDate};
use colored::*;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::anchors::build_anchor_map;
use crate::config::{load_config, BookConfig};
use crate::converter::{ConversionOutcome, ConversionReport, Converter};
use crate::export::{export, is_cover_image, resource_paths, OutputFormat, PandocJob};
use crate::manifest::Manifest;
use crate::paths::{default_output_dir, is_markdown, IgnoreRules};
use crate::pdf_merger::{merge_book, page_count};
use crate::planner::{collect_sources, BookSources, ChapterInfo, PagePlanner, TOC_PAGES};
use crate::renderer::PdfRenderer;
use crate::toc::write_toc;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Order file. Relative paths are tried against the working directory,
    /// then the root.
    pub order: PathBuf,
    pub root: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    /// Output file name, overriding the manifest.
    pub output: Option<String>,
    pub format: OutputFormat,
    /// Config file, resolved like `order`.
    pub config: Option<PathBuf>,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub output: PathBuf,
    /// Final chapter plan. Empty for Pandoc exports.
    pub chapters: Vec<ChapterInfo>,
    pub conversion: ConversionReport,
    pub pages: usize,
}

/// A loaded manifest with its resolved configuration and paths.
#[derive(Debug)]
pub struct Book {
    manifest: Manifest,
    config: BookConfig,
    root: PathBuf,
    output_dir: PathBuf,
    output_filename: String,
    title: String,
    author: Option<String>,
    format: OutputFormat,
    force: bool,
    date: NaiveDate,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// `path` as given when absolute or present under the working directory,
/// otherwise joined with `root`.
fn locate(path: &Path, root: &Path) -> Result<PathBuf> {
    if path.is_absolute() || path.exists() {
        absolute(path)
    } else {
        Ok(root.join(path))
    }
}

impl Book {
    /// Loads the manifest and configuration. Any failure here is fatal.
    pub fn load(options: BuildOptions) -> Result<Self> {
        let root = match &options.root {
            Some(root) => absolute(root)?,
            None => std::env::current_dir()?,
        };
        if !root.is_dir() {
            return Err(anyhow!("Root directory does not exist: {}", root.display()));
        }

        let order = locate(&options.order, &root)?;
        info!("Using order file: {}", order.display().to_string().blue());
        let manifest = Manifest::load(&order)?;

        let config_path = match &options.config {
            Some(path) => {
                let path = locate(path, &root)?;
                info!("Using config file: {}", path.display().to_string().blue());
                Some(path)
            }
            None => None,
        };
        let config = BookConfig::resolve(load_config(config_path.as_deref())?, &manifest.overrides)?;

        let output_dir = match &options.output_dir {
            Some(dir) => absolute(dir)?,
            None => default_output_dir(&root),
        };
        info!("Output directory: {}", output_dir.display().to_string().blue());

        let title = manifest
            .book_title
            .clone()
            .unwrap_or_else(|| config.defaults.book_title.clone());
        let author = manifest.author.clone().or_else(|| config.defaults.author.clone());
        let requested = options
            .output
            .clone()
            .or_else(|| manifest.output_filename.clone())
            .unwrap_or_else(|| config.defaults.output_filename.clone());
        let output_filename = Path::new(&requested)
            .with_extension(options.format.extension())
            .to_string_lossy()
            .into_owned();

        Ok(Self {
            manifest,
            config,
            root,
            output_dir,
            output_filename,
            title,
            author,
            format: options.format,
            force: options.force,
            date: Local::now().date_naive(),
        })
    }

    /// Date shown in headers, footers and the table of contents.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = date;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_filename)
    }

    fn sources(&self) -> BookSources {
        let rules = IgnoreRules::from_root(&self.root).exclude(&self.output_dir);
        collect_sources(&self.manifest, &self.root, &rules)
    }

    /// Builds the book in the configured format. `renderer` is only used
    /// for PDF output.
    pub async fn build(&self, renderer: Box<dyn PdfRenderer>) -> Result<BuildReport> {
        match self.format {
            OutputFormat::Pdf => self.build_pdf(renderer).await,
            _ => self.build_export().await,
        }
    }

    pub async fn build_pdf(&self, renderer: Box<dyn PdfRenderer>) -> Result<BuildReport> {
        fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            anyhow!("Failed to create output directory {}: {}", self.output_dir.display(), e)
        })?;

        let sources = self.sources();
        let all_files = sources.all_files();
        info!(
            "Collected {} files for {} sections",
            all_files.len(),
            sources.chapters.len()
        );
        let anchors = build_anchor_map(&all_files, Some(&self.root));
        info!("Built anchor map with {} entries for internal linking", anchors.len());

        let converter = Converter::new(
            renderer,
            self.root.clone(),
            self.output_dir.clone(),
            self.config.clone(),
            self.title.clone(),
        )
        .with_anchors(anchors)
        .with_force(self.force)
        .with_date(self.date);

        let mut report = ConversionReport::default();
        let front_cover = first_cover(&converter, &sources.front_cover, &mut report).await;
        if let Some(cover) = &front_cover {
            info!("Front cover: {}", cover.display().to_string().blue());
        }

        let mut planner = PagePlanner::new();
        for (section, files) in &sources.chapters {
            info!("Section {}", section.green());
            let mut members = Vec::with_capacity(files.len());
            for file in files {
                let outcome = converter.convert_file(file, false).await;
                report.record(&outcome);
                match &outcome {
                    ConversionOutcome::Failed(message) => warn!("{}", message),
                    _ => {
                        if let Some(pdf) = outcome.pdf() {
                            members.push((pdf.to_path_buf(), page_count(pdf)));
                        }
                    }
                }
            }
            planner.place(section, members);
        }

        let back_cover = first_cover(&converter, &sources.back_cover, &mut report).await;
        if let Some(cover) = &back_cover {
            info!("Back cover: {}", cover.display().to_string().blue());
        }

        converter.shutdown().await?;
        report.log_summary();

        let front_pages = front_cover.as_deref().map(page_count).unwrap_or(0);
        let chapters = planner.finish(front_pages + TOC_PAGES);

        let date = self.config.page_settings.format_date(self.date);
        let toc_path = self.output_dir.join(&self.config.defaults.toc_filename);
        let toc_pages = write_toc(&toc_path, &chapters, &self.title, &self.config, &date).await?;
        if toc_pages != TOC_PAGES {
            warn!(
                "Table of contents spans {} pages, page numbers assume {}",
                toc_pages, TOC_PAGES
            );
        }

        let output = self.output_path();
        let pages = merge_book(
            &chapters,
            &output,
            &toc_path,
            front_cover.as_deref(),
            back_cover.as_deref(),
        )
        .await?;

        info!(
            "Book created: {} ({} chapters, {} pages)",
            output.display().to_string().green(),
            chapters.len(),
            pages
        );

        Ok(BuildReport {
            output,
            chapters,
            conversion: report,
            pages,
        })
    }

    /// EPUB, DOCX or HTML through Pandoc, from the chapter markdown files.
    pub async fn build_export(&self) -> Result<BuildReport> {
        let sources = self.sources();
        let markdown: Vec<PathBuf> = sources
            .chapters
            .iter()
            .flat_map(|(_, files)| files)
            .filter(|f| is_markdown(f) && f.is_file())
            .cloned()
            .collect();

        if markdown.is_empty() {
            return Err(anyhow!("No markdown files found to convert"));
        }

        let cover_image = sources
            .front_cover
            .iter()
            .find(|f| is_cover_image(f) && f.is_file())
            .cloned();

        let job = PandocJob {
            resource_paths: resource_paths(&markdown),
            inputs: markdown,
            output: self.output_path(),
            format: self.format,
            title: self.title.clone(),
            author: self.author.clone(),
            cover_image,
        };
        let sources_used = job.inputs.len();
        let output = export(job, &self.config.content_processing.details_tag_handling).await?;

        info!(
            "Book created: {} ({} source files)",
            output.display().to_string().green(),
            sources_used
        );

        Ok(BuildReport {
            output,
            chapters: Vec::new(),
            conversion: ConversionReport::default(),
            pages: 0,
        })
    }
}

/// First cover file that yields a PDF. Markdown covers render full-bleed;
/// images are left for EPUB export.
async fn first_cover(
    converter: &Converter,
    files: &[PathBuf],
    report: &mut ConversionReport,
) -> Option<PathBuf> {
    for file in files.iter().filter(|f| !is_cover_image(f)) {
        let outcome = converter.convert_file(file, true).await;
        report.record(&outcome);
        match outcome {
            ConversionOutcome::Converted(pdf) | ConversionOutcome::Cached(pdf) => return Some(pdf),
            ConversionOutcome::Failed(message) => warn!("Cover skipped: {}", message),
        }
    }
    None
}
