//! Chapter collection and page-offset planning.
//!
//! Chapter start pages are planned in two phases. While chapters are
//! placed, each start is relative to the first content page. Once every
//! chapter is known, all starts shift by the front matter (front cover
//! plus the table of contents), which is merged ahead of the content but
//! rendered only after this plan exists.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::manifest::{ChapterSpec, Manifest, SectionRole};
use crate::paths::{list_directory, resolve, IgnoreRules};

/// Pages reserved for the table of contents when shifting chapter starts.
pub const TOC_PAGES: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    pub section: String,
    /// 1-based page in the final book.
    pub page: usize,
    /// PDFs making up the chapter, in reading order.
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct PagePlanner {
    chapters: Vec<ChapterInfo>,
    placed_pages: usize,
}

impl PagePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a chapter after everything placed so far. `members` pairs
    /// each usable PDF with its page count. A chapter without members is
    /// dropped and takes no pages.
    pub fn place(&mut self, section: &str, members: Vec<(PathBuf, usize)>) -> Option<&ChapterInfo> {
        if members.is_empty() {
            warn!("Section \"{}\" has no usable files, skipping", section);
            return None;
        }

        let page = self.placed_pages + 1;
        let mut files = Vec::with_capacity(members.len());
        for (path, pages) in members {
            self.placed_pages += pages;
            files.push(path);
        }
        debug!("Section \"{}\" starts at content page {}", section, page);

        self.chapters.push(ChapterInfo {
            section: section.to_string(),
            page,
            files,
        });
        self.chapters.last()
    }

    /// Content pages placed so far.
    pub fn placed_pages(&self) -> usize {
        self.placed_pages
    }

    /// Shifts every chapter by `front_matter_pages` and returns the final
    /// plan.
    pub fn finish(self, front_matter_pages: usize) -> Vec<ChapterInfo> {
        self.chapters
            .into_iter()
            .map(|mut chapter| {
                chapter.page += front_matter_pages;
                chapter
            })
            .collect()
    }
}

/// Source files of the book, grouped the way they are merged.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BookSources {
    pub front_cover: Vec<PathBuf>,
    pub chapters: Vec<(String, Vec<PathBuf>)>,
    pub back_cover: Vec<PathBuf>,
}

impl BookSources {
    /// Every source, covers included, in manifest order.
    pub fn all_files(&self) -> Vec<PathBuf> {
        self.front_cover
            .iter()
            .chain(self.chapters.iter().flat_map(|(_, files)| files))
            .chain(self.back_cover.iter())
            .cloned()
            .collect()
    }
}

/// Expands one chapter's file and folder references. Files keep their
/// listed order and come before folder contents.
pub fn collect_chapter_files(chapter: &ChapterSpec, root: &Path, rules: &IgnoreRules) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = chapter.files.iter().map(|r| resolve(r, root)).collect();

    for folder in &chapter.folders {
        let dir = resolve(folder.trim_end_matches('/'), root);
        if !dir.is_dir() {
            warn!("Folder not found: {}", dir.display());
            continue;
        }
        files.extend(list_directory(&dir, rules));
    }

    files
}

pub fn collect_sources(manifest: &Manifest, root: &Path, rules: &IgnoreRules) -> BookSources {
    let mut sources = BookSources::default();

    for chapter in &manifest.chapters {
        let files = collect_chapter_files(chapter, root, rules);
        match chapter.role() {
            SectionRole::FrontCover => sources.front_cover = files,
            SectionRole::BackCover => sources.back_cover = files,
            SectionRole::Chapter => sources.chapters.push((chapter.section.clone(), files)),
        }
    }

    sources
}
