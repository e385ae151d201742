//! Resolving manifest references to source files, and mapping sources to
//! their place in the output tree.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_OUTPUT_DIR: &str = "bookbuilder-output";

/// Gitignore-style rules, relative to the project root.
#[derive(Clone)]
pub struct IgnoreRules {
    root: PathBuf,
    matcher: Gitignore,
    excluded: Vec<PathBuf>,
}

impl IgnoreRules {
    /// Loads `<root>/.gitignore`. A missing or unreadable file means no rules.
    pub fn from_root(root: &Path) -> Self {
        let gitignore = root.join(".gitignore");
        let mut builder = GitignoreBuilder::new(root);
        if gitignore.is_file() {
            if let Some(e) = builder.add(&gitignore) {
                warn!("Problem reading {}: {}", gitignore.display(), e);
            }
        }
        Self::finish(root, builder)
    }

    pub fn from_patterns<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        for pattern in patterns {
            if let Err(e) = builder.add_line(None, pattern.as_ref()) {
                warn!("Skipping ignore pattern \"{}\": {}", pattern.as_ref(), e);
            }
        }
        Self::finish(root, builder)
    }

    pub fn none(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            matcher: Gitignore::empty(),
            excluded: Vec::new(),
        }
    }

    fn finish(root: &Path, builder: GitignoreBuilder) -> Self {
        let matcher = builder.build().unwrap_or_else(|e| {
            warn!("Ignoring invalid ignore rules: {}", e);
            Gitignore::empty()
        });
        Self {
            root: root.to_path_buf(),
            matcher,
            excluded: Vec::new(),
        }
    }

    /// Also prunes everything below `dir`, e.g. the output tree.
    pub fn exclude(mut self, dir: &Path) -> Self {
        self.excluded.push(dir.to_path_buf());
        self
    }

    /// Paths outside the root are never ignored.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        if self.excluded.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
        match path.strip_prefix(&self.root) {
            Ok(relative) if !relative.as_os_str().is_empty() => self
                .matcher
                .matched_path_or_any_parents(relative, is_dir)
                .is_ignore(),
            _ => false,
        }
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Resolves a manifest reference against the project root.
///
/// Absolute references are returned unchanged. Relative ones are joined
/// with the root; when that does not exist and the reference has no
/// `.md`/`.pdf` suffix, `.md` and then `.pdf` are tried. When nothing
/// exists the root-joined path is returned anyway and the consumer reports
/// the missing file.
pub fn resolve(file_ref: &str, root: &Path) -> PathBuf {
    let reference = Path::new(file_ref);
    if reference.is_absolute() {
        return reference.to_path_buf();
    }

    let joined = root.join(reference);
    if joined.exists() {
        return joined;
    }

    if !file_ref.ends_with(".md") && !file_ref.ends_with(".pdf") {
        for ext in ["md", "pdf"] {
            let candidate = root.join(format!("{}.{}", file_ref, ext));
            if candidate.exists() {
                return candidate;
            }
        }
    }

    joined
}

/// Lists every `.md` and `.pdf` file below `dir`, pruning ignored
/// directories and files, in lexicographic order.
pub fn list_directory(dir: &Path, rules: &IgnoreRules) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    walk(dir, rules, |path| has_extension(path, "md") || has_extension(path, "pdf"))
}

/// Every markdown file under `root`, with the ignore rules applied.
pub fn find_markdown_files(root: &Path, rules: &IgnoreRules) -> Vec<PathBuf> {
    walk(root, rules, |path| has_extension(path, "md"))
}

/// Files below `dir` accepted by `keep`, sorted as plain strings so that
/// `setup.md` comes before `setup/advanced.md`.
fn walk(dir: &Path, rules: &IgnoreRules, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
    let filter = rules.clone();
    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .follow_links(true)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            let ignored = filter.is_ignored(entry.path(), is_dir);
            if ignored {
                debug!("Ignored: {}", entry.path().display());
            }
            !ignored
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_some_and(|t| t.is_file()) && keep(entry.path()) {
                    files.push(entry.into_path());
                }
            }
            Err(e) => warn!("Failed to read below {}: {}", dir.display(), e),
        }
    }
    files.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
    files
}

pub fn default_output_dir(root: &Path) -> PathBuf {
    root.join(DEFAULT_OUTPUT_DIR)
}

/// `<output>/<root-relative dir>/<stem>.pdf`. Sources outside the root
/// keep only their file name.
pub fn output_pdf_path(source: &Path, root: &Path, output_dir: &Path) -> PathBuf {
    let relative = match source.strip_prefix(root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("document")),
    };
    output_dir.join(relative.with_extension("pdf"))
}
