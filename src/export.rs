//! EPUB, DOCX and HTML output through Pandoc.

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use colored::*;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DetailsHandling;
use crate::markdown::process_details_tags;

const PANDOC_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Pdf,
    Epub,
    Docx,
    Html,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Epub => "epub",
            OutputFormat::Docx => "docx",
            OutputFormat::Html => "html",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    pub fn requires_pandoc(self) -> bool {
        self != OutputFormat::Pdf
    }
}

/// One Pandoc invocation.
#[derive(Debug, Clone)]
pub struct PandocJob {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub title: String,
    pub author: Option<String>,
    pub cover_image: Option<PathBuf>,
    pub resource_paths: Vec<PathBuf>,
}

impl PandocJob {
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.inputs.iter().map(|p| p.clone().into_os_string()).collect();
        args.push("-o".into());
        args.push(self.output.clone().into_os_string());
        args.push("--standalone".into());

        if !self.resource_paths.is_empty() {
            if let Ok(joined) = std::env::join_paths(&self.resource_paths) {
                args.push("--resource-path".into());
                args.push(joined);
            }
        }

        args.push("--toc".into());
        args.push("--metadata".into());
        args.push(format!("title={}", self.title).into());
        if let Some(author) = &self.author {
            args.push("--metadata".into());
            args.push(format!("author={}", author).into());
        }

        if self.format == OutputFormat::Epub {
            if let Some(cover) = self.cover_image.as_ref().filter(|c| c.is_file()) {
                args.push("--epub-cover-image".into());
                args.push(cover.clone().into_os_string());
            }
        }

        args
    }
}

/// Unique parent directories of the existing inputs, in first-seen order.
pub fn resource_paths(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for input in inputs.iter().filter(|p| p.exists()) {
        if let Some(dir) = input.parent() {
            if !dirs.iter().any(|d| d == dir) {
                dirs.push(dir.to_path_buf());
            }
        }
    }
    dirs
}

pub fn is_cover_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
}

pub async fn pandoc_available() -> bool {
    Command::new("pandoc")
        .arg("--version")
        .output()
        .await
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Runs Pandoc for `job`. For static formats the inputs are first copied
/// into a temporary directory with `<details>` blocks flattened.
pub async fn export(mut job: PandocJob, details: &DetailsHandling) -> Result<PathBuf> {
    if !pandoc_available().await {
        return Err(anyhow!(
            "Pandoc is not installed. Install it from https://pandoc.org/installing.html"
        ));
    }

    if let Some(parent) = job.output.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| anyhow!("Failed to create directory {}: {}", parent.display(), e))?;
    }

    let format = job.format.as_str();
    let _staging = if details.is_static(format) {
        let staging = tempfile::Builder::new()
            .prefix("bookbuilder_")
            .tempdir()
            .context("Failed to create staging directory")?;
        job.inputs = stage_inputs(&job.inputs, staging.path(), format, details).await?;
        Some(staging)
    } else {
        None
    };

    info!(
        "Building {} with Pandoc from {} files",
        format.to_uppercase(),
        job.inputs.len()
    );
    let args = job.args();
    debug!("pandoc {:?}", args);

    let run = Command::new("pandoc").args(&args).kill_on_drop(true).output();
    let output = tokio::time::timeout(PANDOC_TIMEOUT, run)
        .await
        .map_err(|_| anyhow!("Pandoc conversion timed out"))?
        .context("Failed to run pandoc")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.trim().is_empty() {
            "Unknown Pandoc error".to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(anyhow!("Pandoc conversion failed: {}", message));
    }
    if !job.output.is_file() {
        return Err(anyhow!("Output file was not created: {}", job.output.display()));
    }

    info!("Created {}", job.output.display().to_string().green());
    Ok(job.output)
}

async fn stage_inputs(
    inputs: &[PathBuf],
    staging: &Path,
    format: &str,
    details: &DetailsHandling,
) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.iter().enumerate() {
        let content = fs::read_to_string(input)
            .await
            .map_err(|e| anyhow!("Failed to read {}: {}", input.display(), e))?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.md".to_string());
        let target = staging.join(format!("{:03}-{}", index, name));
        fs::write(&target, process_details_tags(&content, format, details))
            .await
            .map_err(|e| anyhow!("Failed to write {}: {}", target.display(), e))?;
        staged.push(target);
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(format: OutputFormat, cover: Option<PathBuf>) -> PandocJob {
        PandocJob {
            inputs: vec![PathBuf::from("/book/a.md"), PathBuf::from("/book/b.md")],
            output: PathBuf::from("/out/book.epub"),
            format,
            title: "Test Book".to_string(),
            author: Some("Jane Doe".to_string()),
            cover_image: cover,
            resource_paths: vec![PathBuf::from("/book")],
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn args_follow_input_order_and_metadata() {
        let args = strings(job(OutputFormat::Docx, None).args());
        assert_eq!(&args[..4], ["/book/a.md", "/book/b.md", "-o", "/out/book.epub"]);
        for expected in ["--standalone", "--toc", "title=Test Book", "author=Jane Doe", "/book"] {
            assert!(args.iter().any(|a| a == expected), "missing {expected}");
        }
        assert!(!args.iter().any(|a| a == "--epub-cover-image"));
    }

    #[test]
    fn epub_cover_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let cover = dir.path().join("cover.png");
        std::fs::write(&cover, b"png").unwrap();

        let args = strings(job(OutputFormat::Epub, Some(cover.clone())).args());
        let at = args.iter().position(|a| a == "--epub-cover-image").unwrap();
        assert_eq!(args[at + 1], cover.to_string_lossy());

        let missing = strings(job(OutputFormat::Epub, Some(dir.path().join("gone.png"))).args());
        assert!(!missing.iter().any(|a| a == "--epub-cover-image"));
    }

    #[test]
    fn resource_paths_are_unique_existing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ch1")).unwrap();
        let a = dir.path().join("ch1/a.md");
        let b = dir.path().join("ch1/b.md");
        let c = dir.path().join("c.md");
        for p in [&a, &b, &c] {
            std::fs::write(p, "#").unwrap();
        }
        let ghost = dir.path().join("ghost/d.md");
        assert_eq!(
            resource_paths(&[a, b, c, ghost]),
            vec![dir.path().join("ch1"), dir.path().to_path_buf()]
        );
    }

    #[test]
    fn cover_images_and_formats() {
        assert!(is_cover_image(Path::new("cover.JPG")));
        assert!(is_cover_image(Path::new("cover.png")));
        assert!(!is_cover_image(Path::new("cover.pdf")));
        assert_eq!(OutputFormat::default(), OutputFormat::Pdf);
        assert!(OutputFormat::Html.requires_pandoc());
        assert!(!OutputFormat::Pdf.requires_pandoc());
    }

    #[tokio::test]
    async fn staging_flattens_details_for_docx() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("q.md");
        std::fs::write(&input, "<details><summary>Answer</summary>42</details>").unwrap();
        let staging = tempfile::tempdir().unwrap();

        let staged = stage_inputs(&[input], staging.path(), "docx", &DetailsHandling::default())
            .await
            .unwrap();
        assert_eq!(staged[0].file_name().unwrap(), "000-q.md");
        let text = std::fs::read_to_string(&staged[0]).unwrap();
        assert!(!text.contains("<details>"));
        assert!(text.contains("**Answer**"));
    }
}
