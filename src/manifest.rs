//! The ordered book manifest ("order file").

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

pub const FRONT_COVER: &str = "Front Cover";
pub const BACK_COVER: &str = "Back Cover";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub book_title: Option<String>,
    pub output_filename: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterSpec>,
    /// `pageSettings`, `styleSettings`, `tocSettings`, `contentProcessing`
    /// and anything else not modelled above.
    #[serde(flatten)]
    pub overrides: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChapterSpec {
    #[serde(default = "default_section")]
    pub section: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
}

fn default_section() -> String {
    "Untitled Section".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRole {
    FrontCover,
    BackCover,
    Chapter,
}

impl ChapterSpec {
    pub fn role(&self) -> SectionRole {
        match self.section.as_str() {
            FRONT_COVER => SectionRole::FrontCover,
            BACK_COVER => SectionRole::BackCover,
            _ => SectionRole::Chapter,
        }
    }
}

impl Manifest {
    /// Reads and parses a manifest. A missing file or malformed JSON is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read order file {}: {}", path.display(), e))?;
        Self::parse(&data).map_err(|e| anyhow!("Invalid order file {}: {}", path.display(), e))
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}
