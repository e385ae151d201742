//! Layered book configuration.
//!
//! Built-in defaults are merged with an optional user config file and then
//! with the overrides carried by the manifest itself. Each layer is a JSON
//! object; nested objects merge key by key and everything else is replaced
//! by the later layer.

use anyhow::{anyhow, Context, Result};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::renderer::PageLayout;

const DEFAULT_CONFIG: &str = include_str!("default-config.json");
const FALLBACK_DATE_FORMAT: &str = "%B %d, %Y";

/// Manifest keys that may override the configuration layers.
pub const MANIFEST_OVERRIDE_KEYS: [&str; 4] = [
    "pageSettings",
    "styleSettings",
    "tocSettings",
    "contentProcessing",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookConfig {
    pub page_settings: PageSettings,
    pub style_settings: StyleSettings,
    pub toc_settings: TocSettings,
    pub defaults: Defaults,
    pub content_processing: ContentProcessing,
}

/// Header/footer templates. Any of `{title}`, `{filename}`, `{date}`,
/// `{bookTitle}`, `{page}` and `{pages}` may appear in them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSettings {
    pub header: String,
    pub header_fallback: String,
    pub footer_left: String,
    pub footer_center: String,
    pub footer_right: String,
    pub date_format: String,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            header: "{title}".to_string(),
            header_fallback: "Document".to_string(),
            footer_left: "{date}".to_string(),
            footer_center: "Page {page} of {pages}".to_string(),
            footer_right: "{bookTitle}".to_string(),
            date_format: FALLBACK_DATE_FORMAT.to_string(),
        }
    }
}

impl PageSettings {
    /// Formats `date` with the configured strftime pattern, falling back to
    /// the default pattern when the configured one is malformed.
    pub fn format_date(&self, date: chrono::NaiveDate) -> String {
        let valid = !StrftimeItems::new(&self.date_format).any(|item| matches!(item, Item::Error));
        if valid {
            date.format(&self.date_format).to_string()
        } else {
            tracing::warn!("Invalid dateFormat \"{}\", using default", self.date_format);
            date.format(FALLBACK_DATE_FORMAT).to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleSettings {
    pub page_size: String,
    pub margins: String,
    pub font_family: String,
    pub body_font_size: String,
    pub line_height: String,
    pub text_color: String,
    pub heading_font_family: String,
    pub heading_color: String,
    pub code_font_family: String,
    pub code_font_size: String,
    pub code_background: String,
    pub link_color: String,
    pub table_border_color: String,
    pub header_font_size: String,
    pub footer_font_size: String,
}

impl Default for StyleSettings {
    fn default() -> Self {
        let sans = "\"Helvetica Neue\", Helvetica, Arial, sans-serif".to_string();
        Self {
            page_size: "A4".to_string(),
            margins: "1in 0.8in 1in 0.8in".to_string(),
            font_family: sans.clone(),
            body_font_size: "11pt".to_string(),
            line_height: "1.6".to_string(),
            text_color: "#333333".to_string(),
            heading_font_family: sans,
            heading_color: "#222222".to_string(),
            code_font_family:
                "\"SF Mono\", Monaco, Menlo, Consolas, \"Liberation Mono\", monospace".to_string(),
            code_font_size: "10pt".to_string(),
            code_background: "#f5f5f5".to_string(),
            link_color: "#0066cc".to_string(),
            table_border_color: "#dddddd".to_string(),
            header_font_size: "10px".to_string(),
            footer_font_size: "9px".to_string(),
        }
    }
}

impl StyleSettings {
    /// Paper size and margins in inches, as understood by the renderer.
    pub fn page_layout(&self) -> PageLayout {
        let (paper_width, paper_height) = paper_size(&self.page_size).unwrap_or_else(|| {
            tracing::warn!("Unknown pageSize \"{}\", using A4", self.page_size);
            (8.27, 11.69)
        });
        let [margin_top, margin_right, margin_bottom, margin_left] =
            parse_margins(&self.margins).unwrap_or_else(|| {
                tracing::warn!("Invalid margins \"{}\", using 1in", self.margins);
                [1.0; 4]
            });
        PageLayout {
            paper_width,
            paper_height,
            margin_top,
            margin_right,
            margin_bottom,
            margin_left,
        }
    }
}

/// Width and height in inches for a named paper size.
pub fn paper_size(name: &str) -> Option<(f64, f64)> {
    let size = match name.trim().to_ascii_lowercase().as_str() {
        "a3" => (11.69, 16.54),
        "a4" => (8.27, 11.69),
        "a5" => (5.83, 8.27),
        "letter" => (8.5, 11.0),
        "legal" => (8.5, 14.0),
        "tabloid" => (11.0, 17.0),
        _ => return None,
    };
    Some(size)
}

/// Parses a CSS length (`1in`, `2.5cm`, `20mm`, `72pt`, `96px`) into inches.
pub fn parse_length(value: &str) -> Option<f64> {
    let value = value.trim();
    let split = value
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.trim().parse().ok()?;
    let inches = match unit {
        "in" => number,
        "cm" => number / 2.54,
        "mm" => number / 25.4,
        "pt" => number / 72.0,
        "px" => number / 96.0,
        "" if number == 0.0 => 0.0,
        _ => return None,
    };
    Some(inches)
}

/// Expands CSS margin shorthand into `[top, right, bottom, left]` inches.
pub fn parse_margins(value: &str) -> Option<[f64; 4]> {
    let parts = value
        .split_whitespace()
        .map(parse_length)
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [all] => Some([*all; 4]),
        [vertical, horizontal] => Some([*vertical, *horizontal, *vertical, *horizontal]),
        [top, horizontal, bottom] => Some([*top, *horizontal, *bottom, *horizontal]),
        [top, right, bottom, left] => Some([*top, *right, *bottom, *left]),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TocSettings {
    pub title_font_size: f32,
    pub subtitle_font_size: f32,
    pub subtitle_text: String,
    pub entry_font_size: f32,
    pub footer_font_size: f32,
    pub line_color: String,
    pub entry_color: String,
    pub footer_color: String,
}

impl Default for TocSettings {
    fn default() -> Self {
        Self {
            title_font_size: 24.0,
            subtitle_font_size: 14.0,
            subtitle_text: "Table of Contents".to_string(),
            entry_font_size: 11.0,
            footer_font_size: 9.0,
            line_color: "#0066CC".to_string(),
            entry_color: "#0066CC".to_string(),
            footer_color: "#666666".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Defaults {
    pub book_title: String,
    pub output_filename: String,
    pub toc_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            book_title: "Untitled Book".to_string(),
            output_filename: "book.pdf".to_string(),
            toc_filename: "_toc.pdf".to_string(),
            author: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentProcessing {
    pub details_tag_handling: DetailsHandling,
}

/// Controls how `<details>` blocks are flattened for static formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetailsHandling {
    pub enabled: bool,
    pub static_formats: Vec<String>,
    pub static_replacement: StaticReplacement,
}

impl Default for DetailsHandling {
    fn default() -> Self {
        Self {
            enabled: true,
            static_formats: vec!["pdf".to_string(), "docx".to_string()],
            static_replacement: StaticReplacement::default(),
        }
    }
}

impl DetailsHandling {
    pub fn is_static(&self, format: &str) -> bool {
        self.enabled
            && self
                .static_formats
                .iter()
                .any(|f| f.eq_ignore_ascii_case(format))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticReplacement {
    pub show_summary: bool,
    pub summary_prefix: String,
    pub add_horizontal_rule: bool,
}

impl Default for StaticReplacement {
    fn default() -> Self {
        Self {
            show_summary: true,
            summary_prefix: String::new(),
            add_horizontal_rule: true,
        }
    }
}

/// Recursively merges `overlay` into `base`. Objects merge key by key;
/// any other value in `overlay` replaces the one in `base`.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let nested = value.is_object() && base.get(key).is_some_and(Value::is_object);
                if !nested {
                    base.insert(key.clone(), value.clone());
                } else if let Some(existing) = base.get_mut(key) {
                    deep_merge(existing, value);
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// The embedded default configuration as a JSON value.
pub fn default_config_value() -> Result<Value> {
    serde_json::from_str(DEFAULT_CONFIG).context("Embedded default config is malformed")
}

/// Loads the defaults merged with an optional user config file.
pub fn load_config(user_config: Option<&Path>) -> Result<Value> {
    let mut config = default_config_value()?;

    if let Some(path) = user_config {
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let user: Value = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Invalid JSON in config file {}: {}", path.display(), e))?;
        if !user.is_object() {
            return Err(anyhow!("Config file {} must contain a JSON object", path.display()));
        }
        deep_merge(&mut config, &user);
    }

    Ok(config)
}

impl BookConfig {
    /// Applies the manifest-level overrides and deserializes the result.
    pub fn resolve(mut config: Value, manifest_overrides: &serde_json::Map<String, Value>) -> Result<Self> {
        for key in MANIFEST_OVERRIDE_KEYS {
            if let Some(value) = manifest_overrides.get(key) {
                let mut layer = serde_json::Map::new();
                layer.insert(key.to_string(), value.clone());
                deep_merge(&mut config, &Value::Object(layer));
            }
        }
        serde_json::from_value(config).context("Invalid book configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_defaults_match_code_defaults() {
        let value = default_config_value().unwrap();
        let config: BookConfig = serde_json::from_value(value).unwrap();
        assert_eq!(config, BookConfig::default());
    }

    #[test]
    fn deep_merge_recurses_into_objects() {
        let mut base = json!({"level1": {"a": 1, "b": 2}, "keep": true});
        deep_merge(&mut base, &json!({"level1": {"b": 3, "c": 4}}));
        assert_eq!(base, json!({"level1": {"a": 1, "b": 3, "c": 4}, "keep": true}));
    }

    #[test]
    fn deep_merge_replaces_non_objects() {
        let mut base = json!({"key": {"nested": 1}, "list": [1, 2]});
        deep_merge(&mut base, &json!({"key": "string_value", "list": [3]}));
        assert_eq!(base, json!({"key": "string_value", "list": [3]}));
    }

    #[test]
    fn three_layer_merge_later_layers_win() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("config.json");
        std::fs::write(
            &user,
            r#"{"pageSettings": {"header": "User Header", "footerRight": "User Footer"},
                "styleSettings": {"bodyFontSize": "14pt"}}"#,
        )
        .unwrap();

        let layered = load_config(Some(&user)).unwrap();
        let manifest = json!({"pageSettings": {"header": "Order Header"}});
        let config = BookConfig::resolve(layered, manifest.as_object().unwrap()).unwrap();

        assert_eq!(config.page_settings.header, "Order Header");
        assert_eq!(config.page_settings.footer_right, "User Footer");
        assert_eq!(config.style_settings.body_font_size, "14pt");
        assert_eq!(config.style_settings.page_size, "A4");
    }

    #[test]
    fn malformed_user_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("config.json");
        std::fs::write(&user, "{ not json").unwrap();
        assert!(load_config(Some(&user)).is_err());
    }

    #[test]
    fn margins_expand_like_css() {
        assert_eq!(parse_margins("1in"), Some([1.0; 4]));
        assert_eq!(parse_margins("1in 0.5in"), Some([1.0, 0.5, 1.0, 0.5]));
        assert_eq!(parse_margins("72pt 0 0 96px"), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(parse_margins("1in 2furlongs"), None);
    }

    #[test]
    fn layout_uses_named_paper_size() {
        let style = StyleSettings {
            page_size: "Letter".to_string(),
            margins: "1in 0.8in".to_string(),
            ..Default::default()
        };
        let layout = style.page_layout();
        assert_eq!((layout.paper_width, layout.paper_height), (8.5, 11.0));
        assert_eq!(layout.margin_left, 0.8);
    }

    #[test]
    fn invalid_date_format_falls_back() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let mut settings = PageSettings {
            date_format: "%Y-%m-%d".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.format_date(date), "2024-01-15");

        settings.date_format = "%Q".to_string();
        assert_eq!(settings.format_date(date), "January 15, 2024");
    }
}
