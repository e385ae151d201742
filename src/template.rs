//! Placeholder substitution and the HTML documents handed to the renderer.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::config::StyleSettings;
use crate::renderer::PageLayout;

/// Placeholders resolved by the page engine at print time.
const PAGE_COUNTERS: [&str; 2] = ["page", "pages"];

/// Values for `{title}`, `{filename}`, `{date}` and `{bookTitle}`.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderContext {
    values: BTreeMap<String, String>,
}

impl PlaceholderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{([A-Za-z]+)\}").expect("placeholder pattern is valid"))
}

/// Substitutes known placeholders. `{page}`, `{pages}` and placeholders
/// without a value are left in place.
pub fn substitute_placeholders(text: &str, context: &PlaceholderContext) -> String {
    placeholder_pattern()
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            if PAGE_COUNTERS.contains(&name) {
                return caps[0].to_string();
            }
            context
                .values
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn counter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{(pages?)\}").expect("counter pattern is valid"))
}

/// Escapes header/footer text and turns `{page}`/`{pages}` into the page
/// engine's live counters.
pub fn counter_markup(text: &str) -> String {
    let mut markup = String::new();
    let mut last = 0;
    for caps in counter_pattern().captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always matches");
        markup.push_str(&escape_html(&text[last..whole.start()]));
        markup.push_str(match &caps[1] {
            "page" => r#"<span class="pageNumber"></span>"#,
            _ => r#"<span class="totalPages"></span>"#,
        });
        last = whole.end();
    }
    markup.push_str(&escape_html(&text[last..]));
    markup
}

fn margin_box_style(style: &StyleSettings, font_size: &str, layout: &PageLayout) -> String {
    format!(
        "<style>.hf {{ width: 100%; display: flex; box-sizing: border-box; \
         padding: 0 {right}in 0 {left}in; font-family: {font}; font-size: {size}; \
         color: {color}; -webkit-print-color-adjust: exact; }} \
         .hf span {{ flex: 1; }} .hf .l {{ text-align: left; }} \
         .hf .c {{ text-align: center; }} .hf .r {{ text-align: right; }}</style>",
        right = layout.margin_right,
        left = layout.margin_left,
        font = style.font_family,
        size = font_size,
        color = style.text_color,
    )
}

/// Header template: one centred line in bold.
pub fn header_template(text: &str, style: &StyleSettings, layout: &PageLayout) -> String {
    format!(
        "{}<div class=\"hf\"><span class=\"c\" style=\"font-weight: bold;\">{}</span></div>",
        margin_box_style(style, &style.header_font_size, layout),
        counter_markup(text)
    )
}

/// Footer template: left, centre and right columns.
pub fn footer_template(
    left: &str,
    center: &str,
    right: &str,
    style: &StyleSettings,
    layout: &PageLayout,
) -> String {
    format!(
        "{}<div class=\"hf\"><span class=\"l\">{}</span><span class=\"c\">{}</span><span class=\"r\">{}</span></div>",
        margin_box_style(style, &style.footer_font_size, layout),
        counter_markup(left),
        counter_markup(center),
        counter_markup(right)
    )
}

/// A complete, styled HTML document around a rendered markdown body.
pub fn html_document(
    title: &str,
    body: &str,
    base_href: Option<&str>,
    style: &StyleSettings,
    layout: &PageLayout,
    full_bleed: bool,
) -> String {
    let base = base_href
        .map(|href| format!("<base href=\"{}\">", escape_html(href)))
        .unwrap_or_default();
    let page_margin = if full_bleed {
        "0".to_string()
    } else {
        format!(
            "{}in {}in {}in {}in",
            layout.margin_top, layout.margin_right, layout.margin_bottom, layout.margin_left
        )
    };
    let body_margin = if full_bleed { "margin: 0;" } else { "" };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
{base}
<title>{title}</title>
<style>
@page {{ size: {width}in {height}in; margin: {page_margin}; }}
body {{ {body_margin} font-family: {font}; font-size: {body_size}; line-height: {line_height}; color: {text_color}; }}
h1, h2, h3, h4, h5, h6 {{ font-family: {heading_font}; font-weight: 600; margin-top: 1.5em; margin-bottom: 0.5em; color: {heading_color}; }}
h1 {{ font-size: 24pt; }}
h2 {{ font-size: 18pt; }}
h3 {{ font-size: 14pt; }}
h4 {{ font-size: 12pt; }}
p {{ margin: 0.8em 0; }}
code, pre, kbd, samp {{ font-family: {code_font}; font-size: {code_size}; }}
code {{ background-color: {code_bg}; padding: 0.2em 0.4em; border-radius: 3px; }}
pre {{ background-color: {code_bg}; padding: 1em; border-radius: 5px; white-space: pre-wrap; line-height: 1.4; }}
pre code {{ background-color: transparent; padding: 0; }}
table {{ border-collapse: collapse; width: 100%; margin: 1em 0; font-size: 10pt; }}
th, td {{ border: 1px solid {border}; padding: 8px; text-align: left; }}
th {{ background-color: {code_bg}; font-weight: 600; }}
tr:nth-child(even) {{ background-color: #fafafa; }}
ul, ol {{ margin: 0.8em 0; padding-left: 2em; }}
li {{ margin: 0.3em 0; }}
blockquote {{ font-style: italic; margin: 1em 0; padding: 0.5em 1em; border-left: 4px solid {border}; color: #666; }}
a {{ color: {link}; text-decoration: none; }}
img {{ max-width: 100%; height: auto; }}
</style>
</head>
<body>
{body}
</body>
</html>
"#,
        base = base,
        title = escape_html(title),
        width = layout.paper_width,
        height = layout.paper_height,
        page_margin = page_margin,
        body_margin = body_margin,
        font = style.font_family,
        body_size = style.body_font_size,
        line_height = style.line_height,
        text_color = style.text_color,
        heading_font = style.heading_font_family,
        heading_color = style.heading_color,
        code_font = style.code_font_family,
        code_size = style.code_font_size,
        code_bg = style.code_background,
        border = style.table_border_color,
        link = style.link_color,
        body = body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PlaceholderContext {
        PlaceholderContext::new()
            .with("title", "Doc Title")
            .with("filename", "document.md")
            .with("date", "2024-01-15")
            .with("bookTitle", "My Awesome Book")
    }

    #[test]
    fn substitutes_known_placeholders() {
        assert_eq!(
            substitute_placeholders("{title} - {filename}", &context()),
            "Doc Title - document.md"
        );
        assert_eq!(substitute_placeholders("{bookTitle}", &context()), "My Awesome Book");
        assert_eq!(
            substitute_placeholders("Generated: {date}", &context()),
            "Generated: 2024-01-15"
        );
    }

    #[test]
    fn page_counters_and_unknowns_survive() {
        let ctx = context().with("page", "1").with("pages", "10");
        assert_eq!(
            substitute_placeholders("Page {page} of {pages}", &ctx),
            "Page {page} of {pages}"
        );
        assert_eq!(
            substitute_placeholders("Title: {author}", &PlaceholderContext::new()),
            "Title: {author}"
        );
        assert_eq!(substitute_placeholders("", &context()), "");
    }

    #[test]
    fn counters_become_live_markup() {
        assert_eq!(
            counter_markup("Page {page} of {pages}"),
            r#"Page <span class="pageNumber"></span> of <span class="totalPages"></span>"#
        );
        assert_eq!(counter_markup("Static & <plain>"), "Static &amp; &lt;plain&gt;");
        assert_eq!(counter_markup(""), "");
    }

    #[test]
    fn footer_has_three_columns() {
        let style = StyleSettings::default();
        let layout = style.page_layout();
        let footer = footer_template("Left", "Page {page}", "Right", &style, &layout);
        assert!(footer.contains(r#"<span class="l">Left</span>"#));
        assert!(footer.contains(r#"<span class="pageNumber"></span>"#));
        assert!(footer.contains(r#"<span class="r">Right</span>"#));
    }

    #[test]
    fn full_bleed_document_has_no_margins() {
        let style = StyleSettings::default();
        let layout = style.page_layout();
        let bleed = html_document("Cover", "<p>x</p>", None, &style, &layout, true);
        assert!(bleed.contains("margin: 0;"));

        let normal = html_document("Doc", "<p>x</p>", Some("file:///tmp/"), &style, &layout, false);
        assert!(normal.contains("margin: 1in 0.8in 1in 0.8in;"));
        assert!(normal.contains(r#"<base href="file:///tmp/">"#));
    }
}
