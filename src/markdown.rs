//! Markdown handling ahead of rendering: title extraction, `<details>`
//! flattening and HTML conversion.

use pulldown_cmark::{html, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use regex::{Captures, Regex};
use scraper::Html;
use slug::slugify;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::config::DetailsHandling;

/// Returns the text of the first level-one heading, either ATX (`# Title`)
/// or Setext (`Title` underlined with `=`). Fenced code is skipped.
pub fn extract_title(markdown: &str) -> Option<String> {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut fence: Option<&str> = None;

    for (index, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if let Some(marker) = fence_marker(trimmed) {
            match fence {
                Some(open) if marker.starts_with(open) => fence = None,
                None => fence = Some(marker),
                _ => {}
            }
            continue;
        }
        if fence.is_some() {
            continue;
        }

        if let Some(title) = atx_title(line) {
            return Some(title.to_string());
        }

        let text = line.trim();
        let underlined = lines
            .get(index + 1)
            .map(|next| next.trim())
            .is_some_and(|next| !next.is_empty() && next.chars().all(|c| c == '='));
        if underlined && !text.is_empty() && !text.starts_with('#') {
            return Some(text.to_string());
        }
    }

    None
}

fn fence_marker(line: &str) -> Option<&str> {
    ["```", "~~~"].into_iter().find(|m| line.starts_with(m))
}

fn atx_title(line: &str) -> Option<&str> {
    let unindented = line.trim_start_matches(' ');
    if line.len() - unindented.len() > 3 {
        return None;
    }
    let rest = unindented.strip_prefix('#')?;
    if !rest.starts_with([' ', '\t']) {
        return None;
    }

    let mut title = rest.trim();
    let without_closing = title.trim_end_matches('#');
    if without_closing.len() != title.len()
        && (without_closing.is_empty() || without_closing.ends_with([' ', '\t']))
    {
        title = without_closing.trim_end();
    }
    (!title.is_empty()).then_some(title)
}

fn details_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?is)<details[^>]*>\s*(?:<summary[^>]*>(?P<summary>.*?)</summary>)?(?P<body>.*?)</details>",
        )
        .expect("details pattern is valid")
    })
}

/// Replaces `<details>` blocks with static markdown when `format` is one of
/// the configured static formats. Interactive formats get the text back
/// unchanged.
pub fn process_details_tags(markdown: &str, format: &str, settings: &DetailsHandling) -> String {
    if !settings.is_static(format) {
        return markdown.to_string();
    }

    let replacement = &settings.static_replacement;
    details_pattern()
        .replace_all(markdown, |caps: &Captures| {
            let summary = caps
                .name("summary")
                .map(|m| strip_html(m.as_str()))
                .unwrap_or_default();
            let body = caps.name("body").map_or("", |m| m.as_str()).trim();

            let mut out = String::from("\n");
            if replacement.add_horizontal_rule {
                out.push_str("---\n\n");
            }
            if replacement.show_summary && !summary.is_empty() {
                out.push_str(&format!("{}**{}**\n\n", replacement.summary_prefix, summary));
            }
            out.push_str(body);
            out.push('\n');
            if replacement.add_horizontal_rule {
                out.push_str("\n---\n");
            }
            out
        })
        .into_owned()
}

fn strip_html(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    let text: String = parsed.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    options
}

struct PendingHeading<'a> {
    level: HeadingLevel,
    id: Option<CowStr<'a>>,
    classes: Vec<CowStr<'a>>,
    attrs: Vec<(CowStr<'a>, Option<CowStr<'a>>)>,
    inner: Vec<Event<'a>>,
    text: String,
}

/// Converts markdown to an HTML fragment. Headings without an explicit
/// `{#id}` get a slug id, suffixed `-1`, `-2`, ... when repeated.
pub fn to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(markdown, options());
    let mut events = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut pending: Option<PendingHeading> = None;

    for event in parser {
        match event {
            Event::Start(Tag::Heading {
                level,
                id,
                classes,
                attrs,
            }) => {
                pending = Some(PendingHeading {
                    level,
                    id,
                    classes,
                    attrs,
                    inner: Vec::new(),
                    text: String::new(),
                });
            }
            Event::End(TagEnd::Heading(level)) => {
                let Some(heading) = pending.take() else {
                    events.push(Event::End(TagEnd::Heading(level)));
                    continue;
                };
                let id = match heading.id {
                    Some(id) => {
                        seen.insert(id.to_string());
                        id
                    }
                    None => CowStr::from(unique_slug(&heading.text, &mut seen)),
                };
                events.push(Event::Start(Tag::Heading {
                    level: heading.level,
                    id: Some(id),
                    classes: heading.classes,
                    attrs: heading.attrs,
                }));
                events.extend(heading.inner);
                events.push(Event::End(TagEnd::Heading(level)));
            }
            other => match pending.as_mut() {
                Some(heading) => {
                    if let Event::Text(text) | Event::Code(text) = &other {
                        heading.text.push_str(text);
                    }
                    heading.inner.push(other);
                }
                None => events.push(other),
            },
        }
    }

    let mut output = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut output, events.into_iter());
    output
}

/// First of `base`, `base-1`, `base-2`, ... not emitted yet. The result is
/// recorded in `seen`.
fn unique_slug(text: &str, seen: &mut HashSet<String>) -> String {
    let mut base = slugify(text);
    if base.is_empty() {
        base = "section".to_string();
    }
    let mut slug = base.clone();
    let mut suffix = 0;
    while seen.contains(&slug) {
        suffix += 1;
        slug = format!("{}-{}", base, suffix);
    }
    seen.insert(slug.clone());
    slug
}
