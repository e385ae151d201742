//! Cross-document anchors.
//!
//! Every markdown source in the book gets one anchor id derived from its
//! file name. Links between sources are rewritten to `#anchor` and each
//! rendered document starts with an element carrying its own anchor, so the
//! merged book can be navigated internally.
//!
//! The id depends on the file name alone: `a/intro.md` and `b/intro.md`
//! share the anchor `intro`. Book output relies on this, so collisions are
//! kept rather than disambiguated.
//!
//! Non-ASCII letters are transliterated before the hyphen collapse, so
//! `Café.md` anchors as `cafe` and `Übersicht.md` as `ubersicht`.

use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};
use slug::slugify;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use crate::paths::is_markdown;

/// Maps every textual form of a source (file name, stem, `%20`-encoded
/// variants, root-relative path) to its anchor id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorMap {
    entries: BTreeMap<String, String>,
}

impl AnchorMap {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn register(&mut self, key: String, anchor: &str) {
        self.entries.insert(key, anchor.to_string());
    }
}

/// Lowercased file stem with every run of non-alphanumerics collapsed to a
/// single hyphen, trimmed of leading and trailing hyphens. Percent-encoded
/// names decode first, so `my%20chapter.md` and `My Chapter.md` agree.
/// Non-ASCII letters are transliterated to ASCII.
pub fn filename_to_anchor(filename: &str) -> String {
    let decoded = percent_decode_str(filename).decode_utf8_lossy();
    let name = decoded.rsplit(['/', '\\']).next().unwrap_or(&decoded);
    let stem = strip_md_extension(name);
    slugify(stem)
}

fn strip_md_extension(name: &str) -> &str {
    match name.len().checked_sub(3) {
        Some(split) if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(".md") => {
            &name[..split]
        }
        _ => name,
    }
}

/// Builds the anchor map for every markdown file in `files`. Other entries
/// are ignored.
pub fn build_anchor_map<P: AsRef<Path>>(files: &[P], root: Option<&Path>) -> AnchorMap {
    let mut map = AnchorMap::default();

    for file in files {
        let file = file.as_ref();
        if !is_markdown(file) {
            continue;
        }
        let Some(filename) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let anchor = filename_to_anchor(filename);
        let stem = strip_md_extension(filename);

        map.register(filename.to_string(), &anchor);
        map.register(stem.to_string(), &anchor);
        map.register(filename.replace(' ', "%20"), &anchor);
        map.register(stem.replace(' ', "%20"), &anchor);

        if let Some(relative) = root.and_then(|root| file.strip_prefix(root).ok()) {
            let relative = relative.to_string_lossy().replace('\\', "/");
            map.register(relative, &anchor);
        }
    }

    map
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\[(?P<text>[^\]]*)\]\((?P<target>[^)\s]+)(?P<title>\s+[^)]*)?\)"#)
            .expect("link pattern is valid")
    })
}

fn scheme_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:").expect("scheme pattern is valid"))
}

/// Rewrites inline links to other book sources into `#anchor` links.
///
/// URIs, fragment-only links and anything whose path does not end in
/// `.md` are left alone. A `.md` link with no entry in the map is kept as
/// written.
pub fn rewrite_links(markdown: &str, anchors: &AnchorMap) -> String {
    link_pattern()
        .replace_all(markdown, |caps: &Captures| {
            let target = &caps["target"];
            match lookup_target(target, anchors) {
                Some(anchor) => format!(
                    "[{}](#{}{})",
                    &caps["text"],
                    anchor,
                    caps.name("title").map_or("", |m| m.as_str())
                ),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn lookup_target<'a>(target: &str, anchors: &'a AnchorMap) -> Option<&'a str> {
    if target.starts_with('#') || scheme_pattern().is_match(target) {
        return None;
    }

    let path = target.split(['#', '?']).next().unwrap_or(target);
    if !path.ends_with(".md") {
        return None;
    }

    let basename = path.rsplit('/').next().unwrap_or(path);
    let decoded_basename = percent_decode_str(basename).decode_utf8_lossy();
    let decoded_path = percent_decode_str(path).decode_utf8_lossy();

    let found = [basename, &*decoded_basename, path, &*decoded_path]
        .into_iter()
        .find_map(|key| anchors.get(key));
    found
}

/// Prepends an empty anchor element so the document can be jumped to
/// regardless of its own headings.
pub fn inject_anchor(html_body: &str, anchor: &str) -> String {
    format!("<a id=\"{}\" class=\"document-anchor\"></a>\n{}", anchor, html_body)
}
