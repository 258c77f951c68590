//! Sandbox preview bundler
//!
//! Turns a [`VirtualFileSet`] and its [`DependencyMap`] into one
//! self-contained HTML document plus a [`SourceMapIndex`] recording which
//! bundle lines each file contributed.
//!
//! Document layout:
//!
//! ```text
//! <!DOCTYPE html> ... <head>
//!   instrumentation preamble          (unmapped)
//!   one <script src> per dependency   (unmapped)
//!   index.html <head> content         (unmapped)
//! </head><body>
//!   index.html body                   index.html lines 1..n
//!   <style data-lumina-file>          a.css
//!   <script data-lumina-file>         b.js
//!   ...
//! </body></html>
//! ```
//!
//! Each section's opening tag shares a line with the file's first line and
//! its closing tag shares a line with the last, so a file of `n` lines maps
//! to exactly `n` consecutive bundle lines. `index.html` is padded with
//! blank lines up to its `<body>` so bundle lines resolve to its own line
//! numbers. The attributes of its `<html>` and `<body>` tags are carried
//! onto the document's own, and anything after its `</body>` stays in the
//! mapped body section.
//!
//! Bundling is pure: identical input gives byte-identical output.

mod instrument;
mod source_map;

pub use instrument::{preamble, INSTRUMENT_MARKER};
pub use source_map::{ErrorLocator, Range, SourceLocation, SourceMapIndex};

use crate::config::BundlerConfig;
use crate::stream::tag::{scan_tag, Tag, TagScan};
use crate::types::{count_lines, DependencyMap, Language, VirtualFile, VirtualFileSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The file rendered as the document body.
pub const ENTRY_FILE: &str = "index.html";

/// A bundled preview document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOutput {
    pub html: String,
    pub source_map: SourceMapIndex,
}

impl BundleOutput {
    /// SHA-256 over the document and its ranges, for change detection.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.html.as_bytes());
        for range in self.source_map.ranges() {
            hasher.update(
                format!("\n{}:{}:{}", range.start_line, range.end_line, range.file_name).as_bytes(),
            );
        }
        hex::encode(hasher.finalize())
    }

    /// Locator over this bundle's source map.
    pub fn locator(&self) -> ErrorLocator {
        ErrorLocator::new(self.source_map.clone())
    }
}

/// Builds preview documents.
#[derive(Debug, Clone, Default)]
pub struct SandboxBundler {
    config: BundlerConfig,
}

impl SandboxBundler {
    pub fn new(config: BundlerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    /// Bundle `files` with `dependencies` loaded ahead of user code.
    pub fn bundle(&self, files: &VirtualFileSet, dependencies: &DependencyMap) -> BundleOutput {
        let ordered = bundle_order(files);
        let entry = ordered
            .iter()
            .find(|f| f.name == ENTRY_FILE)
            .map(|f| split_entry(&strip_local_references(&f.content, files)));

        let (html_attrs, body_attrs) = entry
            .as_ref()
            .map_or(("", ""), |e| (e.html_attrs.as_str(), e.body_attrs.as_str()));

        let mut doc = DocumentWriter::default();
        doc.line("<!DOCTYPE html>");
        doc.line(&format!("<html{}>", html_attrs));
        doc.line("<head>");
        doc.line("<meta charset=\"utf-8\">");
        doc.line("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">");
        doc.line(&format!("<title>{}</title>", escape_html(&self.config.title)));

        if self.config.instrument {
            doc.line(INSTRUMENT_MARKER);
            doc.line("<script>");
            doc.line(&instrument::preamble());
            doc.line("</script>");
        }
        self.write_dependencies(&mut doc, dependencies);

        if let Some(head) = entry.as_ref().map(|e| e.head.trim()).filter(|h| !h.is_empty()) {
            doc.line(head);
        }
        doc.line("</head>");
        doc.line(&format!("<body{}>", body_attrs));

        let mut ranges = Vec::new();
        for file in &ordered {
            let range = if file.name == ENTRY_FILE {
                entry
                    .as_ref()
                    .and_then(|e| doc.section(&file.name, "", &e.body, ""))
            } else {
                write_file_section(&mut doc, file)
            };
            ranges.extend(range);
        }

        doc.line("</body>");
        doc.line("</html>");

        tracing::debug!(
            files = ordered.len(),
            mapped = ranges.len(),
            dependencies = dependencies.len(),
            bytes = doc.out.len(),
            "Bundle built"
        );

        BundleOutput {
            html: doc.out,
            source_map: SourceMapIndex::from_sorted(ranges),
        }
    }

    fn write_dependencies(&self, doc: &mut DocumentWriter, dependencies: &DependencyMap) {
        if dependencies.is_empty() {
            return;
        }
        if self.config.instrument {
            doc.line(&format!(
                "<script>{}</script>",
                instrument::expect_dependencies(dependencies.len())
            ));
        }
        let handlers = if self.config.instrument {
            instrument::dependency_handlers()
        } else {
            String::new()
        };
        for (name, spec) in dependencies.iter() {
            let url = dependency_url(name, spec, &self.config.cdn_base);
            doc.line(&format!(
                "<script src=\"{}\" data-lumina-dependency=\"{}\"{}></script>",
                escape_html(&url),
                escape_html(name),
                handlers
            ));
        }
    }
}

/// Bundle with the default configuration.
pub fn bundle(files: &VirtualFileSet, dependencies: &DependencyMap) -> BundleOutput {
    SandboxBundler::default().bundle(files, dependencies)
}

/// Script URL for a declared dependency.
///
/// A spec that already is an `http(s)` URL is used verbatim; otherwise the
/// package is fetched from `cdn_base` as `name@version`.
pub fn dependency_url(name: &str, spec: &str, cdn_base: &str) -> String {
    if spec.starts_with("https://") || spec.starts_with("http://") {
        return spec.to_string();
    }
    let encoded: Vec<String> = name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!(
        "{}/{}@{}",
        cdn_base.trim_end_matches('/'),
        encoded.join("/"),
        urlencoding::encode(spec)
    )
}

/// `index.html` first, then every other file by name.
fn bundle_order(files: &VirtualFileSet) -> Vec<&VirtualFile> {
    let mut ordered: Vec<&VirtualFile> = files.iter().collect();
    ordered.sort_by(|a, b| {
        (a.name != ENTRY_FILE)
            .cmp(&(b.name != ENTRY_FILE))
            .then_with(|| a.name.cmp(&b.name))
    });
    ordered
}

fn is_binary_like(content: &str) -> bool {
    content.contains('\0')
}

fn write_file_section(doc: &mut DocumentWriter, file: &VirtualFile) -> Option<Range> {
    if file.content.is_empty() || is_binary_like(&file.content) {
        return None;
    }
    let name = escape_html(&file.name);
    let (open, close, element) = match file.language {
        Language::Css => (format!("<style data-lumina-file=\"{}\">", name), "</style>", "style"),
        Language::JavaScript => (
            format!("<script data-lumina-file=\"{}\">", name),
            "</script>",
            "script",
        ),
        Language::Html => (
            format!("<template data-lumina-file=\"{}\">", name),
            "</template>",
            "template",
        ),
        _ => (
            format!(
                "<script type=\"text/plain\" data-lumina-file=\"{}\" data-language=\"{}\">",
                name, file.language
            ),
            "</script>",
            "script",
        ),
    };
    let body = escape_close_tag(&file.content, element);
    doc.section(&file.name, &open, &body, close)
}

/// The parts of `index.html` that go into the document.
#[derive(Debug, Default)]
struct EntrySections {
    /// Attribute text of `<html ...>`, with a leading space when non-empty
    html_attrs: String,
    /// Inner content of `<head>`
    head: String,
    /// Attribute text of `<body ...>`, with a leading space when non-empty
    body_attrs: String,
    /// Everything after `<body ...>` with the closing body/html tags removed,
    /// preceded by one newline per source line before it
    body: String,
}

fn split_entry(html: &str) -> EntrySections {
    let Some((body_at, body_tag)) = find_open_tag(html, "body") else {
        // A fragment without <body> is all body.
        return EntrySections {
            body: html.to_string(),
            ..EntrySections::default()
        };
    };
    let before_body = &html[..body_at];
    let html_attrs = find_open_tag(before_body, "html")
        .map(|(at, tag)| tag_attributes(before_body, at, &tag))
        .unwrap_or_default();
    let head = find_open_tag(before_body, "head")
        .map(|(at, tag)| {
            let start = at + tag.len;
            let end = before_body[start..]
                .to_ascii_lowercase()
                .rfind("</head")
                .map_or(before_body.len(), |i| start + i);
            before_body[start..end].to_string()
        })
        .unwrap_or_default();

    // Content after </body> still belongs to the page; the browser moves it
    // into the body anyway, so it stays mapped to its own lines.
    let body_start = body_at + body_tag.len;
    let rest = strip_closing_tags(&html[body_start..], &["body", "html"]);
    let body = if rest.trim().is_empty() {
        String::new()
    } else {
        let padding = html[..body_start].matches('\n').count();
        let mut body = "\n".repeat(padding);
        body.push_str(&rest);
        body
    };

    EntrySections {
        html_attrs,
        head,
        body_attrs: tag_attributes(html, body_at, &body_tag),
        body,
    }
}

/// First opening `<name ...>` tag and its byte offset.
fn find_open_tag(html: &str, name: &str) -> Option<(usize, Tag)> {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{}", name);
    let mut from = 0;
    loop {
        let at = from + lower[from..].find(&open)?;
        match scan_tag(&html[at..], html.len() - at) {
            TagScan::Tag(tag) if tag.name == name && !tag.closing => return Some((at, tag)),
            _ => from = at + open.len(),
        }
    }
}

/// Raw attribute text of the tag at `at`, on one line.
fn tag_attributes(html: &str, at: usize, tag: &Tag) -> String {
    let inner = &html[at + 1 + tag.name.len()..at + tag.len - 1];
    let inner = inner.strip_suffix('/').unwrap_or(inner);
    let attrs = inner.trim().replace(['\r', '\n'], " ");
    if attrs.is_empty() {
        attrs
    } else {
        format!(" {}", attrs)
    }
}

/// Drop closing tags named in `names`, keeping any newlines inside them.
fn strip_closing_tags(html: &str, names: &[&str]) -> String {
    let mut out = String::with_capacity(html.len());
    let mut copied = 0;
    let mut pos = 0;

    while let Some(offset) = html[pos..].find("</") {
        let at = pos + offset;
        match scan_tag(&html[at..], html.len() - at) {
            TagScan::Tag(tag) if tag.closing && names.contains(&tag.name.as_str()) => {
                let end = at + tag.len;
                out.push_str(&html[copied..at]);
                out.extend(html[at..end].chars().filter(|c| *c == '\n'));
                copied = end;
                pos = end;
            }
            _ => pos = at + 2,
        }
    }
    out.push_str(&html[copied..]);
    out
}

/// Remove `<script src>` and stylesheet `<link>` tags that point at files of
/// the set; those files are inlined. Newlines inside removed text are kept
/// so line numbers do not move.
fn strip_local_references(html: &str, files: &VirtualFileSet) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut copied = 0;
    let mut pos = 0;

    while let Some(offset) = html[pos..].find('<') {
        let at = pos + offset;
        let TagScan::Tag(tag) = scan_tag(&html[at..], html.len() - at) else {
            pos = at + 1;
            continue;
        };
        let end = match (tag.name.as_str(), tag.closing) {
            ("script", false) if tag.attr("src").is_some_and(|s| is_local_file(s, files)) => {
                let body_from = at + tag.len;
                lower[body_from..]
                    .find("</script")
                    .and_then(|i| html[body_from + i..].find('>').map(|j| body_from + i + j + 1))
                    .unwrap_or(body_from)
            }
            ("link", false)
                if tag
                    .attr("rel")
                    .is_some_and(|r| r.eq_ignore_ascii_case("stylesheet"))
                    && tag.attr("href").is_some_and(|h| is_local_file(h, files)) =>
            {
                at + tag.len
            }
            _ => {
                pos = at + tag.len;
                continue;
            }
        };

        out.push_str(&html[copied..at]);
        out.extend(html[at..end].chars().filter(|c| *c == '\n'));
        copied = end;
        pos = end;
    }
    out.push_str(&html[copied..]);
    out
}

fn is_local_file(reference: &str, files: &VirtualFileSet) -> bool {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let path = path.trim_start_matches("./").trim_start_matches('/');
    files.contains(path)
}

/// Neutralise `</element` inside content so it cannot end its element early.
fn escape_close_tag(content: &str, element: &str) -> String {
    let needle = format!("</{}", element);
    let lower = content.to_ascii_lowercase();
    if !lower.contains(&needle) {
        return content.to_string();
    }
    let replacement = if element == "template" { "&lt;/" } else { "<\\/" };

    let mut out = String::with_capacity(content.len() + 8);
    let mut copied = 0;
    for (at, _) in lower.match_indices(&needle) {
        out.push_str(&content[copied..at]);
        out.push_str(replacement);
        copied = at + 2;
    }
    out.push_str(&content[copied..]);
    out
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Output buffer that knows which line it is on.
struct DocumentWriter {
    out: String,
    /// 1-based number of the line being written
    line: usize,
}

impl Default for DocumentWriter {
    fn default() -> Self {
        Self {
            out: String::new(),
            line: 1,
        }
    }
}

impl DocumentWriter {
    fn push(&mut self, text: &str) {
        self.line += text.bytes().filter(|b| *b == b'\n').count();
        self.out.push_str(text);
    }

    fn line(&mut self, text: &str) {
        self.push(text);
        self.push("\n");
    }

    /// Write `open` + `body` + `close` with `body`'s first and last line
    /// sharing lines with the tags, and return the lines `body` occupies.
    fn section(&mut self, file_name: &str, open: &str, body: &str, close: &str) -> Option<Range> {
        let lines = count_lines(body);
        if lines == 0 {
            return None;
        }
        let body = body.strip_suffix('\n').unwrap_or(body);
        let start_line = self.line;
        self.push(open);
        self.push(body);
        self.push(close);
        self.push("\n");
        Some(Range {
            start_line,
            end_line: start_line + lines - 1,
            file_name: file_name.to_string(),
        })
    }
}
