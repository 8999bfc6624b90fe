//! HTML normalization: boilerplate stripping, main-content extraction, and
//! code-block capture.
//!
//! The normalizer walks the picked content root in document order and emits a
//! flat sequence of [`Segment`]s so the chunker can keep code blocks attached
//! to the prose that surrounds them.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use crate::config::DocsmithConfig;
use crate::types::{CodeBlock, DocType};

/// Ordered piece of a normalized page.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Heading { level: u8, text: String },
    Prose(String),
    Code(CodeBlock),
}

/// Cleaned representation of one fetched page.
#[derive(Debug, Clone)]
pub struct NormalizedDoc {
    pub title: String,
    pub doc_type: DocType,
    pub segments: Vec<Segment>,
    /// Total prose characters, used for the minimum-content check.
    pub prose_chars: usize,
}

impl NormalizedDoc {
    pub fn code_blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Code(block) => Some(block),
            _ => None,
        })
    }
}

/// Stateless HTML normalization service.
pub struct Normalizer {
    min_content_chars: usize,
    min_code_block_chars: usize,
    content_roots: Vec<Selector>,
    title: Selector,
    body: Selector,
}

/// Selectors tried in order when locating the main content region.
const CONTENT_ROOT_SELECTORS: &[&str] = &[
    "main",
    "article",
    ".content",
    ".documentation",
    ".docs",
    ".main-content",
    "#content",
    ".page-content",
];

/// Tags whose subtrees never contribute content.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "template", "noscript", "svg", "header", "footer",
];

impl Normalizer {
    pub fn new(config: &DocsmithConfig) -> Self {
        Self {
            min_content_chars: config.min_content_chars,
            min_code_block_chars: config.min_code_block_chars,
            content_roots: CONTENT_ROOT_SELECTORS
                .iter()
                .map(|raw| Selector::parse(raw).expect("static content selector"))
                .collect(),
            title: Selector::parse("title").expect("title selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    /// Normalizes a page, returning `None` when it carries too little prose
    /// to be worth indexing.
    pub fn normalize(&self, url: &Url, html: &str) -> Option<NormalizedDoc> {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| url.to_string());

        let root = self.pick_root(&document)?;

        let mut collector = SegmentCollector::new(self.min_code_block_chars);
        collector.walk(root);
        let (segments, prose_chars) = collector.finish();

        if prose_chars < self.min_content_chars {
            debug!(%url, prose_chars, "skipping page with minimal content");
            return None;
        }

        let doc_type = infer_doc_type(url, &title);

        Some(NormalizedDoc {
            title,
            doc_type,
            segments,
            prose_chars,
        })
    }

    fn pick_root<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        for selector in &self.content_roots {
            if let Some(root) = document.select(selector).next() {
                return Some(root);
            }
        }
        document.select(&self.body).next()
    }
}

/// Infers the coarse page classification from URL path segments, falling back
/// to the page title. Unmatched pages are generic docs.
pub fn infer_doc_type(url: &Url, title: &str) -> DocType {
    let path = url.path().to_lowercase();
    let haystacks = [path.as_str(), &title.to_lowercase()];

    for haystack in haystacks {
        if haystack.contains("api") || haystack.contains("reference") {
            return DocType::Api;
        }
        if haystack.contains("tutorial") {
            return DocType::Tutorial;
        }
        if haystack.contains("guide")
            || haystack.contains("learn")
            || haystack.contains("getting-started")
        {
            return DocType::Guide;
        }
        if haystack.contains("example") {
            return DocType::Example;
        }
    }

    DocType::Docs
}

struct SegmentCollector {
    min_code_block_chars: usize,
    segments: Vec<Segment>,
    prose_buffer: String,
    prose_chars: usize,
}

impl SegmentCollector {
    fn new(min_code_block_chars: usize) -> Self {
        Self {
            min_code_block_chars,
            segments: Vec::new(),
            prose_buffer: String::new(),
            prose_chars: 0,
        }
    }

    fn walk(&mut self, element: ElementRef<'_>) {
        let tag = element.value().name();
        if SKIP_TAGS.contains(&tag) {
            return;
        }

        match tag {
            "pre" => {
                self.record_code(element);
                return;
            }
            "code" => {
                // Standalone code elements of meaningful size count as code
                // blocks; short inline spans stay part of the prose flow.
                let text = preformatted_text(element);
                if text.len() >= self.min_code_block_chars {
                    self.record_code(element);
                } else {
                    self.push_prose(&text);
                }
                return;
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let text = collapse_whitespace(&element.text().collect::<String>());
                if !text.is_empty() {
                    self.flush_prose();
                    let level = tag.as_bytes()[1] - b'0';
                    self.segments.push(Segment::Heading { level, text });
                }
                return;
            }
            _ => {}
        }

        for child in element.children() {
            match child.value() {
                scraper::Node::Text(text) => self.push_prose(&text.text),
                scraper::Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.walk(child_el);
                    }
                }
                _ => {}
            }
        }

        // Block-level elements end the current sentence flow.
        if matches!(tag, "p" | "li" | "div" | "section" | "blockquote" | "td" | "tr") {
            self.prose_buffer.push(' ');
        }
    }

    fn record_code(&mut self, element: ElementRef<'_>) {
        let code = preformatted_text(element);
        if code.len() < self.min_code_block_chars {
            return;
        }
        let language = detect_language(element);
        self.flush_prose();
        self.segments.push(Segment::Code(CodeBlock { language, code }));
    }

    fn push_prose(&mut self, raw: &str) {
        if raw.trim().is_empty() {
            if !self.prose_buffer.ends_with(' ') && !self.prose_buffer.is_empty() {
                self.prose_buffer.push(' ');
            }
            return;
        }
        self.prose_buffer.push_str(raw);
    }

    fn flush_prose(&mut self) {
        let text = collapse_whitespace(&self.prose_buffer);
        self.prose_buffer.clear();
        if text.is_empty() {
            return;
        }
        self.prose_chars += text.len();
        self.segments.push(Segment::Prose(text));
    }

    fn finish(mut self) -> (Vec<Segment>, usize) {
        self.flush_prose();
        (self.segments, self.prose_chars)
    }
}

/// Language tag from `language-*` / `lang-*` classes on the element or a
/// nested `code` child.
fn detect_language(element: ElementRef<'_>) -> Option<String> {
    static LANG_RE: OnceLock<Regex> = OnceLock::new();
    let re = LANG_RE
        .get_or_init(|| Regex::new(r"(?i)\b(?:language|lang)-([a-z0-9_+#-]+)").expect("lang regex"));

    let own = element.value().attr("class").and_then(|classes| {
        re.captures(classes)
            .map(|caps| caps[1].to_lowercase())
    });
    if own.is_some() {
        return own;
    }

    for child in element.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if child_el.value().name() == "code" {
                if let Some(classes) = child_el.value().attr("class") {
                    if let Some(caps) = re.captures(classes) {
                        return Some(caps[1].to_lowercase());
                    }
                }
            }
        }
    }
    None
}

fn preformatted_text(element: ElementRef<'_>) -> String {
    let raw: String = element.text().collect();
    let mut lines: Vec<&str> = raw.lines().map(str::trim_end).collect();
    while lines.first().is_some_and(|line| line.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}
