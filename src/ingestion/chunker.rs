//! Sentence-aware chunking with trailing overlap.
//!
//! Prose is split on sentence boundaries and packed into chunks up to a
//! character budget. Each chunk carries the heading context it appeared
//! under, and code blocks ride along with the chunk whose prose surrounds
//! them, never split across chunks.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::config::DocsmithConfig;
use crate::ingestion::normalizer::{NormalizedDoc, Segment};
use crate::types::{Chunk, CodeBlock, DocType};

pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    pub fn new(config: &DocsmithConfig) -> Self {
        Self {
            max_chars: config.chunk_max_chars,
            overlap_chars: config.chunk_overlap_chars.min(config.chunk_max_chars / 2),
        }
    }

    /// Splits a normalized document into ordered chunks.
    ///
    /// `content_hash` is the source page's body hash; combined with the
    /// document URL and chunk ordinal it makes chunk ids stable across
    /// re-indexing runs of unchanged content.
    pub fn chunk(&self, doc: &NormalizedDoc, document_url: &str, library: &str, content_hash: &str) -> Vec<Chunk> {
        let mut builder = ChunkBuilder::new(
            self.max_chars,
            self.overlap_chars,
            document_url,
            library,
            content_hash,
            doc.doc_type,
            doc.title.clone(),
        );

        for segment in &doc.segments {
            match segment {
                Segment::Heading { text, .. } => builder.enter_heading(text),
                Segment::Prose(text) => builder.push_prose(text),
                Segment::Code(block) => builder.push_code(block.clone()),
            }
        }

        builder.finish()
    }
}

struct ChunkBuilder {
    max_chars: usize,
    overlap_chars: usize,
    document_url: String,
    library: String,
    content_hash: String,
    doc_type: DocType,

    heading: String,
    buffer: String,
    pending_code: Vec<CodeBlock>,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder {
    #[allow(clippy::too_many_arguments)]
    fn new(
        max_chars: usize,
        overlap_chars: usize,
        document_url: &str,
        library: &str,
        content_hash: &str,
        doc_type: DocType,
        initial_heading: String,
    ) -> Self {
        Self {
            max_chars,
            overlap_chars,
            document_url: document_url.to_string(),
            library: library.to_string(),
            content_hash: content_hash.to_string(),
            doc_type,
            heading: initial_heading,
            buffer: String::new(),
            pending_code: Vec::new(),
            chunks: Vec::new(),
        }
    }

    fn enter_heading(&mut self, text: &str) {
        // A heading closes the current chunk and starts a fresh context.
        self.flush(false);
        self.heading = text.to_string();
        self.buffer = text.to_string();
    }

    fn push_prose(&mut self, text: &str) {
        for sentence in split_sentences(text) {
            if self.buffer.len() + sentence.len() + 1 > self.max_chars && !self.buffer.is_empty() {
                self.flush(true);
            }
            if !self.buffer.is_empty() {
                self.buffer.push(' ');
            }
            self.buffer.push_str(sentence);
        }
    }

    fn push_code(&mut self, block: CodeBlock) {
        // An empty buffer means a chunk was just flushed mid-section; the
        // block belongs to that chunk only when it sits under the same
        // heading. Right after a heading the buffer holds the heading text,
        // so the block waits for the upcoming chunk of the new section.
        if self.buffer.trim().is_empty() {
            if let Some(last) = self.chunks.last_mut() {
                if last.heading == self.heading {
                    last.code_blocks.push(block);
                    return;
                }
            }
        }
        self.pending_code.push(block);
    }

    fn flush(&mut self, retain_overlap: bool) {
        let text = self.buffer.trim().to_string();
        if text.is_empty() && self.pending_code.is_empty() {
            self.buffer.clear();
            return;
        }

        if !text.is_empty() || !self.pending_code.is_empty() {
            let ordinal = self.chunks.len();
            let chunk_id = derive_chunk_id(&self.document_url, ordinal, &self.content_hash);
            self.chunks.push(Chunk {
                chunk_id,
                document_url: self.document_url.clone(),
                library: self.library.clone(),
                text,
                heading: self.heading.clone(),
                doc_type: self.doc_type,
                ordinal,
                code_blocks: std::mem::take(&mut self.pending_code),
            });
        }

        let tail = if retain_overlap {
            overlap_tail(&self.buffer, self.overlap_chars)
        } else {
            String::new()
        };
        self.buffer = tail;
    }

    fn finish(mut self) -> Vec<Chunk> {
        // Drop a final buffer that holds nothing beyond repeated overlap
        // unless code is waiting on it.
        if self.buffer.trim().is_empty() && self.pending_code.is_empty() {
            return self.chunks;
        }
        self.flush(false);
        self.chunks
    }
}

/// Deterministic chunk identity. Re-indexing an unchanged page yields the
/// same ids, which makes index writes idempotent.
pub fn derive_chunk_id(document_url: &str, ordinal: usize, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_url.as_bytes());
    hasher.update(b"\n");
    hasher.update(ordinal.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(content_hash.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

/// Sentence boundaries on `.`, `!`, `?`. Trailing text without terminal
/// punctuation still forms a sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    static SENTENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SENTENCE_RE.get_or_init(|| Regex::new(r"[^.!?]+[.!?]*").expect("sentence regex"));
    re.find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Last whole sentences of `text` fitting in `budget` characters, carried
/// into the next chunk for context continuity.
fn overlap_tail(text: &str, budget: usize) -> String {
    if budget == 0 || text.len() <= budget {
        return String::new();
    }
    let sentences = split_sentences(text);
    let mut tail: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for sentence in sentences.iter().rev() {
        if used + sentence.len() + 1 > budget {
            break;
        }
        used += sentence.len() + 1;
        tail.push(sentence);
    }
    tail.reverse();
    tail.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::normalizer::NormalizedDoc;

    fn doc(segments: Vec<Segment>) -> NormalizedDoc {
        NormalizedDoc {
            title: "Test page".to_string(),
            doc_type: DocType::Guide,
            prose_chars: segments
                .iter()
                .map(|s| match s {
                    Segment::Prose(p) => p.len(),
                    _ => 0,
                })
                .sum(),
            segments,
        }
    }

    fn chunker(max: usize, overlap: usize) -> Chunker {
        let mut config = DocsmithConfig::default();
        config.chunk_max_chars = max;
        config.chunk_overlap_chars = overlap;
        Chunker::new(&config)
    }

    #[test]
    fn long_prose_splits_on_sentence_boundaries() {
        let prose = "The first sentence sets the scene for everything after it. \
                     The second sentence carries the argument further along. \
                     The third sentence wraps up the opening movement neatly. \
                     The fourth sentence begins a brand new line of thought."
            .to_string();
        let chunks = chunker(120, 0).chunk(
            &doc(vec![Segment::Prose(prose)]),
            "https://docs.example.com/guide",
            "examplelib",
            "abc123",
        );

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 120 + 1);
            // Chunks end at sentence boundaries.
            assert!(chunk.text.ends_with('.'), "chunk text: {}", chunk.text);
        }
        let ordinals: Vec<_> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn overlap_carries_trailing_sentences() {
        let prose = "Alpha is the first topic here. Beta follows right after alpha. \
                     Gamma closes out this part. Delta opens the next part entirely."
            .to_string();
        let chunks = chunker(70, 40).chunk(
            &doc(vec![Segment::Prose(prose)]),
            "https://docs.example.com/guide",
            "examplelib",
            "abc123",
        );

        assert!(chunks.len() >= 2);
        // Some sentence from the end of chunk N reappears at the start of N+1.
        let first_tail = chunks[0]
            .text
            .rsplit(". ")
            .next()
            .unwrap()
            .trim_end_matches('.');
        assert!(
            chunks[1].text.contains(first_tail),
            "expected overlap '{first_tail}' in '{}'",
            chunks[1].text
        );
    }

    #[test]
    fn headings_reset_context_and_label_chunks() {
        let segments = vec![
            Segment::Heading {
                level: 2,
                text: "Installation".to_string(),
            },
            Segment::Prose("Install the package with your package manager of choice.".to_string()),
            Segment::Heading {
                level: 2,
                text: "Configuration".to_string(),
            },
            Segment::Prose("Configuration lives in a single JSON file at the root.".to_string()),
        ];
        let chunks = chunker(500, 0).chunk(
            &doc(segments),
            "https://docs.example.com/guide",
            "examplelib",
            "abc123",
        );

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading, "Installation");
        assert_eq!(chunks[1].heading, "Configuration");
        assert!(chunks[0].text.contains("package manager"));
    }

    #[test]
    fn code_rides_with_surrounding_prose() {
        let block = CodeBlock {
            language: Some("rust".to_string()),
            code: "let widget = Widget::new();".to_string(),
        };
        let segments = vec![
            Segment::Prose("Construct the widget as shown in the snippet below.".to_string()),
            Segment::Code(block.clone()),
            Segment::Prose("The widget is now ready for configuration.".to_string()),
        ];
        let chunks = chunker(500, 0).chunk(
            &doc(segments),
            "https://docs.example.com/guide",
            "examplelib",
            "abc123",
        );

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].code_blocks, vec![block]);
    }

    #[test]
    fn code_after_heading_belongs_to_the_new_section() {
        let block = CodeBlock {
            language: Some("sh".to_string()),
            code: "cargo add widget".to_string(),
        };
        let segments = vec![
            Segment::Heading {
                level: 2,
                text: "Overview".to_string(),
            },
            Segment::Prose("Widgets wrap the rendering backend behind one handle.".to_string()),
            Segment::Heading {
                level: 2,
                text: "Install".to_string(),
            },
            Segment::Code(block.clone()),
            Segment::Prose("After installing, import the prelude module.".to_string()),
        ];
        let chunks = chunker(500, 0).chunk(
            &doc(segments),
            "https://docs.example.com/guide",
            "examplelib",
            "abc123",
        );

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading, "Overview");
        assert!(chunks[0].code_blocks.is_empty());
        assert_eq!(chunks[1].heading, "Install");
        assert_eq!(chunks[1].code_blocks, vec![block]);
    }

    #[test]
    fn chunk_ids_are_stable_and_content_sensitive() {
        let a = derive_chunk_id("https://docs.example.com/p", 0, "hash1");
        let b = derive_chunk_id("https://docs.example.com/p", 0, "hash1");
        let c = derive_chunk_id("https://docs.example.com/p", 1, "hash1");
        let d = derive_chunk_id("https://docs.example.com/p", 0, "hash2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 32);
    }
}
