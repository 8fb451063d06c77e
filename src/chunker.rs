//! Token-window chunking of page text for embedding.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::{ChunkingConfig, TokenScheme};
use crate::extractor::PageText;

/// Splits text into token spans (byte ranges into the input).
pub trait Tokenizer: Send + Sync {
    /// Returns the byte range of every token, in order.
    fn spans(&self, text: &str) -> Vec<Range<usize>>;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.spans(text).len()
    }
}

/// Tokens are maximal runs of non-whitespace characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = None;
        for (idx, ch) in text.char_indices() {
            match (ch.is_whitespace(), start) {
                (true, Some(begin)) => {
                    spans.push(begin..idx);
                    start = None;
                }
                (false, None) => start = Some(idx),
                _ => {}
            }
        }
        if let Some(begin) = start {
            spans.push(begin..text.len());
        }
        spans
    }
}

/// Tokens are word runs and individual punctuation marks.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordPunctTokenizer;

fn word_punct_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+|[^\w\s]").expect("static token pattern"))
}

impl Tokenizer for WordPunctTokenizer {
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        word_punct_pattern()
            .find_iter(text)
            .map(|found| found.range())
            .collect()
    }
}

/// Returns the tokenizer for a configured scheme.
pub fn tokenizer_for(scheme: TokenScheme) -> Box<dyn Tokenizer> {
    match scheme {
        TokenScheme::Whitespace => Box::new(WhitespaceTokenizer),
        TokenScheme::WordPunct => Box::new(WordPunctTokenizer),
    }
}

/// A window of page text destined for the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 1-based page the window was cut from.
    pub page: u32,
    /// Window text, sliced verbatim from the page.
    pub text: String,
    /// Tokens in the window.
    pub token_count: usize,
}

/// Windows pages into overlapping chunks of at most `chunk_size` tokens.
pub struct Chunker {
    tokenizer: Box<dyn Tokenizer>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Builds a chunker from validated settings.
    pub fn new(config: &ChunkingConfig) -> Self {
        Self::with_tokenizer(
            tokenizer_for(config.token_scheme),
            config.chunk_size,
            config.chunk_overlap,
        )
    }

    /// Builds a chunker with an explicit tokenizer. Overlap is clamped below `chunk_size`.
    pub fn with_tokenizer(
        tokenizer: Box<dyn Tokenizer>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tokenizer,
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    /// Chunks every page independently; windows never span pages.
    pub fn chunk_pages(&self, pages: &[PageText]) -> Vec<TextChunk> {
        pages
            .iter()
            .flat_map(|page| self.chunk_page(page))
            .collect()
    }

    fn chunk_page(&self, page: &PageText) -> Vec<TextChunk> {
        let spans = self.tokenizer.spans(&page.text);
        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < spans.len() {
            let end = (start + self.chunk_size).min(spans.len());
            let text_range = spans[start].start..spans[end - 1].end;
            chunks.push(TextChunk {
                page: page.number,
                text: page.text[text_range].to_string(),
                token_count: end - start,
            });
            if end == spans.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn whitespace_spans_cover_words() {
        let text = "  alpha\tbeta\n\ngamma ";
        let spans = WhitespaceTokenizer.spans(text);
        let words: Vec<&str> = spans.iter().map(|r| &text[r.clone()]).collect();
        assert_eq!(words, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn word_punct_splits_punctuation() {
        assert_eq!(WordPunctTokenizer.count("Aspirin dosage: 325mg."), 5);
    }

    #[test]
    fn short_page_yields_single_chunk() {
        let chunker = Chunker::with_tokenizer(Box::new(WhitespaceTokenizer), 10, 2);
        let chunks = chunker.chunk_pages(&[page(1, "only three words")]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "only three words");
        assert_eq!(chunks[0].token_count, 3);
    }

    #[test]
    fn empty_page_yields_nothing() {
        let chunker = Chunker::with_tokenizer(Box::new(WhitespaceTokenizer), 10, 2);
        assert!(chunker.chunk_pages(&[page(1, "   \n ")]).is_empty());
    }

    #[test]
    fn consecutive_windows_share_exactly_overlap_tokens() {
        let size = 7;
        let overlap = 3;
        let chunker = Chunker::with_tokenizer(Box::new(WhitespaceTokenizer), size, overlap);
        let chunks = chunker.chunk_pages(&[page(1, &numbered_words(25))]);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let left: Vec<&str> = pair[0].text.split_whitespace().collect();
            let right: Vec<&str> = pair[1].text.split_whitespace().collect();
            assert_eq!(left.len(), size);
            assert_eq!(&left[left.len() - overlap..], &right[..overlap]);
            assert_ne!(left[left.len() - overlap - 1], right[0]);
        }
        let last = chunks.last().expect("chunks");
        assert!(last.text.ends_with("w24"));
    }

    #[test]
    fn windows_never_cross_pages() {
        let chunker = Chunker::with_tokenizer(Box::new(WhitespaceTokenizer), 4, 1);
        let chunks = chunker.chunk_pages(&[page(1, "a b c d e f"), page(2, "x y z")]);
        let pages: Vec<u32> = chunks.iter().map(|c| c.page).collect();
        assert_eq!(pages, vec![1, 1, 2]);
        assert_eq!(chunks[1].text, "d e f");
        assert_eq!(chunks[2].text, "x y z");
        assert!(chunks.iter().all(|c| !(c.text.contains('a') && c.text.contains('x'))));
    }

    #[test]
    fn preserves_inner_whitespace() {
        let chunker = Chunker::with_tokenizer(Box::new(WhitespaceTokenizer), 10, 0);
        let chunks = chunker.chunk_pages(&[page(1, "Aspirin dosage:\n  325mg")]);
        assert_eq!(chunks[0].text, "Aspirin dosage:\n  325mg");
    }
}
