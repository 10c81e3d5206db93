//! Paragraph-aware content splitting.
//!
//! Text is classified as structured (block markup) or flat, cut into
//! segments that are never divided further, and the segments are grouped
//! into chunks of roughly `target_words` words with a balanced tail.

mod balance;
mod segment;

pub use balance::{plan, split_in_two};
pub use segment::{classify, count_words, Segment, TextKind};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::MIN_TARGET_WORDS;

/// One chunk of source text produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Order of this chunk (0-indexed, contiguous)
    pub index: usize,
    pub text: String,
    pub word_count: usize,
}

/// Splits raw page text into bounded-size chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSplitter;

impl ContentSplitter {
    pub fn new() -> Self {
        Self
    }

    /// Split `text` into chunks of about `target_words` words.
    ///
    /// `target_words` is raised to `MIN_TARGET_WORDS` if smaller. Empty or
    /// wordless input yields no chunks.
    pub fn split(&self, text: &str, target_words: usize) -> Vec<TextChunk> {
        let target = target_words.max(MIN_TARGET_WORDS);
        let kind = classify(text);
        let segments = segment::segments(text, kind, target);

        let total_words: usize = segments.iter().map(|s| s.words).sum();
        if total_words == 0 {
            return Vec::new();
        }

        let weights: Vec<usize> = segments.iter().map(|s| s.words).collect();
        let ranges = plan(&weights, target);

        let chunks: Vec<TextChunk> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let part = &segments[range];
                TextChunk {
                    index,
                    text: segment::join(part, kind),
                    word_count: part.iter().map(|s| s.words).sum(),
                }
            })
            .collect();

        debug!(
            kind = ?kind,
            segments = segments.len(),
            total_words,
            target,
            chunks = chunks.len(),
            "Split content"
        );

        chunks
    }

    /// Count words the same way the splitter does.
    pub fn count_words(&self, text: &str) -> usize {
        count_words(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// `paragraphs` paragraphs of `words` words each, as `<p>` markup.
    fn html(paragraphs: usize, words: usize) -> String {
        (0..paragraphs)
            .map(|p| {
                let body: Vec<String> = (0..words).map(|w| format!("p{}w{}", p, w)).collect();
                format!("<p>{}</p>", body.join(" "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn plain(paragraphs: usize, words: usize) -> String {
        (0..paragraphs)
            .map(|p| {
                (0..words)
                    .map(|w| format!("p{}w{}", p, w))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let splitter = ContentSplitter::new();
        assert!(splitter.split("", 100).is_empty());
        assert!(splitter.split("   \n\t  ", 100).is_empty());
        assert!(splitter.split("<p> </p><br>", 100).is_empty());
    }

    #[test]
    fn test_small_text_is_one_chunk() {
        let splitter = ContentSplitter::new();
        let chunks = splitter.split(&html(4, 20), 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].word_count, 80);
    }

    #[test]
    fn test_between_target_and_double_is_two_even_chunks() {
        // 5,000 words at target 3,200
        let splitter = ContentSplitter::new();
        let chunks = splitter.split(&html(50, 100), 3200);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].word_count, 2500);
        assert_eq!(chunks[1].word_count, 2500);
    }

    #[test]
    fn test_long_text_has_balanced_tail() {
        // 10,000 words at target 3,200
        let splitter = ContentSplitter::new();
        let chunks = splitter.split(&html(100, 100), 3200);
        let counts: Vec<usize> = chunks.iter().map(|c| c.word_count).collect();

        assert_eq!(counts, vec![3200, 3200, 1800, 1800]);
        assert_eq!(counts.iter().sum::<usize>(), 10_000);
    }

    #[test]
    fn test_last_two_chunks_within_one_paragraph() {
        let splitter = ContentSplitter::new();
        // Uneven paragraphs: 37..=99 words
        let text: String = (0..80)
            .map(|p| {
                let words = 37 + (p * 13) % 63;
                let body: Vec<String> = (0..words).map(|w| format!("x{}", w)).collect();
                format!("<p>{}</p>", body.join(" "))
            })
            .collect::<Vec<_>>()
            .join("");
        let chunks = splitter.split(&text, 1000);
        assert!(chunks.len() >= 3);

        let n = chunks.len();
        let diff = chunks[n - 1].word_count.abs_diff(chunks[n - 2].word_count);
        assert!(diff <= 99, "tail chunks differ by {}", diff);
    }

    #[test]
    fn test_indices_are_contiguous() {
        let splitter = ContentSplitter::new();
        let chunks = splitter.split(&plain(40, 60), 200);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.word_count > 0);
        }
    }

    #[test]
    fn test_structured_round_trip_preserves_paragraphs() {
        let splitter = ContentSplitter::new();
        let text = html(30, 45);
        let chunks = splitter.split(&text, 200);
        assert!(chunks.len() > 1);

        let rejoined: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.text.split('\n').map(str::to_string).collect::<Vec<_>>())
            .collect();
        let original: Vec<String> = text.split('\n').map(str::to_string).collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn test_oversized_paragraph_is_kept_whole() {
        let splitter = ContentSplitter::new();
        let chunks = splitter.split(&html(1, 400), 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 400);
    }

    #[test]
    fn test_flat_paragraph_splits_at_word_boundaries() {
        let splitter = ContentSplitter::new();
        let text = plain(1, 150);
        let chunks = splitter.split(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].word_count + chunks[1].word_count, 150);
        assert!(chunks[0].word_count.abs_diff(chunks[1].word_count) <= crate::FLAT_RUN_WORDS);
    }

    #[test]
    fn test_target_is_clamped_to_minimum() {
        let splitter = ContentSplitter::new();
        let chunks = splitter.split(&plain(10, 10), 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.word_count >= 10));
    }
}
