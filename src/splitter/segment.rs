//! Paragraph segmentation and word counting.

use lazy_static::lazy_static;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::FLAT_RUN_WORDS;

lazy_static! {
    /// Opening block-level markup. Its presence marks text as structured.
    static ref BLOCK_MARKUP: Regex = Regex::new(
        r"(?i)<\s*(?:p|div|br|h[1-6]|li|blockquote|section|article|pre)\b[^>]*>"
    )
    .unwrap();

    /// Closing block tags. Segments end right after each match.
    static ref BLOCK_CLOSE: Regex = Regex::new(
        r"(?i)</\s*(?:p|div|h[1-6]|li|blockquote|section|article|pre|ul|ol|table|tr)\s*>"
    )
    .unwrap();

    /// Line breaks, used as boundaries when no closing block tags exist.
    static ref LINE_BREAKS: Regex = Regex::new(r"(?i)(?:<\s*br\s*/?\s*>\s*)+").unwrap();

    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref ENTITY: Regex = Regex::new(r"&(?:[a-zA-Z]+|#[0-9]+|#x[0-9a-fA-F]+);").unwrap();
}

/// How a text is split into paragraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    /// Contains block markup; only block boundaries are split points
    Structured,
    /// Plain text; line breaks and word boundaries are split points
    Flat,
}

impl TextKind {
    /// Separator placed between two paragraphs of the same chunk.
    pub fn paragraph_separator(&self) -> &'static str {
        match self {
            TextKind::Structured => "\n",
            TextKind::Flat => "\n\n",
        }
    }
}

/// One indivisible unit of the splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub words: usize,
    /// Continues the previous segment's paragraph (joined with a space)
    pub joins_previous: bool,
}

/// Classify text by sniffing for block markup.
pub fn classify(text: &str) -> TextKind {
    if BLOCK_MARKUP.is_match(text) {
        TextKind::Structured
    } else {
        TextKind::Flat
    }
}

/// Count words, ignoring markup and character entities.
pub fn count_words(text: &str) -> usize {
    if !text.contains('<') && !text.contains('&') {
        return text.unicode_words().count();
    }
    let without_tags = TAG.replace_all(text, " ");
    let without_entities = ENTITY.replace_all(&without_tags, " ");
    without_entities.unicode_words().count()
}

/// Split text into segments according to its kind.
pub fn segments(text: &str, kind: TextKind, target_words: usize) -> Vec<Segment> {
    match kind {
        TextKind::Structured => structured_segments(text),
        TextKind::Flat => flat_segments(text, target_words),
    }
}

/// Block-level segments. A segment ends after a closing block tag, or after
/// a run of `<br>` when the markup has no closing block tags at all.
fn structured_segments(text: &str) -> Vec<Segment> {
    let boundary: &Regex = if BLOCK_CLOSE.is_match(text) {
        &*BLOCK_CLOSE
    } else {
        &*LINE_BREAKS
    };

    let mut segments = Vec::new();
    let mut last = 0;
    for m in boundary.find_iter(text) {
        push_block(&mut segments, &text[last..m.end()]);
        last = m.end();
    }
    push_block(&mut segments, &text[last..]);
    segments
}

fn push_block(segments: &mut Vec<Segment>, raw: &str) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    segments.push(Segment {
        text: trimmed.to_string(),
        words: count_words(trimmed),
        joins_previous: false,
    });
}

/// Line-based segments. Paragraphs longer than the target are broken into
/// runs of `FLAT_RUN_WORDS` words at word boundaries.
fn flat_segments(text: &str, target_words: usize) -> Vec<Segment> {
    let mut segments = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let words = count_words(line);
        if words <= target_words {
            segments.push(Segment {
                text: line.to_string(),
                words,
                joins_previous: false,
            });
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        for (run_index, run) in tokens.chunks(FLAT_RUN_WORDS).enumerate() {
            let run_text = run.join(" ");
            segments.push(Segment {
                words: count_words(&run_text),
                text: run_text,
                joins_previous: run_index > 0,
            });
        }
    }

    segments
}

/// Join segments back into chunk text.
pub fn join(segments: &[Segment], kind: TextKind) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            if segment.joins_previous {
                out.push(' ');
            } else {
                out.push_str(kind.paragraph_separator());
            }
        }
        out.push_str(&segment.text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("<p>Hello there.</p>"), TextKind::Structured);
        assert_eq!(classify("line one<BR/>line two"), TextKind::Structured);
        assert_eq!(classify("a < b and c > d"), TextKind::Flat);
        assert_eq!(classify("plain text\n\nmore text"), TextKind::Flat);
    }

    #[test]
    fn test_count_words_ignores_markup() {
        assert_eq!(count_words("<p>The quick&nbsp;brown fox.</p>"), 4);
        assert_eq!(count_words("  "), 0);
        assert_eq!(count_words("don't stop"), 2);
    }

    #[test]
    fn test_structured_segments_split_after_closing_tags() {
        let text = "<p>One two.</p>\n<p>Three <b>four</b> five.</p><div>Six</div>";
        let segments = segments(text, TextKind::Structured, 100);
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["<p>One two.</p>", "<p>Three <b>four</b> five.</p>", "<div>Six</div>"]
        );
        assert_eq!(segments[1].words, 3);
    }

    #[test]
    fn test_br_boundaries_only_without_closing_tags() {
        let text = "First line<br><br>Second line<br/>Third line";
        let segments = segments(text, TextKind::Structured, 100);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].text, "First line<br><br>");

        let text = "<p>Kept<br>together</p><p>Next</p>";
        let segments = super::segments(text, TextKind::Structured, 100);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "<p>Kept<br>together</p>");
    }

    #[test]
    fn test_flat_long_paragraph_split_at_word_boundaries() {
        let words: Vec<String> = (0..60).map(|i| format!("w{}", i)).collect();
        let text = words.join(" ");
        let segments = segments(&text, TextKind::Flat, 50);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].words, FLAT_RUN_WORDS);
        assert!(!segments[0].joins_previous);
        assert!(segments[1].joins_previous);
        assert_eq!(join(&segments, TextKind::Flat), text);
    }

    #[test]
    fn test_join_uses_kind_separator() {
        let segments = vec![
            Segment { text: "a".into(), words: 1, joins_previous: false },
            Segment { text: "b".into(), words: 1, joins_previous: false },
        ];
        assert_eq!(join(&segments, TextKind::Structured), "a\nb");
        assert_eq!(join(&segments, TextKind::Flat), "a\n\nb");
    }
}
