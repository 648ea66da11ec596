//! Streaming Sentence Segmenter (C7). Converts a token-by-token model output
//! stream into complete-sentence chunks, independently testable as a pure
//! function from a chunk stream to a sentence stream.

use regex::Regex;
use std::sync::OnceLock;

const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "inc", "ltd", "co", "corp",
    "no", "vol", "fig", "eg", "ie", "u.s", "u.k", "approx", "dept", "est", "gen", "gov", "jan",
    "feb", "mar", "apr", "jun", "jul", "aug", "sep", "sept", "oct", "nov", "dec", "january",
    "february", "march", "april", "june", "july", "august", "september", "october", "november",
    "december",
];

fn boundary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+[ \t]+[A-Z]").unwrap())
}

/// Stateful buffer driving sentence detection across chunk boundaries.
#[derive(Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of streamed text, returning every complete sentence
    /// the new data completes, in source order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut emitted = Vec::new();

        loop {
            let Some(boundary) = self.find_boundary() else {
                break;
            };
            let sentence = self.buffer[..boundary].to_string();
            emitted.push(sentence);
            self.buffer = self.buffer[boundary..].trim_start().to_string();
        }
        emitted
    }

    /// Flush whatever remains as one final sentence (stream end).
    pub fn finish(mut self) -> Option<String> {
        let trimmed = self.buffer.trim_end().to_string();
        self.buffer.clear();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Find the end offset (exclusive, inclusive of the terminal punctuation)
    /// of the first real sentence boundary in the current buffer, skipping
    /// over false positives.
    fn find_boundary(&self) -> Option<usize> {
        let mut search_from = 0usize;
        while let Some(m) = boundary_re().find_at(&self.buffer, search_from) {
            let punct_end = punct_run_end(&self.buffer, m.start());
            if self.is_real_boundary(m.start(), punct_end) {
                return Some(punct_end);
            }
            // Not a real boundary: keep scanning past this match.
            search_from = m.start() + 1;
            if search_from >= self.buffer.len() {
                break;
            }
        }
        None
    }

    fn is_real_boundary(&self, punct_start: usize, punct_end: usize) -> bool {
        let pre = &self.buffer[..punct_start];
        let last_token = trailing_token(pre);
        let punct_run = &self.buffer[punct_start..punct_end];
        let has_strong_punct = punct_run.contains('!') || punct_run.contains('?');

        if is_abbreviation(&last_token) {
            return false;
        }
        if last_token.chars().count() == 1
            && last_token.chars().next().is_some_and(|c| c.is_alphabetic())
        {
            return false;
        }
        if !last_token.is_empty() && last_token.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        if last_token
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_digit())
        {
            return false;
        }
        if ends_list_after_colon(pre) {
            return false;
        }

        let candidate = &self.buffer[..punct_end];
        if candidate.trim().chars().count() < 10 && word_count(candidate) < 2 && !has_strong_punct
        {
            return false;
        }

        true
    }
}

/// Extend past a run of consecutive `.`/`!`/`?` starting at `punct_start`.
fn punct_run_end(buffer: &str, punct_start: usize) -> usize {
    let mut end = punct_start;
    for c in buffer[punct_start..].chars() {
        if c == '.' || c == '!' || c == '?' {
            end += c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// The trailing "word" immediately preceding a boundary: alphanumeric or
/// embedded dots (so `U.S` stays one token), stopping at whitespace.
fn trailing_token(pre: &str) -> String {
    let mut token: Vec<char> = Vec::new();
    for c in pre.chars().rev() {
        if c.is_whitespace() {
            break;
        }
        if c.is_alphanumeric() || c == '.' {
            token.push(c);
        } else {
            break;
        }
    }
    token.reverse();
    token.into_iter().collect()
}

fn is_abbreviation(token: &str) -> bool {
    let lower = token.trim_end_matches('.').to_ascii_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

/// Detects `:\s+\d+$` immediately before the boundary — a numbered list item
/// introduced by a colon, e.g. "Steps: 1." before "Do the thing."
fn ends_list_after_colon(pre: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":[ \t]+\d+$").unwrap())
        .is_match(pre)
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_sentences_fed_char_by_char() {
        let input = "Mr. Smith went. The store was open.";
        let mut seg = SentenceSegmenter::new();
        let mut sentences = Vec::new();
        for c in input.chars() {
            sentences.extend(seg.push(&c.to_string()));
        }
        if let Some(last) = seg.finish() {
            sentences.push(last);
        }
        assert_eq!(
            sentences,
            vec!["Mr. Smith went.".to_string(), "The store was open.".to_string()]
        );
    }

    #[test]
    fn does_not_split_on_initials() {
        let mut seg = SentenceSegmenter::new();
        let mut sentences = seg.push("Contact F. Jones for details. ");
        sentences.extend(seg.push("He will help. "));
        if let Some(last) = seg.finish() {
            sentences.push(last);
        }
        assert_eq!(sentences.len(), 2);
        assert!(sentences[0].starts_with("Contact F. Jones"));
    }

    #[test]
    fn does_not_split_numbered_lists() {
        let mut seg = SentenceSegmenter::new();
        let mut sentences = seg.push("Steps: 1. Open the box. 2. Remove the item.");
        if let Some(last) = seg.finish() {
            sentences.push(last);
        }
        assert!(sentences.len() <= 1, "got {sentences:?}");
    }

    #[test]
    fn flush_emits_remainder_without_trailing_whitespace() {
        let mut seg = SentenceSegmenter::new();
        let emitted = seg.push("An incomplete thought   ");
        assert!(emitted.is_empty());
        assert_eq!(seg.finish(), Some("An incomplete thought".to_string()));
    }

    #[test]
    fn concatenation_round_trips_modulo_trailing_whitespace() {
        let input = "First sentence here. Second one follows! Is this the third?";
        let mut seg = SentenceSegmenter::new();
        let mut sentences = seg.push(input);
        if let Some(last) = seg.finish() {
            sentences.push(last);
        }
        let joined = sentences.join(" ");
        assert_eq!(joined, input.trim_end());
    }
}
