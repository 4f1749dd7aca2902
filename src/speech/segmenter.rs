//! Sentence boundary scanning for streamed replies

use std::sync::LazyLock;

use regex::Regex;

/// A run of non-terminators, one or more terminators, then any whitespace
static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]+\s*").expect("valid regex"));

/// Cuts streamed assistant text into speakable sentences
///
/// Deltas are appended to an undelivered buffer; every complete sentence at
/// its front is handed out exactly once.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text delta and return the sentences it completed
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut segments = Vec::new();
        let mut consumed = 0;
        for m in SENTENCE.find_iter(&self.buffer) {
            // Only a contiguous prefix counts; a gap means a leading terminator
            // run that belongs to the next sentence.
            if m.start() != consumed {
                break;
            }
            consumed = m.end();
            let sentence = m.as_str().trim();
            if !sentence.is_empty() {
                segments.push(sentence.to_string());
            }
        }

        self.buffer.drain(..consumed);
        segments
    }

    /// Return whatever text is left without a sentence terminator
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
