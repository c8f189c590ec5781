//! Sentence segmentation for streaming reply text
//!
//! Model output arrives as arbitrary text fragments. The segmenter buffers
//! them and cuts speakable units at sentence boundaries so synthesis can start
//! before the full reply has arrived.

/// Characters that terminate a speakable sentence.
///
/// Covers ASCII and CJK sentence-ending punctuation plus forced line breaks.
const TERMINALS: [char; 7] = ['。', '！', '？', '.', '!', '?', '\n'];

/// Byte index just past the last terminal character in `text`, if any.
///
/// The *last* boundary is used rather than the first so that several complete
/// sentences accumulated between feeds flush together as one segment.
#[must_use]
pub fn last_boundary(text: &str) -> Option<usize> {
    text.char_indices()
        .filter(|(_, c)| TERMINALS.contains(c))
        .map(|(i, c)| i + c.len_utf8())
        .next_back()
}

/// Cursor-tracking sentence segmenter.
///
/// Feed deltas as they arrive; each feed returns the newly completed segment,
/// if any. Text is consumed exactly once: a returned segment is dropped from
/// the buffer and never re-emitted, and concatenating every returned segment
/// with the final [`finish`](Self::finish) remainder reconstructs the full
/// input byte for byte.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    /// Create an empty segmenter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return the completed segment, if one exists.
    ///
    /// Returns `None` when no boundary is present yet. A candidate segment
    /// that is entirely whitespace is not emitted; its text stays buffered so
    /// it prefixes whatever follows.
    pub fn feed(&mut self, delta: &str) -> Option<String> {
        self.buffer.push_str(delta);

        let end = last_boundary(&self.buffer)?;
        if self.buffer[..end].trim().is_empty() {
            return None;
        }

        let tail = self.buffer.split_off(end);
        let segment = std::mem::replace(&mut self.buffer, tail);
        tracing::trace!(len = segment.len(), "sentence segment complete");
        Some(segment)
    }

    /// Drain and return the unterminated remainder verbatim.
    ///
    /// May be empty or whitespace-only; deciding whether such a remainder is
    /// worth speaking is the consumer's call.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Text buffered but not yet emitted.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
