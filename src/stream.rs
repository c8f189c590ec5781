//! Streaming response consumption
//!
//! Bridges a model reply (incremental deltas or one complete text) and the
//! sentence segmenter, yielding speakable segments in the order they
//! complete. Callers never need to know which shape the reply arrived in.

use tokio::sync::mpsc;

use crate::Result;
use crate::chat::Reply;
use crate::segment::SentenceSegmenter;

/// A completed, speakable unit of reply text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceSegment {
    /// Zero-based position within the turn; doubles as the playback sequence
    /// number downstream.
    pub index: usize,
    /// Sentence text, whitespace preserved.
    pub text: String,
}

/// Pulls deltas from a [`Reply`] and yields completed segments in order.
///
/// When the source signals completion, the unterminated remainder is yielded
/// as one final segment unless it is whitespace-only; afterwards
/// [`next_segment`](Self::next_segment) returns `Ok(None)`. A non-streaming
/// reply is not segmented: the whole text arrives as one final segment, so
/// callers see the same contract either way.
pub struct SentenceStream {
    source: Source,
    segmenter: SentenceSegmenter,
    next_index: usize,
    finished: bool,
}

enum Source {
    Deltas(mpsc::Receiver<Result<String>>),
    Complete(Option<String>),
}

impl SentenceStream {
    /// Wrap a reply in a segment stream.
    #[must_use]
    pub fn new(reply: Reply) -> Self {
        let source = match reply {
            Reply::Stream(rx) => Source::Deltas(rx),
            Reply::Complete(text) => Source::Complete(Some(text)),
        };
        Self {
            source,
            segmenter: SentenceSegmenter::new(),
            next_index: 0,
            finished: false,
        }
    }

    /// Yield the next completed segment, or `Ok(None)` once the source is
    /// exhausted and the remainder has been flushed.
    ///
    /// # Errors
    ///
    /// Returns the first error the delta source reports. The stream is
    /// finished afterwards; buffered text is discarded and further calls
    /// return `Ok(None)`.
    pub async fn next_segment(&mut self) -> Result<Option<SentenceSegment>> {
        if self.finished {
            return Ok(None);
        }

        // Non-streaming providers hand the whole reply over at once; it goes
        // out as a single final segment.
        if let Source::Complete(slot) = &mut self.source {
            self.finished = true;
            let text = slot.take().unwrap_or_default();
            if text.trim().is_empty() {
                return Ok(None);
            }
            return Ok(Some(self.emit(text)));
        }

        loop {
            let Source::Deltas(rx) = &mut self.source else {
                return Ok(None);
            };
            let delta = match rx.recv().await {
                Some(Ok(delta)) => Some(delta),
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => None,
            };

            match delta {
                Some(delta) => {
                    if let Some(text) = self.segmenter.feed(&delta) {
                        return Ok(Some(self.emit(text)));
                    }
                }
                None => {
                    self.finished = true;
                    let remainder = self.segmenter.finish();
                    if remainder.trim().is_empty() {
                        return Ok(None);
                    }
                    tracing::debug!(chars = remainder.len(), "flushing trailing remainder");
                    return Ok(Some(self.emit(remainder)));
                }
            }
        }
    }

    fn emit(&mut self, text: String) -> SentenceSegment {
        let index = self.next_index;
        self.next_index += 1;
        SentenceSegment { index, text }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut stream: SentenceStream) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(seg) = stream.next_segment().await.unwrap() {
            assert_eq!(seg.index, out.len());
            out.push(seg.text);
        }
        out
    }

    fn scripted(deltas: Vec<Result<String>>) -> Reply {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for d in deltas {
                if tx.send(d).await.is_err() {
                    break;
                }
            }
        });
        Reply::Stream(rx)
    }

    #[tokio::test]
    async fn segments_arrive_in_order_with_final_flush() {
        let reply = scripted(vec![
            Ok("One.".into()),
            Ok(" Two".into()),
            Ok("! trailing".into()),
        ]);
        let out = collect(SentenceStream::new(reply)).await;
        assert_eq!(out, vec!["One.", " Two!", " trailing"]);
    }

    #[tokio::test]
    async fn complete_text_without_boundary_is_one_final_segment() {
        let out = collect(SentenceStream::new(Reply::Complete("やあ".into()))).await;
        assert_eq!(out, vec!["やあ"]);
    }

    #[tokio::test]
    async fn complete_text_is_never_split() {
        let out = collect(SentenceStream::new(Reply::Complete(
            "一つ目。二つ目です。".into(),
        )))
        .await;
        assert_eq!(out, vec!["一つ目。二つ目です。"]);
    }

    #[tokio::test]
    async fn whitespace_complete_text_yields_nothing() {
        let out = collect(SentenceStream::new(Reply::Complete("   ".into()))).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn whitespace_remainder_is_discarded() {
        let reply = scripted(vec![Ok("Hi.".into()), Ok("  ".into())]);
        let out = collect(SentenceStream::new(reply)).await;
        assert_eq!(out, vec!["Hi."]);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let out = collect(SentenceStream::new(scripted(vec![]))).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn source_error_terminates_the_stream() {
        let reply = scripted(vec![
            Ok("Fine.".into()),
            Err(crate::Error::RemoteService("boom".into())),
            Ok("Never seen.".into()),
        ]);
        let mut stream = SentenceStream::new(reply);

        let first = stream.next_segment().await.unwrap().unwrap();
        assert_eq!(first.text, "Fine.");

        let err = stream.next_segment().await.unwrap_err();
        assert!(matches!(err, crate::Error::RemoteService(_)));

        // Finished: nothing further, not even the buffered tail.
        assert!(stream.next_segment().await.unwrap().is_none());
    }
}
