//! Strictly ordered playback of synthesized sentences
//!
//! Synthesis runs pipelined, playback runs serial: an item's slot in the
//! queue is fixed the moment it is enqueued, and slots play in order even
//! when their audio resolves out of order. A flush abandons every pending
//! slot and stops whatever is currently sounding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::synth::AudioQueueItem;
use crate::voice::AudioSink;

/// One reserved playback slot; its audio arrives later over the oneshot.
struct PendingItem {
    epoch: u64,
    seq: usize,
    text: String,
    rx: oneshot::Receiver<AudioQueueItem>,
}

/// Plays synthesized sentences one at a time, in enqueue order.
///
/// `flush` is safe at any moment, including mid-playback, and leaves the
/// sequencer ready for a fresh run of enqueues.
pub struct PlaybackSequencer {
    queue: mpsc::UnboundedSender<PendingItem>,
    epoch: watch::Sender<u64>,
    depth: Arc<watch::Sender<usize>>,
    sink: Arc<dyn AudioSink>,
}

impl PlaybackSequencer {
    /// Start the playback worker. `gap` is the pause inserted between
    /// consecutive sentences so they do not sound run-together.
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>, gap: Duration) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        let depth = Arc::new(watch::channel(0usize).0);

        tokio::spawn(run_worker(
            queue_rx,
            epoch_rx,
            Arc::clone(&depth),
            Arc::clone(&sink),
            gap,
        ));

        Self {
            queue: queue_tx,
            epoch: epoch_tx,
            depth,
            sink,
        }
    }

    /// Reserve the next playback slot for sentence `seq`.
    ///
    /// The slot's audio is whatever arrives on `rx`; a dropped sender or a
    /// skipped outcome resolves the slot silently with zero duration.
    pub fn enqueue(&self, seq: usize, text: String, rx: oneshot::Receiver<AudioQueueItem>) {
        let epoch = *self.epoch.borrow();
        self.depth.send_modify(|depth| *depth += 1);
        let item = PendingItem {
            epoch,
            seq,
            text,
            rx,
        };
        if self.queue.send(item).is_err() {
            self.depth.send_modify(|depth| *depth = depth.saturating_sub(1));
            tracing::warn!(seq, "playback worker gone, dropping sentence");
        }
    }

    /// Abandon all pending slots and stop the current item immediately.
    pub fn flush(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
        self.sink.stop();
        tracing::debug!(epoch = *self.epoch.borrow(), "playback queue flushed");
    }

    /// Resolves once every enqueued slot has completed and nothing is playing.
    pub async fn wait_for_drain(&self) {
        let mut depth = self.depth.subscribe();
        // The sender lives in self, so this cannot fail while we are here.
        let _ = depth.wait_for(|depth| *depth == 0).await;
    }
}

async fn run_worker(
    mut queue: mpsc::UnboundedReceiver<PendingItem>,
    mut epoch: watch::Receiver<u64>,
    depth: Arc<watch::Sender<usize>>,
    sink: Arc<dyn AudioSink>,
    gap: Duration,
) {
    while let Some(item) = queue.recv().await {
        play_item(item, &mut epoch, sink.as_ref(), gap).await;
        depth.send_modify(|depth| *depth = depth.saturating_sub(1));
    }
}

/// Resolve one slot: wait for its audio, play it, breathe. Every await races
/// the epoch so a flush is observed at the earliest suspension point.
async fn play_item(
    item: PendingItem,
    epoch: &mut watch::Receiver<u64>,
    sink: &dyn AudioSink,
    gap: Duration,
) {
    let PendingItem {
        epoch: item_epoch,
        seq,
        text,
        rx,
    } = item;

    if *epoch.borrow_and_update() != item_epoch {
        tracing::debug!(seq, "dropping flushed sentence");
        return;
    }

    let resolved = tokio::select! {
        biased;
        _ = epoch.changed() => {
            tracing::debug!(seq, "flushed while awaiting synthesis");
            return;
        }
        result = rx => result,
    };
    let Ok(resolved) = resolved else {
        tracing::debug!(seq, "synthesis abandoned");
        return;
    };

    let Some(clip) = resolved.outcome.clip() else {
        tracing::debug!(seq, text = %text, "skipping sentence without audio");
        return;
    };

    tracing::debug!(
        seq,
        duration_ms = clip.duration().as_millis(),
        "playing sentence"
    );
    tokio::select! {
        biased;
        _ = epoch.changed() => return,
        result = sink.play(clip) => {
            if let Err(e) = result {
                tracing::warn!(seq, error = %e, "playback failed, continuing with next sentence");
                return;
            }
        }
    }

    tokio::select! {
        biased;
        _ = epoch.changed() => {}
        () = tokio::time::sleep(gap) => {}
    }
}
