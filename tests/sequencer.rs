//! Playback sequencing integration tests
//!
//! Exercises slot ordering, flushing, and drain behavior against a recording
//! sink, with no audio hardware involved.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::time::timeout;

use common::{RecordingSink, marker_len, remote_item, skipped_item};
use kaiwa::PlaybackSequencer;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

async fn drain(sequencer: &PlaybackSequencer) {
    timeout(DRAIN_TIMEOUT, sequencer.wait_for_drain())
        .await
        .expect("sequencer did not drain in time");
}

#[tokio::test]
async fn test_items_play_in_enqueue_order_despite_out_of_order_synthesis() {
    let sink = Arc::new(RecordingSink::instant());
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::ZERO);

    let first = "一つ目です。";
    let second = "二つ目。";
    let (tx_first, rx_first) = oneshot::channel();
    let (tx_second, rx_second) = oneshot::channel();
    sequencer.enqueue(0, first.to_string(), rx_first);
    sequencer.enqueue(1, second.to_string(), rx_second);

    // The later sentence finishes synthesis first.
    tx_second.send(remote_item(1, second)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx_first.send(remote_item(0, first)).unwrap();

    drain(&sequencer).await;
    assert_eq!(sink.completed(), vec![marker_len(first), marker_len(second)]);
}

#[tokio::test]
async fn test_flush_stops_current_item_and_discards_queued() {
    let sink = Arc::new(RecordingSink::slow(Duration::from_millis(400)));
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::ZERO);

    let first = "再生中の文。";
    let second = "まだ待機中。";
    let (tx_first, rx_first) = oneshot::channel();
    let (tx_second, rx_second) = oneshot::channel();
    sequencer.enqueue(0, first.to_string(), rx_first);
    sequencer.enqueue(1, second.to_string(), rx_second);
    tx_first.send(remote_item(0, first)).unwrap();
    tx_second.send(remote_item(1, second)).unwrap();

    // Let the first item start sounding, then pull the plug.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.started(), vec![marker_len(first)]);
    sequencer.flush();

    drain(&sequencer).await;
    assert!(sink.completed().is_empty(), "flushed audio must not finish");
    assert_eq!(sink.started(), vec![marker_len(first)]);
    assert!(sink.stop_count() >= 1);

    // The sequencer accepts fresh work immediately after a flush.
    let third = "新しい文。";
    let (tx_third, rx_third) = oneshot::channel();
    sequencer.enqueue(2, third.to_string(), rx_third);
    tx_third.send(remote_item(2, third)).unwrap();
    drain(&sequencer).await;
    assert_eq!(sink.completed(), vec![marker_len(third)]);
}

#[tokio::test]
async fn test_abandoned_slot_is_skipped_and_order_continues() {
    let sink = Arc::new(RecordingSink::instant());
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::ZERO);

    let lost = "消えた文。";
    let kept = "残った文。";
    let (tx_lost, rx_lost) = oneshot::channel::<kaiwa::synth::AudioQueueItem>();
    let (tx_kept, rx_kept) = oneshot::channel();
    sequencer.enqueue(0, lost.to_string(), rx_lost);
    sequencer.enqueue(1, kept.to_string(), rx_kept);

    drop(tx_lost);
    tx_kept.send(remote_item(1, kept)).unwrap();

    drain(&sequencer).await;
    assert_eq!(sink.completed(), vec![marker_len(kept)]);
}

#[tokio::test]
async fn test_skipped_sentence_produces_no_audio() {
    let sink = Arc::new(RecordingSink::instant());
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::ZERO);

    let silent = "合成できなかった文。";
    let spoken = "普通の文。";
    let (tx_silent, rx_silent) = oneshot::channel();
    let (tx_spoken, rx_spoken) = oneshot::channel();
    sequencer.enqueue(0, silent.to_string(), rx_silent);
    sequencer.enqueue(1, spoken.to_string(), rx_spoken);
    tx_silent.send(skipped_item(0, silent)).unwrap();
    tx_spoken.send(remote_item(1, spoken)).unwrap();

    drain(&sequencer).await;
    assert_eq!(sink.started(), vec![marker_len(spoken)]);
    assert_eq!(sink.completed(), vec![marker_len(spoken)]);
}

#[tokio::test]
async fn test_playback_failure_skips_to_next_item() {
    let bad = "壊れた音声。";
    let good = "次の文。";
    let sink = Arc::new(RecordingSink::instant().failing_on_len(marker_len(bad)));
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::ZERO);

    let (tx_bad, rx_bad) = oneshot::channel();
    let (tx_good, rx_good) = oneshot::channel();
    sequencer.enqueue(0, bad.to_string(), rx_bad);
    sequencer.enqueue(1, good.to_string(), rx_good);
    tx_bad.send(remote_item(0, bad)).unwrap();
    tx_good.send(remote_item(1, good)).unwrap();

    drain(&sequencer).await;
    assert_eq!(sink.started(), vec![marker_len(bad), marker_len(good)]);
    assert_eq!(sink.completed(), vec![marker_len(good)]);
}

#[tokio::test]
async fn test_drain_waits_for_playback_completion() {
    let sink = Arc::new(RecordingSink::slow(Duration::from_millis(150)));
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::ZERO);

    let text = "長めの文です。";
    let (tx, rx) = oneshot::channel();
    sequencer.enqueue(0, text.to_string(), rx);
    tx.send(remote_item(0, text)).unwrap();

    let begin = Instant::now();
    drain(&sequencer).await;
    assert!(begin.elapsed() >= Duration::from_millis(150));
    assert_eq!(sink.completed(), vec![marker_len(text)]);
}

#[tokio::test]
async fn test_gap_runs_after_played_audio() {
    let sink = Arc::new(RecordingSink::instant());
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::from_millis(150));

    let text = "間を置く文。";
    let (tx, rx) = oneshot::channel();
    sequencer.enqueue(0, text.to_string(), rx);
    tx.send(remote_item(0, text)).unwrap();

    let begin = Instant::now();
    drain(&sequencer).await;
    assert!(begin.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_skipped_items_finish_without_gap() {
    let sink = Arc::new(RecordingSink::instant());
    let sequencer = PlaybackSequencer::new(sink.clone(), Duration::from_millis(400));

    let (tx_a, rx_a) = oneshot::channel();
    let (tx_b, rx_b) = oneshot::channel();
    sequencer.enqueue(0, "欠番。".to_string(), rx_a);
    sequencer.enqueue(1, "これも欠番。".to_string(), rx_b);
    tx_a.send(skipped_item(0, "欠番。")).unwrap();
    tx_b.send(skipped_item(1, "これも欠番。")).unwrap();

    let begin = Instant::now();
    drain(&sequencer).await;
    assert!(
        begin.elapsed() < Duration::from_millis(200),
        "skipped sentences must not pay the inter-sentence gap"
    );
    assert!(sink.started().is_empty());
}

#[tokio::test]
async fn test_drain_resolves_when_queue_is_empty() {
    let sink = Arc::new(RecordingSink::instant());
    let sequencer = PlaybackSequencer::new(sink, Duration::from_millis(100));
    drain(&sequencer).await;
}
