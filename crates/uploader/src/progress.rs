//! Progress reporting.
//!
//! One percentage covers the whole upload, split into bands so the number
//! never jumps backwards when a stage hands over to the next:
//!
//! | Stage       | Band    |
//! |-------------|---------|
//! | Calculating | 0–20    |
//! | Uploading   | 20–95   |
//! | Merging     | 95–99   |
//! | Done        | 100     |

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::trace;

const HASH_BAND: (u64, u64) = (0, 20);
const UPLOAD_BAND: (u64, u64) = (20, 95);
const MERGE_PERCENT: u8 = 95;

/// Coarse stage shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Calculating,
    Uploading,
    Merging,
    Done,
    Failed,
    Cancelled,
}

impl Stage {
    /// Returns `true` once no further events follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed | Stage::Cancelled)
    }
}

/// A progress snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Overall progress, `0..=100`, never decreasing.
    pub percent: u8,
    pub stage: Stage,
    /// Bytes hashed or chunks acknowledged, depending on the stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    fn new(percent: u8, stage: Stage) -> Self {
        Self {
            percent,
            stage,
            current: None,
            total: None,
            message: None,
        }
    }

    /// The snapshot of an upload that has not started yet.
    pub fn initial() -> Self {
        Self::new(0, Stage::Calculating)
    }
}

fn band_percent((start, end): (u64, u64), done: u64, total: u64) -> u8 {
    if total == 0 {
        return end as u8;
    }
    let done = done.min(total);
    (start + (end - start) * done / total) as u8
}

/// Folds stage updates into one monotonic stream of [`ProgressEvent`]s.
///
/// Events go to an optional bounded channel (dropped when the consumer
/// lags) and to a watch slot that always holds the latest snapshot.
/// Nothing is published after a terminal event.
#[derive(Debug)]
pub struct ProgressAggregator {
    events: Option<mpsc::Sender<ProgressEvent>>,
    latest: watch::Sender<ProgressEvent>,
    percent: u8,
    finished: bool,
}

impl ProgressAggregator {
    /// Creates an aggregator and the receiving ends of its channels.
    pub fn channel(
        buffer: usize,
    ) -> (
        Self,
        mpsc::Receiver<ProgressEvent>,
        watch::Receiver<ProgressEvent>,
    ) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (latest, latest_rx) = watch::channel(ProgressEvent::initial());
        let aggregator = Self {
            events: Some(tx),
            latest,
            percent: 0,
            finished: false,
        };
        (aggregator, rx, latest_rx)
    }

    /// Creates an aggregator that only keeps the latest snapshot.
    pub fn detached() -> Self {
        let (latest, _) = watch::channel(ProgressEvent::initial());
        Self {
            events: None,
            latest,
            percent: 0,
            finished: false,
        }
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> ProgressEvent {
        self.latest.borrow().clone()
    }

    /// Subscribes to the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.latest.subscribe()
    }

    /// `hashed` of `total` bytes digested.
    pub fn hashing(&mut self, hashed: u64, total: u64) {
        let percent = band_percent(HASH_BAND, hashed, total);
        self.publish(ProgressEvent {
            current: Some(hashed),
            total: Some(total),
            ..ProgressEvent::new(percent, Stage::Calculating)
        });
    }

    /// `acked` of `total` chunks acknowledged.
    pub fn uploading(&mut self, acked: u32, total: u32) {
        let percent = band_percent(UPLOAD_BAND, u64::from(acked), u64::from(total));
        self.publish(ProgressEvent {
            current: Some(u64::from(acked)),
            total: Some(u64::from(total)),
            ..ProgressEvent::new(percent, Stage::Uploading)
        });
    }

    /// Merge requested.
    pub fn merging(&mut self) {
        self.publish(ProgressEvent::new(MERGE_PERCENT, Stage::Merging));
    }

    /// Upload finished; `message` carries the access URL.
    pub fn done(&mut self, message: impl Into<String>) {
        self.publish(ProgressEvent {
            message: Some(message.into()),
            ..ProgressEvent::new(100, Stage::Done)
        });
    }

    /// Upload failed.
    pub fn failed(&mut self, message: impl Into<String>) {
        let percent = self.percent;
        self.publish(ProgressEvent {
            message: Some(message.into()),
            ..ProgressEvent::new(percent, Stage::Failed)
        });
    }

    /// Upload aborted by the caller.
    pub fn cancelled(&mut self) {
        let percent = self.percent;
        self.publish(ProgressEvent::new(percent, Stage::Cancelled));
    }

    fn publish(&mut self, mut event: ProgressEvent) {
        if self.finished {
            return;
        }
        event.percent = event.percent.max(self.percent);
        self.percent = event.percent;
        self.finished = event.stage.is_terminal();

        if let Some(tx) = &self.events
            && tx.try_send(event.clone()).is_err()
        {
            trace!(percent = event.percent, "progress consumer lagging; event dropped");
        }
        self.latest.send_replace(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn bands() {
        assert_eq!(band_percent(HASH_BAND, 0, 100), 0);
        assert_eq!(band_percent(HASH_BAND, 50, 100), 10);
        assert_eq!(band_percent(HASH_BAND, 100, 100), 20);
        assert_eq!(band_percent(HASH_BAND, 0, 0), 20);
        assert_eq!(band_percent(UPLOAD_BAND, 0, 5), 20);
        assert_eq!(band_percent(UPLOAD_BAND, 5, 5), 95);
    }

    #[test]
    fn full_sequence_is_monotonic() {
        let (mut agg, mut rx, latest) = ProgressAggregator::channel(64);
        agg.hashing(50, 100);
        agg.hashing(100, 100);
        agg.uploading(0, 4);
        agg.uploading(2, 4);
        agg.uploading(4, 4);
        agg.merging();
        agg.done("https://cdn/x");

        let events = drain(&mut rx);
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10, 20, 20, 57, 95, 95, 100]);
        assert_eq!(events.last().unwrap().stage, Stage::Done);
        assert_eq!(latest.borrow().percent, 100);
    }

    #[test]
    fn percent_never_decreases() {
        let (mut agg, mut rx, _latest) = ProgressAggregator::channel(64);
        agg.uploading(4, 5);
        // Reconciliation put a chunk back in the queue.
        agg.uploading(3, 5);
        let events = drain(&mut rx);
        assert_eq!(events[0].percent, events[1].percent);
        assert_eq!(events[1].current, Some(3));
    }

    #[test]
    fn nothing_after_terminal() {
        let (mut agg, mut rx, _latest) = ProgressAggregator::channel(64);
        agg.uploading(1, 2);
        agg.cancelled();
        agg.uploading(2, 2);
        agg.done("late");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].stage, Stage::Cancelled);
        assert_eq!(events[1].percent, events[0].percent);
        assert_eq!(agg.latest().stage, Stage::Cancelled);
    }

    #[test]
    fn lagging_consumer_keeps_latest() {
        let (mut agg, mut rx, latest) = ProgressAggregator::channel(1);
        agg.hashing(1, 4);
        agg.hashing(2, 4);
        agg.hashing(4, 4);
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(latest.borrow().percent, 20);
    }

    #[test]
    fn failed_keeps_percent_and_message() {
        let mut agg = ProgressAggregator::detached();
        agg.uploading(1, 3);
        agg.failed("chunk 1 failed");
        let latest = agg.latest();
        assert_eq!(latest.stage, Stage::Failed);
        assert_eq!(latest.percent, 45);
        assert_eq!(latest.message.as_deref(), Some("chunk 1 failed"));
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = ProgressEvent {
            current: Some(1),
            total: Some(2),
            ..ProgressEvent::new(57, Stage::Uploading)
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "uploading");
        assert_eq!(json["percent"], 57);
        assert!(json.get("message").is_none());
    }
}
