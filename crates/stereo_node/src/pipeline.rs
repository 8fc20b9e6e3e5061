//! What happens to a matched pair: decode both frames, track, publish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::decode::{DecodedFrame, FrameDecoder};
use crate::schemas::RawImage;
use crate::sync::StreamSide;
use crate::tracking::{StampedState, StateUpdater, TrackingEngine};

/// Counters shared between the pair callback and the node
#[derive(Debug, Default)]
pub struct PipelineStats {
    pairs: AtomicU64,
    decode_failures: AtomicU64,
    tracked: AtomicU64,
    tracking_failures: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    /// Pairs delivered by the synchronizer
    pub pairs: u64,
    /// Pairs abandoned because a frame failed to decode
    pub decode_failures: u64,
    /// Pairs the engine tracked successfully
    pub tracked: u64,
    /// Pairs the engine returned an error for
    pub tracking_failures: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            pairs: self.pairs.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            tracked: self.tracked.load(Ordering::Relaxed),
            tracking_failures: self.tracking_failures.load(Ordering::Relaxed),
        }
    }
}

/// Identifies a frame in logs by acquisition stamp and sequence number
fn frame_label(image: &RawImage) -> String {
    match image.header.as_ref() {
        Some(h) => format!("stamped {} ns (seq {})", h.acq_time, h.sequence),
        None => "without header".to_string(),
    }
}

/// Pair callback target owning the decoder, the engine and the updater
pub struct PairProcessor<D, E, U>
where
    E: TrackingEngine,
{
    decoder: D,
    engine: E,
    updater: U,
    latest: watch::Sender<Option<StampedState>>,
    stats: Arc<PipelineStats>,
}

impl<D, E, U> PairProcessor<D, E, U>
where
    D: FrameDecoder,
    E: TrackingEngine,
    U: StateUpdater,
{
    pub fn new(
        decoder: D,
        engine: E,
        updater: U,
        latest: watch::Sender<Option<StampedState>>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            decoder,
            engine,
            updater,
            latest,
            stats,
        }
    }

    fn decode(&self, side: StreamSide, image: &RawImage) -> Option<DecodedFrame> {
        match self.decoder.decode(image) {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "[{}] Failed to decode frame {}: {}",
                    side,
                    frame_label(image),
                    e
                );
                None
            }
        }
    }

    /// Handle one synchronized pair; a pair with an undecodable frame is abandoned
    pub fn process(&mut self, left: RawImage, right: RawImage) {
        self.stats.pairs.fetch_add(1, Ordering::Relaxed);

        let Some(left) = self.decode(StreamSide::Left, &left) else {
            return;
        };
        let Some(right) = self.decode(StreamSide::Right, &right) else {
            return;
        };

        let timestamp = left.timestamp_secs();
        match self.engine.track_stereo(&left, &right, timestamp) {
            Ok(state) => {
                self.stats.tracked.fetch_add(1, Ordering::Relaxed);
                log::debug!("Tracked pair at {:.6}s: {:?}", timestamp, state.status);
                self.latest.send_replace(Some(StampedState {
                    stamp: left.stamp,
                    state,
                }));
                self.updater.publish_latest_state();
            }
            Err(e) => {
                self.stats.tracking_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Tracking failed for pair at {:.6}s: {}", timestamp, e);
            }
        }
    }
}

impl<D, E, U> Drop for PairProcessor<D, E, U>
where
    E: TrackingEngine,
{
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
