//! Stereo ingestion node: owns the camera subscriptions and the synchronizer
//! and drives them from a single dispatch loop.
//!
//! Lifecycle: `Uninitialized → Configured → Running → ShuttingDown → Terminated`.
//! Everything acquired on entering `Running` lives in one owned value that is
//! torn down in a fixed order: subscriptions, dispatch queue, synchronizer.
//! Once the synchronizer is gone no pair callback can fire.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::calibration::wait_for_camera_info;
use crate::config::StereoConfig;
use crate::decode::FrameDecoder;
use crate::error::{NodeError, Result};
use crate::pipeline::{PairProcessor, PipelineSnapshot, PipelineStats};
use crate::schemas::RawImage;
use crate::subscriber::{Delivery, StreamSubscriber};
use crate::sync::{ApproximateTimeSync, StreamSide, SyncStats};
use crate::tracking::{
    latest_state_channel, SensorMode, StampedState, StateUpdater, TrackingEngine,
};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Configured,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeState::Uninitialized => "uninitialized",
            NodeState::Configured => "configured",
            NodeState::Running => "running",
            NodeState::ShuttingDown => "shutting down",
            NodeState::Terminated => "terminated",
        })
    }
}

/// Resources owned while the node is running.
///
/// Field order is drop order.
struct Running {
    left: StreamSubscriber,
    right: StreamSubscriber,
    dispatch_rx: flume::Receiver<Delivery>,
    sync: ApproximateTimeSync<RawImage>,
}

pub struct StereoNode {
    state: NodeState,
    config: Option<StereoConfig>,
    running: Option<Running>,
    stats: Arc<PipelineStats>,
    final_sync_stats: SyncStats,
    latest_tx: Option<watch::Sender<Option<StampedState>>>,
    latest_rx: watch::Receiver<Option<StampedState>>,
}

impl Default for StereoNode {
    fn default() -> Self {
        Self::new()
    }
}

impl StereoNode {
    pub fn new() -> Self {
        let (latest_tx, latest_rx) = latest_state_channel();
        Self {
            state: NodeState::Uninitialized,
            config: None,
            running: None,
            stats: Arc::new(PipelineStats::default()),
            final_sync_stats: SyncStats::default(),
            latest_tx: Some(latest_tx),
            latest_rx,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn config(&self) -> Option<&StereoConfig> {
        self.config.as_ref()
    }

    /// Receiver for the state produced by the most recent tracked pair
    pub fn latest_state(&self) -> watch::Receiver<Option<StampedState>> {
        self.latest_rx.clone()
    }

    pub fn stats(&self) -> PipelineSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, readable after the node has moved into a task
    pub fn stats_handle(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.running
            .as_ref()
            .map(|r| r.sync.stats())
            .unwrap_or(self.final_sync_stats)
    }

    /// Unmatched messages currently buffered for one stream
    pub fn pending(&self, side: StreamSide) -> usize {
        self.running.as_ref().map_or(0, |r| r.sync.pending(side))
    }

    fn expect_state(&self, expected: NodeState) -> Result<()> {
        if self.state != expected {
            return Err(NodeError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Validate and store the configuration. No transport interaction.
    pub fn configure(&mut self, config: &StereoConfig) -> Result<()> {
        self.expect_state(NodeState::Uninitialized)?;
        config.validate()?;

        log::info!(
            "Stereo node configured: left '{}', right '{}', camera info '{}', mode {}",
            config.left_image_topic,
            config.right_image_topic,
            config.camera_info_topic,
            config.tracking_mode
        );
        self.config = Some(config.clone());
        self.state = NodeState::Configured;
        Ok(())
    }

    /// Acquire calibration, initialize the engine, subscribe both streams and
    /// register the pair callback.
    ///
    /// On failure everything acquired so far is released and the node stays
    /// `Configured`.
    pub async fn start<D, E, U>(
        &mut self,
        transport: &dyn Transport,
        decoder: D,
        mut engine: E,
        updater: U,
    ) -> Result<()>
    where
        D: FrameDecoder + 'static,
        E: TrackingEngine + 'static,
        U: StateUpdater + 'static,
    {
        self.expect_state(NodeState::Configured)?;
        let Some(config) = self.config.clone() else {
            return Err(NodeError::InvalidState {
                expected: NodeState::Configured,
                actual: self.state,
            });
        };

        let calibration = wait_for_camera_info(
            transport,
            &config.camera_info_topic,
            config.camera_info_timeout(),
        )
        .await?;
        engine.initialize(SensorMode::Stereo, &calibration)?;

        let (dispatch_tx, dispatch_rx) = flume::bounded(config.dispatch_queue_size);
        let (left, right) = match Self::subscribe_streams(transport, &config, dispatch_tx).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                engine.shutdown();
                return Err(e);
            }
        };

        let latest = match self.latest_tx.take() {
            Some(tx) => tx,
            None => {
                let (tx, rx) = latest_state_channel();
                self.latest_rx = rx;
                tx
            }
        };
        let mut processor =
            PairProcessor::new(decoder, engine, updater, latest, self.stats.clone());

        let policy = config.sync.policy();
        let mut sync = ApproximateTimeSync::<RawImage>::new(policy);
        sync.register_callback(move |l, r| processor.process(l, r));

        log::info!(
            "Stereo node running: sync queue {}, tolerance {} ms",
            policy.queue_size,
            policy.tolerance.as_millis()
        );

        self.running = Some(Running {
            left,
            right,
            dispatch_rx,
            sync,
        });
        self.state = NodeState::Running;
        Ok(())
    }

    async fn subscribe_streams(
        transport: &dyn Transport,
        config: &StereoConfig,
        dispatch_tx: flume::Sender<Delivery>,
    ) -> Result<(StreamSubscriber, StreamSubscriber)> {
        let right = StreamSubscriber::subscribe(
            transport,
            StreamSide::Right,
            &config.right_image_topic,
            dispatch_tx.clone(),
        )
        .await?;
        let left = StreamSubscriber::subscribe(
            transport,
            StreamSide::Left,
            &config.left_image_topic,
            dispatch_tx,
        )
        .await?;
        Ok((left, right))
    }

    /// Feed one delivery into the synchronizer
    pub fn dispatch(&mut self, delivery: Delivery) -> Result<()> {
        self.expect_state(NodeState::Running)?;
        if let Some(running) = self.running.as_mut() {
            running.sync.add(delivery.side, delivery.image);
        }
        Ok(())
    }

    /// Process everything already queued without blocking.
    ///
    /// Returns the number of deliveries handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let Some(running) = self.running.as_mut() else {
            return 0;
        };
        let mut handled = 0;
        while let Ok(delivery) = running.dispatch_rx.try_recv() {
            running.sync.add(delivery.side, delivery.image);
            handled += 1;
        }
        handled
    }

    /// Dispatch deliveries until `shutdown_rx` fires, then tear down
    pub async fn spin(&mut self, mut shutdown_rx: watch::Receiver<()>) -> Result<()> {
        self.expect_state(NodeState::Running)?;

        if let Some(running) = self.running.as_mut() {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        log::info!("Stereo node received shutdown signal");
                        break;
                    }

                    delivery = running.dispatch_rx.recv_async() => {
                        match delivery {
                            Ok(delivery) => running.sync.add(delivery.side, delivery.image),
                            Err(_) => {
                                log::warn!("Dispatch queue closed, stopping");
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Release subscriptions, then the synchronizer. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        match self.state {
            NodeState::Terminated => return,
            NodeState::Running => {
                self.state = NodeState::ShuttingDown;
                log::info!("Shutting down stereo node...");

                if let Some(Running {
                    left,
                    right,
                    dispatch_rx,
                    sync,
                }) = self.running.take()
                {
                    drop(left);
                    drop(right);

                    let discarded = dispatch_rx.len();
                    drop(dispatch_rx);
                    if discarded > 0 {
                        log::debug!("Discarded {} undispatched images", discarded);
                    }

                    self.final_sync_stats = sync.stats();
                    drop(sync);
                }

                let stats = self.stats.snapshot();
                log::info!(
                    "Stereo node stopped: {} pairs, {} tracked, {} decode failures, {} tracking failures, {} sync misses",
                    stats.pairs,
                    stats.tracked,
                    stats.decode_failures,
                    stats.tracking_failures,
                    self.final_sync_stats.evicted + self.final_sync_stats.late
                );
            }
            NodeState::Uninitialized | NodeState::Configured | NodeState::ShuttingDown => {}
        }
        self.state = NodeState::Terminated;
    }
}

impl Drop for StereoNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedFrame, ImageDecoder};
    use crate::schemas::{CameraInfo, Header, TrackingStatus};
    use crate::tracking::{TrackedState, TrackingError};
    use crate::transport::LocalTransport;
    use prost::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const LEFT: &str = "/camera_left/image_raw";
    const RIGHT: &str = "/camera_right/image_raw";
    const INFO: &str = "/camera/fisheye1/camera_info";
    const MS: u64 = 1_000_000;

    #[derive(Clone, Default)]
    struct SpyEngine {
        calls: Arc<Mutex<Vec<f64>>>,
        shut_down: Arc<AtomicUsize>,
    }

    impl TrackingEngine for SpyEngine {
        fn initialize(
            &mut self,
            mode: SensorMode,
            _: &CameraInfo,
        ) -> std::result::Result<(), TrackingError> {
            assert_eq!(mode, SensorMode::Stereo);
            Ok(())
        }

        fn track_stereo(
            &mut self,
            _: &DecodedFrame,
            _: &DecodedFrame,
            timestamp: f64,
        ) -> std::result::Result<TrackedState, TrackingError> {
            self.calls.lock().unwrap().push(timestamp);
            Ok(TrackedState {
                status: TrackingStatus::Ok,
                pose: None,
            })
        }

        fn shutdown(&mut self) {
            self.shut_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SpyEngine {
        fn calls(&self) -> Vec<f64> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct CountingUpdater(Arc<AtomicUsize>);

    impl StateUpdater for CountingUpdater {
        fn publish_latest_state(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn image(stamp: u64, encoding: &str) -> Vec<u8> {
        RawImage {
            header: Some(Header {
                acq_time: stamp,
                ..Default::default()
            }),
            width: 2,
            height: 2,
            encoding: encoding.to_string(),
            step: 2,
            data: vec![1, 2, 3, 4],
            is_bigendian: false,
        }
        .encode_to_vec()
    }

    fn test_config() -> StereoConfig {
        StereoConfig {
            camera_info_timeout_ms: 50,
            ..Default::default()
        }
    }

    async fn running_node(bus: &LocalTransport) -> (StereoNode, SpyEngine, Arc<AtomicUsize>) {
        let _ = env_logger::builder().is_test(true).try_init();
        bus.latch(INFO, &CameraInfo::default().encode_to_vec());

        let engine = SpyEngine::default();
        let updates = Arc::new(AtomicUsize::new(0));
        let mut node = StereoNode::new();
        node.configure(&test_config()).unwrap();
        node.start(
            bus,
            ImageDecoder::default(),
            engine.clone(),
            CountingUpdater(updates.clone()),
        )
        .await
        .unwrap();
        (node, engine, updates)
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let bus = LocalTransport::new();
        let mut node = StereoNode::new();
        assert_eq!(node.state(), NodeState::Uninitialized);

        let err = node
            .start(
                &bus,
                ImageDecoder::default(),
                SpyEngine::default(),
                CountingUpdater(Arc::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::InvalidState {
                expected: NodeState::Configured,
                actual: NodeState::Uninitialized
            }
        ));

        let invalid = StereoConfig {
            left_image_topic: String::new(),
            ..Default::default()
        };
        assert!(matches!(node.configure(&invalid), Err(NodeError::Config(_))));
        assert_eq!(node.state(), NodeState::Uninitialized);

        node.configure(&test_config()).unwrap();
        assert_eq!(node.state(), NodeState::Configured);
        assert!(node.configure(&test_config()).is_err());

        node.shutdown();
        assert_eq!(node.state(), NodeState::Terminated);
        assert!(node.configure(&test_config()).is_err());
    }

    #[tokio::test]
    async fn test_start_fails_without_camera_info() {
        let bus = LocalTransport::new();
        let engine = SpyEngine::default();
        let mut node = StereoNode::new();
        node.configure(&test_config()).unwrap();

        let err = node
            .start(
                &bus,
                ImageDecoder::default(),
                engine.clone(),
                CountingUpdater(Arc::default()),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, NodeError::Calibration(_)));
        assert_eq!(node.state(), NodeState::Configured);
        assert_eq!(bus.subscriber_count(LEFT), 0);
        assert_eq!(bus.subscriber_count(RIGHT), 0);
        assert_eq!(bus.subscriber_count(INFO), 0);
    }

    #[tokio::test]
    async fn test_three_pairs_stamped_by_left() {
        let bus = LocalTransport::new();
        let (mut node, engine, updates) = running_node(&bus).await;
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(bus.subscriber_count(LEFT), 1);
        assert_eq!(bus.subscriber_count(RIGHT), 1);

        for (l, r) in [(0, 10), (100, 110), (200, 210)] {
            bus.publish(LEFT, &image(l * MS, "mono8"));
            bus.publish(RIGHT, &image(r * MS, "mono8"));
        }
        assert_eq!(node.dispatch_pending(), 6);

        assert_eq!(engine.calls(), vec![0.0, 0.1, 0.2]);
        assert_eq!(updates.load(Ordering::SeqCst), 3);
        assert_eq!(node.stats().tracked, 3);
        assert_eq!(
            node.latest_state().borrow().as_ref().map(|s| s.stamp),
            Some(200 * MS)
        );
    }

    #[tokio::test]
    async fn test_unmatched_frames_are_evicted() {
        let bus = LocalTransport::new();
        let (mut node, engine, _) = running_node(&bus).await;

        bus.publish(LEFT, &image(0, "mono8"));
        bus.publish(RIGHT, &image(500 * MS, "mono8"));
        node.dispatch_pending();
        assert!(engine.calls().is_empty());
        assert_eq!(node.pending(StreamSide::Left), 0);
        assert_eq!(node.pending(StreamSide::Right), 1);

        bus.publish(LEFT, &image(600 * MS, "mono8"));
        node.dispatch_pending();
        assert!(engine.calls().is_empty());
        assert_eq!(node.pending(StreamSide::Right), 0);
        assert_eq!(node.sync_stats().evicted, 2);
    }

    #[tokio::test]
    async fn test_left_decode_failure_abandons_pair() {
        let bus = LocalTransport::new();
        let (mut node, engine, updates) = running_node(&bus).await;

        bus.publish(LEFT, &image(0, "bayer_rggb8"));
        bus.publish(RIGHT, &image(5 * MS, "mono8"));
        node.dispatch_pending();

        assert!(engine.calls().is_empty());
        assert_eq!(updates.load(Ordering::SeqCst), 0);
        assert_eq!(node.stats().decode_failures, 1);

        bus.publish(LEFT, &image(100 * MS, "mono8"));
        bus.publish(RIGHT, &image(105 * MS, "mono8"));
        node.dispatch_pending();
        assert_eq!(engine.calls(), vec![0.1]);
        assert_eq!(node.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn test_shutdown_freezes_callbacks() {
        let bus = LocalTransport::new();
        let (mut node, engine, _) = running_node(&bus).await;

        for k in 0..2u64 {
            bus.publish(LEFT, &image(k * 100 * MS, "mono8"));
            bus.publish(RIGHT, &image(k * 100 * MS + MS, "mono8"));
        }
        node.dispatch_pending();
        assert_eq!(engine.calls().len(), 2);

        // queued but never dispatched
        bus.publish(LEFT, &image(200 * MS, "mono8"));
        node.shutdown();
        assert_eq!(node.state(), NodeState::Terminated);
        assert_eq!(engine.shut_down.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(LEFT), 0);
        assert_eq!(bus.subscriber_count(RIGHT), 0);

        assert_eq!(bus.publish(RIGHT, &image(200 * MS, "mono8")), 0);
        assert_eq!(node.dispatch_pending(), 0);
        assert!(node.dispatch(Delivery {
            side: StreamSide::Left,
            image: RawImage::default(),
        })
        .is_err());
        assert_eq!(engine.calls().len(), 2);
        assert_eq!(node.sync_stats().pairs, 2);

        node.shutdown();
        assert_eq!(engine.shut_down.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spin_until_shutdown_signal() {
        let bus = LocalTransport::new();
        let (mut node, engine, _) = running_node(&bus).await;
        let stats = node.stats_handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(());

        let task = tokio::spawn(async move {
            node.spin(shutdown_rx).await.unwrap();
            node
        });

        for k in 0..3u64 {
            bus.publish(LEFT, &image(k * 100 * MS, "mono8"));
            bus.publish(RIGHT, &image(k * 100 * MS + 2 * MS, "mono8"));
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while stats.snapshot().tracked < 3 {
            assert!(tokio::time::Instant::now() < deadline, "pairs not processed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(()).unwrap();
        let node = task.await.unwrap();
        assert_eq!(node.state(), NodeState::Terminated);

        assert_eq!(bus.publish(LEFT, &image(300 * MS, "mono8")), 0);
        assert_eq!(engine.calls().len(), 3);
    }
}
