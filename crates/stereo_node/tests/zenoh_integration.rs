//! End-to-end test of the stereo node over a real Zenoh session.
//!
//! Marked `#[ignore]` because it opens network sockets. To run it:
//!
//! ```bash
//! cargo test -p stereo_node --test zenoh_integration -- --ignored --test-threads=1
//! ```
//!
//! A single peer-mode session both publishes and subscribes, so no router is
//! needed.

use prost::Message;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stereo_node::decode::DecodedFrame;
use stereo_node::schemas::{CameraInfo, Header, RawImage, TrackingStatus};
use stereo_node::tracking::TrackedState;
use stereo_node::{
    ImageDecoder, NodeState, SensorMode, StateUpdater, StereoConfig, StereoNode, TrackingEngine,
    TrackingError, Transport, ZenohTransport,
};
use tokio::sync::watch;

#[derive(Clone, Default)]
struct RecordingEngine {
    stamps: Arc<Mutex<Vec<f64>>>,
}

impl TrackingEngine for RecordingEngine {
    fn initialize(&mut self, _: SensorMode, calibration: &CameraInfo) -> Result<(), TrackingError> {
        if calibration.k.len() != 9 {
            return Err(TrackingError::Calibration("K must have 9 entries".into()));
        }
        Ok(())
    }

    fn track_stereo(
        &mut self,
        left: &DecodedFrame,
        right: &DecodedFrame,
        timestamp: f64,
    ) -> Result<TrackedState, TrackingError> {
        assert_eq!(left.width, right.width);
        self.stamps.lock().unwrap().push(timestamp);
        Ok(TrackedState {
            status: TrackingStatus::Ok,
            pose: None,
        })
    }
}

struct CountingUpdater(Arc<AtomicUsize>);

impl StateUpdater for CountingUpdater {
    fn publish_latest_state(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

async fn open_peer_session() -> Arc<zenoh::Session> {
    let mut config = zenoh::Config::default();
    config.insert_json5("mode", "\"peer\"").ok();
    config
        .insert_json5("scouting/multicast/enabled", "false")
        .ok();
    config.insert_json5("scouting/gossip/enabled", "false").ok();
    Arc::new(
        zenoh::open(config)
            .await
            .expect("Failed to open Zenoh session"),
    )
}

fn image(stamp_ms: u64) -> Vec<u8> {
    RawImage {
        header: Some(Header {
            acq_time: stamp_ms * 1_000_000,
            frame_id: "camera".to_string(),
            ..Default::default()
        }),
        width: 4,
        height: 2,
        encoding: "mono8".to_string(),
        step: 4,
        data: vec![128; 8],
        is_bigendian: false,
    }
    .encode_to_vec()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore] // Opens network sockets
async fn test_stereo_node_over_zenoh() {
    let _ = env_logger::builder().is_test(true).try_init();

    let session = open_peer_session().await;
    let transport = Arc::new(ZenohTransport::new(session.clone()));

    let config = StereoConfig {
        camera_info_timeout_ms: 2000,
        ..Default::default()
    };

    // Keep publishing calibration until the node picks it up
    let info_transport = transport.clone();
    let info_topic = config.camera_info_topic.clone();
    let info_task = tokio::spawn(async move {
        let info = CameraInfo {
            width: 4,
            height: 2,
            k: vec![1.0, 0.0, 2.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
            ..Default::default()
        };
        loop {
            info_transport
                .put(&info_topic, info.encode_to_vec())
                .expect("Failed to publish camera info");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let engine = RecordingEngine::default();
    let updates = Arc::new(AtomicUsize::new(0));
    let mut node = StereoNode::new();
    node.configure(&config).unwrap();
    node.start(
        transport.as_ref(),
        ImageDecoder::default(),
        engine.clone(),
        CountingUpdater(updates.clone()),
    )
    .await
    .expect("Failed to start node");
    info_task.abort();

    let stats = node.stats_handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let spin = tokio::spawn(async move {
        node.spin(shutdown_rx).await.unwrap();
        node
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    for (l, r) in [(0, 10), (100, 110), (200, 210)] {
        transport.put(&config.left_image_topic, image(l)).unwrap();
        transport.put(&config.right_image_topic, image(r)).unwrap();
    }

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        while stats.snapshot().tracked < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(received.is_ok(), "Timeout waiting for tracked pairs");

    shutdown_tx.send(()).unwrap();
    let node = spin.await.unwrap();
    assert_eq!(node.state(), NodeState::Terminated);
    assert_eq!(*engine.stamps.lock().unwrap(), vec![0.0, 0.1, 0.2]);
    assert_eq!(updates.load(Ordering::SeqCst), 3);

    // Nothing reaches the engine after teardown
    transport.put(&config.left_image_topic, image(300)).unwrap();
    transport.put(&config.right_image_topic, image(305)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.stamps.lock().unwrap().len(), 3);

    session.close().await.ok();
}
