use prost::Message;
use std::sync::Arc;
use std::time::Duration;

use crate::error::NodeError;
use crate::schemas::CameraInfo;
use crate::transport::Transport;

/// Wait for the first decodable calibration message on `topic`.
///
/// The subscription only lives for the duration of the wait.
pub async fn wait_for_camera_info(
    transport: &dyn Transport,
    topic: &str,
    timeout: Duration,
) -> Result<CameraInfo, NodeError> {
    let (tx, rx) = flume::bounded::<CameraInfo>(1);

    let handler = {
        let topic = topic.to_string();
        Arc::new(move |payload: &[u8]| match CameraInfo::decode(payload) {
            Ok(info) => {
                let _ = tx.try_send(info);
            }
            Err(e) => log::warn!("Skipping malformed camera info on '{}': {}", topic, e),
        })
    };

    log::info!("Waiting for camera info on '{}'", topic);
    let _subscription = transport.subscribe(topic, handler).await?;

    match tokio::time::timeout(timeout, rx.recv_async()).await {
        Ok(Ok(info)) => {
            log::info!(
                "Camera info received: {}x{}, model '{}'",
                info.width,
                info.height,
                info.distortion_model
            );
            Ok(info)
        }
        Ok(Err(_)) => Err(NodeError::Calibration(format!(
            "camera info channel on '{}' closed",
            topic
        ))),
        Err(_) => Err(NodeError::Calibration(format!(
            "no camera info on '{}' within {} ms",
            topic,
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;

    fn info() -> CameraInfo {
        CameraInfo {
            width: 848,
            height: 800,
            distortion_model: "kannala_brandt".to_string(),
            k: vec![286.0, 0.0, 424.0, 0.0, 286.0, 400.0, 0.0, 0.0, 1.0],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_receives_latched_info() {
        let bus = LocalTransport::new();
        bus.latch("/camera/info", &info().encode_to_vec());

        let received = wait_for_camera_info(&bus, "/camera/info", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(received, info());
        // subscription released after the wait
        assert_eq!(bus.subscriber_count("/camera/info"), 0);
    }

    #[tokio::test]
    async fn test_info_published_while_waiting() {
        let bus = LocalTransport::new();
        let publisher = bus.clone();
        let task = tokio::spawn(async move {
            while publisher.subscriber_count("/camera/info") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            publisher.publish("/camera/info", &[0xff]);
            publisher.publish("/camera/info", &info().encode_to_vec());
        });

        let received = wait_for_camera_info(&bus, "/camera/info", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(received.width, 848);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_times_out() {
        let bus = LocalTransport::new();
        let err = wait_for_camera_info(&bus, "/camera/info", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Calibration(_)));
        assert_eq!(bus.subscriber_count("/camera/info"), 0);
    }
}
