use prost::Message;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::NodeError;
use crate::schemas::RawImage;
use crate::sync::StreamSide;
use crate::transport::{SubscriptionHandle, Transport};

/// One image handed from a transport callback to the dispatch loop
#[derive(Debug, Clone)]
pub struct Delivery {
    pub side: StreamSide,
    pub image: RawImage,
}

/// Subscription to one camera stream.
///
/// Transport callbacks decode the protobuf envelope and enqueue the image on
/// the dispatch queue; all further processing happens in the dispatch loop.
/// Dropping the subscriber unregisters it from the transport.
pub struct StreamSubscriber {
    side: StreamSide,
    topic: String,
    dropped: Arc<AtomicU64>,
    _handle: SubscriptionHandle,
}

impl StreamSubscriber {
    pub async fn subscribe(
        transport: &dyn Transport,
        side: StreamSide,
        topic: &str,
        dispatch: flume::Sender<Delivery>,
    ) -> Result<Self, NodeError> {
        let dropped = Arc::new(AtomicU64::new(0));

        let handler = {
            let topic = topic.to_string();
            let dropped = dropped.clone();
            Arc::new(move |payload: &[u8]| {
                let image = match RawImage::decode(payload) {
                    Ok(image) => image,
                    Err(e) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        log::warn!("[{}] Malformed image message on '{}': {}", side, topic, e);
                        return;
                    }
                };
                if image.header.is_none() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[{}] Image on '{}' has no header, dropping", side, topic);
                    return;
                }

                match dispatch.try_send(Delivery { side, image }) {
                    Ok(()) => {}
                    Err(flume::TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        log::warn!("[{}] Dispatch queue full, dropping image", side);
                    }
                    Err(flume::TrySendError::Disconnected(_)) => {
                        log::debug!("[{}] Dispatch queue closed, dropping image", side);
                    }
                }
            })
        };

        let handle = transport.subscribe(topic, handler).await?;
        log::info!("[{}] Listening for images on '{}'", side, topic);

        Ok(Self {
            side,
            topic: topic.to_string(),
            dropped,
            _handle: handle,
        })
    }

    pub fn side(&self) -> StreamSide {
        self.side
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Messages discarded before reaching the dispatch queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for StreamSubscriber {
    fn drop(&mut self) {
        log::debug!("[{}] Releasing subscription to '{}'", self.side, self.topic);
    }
}
