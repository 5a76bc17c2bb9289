//! Caller-facing notification surface

use crate::error::DeviceError;
use crate::store::CapturedImage;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Images produced from one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNotification {
    pub fullsize: CapturedImage,
    pub thumbnail: Option<CapturedImage>,
}

impl FrameNotification {
    /// `{"fullsize": path}` or `{"fullsize": path, "thumbnail": path}`
    pub fn to_json(&self) -> Value {
        let mut payload = json!({ "fullsize": self.fullsize.path.to_string_lossy() });
        if let Some(thumbnail) = &self.thumbnail {
            payload["thumbnail"] = json!(thumbnail.path.to_string_lossy());
        }
        payload
    }
}

/// A session ended because the device failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub session_id: u64,
    pub camera_id: String,
    pub error: DeviceError,
}

/// Receives capture results.
///
/// Callbacks run on pipeline and session threads; implementations should
/// hand the value off and return quickly.
pub trait CaptureClient: Send + Sync + 'static {
    /// Capture was accepted and frame results will follow
    fn on_pending(&self) {}

    /// A frame reached disk
    fn on_frame(&self, frame: FrameNotification);

    /// The device failed and the session was closed
    fn on_error(&self, failure: SessionFailure);
}

/// Everything a [`ChannelClient`] forwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Pending,
    Frame(FrameNotification),
    Error(SessionFailure),
}

/// [`CaptureClient`] that forwards notifications into a channel
#[derive(Debug)]
pub struct ChannelClient {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelClient {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl CaptureClient for ChannelClient {
    fn on_pending(&self) {
        let _ = self.tx.send(Notification::Pending);
    }

    fn on_frame(&self, frame: FrameNotification) {
        let _ = self.tx.send(Notification::Frame(frame));
    }

    fn on_error(&self, failure: SessionFailure) {
        let _ = self.tx.send(Notification::Error(failure));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ImageRole;
    use std::path::PathBuf;

    fn image(role: ImageRole, path: &str) -> CapturedImage {
        CapturedImage {
            path: PathBuf::from(path),
            role,
            sequence_id: 1,
        }
    }

    #[test]
    fn test_payload_without_thumbnail() {
        let frame = FrameNotification {
            fullsize: image(ImageRole::Fullsize, "/data/fullsize-1.jpg"),
            thumbnail: None,
        };
        assert_eq!(frame.to_json(), json!({ "fullsize": "/data/fullsize-1.jpg" }));
    }

    #[test]
    fn test_payload_with_thumbnail() {
        let frame = FrameNotification {
            fullsize: image(ImageRole::Fullsize, "/data/fullsize-1.jpg"),
            thumbnail: Some(image(ImageRole::Thumbnail, "/data/thumbnail-1.jpg")),
        };
        assert_eq!(
            frame.to_json(),
            json!({
                "fullsize": "/data/fullsize-1.jpg",
                "thumbnail": "/data/thumbnail-1.jpg"
            })
        );
    }

    #[tokio::test]
    async fn test_channel_client_forwards() {
        let (client, mut rx) = ChannelClient::new();
        client.on_pending();
        client.on_error(SessionFailure {
            session_id: 3,
            camera_id: "0".to_string(),
            error: DeviceError::Disconnected,
        });

        assert_eq!(rx.recv().await, Some(Notification::Pending));
        assert!(matches!(rx.recv().await, Some(Notification::Error(f)) if f.session_id == 3));
    }
}
