//! Delivery guard between a session's pipelines and the caller

use crate::controller::{CaptureClient, FrameNotification, SessionFailure};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Forwards notifications only while its session is live.
///
/// Pipelines deliver under the read lock; closing takes the write lock, so
/// once [`NotificationGate::close`] returns nothing more reaches the client.
pub(crate) struct NotificationGate {
    open: RwLock<bool>,
    client: Arc<dyn CaptureClient>,
    latest: Arc<Mutex<Option<FrameNotification>>>,
}

impl NotificationGate {
    pub fn new(
        client: Arc<dyn CaptureClient>,
        latest: Arc<Mutex<Option<FrameNotification>>>,
    ) -> Self {
        Self {
            open: RwLock::new(true),
            client,
            latest,
        }
    }

    /// Delivers a frame result; returns false if the session already closed
    pub fn frame(&self, frame: FrameNotification) -> bool {
        let open = self.open.read();
        if !*open {
            return false;
        }

        *self.latest.lock() = Some(frame.clone());
        self.client.on_frame(frame);
        true
    }

    /// Delivers the session's single failure and closes the gate
    pub fn fail(&self, failure: SessionFailure) -> bool {
        let mut open = self.open.write();
        if !*open {
            return false;
        }

        self.client.on_error(failure);
        *open = false;
        true
    }

    pub fn close(&self) {
        *self.open.write() = false;
    }
}
