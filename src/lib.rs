//! Continuous camera capture to a rolling set of JPEG files
//!
//! This library drives a camera through a session state machine and, for
//! every frame it delivers:
//! - encodes it to JPEG and rotates it upright for the display
//! - optionally derives a scaled thumbnail
//! - writes both into a rolling window of the newest files per role
//! - notifies the caller with the resulting paths
//!
//! Flash and camera changes are applied mid-capture without renumbering
//! files.
//!
//! # Example
//!
//! ```no_run
//! use rolling_capture::config::{CaptureSettings, TestPatternSettings};
//! use rolling_capture::{CaptureConfiguration, CaptureController, ChannelClient, TestPatternDevice};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, mut notifications) = ChannelClient::new();
//! let device = Arc::new(TestPatternDevice::new(TestPatternSettings::default()));
//! let controller = CaptureController::from_settings(&CaptureSettings::default(), device, client)?;
//!
//! controller.start_capture(CaptureConfiguration::default()).await?;
//! while let Some(notification) = notifications.recv().await {
//!     println!("{:?}", notification);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod negotiate;
pub mod session;
pub mod stats;
pub mod store;

// Re-exports for convenience
pub use codec::{EncodedImage, ImageCodec, JpegCodec};
pub use config::{CaptureConfiguration, Config, LensFacing};
pub use controller::{
    CaptureClient, CaptureController, ChannelClient, FrameNotification, Notification,
    SessionFailure,
};
pub use device::{CameraDevice, DeviceHandle, TestPatternDevice};
pub use error::{CaptureError, DeviceError};
pub use session::SessionState;
pub use stats::SessionStats;
pub use store::{CapturedImage, FileStore, ImageRole, RETENTION_DEPTH};
