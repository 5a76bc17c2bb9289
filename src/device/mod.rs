//! Camera device abstraction
//!
//! A [`CameraDevice`] enumerates cameras, reports their characteristics and
//! opens them. An opened camera is a [`DeviceHandle`]; it pushes lifecycle
//! events and frames into the owning session through an [`EventSender`],
//! from whatever background thread the backend uses.

mod test_pattern;

pub use test_pattern::TestPatternDevice;

use crate::config::LensFacing;
use crate::error::{CaptureError, DeviceError};
use crate::negotiate::NegotiatedFormat;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether both dimensions are at least as large as `other`
    pub fn covers(&self, other: &Resolution) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Frame rate range in milli-fps (30 fps = 30000)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

impl fmt::Display for FpsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Autofocus modes a camera may report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusMode {
    ContinuousVideo,
    ContinuousPicture,
    Auto,
    Macro,
    Fixed,
    Off,
}

/// Layout of the bytes in a [`RawFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Already JPEG encoded by the sensor pipeline
    Jpeg,
    Rgb8,
    Rgba8,
    Luma8,
    /// Y plane followed by interleaved V/U at quarter resolution
    Nv21,
}

/// Flash state requested from the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMode {
    #[default]
    Off,
    Torch,
}

impl From<bool> for FlashMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            FlashMode::Torch
        } else {
            FlashMode::Off
        }
    }
}

/// A physical camera exposed by a device backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: String,
    pub facing: LensFacing,
}

/// Static capabilities of one camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristics {
    /// Clockwise angle the sensor is mounted at, in degrees
    pub sensor_orientation: u32,
    pub pixel_format: PixelFormat,
    /// Supported output sizes, in device-reported order
    pub resolutions: Vec<Resolution>,
    /// Supported frame rate ranges, in device-reported order
    pub fps_ranges: Vec<FpsRange>,
    pub focus_modes: Vec<FocusMode>,
    pub flash_available: bool,
}

/// Everything the device needs to (re)configure its repeating capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParameters {
    pub format: NegotiatedFormat,
    pub flash: FlashMode,
}

/// One raw buffer as delivered by the device
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub timestamp_ns: u64,
}

/// Lifecycle events pushed by an opened camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Camera finished opening
    Opened,
    /// Capture configuration took effect and frames will follow
    Configured,
    /// Asynchronous failure; recoverable errors are treated as a dropped frame
    Error(DeviceError),
}

/// Items on the lossy frame queue
#[derive(Debug, Clone)]
pub enum FrameEvent {
    Frame(RawFrame),
    /// The device had no buffer to hand out this time
    BufferUnavailable,
}

/// Device side of a session's event queues.
///
/// Lifecycle events go through an unbounded queue and are never lost.
/// Frames go through a bounded queue; when it is full the frame is dropped
/// and counted instead of blocking the device thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    events: mpsc::UnboundedSender<DeviceEvent>,
    frames: mpsc::Sender<FrameEvent>,
    dropped: Arc<AtomicU64>,
}

/// Session side of the event queues
#[derive(Debug)]
pub struct EventReceiver {
    pub events: mpsc::UnboundedReceiver<DeviceEvent>,
    pub frames: mpsc::Receiver<FrameEvent>,
}

/// Creates the event queues for one session
pub fn event_channel(frame_capacity: usize, dropped: Arc<AtomicU64>) -> (EventSender, EventReceiver) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::channel(frame_capacity.max(1));

    (
        EventSender {
            events: events_tx,
            frames: frames_tx,
            dropped,
        },
        EventReceiver {
            events: events_rx,
            frames: frames_rx,
        },
    )
}

impl EventSender {
    /// Sends a lifecycle event; returns false once the session is gone
    pub fn event(&self, event: DeviceEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Offers a frame without blocking; returns false once the session is gone
    pub fn frame(&self, frame: RawFrame) -> bool {
        self.offer(FrameEvent::Frame(frame))
    }

    /// Reports that no buffer was available for this frame slot
    pub fn buffer_unavailable(&self) -> bool {
        self.offer(FrameEvent::BufferUnavailable)
    }

    /// Whether the receiving session has gone away
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    fn offer(&self, item: FrameEvent) -> bool {
        match self.frames.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Camera hardware (or an emulation of it)
pub trait CameraDevice: Send + Sync + 'static {
    /// Lists available cameras
    fn cameras(&self) -> Result<Vec<CameraInfo>, DeviceError>;

    /// Reports static capabilities of a camera
    fn characteristics(&self, camera_id: &str) -> Result<Characteristics, DeviceError>;

    /// Opens a camera. The backend reports [`DeviceEvent::Opened`] once it
    /// is ready to be configured; events and frames go to `events`.
    fn open(
        &self,
        camera_id: &str,
        events: EventSender,
    ) -> Result<Box<dyn DeviceHandle>, DeviceError>;
}

/// An opened camera, exclusively owned by one capture session
pub trait DeviceHandle: Send + 'static {
    /// Starts or replaces the repeating capture request. The backend reports
    /// [`DeviceEvent::Configured`] once the new parameters are in effect.
    fn configure(&mut self, params: &CaptureParameters) -> Result<(), DeviceError>;

    /// Releases the camera, returning once the device acknowledged the close
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Picks the first camera facing the requested direction
pub fn find_camera(
    device: &dyn CameraDevice,
    facing: LensFacing,
) -> Result<CameraInfo, CaptureError> {
    let cameras = device
        .cameras()
        .map_err(|_| CaptureError::DeviceUnavailable(facing))?;

    cameras
        .into_iter()
        .find(|camera| camera.facing == facing)
        .ok_or(CaptureError::DeviceUnavailable(facing))
}
