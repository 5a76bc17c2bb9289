//! Shared fixtures: a camera driven by the test and a controller around it
#![allow(dead_code)]

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use rolling_capture::device::{
    CameraDevice, CameraInfo, CaptureParameters, Characteristics, DeviceEvent, DeviceHandle,
    EventSender, FlashMode, FocusMode, FpsRange, PixelFormat, RawFrame, Resolution,
};
use rolling_capture::{
    CaptureConfiguration, CaptureController, ChannelClient, DeviceError, FileStore,
    FrameNotification, JpegCodec, LensFacing, Notification, SessionState,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Script {
    current: Option<EventSender>,
    open_now: usize,
    max_open: usize,
    opens: Vec<String>,
    closes: usize,
    configured: Vec<CaptureParameters>,
    fail_open: HashSet<String>,
    reject_configure: bool,
}

/// Blocks device close while held
#[derive(Default)]
struct CloseLatch {
    held: Mutex<bool>,
    released: Condvar,
}

impl CloseLatch {
    fn set(&self, held: bool) {
        *self.held.lock() = held;
        self.released.notify_all();
    }

    fn wait(&self) {
        let mut held = self.held.lock();
        while *held {
            if self.released.wait_for(&mut held, WAIT).timed_out() {
                break;
            }
        }
    }
}

/// Camera whose frames and failures are pushed by the test
pub struct ScriptedDevice {
    cameras: Vec<CameraInfo>,
    characteristics: Characteristics,
    script: Arc<Mutex<Script>>,
    latch: Arc<CloseLatch>,
}

impl ScriptedDevice {
    /// Back camera "0" and front camera "1"
    pub fn new() -> Self {
        Self::with_cameras(&[LensFacing::Back, LensFacing::Front])
    }

    pub fn with_cameras(facings: &[LensFacing]) -> Self {
        Self {
            cameras: facings
                .iter()
                .enumerate()
                .map(|(i, facing)| CameraInfo {
                    id: i.to_string(),
                    facing: *facing,
                })
                .collect(),
            characteristics: Characteristics {
                sensor_orientation: 90,
                pixel_format: PixelFormat::Rgb8,
                resolutions: vec![Resolution::new(64, 48), Resolution::new(160, 120)],
                fps_ranges: vec![FpsRange::new(15000, 15000), FpsRange::new(30000, 30000)],
                focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousVideo],
                flash_available: true,
            },
            script: Arc::new(Mutex::new(Script::default())),
            latch: Arc::new(CloseLatch::default()),
        }
    }

    /// While held, closing the camera blocks until released
    pub fn hold_close(&self, held: bool) {
        self.latch.set(held);
    }

    /// Makes every later open of `camera_id` fail
    pub fn fail_open(&self, camera_id: &str) {
        self.script.lock().fail_open.insert(camera_id.to_string());
    }

    /// Makes later configure calls fail
    pub fn reject_configure(&self, reject: bool) {
        self.script.lock().reject_configure = reject;
    }

    /// Delivers one frame at the last configured resolution
    pub fn push_frame(&self) -> bool {
        let script = self.script.lock();
        let (Some(events), Some(params)) = (&script.current, script.configured.last()) else {
            return false;
        };

        let Resolution { width, height } = params.format.resolution;
        let data: Vec<u8> = (0..width * height * 3).map(|i| (i % 253) as u8).collect();
        events.frame(RawFrame {
            data: Bytes::from(data),
            width,
            height,
            pixel_format: PixelFormat::Rgb8,
            timestamp_ns: 0,
        })
    }

    pub fn push_error(&self, error: DeviceError) -> bool {
        match &self.script.lock().current {
            Some(events) => events.event(DeviceEvent::Error(error)),
            None => false,
        }
    }

    pub fn opens(&self) -> Vec<String> {
        self.script.lock().opens.clone()
    }

    pub fn closes(&self) -> usize {
        self.script.lock().closes
    }

    /// Most cameras ever open at the same time
    pub fn max_open(&self) -> usize {
        self.script.lock().max_open
    }

    pub fn last_flash(&self) -> Option<FlashMode> {
        self.script.lock().configured.last().map(|p| p.flash)
    }
}

impl CameraDevice for ScriptedDevice {
    fn cameras(&self) -> Result<Vec<CameraInfo>, DeviceError> {
        Ok(self.cameras.clone())
    }

    fn characteristics(&self, camera_id: &str) -> Result<Characteristics, DeviceError> {
        if self.cameras.iter().any(|c| c.id == camera_id) {
            Ok(self.characteristics.clone())
        } else {
            Err(DeviceError::NotFound(camera_id.to_string()))
        }
    }

    fn open(
        &self,
        camera_id: &str,
        events: EventSender,
    ) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        let mut script = self.script.lock();
        if script.fail_open.contains(camera_id) {
            return Err(DeviceError::InUse(camera_id.to_string()));
        }

        script.open_now += 1;
        script.max_open = script.max_open.max(script.open_now);
        script.opens.push(camera_id.to_string());
        script.current = Some(events.clone());
        events.event(DeviceEvent::Opened);

        Ok(Box::new(ScriptedHandle {
            events,
            script: Arc::clone(&self.script),
            latch: Arc::clone(&self.latch),
            closed: false,
        }))
    }
}

struct ScriptedHandle {
    events: EventSender,
    script: Arc<Mutex<Script>>,
    latch: Arc<CloseLatch>,
    closed: bool,
}

impl DeviceHandle for ScriptedHandle {
    fn configure(&mut self, params: &CaptureParameters) -> Result<(), DeviceError> {
        let mut script = self.script.lock();
        if script.reject_configure {
            return Err(DeviceError::Unsupported("scripted rejection".to_string()));
        }

        script.configured.push(params.clone());
        self.events.event(DeviceEvent::Configured);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.latch.wait();

        let mut script = self.script.lock();
        script.open_now -= 1;
        script.closes += 1;
        script.current = None;
        Ok(())
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Controller wired to a [`ScriptedDevice`] and a channel client
pub struct Harness {
    pub controller: CaptureController,
    pub device: Arc<ScriptedDevice>,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_device(ScriptedDevice::new())
    }

    pub fn with_device(device: ScriptedDevice) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(device);
        let (client, notifications) = ChannelClient::new();

        let controller = CaptureController::new(
            device.clone(),
            Arc::new(JpegCodec::default()),
            FileStore::open(dir.path()).unwrap(),
            client,
        );

        Self {
            controller,
            device,
            notifications,
            dir,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Starts capture and waits until frames are accepted
    pub async fn start(&mut self, config: CaptureConfiguration) {
        self.controller.start_capture(config).await.unwrap();
        assert_eq!(self.next().await, Notification::Pending);
        self.wait_for(SessionState::Active).await;
    }

    pub async fn wait_for(&self, state: SessionState) {
        let mut states = self.controller.subscribe_state();
        timeout(WAIT, states.wait_for(|s| *s == state))
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
            .unwrap();
    }

    pub async fn next(&mut self) -> Notification {
        timeout(WAIT, self.notifications.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("client channel closed")
    }

    /// Pushes one frame and waits for its notification
    pub async fn capture_frame(&mut self) -> FrameNotification {
        assert!(self.device.push_frame(), "device is not streaming");
        match self.next().await {
            Notification::Frame(frame) => frame,
            other => panic!("expected a frame notification, got {:?}", other),
        }
    }

    /// Asserts nothing more arrives within a short grace period
    pub async fn assert_quiet(&mut self) {
        let late = timeout(Duration::from_millis(200), self.notifications.recv()).await;
        assert!(late.is_err(), "unexpected notification: {:?}", late);
    }
}

/// Sequence ids of `<prefix>-<n>.jpg` files in `dir`, sorted
pub fn files_on_disk(dir: &Path, prefix: &str) -> Vec<u64> {
    let mut ids: Vec<u64> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| {
            let name = entry.unwrap().file_name().into_string().ok()?;
            let id = name.strip_prefix(prefix)?.strip_prefix('-')?.strip_suffix(".jpg")?;
            id.parse().ok()
        })
        .collect();
    ids.sort_unstable();
    ids
}
