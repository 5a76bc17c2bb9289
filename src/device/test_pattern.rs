//! Synthetic camera producing moving gradient frames

use super::{
    CameraDevice, CameraInfo, CaptureParameters, Characteristics, DeviceEvent, DeviceHandle,
    EventSender, FocusMode, FpsRange, PixelFormat, RawFrame, Resolution,
};
use crate::config::TestPatternSettings;
use crate::device::FlashMode;
use crate::error::DeviceError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Camera backend that renders frames on a background thread
pub struct TestPatternDevice {
    settings: TestPatternSettings,
    open_ids: Arc<Mutex<HashSet<String>>>,
}

impl TestPatternDevice {
    pub fn new(settings: TestPatternSettings) -> Self {
        Self {
            settings,
            open_ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn camera_index(&self, camera_id: &str) -> Result<usize, DeviceError> {
        camera_id
            .parse::<usize>()
            .ok()
            .filter(|i| *i < self.settings.cameras.len())
            .ok_or_else(|| DeviceError::NotFound(camera_id.to_string()))
    }
}

impl CameraDevice for TestPatternDevice {
    fn cameras(&self) -> Result<Vec<CameraInfo>, DeviceError> {
        Ok(self
            .settings
            .cameras
            .iter()
            .enumerate()
            .map(|(i, facing)| CameraInfo {
                id: i.to_string(),
                facing: *facing,
            })
            .collect())
    }

    fn characteristics(&self, camera_id: &str) -> Result<Characteristics, DeviceError> {
        self.camera_index(camera_id)?;

        Ok(Characteristics {
            sensor_orientation: self.settings.sensor_orientation,
            pixel_format: PixelFormat::Rgb8,
            resolutions: self
                .settings
                .resolutions
                .iter()
                .map(|[w, h]| Resolution::new(*w, *h))
                .collect(),
            fps_ranges: self
                .settings
                .fps_ranges
                .iter()
                .map(|[min, max]| FpsRange::new(*min, *max))
                .collect(),
            focus_modes: vec![FocusMode::ContinuousVideo, FocusMode::Auto, FocusMode::Off],
            flash_available: true,
        })
    }

    fn open(
        &self,
        camera_id: &str,
        events: EventSender,
    ) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        self.camera_index(camera_id)?;

        if !self.open_ids.lock().insert(camera_id.to_string()) {
            return Err(DeviceError::InUse(camera_id.to_string()));
        }

        info!(camera = %camera_id, "Test pattern camera opened");
        events.event(DeviceEvent::Opened);

        Ok(Box::new(TestPatternHandle {
            camera_id: camera_id.to_string(),
            events,
            open_ids: Arc::clone(&self.open_ids),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            closed: false,
        }))
    }
}

struct TestPatternHandle {
    camera_id: String,
    events: EventSender,
    open_ids: Arc<Mutex<HashSet<String>>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl TestPatternHandle {
    fn stop_worker(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl DeviceHandle for TestPatternHandle {
    fn configure(&mut self, params: &CaptureParameters) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Fatal("camera already closed".to_string()));
        }

        self.stop_worker();

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);

        let resolution = params.format.resolution;
        let fps = (params.format.fps_range.max / 1000).max(1);
        let interval = Duration::from_secs_f64(1.0 / fps as f64);
        let torch = params.flash == FlashMode::Torch;
        let events = self.events.clone();

        debug!(
            camera = %self.camera_id,
            resolution = %resolution,
            fps = %fps,
            torch = %torch,
            "Test pattern reconfigured"
        );

        self.worker = Some(std::thread::spawn(move || {
            let mut tick = 0u32;
            let mut next = Instant::now();

            while !stop.load(Ordering::Relaxed) {
                let frame = render(resolution, tick, torch);
                if !events.frame(frame) {
                    break;
                }
                tick = tick.wrapping_add(1);

                next += interval;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        }));

        self.events.event(DeviceEvent::Configured);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Ok(());
        }

        self.stop_worker();
        self.open_ids.lock().remove(&self.camera_id);
        self.closed = true;

        info!(camera = %self.camera_id, "Test pattern camera closed");
        Ok(())
    }
}

impl Drop for TestPatternHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Diagonal RGB gradient that scrolls one step per frame
fn render(resolution: Resolution, tick: u32, torch: bool) -> RawFrame {
    let Resolution { width, height } = resolution;
    let boost: u8 = if torch { 64 } else { 0 };
    let mut data = Vec::with_capacity(resolution.pixels() as usize * 3);

    for y in 0..height {
        for x in 0..width {
            let r = ((x + tick) % 256) as u8;
            let g = ((y + tick) % 256) as u8;
            let b = ((x + y) % 256) as u8;
            data.extend_from_slice(&[
                r.saturating_add(boost),
                g.saturating_add(boost),
                b.saturating_add(boost),
            ]);
        }
    }

    let timestamp_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    RawFrame {
        data: Bytes::from(data),
        width,
        height,
        pixel_format: PixelFormat::Rgb8,
        timestamp_ns,
    }
}
