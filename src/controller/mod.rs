//! Public capture API
//!
//! [`CaptureController`] serializes caller commands and owns at most one
//! capture session at a time. A new session is only started once the
//! previous one has released its camera.

mod client;

pub use client::{CaptureClient, ChannelClient, FrameNotification, Notification, SessionFailure};

use crate::codec::{ImageCodec, JpegCodec};
use crate::config::{CaptureConfiguration, CaptureSettings, LensFacing};
use crate::device::{find_camera, CameraDevice, CameraInfo};
use crate::error::{CaptureError, DeviceError, PersistError};
use crate::session::{CaptureSession, SessionContext, SessionHandle, SessionState};
use crate::stats::SessionStats;
use crate::store::FileStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task;
use tracing::{debug, info, warn};

const DEFAULT_MAX_IN_FLIGHT: usize = 4;
const DEFAULT_EVENT_CAPACITY: usize = 8;

struct ActiveSession {
    handle: SessionHandle,
    config: CaptureConfiguration,
}

/// Starts, stops and reconfigures capture sessions
pub struct CaptureController {
    ctx: SessionContext,
    session: AsyncMutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
}

impl CaptureController {
    pub fn new(
        device: Arc<dyn CameraDevice>,
        codec: Arc<dyn ImageCodec>,
        store: FileStore,
        client: Arc<dyn CaptureClient>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);

        Self {
            ctx: SessionContext {
                device,
                codec,
                store: Arc::new(store),
                client,
                latest: Arc::new(Mutex::new(None)),
                display_rotation: Arc::new(AtomicU32::new(0)),
                state: Arc::new(state),
                max_in_flight: DEFAULT_MAX_IN_FLIGHT,
                event_capacity: DEFAULT_EVENT_CAPACITY,
            },
            session: AsyncMutex::new(None),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Builds a controller with a [`JpegCodec`] and a store at the
    /// configured output directory
    pub fn from_settings(
        settings: &CaptureSettings,
        device: Arc<dyn CameraDevice>,
        client: Arc<dyn CaptureClient>,
    ) -> io::Result<Self> {
        let store = FileStore::open(&settings.output_dir)?;
        let codec = Arc::new(JpegCodec::new(settings.jpeg_quality));

        Ok(Self::new(device, codec, store, client)
            .with_limits(settings.max_in_flight, settings.event_capacity))
    }

    /// Overrides the pipeline concurrency and the device queue depth
    pub fn with_limits(mut self, max_in_flight: usize, event_capacity: usize) -> Self {
        self.ctx.max_in_flight = max_in_flight.max(1);
        self.ctx.event_capacity = event_capacity.max(1);
        self
    }

    /// Starts capturing with `config`.
    ///
    /// Returns once the camera accepted the open request; the caller gets a
    /// pending notification and then one notification per persisted frame.
    pub async fn start_capture(&self, config: CaptureConfiguration) -> Result<(), CaptureError> {
        let config = config.sanitized();
        let mut slot = self.session.lock().await;

        if self.state().is_live() {
            return Err(CaptureError::AlreadyCapturing);
        }

        // A session that failed on its own is already closed; join its task
        if let Some(mut previous) = slot.take() {
            previous.handle.stop().await;
        }

        let camera = self.find_camera(config.lens_facing).await?;

        self.ctx.store.reset().map_err(|source| {
            CaptureError::Persist(PersistError {
                path: self.ctx.store.dir().to_path_buf(),
                source,
            })
        })?;
        *self.ctx.latest.lock() = None;

        let handle = self.open_session(&config, camera, true).await?;
        *slot = Some(ActiveSession { handle, config });
        Ok(())
    }

    /// [`Self::start_capture`] with caller options parsed leniently
    pub async fn start_capture_with_options(&self, options: &Value) -> Result<(), CaptureError> {
        self.start_capture(CaptureConfiguration::from_options(options))
            .await
    }

    /// Stops the session and waits for the camera to be released.
    ///
    /// Stopping an already stopped session succeeds.
    pub async fn stop_capture(&self) -> Result<(), CaptureError> {
        let mut slot = self.session.lock().await;
        let active = slot.as_mut().ok_or(CaptureError::NoActiveSession)?;

        active.handle.stop().await;
        info!(session = active.handle.id(), "Capture stopped");
        Ok(())
    }

    /// Switches the torch without restarting the session
    pub async fn set_flash_mode(&self, enabled: bool) -> Result<(), CaptureError> {
        let mut slot = self.session.lock().await;
        let active = self.live_session(&mut *slot)?;

        active.handle.set_flash(enabled).await?;
        active.config.flash_enabled = enabled;
        Ok(())
    }

    /// Restarts capture on the camera facing `facing`.
    ///
    /// The configuration carries over and file numbering continues. If the
    /// new camera cannot be opened the old one is already closed and no
    /// session remains.
    pub async fn set_camera_position(&self, facing: LensFacing) -> Result<(), CaptureError> {
        let mut slot = self.session.lock().await;
        let active = self.live_session(&mut *slot)?;

        if active.handle.camera().facing == facing {
            debug!(facing = %facing, "Camera already selected");
            return Ok(());
        }

        let camera = self.find_camera(facing).await?;
        let config = active.config.with_facing(facing);

        if let Some(mut previous) = slot.take() {
            previous.handle.stop().await;
        }

        match self.open_session(&config, camera, false).await {
            Ok(handle) => {
                info!(session = handle.id(), facing = %facing, "Camera switched");
                *slot = Some(ActiveSession { handle, config });
                Ok(())
            }
            Err(e) => {
                warn!(facing = %facing, error = %e, "Camera switch failed");
                Err(CaptureError::SwitchFailed(Box::new(e)))
            }
        }
    }

    /// Records the host display rotation in degrees; applies to frames
    /// arriving from now on
    pub fn set_display_rotation(&self, degrees: u32) {
        self.ctx
            .display_rotation
            .store(degrees % 360, Ordering::Relaxed);
    }

    pub fn state(&self) -> SessionState {
        *self.ctx.state.borrow()
    }

    /// Receives every state transition of the current and future sessions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.ctx.state.subscribe()
    }

    /// Counters of the current (or last) session
    pub async fn stats(&self) -> Option<SessionStats> {
        let slot = self.session.lock().await;
        slot.as_ref().map(|active| active.handle.stats())
    }

    /// Most recently delivered frame of the current capture
    pub fn latest_frame(&self) -> Option<FrameNotification> {
        self.ctx.latest.lock().clone()
    }

    /// Configuration of the current (or last) session
    pub async fn configuration(&self) -> Option<CaptureConfiguration> {
        let slot = self.session.lock().await;
        slot.as_ref().map(|active| active.config.clone())
    }

    fn live_session<'a>(
        &self,
        slot: &'a mut Option<ActiveSession>,
    ) -> Result<&'a mut ActiveSession, CaptureError> {
        if !self.state().is_live() {
            return Err(CaptureError::NoActiveSession);
        }
        slot.as_mut().ok_or(CaptureError::NoActiveSession)
    }

    async fn find_camera(&self, facing: LensFacing) -> Result<CameraInfo, CaptureError> {
        let device = Arc::clone(&self.ctx.device);
        task::spawn_blocking(move || find_camera(device.as_ref(), facing))
            .await
            .map_err(|e| CaptureError::DeviceOpen(DeviceError::Fatal(e.to_string())))?
    }

    async fn open_session(
        &self,
        config: &CaptureConfiguration,
        camera: CameraInfo,
        announce: bool,
    ) -> Result<SessionHandle, CaptureError> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let handle = CaptureSession::start(&self.ctx, id, config, camera, announce).await?;

        debug!(
            session = id,
            camera = %handle.camera().id,
            resolution = %handle.format().resolution,
            "Session started"
        );
        Ok(handle)
    }
}
