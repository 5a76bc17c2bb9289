//! Capture session: one opened camera and its state machine
//!
//! A session owns the device handle exclusively. Device lifecycle events,
//! frames and caller commands are consumed by a single task; heavy frame
//! work is handed to blocking workers, bounded by a semaphore.

mod gate;
mod pipeline;

pub use pipeline::{frame_rotation, thumbnail_size};

use crate::codec::ImageCodec;
use crate::config::CaptureConfiguration;
use crate::controller::{CaptureClient, FrameNotification, SessionFailure};
use crate::device::{
    event_channel, CameraDevice, CameraInfo, CaptureParameters, DeviceEvent, DeviceHandle,
    EventReceiver, FlashMode, FrameEvent,
};
use crate::error::{CaptureError, DeviceError};
use crate::negotiate::{negotiate, NegotiatedFormat};
use crate::stats::{SessionCounters, SessionStats};
use crate::store::FileStore;
use gate::NotificationGate;
use parking_lot::Mutex;
use pipeline::{Frame, FramePipeline};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Opening,
    Active,
    Reconfiguring,
    Stopping,
    Closed,
    Errored,
}

impl SessionState {
    /// Whether a session in this state holds the camera
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Opening | Self::Active | Self::Reconfiguring)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Reconfiguring => "reconfiguring",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Shared resources a controller lends to each session it starts
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub device: Arc<dyn CameraDevice>,
    pub codec: Arc<dyn ImageCodec>,
    pub store: Arc<FileStore>,
    pub client: Arc<dyn CaptureClient>,
    pub latest: Arc<Mutex<Option<FrameNotification>>>,
    pub display_rotation: Arc<AtomicU32>,
    pub state: Arc<watch::Sender<SessionState>>,
    pub max_in_flight: usize,
    pub event_capacity: usize,
}

enum SessionCommand {
    SetFlash {
        enabled: bool,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    Stop,
}

/// Controller side of a running session
pub(crate) struct SessionHandle {
    id: u64,
    camera: CameraInfo,
    format: NegotiatedFormat,
    commands: mpsc::Sender<SessionCommand>,
    counters: Arc<SessionCounters>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn camera(&self) -> &CameraInfo {
        &self.camera
    }

    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Asks the session to switch the torch and waits for the device
    pub async fn set_flash(&self, enabled: bool) -> Result<(), CaptureError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(SessionCommand::SetFlash { enabled, reply })
            .await
            .map_err(|_| CaptureError::SessionGone)?;

        result.await.map_err(|_| CaptureError::SessionGone)?
    }

    /// Stops the session and waits until the camera is released.
    ///
    /// Safe to call repeatedly and after the session ended on its own.
    /// Frames still in the pipeline finish on their own; their results are
    /// discarded.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        // A failed send means the task already exited
        let _ = self.commands.send(SessionCommand::Stop).await;

        if let Err(e) = task.await {
            error!(session = self.id, error = %e, "Session task ended abnormally");
        }
    }
}

/// The session task
pub(crate) struct CaptureSession {
    id: u64,
    camera: CameraInfo,
    params: CaptureParameters,
    flash_available: bool,
    device: Option<Box<dyn DeviceHandle>>,
    configure_issued: bool,
    state: Arc<watch::Sender<SessionState>>,
    pipeline: Arc<FramePipeline>,
    format: Arc<NegotiatedFormat>,
    permits: Arc<Semaphore>,
    display_rotation: Arc<AtomicU32>,
    counters: Arc<SessionCounters>,
}

impl CaptureSession {
    /// Negotiates a format, opens the camera and spawns the session task.
    ///
    /// Returns once the device accepted the open request; the session
    /// becomes active when the device reports its configuration. With
    /// `announce` set, the client gets its pending notification before the
    /// task can deliver any frame.
    pub async fn start(
        ctx: &SessionContext,
        id: u64,
        config: &CaptureConfiguration,
        camera: CameraInfo,
        announce: bool,
    ) -> Result<SessionHandle, CaptureError> {
        let device = Arc::clone(&ctx.device);
        let camera_id = camera.id.clone();
        let characteristics = task::spawn_blocking(move || device.characteristics(&camera_id))
            .await
            .map_err(|e| CaptureError::DeviceOpen(DeviceError::Fatal(e.to_string())))?
            .map_err(CaptureError::DeviceOpen)?;

        let format = negotiate(config, &characteristics)?;

        let flash = if config.flash_enabled && !characteristics.flash_available {
            warn!(camera = %camera.id, "Flash requested but camera has none");
            FlashMode::Off
        } else {
            FlashMode::from(config.flash_enabled)
        };

        let counters = Arc::new(SessionCounters::default());
        let (events, queues) =
            event_channel(ctx.event_capacity, Arc::clone(&counters.queue_dropped));

        ctx.state.send_replace(SessionState::Opening);

        let device = Arc::clone(&ctx.device);
        let camera_id = camera.id.clone();
        let opened = task::spawn_blocking(move || device.open(&camera_id, events))
            .await
            .map_err(|e| DeviceError::Fatal(e.to_string()))
            .and_then(|result| result);

        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                ctx.state.send_replace(SessionState::Closed);
                warn!(camera = %camera.id, error = %e, "Failed to open camera");
                return Err(CaptureError::DeviceOpen(e));
            }
        };

        info!(
            session = id,
            camera = %camera.id,
            facing = %camera.facing,
            resolution = %format.resolution,
            fps_range = %format.fps_range,
            flash = ?flash,
            "Camera opened"
        );

        let gate = Arc::new(NotificationGate::new(
            Arc::clone(&ctx.client),
            Arc::clone(&ctx.latest),
        ));

        let pipeline = Arc::new(FramePipeline {
            codec: Arc::clone(&ctx.codec),
            store: Arc::clone(&ctx.store),
            gate,
            counters: Arc::clone(&counters),
            facing: camera.facing,
            sensor_orientation: characteristics.sensor_orientation,
            thumbnail_ratio: config.has_thumbnail.then_some(config.thumbnail_ratio),
        });

        let session = CaptureSession {
            id,
            camera: camera.clone(),
            params: CaptureParameters {
                format: format.clone(),
                flash,
            },
            flash_available: characteristics.flash_available,
            device: Some(handle),
            configure_issued: false,
            state: Arc::clone(&ctx.state),
            pipeline,
            format: Arc::new(format.clone()),
            permits: Arc::new(Semaphore::new(ctx.max_in_flight.max(1))),
            display_rotation: Arc::clone(&ctx.display_rotation),
            counters: Arc::clone(&counters),
        };

        if announce {
            ctx.client.on_pending();
        }

        let (commands_tx, commands_rx) = mpsc::channel(4);
        let task = tokio::spawn(session.run(commands_rx, queues));

        Ok(SessionHandle {
            id,
            camera,
            format,
            commands: commands_tx,
            counters,
            task: Some(task),
        })
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>, mut queues: EventReceiver) {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(SessionCommand::SetFlash { enabled, reply }) => {
                        let result = self.set_flash(enabled).await;
                        let _ = reply.send(result);
                    }
                    // Controller dropped its handle
                    Some(SessionCommand::Stop) | None => {
                        self.shutdown().await;
                        break;
                    }
                },

                event = queues.events.recv() => {
                    let outcome = match event {
                        Some(event) => self.on_event(event).await,
                        None => Err(DeviceError::Disconnected),
                    };
                    if let Err(e) = outcome {
                        self.fail(e).await;
                        break;
                    }
                }

                frame = queues.frames.recv() => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => {
                        self.fail(DeviceError::Disconnected).await;
                        break;
                    }
                },
            }
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(session = self.id, from = %previous, to = %next, "Session state changed");
        }
    }

    async fn on_event(&mut self, event: DeviceEvent) -> Result<(), DeviceError> {
        match event {
            DeviceEvent::Opened => {
                if self.current_state() == SessionState::Opening && !self.configure_issued {
                    self.configure_issued = true;
                    self.configure().await?;
                }
            }
            DeviceEvent::Configured => match self.current_state() {
                SessionState::Opening => {
                    self.set_state(SessionState::Active);
                    info!(session = self.id, camera = %self.camera.id, "Capture active");
                }
                SessionState::Reconfiguring => self.set_state(SessionState::Active),
                _ => {}
            },
            DeviceEvent::Error(e) if e.is_recoverable() => {
                SessionCounters::bump(&self.counters.frames_skipped);
                warn!(session = self.id, error = %e, "Recoverable device error, frame dropped");
            }
            DeviceEvent::Error(e) => return Err(e),
        }
        Ok(())
    }

    fn on_frame(&self, event: FrameEvent) {
        let raw = match event {
            FrameEvent::Frame(raw) => raw,
            FrameEvent::BufferUnavailable => {
                SessionCounters::bump(&self.counters.frames_skipped);
                trace!(session = self.id, "No buffer available");
                return;
            }
        };

        SessionCounters::bump(&self.counters.frames_received);

        if self.current_state() != SessionState::Active {
            SessionCounters::bump(&self.counters.frames_skipped);
            return;
        }

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            SessionCounters::bump(&self.counters.pipeline_dropped);
            debug!(session = self.id, "Pipeline saturated, frame dropped");
            return;
        };

        let frame = Frame {
            raw,
            format: Arc::clone(&self.format),
            display_rotation: self.display_rotation.load(Ordering::Relaxed),
        };
        let pipeline = Arc::clone(&self.pipeline);

        task::spawn_blocking(move || {
            pipeline.run(frame);
            drop(permit);
        });
    }

    /// Pushes the current parameters to the device
    async fn configure(&mut self) -> Result<(), DeviceError> {
        let mut device = self.device.take().ok_or(DeviceError::Disconnected)?;
        let params = self.params.clone();

        let (device, result) = task::spawn_blocking(move || {
            let result = device.configure(&params);
            (device, result)
        })
        .await
        .map_err(|e| DeviceError::Fatal(format!("configure task failed: {e}")))?;

        self.device = Some(device);
        result
    }

    async fn set_flash(&mut self, enabled: bool) -> Result<(), CaptureError> {
        if enabled && !self.flash_available {
            return Err(CaptureError::Reconfigure(DeviceError::Unsupported(
                "camera has no flash".to_string(),
            )));
        }

        let flash = FlashMode::from(enabled);
        if flash == self.params.flash {
            return Ok(());
        }

        let previous = std::mem::replace(&mut self.params.flash, flash);
        let state = self.current_state();

        // Picked up by the initial configure once the device opens
        if state == SessionState::Opening && !self.configure_issued {
            return Ok(());
        }

        if state == SessionState::Active {
            self.set_state(SessionState::Reconfiguring);
        }

        match self.configure().await {
            Ok(()) => {
                info!(session = self.id, flash = ?flash, "Flash changed");
                Ok(())
            }
            Err(e) => {
                self.params.flash = previous;
                if state == SessionState::Active {
                    self.set_state(SessionState::Active);
                }
                warn!(session = self.id, error = %e, "Flash change rejected");
                Err(CaptureError::Reconfigure(e))
            }
        }
    }

    async fn shutdown(&mut self) {
        self.set_state(SessionState::Stopping);
        self.pipeline.gate.close();
        self.release().await;
        self.set_state(SessionState::Closed);

        let stats = self.counters.snapshot();
        info!(
            session = self.id,
            camera = %self.camera.id,
            received = stats.frames_received,
            persisted = stats.frames_persisted,
            dropped = stats.queue_dropped + stats.pipeline_dropped,
            "Capture session closed"
        );
    }

    async fn fail(&mut self, error: DeviceError) {
        error!(
            session = self.id,
            camera = %self.camera.id,
            error = %error,
            "Device failed, closing session"
        );

        self.set_state(SessionState::Errored);
        self.pipeline.gate.fail(SessionFailure {
            session_id: self.id,
            camera_id: self.camera.id.clone(),
            error,
        });
        self.release().await;
        self.set_state(SessionState::Closed);
    }

    /// Closes the device, waiting for the acknowledgement
    async fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };

        match task::spawn_blocking(move || device.close()).await {
            Ok(Ok(())) => debug!(session = self.id, "Camera released"),
            Ok(Err(e)) => warn!(session = self.id, error = %e, "Camera close reported an error"),
            Err(e) => error!(session = self.id, error = %e, "Camera close task failed"),
        }
    }
}
