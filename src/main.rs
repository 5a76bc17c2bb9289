//! Rolling capture demo against the synthetic camera

use anyhow::{Context, Result};
use clap::Parser;
use rolling_capture::config::Config;
use rolling_capture::{
    CaptureConfiguration, CaptureController, ChannelClient, LensFacing, Notification,
    TestPatternDevice,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rolling-capture")]
#[command(about = "Continuous camera capture into a rolling window of JPEG files")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Camera to start with (front or back)
    #[arg(long, default_value = "back")]
    facing: LensFacing,

    /// Requested frame width
    #[arg(long)]
    width: Option<u32>,

    /// Requested frame height
    #[arg(long)]
    height: Option<u32>,

    /// Requested frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Also write thumbnails scaled by this ratio (0, 1]
    #[arg(long)]
    thumbnail_ratio: Option<f32>,

    /// Start with the torch on
    #[arg(long)]
    flash: bool,

    /// Stop after this many seconds (runs until Ctrl+C otherwise)
    #[arg(long)]
    duration: Option<u64>,

    /// Switch to the other camera after this many seconds
    #[arg(long)]
    switch_after: Option<u64>,
}

impl Cli {
    fn capture_configuration(&self) -> CaptureConfiguration {
        let mut config = CaptureConfiguration {
            lens_facing: self.facing,
            flash_enabled: self.flash,
            ..Default::default()
        };

        if let Some(width) = self.width {
            config.target_width = width;
        }
        if let Some(height) = self.height {
            config.target_height = height;
        }
        if let Some(fps) = self.fps {
            config.target_fps = fps;
        }
        if let Some(ratio) = self.thumbnail_ratio {
            config.has_thumbnail = true;
            config.thumbnail_ratio = ratio;
        }

        config.sanitized()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if Path::new(&cli.config).exists() {
        Config::load(&cli.config).with_context(|| format!("loading {}", cli.config))?
    } else {
        Config::default()
    };

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!(
        config_path = %cli.config,
        output_dir = %config.capture.output_dir.display(),
        "Rolling capture starting"
    );

    let (client, mut notifications) = ChannelClient::new();
    let device = Arc::new(TestPatternDevice::new(config.device.clone()));
    let controller = CaptureController::from_settings(&config.capture, device, client)
        .context("opening output directory")?;

    let capture = cli.capture_configuration();
    controller.start_capture(capture.clone()).await?;

    let deadline = sleep(Duration::from_secs(cli.duration.unwrap_or_default()));
    tokio::pin!(deadline);

    let switch = sleep(Duration::from_secs(cli.switch_after.unwrap_or_default()));
    tokio::pin!(switch);
    let mut switched = cli.switch_after.is_none();

    let mut stats_tick = interval(Duration::from_secs(5));
    let mut previous = controller.stats().await.unwrap_or_default();
    let mut previous_at = Instant::now();

    info!("Capturing, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline, if cli.duration.is_some() => {
                info!("Duration reached");
                break;
            }
            _ = &mut switch, if !switched => {
                switched = true;
                let facing = match capture.lens_facing {
                    LensFacing::Back => LensFacing::Front,
                    LensFacing::Front => LensFacing::Back,
                };
                if let Err(e) = controller.set_camera_position(facing).await {
                    error!(error = %e, "Camera switch failed");
                    break;
                }
            }
            _ = stats_tick.tick() => {
                if let Some(stats) = controller.stats().await {
                    let fps = stats.calculate_fps(&previous, previous_at.elapsed().as_secs_f64());
                    info!(
                        state = %controller.state(),
                        received = stats.frames_received,
                        persisted = stats.frames_persisted,
                        thumbnails = stats.thumbnails_persisted,
                        fps = %format!("{:.1}", fps),
                        drop_rate = %format!("{:.3}", stats.drop_rate()),
                        "Stats"
                    );
                    previous = stats;
                    previous_at = Instant::now();
                }
            }
            notification = notifications.recv() => match notification {
                Some(Notification::Frame(frame)) => println!("{}", frame.to_json()),
                Some(Notification::Pending) => info!("Capture pending"),
                Some(Notification::Error(failure)) => {
                    error!(
                        session = failure.session_id,
                        camera = %failure.camera_id,
                        error = %failure.error,
                        "Capture failed"
                    );
                    break;
                }
                None => break,
            },
        }
    }

    if let Err(e) = controller.stop_capture().await {
        warn!(error = %e, "Stop reported an error");
    }

    if let Some(stats) = controller.stats().await {
        info!(
            persisted = stats.frames_persisted,
            dropped = stats.queue_dropped + stats.pipeline_dropped,
            "Capture finished"
        );
    }

    Ok(())
}
