//! Matching a requested configuration against camera capabilities

use crate::config::CaptureConfiguration;
use crate::device::{Characteristics, FocusMode, FpsRange, PixelFormat, Resolution};
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Device parameters chosen for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedFormat {
    pub pixel_format: PixelFormat,
    pub resolution: Resolution,
    pub fps_range: FpsRange,
    pub focus_mode: FocusMode,
}

/// Smallest supported size covering the request in both dimensions.
///
/// Falls back to the first reported size when nothing is large enough.
pub fn select_resolution(supported: &[Resolution], requested: Resolution) -> Option<Resolution> {
    supported
        .iter()
        .filter(|r| r.covers(&requested))
        .min_by_key(|r| r.pixels())
        .or_else(|| supported.first())
        .copied()
}

/// First range whose lower bound reaches the requested rate.
///
/// Ranges are in milli-fps. When none qualifies the last reported range is
/// used.
pub fn select_fps_range(supported: &[FpsRange], fps: u32) -> Option<FpsRange> {
    let wanted = fps.saturating_mul(1000);

    supported
        .iter()
        .find(|range| range.min >= wanted)
        .or_else(|| supported.last())
        .copied()
}

/// Continuous video autofocus, then single-shot autofocus, then whatever
/// the device lists first
pub fn select_focus_mode(supported: &[FocusMode]) -> FocusMode {
    [FocusMode::ContinuousVideo, FocusMode::Auto]
        .into_iter()
        .find(|preferred| supported.contains(preferred))
        .or_else(|| supported.first().copied())
        .unwrap_or(FocusMode::Fixed)
}

/// Negotiates the full format for a session
pub fn negotiate(
    config: &CaptureConfiguration,
    characteristics: &Characteristics,
) -> Result<NegotiatedFormat, CaptureError> {
    let requested = Resolution::new(config.target_width, config.target_height);

    let resolution = select_resolution(&characteristics.resolutions, requested)
        .ok_or_else(|| CaptureError::Negotiation("camera reports no output sizes".to_string()))?;

    let fps_range = select_fps_range(&characteristics.fps_ranges, config.target_fps).ok_or_else(
        || CaptureError::Negotiation("camera reports no frame rate ranges".to_string()),
    )?;

    let focus_mode = select_focus_mode(&characteristics.focus_modes);

    debug!(
        requested = %requested,
        resolution = %resolution,
        fps_range = %fps_range,
        focus = ?focus_mode,
        "Negotiated capture format"
    );

    Ok(NegotiatedFormat {
        pixel_format: characteristics.pixel_format,
        resolution,
        fps_range,
        focus_mode,
    })
}
