//! Per-frame processing: encode, rotate, persist, thumbnail, notify

use super::gate::NotificationGate;
use crate::codec::{EncodedImage, ImageCodec};
use crate::config::LensFacing;
use crate::controller::FrameNotification;
use crate::device::RawFrame;
use crate::error::CaptureError;
use crate::negotiate::NegotiatedFormat;
use crate::stats::SessionCounters;
use crate::store::{CapturedImage, FileStore, ImageRole};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A raw buffer tagged with the session format and the display rotation
/// at the moment it arrived
pub(crate) struct Frame {
    pub raw: RawFrame,
    pub format: Arc<NegotiatedFormat>,
    pub display_rotation: u32,
}

impl Frame {
    /// The buffer described by the negotiated format
    fn codec_input(&self) -> RawFrame {
        RawFrame {
            data: self.raw.data.clone(),
            width: self.format.resolution.width,
            height: self.format.resolution.height,
            pixel_format: self.format.pixel_format,
            timestamp_ns: self.raw.timestamp_ns,
        }
    }
}

/// Clockwise rotation to apply to a sensor image so it is upright on the
/// display: sensor mount angle minus display rotation, in [0, 360)
pub fn frame_rotation(sensor_orientation: u32, display_rotation: u32) -> u32 {
    (sensor_orientation as i64 - display_rotation as i64).rem_euclid(360) as u32
}

/// Thumbnail dimensions for a uniform scale, or None if either side
/// rounds to zero
pub fn thumbnail_size(width: u32, height: u32, ratio: f32) -> Option<(u32, u32)> {
    let scale = |v: u32| (v as f64 * ratio as f64).round() as u32;
    let (w, h) = (scale(width), scale(height));
    if w == 0 || h == 0 {
        None
    } else {
        Some((w, h))
    }
}

pub(crate) struct FramePipeline {
    pub codec: Arc<dyn ImageCodec>,
    pub store: Arc<FileStore>,
    pub gate: Arc<NotificationGate>,
    pub counters: Arc<SessionCounters>,
    pub facing: LensFacing,
    pub sensor_orientation: u32,
    pub thumbnail_ratio: Option<f32>,
}

impl FramePipeline {
    /// Processes one frame to completion. Failures drop the frame.
    pub fn run(&self, frame: Frame) {
        match self.process(&frame) {
            Ok(notification) => {
                if !self.gate.frame(notification) {
                    debug!("Session closed, frame result discarded");
                }
            }
            Err(CaptureError::Encode(e)) => {
                SessionCounters::bump(&self.counters.encode_errors);
                warn!(error = %e, "Frame dropped: encode failed");
            }
            Err(CaptureError::Persist(e)) => {
                SessionCounters::bump(&self.counters.persist_errors);
                warn!(error = %e, "Frame dropped: write failed");
            }
            Err(e) => warn!(error = %e, "Frame dropped"),
        }
    }

    fn process(&self, frame: &Frame) -> Result<FrameNotification, CaptureError> {
        let encoded = self.codec.encode(&frame.codec_input())?;

        let rotation = frame_rotation(self.sensor_orientation, frame.display_rotation);
        let mirror = self.facing == LensFacing::Front;
        let rotated = self.codec.rotate(&encoded, rotation, mirror)?;

        let fullsize = self.store.commit(&rotated.data, ImageRole::Fullsize)?;
        SessionCounters::bump(&self.counters.frames_persisted);

        let thumbnail = match self.thumbnail_ratio {
            Some(ratio) => self.thumbnail(&rotated, ratio)?,
            None => None,
        };

        trace!(
            sequence = fullsize.sequence_id,
            rotation,
            mirror,
            thumbnail = thumbnail.is_some(),
            "Frame processed"
        );

        Ok(FrameNotification {
            fullsize,
            thumbnail,
        })
    }

    fn thumbnail(
        &self,
        image: &EncodedImage,
        ratio: f32,
    ) -> Result<Option<CapturedImage>, CaptureError> {
        let Some((width, height)) = thumbnail_size(image.width, image.height, ratio) else {
            return Ok(None);
        };

        let scaled = self.codec.scale(image, width, height)?;
        let stored = self.store.commit(&scaled.data, ImageRole::Thumbnail)?;
        SessionCounters::bump(&self.counters.thumbnails_persisted);
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JpegCodec;
    use crate::controller::{ChannelClient, Notification};
    use crate::device::{FocusMode, FpsRange, PixelFormat, Resolution};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::sync::atomic::Ordering;

    #[rstest]
    #[case(90, 0, 90)]
    #[case(90, 90, 0)]
    #[case(90, 180, 270)]
    #[case(270, 90, 180)]
    #[case(0, 270, 90)]
    #[case(0, 0, 0)]
    fn test_frame_rotation(#[case] sensor: u32, #[case] display: u32, #[case] expected: u32) {
        assert_eq!(frame_rotation(sensor, display), expected);
    }

    #[rstest]
    #[case(640, 480, 0.5, Some((320, 240)))]
    #[case(640, 480, 1.0, Some((640, 480)))]
    #[case(352, 288, 1.0 / 6.0, Some((59, 48)))]
    #[case(640, 480, 0.0001, None)]
    #[case(640, 1, 0.4, None)]
    fn test_thumbnail_size(
        #[case] width: u32,
        #[case] height: u32,
        #[case] ratio: f32,
        #[case] expected: Option<(u32, u32)>,
    ) {
        assert_eq!(thumbnail_size(width, height, ratio), expected);
    }

    fn pipeline(
        dir: &std::path::Path,
        facing: LensFacing,
        thumbnail_ratio: Option<f32>,
    ) -> (FramePipeline, tokio::sync::mpsc::UnboundedReceiver<Notification>) {
        let (client, rx) = ChannelClient::new();
        let pipeline = FramePipeline {
            codec: Arc::new(JpegCodec::default()),
            store: Arc::new(FileStore::open(dir).unwrap()),
            gate: Arc::new(NotificationGate::new(client, Arc::new(Mutex::new(None)))),
            counters: Arc::new(SessionCounters::default()),
            facing,
            sensor_orientation: 90,
            thumbnail_ratio,
        };
        (pipeline, rx)
    }

    fn frame(width: u32, height: u32, data_len: usize) -> Frame {
        Frame {
            raw: RawFrame {
                data: Bytes::from(vec![128u8; data_len]),
                width,
                height,
                pixel_format: PixelFormat::Rgb8,
                timestamp_ns: 0,
            },
            format: Arc::new(NegotiatedFormat {
                pixel_format: PixelFormat::Rgb8,
                resolution: Resolution::new(width, height),
                fps_range: FpsRange::new(30000, 30000),
                focus_mode: FocusMode::ContinuousVideo,
            }),
            display_rotation: 0,
        }
    }

    #[test]
    fn test_frame_with_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, mut rx) = pipeline(dir.path(), LensFacing::Back, Some(0.5));

        pipeline.run(frame(640, 480, 640 * 480 * 3));

        match rx.try_recv() {
            Ok(Notification::Frame(n)) => {
                assert_eq!(n.fullsize.path, dir.path().join("fullsize-1.jpg"));
                let thumbnail = n.thumbnail.expect("thumbnail");
                assert_eq!(thumbnail.path, dir.path().join("thumbnail-1.jpg"));

                // Sensor at 90 degrees turns 640x480 into 480x640, halved
                let bytes = std::fs::read(&thumbnail.path).unwrap();
                let decoded = image::load_from_memory(&bytes).unwrap();
                assert_eq!((decoded.width(), decoded.height()), (240, 320));
            }
            other => panic!("expected frame notification, got {:?}", other),
        }
        assert_eq!(pipeline.counters.thumbnails_persisted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_tiny_ratio_skips_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, mut rx) = pipeline(dir.path(), LensFacing::Front, Some(0.0001));

        pipeline.run(frame(64, 48, 64 * 48 * 3));

        match rx.try_recv() {
            Ok(Notification::Frame(n)) => assert!(n.thumbnail.is_none()),
            other => panic!("expected frame notification, got {:?}", other),
        }
        assert_eq!(pipeline.counters.persist_errors.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_short_buffer_dropped_without_notification() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, mut rx) = pipeline(dir.path(), LensFacing::Back, None);

        pipeline.run(frame(64, 48, 10));

        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.counters.encode_errors.load(Ordering::Relaxed), 1);
        assert_eq!(pipeline.store.last_sequence(ImageRole::Fullsize), 0);
    }
}
