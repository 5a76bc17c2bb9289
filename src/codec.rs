//! JPEG encoding, rotation and scaling of captured frames

use crate::device::{PixelFormat, RawFrame};
use crate::error::CodecError;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};

/// JPEG bytes with their pixel dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Image operations needed by the frame pipeline
pub trait ImageCodec: Send + Sync + 'static {
    /// Encodes a raw device buffer as JPEG
    fn encode(&self, frame: &RawFrame) -> Result<EncodedImage, CodecError>;

    /// Rotates clockwise by a multiple of 90 degrees, optionally mirroring
    /// the horizontal axis first
    fn rotate(
        &self,
        image: &EncodedImage,
        degrees: u32,
        mirror: bool,
    ) -> Result<EncodedImage, CodecError>;

    /// Resizes to exactly `width` x `height`
    fn scale(&self, image: &EncodedImage, width: u32, height: u32)
        -> Result<EncodedImage, CodecError>;
}

/// [`ImageCodec`] backed by the `image` crate
#[derive(Debug, Clone)]
pub struct JpegCodec {
    quality: u8,
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new(85)
    }
}

impl JpegCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    fn decode(&self, image: &EncodedImage) -> Result<DynamicImage, CodecError> {
        Ok(image::load_from_memory_with_format(
            &image.data,
            ImageFormat::Jpeg,
        )?)
    }

    fn compress(&self, image: &DynamicImage) -> Result<EncodedImage, CodecError> {
        let (width, height) = (image.width(), image.height());
        let mut out = Vec::new();

        // JPEG has no alpha channel
        let flattened = match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.clone(),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        flattened.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.quality))?;

        Ok(EncodedImage {
            data: Bytes::from(out),
            width,
            height,
        })
    }
}

impl ImageCodec for JpegCodec {
    fn encode(&self, frame: &RawFrame) -> Result<EncodedImage, CodecError> {
        let (width, height) = (frame.width, frame.height);
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidDimensions { width, height });
        }

        let pixels = width as usize * height as usize;
        let image = match frame.pixel_format {
            PixelFormat::Jpeg => {
                let encoded = EncodedImage {
                    data: frame.data.clone(),
                    width,
                    height,
                };
                // Validate and pick up the real dimensions
                let decoded = self.decode(&encoded)?;
                return Ok(EncodedImage {
                    width: decoded.width(),
                    height: decoded.height(),
                    ..encoded
                });
            }
            PixelFormat::Rgb8 => {
                let data = exact(&frame.data, pixels * 3)?;
                DynamicImage::ImageRgb8(
                    RgbImage::from_raw(width, height, data.to_vec())
                        .ok_or(CodecError::InvalidDimensions { width, height })?,
                )
            }
            PixelFormat::Rgba8 => {
                let data = exact(&frame.data, pixels * 4)?;
                DynamicImage::ImageRgba8(
                    RgbaImage::from_raw(width, height, data.to_vec())
                        .ok_or(CodecError::InvalidDimensions { width, height })?,
                )
            }
            PixelFormat::Luma8 => {
                let data = exact(&frame.data, pixels)?;
                DynamicImage::ImageLuma8(
                    GrayImage::from_raw(width, height, data.to_vec())
                        .ok_or(CodecError::InvalidDimensions { width, height })?,
                )
            }
            PixelFormat::Nv21 => DynamicImage::ImageRgb8(nv21_to_rgb(&frame.data, width, height)?),
        };

        self.compress(&image)
    }

    fn rotate(
        &self,
        image: &EncodedImage,
        degrees: u32,
        mirror: bool,
    ) -> Result<EncodedImage, CodecError> {
        let quarter_turns = ((degrees % 360) + 45) / 90 % 4;
        if quarter_turns == 0 && !mirror {
            return Ok(image.clone());
        }

        let mut decoded = self.decode(image)?;
        if mirror {
            decoded = decoded.fliph();
        }
        let rotated = match quarter_turns {
            1 => decoded.rotate90(),
            2 => decoded.rotate180(),
            3 => decoded.rotate270(),
            _ => decoded,
        };

        self.compress(&rotated)
    }

    fn scale(
        &self,
        image: &EncodedImage,
        width: u32,
        height: u32,
    ) -> Result<EncodedImage, CodecError> {
        if width == 0 || height == 0 {
            return Err(CodecError::InvalidDimensions { width, height });
        }

        let decoded = self.decode(image)?;
        let scaled = decoded.resize_exact(width, height, FilterType::Triangle);
        self.compress(&scaled)
    }
}

fn exact(data: &[u8], expected: usize) -> Result<&[u8], CodecError> {
    data.get(..expected).ok_or(CodecError::ShortBuffer {
        expected,
        actual: data.len(),
    })
}

/// BT.601 conversion of an NV21 (YCrCb 4:2:0 semi-planar) buffer
fn nv21_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, CodecError> {
    let (w, h) = (width as usize, height as usize);
    let chroma_w = w.div_ceil(2);
    let chroma_h = h.div_ceil(2);
    let expected = w * h + chroma_w * chroma_h * 2;
    let data = exact(data, expected)?;

    let (luma, chroma) = data.split_at(w * h);
    let mut rgb = Vec::with_capacity(w * h * 3);

    for y in 0..h {
        for x in 0..w {
            let c = (y / 2) * chroma_w * 2 + (x / 2) * 2;
            let luma = luma[y * w + x] as f32;
            let v = chroma[c] as f32 - 128.0;
            let u = chroma[c + 1] as f32 - 128.0;

            let r = luma + 1.402 * v;
            let g = luma - 0.344_136 * u - 0.714_136 * v;
            let b = luma + 1.772 * u;

            rgb.extend_from_slice(&[clamp_u8(r), clamp_u8(g), clamp_u8(b)]);
        }
    }

    RgbImage::from_raw(width, height, rgb).ok_or(CodecError::InvalidDimensions { width, height })
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
