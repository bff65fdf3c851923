use crate::config::ServerConfig;
use crate::utils::error::RetinaError;
use crate::Result;
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat, ImageReader, Limits, RgbImage};
use std::io::Cursor;

/// Caps applied to an upload before and during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: usize,
    pub max_width: u32,
    pub max_height: u32,
}

impl From<&ServerConfig> for UploadLimits {
    fn from(server: &ServerConfig) -> Self {
        Self {
            max_bytes: server.max_request_size,
            max_width: server.max_image_width,
            max_height: server.max_image_height,
        }
    }
}

pub struct ImageLoader;

impl ImageLoader {
    /// Decode uploaded bytes. Oversized payloads are refused before decoding,
    /// oversized pixel grids as soon as the header has been read.
    pub fn from_bytes(bytes: &[u8], limits: UploadLimits) -> Result<DynamicImage> {
        if bytes.len() > limits.max_bytes {
            return Err(RetinaError::FileTooLarge(bytes.len(), limits.max_bytes));
        }

        let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
        if let Some(format) = reader.format() {
            tracing::debug!("Upload looks like {:?}", format);
        }

        let mut decode_limits = Limits::default();
        decode_limits.max_image_width = Some(limits.max_width);
        decode_limits.max_image_height = Some(limits.max_height);
        reader.limits(decode_limits);

        let image = reader.decode().map_err(|e| match e {
            ImageError::Limits(limit) => RetinaError::ImageTooLarge(format!(
                "{} (max {}x{})",
                limit, limits.max_width, limits.max_height
            )),
            other => RetinaError::ImageDecode(other),
        })?;
        let (width, height) = image.dimensions();
        tracing::debug!("Decoded image: {}x{} {:?}", width, height, image.color());

        Ok(image)
    }

    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// Decode straight to the 3-channel grid consumed by validation and inference.
    /// Alpha is dropped, grayscale is replicated across channels.
    pub fn rgb_from_bytes(bytes: &[u8], limits: UploadLimits) -> Result<RgbImage> {
        Ok(Self::from_bytes(bytes, limits)?.to_rgb8())
    }
}
