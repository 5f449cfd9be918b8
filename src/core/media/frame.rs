//! Frame downsampling and JPEG data URI encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgba};

use crate::errors::{SessionError, SessionResult};

/// Raw RGBA frame grabbed from a video track.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8 pixels
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Downsampling and encoding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoding {
    pub max_width: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for FrameEncoding {
    fn default() -> Self {
        Self {
            max_width: 320,
            quality: 60,
        }
    }
}

/// Target size keeping the aspect ratio, never upscaling.
pub fn scaled_size(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if max_width == 0 || width <= max_width {
        return (width, height);
    }
    let new_height = ((height as f32 * (max_width as f32 / width as f32)).round() as u32).max(1);
    (max_width, new_height)
}

/// Downsample `frame` and encode it as a `data:image/jpeg;base64,` URI.
pub fn encode_data_uri(frame: &VideoFrame, encoding: FrameEncoding) -> SessionResult<String> {
    let Some(buffer) =
        ImageBuffer::<Rgba<u8>, _>::from_vec(frame.width, frame.height, frame.rgba.clone())
    else {
        return Err(SessionError::MediaAcquisition(format!(
            "frame buffer of {} bytes does not match {}x{}",
            frame.rgba.len(),
            frame.width,
            frame.height
        )));
    };

    let (width, height) = scaled_size(frame.width, frame.height, encoding.max_width);
    let image = DynamicImage::ImageRgba8(buffer);
    let image = if (width, height) == (frame.width, frame.height) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    };
    let rgb = image.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, encoding.quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| SessionError::MediaAcquisition(format!("JPEG encoding failed: {e}")))?;

    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(&jpeg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32) -> VideoFrame {
        VideoFrame {
            width,
            height,
            rgba: [200u8, 40, 40, 255].repeat((width * height) as usize),
        }
    }

    #[test]
    fn test_scaled_size() {
        assert_eq!(scaled_size(640, 480, 320), (320, 240));
        assert_eq!(scaled_size(200, 100, 320), (200, 100));
        assert_eq!(scaled_size(1000, 1, 320), (320, 1));
    }

    #[test]
    fn test_encode_data_uri_downsamples() {
        let uri = encode_data_uri(&solid_frame(640, 480), FrameEncoding::default()).unwrap();
        let payload = uri.strip_prefix("data:image/jpeg;base64,").unwrap();
        let jpeg = STANDARD.decode(payload).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = VideoFrame {
            width: 10,
            height: 10,
            rgba: vec![0; 12],
        };
        assert!(matches!(
            encode_data_uri(&frame, FrameEncoding::default()),
            Err(SessionError::MediaAcquisition(_))
        ));
    }
}
