use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame;
use ffmpeg_next::software::scaling;
use log::debug;

use crate::core::frame::VideoFrame;
use crate::error::DecoderError;

/// Converts decoded pictures to packed RGB24 for texture upload.
///
/// The scaling context is kept between calls and only rebuilt when the
/// source format or size changes. Not `Send`: create it on the render thread.
pub struct RgbConverter {
    scaler: Option<(scaling::Context, Pixel, u32, u32)>,
    output: frame::Video,
}

impl RgbConverter {
    pub fn new() -> Self {
        Self {
            scaler: None,
            output: frame::Video::empty(),
        }
    }

    /// Converts `frame` at its own resolution. The returned picture has a
    /// single plane whose rows may be padded, see [`frame::Video::stride`].
    pub fn convert(&mut self, frame: &VideoFrame) -> Result<&frame::Video, DecoderError> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        let reusable = matches!(
            &self.scaler,
            Some((_, f, w, h)) if (*f, *w, *h) == (format, width, height)
        );
        if !reusable {
            debug!("RGB converter: {format:?} {width}x{height} -> RGB24");
            let scaler = scaling::Context::get(
                format,
                width,
                height,
                Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(DecoderError::Scaler)?;
            self.scaler = Some((scaler, format, width, height));
            self.output = frame::Video::empty();
        }

        if let Some((scaler, ..)) = self.scaler.as_mut() {
            scaler
                .run(frame.picture(), &mut self.output)
                .map_err(DecoderError::Scaler)?;
        }
        Ok(&self.output)
    }

    /// Like [`convert`](Self::convert) but returns tightly packed rows,
    /// `width * height * 3` bytes.
    pub fn convert_packed(&mut self, frame: &VideoFrame) -> Result<Vec<u8>, DecoderError> {
        let rgb = self.convert(frame)?;
        let row_len = rgb.width() as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut packed = Vec::with_capacity(row_len * rgb.height() as usize);
        for row in data.chunks(stride).take(rgb.height() as usize) {
            packed.extend_from_slice(&row[..row_len]);
        }
        Ok(packed)
    }
}

impl Default for RgbConverter {
    fn default() -> Self {
        Self::new()
    }
}
