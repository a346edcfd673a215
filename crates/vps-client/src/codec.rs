use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Pixel buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("PNG encoding failed")]
    Png(#[from] png::EncodingError),
}

/// Turns a camera luminance buffer into the image bytes sent to the service.
///
/// Implementations must be pure: the same pixels always encode to an
/// equivalent image. Encoding runs off the frame loop.
pub trait ImageCodec: Send + Sync + 'static {
    fn encode(&self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError>;
}

/// 8-bit grayscale PNG encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl ImageCodec for PngCodec {
    fn encode(&self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CodecError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(CodecError::SizeMismatch {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }

        let mut out = Vec::with_capacity(expected / 2);
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_compression(png::Compression::Fast);

            let mut writer = encoder.write_header()?;
            writer.write_image_data(pixels)?;
            writer.finish()?;
        }
        Ok(out)
    }
}
