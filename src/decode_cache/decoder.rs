//! Turning encoded capture bytes into pixels.

use image::RgbaImage;

use crate::error_handling::types::DecodeError;

/// A decoded, render-ready frame (RGBA8, row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pixels: RgbaImage,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

/// Codec seam used by the store's read path.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Decoder for the raster formats produced by the capture pipeline (PNG, JPEG).
#[derive(Debug, Default, Clone, Copy)]
pub struct RasterDecoder;

impl ImageDecoder for RasterDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let img = image::load_from_memory(bytes).map_err(|e| DecodeError::Corrupt(e.to_string()))?;
        Ok(DecodedImage::new(img.to_rgba8()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32, seed: u8) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([seed, x as u8, y as u8, 255])
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_png_decodes_losslessly() {
        let bytes = encode_png(4, 3, 9);
        let decoded = RasterDecoder.decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.pixels().get_pixel(2, 1), &Rgba([9, 2, 1, 255]));
        assert_eq!(decoded.byte_len(), 4 * 3 * 4);
    }

    #[test]
    fn test_empty_and_corrupt_input_fail() {
        assert_eq!(RasterDecoder.decode(&[]), Err(DecodeError::Empty));
        assert!(matches!(
            RasterDecoder.decode(b"definitely not an image"),
            Err(DecodeError::Corrupt(_))
        ));
    }
}
