use image::RgbaImage;

use crate::color::Color;
use crate::error::{Error, Result};

pub const CHANNELS: usize = 4;

/// Interleaved RGBA samples, `width * height * 4` bytes long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(CHANNELS));
        if expected != Some(data.len()) {
            return Err(Error::BufferShape {
                len: data.len(),
                width,
                height,
            });
        }

        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Builds a single-row buffer from raw samples.
    pub fn from_raw(data: Vec<u8>) -> Result<Self> {
        let pixels = data.len() / CHANNELS;
        let width = u32::try_from(pixels).map_err(|_| Error::BufferShape {
            len: data.len(),
            width: u32::MAX,
            height: 1,
        })?;
        Self::new(width, 1, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.data.len() / CHANNELS
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Color of the `i`th pixel.
    pub fn color(&self, i: usize) -> Color {
        Color::from_pixel(&self.data[i * CHANNELS..(i + 1) * CHANNELS])
    }

    pub fn colors(&self) -> impl Iterator<Item = Color> + '_ {
        self.data.chunks_exact(CHANNELS).map(Color::from_pixel)
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

impl From<PixelBuffer> for RgbaImage {
    fn from(buffer: PixelBuffer) -> Self {
        // Length is checked on construction.
        RgbaImage::from_raw(buffer.width, buffer.height, buffer.data)
            .unwrap_or_else(|| unreachable!("PixelBuffer length always matches its dimensions"))
    }
}
