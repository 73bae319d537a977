use image::Rgb;
use serde::{Deserialize, Serialize};

/// A 3-channel color in `[0, 255]` channel units.
///
/// Pixels are sampled into this at 8-bit precision, centroids keep the
/// fractional mean.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const BLACK: Color = Color::new(0., 0., 0.);

    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Reads the R/G/B channels of an RGBA sample, alpha is ignored.
    pub fn from_pixel(px: &[u8]) -> Self {
        Self::new(px[0] as f64, px[1] as f64, px[2] as f64)
    }

    /// Rounds each channel to the nearest 8-bit value.
    pub fn to_rgb8(self) -> Rgb<u8> {
        fn channel(c: f64) -> u8 {
            c.round().clamp(0., 255.) as u8
        }

        Rgb([channel(self.r), channel(self.g), channel(self.b)])
    }
}

impl From<Rgb<u8>> for Color {
    fn from(Rgb([r, g, b]): Rgb<u8>) -> Self {
        Self::new(r as f64, g as f64, b as f64)
    }
}

impl From<[u8; 3]> for Color {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self::new(r as f64, g as f64, b as f64)
    }
}

pub fn dist_sq(c1: Color, c2: Color) -> f64 {
    (c1.r - c2.r).powi(2) + (c1.g - c2.g).powi(2) + (c1.b - c2.b).powi(2)
}

/// Euclidean distance over the three channels.
pub fn distance(c1: Color, c2: Color) -> f64 {
    dist_sq(c1, c2).sqrt()
}
