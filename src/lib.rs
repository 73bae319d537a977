//! Lossy color quantization: cluster an image's pixels into `k` colors with
//! k-means and redraw the image using only those colors.

pub mod adapter;
pub mod buffer;
pub mod color;
pub mod config;
pub mod error;
pub mod k_means;

pub use buffer::PixelBuffer;
pub use color::{Color, distance};
pub use config::{Config, EmptyClusterPolicy};
pub use error::{Error, Result};
pub use k_means::{KMeans, PaletteEntry, Quantization};

/// Reduces `buffer` to `config.k` colors.
///
/// On [`Error::NonConvergence`] the best-effort result is still available
/// through [`Error::into_best_effort`].
pub fn compress(buffer: &PixelBuffer, config: Config) -> Result<Quantization> {
    KMeans::new(config)?.run(buffer)
}
