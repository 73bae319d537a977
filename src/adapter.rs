//! Moves images between files and [`PixelBuffer`]s. The clustering code
//! never touches the filesystem, this is the only place that does.

use std::path::Path;

use anyhow::Context;
use image::{ImageReader, RgbaImage};

use crate::buffer::PixelBuffer;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

pub fn read_buffer(path: &Path) -> anyhow::Result<PixelBuffer> {
    let image = ImageReader::open(path)
        .with_context(|| format!("Reading image {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("Detecting format of {}", path.display()))?
        .decode()
        .with_context(|| format!("Decoding image {}", path.display()))?;

    Ok(image.into_rgba8().into())
}

pub fn write_png(path: &Path, buffer: PixelBuffer) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Making dir {}", parent.display()))?;
    }

    RgbaImage::from(buffer)
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Saving image: {}", path.display()))
}
