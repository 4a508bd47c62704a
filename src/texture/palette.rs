//! DYT palette splitting.
//!
//! A palette image is a stack of colour rows. Each row (or band of rows on tall
//! palettes) becomes its own texture variant addressed by its DYT index. Materials
//! read variants in blocks of four.

use image::{imageops, RgbaImage};

use super::TextureVariant;

/// Rows are read as 32 bands on tall palettes, one pixel high otherwise.
pub const PALETTE_BANDS: u32 = 32;
pub const DYT_BLOCK_LABELS: [&str; 4] = ["p", "r", "s", "d"];

pub fn row_height(image_height: u32) -> u32 {
    (image_height / PALETTE_BANDS).max(1)
}

pub fn variant_name(base: &str, row: u32) -> String {
    format!("{}_{:02}", base, row)
}

/// Slice a palette into variants, top row first.
pub fn split_palette(image: &RgbaImage, base: &str) -> Vec<TextureVariant> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let band = row_height(height);
    let rows = height / band;
    tracing::debug!(base, width, height, band, rows, "splitting palette");
    (0..rows)
        .map(|row| TextureVariant {
            name: variant_name(base, row),
            dyt_index: row,
            image: imageops::crop_imm(image, 0, row * band, width, band).to_image(),
        })
        .collect()
}

/// The four labelled variants of palette block `block` (rows `block*4 .. block*4+3`).
/// Rows past the end of the palette are left out.
pub fn dyt_block(variants: &[TextureVariant], block: u32) -> Vec<(&'static str, &TextureVariant)> {
    let start = block.saturating_mul(4);
    DYT_BLOCK_LABELS
        .iter()
        .enumerate()
        .filter_map(|(i, label)| {
            let row = start.checked_add(i as u32)?;
            variants
                .iter()
                .find(|v| v.dyt_index == row)
                .map(|v| (*label, v))
        })
        .collect()
}
