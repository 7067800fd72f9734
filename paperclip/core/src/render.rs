//! Image Pipeline
//!
//! Turns a crop of the agent atlas into the raw material each sink needs:
//!
//! - Display: letterboxed, gamma corrected, dithered to one bit per pixel,
//!   with only the addressable panel rows kept, bit-packed
//! - Terminal: letterboxed to twice the cell rows and drawn with upper-half
//!   blocks in 24-bit ANSI colour
//! - Pixel service: stretched to the target rectangle, RGBA
//!
//! # Panel rows
//!
//! The LED panel is built from modules of 12 pixel rows of which only the
//! first 8 are lit; the remaining 4 sit behind the gap between modules.
//! [`select_panel_rows`] drops those rows. Getting this wrong shifts every
//! module's content on the physical panel.

use image::imageops::{self, BiLevel, FilterType};
use image::{GrayImage, Rgba, RgbaImage};

use crate::agent::{FrameSize, ImageRef};

/// Pixel rows per panel module
pub const PANEL_BLOCK_ROWS: u32 = 12;

/// Addressable rows at the top of each panel module
pub const PANEL_VISIBLE_ROWS: u32 = 8;

/// Gamma applied before dithering for the display
pub const DISPLAY_GAMMA: f64 = 0.5;

/// Cursor-home escape that starts every terminal frame
pub const CURSOR_HOME: &str = "\x1b[H";

const RESIZE_FILTER: FilterType = FilterType::Nearest;
const UPPER_HALF_BLOCK: char = '\u{2580}';
const SGR_RESET: &str = "\x1b[0m";

/// Resolution of the LED display panel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DisplayGeometry {
    /// Panel width in pixels
    pub width: u32,
    /// Panel height in pixels, gaps included
    pub height: u32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        // 56 modules of 8 columns, 19 module rows of 12 pixel rows
        Self {
            width: 56 * 8,
            height: 19 * PANEL_BLOCK_ROWS,
        }
    }
}

/// Character grid of a terminal viewer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TerminalGeometry {
    /// Columns
    pub cols: u32,
    /// Rows
    pub rows: u32,
}

impl Default for TerminalGeometry {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Target rectangle on the pixel service canvas
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelGeometry {
    /// Left edge on the remote canvas
    pub x: u32,
    /// Top edge on the remote canvas
    pub y: u32,
    /// Width of the drawn image
    pub width: u32,
    /// Height of the drawn image
    pub height: u32,
}

/// 256-entry lookup table applied to every colour channel
#[derive(Clone)]
pub struct GammaTable {
    lut: [u8; 256],
}

impl GammaTable {
    /// Build the table for `gamma`; each entry is `255 * (v/255)^(1/gamma)`
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn new(gamma: f64) -> Self {
        let inverse = 1.0 / gamma;
        let mut lut = [0u8; 256];
        for (v, slot) in lut.iter_mut().enumerate() {
            *slot = ((v as f64 / 255.0).powf(inverse) * 255.0)
                .round()
                .clamp(0.0, 255.0) as u8;
        }
        Self { lut }
    }

    /// Look up one channel value
    #[must_use]
    pub fn map(&self, value: u8) -> u8 {
        self.lut[usize::from(value)]
    }

    /// Apply to the colour channels of `image`, leaving alpha untouched
    pub fn apply(&self, image: &mut RgbaImage) {
        for Rgba([r, g, b, _]) in image.pixels_mut() {
            *r = self.map(*r);
            *g = self.map(*g);
            *b = self.map(*b);
        }
    }
}

impl std::fmt::Debug for GammaTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GammaTable")
            .field("mid", &self.lut[128])
            .finish_non_exhaustive()
    }
}

/// Cut one frame out of the atlas
#[must_use]
pub fn crop(atlas: &RgbaImage, at: ImageRef, size: FrameSize) -> RgbaImage {
    imageops::crop_imm(atlas, at.x, at.y, size.width, size.height).to_image()
}

/// Scale preserving aspect ratio, centre, and composite over opaque black
#[must_use]
pub fn letterbox(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    if w == 0 || h == 0 || width == 0 || height == 0 {
        return canvas;
    }

    let factor = 1.0 / f64::max(f64::from(w) / f64::from(width), f64::from(h) / f64::from(height));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (scaled_w, scaled_h) = (
        ((f64::from(w) * factor) as u32).clamp(1, width),
        ((f64::from(h) * factor) as u32).clamp(1, height),
    );
    let scaled = imageops::resize(image, scaled_w, scaled_h, RESIZE_FILTER);
    let x = i64::from((width - scaled_w) / 2);
    let y = i64::from((height - scaled_h) / 2);
    imageops::overlay(&mut canvas, &scaled, x, y);
    canvas
}

/// Scale to exactly `width` x `height`, ignoring aspect ratio
#[must_use]
pub fn stretch(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    imageops::resize(image, width, height, RESIZE_FILTER)
}

/// Floyd-Steinberg dither to black and white
#[must_use]
pub fn dither_bilevel(image: &RgbaImage) -> GrayImage {
    let mut gray = imageops::grayscale(image);
    imageops::dither(&mut gray, &BiLevel);
    gray
}

/// Keep the first [`PANEL_VISIBLE_ROWS`] of every [`PANEL_BLOCK_ROWS`] rows
///
/// Returns the kept row indices in order.
#[must_use]
pub fn select_panel_rows(height: u32) -> Vec<u32> {
    (0..height)
        .filter(|row| row % PANEL_BLOCK_ROWS < PANEL_VISIBLE_ROWS)
        .collect()
}

/// Pack lit pixels of the given rows, MSB first, one bit per pixel
#[must_use]
pub fn pack_rows(image: &GrayImage, rows: &[u32]) -> Vec<u8> {
    let width = image.width();
    let total_bits = rows.len() * width as usize;
    let mut packed = vec![0u8; total_bits.div_ceil(8)];
    let mut bit = 0usize;
    for &row in rows {
        for x in 0..width {
            if image.get_pixel(x, row).0[0] >= 128 {
                packed[bit / 8] |= 0x80 >> (bit % 8);
            }
            bit += 1;
        }
    }
    packed
}

/// Encode a frame for the LED display
#[must_use]
pub fn display_bits(frame: &RgbaImage, geometry: DisplayGeometry, gamma: &GammaTable) -> Vec<u8> {
    let mut boxed = letterbox(frame, geometry.width, geometry.height);
    gamma.apply(&mut boxed);
    let bilevel = dither_bilevel(&boxed);
    pack_rows(&bilevel, &select_panel_rows(geometry.height))
}

/// Encode a frame as a full-screen terminal redraw
///
/// Each character cell shows two pixels: the upper half block takes the top
/// pixel as foreground and the bottom pixel as background. Colour escapes
/// are only emitted when the colour changes along a row. Rows are separated
/// by line feeds with none after the last row, so a terminal exactly
/// `rows` lines tall never scrolls.
#[must_use]
pub fn terminal_text(frame: &RgbaImage, geometry: TerminalGeometry) -> String {
    let pixel_rows = geometry.rows * 2;
    let boxed = letterbox(frame, geometry.cols, pixel_rows);

    let mut out = String::with_capacity((geometry.cols * geometry.rows * 8) as usize);
    out.push_str(CURSOR_HOME);

    for cell_row in 0..geometry.rows {
        if cell_row > 0 {
            out.push('\n');
        }
        let top_y = cell_row * 2;
        let mut fg: Option<[u8; 3]> = None;
        let mut bg: Option<[u8; 3]> = None;
        for x in 0..geometry.cols {
            let top = rgb(boxed.get_pixel(x, top_y));
            let bottom = rgb(boxed.get_pixel(x, top_y + 1));
            if fg != Some(top) {
                out.push_str(&format!("\x1b[38;2;{};{};{}m", top[0], top[1], top[2]));
                fg = Some(top);
            }
            if bg != Some(bottom) {
                out.push_str(&format!("\x1b[48;2;{};{};{}m", bottom[0], bottom[1], bottom[2]));
                bg = Some(bottom);
            }
            out.push(UPPER_HALF_BLOCK);
        }
        out.push_str(SGR_RESET);
    }
    out
}

/// Scale a frame to the pixel-service rectangle
#[must_use]
pub fn pixel_rgba(frame: &RgbaImage, geometry: PixelGeometry) -> RgbaImage {
    stretch(frame, geometry.width, geometry.height)
}

fn rgb(pixel: &Rgba<u8>) -> [u8; 3] {
    [pixel.0[0], pixel.0[1], pixel.0[2]]
}
