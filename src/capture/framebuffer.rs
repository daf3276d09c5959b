//! RGB framebuffer with font8x8 text, encoded to PNG.
//!
//! Used when an automation backend reports a state without a screenshot,
//! and by the scripted agent to give every frame a visible image.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// Default placeholder width (pixels)
pub const PLACEHOLDER_WIDTH: u32 = 800;

/// Default placeholder height (pixels)
pub const PLACEHOLDER_HEIGHT: u32 = 450;

const GLYPH: u32 = 8;
const BACKGROUND: [u8; 3] = [30, 32, 38];
const HEADER: [u8; 3] = [58, 92, 160];
const TEXT: [u8; 3] = [230, 230, 230];

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Failed to encode PNG: {0}")]
    Encode(String),
}

/// A drawable RGB pixel buffer
///
/// - `fill()` - Fill entire buffer with a color
/// - `draw_rect()` - Draw a filled rectangle
/// - `draw_text()` - Draw text using font8x8 glyphs
/// - `set_pixel()` - Direct pixel access
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    /// Row-major, 3 bytes per pixel
    buffer: Vec<u8>,
}

impl Framebuffer {
    /// Create a new framebuffer initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            buffer: vec![0u8; (width * height * 3) as usize],
        }
    }

    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut fb = Self::new(width, height);
        fb.fill(color);
        fb
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height) {
            for px in x..(x + w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text using font8x8 glyphs. Each character is 8x8 pixels; no wrapping.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x >= self.width {
                break;
            }
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += GLYPH;
        }
    }

    /// Draw text wrapped to the buffer width, returning the y below the last line
    pub fn draw_wrapped(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) -> u32 {
        let columns = (self.width.saturating_sub(x * 2) / GLYPH).max(1) as usize;
        let mut line_y = y;
        for line in wrap(text, columns) {
            if line_y + GLYPH > self.height {
                break;
            }
            self.draw_text(x, line_y, &line, fg, bg);
            line_y += GLYPH + 4;
        }
        line_y
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            if py >= self.height {
                break;
            }
            for bit in 0..GLYPH {
                let px = x + bit;
                if px >= self.width {
                    break;
                }
                // font8x8 stores LSB as leftmost pixel
                let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                self.set_pixel(px, py, color);
            }
        }
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    fn to_image(&self) -> RenderResult<RgbImage> {
        let expected = (self.width * self.height * 3) as usize;
        ImageBuffer::from_raw(self.width, self.height, self.buffer.clone()).ok_or(
            RenderError::SizeMismatch {
                expected,
                actual: self.buffer.len(),
            },
        )
    }

    /// Encode the framebuffer as PNG bytes
    pub fn to_png(&self) -> RenderResult<Vec<u8>> {
        let img = self.to_image()?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| RenderError::Encode(e.to_string()))?;
        Ok(bytes)
    }
}

/// Render a card showing the URL and state description
pub fn render_placeholder(url: &str, description: &str) -> RenderResult<Vec<u8>> {
    let mut fb = Framebuffer::with_color(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, BACKGROUND);
    fb.draw_rect(0, 0, PLACEHOLDER_WIDTH, 28, HEADER);
    let location = if url.is_empty() { "(no url)" } else { url };
    fb.draw_text(10, 10, location, TEXT, HEADER);
    fb.draw_wrapped(10, 48, description, TEXT, BACKGROUND);
    fb.to_png()
}

fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
impl Framebuffer {
    fn from_png_bytes(data: &[u8]) -> Self {
        let rgb = image::load_from_memory(data).unwrap().to_rgb8();
        Self {
            width: rgb.width(),
            height: rgb.height(),
            buffer: rgb.into_raw(),
        }
    }

    fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y * self.width + x) * 3) as usize;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framebuffer_new_is_black() {
        let fb = Framebuffer::new(100, 50);
        assert_eq!(fb.width(), 100);
        assert_eq!(fb.height(), 50);
        assert_eq!(fb.get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(fb.get_pixel(99, 49), [0, 0, 0]);
    }

    #[test]
    fn test_draw_rect() {
        let mut fb = Framebuffer::new(20, 20);
        fb.draw_rect(5, 5, 10, 10, [255, 0, 0]);
        assert_eq!(fb.get_pixel(4, 4), [0, 0, 0]);
        assert_eq!(fb.get_pixel(5, 5), [255, 0, 0]);
        assert_eq!(fb.get_pixel(14, 14), [255, 0, 0]);
        assert_eq!(fb.get_pixel(15, 15), [0, 0, 0]);
    }

    #[test]
    fn test_draw_text_sets_foreground() {
        let mut fb = Framebuffer::new(80, 16);
        fb.draw_text(0, 0, "Hi", [255, 255, 255], [0, 0, 0]);
        let lit = (0..8).any(|y| (0..8).any(|x| fb.get_pixel(x, y) == [255, 255, 255]));
        assert!(lit, "Character 'H' should have some foreground pixels");
    }

    #[test]
    fn test_placeholder_is_png() {
        let png = render_placeholder("https://app.test/settings", "Settings page").unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
        let fb = Framebuffer::from_png_bytes(&png);
        assert_eq!(fb.width(), PLACEHOLDER_WIDTH);
        assert_eq!(fb.get_pixel(2, 2), HEADER);
    }

    #[test]
    fn test_wrap_respects_columns() {
        let lines = wrap("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }
}
