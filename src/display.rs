// Screen dump decoding and pretty-printing helpers.
//
// The DEQ2496 has a 320 x 80 dot-matrix LCD. A dump carries 80 rows of 46
// words, each word holding 7 pixels in its low bits, most significant first:
//
//    w1  w2    /  w1  /  w2  /
//    15 127       ###########
//    19  72      #  ###  #
//
// which gives 46 * 7 = 322 columns per row.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use owo_colors::{OwoColorize, Stream};

use crate::error::DeqError;
use crate::state::State;

// ── Constants ──

pub const DUMP_ROWS: usize = 80;
pub const WORDS_PER_ROW: usize = 46;
pub const BITS_PER_WORD: usize = 7;
pub const GRID_COLUMNS: usize = WORDS_PER_ROW * BITS_PER_WORD;
pub const DUMP_LEN: usize = DUMP_ROWS * WORDS_PER_ROW;

const PIXEL_ON: char = '#';
const PIXEL_OFF: char = ' ';

const LCD_BACKGROUND: Rgb<u8> = Rgb([0xB4, 0xC8, 0x3C]);
const LCD_FOREGROUND: Rgb<u8> = Rgb([0x1E, 0x28, 0x14]);

// ── Decoding ──

/// Raw display buffer as received from the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenDump(Vec<u8>);

impl ScreenDump {
    pub fn new(bytes: Vec<u8>) -> Result<Self, DeqError> {
        if bytes.len() != DUMP_LEN {
            return Err(DeqError::DimensionMismatch {
                expected: DUMP_LEN,
                got: bytes.len(),
            });
        }
        Ok(ScreenDump(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Text art: one line per display row, `#` for lit pixels.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(DUMP_ROWS * (GRID_COLUMNS + 1));
        for row in self.0.chunks(WORDS_PER_ROW) {
            for &word in row {
                out.extend(word_bits(word).map(|on| if on { PIXEL_ON } else { PIXEL_OFF }));
            }
            out.push('\n');
        }
        out
    }

    pub fn to_grid(&self) -> PixelGrid {
        let pixels = self.0.iter().flat_map(|&word| word_bits(word)).collect();
        PixelGrid {
            rows: DUMP_ROWS,
            columns: GRID_COLUMNS,
            pixels,
        }
    }
}

/// The 7 pixels of one word, leftmost first.
fn word_bits(word: u8) -> impl Iterator<Item = bool> {
    (0..BITS_PER_WORD).map(move |k| (word >> (BITS_PER_WORD - 1 - k)) & 1 == 1)
}

pub fn render_text(bytes: &[u8]) -> Result<String, DeqError> {
    Ok(ScreenDump::new(bytes.to_vec())?.to_text())
}

pub fn render_grid(bytes: &[u8]) -> Result<PixelGrid, DeqError> {
    Ok(ScreenDump::new(bytes.to_vec())?.to_grid())
}

/// Row-major binary pixel grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelGrid {
    rows: usize,
    columns: usize,
    pixels: Vec<bool>,
}

impl PixelGrid {
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn get(&self, row: usize, column: usize) -> bool {
        self.pixels[row * self.columns + column]
    }

    pub fn lit_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p).count()
    }

    /// Render as an LCD-coloured image, each pixel blown up to `scale` x `scale`.
    pub fn to_image(&self, scale: u32) -> RgbImage {
        let scale = scale.max(1);
        let width = self.columns as u32 * scale;
        let height = self.rows as u32 * scale;
        RgbImage::from_fn(width, height, |x, y| {
            let (column, row) = ((x / scale) as usize, (y / scale) as usize);
            if self.get(row, column) { LCD_FOREGROUND } else { LCD_BACKGROUND }
        })
    }
}

// ── Output ──

pub fn save_png(grid: &PixelGrid, path: &Path, scale: u32) -> Result<()> {
    grid.to_image(scale)
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Hand the image to the platform's default viewer.
pub fn open_viewer(path: &Path) -> Result<()> {
    let mut cmd = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        Command::new("xdg-open")
    };

    cmd.arg(path)
        .spawn()
        .with_context(|| format!("Failed to launch a viewer for {}", path.display()))?;
    Ok(())
}

pub fn print_state(state: &State) {
    fn or_unknown<T: ToString>(v: Option<T>) -> String {
        v.map(|v| v.to_string()).unwrap_or_else(|| "unknown".into())
    }

    println!("  Screen:   {}", or_unknown(state.screen));
    println!("  Contrast: {}", or_unknown(state.contrast));
    println!("  Device:   {}", or_unknown(state.identity_device.as_deref()));
}

pub fn print_status(label: &str, value: impl std::fmt::Display) {
    let label = format!("{}:", label);
    println!("{} {}", label.if_supports_color(Stream::Stdout, |t| t.green()), value);
}

pub fn print_warning(msg: impl std::fmt::Display) {
    eprintln!("{} {}", "warning:".if_supports_color(Stream::Stderr, |t| t.yellow()), msg);
}
