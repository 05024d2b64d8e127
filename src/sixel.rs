//! Sixel encoding of normalized icon rasters.
//!
//! Palette selection and dithering come from `icy_sixel`. Its output paints
//! every pixel, so the body is decoded back into a register grid, pixels
//! below half alpha are masked out and the bands are rewritten under
//! `P2 = 1` so the terminal background shows through.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::iter::Peekable;
use std::str::Chars;

use icy_sixel::{
    sixel_string, DiffusionMethod, MethodForLargest, MethodForRep, PixelFormat, Quality,
};
use image::RgbaImage;
use tracing::warn;

use crate::normalize::{scale_aspect_fit, standardize_to_square};
use crate::terminal::CellPixels;

const DCS_START: &str = "\x1bP0;1;0q";
const STRING_TERMINATOR: &str = "\x1b\\";
const ALPHA_THRESHOLD: u8 = 128;
const UNPAINTED: u16 = u16::MAX;
const SIXEL_BAND: u32 = 6;
const RLE_MIN_RUN: usize = 4;

/// Encoder output for one icon at one size. An empty `encoded` string means
/// there is nothing to draw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBitmap {
    pub encoded: String,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl RenderedBitmap {
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}

/// Standardizes `src` to a square, fits it into the pixel footprint of
/// `width_cells` x `height_cells` and encodes the result.
pub fn render_icon(
    src: &RgbaImage,
    width_cells: u32,
    height_cells: u32,
    cell: CellPixels,
) -> RenderedBitmap {
    let target_w = width_cells.saturating_mul(cell.width);
    let target_h = height_cells.saturating_mul(cell.height);
    if target_w == 0 || target_h == 0 {
        return RenderedBitmap::default();
    }

    let standardized = standardize_to_square(src, target_w.max(target_h));
    let scaled = scale_aspect_fit(&standardized, target_w, target_h);
    encode_sixel(&scaled)
}

/// Encoding failures are logged and yield an empty bitmap.
pub fn encode_sixel(image: &RgbaImage) -> RenderedBitmap {
    let (width, height) = image.dimensions();
    let (Ok(w), Ok(h)) = (i32::try_from(width), i32::try_from(height)) else {
        return RenderedBitmap::default();
    };
    if width == 0 || height == 0 {
        return RenderedBitmap::default();
    }

    let quantized = match sixel_string(
        image.as_raw(),
        w,
        h,
        PixelFormat::RGBA8888,
        DiffusionMethod::Stucki,
        MethodForLargest::Auto,
        MethodForRep::Auto,
        Quality::HIGH,
    ) {
        Ok(quantized) => quantized,
        Err(error) => {
            warn!(width, height, "sixel encoding failed: {error}");
            return RenderedBitmap::default();
        }
    };
    let Some(body) = dcs_body(&quantized) else {
        warn!(width, height, "sixel encoder produced no DCS block");
        return RenderedBitmap::default();
    };

    let mut raster = SixelRaster::decode(body, width, height);
    raster.mask_transparent(image);
    RenderedBitmap {
        encoded: raster.to_dcs(),
        pixel_width: width,
        pixel_height: height,
    }
}

/// The data between the DCS introducer's final `q` and the terminator.
fn dcs_body(encoded: &str) -> Option<&str> {
    let start = encoded.find("\x1bP")? + 2;
    let rest = &encoded[start..];
    let body = &rest[rest.find('q')? + 1..];
    Some(body.find(STRING_TERMINATOR).map_or(body, |end| &body[..end]))
}

/// One palette register per pixel plus the color definitions that go with
/// them.
#[derive(Debug)]
struct SixelRaster {
    width: u32,
    height: u32,
    registers: Vec<u16>,
    colors: BTreeMap<u16, String>,
}

impl SixelRaster {
    fn decode(body: &str, width: u32, height: u32) -> Self {
        let mut raster = Self {
            width,
            height,
            registers: vec![UNPAINTED; (width as usize) * (height as usize)],
            colors: BTreeMap::new(),
        };

        let mut chars = body.chars().peekable();
        let (mut register, mut x, mut band_top) = (0_u16, 0_u32, 0_u32);
        while let Some(ch) = chars.next() {
            match ch {
                '#' => {
                    let params = read_params(&mut chars);
                    let Some(selected) = params.first().and_then(|n| u16::try_from(*n).ok())
                    else {
                        continue;
                    };
                    register = selected;
                    if params.len() == 5 {
                        let definition = params[1..]
                            .iter()
                            .map(u32::to_string)
                            .collect::<Vec<_>>()
                            .join(";");
                        raster.colors.insert(register, definition);
                    }
                }
                '!' => {
                    let count = read_number(&mut chars).unwrap_or(1);
                    if let Some(data) = chars.next() {
                        raster.paint(register, x, band_top, data, count);
                        x = x.saturating_add(count);
                    }
                }
                '$' => x = 0,
                '-' => {
                    x = 0;
                    band_top += SIXEL_BAND;
                }
                '"' => {
                    read_params(&mut chars);
                }
                '?'..='~' => {
                    raster.paint(register, x, band_top, ch, 1);
                    x += 1;
                }
                _ => {}
            }
        }
        raster
    }

    fn paint(&mut self, register: u16, x: u32, band_top: u32, data: char, count: u32) {
        let Some(bits) = u32::from(data).checked_sub(u32::from(b'?')) else {
            return;
        };
        let x_end = x.saturating_add(count).min(self.width);
        for dy in 0..SIXEL_BAND {
            let y = band_top + dy;
            if bits & (1 << dy) == 0 || y >= self.height {
                continue;
            }
            let row = (y * self.width) as usize;
            for px in x..x_end {
                self.registers[row + px as usize] = register;
            }
        }
    }

    fn mask_transparent(&mut self, image: &RgbaImage) {
        for (register, pixel) in self.registers.iter_mut().zip(image.pixels()) {
            if pixel.0[3] < ALPHA_THRESHOLD {
                *register = UNPAINTED;
            }
        }
    }

    fn to_dcs(&self) -> String {
        let (width, height) = (self.width, self.height);
        let mut out = String::with_capacity((width * height / 2) as usize + 64);
        out.push_str(DCS_START);
        let _ = write!(out, "\"1;1;{width};{height}");

        let used: BTreeSet<u16> = self
            .registers
            .iter()
            .copied()
            .filter(|register| *register != UNPAINTED)
            .collect();
        for register in &used {
            if let Some(definition) = self.colors.get(register) {
                let _ = write!(out, "#{register};{definition}");
            }
        }

        let mut row = vec![0_u8; width as usize];
        let mut band_top = 0;
        while band_top < height {
            let band_rows = SIXEL_BAND.min(height - band_top);
            for register in band_registers(&self.registers, width, band_top, band_rows) {
                for x in 0..width {
                    let mut bits = 0_u8;
                    for dy in 0..band_rows {
                        let idx = ((band_top + dy) * width + x) as usize;
                        if self.registers[idx] == register {
                            bits |= 1 << dy;
                        }
                    }
                    row[x as usize] = bits;
                }
                let _ = write!(out, "#{register}");
                push_run_length(&mut out, &row);
                out.push('$');
            }
            out.push('-');
            band_top += SIXEL_BAND;
        }

        out.push_str(STRING_TERMINATOR);
        out
    }
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Option<u32> {
    let mut value: Option<u32> = None;
    while let Some(digit) = chars.peek().and_then(|ch| ch.to_digit(10)) {
        chars.next();
        value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(digit));
    }
    value
}

/// Semicolon-separated numeric parameters; empty ones read as zero.
fn read_params(chars: &mut Peekable<Chars<'_>>) -> Vec<u32> {
    let mut params = Vec::new();
    loop {
        params.push(read_number(chars).unwrap_or(0));
        if chars.peek() != Some(&';') {
            return params;
        }
        chars.next();
    }
}

fn band_registers(registers: &[u16], width: u32, band_top: u32, band_rows: u32) -> Vec<u16> {
    let start = (band_top * width) as usize;
    let end = ((band_top + band_rows) * width) as usize;
    let mut used: Vec<u16> = registers[start..end]
        .iter()
        .copied()
        .filter(|register| *register != UNPAINTED)
        .collect();
    used.sort_unstable();
    used.dedup();
    used
}

/// Writes one color row, trimming trailing blank sixels and compressing runs.
fn push_run_length(out: &mut String, row: &[u8]) {
    let used = row.iter().rposition(|bits| *bits != 0).map_or(0, |i| i + 1);
    let row = &row[..used];

    let mut i = 0;
    while i < row.len() {
        let bits = row[i];
        let run = row[i..].iter().take_while(|b| **b == bits).count();
        let ch = char::from(b'?' + bits);
        if run >= RLE_MIN_RUN {
            let _ = write!(out, "!{run}{ch}");
        } else {
            for _ in 0..run {
                out.push(ch);
            }
        }
        i += run;
    }
}
