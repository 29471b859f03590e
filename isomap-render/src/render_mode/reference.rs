use std::sync::Arc;

use anyhow::Result;
use glam::I64Vec2;
use image::{Rgba, RgbaImage};
use isomap_core::{CHUNK_HEIGHT, CHUNK_WIDTH, Chunk};

use super::{BiomeColors, ChunkRenderer, RenderModeOptions};

/// Width of a block's top face in pixels.
const FACE_WIDTH: i64 = 24;
/// Height of a block's top face in pixels.
const FACE_HEIGHT: i64 = 12;
/// Vertical distance between two block layers in pixels.
const LAYER_HEIGHT: i64 = 12;
/// Vertical offset of the chunk's highest block layer within the chunk image.
const TOP_OFFSET: i64 = (CHUNK_WIDTH as i64 - 1) * FACE_HEIGHT / 2;

/// Height of a chunk's image in pixels.
pub const CHUNK_IMAGE_HEIGHT: u32 = (CHUNK_HEIGHT as u32) * 12 + 192;

const GRASS: u8 = 2;
const LEAVES: u8 = 18;

/// Draws the topmost block of every column as a flat shaded isometric face.
pub struct ReferenceRenderer {
    options: RenderModeOptions,
    biome_colors: Option<Arc<BiomeColors>>,
}

impl ReferenceRenderer {
    /// Creates a renderer. Plants are only tinted if biome colors are given.
    #[must_use]
    pub fn new(options: RenderModeOptions, biome_colors: Option<Arc<BiomeColors>>) -> Self {
        Self {
            options,
            biome_colors,
        }
    }

    fn base_color(&self, block: u8) -> [u8; 3] {
        match (block, &self.biome_colors) {
            (GRASS, Some(colors)) if self.options.biome_tint => colors.grass(),
            (LEAVES, Some(colors)) if self.options.biome_tint => colors.foliage(),
            _ => block_color(block),
        }
    }

    fn shade(&self, chunk: &Chunk, x: usize, z: usize, height: usize) -> f32 {
        let brightness = self.options.brightness;
        if !self.options.lighting {
            return brightness.min(1.0);
        }
        let above = height + 1;
        let sky = f32::from(chunk.sky_light(x, z, above)) * brightness;
        let block = f32::from(chunk.block_light(x, z, above));
        let level = sky.max(block).min(15.0) / 15.0;
        0.25 + 0.75 * level
    }
}

/// Returns the color of the classic block types. Unknown blocks are drawn grey.
fn block_color(block: u8) -> [u8; 3] {
    match block {
        1 => [0x7d, 0x7d, 0x7d],
        GRASS => [0x76, 0xb3, 0x4c],
        3 => [0x86, 0x60, 0x43],
        4 => [0x7a, 0x7a, 0x7a],
        5 => [0x9d, 0x80, 0x4f],
        7 => [0x54, 0x54, 0x54],
        8 | 9 => [0x2f, 0x43, 0xf4],
        10 | 11 => [0xcf, 0x5c, 0x14],
        12 => [0xdb, 0xd3, 0xa0],
        13 => [0x88, 0x7e, 0x7e],
        17 => [0x66, 0x51, 0x33],
        LEAVES => [0x3c, 0xc0, 0x29],
        24 => [0xd8, 0xcb, 0x9b],
        35 => [0xdd, 0xdd, 0xdd],
        78 | 80 => [0xf0, 0xfb, 0xfb],
        79 => [0x7d, 0xad, 0xff],
        82 => [0x9e, 0xa4, 0xb0],
        87 => [0x6f, 0x36, 0x34],
        88 => [0x55, 0x40, 0x33],
        89 => [0xf9, 0xd4, 0x9c],
        _ => [0xa0, 0xa0, 0xa0],
    }
}

fn scaled(color: [u8; 3], factor: f32) -> Rgba<u8> {
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "clamped to the range of u8"
    )]
    let channel = |value: u8| (f32::from(value) * factor).round().clamp(0.0, 255.0) as u8;
    Rgba([channel(color[0]), channel(color[1]), channel(color[2]), 0xff])
}

fn put(canvas: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
        return;
    };
    if let Some(pixel) = canvas.get_pixel_mut_checked(x, y) {
        *pixel = color;
    }
}

/// Half the width of the top face at the given line.
fn face_half_width(line: i64) -> i64 {
    let distance = if line < FACE_HEIGHT / 2 {
        line
    } else {
        FACE_HEIGHT - 1 - line
    };
    2 * distance + 2
}

impl ChunkRenderer for ReferenceRenderer {
    fn render_chunk(&self, chunk: &Chunk, canvas: &mut RgbaImage, origin: I64Vec2) -> Result<()> {
        // back to front
        for x in (0..CHUNK_WIDTH).rev() {
            for z in 0..CHUNK_WIDTH {
                let Some((height, block)) = chunk.top_block(x, z) else {
                    continue;
                };
                let base = self.base_color(block);
                let shade = self.shade(chunk, x, z, height);
                let top = scaled(base, shade);
                let side = scaled(base, shade * 0.7);

                #[expect(clippy::cast_possible_wrap, reason = "chunk coordinates are tiny")]
                let (x_i, z_i, height_i) = (x as i64, z as i64, height as i64);
                let left = origin.x + FACE_HEIGHT * (x_i + z_i);
                let upper = origin.y
                    + TOP_OFFSET
                    + FACE_HEIGHT / 2 * (z_i - x_i)
                    + LAYER_HEIGHT * (CHUNK_HEIGHT as i64 - 1 - height_i);

                for line in FACE_HEIGHT / 2..FACE_HEIGHT / 2 + LAYER_HEIGHT {
                    for column in 0..FACE_WIDTH {
                        put(canvas, left + column, upper + line, side);
                    }
                }
                for line in 0..FACE_HEIGHT {
                    let half = face_half_width(line);
                    for column in FACE_WIDTH / 2 - half..FACE_WIDTH / 2 + half {
                        put(canvas, left + column, upper + line, top);
                    }
                }
            }
        }
        Ok(())
    }
}
