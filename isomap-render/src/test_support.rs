//! Builders for region files and world directories used throughout the tests.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use fastnbt::ByteArray;
use flate2::{
    Compression,
    write::{GzEncoder, ZlibEncoder},
};
use glam::IVec3;
use image::{Rgba, RgbaImage};
use isomap_core::{BLOCK_COUNT, CHUNK_HEIGHT, CHUNK_WIDTH, ChunkPos, LocalChunkPos, NIBBLE_COUNT, RegionPos};
use serde::Serialize;

use crate::{
    region::mcregion::{COMPRESSION_ZLIB, ChunkLevel, ChunkRoot, HEADER_SIZE, SECTOR_SIZE, TileEntity},
    render_mode::{FOLIAGE_COLOR_FILE, GRASS_COLOR_FILE},
};

const STONE: u8 = 1;

/// Describes the content of a chunk to be written into a test region.
pub(crate) struct ChunkFixture {
    pos: ChunkPos,
    timestamp: u32,
    columns: Vec<(usize, usize, usize, u8)>,
    signs: Vec<(IVec3, String)>,
}

impl ChunkFixture {
    pub(crate) fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            timestamp: 1,
            columns: Vec::new(),
            signs: Vec::new(),
        }
    }

    pub(crate) fn timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Fills a column with stone up to `height` and caps it with `top`.
    pub(crate) fn column(mut self, x: usize, z: usize, height: usize, top: u8) -> Self {
        self.columns.push((x, z, height, top));
        self
    }

    /// Covers the whole chunk with a flat layer.
    pub(crate) fn flat(mut self, height: usize, top: u8) -> Self {
        for x in 0..CHUNK_WIDTH {
            for z in 0..CHUNK_WIDTH {
                self.columns.push((x, z, height, top));
            }
        }
        self
    }

    pub(crate) fn sign(mut self, pos: IVec3, text: &str) -> Self {
        self.signs.push((pos, text.to_owned()));
        self
    }

    fn to_nbt(&self) -> Vec<u8> {
        let mut blocks = vec![0_i8; BLOCK_COUNT];
        for &(x, z, height, top) in &self.columns {
            let base = (x * CHUNK_WIDTH + z) * CHUNK_HEIGHT;
            for y in 0..height {
                blocks[base + y] = STONE as i8;
            }
            blocks[base + height] = top as i8;
        }
        let root = ChunkRoot {
            level: ChunkLevel {
                x_pos: self.pos.0.x,
                z_pos: self.pos.0.y,
                blocks: ByteArray::new(blocks),
                data: ByteArray::new(vec![0; NIBBLE_COUNT]),
                sky_light: ByteArray::new(vec![-1; NIBBLE_COUNT]),
                block_light: ByteArray::new(vec![0; NIBBLE_COUNT]),
                tile_entities: self
                    .signs
                    .iter()
                    .map(|(pos, text)| TileEntity {
                        id: "Sign".to_owned(),
                        x: pos.x,
                        y: pos.y,
                        z: pos.z,
                        text1: text.clone(),
                        text2: String::new(),
                        text3: String::new(),
                        text4: String::new(),
                    })
                    .collect(),
            },
        };
        fastnbt::to_bytes(&root).unwrap()
    }
}

pub(crate) fn region_path(dir: &Path, region: RegionPos) -> PathBuf {
    dir.join(format!("r.{}.{}.mcr", region.0.x, region.0.y))
}

/// Writes a region file holding the given chunks and returns its path.
pub(crate) fn write_region(dir: &Path, region: RegionPos, chunks: &[ChunkFixture]) -> PathBuf {
    let entries = chunks
        .iter()
        .map(|chunk| {
            assert!(region.contains(chunk.pos), "chunk outside of region");
            (
                chunk.pos.local(),
                chunk.timestamp,
                COMPRESSION_ZLIB,
                zlib(&chunk.to_nbt()),
            )
        })
        .collect::<Vec<_>>();
    write_entries(dir, region, &entries)
}

/// Writes a region file holding a single chunk with an arbitrary payload.
pub(crate) fn write_raw_region(
    dir: &Path,
    region: RegionPos,
    local: LocalChunkPos,
    compression: u8,
    payload: &[u8],
) -> PathBuf {
    write_entries(dir, region, &[(local, 1, compression, payload.to_vec())])
}

fn write_entries(
    dir: &Path,
    region: RegionPos,
    entries: &[(LocalChunkPos, u32, u8, Vec<u8>)],
) -> PathBuf {
    let mut header = vec![0; HEADER_SIZE];
    let mut body = Vec::new();
    for (local, timestamp, compression, payload) in entries {
        let offset = (HEADER_SIZE + body.len()) / SECTOR_SIZE;
        body.extend_from_slice(&(payload.len() as u32 + 1).to_be_bytes());
        body.push(*compression);
        body.extend_from_slice(payload);
        let padded = body.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        let sectors = (HEADER_SIZE + padded) / SECTOR_SIZE - offset;
        body.resize(padded, 0);

        let location = ((offset as u32) << 8) | sectors as u32;
        let index = local.index() * 4;
        header[index..index + 4].copy_from_slice(&location.to_be_bytes());
        header[SECTOR_SIZE + index..SECTOR_SIZE + index + 4]
            .copy_from_slice(&timestamp.to_be_bytes());
    }
    header.extend_from_slice(&body);

    fs::create_dir_all(dir).unwrap();
    let path = region_path(dir, region);
    fs::write(&path, header).unwrap();
    path
}

fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

#[derive(Serialize)]
struct LevelDat {
    #[serde(rename = "Data")]
    data: LevelDatData,
}

#[derive(Serialize)]
struct LevelDatData {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<i32>,
    #[serde(rename = "SpawnX")]
    spawn_x: i32,
    #[serde(rename = "SpawnY")]
    spawn_y: i32,
    #[serde(rename = "SpawnZ")]
    spawn_z: i32,
    #[serde(rename = "LevelName")]
    level_name: String,
}

/// Writes a gzip compressed `level.dat` into the given world directory.
pub(crate) fn write_level_dat(world: &Path, version: Option<i32>, spawn: IVec3) {
    let level = LevelDat {
        data: LevelDatData {
            version,
            spawn_x: spawn.x,
            spawn_y: spawn.y,
            spawn_z: spawn.z,
            level_name: "Test World".to_owned(),
        },
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(&fastnbt::to_bytes(&level).unwrap())
        .unwrap();
    fs::create_dir_all(world).unwrap();
    fs::write(world.join("level.dat"), encoder.finish().unwrap()).unwrap();
}

/// Writes color tables where every pixel encodes its own coordinates.
pub(crate) fn write_color_tables(dir: &Path) {
    let table = RgbaImage::from_fn(256, 256, |x, y| Rgba([x as u8, y as u8, 7, 255]));
    fs::create_dir_all(dir).unwrap();
    table.save(dir.join(GRASS_COLOR_FILE)).unwrap();
    table.save(dir.join(FOLIAGE_COLOR_FILE)).unwrap();
}
