//! Reader for the McRegion (`.mcr`) file format.
//!
//! A region file starts with two tables of 1024 big endian `u32` entries each, followed by the
//! chunk payloads aligned to 4 KiB sectors:
//! - locations: sector offset in the upper 24 bits, sector count in the lowest 8 bits
//! - timestamps: seconds since the unix epoch the chunk was last saved
//!
//! Every payload starts with its length and compression scheme and contains a compressed NBT
//! document.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use fastnbt::ByteArray;
use flate2::read::{GzDecoder, ZlibDecoder};
use glam::IVec3;
use isomap_core::{Chunk, ChunkPos, LocalChunkPos, RegionPos, Sign};
use serde::{Deserialize, Serialize};

use super::{RegionFormat, RegionReader};

pub(crate) const SECTOR_SIZE: usize = 4096;
pub(crate) const HEADER_SIZE: usize = 2 * SECTOR_SIZE;
pub(crate) const COMPRESSION_GZIP: u8 = 1;
pub(crate) const COMPRESSION_ZLIB: u8 = 2;

const SIGN_ENTITY_ID: &str = "Sign";

/// The McRegion format used by worlds of format version 19132.
#[derive(Clone, Copy, Debug, Default)]
pub struct McRegionFormat;

impl RegionFormat for McRegionFormat {
    fn extension(&self) -> &str {
        "mcr"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn RegionReader>> {
        Ok(Box::new(McRegionReader::open(path)?))
    }
}

/// An opened McRegion file with its header tables loaded.
pub struct McRegionReader {
    path: PathBuf,
    file: File,
    locations: Box<[u32]>,
    timestamps: Box<[u32]>,
}

impl McRegionReader {
    /// Opens a region file and reads its header.
    ///
    /// # Errors
    ///
    /// Fails if the file can't be opened or is too short to contain a header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("opening region {}", path.display()))?;
        let mut header = vec![0; HEADER_SIZE];
        file.read_exact(&mut header)
            .with_context(|| format!("reading header of region {}", path.display()))?;

        let (locations, timestamps) = header.split_at(SECTOR_SIZE);
        Ok(Self {
            path: path.to_owned(),
            file,
            locations: parse_table(locations),
            timestamps: parse_table(timestamps),
        })
    }

    fn location(&self, local: LocalChunkPos) -> Option<u32> {
        self.locations
            .get(local.index())
            .copied()
            .filter(|&location| location != 0)
    }

    fn read_payload(&mut self, location: u32) -> Result<Vec<u8>> {
        let offset = u64::from(location >> 8) * SECTOR_SIZE as u64;
        let sectors = usize::try_from(location & 0xff)?;
        if offset < HEADER_SIZE as u64 || sectors == 0 {
            bail!("invalid chunk location {location:#010x}");
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut prefix = [0; 5];
        self.file.read_exact(&mut prefix)?;
        let [len_0, len_1, len_2, len_3, compression] = prefix;
        let length = usize::try_from(u32::from_be_bytes([len_0, len_1, len_2, len_3]))?;
        // the length includes the compression byte
        if length == 0 || length + 4 > sectors * SECTOR_SIZE {
            bail!("chunk length {length} exceeds its {sectors} sectors");
        }

        let mut compressed = vec![0; length - 1];
        self.file.read_exact(&mut compressed)?;

        let mut decompressed = Vec::new();
        match compression {
            COMPRESSION_GZIP => {
                GzDecoder::new(compressed.as_slice()).read_to_end(&mut decompressed)?;
            }
            COMPRESSION_ZLIB => {
                ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut decompressed)?;
            }
            other => bail!("unknown compression scheme {other}"),
        }
        Ok(decompressed)
    }
}

impl RegionReader for McRegionReader {
    fn timestamp(&self, local: LocalChunkPos) -> Option<u32> {
        self.location(local)?;
        self.timestamps.get(local.index()).copied()
    }

    fn read_chunk(&mut self, pos: ChunkPos) -> Result<Option<Chunk>> {
        let local = pos.local();
        let Some(location) = self.location(local) else {
            return Ok(None);
        };
        let timestamp = self.timestamp(local).unwrap_or(0);

        let payload = self
            .read_payload(location)
            .with_context(|| format!("chunk {pos} of {}", self.path.display()))?;
        let root: ChunkRoot = fastnbt::from_bytes(&payload)
            .with_context(|| format!("decoding chunk {pos} of {}", self.path.display()))?;
        let level = root.level;

        if level.x_pos != pos.0.x || level.z_pos != pos.0.y {
            bail!(
                "chunk {pos} of {} claims to be at ({}, {})",
                self.path.display(),
                level.x_pos,
                level.z_pos
            );
        }

        let signs = level
            .tile_entities
            .into_iter()
            .filter(|entity| entity.id == SIGN_ENTITY_ID)
            .map(|entity| Sign {
                pos: IVec3::new(entity.x, entity.y, entity.z),
                lines: [entity.text1, entity.text2, entity.text3, entity.text4],
            })
            .collect();

        let chunk = Chunk::new(
            pos,
            timestamp,
            unsigned(&level.blocks),
            unsigned(&level.data),
            unsigned(&level.sky_light),
            unsigned(&level.block_light),
            signs,
        )?;
        Ok(Some(chunk))
    }
}

fn parse_table(bytes: &[u8]) -> Box<[u32]> {
    bytes
        .chunks_exact(4)
        .map(|entry| entry.try_into().map_or(0, u32::from_be_bytes))
        .take(RegionPos::CHUNK_COUNT)
        .collect()
}

fn unsigned(bytes: &ByteArray) -> Box<[u8]> {
    bytes
        .iter()
        .map(|&byte| u8::from_be_bytes(byte.to_be_bytes()))
        .collect()
}

/// Root compound of a chunk's NBT document.
#[derive(Serialize, Deserialize)]
pub(crate) struct ChunkRoot {
    #[serde(rename = "Level")]
    pub(crate) level: ChunkLevel,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct ChunkLevel {
    #[serde(rename = "xPos")]
    pub(crate) x_pos: i32,
    #[serde(rename = "zPos")]
    pub(crate) z_pos: i32,
    #[serde(rename = "Blocks")]
    pub(crate) blocks: ByteArray,
    #[serde(rename = "Data")]
    pub(crate) data: ByteArray,
    #[serde(rename = "SkyLight")]
    pub(crate) sky_light: ByteArray,
    #[serde(rename = "BlockLight")]
    pub(crate) block_light: ByteArray,
    #[serde(rename = "TileEntities", default)]
    pub(crate) tile_entities: Vec<TileEntity>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct TileEntity {
    pub(crate) id: String,
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) z: i32,
    #[serde(rename = "Text1", default)]
    pub(crate) text1: String,
    #[serde(rename = "Text2", default)]
    pub(crate) text2: String,
    #[serde(rename = "Text3", default)]
    pub(crate) text3: String,
    #[serde(rename = "Text4", default)]
    pub(crate) text4: String,
}

#[cfg(test)]
mod tests {

    use isomap_core::AIR;

    use super::*;
    use crate::test_support::{ChunkFixture, write_raw_region, write_region};

    #[test]
    fn read_stored_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = ChunkFixture::new(ChunkPos::new(33, -2))
            .timestamp(1_234)
            .column(4, 7, 60, 3)
            .sign(IVec3::new(1_060, 61, -25), "hello");
        let path = write_region(dir.path(), RegionPos::new(1, -1), &[chunk]);

        let mut reader = McRegionReader::open(&path).unwrap();
        assert_eq!(
            Some(1_234),
            reader.timestamp(ChunkPos::new(33, -2).local())
        );
        assert_eq!(None, reader.timestamp(ChunkPos::new(32, -2).local()));

        let chunk = reader.read_chunk(ChunkPos::new(33, -2)).unwrap().unwrap();
        assert_eq!(Some((60, 3)), chunk.top_block(4, 7));
        assert_eq!(AIR, chunk.block(4, 7, 61));
        assert_eq!(1, chunk.signs().len());
        assert_eq!("hello", chunk.signs()[0].text());
    }

    #[test]
    fn missing_chunk_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_region(
            dir.path(),
            RegionPos::new(0, 0),
            &[ChunkFixture::new(ChunkPos::new(0, 0))],
        );
        let mut reader = McRegionReader::open(&path).unwrap();
        assert!(reader.read_chunk(ChunkPos::new(5, 5)).unwrap().is_none());
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw_region(
            dir.path(),
            RegionPos::new(0, 0),
            ChunkPos::new(2, 3).local(),
            COMPRESSION_ZLIB,
            b"definitely not zlib",
        );
        let mut reader = McRegionReader::open(&path).unwrap();
        assert!(reader.timestamp(ChunkPos::new(2, 3).local()).is_some());
        assert!(reader.read_chunk(ChunkPos::new(2, 3)).is_err());
    }

    #[test]
    fn truncated_header_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.0.0.mcr");
        std::fs::write(&path, [0; 100]).unwrap();
        assert!(McRegionReader::open(&path).is_err());
    }
}
