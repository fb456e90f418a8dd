//! Byte-exact persisted form of a tile store.
//!
//! Layout (all integers little-endian): magic `TSTR`, format version,
//! pixel size, one default pixel, tile count, then one record per
//! allocated tile (column, row, full tile payload) in (row, column)
//! order so equal stores serialize to equal bytes. Writing then reading
//! back reproduces bit-identical pixel content; coordinates that were
//! never written still read as the default pixel captured here.

use std::fmt;
use std::io::{self, Read, Write};

use model::TILE_PIXELS;

use crate::TileStore;

const MAGIC: [u8; 4] = *b"TSTR";
const FORMAT_VERSION: u32 = 1;

/// Pixel sizes above this are assumed to be stream corruption rather
/// than a real channel layout.
const MAX_PIXEL_SIZE: u32 = 256;

#[derive(Debug)]
pub enum StreamError {
    Io(io::Error),
    BadMagic,
    UnsupportedVersion(u32),
    InvalidPixelSize(u32),
}

impl From<io::Error> for StreamError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Io(error) => write!(formatter, "tile stream I/O failed: {error}"),
            StreamError::BadMagic => write!(formatter, "tile stream magic mismatch"),
            StreamError::UnsupportedVersion(version) => {
                write!(formatter, "unsupported tile stream version {version}")
            }
            StreamError::InvalidPixelSize(pixel_size) => {
                write!(formatter, "implausible tile stream pixel size {pixel_size}")
            }
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl TileStore {
    /// Writes the persisted form. On failure the stream contents are
    /// unspecified and the caller must discard the target.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), StreamError> {
        writer.write_all(&MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.pixel_size() as u32).to_le_bytes())?;
        writer.write_all(self.default_pixel())?;
        let tiles = self.tiles_sorted();
        writer.write_all(&(tiles.len() as u64).to_le_bytes())?;
        for (col, row, tile) in tiles {
            writer.write_all(&col.to_le_bytes())?;
            writer.write_all(&row.to_le_bytes())?;
            writer.write_all(tile.bytes())?;
        }
        Ok(())
    }

    /// Reads a persisted store back. On failure the returned error is
    /// the only artifact; no partially populated store escapes.
    pub fn read_from(reader: &mut impl Read) -> Result<TileStore, StreamError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(StreamError::BadMagic);
        }
        let version = read_u32(reader)?;
        if version != FORMAT_VERSION {
            return Err(StreamError::UnsupportedVersion(version));
        }
        let pixel_size = read_u32(reader)?;
        if pixel_size == 0 || pixel_size > MAX_PIXEL_SIZE {
            return Err(StreamError::InvalidPixelSize(pixel_size));
        }
        let pixel_size = pixel_size as usize;

        let mut default_pixel = vec![0u8; pixel_size];
        reader.read_exact(&mut default_pixel)?;
        let mut store = TileStore::new(pixel_size, &default_pixel);

        let tile_count = read_u64(reader)?;
        for _ in 0..tile_count {
            let col = read_i32(reader)?;
            let row = read_i32(reader)?;
            let mut payload = vec![0u8; TILE_PIXELS * pixel_size].into_boxed_slice();
            reader.read_exact(&mut payload)?;
            store.insert_tile_bytes(col, row, payload);
        }
        Ok(store)
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32, StreamError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_i32(reader: &mut impl Read) -> Result<i32, StreamError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

fn read_u64(reader: &mut impl Read) -> Result<u64, StreamError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}
