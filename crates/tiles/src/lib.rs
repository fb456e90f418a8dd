//! Sparse tile store for one raster data's pixel content.
//!
//! Pixels live in lazily allocated `TILE_SIZE`-square tiles keyed by tile
//! column/row; any coordinate that was never written reads as the store's
//! default pixel. The store interprets pixels only as opaque byte strings
//! of `pixel_size` bytes; channel layout is the color space's business.

use std::collections::HashMap;

use bitvec::prelude::{BitVec, Lsb0};
use model::{Rect, Region, TILE_PIXELS, TILE_SIZE, tile_of, tile_rect, tiles_covering};
use static_assertions::const_assert;

mod accessors;
mod pool;
mod stream;

pub use accessors::{
    HLineConstIter, HLineIter, RandomAccessor, RandomConstAccessor, VLineConstIter, VLineIter,
    WrapHLineConstIter,
};
pub use pool::{PoolReleaseGuard, release_internal_pools};
pub use stream::StreamError;

const_assert!(TILE_SIZE > 0);
const_assert!(TILE_SIZE & (TILE_SIZE - 1) == 0);

/// One allocated tile: `TILE_PIXELS * pixel_size` bytes, row-major.
/// Buffers return to the process-wide pool on drop.
#[derive(Debug)]
pub(crate) struct Tile {
    bytes: Box<[u8]>,
}

impl Tile {
    fn filled(pixel_size: usize, pixel: &[u8]) -> Self {
        let mut bytes = pool::acquire_buffer(TILE_PIXELS * pixel_size);
        fill_pixels(&mut bytes, pixel);
        Self { bytes }
    }

    pub(crate) fn from_bytes(bytes: Box<[u8]>) -> Self {
        Self { bytes }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for Tile {
    fn drop(&mut self) {
        pool::recycle_buffer(std::mem::take(&mut self.bytes));
    }
}

fn fill_pixels(buffer: &mut [u8], pixel: &[u8]) {
    debug_assert_eq!(buffer.len() % pixel.len(), 0);
    for slot in buffer.chunks_exact_mut(pixel.len()) {
        slot.copy_from_slice(pixel);
    }
}

/// Sparse, lazily allocated 2D pixel store.
#[derive(Debug)]
pub struct TileStore {
    pixel_size: usize,
    default_pixel: Box<[u8]>,
    /// One full tile of the default pixel; what const accessors hand out
    /// for unallocated coordinates.
    default_tile: Box<[u8]>,
    tiles: HashMap<(i32, i32), Tile>,
}

impl TileStore {
    pub fn new(pixel_size: usize, default_pixel: &[u8]) -> Self {
        assert!(pixel_size > 0, "pixel size must be at least 1");
        assert_eq!(
            default_pixel.len(),
            pixel_size,
            "default pixel length must equal the pixel size"
        );
        let mut default_tile = vec![0u8; TILE_PIXELS * pixel_size].into_boxed_slice();
        fill_pixels(&mut default_tile, default_pixel);
        Self {
            pixel_size,
            default_pixel: default_pixel.into(),
            default_tile,
            tiles: HashMap::new(),
        }
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    pub fn default_pixel(&self) -> &[u8] {
        &self.default_pixel
    }

    /// Changes the pixel returned for never-written coordinates. Already
    /// allocated tiles keep their bytes.
    pub fn set_default_pixel(&mut self, pixel: &[u8]) {
        assert_eq!(
            pixel.len(),
            self.pixel_size,
            "default pixel length must equal the pixel size"
        );
        self.default_pixel = pixel.into();
        fill_pixels(&mut self.default_tile, pixel);
    }

    pub(crate) fn default_tile(&self) -> &[u8] {
        &self.default_tile
    }

    pub(crate) fn tile(&self, tile_col: i32, tile_row: i32) -> Option<&Tile> {
        self.tiles.get(&(tile_col, tile_row))
    }

    pub(crate) fn tile_mut(&mut self, tile_col: i32, tile_row: i32) -> &mut Tile {
        let pixel_size = self.pixel_size;
        let default_pixel = &self.default_pixel;
        self.tiles
            .entry((tile_col, tile_row))
            .or_insert_with(|| Tile::filled(pixel_size, default_pixel))
    }

    pub(crate) fn insert_tile_bytes(&mut self, tile_col: i32, tile_row: i32, bytes: Box<[u8]>) {
        assert_eq!(
            bytes.len(),
            TILE_PIXELS * self.pixel_size,
            "tile payload length must match the tile byte size"
        );
        self.tiles.insert((tile_col, tile_row), Tile::from_bytes(bytes));
    }

    /// Allocated tiles in deterministic (row, column) order.
    pub(crate) fn tiles_sorted(&self) -> Vec<(i32, i32, &Tile)> {
        let mut entries: Vec<(i32, i32, &Tile)> = self
            .tiles
            .iter()
            .map(|(&(col, row), tile)| (col, row, tile))
            .collect();
        entries.sort_by_key(|&(col, row, _)| (row, col));
        entries
    }

    pub fn allocated_tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Tile-aligned bounding rect of all allocated tiles, independent of
    /// whether the pixels inside still equal the default.
    pub fn extent(&self) -> Rect {
        let mut bounds = Rect::EMPTY;
        for &(col, row) in self.tiles.keys() {
            bounds = bounds.united(tile_rect(col, row));
        }
        bounds
    }

    /// The allocated-tile footprint as a set of rects, horizontal runs of
    /// adjacent tiles merged per tile row.
    pub fn region(&self) -> Region {
        let mut rows: HashMap<i32, Vec<i32>> = HashMap::new();
        for &(col, row) in self.tiles.keys() {
            rows.entry(row).or_default().push(col);
        }

        let mut region = Region::new();
        for (row, cols) in rows {
            let min_col = *cols.iter().min().expect("row has at least one tile");
            let max_col = *cols.iter().max().expect("row has at least one tile");
            let span = (max_col - min_col + 1) as usize;
            let mut occupancy: BitVec<usize, Lsb0> = BitVec::repeat(false, span);
            for col in cols {
                occupancy.set((col - min_col) as usize, true);
            }

            let mut run_start = None;
            for index in 0..=span {
                let occupied = index < span && occupancy[index];
                match (occupied, run_start) {
                    (true, None) => run_start = Some(index),
                    (false, Some(start)) => {
                        let first = min_col + start as i32;
                        let last = min_col + index as i32 - 1;
                        region.push(Rect::new(
                            first * TILE_SIZE,
                            row * TILE_SIZE,
                            (last - first + 1) * TILE_SIZE,
                            TILE_SIZE,
                        ));
                        run_start = None;
                    }
                    _ => {}
                }
            }
        }
        region
    }

    /// Reads `rect` into a freshly allocated buffer. On allocation
    /// failure the read degrades to an empty buffer.
    pub fn read_bytes(&self, rect: Rect) -> Vec<u8> {
        let len = byte_len(rect, self.pixel_size);
        let mut out = Vec::new();
        if out.try_reserve_exact(len).is_err() {
            log::warn!("tile store read of {len} bytes failed to allocate, returning empty buffer");
            return Vec::new();
        }
        out.resize(len, 0);
        self.read_bytes_into(rect, &mut out);
        out
    }

    /// Reads `rect` into `out`, which must hold exactly
    /// `rect.width * rect.height` pixels. Unallocated coordinates read as
    /// the default pixel.
    pub fn read_bytes_into(&self, rect: Rect, out: &mut [u8]) {
        assert_eq!(
            out.len(),
            byte_len(rect, self.pixel_size),
            "read buffer length must match the requested rect"
        );
        if rect.is_empty() {
            return;
        }
        let pixel_size = self.pixel_size;
        let tiles = tiles_covering(rect);
        for tile_row in tiles.top()..=tiles.bottom() {
            for tile_col in tiles.left()..=tiles.right() {
                let overlap = tile_rect(tile_col, tile_row).intersected(rect);
                let tile = self.tiles.get(&(tile_col, tile_row));
                for y in overlap.top()..=overlap.bottom() {
                    let out_start = (((y - rect.y) as usize) * rect.width as usize
                        + (overlap.left() - rect.x) as usize)
                        * pixel_size;
                    let out_row = &mut out[out_start..out_start + overlap.width as usize * pixel_size];
                    match tile {
                        Some(tile) => {
                            let src_start = tile_row_offset(tile_col, tile_row, overlap.left(), y)
                                * pixel_size;
                            out_row.copy_from_slice(
                                &tile.bytes()[src_start..src_start + out_row.len()],
                            );
                        }
                        None => fill_pixels(out_row, &self.default_pixel),
                    }
                }
            }
        }
    }

    /// Writes `bytes` over `rect`, allocating tiles as needed.
    pub fn write_bytes(&mut self, rect: Rect, bytes: &[u8]) {
        assert_eq!(
            bytes.len(),
            byte_len(rect, self.pixel_size),
            "write buffer length must match the target rect"
        );
        if rect.is_empty() {
            return;
        }
        let pixel_size = self.pixel_size;
        let tiles = tiles_covering(rect);
        for tile_row in tiles.top()..=tiles.bottom() {
            for tile_col in tiles.left()..=tiles.right() {
                let overlap = tile_rect(tile_col, tile_row).intersected(rect);
                let tile = self.tile_mut(tile_col, tile_row);
                for y in overlap.top()..=overlap.bottom() {
                    let src_start = (((y - rect.y) as usize) * rect.width as usize
                        + (overlap.left() - rect.x) as usize)
                        * pixel_size;
                    let src_row = &bytes[src_start..src_start + overlap.width as usize * pixel_size];
                    let dst_start =
                        tile_row_offset(tile_col, tile_row, overlap.left(), y) * pixel_size;
                    tile.bytes_mut()[dst_start..dst_start + src_row.len()]
                        .copy_from_slice(src_row);
                }
            }
        }
    }

    /// Reads `rect` split into per-channel planes. `channel_sizes` is the
    /// byte width of each channel and must sum to the pixel size.
    pub fn read_planar_bytes(&self, rect: Rect, channel_sizes: &[usize]) -> Vec<Vec<u8>> {
        assert_eq!(
            channel_sizes.iter().sum::<usize>(),
            self.pixel_size,
            "channel sizes must sum to the pixel size"
        );
        let interleaved = self.read_bytes(rect);
        let pixel_count = interleaved.len() / self.pixel_size;
        let mut planes: Vec<Vec<u8>> = channel_sizes
            .iter()
            .map(|&size| Vec::with_capacity(size * pixel_count))
            .collect();
        for pixel in interleaved.chunks_exact(self.pixel_size) {
            let mut offset = 0;
            for (plane, &size) in planes.iter_mut().zip(channel_sizes) {
                plane.extend_from_slice(&pixel[offset..offset + size]);
                offset += size;
            }
        }
        planes
    }

    /// Writes per-channel planes over `rect`, interleaving them back into
    /// the store's pixel layout.
    pub fn write_planar_bytes(&mut self, rect: Rect, channel_sizes: &[usize], planes: &[&[u8]]) {
        assert_eq!(
            channel_sizes.iter().sum::<usize>(),
            self.pixel_size,
            "channel sizes must sum to the pixel size"
        );
        assert_eq!(
            planes.len(),
            channel_sizes.len(),
            "one plane per channel required"
        );
        if rect.is_empty() {
            return;
        }
        let pixel_count = rect.width as usize * rect.height as usize;
        for (plane, &size) in planes.iter().zip(channel_sizes) {
            assert_eq!(
                plane.len(),
                size * pixel_count,
                "plane length must match the target rect"
            );
        }
        let mut interleaved = vec![0u8; pixel_count * self.pixel_size];
        for (index, pixel) in interleaved.chunks_exact_mut(self.pixel_size).enumerate() {
            let mut offset = 0;
            for (plane, &size) in planes.iter().zip(channel_sizes) {
                pixel[offset..offset + size].copy_from_slice(&plane[index * size..(index + 1) * size]);
                offset += size;
            }
        }
        self.write_bytes(rect, &interleaved);
    }

    /// Fills `rect` with one pixel value, allocating tiles as needed.
    pub fn fill(&mut self, rect: Rect, pixel: &[u8]) {
        assert_eq!(
            pixel.len(),
            self.pixel_size,
            "fill pixel length must equal the pixel size"
        );
        if rect.is_empty() {
            return;
        }
        let pixel_size = self.pixel_size;
        let tiles = tiles_covering(rect);
        for tile_row in tiles.top()..=tiles.bottom() {
            for tile_col in tiles.left()..=tiles.right() {
                let overlap = tile_rect(tile_col, tile_row).intersected(rect);
                let tile = self.tile_mut(tile_col, tile_row);
                for y in overlap.top()..=overlap.bottom() {
                    let start = tile_row_offset(tile_col, tile_row, overlap.left(), y) * pixel_size;
                    fill_pixels(
                        &mut tile.bytes_mut()[start..start + overlap.width as usize * pixel_size],
                        pixel,
                    );
                }
            }
        }
    }

    /// Resets the whole store to the default pixel and drops every tile.
    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    /// Resets `rect` to the default pixel. Tiles fully inside the rect
    /// are deallocated; partially covered tiles are overwritten in place.
    pub fn clear_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let tiles = tiles_covering(rect);
        let default_pixel = self.default_pixel.clone();
        for tile_row in tiles.top()..=tiles.bottom() {
            for tile_col in tiles.left()..=tiles.right() {
                let tile_bounds = tile_rect(tile_col, tile_row);
                if rect.contains_rect(tile_bounds) {
                    self.tiles.remove(&(tile_col, tile_row));
                } else if self.tiles.contains_key(&(tile_col, tile_row)) {
                    self.fill(tile_bounds.intersected(rect), &default_pixel);
                }
            }
        }
    }

    /// Deallocates tiles intersecting `rect` whose every pixel equals the
    /// default pixel. Logical content is unchanged; only the footprint
    /// shrinks.
    pub fn purge(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let tiles = tiles_covering(rect);
        let default_tile = std::mem::take(&mut self.default_tile);
        self.tiles.retain(|&(col, row), tile| {
            let inside = tiles.contains(col, row);
            !(inside && tile.bytes() == &*default_tile)
        });
        self.default_tile = default_tile;
    }

    /// Deep copy with an independent tile set.
    pub fn clone_store(&self) -> TileStore {
        let mut copy = TileStore::new(self.pixel_size, &self.default_pixel);
        for (&(col, row), tile) in &self.tiles {
            copy.insert_tile_bytes(col, row, tile.bytes().to_vec().into_boxed_slice());
        }
        copy
    }

    /// Copies every tile of `src` allocated inside `rect` (tile-aligned)
    /// into this store, replacing whatever was there. Pixel sizes must
    /// match; this is the tile-level path behind fast bit-block transfer.
    pub fn copy_tiles_from(&mut self, src: &TileStore, rect: Rect) {
        assert_eq!(
            self.pixel_size, src.pixel_size,
            "fast tile copy requires matching pixel sizes"
        );
        if rect.is_empty() {
            return;
        }
        let tiles = tiles_covering(rect);
        for tile_row in tiles.top()..=tiles.bottom() {
            for tile_col in tiles.left()..=tiles.right() {
                match src.tiles.get(&(tile_col, tile_row)) {
                    Some(tile) => self.insert_tile_bytes(
                        tile_col,
                        tile_row,
                        tile.bytes().to_vec().into_boxed_slice(),
                    ),
                    None => {
                        self.tiles.remove(&(tile_col, tile_row));
                    }
                }
            }
        }
    }

    pub fn create_random_accessor(&mut self) -> RandomAccessor<'_> {
        RandomAccessor::new(self)
    }

    pub fn create_random_const_accessor(&self) -> RandomConstAccessor<'_> {
        RandomConstAccessor::new(self)
    }

    pub fn create_hline_iter(&mut self, x: i32, y: i32, width: i32) -> HLineIter<'_> {
        HLineIter::new(self, x, y, width)
    }

    pub fn create_hline_const_iter(&self, x: i32, y: i32, width: i32) -> HLineConstIter<'_> {
        HLineConstIter::new(self, x, y, width)
    }

    pub fn create_vline_iter(&mut self, x: i32, y: i32, height: i32) -> VLineIter<'_> {
        VLineIter::new(self, x, y, height)
    }

    pub fn create_vline_const_iter(&self, x: i32, y: i32, height: i32) -> VLineConstIter<'_> {
        VLineConstIter::new(self, x, y, height)
    }

    pub fn create_wrap_hline_const_iter(
        &self,
        x: i32,
        y: i32,
        width: i32,
        wrap_rect: Rect,
    ) -> WrapHLineConstIter<'_> {
        WrapHLineConstIter::new(self, x, y, width, wrap_rect)
    }
}

fn byte_len(rect: Rect, pixel_size: usize) -> usize {
    if rect.is_empty() {
        return 0;
    }
    rect.width as usize * rect.height as usize * pixel_size
}

/// Pixel index inside a tile's buffer for an absolute coordinate that is
/// known to fall within tile `(tile_col, tile_row)`.
pub(crate) fn tile_row_offset(tile_col: i32, tile_row: i32, x: i32, y: i32) -> usize {
    let local_x = x - tile_col * TILE_SIZE;
    let local_y = y - tile_row * TILE_SIZE;
    debug_assert!(local_x >= 0 && local_x < TILE_SIZE);
    debug_assert!(local_y >= 0 && local_y < TILE_SIZE);
    (local_y * TILE_SIZE + local_x) as usize
}

pub(crate) fn offset_in_tile(coordinate: i32) -> i32 {
    coordinate - tile_of(coordinate) * TILE_SIZE
}
