//! Sequential and random-position views over a tile store.
//!
//! Every accessor steps in contiguous runs: a run is the longest span of
//! pixels from the current position that stays inside one underlying
//! tile row (or inside the default tile for unallocated coordinates).
//! Writing accessors allocate tiles on first touch. No accessor stays
//! valid across structural mutation of the store other than by
//! re-deriving its position with `move_to`.

use model::{Rect, TILE_SIZE, tile_of, wrap_coordinate};

use crate::{TileStore, offset_in_tile, tile_row_offset};

/// Random-position read-only accessor with amortized O(1) `move_to`.
#[derive(Debug)]
pub struct RandomConstAccessor<'a> {
    store: &'a TileStore,
    x: i32,
    y: i32,
}

impl<'a> RandomConstAccessor<'a> {
    pub(crate) fn new(store: &'a TileStore) -> Self {
        Self { store, x: 0, y: 0 }
    }

    pub fn move_to(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    /// The current pixel's bytes; the default pixel for unallocated
    /// coordinates.
    pub fn raw_data(&self) -> &'a [u8] {
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(self.x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, self.x, self.y) * pixel_size;
        match self.store.tile(tile_col, tile_row) {
            Some(tile) => &tile.bytes()[offset..offset + pixel_size],
            None => &self.store.default_tile()[offset..offset + pixel_size],
        }
    }

    /// Longest contiguous run starting at the current position, capped at
    /// `max_width` pixels.
    pub fn raw_run(&self, max_width: i32) -> &'a [u8] {
        let run_len = self.num_contiguous_columns().min(max_width).max(0);
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(self.x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, self.x, self.y) * pixel_size;
        let len = run_len as usize * pixel_size;
        match self.store.tile(tile_col, tile_row) {
            Some(tile) => &tile.bytes()[offset..offset + len],
            None => &self.store.default_tile()[offset..offset + len],
        }
    }

    pub fn num_contiguous_columns(&self) -> i32 {
        TILE_SIZE - offset_in_tile(self.x)
    }

    pub fn num_contiguous_rows(&self) -> i32 {
        TILE_SIZE - offset_in_tile(self.y)
    }
}

/// Random-position writing accessor; writes allocate tiles.
#[derive(Debug)]
pub struct RandomAccessor<'a> {
    store: &'a mut TileStore,
    x: i32,
    y: i32,
}

impl<'a> RandomAccessor<'a> {
    pub(crate) fn new(store: &'a mut TileStore) -> Self {
        Self { store, x: 0, y: 0 }
    }

    pub fn move_to(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    /// Reads without allocating: the default pixel for unallocated
    /// coordinates.
    pub fn raw_data(&self) -> &[u8] {
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(self.x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, self.x, self.y) * pixel_size;
        match self.store.tile(tile_col, tile_row) {
            Some(tile) => &tile.bytes()[offset..offset + pixel_size],
            None => &self.store.default_tile()[offset..offset + pixel_size],
        }
    }

    /// The current pixel's bytes for writing; allocates the tile.
    pub fn raw_data_mut(&mut self) -> &mut [u8] {
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(self.x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, self.x, self.y) * pixel_size;
        let tile = self.store.tile_mut(tile_col, tile_row);
        &mut tile.bytes_mut()[offset..offset + pixel_size]
    }

    /// Longest contiguous writable run starting at the current position,
    /// capped at `max_width` pixels; allocates the tile.
    pub fn raw_run_mut(&mut self, max_width: i32) -> &mut [u8] {
        let run_len = self.num_contiguous_columns().min(max_width).max(0);
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(self.x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, self.x, self.y) * pixel_size;
        let len = run_len as usize * pixel_size;
        let tile = self.store.tile_mut(tile_col, tile_row);
        &mut tile.bytes_mut()[offset..offset + len]
    }

    pub fn num_contiguous_columns(&self) -> i32 {
        TILE_SIZE - offset_in_tile(self.x)
    }

    pub fn num_contiguous_rows(&self) -> i32 {
        TILE_SIZE - offset_in_tile(self.y)
    }
}

/// Read-only horizontal line iterator over `[x, x + width)` at `y`;
/// `next_row` re-arms it one row down.
#[derive(Debug)]
pub struct HLineConstIter<'a> {
    store: &'a TileStore,
    left: i32,
    right: i32,
    x: i32,
    y: i32,
}

impl<'a> HLineConstIter<'a> {
    pub(crate) fn new(store: &'a TileStore, x: i32, y: i32, width: i32) -> Self {
        Self {
            store,
            left: x,
            right: x + width - 1,
            x,
            y,
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn raw_data(&self) -> &'a [u8] {
        run_slice(self.store, self.x, self.y, 1)
    }

    /// Advances one pixel; `false` once the row span is exhausted.
    pub fn next_pixel(&mut self) -> bool {
        self.x += 1;
        self.x <= self.right
    }

    pub fn next_row(&mut self) {
        self.x = self.left;
        self.y += 1;
    }

    pub fn num_contiguous_columns(&self) -> i32 {
        (TILE_SIZE - offset_in_tile(self.x)).min(self.right - self.x + 1)
    }

    /// The remaining run under the cursor, advancing past it. `None` once
    /// the row span is exhausted.
    pub fn next_run(&mut self) -> Option<(i32, &'a [u8])> {
        self.next_run_capped(i32::MAX)
    }

    /// Like `next_run`, with the run length additionally capped at
    /// `max_len`. Lets callers walk two iterators in lock-step runs.
    pub fn next_run_capped(&mut self, max_len: i32) -> Option<(i32, &'a [u8])> {
        if self.x > self.right || max_len <= 0 {
            return None;
        }
        let run_x = self.x;
        let run_len = self.num_contiguous_columns().min(max_len);
        self.x += run_len;
        Some((run_x, run_slice(self.store, run_x, self.y, run_len)))
    }
}

/// Writing horizontal line iterator; runs allocate tiles.
#[derive(Debug)]
pub struct HLineIter<'a> {
    store: &'a mut TileStore,
    left: i32,
    right: i32,
    x: i32,
    y: i32,
}

impl<'a> HLineIter<'a> {
    pub(crate) fn new(store: &'a mut TileStore, x: i32, y: i32, width: i32) -> Self {
        Self {
            store,
            left: x,
            right: x + width - 1,
            x,
            y,
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn raw_data_mut(&mut self) -> &mut [u8] {
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(self.x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, self.x, self.y) * pixel_size;
        let tile = self.store.tile_mut(tile_col, tile_row);
        &mut tile.bytes_mut()[offset..offset + pixel_size]
    }

    pub fn next_pixel(&mut self) -> bool {
        self.x += 1;
        self.x <= self.right
    }

    pub fn next_row(&mut self) {
        self.x = self.left;
        self.y += 1;
    }

    pub fn num_contiguous_columns(&self) -> i32 {
        (TILE_SIZE - offset_in_tile(self.x)).min(self.right - self.x + 1)
    }

    /// The remaining writable run under the cursor, advancing past it.
    pub fn next_run_mut(&mut self) -> Option<(i32, &mut [u8])> {
        self.next_run_capped_mut(i32::MAX)
    }

    /// Like `next_run_mut`, with the run length additionally capped at
    /// `max_len`.
    pub fn next_run_capped_mut(&mut self, max_len: i32) -> Option<(i32, &mut [u8])> {
        if self.x > self.right || max_len <= 0 {
            return None;
        }
        let run_x = self.x;
        let run_len = self.num_contiguous_columns().min(max_len);
        self.x += run_len;
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(run_x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, run_x, self.y) * pixel_size;
        let len = run_len as usize * pixel_size;
        let tile = self.store.tile_mut(tile_col, tile_row);
        Some((run_x, &mut tile.bytes_mut()[offset..offset + len]))
    }
}

/// Read-only vertical line iterator over `[y, y + height)` at `x`.
/// Vertical neighbours are not contiguous in tile memory, so this
/// iterator steps per pixel; `num_contiguous_rows` still reports how far
/// the current tile extends for callers batching by tile.
#[derive(Debug)]
pub struct VLineConstIter<'a> {
    store: &'a TileStore,
    top: i32,
    bottom: i32,
    x: i32,
    y: i32,
}

impl<'a> VLineConstIter<'a> {
    pub(crate) fn new(store: &'a TileStore, x: i32, y: i32, height: i32) -> Self {
        Self {
            store,
            top: y,
            bottom: y + height - 1,
            x,
            y,
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn raw_data(&self) -> &'a [u8] {
        run_slice(self.store, self.x, self.y, 1)
    }

    pub fn next_pixel(&mut self) -> bool {
        self.y += 1;
        self.y <= self.bottom
    }

    pub fn next_column(&mut self) {
        self.y = self.top;
        self.x += 1;
    }

    pub fn num_contiguous_rows(&self) -> i32 {
        (TILE_SIZE - offset_in_tile(self.y)).min(self.bottom - self.y + 1)
    }
}

/// Writing vertical line iterator; writes allocate tiles.
#[derive(Debug)]
pub struct VLineIter<'a> {
    store: &'a mut TileStore,
    top: i32,
    bottom: i32,
    x: i32,
    y: i32,
}

impl<'a> VLineIter<'a> {
    pub(crate) fn new(store: &'a mut TileStore, x: i32, y: i32, height: i32) -> Self {
        Self {
            store,
            top: y,
            bottom: y + height - 1,
            x,
            y,
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn raw_data_mut(&mut self) -> &mut [u8] {
        let pixel_size = self.store.pixel_size();
        let tile_col = tile_of(self.x);
        let tile_row = tile_of(self.y);
        let offset = tile_row_offset(tile_col, tile_row, self.x, self.y) * pixel_size;
        let tile = self.store.tile_mut(tile_col, tile_row);
        &mut tile.bytes_mut()[offset..offset + pixel_size]
    }

    pub fn next_pixel(&mut self) -> bool {
        self.y += 1;
        self.y <= self.bottom
    }

    pub fn next_column(&mut self) {
        self.y = self.top;
        self.x += 1;
    }

    pub fn num_contiguous_rows(&self) -> i32 {
        (TILE_SIZE - offset_in_tile(self.y)).min(self.bottom - self.y + 1)
    }
}

/// Read-only horizontal iterator whose coordinates repeat modulo a wrap
/// rect: stepping past the wrap rect's right edge continues from its
/// left edge. Runs additionally split at the wrap seam.
#[derive(Debug)]
pub struct WrapHLineConstIter<'a> {
    store: &'a TileStore,
    wrap_rect: Rect,
    left: i32,
    right: i32,
    x: i32,
    y: i32,
}

impl<'a> WrapHLineConstIter<'a> {
    pub(crate) fn new(store: &'a TileStore, x: i32, y: i32, width: i32, wrap_rect: Rect) -> Self {
        assert!(
            !wrap_rect.is_empty(),
            "wraparound iteration requires a non-empty wrap rect"
        );
        Self {
            store,
            wrap_rect,
            left: x,
            right: x + width - 1,
            x,
            y,
        }
    }

    fn wrapped(&self) -> (i32, i32) {
        (
            wrap_coordinate(self.x, self.wrap_rect.x, self.wrap_rect.width),
            wrap_coordinate(self.y, self.wrap_rect.y, self.wrap_rect.height),
        )
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn raw_data(&self) -> &'a [u8] {
        let (wx, wy) = self.wrapped();
        run_slice(self.store, wx, wy, 1)
    }

    pub fn next_pixel(&mut self) -> bool {
        self.x += 1;
        self.x <= self.right
    }

    pub fn next_row(&mut self) {
        self.x = self.left;
        self.y += 1;
    }

    pub fn num_contiguous_columns(&self) -> i32 {
        let (wx, _) = self.wrapped();
        (TILE_SIZE - offset_in_tile(wx))
            .min(self.wrap_rect.right() - wx + 1)
            .min(self.right - self.x + 1)
    }

    pub fn next_run(&mut self) -> Option<(i32, &'a [u8])> {
        if self.x > self.right {
            return None;
        }
        let run_x = self.x;
        let run_len = self.num_contiguous_columns();
        let (wx, wy) = self.wrapped();
        self.x += run_len;
        Some((run_x, run_slice(self.store, wx, wy, run_len)))
    }
}

fn run_slice<'a>(store: &'a TileStore, x: i32, y: i32, run_len: i32) -> &'a [u8] {
    let pixel_size = store.pixel_size();
    let tile_col = tile_of(x);
    let tile_row = tile_of(y);
    let offset = tile_row_offset(tile_col, tile_row, x, y) * pixel_size;
    let len = run_len as usize * pixel_size;
    match store.tile(tile_col, tile_row) {
        Some(tile) => &tile.bytes()[offset..offset + len],
        None => &store.default_tile()[offset..offset + len],
    }
}
