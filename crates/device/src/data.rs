//! One version of a device's pixels: a tile store plus the color space,
//! device-space origin offset, and level of detail it is addressed
//! under, together with the derived-value cache that must never be
//! served stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use colorspace::{Color, ColorSpace};
use model::{Point, Rect};
use tiles::TileStore;

/// Downscaled preview in display (RGBA8) layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: i32,
    pub height: i32,
    pub pixels: Vec<u8>,
}

impl Thumbnail {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    exact_bounds: Option<Rect>,
    non_default_area: Option<Rect>,
    thumbnails: HashMap<(i32, i32), Thumbnail>,
}

/// Memoized derived values of one `Data`. Every mutation of the owning
/// data must call `invalidate` before the next query.
#[derive(Debug, Default)]
pub(crate) struct Cache {
    state: Mutex<CacheState>,
}

impl Cache {
    pub(crate) fn invalidate(&self) {
        let mut state = self.state.lock().expect("data cache mutex poisoned");
        state.exact_bounds = None;
        state.non_default_area = None;
        state.thumbnails.clear();
    }

    pub(crate) fn exact_bounds(&self, compute: impl FnOnce() -> Rect) -> Rect {
        let mut state = self.state.lock().expect("data cache mutex poisoned");
        *state.exact_bounds.get_or_insert_with(compute)
    }

    pub(crate) fn non_default_area(&self, compute: impl FnOnce() -> Rect) -> Rect {
        let mut state = self.state.lock().expect("data cache mutex poisoned");
        *state.non_default_area.get_or_insert_with(compute)
    }

    pub(crate) fn thumbnail(
        &self,
        width: i32,
        height: i32,
        compute: impl FnOnce() -> Thumbnail,
    ) -> Thumbnail {
        let mut state = self.state.lock().expect("data cache mutex poisoned");
        state
            .thumbnails
            .entry((width, height))
            .or_insert_with(compute)
            .clone()
    }
}

/// One (offset, color space, level of detail, tile store) tuple. Tiles
/// are always stored relative to (0, 0); `offset` is a pure translation
/// applied to every device-space coordinate before addressing the store.
#[derive(Debug)]
pub(crate) struct Data {
    pub(crate) store: TileStore,
    pub(crate) color_space: Arc<dyn ColorSpace>,
    pub(crate) offset: Point,
    pub(crate) level_of_detail: i32,
    pub(crate) cache: Cache,
}

impl Data {
    /// Fresh data with a fully transparent default pixel.
    pub(crate) fn new(color_space: Arc<dyn ColorSpace>, level_of_detail: i32) -> Self {
        let mut default_pixel = vec![0u8; color_space.pixel_size()];
        color_space.from_color(Color::TRANSPARENT, &mut default_pixel);
        Self::with_default_pixel(color_space, &default_pixel, level_of_detail)
    }

    pub(crate) fn with_default_pixel(
        color_space: Arc<dyn ColorSpace>,
        default_pixel: &[u8],
        level_of_detail: i32,
    ) -> Self {
        let store = TileStore::new(color_space.pixel_size(), default_pixel);
        Self {
            store,
            color_space,
            offset: Point::default(),
            level_of_detail,
            cache: Cache::default(),
        }
    }

    /// Structural copy: same color space, default pixel, and offset, but
    /// an independent, empty tile store.
    pub(crate) fn similar(&self) -> Self {
        let mut data = Self::with_default_pixel(
            self.color_space.clone(),
            self.store.default_pixel(),
            self.level_of_detail,
        );
        data.offset = self.offset;
        data
    }

    /// Deep copy with an independent tile set and a fresh cache.
    pub(crate) fn deep_clone(&self) -> Self {
        Self {
            store: self.store.clone_store(),
            color_space: self.color_space.clone(),
            offset: self.offset,
            level_of_detail: self.level_of_detail,
            cache: Cache::default(),
        }
    }

    pub(crate) fn to_store_rect(&self, rect: Rect) -> Rect {
        rect.translated(-self.offset.x, -self.offset.y)
    }

    pub(crate) fn to_device_rect(&self, rect: Rect) -> Rect {
        rect.translated(self.offset.x, self.offset.y)
    }

    /// Allocated-tile extent in device space.
    pub(crate) fn extent(&self) -> Rect {
        let extent = self.store.extent();
        if extent.is_empty() {
            return Rect::EMPTY;
        }
        self.to_device_rect(extent)
    }
}
