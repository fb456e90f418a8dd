//! The paint device: the externally visible entity of the tiled raster
//! engine.
//!
//! A device owns one primary pixel data (plus lazily created LOD and
//! external-frame companions and any number of animation frames), speaks
//! device-space coordinates, snapshots its addressing strategy from the
//! default-bounds policy per batch operation, and keeps the per-data
//! caches honest across every mutation path.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, OnceLock, Weak};

use colorspace::{
    Color, ColorSpace, OPACITY_TRANSPARENT_U8, RenderingIntent, same_color_space,
};
use model::{Point, Rect, Region, tile_aligned, tiles_covering};
use tiles::{
    HLineConstIter, HLineIter, RandomAccessor, RandomConstAccessor, StreamError, TileStore,
    VLineConstIter, VLineIter, WrapHLineConstIter,
};

mod bounds;
mod data;
mod frames;
mod lod;
mod strategy;

pub use bounds::{DefaultBounds, FlatDefaultBounds, SceneDefaultBounds};
pub use data::Thumbnail;
pub use frames::FrameKey;

use data::Data;
use frames::{AnimatedFrames, FrameStorage};
use strategy::AccessStrategy;

/// Receiver of upward dirty notifications. A device holds its parent
/// weakly; propagation stops at the first node without one.
pub trait DirtyListener: fmt::Debug + Send + Sync {
    fn region_dirtied(&self, region: &Region);
}

/// The displaced half of a data install: the store and color space the
/// device held before. Feeding it back through [`PaintDevice::install_data`]
/// undoes the swap (and returns the redo record).
#[derive(Debug)]
pub struct ReplacedData {
    pub store: TileStore,
    pub color_space: Arc<dyn ColorSpace>,
}

#[derive(Debug)]
pub struct PaintDevice {
    storage: FrameStorage,
    lod: OnceLock<Data>,
    external: OnceLock<Data>,
    default_bounds: Arc<dyn DefaultBounds>,
    parent: Option<Weak<dyn DirtyListener>>,
}

impl PaintDevice {
    /// A device with a fully transparent default pixel and free-standing
    /// (infinite canvas) default bounds.
    pub fn new(color_space: Arc<dyn ColorSpace>) -> Self {
        Self::with_default_bounds(color_space, Arc::new(FlatDefaultBounds))
    }

    pub fn with_default_bounds(
        color_space: Arc<dyn ColorSpace>,
        default_bounds: Arc<dyn DefaultBounds>,
    ) -> Self {
        Self {
            storage: FrameStorage::Single(Data::new(color_space, 0)),
            lod: OnceLock::new(),
            external: OnceLock::new(),
            default_bounds,
            parent: None,
        }
    }

    // --- identity -----------------------------------------------------

    pub fn color_space(&self) -> &Arc<dyn ColorSpace> {
        &self.current_data().color_space
    }

    pub fn pixel_size(&self) -> usize {
        self.color_space().pixel_size()
    }

    pub fn channel_count(&self) -> usize {
        self.color_space().channel_count()
    }

    pub fn default_bounds(&self) -> &Arc<dyn DefaultBounds> {
        &self.default_bounds
    }

    pub fn set_default_bounds(&mut self, default_bounds: Arc<dyn DefaultBounds>) {
        self.default_bounds = default_bounds;
        self.current_data().cache.invalidate();
    }

    pub fn default_pixel(&self) -> Vec<u8> {
        self.current_data().store.default_pixel().to_vec()
    }

    pub fn set_default_pixel(&mut self, pixel: &[u8]) {
        let data = self.current_data_mut();
        data.store.set_default_pixel(pixel);
        data.cache.invalidate();
    }

    pub fn offset(&self) -> Point {
        self.current_data().offset
    }

    /// Moves the device origin; a pure translation of every subsequent
    /// coordinate, tiles stay where they are.
    pub fn move_to(&mut self, x: i32, y: i32) {
        let data = self.current_data_mut();
        data.offset = Point::new(x, y);
        data.cache.invalidate();
    }

    pub fn move_by(&mut self, dx: i32, dy: i32) {
        let offset = self.offset();
        self.move_to(offset.x + dx, offset.y + dy);
    }

    // --- dirty propagation --------------------------------------------

    pub fn set_parent(&mut self, parent: Weak<dyn DirtyListener>) {
        self.parent = Some(parent);
    }

    pub fn clear_parent(&mut self) {
        self.parent = None;
    }

    pub fn set_dirty(&self) {
        self.dirty_rects(&[self.extent()]);
    }

    pub fn set_dirty_rect(&self, rect: Rect) {
        self.dirty_rects(&[rect]);
    }

    pub fn set_dirty_rects(&self, rects: &[Rect]) {
        self.dirty_rects(rects);
    }

    pub fn set_dirty_region(&self, region: &Region) {
        self.dirty_rects(region.rects());
    }

    fn dirty_rects(&self, rects: &[Rect]) {
        self.current_data().cache.invalidate();
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            let region = Region::from_rects(rects.iter().copied());
            parent.region_dirtied(&region);
        }
    }

    // --- region queries -----------------------------------------------

    /// Allocated-tile bounding rect. Under wraparound addressing the
    /// whole wrap rect is the extent.
    pub fn extent(&self) -> Rect {
        match self.strategy() {
            AccessStrategy::Plain => self.current_data().extent(),
            AccessStrategy::WrapAround(wrap_rect) => wrap_rect,
        }
    }

    /// Allocated-tile footprint as a rect set; clipped to the wrap rect
    /// under wraparound addressing.
    pub fn region(&self) -> Region {
        let strategy = self.strategy();
        let data = self.current_data();
        let rects = data.store.region().into_iter().map(|rect| data.to_device_rect(rect));
        match strategy {
            AccessStrategy::Plain => rects.collect(),
            AccessStrategy::WrapAround(wrap_rect) => {
                rects.map(|rect| rect.intersected(wrap_rect)).collect()
            }
        }
    }

    /// Tight bounding rect of non-default pixels; memoized until the
    /// next mutation.
    pub fn exact_bounds(&self) -> Rect {
        let data = self.current_data();
        let device_bounds = self.default_bounds.bounds();
        data.cache
            .exact_bounds(|| compute_exact_bounds(data, device_bounds, None))
    }

    /// Cheap superset of `exact_bounds`: the allocated extent (clipped to
    /// the device bounds when the default pixel is not transparent).
    pub fn non_default_pixel_area(&self) -> Rect {
        let data = self.current_data();
        let device_bounds = self.default_bounds.bounds();
        data.cache.non_default_area(|| {
            let extent = data.extent();
            let transparent_default = data
                .color_space
                .opacity_u8(data.store.default_pixel())
                == OPACITY_TRANSPARENT_U8;
            if transparent_default {
                extent
            } else {
                extent.intersected(device_bounds)
            }
        })
    }

    /// Uncached exact-bounds refinement. `known_inner` is a rect already
    /// known to hold content; when the coarse starting rect cannot be
    /// refined past it, it is returned unchanged.
    pub fn calculate_exact_bounds(&self, known_inner: Option<Rect>) -> Rect {
        compute_exact_bounds(
            self.current_data(),
            self.default_bounds.bounds(),
            known_inner,
        )
    }

    // --- pixel I/O ----------------------------------------------------

    /// Reads `rect` into a fresh buffer; degrades to an empty buffer if
    /// the allocation fails.
    pub fn read_bytes(&self, rect: Rect) -> Vec<u8> {
        let len = rect_byte_len(rect, self.pixel_size());
        let mut out = Vec::new();
        if out.try_reserve_exact(len).is_err() {
            log::warn!("device read of {len} bytes failed to allocate, returning empty buffer");
            return Vec::new();
        }
        out.resize(len, 0);
        self.read_bytes_into(rect, &mut out);
        out
    }

    pub fn read_bytes_into(&self, rect: Rect, out: &mut [u8]) {
        let pixel_size = self.pixel_size();
        assert_eq!(
            out.len(),
            rect_byte_len(rect, pixel_size),
            "read buffer length must match the requested rect"
        );
        let strategy = self.strategy();
        let data = self.current_data();
        for piece in strategy.split(rect) {
            let storage_rect = piece.logical.translated(piece.dx, piece.dy);
            if piece.logical == rect {
                data.store.read_bytes_into(data.to_store_rect(storage_rect), out);
                return;
            }
            let bytes = data.store.read_bytes(data.to_store_rect(storage_rect));
            if bytes.len() != rect_byte_len(piece.logical, pixel_size) {
                log::warn!("wrapped read piece skipped after degraded allocation");
                continue;
            }
            paste_rows(out, rect, piece.logical, &bytes, pixel_size);
        }
    }

    pub fn write_bytes(&mut self, rect: Rect, bytes: &[u8]) {
        let pixel_size = self.pixel_size();
        assert_eq!(
            bytes.len(),
            rect_byte_len(rect, pixel_size),
            "write buffer length must match the target rect"
        );
        let strategy = self.strategy();
        let data = self.current_data_mut();
        for piece in strategy.split(rect) {
            let storage_rect = piece.logical.translated(piece.dx, piece.dy);
            if piece.logical == rect {
                data.store.write_bytes(data.to_store_rect(storage_rect), bytes);
                break;
            }
            let sub = extract_rows(bytes, rect, piece.logical, pixel_size);
            data.store.write_bytes(data.to_store_rect(storage_rect), &sub);
        }
        data.cache.invalidate();
    }

    pub fn read_planar_bytes(&self, rect: Rect) -> Vec<Vec<u8>> {
        let channel_sizes = self.channel_sizes();
        let interleaved = self.read_bytes(rect);
        let pixel_size = self.pixel_size();
        let pixel_count = interleaved.len() / pixel_size;
        let mut planes: Vec<Vec<u8>> = channel_sizes
            .iter()
            .map(|&size| Vec::with_capacity(size * pixel_count))
            .collect();
        for pixel in interleaved.chunks_exact(pixel_size) {
            let mut channel_offset = 0;
            for (plane, &size) in planes.iter_mut().zip(&channel_sizes) {
                plane.extend_from_slice(&pixel[channel_offset..channel_offset + size]);
                channel_offset += size;
            }
        }
        planes
    }

    pub fn write_planar_bytes(&mut self, rect: Rect, planes: &[&[u8]]) {
        let channel_sizes = self.channel_sizes();
        assert_eq!(
            planes.len(),
            channel_sizes.len(),
            "one plane per channel required"
        );
        if rect.is_empty() {
            return;
        }
        let pixel_size = self.pixel_size();
        let pixel_count = rect.width as usize * rect.height as usize;
        let mut interleaved = vec![0u8; pixel_count * pixel_size];
        for (index, pixel) in interleaved.chunks_exact_mut(pixel_size).enumerate() {
            let mut channel_offset = 0;
            for (plane, &size) in planes.iter().zip(&channel_sizes) {
                pixel[channel_offset..channel_offset + size]
                    .copy_from_slice(&plane[index * size..(index + 1) * size]);
                channel_offset += size;
            }
        }
        self.write_bytes(rect, &interleaved);
    }

    pub fn pixel(&self, x: i32, y: i32) -> Color {
        let bytes = self.read_bytes(Rect::new(x, y, 1, 1));
        self.color_space().to_color(&bytes)
    }

    pub fn pixel_bytes(&self, x: i32, y: i32) -> Vec<u8> {
        self.read_bytes(Rect::new(x, y, 1, 1))
    }

    pub fn set_pixel(&mut self, x: i32, y: i32, color: Color) {
        let mut bytes = vec![0u8; self.pixel_size()];
        self.color_space().from_color(color, &mut bytes);
        self.write_bytes(Rect::new(x, y, 1, 1), &bytes);
    }

    pub fn set_pixel_bytes(&mut self, x: i32, y: i32, pixel: &[u8]) {
        self.write_bytes(Rect::new(x, y, 1, 1), pixel);
    }

    pub fn fill(&mut self, rect: Rect, pixel: &[u8]) {
        let strategy = self.strategy();
        let data = self.current_data_mut();
        for piece in strategy.split(rect) {
            let storage_rect = piece.logical.translated(piece.dx, piece.dy);
            data.store.fill(data.to_store_rect(storage_rect), pixel);
        }
        data.cache.invalidate();
    }

    pub fn fill_color(&mut self, rect: Rect, color: Color) {
        let mut pixel = vec![0u8; self.pixel_size()];
        self.color_space().from_color(color, &mut pixel);
        self.fill(rect, &pixel);
    }

    pub fn clear(&mut self) {
        let data = self.current_data_mut();
        data.store.clear();
        data.cache.invalidate();
    }

    pub fn clear_rect(&mut self, rect: Rect) {
        let strategy = self.strategy();
        let data = self.current_data_mut();
        for piece in strategy.split(rect) {
            let storage_rect = piece.logical.translated(piece.dx, piece.dy);
            data.store.clear_rect(data.to_store_rect(storage_rect));
        }
        data.cache.invalidate();
    }

    /// Compacts the store: deallocates tiles inside `rect` whose content
    /// equals the default pixel. Logical content is unchanged.
    pub fn purge(&mut self, rect: Rect) {
        let strategy = self.strategy();
        let data = self.current_data_mut();
        for piece in strategy.split(rect) {
            let storage_rect = piece.logical.translated(piece.dx, piece.dy);
            data.store.purge(data.to_store_rect(storage_rect));
        }
        data.cache.invalidate();
    }

    // --- iterators ----------------------------------------------------
    //
    // Iterator coordinates are translated into storage space at creation
    // time; the returned iterator reports storage coordinates.

    pub fn create_hline_const_iter(&self, x: i32, y: i32, width: i32) -> HLineConstIter<'_> {
        let data = self.current_data();
        data.store
            .create_hline_const_iter(x - data.offset.x, y - data.offset.y, width)
    }

    pub fn create_hline_iter(&mut self, x: i32, y: i32, width: i32) -> HLineIter<'_> {
        let offset = self.current_data().offset;
        let data = self.current_data_mut();
        data.store
            .create_hline_iter(x - offset.x, y - offset.y, width)
    }

    pub fn create_vline_const_iter(&self, x: i32, y: i32, height: i32) -> VLineConstIter<'_> {
        let data = self.current_data();
        data.store
            .create_vline_const_iter(x - data.offset.x, y - data.offset.y, height)
    }

    pub fn create_vline_iter(&mut self, x: i32, y: i32, height: i32) -> VLineIter<'_> {
        let offset = self.current_data().offset;
        let data = self.current_data_mut();
        data.store
            .create_vline_iter(x - offset.x, y - offset.y, height)
    }

    pub fn create_random_const_accessor(&self) -> RandomConstAccessor<'_> {
        self.current_data().store.create_random_const_accessor()
    }

    pub fn create_random_accessor(&mut self) -> RandomAccessor<'_> {
        self.current_data_mut().store.create_random_accessor()
    }

    /// Wraparound read iterator over the current default-bounds rect.
    pub fn create_wrap_hline_const_iter(
        &self,
        x: i32,
        y: i32,
        width: i32,
    ) -> WrapHLineConstIter<'_> {
        let wrap_rect = self.default_bounds.bounds();
        let data = self.current_data();
        data.store.create_wrap_hline_const_iter(
            x - data.offset.x,
            y - data.offset.y,
            width,
            data.to_store_rect(wrap_rect),
        )
    }

    // --- cloning and bit-block transfer -------------------------------

    /// Aligns this device with `src` (color space, default pixel,
    /// offset, default bounds) without copying any pixels. Existing
    /// content and frame machinery are discarded.
    pub fn prepare_clone(&mut self, src: &PaintDevice) {
        let src_data = src.current_data();
        self.storage = FrameStorage::Single(src_data.similar());
        self.lod = OnceLock::new();
        self.external = OnceLock::new();
        self.default_bounds = src.default_bounds.clone();
    }

    /// Prepare plus copy of the pixels inside `rect`.
    pub fn make_clone_from(&mut self, src: &PaintDevice, rect: Rect) {
        self.prepare_clone(src);
        let copy_rect = rect.intersected(src.extent());
        if copy_rect.is_empty() {
            return;
        }
        let bytes = src.read_bytes(copy_rect);
        if bytes.is_empty() {
            log::warn!("clone copy skipped: pixel buffer allocation failed");
            return;
        }
        self.write_bytes(copy_rect, &bytes);
    }

    /// Prepare plus tile-level copy of the tiles covering `rect`;
    /// tile-aligned over-copy is accepted for speed.
    pub fn make_clone_from_rough(&mut self, src: &PaintDevice, rect: Rect) {
        self.prepare_clone(src);
        let copy_rect = tile_aligned(rect.intersected(src.extent()));
        if copy_rect.is_empty() {
            return;
        }
        let src_data = src.current_data();
        let data = self.current_data_mut();
        data.store
            .copy_tiles_from(&src_data.store, src_data.to_store_rect(copy_rect));
        data.cache.invalidate();
    }

    /// Whether direct tile-level copying from `src` is legal: the
    /// devices must agree on color space (by value) and origin offset.
    pub fn fast_bit_blt_possible(&self, src: &PaintDevice) -> bool {
        let src_data = src.current_data();
        let data = self.current_data();
        same_color_space(data.color_space.as_ref(), src_data.color_space.as_ref())
            && data.offset == src_data.offset
    }

    /// Direct tile-level copy of exactly `rect`. Whole tiles inside the
    /// rect are copied at tile granularity, the remaining border strips
    /// per row. Requires `fast_bit_blt_possible(src)`.
    pub fn fast_bit_blt(&mut self, src: &PaintDevice, rect: Rect) {
        assert!(
            self.fast_bit_blt_possible(src),
            "fast bit-block transfer requires matching color space and offset"
        );
        if rect.is_empty() {
            return;
        }
        let src_data = src.current_data();
        let store_rect = src_data.to_store_rect(rect);
        let interior = tile_interior(store_rect);

        let data = self.current_data_mut();
        if !interior.is_empty() {
            data.store.copy_tiles_from(&src_data.store, interior);
        }
        for strip in border_strips(store_rect, interior) {
            let bytes = src_data.store.read_bytes(strip);
            data.store.write_bytes(strip, &bytes);
        }
        data.cache.invalidate();
    }

    /// Tile-level copy of every tile touching `rect`; copies whole tiles
    /// even where `rect` covers them only partially.
    pub fn fast_bit_blt_rough(&mut self, src: &PaintDevice, rect: Rect) {
        assert!(
            self.fast_bit_blt_possible(src),
            "fast bit-block transfer requires matching color space and offset"
        );
        if rect.is_empty() {
            return;
        }
        let src_data = src.current_data();
        let store_rect = tile_aligned(src_data.to_store_rect(rect));
        let data = self.current_data_mut();
        data.store.copy_tiles_from(&src_data.store, store_rect);
        data.cache.invalidate();
    }

    // --- color-space conversion ---------------------------------------

    /// Converts the device into `dst_space`, swapping in a freshly built
    /// store in one step. Conversion walks the exact-bounds region in
    /// row-major maximal contiguous runs bounded by both stores; an
    /// empty device converts only its default pixel. The displaced store
    /// and color space come back as an undo record.
    pub fn convert_to(
        &mut self,
        dst_space: Arc<dyn ColorSpace>,
        intent: RenderingIntent,
    ) -> ReplacedData {
        let time = self.default_bounds.current_time();
        let device_bounds = self.default_bounds.bounds();
        let bounds = {
            let primary = self.storage.primary(time);
            primary
                .cache
                .exact_bounds(|| compute_exact_bounds(primary, device_bounds, None))
        };

        let primary = self.storage.primary(time);
        let src_space = primary.color_space.clone();
        let mut dst_default = vec![0u8; dst_space.pixel_size()];
        src_space.convert_pixels_to(
            primary.store.default_pixel(),
            &mut dst_default,
            dst_space.as_ref(),
            1,
            intent,
        );
        let mut dst_store = TileStore::new(dst_space.pixel_size(), &dst_default);

        if !bounds.is_empty() {
            let store_rect = primary.to_store_rect(bounds);
            let mut src_accessor = primary.store.create_random_const_accessor();
            let mut dst_accessor = dst_store.create_random_accessor();
            for y in store_rect.top()..=store_rect.bottom() {
                let mut x = store_rect.left();
                while x <= store_rect.right() {
                    src_accessor.move_to(x, y);
                    dst_accessor.move_to(x, y);
                    let run = src_accessor
                        .num_contiguous_columns()
                        .min(dst_accessor.num_contiguous_columns())
                        .min(store_rect.right() - x + 1);
                    let src_run = src_accessor.raw_run(run);
                    let dst_run = dst_accessor.raw_run_mut(run);
                    src_space.convert_pixels_to(
                        src_run,
                        dst_run,
                        dst_space.as_ref(),
                        run as usize,
                        intent,
                    );
                    x += run;
                }
            }
        }

        let replaced = self.install_data(dst_store, dst_space);
        self.set_dirty();
        replaced
    }

    /// Atomically swaps in a store and color space, returning the
    /// displaced pair. The LOD and external snapshots reflect the old
    /// data and are dropped for lazy re-creation.
    pub fn install_data(
        &mut self,
        store: TileStore,
        color_space: Arc<dyn ColorSpace>,
    ) -> ReplacedData {
        assert_eq!(
            store.pixel_size(),
            color_space.pixel_size(),
            "installed store and color space must agree on pixel size"
        );
        let time = self.default_bounds.current_time();
        let data = self.storage.primary_mut(time);
        let old_store = std::mem::replace(&mut data.store, store);
        let old_space = std::mem::replace(&mut data.color_space, color_space);
        data.cache.invalidate();
        self.lod = OnceLock::new();
        self.external = OnceLock::new();
        ReplacedData {
            store: old_store,
            color_space: old_space,
        }
    }

    // --- thumbnails ---------------------------------------------------

    /// Nearest-neighbour thumbnail device over the exact-bounds content,
    /// aspect-preserving and never upscaling.
    pub fn create_thumbnail_device(&self, width: i32, height: i32) -> PaintDevice {
        self.create_thumbnail_device_for_rect(width, height, self.exact_bounds())
    }

    pub fn create_thumbnail_device_for_rect(
        &self,
        width: i32,
        height: i32,
        src_rect: Rect,
    ) -> PaintDevice {
        let data = self.current_data();
        let mut thumbnail = PaintDevice::new(data.color_space.clone());
        thumbnail.set_default_pixel(data.store.default_pixel());
        if src_rect.is_empty() || width <= 0 || height <= 0 {
            return thumbnail;
        }

        let (target_width, target_height) =
            thumbnail_size((src_rect.width, src_rect.height), (width, height));
        let pixel_size = data.color_space.pixel_size();
        let len = target_width as usize * target_height as usize * pixel_size;
        let mut pixels = Vec::new();
        if pixels.try_reserve_exact(len).is_err() {
            log::warn!(
                "thumbnail buffer of {len} bytes failed to allocate, returning empty device"
            );
            return thumbnail;
        }

        let mut accessor = data.store.create_random_const_accessor();
        for target_y in 0..target_height {
            let source_y = src_rect.y
                + (target_y as i64 * src_rect.height as i64 / target_height as i64) as i32;
            for target_x in 0..target_width {
                let source_x = src_rect.x
                    + (target_x as i64 * src_rect.width as i64 / target_width as i64) as i32;
                accessor.move_to(source_x - data.offset.x, source_y - data.offset.y);
                pixels.extend_from_slice(accessor.raw_data());
            }
        }
        thumbnail.write_bytes(Rect::new(0, 0, target_width, target_height), &pixels);
        thumbnail
    }

    /// Display-space (RGBA8) thumbnail of the whole device, memoized in
    /// the cache per requested size.
    pub fn create_thumbnail(&self, width: i32, height: i32) -> Thumbnail {
        let bounds = self.exact_bounds();
        let data = self.current_data();
        data.cache
            .thumbnail(width, height, || self.render_thumbnail(width, height, bounds))
    }

    /// Thumbnail of a custom source sub-rect; bypasses the cache.
    pub fn create_thumbnail_for_rect(&self, width: i32, height: i32, rect: Rect) -> Thumbnail {
        self.render_thumbnail(width, height, rect)
    }

    fn render_thumbnail(&self, width: i32, height: i32, src_rect: Rect) -> Thumbnail {
        if src_rect.is_empty() || width <= 0 || height <= 0 {
            return Thumbnail::empty();
        }
        let device = self.create_thumbnail_device_for_rect(width, height, src_rect);
        let (target_width, target_height) =
            thumbnail_size((src_rect.width, src_rect.height), (width, height));
        let source = device.read_bytes(Rect::new(0, 0, target_width, target_height));
        if source.is_empty() {
            return Thumbnail::empty();
        }
        let display = colorspace::rgba8();
        let pixel_count = target_width as usize * target_height as usize;
        let mut pixels = Vec::new();
        if pixels.try_reserve_exact(pixel_count * display.pixel_size()).is_err() {
            log::warn!("thumbnail conversion buffer failed to allocate, returning empty image");
            return Thumbnail::empty();
        }
        pixels.resize(pixel_count * display.pixel_size(), 0);
        device.color_space().convert_pixels_to(
            &source,
            &mut pixels,
            display.as_ref(),
            pixel_count,
            RenderingIntent::default(),
        );
        Thumbnail {
            width: target_width,
            height: target_height,
            pixels,
        }
    }

    // --- level of detail ----------------------------------------------

    /// Regenerates the LOD companion for `level` from the primary data.
    /// Returns the touched LOD-space region; an empty source extent is a
    /// no-op returning an empty region.
    pub fn sync_lod_cache(&mut self, level: i32) -> Region {
        assert!(
            (1..=lod::MAX_LOD_LEVEL).contains(&level),
            "level of detail must be between 1 and {}",
            lod::MAX_LOD_LEVEL
        );
        let time = self.default_bounds.current_time();
        let rebuild = match self.lod.get() {
            Some(lod_data) => {
                lod_data.level_of_detail != level
                    || !same_color_space(
                        lod_data.color_space.as_ref(),
                        self.storage.primary(time).color_space.as_ref(),
                    )
            }
            None => true,
        };
        if rebuild {
            let data = self.create_lod_data(level);
            self.lod = OnceLock::new();
            let _ = self.lod.set(data);
        }
        let source = self.storage.primary(time);
        let lod_data = self.lod.get_mut().expect("lod data exists after rebuild");
        let dirty = lod::sync_lod_data(source, lod_data, level);
        Region::from_rects([dirty])
    }

    fn create_lod_data(&self, level: i32) -> Data {
        let time = self.default_bounds.current_time();
        let primary = self.storage.primary(time);
        let scale = 1i32 << level;
        let mut data = Data::with_default_pixel(
            primary.color_space.clone(),
            primary.store.default_pixel(),
            level,
        );
        data.offset = Point::new(
            primary.offset.x.div_euclid(scale),
            primary.offset.y.div_euclid(scale),
        );
        data
    }

    // --- selection clearing -------------------------------------------

    /// Reduces this device's opacity by the selection's opacity inside
    /// the selection's bounds (clipped to the device bounds). Pixels
    /// that end up fully transparent snap back to the exact default
    /// pixel bytes when the default itself is transparent, keeping the
    /// non-default footprint minimal for a later purge.
    pub fn clear_selection(&mut self, selection: &PaintDevice) {
        let rect = selection
            .exact_bounds()
            .intersected(self.default_bounds.bounds());
        if rect.is_empty() {
            return;
        }

        let color_space = self.color_space().clone();
        let selection_space = selection.color_space().clone();
        let default_pixel = self.default_pixel();
        let snap_to_default =
            color_space.opacity_u8(&default_pixel) == OPACITY_TRANSPARENT_U8;
        let pixel_size = color_space.pixel_size();
        let selection_pixel_size = selection_space.pixel_size();

        let selection_data = selection.current_data();
        let data = self.current_data_mut();
        let mut mask = Vec::new();
        for y in rect.top()..=rect.bottom() {
            let mut device_iter = data.store.create_hline_iter(
                rect.x - data.offset.x,
                y - data.offset.y,
                rect.width,
            );
            let mut selection_iter = selection_data.store.create_hline_const_iter(
                rect.x - selection_data.offset.x,
                y - selection_data.offset.y,
                rect.width,
            );
            loop {
                let device_columns = device_iter.num_contiguous_columns();
                if device_columns <= 0 {
                    break;
                }
                let run = device_columns.min(selection_iter.num_contiguous_columns());
                let (_, selection_run) = selection_iter
                    .next_run_capped(run)
                    .expect("selection iterator exhausted before the device iterator");
                let (_, device_run) = device_iter
                    .next_run_capped_mut(run)
                    .expect("device iterator has columns remaining");

                mask.clear();
                mask.extend(
                    selection_run
                        .chunks_exact(selection_pixel_size)
                        .map(|pixel| selection_space.opacity_u8(pixel)),
                );
                color_space.apply_inverse_alpha_mask(device_run, &mask, run as usize);
                if snap_to_default {
                    for pixel in device_run.chunks_exact_mut(pixel_size) {
                        if color_space.opacity_u8(pixel) == OPACITY_TRANSPARENT_U8 {
                            pixel.copy_from_slice(&default_pixel);
                        }
                    }
                }
            }
        }
        data.cache.invalidate();
        self.set_dirty_rect(rect);
    }

    // --- frames -------------------------------------------------------

    /// Creates an animation frame. The first call converts the primary
    /// data into frame storage in place (no copy) and binds it at time 0.
    /// Later calls create a new data: a deep copy of `source` when `copy`
    /// is set, otherwise a structural copy of the primary with an empty
    /// store. A non-null `offset` translates the new data's origin.
    pub fn create_frame(
        &mut self,
        copy: bool,
        source: Option<FrameKey>,
        offset: Option<Point>,
    ) -> FrameKey {
        let time = self.default_bounds.current_time();
        if matches!(self.storage, FrameStorage::Single(_)) {
            let placeholder = FrameStorage::Animated(AnimatedFrames::empty());
            let FrameStorage::Single(data) = std::mem::replace(&mut self.storage, placeholder)
            else {
                unreachable!("storage was single-frame");
            };
            let (animated, key) = AnimatedFrames::from_primary(data);
            self.storage = FrameStorage::Animated(animated);
            return key;
        }

        let FrameStorage::Animated(animated) = &mut self.storage else {
            unreachable!("storage is animated past the first frame");
        };
        let mut data = if copy {
            let source_key = source.expect("copying a frame requires a source frame id");
            animated
                .get(source_key)
                .unwrap_or_else(|| panic!("create_frame: unknown source frame"))
                .deep_clone()
        } else {
            animated.frame_at(time).similar()
        };
        if let Some(offset) = offset {
            data.offset = offset;
        }
        animated.insert(data)
    }

    /// Deletes a frame; when exactly one frame remains afterwards the
    /// frame machinery collapses and that data becomes the primary
    /// again. Deleting the sole frame of a device is a contract
    /// violation.
    pub fn delete_frame(&mut self, key: FrameKey) {
        let FrameStorage::Animated(animated) = &mut self.storage else {
            panic!("delete_frame on a device without frame storage");
        };
        assert!(animated.contains(key), "delete_frame: unknown frame");
        assert!(
            animated.len() > 1,
            "cannot delete the last remaining frame"
        );
        if let Some(last) = animated.remove(key) {
            self.storage = FrameStorage::Single(last);
        }
        // The LOD snapshot may have been built from the removed frame.
        self.lod = OnceLock::new();
    }

    pub fn frame_ids(&self) -> Vec<FrameKey> {
        match &self.storage {
            FrameStorage::Single(_) => Vec::new(),
            FrameStorage::Animated(animated) => animated.keys(),
        }
    }

    pub fn frame_bounds(&self, key: FrameKey) -> Rect {
        let FrameStorage::Animated(animated) = &self.storage else {
            panic!("frame_bounds on a device without frame storage");
        };
        animated
            .frame_bounds(key)
            .unwrap_or_else(|| panic!("frame_bounds: unknown frame"))
    }

    pub fn frame_offset(&self, key: FrameKey) -> Point {
        let FrameStorage::Animated(animated) = &self.storage else {
            panic!("frame_offset on a device without frame storage");
        };
        animated
            .frame_offset(key)
            .unwrap_or_else(|| panic!("frame_offset: unknown frame"))
    }

    /// Binds a frame at a keyframe time; the channel resolves a time to
    /// the most recent keyframe at or before it.
    pub fn set_keyframe(&mut self, time: i32, key: FrameKey) {
        let FrameStorage::Animated(animated) = &mut self.storage else {
            panic!("set_keyframe on a device without frame storage");
        };
        animated.set_keyframe(time, key);
    }

    pub fn remove_keyframe(&mut self, time: i32) -> Option<FrameKey> {
        let FrameStorage::Animated(animated) = &mut self.storage else {
            panic!("remove_keyframe on a device without frame storage");
        };
        animated.remove_keyframe(time)
    }

    pub fn keyframe_count(&self) -> usize {
        match &self.storage {
            FrameStorage::Single(_) => 0,
            FrameStorage::Animated(animated) => animated.keyframe_count(),
        }
    }

    /// Copies the named frame's full pixel content into `target` via
    /// clone-then-bit-block-transfer.
    pub fn fetch_frame(&self, key: FrameKey, target: &mut PaintDevice) {
        let FrameStorage::Animated(animated) = &self.storage else {
            panic!("fetch_frame on a device without frame storage");
        };
        let frame = animated
            .get(key)
            .unwrap_or_else(|| panic!("fetch_frame: unknown frame"));
        target.storage = FrameStorage::Single(frame.similar());
        target.lod = OnceLock::new();
        target.external = OnceLock::new();
        target.default_bounds = self.default_bounds.clone();
        let FrameStorage::Single(target_data) = &mut target.storage else {
            unreachable!("target storage was just set to single-frame");
        };
        target_data
            .store
            .copy_tiles_from(&frame.store, frame.store.extent());
        target_data.cache.invalidate();
    }

    // --- serialization ------------------------------------------------

    pub fn write_to(&self, writer: &mut impl Write) -> Result<(), StreamError> {
        self.current_data().store.write_to(writer)
    }

    /// Replaces the current data's pixel content from a stream. On
    /// failure the device's caches must be considered invalid and the
    /// content discarded by the caller.
    pub fn read_from(&mut self, reader: &mut impl Read) -> Result<(), StreamError> {
        let store = TileStore::read_from(reader)?;
        if store.pixel_size() != self.pixel_size() {
            return Err(StreamError::InvalidPixelSize(store.pixel_size() as u32));
        }
        let data = self.current_data_mut();
        data.store = store;
        data.cache.invalidate();
        Ok(())
    }

    // --- current-data resolution --------------------------------------
    //
    // Evaluated fresh on every access: LOD beats animation beats the
    // external frame beats the primary. Lazy creation of the LOD and
    // external companions is once-only; content regeneration is the
    // caller's move (`sync_lod_cache`).

    fn current_data(&self) -> &Data {
        let level = self.default_bounds.current_level_of_detail();
        if level > 0 {
            return self.lod.get_or_init(|| self.create_lod_data(level));
        }
        let time = self.default_bounds.current_time();
        if self.storage.is_animated() {
            return self.storage.primary(time);
        }
        if self.default_bounds.external_frame_active() {
            return self
                .external
                .get_or_init(|| self.storage.primary(time).similar());
        }
        self.storage.primary(time)
    }

    fn current_data_mut(&mut self) -> &mut Data {
        let level = self.default_bounds.current_level_of_detail();
        let time = self.default_bounds.current_time();
        if level > 0 {
            if self.lod.get().is_none() {
                let data = self.create_lod_data(level);
                let _ = self.lod.set(data);
            }
            return self.lod.get_mut().expect("lod data just created");
        }
        if self.storage.is_animated() {
            return self.storage.primary_mut(time);
        }
        if self.default_bounds.external_frame_active() {
            if self.external.get().is_none() {
                let data = self.storage.primary(time).similar();
                let _ = self.external.set(data);
            }
            return self.external.get_mut().expect("external data just created");
        }
        self.storage.primary_mut(time)
    }

    fn strategy(&self) -> AccessStrategy {
        AccessStrategy::snapshot(self.default_bounds.as_ref())
    }

    fn channel_sizes(&self) -> Vec<usize> {
        let pixel_size = self.pixel_size();
        let channel_count = self.channel_count();
        assert_eq!(
            pixel_size % channel_count,
            0,
            "pixel size must be divisible by the channel count"
        );
        vec![pixel_size / channel_count; channel_count]
    }
}

/// Predicate-driven exact-bounds refinement: four independent edge scans
/// over the coarse extent, each stopping at the first non-empty pixel.
/// "Empty" is full transparency when the default pixel is transparent,
/// byte equality with the default pixel otherwise (with the scan then
/// clipped to the known device bounds).
fn compute_exact_bounds(data: &Data, device_bounds: Rect, known_inner: Option<Rect>) -> Rect {
    let color_space = data.color_space.as_ref();
    let default_pixel = data.store.default_pixel().to_vec();
    let pixel_size = default_pixel.len();
    let transparent_default =
        color_space.opacity_u8(&default_pixel) == OPACITY_TRANSPARENT_U8;

    let mut start = data.extent();
    if !transparent_default {
        start = start.intersected(device_bounds);
    }
    if start.is_empty() {
        return Rect::EMPTY;
    }
    if known_inner == Some(start) {
        return start;
    }

    let is_empty_pixel = |pixel: &[u8]| -> bool {
        if transparent_default {
            color_space.opacity_u8(pixel) == OPACITY_TRANSPARENT_U8
        } else {
            pixel == &default_pixel[..]
        }
    };
    let offset = data.offset;

    let mut top_found = None;
    'top: for y in start.top()..=start.bottom() {
        let mut iter =
            data.store
                .create_hline_const_iter(start.x - offset.x, y - offset.y, start.width);
        while let Some((_, run)) = iter.next_run() {
            if run.chunks_exact(pixel_size).any(|pixel| !is_empty_pixel(pixel)) {
                top_found = Some(y);
                break 'top;
            }
        }
    }
    let Some(top) = top_found else {
        // Cheap negative case: nothing found on the first scan.
        return known_inner.unwrap_or(Rect::EMPTY);
    };

    let mut bottom = top;
    'bottom: for y in (top..=start.bottom()).rev() {
        let mut iter =
            data.store
                .create_hline_const_iter(start.x - offset.x, y - offset.y, start.width);
        while let Some((_, run)) = iter.next_run() {
            if run.chunks_exact(pixel_size).any(|pixel| !is_empty_pixel(pixel)) {
                bottom = y;
                break 'bottom;
            }
        }
    }

    let column_height = bottom - top + 1;
    let mut left = start.left();
    'left: for x in start.left()..=start.right() {
        let mut iter =
            data.store
                .create_vline_const_iter(x - offset.x, top - offset.y, column_height);
        loop {
            if !is_empty_pixel(iter.raw_data()) {
                left = x;
                break 'left;
            }
            if !iter.next_pixel() {
                break;
            }
        }
    }

    let mut right = start.right();
    'right: for x in (left..=start.right()).rev() {
        let mut iter =
            data.store
                .create_vline_const_iter(x - offset.x, top - offset.y, column_height);
        loop {
            if !is_empty_pixel(iter.raw_data()) {
                right = x;
                break 'right;
            }
            if !iter.next_pixel() {
                break;
            }
        }
    }

    Rect::from_edges(left, top, right, bottom)
}

/// Aspect-preserving thumbnail target size; never upscales.
fn thumbnail_size(source: (i32, i32), requested: (i32, i32)) -> (i32, i32) {
    let (source_width, source_height) = source;
    let (requested_width, requested_height) = requested;
    if requested_width >= source_width && requested_height >= source_height {
        return (source_width, source_height);
    }
    if requested_width as i64 * source_height as i64
        <= requested_height as i64 * source_width as i64
    {
        let height =
            (requested_width as i64 * source_height as i64 / source_width as i64).max(1) as i32;
        (requested_width, height)
    } else {
        let width =
            (requested_height as i64 * source_width as i64 / source_height as i64).max(1) as i32;
        (width, requested_height)
    }
}

/// The largest rect of whole tiles inside `rect` (storage space).
fn tile_interior(rect: Rect) -> Rect {
    let covering = tiles_covering(rect);
    if covering.is_empty() {
        return Rect::EMPTY;
    }
    let mut interior = Rect::EMPTY;
    for tile_row in covering.top()..=covering.bottom() {
        for tile_col in covering.left()..=covering.right() {
            let tile_bounds = model::tile_rect(tile_col, tile_row);
            if rect.contains_rect(tile_bounds) {
                interior = interior.united(tile_bounds);
            }
        }
    }
    interior
}

/// The up-to-four strips of `rect` not covered by `interior`.
fn border_strips(rect: Rect, interior: Rect) -> Vec<Rect> {
    if interior.is_empty() {
        return vec![rect];
    }
    let mut strips = Vec::new();
    if interior.top() > rect.top() {
        strips.push(Rect::from_edges(
            rect.left(),
            rect.top(),
            rect.right(),
            interior.top() - 1,
        ));
    }
    if interior.bottom() < rect.bottom() {
        strips.push(Rect::from_edges(
            rect.left(),
            interior.bottom() + 1,
            rect.right(),
            rect.bottom(),
        ));
    }
    if interior.left() > rect.left() {
        strips.push(Rect::from_edges(
            rect.left(),
            interior.top(),
            interior.left() - 1,
            interior.bottom(),
        ));
    }
    if interior.right() < rect.right() {
        strips.push(Rect::from_edges(
            interior.right() + 1,
            interior.top(),
            rect.right(),
            interior.bottom(),
        ));
    }
    strips
}

fn rect_byte_len(rect: Rect, pixel_size: usize) -> usize {
    if rect.is_empty() {
        return 0;
    }
    rect.width as usize * rect.height as usize * pixel_size
}

/// Copies the rows of `piece` out of a buffer holding `full` (row-major).
fn extract_rows(bytes: &[u8], full: Rect, piece: Rect, pixel_size: usize) -> Vec<u8> {
    debug_assert!(full.contains_rect(piece));
    let mut out = vec![0u8; rect_byte_len(piece, pixel_size)];
    let full_row = full.width as usize * pixel_size;
    let piece_row = piece.width as usize * pixel_size;
    for row in 0..piece.height as usize {
        let src_start = ((piece.y - full.y) as usize + row) * full_row
            + (piece.x - full.x) as usize * pixel_size;
        out[row * piece_row..(row + 1) * piece_row]
            .copy_from_slice(&bytes[src_start..src_start + piece_row]);
    }
    out
}

/// Pastes a `piece`-shaped buffer into a buffer holding `full`.
fn paste_rows(out: &mut [u8], full: Rect, piece: Rect, bytes: &[u8], pixel_size: usize) {
    debug_assert!(full.contains_rect(piece));
    let full_row = full.width as usize * pixel_size;
    let piece_row = piece.width as usize * pixel_size;
    for row in 0..piece.height as usize {
        let dst_start = ((piece.y - full.y) as usize + row) * full_row
            + (piece.x - full.x) as usize * pixel_size;
        out[dst_start..dst_start + piece_row]
            .copy_from_slice(&bytes[row * piece_row..(row + 1) * piece_row]);
    }
}

#[cfg(test)]
mod tests;
