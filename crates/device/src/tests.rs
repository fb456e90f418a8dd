use super::*;

use std::sync::Mutex;

use colorspace::{gray_alpha8, rgba8};
use model::TILE_SIZE;

fn create_device() -> PaintDevice {
    PaintDevice::new(rgba8())
}

fn solid(pixel: [u8; 4], count: usize) -> Vec<u8> {
    pixel.repeat(count)
}

#[test]
fn fresh_device_reads_the_transparent_default_everywhere() {
    let device = create_device();
    assert_eq!(device.pixel_size(), 4);
    assert_eq!(device.channel_count(), 4);
    assert_eq!(device.default_pixel(), vec![0, 0, 0, 0]);
    assert_eq!(device.read_bytes(Rect::new(-50, 900, 2, 1)), vec![0u8; 8]);
    assert_eq!(device.extent(), Rect::EMPTY);
    assert_eq!(device.exact_bounds(), Rect::EMPTY);
}

#[test]
fn write_then_read_round_trips() {
    let mut device = create_device();
    let rect = Rect::new(-3, -3, 10, 10);
    let payload: Vec<u8> = (0..rect.width * rect.height * 4)
        .map(|value| (value % 241) as u8)
        .collect();
    device.write_bytes(rect, &payload);
    assert_eq!(device.read_bytes(rect), payload);
}

#[test]
fn pixel_accessors_round_trip_through_color() {
    let mut device = create_device();
    let color = Color::new(12, 34, 56, 200);
    device.set_pixel(17, -4, color);
    assert_eq!(device.pixel(17, -4), color);
    assert_eq!(device.pixel_bytes(17, -4), vec![12, 34, 56, 200]);
    assert_eq!(device.pixel(18, -4), Color::TRANSPARENT);
}

#[test]
fn planar_round_trip_at_the_device_level() {
    let mut device = create_device();
    let rect = Rect::new(0, 0, 2, 1);
    device.write_planar_bytes(rect, &[&[1, 2], &[3, 4], &[5, 6], &[7, 8]]);
    assert_eq!(device.read_bytes(rect), vec![1, 3, 5, 7, 2, 4, 6, 8]);
    let planes = device.read_planar_bytes(rect);
    assert_eq!(planes, vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![7, 8]]);
}

#[test]
fn moving_the_device_translates_every_coordinate() {
    let mut device = create_device();
    device.set_pixel(0, 0, Color::opaque(9, 9, 9));
    device.move_to(10, 20);
    assert_eq!(device.offset(), Point::new(10, 20));
    assert_eq!(device.pixel(10, 20), Color::opaque(9, 9, 9));
    assert_eq!(device.pixel(0, 0), Color::TRANSPARENT);
    assert_eq!(device.exact_bounds(), Rect::new(10, 20, 1, 1));
}

#[test]
fn exact_bounds_is_tight_around_written_content() {
    let mut device = create_device();
    let rect = Rect::new(5, 7, 10, 3);
    device.fill_color(rect, Color::opaque(1, 2, 3));
    assert_eq!(device.exact_bounds(), rect);
    // The coarse extent is tile-aligned and strictly larger.
    assert_eq!(device.extent(), Rect::new(0, 0, TILE_SIZE, TILE_SIZE));
    assert!(device.non_default_pixel_area().contains_rect(rect));
}

#[test]
fn exact_bounds_with_non_transparent_default_compares_raw_bytes() {
    let mut device = create_device();
    device.set_default_pixel(&[255, 255, 255, 255]);
    let rect = Rect::new(70, 70, 4, 4);
    device.fill_color(rect, Color::opaque(0, 0, 0));
    // Pixels equal to the default count as empty even though opaque.
    device.fill(Rect::new(0, 0, 8, 8), &[255, 255, 255, 255]);
    assert_eq!(device.exact_bounds(), rect);
}

#[test]
fn exact_bounds_cache_invalidates_on_mutation() {
    let mut device = create_device();
    device.set_pixel(1, 1, Color::opaque(5, 5, 5));
    assert_eq!(device.exact_bounds(), Rect::new(1, 1, 1, 1));
    device.set_pixel(40, 2, Color::opaque(5, 5, 5));
    assert_eq!(device.exact_bounds(), Rect::from_edges(1, 1, 40, 2));
    device.clear();
    assert_eq!(device.exact_bounds(), Rect::EMPTY);
}

#[test]
fn calculate_exact_bounds_returns_the_start_rect_when_nothing_to_refine() {
    let mut device = create_device();
    device.fill_color(Rect::new(0, 0, TILE_SIZE, TILE_SIZE), Color::opaque(1, 1, 1));
    let start = device.extent();
    assert_eq!(device.calculate_exact_bounds(Some(start)), start);
}

#[test]
fn clone_then_bit_blt_reproduces_the_source() {
    let mut src = create_device();
    let rect = Rect::new(10, 10, 80, 40);
    src.fill_color(rect, Color::new(200, 100, 50, 255));

    let mut clone = create_device();
    clone.prepare_clone(&src);
    assert!(clone.fast_bit_blt_possible(&src));
    clone.fast_bit_blt(&src, rect);
    assert_eq!(clone.read_bytes(rect), src.read_bytes(rect));
    // The copy is bounded: a pixel just outside stays default.
    assert_eq!(clone.pixel(9, 10), Color::TRANSPARENT);
}

#[test]
fn fast_bit_blt_handles_interior_tiles_and_border_strips() {
    let mut src = create_device();
    let rect = Rect::new(0, 0, 2 * TILE_SIZE + 2, TILE_SIZE + 6);
    let payload: Vec<u8> = (0..rect.width * rect.height * 4)
        .map(|value| (value % 239) as u8)
        .collect();
    src.write_bytes(rect, &payload);

    let mut clone = create_device();
    clone.prepare_clone(&src);
    clone.fast_bit_blt(&src, rect);
    assert_eq!(clone.read_bytes(rect), payload);
    // Pixels past the precise rect were not dragged along by the
    // whole-tile interior copy.
    assert_eq!(clone.pixel(0, TILE_SIZE + 6), Color::TRANSPARENT);
}

#[test]
fn fast_bit_blt_rough_copies_whole_tiles() {
    let mut src = create_device();
    src.fill_color(Rect::new(0, 0, TILE_SIZE, TILE_SIZE), Color::opaque(7, 7, 7));

    let mut clone = create_device();
    clone.prepare_clone(&src);
    clone.fast_bit_blt_rough(&src, Rect::new(10, 10, 4, 4));
    // Rough copy pulled the full tile, not only the requested rect.
    assert_eq!(clone.pixel(0, 0), Color::opaque(7, 7, 7));
}

#[test]
#[should_panic(expected = "matching color space")]
fn fast_bit_blt_across_color_spaces_is_a_contract_violation() {
    let src = PaintDevice::new(gray_alpha8());
    let mut dst = create_device();
    dst.fast_bit_blt(&src, Rect::new(0, 0, 1, 1));
}

#[test]
fn make_clone_from_copies_content_and_identity() {
    let mut src = create_device();
    src.set_default_pixel(&[9, 9, 9, 9]);
    src.move_to(4, 4);
    let rect = Rect::new(4, 4, 20, 20);
    src.fill_color(rect, Color::opaque(3, 3, 3));

    let mut clone = PaintDevice::new(gray_alpha8());
    clone.make_clone_from(&src, rect);
    assert_eq!(clone.default_pixel(), vec![9, 9, 9, 9]);
    assert_eq!(clone.offset(), Point::new(4, 4));
    assert_eq!(clone.read_bytes(rect), src.read_bytes(rect));
}

#[test]
fn conversion_installs_the_new_space_and_the_record_undoes_it() {
    let mut device = create_device();
    let rect = Rect::new(0, 0, 10, 10);
    device.fill_color(rect, Color::new(10, 20, 30, 255));
    let original_bytes = device.read_bytes(rect);

    let record = device.convert_to(gray_alpha8(), RenderingIntent::default());
    assert_eq!(device.color_space().id(), "GRAYA8");
    assert_eq!(device.pixel_size(), 2);
    let luma = (299 * 10 + 587 * 20 + 114 * 30 + 500) / 1000;
    assert_eq!(device.pixel_bytes(0, 0), vec![luma as u8, 255]);

    let redo = device.install_data(record.store, record.color_space);
    assert_eq!(device.color_space().id(), "RGBA8");
    assert_eq!(device.read_bytes(rect), original_bytes);
    assert_eq!(redo.color_space.id(), "GRAYA8");
}

#[test]
fn converting_an_empty_device_converts_only_the_default_pixel() {
    let mut device = create_device();
    device.set_default_pixel(&[100, 100, 100, 50]);
    device.convert_to(gray_alpha8(), RenderingIntent::default());
    assert_eq!(device.default_pixel(), vec![100, 50]);
    assert_eq!(device.extent(), Rect::EMPTY);
}

#[test]
fn lod_sync_box_filters_the_primary_content() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 128, 128)));
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds.clone());
    device.fill_color(Rect::new(0, 0, 2, 2), Color::new(100, 100, 100, 255));

    let dirty = device.sync_lod_cache(1);
    assert_eq!(dirty.bounding_rect(), Rect::new(0, 0, 32, 32));

    bounds.set_level_of_detail(1);
    assert_eq!(device.pixel_bytes(0, 0), vec![100, 100, 100, 255]);
    // The neighbouring LOD pixel mixes only transparent samples.
    assert_eq!(device.pixel_bytes(1, 0), vec![0, 0, 0, 0]);
}

#[test]
fn lod_resync_is_idempotent() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 128, 128)));
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds.clone());
    device.fill_color(Rect::new(3, 3, 30, 17), Color::new(90, 10, 200, 180));

    device.sync_lod_cache(2);
    bounds.set_level_of_detail(2);
    let lod_rect = device.extent();
    let first = device.read_bytes(lod_rect);
    bounds.set_level_of_detail(0);

    device.sync_lod_cache(2);
    bounds.set_level_of_detail(2);
    let second = device.read_bytes(lod_rect);
    assert_eq!(first, second);
}

#[test]
fn lod_level_switch_rebuilds_the_companion() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 128, 128)));
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds.clone());
    device.fill_color(Rect::new(0, 0, 8, 8), Color::new(40, 40, 40, 255));

    device.sync_lod_cache(1);
    let dirty = device.sync_lod_cache(2);
    assert_eq!(dirty.bounding_rect(), Rect::new(0, 0, 16, 16));
    bounds.set_level_of_detail(2);
    assert_eq!(device.pixel_bytes(0, 0), vec![40, 40, 40, 255]);
}

#[test]
fn frame_create_and_delete_restores_single_frame_reads() {
    let mut device = create_device();
    let rect = Rect::new(2, 2, 6, 6);
    device.fill_color(rect, Color::new(11, 22, 33, 255));
    let before = device.read_bytes(rect);

    let first = device.create_frame(false, None, None);
    assert_eq!(device.frame_ids().len(), 1);
    assert_eq!(device.read_bytes(rect), before, "conversion to frame storage keeps content");

    let second = device.create_frame(false, None, None);
    assert_eq!(device.frame_ids().len(), 2);
    device.delete_frame(second);
    assert_eq!(device.frame_ids().len(), 0, "collapse back to single-frame form");
    assert_eq!(device.read_bytes(rect), before);
    let _ = first;
}

#[test]
fn keyframe_channel_selects_the_frame_for_the_current_time() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 256, 256)));
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds.clone());
    device.set_pixel(0, 0, Color::opaque(1, 0, 0));

    let first = device.create_frame(false, None, None);
    let second = device.create_frame(false, None, None);
    device.set_keyframe(10, second);
    assert_eq!(device.keyframe_count(), 2);

    bounds.set_time(10);
    device.set_pixel(0, 0, Color::opaque(0, 2, 0));

    bounds.set_time(0);
    assert_eq!(device.pixel(0, 0), Color::opaque(1, 0, 0));
    bounds.set_time(25);
    assert_eq!(device.pixel(0, 0), Color::opaque(0, 2, 0));
    bounds.set_time(9);
    assert_eq!(device.pixel(0, 0), Color::opaque(1, 0, 0));
    let _ = first;
}

#[test]
fn copied_frames_are_deep_and_independent() {
    let mut device = create_device();
    device.set_pixel(5, 5, Color::opaque(50, 0, 0));
    let first = device.create_frame(false, None, None);
    let copy = device.create_frame(true, Some(first), None);

    assert_eq!(device.frame_bounds(copy), device.frame_bounds(first));
    let mut fetched = create_device();
    device.fetch_frame(copy, &mut fetched);
    assert_eq!(fetched.pixel(5, 5), Color::opaque(50, 0, 0));

    // Mutating the original frame leaves the copy untouched.
    device.set_pixel(5, 5, Color::opaque(0, 0, 50));
    device.fetch_frame(copy, &mut fetched);
    assert_eq!(fetched.pixel(5, 5), Color::opaque(50, 0, 0));
}

#[test]
fn frame_offset_override_translates_the_new_frame() {
    let mut device = create_device();
    let _first = device.create_frame(false, None, None);
    let shifted = device.create_frame(false, None, Some(Point::new(30, 40)));
    assert_eq!(device.frame_offset(shifted), Point::new(30, 40));
}

#[test]
fn external_frame_mode_keeps_primary_content_untouched() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 256, 256)));
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds.clone());
    device.set_pixel(1, 1, Color::opaque(10, 0, 0));

    bounds.set_external_frame_active(true);
    assert_eq!(device.pixel(1, 1), Color::TRANSPARENT, "external data starts empty");
    device.set_pixel(1, 1, Color::opaque(0, 10, 0));
    assert_eq!(device.pixel(1, 1), Color::opaque(0, 10, 0));

    bounds.set_external_frame_active(false);
    assert_eq!(device.pixel(1, 1), Color::opaque(10, 0, 0));
    bounds.set_external_frame_active(true);
    assert_eq!(device.pixel(1, 1), Color::opaque(0, 10, 0), "snapshot survives switching");
}

#[test]
fn wraparound_write_reads_back_at_the_wrapped_coordinate() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 100, 100)));
    bounds.set_wrap_around_mode(true);
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds);

    device.set_pixel(99, 99, Color::new(42, 0, 0, 255));
    assert_eq!(device.pixel(-1, -1), Color::new(42, 0, 0, 255));

    let payload = solid([7, 7, 7, 255], 25);
    device.write_bytes(Rect::new(98, 98, 5, 5), &payload);
    // Logical (102, 102) wrapped to (2, 2).
    assert_eq!(device.pixel(2, 2), Color::new(7, 7, 7, 255));
    assert_eq!(device.pixel(98, 98), Color::new(7, 7, 7, 255));
    assert_eq!(device.extent(), Rect::new(0, 0, 100, 100));
}

#[test]
fn wraparound_mode_does_not_alter_stored_tiles() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 100, 100)));
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds.clone());
    device.set_pixel(5, 5, Color::opaque(1, 1, 1));
    let plain_extent = device.extent();

    bounds.set_wrap_around_mode(true);
    assert_eq!(device.pixel(105, 105), Color::opaque(1, 1, 1));
    bounds.set_wrap_around_mode(false);
    assert_eq!(device.extent(), plain_extent);
    assert_eq!(device.pixel(5, 5), Color::opaque(1, 1, 1));
    assert_eq!(device.pixel(105, 105), Color::TRANSPARENT);
}

#[test]
fn wrap_iterator_over_the_device_repeats_content() {
    let bounds = Arc::new(SceneDefaultBounds::new(Rect::new(0, 0, 100, 100)));
    bounds.set_wrap_around_mode(true);
    let mut device = PaintDevice::with_default_bounds(rgba8(), bounds);
    device.set_pixel(0, 0, Color::opaque(5, 5, 5));

    let iter = device.create_wrap_hline_const_iter(100, 100, 1);
    assert_eq!(iter.raw_data(), [5, 5, 5, 255]);
}

#[test]
fn thumbnail_preserves_aspect_and_never_upscales() {
    let mut device = create_device();
    device.fill_color(Rect::new(0, 0, 400, 100), Color::opaque(80, 80, 80));

    let thumbnail = device.create_thumbnail(100, 100);
    assert_eq!((thumbnail.width, thumbnail.height), (100, 25));
    assert_eq!(thumbnail.pixels.len(), 100 * 25 * 4);
    assert_eq!(&thumbnail.pixels[..4], &[80, 80, 80, 255]);

    let small = device.create_thumbnail(1000, 1000);
    assert_eq!((small.width, small.height), (400, 100), "no upscaling");
}

#[test]
fn thumbnail_device_samples_nearest_neighbour() {
    let mut device = create_device();
    device.fill_color(Rect::new(0, 0, 2, 1), Color::opaque(10, 0, 0));
    device.fill_color(Rect::new(2, 0, 2, 1), Color::opaque(0, 10, 0));

    let thumbnail = device.create_thumbnail_device(2, 1);
    assert_eq!(thumbnail.pixel(0, 0), Color::opaque(10, 0, 0));
    assert_eq!(thumbnail.pixel(1, 0), Color::opaque(0, 10, 0));
}

#[test]
fn thumbnail_of_an_empty_device_is_empty() {
    let device = create_device();
    assert_eq!(device.create_thumbnail(64, 64), Thumbnail::empty());
}

#[test]
fn clear_selection_reduces_opacity_and_snaps_to_default() {
    let mut device = create_device();
    let rect = Rect::new(0, 0, 8, 8);
    device.fill_color(rect, Color::new(50, 60, 70, 255));

    // Fully opaque selection over the left half, nothing on the right.
    let mut selection = PaintDevice::new(gray_alpha8());
    selection.fill(Rect::new(0, 0, 4, 8), &[255, 255]);

    device.clear_selection(&selection);
    assert_eq!(device.pixel_bytes(0, 0), vec![0, 0, 0, 0], "cleared pixels snap to default");
    assert_eq!(device.pixel(5, 0), Color::new(50, 60, 70, 255));
    assert_eq!(device.exact_bounds(), Rect::new(4, 0, 4, 8));
}

#[test]
fn clear_selection_with_partial_opacity_scales_alpha() {
    let mut device = create_device();
    device.set_pixel(0, 0, Color::new(80, 80, 80, 200));

    let mut selection = PaintDevice::new(gray_alpha8());
    selection.set_pixel_bytes(0, 0, &[255, 128]);

    device.clear_selection(&selection);
    let expected = ((200u16 * (255 - 128) + 127) / 255) as u8;
    assert_eq!(device.pixel(0, 0).a, expected);
}

#[test]
fn cleared_then_purged_device_shrinks_its_extent() {
    let mut device = create_device();
    device.fill_color(Rect::new(0, 0, 8, 8), Color::opaque(1, 1, 1));

    let mut selection = PaintDevice::new(gray_alpha8());
    selection.fill(Rect::new(0, 0, 8, 8), &[255, 255]);
    device.clear_selection(&selection);

    assert_eq!(device.exact_bounds(), Rect::EMPTY);
    device.purge(device.extent());
    assert_eq!(device.extent(), Rect::EMPTY);
}

#[derive(Debug, Default)]
struct RecordingListener {
    regions: Mutex<Vec<Region>>,
}

impl DirtyListener for RecordingListener {
    fn region_dirtied(&self, region: &Region) {
        self.regions
            .lock()
            .expect("listener mutex poisoned")
            .push(region.clone());
    }
}

#[test]
fn dirty_notifications_invalidate_and_propagate_upward() {
    let listener = Arc::new(RecordingListener::default());
    let mut device = create_device();
    device.set_pixel(3, 3, Color::opaque(2, 2, 2));
    assert_eq!(device.exact_bounds(), Rect::new(3, 3, 1, 1));

    let weak: Weak<dyn DirtyListener> =
        Arc::downgrade(&(listener.clone() as Arc<dyn DirtyListener>));
    device.set_parent(weak);
    let rect = Rect::new(0, 0, 16, 16);
    device.set_dirty_rect(rect);

    let received = listener.regions.lock().expect("listener mutex poisoned");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].bounding_rect(), rect);
}

#[test]
fn dirty_propagation_stops_when_the_parent_is_gone() {
    let mut device = create_device();
    let listener: Arc<dyn DirtyListener> = Arc::new(RecordingListener::default());
    let weak: Weak<dyn DirtyListener> = Arc::downgrade(&listener);
    device.set_parent(weak);
    drop(listener);
    // Must not panic; the weak reference no longer upgrades.
    device.set_dirty();
}

#[test]
fn stream_round_trip_through_the_device() {
    let mut device = create_device();
    let rect = Rect::new(7, 7, 50, 20);
    device.fill_color(rect, Color::new(1, 2, 3, 4));
    let mut stream = Vec::new();
    device.write_to(&mut stream).expect("serialize device");

    let mut restored = create_device();
    restored
        .read_from(&mut stream.as_slice())
        .expect("deserialize device");
    assert_eq!(restored.read_bytes(rect), device.read_bytes(rect));
    assert_eq!(restored.exact_bounds(), rect);
}

#[test]
fn stream_with_mismatched_pixel_size_is_rejected() {
    let mut src = create_device();
    src.set_pixel(0, 0, Color::opaque(1, 1, 1));
    let mut stream = Vec::new();
    src.write_to(&mut stream).expect("serialize device");

    let mut target = PaintDevice::new(gray_alpha8());
    match target.read_from(&mut stream.as_slice()) {
        Err(StreamError::InvalidPixelSize(4)) => {}
        other => panic!("expected pixel size rejection, got {other:?}"),
    }
}

#[test]
fn region_reports_the_allocated_footprint() {
    let mut device = create_device();
    device.set_pixel(0, 0, Color::opaque(1, 1, 1));
    device.set_pixel(TILE_SIZE * 3, 0, Color::opaque(1, 1, 1));
    let region = device.region();
    assert_eq!(region.len(), 2);
    assert!(region.contains(0, 0));
    assert!(region.contains(TILE_SIZE * 3, 0));
    assert!(!region.contains(TILE_SIZE * 2, 0));
}
