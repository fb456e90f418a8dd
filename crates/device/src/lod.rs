//! Level-of-detail regeneration: box-filter downsampling of a source
//! data into its mip-style low-resolution companion.

use model::{Rect, aligned_rect, scaled_down_rect};

use crate::data::Data;

/// Deepest supported level: a `2^level`-square cell must fit the u8
/// weight table (cell size at most 256 samples).
pub(crate) const MAX_LOD_LEVEL: i32 = 4;

/// Weight table for one `2^level × 2^level` cell. Every entry receives
/// `ceil(255 / cell_size)` except the last, which absorbs the entire
/// rounding shortfall so the table sums to exactly 255. The placement of
/// the shortfall is part of the contract: existing mip content is only
/// reproducible bit-exactly with the remainder on the last sample.
pub(crate) fn lod_mix_weights(level: i32) -> Vec<u8> {
    assert!(
        (1..=MAX_LOD_LEVEL).contains(&level),
        "level of detail must be between 1 and {MAX_LOD_LEVEL}"
    );
    let cell_size = 1usize << (2 * level);
    let common = 255usize.div_ceil(cell_size);
    let mut weights = vec![common as u8; cell_size];
    weights[cell_size - 1] = (255 - common * (cell_size - 1)) as u8;
    weights
}

/// Regenerates `lod` from `source` for the given level. The source
/// extent is aligned to the `2^level` grid, every cell is gathered into
/// a flat row-major staging buffer and mixed through the color space's
/// mix operator. Returns the touched destination rect in the LOD data's
/// coordinate space; empty source extents are a no-op.
pub(crate) fn sync_lod_data(source: &Data, lod: &mut Data, level: i32) -> Rect {
    let cell = 1i32 << level;
    let source_rect = aligned_rect(source.extent(), cell);
    let target_rect = scaled_down_rect(source_rect, level);
    if source_rect.is_empty() || target_rect.is_empty() {
        return Rect::EMPTY;
    }

    let pixel_size = source.color_space.pixel_size();
    let cell_size = (cell * cell) as usize;
    let weights = lod_mix_weights(level);
    let mix = source.color_space.mix_op();

    // Full regeneration: drop whatever the previous sync produced so the
    // result depends only on the current source content.
    lod.store.clear();

    let mut staging = vec![0u8; cell_size * pixel_size];
    let mut mixed = vec![0u8; pixel_size];
    let mut target_row = vec![0u8; target_rect.width as usize * pixel_size];
    for row in 0..target_rect.height {
        for column in 0..target_rect.width {
            let cell_rect = Rect::new(
                source_rect.x + column * cell,
                source_rect.y + row * cell,
                cell,
                cell,
            );
            source
                .store
                .read_bytes_into(source.to_store_rect(cell_rect), &mut staging);
            mix.mix(&staging, &weights, cell_size, &mut mixed);
            target_row[column as usize * pixel_size..(column as usize + 1) * pixel_size]
                .copy_from_slice(&mixed);
        }
        let row_rect = Rect::new(target_rect.x, target_rect.y + row, target_rect.width, 1);
        lod.store
            .write_bytes(lod.to_store_rect(row_rect), &target_row);
    }

    lod.cache.invalidate();
    target_rect
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_table_sums_to_exactly_255() {
        for level in 1..=MAX_LOD_LEVEL {
            let weights = lod_mix_weights(level);
            let cell_size = 1usize << (2 * level);
            assert_eq!(weights.len(), cell_size);
            assert_eq!(weights.iter().map(|&w| w as u32).sum::<u32>(), 255);

            let common = 255usize.div_ceil(cell_size) as u8;
            assert!(weights[..cell_size - 1].iter().all(|&w| w == common));
            assert!(
                weights[cell_size - 1] < common || cell_size == 1,
                "the last entry absorbs the rounding shortfall"
            );
        }
    }

    #[test]
    fn level_one_table_is_three_64s_and_a_63() {
        assert_eq!(lod_mix_weights(1), vec![64, 64, 64, 63]);
    }
}
