//! Decomposition of a full region into streamed pieces.
//!
//! Pieces are pairwise disjoint, cover the full region exactly and come in
//! row-major order (outermost dimension slowest). None of them is empty.

use crate::core::region::{ImageRegion, Region};
use serde::{Deserialize, Serialize};

/// Splits regions into memory-bounded pieces.
pub struct StreamingSplitter;

impl StreamingSplitter {
    /// Pieces of `full` each holding at most `budget_bytes` where possible.
    ///
    /// Splitting happens along the outermost dimension first and moves inwards
    /// only when a single slab is over budget. Dimension 0 is never split, so a
    /// piece is never smaller than one row.
    pub fn split<const D: usize>(full: &Region<D>, budget_bytes: u64, bytes_per_pixel: u64) -> Vec<Region<D>> {
        let mut pieces = Vec::new();
        if full.is_empty() {
            return pieces;
        }
        split_dimension(full, D.saturating_sub(1), budget_bytes as u128, bytes_per_pixel.max(1) as u128, &mut pieces);
        pieces
    }

    /// Horizontal strips of `rows` rows (the last one may be shorter).
    pub fn strips(full: &ImageRegion, rows: u64) -> Vec<ImageRegion> {
        chunks(full, 1, rows.max(1))
    }

    /// Tiles of `tile_width`×`tile_height` in row-major order; edge tiles may
    /// be smaller.
    pub fn tiles(full: &ImageRegion, tile_width: u64, tile_height: u64) -> Vec<ImageRegion> {
        chunks(full, 1, tile_height.max(1))
            .into_iter()
            .flat_map(|strip| chunks(&strip, 0, tile_width.max(1)))
            .collect()
    }
}

/// Bytes held by `region`, saturating at `u128::MAX` so oversized regions
/// always count as over budget.
fn bytes_of<const D: usize>(region: &Region<D>, bytes_per_pixel: u128) -> u128 {
    region
        .size()
        .iter()
        .try_fold(bytes_per_pixel, |acc, &s| acc.checked_mul(s as u128))
        .unwrap_or(u128::MAX)
}

fn split_dimension<const D: usize>(
    region: &Region<D>,
    d: usize,
    budget: u128,
    bytes_per_pixel: u128,
    out: &mut Vec<Region<D>>,
) {
    if d == 0 || bytes_of(region, bytes_per_pixel) <= budget {
        out.push(*region);
        return;
    }
    let slab = region.slice(d, 0, 1);
    let slab_bytes = bytes_of(&slab, bytes_per_pixel);
    if slab_bytes > budget {
        // A single slab is over budget: go one dimension inwards per slab.
        for i in 0..region.size()[d] {
            split_dimension(&region.slice(d, i, 1), d - 1, budget, bytes_per_pixel, out);
        }
        return;
    }
    let per_piece = u64::try_from(budget / slab_bytes.max(1)).unwrap_or(u64::MAX).max(1);
    out.extend(chunks(region, d, per_piece));
}

fn chunks<const D: usize>(region: &Region<D>, d: usize, step: u64) -> Vec<Region<D>> {
    let extent = region.size()[d];
    let mut out = Vec::new();
    if region.is_empty() {
        return out;
    }
    let mut start = 0;
    while start < extent {
        let len = step.min(extent - start);
        out.push(region.slice(d, start, len));
        start += len;
    }
    out
}

/// How the streaming driver decomposes the region it writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamingMode {
    /// One piece.
    Whole,
    /// Strips within a memory budget over the pipeline memory print.
    RamDriven { budget_bytes: u64 },
    /// A fixed number of strips.
    Divisions { count: u64 },
    /// Strips of a fixed number of lines.
    Lines { lines_per_piece: u64 },
    /// Square tiles.
    Tiled { tile_size: u64 },
    /// Square tiles within a memory budget.
    TiledRamDriven { budget_bytes: u64 },
}

impl StreamingMode {
    /// Pieces of `full` for this mode; `bytes_per_pixel` is the memory print
    /// of one output pixel through the whole upstream pipeline.
    pub fn pieces(&self, full: &ImageRegion, bytes_per_pixel: u64) -> Vec<ImageRegion> {
        if full.is_empty() {
            return Vec::new();
        }
        match self {
            StreamingMode::Whole => vec![*full],
            StreamingMode::RamDriven { budget_bytes } => {
                StreamingSplitter::split(full, *budget_bytes, bytes_per_pixel)
            }
            StreamingMode::Divisions { count } => {
                let count = (*count).clamp(1, full.height());
                StreamingSplitter::strips(full, full.height().div_ceil(count))
            }
            StreamingMode::Lines { lines_per_piece } => StreamingSplitter::strips(full, *lines_per_piece),
            StreamingMode::Tiled { tile_size } => StreamingSplitter::tiles(full, *tile_size, *tile_size),
            StreamingMode::TiledRamDriven { budget_bytes } => {
                let pixels = budget_bytes / bytes_per_pixel.max(1);
                let side = ((pixels as f64).sqrt() as u64).max(1);
                StreamingSplitter::tiles(full, side, side)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_pixels(pieces: &[ImageRegion]) -> u64 {
        pieces.iter().map(|p| p.number_of_pixels().unwrap()).sum()
    }

    #[test]
    fn test_split_fits_in_one_piece() {
        let full = ImageRegion::new_2d(0, 0, 10, 10);
        assert_eq!(StreamingSplitter::split(&full, 1000, 4), vec![full]);
    }

    #[test]
    fn test_split_into_strips() {
        let full = ImageRegion::new_2d(0, 0, 10, 10);
        let pieces = StreamingSplitter::split(&full, 120, 4);
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[0], ImageRegion::new_2d(0, 0, 10, 3));
        assert_eq!(pieces[3], ImageRegion::new_2d(0, 9, 10, 1));
        assert_eq!(total_pixels(&pieces), 100);
    }

    #[test]
    fn test_budget_below_one_row_gives_rows() {
        let full = ImageRegion::new_2d(5, 5, 100, 3);
        let pieces = StreamingSplitter::split(&full, 1, 8);
        assert_eq!(
            pieces,
            vec![
                ImageRegion::new_2d(5, 5, 100, 1),
                ImageRegion::new_2d(5, 6, 100, 1),
                ImageRegion::new_2d(5, 7, 100, 1),
            ]
        );
    }

    #[test]
    fn test_empty_region_has_no_pieces() {
        assert!(StreamingSplitter::split(&ImageRegion::default(), 10, 1).is_empty());
    }

    #[test]
    fn test_three_dimensional_split_moves_inwards() {
        let volume = Region::<3>::from_size([4, 4, 2]);
        // One 4x4 slice is 16 bytes, one row is 4 bytes.
        let pieces = StreamingSplitter::split(&volume, 8, 1);
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces[0], Region::<3>::new([0, 0, 0], [4, 2, 1]));
        assert_eq!(pieces[3], Region::<3>::new([0, 2, 1], [4, 2, 1]));
    }

    #[test]
    fn test_byte_count_saturates() {
        assert_eq!(bytes_of(&Region::<3>::from_size([2, 3, 4]), 8), 192);
        let huge = Region::<3>::from_size([u64::MAX / 2, 1 << 40, 1 << 40]);
        assert_eq!(bytes_of(&huge, 8), u128::MAX);
        assert_eq!(bytes_of(&huge.slice(2, 0, 1).slice(1, 0, 1), 8), (u64::MAX / 2) as u128 * 8);
    }

    #[test]
    fn test_tiles_row_major() {
        let full = ImageRegion::new_2d(0, 0, 5, 3);
        let tiles = StreamingSplitter::tiles(&full, 2, 2);
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[0], ImageRegion::new_2d(0, 0, 2, 2));
        assert_eq!(tiles[2], ImageRegion::new_2d(4, 0, 1, 2));
        assert_eq!(tiles[5], ImageRegion::new_2d(4, 2, 1, 1));
    }

    #[test]
    fn test_modes() {
        let full = ImageRegion::new_2d(0, 0, 16, 10);
        assert_eq!(StreamingMode::Whole.pieces(&full, 4), vec![full]);
        assert_eq!(StreamingMode::Divisions { count: 3 }.pieces(&full, 4).len(), 3);
        assert_eq!(StreamingMode::Divisions { count: 50 }.pieces(&full, 4).len(), 10);
        assert_eq!(StreamingMode::Lines { lines_per_piece: 4 }.pieces(&full, 4).len(), 3);
        assert_eq!(StreamingMode::Tiled { tile_size: 8 }.pieces(&full, 4).len(), 4);
        let tiles = StreamingMode::TiledRamDriven { budget_bytes: 64 }.pieces(&full, 4);
        assert_eq!(tiles[0], ImageRegion::new_2d(0, 0, 4, 4));
        assert_eq!(total_pixels(&tiles), 160);
    }

    #[test]
    fn test_mode_serde() {
        let mode: StreamingMode = serde_json::from_str(r#"{"kind":"tiled","tile_size":64}"#).unwrap();
        assert_eq!(mode, StreamingMode::Tiled { tile_size: 64 });
    }
}
