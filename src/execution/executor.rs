//! Multithreaded execution of a filter over one output region.
//!
//! The region is partitioned into at most `num_threads` disjoint sub-regions
//! by recursively halving along the largest extent. Each sub-region gets one
//! mutable tile per output buffer and runs on the executor's rayon pool.
//! All tasks are joined before the first error (lowest thread index) is
//! returned, so a failure never leaves tasks running.

use crate::core::buffer::{AnyBuffer, AnyTileMut};
use crate::core::error::{ComputeError, ExecutionError, PipelineResult};
use crate::core::region::ImageRegion;
use rayon::prelude::*;
use std::sync::Arc;

/// Runs per-region callbacks on a dedicated thread pool.
#[derive(Clone)]
pub struct ThreadedExecutor {
    pool: Arc<rayon::ThreadPool>,
    num_threads: usize,
    min_piece_size: u64,
}

impl std::fmt::Debug for ThreadedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedExecutor")
            .field("num_threads", &self.num_threads)
            .field("min_piece_size", &self.min_piece_size)
            .finish()
    }
}

impl ThreadedExecutor {
    /// Build an executor with `num_threads` workers (0 = one per core).
    pub fn new(num_threads: usize, min_piece_size: u64) -> PipelineResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("rasterpipe-worker-{}", i))
            .build()?;
        let num_threads = pool.current_num_threads();
        Ok(Self {
            pool: Arc::new(pool),
            num_threads,
            min_piece_size: min_piece_size.max(1),
        })
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Minimum extent of a sub-region along the split dimension.
    pub fn min_piece_size(&self) -> u64 {
        self.min_piece_size
    }

    /// Sub-regions `execute` would use for `region`.
    pub fn plan(&self, region: &ImageRegion) -> Vec<ImageRegion> {
        partition(region, self.num_threads, self.min_piece_size)
    }

    /// Run `callback` over `region` of every buffer in `outputs` using every
    /// worker. The callback receives the tiles of one sub-region, in the order
    /// of `outputs`.
    ///
    /// Returns the number of sub-regions that were processed.
    pub fn execute<F>(&self, outputs: &mut [AnyBuffer], region: &ImageRegion, callback: F) -> Result<usize, ExecutionError>
    where
        F: Fn(&mut [AnyTileMut<'_>], usize) -> Result<(), ComputeError> + Sync,
    {
        self.execute_with(self.num_threads, outputs, region, callback)
    }

    /// Like [`ThreadedExecutor::execute`] with an explicit piece count.
    pub fn execute_with<F>(
        &self,
        max_pieces: usize,
        outputs: &mut [AnyBuffer],
        region: &ImageRegion,
        callback: F,
    ) -> Result<usize, ExecutionError>
    where
        F: Fn(&mut [AnyTileMut<'_>], usize) -> Result<(), ComputeError> + Sync,
    {
        let pieces = partition(region, max_pieces, self.min_piece_size);
        if pieces.is_empty() {
            return Ok(0);
        }

        // One row of tiles per sub-region, one column per output.
        let mut tiles: Vec<Vec<AnyTileMut<'_>>> = pieces.iter().map(|_| Vec::with_capacity(outputs.len())).collect();
        for output in outputs.iter_mut() {
            for (row, tile) in tiles.iter_mut().zip(output.split_tiles_mut(&pieces)?) {
                row.push(tile);
            }
        }

        let results: Vec<Result<(), ComputeError>> = if tiles.len() == 1 {
            tiles.iter_mut().map(|row| callback(row.as_mut_slice(), 0)).collect()
        } else {
            self.pool.install(|| {
                tiles
                    .par_iter_mut()
                    .enumerate()
                    .map(|(thread, row)| {
                        log::trace!("thread {} computing {}", thread, pieces[thread]);
                        callback(row.as_mut_slice(), thread)
                    })
                    .collect()
            })
        };

        for (thread, result) in results.into_iter().enumerate() {
            if let Err(source) = result {
                return Err(ExecutionError::Task {
                    thread,
                    region: pieces[thread],
                    source,
                });
            }
        }
        Ok(pieces.len())
    }
}

/// Split `region` into at most `max_pieces` disjoint sub-regions.
///
/// The largest splittable piece is halved along its largest dimension until
/// the count is reached or no piece has an extent of at least
/// `2 * min_piece_size` along its largest dimension. The result is sorted
/// row-major and depends only on the arguments.
pub fn partition(region: &ImageRegion, max_pieces: usize, min_piece_size: u64) -> Vec<ImageRegion> {
    if region.is_empty() {
        return Vec::new();
    }
    let min_piece_size = min_piece_size.max(1);
    let mut pieces = vec![*region];
    while pieces.len() < max_pieces {
        let mut best: Option<(usize, u128)> = None;
        for (i, piece) in pieces.iter().enumerate() {
            let d = piece.largest_dimension();
            if piece.size()[d] < 2 * min_piece_size {
                continue;
            }
            let pixels = piece.width() as u128 * piece.height() as u128;
            if best.map_or(true, |(_, p)| pixels > p) {
                best = Some((i, pixels));
            }
        }
        let Some((i, _)) = best else {
            break;
        };
        let piece = pieces[i];
        let d = piece.largest_dimension();
        let (head, tail) = piece.split_at(d, piece.size()[d] / 2);
        pieces[i] = head;
        pieces.push(tail);
    }
    pieces.sort_by_key(|p| (p.y(), p.x()));
    pieces
}
