//! Property tests for region decomposition and parallel generation.

use proptest::prelude::*;
use rasterpipe::execution::partition;
use rasterpipe::prelude::*;

fn assert_exact_cover(full: &ImageRegion, pieces: &[ImageRegion]) -> Result<(), TestCaseError> {
    let mut total = 0;
    for (i, a) in pieces.iter().enumerate() {
        prop_assert!(!a.is_empty());
        prop_assert!(a.is_inside(full), "{} outside {}", a, full);
        for b in &pieces[i + 1..] {
            prop_assert!(!a.overlaps(b), "{} overlaps {}", a, b);
        }
        total += a.number_of_pixels().unwrap();
    }
    prop_assert_eq!(total, full.number_of_pixels().unwrap());
    Ok(())
}

fn region_strategy() -> impl Strategy<Value = ImageRegion> {
    (-50i64..50, -50i64..50, 1u64..120, 1u64..120).prop_map(|(x, y, w, h)| ImageRegion::new_2d(x, y, w, h))
}

fn mode_strategy() -> impl Strategy<Value = StreamingMode> {
    prop_oneof![
        Just(StreamingMode::Whole),
        (1u64..20_000).prop_map(|budget_bytes| StreamingMode::RamDriven { budget_bytes }),
        (1u64..40).prop_map(|count| StreamingMode::Divisions { count }),
        (1u64..40).prop_map(|lines_per_piece| StreamingMode::Lines { lines_per_piece }),
        (1u64..40).prop_map(|tile_size| StreamingMode::Tiled { tile_size }),
        (1u64..20_000).prop_map(|budget_bytes| StreamingMode::TiledRamDriven { budget_bytes }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn streaming_pieces_cover_the_region(full in region_strategy(), mode in mode_strategy(), bpp in 1u64..16) {
        let pieces = mode.pieces(&full, bpp);
        assert_exact_cover(&full, &pieces)?;
    }

    #[test]
    fn ram_driven_pieces_fit_the_budget(full in region_strategy(), budget in 1u64..20_000, bpp in 1u64..16) {
        let pieces = StreamingSplitter::split(&full, budget, bpp);
        assert_exact_cover(&full, &pieces)?;
        for piece in &pieces {
            // Pieces never shrink below one row.
            let pixels = piece.number_of_pixels().unwrap();
            prop_assert!(pixels * bpp <= budget || piece.height() == 1);
        }
    }

    #[test]
    fn thread_partition_covers_the_region(full in region_strategy(), threads in 1usize..17, min in 1u64..10) {
        let pieces = partition(&full, threads, min);
        prop_assert!(pieces.len() <= threads);
        assert_exact_cover(&full, &pieces)?;
    }

    #[test]
    fn thread_count_does_not_change_the_result(width in 1u64..64, height in 1u64..64, threads in 2usize..9) {
        let run = |threads: usize| {
            let mut p = Pipeline::new(PipelineConfig::new().with_threads(threads).with_min_piece_size(1)).unwrap();
            let source = p.add_source(FunctionSource::new(
                ImageRegion::from_size([width, height]),
                PixelType::F32,
                2,
                |x, y, band| (x as f64).sin() * (y as f64 + band as f64).cos(),
            ));
            let smooth = p.add_filter(LocalStatisticsFilter::new(2));
            p.connect(source, smooth, 0).unwrap();
            p.pull(smooth, ImageRegion::from_size([width, height])).unwrap().as_bytes().to_vec()
        };
        prop_assert_eq!(run(1), run(threads));
    }
}
