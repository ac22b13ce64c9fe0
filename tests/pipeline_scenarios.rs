//! End-to-end pull and streaming scenarios.

use rasterpipe::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn pipeline(threads: usize) -> Pipeline {
    Pipeline::new(PipelineConfig::new().with_threads(threads).with_min_piece_size(1)).unwrap()
}

fn ramp(width: u64, height: u64) -> FunctionSource {
    FunctionSource::new(ImageRegion::from_size([width, height]), PixelType::U8, 1, |x, y, _| {
        ((x * 7 + y * 13) % 251) as f64
    })
}

#[test]
fn point_filter_touches_only_requested_pixels() {
    let mut p = pipeline(4);
    let source = MemorySource::constant(4, 4, 5u8).unwrap();
    let log = source.request_log();
    let source = p.add_source(source);
    let double = p.add_filter(ShiftScaleFilter::new(2.0, 0.0));
    p.connect(source, double, 0).unwrap();

    let region = ImageRegion::new_2d(1, 1, 2, 2);
    let out = p.pull(double, region).unwrap();
    assert_eq!(out.requested_region(), region);
    for y in 1..3 {
        for x in 1..3 {
            assert_eq!(out.value_f64(x, y, 0), Some(10.0));
        }
    }
    assert_eq!(log.requests(), vec![region]);
}

#[test]
fn repeated_pull_is_served_from_cache() {
    let mut p = pipeline(2);
    let source = p.add_source(ramp(32, 32));
    let smooth = p.add_filter(LocalStatisticsFilter::new(1));
    p.connect(source, smooth, 0).unwrap();

    let region = ImageRegion::new_2d(4, 4, 16, 16);
    let first = p.pull(smooth, region).unwrap().as_bytes().to_vec();
    assert_eq!(p.node_stats(smooth).unwrap().generate_count, 1);

    let second = p.pull(smooth, region).unwrap().as_bytes().to_vec();
    assert_eq!(first, second);
    assert_eq!(p.node_stats(smooth).unwrap().generate_count, 1);
    assert_eq!(p.node_stats(source).unwrap().generate_count, 1);

    // A sub-region of a valid region is also a hit.
    p.pull(smooth, ImageRegion::new_2d(8, 8, 2, 2)).unwrap();
    let stats = p.node_stats(smooth).unwrap();
    assert_eq!(stats.generate_count, 1);
    assert_eq!(stats.cache_hits, 2);

    p.modified(smooth).unwrap();
    p.pull(smooth, region).unwrap();
    assert_eq!(p.node_stats(smooth).unwrap().generate_count, 2);
}

#[test]
fn neighborhood_propagation_is_cropped_to_the_input() {
    let mut p = pipeline(1);
    let source = p.add_source(ramp(10, 10));
    let smooth = p.add_filter(LocalStatisticsFilter::new(2));
    p.connect(source, smooth, 0).unwrap();

    let corner = p.required_input_region(smooth, ImageRegion::new_2d(0, 0, 1, 1)).unwrap();
    assert_eq!(corner, vec![Some(ImageRegion::new_2d(0, 0, 3, 3))]);

    let inner = p.required_input_region(smooth, ImageRegion::new_2d(4, 4, 2, 2)).unwrap();
    assert_eq!(inner, vec![Some(ImageRegion::new_2d(2, 2, 6, 6))]);

    let full = ImageRegion::from_size([10, 10]);
    assert_eq!(p.required_input_region(smooth, full).unwrap(), vec![Some(full)]);
}

#[test]
fn neighborhood_border_pull_reads_cropped_input() {
    let mut p = pipeline(2);
    let source = ramp(10, 10);
    let log = source.request_log();
    let source = p.add_source(source);
    let smooth = p.add_filter(LocalStatisticsFilter::new(2));
    p.connect(source, smooth, 0).unwrap();

    p.pull(smooth, ImageRegion::new_2d(0, 0, 1, 1)).unwrap();
    assert_eq!(log.requests(), vec![ImageRegion::new_2d(0, 0, 3, 3)]);
}

#[test]
fn strict_failure_keeps_previous_buffer() {
    let mut p = pipeline(2);
    let source = p.add_source(ramp(10, 10));
    let smooth = p.add_filter(LocalStatisticsFilter::new(1).strict());
    p.connect(source, smooth, 0).unwrap();

    let inner = ImageRegion::new_2d(2, 2, 4, 4);
    let before = p.pull(smooth, inner).unwrap().as_bytes().to_vec();

    let border = ImageRegion::new_2d(0, 0, 3, 3);
    match p.pull(smooth, border) {
        Err(PipelineError::RegionUnavailable { node, requested, available }) => {
            assert_eq!(node, smooth);
            assert_eq!(requested, ImageRegion::new_2d(-1, -1, 5, 5));
            assert_eq!(available, ImageRegion::from_size([10, 10]));
        }
        other => panic!("expected RegionUnavailable, got {:?}", other.map(|b| b.requested_region())),
    }

    assert_eq!(p.state(smooth).unwrap(), NodeState::DataValid(inner));
    let after = p.output(smooth).unwrap().unwrap().as_bytes().to_vec();
    assert_eq!(before, after);
    assert_eq!(p.node_stats(smooth).unwrap().generate_count, 1);
}

#[test]
fn fan_out_requests_are_merged() {
    let mut p = pipeline(2);
    let source = ramp(20, 20);
    let log = source.request_log();
    let source = p.add_source(source);
    let registration = p.add_filter(FineRegistrationFilter::new(1, 2));
    p.connect(source, registration, 0).unwrap();
    p.connect(source, registration, 1).unwrap();

    let out = p.pull(registration, ImageRegion::new_2d(8, 8, 2, 2)).unwrap();
    // Fixed needs (7,7,4,4), moving needs (5,5,8,8): one read of the union.
    assert_eq!(log.requests(), vec![ImageRegion::new_2d(5, 5, 8, 8)]);
    // Registering an image with itself finds no displacement.
    assert_eq!(out.value_f64(8, 8, 0), Some(0.0));
    assert_eq!(out.value_f64(8, 8, 1), Some(0.0));
    let metric = p.output((registration, 1)).unwrap().unwrap();
    assert_eq!(metric.value_f64(8, 8, 0), Some(0.0));
}

#[test]
fn both_outputs_feed_one_consumer() {
    let mut p = pipeline(2);
    let source = ramp(16, 16);
    let log = source.request_log();
    let source = p.add_source(source);
    let registration = p.add_filter(FineRegistrationFilter::new(1, 1));
    let sum = p.add_filter(BandMathFilter::sum(2));
    p.connect(source, registration, 0).unwrap();
    p.connect(source, registration, 1).unwrap();
    p.connect(registration, sum, 0).unwrap();
    p.connect((registration, 1), sum, 1).unwrap();

    let region = ImageRegion::new_2d(4, 4, 4, 4);
    let out = p.pull(sum, region).unwrap();
    // dx + dy + metric of an image registered with itself.
    assert_eq!(out.value_f64(5, 5, 0), Some(0.0));
    assert_eq!(p.node_stats(registration).unwrap().generate_count, 1);
    assert_eq!(log.requests(), vec![ImageRegion::new_2d(2, 2, 8, 8)]);
    assert_eq!(p.state((registration, 1)).unwrap(), NodeState::DataValid(region));
}

/// Copies its input; once armed, fails on the tile holding the origin.
struct FailAtOrigin {
    armed: Arc<AtomicBool>,
}

impl Filter for FailAtOrigin {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::builder("fail_at_origin", "Fail At Origin")
            .input(InputDefinition::new("image"))
            .build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        Ok(vec![inputs[0].clone()])
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
        let input = inputs.buffer(0)?;
        let output = output_tile(outputs, 0)?;
        let region = output.region();
        if self.armed.load(Ordering::SeqCst) && region.contains_index(&[0, 0]) {
            return Err(ComputeError::new("tile at the origin failed"));
        }
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                output.set_f64(x, y, 0, input.value_f64(x, y, 0).unwrap_or(0.0));
            }
        }
        Ok(())
    }
}

#[test]
fn compute_failure_keeps_previous_buffer() {
    let mut p = pipeline(4);
    let source = p.add_source(ramp(8, 8));
    let armed = Arc::new(AtomicBool::new(false));
    let copy = p.add_filter(FailAtOrigin { armed: armed.clone() });
    p.connect(source, copy, 0).unwrap();

    let inner = ImageRegion::new_2d(2, 2, 4, 4);
    let before = p.pull(copy, inner).unwrap().as_bytes().to_vec();

    armed.store(true, Ordering::SeqCst);
    match p.pull(copy, ImageRegion::from_size([8, 8])) {
        Err(PipelineError::Compute { node, region, thread, source }) => {
            assert_eq!(node, copy);
            assert_eq!(thread, 0);
            assert!(region.contains_index(&[0, 0]));
            assert_eq!(source.message, "tile at the origin failed");
        }
        other => panic!("expected Compute, got {:?}", other.map(|b| b.requested_region())),
    }

    assert_eq!(p.state(copy).unwrap(), NodeState::DataValid(inner));
    let after = p.output(copy).unwrap().unwrap().as_bytes().to_vec();
    assert_eq!(before, after);
    assert_eq!(p.node_stats(copy).unwrap().generate_count, 1);
}

#[test]
fn diamond_pipeline_reads_each_input_once() {
    let mut p = pipeline(3);
    let source = MemorySource::constant(6, 6, 3u8).unwrap();
    let log = source.request_log();
    let source = p.add_source(source);
    let double = p.add_filter(ShiftScaleFilter::new(2.0, 0.0));
    let sum = p.add_filter(BandMathFilter::sum(2));
    p.connect(source, double, 0).unwrap();
    p.connect(double, sum, 0).unwrap();
    p.connect(source, sum, 1).unwrap();

    let region = ImageRegion::new_2d(1, 2, 3, 3);
    let out = p.pull(sum, region).unwrap();
    assert_eq!(out.value_f64(2, 3, 0), Some(9.0));
    assert_eq!(log.requests(), vec![region]);
}

#[test]
fn streamed_image_matches_single_pull() {
    const BUDGET: u64 = 256 * 1024;

    let build = || {
        let mut p = pipeline(4);
        let source = ramp(1000, 1000);
        let log = source.request_log();
        let source = p.add_source(source);
        let filter = p.add_filter(ShiftScaleFilter::new(1.5, -3.0).with_output_type(PixelType::U16));
        p.connect(source, filter, 0).unwrap();
        (p, filter, log)
    };

    let (mut whole, id, _) = build();
    let expected = whole.pull(id, ImageRegion::from_size([1000, 1000])).unwrap().as_bytes().to_vec();

    let (mut streamed, id, log) = build();
    let mut sink = MemorySink::new();
    let options = StreamingOptions::new(StreamingConfig::new(StreamingMode::RamDriven { budget_bytes: BUDGET }));
    let report = stream(&mut streamed, id, &mut sink, &options).unwrap();

    assert!(report.pieces > 1);
    assert_eq!(report.pixels, 1_000_000);
    assert_eq!(log.len(), report.pieces);
    for piece in log.requests() {
        assert!(piece.number_of_pixels().unwrap() * report.bytes_per_pixel <= BUDGET);
    }
    assert_eq!(sink.into_buffer().unwrap().as_bytes(), expected.as_slice());
}

#[test]
fn statistics_chain_from_registry() {
    let registry = FilterRegistry::with_builtins();
    let mut params = toml::Table::new();
    params.insert("scale".into(), toml::Value::Float(0.5));

    let mut p = pipeline(2);
    let source = p.add_source(MemorySource::constant(16, 16, 8u8).unwrap());
    let half = p.add_boxed_filter(registry.create("shift_scale", &params).unwrap());
    let stats = StreamingStatisticsFilter::new();
    let handle = stats.handle();
    let stats = p.add_filter(stats);
    p.connect(source, half, 0).unwrap();
    p.connect(half, stats, 0).unwrap();

    let options = StreamingOptions::new(StreamingConfig::new(StreamingMode::Tiled { tile_size: 5 }));
    let report = stream(&mut p, stats, &mut MemorySink::new(), &options).unwrap();
    assert_eq!(report.pieces, 16);
    assert_eq!(report.reports.len(), 1);

    let stats = handle.report().unwrap();
    assert_eq!(stats.bands[0].count, 256);
    assert_eq!(stats.bands[0].mean, 4.0);
    assert_eq!(stats.bands[0].variance, 0.0);
}
