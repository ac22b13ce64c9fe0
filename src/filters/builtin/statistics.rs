//! Persistent whole-image statistics accumulated across streamed pieces.
//!
//! The filter passes its input through unchanged. While generating, each
//! executor thread adds the samples of its tile to its own accumulator slot;
//! slots are padded to separate cache lines and only reduced in
//! `synthesize`, after the last piece.

use crate::core::buffer::AnyTileMut;
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::filter::{output_tile, Filter, FilterMetadata, GenerateInputs, InputDefinition};
use crate::core::info::ImageInfo;
use crate::core::region::ImageRegion;
use crate::filters::builtin::point::missing_pixel;
use crate::filters::registry::{parse_params, FilterRegistry};
use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Register statistics filters.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(StreamingStatisticsFilter::new().metadata(), |params| {
        let params: StatisticsParams = parse_params("streaming_statistics", params)?;
        let filter = StreamingStatisticsFilter::new();
        Ok(Box::new(match params.no_data {
            Some(value) => filter.with_no_data(value),
            None => filter,
        }))
    });
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StatisticsParams {
    no_data: Option<f64>,
}

/// Statistics of one band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    /// Number of valid samples.
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population variance.
    pub variance: f64,
}

/// Result of a statistics run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub bands: Vec<BandStatistics>,
    /// Samples skipped because they were NaN or infinite.
    pub ignored_non_finite: u64,
    /// Samples skipped because they equal the no-data value.
    pub ignored_no_data: u64,
}

#[derive(Debug, Clone, Copy)]
struct BandAccumulator {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
    sum_squares: f64,
}

impl Default for BandAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            sum_squares: 0.0,
        }
    }
}

impl BandAccumulator {
    fn add(&mut self, value: f64) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.sum_squares += value * value;
    }

    fn merge(&mut self, other: &BandAccumulator) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum_squares += other.sum_squares;
    }

    fn finish(&self) -> BandStatistics {
        if self.count == 0 {
            return BandStatistics {
                count: 0,
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
                variance: f64::NAN,
            };
        }
        let n = self.count as f64;
        let mean = self.sum / n;
        BandStatistics {
            count: self.count,
            min: self.min,
            max: self.max,
            mean,
            variance: (self.sum_squares / n - mean * mean).max(0.0),
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    bands: Vec<BandAccumulator>,
    ignored_non_finite: u64,
    ignored_no_data: u64,
}

impl Accumulator {
    fn merge(&mut self, other: &Accumulator) {
        if self.bands.len() < other.bands.len() {
            self.bands.resize(other.bands.len(), BandAccumulator::default());
        }
        for (band, acc) in other.bands.iter().enumerate() {
            self.bands[band].merge(acc);
        }
        self.ignored_non_finite += other.ignored_non_finite;
        self.ignored_no_data += other.ignored_no_data;
    }
}

/// Typed access to the last synthesized report of a
/// [`StreamingStatisticsFilter`], usable after the filter moved into a
/// pipeline.
#[derive(Debug, Clone, Default)]
pub struct StatisticsHandle(Arc<Mutex<Option<StatisticsReport>>>);

impl StatisticsHandle {
    /// Report of the last completed run.
    pub fn report(&self) -> Option<StatisticsReport> {
        self.0.lock().clone()
    }
}

/// Pass-through filter computing per band min, max, mean and variance over
/// everything streamed through it.
#[derive(Debug, Default)]
pub struct StreamingStatisticsFilter {
    no_data: Option<f64>,
    slots: RwLock<Vec<CachePadded<Mutex<Accumulator>>>>,
    result: StatisticsHandle,
}

impl StreamingStatisticsFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip samples equal to `value`, overriding the input's own no-data value.
    pub fn with_no_data(mut self, value: f64) -> Self {
        self.no_data = Some(value);
        self
    }

    /// Handle on the synthesized report.
    pub fn handle(&self) -> StatisticsHandle {
        self.result.clone()
    }

    fn reduce(&self) -> StatisticsReport {
        let mut total = Accumulator::default();
        for slot in self.slots.read().iter() {
            total.merge(&slot.lock());
        }
        StatisticsReport {
            bands: total.bands.iter().map(BandAccumulator::finish).collect(),
            ignored_non_finite: total.ignored_non_finite,
            ignored_no_data: total.ignored_no_data,
        }
    }
}

impl Filter for StreamingStatisticsFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::builder("streaming_statistics", "Streaming Statistics")
            .description("Per band min, max, mean and variance over the streamed image")
            .input(InputDefinition::new("image"))
            .parameter("no_data", "Value ignored in the statistics", None)
            .persistent()
            .build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        Ok(vec![inputs[0].clone()])
    }

    fn before_generate(&self, _region: &ImageRegion, threads: usize) -> Result<(), ComputeError> {
        let mut slots = self.slots.write();
        while slots.len() < threads {
            slots.push(CachePadded::new(Mutex::new(Accumulator::default())));
        }
        Ok(())
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], thread: usize) -> Result<(), ComputeError> {
        let output = output_tile(outputs, 0)?;
        let input = inputs.buffer(0)?;
        output.copy_from(input).map_err(|e| ComputeError::new(e.to_string()))?;

        let no_data = self.no_data.or_else(|| inputs.info(0).and_then(|info| info.no_data));
        let bands = input.components();
        let slots = self.slots.read();
        let slot = slots
            .get(thread)
            .ok_or_else(|| ComputeError::new(format!("no accumulator for thread {}", thread)))?;
        let mut acc = slot.lock();
        if acc.bands.len() < bands {
            acc.bands.resize(bands, BandAccumulator::default());
        }

        let mut pixel = vec![0.0; bands];
        let region = output.region();
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                if !input.pixel_f64(x, y, &mut pixel) {
                    return Err(missing_pixel(0, x, y));
                }
                for (band, &value) in pixel.iter().enumerate() {
                    if !value.is_finite() {
                        acc.ignored_non_finite += 1;
                    } else if no_data == Some(value) {
                        acc.ignored_no_data += 1;
                    } else {
                        acc.bands[band].add(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn reset(&self) {
        self.slots.write().clear();
        *self.result.0.lock() = None;
    }

    fn synthesize(&self) -> Option<serde_json::Value> {
        let report = self.reduce();
        let value = serde_json::to_value(&report).ok();
        *self.result.0.lock() = Some(report);
        value
    }
}
