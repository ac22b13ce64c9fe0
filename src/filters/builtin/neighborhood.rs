//! Neighborhood filters reading a square window around every output pixel.

use crate::core::buffer::AnyTileMut;
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::filter::{output_tile, Filter, FilterMetadata, GenerateInputs, InputDefinition};
use crate::core::info::ImageInfo;
use crate::core::pixel::PixelType;
use crate::core::propagation::{EdgePolicy, Propagation};
use crate::core::region::ImageRegion;
use crate::filters::builtin::point::missing_pixel;
use crate::filters::registry::{parse_params, FilterRegistry};
use serde::Deserialize;

/// Register neighborhood filters.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(LocalStatisticsFilter::new(1).metadata(), |params| {
        let params: LocalStatisticsParams = parse_params("local_statistics", params)?;
        let filter = LocalStatisticsFilter::new(params.radius);
        Ok(Box::new(if params.strict { filter.strict() } else { filter }))
    });
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LocalStatisticsParams {
    radius: u64,
    strict: bool,
}

impl Default for LocalStatisticsParams {
    fn default() -> Self {
        Self {
            radius: 1,
            strict: false,
        }
    }
}

/// Windowed mean and variance per band.
///
/// Output band `2b` holds the mean and `2b + 1` the population variance of
/// input band `b` over the `(2r + 1)²` window. At image borders the window is
/// cropped to the image, unless the filter is strict, in which case requests
/// whose window leaves the image fail.
#[derive(Debug, Clone)]
pub struct LocalStatisticsFilter {
    radius: u64,
    edge_policy: EdgePolicy,
}

impl LocalStatisticsFilter {
    pub fn new(radius: u64) -> Self {
        Self {
            radius,
            edge_policy: EdgePolicy::CropAndTolerate,
        }
    }

    /// Fail instead of shrinking the window at borders.
    pub fn strict(mut self) -> Self {
        self.edge_policy = EdgePolicy::Strict;
        self
    }

    pub fn radius(&self) -> u64 {
        self.radius
    }
}

impl Filter for LocalStatisticsFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::builder("local_statistics", "Local Statistics")
            .description("Mean and variance of every band over a square window")
            .input(InputDefinition::new("image"))
            .parameter("radius", "Half size of the window", Some("1"))
            .parameter("strict", "Fail at image borders instead of cropping the window", Some("false"))
            .build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        let input = &inputs[0];
        Ok(vec![input
            .clone()
            .with_pixel_type(PixelType::F64)
            .with_components(input.components * 2)])
    }

    fn input_propagation(&self, _input: usize) -> Propagation {
        Propagation::neighborhood(self.radius)
    }

    fn edge_policy(&self) -> EdgePolicy {
        self.edge_policy
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
        let output = output_tile(outputs, 0)?;
        let input = inputs.buffer(0)?;
        let bounds = input.requested_region();
        let bands = input.components();
        let radius = self.radius as i64;

        let mut pixel = vec![0.0; bands];
        let mut sums = vec![0.0; bands];
        let mut squares = vec![0.0; bands];
        let mut result = vec![0.0; bands * 2];

        let region = output.region();
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                let side = 2 * self.radius + 1;
                let window = ImageRegion::new_2d(x - radius, y - radius, side, side).crop(&bounds);
                sums.iter_mut().for_each(|s| *s = 0.0);
                squares.iter_mut().for_each(|s| *s = 0.0);

                for wy in window.y()..window.y() + window.height() as i64 {
                    for wx in window.x()..window.x() + window.width() as i64 {
                        if !input.pixel_f64(wx, wy, &mut pixel) {
                            return Err(missing_pixel(0, wx, wy));
                        }
                        for b in 0..bands {
                            sums[b] += pixel[b];
                            squares[b] += pixel[b] * pixel[b];
                        }
                    }
                }

                let count = (window.width() * window.height()) as f64;
                for b in 0..bands {
                    let mean = sums[b] / count;
                    result[2 * b] = mean;
                    result[2 * b + 1] = (squares[b] / count - mean * mean).max(0.0);
                }
                output.set_pixel_f64(x, y, &result);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::error::PipelineError;
    use crate::core::source::{FunctionSource, MemorySource};
    use crate::pipeline::{NodeState, Pipeline};

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::new().with_threads(3).with_min_piece_size(1)).unwrap()
    }

    #[test]
    fn test_constant_image() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(6, 6, 4u8).unwrap());
        let stats = p.add_filter(LocalStatisticsFilter::new(2));
        p.connect(source, stats, 0).unwrap();
        let out = p.pull(stats, ImageRegion::from_size([6, 6])).unwrap();
        assert_eq!(out.components(), 2);
        assert_eq!(out.value_f64(0, 0, 0), Some(4.0));
        assert_eq!(out.value_f64(3, 3, 1), Some(0.0));
    }

    #[test]
    fn test_window_cropped_at_border() {
        let mut p = pipeline();
        let source = FunctionSource::new(ImageRegion::from_size([10, 10]), PixelType::F32, 1, |x, _, _| x as f64);
        let log = source.request_log();
        let source = p.add_source(source);
        let stats = p.add_filter(LocalStatisticsFilter::new(1));
        p.connect(source, stats, 0).unwrap();

        let out = p.pull(stats, ImageRegion::new_2d(0, 0, 2, 2)).unwrap();
        assert_eq!(log.last(), Some(ImageRegion::new_2d(0, 0, 3, 3)));
        // Window of (0, 0) covers columns 0 and 1.
        assert_eq!(out.value_f64(0, 0, 0), Some(0.5));
        assert_eq!(out.value_f64(0, 0, 1), Some(0.25));
        assert_eq!(out.value_f64(1, 1, 0), Some(1.0));
    }

    #[test]
    fn test_strict_border_fails() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(10, 10, 1u8).unwrap());
        let stats = p.add_filter(LocalStatisticsFilter::new(2).strict());
        p.connect(source, stats, 0).unwrap();

        let inner = ImageRegion::new_2d(2, 2, 6, 6);
        p.pull(stats, inner).unwrap();
        let err = p.pull(stats, ImageRegion::new_2d(0, 0, 4, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::RegionUnavailable { node, .. } if node == stats));
        assert_eq!(p.state(stats).unwrap(), NodeState::DataValid(inner));
    }
}
