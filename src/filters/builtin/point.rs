//! Point-wise filters: every output pixel depends on the same pixel of the
//! inputs only.

use crate::core::buffer::AnyTileMut;
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::filter::{common_extent, invalid_parameter, output_tile, Filter, FilterMetadata, GenerateInputs, InputDefinition};
use crate::core::info::ImageInfo;
use crate::core::pixel::PixelType;
use crate::filters::registry::{parse_params, FilterRegistry};
use serde::Deserialize;
use std::sync::Arc;

/// Register point-wise filters.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(ShiftScaleFilter::new(1.0, 0.0).metadata(), |params| {
        let params: ShiftScaleParams = parse_params("shift_scale", params)?;
        Ok(Box::new(
            ShiftScaleFilter::new(params.scale, params.shift).with_output_type(params.output_type),
        ))
    });
    registry.register(BandMathFilter::sum(2).metadata(), |params| {
        let params: BandMathParams = parse_params("band_math", params)?;
        Ok(Box::new(
            BandMathFilter::with_reducer(params.inputs, &params.reducer)?.with_output_type(params.output_type),
        ))
    });
}

fn default_output_type() -> PixelType {
    PixelType::F64
}

pub(crate) fn missing_pixel(input: usize, x: i64, y: i64) -> ComputeError {
    ComputeError::new(format!("input {} has no pixel at ({}, {})", input, x, y))
}

// ============================================================================
// Shift / scale
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ShiftScaleParams {
    scale: f64,
    shift: f64,
    output_type: PixelType,
}

impl Default for ShiftScaleParams {
    fn default() -> Self {
        Self {
            scale: 1.0,
            shift: 0.0,
            output_type: default_output_type(),
        }
    }
}

/// `out = in * scale + shift`, band by band.
#[derive(Debug, Clone)]
pub struct ShiftScaleFilter {
    scale: f64,
    shift: f64,
    output_type: PixelType,
}

impl ShiftScaleFilter {
    /// Scale then shift, writing `f64` pixels.
    pub fn new(scale: f64, shift: f64) -> Self {
        Self {
            scale,
            shift,
            output_type: default_output_type(),
        }
    }

    /// Write `pixel_type` pixels; values saturate to its range.
    pub fn with_output_type(mut self, pixel_type: PixelType) -> Self {
        self.output_type = pixel_type;
        self
    }
}

impl Filter for ShiftScaleFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::builder("shift_scale", "Shift Scale")
            .description("Multiply every band by a scale, then add a shift")
            .input(InputDefinition::new("image"))
            .parameter("scale", "Multiplier", Some("1.0"))
            .parameter("shift", "Offset added after scaling", Some("0.0"))
            .parameter("output_type", "Output pixel type", Some("f64"))
            .build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        if !self.scale.is_finite() || !self.shift.is_finite() {
            return Err(invalid_parameter("scale", "scale and shift must be finite"));
        }
        Ok(vec![inputs[0].clone().with_pixel_type(self.output_type)])
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
        let output = output_tile(outputs, 0)?;
        let input = inputs.buffer(0)?;
        let bands = output.components();
        let mut pixel = vec![0.0; bands];
        let region = output.region();
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                if !input.pixel_f64(x, y, &mut pixel) {
                    return Err(missing_pixel(0, x, y));
                }
                for value in pixel.iter_mut() {
                    *value = *value * self.scale + self.shift;
                }
                output.set_pixel_f64(x, y, &pixel);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Band math
// ============================================================================

/// Per-pixel function over the concatenated bands of every input.
pub type BandFunction = dyn Fn(&[f64]) -> f64 + Send + Sync;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BandMathParams {
    inputs: usize,
    reducer: String,
    output_type: PixelType,
}

impl Default for BandMathParams {
    fn default() -> Self {
        Self {
            inputs: 2,
            reducer: "sum".to_string(),
            output_type: default_output_type(),
        }
    }
}

/// Single-band output computed from the values of one pixel across every
/// band of every input.
///
/// Inputs may have different pixel types and band counts but must share
/// their extent.
#[derive(Clone)]
pub struct BandMathFilter {
    inputs: usize,
    label: String,
    function: Arc<BandFunction>,
    output_type: PixelType,
}

impl std::fmt::Debug for BandMathFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandMathFilter")
            .field("inputs", &self.inputs)
            .field("label", &self.label)
            .field("output_type", &self.output_type)
            .finish()
    }
}

impl BandMathFilter {
    /// Apply `function` to the values of each pixel of `inputs` images.
    pub fn new<F>(inputs: usize, function: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            inputs: inputs.max(1),
            label: "custom".to_string(),
            function: Arc::new(function),
            output_type: default_output_type(),
        }
    }

    /// Sum of every value.
    pub fn sum(inputs: usize) -> Self {
        Self::new(inputs, |values| values.iter().sum()).labelled("sum")
    }

    /// Named reducer: `sum`, `mean`, `min`, `max`, `product`, `difference`
    /// (first value minus the others) or `normalized_difference` over the
    /// first two values.
    pub fn with_reducer(inputs: usize, reducer: &str) -> Result<Self, ConfigurationError> {
        let filter = match reducer {
            "sum" => Self::sum(inputs),
            "mean" => Self::new(inputs, |v| {
                if v.is_empty() {
                    f64::NAN
                } else {
                    v.iter().sum::<f64>() / v.len() as f64
                }
            }),
            "min" => Self::new(inputs, |v| v.iter().copied().fold(f64::INFINITY, f64::min)),
            "max" => Self::new(inputs, |v| v.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            "product" => Self::new(inputs, |v| v.iter().product()),
            "difference" => Self::new(inputs, |v| match v.split_first() {
                Some((first, rest)) => first - rest.iter().sum::<f64>(),
                None => 0.0,
            }),
            "normalized_difference" => Self::new(inputs, |v| match v {
                [a, b, ..] if a + b != 0.0 => (a - b) / (a + b),
                _ => 0.0,
            }),
            other => return Err(invalid_parameter("reducer", format!("unknown reducer '{}'", other))),
        };
        Ok(filter.labelled(reducer))
    }

    fn labelled(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Write `pixel_type` pixels.
    pub fn with_output_type(mut self, pixel_type: PixelType) -> Self {
        self.output_type = pixel_type;
        self
    }
}

impl Filter for BandMathFilter {
    fn metadata(&self) -> FilterMetadata {
        let mut builder = FilterMetadata::builder("band_math", "Band Math")
            .description("Combine the bands of several images pixel by pixel")
            .parameter("inputs", "Number of input images", Some("2"))
            .parameter("reducer", "sum, mean, min, max, product, difference or normalized_difference", Some("sum"))
            .parameter("output_type", "Output pixel type", Some("f64"));
        for i in 0..self.inputs {
            builder = builder.input(InputDefinition::new(format!("image{}", i)));
        }
        builder.build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        common_extent(inputs)?;
        Ok(vec![inputs[0].clone().with_pixel_type(self.output_type).with_components(1)])
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
        let output = output_tile(outputs, 0)?;
        let buffers = (0..inputs.len()).map(|i| inputs.buffer(i)).collect::<Result<Vec<_>, _>>()?;
        let total: usize = buffers.iter().map(|b| b.components()).sum();
        let mut values = vec![0.0; total];

        let region = output.region();
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                let mut offset = 0;
                for (i, buffer) in buffers.iter().enumerate() {
                    let bands = buffer.components();
                    if !buffer.pixel_f64(x, y, &mut values[offset..offset + bands]) {
                        return Err(missing_pixel(i, x, y));
                    }
                    offset += bands;
                }
                output.set_f64(x, y, 0, (self.function)(&values));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::{AnyBuffer, ImageBuffer};
    use crate::core::config::PipelineConfig;
    use crate::core::error::PipelineError;
    use crate::core::region::ImageRegion;
    use crate::core::source::MemorySource;
    use crate::pipeline::Pipeline;

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::new().with_threads(2).with_min_piece_size(1)).unwrap()
    }

    #[test]
    fn test_shift_scale_saturates() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(4, 4, 200u8).unwrap());
        let filter = p.add_filter(ShiftScaleFilter::new(2.0, 0.0).with_output_type(PixelType::U8));
        p.connect(source, filter, 0).unwrap();
        let buffer = p.pull(filter, ImageRegion::from_size([4, 4])).unwrap();
        assert_eq!(buffer.value_f64(3, 3, 0), Some(255.0));
    }

    #[test]
    fn test_shift_scale_keeps_bands() {
        let region = ImageRegion::from_size([3, 2]);
        let data: Vec<i16> = (0..12).collect();
        let buffer = AnyBuffer::from(ImageBuffer::from_vec(region, 2, data).unwrap());

        let mut p = pipeline();
        let source = p.add_source(MemorySource::new(buffer));
        let filter = p.add_filter(ShiftScaleFilter::new(-1.0, 0.5));
        p.connect(source, filter, 0).unwrap();
        let out = p.pull(filter, region).unwrap();
        assert_eq!(out.pixel_type(), PixelType::F64);
        assert_eq!(out.components(), 2);
        assert_eq!(out.value_f64(1, 1, 1), Some(-8.5));
    }

    #[test]
    fn test_band_math_mixed_types() {
        let mut p = pipeline();
        let a = p.add_source(MemorySource::constant(5, 5, 3u8).unwrap());
        let b = p.add_source(MemorySource::constant(5, 5, 0.25f32).unwrap());
        let sum = p.add_filter(BandMathFilter::sum(2));
        p.connect(a, sum, 0).unwrap();
        p.connect(b, sum, 1).unwrap();
        let out = p.pull(sum, ImageRegion::new_2d(1, 1, 3, 3)).unwrap();
        assert_eq!(out.value_f64(2, 2, 0), Some(3.25));
    }

    #[test]
    fn test_band_math_extent_mismatch() {
        let mut p = pipeline();
        let a = p.add_source(MemorySource::constant(5, 5, 3u8).unwrap());
        let b = p.add_source(MemorySource::constant(6, 5, 3u8).unwrap());
        let diff = p.add_filter(BandMathFilter::with_reducer(2, "difference").unwrap());
        p.connect(a, diff, 0).unwrap();
        p.connect(b, diff, 1).unwrap();
        let err = p.update_output_information(diff).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration {
                source: ConfigurationError::ExtentMismatch { input: 1, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_reducer() {
        assert!(matches!(
            BandMathFilter::with_reducer(2, "median"),
            Err(ConfigurationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_normalized_difference() {
        let filter = BandMathFilter::with_reducer(2, "normalized_difference").unwrap();
        assert_eq!((filter.function)(&[3.0, 1.0][..]), 0.5);
        assert_eq!((filter.function)(&[0.0, 0.0][..]), 0.0);
    }
}
