//! Masking a full-resolution image with a coarser label map.

use crate::core::buffer::AnyTileMut;
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::filter::{invalid_parameter, output_tile, Filter, FilterMetadata, GenerateInputs, InputDefinition};
use crate::core::info::ImageInfo;
use crate::core::propagation::Propagation;
use crate::filters::builtin::point::missing_pixel;
use crate::filters::registry::{parse_params, FilterRegistry};
use serde::Deserialize;

/// Register mask filters.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(CoarseMaskFilter::new(2).metadata(), |params| {
        let params: CoarseMaskParams = parse_params("coarse_mask", params)?;
        Ok(Box::new(CoarseMaskFilter::new(params.factor).with_fill(params.fill)))
    });
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CoarseMaskParams {
    factor: u64,
    fill: f64,
}

impl Default for CoarseMaskParams {
    fn default() -> Self {
        Self { factor: 2, fill: 0.0 }
    }
}

/// Keeps image pixels whose cell in a coarser mask is non-zero and replaces
/// the others with a fill value.
///
/// Mask cell `(i, j)` covers image pixels `[i * factor, (i + 1) * factor)`
/// along x and likewise along y. The two inputs are pulled for different
/// regions: the image for the output region, the mask for the coarse cells
/// covering it.
#[derive(Debug, Clone)]
pub struct CoarseMaskFilter {
    factor: u64,
    fill: f64,
}

impl CoarseMaskFilter {
    pub fn new(factor: u64) -> Self {
        Self { factor, fill: 0.0 }
    }

    /// Value written where the mask is zero.
    pub fn with_fill(mut self, fill: f64) -> Self {
        self.fill = fill;
        self
    }
}

impl Filter for CoarseMaskFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::builder("coarse_mask", "Coarse Mask")
            .description("Mask an image with a label map subsampled by an integer factor")
            .input(InputDefinition::new("image"))
            .input(InputDefinition::new("mask"))
            .parameter("factor", "Image pixels per mask cell along each axis", Some("2"))
            .parameter("fill", "Value written where the mask is zero", Some("0.0"))
            .build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        if self.factor == 0 {
            return Err(invalid_parameter("factor", "factor must be at least 1"));
        }
        let (image, mask) = (&inputs[0], &inputs[1]);
        if mask.components != 1 {
            return Err(ConfigurationError::ComponentMismatch {
                input: 1,
                expected: 1,
                got: mask.components,
            });
        }
        let needed = self
            .input_propagation(1)
            .input_region(&image.largest_region, &mask.largest_region)
            .map_err(|e| ConfigurationError::Other(e.to_string()))?;
        if !needed.is_inside(&mask.largest_region) {
            return Err(ConfigurationError::ExtentMismatch {
                input: 1,
                expected: needed,
                got: mask.largest_region,
            });
        }
        Ok(vec![image.clone()])
    }

    fn input_propagation(&self, input: usize) -> Propagation {
        if input == 0 {
            Propagation::Identity
        } else {
            Propagation::Subsampled {
                factor: [self.factor, self.factor],
            }
        }
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
        let output = output_tile(outputs, 0)?;
        let image = inputs.buffer(0)?;
        let mask = inputs.buffer(1)?;
        let factor = self.factor as i64;
        let mut pixel = vec![0.0; image.components()];

        let region = output.region();
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                let (mx, my) = (x.div_euclid(factor), y.div_euclid(factor));
                let label = mask.value_f64(mx, my, 0).ok_or_else(|| missing_pixel(1, mx, my))?;
                if label != 0.0 {
                    if !image.pixel_f64(x, y, &mut pixel) {
                        return Err(missing_pixel(0, x, y));
                    }
                } else {
                    pixel.iter_mut().for_each(|v| *v = self.fill);
                }
                output.set_pixel_f64(x, y, &pixel);
            }
        }
        Ok(())
    }
}
