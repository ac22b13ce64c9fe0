//! Spectral angle distance to a reference spectrum.

use crate::core::buffer::AnyTileMut;
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::filter::{invalid_parameter, output_tile, Filter, FilterMetadata, GenerateInputs, InputDefinition};
use crate::core::info::ImageInfo;
use crate::core::pixel::PixelType;
use crate::filters::builtin::point::missing_pixel;
use crate::filters::registry::{parse_params, FilterRegistry};
use serde::Deserialize;

/// Register spectral filters.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(SpectralAngleDistanceFilter::new(vec![1.0]).metadata(), |params| {
        let params: SpectralAngleParams = parse_params("spectral_angle", params)?;
        Ok(Box::new(SpectralAngleDistanceFilter::new(params.reference)))
    });
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpectralAngleParams {
    reference: Vec<f64>,
}

/// Angle in radians between each pixel vector and a reference spectrum.
///
/// The output is a single `f64` band in `[0, pi]`; pixels with a null
/// spectrum get 0.
#[derive(Debug, Clone)]
pub struct SpectralAngleDistanceFilter {
    reference: Vec<f64>,
    reference_norm: f64,
}

impl SpectralAngleDistanceFilter {
    pub fn new(reference: Vec<f64>) -> Self {
        let reference_norm = reference.iter().map(|v| v * v).sum::<f64>().sqrt();
        Self {
            reference,
            reference_norm,
        }
    }

    /// Angle between `pixel` and the reference.
    pub fn angle(&self, pixel: &[f64]) -> f64 {
        let dot: f64 = pixel.iter().zip(&self.reference).map(|(a, b)| a * b).sum();
        let norm = pixel.iter().map(|v| v * v).sum::<f64>().sqrt();
        let denominator = norm * self.reference_norm;
        if denominator == 0.0 {
            return 0.0;
        }
        (dot / denominator).clamp(-1.0, 1.0).acos()
    }
}

impl Filter for SpectralAngleDistanceFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::builder("spectral_angle", "Spectral Angle Distance")
            .description("Angle between every pixel spectrum and a reference spectrum")
            .input(InputDefinition::new("image"))
            .parameter("reference", "Reference spectrum, one value per band", None)
            .build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        if self.reference.is_empty() {
            return Err(invalid_parameter("reference", "reference spectrum is empty"));
        }
        let input = &inputs[0];
        if input.components != self.reference.len() {
            return Err(ConfigurationError::ComponentMismatch {
                input: 0,
                expected: self.reference.len(),
                got: input.components,
            });
        }
        Ok(vec![input.clone().with_pixel_type(PixelType::F64).with_components(1)])
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
        let output = output_tile(outputs, 0)?;
        let input = inputs.buffer(0)?;
        let mut pixel = vec![0.0; input.components()];
        let region = output.region();
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                if !input.pixel_f64(x, y, &mut pixel) {
                    return Err(missing_pixel(0, x, y));
                }
                output.set_f64(x, y, 0, self.angle(&pixel));
            }
        }
        Ok(())
    }
}
