//! Block matching between a fixed and a moving image.

use crate::core::buffer::AnyTileMut;
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::filter::{Filter, FilterMetadata, GenerateInputs, InputDefinition};
use crate::core::info::ImageInfo;
use crate::core::pixel::PixelType;
use crate::core::propagation::Propagation;
use crate::core::region::ImageRegion;
use crate::filters::builtin::point::missing_pixel;
use crate::filters::registry::{parse_params, FilterRegistry};
use serde::Deserialize;

/// Register registration filters.
pub fn register(registry: &mut FilterRegistry) {
    registry.register(FineRegistrationFilter::new(2, 3).metadata(), |params| {
        let params: FineRegistrationParams = parse_params("fine_registration", params)?;
        Ok(Box::new(FineRegistrationFilter::new(params.radius, params.search_radius)))
    });
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FineRegistrationParams {
    radius: u64,
    search_radius: u64,
}

impl Default for FineRegistrationParams {
    fn default() -> Self {
        Self {
            radius: 2,
            search_radius: 3,
        }
    }
}

/// Best integer displacement of the moving image for every fixed pixel.
///
/// For each pixel the `(2r + 1)²` window of the fixed image is compared with
/// the moving image shifted by every displacement within the search radius.
/// The displacement with the lowest mean squared difference wins; ties go to
/// the smallest displacement, then to the first in row-major order.
///
/// Output 0 holds the displacement (`dx`, `dy`), output 1 the mean squared
/// difference of the winning match.
#[derive(Debug, Clone)]
pub struct FineRegistrationFilter {
    radius: u64,
    search_radius: u64,
}

impl FineRegistrationFilter {
    pub fn new(radius: u64, search_radius: u64) -> Self {
        Self { radius, search_radius }
    }

    /// Mean squared difference of the fixed window against the moving image
    /// shifted by `(dx, dy)`, or `None` when they do not overlap.
    fn window_msd(
        &self,
        inputs: &GenerateInputs<'_>,
        window: &ImageRegion,
        moving_bounds: &ImageRegion,
        shift: (i64, i64),
        scratch: &mut [f64],
    ) -> Result<Option<f64>, ComputeError> {
        let fixed = inputs.buffer(0)?;
        let moving = inputs.buffer(1)?;
        let bands = fixed.components();
        let (fixed_px, moving_px) = scratch.split_at_mut(bands);

        let mut sum = 0.0;
        let mut count = 0u64;
        for y in window.y()..window.y() + window.height() as i64 {
            for x in window.x()..window.x() + window.width() as i64 {
                let (mx, my) = (x + shift.0, y + shift.1);
                if !moving_bounds.contains_index(&[mx, my]) {
                    continue;
                }
                if !fixed.pixel_f64(x, y, fixed_px) {
                    return Err(missing_pixel(0, x, y));
                }
                if !moving.pixel_f64(mx, my, moving_px) {
                    return Err(missing_pixel(1, mx, my));
                }
                sum += fixed_px
                    .iter()
                    .zip(moving_px.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>();
                count += bands as u64;
            }
        }
        Ok((count > 0).then(|| sum / count as f64))
    }
}

impl Filter for FineRegistrationFilter {
    fn metadata(&self) -> FilterMetadata {
        FilterMetadata::builder("fine_registration", "Fine Registration")
            .description("Integer displacement field between a fixed and a moving image by block matching")
            .input(InputDefinition::new("fixed"))
            .input(InputDefinition::new("moving"))
            .output("displacement", "Best displacement as dx, dy")
            .output("metric", "Mean squared difference at the best displacement")
            .parameter("radius", "Half size of the matching window", Some("2"))
            .parameter("search_radius", "Largest displacement searched along each axis", Some("3"))
            .build()
    }

    fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
        let (fixed, moving) = (&inputs[0], &inputs[1]);
        if fixed.components != moving.components {
            return Err(ConfigurationError::ComponentMismatch {
                input: 1,
                expected: fixed.components,
                got: moving.components,
            });
        }
        let field = fixed.clone().with_pixel_type(PixelType::F64);
        Ok(vec![field.clone().with_components(2), field.with_components(1)])
    }

    fn input_propagation(&self, input: usize) -> Propagation {
        let radius = [self.radius, self.radius];
        if input == 0 {
            Propagation::Neighborhood { radius }
        } else {
            Propagation::Search {
                radius,
                search_radius: [self.search_radius, self.search_radius],
            }
        }
    }

    fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
        let count = outputs.len();
        let [displacement, metric] = outputs else {
            return Err(ComputeError::new(format!("expected 2 output tiles, got {}", count)));
        };
        let fixed_bounds = inputs.buffer(0)?.requested_region();
        let moving_bounds = inputs.buffer(1)?.requested_region();
        let mut scratch = vec![0.0; inputs.buffer(0)?.components() * 2];
        let radius = self.radius as i64;
        let search = self.search_radius as i64;
        let side = 2 * self.radius + 1;

        let region = displacement.region();
        for y in region.y()..region.y() + region.height() as i64 {
            for x in region.x()..region.x() + region.width() as i64 {
                let window = ImageRegion::new_2d(x - radius, y - radius, side, side).crop(&fixed_bounds);
                // (msd, |dx| + |dy|, dx, dy)
                let mut best: Option<(f64, i64, i64, i64)> = None;
                for dy in -search..=search {
                    for dx in -search..=search {
                        let Some(msd) = self.window_msd(inputs, &window, &moving_bounds, (dx, dy), &mut scratch)? else {
                            continue;
                        };
                        let norm = dx.abs() + dy.abs();
                        let better = match best {
                            None => true,
                            Some((b, n, _, _)) => msd < b || (msd == b && norm < n),
                        };
                        if better {
                            best = Some((msd, norm, dx, dy));
                        }
                    }
                }
                let (shift, msd) = match best {
                    Some((msd, _, dx, dy)) => ([dx as f64, dy as f64], msd),
                    None => ([0.0, 0.0], f64::NAN),
                };
                displacement.set_pixel_f64(x, y, &shift);
                metric.set_f64(x, y, 0, msd);
            }
        }
        Ok(())
    }
}
