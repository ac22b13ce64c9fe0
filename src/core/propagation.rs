//! Mapping requested output regions to required input regions.
//!
//! Every filter input declares a [`Propagation`]; the pipeline resolves it
//! against the input's largest possible region with the filter's
//! [`EdgePolicy`] before pulling upstream.

use crate::core::error::RegionError;
use crate::core::region::ImageRegion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What a filter does when the region it needs extends past its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Crop to the input extent and work with a smaller window at borders.
    #[default]
    CropAndTolerate,
    /// Fail with `RegionUnavailable`.
    Strict,
}

impl EdgePolicy {
    /// Region to actually pull from an input whose extent is `available`.
    ///
    /// Returns `None` when the requirement cannot be satisfied: under
    /// [`EdgePolicy::Strict`] when it sticks out of `available`, under either
    /// policy when a non-empty requirement is disjoint from it.
    pub fn resolve(&self, required: &ImageRegion, available: &ImageRegion) -> Option<ImageRegion> {
        if required.is_empty() {
            return Some(*required);
        }
        match self {
            EdgePolicy::Strict if !required.is_inside(available) => None,
            _ => {
                let cropped = required.crop(available);
                (!cropped.is_empty()).then_some(cropped)
            }
        }
    }
}

/// User-defined propagation for inputs the built-in variants do not cover.
pub trait RegionPropagator: Send + Sync {
    /// Unclipped input region needed to produce `output`.
    fn input_region(&self, output: &ImageRegion, input_largest: &ImageRegion) -> Result<ImageRegion, RegionError>;
}

/// How one filter input relates output regions to input regions.
#[derive(Clone, Default)]
pub enum Propagation {
    /// Same region (point-wise filters).
    #[default]
    Identity,
    /// Output region padded by `radius` pixels.
    Neighborhood { radius: [u64; 2] },
    /// Output region padded by `radius + search_radius` pixels.
    Search {
        radius: [u64; 2],
        search_radius: [u64; 2],
    },
    /// Input grid coarser than the output by `factor` per dimension.
    Subsampled { factor: [u64; 2] },
    /// Always the whole input.
    Full,
    /// Delegated to a custom propagator.
    Custom(Arc<dyn RegionPropagator>),
}

impl Propagation {
    /// Square neighborhood.
    pub fn neighborhood(radius: u64) -> Self {
        Propagation::Neighborhood {
            radius: [radius, radius],
        }
    }

    /// Unclipped input region needed to produce `output`.
    pub fn input_region(&self, output: &ImageRegion, input_largest: &ImageRegion) -> Result<ImageRegion, RegionError> {
        if output.is_empty() {
            return Ok(*output);
        }
        match self {
            Propagation::Identity => Ok(*output),
            Propagation::Neighborhood { radius } => output.pad(radius),
            Propagation::Search { radius, search_radius } => {
                let total = [
                    radius[0].checked_add(search_radius[0]).ok_or(RegionError::Overflow {
                        dimension: 0,
                        operation: "pad",
                    })?,
                    radius[1].checked_add(search_radius[1]).ok_or(RegionError::Overflow {
                        dimension: 1,
                        operation: "pad",
                    })?,
                ];
                output.pad(&total)
            }
            Propagation::Subsampled { factor } => subsample(output, factor),
            Propagation::Full => Ok(*input_largest),
            Propagation::Custom(propagator) => propagator.input_region(output, input_largest),
        }
    }
}

/// Smallest coarse-grid region covering `output` (floor of start, ceiling of end).
fn subsample(output: &ImageRegion, factor: &[u64; 2]) -> Result<ImageRegion, RegionError> {
    let mut index = [0i64; 2];
    let mut size = [0u64; 2];
    for d in 0..2 {
        let f = factor[d].max(1) as i128;
        let start = (output.index()[d] as i128).div_euclid(f);
        let end = (output.index()[d] as i128 + output.size()[d] as i128 + f - 1).div_euclid(f);
        index[d] = start as i64;
        size[d] = u64::try_from(end - start).map_err(|_| RegionError::Overflow {
            dimension: d,
            operation: "subsample",
        })?;
    }
    ImageRegion::try_new(index, size)
}

impl fmt::Debug for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Identity => f.write_str("Identity"),
            Propagation::Neighborhood { radius } => f.debug_struct("Neighborhood").field("radius", radius).finish(),
            Propagation::Search { radius, search_radius } => f
                .debug_struct("Search")
                .field("radius", radius)
                .field("search_radius", search_radius)
                .finish(),
            Propagation::Subsampled { factor } => f.debug_struct("Subsampled").field("factor", factor).finish(),
            Propagation::Full => f.write_str("Full"),
            Propagation::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: ImageRegion = ImageRegion::new_2d(0, 0, 10, 10);

    #[test]
    fn test_neighborhood_crops_at_border() {
        let output = ImageRegion::new_2d(0, 0, 1, 1);
        let required = Propagation::neighborhood(2).input_region(&output, &IMAGE).unwrap();
        assert_eq!(
            EdgePolicy::CropAndTolerate.resolve(&required, &IMAGE),
            Some(ImageRegion::new_2d(0, 0, 3, 3))
        );
        assert_eq!(EdgePolicy::Strict.resolve(&required, &IMAGE), None);
    }

    #[test]
    fn test_full_request_covers_full_input() {
        let required = Propagation::neighborhood(3).input_region(&IMAGE, &IMAGE).unwrap();
        assert_eq!(EdgePolicy::CropAndTolerate.resolve(&required, &IMAGE), Some(IMAGE));
    }

    #[test]
    fn test_search_adds_radii() {
        let output = ImageRegion::new_2d(4, 4, 2, 2);
        let propagation = Propagation::Search {
            radius: [1, 1],
            search_radius: [2, 0],
        };
        assert_eq!(
            propagation.input_region(&output, &IMAGE).unwrap(),
            ImageRegion::new_2d(1, 3, 8, 4)
        );
    }

    #[test]
    fn test_subsampled_rounds_outwards() {
        let propagation = Propagation::Subsampled { factor: [4, 4] };
        let output = ImageRegion::new_2d(3, 4, 6, 4);
        assert_eq!(
            propagation.input_region(&output, &IMAGE).unwrap(),
            ImageRegion::new_2d(0, 1, 3, 1)
        );
        let negative = ImageRegion::new_2d(-1, 0, 1, 1);
        assert_eq!(
            propagation.input_region(&negative, &IMAGE).unwrap(),
            ImageRegion::new_2d(-1, 0, 1, 1)
        );
    }

    #[test]
    fn test_full_and_custom() {
        struct Shift;
        impl RegionPropagator for Shift {
            fn input_region(&self, output: &ImageRegion, _: &ImageRegion) -> Result<ImageRegion, RegionError> {
                Ok(ImageRegion::new_2d(output.x() + 1, output.y(), output.width(), output.height()))
            }
        }
        let output = ImageRegion::new_2d(2, 2, 2, 2);
        assert_eq!(Propagation::Full.input_region(&output, &IMAGE).unwrap(), IMAGE);
        assert_eq!(
            Propagation::Custom(Arc::new(Shift)).input_region(&output, &IMAGE).unwrap(),
            ImageRegion::new_2d(3, 2, 2, 2)
        );
    }

    #[test]
    fn test_disjoint_requirement_is_unavailable() {
        let far = ImageRegion::new_2d(50, 50, 2, 2);
        assert_eq!(EdgePolicy::CropAndTolerate.resolve(&far, &IMAGE), None);
        assert_eq!(
            EdgePolicy::Strict.resolve(&ImageRegion::default(), &IMAGE),
            Some(ImageRegion::default())
        );
    }
}
