//! Output metadata computed before any pixel flows.

use crate::core::pixel::PixelType;
use crate::core::region::ImageRegion;
use serde::{Deserialize, Serialize};

/// Metadata of a node output: extent, pixel layout and geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Full extent that can ever be produced.
    pub largest_region: ImageRegion,
    /// Element type of the output.
    pub pixel_type: PixelType,
    /// Elements per pixel.
    pub components: usize,
    /// Physical pixel spacing.
    #[serde(default = "default_spacing")]
    pub spacing: [f64; 2],
    /// Physical position of the first pixel.
    #[serde(default)]
    pub origin: [f64; 2],
    /// Value marking missing pixels, if any.
    #[serde(default)]
    pub no_data: Option<f64>,
}

fn default_spacing() -> [f64; 2] {
    [1.0, 1.0]
}

impl ImageInfo {
    /// Info with unit spacing and zero origin.
    pub fn new(largest_region: ImageRegion, pixel_type: PixelType, components: usize) -> Self {
        Self {
            largest_region,
            pixel_type,
            components,
            spacing: default_spacing(),
            origin: [0.0, 0.0],
            no_data: None,
        }
    }

    /// Set the pixel type.
    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    /// Set the component count.
    pub fn with_components(mut self, components: usize) -> Self {
        self.components = components;
        self
    }

    /// Set the largest possible region.
    pub fn with_largest_region(mut self, region: ImageRegion) -> Self {
        self.largest_region = region;
        self
    }

    /// Set spacing and origin.
    pub fn with_geometry(mut self, spacing: [f64; 2], origin: [f64; 2]) -> Self {
        self.spacing = spacing;
        self.origin = origin;
        self
    }

    /// Set the no-data value.
    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = no_data;
        self
    }

    /// Bytes used by one pixel of this output.
    pub fn bytes_per_pixel(&self) -> u64 {
        (self.pixel_type.size_of() * self.components) as u64
    }
}
