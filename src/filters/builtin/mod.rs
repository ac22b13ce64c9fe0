//! Built-in filter implementations.
//!
//! Demonstration leaf filters covering each kind of region propagation:
//! point-wise, neighborhood, search window, asymmetric multi-resolution
//! inputs and persistent accumulation.

pub mod mask;
pub mod neighborhood;
pub mod point;
pub mod registration;
pub mod spectral;
pub mod statistics;

use crate::filters::registry::FilterRegistry;

/// Register all built-in filters.
pub fn register_all(registry: &mut FilterRegistry) {
    point::register(registry);
    spectral::register(registry);
    neighborhood::register(registry);
    registration::register(registry);
    mask::register(registry);
    statistics::register(registry);
}

// Re-export for direct access
pub use mask::CoarseMaskFilter;
pub use neighborhood::LocalStatisticsFilter;
pub use point::{BandMathFilter, ShiftScaleFilter};
pub use registration::FineRegistrationFilter;
pub use spectral::SpectralAngleDistanceFilter;
pub use statistics::{BandStatistics, StatisticsHandle, StatisticsReport, StreamingStatisticsFilter};
