//! # rasterpipe - Tiled streaming image pipelines
//!
//! rasterpipe is a demand-driven image processing pipeline. Filters are
//! wired into a DAG; asking a node for a region pulls exactly the input
//! regions it needs from upstream, computes the output with a pool of worker
//! threads, and caches the result until the node is modified.
//!
//! ## Features
//!
//! - **Region propagation**: identity, neighborhood, search window,
//!   subsampled and custom mappings from output to input regions
//! - **Lazy pull**: metadata flows before pixels; satisfied regions are never
//!   recomputed
//! - **Parallel generation**: every filter update is split across a rayon
//!   pool with deterministic results
//! - **Streaming**: images larger than memory are processed piece by piece
//!   within a byte budget
//! - **Persistent filters**: statistics accumulated across streamed pieces
//! - **Multiple outputs**: a filter may produce several images at once;
//!   edges connect one output of a node to one input of another
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rasterpipe::prelude::*;
//!
//! let mut pipeline = Pipeline::new(PipelineConfig::new().with_threads(4))?;
//! let source = pipeline.add_source(ImageFileSource::open("input.png")?);
//! let smooth = pipeline.add_filter(LocalStatisticsFilter::new(2));
//! pipeline.connect(source, smooth, 0)?;
//!
//! // Pull one region
//! let tile = pipeline.pull(smooth, ImageRegion::new_2d(0, 0, 64, 64))?;
//!
//! // Or stream the whole image within 16 MB pieces
//! let mode = StreamingMode::RamDriven { budget_bytes: 16 << 20 };
//! let mut sink = MemorySink::new();
//! stream(&mut pipeline, smooth, &mut sink, &StreamingOptions::new(StreamingConfig::new(mode)))?;
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: regions, pixel buffers, metadata, the `Filter` and
//!   `RasterSource` traits, configuration and errors
//! - [`pipeline`]: the node arena and the pull protocol
//! - [`execution`]: threaded executor, streaming splitter and driver
//! - [`filters`]: filter registry and built-in filters
//! - [`io`]: image file source and sink
//!
//! ## Creating Custom Filters
//!
//! Implement the [`Filter`](core::filter::Filter) trait:
//!
//! ```rust,ignore
//! use rasterpipe::prelude::*;
//!
//! struct Invert;
//!
//! impl Filter for Invert {
//!     fn metadata(&self) -> FilterMetadata {
//!         FilterMetadata::builder("invert", "Invert")
//!             .input(InputDefinition::new("image").accepting(&[PixelType::U8]))
//!             .build()
//!     }
//!
//!     fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
//!         Ok(vec![inputs[0].clone()])
//!     }
//!
//!     fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
//!         let input = inputs.buffer(0)?;
//!         let output = output_tile(outputs, 0)?;
//!         let region = output.region();
//!         for y in region.y()..region.y() + region.height() as i64 {
//!             for x in region.x()..region.x() + region.width() as i64 {
//!                 let v = input.value_f64(x, y, 0).unwrap_or(0.0);
//!                 output.set_f64(x, y, 0, 255.0 - v);
//!             }
//!         }
//!         Ok(())
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod filters;
pub mod io;
pub mod pipeline;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use rasterpipe::prelude::*;
/// ```
pub mod prelude {
    // Geometry and pixels
    pub use crate::core::buffer::{AnyBuffer, AnyTileMut, ImageBuffer, TileMut};
    pub use crate::core::info::ImageInfo;
    pub use crate::core::pixel::{Pixel, PixelType};
    pub use crate::core::region::{ImageRegion, Region};

    // Filters and sources
    pub use crate::core::filter::{output_tile, Filter, FilterMetadata, GenerateInputs, InputDefinition, OutputDefinition};
    pub use crate::core::propagation::{EdgePolicy, Propagation, RegionPropagator};
    pub use crate::core::source::{FunctionSource, MemorySource, RasterSource, RequestLog};

    // Configuration
    pub use crate::core::config::{ChainConfig, FilterStep, PipelineConfig, StreamingConfig};

    // Errors
    pub use crate::core::error::{
        BufferError, ComputeError, ConfigurationError, NodeId, PipelineError, PipelineResult, RegionError,
    };

    // Pipeline
    pub use crate::pipeline::{NodeKind, NodeState, NodeStats, OutputPort, OutputSlot, Pipeline};

    // Execution
    pub use crate::execution::progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
    pub use crate::execution::splitter::{StreamingMode, StreamingSplitter};
    pub use crate::execution::streaming::{stream, MemorySink, RegionSink, StreamingOptions, StreamingReport};
    pub use crate::execution::ThreadedExecutor;

    // Filters
    pub use crate::filters::registry::{FilterFactory, FilterRegistry, RegistryEntry};
    pub use crate::filters::builtin::{
        BandMathFilter, CoarseMaskFilter, FineRegistrationFilter, LocalStatisticsFilter, ShiftScaleFilter,
        SpectralAngleDistanceFilter, StatisticsHandle, StatisticsReport, StreamingStatisticsFilter,
    };

    // I/O
    pub use crate::io::{ImageFileSink, ImageFileSource};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "rasterpipe");
    }

    #[test]
    fn test_chain_from_registry() {
        let registry = FilterRegistry::with_builtins();
        let chain = ChainConfig::from_toml_str(
            r#"
            [pipeline]
            num_threads = 2

            [[filter]]
            type = "shift_scale"
            scale = 2.0

            [[filter]]
            type = "local_statistics"
            radius = 1
            "#,
        )
        .unwrap();

        let mut pipeline = Pipeline::new(chain.pipeline.clone()).unwrap();
        let mut last = pipeline.add_source(MemorySource::constant(8, 8, 3u8).unwrap());
        for step in &chain.filters {
            let filter = pipeline.add_boxed_filter(registry.create(&step.filter_type, &step.params).unwrap());
            pipeline.connect(last, filter, 0).unwrap();
            last = filter;
        }

        let out = pipeline.pull(last, ImageRegion::from_size([8, 8])).unwrap();
        assert_eq!(out.components(), 2);
        assert_eq!(out.value_f64(0, 0, 0), Some(6.0));
        assert_eq!(out.value_f64(4, 4, 1), Some(0.0));
    }
}
