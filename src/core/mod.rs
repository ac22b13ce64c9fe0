//! Core types and traits for the rasterpipe pipeline.
//!
//! This module contains the foundational types the pipeline is built from:
//! - Regions and their set arithmetic
//! - Pixel element types and region-addressed buffers
//! - Output metadata and region propagation rules
//! - The filter and source traits
//! - Error types and configuration

pub mod buffer;
pub mod config;
pub mod error;
pub mod filter;
pub mod info;
pub mod pixel;
pub mod propagation;
pub mod region;
pub mod source;

// Re-export commonly used types
pub use buffer::{AnyBuffer, AnyTileMut, ImageBuffer, TileMut};
pub use config::{ChainConfig, FilterStep, PipelineConfig, StreamingConfig};
pub use error::{
    BufferError, ComputeError, ConfigurationError, ExecutionError, NodeId, PipelineError, PipelineResult,
    RegionError,
};
pub use filter::{Filter, FilterMetadata, GenerateInputs, InputDefinition};
pub use info::ImageInfo;
pub use pixel::{Pixel, PixelType};
pub use propagation::{EdgePolicy, Propagation, RegionPropagator};
pub use region::{ImageRegion, Region};
pub use source::{FunctionSource, MemorySource, RasterSource, RequestLog};
