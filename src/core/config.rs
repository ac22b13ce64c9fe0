//! Pipeline and streaming configuration.
//!
//! Plain structs with builder methods and `Default` values, loadable from TOML.
//!
//! ```toml
//! [pipeline]
//! num_threads = 4
//! max_buffer_bytes = 268435456
//!
//! [pipeline.streaming]
//! mode = { kind = "tiled", tile_size = 256 }
//!
//! [[filter]]
//! type = "shift_scale"
//! scale = 2.0
//! ```

use crate::core::error::PipelineResult;
use crate::core::region::ImageRegion;
use crate::execution::splitter::StreamingMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default minimum extent of a thread sub-region along the split dimension.
pub const DEFAULT_MIN_PIECE_SIZE: u64 = 8;

/// Default memory budget per streamed piece (64 MB).
pub const DEFAULT_STREAMING_BUDGET: u64 = 64 * 1024 * 1024;

/// Configuration of a [`Pipeline`](crate::pipeline::Pipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of worker threads (0 = auto).
    pub num_threads: usize,
    /// Largest single output buffer in bytes (None = unbounded).
    pub max_buffer_bytes: Option<u64>,
    /// Minimum extent of a thread sub-region along the split dimension.
    pub min_piece_size: u64,
    /// Streaming driver settings.
    pub streaming: StreamingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            max_buffer_bytes: None,
            min_piece_size: DEFAULT_MIN_PIECE_SIZE,
            streaming: StreamingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    /// Set the buffer limit in bytes.
    pub fn with_max_buffer_bytes(mut self, bytes: u64) -> Self {
        self.max_buffer_bytes = Some(bytes);
        self
    }

    /// Set the minimum thread sub-region extent.
    pub fn with_min_piece_size(mut self, size: u64) -> Self {
        self.min_piece_size = size.max(1);
        self
    }

    /// Set the streaming settings.
    pub fn with_streaming(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    /// Effective number of worker threads.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.num_threads
        }
    }

    /// Parse from a TOML document holding the fields at top level.
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file holding the fields at top level.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Settings of the streaming driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// How the full region is decomposed.
    pub mode: StreamingMode,
    /// Restrict streaming to this region (cropped to the image).
    pub region: Option<ImageRegion>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mode: StreamingMode::RamDriven {
                budget_bytes: DEFAULT_STREAMING_BUDGET,
            },
            region: None,
        }
    }
}

impl StreamingConfig {
    /// Stream with `mode`.
    pub fn new(mode: StreamingMode) -> Self {
        Self { mode, region: None }
    }

    /// Restrict streaming to `region`.
    pub fn with_region(mut self, region: ImageRegion) -> Self {
        self.region = Some(region);
        self
    }
}

/// One step of a filter chain described in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    /// Registry id of the filter.
    #[serde(rename = "type")]
    pub filter_type: String,
    /// Remaining keys are the filter parameters.
    #[serde(flatten)]
    pub params: toml::Table,
}

/// A processing chain: pipeline settings plus an ordered list of filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default, rename = "filter")]
    pub filters: Vec<FilterStep>,
}

impl ChainConfig {
    /// Parse a chain description.
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a chain description file.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
