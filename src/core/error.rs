//! Error types for rasterpipe.
//!
//! Uses thiserror for structured errors with context. Errors are designed to:
//! - Identify the node and region involved, so a failed pull can be diagnosed
//!   from its call site
//! - Keep the leaf-level errors (geometry, wiring, per-tile compute) small and
//!   wrap them with context at the pipeline level
//! - Serialize the geometric parts for reports

use crate::core::pixel::PixelType;
use crate::core::region::ImageRegion;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable identifier of a node in a [`Pipeline`](crate::pipeline::Pipeline) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Geometry errors raised by [`Region`](crate::core::region::Region) arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RegionError {
    #[error("Integer overflow in region {operation} along dimension {dimension}")]
    Overflow {
        dimension: usize,
        operation: &'static str,
    },

    #[error("Region has {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Pipeline wiring errors.
///
/// These are detected while output information is computed, before any pixel
/// data flows. The pipeline wraps them with the offending node.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigurationError {
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Input {input} is not connected")]
    MissingInput { input: usize },

    #[error("Input index {input} out of range (node has {count} inputs)")]
    InputOutOfRange { input: usize, count: usize },

    #[error("Output index {output} out of range (node has {count} outputs)")]
    OutputOutOfRange { output: usize, count: usize },

    #[error("Filter declares {expected} outputs but described {got}")]
    OutputCountMismatch { expected: usize, got: usize },

    #[error("Output {output}: extent {got} does not match output 0 extent {expected}")]
    OutputExtentMismatch {
        output: usize,
        expected: ImageRegion,
        got: ImageRegion,
    },

    #[error("Input {input} is connected after unconnected optional input {unconnected}")]
    InputAfterUnconnected { input: usize, unconnected: usize },

    #[error("Input {input} is already connected")]
    InputAlreadyConnected { input: usize },

    #[error("Connecting {from} to {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    #[error("Cycle detected in pipeline through node {0}")]
    CycleInPipeline(NodeId),

    #[error("Input {input}: pixel type {got} not accepted (expected one of {expected:?})")]
    PixelTypeMismatch {
        input: usize,
        expected: Vec<PixelType>,
        got: PixelType,
    },

    #[error("Input {input}: expected {expected} components per pixel, got {got}")]
    ComponentMismatch {
        input: usize,
        expected: usize,
        got: usize,
    },

    #[error("Input {input}: extent {got} does not match {expected}")]
    ExtentMismatch {
        input: usize,
        expected: ImageRegion,
        got: ImageRegion,
    },

    #[error("Node still feeds {consumers} consumer(s)")]
    NodeInUse { consumers: usize },

    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("Unknown filter type '{0}'")]
    UnknownFilter(String),

    #[error("{0}")]
    Other(String),
}

impl ConfigurationError {
    /// Get a suggestion for fixing this error.
    pub fn suggested_fix(&self) -> Option<String> {
        match self {
            ConfigurationError::MissingInput { input } => {
                Some(format!("Connect an upstream node to input {}", input))
            }
            ConfigurationError::PixelTypeMismatch { expected, .. } => Some(format!(
                "Insert a conversion producing one of {:?}",
                expected
            )),
            ConfigurationError::InputAfterUnconnected { unconnected, .. } => Some(format!(
                "Connect input {} or move the connection to the lowest free input",
                unconnected
            )),
            ConfigurationError::NodeInUse { .. } => {
                Some("Disconnect the downstream consumers first".to_string())
            }
            ConfigurationError::InvalidParameter { parameter, reason } => {
                Some(format!("Adjust '{}': {}", parameter, reason))
            }
            _ => None,
        }
    }
}

/// Buffer shape, bounds and allocation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Cannot allocate {bytes} bytes (limit {limit} bytes)")]
    Allocation { bytes: u64, limit: u64 },

    #[error("Buffer holds {got} elements, region needs {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Region {region} is outside the allocated region {allocated}")]
    OutOfBounds {
        region: ImageRegion,
        allocated: ImageRegion,
    },

    #[error("Sub-regions {0} and {1} overlap")]
    Overlap(ImageRegion, ImageRegion),

    #[error("Pixel type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: PixelType, got: PixelType },

    #[error("Component count mismatch: expected {expected}, got {got}")]
    ComponentMismatch { expected: usize, got: usize },
}

/// Failure reported by a filter's per-region compute callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ComputeError {
    /// Description of what went wrong.
    pub message: String,
}

impl ComputeError {
    /// Create a compute error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of one threaded execution over a region.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Sub-region {region} (thread {thread}) failed: {source}")]
    Task {
        thread: usize,
        region: ImageRegion,
        #[source]
        source: ComputeError,
    },
}

impl ExecutionError {
    /// Attach the node the execution ran for.
    pub fn into_pipeline_error(self, node: NodeId) -> PipelineError {
        match self {
            ExecutionError::Buffer(error) => PipelineError::Buffer(error),
            ExecutionError::Task { thread, region, source } => PipelineError::Compute {
                node,
                region,
                thread,
                source,
            },
        }
    }
}

/// Top-level error type for rasterpipe.
///
/// Every variant raised during a pull carries enough context (node, region)
/// to diagnose the failure at the original call site.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error on node {node}: {source}")]
    Configuration {
        node: NodeId,
        #[source]
        source: ConfigurationError,
    },

    #[error("Node {node}: region {requested} is not available (largest possible region {available})")]
    RegionUnavailable {
        node: NodeId,
        requested: ImageRegion,
        available: ImageRegion,
    },

    #[error("Node {node}: cannot allocate {bytes} bytes for region {region} (limit {limit} bytes)")]
    ResourceExhaustion {
        node: NodeId,
        region: ImageRegion,
        bytes: u64,
        limit: u64,
    },

    #[error("Node {node}: computing sub-region {region} (thread {thread}) failed: {source}")]
    Compute {
        node: NodeId,
        region: ImageRegion,
        thread: usize,
        #[source]
        source: ComputeError,
    },

    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Streaming cancelled after {completed}/{total} pieces")]
    Cancelled { completed: usize, total: usize },

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Configuration file error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Wrap a configuration error with the node it concerns.
    pub fn configuration(node: NodeId, source: ConfigurationError) -> Self {
        PipelineError::Configuration { node, source }
    }

    /// Get the node ID that caused this error, if applicable.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            PipelineError::Configuration { node, .. }
            | PipelineError::RegionUnavailable { node, .. }
            | PipelineError::ResourceExhaustion { node, .. }
            | PipelineError::Compute { node, .. } => Some(*node),
            _ => None,
        }
    }

    /// Get the region involved, if applicable.
    pub fn region(&self) -> Option<ImageRegion> {
        match self {
            PipelineError::RegionUnavailable { requested, .. } => Some(*requested),
            PipelineError::ResourceExhaustion { region, .. }
            | PipelineError::Compute { region, .. } => Some(*region),
            _ => None,
        }
    }

    /// Whether a caller can retry with a different request.
    ///
    /// Resource exhaustion is recovered by pulling a smaller region (for
    /// instance through the streaming splitter); an unavailable region by
    /// requesting one inside the image.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::ResourceExhaustion { .. } | PipelineError::RegionUnavailable { .. }
        )
    }
}

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(7).to_string(), "#7");
    }

    #[test]
    fn test_configuration_error_context() {
        let error = PipelineError::configuration(NodeId(3), ConfigurationError::MissingInput { input: 1 });
        assert_eq!(error.node_id(), Some(NodeId(3)));
        assert!(error.to_string().contains("#3"));
        assert!(error.to_string().contains("Input 1"));
    }

    #[test]
    fn test_suggestions() {
        let error = ConfigurationError::MissingInput { input: 0 };
        assert!(error.suggested_fix().unwrap().contains("input 0"));
        assert!(ConfigurationError::CycleInPipeline(NodeId(1)).suggested_fix().is_none());
    }

    #[test]
    fn test_output_errors() {
        let error = ConfigurationError::OutputOutOfRange { output: 2, count: 2 };
        assert!(error.to_string().contains("2 outputs"));
        let error = ConfigurationError::InputAfterUnconnected { input: 1, unconnected: 0 };
        assert!(error.suggested_fix().unwrap().contains("input 0"));
    }

    #[test]
    fn test_execution_error_gets_node() {
        let error = ExecutionError::Task {
            thread: 2,
            region: ImageRegion::new_2d(0, 4, 8, 4),
            source: ComputeError::new("bad pixel"),
        }
        .into_pipeline_error(NodeId(5));
        assert_eq!(error.node_id(), Some(NodeId(5)));
        assert!(matches!(error, PipelineError::Compute { thread: 2, .. }));
        assert!(error.to_string().contains("bad pixel"));
    }

    #[test]
    fn test_recoverable() {
        let error = PipelineError::ResourceExhaustion {
            node: NodeId(0),
            region: ImageRegion::new_2d(0, 0, 10, 10),
            bytes: 400,
            limit: 100,
        };
        assert!(error.is_recoverable());
        assert_eq!(error.region(), Some(ImageRegion::new_2d(0, 0, 10, 10)));
        assert!(!PipelineError::Other("boom".into()).is_recoverable());
    }
}
