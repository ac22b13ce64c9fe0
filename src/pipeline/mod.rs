//! The demand-driven pipeline.
//!
//! - [`structure`]: node arena, connection and invalidation
//! - [`topology`]: reachability, ordering and memory estimates
//! - [`pull`]: metadata update and region pulls

pub mod node;
pub mod pull;
pub mod structure;
pub mod topology;

pub use node::{NodeKind, NodeState, NodeStats, OutputPort, OutputSlot, PipelineNode};
pub use structure::Pipeline;
