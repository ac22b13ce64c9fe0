//! Pipeline nodes and their per-output state.

use crate::core::buffer::AnyBuffer;
use crate::core::error::NodeId;
use crate::core::filter::Filter;
use crate::core::info::ImageInfo;
use crate::core::propagation::EdgePolicy;
use crate::core::region::ImageRegion;
use crate::core::source::RasterSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What produces a node's outputs.
pub enum NodeKind {
    /// Data fetched from a source; no inputs, one output.
    Source(Box<dyn RasterSource>),
    /// Data computed by a filter from its inputs.
    Filter(Box<dyn Filter>),
}

impl NodeKind {
    /// Name used in logs and reports.
    pub fn name(&self) -> String {
        match self {
            NodeKind::Source(source) => source.name().to_string(),
            NodeKind::Filter(filter) => filter.metadata().id,
        }
    }

    /// Number of input slots.
    pub fn input_count(&self) -> usize {
        match self {
            NodeKind::Source(_) => 0,
            NodeKind::Filter(filter) => filter.metadata().inputs.len(),
        }
    }

    /// Number of output slots.
    pub fn output_count(&self) -> usize {
        match self {
            NodeKind::Source(_) => 1,
            NodeKind::Filter(filter) => filter.metadata().outputs.len().max(1),
        }
    }

    /// Edge policy applied to requests against this node.
    pub fn edge_policy(&self) -> EdgePolicy {
        match self {
            NodeKind::Source(_) => EdgePolicy::CropAndTolerate,
            NodeKind::Filter(filter) => filter.edge_policy(),
        }
    }
}

/// One output slot of one node: the end of an edge.
///
/// A bare [`NodeId`] converts to output 0, so single-output nodes are
/// addressed by their id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputPort {
    pub node: NodeId,
    pub output: usize,
}

impl OutputPort {
    pub fn new(node: NodeId, output: usize) -> Self {
        Self { node, output }
    }
}

impl From<NodeId> for OutputPort {
    fn from(node: NodeId) -> Self {
        Self { node, output: 0 }
    }
}

impl From<(NodeId, usize)> for OutputPort {
    fn from((node, output): (NodeId, usize)) -> Self {
        Self { node, output }
    }
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.output)
    }
}

/// State of a node output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Metadata not computed (new or modified node).
    Uninitialized,
    /// Metadata valid, no valid pixels.
    InformationValid,
    /// Pixels valid over the region.
    DataValid(ImageRegion),
}

/// Metadata, pixels and state of one output.
#[derive(Debug)]
pub struct OutputSlot {
    pub(crate) state: NodeState,
    pub(crate) info: Option<ImageInfo>,
    pub(crate) buffer: Option<AnyBuffer>,
}

impl Default for OutputSlot {
    fn default() -> Self {
        Self {
            state: NodeState::Uninitialized,
            info: None,
            buffer: None,
        }
    }
}

impl OutputSlot {
    /// Output state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Output metadata, once computed.
    pub fn info(&self) -> Option<&ImageInfo> {
        self.info.as_ref()
    }

    /// Output buffer, if pixels were computed.
    pub fn buffer(&self) -> Option<&AnyBuffer> {
        self.buffer.as_ref()
    }

    /// Region over which the output is valid.
    pub fn valid_region(&self) -> Option<ImageRegion> {
        match self.state {
            NodeState::DataValid(region) => Some(region),
            _ => None,
        }
    }

    fn invalidate_data(&mut self) {
        if let NodeState::DataValid(_) = self.state {
            self.state = NodeState::InformationValid;
        }
    }
}

/// Per-node execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Number of times pixels were computed.
    pub generate_count: u64,
    /// Number of pulls answered from the existing buffers.
    pub cache_hits: u64,
    /// Region of the last computation.
    pub last_region: Option<ImageRegion>,
    /// Duration of the last computation.
    pub last_duration: Option<Duration>,
    /// Bytes held by every output buffer after the last computation.
    pub buffer_bytes: u64,
}

/// A node in the pipeline arena.
pub struct PipelineNode {
    /// Stable identifier.
    pub id: NodeId,
    /// Display label.
    pub label: String,
    pub(crate) kind: NodeKind,
    /// Upstream output per input slot.
    pub(crate) inputs: Vec<Option<OutputPort>>,
    /// Downstream nodes reading this one (one entry per connected slot).
    pub(crate) consumers: Vec<NodeId>,
    pub(crate) outputs: Vec<OutputSlot>,
    pub(crate) stats: NodeStats,
    /// Logical time of the last metadata computation.
    pub(crate) info_time: u64,
    /// `info_time` of every input when the metadata was computed.
    pub(crate) input_times: Vec<u64>,
}

impl PipelineNode {
    pub(crate) fn new(id: NodeId, kind: NodeKind) -> Self {
        let inputs = vec![None; kind.input_count()];
        let outputs = (0..kind.output_count()).map(|_| OutputSlot::default()).collect();
        Self {
            id,
            label: kind.name(),
            kind,
            inputs,
            consumers: Vec::new(),
            outputs,
            stats: NodeStats::default(),
            info_time: 0,
            input_times: Vec::new(),
        }
    }

    /// Producer of this node's outputs.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Upstream output per input slot.
    pub fn inputs(&self) -> &[Option<OutputPort>] {
        &self.inputs
    }

    /// Downstream consumers.
    pub fn consumers(&self) -> &[NodeId] {
        &self.consumers
    }

    /// Every output slot, in declaration order.
    pub fn outputs(&self) -> &[OutputSlot] {
        &self.outputs
    }

    /// Output slot `index`.
    pub fn output(&self, index: usize) -> Option<&OutputSlot> {
        self.outputs.get(index)
    }

    /// Execution statistics.
    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Whether the metadata of every output is current.
    pub(crate) fn information_valid(&self) -> bool {
        self.outputs.iter().all(|slot| slot.state != NodeState::Uninitialized)
    }

    /// Force the metadata of every output to be recomputed.
    pub(crate) fn mark_modified(&mut self) {
        for slot in &mut self.outputs {
            slot.state = NodeState::Uninitialized;
        }
    }

    /// Drop valid pixels of every output, keeping valid metadata.
    pub(crate) fn invalidate_data(&mut self) {
        for slot in &mut self.outputs {
            slot.invalidate_data();
        }
    }

    /// Free every output buffer.
    pub(crate) fn release_data(&mut self) {
        for slot in &mut self.outputs {
            slot.buffer = None;
            slot.invalidate_data();
        }
    }
}

impl fmt::Debug for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineNode")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("inputs", &self.inputs)
            .field("consumers", &self.consumers)
            .field(
                "states",
                &self.outputs.iter().map(|slot| slot.state).collect::<Vec<_>>(),
            )
            .finish()
    }
}
