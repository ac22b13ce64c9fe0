//! Pipeline arena and assembly operations.
//!
//! The [`Pipeline`] owns every node. Edges are stored on the consumer as one
//! upstream [`OutputPort`] per input slot; producers keep back-references to
//! their consumers, used only to propagate invalidation downstream.

use crate::core::config::PipelineConfig;
use crate::core::buffer::AnyBuffer;
use crate::core::error::{ConfigurationError, NodeId, PipelineError, PipelineResult};
use crate::core::filter::Filter;
use crate::core::info::ImageInfo;
use crate::core::source::RasterSource;
use crate::execution::executor::ThreadedExecutor;
use crate::pipeline::node::{NodeKind, NodeState, NodeStats, OutputPort, OutputSlot, PipelineNode};
use indexmap::IndexMap;

/// A demand-driven image pipeline.
///
/// Graph mutation happens through `&mut self` during assembly; pulling also
/// takes `&mut self`, so orchestration is single-threaded and parallelism is
/// confined to the executor.
pub struct Pipeline {
    pub(crate) nodes: IndexMap<NodeId, PipelineNode>,
    pub(crate) config: PipelineConfig,
    pub(crate) executor: ThreadedExecutor,
    next_id: u32,
    /// Logical clock stamping metadata computations.
    pub(crate) clock: u64,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("nodes", &self.nodes.values().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish()
    }
}

impl Pipeline {
    /// Create an empty pipeline with its own worker pool.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let executor = ThreadedExecutor::new(config.num_threads, config.min_piece_size)?;
        log::debug!(
            "Created pipeline with {} worker threads",
            executor.num_threads()
        );
        Ok(Self {
            nodes: IndexMap::new(),
            config,
            executor,
            next_id: 0,
            clock: 0,
        })
    }

    /// Configuration the pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executor running filter generation.
    pub fn executor(&self) -> &ThreadedExecutor {
        &self.executor
    }

    // ========================================================================
    // Node Management
    // ========================================================================

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, PipelineNode::new(id, kind));
        id
    }

    /// Add a source node.
    pub fn add_source(&mut self, source: impl RasterSource + 'static) -> NodeId {
        self.insert(NodeKind::Source(Box::new(source)))
    }

    /// Add a boxed source node.
    pub fn add_boxed_source(&mut self, source: Box<dyn RasterSource>) -> NodeId {
        self.insert(NodeKind::Source(source))
    }

    /// Add a filter node with every input unconnected.
    pub fn add_filter(&mut self, filter: impl Filter + 'static) -> NodeId {
        self.insert(NodeKind::Filter(Box::new(filter)))
    }

    /// Add a boxed filter node.
    pub fn add_boxed_filter(&mut self, filter: Box<dyn Filter>) -> NodeId {
        self.insert(NodeKind::Filter(filter))
    }

    /// Set the display label of a node.
    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) -> PipelineResult<()> {
        self.node_mut(id)?.label = label.into();
        Ok(())
    }

    /// Get a node.
    pub fn node(&self, id: NodeId) -> PipelineResult<&PipelineNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| PipelineError::configuration(id, ConfigurationError::NodeNotFound(id)))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> PipelineResult<&mut PipelineNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| PipelineError::configuration(id, ConfigurationError::NodeNotFound(id)))
    }

    /// Check if a node exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// All node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Remove a node. Refused while other nodes read from it.
    pub fn remove_node(&mut self, id: NodeId) -> PipelineResult<()> {
        let node = self.node(id)?;
        if !node.consumers.is_empty() {
            return Err(PipelineError::configuration(
                id,
                ConfigurationError::NodeInUse {
                    consumers: node.consumers.len(),
                },
            ));
        }
        let inputs: Vec<NodeId> = node.inputs.iter().flatten().map(|port| port.node).collect();
        for upstream in inputs {
            self.remove_consumer(upstream, id);
        }
        self.nodes.shift_remove(&id);
        log::debug!("Removed node {}", id);
        Ok(())
    }

    /// Replace the filter of a node and mark it modified.
    ///
    /// Input slots beyond the new filter's input count are disconnected.
    /// Refused while a consumer reads an output the new filter lacks.
    pub fn set_filter(&mut self, id: NodeId, filter: Box<dyn Filter>) -> PipelineResult<()> {
        let metadata = filter.metadata();
        let count = metadata.inputs.len();
        let output_count = metadata.outputs.len().max(1);
        if let Some(port) = self.consumed_ports(id).into_iter().find(|port| port.output >= output_count) {
            return Err(PipelineError::configuration(
                id,
                ConfigurationError::OutputOutOfRange {
                    output: port.output,
                    count: output_count,
                },
            ));
        }
        let node = self.node_mut(id)?;
        if matches!(node.kind, NodeKind::Source(_)) {
            return Err(PipelineError::configuration(
                id,
                ConfigurationError::Other("cannot replace a source with a filter".to_string()),
            ));
        }
        let dropped: Vec<NodeId> = node.inputs.iter().skip(count).flatten().map(|port| port.node).collect();
        node.inputs.resize(count, None);
        node.kind = NodeKind::Filter(filter);
        node.outputs = (0..output_count).map(|_| OutputSlot::default()).collect();
        for upstream in dropped {
            self.remove_consumer(upstream, id);
        }
        self.modified(id)
    }

    // ========================================================================
    // Connection Management
    // ========================================================================

    /// Connect an output of an upstream node to input slot `input` of
    /// `downstream`. A bare [`NodeId`] names the upstream's output 0.
    pub fn connect(&mut self, upstream: impl Into<OutputPort>, downstream: NodeId, input: usize) -> PipelineResult<()> {
        let port = upstream.into();
        let upstream = port.node;
        let outputs = self.node(upstream)?.outputs.len();
        if port.output >= outputs {
            return Err(PipelineError::configuration(
                upstream,
                ConfigurationError::OutputOutOfRange {
                    output: port.output,
                    count: outputs,
                },
            ));
        }
        let node = self.node(downstream)?;
        let count = node.inputs.len();
        if input >= count {
            return Err(PipelineError::configuration(
                downstream,
                ConfigurationError::InputOutOfRange { input, count },
            ));
        }
        if node.inputs[input].is_some() {
            return Err(PipelineError::configuration(
                downstream,
                ConfigurationError::InputAlreadyConnected { input },
            ));
        }
        if self.is_reachable(downstream, upstream) {
            return Err(PipelineError::configuration(
                downstream,
                ConfigurationError::CycleDetected {
                    from: upstream,
                    to: downstream,
                },
            ));
        }

        self.node_mut(downstream)?.inputs[input] = Some(port);
        self.node_mut(upstream)?.consumers.push(downstream);
        log::debug!("Connected {} -> {}[{}]", port, downstream, input);
        self.modified(downstream)
    }

    /// Disconnect input slot `input` of `downstream`, returning the former
    /// upstream output.
    pub fn disconnect(&mut self, downstream: NodeId, input: usize) -> PipelineResult<Option<OutputPort>> {
        let node = self.node_mut(downstream)?;
        let count = node.inputs.len();
        let slot = node.inputs.get_mut(input).ok_or_else(|| {
            PipelineError::configuration(downstream, ConfigurationError::InputOutOfRange { input, count })
        })?;
        let previous = slot.take();
        if let Some(port) = previous {
            self.remove_consumer(port.node, downstream);
            self.modified(downstream)?;
        }
        Ok(previous)
    }

    /// Every output port of `id` read by a consumer.
    fn consumed_ports(&self, id: NodeId) -> Vec<OutputPort> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        node.consumers
            .iter()
            .filter_map(|consumer| self.nodes.get(consumer))
            .flat_map(|consumer| consumer.inputs.iter().flatten().copied())
            .filter(|port| port.node == id)
            .collect()
    }

    fn remove_consumer(&mut self, upstream: NodeId, consumer: NodeId) {
        if let Some(node) = self.nodes.get_mut(&upstream) {
            if let Some(pos) = node.consumers.iter().position(|&c| c == consumer) {
                node.consumers.remove(pos);
            }
        }
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Signal that a node changed (parameters, inputs).
    ///
    /// The metadata of every output of the node must be recomputed; every
    /// downstream node loses its valid pixels. Nothing is recomputed until
    /// the next pull.
    pub fn modified(&mut self, id: NodeId) -> PipelineResult<()> {
        self.node_mut(id)?.mark_modified();
        for downstream in self.downstream_nodes(id) {
            if let Some(node) = self.nodes.get_mut(&downstream) {
                node.invalidate_data();
            }
        }
        Ok(())
    }

    /// Release the pixels of every output of a node. Metadata stays valid.
    pub fn release_data(&mut self, id: NodeId) -> PipelineResult<()> {
        self.node_mut(id)?.release_data();
        Ok(())
    }

    /// Release the pixels of every node.
    pub fn release_all_data(&mut self) {
        for node in self.nodes.values_mut() {
            node.release_data();
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Output slot behind `port`.
    pub fn slot(&self, port: impl Into<OutputPort>) -> PipelineResult<&OutputSlot> {
        let port = port.into();
        let node = self.node(port.node)?;
        node.outputs.get(port.output).ok_or_else(|| {
            PipelineError::configuration(
                port.node,
                ConfigurationError::OutputOutOfRange {
                    output: port.output,
                    count: node.outputs.len(),
                },
            )
        })
    }

    /// Number of outputs of a node.
    pub fn output_count(&self, id: NodeId) -> PipelineResult<usize> {
        Ok(self.node(id)?.outputs.len())
    }

    /// State of an output.
    pub fn state(&self, port: impl Into<OutputPort>) -> PipelineResult<NodeState> {
        Ok(self.slot(port)?.state)
    }

    /// Metadata of an output, if computed.
    pub fn info(&self, port: impl Into<OutputPort>) -> PipelineResult<Option<&ImageInfo>> {
        Ok(self.slot(port)?.info.as_ref())
    }

    /// Buffer of an output, if pixels were computed.
    pub fn output(&self, port: impl Into<OutputPort>) -> PipelineResult<Option<&AnyBuffer>> {
        Ok(self.slot(port)?.buffer.as_ref())
    }

    /// Filter of a node, if it is a filter node.
    pub fn filter(&self, id: NodeId) -> PipelineResult<Option<&dyn Filter>> {
        Ok(match &self.node(id)?.kind {
            NodeKind::Filter(filter) => Some(filter.as_ref()),
            NodeKind::Source(_) => None,
        })
    }

    /// Execution statistics of a node.
    pub fn node_stats(&self, id: NodeId) -> PipelineResult<&NodeStats> {
        Ok(&self.node(id)?.stats)
    }
}
