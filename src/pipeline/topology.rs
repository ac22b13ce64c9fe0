//! Reachability and ordering queries over the pipeline DAG.

use crate::core::error::{NodeId, PipelineResult};
use crate::pipeline::structure::Pipeline;
use std::collections::{HashMap, HashSet, VecDeque};

impl Pipeline {
    /// Check if `target` is reachable from `start` following consumer edges.
    pub fn is_reachable(&self, start: NodeId, target: NodeId) -> bool {
        if start == target {
            return true;
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if visited.insert(current) {
                if let Some(node) = self.nodes.get(&current) {
                    queue.extend(node.consumers.iter().copied());
                }
            }
        }

        false
    }

    /// All nodes reading (directly or not) from `id`, nearest first.
    pub fn downstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.walk(id, |node| node.consumers.clone())
    }

    /// All nodes `id` reads from (directly or not), nearest first.
    pub fn upstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.walk(id, |node| node.inputs.iter().flatten().map(|port| port.node).collect())
    }

    fn walk<F>(&self, id: NodeId, next: F) -> Vec<NodeId>
    where
        F: Fn(&crate::pipeline::node::PipelineNode) -> Vec<NodeId>,
    {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(node) = self.nodes.get(&id) {
            queue.extend(next(node));
        }

        while let Some(current) = queue.pop_front() {
            if visited.insert(current) {
                result.push(current);
                if let Some(node) = self.nodes.get(&current) {
                    queue.extend(next(node));
                }
            }
        }
        result
    }

    /// Length of the longest input chain below `id` (sources have depth 0).
    pub(crate) fn depth(&self, id: NodeId, memo: &mut HashMap<NodeId, usize>) -> usize {
        if let Some(&depth) = memo.get(&id) {
            return depth;
        }
        let inputs: Vec<NodeId> = self
            .nodes
            .get(&id)
            .map(|node| node.inputs.iter().flatten().map(|port| port.node).collect())
            .unwrap_or_default();
        let depth = inputs
            .into_iter()
            .map(|input| self.depth(input, memo) + 1)
            .max()
            .unwrap_or(0);
        memo.insert(id, depth);
        depth
    }

    /// Bytes held per output pixel by every output of `id` and of every node
    /// upstream of it.
    ///
    /// Used to size streamed pieces. Halo pixels and resolution changes
    /// between nodes are not accounted for.
    pub fn memory_print_per_pixel(&mut self, id: NodeId) -> PipelineResult<u64> {
        self.update_output_information(id)?;
        let mut total = 0;
        for node in std::iter::once(id).chain(self.upstream_nodes(id)) {
            for info in self.node(node)?.outputs().iter().filter_map(|slot| slot.info()) {
                total += info.bytes_per_pixel();
            }
        }
        Ok(total)
    }
}
