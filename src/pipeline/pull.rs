//! Pull protocol: metadata update and demand-driven pixel computation.
//!
//! `update_output_information` moves nodes from `Uninitialized` to
//! `InformationValid` by recursing upstream first. `pull` then materializes
//! a region of one output: it resolves the request against the edge policy,
//! answers from the existing buffer when possible, otherwise propagates the
//! region to every input, pulls them depth-first and runs the threaded
//! executor over freshly allocated buffers, one per output of the node.

use crate::core::buffer::{byte_size, AnyBuffer};
use crate::core::error::{BufferError, ConfigurationError, NodeId, PipelineError, PipelineResult};
use crate::core::filter::{check_inputs, GenerateInputs};
use crate::core::info::ImageInfo;
use crate::core::propagation::Propagation;
use crate::core::region::ImageRegion;
use crate::pipeline::node::{NodeKind, NodeState, OutputPort, OutputSlot};
use crate::pipeline::structure::Pipeline;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

impl Pipeline {
    /// Compute the output metadata of `id` and everything upstream of it.
    ///
    /// Idempotent: nodes whose metadata is valid and whose inputs did not
    /// change since are skipped.
    pub fn update_output_information(&mut self, id: NodeId) -> PipelineResult<()> {
        let mut visiting = HashSet::new();
        self.update_info(id, &mut visiting)
    }

    fn update_info(&mut self, id: NodeId, visiting: &mut HashSet<NodeId>) -> PipelineResult<()> {
        if !visiting.insert(id) {
            return Err(PipelineError::configuration(
                id,
                ConfigurationError::CycleInPipeline(id),
            ));
        }
        let inputs = self.node(id)?.inputs.clone();
        for port in inputs.iter().flatten() {
            self.update_info(port.node, visiting)?;
        }
        visiting.remove(&id);

        let input_times: Vec<u64> = inputs
            .iter()
            .map(|slot| slot.and_then(|port| self.nodes.get(&port.node)).map_or(0, |n| n.info_time))
            .collect();
        let node = self.node(id)?;
        if node.information_valid() && node.input_times == input_times {
            return Ok(());
        }

        let infos = self.compute_info(id, &inputs)?;
        self.clock += 1;
        let clock = self.clock;
        let node = self.node_mut(id)?;
        for (output, (slot, info)) in node.outputs.iter_mut().zip(infos).enumerate() {
            log::debug!(
                "Node {} ({}): output {} information {} {}x{} components",
                id,
                node.label,
                output,
                info.largest_region,
                info.pixel_type,
                info.components
            );
            slot.info = Some(info);
            slot.state = NodeState::InformationValid;
        }
        node.info_time = clock;
        node.input_times = input_times;
        Ok(())
    }

    fn compute_info(&self, id: NodeId, inputs: &[Option<OutputPort>]) -> PipelineResult<Vec<ImageInfo>> {
        let node = self.node(id)?;
        let wrap = |source| PipelineError::configuration(id, source);
        let infos = match &node.kind {
            NodeKind::Source(source) => vec![source.info().map_err(wrap)?],
            NodeKind::Filter(filter) => {
                let slots: Vec<Option<&ImageInfo>> = inputs
                    .iter()
                    .map(|slot| slot.and_then(|port| self.port_info(port)))
                    .collect();
                check_inputs(&filter.metadata(), &slots).map_err(wrap)?;
                let connected: Vec<ImageInfo> = slots.into_iter().flatten().cloned().collect();
                filter.output_information(&connected).map_err(wrap)?
            }
        };

        if infos.len() != node.outputs.len() {
            return Err(wrap(ConfigurationError::OutputCountMismatch {
                expected: node.outputs.len(),
                got: infos.len(),
            }));
        }
        // Every output is generated over the same region.
        if let Some(first) = infos.first() {
            for (output, info) in infos.iter().enumerate().skip(1) {
                if info.largest_region != first.largest_region {
                    return Err(wrap(ConfigurationError::OutputExtentMismatch {
                        output,
                        expected: first.largest_region,
                        got: info.largest_region,
                    }));
                }
            }
        }
        Ok(infos)
    }

    fn port_info(&self, port: OutputPort) -> Option<&ImageInfo> {
        self.nodes
            .get(&port.node)
            .and_then(|node| node.outputs.get(port.output))
            .and_then(|slot| slot.info.as_ref())
    }

    fn largest_region(&self, id: NodeId) -> PipelineResult<ImageRegion> {
        self.node(id)?
            .outputs
            .first()
            .and_then(|slot| slot.info.as_ref())
            .map(|info| info.largest_region)
            .ok_or_else(|| PipelineError::Other(format!("node {} has no output information", id)))
    }

    /// Region each input of `id` would be pulled for when `id` is asked for
    /// `region` (`None` for unconnected inputs).
    pub fn required_input_region(&mut self, id: NodeId, region: ImageRegion) -> PipelineResult<Vec<Option<ImageRegion>>> {
        self.update_output_information(id)?;
        let resolved = self.resolve_request(id, region)?;
        Ok(self
            .input_requirements(id, &resolved)?
            .into_iter()
            .map(|slot| slot.map(|(_, region)| region))
            .collect())
    }

    /// Apply the node's edge policy to a request against its own extent.
    fn resolve_request(&self, id: NodeId, region: ImageRegion) -> PipelineResult<ImageRegion> {
        let available = self.largest_region(id)?;
        let policy = self.node(id)?.kind.edge_policy();
        match policy.resolve(&region, &available) {
            Some(resolved) if !resolved.is_empty() => {
                if resolved != region {
                    log::warn!("Node {}: request {} cropped to {}", id, region, resolved);
                }
                Ok(resolved)
            }
            _ => Err(PipelineError::RegionUnavailable {
                node: id,
                requested: region,
                available,
            }),
        }
    }

    /// Propagate `region` to every input slot, resolved against each input's
    /// extent with the filter's edge policy.
    fn input_requirements(
        &self,
        id: NodeId,
        region: &ImageRegion,
    ) -> PipelineResult<Vec<Option<(OutputPort, ImageRegion)>>> {
        let node = self.node(id)?;
        let NodeKind::Filter(filter) = &node.kind else {
            return Ok(Vec::new());
        };
        let policy = filter.edge_policy();
        let mut requirements = Vec::with_capacity(node.inputs.len());
        for (input, slot) in node.inputs.iter().enumerate() {
            let Some(port) = *slot else {
                requirements.push(None);
                continue;
            };
            let available = self.largest_region(port.node)?;
            let required = filter.input_propagation(input).input_region(region, &available)?;
            let resolved = policy
                .resolve(&required, &available)
                .ok_or(PipelineError::RegionUnavailable {
                    node: id,
                    requested: required,
                    available,
                })?;
            log::debug!(
                "Node {}: input {} needs {} from {}",
                id,
                input,
                resolved,
                port
            );
            requirements.push(Some((port, resolved)));
        }
        Ok(requirements)
    }

    /// Materialize `region` of an output and return its buffer. A bare
    /// [`NodeId`] names output 0.
    ///
    /// Every output of the node is computed over the same region. The
    /// buffer's requested region is the satisfied request, which is smaller
    /// than `region` when the node crops at its borders. On error the
    /// previously valid buffers of every node are left untouched.
    pub fn pull(&mut self, port: impl Into<OutputPort>, region: ImageRegion) -> PipelineResult<&AnyBuffer> {
        let port = port.into();
        self.slot(port)?;
        self.update_output_information(port.node)?;
        self.pull_node(port.node, region, &[port.output])?;
        self.slot(port)?
            .buffer
            .as_ref()
            .ok_or_else(|| PipelineError::Other(format!("output {} produced no buffer", port)))
    }

    /// Make `outputs` of node `id` valid over `region`.
    fn pull_node(&mut self, id: NodeId, region: ImageRegion, outputs: &[usize]) -> PipelineResult<ImageRegion> {
        let resolved = self.resolve_request(id, region)?;

        let node = self.node(id)?;
        let cached = outputs.iter().all(|&output| {
            node.outputs
                .get(output)
                .and_then(OutputSlot::valid_region)
                .map_or(false, |valid| resolved.is_inside(&valid))
        });
        if cached {
            log::debug!("Node {}: {} already valid for outputs {:?}", id, resolved, outputs);
            let node = self.node_mut(id)?;
            node.stats.cache_hits += 1;
            for &output in outputs {
                if let Some(buffer) = node.outputs.get_mut(output).and_then(|slot| slot.buffer.as_mut()) {
                    buffer.set_requested_region(resolved)?;
                }
            }
            return Ok(resolved);
        }

        // Every requirement is computed before anything is pulled, so a strict
        // failure leaves all nodes as they were. Requests for several outputs
        // of one upstream node become a single pull of their union.
        let requirements = self.input_requirements(id, &resolved)?;
        let mut merged: IndexMap<NodeId, (ImageRegion, Vec<usize>)> = IndexMap::new();
        for (port, required) in requirements.iter().flatten() {
            let entry = merged.entry(port.node).or_insert((*required, Vec::new()));
            entry.0 = entry.0.union(required);
            if !entry.1.contains(&port.output) {
                entry.1.push(port.output);
            }
        }

        // Deepest inputs first. A pull only replaces the buffers of the
        // pulled node and its ancestors, and an input is never an ancestor of
        // one at the same or a lower depth.
        let mut memo = HashMap::new();
        let mut order: Vec<(NodeId, (ImageRegion, Vec<usize>))> = merged.into_iter().collect();
        order.sort_by_key(|(upstream, _)| std::cmp::Reverse(self.depth(*upstream, &mut memo)));
        for (upstream, (required, outputs)) in order {
            self.pull_node(upstream, required, &outputs)?;
        }

        let started = Instant::now();
        let buffers = self.generate(id, &resolved, &requirements)?;
        let elapsed = started.elapsed();

        let node = self.node_mut(id)?;
        node.stats.generate_count += 1;
        node.stats.last_region = Some(resolved);
        node.stats.last_duration = Some(elapsed);
        node.stats.buffer_bytes = buffers.iter().map(|b| b.memory_size() as u64).sum();
        for (slot, buffer) in node.outputs.iter_mut().zip(buffers) {
            slot.buffer = Some(buffer);
            slot.state = NodeState::DataValid(resolved);
        }
        log::debug!("Node {}: computed {} in {:?}", id, resolved, elapsed);
        Ok(resolved)
    }

    fn check_allocation(&self, id: NodeId, region: &ImageRegion, info: &ImageInfo) -> PipelineResult<()> {
        let limit = self.config.max_buffer_bytes.unwrap_or(u64::MAX);
        let bytes = byte_size(region, info.components, info.pixel_type.size_of()).unwrap_or(u64::MAX);
        if bytes > limit {
            return Err(PipelineError::ResourceExhaustion {
                node: id,
                region: *region,
                bytes,
                limit,
            });
        }
        Ok(())
    }

    fn generate(
        &self,
        id: NodeId,
        region: &ImageRegion,
        requirements: &[Option<(OutputPort, ImageRegion)>],
    ) -> PipelineResult<Vec<AnyBuffer>> {
        let node = self.node(id)?;
        let infos = node
            .outputs
            .iter()
            .map(|slot| {
                slot.info
                    .clone()
                    .ok_or_else(|| PipelineError::Other(format!("node {} has no output information", id)))
            })
            .collect::<PipelineResult<Vec<ImageInfo>>>()?;
        for info in &infos {
            self.check_allocation(id, region, info)?;
        }

        match &node.kind {
            NodeKind::Source(source) => {
                let buffer = source.read_region(region).map_err(|source| PipelineError::Compute {
                    node: id,
                    region: *region,
                    thread: 0,
                    source,
                })?;
                if !region.is_inside(&buffer.allocated_region()) {
                    return Err(PipelineError::Buffer(BufferError::OutOfBounds {
                        region: *region,
                        allocated: buffer.allocated_region(),
                    }));
                }
                let mut buffer = buffer;
                buffer.set_requested_region(*region)?;
                Ok(vec![buffer])
            }
            NodeKind::Filter(filter) => {
                let mut outputs = infos
                    .iter()
                    .map(|info| {
                        AnyBuffer::allocate(info.pixel_type, *region, info.components, self.config.max_buffer_bytes)
                            .map_err(|error| match error {
                                BufferError::Allocation { bytes, limit } => PipelineError::ResourceExhaustion {
                                    node: id,
                                    region: *region,
                                    bytes,
                                    limit,
                                },
                                other => PipelineError::Buffer(other),
                            })
                    })
                    .collect::<PipelineResult<Vec<AnyBuffer>>>()?;

                let mut buffers = Vec::with_capacity(requirements.len());
                let mut input_infos = Vec::with_capacity(requirements.len());
                for slot in requirements {
                    let upstream = match slot {
                        Some((port, _)) => self.node(port.node)?.outputs.get(port.output),
                        None => None,
                    };
                    buffers.push(upstream.and_then(|slot| slot.buffer.as_ref()));
                    input_infos.push(upstream.and_then(|slot| slot.info.as_ref()));
                }
                let inputs = GenerateInputs::new(buffers, input_infos, &infos);

                let compute_error = |source| PipelineError::Compute {
                    node: id,
                    region: *region,
                    thread: 0,
                    source,
                };
                let threads = self.executor.plan(region).len();
                filter.before_generate(region, threads).map_err(compute_error)?;
                self.executor
                    .execute(&mut outputs, region, |tiles, thread| filter.generate(&inputs, tiles, thread))
                    .map_err(|error| error.into_pipeline_error(id))?;
                filter.after_generate(region).map_err(compute_error)?;
                Ok(outputs)
            }
        }
    }

    // ========================================================================
    // Persistent filters
    // ========================================================================

    /// Persistent filters among `id` and everything upstream of it.
    fn persistent_nodes(&self, id: NodeId) -> PipelineResult<Vec<NodeId>> {
        let mut nodes = Vec::new();
        for node in std::iter::once(id).chain(self.upstream_nodes(id)) {
            if let Some(filter) = self.filter(node)? {
                if filter.metadata().persistent {
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    /// Reset the accumulated state of `id` and every filter upstream of it.
    pub fn reset_persistent(&mut self, id: NodeId) -> PipelineResult<()> {
        for node in self.persistent_nodes(id)? {
            if let Some(filter) = self.filter(node)? {
                filter.reset();
            }
            // Accumulated state must see every pixel again.
            self.release_data(node)?;
            log::debug!("Node {}: persistent state reset", node);
        }
        Ok(())
    }

    /// Persistent filters upstream of `id` reached through a propagation
    /// other than identity.
    ///
    /// When `id` is streamed in several pieces, the requests reaching these
    /// filters overlap, so pixels they accumulate may be counted more than
    /// once.
    pub fn overlapping_persistent_nodes(&self, id: NodeId) -> PipelineResult<Vec<NodeId>> {
        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(id, true)];
        while let Some((current, exact)) = stack.pop() {
            if !visited.insert((current, exact)) {
                continue;
            }
            let node = self.node(current)?;
            let NodeKind::Filter(filter) = &node.kind else {
                continue;
            };
            for (input, slot) in node.inputs.iter().enumerate() {
                let Some(port) = *slot else {
                    continue;
                };
                let exact = exact && matches!(filter.input_propagation(input), Propagation::Identity);
                if !exact && !found.contains(&port.node) {
                    let persistent = self.filter(port.node)?.map_or(false, |f| f.metadata().persistent);
                    if persistent {
                        found.push(port.node);
                    }
                }
                stack.push((port.node, exact));
            }
        }
        Ok(found)
    }

    /// Reduce the accumulated state of `id` and every filter upstream of it,
    /// collecting the reports they produce.
    pub fn synthesize_persistent(&self, id: NodeId) -> PipelineResult<Vec<(NodeId, serde_json::Value)>> {
        let mut reports = Vec::new();
        for node in self.persistent_nodes(id)? {
            if let Some(report) = self.filter(node)?.and_then(|filter| filter.synthesize()) {
                reports.push((node, report));
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::pixel::PixelType;
    use crate::core::source::{FunctionSource, MemorySource};
    use crate::core::buffer::AnyTileMut;
    use crate::core::error::ComputeError;
    use crate::core::filter::{output_tile, Filter, FilterMetadata, InputDefinition};
    use crate::filters::builtin::neighborhood::LocalStatisticsFilter;
    use crate::filters::builtin::point::ShiftScaleFilter;
    use crate::filters::builtin::registration::FineRegistrationFilter;
    use crate::filters::builtin::statistics::StreamingStatisticsFilter;

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::new().with_threads(2).with_min_piece_size(1)).unwrap()
    }

    #[test]
    fn test_update_output_information_is_idempotent() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(6, 4, 3u16).unwrap());
        let filter = p.add_filter(ShiftScaleFilter::new(1.0, 1.0).with_output_type(PixelType::U16));
        p.connect(source, filter, 0).unwrap();

        p.update_output_information(filter).unwrap();
        let time = p.node(filter).unwrap().info_time;
        assert_eq!(p.state(filter).unwrap(), NodeState::InformationValid);
        assert_eq!(p.info(filter).unwrap().unwrap().largest_region, ImageRegion::from_size([6, 4]));

        p.update_output_information(filter).unwrap();
        assert_eq!(p.node(filter).unwrap().info_time, time);

        p.modified(source).unwrap();
        p.update_output_information(filter).unwrap();
        assert!(p.node(filter).unwrap().info_time > time);
    }

    #[test]
    fn test_missing_input_is_configuration_error() {
        let mut p = pipeline();
        let filter = p.add_filter(ShiftScaleFilter::new(1.0, 0.0));
        let err = p.update_output_information(filter).unwrap_err();
        assert_eq!(err.node_id(), Some(filter));
        assert!(matches!(
            err,
            PipelineError::Configuration {
                source: ConfigurationError::MissingInput { input: 0 },
                ..
            }
        ));
    }

    #[test]
    fn test_modified_invalidates_downstream_data() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(4, 4, 1u8).unwrap());
        let a = p.add_filter(ShiftScaleFilter::new(2.0, 0.0));
        let b = p.add_filter(ShiftScaleFilter::new(2.0, 0.0));
        p.connect(source, a, 0).unwrap();
        p.connect(a, b, 0).unwrap();

        let full = ImageRegion::from_size([4, 4]);
        p.pull(b, full).unwrap();
        assert_eq!(p.state(b).unwrap(), NodeState::DataValid(full));

        p.modified(a).unwrap();
        assert_eq!(p.state(a).unwrap(), NodeState::Uninitialized);
        assert_eq!(p.state(b).unwrap(), NodeState::InformationValid);
        assert_eq!(p.state(source).unwrap(), NodeState::DataValid(full));

        p.pull(b, full).unwrap();
        assert_eq!(p.node_stats(b).unwrap().generate_count, 2);
        assert_eq!(p.node_stats(source).unwrap().generate_count, 1);
    }

    #[test]
    fn test_request_disjoint_from_image() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(4, 4, 1u8).unwrap());
        let err = p.pull(source, ImageRegion::new_2d(10, 10, 2, 2)).unwrap_err();
        assert!(matches!(err, PipelineError::RegionUnavailable { .. }));
    }

    #[test]
    fn test_request_cropped_to_image() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(4, 4, 1u8).unwrap());
        let filter = p.add_filter(ShiftScaleFilter::new(1.0, 0.0));
        p.connect(source, filter, 0).unwrap();
        let buffer = p.pull(filter, ImageRegion::new_2d(2, 2, 8, 8)).unwrap();
        assert_eq!(buffer.requested_region(), ImageRegion::new_2d(2, 2, 2, 2));
    }

    #[test]
    fn test_resource_exhaustion() {
        let mut p = Pipeline::new(PipelineConfig::new().with_threads(1).with_max_buffer_bytes(100)).unwrap();
        let source = p.add_source(MemorySource::constant(20, 20, 1u8).unwrap());
        let err = p.pull(source, ImageRegion::from_size([20, 20])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ResourceExhaustion {
                bytes: 400,
                limit: 100,
                ..
            }
        ));
        assert!(err.is_recoverable());
        assert!(p.pull(source, ImageRegion::from_size([10, 10])).is_ok());
    }

    #[test]
    fn test_required_input_region() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(10, 10, 1u8).unwrap());
        let stats = p.add_filter(LocalStatisticsFilter::new(2));
        p.connect(source, stats, 0).unwrap();
        let regions = p.required_input_region(stats, ImageRegion::new_2d(4, 4, 2, 2)).unwrap();
        assert_eq!(regions, vec![Some(ImageRegion::new_2d(2, 2, 6, 6))]);
    }

    /// Multiplies `image` by an optional single-band `weight`.
    struct Weighted {
        weight_first: bool,
    }

    impl Weighted {
        /// Slots of `image` and `weight`.
        fn slots(&self) -> (usize, usize) {
            if self.weight_first {
                (1, 0)
            } else {
                (0, 1)
            }
        }
    }

    impl Filter for Weighted {
        fn metadata(&self) -> FilterMetadata {
            let image = InputDefinition::new("image");
            let weight = InputDefinition::new("weight").optional();
            let builder = FilterMetadata::builder("weighted", "Weighted");
            let builder = if self.weight_first {
                builder.input(weight).input(image)
            } else {
                builder.input(image).input(weight)
            };
            builder.build()
        }

        fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
            Ok(vec![inputs[0].clone().with_pixel_type(PixelType::F64)])
        }

        fn generate(&self, inputs: &GenerateInputs<'_>, outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
            let (image_slot, weight_slot) = self.slots();
            let image = inputs.buffer(image_slot)?;
            if inputs.info(image_slot).map(|info| info.components) != Some(image.components()) {
                return Err(ComputeError::new("image metadata does not match its buffer"));
            }
            let weight = inputs.optional_buffer(weight_slot);
            if weight.is_some() != inputs.info(weight_slot).is_some() {
                return Err(ComputeError::new("weight metadata does not match its buffer"));
            }
            let output = output_tile(outputs, 0)?;
            let region = output.region();
            for y in region.y()..region.y() + region.height() as i64 {
                for x in region.x()..region.x() + region.width() as i64 {
                    let value = image.value_f64(x, y, 0).unwrap_or(f64::NAN);
                    let factor = weight.and_then(|w| w.value_f64(x, y, 0)).unwrap_or(1.0);
                    output.set_f64(x, y, 0, value * factor);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_trailing_optional_input_metadata() {
        let mut p = pipeline();
        let full = ImageRegion::from_size([4, 4]);
        let image = p.add_source(MemorySource::constant(4, 4, 3u8).unwrap());
        let weight = p.add_source(MemorySource::constant(4, 4, 2u8).unwrap());
        let weighted = p.add_filter(Weighted { weight_first: false });
        p.connect(image, weighted, 0).unwrap();

        let buffer = p.pull(weighted, full).unwrap();
        assert_eq!(buffer.value_f64(1, 1, 0), Some(3.0));

        p.connect(weight, weighted, 1).unwrap();
        let buffer = p.pull(weighted, full).unwrap();
        assert_eq!(buffer.value_f64(1, 1, 0), Some(6.0));
    }

    #[test]
    fn test_connection_after_unconnected_optional_input() {
        let mut p = pipeline();
        let image = p.add_source(MemorySource::constant(4, 4, 3u8).unwrap());
        let weighted = p.add_filter(Weighted { weight_first: true });
        p.connect(image, weighted, 1).unwrap();

        let err = p.pull(weighted, ImageRegion::from_size([4, 4])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration {
                source: ConfigurationError::InputAfterUnconnected {
                    input: 1,
                    unconnected: 0
                },
                ..
            }
        ));
    }

    #[test]
    fn test_pull_second_output() {
        let mut p = pipeline();
        let full = ImageRegion::from_size([12, 12]);
        let fixed = p.add_source(FunctionSource::new(full, PixelType::F64, 1, |x, y, _| ((x * 7 + y * 3) % 11) as f64));
        let registration = p.add_filter(FineRegistrationFilter::new(1, 1));
        p.connect(fixed, registration, 0).unwrap();
        p.connect(fixed, registration, 1).unwrap();

        let metric = p.pull((registration, 1), full).unwrap();
        assert_eq!(metric.components(), 1);
        assert_eq!(metric.value_f64(5, 5, 0), Some(0.0));
        // Both outputs come from one computation.
        assert_eq!(p.state(registration).unwrap(), NodeState::DataValid(full));
        assert_eq!(p.state((registration, 1)).unwrap(), NodeState::DataValid(full));

        let displacement = p.pull(registration, full).unwrap();
        assert_eq!(displacement.components(), 2);
        assert_eq!(displacement.value_f64(5, 5, 0), Some(0.0));
        let stats = p.node(registration).unwrap().stats();
        assert_eq!(stats.generate_count, 1);
        assert_eq!(stats.cache_hits, 1);

        assert!(matches!(
            p.pull((registration, 2), full),
            Err(PipelineError::Configuration {
                source: ConfigurationError::OutputOutOfRange { output: 2, count: 2 },
                ..
            })
        ));
    }

    #[test]
    fn test_overlapping_persistent_nodes() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(8, 8, 1u8).unwrap());
        let stats = p.add_filter(StreamingStatisticsFilter::new());
        let local = p.add_filter(LocalStatisticsFilter::new(1));
        let scaled = p.add_filter(ShiftScaleFilter::new(2.0, 0.0));
        p.connect(source, stats, 0).unwrap();
        p.connect(stats, local, 0).unwrap();
        p.connect(stats, scaled, 0).unwrap();

        assert_eq!(p.overlapping_persistent_nodes(local).unwrap(), vec![stats]);
        assert!(p.overlapping_persistent_nodes(scaled).unwrap().is_empty());
        assert!(p.overlapping_persistent_nodes(stats).unwrap().is_empty());
    }

    /// Declares two outputs but reports `count` of them, the second one a
    /// single pixel.
    struct Lopsided {
        count: usize,
    }

    impl Filter for Lopsided {
        fn metadata(&self) -> FilterMetadata {
            FilterMetadata::builder("lopsided", "Lopsided")
                .input(InputDefinition::new("image"))
                .output("whole", "Input extent")
                .output("corner", "One pixel")
                .build()
        }

        fn output_information(&self, inputs: &[ImageInfo]) -> Result<Vec<ImageInfo>, ConfigurationError> {
            let corner = ImageInfo::new(ImageRegion::from_size([1, 1]), PixelType::U8, 1);
            Ok([inputs[0].clone(), corner].into_iter().take(self.count).collect())
        }

        fn generate(&self, _inputs: &GenerateInputs<'_>, _outputs: &mut [AnyTileMut<'_>], _thread: usize) -> Result<(), ComputeError> {
            Ok(())
        }
    }

    #[test]
    fn test_output_information_must_match_outputs() {
        let mut p = pipeline();
        let source = p.add_source(MemorySource::constant(4, 4, 3u8).unwrap());
        let short = p.add_filter(Lopsided { count: 1 });
        let uneven = p.add_filter(Lopsided { count: 2 });
        p.connect(source, short, 0).unwrap();
        p.connect(source, uneven, 0).unwrap();

        assert!(matches!(
            p.update_output_information(short),
            Err(PipelineError::Configuration {
                source: ConfigurationError::OutputCountMismatch { expected: 2, got: 1 },
                ..
            })
        ));
        assert!(matches!(
            p.update_output_information(uneven),
            Err(PipelineError::Configuration {
                source: ConfigurationError::OutputExtentMismatch { output: 1, .. },
                ..
            })
        ));
        assert_eq!(p.state((uneven, 1)).unwrap(), NodeState::Uninitialized);
    }
}
