//! Memory-bounded streaming of a whole image through a pipeline.
//!
//! The driver decomposes the output region into pieces, pulls each piece in
//! row-major order and hands it to a [`RegionSink`]. Persistent filters are
//! reset before the first piece and synthesized after the last one.

use crate::core::buffer::AnyBuffer;
use crate::core::config::StreamingConfig;
use crate::core::error::{BufferError, NodeId, PipelineError, PipelineResult};
use crate::core::info::ImageInfo;
use crate::core::region::ImageRegion;
use crate::execution::progress::ProgressTracker;
use crate::pipeline::{OutputPort, Pipeline};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Receives streamed pieces in order.
pub trait RegionSink {
    /// Called once before the first piece with the output metadata and the
    /// region that will be streamed.
    fn begin(&mut self, info: &ImageInfo, region: &ImageRegion) -> PipelineResult<()>;

    /// Consume one piece. `buffer` covers at least `piece`.
    fn write(&mut self, piece: &ImageRegion, buffer: &AnyBuffer) -> PipelineResult<()>;

    /// Called once after the last piece.
    fn finish(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}

/// Assembles every piece into one in-memory buffer.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Option<AnyBuffer>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembled buffer, once streaming started.
    pub fn buffer(&self) -> Option<&AnyBuffer> {
        self.buffer.as_ref()
    }

    /// Take the assembled buffer.
    pub fn into_buffer(self) -> Option<AnyBuffer> {
        self.buffer
    }
}

impl RegionSink for MemorySink {
    fn begin(&mut self, info: &ImageInfo, region: &ImageRegion) -> PipelineResult<()> {
        self.buffer = Some(AnyBuffer::allocate(info.pixel_type, *region, info.components, None)?);
        Ok(())
    }

    fn write(&mut self, piece: &ImageRegion, buffer: &AnyBuffer) -> PipelineResult<()> {
        let target = self
            .buffer
            .as_mut()
            .ok_or_else(|| PipelineError::Other("sink written before begin".to_string()))?;
        target.copy_region_from(buffer, piece)?;
        Ok(())
    }
}

/// Options of one streaming run.
#[derive(Clone, Default)]
pub struct StreamingOptions {
    /// Decomposition and optional restriction of the streamed region.
    pub config: StreamingConfig,
    /// Progress events and cancellation.
    pub progress: Option<Arc<ProgressTracker>>,
}

impl StreamingOptions {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config, progress: None }
    }

    /// Report progress to, and honour cancellation from, `tracker`.
    pub fn with_progress(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = Some(tracker);
        self
    }
}

impl std::fmt::Debug for StreamingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingOptions")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Summary of a streaming run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingReport {
    /// Region that was streamed.
    pub region: ImageRegion,
    /// Number of pieces pulled.
    pub pieces: usize,
    /// Number of pixels written to the sink.
    pub pixels: u64,
    /// Memory print of one output pixel through the pipeline.
    pub bytes_per_pixel: u64,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Reports of persistent filters, keyed by node.
    pub reports: Vec<(NodeId, serde_json::Value)>,
}

/// Stream one output into `sink`. A bare [`NodeId`] names output 0.
pub fn stream(
    pipeline: &mut Pipeline,
    output: impl Into<OutputPort>,
    sink: &mut dyn RegionSink,
    options: &StreamingOptions,
) -> PipelineResult<StreamingReport> {
    let started = Instant::now();
    let port = output.into();
    let id = port.node;
    pipeline.update_output_information(id)?;
    let info = pipeline
        .info(port)?
        .cloned()
        .ok_or_else(|| PipelineError::Other(format!("output {} has no information", port)))?;

    let largest = info.largest_region;
    let region = match options.config.region {
        Some(requested) => {
            let cropped = requested.crop(&largest);
            if cropped.is_empty() {
                return Err(PipelineError::RegionUnavailable {
                    node: id,
                    requested,
                    available: largest,
                });
            }
            cropped
        }
        None => largest,
    };

    let bytes_per_pixel = pipeline.memory_print_per_pixel(id)?;
    let pieces = options.config.mode.pieces(&region, bytes_per_pixel);
    log::info!(
        "Streaming output {} over {} in {} pieces ({} bytes per pixel)",
        port,
        region,
        pieces.len(),
        bytes_per_pixel
    );
    if pieces.len() > 1 {
        let overlapping = pipeline.overlapping_persistent_nodes(id)?;
        if !overlapping.is_empty() {
            let nodes: Vec<String> = overlapping.iter().map(ToString::to_string).collect();
            log::warn!(
                "Persistent node(s) {} receive overlapping pieces; their results count border pixels more than once",
                nodes.join(", ")
            );
        }
    }

    let progress = options.progress.as_deref();
    if let Some(tracker) = progress {
        tracker.start(pieces.len());
    }

    let pixels = match run_pieces(pipeline, port, sink, &info, &region, &pieces, progress) {
        Ok(pixels) => pixels,
        Err(error) => {
            if let Some(tracker) = progress {
                tracker.report_error(error.node_id(), error.to_string());
            }
            return Err(error);
        }
    };

    let reports = pipeline.synthesize_persistent(id)?;
    sink.finish()?;
    if let Some(tracker) = progress {
        tracker.complete();
    }

    let duration = started.elapsed();
    log::info!(
        "Streamed {} pixels of output {} in {} pieces ({:?})",
        pixels,
        port,
        pieces.len(),
        duration
    );
    Ok(StreamingReport {
        region,
        pieces: pieces.len(),
        pixels,
        bytes_per_pixel,
        duration,
        reports,
    })
}

fn run_pieces(
    pipeline: &mut Pipeline,
    port: OutputPort,
    sink: &mut dyn RegionSink,
    info: &ImageInfo,
    region: &ImageRegion,
    pieces: &[ImageRegion],
    progress: Option<&ProgressTracker>,
) -> PipelineResult<u64> {
    pipeline.reset_persistent(port.node)?;
    sink.begin(info, region)?;

    let mut pixels = 0;
    for (index, piece) in pieces.iter().enumerate() {
        if let Some(tracker) = progress {
            if tracker.is_cancelled() {
                log::info!("Streaming of output {} cancelled after {} pieces", port, index);
                return Err(PipelineError::Cancelled {
                    completed: index,
                    total: pieces.len(),
                });
            }
            tracker.piece_started(index, *piece);
        }

        let piece_started = Instant::now();
        let buffer = pipeline.pull(port, *piece)?;
        let written = buffer.requested_region();
        if written != *piece {
            return Err(PipelineError::Buffer(BufferError::OutOfBounds {
                region: *piece,
                allocated: written,
            }));
        }
        sink.write(piece, buffer)?;
        pixels += piece.number_of_pixels()?;

        if let Some(tracker) = progress {
            tracker.piece_completed(index, piece_started.elapsed().as_millis() as u64);
        }
    }
    Ok(pixels)
}
