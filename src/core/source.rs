//! Upstream data sources.
//!
//! A source is a pipeline node without inputs: it reports its metadata and
//! produces a buffer covering any region inside its largest possible region.

use crate::core::buffer::{AnyBuffer, ImageBuffer};
use crate::core::error::{ComputeError, ConfigurationError};
use crate::core::info::ImageInfo;
use crate::core::pixel::{Pixel, PixelType};
use crate::core::region::ImageRegion;
use parking_lot::Mutex;
use std::sync::Arc;

/// Contract of an upstream data source.
pub trait RasterSource: Send + Sync {
    /// Short description used in logs.
    fn name(&self) -> &str {
        "source"
    }

    /// Output metadata.
    fn info(&self) -> Result<ImageInfo, ConfigurationError>;

    /// Buffer covering at least `region`.
    fn read_region(&self, region: &ImageRegion) -> Result<AnyBuffer, ComputeError>;
}

/// Shared log of the regions a source was asked for.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<ImageRegion>>>);

impl RequestLog {
    pub(crate) fn record(&self, region: ImageRegion) {
        self.0.lock().push(region);
    }

    /// All requests in order.
    pub fn requests(&self) -> Vec<ImageRegion> {
        self.0.lock().clone()
    }

    /// Most recent request.
    pub fn last(&self) -> Option<ImageRegion> {
        self.0.lock().last().copied()
    }

    /// Number of requests.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether nothing was requested yet.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Forget every recorded request.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// Source serving an in-memory buffer.
pub struct MemorySource {
    buffer: AnyBuffer,
    info: ImageInfo,
    log: RequestLog,
}

impl MemorySource {
    /// Serve `buffer`; its allocated region is the largest possible region.
    pub fn new(buffer: AnyBuffer) -> Self {
        let info = ImageInfo::new(buffer.allocated_region(), buffer.pixel_type(), buffer.components());
        Self {
            buffer,
            info,
            log: RequestLog::default(),
        }
    }

    /// Single-band image of `width`×`height` pixels all equal to `value`.
    pub fn constant<P: Pixel>(width: u64, height: u64, value: P) -> Result<Self, ComputeError> {
        let buffer = ImageBuffer::filled(ImageRegion::from_size([width, height]), 1, value)
            .map_err(|e| ComputeError::new(e.to_string()))?;
        Ok(Self::new(buffer.into()))
    }

    /// Override the geometry and no-data value reported in the metadata.
    pub fn with_info(mut self, spacing: [f64; 2], origin: [f64; 2], no_data: Option<f64>) -> Self {
        self.info = self.info.with_geometry(spacing, origin).with_no_data(no_data);
        self
    }

    /// Handle on the request log.
    pub fn request_log(&self) -> RequestLog {
        self.log.clone()
    }
}

impl RasterSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn info(&self) -> Result<ImageInfo, ConfigurationError> {
        Ok(self.info.clone())
    }

    fn read_region(&self, region: &ImageRegion) -> Result<AnyBuffer, ComputeError> {
        self.log.record(*region);
        self.buffer
            .extract(region)
            .map_err(|e| ComputeError::new(e.to_string()))
    }
}

/// Pixel generator: `(x, y, band) -> value`.
pub type PixelFunction = dyn Fn(i64, i64, usize) -> f64 + Send + Sync;

/// Source computing synthetic pixels from a closure.
pub struct FunctionSource {
    info: ImageInfo,
    function: Box<PixelFunction>,
    log: RequestLog,
}

impl FunctionSource {
    pub fn new<F>(region: ImageRegion, pixel_type: PixelType, components: usize, function: F) -> Self
    where
        F: Fn(i64, i64, usize) -> f64 + Send + Sync + 'static,
    {
        Self {
            info: ImageInfo::new(region, pixel_type, components),
            function: Box::new(function),
            log: RequestLog::default(),
        }
    }

    /// Handle on the request log.
    pub fn request_log(&self) -> RequestLog {
        self.log.clone()
    }
}

impl RasterSource for FunctionSource {
    fn name(&self) -> &str {
        "function"
    }

    fn info(&self) -> Result<ImageInfo, ConfigurationError> {
        Ok(self.info.clone())
    }

    fn read_region(&self, region: &ImageRegion) -> Result<AnyBuffer, ComputeError> {
        self.log.record(*region);
        let mut buffer = AnyBuffer::allocate(self.info.pixel_type, *region, self.info.components, None)
            .map_err(|e| ComputeError::new(e.to_string()))?;
        let mut tiles = buffer
            .split_tiles_mut(&[*region])
            .map_err(|e| ComputeError::new(e.to_string()))?;
        if let Some(tile) = tiles.first_mut() {
            for y in region.y()..region.y() + region.height() as i64 {
                for x in region.x()..region.x() + region.width() as i64 {
                    for band in 0..self.info.components {
                        tile.set_f64(x, y, band, (self.function)(x, y, band));
                    }
                }
            }
        }
        drop(tiles);
        Ok(buffer)
    }
}
