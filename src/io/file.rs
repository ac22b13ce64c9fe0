//! Image file source and sink.

use crate::core::buffer::{AnyBuffer, ImageBuffer};
use crate::core::error::{BufferError, ComputeError, ConfigurationError, PipelineError, PipelineResult};
use crate::core::info::ImageInfo;
use crate::core::pixel::{Pixel, PixelType};
use crate::core::region::ImageRegion;
use crate::core::source::{RasterSource, RequestLog};
use crate::execution::streaming::{MemorySink, RegionSink};
use image::{DynamicImage, Luma, LumaA, Rgb, Rgba};
use std::path::{Path, PathBuf};

// ============================================================================
// Source
// ============================================================================

/// Source serving regions of a decoded image file.
#[derive(Debug)]
pub struct ImageFileSource {
    path: PathBuf,
    name: String,
    buffer: AnyBuffer,
    log: RequestLog,
}

impl ImageFileSource {
    /// Decode `path`. 8-bit and 16-bit gray, gray-alpha, RGB and RGBA images
    /// keep their depth and band count; float RGB(A) images decode to `f32`;
    /// anything else is converted to 8-bit RGBA.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let image = image::open(&path)?;
        let buffer = decode(image)?;
        log::info!(
            "Opened {} ({} {} band(s), {})",
            path.display(),
            buffer.allocated_region(),
            buffer.components(),
            buffer.pixel_type()
        );
        Ok(Self {
            name: path.display().to_string(),
            path,
            buffer,
            log: RequestLog::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle on the request log.
    pub fn request_log(&self) -> RequestLog {
        self.log.clone()
    }
}

impl RasterSource for ImageFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn info(&self) -> Result<ImageInfo, ConfigurationError> {
        Ok(ImageInfo::new(
            self.buffer.allocated_region(),
            self.buffer.pixel_type(),
            self.buffer.components(),
        ))
    }

    fn read_region(&self, region: &ImageRegion) -> Result<AnyBuffer, ComputeError> {
        self.log.record(*region);
        self.buffer
            .extract(region)
            .map_err(|e| ComputeError::new(format!("{}: {}", self.name, e)))
    }
}

fn typed<P: Pixel>(region: ImageRegion, components: usize, data: Vec<P>) -> Result<AnyBuffer, BufferError> {
    ImageBuffer::from_vec(region, components, data).map(AnyBuffer::from)
}

fn decode(image: DynamicImage) -> Result<AnyBuffer, BufferError> {
    let region = ImageRegion::from_size([image.width() as u64, image.height() as u64]);
    match image {
        DynamicImage::ImageLuma8(img) => typed(region, 1, img.into_raw()),
        DynamicImage::ImageLumaA8(img) => typed(region, 2, img.into_raw()),
        DynamicImage::ImageRgb8(img) => typed(region, 3, img.into_raw()),
        DynamicImage::ImageRgba8(img) => typed(region, 4, img.into_raw()),
        DynamicImage::ImageLuma16(img) => typed(region, 1, img.into_raw()),
        DynamicImage::ImageLumaA16(img) => typed(region, 2, img.into_raw()),
        DynamicImage::ImageRgb16(img) => typed(region, 3, img.into_raw()),
        DynamicImage::ImageRgba16(img) => typed(region, 4, img.into_raw()),
        DynamicImage::ImageRgb32F(img) => typed(region, 3, img.into_raw()),
        DynamicImage::ImageRgba32F(img) => typed(region, 4, img.into_raw()),
        other => typed(region, 4, other.to_rgba8().into_raw()),
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Sink writing the streamed image to a file on `finish`.
///
/// The format follows the file extension. `u8` and `u16` pixels are written
/// as is; other pixel types are rounded and saturated to `u8`. Only 1 to 4
/// bands can be written.
#[derive(Debug)]
pub struct ImageFileSink {
    path: PathBuf,
    assembled: MemorySink,
}

impl ImageFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            assembled: MemorySink::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegionSink for ImageFileSink {
    fn begin(&mut self, info: &ImageInfo, region: &ImageRegion) -> PipelineResult<()> {
        if !(1..=4).contains(&info.components) {
            return Err(PipelineError::Other(format!(
                "cannot write {} bands to {}",
                info.components,
                self.path.display()
            )));
        }
        self.assembled.begin(info, region)
    }

    fn write(&mut self, piece: &ImageRegion, buffer: &AnyBuffer) -> PipelineResult<()> {
        self.assembled.write(piece, buffer)
    }

    fn finish(&mut self) -> PipelineResult<()> {
        let buffer = self
            .assembled
            .buffer()
            .ok_or_else(|| PipelineError::Other("sink finished before begin".to_string()))?;
        let image = encode(buffer)?;
        image.save(&self.path)?;
        log::info!("Wrote {}", self.path.display());
        Ok(())
    }
}

fn encode(buffer: &AnyBuffer) -> PipelineResult<DynamicImage> {
    let region = buffer.allocated_region();
    let (width, height) = (region.width() as u32, region.height() as u32);
    let bands = buffer.components();
    let invalid = || PipelineError::Other(format!("cannot encode {} band(s) of {}", bands, buffer.pixel_type()));

    if let Some(typed) = buffer.as_typed::<u16>() {
        let data = typed.data().to_vec();
        let image = match bands {
            1 => image::ImageBuffer::<Luma<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageLuma16),
            2 => image::ImageBuffer::<LumaA<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageLumaA16),
            3 => image::ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgb16),
            4 => image::ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgba16),
            _ => None,
        };
        return image.ok_or_else(invalid);
    }

    let data = match buffer.as_typed::<u8>() {
        Some(typed) => typed.data().to_vec(),
        None => {
            log::warn!("Converting {} pixels to u8 for writing", buffer.pixel_type());
            let mut data = Vec::with_capacity(region.width() as usize * region.height() as usize * bands);
            let mut pixel = vec![0.0; bands];
            for y in region.y()..region.y() + region.height() as i64 {
                for x in region.x()..region.x() + region.width() as i64 {
                    buffer.pixel_f64(x, y, &mut pixel);
                    data.extend(pixel.iter().map(|&v| u8::from_f64(v)));
                }
            }
            data
        }
    };
    let image = match bands {
        1 => image::ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
        2 => image::ImageBuffer::<LumaA<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageLumaA8),
        3 => image::ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
        4 => image::ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, data).map(DynamicImage::ImageRgba8),
        _ => None,
    };
    image.ok_or_else(invalid)
}

/// Metadata of an image file.
pub fn probe(path: impl AsRef<Path>) -> PipelineResult<ImageInfo> {
    ImageFileSource::open(path)?
        .info()
        .map_err(|e| PipelineError::Other(e.to_string()))
}
