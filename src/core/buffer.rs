//! Pixel storage addressed by region.
//!
//! An [`ImageBuffer`] owns a contiguous, row-major block of interleaved pixel
//! components covering its `allocated_region`. Its `requested_region` is the
//! logically valid subset and always lies inside the allocated one.
//!
//! Disjoint sub-regions of one buffer can be borrowed mutably at the same time
//! through [`ImageBuffer::split_tiles_mut`]; this is what lets the threaded
//! executor write every sub-region without locking.

use crate::core::error::BufferError;
use crate::core::pixel::{Pixel, PixelType};
use crate::core::region::ImageRegion;
use std::fmt;

/// Number of bytes needed to store `region` with `components` elements of
/// `element_size` bytes per pixel, if representable.
pub fn byte_size(region: &ImageRegion, components: usize, element_size: usize) -> Option<u64> {
    region
        .number_of_pixels()
        .ok()?
        .checked_mul(components as u64)?
        .checked_mul(element_size as u64)
}

/// Typed pixel storage covering an allocated region.
#[derive(Clone, PartialEq)]
pub struct ImageBuffer<P: Pixel> {
    allocated_region: ImageRegion,
    requested_region: ImageRegion,
    components: usize,
    data: Vec<P>,
}

impl<P: Pixel> ImageBuffer<P> {
    /// Allocate a zero-filled buffer covering `region`.
    ///
    /// Fails with [`BufferError::Allocation`] if the byte size exceeds `limit`,
    /// does not fit the address space, or the allocator refuses it.
    pub fn allocate(
        region: ImageRegion,
        components: usize,
        limit: Option<u64>,
    ) -> Result<Self, BufferError> {
        let limit_or_max = limit.unwrap_or(u64::MAX);
        let bytes = byte_size(&region, components, std::mem::size_of::<P>()).ok_or(
            BufferError::Allocation {
                bytes: u64::MAX,
                limit: limit_or_max,
            },
        )?;
        if bytes > limit_or_max {
            return Err(BufferError::Allocation {
                bytes,
                limit: limit_or_max,
            });
        }
        let len = element_count(&region, components).ok_or(BufferError::Allocation {
            bytes,
            limit: limit_or_max,
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| BufferError::Allocation {
                bytes,
                limit: limit_or_max,
            })?;
        data.resize(len, P::default());

        Ok(Self {
            allocated_region: region,
            requested_region: region,
            components,
            data,
        })
    }

    /// Wrap existing row-major data.
    pub fn from_vec(region: ImageRegion, components: usize, data: Vec<P>) -> Result<Self, BufferError> {
        let expected = element_count(&region, components).ok_or(BufferError::ShapeMismatch {
            expected: usize::MAX,
            got: data.len(),
        })?;
        if data.len() != expected {
            return Err(BufferError::ShapeMismatch {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            allocated_region: region,
            requested_region: region,
            components,
            data,
        })
    }

    /// Buffer covering `region` with every element set to `value`.
    pub fn filled(region: ImageRegion, components: usize, value: P) -> Result<Self, BufferError> {
        let mut buffer = Self::allocate(region, components, None)?;
        buffer.fill(value);
        Ok(buffer)
    }

    /// Physically backed region.
    pub fn allocated_region(&self) -> ImageRegion {
        self.allocated_region
    }

    /// Logically valid region.
    pub fn requested_region(&self) -> ImageRegion {
        self.requested_region
    }

    /// Restrict the logically valid region. It must lie inside the allocation.
    pub fn set_requested_region(&mut self, region: ImageRegion) -> Result<(), BufferError> {
        if !region.is_inside(&self.allocated_region) {
            return Err(BufferError::OutOfBounds {
                region,
                allocated: self.allocated_region,
            });
        }
        self.requested_region = region;
        Ok(())
    }

    /// Elements per pixel.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Raw elements in row-major order.
    pub fn data(&self) -> &[P] {
        &self.data
    }

    /// Mutable raw elements in row-major order.
    pub fn data_mut(&mut self) -> &mut [P] {
        &mut self.data
    }

    /// Consume the buffer and return its elements.
    pub fn into_vec(self) -> Vec<P> {
        self.data
    }

    /// Byte view of the storage.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    /// Size of the storage in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<P>()
    }

    fn element_offset(&self, x: i64, y: i64) -> Option<usize> {
        self.allocated_region
            .offset_of(&[x, y])
            .and_then(|o| o.checked_mul(self.components))
    }

    fn row_stride(&self) -> usize {
        self.allocated_region.width() as usize * self.components
    }

    /// Components of the pixel at `index`.
    pub fn pixel(&self, index: &[i64; 2]) -> Option<&[P]> {
        let start = self.element_offset(index[0], index[1])?;
        self.data.get(start..start + self.components)
    }

    /// Mutable components of the pixel at `index`.
    pub fn pixel_mut(&mut self, index: &[i64; 2]) -> Option<&mut [P]> {
        let start = self.element_offset(index[0], index[1])?;
        let components = self.components;
        self.data.get_mut(start..start + components)
    }

    /// One component of one pixel.
    pub fn value(&self, x: i64, y: i64, band: usize) -> Option<P> {
        if band >= self.components {
            return None;
        }
        self.pixel(&[x, y]).map(|p| p[band])
    }

    /// `width` pixels of row `y` starting at column `x0`.
    pub fn row(&self, y: i64, x0: i64, width: u64) -> Option<&[P]> {
        let span = ImageRegion::new_2d(x0, y, width, 1);
        if width == 0 || !span.is_inside(&self.allocated_region) {
            return None;
        }
        let start = self.element_offset(x0, y)?;
        self.data.get(start..start + width as usize * self.components)
    }

    /// Mutable variant of [`ImageBuffer::row`].
    pub fn row_mut(&mut self, y: i64, x0: i64, width: u64) -> Option<&mut [P]> {
        let span = ImageRegion::new_2d(x0, y, width, 1);
        if width == 0 || !span.is_inside(&self.allocated_region) {
            return None;
        }
        let start = self.element_offset(x0, y)?;
        let len = width as usize * self.components;
        self.data.get_mut(start..start + len)
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: P) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Copy `region` from `source` into the same location of `self`.
    pub fn copy_region_from(
        &mut self,
        source: &ImageBuffer<P>,
        region: &ImageRegion,
    ) -> Result<(), BufferError> {
        if region.is_empty() {
            return Ok(());
        }
        if source.components != self.components {
            return Err(BufferError::ComponentMismatch {
                expected: self.components,
                got: source.components,
            });
        }
        check_inside(region, &source.allocated_region)?;
        check_inside(region, &self.allocated_region)?;

        for y in region.y()..region.y() + region.height() as i64 {
            let (Some(from), Some(to)) = (
                source.row(y, region.x(), region.width()),
                self.row_mut(y, region.x(), region.width()),
            ) else {
                return Err(BufferError::OutOfBounds {
                    region: *region,
                    allocated: self.allocated_region,
                });
            };
            to.copy_from_slice(from);
        }
        Ok(())
    }

    /// New buffer holding a copy of `region`.
    pub fn extract(&self, region: &ImageRegion) -> Result<ImageBuffer<P>, BufferError> {
        let mut out = ImageBuffer::allocate(*region, self.components, None)?;
        out.copy_region_from(self, region)?;
        Ok(out)
    }

    /// Borrow pairwise disjoint sub-regions mutably at the same time.
    ///
    /// The returned tiles are in the order of `regions`. Every region must lie
    /// inside the allocated region; empty regions give tiles without rows.
    pub fn split_tiles_mut(&mut self, regions: &[ImageRegion]) -> Result<Vec<TileMut<'_, P>>, BufferError> {
        let allocated = self.allocated_region;
        for (i, region) in regions.iter().enumerate() {
            check_inside(region, &allocated)?;
            for other in &regions[i + 1..] {
                if region.overlaps(other) {
                    return Err(BufferError::Overlap(*region, *other));
                }
            }
        }

        let components = self.components;
        let stride = self.row_stride();
        let mut tiles: Vec<TileMut<'_, P>> = regions
            .iter()
            .map(|region| TileMut {
                region: *region,
                components,
                rows: Vec::with_capacity(region.height() as usize),
            })
            .collect();

        let mut rest: &mut [P] = &mut self.data;
        for row_index in 0..allocated.height() {
            let (row, tail) = std::mem::take(&mut rest).split_at_mut(stride);
            rest = tail;
            let y = allocated.y() + row_index as i64;

            let mut hits: Vec<usize> = regions
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.is_empty() && y >= r.y() && y < r.y() + r.height() as i64)
                .map(|(i, _)| i)
                .collect();
            hits.sort_by_key(|&i| regions[i].x());

            let mut row_rest: &mut [P] = row;
            let mut consumed = 0usize;
            for i in hits {
                let start = (regions[i].x() - allocated.x()) as usize * components;
                let len = regions[i].width() as usize * components;
                let (_, after) = std::mem::take(&mut row_rest).split_at_mut(start - consumed);
                let (segment, after) = after.split_at_mut(len);
                tiles[i].rows.push(segment);
                row_rest = after;
                consumed = start + len;
            }
        }
        Ok(tiles)
    }
}

impl<P: Pixel> fmt::Debug for ImageBuffer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("pixel_type", &P::TYPE)
            .field("allocated_region", &self.allocated_region)
            .field("requested_region", &self.requested_region)
            .field("components", &self.components)
            .finish()
    }
}

fn element_count(region: &ImageRegion, components: usize) -> Option<usize> {
    let pixels = usize::try_from(region.number_of_pixels().ok()?).ok()?;
    pixels.checked_mul(components)
}

fn check_inside(region: &ImageRegion, allocated: &ImageRegion) -> Result<(), BufferError> {
    if region.is_inside(allocated) {
        Ok(())
    } else {
        Err(BufferError::OutOfBounds {
            region: *region,
            allocated: *allocated,
        })
    }
}

/// Mutable view on one sub-region of an [`ImageBuffer`].
///
/// Coordinates passed to the accessors are absolute grid coordinates.
pub struct TileMut<'a, P: Pixel> {
    region: ImageRegion,
    components: usize,
    rows: Vec<&'a mut [P]>,
}

impl<'a, P: Pixel> TileMut<'a, P> {
    /// Region covered by the tile.
    pub fn region(&self) -> ImageRegion {
        self.region
    }

    /// Elements per pixel.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Mutable elements of row `y`.
    pub fn row_mut(&mut self, y: i64) -> Option<&mut [P]> {
        let r = usize::try_from(y - self.region.y()).ok()?;
        self.rows.get_mut(r).map(|row| &mut **row)
    }

    /// Mutable rows; the first one is row `region().y()`.
    pub fn rows_mut(&mut self) -> &mut [&'a mut [P]] {
        &mut self.rows
    }

    /// Mutable components of the pixel at `(x, y)`.
    pub fn pixel_mut(&mut self, x: i64, y: i64) -> Option<&mut [P]> {
        let c = usize::try_from(x - self.region.x()).ok()?;
        if c as u64 >= self.region.width() {
            return None;
        }
        let components = self.components;
        self.row_mut(y)
            .map(|row| &mut row[c * components..(c + 1) * components])
    }

    /// Set every element of the tile.
    pub fn fill(&mut self, value: P) {
        for row in self.rows.iter_mut() {
            row.iter_mut().for_each(|v| *v = value);
        }
    }

    /// Copy the tile's region out of `source`.
    pub fn copy_from(&mut self, source: &ImageBuffer<P>) -> Result<(), BufferError> {
        if source.components() != self.components {
            return Err(BufferError::ComponentMismatch {
                expected: self.components,
                got: source.components(),
            });
        }
        check_inside(&self.region, &source.allocated_region())?;
        let (x, y0, width) = (self.region.x(), self.region.y(), self.region.width());
        for (i, row) in self.rows.iter_mut().enumerate() {
            if let Some(from) = source.row(y0 + i as i64, x, width) {
                row.copy_from_slice(from);
            }
        }
        Ok(())
    }
}

macro_rules! for_each_variant {
    ($value:expr, $enum:ident, $b:ident => $body:expr) => {
        match $value {
            $enum::U8($b) => $body,
            $enum::U16($b) => $body,
            $enum::I16($b) => $body,
            $enum::U32($b) => $body,
            $enum::I32($b) => $body,
            $enum::F32($b) => $body,
            $enum::F64($b) => $body,
        }
    };
}

/// Buffer of any supported pixel type.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyBuffer {
    U8(ImageBuffer<u8>),
    U16(ImageBuffer<u16>),
    I16(ImageBuffer<i16>),
    U32(ImageBuffer<u32>),
    I32(ImageBuffer<i32>),
    F32(ImageBuffer<f32>),
    F64(ImageBuffer<f64>),
}

impl AnyBuffer {
    /// Allocate a zero-filled buffer of the given pixel type.
    pub fn allocate(
        pixel_type: PixelType,
        region: ImageRegion,
        components: usize,
        limit: Option<u64>,
    ) -> Result<AnyBuffer, BufferError> {
        Ok(match pixel_type {
            PixelType::U8 => AnyBuffer::U8(ImageBuffer::allocate(region, components, limit)?),
            PixelType::U16 => AnyBuffer::U16(ImageBuffer::allocate(region, components, limit)?),
            PixelType::I16 => AnyBuffer::I16(ImageBuffer::allocate(region, components, limit)?),
            PixelType::U32 => AnyBuffer::U32(ImageBuffer::allocate(region, components, limit)?),
            PixelType::I32 => AnyBuffer::I32(ImageBuffer::allocate(region, components, limit)?),
            PixelType::F32 => AnyBuffer::F32(ImageBuffer::allocate(region, components, limit)?),
            PixelType::F64 => AnyBuffer::F64(ImageBuffer::allocate(region, components, limit)?),
        })
    }

    /// Element type tag.
    pub fn pixel_type(&self) -> PixelType {
        match self {
            AnyBuffer::U8(_) => PixelType::U8,
            AnyBuffer::U16(_) => PixelType::U16,
            AnyBuffer::I16(_) => PixelType::I16,
            AnyBuffer::U32(_) => PixelType::U32,
            AnyBuffer::I32(_) => PixelType::I32,
            AnyBuffer::F32(_) => PixelType::F32,
            AnyBuffer::F64(_) => PixelType::F64,
        }
    }

    /// Elements per pixel.
    pub fn components(&self) -> usize {
        for_each_variant!(self, AnyBuffer, b => b.components())
    }

    /// Physically backed region.
    pub fn allocated_region(&self) -> ImageRegion {
        for_each_variant!(self, AnyBuffer, b => b.allocated_region())
    }

    /// Logically valid region.
    pub fn requested_region(&self) -> ImageRegion {
        for_each_variant!(self, AnyBuffer, b => b.requested_region())
    }

    /// Restrict the logically valid region.
    pub fn set_requested_region(&mut self, region: ImageRegion) -> Result<(), BufferError> {
        for_each_variant!(self, AnyBuffer, b => b.set_requested_region(region))
    }

    /// One component converted to `f64`.
    pub fn value_f64(&self, x: i64, y: i64, band: usize) -> Option<f64> {
        for_each_variant!(self, AnyBuffer, b => b.value(x, y, band).map(Pixel::to_f64))
    }

    /// All components of one pixel converted to `f64` into `out`.
    ///
    /// Returns `false` (leaving `out` untouched) when the pixel is outside the
    /// allocation or `out` is shorter than the component count.
    pub fn pixel_f64(&self, x: i64, y: i64, out: &mut [f64]) -> bool {
        for_each_variant!(self, AnyBuffer, b => match b.pixel(&[x, y]) {
            Some(p) if out.len() >= p.len() => {
                for (o, v) in out.iter_mut().zip(p) {
                    *o = v.to_f64();
                }
                true
            }
            _ => false,
        })
    }

    /// Byte view of the storage.
    pub fn as_bytes(&self) -> &[u8] {
        for_each_variant!(self, AnyBuffer, b => b.as_bytes())
    }

    /// Size of the storage in bytes.
    pub fn memory_size(&self) -> usize {
        for_each_variant!(self, AnyBuffer, b => b.memory_size())
    }

    /// Borrow as a typed buffer.
    pub fn as_typed<P: Pixel>(&self) -> Option<&ImageBuffer<P>> {
        P::buffer_ref(self)
    }

    /// Mutably borrow as a typed buffer.
    pub fn as_typed_mut<P: Pixel>(&mut self) -> Option<&mut ImageBuffer<P>> {
        P::buffer_mut(self)
    }

    /// Copy `region` from a buffer of the same pixel type.
    pub fn copy_region_from(&mut self, source: &AnyBuffer, region: &ImageRegion) -> Result<(), BufferError> {
        let (expected, got) = (self.pixel_type(), source.pixel_type());
        match (self, source) {
            (AnyBuffer::U8(d), AnyBuffer::U8(s)) => d.copy_region_from(s, region),
            (AnyBuffer::U16(d), AnyBuffer::U16(s)) => d.copy_region_from(s, region),
            (AnyBuffer::I16(d), AnyBuffer::I16(s)) => d.copy_region_from(s, region),
            (AnyBuffer::U32(d), AnyBuffer::U32(s)) => d.copy_region_from(s, region),
            (AnyBuffer::I32(d), AnyBuffer::I32(s)) => d.copy_region_from(s, region),
            (AnyBuffer::F32(d), AnyBuffer::F32(s)) => d.copy_region_from(s, region),
            (AnyBuffer::F64(d), AnyBuffer::F64(s)) => d.copy_region_from(s, region),
            _ => Err(BufferError::TypeMismatch { expected, got }),
        }
    }

    /// New buffer holding a copy of `region`.
    pub fn extract(&self, region: &ImageRegion) -> Result<AnyBuffer, BufferError> {
        Ok(for_each_variant!(self, AnyBuffer, b => b.extract(region)?.into()))
    }

    /// Borrow pairwise disjoint sub-regions mutably at the same time.
    pub fn split_tiles_mut(&mut self, regions: &[ImageRegion]) -> Result<Vec<AnyTileMut<'_>>, BufferError> {
        Ok(match self {
            AnyBuffer::U8(b) => b.split_tiles_mut(regions)?.into_iter().map(AnyTileMut::U8).collect(),
            AnyBuffer::U16(b) => b.split_tiles_mut(regions)?.into_iter().map(AnyTileMut::U16).collect(),
            AnyBuffer::I16(b) => b.split_tiles_mut(regions)?.into_iter().map(AnyTileMut::I16).collect(),
            AnyBuffer::U32(b) => b.split_tiles_mut(regions)?.into_iter().map(AnyTileMut::U32).collect(),
            AnyBuffer::I32(b) => b.split_tiles_mut(regions)?.into_iter().map(AnyTileMut::I32).collect(),
            AnyBuffer::F32(b) => b.split_tiles_mut(regions)?.into_iter().map(AnyTileMut::F32).collect(),
            AnyBuffer::F64(b) => b.split_tiles_mut(regions)?.into_iter().map(AnyTileMut::F64).collect(),
        })
    }
}

impl<P: Pixel> From<ImageBuffer<P>> for AnyBuffer {
    fn from(buffer: ImageBuffer<P>) -> Self {
        P::into_any(buffer)
    }
}

/// Mutable tile view of any supported pixel type.
pub enum AnyTileMut<'a> {
    U8(TileMut<'a, u8>),
    U16(TileMut<'a, u16>),
    I16(TileMut<'a, i16>),
    U32(TileMut<'a, u32>),
    I32(TileMut<'a, i32>),
    F32(TileMut<'a, f32>),
    F64(TileMut<'a, f64>),
}

impl<'a> AnyTileMut<'a> {
    /// Region covered by the tile.
    pub fn region(&self) -> ImageRegion {
        for_each_variant!(self, AnyTileMut, t => t.region())
    }

    /// Elements per pixel.
    pub fn components(&self) -> usize {
        for_each_variant!(self, AnyTileMut, t => t.components())
    }

    /// Element type tag.
    pub fn pixel_type(&self) -> PixelType {
        match self {
            AnyTileMut::U8(_) => PixelType::U8,
            AnyTileMut::U16(_) => PixelType::U16,
            AnyTileMut::I16(_) => PixelType::I16,
            AnyTileMut::U32(_) => PixelType::U32,
            AnyTileMut::I32(_) => PixelType::I32,
            AnyTileMut::F32(_) => PixelType::F32,
            AnyTileMut::F64(_) => PixelType::F64,
        }
    }

    /// Borrow as a typed tile.
    pub fn as_typed_mut<P: Pixel>(&mut self) -> Option<&mut TileMut<'a, P>> {
        P::tile_mut(self)
    }

    /// Set one component from an `f64`, saturating to the pixel type.
    pub fn set_f64(&mut self, x: i64, y: i64, band: usize, value: f64) -> bool {
        for_each_variant!(self, AnyTileMut, t => match t.pixel_mut(x, y).and_then(|p| p.get_mut(band)) {
            Some(slot) => {
                *slot = Pixel::from_f64(value);
                true
            }
            None => false,
        })
    }

    /// Set all components of one pixel from `f64` values.
    pub fn set_pixel_f64(&mut self, x: i64, y: i64, values: &[f64]) -> bool {
        for_each_variant!(self, AnyTileMut, t => match t.pixel_mut(x, y) {
            Some(p) => {
                for (slot, v) in p.iter_mut().zip(values) {
                    *slot = Pixel::from_f64(*v);
                }
                true
            }
            None => false,
        })
    }

    /// Set every component of every pixel of the tile.
    pub fn fill_f64(&mut self, value: f64) {
        for_each_variant!(self, AnyTileMut, t => t.fill(Pixel::from_f64(value)))
    }

    /// Copy the tile's region out of a buffer of the same pixel type.
    pub fn copy_from(&mut self, source: &AnyBuffer) -> Result<(), BufferError> {
        let (expected, got) = (self.pixel_type(), source.pixel_type());
        match (self, source) {
            (AnyTileMut::U8(t), AnyBuffer::U8(s)) => t.copy_from(s),
            (AnyTileMut::U16(t), AnyBuffer::U16(s)) => t.copy_from(s),
            (AnyTileMut::I16(t), AnyBuffer::I16(s)) => t.copy_from(s),
            (AnyTileMut::U32(t), AnyBuffer::U32(s)) => t.copy_from(s),
            (AnyTileMut::I32(t), AnyBuffer::I32(s)) => t.copy_from(s),
            (AnyTileMut::F32(t), AnyBuffer::F32(s)) => t.copy_from(s),
            (AnyTileMut::F64(t), AnyBuffer::F64(s)) => t.copy_from(s),
            _ => Err(BufferError::TypeMismatch { expected, got }),
        }
    }
}
