//! Pixel element types.
//!
//! Buffers store one scalar element type; multi-band (vector) pixels are
//! expressed as a component count with interleaved storage. The closed set of
//! element types is mirrored by the [`PixelType`] tag so that pipeline nodes
//! with different pixel types can live in the same arena.

use crate::core::buffer::{AnyBuffer, AnyTileMut, ImageBuffer, TileMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag naming a pixel element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl PixelType {
    /// Size of one element in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 | PixelType::I16 => 2,
            PixelType::U32 | PixelType::I32 | PixelType::F32 => 4,
            PixelType::F64 => 8,
        }
    }

    /// Whether the type is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, PixelType::F32 | PixelType::F64)
    }

    /// All pixel types.
    pub fn all() -> &'static [PixelType] {
        &[
            PixelType::U8,
            PixelType::U16,
            PixelType::I16,
            PixelType::U32,
            PixelType::I32,
            PixelType::F32,
            PixelType::F64,
        ]
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelType::U8 => "u8",
            PixelType::U16 => "u16",
            PixelType::I16 => "i16",
            PixelType::U32 => "u32",
            PixelType::I32 => "i32",
            PixelType::F32 => "f32",
            PixelType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A scalar pixel element.
///
/// `to_f64` is lossless for every implementor; `from_f64` rounds to the
/// nearest value and saturates at the type bounds (NaN maps to zero for
/// integer types).
///
/// The downcast helpers connect each element type to its variant of the
/// tagged [`AnyBuffer`] / [`AnyTileMut`] containers.
pub trait Pixel:
    bytemuck::Pod + Default + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Tag of this element type.
    const TYPE: PixelType;

    /// Convert to `f64`.
    fn to_f64(self) -> f64;

    /// Convert from `f64`.
    fn from_f64(value: f64) -> Self;

    /// Borrow the typed buffer if `buffer` holds this element type.
    fn buffer_ref(buffer: &AnyBuffer) -> Option<&ImageBuffer<Self>>;

    /// Mutably borrow the typed buffer if `buffer` holds this element type.
    fn buffer_mut(buffer: &mut AnyBuffer) -> Option<&mut ImageBuffer<Self>>;

    /// Wrap a typed buffer into the tagged container.
    fn into_any(buffer: ImageBuffer<Self>) -> AnyBuffer;

    /// Mutably borrow the typed tile if `tile` holds this element type.
    fn tile_mut<'t, 'a>(tile: &'t mut AnyTileMut<'a>) -> Option<&'t mut TileMut<'a, Self>>;
}

macro_rules! impl_pixel {
    ($ty:ty, $variant:ident, |$v:ident| $from:expr) => {
        impl Pixel for $ty {
            const TYPE: PixelType = PixelType::$variant;

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64($v: f64) -> Self {
                $from
            }

            fn buffer_ref(buffer: &AnyBuffer) -> Option<&ImageBuffer<Self>> {
                match buffer {
                    AnyBuffer::$variant(b) => Some(b),
                    _ => None,
                }
            }

            fn buffer_mut(buffer: &mut AnyBuffer) -> Option<&mut ImageBuffer<Self>> {
                match buffer {
                    AnyBuffer::$variant(b) => Some(b),
                    _ => None,
                }
            }

            fn into_any(buffer: ImageBuffer<Self>) -> AnyBuffer {
                AnyBuffer::$variant(buffer)
            }

            fn tile_mut<'t, 'a>(tile: &'t mut AnyTileMut<'a>) -> Option<&'t mut TileMut<'a, Self>> {
                match tile {
                    AnyTileMut::$variant(t) => Some(t),
                    _ => None,
                }
            }
        }
    };
}

// Integer `as` casts saturate and map NaN to zero.
impl_pixel!(u8, U8, |v| v.round() as u8);
impl_pixel!(u16, U16, |v| v.round() as u16);
impl_pixel!(i16, I16, |v| v.round() as i16);
impl_pixel!(u32, U32, |v| v.round() as u32);
impl_pixel!(i32, I32, |v| v.round() as i32);
impl_pixel!(f32, F32, |v| v as f32);
impl_pixel!(f64, F64, |v| v);
