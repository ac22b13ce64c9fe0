//! Axis-aligned integer regions over an N-dimensional pixel grid.
//!
//! A [`Region`] is a plain value type made of an `index` (origin) and a `size`
//! (extent per dimension). Dimension 0 is the fastest varying one (columns for
//! images), the last dimension is the slowest varying one (rows for images).
//!
//! All set operations are computed in `i128` so that combining regions close
//! to the `i64` limits can never wrap silently; padding reports overflow as a
//! [`RegionError`].

use crate::core::error::RegionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned hyper-rectangle: `index` plus `size` in every dimension.
///
/// A region with any size component equal to zero is empty and contains no
/// pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RegionRepr", into = "RegionRepr")]
pub struct Region<const D: usize> {
    index: [i64; D],
    size: [u64; D],
}

/// The two-dimensional region used by the image pipeline.
pub type ImageRegion = Region<2>;

/// Serialized form of a region (serde cannot derive for const-generic arrays).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegionRepr {
    index: Vec<i64>,
    size: Vec<u64>,
}

impl<const D: usize> From<Region<D>> for RegionRepr {
    fn from(region: Region<D>) -> Self {
        Self {
            index: region.index.to_vec(),
            size: region.size.to_vec(),
        }
    }
}

impl<const D: usize> TryFrom<RegionRepr> for Region<D> {
    type Error = RegionError;

    fn try_from(repr: RegionRepr) -> Result<Self, Self::Error> {
        let index: [i64; D] = repr
            .index
            .try_into()
            .map_err(|v: Vec<i64>| RegionError::DimensionMismatch { expected: D, got: v.len() })?;
        let size: [u64; D] = repr
            .size
            .try_into()
            .map_err(|v: Vec<u64>| RegionError::DimensionMismatch { expected: D, got: v.len() })?;
        Region::try_new(index, size)
    }
}

impl<const D: usize> Default for Region<D> {
    fn default() -> Self {
        Self {
            index: [0; D],
            size: [0; D],
        }
    }
}

impl<const D: usize> Region<D> {
    /// Create a region without checking that `index + size` is representable.
    ///
    /// Use [`Region::try_new`] for untrusted values.
    pub const fn new(index: [i64; D], size: [u64; D]) -> Self {
        Self { index, size }
    }

    /// Create a region, checking that its end is representable as `i64`.
    pub fn try_new(index: [i64; D], size: [u64; D]) -> Result<Self, RegionError> {
        for d in 0..D {
            let end = index[d] as i128 + size[d] as i128;
            if end > i64::MAX as i128 {
                return Err(RegionError::Overflow {
                    dimension: d,
                    operation: "construct",
                });
            }
        }
        Ok(Self { index, size })
    }

    /// Region starting at the origin.
    pub const fn from_size(size: [u64; D]) -> Self {
        Self { index: [0; D], size }
    }

    /// Origin of the region.
    pub fn index(&self) -> [i64; D] {
        self.index
    }

    /// Extent of the region.
    pub fn size(&self) -> [u64; D] {
        self.size
    }

    /// Exclusive end along one dimension, widened so it cannot overflow.
    fn end_wide(&self, d: usize) -> i128 {
        self.index[d] as i128 + self.size[d] as i128
    }

    /// Exclusive end along dimension `d`.
    pub fn end(&self, d: usize) -> Result<i64, RegionError> {
        i64::try_from(self.end_wide(d)).map_err(|_| RegionError::Overflow {
            dimension: d,
            operation: "end",
        })
    }

    /// Whether the region contains no pixels.
    pub fn is_empty(&self) -> bool {
        self.size.iter().any(|&s| s == 0)
    }

    /// Number of pixels, or an error if it does not fit in `u64`.
    pub fn number_of_pixels(&self) -> Result<u64, RegionError> {
        self.size.iter().enumerate().try_fold(1u64, |acc, (d, &s)| {
            acc.checked_mul(s).ok_or(RegionError::Overflow {
                dimension: d,
                operation: "number_of_pixels",
            })
        })
    }

    /// Whether the given grid index lies inside the region.
    pub fn contains_index(&self, index: &[i64; D]) -> bool {
        (0..D).all(|d| {
            let i = index[d] as i128;
            i >= self.index[d] as i128 && i < self.end_wide(d)
        })
    }

    /// Whether `self` lies entirely inside `other`. An empty region is inside
    /// every region.
    pub fn is_inside(&self, other: &Region<D>) -> bool {
        if self.is_empty() {
            return true;
        }
        if other.is_empty() {
            return false;
        }
        (0..D).all(|d| {
            self.index[d] as i128 >= other.index[d] as i128 && self.end_wide(d) <= other.end_wide(d)
        })
    }

    /// Whether the two regions share at least one pixel.
    pub fn overlaps(&self, other: &Region<D>) -> bool {
        !self.intersection(other).is_empty()
    }

    /// Intersection of two regions. Disjoint regions give an empty region.
    pub fn intersection(&self, other: &Region<D>) -> Region<D> {
        if self.is_empty() || other.is_empty() {
            return Region {
                index: self.index,
                size: [0; D],
            };
        }
        let mut index = [0i64; D];
        let mut size = [0u64; D];
        for d in 0..D {
            let start = self.index[d].max(other.index[d]);
            let end = self.end_wide(d).min(other.end_wide(d));
            index[d] = start;
            // Widened end minus start is at most u64::MAX; negative means disjoint.
            size[d] = if end > start as i128 {
                (end - start as i128) as u64
            } else {
                0
            };
        }
        if size.iter().any(|&s| s == 0) {
            size = [0; D];
        }
        Region { index, size }
    }

    /// Smallest region covering both. An empty operand is ignored.
    pub fn union(&self, other: &Region<D>) -> Region<D> {
        if other.is_empty() {
            return *self;
        }
        if self.is_empty() {
            return *other;
        }
        let mut index = [0i64; D];
        let mut size = [0u64; D];
        for d in 0..D {
            let start = self.index[d].min(other.index[d]);
            let end = self.end_wide(d).max(other.end_wide(d));
            index[d] = start;
            size[d] = u64::try_from(end - start as i128).unwrap_or(u64::MAX);
        }
        Region { index, size }
    }

    /// Expand by `radius` in both directions of every dimension, with no bound.
    pub fn pad(&self, radius: &[u64; D]) -> Result<Region<D>, RegionError> {
        let mut index = [0i64; D];
        let mut size = [0u64; D];
        for d in 0..D {
            let start = self.index[d] as i128 - radius[d] as i128;
            let extent = self.size[d] as i128 + 2 * radius[d] as i128;
            if start < i64::MIN as i128 || start + extent > i64::MAX as i128 {
                return Err(RegionError::Overflow {
                    dimension: d,
                    operation: "pad",
                });
            }
            index[d] = start as i64;
            size[d] = u64::try_from(extent).map_err(|_| RegionError::Overflow {
                dimension: d,
                operation: "pad",
            })?;
        }
        Ok(Region { index, size })
    }

    /// Expand by the same radius in every dimension.
    pub fn pad_uniform(&self, radius: u64) -> Result<Region<D>, RegionError> {
        self.pad(&[radius; D])
    }

    /// Crop against `bound`. The result is empty (not an error) when the
    /// regions are disjoint; callers must check [`Region::is_empty`].
    pub fn crop(&self, bound: &Region<D>) -> Region<D> {
        self.intersection(bound)
    }

    /// Split along dimension `d` at `offset` pixels from the start.
    ///
    /// `offset` is clamped to the extent; one side may be empty.
    pub fn split_at(&self, d: usize, offset: u64) -> (Region<D>, Region<D>) {
        let offset = offset.min(self.size[d]);
        let mut head = *self;
        let mut tail = *self;
        head.size[d] = offset;
        tail.index[d] = self.index[d] + offset as i64;
        tail.size[d] = self.size[d] - offset;
        (head, tail)
    }

    /// Sub-region spanning `[start, start + len)` along dimension `d`.
    pub fn slice(&self, d: usize, start: u64, len: u64) -> Region<D> {
        let mut out = *self;
        out.index[d] = self.index[d] + start as i64;
        out.size[d] = len.min(self.size[d].saturating_sub(start));
        out
    }

    /// Dimension with the largest extent (lowest index on ties).
    pub fn largest_dimension(&self) -> usize {
        let mut best = 0;
        for d in 1..D {
            if self.size[d] > self.size[best] {
                best = d;
            }
        }
        best
    }

    /// Row-major offset of `index` relative to this region (dimension 0 fastest).
    pub fn offset_of(&self, index: &[i64; D]) -> Option<usize> {
        if !self.contains_index(index) {
            return None;
        }
        let mut offset: usize = 0;
        let mut stride: usize = 1;
        for d in 0..D {
            let rel = usize::try_from(index[d] - self.index[d]).ok()?;
            offset = offset.checked_add(rel.checked_mul(stride)?)?;
            stride = stride.checked_mul(usize::try_from(self.size[d]).ok()?)?;
        }
        Some(offset)
    }
}

impl Region<2> {
    /// Two-dimensional region from column/row origin and width/height.
    pub const fn new_2d(x: i64, y: i64, width: u64, height: u64) -> Self {
        Self {
            index: [x, y],
            size: [width, height],
        }
    }

    /// First column.
    pub fn x(&self) -> i64 {
        self.index[0]
    }

    /// First row.
    pub fn y(&self) -> i64 {
        self.index[1]
    }

    /// Number of columns.
    pub fn width(&self) -> u64 {
        self.size[0]
    }

    /// Number of rows.
    pub fn height(&self) -> u64 {
        self.size[1]
    }
}

impl<const D: usize> fmt::Display for Region<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[index {:?}, size {:?}]", self.index, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_region() {
        let region = ImageRegion::new_2d(3, 4, 0, 10);
        assert!(region.is_empty());
        assert_eq!(region.number_of_pixels().unwrap(), 0);
        assert!(region.is_inside(&ImageRegion::new_2d(100, 100, 1, 1)));
    }

    #[test]
    fn test_intersection_and_crop() {
        let a = ImageRegion::new_2d(0, 0, 10, 10);
        let b = ImageRegion::new_2d(5, -3, 10, 5);
        assert_eq!(a.intersection(&b), ImageRegion::new_2d(5, 0, 5, 2));

        let disjoint = ImageRegion::new_2d(20, 20, 4, 4);
        assert!(a.crop(&disjoint).is_empty());
        assert!(ImageRegion::default().intersection(&a).is_empty());
    }

    #[test]
    fn test_union_ignores_empty() {
        let a = ImageRegion::new_2d(0, 0, 2, 2);
        let b = ImageRegion::new_2d(5, 5, 1, 1);
        assert_eq!(a.union(&b), ImageRegion::new_2d(0, 0, 6, 6));
        assert_eq!(a.union(&ImageRegion::default()), a);
        assert_eq!(ImageRegion::default().union(&b), b);
    }

    #[test]
    fn test_pad_then_crop_at_border() {
        let bound = ImageRegion::new_2d(0, 0, 10, 10);
        let corner = ImageRegion::new_2d(0, 0, 1, 1);
        let padded = corner.pad_uniform(2).unwrap();
        assert_eq!(padded, ImageRegion::new_2d(-2, -2, 5, 5));
        assert_eq!(padded.crop(&bound), ImageRegion::new_2d(0, 0, 3, 3));
    }

    #[test]
    fn test_pad_overflow_is_reported() {
        let near_max = ImageRegion::new_2d(i64::MAX - 4, 0, 2, 2);
        assert!(matches!(
            near_max.pad_uniform(8),
            Err(RegionError::Overflow { dimension: 0, .. })
        ));

        let near_min = ImageRegion::new_2d(0, i64::MIN + 1, 2, 2);
        assert!(matches!(
            near_min.pad_uniform(3),
            Err(RegionError::Overflow { dimension: 1, .. })
        ));
    }

    #[test]
    fn test_try_new_rejects_unrepresentable_end() {
        assert!(ImageRegion::try_new([i64::MAX, 0], [1, 1]).is_err());
        assert!(ImageRegion::try_new([i64::MAX - 1, 0], [1, 1]).is_ok());
    }

    #[test]
    fn test_is_inside_and_contains() {
        let outer = ImageRegion::new_2d(0, 0, 4, 4);
        assert!(ImageRegion::new_2d(1, 1, 2, 2).is_inside(&outer));
        assert!(!ImageRegion::new_2d(3, 3, 2, 2).is_inside(&outer));
        assert!(outer.contains_index(&[3, 0]));
        assert!(!outer.contains_index(&[4, 0]));
    }

    #[test]
    fn test_offset_of_is_row_major() {
        let region = ImageRegion::new_2d(10, 20, 4, 3);
        assert_eq!(region.offset_of(&[10, 20]), Some(0));
        assert_eq!(region.offset_of(&[11, 20]), Some(1));
        assert_eq!(region.offset_of(&[10, 21]), Some(4));
        assert_eq!(region.offset_of(&[14, 20]), None);
    }

    #[test]
    fn test_split_at() {
        let region = ImageRegion::new_2d(0, 0, 8, 5);
        let (head, tail) = region.split_at(1, 2);
        assert_eq!(head, ImageRegion::new_2d(0, 0, 8, 2));
        assert_eq!(tail, ImageRegion::new_2d(0, 2, 8, 3));
        assert_eq!(region.largest_dimension(), 0);
    }

    #[test]
    fn test_three_dimensional_region() {
        let cube = Region::<3>::from_size([4, 4, 4]);
        let inner = Region::<3>::new([1, 1, 1], [2, 2, 2]);
        assert_eq!(cube.number_of_pixels().unwrap(), 64);
        assert_eq!(inner.pad_uniform(1).unwrap(), cube);
    }

    #[test]
    fn test_serde_round_trip_checks_dimension() {
        let region = ImageRegion::new_2d(1, 2, 3, 4);
        let json = serde_json::to_string(&region).unwrap();
        let back: ImageRegion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, region);

        let bad = r#"{"index":[1,2,3],"size":[1,1,1]}"#;
        assert!(serde_json::from_str::<ImageRegion>(bad).is_err());
    }
}
