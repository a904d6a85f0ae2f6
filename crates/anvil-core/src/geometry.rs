#![forbid(unsafe_code)]

//! Geometric primitives.

use serde::{Deserialize, Serialize};

/// A rectangle in viewport pixels.
///
/// Origin is the top-left corner of the canvas viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge (inclusive).
    pub x: u32,
    /// Top edge (inclusive).
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from origin with given size.
    #[inline]
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Right edge (exclusive).
    #[inline]
    pub const fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Check if a pointer position is inside the rectangle.
    ///
    /// Negative coordinates are never inside.
    #[inline]
    pub fn contains(&self, point: Point) -> bool {
        let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
            return false;
        };
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Extent of the rectangle along `axis`.
    #[inline]
    pub const fn extent(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Horizontal => self.width,
            Axis::Vertical => self.height,
        }
    }

    /// Start coordinate of the rectangle along `axis`.
    #[inline]
    pub const fn start(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Horizontal => self.x,
            Axis::Vertical => self.y,
        }
    }

    /// End coordinate (exclusive) of the rectangle along `axis`.
    #[inline]
    pub const fn end(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Horizontal => self.right(),
            Axis::Vertical => self.bottom(),
        }
    }

    /// Carve a band out of this rectangle along `axis`.
    ///
    /// `offset` is relative to the rectangle's start on that axis; the cross
    /// extent is kept whole.
    #[must_use]
    pub const fn band(&self, axis: Axis, offset: u32, extent: u32) -> Rect {
        match axis {
            Axis::Horizontal => Rect::new(
                self.x.saturating_add(offset),
                self.y,
                extent,
                self.height,
            ),
            Axis::Vertical => Rect::new(
                self.x,
                self.y.saturating_add(offset),
                self.width,
                extent,
            ),
        }
    }

    /// Center of the rectangle along `axis`, doubled to stay integral.
    #[inline]
    pub const fn doubled_center(&self, axis: Axis) -> u64 {
        self.start(axis) as u64 * 2 + self.extent(axis) as u64
    }
}

/// A pointer position in viewport pixels.
///
/// Signed so that positions dragged outside the canvas remain representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Coordinate along `axis`.
    #[inline]
    pub const fn along(&self, axis: Axis) -> i32 {
        match axis {
            Axis::Horizontal => self.x,
            Axis::Vertical => self.y,
        }
    }
}

/// A measured or requested size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Extent along `axis`.
    #[inline]
    pub const fn along(&self, axis: Axis) -> u32 {
        match axis {
            Axis::Horizontal => self.width,
            Axis::Vertical => self.height,
        }
    }
}

/// The direction a container lays out its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Left to right.
    #[default]
    Horizontal,
    /// Top to bottom.
    Vertical,
}

impl Axis {
    /// The perpendicular axis.
    #[must_use]
    pub const fn cross(self) -> Self {
        match self {
            Self::Horizontal => Self::Vertical,
            Self::Vertical => Self::Horizontal,
        }
    }
}
