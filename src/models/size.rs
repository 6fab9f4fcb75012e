//! Pixel dimensions and the pure geometry used to derive thumbnail sizes.
//!
//! Every function here is free of I/O. Rounding always uses `f64::round`
//! (half away from zero) on the scaled edge, which is what the upstream
//! pipeline uses when naming its confined renders.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Orientation of a [`Size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Landscape,
    Portrait,
    Square,
}

/// A `(width, height)` pair in pixels.
///
/// Serializes as a two element array `[w, h]`, which is the shape used by
/// the `s.json` manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("`{0}` is not a `width,height` pair")]
pub struct InvalidSize(pub String);

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A square with both edges set to `edge`.
    pub const fn square(edge: u32) -> Self {
        Self::new(edge, edge)
    }

    /// Length of the longest edge. This is the "confining edge" used to
    /// name derivatives.
    pub fn max_dimension(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn shape(&self) -> Shape {
        match self.width.cmp(&self.height) {
            std::cmp::Ordering::Greater => Shape::Landscape,
            std::cmp::Ordering::Less => Shape::Portrait,
            std::cmp::Ordering::Equal => Shape::Square,
        }
    }

    /// True if both edges fit inside `other`.
    pub fn is_confined_within(&self, other: &Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Confine `real` to a bounding square of edge `bounding_square`.
    ///
    /// The long edge becomes `bounding_square` and the short edge is scaled
    /// and rounded. Images already inside the square are returned as-is;
    /// confinement never upscales.
    pub fn confine(bounding_square: u32, real: Size) -> Size {
        if real.max_dimension() <= bounding_square {
            return real;
        }

        match real.shape() {
            Shape::Landscape => Size::new(
                bounding_square,
                scale_edge(bounding_square, real.height, real.width),
            ),
            Shape::Portrait => Size::new(
                scale_edge(bounding_square, real.width, real.height),
                bounding_square,
            ),
            Shape::Square => Size::square(bounding_square),
        }
    }

    /// Scale `size`, up or down, so that it fits inside `bounds` while
    /// keeping its aspect ratio. The edge that hits the box is exact.
    pub fn fit_within(bounds: Size, size: Size) -> Size {
        if size.width == 0 || size.height == 0 {
            return Size::new(0, 0);
        }

        let width_scale = bounds.width as f64 / size.width as f64;
        let height_scale = bounds.height as f64 / size.height as f64;
        if width_scale <= height_scale {
            Size::new(bounds.width, scale_edge(bounds.width, size.height, size.width))
        } else {
            Size::new(scale_edge(bounds.height, size.width, size.height), bounds.height)
        }
    }

    /// Resize `size` to the requested width and/or height. When only one
    /// edge is given the other is derived from the aspect ratio; when
    /// neither is given `size` is returned unchanged.
    pub fn resize(size: Size, width: Option<u32>, height: Option<u32>) -> Size {
        match (width, height) {
            (Some(w), Some(h)) => Size::new(w, h),
            (Some(w), None) if size.width > 0 => {
                Size::new(w, scale_edge(w, size.height, size.width))
            }
            (None, Some(h)) if size.height > 0 => {
                Size::new(scale_edge(h, size.width, size.height), h)
            }
            _ => size,
        }
    }

    /// Percentage by which `target`'s long edge exceeds `source`'s.
    /// Negative when `target` is smaller.
    pub fn size_increase_percent(target: &Size, source: &Size) -> f64 {
        let source_max = source.max_dimension();
        if source_max == 0 {
            return f64::INFINITY;
        }
        (target.max_dimension() as f64 / source_max as f64 - 1.0) * 100.0
    }
}

/// `edge * numerator / denominator`, rounded.
fn scale_edge(edge: u32, numerator: u32, denominator: u32) -> u32 {
    (edge as f64 * numerator as f64 / denominator as f64).round() as u32
}

impl From<[u32; 2]> for Size {
    fn from(wh: [u32; 2]) -> Self {
        Size::new(wh[0], wh[1])
    }
}

impl From<Size> for [u32; 2] {
    fn from(size: Size) -> Self {
        [size.width, size.height]
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = InvalidSize;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s.split_once(',').ok_or_else(|| InvalidSize(s.to_string()))?;
        let width = w.parse().map_err(|_| InvalidSize(s.to_string()))?;
        let height = h.parse().map_err(|_| InvalidSize(s.to_string()))?;
        Ok(Size::new(width, height))
    }
}
