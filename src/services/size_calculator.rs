//! Thumbnail size calculations.
//!
//! All functions here are pure: they partition policy sizes into open and
//! auth lists, and resolve a requested IIIF size against known derivative
//! sizes.

use crate::models::{
    asset::AuthAttributes,
    manifest::{AccessLevel, ThumbnailSizeManifest},
    size::{Shape, Size},
    size_request::SizeParameter,
};

/// Result of matching a requested size against known sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCandidate {
    /// No derivative matches and resizing was not allowed (or impossible).
    Unknown,
    /// A derivative with this long edge satisfies the request exactly.
    Known { longest_edge: u32 },
    /// No exact match; `ideal` could be produced by resizing `larger`
    /// (downscale) or `smaller` (upscale). Either may be absent at the ends
    /// of the list.
    Resizable {
        ideal: Size,
        larger: Option<Size>,
        smaller: Option<Size>,
    },
}

impl SizeCandidate {
    pub fn is_known(&self) -> bool {
        matches!(self, SizeCandidate::Known { .. })
    }

    pub fn longest_edge(&self) -> Option<u32> {
        match self {
            SizeCandidate::Known { longest_edge } => Some(*longest_edge),
            _ => None,
        }
    }

    pub fn ideal(&self) -> Option<Size> {
        match self {
            SizeCandidate::Resizable { ideal, .. } => Some(*ideal),
            _ => None,
        }
    }

    pub fn larger_size(&self) -> Option<Size> {
        match self {
            SizeCandidate::Resizable { larger, .. } => *larger,
            _ => None,
        }
    }

    pub fn smaller_size(&self) -> Option<Size> {
        match self {
            SizeCandidate::Resizable { smaller, .. } => *smaller,
            _ => None,
        }
    }
}

/// Confine `real` to each bounding square, largest square first.
///
/// Squares that confine to a size already produced by a larger square are
/// dropped, so the first (largest) policy entry wins.
pub fn confined_sizes(real: Size, bounding_squares: &[u32]) -> Vec<Size> {
    let mut squares: Vec<u32> = bounding_squares.iter().copied().filter(|s| *s > 0).collect();
    squares.sort_unstable_by(|a, b| b.cmp(a));

    let mut sizes: Vec<Size> = Vec::with_capacity(squares.len());
    for square in squares {
        let size = Size::confine(square, real);
        if !sizes.contains(&size) {
            sizes.push(size);
        }
    }
    sizes
}

/// Every size the policy yields for an asset, each paired with its access
/// level, largest first.
pub fn classified_sizes(
    real: Size,
    bounding_squares: &[u32],
    auth: &AuthAttributes,
) -> Vec<(Size, AccessLevel)> {
    confined_sizes(real, bounding_squares)
        .into_iter()
        .map(|size| (size, auth.access_for(&size)))
        .collect()
}

/// Partition the policy sizes for an asset into open and auth lists.
pub fn get_available_sizes(
    real: Size,
    bounding_squares: &[u32],
    auth: &AuthAttributes,
) -> ThumbnailSizeManifest {
    let mut manifest = ThumbnailSizeManifest::new();
    for (size, access) in classified_sizes(real, bounding_squares, auth) {
        manifest.add(size, access);
    }
    manifest
}

/// Resolve `request` against `known` sizes (normally a manifest's open
/// list).
///
/// Without `allow_resize` the answer is `Known` or `Unknown`. With it, a
/// miss becomes `Resizable`, bracketing the ideal size between the known
/// sizes either side of it.
pub fn get_candidate(known: &[Size], request: &SizeParameter, allow_resize: bool) -> SizeCandidate {
    if known.is_empty() {
        return SizeCandidate::Unknown;
    }

    if let Some(longest_edge) = find_longest_edge(known, request) {
        return SizeCandidate::Known { longest_edge };
    }

    if !allow_resize {
        return SizeCandidate::Unknown;
    }

    let mut descending = known.to_vec();
    descending.sort_by(|a, b| b.max_dimension().cmp(&a.max_dimension()));
    let largest = descending[0];

    let ideal = match (request.confined, request.width, request.height) {
        (true, Some(w), Some(h)) => Size::fit_within(Size::new(w, h), largest),
        _ => Size::resize(largest, request.width, request.height),
    };

    let fits = descending
        .iter()
        .take_while(|s| ideal.is_confined_within(s))
        .count();

    SizeCandidate::Resizable {
        ideal,
        larger: fits.checked_sub(1).map(|i| descending[i]),
        smaller: descending.get(fits).copied(),
    }
}

/// Long edge of a known size that satisfies `request` without resizing.
fn find_longest_edge(known: &[Size], request: &SizeParameter) -> Option<u32> {
    if request.max {
        return known.iter().map(Size::max_dimension).max();
    }

    if let (Some(width), Some(height)) = (request.width, request.height) {
        let max = width.max(height);

        if request.confined && confined_match(known, width, height, max) {
            return Some(max);
        }

        return known
            .iter()
            .any(|s| s.width == width && s.height == height)
            .then_some(max);
    }

    if let Some(width) = request.width {
        return known
            .iter()
            .find(|s| s.width == width)
            .map(Size::max_dimension);
    }

    if let Some(height) = request.height {
        return known
            .iter()
            .find(|s| s.height == height)
            .map(Size::max_dimension);
    }

    None
}

/// `!w,h` matching. Which edge must equal the requested maximum depends on
/// the source shape, so this only applies when every known size has the
/// same shape.
fn confined_match(known: &[Size], width: u32, height: u32, max: u32) -> bool {
    let shape = known[0].shape();
    if known.iter().any(|s| s.shape() != shape) {
        return false;
    }

    match shape {
        Shape::Landscape => known.iter().any(|s| s.width == max && height >= s.height),
        Shape::Portrait => known.iter().any(|s| s.height == max && width >= s.width),
        Shape::Square => known.iter().any(|s| s.width == max && s.height == max),
    }
}
