//! Parsed IIIF Image API `size` segment.

use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeParseError {
    #[error("size parameter is empty")]
    Empty,
    #[error("percentage sizes are not supported for thumbnails: `{0}`")]
    Percentage(String),
    #[error("size parameter `{0}` is malformed")]
    Malformed(String),
    #[error("size parameter `{0}` has a zero dimension")]
    ZeroDimension(String),
}

/// A requested size: `max`, `w,h`, `!w,h`, `w,` or `,h`.
///
/// `full` is accepted as the IIIF 2 spelling of `max`. A leading `^`
/// (IIIF 3 upscaling) is recorded in `upscaled` and otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeParameter {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max: bool,
    pub confined: bool,
    pub upscaled: bool,
}

impl SizeParameter {
    pub fn max() -> Self {
        Self {
            max: true,
            ..Self::default()
        }
    }

    pub fn exact(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn confined(width: u32, height: u32) -> Self {
        Self {
            confined: true,
            ..Self::exact(width, height)
        }
    }

    pub fn width_only(width: u32) -> Self {
        Self {
            width: Some(width),
            ..Self::default()
        }
    }

    pub fn height_only(height: u32) -> Self {
        Self {
            height: Some(height),
            ..Self::default()
        }
    }
}

impl FromStr for SizeParameter {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SizeParseError::Empty);
        }

        let (upscaled, rest) = match s.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        if rest == "max" || rest == "full" {
            return Ok(Self {
                upscaled,
                ..Self::max()
            });
        }
        if rest.starts_with("pct:") {
            return Err(SizeParseError::Percentage(s.to_string()));
        }

        let (confined, dims) = match rest.strip_prefix('!') {
            Some(dims) => (true, dims),
            None => (false, rest),
        };

        let (w, h) = dims
            .split_once(',')
            .ok_or_else(|| SizeParseError::Malformed(s.to_string()))?;
        let width = parse_edge(w, s)?;
        let height = parse_edge(h, s)?;

        match (width, height) {
            (None, None) => Err(SizeParseError::Malformed(s.to_string())),
            (Some(_), None) | (None, Some(_)) if confined => {
                Err(SizeParseError::Malformed(s.to_string()))
            }
            _ => Ok(Self {
                width,
                height,
                max: false,
                confined,
                upscaled,
            }),
        }
    }
}

fn parse_edge(edge: &str, original: &str) -> Result<Option<u32>, SizeParseError> {
    if edge.is_empty() {
        return Ok(None);
    }
    let value: u32 = edge
        .parse()
        .map_err(|_| SizeParseError::Malformed(original.to_string()))?;
    if value == 0 {
        return Err(SizeParseError::ZeroDimension(original.to_string()));
    }
    Ok(Some(value))
}

impl fmt::Display for SizeParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.upscaled {
            f.write_str("^")?;
        }
        if self.max {
            return f.write_str("max");
        }
        if self.confined {
            f.write_str("!")?;
        }
        if let Some(w) = self.width {
            write!(f, "{w}")?;
        }
        f.write_str(",")?;
        if let Some(h) = self.height {
            write!(f, "{h}")?;
        }
        Ok(())
    }
}
