// op.rs: the two morphological operations.

use std::fmt;
use std::str::FromStr;

/// Which neighborhood reduction to apply.
///
/// Kept as a closed enum on the host; the kernel only ever sees the
/// integer code returned by [`MorphOp::selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MorphOp {
    /// Replace each pixel with the maximum of its 3×3 neighborhood.
    Dilate,
    /// Replace each pixel with the minimum of its 3×3 neighborhood.
    Erode,
}

impl MorphOp {
    pub const ALL: [MorphOp; 2] = [MorphOp::Dilate, MorphOp::Erode];

    /// Integer code written into the kernel's selector uniform.
    /// Must match `OP_DILATE` / `OP_ERODE` in `morphology.wgsl`.
    #[inline]
    pub fn selector(self) -> u32 {
        match self {
            MorphOp::Dilate => 0,
            MorphOp::Erode => 1,
        }
    }

    /// Combine two samples the way this operation reduces a neighborhood.
    #[inline]
    pub fn reduce(self, a: u8, b: u8) -> u8 {
        match self {
            MorphOp::Dilate => a.max(b),
            MorphOp::Erode => a.min(b),
        }
    }

    /// Identity element of [`MorphOp::reduce`].
    #[inline]
    pub fn identity(self) -> u8 {
        match self {
            MorphOp::Dilate => u8::MIN,
            MorphOp::Erode => u8::MAX,
        }
    }

    /// The operation that `self` turns into on an inverted image.
    pub fn dual(self) -> MorphOp {
        match self {
            MorphOp::Dilate => MorphOp::Erode,
            MorphOp::Erode => MorphOp::Dilate,
        }
    }
}

impl fmt::Display for MorphOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MorphOp::Dilate => write!(f, "dilate"),
            MorphOp::Erode => write!(f, "erode"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown morphological operation `{0}` (expected `dilate` or `erode`)")]
pub struct ParseMorphOpError(String);

impl FromStr for MorphOp {
    type Err = ParseMorphOpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dilate" => Ok(MorphOp::Dilate),
            "erode" => Ok(MorphOp::Erode),
            _ => Err(ParseMorphOpError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_codes() {
        assert_eq!(MorphOp::Dilate.selector(), 0);
        assert_eq!(MorphOp::Erode.selector(), 1);
    }

    #[test]
    fn test_identity_is_neutral() {
        for op in MorphOp::ALL {
            for v in [0u8, 1, 127, 254, 255] {
                assert_eq!(op.reduce(op.identity(), v), v);
            }
        }
    }

    #[test]
    fn test_parse_round_trip() {
        for op in MorphOp::ALL {
            assert_eq!(op.to_string().parse::<MorphOp>().unwrap(), op);
        }
        assert_eq!("ERODE".parse::<MorphOp>().unwrap(), MorphOp::Erode);
        assert!("open".parse::<MorphOp>().is_err());
    }
}
