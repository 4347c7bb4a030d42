//! Identity types for the pipeline system.
//!
//! All IDs are newtypes over `u32` that serve as direct array indices
//! into their respective storage vectors, providing O(1) lookup.

use std::fmt;

/// Index into `Pipeline::stages`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StageId(pub u32);

impl StageId {
    pub const INVALID: StageId = StageId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "StageId(INVALID)")
        } else {
            write!(f, "StageId({})", self.0)
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index into `DimensionRegistry::dims`. Stable for the lifetime of the
/// registry that issued it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct DimId(pub u32);

impl DimId {
    pub const INVALID: DimId = DimId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for DimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "DimId(INVALID)")
        } else {
            write!(f, "DimId({})", self.0)
        }
    }
}

impl fmt::Display for DimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
