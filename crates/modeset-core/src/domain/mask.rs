//! Fixed-width index bitmasks.
//!
//! The kernel expresses "which controllers can this encoder drive" and
//! "which encoders can this encoder clone with" as 32-bit masks.  Inside the
//! topology every mask is re-expressed in terms of *local* array indices, so
//! the same small value type is used for controllers, encoders and
//! connectors alike.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest index a mask can hold; KMS caps CRTCs and encoders at 32 per device.
pub const MAX_MASK_INDEX: usize = 32;

/// A set of local indices in `0..32`, stored as a `u32`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexMask(u32);

impl IndexMask {
    /// The empty set.
    pub const EMPTY: IndexMask = IndexMask(0);

    /// Wraps raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        IndexMask(bits)
    }

    /// Returns a mask with only `index` set, or `None` if the index does not fit.
    pub fn single(index: usize) -> Option<Self> {
        (index < MAX_MASK_INDEX).then(|| IndexMask(1 << index))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, index: usize) -> bool {
        index < MAX_MASK_INDEX && self.0 & (1 << index) != 0
    }

    /// Adds `index`; returns `false` (and leaves the mask unchanged) if it does not fit.
    pub fn insert(&mut self, index: usize) -> bool {
        match Self::single(index) {
            Some(bit) => {
                self.0 |= bit.0;
                true
            }
            None => false,
        }
    }

    pub fn union(self, other: Self) -> Self {
        IndexMask(self.0 | other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        IndexMask(self.0 & other.0)
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates the set indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_MASK_INDEX).filter(move |i| self.0 & (1 << i) != 0)
    }
}

impl FromIterator<usize> for IndexMask {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut mask = IndexMask::EMPTY;
        for index in iter {
            mask.insert(index);
        }
        mask
    }
}

impl fmt::Debug for IndexMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
