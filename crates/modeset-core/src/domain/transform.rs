//! Monitor transform algebra.
//!
//! A controller can scan out its framebuffer rotated in 90° steps and
//! optionally mirrored horizontally.  The eight combinations form the
//! dihedral group of order 8, and the layout code needs three operations
//! on it:
//!
//! - [`MonitorTransform::invert`] – the transform that undoes another one.
//! - [`MonitorTransform::compose`] – "apply `self`, then apply `other`".
//! - [`MonitorTransform::relative`] – "what do I still need to apply to get
//!   from `self` to `other`?"
//!
//! # How the encoding works (for beginners)
//!
//! Every value is stored as a rotation component `r` (0..4, in quarter
//! turns counter-clockwise) plus a flip bit `f`.  The value means "mirror
//! first (if `f`), then rotate by `r`".  Rotations add like clock
//! arithmetic.  A mirror reverses the sense of every rotation that happens
//! before it, which is why a flip in `other` negates the rotation of
//! `self` before the two are added.
//!
//! Because mirrors are their own inverse, every flipped value is
//! self-inverse; among the pure rotations only 90° and 270° swap.

use serde::{Deserialize, Serialize};

/// One of the eight rotation/reflection combinations a controller supports.
///
/// The discriminants follow the kernel/Wayland numbering: the low two bits
/// are the rotation in quarter turns, bit 2 is the horizontal flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorTransform {
    #[default]
    Normal = 0,
    #[serde(rename = "90")]
    Rotate90 = 1,
    #[serde(rename = "180")]
    Rotate180 = 2,
    #[serde(rename = "270")]
    Rotate270 = 3,
    Flipped = 4,
    #[serde(rename = "flipped-90")]
    Flipped90 = 5,
    #[serde(rename = "flipped-180")]
    Flipped180 = 6,
    #[serde(rename = "flipped-270")]
    Flipped270 = 7,
}

const FLIP_BIT: u8 = 0b100;
const ROTATION_MASK: u8 = 0b011;

impl MonitorTransform {
    /// All eight transforms in discriminant order.
    pub const ALL: [MonitorTransform; 8] = [
        MonitorTransform::Normal,
        MonitorTransform::Rotate90,
        MonitorTransform::Rotate180,
        MonitorTransform::Rotate270,
        MonitorTransform::Flipped,
        MonitorTransform::Flipped90,
        MonitorTransform::Flipped180,
        MonitorTransform::Flipped270,
    ];

    /// Builds a transform from a quarter-turn count (taken modulo 4) and a flip bit.
    pub fn from_parts(quarter_turns: u8, flipped: bool) -> Self {
        let bits = (quarter_turns & ROTATION_MASK) | if flipped { FLIP_BIT } else { 0 };
        Self::ALL[bits as usize]
    }

    /// Rotation component in quarter turns (0..4).
    pub fn quarter_turns(self) -> u8 {
        self as u8 & ROTATION_MASK
    }

    /// Returns `true` if the horizontal flip bit is set.
    pub fn is_flipped(self) -> bool {
        self as u8 & FLIP_BIT != 0
    }

    /// Returns `true` for 90° and 270° variants, whose scanout swaps width and height.
    pub fn is_sideways(self) -> bool {
        self.quarter_turns() % 2 == 1
    }

    /// Returns the transform that undoes `self`.
    pub fn invert(self) -> Self {
        if self.is_flipped() {
            self
        } else {
            Self::from_parts(4 - self.quarter_turns(), false)
        }
    }

    /// Returns the transform equivalent to applying `self` and then `other`.
    pub fn compose(self, other: Self) -> Self {
        let own = if other.is_flipped() {
            4 - self.quarter_turns()
        } else {
            self.quarter_turns()
        };
        Self::from_parts(
            own + other.quarter_turns(),
            self.is_flipped() != other.is_flipped(),
        )
    }

    /// Returns the transform `r` such that `self.compose(r) == other`.
    pub fn relative(self, other: Self) -> Self {
        let difference = (4 + other.quarter_turns() - self.quarter_turns()) % 4;
        if self.is_flipped() == other.is_flipped() {
            Self::from_parts(difference, false)
        } else {
            // The required flip reverses the sense of our own rotation, so it
            // has to be added back rather than subtracted.
            Self::from_parts(difference + 2 * self.quarter_turns(), true)
        }
    }

    /// Applies the transform to a scanout size, swapping the axes when sideways.
    pub fn apply_to_size(self, width: u32, height: u32) -> (u32, u32) {
        if self.is_sideways() {
            (height, width)
        } else {
            (width, height)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
