//! Compatibility graph: which controllers and clone partners a connector has.
//!
//! A connector never talks to a controller directly; it is routed through
//! one of its encoders, and each encoder carries two capability masks from
//! the driver.  This module folds those per-encoder masks into per-connector
//! masks:
//!
//! | Connector mask            | Fold over its encoders          |
//! |---------------------------|---------------------------------|
//! | `reachable_controllers`   | OR of `possible_controllers`    |
//! | `clone_equivalence_mask`  | AND of `possible_clones`        |
//! | `encoder_identity_mask`   | the encoders' own indices       |
//!
//! A connector with no encoders, or with any encoder whose clone mask is
//! empty, ends up with an empty clone-equivalence mask and can never be
//! cloned.

use crate::domain::mask::IndexMask;
use crate::domain::topology::Encoder;

/// Derived masks for one connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectorCompatibility {
    pub reachable_controllers: IndexMask,
    pub clone_equivalence_mask: IndexMask,
    pub encoder_identity_mask: IndexMask,
}

/// Computes the masks for a connector routed through `encoder_indices`.
///
/// Indices that do not exist in `encoders` are ignored.
pub fn connector_compatibility(encoder_indices: &[usize], encoders: &[Encoder]) -> ConnectorCompatibility {
    let mut compat = ConnectorCompatibility::default();
    let mut clone_fold: Option<IndexMask> = None;

    for &index in encoder_indices {
        let Some(encoder) = encoders.get(index) else {
            continue;
        };
        compat.reachable_controllers = compat
            .reachable_controllers
            .union(encoder.possible_controllers);
        compat.encoder_identity_mask.insert(index);
        clone_fold = Some(match clone_fold {
            None => encoder.possible_clones,
            Some(acc) => acc.intersection(encoder.possible_clones),
        });
    }

    compat.clone_equivalence_mask = clone_fold.unwrap_or(IndexMask::EMPTY);
    compat
}
