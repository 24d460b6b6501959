//! Clone resolution: which connectors may share a controller.
//!
//! The driver states clone capability as a declared fact: connector A may
//! clone with connector B exactly when A's clone-equivalence mask is
//! non-empty and *equal* to B's encoder-identity mask.  It is a mask
//! equality test, not a subset test, and it is not symmetric by
//! construction.  Multi-encoder connectors whose clone sets only partially
//! overlap therefore never match; that is what the hardware tables say, so
//! it is kept as-is.
//!
//! The pairwise scan is O(N²) in the number of connectors, which is fine for
//! real machines (a handful of outputs, a few dozen at most).

use crate::domain::compat::ConnectorCompatibility;
use crate::domain::topology::CloneGroup;

/// Returns, for each connector, the indices of connectors it may clone with.
pub fn resolve_clone_lists(compat: &[ConnectorCompatibility]) -> Vec<Vec<usize>> {
    compat
        .iter()
        .enumerate()
        .map(|(a, own)| {
            if own.clone_equivalence_mask.is_empty() {
                return Vec::new();
            }
            compat
                .iter()
                .enumerate()
                .filter(|&(b, other)| {
                    a != b && own.clone_equivalence_mask == other.encoder_identity_mask
                })
                .map(|(b, _)| b)
                .collect()
        })
        .collect()
}

/// Partitions connectors into groups linked by mutual clone compatibility.
///
/// Two connectors are linked when each appears in the other's clone list;
/// groups are the connected components of that relation.  Connectors with
/// no mutual partner are not part of any group.
pub fn resolve_clone_groups(clone_lists: &[Vec<usize>]) -> Vec<CloneGroup> {
    let n = clone_lists.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for (a, list) in clone_lists.iter().enumerate() {
        for &b in list {
            let mutual = clone_lists.get(b).is_some_and(|back| back.contains(&a));
            if mutual {
                let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                if ra != rb {
                    parent[ra.max(rb)] = ra.min(rb);
                }
            }
        }
    }

    let mut groups: Vec<CloneGroup> = Vec::new();
    let mut group_of_root: Vec<Option<usize>> = vec![None; n];
    for i in 0..n {
        let root = find(&mut parent, i);
        match group_of_root[root] {
            Some(g) => groups[g].connectors.push(i),
            None => {
                group_of_root[root] = Some(groups.len());
                groups.push(CloneGroup { connectors: vec![i] });
            }
        }
    }
    groups.retain(|g| g.connectors.len() > 1);
    groups
}
