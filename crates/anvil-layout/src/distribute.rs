//! Space distribution along a container axis.
//!
//! Every child first receives its minimum. Leftover space goes to fixed
//! preferences, then to growable children according to the container's
//! [`DistributionPolicy`]. When minimums alone exceed the container, every
//! child shrinks in proportion to its minimum and the share is flagged
//! over-constrained.
//!
//! The result always sums to exactly the container extent for a non-empty
//! child list, and is a pure function of its inputs. Pixels that cannot be
//! split evenly go one at a time to the earliest eligible children.

use anvil_core::Axis;
use serde::{Deserialize, Serialize};

use crate::tree::{DistributionPolicy, NodeId, SizePreference};

/// One child's sizing inputs along the container axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildSpace {
    pub id: NodeId,
    pub min_size: u32,
    pub preferred_size: Option<u32>,
    pub grow: bool,
}

impl ChildSpace {
    #[must_use]
    pub const fn new(id: NodeId, preference: SizePreference) -> Self {
        Self {
            id,
            min_size: preference.min_size,
            preferred_size: preference.preferred_size,
            grow: preference.grow,
        }
    }

    /// Growable with a minimum and no preferred size.
    #[must_use]
    pub const fn grow(id: NodeId, min_size: u32) -> Self {
        Self::new(id, SizePreference::grow(min_size))
    }
}

/// Allotted extent per child, in child order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceShare {
    pub axis: Axis,
    pub container_size: u32,
    pub allotted: Vec<(NodeId, u32)>,
    /// Sum of the children's minimums.
    pub required: u64,
    pub over_constrained: bool,
}

impl SpaceShare {
    /// Extent allotted to `id`, if it is one of the children.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<u32> {
        self.allotted
            .iter()
            .find_map(|(child, extent)| (*child == id).then_some(*extent))
    }

    /// Sum of all allotments.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.allotted.iter().map(|(_, extent)| u64::from(*extent)).sum()
    }

    /// Allotments without ids, in child order.
    #[must_use]
    pub fn extents(&self) -> Vec<u32> {
        self.allotted.iter().map(|(_, extent)| *extent).collect()
    }
}

/// Distribute `container_size` with the default equal-share policy.
#[must_use]
pub fn distribute(container_size: u32, axis: Axis, children: &[ChildSpace]) -> SpaceShare {
    distribute_with_policy(
        container_size,
        axis,
        children,
        DistributionPolicy::EqualShare,
    )
}

/// Distribute `container_size` among `children` under `policy`.
#[must_use]
pub fn distribute_with_policy(
    container_size: u32,
    axis: Axis,
    children: &[ChildSpace],
    policy: DistributionPolicy,
) -> SpaceShare {
    let required: u64 = children.iter().map(|child| u64::from(child.min_size)).sum();

    if children.is_empty() {
        return SpaceShare {
            axis,
            container_size,
            allotted: Vec::new(),
            required,
            over_constrained: false,
        };
    }

    if required > u64::from(container_size) {
        tracing::warn!(
            target: "anvil.layout",
            ?axis,
            container_size,
            required,
            children = children.len(),
            "container over-constrained; shrinking children proportionally"
        );
        let extents = shrink_proportionally(container_size, required, children);
        return SpaceShare {
            axis,
            container_size,
            allotted: zip_ids(children, extents),
            required,
            over_constrained: true,
        };
    }

    let mut extents: Vec<u32> = children.iter().map(|child| child.min_size).collect();
    // `required <= container_size`, so this fits.
    let mut remaining = container_size - required as u32;

    // Fixed preferences first, in child order. Under weighted distribution a
    // growable child's preferred size is a weight, not a target.
    for (extent, child) in extents.iter_mut().zip(children) {
        let Some(preferred) = child.preferred_size else {
            continue;
        };
        if policy == DistributionPolicy::Weighted && child.grow {
            continue;
        }
        let top_up = preferred.saturating_sub(child.min_size).min(remaining);
        *extent += top_up;
        remaining -= top_up;
    }

    if remaining > 0 {
        let eligible: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, child)| match policy {
                DistributionPolicy::EqualShare => child.grow && child.preferred_size.is_none(),
                DistributionPolicy::Weighted => child.grow,
            })
            .map(|(index, _)| index)
            .collect();

        if eligible.is_empty() {
            let all: Vec<usize> = (0..children.len()).collect();
            split_equally(remaining, &all, &mut extents);
        } else if policy == DistributionPolicy::Weighted {
            split_weighted(remaining, &eligible, children, &mut extents);
        } else {
            split_equally(remaining, &eligible, &mut extents);
        }
    }

    SpaceShare {
        axis,
        container_size,
        allotted: zip_ids(children, extents),
        required,
        over_constrained: false,
    }
}

fn zip_ids(children: &[ChildSpace], extents: Vec<u32>) -> Vec<(NodeId, u32)> {
    children
        .iter()
        .map(|child| child.id)
        .zip(extents)
        .collect()
}

fn shrink_proportionally(container_size: u32, required: u64, children: &[ChildSpace]) -> Vec<u32> {
    let container = u128::from(container_size);
    let required = u128::from(required);
    let mut extents: Vec<u32> = children
        .iter()
        .map(|child| {
            // floor(container * min / required) <= container, so it fits in u32.
            (container * u128::from(child.min_size) / required) as u32
        })
        .collect();

    let used: u64 = extents.iter().map(|extent| u64::from(*extent)).sum();
    let leftover = u64::from(container_size).saturating_sub(used) as u32;
    let eligible: Vec<usize> = children
        .iter()
        .enumerate()
        .filter(|(_, child)| child.min_size > 0)
        .map(|(index, _)| index)
        .collect();
    hand_out_remainder(leftover, &eligible, &mut extents);
    extents
}

fn split_equally(remaining: u32, eligible: &[usize], extents: &mut [u32]) {
    let Ok(count) = u32::try_from(eligible.len()) else {
        return;
    };
    if count == 0 {
        return;
    }
    let share = remaining / count;
    for index in eligible {
        extents[*index] += share;
    }
    hand_out_remainder(remaining % count, eligible, extents);
}

fn split_weighted(remaining: u32, eligible: &[usize], children: &[ChildSpace], extents: &mut [u32]) {
    let weight = |index: usize| u128::from(children[index].preferred_size.unwrap_or(1).max(1));
    let total_weight: u128 = eligible.iter().map(|index| weight(*index)).sum();
    let mut handed_out = 0u32;
    for index in eligible {
        // share <= remaining, so it fits in u32.
        let share = (u128::from(remaining) * weight(*index) / total_weight) as u32;
        extents[*index] += share;
        handed_out += share;
    }
    hand_out_remainder(remaining - handed_out, eligible, extents);
}

/// One pixel each to the earliest eligible children, wrapping if needed.
fn hand_out_remainder(mut leftover: u32, eligible: &[usize], extents: &mut [u32]) {
    if eligible.is_empty() {
        return;
    }
    while leftover > 0 {
        for index in eligible {
            if leftover == 0 {
                break;
            }
            extents[*index] += 1;
            leftover -= 1;
        }
    }
}
