//! Top-down geometry pass.
//!
//! The root receives the viewport. Each container splits its rectangle along
//! its axis with [`distribute_with_policy`] and hands each child a band that
//! spans the full cross extent, so children always tile their parent.
//!
//! # Incremental recompute
//!
//! Given the previous result and a dirty set, the pass restarts at the parent
//! of the dirty set's lowest common ancestor and reuses that node's previous
//! rectangle. Per-container splits are cached by their exact inputs, so a
//! container whose area and children are unchanged is not redistributed.
//! Whenever the shortcut cannot be proven safe the pass falls back to a full
//! recompute. Incremental output is bit-identical to a full pass.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anvil_core::{Axis, Rect};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::distribute::{ChildSpace, distribute_with_policy};
use crate::error::LayoutWarning;
use crate::tree::{DistributionPolicy, LayoutNode, LayoutTree, NodeId, NodeKind};

/// Minimums that did not fit their container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverConstraint {
    pub required: u64,
    pub available: u32,
}

/// Rectangle per node for one viewport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LayoutRects {
    viewport: Rect,
    rects: BTreeMap<NodeId, Rect>,
    over_constrained: BTreeMap<NodeId, OverConstraint>,
}

impl LayoutRects {
    #[must_use]
    pub const fn viewport(&self) -> Rect {
        self.viewport
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<Rect> {
        self.rects.get(&id).copied()
    }

    /// Rectangles in node id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, Rect)> + '_ {
        self.rects.iter().map(|(id, rect)| (*id, *rect))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    #[must_use]
    pub fn over_constraint(&self, container: NodeId) -> Option<OverConstraint> {
        self.over_constrained.get(&container).copied()
    }

    /// Over-constraint warnings in container id order.
    #[must_use]
    pub fn warnings(&self) -> Vec<LayoutWarning> {
        self.over_constrained
            .iter()
            .map(|(container, over)| LayoutWarning::OverConstrained {
                container: *container,
                required: over.required,
                available: over.available,
            })
            .collect()
    }
}

/// Which path a recompute took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecomputeMode {
    #[default]
    Full,
    Incremental,
}

/// Why an incremental request ran as a full pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullFallback {
    Forced,
    NoPrevious,
    ViewportChanged,
    MissingDirtyNode,
    StartAtRoot,
    AncestorInputsChanged,
    CoverageMismatch,
}

/// Counters from the last recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecomputeStats {
    pub mode: RecomputeMode,
    pub fallback: Option<FullFallback>,
    pub start: Option<NodeId>,
    pub nodes_visited: usize,
    pub splits_computed: usize,
    pub splits_reused: usize,
}

#[derive(Debug, Clone)]
struct CachedSplit {
    area: Rect,
    axis: Axis,
    policy: DistributionPolicy,
    inputs: Vec<ChildSpace>,
    child_rects: Vec<(NodeId, Rect)>,
    over: Option<OverConstraint>,
}

/// Computes [`LayoutRects`] for a tree, reusing work between passes.
#[derive(Debug, Clone, Default)]
pub struct PositionCalculator {
    previous: Option<LayoutRects>,
    cache: FxHashMap<NodeId, CachedSplit>,
    force_full: bool,
    last_stats: RecomputeStats,
}

impl PositionCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Result of the last pass, if any.
    #[must_use]
    pub fn previous(&self) -> Option<&LayoutRects> {
        self.previous.as_ref()
    }

    #[must_use]
    pub const fn last_stats(&self) -> RecomputeStats {
        self.last_stats
    }

    /// Make the next recompute a full pass.
    pub fn invalidate(&mut self) {
        self.force_full = true;
    }

    /// Adopt `rects` as the previous result, dropping cached splits.
    ///
    /// Used after a rollback so the next incremental pass starts from the
    /// restored geometry.
    pub fn prime(&mut self, rects: LayoutRects) {
        self.previous = Some(rects);
        self.cache.clear();
        self.force_full = false;
    }

    /// Recompute the whole tree.
    pub fn compute_full(&mut self, tree: &LayoutTree, viewport: Rect) -> LayoutRects {
        self.run_full(tree, viewport, None)
    }

    /// Recompute after the nodes in `dirty` changed.
    pub fn recompute(
        &mut self,
        tree: &LayoutTree,
        dirty: &BTreeSet<NodeId>,
        viewport: Rect,
    ) -> LayoutRects {
        if self.force_full {
            self.force_full = false;
            return self.run_full(tree, viewport, Some(FullFallback::Forced));
        }
        let Some(previous) = self.previous.clone() else {
            return self.run_full(tree, viewport, Some(FullFallback::NoPrevious));
        };
        if previous.viewport != viewport {
            return self.run_full(tree, viewport, Some(FullFallback::ViewportChanged));
        }
        if dirty.iter().any(|id| !tree.contains(*id)) {
            return self.run_full(tree, viewport, Some(FullFallback::MissingDirtyNode));
        }
        if dirty.is_empty() && previous.len() == tree.len() {
            self.last_stats = RecomputeStats {
                mode: RecomputeMode::Incremental,
                ..RecomputeStats::default()
            };
            return previous;
        }

        let start = tree
            .lowest_common_ancestor(dirty)
            .and_then(|lca| tree.parent(lca));
        let Some(start) = start.filter(|start| *start != tree.root()) else {
            return self.run_full(tree, viewport, Some(FullFallback::StartAtRoot));
        };
        let Some(start_area) = previous.get(start) else {
            return self.run_full(tree, viewport, Some(FullFallback::AncestorInputsChanged));
        };
        if !self.placement_unchanged(tree, start, &previous) {
            return self.run_full(tree, viewport, Some(FullFallback::AncestorInputsChanged));
        }

        let mut out = previous;
        for id in tree.subtree_ids(start) {
            let _ = out.over_constrained.remove(&id);
        }
        let mut stats = RecomputeStats {
            mode: RecomputeMode::Incremental,
            start: Some(start),
            ..RecomputeStats::default()
        };
        self.layout_subtree(tree, start, start_area, &mut out, &mut stats);
        out.rects.retain(|id, _| tree.contains(*id));
        out.over_constrained.retain(|id, _| tree.contains(*id));

        if out.rects.len() != tree.len() {
            return self.run_full(tree, viewport, Some(FullFallback::CoverageMismatch));
        }

        tracing::debug!(
            target: "anvil.layout",
            start = %start,
            dirty = dirty.len(),
            visited = stats.nodes_visited,
            computed = stats.splits_computed,
            reused = stats.splits_reused,
            "incremental recompute"
        );
        self.last_stats = stats;
        self.previous = Some(out.clone());
        out
    }

    fn run_full(
        &mut self,
        tree: &LayoutTree,
        viewport: Rect,
        fallback: Option<FullFallback>,
    ) -> LayoutRects {
        let mut out = LayoutRects {
            viewport,
            ..LayoutRects::default()
        };
        let mut stats = RecomputeStats {
            mode: RecomputeMode::Full,
            fallback,
            ..RecomputeStats::default()
        };
        self.layout_subtree(tree, tree.root(), viewport, &mut out, &mut stats);
        self.cache.retain(|id, _| tree.contains(*id));

        tracing::debug!(
            target: "anvil.layout",
            ?fallback,
            nodes = tree.len(),
            computed = stats.splits_computed,
            reused = stats.splits_reused,
            "full recompute"
        );
        self.last_stats = stats;
        self.force_full = false;
        self.previous = Some(out.clone());
        out
    }

    /// True if `start`'s parent would still hand `start` its previous rect.
    fn placement_unchanged(&self, tree: &LayoutTree, start: NodeId, previous: &LayoutRects) -> bool {
        let Some(parent) = tree.parent(start) else {
            return false;
        };
        let (Some(parent_node), Some(cached)) = (tree.node(parent), self.cache.get(&parent)) else {
            return false;
        };
        let Some(axis) = parent_node.axis() else {
            return false;
        };
        previous.get(parent) == Some(cached.area)
            && cached.axis == axis
            && cached.policy == distribution_of(parent_node)
            && cached.inputs == child_inputs(tree, parent_node, axis)
            && cached
                .child_rects
                .iter()
                .any(|(child, rect)| *child == start && previous.get(start) == Some(*rect))
    }

    fn layout_subtree(
        &mut self,
        tree: &LayoutTree,
        start: NodeId,
        area: Rect,
        out: &mut LayoutRects,
        stats: &mut RecomputeStats,
    ) {
        let mut stack = vec![(start, area)];
        while let Some((id, area)) = stack.pop() {
            let _ = out.rects.insert(id, area);
            stats.nodes_visited += 1;

            let Some(node) = tree.node(id) else {
                continue;
            };
            let Some(axis) = node.axis() else {
                continue;
            };
            if node.children.is_empty() {
                let _ = self.cache.remove(&id);
                continue;
            }

            let policy = distribution_of(node);
            let inputs = child_inputs(tree, node, axis);
            let reusable = self.cache.get(&id).is_some_and(|cached| {
                cached.area == area
                    && cached.axis == axis
                    && cached.policy == policy
                    && cached.inputs == inputs
            });

            if reusable {
                stats.splits_reused += 1;
            } else {
                stats.splits_computed += 1;
                let _ = self
                    .cache
                    .insert(id, split(area, axis, policy, inputs));
            }
            let Some(cached) = self.cache.get(&id) else {
                continue;
            };
            if let Some(over) = cached.over {
                let _ = out.over_constrained.insert(id, over);
            }
            stack.extend(cached.child_rects.iter().rev().copied());
        }
    }
}

fn distribution_of(node: &LayoutNode) -> DistributionPolicy {
    match node.kind {
        NodeKind::Section(section) => section.distribution,
        _ => DistributionPolicy::EqualShare,
    }
}

fn child_inputs(tree: &LayoutTree, node: &LayoutNode, axis: Axis) -> Vec<ChildSpace> {
    node.children
        .iter()
        .filter_map(|child| {
            tree.node(*child)
                .map(|child_node| ChildSpace::new(*child, child_node.effective_size(axis)))
        })
        .collect()
}

fn split(area: Rect, axis: Axis, policy: DistributionPolicy, inputs: Vec<ChildSpace>) -> CachedSplit {
    let share = distribute_with_policy(area.extent(axis), axis, &inputs, policy);
    let mut offset = 0u32;
    let child_rects = share
        .allotted
        .iter()
        .map(|(child, extent)| {
            let rect = area.band(axis, offset, *extent);
            offset = offset.saturating_add(*extent);
            (*child, rect)
        })
        .collect();
    let over = share.over_constrained.then_some(OverConstraint {
        required: share.required,
        available: share.container_size,
    });
    CachedSplit {
        area,
        axis,
        policy,
        inputs,
        child_rects,
        over,
    }
}

/// A broken tiling invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilingViolation {
    MissingRect {
        node_id: NodeId,
    },
    RootMismatch {
        expected: Rect,
        actual: Rect,
    },
    /// A child does not start where its predecessor (or the container) ends.
    Gap {
        container: NodeId,
        child: NodeId,
        expected_start: u32,
        actual_start: u32,
    },
    /// The last child does not end at the container's end.
    Underfill {
        container: NodeId,
        expected_end: u32,
        actual_end: u32,
    },
    /// A child does not span the container's full cross extent.
    CrossMismatch {
        container: NodeId,
        child: NodeId,
    },
}

impl fmt::Display for TilingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRect { node_id } => write!(f, "node {node_id} has no rectangle"),
            Self::RootMismatch { expected, actual } => {
                write!(f, "root rect {actual:?} differs from viewport {expected:?}")
            }
            Self::Gap {
                container,
                child,
                expected_start,
                actual_start,
            } => write!(
                f,
                "child {child} of {container} starts at {actual_start}, expected {expected_start}"
            ),
            Self::Underfill {
                container,
                expected_end,
                actual_end,
            } => write!(
                f,
                "children of {container} end at {actual_end}, expected {expected_end}"
            ),
            Self::CrossMismatch { container, child } => write!(
                f,
                "child {child} does not span the cross extent of {container}"
            ),
        }
    }
}

impl std::error::Error for TilingViolation {}

/// Check that every container's children tile it exactly.
pub fn verify_tiling(tree: &LayoutTree, rects: &LayoutRects) -> Result<(), TilingViolation> {
    let root = tree.root();
    let Some(root_rect) = rects.get(root) else {
        return Err(TilingViolation::MissingRect { node_id: root });
    };
    if root_rect != rects.viewport() {
        return Err(TilingViolation::RootMismatch {
            expected: rects.viewport(),
            actual: root_rect,
        });
    }

    for node in tree.nodes() {
        let Some(area) = rects.get(node.id) else {
            return Err(TilingViolation::MissingRect { node_id: node.id });
        };
        let Some(axis) = node.axis() else {
            continue;
        };
        if node.children.is_empty() {
            continue;
        }
        let cross = axis.cross();
        let mut cursor = area.start(axis);
        for child in &node.children {
            let Some(rect) = rects.get(*child) else {
                return Err(TilingViolation::MissingRect { node_id: *child });
            };
            if rect.start(axis) != cursor {
                return Err(TilingViolation::Gap {
                    container: node.id,
                    child: *child,
                    expected_start: cursor,
                    actual_start: rect.start(axis),
                });
            }
            if rect.start(cross) != area.start(cross) || rect.extent(cross) != area.extent(cross) {
                return Err(TilingViolation::CrossMismatch {
                    container: node.id,
                    child: *child,
                });
            }
            cursor = rect.end(axis);
        }
        if cursor != area.end(axis) {
            return Err(TilingViolation::Underfill {
                container: node.id,
                expected_end: area.end(axis),
                actual_end: cursor,
            });
        }
    }
    Ok(())
}
