//! Committed layout state.
//!
//! The store holds the committed tree and its rectangles behind `Arc`s.
//! Readers take cheap [`GeometrySnapshot`]s; writers replace both halves in a
//! single [`GeometryStore::commit`], so no reader ever sees a tree paired with
//! rectangles from another revision.

use std::sync::Arc;

use crate::position::LayoutRects;
use crate::tree::{LayoutTree, LayoutTreeSnapshot};

/// Immutable view of one committed revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometrySnapshot {
    pub revision: u64,
    pub tree: Arc<LayoutTree>,
    pub rects: Arc<LayoutRects>,
}

impl GeometrySnapshot {
    /// Structural hash of the snapshot's tree.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        self.tree.state_hash()
    }
}

/// Single-writer owner of the committed tree and rectangles.
#[derive(Debug, Clone)]
pub struct GeometryStore {
    revision: u64,
    tree: Arc<LayoutTree>,
    rects: Arc<LayoutRects>,
}

impl GeometryStore {
    #[must_use]
    pub fn new(tree: LayoutTree, rects: LayoutRects) -> Self {
        Self {
            revision: 0,
            tree: Arc::new(tree),
            rects: Arc::new(rects),
        }
    }

    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn tree(&self) -> &LayoutTree {
        &self.tree
    }

    #[must_use]
    pub fn rects(&self) -> &LayoutRects {
        &self.rects
    }

    #[must_use]
    pub fn snapshot(&self) -> GeometrySnapshot {
        GeometrySnapshot {
            revision: self.revision,
            tree: Arc::clone(&self.tree),
            rects: Arc::clone(&self.rects),
        }
    }

    /// Canonical serial form of the committed tree.
    #[must_use]
    pub fn export_snapshot(&self) -> LayoutTreeSnapshot {
        self.tree.to_snapshot()
    }

    /// Replace tree and rectangles together, returning the new revision.
    pub fn commit(&mut self, tree: LayoutTree, rects: LayoutRects) -> u64 {
        self.revision += 1;
        self.tree = Arc::new(tree);
        self.rects = Arc::new(rects);
        tracing::debug!(
            target: "anvil.layout",
            revision = self.revision,
            nodes = self.tree.len(),
            state_hash = self.tree.state_hash(),
            "store committed"
        );
        self.revision
    }

    /// Reinstate a previously taken snapshot wholesale.
    pub fn restore(&mut self, snapshot: &GeometrySnapshot) {
        self.revision = snapshot.revision;
        self.tree = Arc::clone(&snapshot.tree);
        self.rects = Arc::clone(&snapshot.rects);
    }
}
