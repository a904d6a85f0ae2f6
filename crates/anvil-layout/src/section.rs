//! Section-level structural transforms.
//!
//! Every operation takes the current tree by reference and returns a new
//! [`SectionEdit`]; the input is never touched, so a rejected edit leaves
//! nothing to undo. The edited tree is re-validated before it is returned.

use std::collections::BTreeSet;

use anvil_core::Axis;

use crate::error::StructuralError;
use crate::policy::LayoutPolicy;
use crate::tree::{LayoutTree, NodeId, NodeKind, NodeKindTag, RowSpec, SectionSpec, SizePreference};
use crate::validate::{ConstraintValidator, InvalidReason, ProposedEdit, WidgetDescriptor};

/// Result of a structural transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionEdit {
    pub tree: LayoutTree,
    /// Nodes whose geometry may change, removed ids included.
    pub affected: BTreeSet<NodeId>,
    /// Nodes created by the edit, in creation order.
    pub created: Vec<NodeId>,
    /// Nodes removed by the edit.
    pub removed: Vec<NodeId>,
}

impl SectionEdit {
    pub(crate) fn new(tree: LayoutTree) -> Self {
        Self {
            tree,
            affected: BTreeSet::new(),
            created: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Mark `container` and all of its current children.
    pub(crate) fn touch_container(&mut self, container: NodeId) {
        let _ = self.affected.insert(container);
        self.affected
            .extend(self.tree.children(container).iter().copied());
    }

    fn finish(self) -> Result<Self, StructuralError> {
        self.tree.validate()?;
        Ok(self)
    }
}

/// Applies section and row edits under a [`LayoutPolicy`].
#[derive(Debug, Clone, Default)]
pub struct SectionManager {
    validator: ConstraintValidator,
}

impl SectionManager {
    #[must_use]
    pub const fn new(policy: LayoutPolicy) -> Self {
        Self {
            validator: ConstraintValidator::new(policy),
        }
    }

    #[must_use]
    pub const fn validator(&self) -> &ConstraintValidator {
        &self.validator
    }

    #[must_use]
    pub const fn policy(&self) -> &LayoutPolicy {
        self.validator.policy()
    }

    /// Insert a new Section right after `after`; the root id prepends.
    ///
    /// The new Section is seeded with `rows_per_new_section` empty Rows.
    pub fn create_section(
        &self,
        tree: &LayoutTree,
        after: NodeId,
    ) -> Result<SectionEdit, StructuralError> {
        let root = tree.root();
        let index = if after == root {
            0
        } else {
            self.require_section(tree, after)?;
            tree.index_in_parent(after)
                .ok_or(StructuralError::MissingNode { node_id: after })?
                + 1
        };

        if let Some(limit) = self.validator.max_children(tree, root)
            && tree.sections().len() >= limit
        {
            return Err(InvalidReason::MaxChildrenExceeded {
                container: root,
                limit,
            }
            .into());
        }

        let mut edit = SectionEdit::new(tree.clone());
        let section = edit.tree.insert_node(
            root,
            index,
            NodeKind::Section(SectionSpec::default()),
            SizePreference::default(),
        )?;
        edit.created.push(section);
        for row_index in 0..self.policy().rows_per_new_section {
            let row = edit.tree.insert_node(
                section,
                row_index,
                NodeKind::Row(RowSpec {
                    axis: Axis::Horizontal,
                }),
                SizePreference::default(),
            )?;
            edit.created.push(row);
        }
        edit.touch_container(root);
        edit.touch_container(section);

        tracing::debug!(
            target: "anvil.section",
            section = %section,
            after = %after,
            index,
            rows = self.policy().rows_per_new_section,
            "section created"
        );
        edit.finish()
    }

    /// Remove a Section and its subtree.
    pub fn delete_section(
        &self,
        tree: &LayoutTree,
        section: NodeId,
    ) -> Result<SectionEdit, StructuralError> {
        if section == tree.root() {
            return Err(StructuralError::CannotRemoveRoot { node_id: section });
        }
        self.require_section(tree, section)?;
        if tree.sections().len() <= 1 {
            return Err(StructuralError::LastSection { node_id: section });
        }

        let mut edit = SectionEdit::new(tree.clone());
        edit.removed = edit.tree.remove_subtree(section)?;
        edit.affected.extend(edit.removed.iter().copied());
        edit.touch_container(tree.root());

        tracing::debug!(
            target: "anvil.section",
            section = %section,
            removed = edit.removed.len(),
            "section deleted"
        );
        edit.finish()
    }

    /// Move `row` from Section `from` into Section `to` at `at_index`.
    ///
    /// `at_index` addresses `to`'s rows as they are before the move.
    pub fn move_row(
        &self,
        tree: &LayoutTree,
        row: NodeId,
        from: NodeId,
        to: NodeId,
        at_index: usize,
    ) -> Result<SectionEdit, StructuralError> {
        let Some(to_node) = tree.node(to) else {
            return Err(StructuralError::MissingNode { node_id: to });
        };
        if to_node.tag() != NodeKindTag::Section || to == tree.root() {
            return Err(StructuralError::NotASection { node_id: to });
        }
        let Some(row_node) = tree.node(row) else {
            return Err(StructuralError::MissingNode { node_id: row });
        };
        if row_node.tag() != NodeKindTag::Row {
            return Err(StructuralError::KindMismatch {
                container: to,
                container_kind: NodeKindTag::Section,
                child_kind: row_node.tag(),
            });
        }
        if tree.is_same_or_ancestor(row, to) {
            return Err(StructuralError::WouldCreateCycle {
                node: row,
                container: to,
            });
        }
        if row_node.parent != Some(from) {
            return Err(StructuralError::ParentMismatch {
                node_id: row,
                expected_parent: from,
            });
        }

        let proposed = ProposedEdit::Move {
            node: row,
            container: to,
            index: at_index,
        };
        self.validator.check(tree, &proposed)?;

        let mut edit = SectionEdit::new(tree.clone());
        let _ = edit.tree.move_node(row, to, at_index)?;
        edit.touch_container(from);
        edit.touch_container(to);
        edit.affected.extend(tree.subtree_ids(row));

        tracing::debug!(
            target: "anvil.section",
            row = %row,
            from = %from,
            to = %to,
            at_index,
            "row moved"
        );
        edit.finish()
    }

    /// Set a Section's preferred height.
    pub fn resize_section(
        &self,
        tree: &LayoutTree,
        section: NodeId,
        preferred_size: u32,
    ) -> Result<SectionEdit, StructuralError> {
        self.require_section(tree, section)?;
        let mut edit = SectionEdit::new(tree.clone());
        let size = edit.tree.node_mut(section)?.size.with_preferred(preferred_size);
        edit.tree.set_size(section, size)?;
        edit.touch_container(tree.root());

        tracing::debug!(
            target: "anvil.section",
            section = %section,
            preferred_size,
            "section resized"
        );
        edit.finish()
    }

    /// Apply a validated insert or move, pruning a Row the move left empty.
    pub fn apply_edit(
        &self,
        tree: &LayoutTree,
        proposed: &ProposedEdit,
    ) -> Result<SectionEdit, StructuralError> {
        self.validator.check(tree, proposed)?;
        let mut edit = SectionEdit::new(tree.clone());

        match *proposed {
            ProposedEdit::Insert {
                container,
                index,
                widget,
            } => {
                let slot = edit
                    .tree
                    .insert_node(container, index, widget.kind(), self.policy().slot_size(&widget))?;
                edit.created.push(slot);
                edit.touch_container(container);
            }
            ProposedEdit::Move {
                node,
                container,
                index,
            } => {
                let (old_parent, _) = edit.tree.move_node(node, container, index)?;
                edit.touch_container(old_parent);
                edit.touch_container(container);
                edit.affected.extend(edit.tree.subtree_ids(node));
                if old_parent != container && self.should_prune(&edit.tree, old_parent) {
                    let grandparent = edit.tree.parent(old_parent);
                    edit.removed = edit.tree.remove_subtree(old_parent)?;
                    edit.affected.extend(edit.removed.iter().copied());
                    if let Some(grandparent) = grandparent {
                        edit.touch_container(grandparent);
                    }
                    tracing::debug!(
                        target: "anvil.section",
                        row = %old_parent,
                        "pruned empty row"
                    );
                }
            }
        }

        tracing::debug!(
            target: "anvil.section",
            edit = ?proposed,
            affected = edit.affected.len(),
            "edit applied"
        );
        edit.finish()
    }

    /// Insert a palette widget into a Row.
    pub fn insert_widget(
        &self,
        tree: &LayoutTree,
        row: NodeId,
        index: usize,
        widget: WidgetDescriptor,
    ) -> Result<SectionEdit, StructuralError> {
        self.apply_edit(
            tree,
            &ProposedEdit::Insert {
                container: row,
                index,
                widget,
            },
        )
    }

    /// Remove any non-root node. Sections go through [`Self::delete_section`].
    pub fn remove_node(&self, tree: &LayoutTree, node: NodeId) -> Result<SectionEdit, StructuralError> {
        let Some(target) = tree.node(node) else {
            return Err(StructuralError::MissingNode { node_id: node });
        };
        if node == tree.root() {
            return Err(StructuralError::CannotRemoveRoot { node_id: node });
        }
        if target.tag() == NodeKindTag::Section {
            return self.delete_section(tree, node);
        }
        let parent = target
            .parent
            .ok_or(StructuralError::MissingNode { node_id: node })?;

        let mut edit = SectionEdit::new(tree.clone());
        edit.removed = edit.tree.remove_subtree(node)?;
        edit.affected.extend(edit.removed.iter().copied());
        edit.touch_container(parent);

        tracing::debug!(
            target: "anvil.section",
            node = %node,
            removed = edit.removed.len(),
            "node removed"
        );
        edit.finish()
    }

    fn require_section(&self, tree: &LayoutTree, id: NodeId) -> Result<(), StructuralError> {
        let Some(node) = tree.node(id) else {
            return Err(StructuralError::MissingNode { node_id: id });
        };
        if node.tag() != NodeKindTag::Section || node.parent != Some(tree.root()) {
            return Err(StructuralError::NotASection { node_id: id });
        }
        Ok(())
    }

    fn should_prune(&self, tree: &LayoutTree, old_parent: NodeId) -> bool {
        if !self.policy().prune_empty_rows {
            return false;
        }
        let Some(node) = tree.node(old_parent) else {
            return false;
        };
        if node.tag() != NodeKindTag::Row || !node.children.is_empty() {
            return false;
        }
        match node.parent.and_then(|parent| tree.node(parent)) {
            Some(parent) if parent.tag() == NodeKindTag::Section => parent.children.len() > 1,
            Some(_) => true,
            None => false,
        }
    }
}
