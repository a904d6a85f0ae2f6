//! Legality checks for proposed structural edits.
//!
//! The validator never mutates. Checks run in a fixed order and stop at the
//! first failure, so a given tree and edit always produce the same reason:
//!
//! 1. referenced nodes exist, the root is not moved, the target is a
//!    container and the insertion index is in range;
//! 2. the target accepts the dragged node's kind;
//! 3. the target's child limit is not exceeded;
//! 4. the move does not create a cycle;
//! 5. every widget type carried by the dragged node is accepted by the target
//!    and its ancestors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::LayoutPolicy;
use crate::tree::{
    LayoutTree, NodeId, NodeKind, NodeKindTag, SizePreference, WidgetSlotSpec, WidgetType,
    WidgetTypes,
};

/// A widget dragged from the palette, not yet in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetDescriptor {
    pub widget_type: WidgetType,
    /// Explicit sizing; `None` takes the policy's default slot size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizePreference>,
    #[serde(default)]
    pub content_sized: bool,
}

impl WidgetDescriptor {
    #[must_use]
    pub const fn new(widget_type: WidgetType) -> Self {
        Self {
            widget_type,
            size: None,
            content_sized: false,
        }
    }

    #[must_use]
    pub const fn with_size(mut self, size: SizePreference) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub const fn content_sized(mut self) -> Self {
        self.content_sized = true;
        self
    }

    /// Slot payload for this descriptor.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        NodeKind::WidgetSlot(WidgetSlotSpec {
            widget_type: self.widget_type,
            content_sized: self.content_sized,
            measured: None,
        })
    }
}

/// A structural edit awaiting validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProposedEdit {
    /// Insert a new widget slot.
    Insert {
        container: NodeId,
        index: usize,
        widget: WidgetDescriptor,
    },
    /// Move an existing node. `index` addresses `container`'s children as
    /// they are before the move.
    Move {
        node: NodeId,
        container: NodeId,
        index: usize,
    },
}

impl ProposedEdit {
    #[must_use]
    pub const fn container(&self) -> NodeId {
        match self {
            Self::Insert { container, .. } | Self::Move { container, .. } => *container,
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Insert { index, .. } | Self::Move { index, .. } => *index,
        }
    }
}

/// Outcome of a validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(InvalidReason),
}

impl Validity {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub const fn reason(&self) -> Option<InvalidReason> {
        match self {
            Self::Valid => None,
            Self::Invalid(reason) => Some(*reason),
        }
    }
}

/// Why an edit was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum InvalidReason {
    UnknownNode {
        node_id: NodeId,
    },
    CannotMoveRoot {
        node_id: NodeId,
    },
    NotAContainer {
        node_id: NodeId,
    },
    IndexOutOfBounds {
        container: NodeId,
        index: usize,
        len: usize,
    },
    KindNotAccepted {
        container: NodeId,
        container_kind: NodeKindTag,
        child_kind: NodeKindTag,
    },
    MaxChildrenExceeded {
        container: NodeId,
        limit: usize,
    },
    WouldCreateCycle {
        node: NodeId,
        container: NodeId,
    },
    WidgetTypeRejected {
        container: NodeId,
        widget_type: WidgetType,
    },
}

impl InvalidReason {
    /// Stable reason code for UI feedback.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownNode { .. } => "unknown_node",
            Self::CannotMoveRoot { .. } => "cannot_move_root",
            Self::NotAContainer { .. } => "not_a_container",
            Self::IndexOutOfBounds { .. } => "index_out_of_bounds",
            Self::KindNotAccepted { .. } => "kind_not_accepted",
            Self::MaxChildrenExceeded { .. } => "max_children_exceeded",
            Self::WouldCreateCycle { .. } => "would_create_cycle",
            Self::WidgetTypeRejected { .. } => "widget_type_rejected",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode { node_id } => write!(f, "node {node_id} does not exist"),
            Self::CannotMoveRoot { node_id } => write!(f, "root node {node_id} cannot be moved"),
            Self::NotAContainer { node_id } => write!(f, "node {node_id} is not a container"),
            Self::IndexOutOfBounds {
                container,
                index,
                len,
            } => write!(
                f,
                "index {index} out of bounds for container {container} with {len} children"
            ),
            Self::KindNotAccepted {
                container,
                container_kind,
                child_kind,
            } => write!(f, "{container_kind} {container} does not accept a {child_kind}"),
            Self::MaxChildrenExceeded { container, limit } => {
                write!(f, "container {container} already holds {limit} children")
            }
            Self::WouldCreateCycle { node, container } => write!(
                f,
                "container {container} is node {node} or one of its descendants"
            ),
            Self::WidgetTypeRejected {
                container,
                widget_type,
            } => write!(f, "container {container} does not accept {widget_type} widgets"),
        }
    }
}

impl std::error::Error for InvalidReason {}

/// Decides whether a proposed edit is legal.
#[derive(Debug, Clone, Default)]
pub struct ConstraintValidator {
    policy: LayoutPolicy,
}

impl ConstraintValidator {
    #[must_use]
    pub const fn new(policy: LayoutPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &LayoutPolicy {
        &self.policy
    }

    /// Validate `edit` against `tree`.
    #[must_use]
    pub fn validate(&self, tree: &LayoutTree, edit: &ProposedEdit) -> Validity {
        match self.check(tree, edit) {
            Ok(()) => Validity::Valid,
            Err(reason) => Validity::Invalid(reason),
        }
    }

    /// Like [`Self::validate`], as a `Result` for `?` propagation.
    pub fn check(&self, tree: &LayoutTree, edit: &ProposedEdit) -> Result<(), InvalidReason> {
        let container = edit.container();
        let (child_kind, carried, moving) = match *edit {
            ProposedEdit::Insert { widget, .. } => {
                (NodeKindTag::WidgetSlot, widget.widget_type.flag(), None)
            }
            ProposedEdit::Move { node, .. } => {
                let Some(dragged) = tree.node(node) else {
                    return Err(InvalidReason::UnknownNode { node_id: node });
                };
                if node == tree.root() {
                    return Err(InvalidReason::CannotMoveRoot { node_id: node });
                }
                (dragged.tag(), tree.widget_types_in(node), Some(node))
            }
        };

        let Some(target) = tree.node(container) else {
            return Err(InvalidReason::UnknownNode { node_id: container });
        };
        if !target.is_container() {
            return Err(InvalidReason::NotAContainer { node_id: container });
        }
        let len = target.children.len();
        if edit.index() > len {
            return Err(InvalidReason::IndexOutOfBounds {
                container,
                index: edit.index(),
                len,
            });
        }

        if !tree.accepts(container, child_kind) {
            return Err(InvalidReason::KindNotAccepted {
                container,
                container_kind: target.tag(),
                child_kind,
            });
        }

        let reorder = moving.is_some_and(|node| tree.parent(node) == Some(container));
        if !reorder
            && let Some(limit) = self.max_children(tree, container)
            && len >= limit
        {
            return Err(InvalidReason::MaxChildrenExceeded { container, limit });
        }

        if let Some(node) = moving
            && tree.is_same_or_ancestor(node, container)
        {
            return Err(InvalidReason::WouldCreateCycle { node, container });
        }

        let mut gate = Some(container);
        while let Some(gate_id) = gate {
            let Some(gate_node) = tree.node(gate_id) else {
                break;
            };
            if let Some(widget_type) =
                rejected_widgets(carried, gate_node.policy.accepted_widgets).first()
            {
                return Err(InvalidReason::WidgetTypeRejected {
                    container: gate_id,
                    widget_type,
                });
            }
            gate = gate_node.parent;
        }

        Ok(())
    }

    /// Effective child limit of `container`.
    #[must_use]
    pub fn max_children(&self, tree: &LayoutTree, container: NodeId) -> Option<usize> {
        let node = tree.node(container)?;
        node.policy.max_children.or_else(|| {
            self.policy
                .default_max_children(node.tag(), container == tree.root())
        })
    }
}

/// Widget types in `carried` that `accepted` refuses.
#[must_use]
pub fn rejected_widgets(carried: WidgetTypes, accepted: WidgetTypes) -> WidgetTypes {
    carried.difference(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ContainerPolicy, SectionSpec};
    use anvil_core::Axis;

    struct Fixture {
        tree: LayoutTree,
        section: NodeId,
        row: NodeId,
        text: NodeId,
        chart: NodeId,
    }

    fn fixture() -> Fixture {
        let mut tree = LayoutTree::new();
        let section = tree.sections()[0];
        let row = tree.children(section)[0];
        let text = tree
            .push_widget(row, WidgetType::Text, SizePreference::default())
            .expect("text");
        let chart = tree
            .push_widget(row, WidgetType::Chart, SizePreference::default())
            .expect("chart");
        Fixture {
            tree,
            section,
            row,
            text,
            chart,
        }
    }

    fn validator() -> ConstraintValidator {
        ConstraintValidator::new(LayoutPolicy::default())
    }

    #[test]
    fn reorder_within_row_is_valid() {
        let f = fixture();
        let edit = ProposedEdit::Move {
            node: f.text,
            container: f.row,
            index: 2,
        };
        assert_eq!(validator().validate(&f.tree, &edit), Validity::Valid);
    }

    #[test]
    fn widget_cannot_be_dropped_into_section() {
        let f = fixture();
        let edit = ProposedEdit::Move {
            node: f.text,
            container: f.section,
            index: 0,
        };
        let reason = validator().validate(&f.tree, &edit).reason().expect("invalid");
        assert_eq!(reason.code(), "kind_not_accepted");
    }

    #[test]
    fn root_cannot_be_moved() {
        let f = fixture();
        let edit = ProposedEdit::Move {
            node: f.tree.root(),
            container: f.row,
            index: 0,
        };
        assert_eq!(
            validator().check(&f.tree, &edit),
            Err(InvalidReason::CannotMoveRoot {
                node_id: f.tree.root()
            })
        );
    }

    #[test]
    fn moving_row_into_nested_row_is_a_cycle() {
        let mut f = fixture();
        let nested = f
            .tree
            .push_row(f.row, Axis::Vertical, SizePreference::default())
            .expect("nested");
        let edit = ProposedEdit::Move {
            node: f.row,
            container: nested,
            index: 0,
        };
        assert_eq!(
            validator().check(&f.tree, &edit),
            Err(InvalidReason::WouldCreateCycle {
                node: f.row,
                container: nested,
            })
        );
    }

    #[test]
    fn row_limit_counts_new_children_but_not_reorders() {
        let mut f = fixture();
        let policy = ContainerPolicy {
            max_children: Some(2),
            ..ContainerPolicy::default()
        };
        f.tree.set_policy(f.row, policy).expect("row policy");
        let insert = ProposedEdit::Insert {
            container: f.row,
            index: 0,
            widget: WidgetDescriptor::new(WidgetType::Button),
        };
        assert_eq!(
            validator().check(&f.tree, &insert),
            Err(InvalidReason::MaxChildrenExceeded {
                container: f.row,
                limit: 2,
            })
        );
        let reorder = ProposedEdit::Move {
            node: f.chart,
            container: f.row,
            index: 0,
        };
        assert!(validator().validate(&f.tree, &reorder).is_valid());
    }

    #[test]
    fn section_row_limit_comes_from_policy() {
        let mut f = fixture();
        for _ in 0..3 {
            let _ = f
                .tree
                .push_row(f.section, Axis::Horizontal, SizePreference::default())
                .expect("row");
        }
        let second = f
            .tree
            .push_section(SectionSpec::default(), SizePreference::default())
            .expect("second section");
        let stray = f
            .tree
            .push_row(second, Axis::Horizontal, SizePreference::default())
            .expect("row in second section");
        let edit = ProposedEdit::Move {
            node: stray,
            container: f.section,
            index: 0,
        };
        assert_eq!(
            validator().check(&f.tree, &edit),
            Err(InvalidReason::MaxChildrenExceeded {
                container: f.section,
                limit: 4,
            })
        );
    }

    #[test]
    fn chart_rejected_by_text_only_row() {
        let mut f = fixture();
        let text_only = f
            .tree
            .push_row(f.section, Axis::Horizontal, SizePreference::default())
            .expect("row");
        f.tree
            .set_policy(
                text_only,
                ContainerPolicy {
                    max_children: None,
                    accepted_widgets: WidgetTypes::TEXT,
                },
            )
            .expect("policy");
        let edit = ProposedEdit::Move {
            node: f.chart,
            container: text_only,
            index: 0,
        };
        let reason = validator().check(&f.tree, &edit).expect_err("chart rejected");
        assert_eq!(reason.code(), "widget_type_rejected");
        assert_eq!(
            reason,
            InvalidReason::WidgetTypeRejected {
                container: text_only,
                widget_type: WidgetType::Chart,
            }
        );

        let text_move = ProposedEdit::Move {
            node: f.text,
            container: text_only,
            index: 0,
        };
        assert!(validator().validate(&f.tree, &text_move).is_valid());
    }

    #[test]
    fn section_policy_gates_nested_rows() {
        let mut f = fixture();
        f.tree
            .set_policy(
                f.section,
                ContainerPolicy {
                    max_children: None,
                    accepted_widgets: WidgetTypes::TEXT | WidgetTypes::CHART,
                },
            )
            .expect("policy");
        let insert = ProposedEdit::Insert {
            container: f.row,
            index: 0,
            widget: WidgetDescriptor::new(WidgetType::Form),
        };
        assert_eq!(
            validator().check(&f.tree, &insert),
            Err(InvalidReason::WidgetTypeRejected {
                container: f.section,
                widget_type: WidgetType::Form,
            })
        );
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let f = fixture();
        let edit = ProposedEdit::Insert {
            container: f.row,
            index: 9,
            widget: WidgetDescriptor::new(WidgetType::Text),
        };
        assert_eq!(
            validator().validate(&f.tree, &edit).reason().map(|r| r.code()),
            Some("index_out_of_bounds")
        );
    }

    #[test]
    fn rejected_widgets_is_set_difference() {
        let carried = WidgetTypes::TEXT | WidgetTypes::CHART;
        assert_eq!(rejected_widgets(carried, WidgetTypes::TEXT), WidgetTypes::CHART);
        assert!(rejected_widgets(carried, WidgetTypes::all()).is_empty());
    }
}
