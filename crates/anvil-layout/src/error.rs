//! Error and warning types shared by the layout components.
//!
//! Structural errors are raised before any mutation happens, so a caller that
//! receives one can keep using the tree it passed in. Warnings never abort a
//! layout pass.

use std::fmt;

use crate::position::TilingViolation;
use crate::tree::{LayoutModelError, NodeId, NodeKindTag};
use crate::validate::InvalidReason;

/// A structural edit that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    MissingNode {
        node_id: NodeId,
    },
    NotAContainer {
        node_id: NodeId,
    },
    NotASection {
        node_id: NodeId,
    },
    NotAWidgetSlot {
        node_id: NodeId,
    },
    KindMismatch {
        container: NodeId,
        container_kind: NodeKindTag,
        child_kind: NodeKindTag,
    },
    IndexOutOfBounds {
        container: NodeId,
        index: usize,
        len: usize,
    },
    ParentMismatch {
        node_id: NodeId,
        expected_parent: NodeId,
    },
    WouldCreateCycle {
        node: NodeId,
        container: NodeId,
    },
    CannotRemoveRoot {
        node_id: NodeId,
    },
    CannotMoveRoot {
        node_id: NodeId,
    },
    LastSection {
        node_id: NodeId,
    },
    NodeIdOverflow {
        current: NodeId,
    },
    /// The constraint validator refused the edit.
    Rejected(InvalidReason),
    /// The edited tree failed model validation.
    Validation(LayoutModelError),
}

impl StructuralError {
    /// Stable reason code for UI feedback and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingNode { .. } => "missing_node",
            Self::NotAContainer { .. } => "not_a_container",
            Self::NotASection { .. } => "not_a_section",
            Self::NotAWidgetSlot { .. } => "not_a_widget_slot",
            Self::KindMismatch { .. } => "kind_mismatch",
            Self::IndexOutOfBounds { .. } => "index_out_of_bounds",
            Self::ParentMismatch { .. } => "parent_mismatch",
            Self::WouldCreateCycle { .. } => "would_create_cycle",
            Self::CannotRemoveRoot { .. } => "cannot_remove_root",
            Self::CannotMoveRoot { .. } => "cannot_move_root",
            Self::LastSection { .. } => "last_section",
            Self::NodeIdOverflow { .. } => "node_id_overflow",
            Self::Rejected(reason) => reason.code(),
            Self::Validation(_) => "invalid_tree",
        }
    }
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingNode { node_id } => write!(f, "node {node_id} not found"),
            Self::NotAContainer { node_id } => write!(f, "node {node_id} is not a container"),
            Self::NotASection { node_id } => write!(f, "node {node_id} is not a section"),
            Self::NotAWidgetSlot { node_id } => write!(f, "node {node_id} is not a widget slot"),
            Self::KindMismatch {
                container,
                container_kind,
                child_kind,
            } => write!(
                f,
                "{container_kind} {container} cannot hold a {child_kind}"
            ),
            Self::IndexOutOfBounds {
                container,
                index,
                len,
            } => write!(
                f,
                "index {index} out of bounds for container {container} with {len} children"
            ),
            Self::ParentMismatch {
                node_id,
                expected_parent,
            } => write!(f, "node {node_id} is not a child of {expected_parent}"),
            Self::WouldCreateCycle { node, container } => write!(
                f,
                "moving node {node} into {container} would create a cycle"
            ),
            Self::CannotRemoveRoot { node_id } => write!(f, "cannot remove root node {node_id}"),
            Self::CannotMoveRoot { node_id } => write!(f, "cannot move root node {node_id}"),
            Self::LastSection { node_id } => {
                write!(f, "cannot delete section {node_id}: it is the last section")
            }
            Self::NodeIdOverflow { current } => write!(f, "node id overflow after {current}"),
            Self::Rejected(reason) => write!(f, "edit rejected: {reason}"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for StructuralError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LayoutModelError> for StructuralError {
    fn from(err: LayoutModelError) -> Self {
        Self::Validation(err)
    }
}

impl From<InvalidReason> for StructuralError {
    fn from(reason: InvalidReason) -> Self {
        Self::Rejected(reason)
    }
}

/// Why a drag commit failed after it had started mutating a working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitFault {
    /// The structural edit could not be applied.
    Structural(StructuralError),
    /// The refreshed geometry broke the tiling invariant.
    Geometry(TilingViolation),
    /// The commit hook refused the new layout.
    Hook(String),
}

impl fmt::Display for CommitFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural(err) => write!(f, "structural edit failed: {err}"),
            Self::Geometry(violation) => write!(f, "geometry refresh failed: {violation}"),
            Self::Hook(message) => write!(f, "commit hook refused: {message}"),
        }
    }
}

impl std::error::Error for CommitFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Structural(err) => Some(err),
            Self::Geometry(violation) => Some(violation),
            Self::Hook(_) => None,
        }
    }
}

/// Top-level error surfaced by the drag coordinator and the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Rejected before any mutation.
    Structural(StructuralError),
    /// A commit failed; the store holds the pre-drag snapshot again.
    RollbackFault {
        cause: CommitFault,
        restored_hash: u64,
    },
    /// An imported tree did not validate.
    Model(LayoutModelError),
    /// The engine was handed a policy that fails its own checks.
    InvalidPolicy(Vec<String>),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural(err) => write!(f, "{err}"),
            Self::RollbackFault {
                cause,
                restored_hash,
            } => write!(
                f,
                "commit rolled back to snapshot {restored_hash:#x}: {cause}"
            ),
            Self::Model(err) => write!(f, "{err}"),
            Self::InvalidPolicy(errors) => {
                write!(f, "invalid layout policy: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for LayoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Structural(err) => Some(err),
            Self::RollbackFault { cause, .. } => Some(cause),
            Self::Model(err) => Some(err),
            Self::InvalidPolicy(_) => None,
        }
    }
}

impl From<StructuralError> for LayoutError {
    fn from(err: StructuralError) -> Self {
        Self::Structural(err)
    }
}

impl From<LayoutModelError> for LayoutError {
    fn from(err: LayoutModelError) -> Self {
        Self::Model(err)
    }
}

/// Non-fatal condition reported alongside a layout result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutWarning {
    /// A container's children need more space than it has.
    OverConstrained {
        container: NodeId,
        required: u64,
        available: u32,
    },
    /// A requested DOM measurement did not arrive in time.
    MeasurementTimeout { node_id: NodeId, waited_ms: u64 },
}

impl LayoutWarning {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::OverConstrained { .. } => "over_constrained",
            Self::MeasurementTimeout { .. } => "measurement_timeout",
        }
    }
}

impl fmt::Display for LayoutWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverConstrained {
                container,
                required,
                available,
            } => write!(
                f,
                "container {container} over-constrained: children need {required}px, {available}px available"
            ),
            Self::MeasurementTimeout { node_id, waited_ms } => write!(
                f,
                "measurement for node {node_id} timed out after {waited_ms}ms"
            ),
        }
    }
}
