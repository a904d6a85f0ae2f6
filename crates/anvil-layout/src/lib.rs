#![forbid(unsafe_code)]

//! Auto-layout engine for the Anvil canvas.
//!
//! The canvas is a tree of Sections, Rows and WidgetSlots. This crate keeps
//! that tree, computes a pixel rectangle for every node, and turns pointer
//! drags into validated structural edits.
//!
//! # Components
//! - [`GeometryStore`]: committed tree plus rectangles, copy-on-write.
//! - [`distribute()`]: splits a container's extent among its children.
//! - [`ConstraintValidator`]: decides whether a proposed edit is legal.
//! - [`SectionManager`]: section and row transforms.
//! - [`PositionCalculator`]: top-down geometry pass, incremental by dirty set.
//! - [`DragCoordinator`]: pointer-driven drag/drop state machine.
//! - [`LayoutEngine`]: the serialized loop that owns all of the above.

pub mod distribute;
pub mod drag;
pub mod engine;
pub mod error;
pub mod policy;
pub mod position;
pub mod section;
pub mod store;
pub mod tree;
pub mod validate;

pub use anvil_core::{Axis, Modifiers, Point, PointerEvent, PointerEventKind, Rect, Size};
pub use distribute::{ChildSpace, SpaceShare, distribute, distribute_with_policy};
pub use drag::{
    AbortReason, CommitHook, DragCoordinator, DragEffect, DragNoopReason, DragPhase, DragSource,
    DragState, DragTransition, DropTarget, resolve_drop_target,
};
pub use engine::{LayoutEngine, LayoutInput, LayoutOutput, MeasurementReport, StructuralRequest};
pub use error::{CommitFault, LayoutError, LayoutWarning, StructuralError};
pub use policy::{LayoutPolicy, PolicyConfigError};
pub use position::{
    FullFallback, LayoutRects, OverConstraint, PositionCalculator, RecomputeMode, RecomputeStats,
    TilingViolation, verify_tiling,
};
pub use section::{SectionEdit, SectionManager};
pub use store::{GeometrySnapshot, GeometryStore};
pub use tree::{
    ContainerPolicy, DistributionPolicy, LAYOUT_TREE_SCHEMA_VERSION, LayoutModelError, LayoutNode,
    LayoutTree, LayoutTreeSnapshot, NodeId, NodeKind, NodeKindTag, RowSpec, SectionSpec,
    SizePreference, WidgetSlotSpec, WidgetType, WidgetTypes,
};
pub use validate::{ConstraintValidator, InvalidReason, ProposedEdit, Validity, WidgetDescriptor};
