//! Drag/drop lifecycle.
//!
//! ```text
//! Idle -> Dragging -> Committing -> Idle
//!             \-----> Aborting ---> Idle
//! ```
//!
//! `Committing` and `Aborting` are passed through within the handling of a
//! single pointer-up or cancel event; they show up in the `through` field of
//! the emitted [`DragTransition`]. While `Dragging`, pointer moves only update
//! the drag state; hit testing runs against the snapshot taken on pointer-down
//! and the store is never written until commit.

use std::fmt;

use anvil_core::{Axis, Modifiers, Point, PointerEvent, PointerEventKind};
use serde::{Deserialize, Serialize};

use crate::error::{CommitFault, LayoutError};
use crate::position::{LayoutRects, PositionCalculator, verify_tiling};
use crate::section::SectionManager;
use crate::store::{GeometrySnapshot, GeometryStore};
use crate::tree::{LayoutTree, NodeId, NodeKindTag};
use crate::validate::{InvalidReason, ProposedEdit, Validity, WidgetDescriptor};

/// What is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DragSource {
    /// A node already on the canvas.
    Existing { node_id: NodeId },
    /// A widget from the palette.
    NewWidget { widget: WidgetDescriptor },
}

impl DragSource {
    #[must_use]
    pub const fn existing(node_id: NodeId) -> Self {
        Self::Existing { node_id }
    }

    #[must_use]
    pub const fn new_widget(widget: WidgetDescriptor) -> Self {
        Self::NewWidget { widget }
    }

    /// Edit that would drop this source at `target`.
    #[must_use]
    pub const fn edit_for(&self, target: DropTarget) -> ProposedEdit {
        match *self {
            Self::Existing { node_id } => ProposedEdit::Move {
                node: node_id,
                container: target.container,
                index: target.index,
            },
            Self::NewWidget { widget } => ProposedEdit::Insert {
                container: target.container,
                index: target.index,
                widget,
            },
        }
    }
}

/// Candidate insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTarget {
    pub container: NodeId,
    pub index: usize,
    pub axis: Axis,
}

/// Live state of an active drag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragState {
    pub source: DragSource,
    pub origin: Point,
    pub pointer: Point,
    pub target: Option<DropTarget>,
    pub validity: Validity,
    /// Committed state at pointer-down.
    pub snapshot: GeometrySnapshot,
    pub moves: u64,
    pub started_sequence: u64,
}

impl DragState {
    /// True if a drop at the current pointer would commit.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.target.is_some() && self.validity.is_valid()
    }

    /// Last reason code for UI feedback.
    #[must_use]
    pub fn reason_code(&self) -> Option<&'static str> {
        self.validity.reason().map(|reason| reason.code())
    }
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragPhase {
    Idle,
    Dragging,
    Committing,
    Aborting,
}

impl fmt::Display for DragPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Dragging => "dragging",
            Self::Committing => "committing",
            Self::Aborting => "aborting",
        })
    }
}

/// Why a drag ended without a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Released outside any accepting container.
    NoTarget,
    /// Released over a target the validator refused.
    InvalidDrop,
    /// Host cancellation event.
    Cancelled,
    /// [`DragCoordinator::force_cancel`].
    Programmatic,
}

/// Explicit diagnostics for events that are safely ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragNoopReason {
    IdleWithoutActiveDrag,
    MissingDragSource,
    UnknownDragSource,
    ActiveDragAlreadyInProgress,
}

/// Effect emitted by one lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum DragEffect {
    Started {
        source: DragSource,
        origin: Point,
    },
    TargetUpdated {
        target: Option<DropTarget>,
        valid: bool,
        reason: Option<InvalidReason>,
    },
    Committed {
        edit: ProposedEdit,
        revision: u64,
        affected: usize,
    },
    Aborted {
        reason: AbortReason,
        invalid: Option<InvalidReason>,
    },
    Noop {
        reason: DragNoopReason,
    },
}

/// One lifecycle transition with deterministic telemetry fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragTransition {
    pub transition_id: u64,
    pub sequence: u64,
    pub from: DragPhase,
    pub to: DragPhase,
    /// Transient phase passed through on the way to `to`.
    pub through: Option<DragPhase>,
    pub effect: DragEffect,
}

/// Last-chance veto run after geometry refresh and before the store write.
///
/// Returning `Err` rolls the drag back.
pub trait CommitHook {
    fn before_commit(&mut self, tree: &LayoutTree, rects: &LayoutRects) -> Result<(), String>;
}

impl<F> CommitHook for F
where
    F: FnMut(&LayoutTree, &LayoutRects) -> Result<(), String>,
{
    fn before_commit(&mut self, tree: &LayoutTree, rects: &LayoutRects) -> Result<(), String> {
        self(tree, rects)
    }
}

/// Drives a drag from pointer-down to commit or abort.
pub struct DragCoordinator {
    manager: SectionManager,
    state: Option<DragState>,
    hook: Option<Box<dyn CommitHook>>,
    transition_counter: u64,
    sequence: u64,
}

impl fmt::Debug for DragCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DragCoordinator")
            .field("manager", &self.manager)
            .field("state", &self.state)
            .field("hook", &self.hook.is_some())
            .field("transition_counter", &self.transition_counter)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Default for DragCoordinator {
    fn default() -> Self {
        Self::new(SectionManager::default())
    }
}

impl DragCoordinator {
    #[must_use]
    pub fn new(manager: SectionManager) -> Self {
        Self {
            manager,
            state: None,
            hook: None,
            transition_counter: 0,
            sequence: 0,
        }
    }

    /// Install a commit hook, replacing any previous one.
    pub fn set_commit_hook(&mut self, hook: impl CommitHook + 'static) {
        self.hook = Some(Box::new(hook));
    }

    pub fn clear_commit_hook(&mut self) {
        self.hook = None;
    }

    #[must_use]
    pub const fn manager(&self) -> &SectionManager {
        &self.manager
    }

    #[must_use]
    pub const fn state(&self) -> Option<&DragState> {
        self.state.as_ref()
    }

    #[must_use]
    pub const fn phase(&self) -> DragPhase {
        if self.state.is_some() {
            DragPhase::Dragging
        } else {
            DragPhase::Idle
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Consume one pointer event.
    ///
    /// Only a failed commit returns `Err`; the store then holds the pre-drag
    /// snapshot again and the coordinator is idle.
    pub fn handle_pointer(
        &mut self,
        store: &mut GeometryStore,
        calculator: &mut PositionCalculator,
        event: &PointerEvent<DragSource>,
    ) -> Result<DragTransition, LayoutError> {
        self.sequence = self.sequence.saturating_add(1);
        let from = self.phase();

        let (to, through, effect) = match (self.state.take(), event.kind) {
            (None, PointerEventKind::Down) => self.start(store, event),
            (None, _) => (
                DragPhase::Idle,
                None,
                DragEffect::Noop {
                    reason: DragNoopReason::IdleWithoutActiveDrag,
                },
            ),
            (Some(state), PointerEventKind::Down) => {
                self.state = Some(state);
                (
                    DragPhase::Dragging,
                    None,
                    DragEffect::Noop {
                        reason: DragNoopReason::ActiveDragAlreadyInProgress,
                    },
                )
            }
            (Some(mut state), PointerEventKind::Move) => {
                state.moves = state.moves.saturating_add(1);
                let effect = self.retarget(&mut state, event.position, event.modifiers);
                self.state = Some(state);
                (DragPhase::Dragging, None, effect)
            }
            (Some(mut state), PointerEventKind::Up) => {
                let _ = self.retarget(&mut state, event.position, event.modifiers);
                match state.target.filter(|_| state.validity.is_valid()) {
                    Some(target) => {
                        let edit = state.source.edit_for(target);
                        let effect = self.commit(store, calculator, &state, edit)?;
                        (DragPhase::Idle, Some(DragPhase::Committing), effect)
                    }
                    None => {
                        let reason = if state.target.is_some() {
                            AbortReason::InvalidDrop
                        } else {
                            AbortReason::NoTarget
                        };
                        (
                            DragPhase::Idle,
                            Some(DragPhase::Aborting),
                            DragEffect::Aborted {
                                reason,
                                invalid: state.validity.reason(),
                            },
                        )
                    }
                }
            }
            (Some(state), PointerEventKind::Cancel) => (
                DragPhase::Idle,
                Some(DragPhase::Aborting),
                DragEffect::Aborted {
                    reason: AbortReason::Cancelled,
                    invalid: state.validity.reason(),
                },
            ),
        };

        Ok(self.emit(from, to, through, effect))
    }

    /// Abort an active drag from host code.
    pub fn cancel(
        &mut self,
        store: &mut GeometryStore,
        calculator: &mut PositionCalculator,
    ) -> Result<DragTransition, LayoutError> {
        self.handle_pointer(store, calculator, &PointerEvent::cancel())
    }

    /// Unconditionally reset to Idle, returning a diagnostic transition if a
    /// drag was active.
    pub fn force_cancel(&mut self) -> Option<DragTransition> {
        let state = self.state.take()?;
        Some(self.emit(
            DragPhase::Dragging,
            DragPhase::Idle,
            Some(DragPhase::Aborting),
            DragEffect::Aborted {
                reason: AbortReason::Programmatic,
                invalid: state.validity.reason(),
            },
        ))
    }

    fn start(
        &mut self,
        store: &GeometryStore,
        event: &PointerEvent<DragSource>,
    ) -> (DragPhase, Option<DragPhase>, DragEffect) {
        let Some(source) = event.target_hint else {
            return (
                DragPhase::Idle,
                None,
                DragEffect::Noop {
                    reason: DragNoopReason::MissingDragSource,
                },
            );
        };
        if let DragSource::Existing { node_id } = source
            && (node_id == store.tree().root() || !store.tree().contains(node_id))
        {
            return (
                DragPhase::Idle,
                None,
                DragEffect::Noop {
                    reason: DragNoopReason::UnknownDragSource,
                },
            );
        }

        self.state = Some(DragState {
            source,
            origin: event.position,
            pointer: event.position,
            target: None,
            validity: Validity::Valid,
            snapshot: store.snapshot(),
            moves: 0,
            started_sequence: self.sequence,
        });
        (
            DragPhase::Dragging,
            None,
            DragEffect::Started {
                source,
                origin: event.position,
            },
        )
    }

    fn retarget(&self, state: &mut DragState, pointer: Point, modifiers: Modifiers) -> DragEffect {
        state.pointer = pointer;
        let tree = &state.snapshot.tree;
        state.target = resolve_drop_target(
            tree,
            &state.snapshot.rects,
            &state.source,
            pointer,
            modifiers,
        );
        state.validity = match state.target {
            Some(target) => self
                .manager
                .validator()
                .validate(tree, &state.source.edit_for(target)),
            None => Validity::Valid,
        };
        DragEffect::TargetUpdated {
            target: state.target,
            valid: state.is_valid(),
            reason: state.validity.reason(),
        }
    }

    fn commit(
        &mut self,
        store: &mut GeometryStore,
        calculator: &mut PositionCalculator,
        state: &DragState,
        edit: ProposedEdit,
    ) -> Result<DragEffect, LayoutError> {
        let _span = tracing::debug_span!(
            target: "anvil.drag",
            "drag.commit",
            sequence = self.sequence,
            moves = state.moves,
        )
        .entered();

        match self.try_commit(store, calculator, &edit) {
            Ok((revision, affected)) => Ok(DragEffect::Committed {
                edit,
                revision,
                affected,
            }),
            Err(cause) => {
                store.restore(&state.snapshot);
                calculator.prime(state.snapshot.rects.as_ref().clone());
                let restored_hash = state.snapshot.state_hash();
                tracing::warn!(
                    target: "anvil.drag",
                    cause = %cause,
                    restored_hash,
                    "drag commit rolled back"
                );
                Err(LayoutError::RollbackFault {
                    cause,
                    restored_hash,
                })
            }
        }
    }

    fn try_commit(
        &mut self,
        store: &mut GeometryStore,
        calculator: &mut PositionCalculator,
        edit: &ProposedEdit,
    ) -> Result<(u64, usize), CommitFault> {
        let section_edit = self
            .manager
            .apply_edit(store.tree(), edit)
            .map_err(CommitFault::Structural)?;
        let rects = calculator.recompute(
            &section_edit.tree,
            &section_edit.affected,
            store.rects().viewport(),
        );
        if cfg!(debug_assertions) {
            verify_tiling(&section_edit.tree, &rects).map_err(CommitFault::Geometry)?;
        }
        if let Some(hook) = self.hook.as_mut() {
            hook.before_commit(&section_edit.tree, &rects)
                .map_err(CommitFault::Hook)?;
        }
        let affected = section_edit.affected.len();
        let revision = store.commit(section_edit.tree, rects);
        Ok((revision, affected))
    }

    fn emit(
        &mut self,
        from: DragPhase,
        to: DragPhase,
        through: Option<DragPhase>,
        effect: DragEffect,
    ) -> DragTransition {
        self.transition_counter = self.transition_counter.saturating_add(1);
        let transition = DragTransition {
            transition_id: self.transition_counter,
            sequence: self.sequence,
            from,
            to,
            through,
            effect,
        };
        tracing::debug!(
            target: "anvil.drag",
            transition_id = transition.transition_id,
            sequence = transition.sequence,
            from = %from,
            to = %to,
            effect = ?effect,
            "drag transition"
        );
        transition
    }
}

/// Hit-test `pointer` against `rects` for a drop of `source`.
///
/// Finds the deepest node containing the pointer (not descending into the
/// dragged subtree), walks up to the nearest container accepting the dragged
/// kind, and picks the insertion index from child midpoints along that
/// container's axis.
///
/// A dragged Row lands in the nearest Section under the pointer. Holding
/// [`Modifiers::ALT`] nests it inside the Row under the pointer instead.
#[must_use]
pub fn resolve_drop_target(
    tree: &LayoutTree,
    rects: &LayoutRects,
    source: &DragSource,
    pointer: Point,
    modifiers: Modifiers,
) -> Option<DropTarget> {
    let (kind, dragged) = match *source {
        DragSource::Existing { node_id } => (tree.node(node_id)?.tag(), Some(node_id)),
        DragSource::NewWidget { .. } => (NodeKindTag::WidgetSlot, None),
    };

    let root = tree.root();
    if !rects.get(root)?.contains(pointer) {
        return None;
    }
    let mut deepest = root;
    'descend: loop {
        for child in tree.children(deepest) {
            if Some(*child) == dragged {
                continue;
            }
            if rects.get(*child).is_some_and(|rect| rect.contains(pointer)) {
                deepest = *child;
                continue 'descend;
            }
        }
        break;
    }

    let nest_rows = modifiers.contains(Modifiers::ALT);
    let container = std::iter::once(deepest)
        .chain(tree.ancestors(deepest))
        .find(|candidate| {
            tree.accepts(*candidate, kind)
                && (kind != NodeKindTag::Row
                    || nest_rows
                    || tree
                        .node(*candidate)
                        .is_some_and(|node| node.tag() == NodeKindTag::Section))
        })?;
    let axis = tree.node(container)?.axis()?;

    let doubled = i64::from(pointer.along(axis)) * 2;
    let children = tree.children(container);
    let index = children
        .iter()
        .position(|child| {
            rects
                .get(*child)
                .is_some_and(|rect| doubled < rect.doubled_center(axis) as i64)
        })
        .unwrap_or(children.len());

    Some(DropTarget {
        container,
        index,
        axis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LayoutPolicy;
    use crate::tree::{SizePreference, WidgetType};
    use anvil_core::Rect;

    const VIEWPORT: Rect = Rect::new(0, 0, 1000, 600);

    struct Harness {
        store: GeometryStore,
        calculator: PositionCalculator,
        coordinator: DragCoordinator,
        row: NodeId,
        text: NodeId,
        button: NodeId,
    }

    /// One section, one row holding [text | button], each 500px wide.
    fn harness() -> Harness {
        let mut tree = LayoutTree::new();
        let section = tree.sections()[0];
        let row = tree.children(section)[0];
        let text = tree
            .push_widget(row, WidgetType::Text, SizePreference::grow(50))
            .expect("text");
        let button = tree
            .push_widget(row, WidgetType::Button, SizePreference::grow(50))
            .expect("button");
        let mut calculator = PositionCalculator::new();
        let rects = calculator.compute_full(&tree, VIEWPORT);
        Harness {
            store: GeometryStore::new(tree, rects),
            calculator,
            coordinator: DragCoordinator::new(SectionManager::new(LayoutPolicy::default())),
            row,
            text,
            button,
        }
    }

    impl Harness {
        fn send(&mut self, event: PointerEvent<DragSource>) -> Result<DragTransition, LayoutError> {
            self.coordinator
                .handle_pointer(&mut self.store, &mut self.calculator, &event)
        }
    }

    #[test]
    fn move_without_drag_is_noop() {
        let mut h = harness();
        let transition = h.send(PointerEvent::moved(Point::new(5, 5))).expect("noop");
        assert_eq!(
            transition.effect,
            DragEffect::Noop {
                reason: DragNoopReason::IdleWithoutActiveDrag
            }
        );
        assert_eq!(transition.from, DragPhase::Idle);
        assert_eq!(transition.to, DragPhase::Idle);
    }

    #[test]
    fn down_without_hint_is_noop() {
        let mut h = harness();
        let transition = h
            .send(PointerEvent::new(PointerEventKind::Down, Point::new(5, 5)))
            .expect("noop");
        assert_eq!(
            transition.effect,
            DragEffect::Noop {
                reason: DragNoopReason::MissingDragSource
            }
        );
        assert!(!h.coordinator.is_active());
    }

    #[test]
    fn reorder_commits_and_bumps_revision() {
        let mut h = harness();
        let text = h.text;
        let _ = h
            .send(PointerEvent::down(Point::new(100, 100), DragSource::existing(text)))
            .expect("start");
        assert_eq!(h.coordinator.phase(), DragPhase::Dragging);

        let moved = h.send(PointerEvent::moved(Point::new(900, 100))).expect("move");
        let DragEffect::TargetUpdated { target, valid, .. } = moved.effect else {
            panic!("expected target update, got {:?}", moved.effect);
        };
        assert!(valid);
        assert_eq!(
            target,
            Some(DropTarget {
                container: h.row,
                index: 2,
                axis: Axis::Horizontal,
            })
        );

        let up = h.send(PointerEvent::up(Point::new(900, 100))).expect("commit");
        assert_eq!(up.through, Some(DragPhase::Committing));
        assert_eq!(up.to, DragPhase::Idle);
        assert!(matches!(up.effect, DragEffect::Committed { revision: 1, .. }));
        assert_eq!(h.store.tree().children(h.row), &[h.button, h.text]);
        verify_tiling(h.store.tree(), h.store.rects()).expect("tiled");
    }

    #[test]
    fn cancel_leaves_store_untouched() {
        let mut h = harness();
        let before = h.store.snapshot();
        let _ = h
            .send(PointerEvent::down(Point::new(10, 10), DragSource::existing(h.text)))
            .expect("start");
        for x in (0..1000).step_by(50) {
            let _ = h.send(PointerEvent::moved(Point::new(x, 300))).expect("move");
        }
        let cancel = h.send(PointerEvent::cancel()).expect("cancel");
        assert_eq!(cancel.through, Some(DragPhase::Aborting));
        assert!(matches!(
            cancel.effect,
            DragEffect::Aborted {
                reason: AbortReason::Cancelled,
                ..
            }
        ));
        assert_eq!(h.store.snapshot(), before);
    }

    #[test]
    fn release_outside_canvas_aborts_with_no_target() {
        let mut h = harness();
        let _ = h
            .send(PointerEvent::down(Point::new(10, 10), DragSource::existing(h.text)))
            .expect("start");
        let up = h.send(PointerEvent::up(Point::new(-20, 5000))).expect("abort");
        assert!(matches!(
            up.effect,
            DragEffect::Aborted {
                reason: AbortReason::NoTarget,
                ..
            }
        ));
        assert_eq!(h.store.revision(), 0);
    }

    #[test]
    fn second_down_during_drag_is_noop() {
        let mut h = harness();
        let _ = h
            .send(PointerEvent::down(Point::new(10, 10), DragSource::existing(h.text)))
            .expect("start");
        let again = h
            .send(PointerEvent::down(Point::new(10, 10), DragSource::existing(h.button)))
            .expect("noop");
        assert_eq!(
            again.effect,
            DragEffect::Noop {
                reason: DragNoopReason::ActiveDragAlreadyInProgress
            }
        );
        let state = h.coordinator.state().expect("still dragging");
        assert_eq!(state.source, DragSource::existing(h.text));
    }

    #[test]
    fn hook_failure_rolls_back() {
        let mut h = harness();
        h.coordinator
            .set_commit_hook(|_: &LayoutTree, _: &LayoutRects| -> Result<(), String> {
                Err("veto".to_owned())
            });
        let before = h.store.snapshot();
        let _ = h
            .send(PointerEvent::down(Point::new(10, 10), DragSource::existing(h.text)))
            .expect("start");
        let err = h
            .send(PointerEvent::up(Point::new(990, 10)))
            .expect_err("hook vetoes");
        assert_eq!(
            err,
            LayoutError::RollbackFault {
                cause: CommitFault::Hook("veto".to_owned()),
                restored_hash: before.state_hash(),
            }
        );
        assert_eq!(h.store.snapshot(), before);
        assert!(!h.coordinator.is_active());
        assert_eq!(h.calculator.previous(), Some(before.rects.as_ref()));
    }

    #[test]
    fn force_cancel_is_idempotent() {
        let mut h = harness();
        assert!(h.coordinator.force_cancel().is_none());
        let _ = h
            .send(PointerEvent::down(Point::new(10, 10), DragSource::existing(h.text)))
            .expect("start");
        let transition = h.coordinator.force_cancel().expect("was dragging");
        assert_eq!(transition.from, DragPhase::Dragging);
        assert_eq!(transition.to, DragPhase::Idle);
        assert!(h.coordinator.force_cancel().is_none());
    }

    #[test]
    fn transition_ids_are_monotonic() {
        let mut h = harness();
        let first = h.send(PointerEvent::moved(Point::new(1, 1))).expect("noop");
        let second = h
            .send(PointerEvent::down(Point::new(1, 1), DragSource::existing(h.text)))
            .expect("start");
        let third = h.send(PointerEvent::cancel()).expect("cancel");
        assert!(first.transition_id < second.transition_id);
        assert!(second.transition_id < third.transition_id);
        assert_eq!(third.sequence, 3);
    }

    #[test]
    fn palette_widget_drop_inserts_slot() {
        let mut h = harness();
        let descriptor = WidgetDescriptor::new(WidgetType::Select);
        let _ = h
            .send(PointerEvent::down(
                Point::new(-50, -50),
                DragSource::new_widget(descriptor),
            ))
            .expect("start");
        let up = h.send(PointerEvent::up(Point::new(10, 10))).expect("commit");
        assert!(matches!(up.effect, DragEffect::Committed { .. }));
        let first = h.store.tree().children(h.row)[0];
        assert_eq!(
            h.store.tree().node(first).and_then(|node| node.widget_type()),
            Some(WidgetType::Select)
        );
    }
}
