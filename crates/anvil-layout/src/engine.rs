//! Serialized layout event loop.
//!
//! [`LayoutEngine`] owns the store and every component and processes one
//! [`LayoutInput`] at a time, in arrival order. While a drag is active, inputs
//! that would write the store (viewport resizes, measurement reports,
//! structural requests) are queued and replayed in order once the drag ends,
//! so the drag's snapshot stays the committed state until commit or abort.

use std::collections::{BTreeMap, VecDeque};

use anvil_core::{PointerEvent, Rect, Size};
use serde::{Deserialize, Serialize};
use web_time::{Duration, Instant};

use crate::drag::{DragCoordinator, DragSource, DragTransition};
use crate::error::{LayoutError, LayoutWarning};
use crate::policy::{LayoutPolicy, PolicyConfigError};
use crate::position::PositionCalculator;
use crate::section::{SectionEdit, SectionManager};
use crate::store::{GeometrySnapshot, GeometryStore};
use crate::tree::{LayoutModelError, LayoutTree, LayoutTreeSnapshot, NodeId, NodeKind};
use crate::validate::WidgetDescriptor;

/// Toolbar-level structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum StructuralRequest {
    CreateSection {
        after: NodeId,
    },
    DeleteSection {
        section: NodeId,
    },
    MoveRow {
        row: NodeId,
        from: NodeId,
        to: NodeId,
        at_index: usize,
    },
    ResizeSection {
        section: NodeId,
        preferred_size: u32,
    },
    InsertWidget {
        row: NodeId,
        index: usize,
        widget: WidgetDescriptor,
    },
    RemoveNode {
        node: NodeId,
    },
}

/// DOM measurement of a rendered widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementReport {
    pub node_id: NodeId,
    pub measured_width: u32,
    pub measured_height: u32,
}

/// One input to the engine loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutInput {
    Pointer(PointerEvent<DragSource>),
    Measurement(MeasurementReport),
    Edit(StructuralRequest),
    Viewport(Rect),
    /// Clock tick used to expire overdue measurement requests.
    Tick(Instant),
}

impl LayoutInput {
    /// Inputs that write the store outside of a drag commit.
    const fn mutates_store(&self) -> bool {
        matches!(
            self,
            Self::Measurement(_) | Self::Edit(_) | Self::Viewport(_)
        )
    }
}

/// Result of one processed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutOutput {
    Drag(DragTransition),
    Committed {
        revision: u64,
        affected: usize,
        warnings: Vec<LayoutWarning>,
    },
    /// Queued until the active drag ends.
    Deferred {
        queued: usize,
    },
    /// Expired measurement requests.
    TimedOut(Vec<LayoutWarning>),
    Unchanged,
}

/// Owns the committed layout and serializes every change to it.
#[derive(Debug)]
pub struct LayoutEngine {
    store: GeometryStore,
    calculator: PositionCalculator,
    coordinator: DragCoordinator,
    policy: LayoutPolicy,
    deferred: VecDeque<LayoutInput>,
    replayed: Vec<Result<LayoutOutput, LayoutError>>,
    pending_measurements: BTreeMap<NodeId, Instant>,
}

impl LayoutEngine {
    /// Validate `tree` and `policy`, lay the tree out in `viewport`, and start idle.
    ///
    /// The tree must hold at least one Section.
    pub fn new(tree: LayoutTree, viewport: Rect, policy: LayoutPolicy) -> Result<Self, LayoutError> {
        tree.validate()?;
        if tree.sections().is_empty() {
            return Err(LayoutModelError::NoSections { root: tree.root() }.into());
        }
        let policy = policy.validated().map_err(|err| match err {
            PolicyConfigError::Validation(errors) => LayoutError::InvalidPolicy(errors),
            other => LayoutError::InvalidPolicy(vec![other.to_string()]),
        })?;
        let mut calculator = PositionCalculator::new();
        let rects = calculator.compute_full(&tree, viewport);
        tracing::debug!(
            target: "anvil.engine",
            nodes = tree.len(),
            width = viewport.width,
            height = viewport.height,
            "layout engine started"
        );
        Ok(Self {
            store: GeometryStore::new(tree, rects),
            calculator,
            coordinator: DragCoordinator::new(SectionManager::new(policy.clone())),
            policy,
            deferred: VecDeque::new(),
            replayed: Vec::new(),
            pending_measurements: BTreeMap::new(),
        })
    }

    /// Start from a serialized tree.
    pub fn from_snapshot(
        snapshot: LayoutTreeSnapshot,
        viewport: Rect,
        policy: LayoutPolicy,
    ) -> Result<Self, LayoutError> {
        Self::new(LayoutTree::from_snapshot(snapshot)?, viewport, policy)
    }

    #[must_use]
    pub const fn store(&self) -> &GeometryStore {
        &self.store
    }

    #[must_use]
    pub fn snapshot(&self) -> GeometrySnapshot {
        self.store.snapshot()
    }

    #[must_use]
    pub const fn policy(&self) -> &LayoutPolicy {
        &self.policy
    }

    #[must_use]
    pub const fn coordinator(&self) -> &DragCoordinator {
        &self.coordinator
    }

    /// Mutable access for installing a commit hook.
    pub fn coordinator_mut(&mut self) -> &mut DragCoordinator {
        &mut self.coordinator
    }

    #[must_use]
    pub const fn calculator(&self) -> &PositionCalculator {
        &self.calculator
    }

    /// Inputs waiting for the active drag to end.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Results of deferred inputs replayed since the last call.
    pub fn take_replayed(&mut self) -> Vec<Result<LayoutOutput, LayoutError>> {
        std::mem::take(&mut self.replayed)
    }

    /// Nodes with an outstanding measurement request.
    pub fn pending_measurements(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pending_measurements.keys().copied()
    }

    /// Record that the host was asked to measure `node_id` at `now`.
    pub fn request_measurement(&mut self, node_id: NodeId, now: Instant) {
        let _ = self.pending_measurements.insert(node_id, now);
    }

    /// Process one input.
    pub fn handle(&mut self, input: LayoutInput) -> Result<LayoutOutput, LayoutError> {
        if self.coordinator.is_active() && input.mutates_store() {
            self.deferred.push_back(input);
            tracing::debug!(
                target: "anvil.engine",
                queued = self.deferred.len(),
                "input deferred until drag ends"
            );
            return Ok(LayoutOutput::Deferred {
                queued: self.deferred.len(),
            });
        }

        let output = self.process(input);
        if !self.coordinator.is_active() && !self.deferred.is_empty() {
            self.replay_deferred();
        }
        output
    }

    /// Abort any active drag, then replay deferred inputs.
    pub fn force_cancel(&mut self) -> Option<DragTransition> {
        let transition = self.coordinator.force_cancel();
        if !self.deferred.is_empty() {
            self.replay_deferred();
        }
        transition
    }

    fn replay_deferred(&mut self) {
        tracing::debug!(
            target: "anvil.engine",
            count = self.deferred.len(),
            "replaying deferred inputs"
        );
        while let Some(input) = self.deferred.pop_front() {
            let result = self.process(input);
            self.replayed.push(result);
        }
    }

    fn process(&mut self, input: LayoutInput) -> Result<LayoutOutput, LayoutError> {
        match input {
            LayoutInput::Pointer(event) => self
                .coordinator
                .handle_pointer(&mut self.store, &mut self.calculator, &event)
                .map(LayoutOutput::Drag),
            LayoutInput::Measurement(report) => Ok(self.apply_measurement(report)),
            LayoutInput::Edit(request) => self.apply_request(request),
            LayoutInput::Viewport(viewport) => Ok(self.resize(viewport)),
            LayoutInput::Tick(now) => Ok(self.expire_measurements(now)),
        }
    }

    fn apply_request(&mut self, request: StructuralRequest) -> Result<LayoutOutput, LayoutError> {
        let manager = self.coordinator.manager();
        let tree = self.store.tree();
        let edit = match request {
            StructuralRequest::CreateSection { after } => manager.create_section(tree, after),
            StructuralRequest::DeleteSection { section } => manager.delete_section(tree, section),
            StructuralRequest::MoveRow {
                row,
                from,
                to,
                at_index,
            } => manager.move_row(tree, row, from, to, at_index),
            StructuralRequest::ResizeSection {
                section,
                preferred_size,
            } => manager.resize_section(tree, section, preferred_size),
            StructuralRequest::InsertWidget { row, index, widget } => {
                manager.insert_widget(tree, row, index, widget)
            }
            StructuralRequest::RemoveNode { node } => manager.remove_node(tree, node),
        };
        let edit = edit.inspect_err(|err| {
            tracing::warn!(
                target: "anvil.engine",
                ?request,
                code = err.code(),
                error = %err,
                "structural request rejected"
            );
        })?;
        for removed in &edit.removed {
            let _ = self.pending_measurements.remove(removed);
        }
        Ok(self.commit_edit(edit))
    }

    fn apply_measurement(&mut self, report: MeasurementReport) -> LayoutOutput {
        let _ = self.pending_measurements.remove(&report.node_id);
        let measured = Size::new(report.measured_width, report.measured_height);
        let unchanged = self
            .store
            .tree()
            .node(report.node_id)
            .and_then(|node| match node.kind {
                NodeKind::WidgetSlot(slot) => Some(slot.measured == Some(measured)),
                _ => None,
            });
        match unchanged {
            None => {
                tracing::debug!(
                    target: "anvil.engine",
                    node = %report.node_id,
                    "measurement for unknown or non-widget node ignored"
                );
                LayoutOutput::Unchanged
            }
            Some(true) => LayoutOutput::Unchanged,
            Some(false) => {
                let mut tree = self.store.tree().clone();
                if let Err(err) = tree.set_measured(report.node_id, measured) {
                    tracing::debug!(target: "anvil.engine", error = %err, "measurement ignored");
                    return LayoutOutput::Unchanged;
                }
                let parent = tree.parent(report.node_id);
                let mut edit = SectionEdit::new(tree);
                let _ = edit.affected.insert(report.node_id);
                if let Some(parent) = parent {
                    edit.touch_container(parent);
                }
                self.commit_edit(edit)
            }
        }
    }

    fn resize(&mut self, viewport: Rect) -> LayoutOutput {
        if viewport == self.store.rects().viewport() {
            return LayoutOutput::Unchanged;
        }
        let tree = self.store.tree().clone();
        let rects = self.calculator.compute_full(&tree, viewport);
        let warnings = rects.warnings();
        let affected = tree.len();
        let revision = self.store.commit(tree, rects);
        LayoutOutput::Committed {
            revision,
            affected,
            warnings,
        }
    }

    fn expire_measurements(&mut self, now: Instant) -> LayoutOutput {
        let timeout = Duration::from_millis(self.policy.measurement_timeout_ms);
        let mut warnings = Vec::new();
        self.pending_measurements.retain(|node_id, requested| {
            let waited = now.saturating_duration_since(*requested);
            if waited < timeout {
                return true;
            }
            let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                target: "anvil.engine",
                node = %node_id,
                waited_ms,
                "measurement timed out; keeping last known size"
            );
            warnings.push(LayoutWarning::MeasurementTimeout {
                node_id: *node_id,
                waited_ms,
            });
            false
        });
        if warnings.is_empty() {
            LayoutOutput::Unchanged
        } else {
            LayoutOutput::TimedOut(warnings)
        }
    }

    fn commit_edit(&mut self, edit: SectionEdit) -> LayoutOutput {
        let viewport = self.store.rects().viewport();
        let rects = self.calculator.recompute(&edit.tree, &edit.affected, viewport);
        let warnings = rects.warnings();
        let affected = edit.affected.len();
        let revision = self.store.commit(edit.tree, rects);
        LayoutOutput::Committed {
            revision,
            affected,
            warnings,
        }
    }
}
