//! Canonical layout tree schema, arena storage and validation.
//!
//! The canvas is a tree of nested containers addressed by stable ids:
//!
//! - The root is a Section that stacks the canvas Sections vertically.
//! - A Section stacks Rows vertically.
//! - A Row lays out WidgetSlots (and nested Rows) along its own axis.
//! - A WidgetSlot is a leaf hosting one widget.
//!
//! Nodes live in an id-ordered arena so every walk is deterministic. Parent
//! links are weak back-references kept consistent with the child lists;
//! [`LayoutTree::validate`] rejects any tree where they disagree.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use anvil_core::{Axis, Size};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::StructuralError;

/// Current layout tree schema version.
pub const LAYOUT_TREE_SCHEMA_VERSION: u16 = 1;

/// Stable identifier for layout nodes.
///
/// `0` is reserved/invalid so IDs are always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Lowest valid node ID.
    pub const MIN: Self = Self(1);

    /// Create a new node ID, rejecting 0.
    pub fn new(raw: u64) -> Result<Self, LayoutModelError> {
        if raw == 0 {
            return Err(LayoutModelError::ZeroNodeId);
        }
        Ok(Self(raw))
    }

    /// Get the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Return the next ID, or an error on overflow.
    pub fn checked_next(self) -> Result<Self, LayoutModelError> {
        let Some(next) = self.0.checked_add(1) else {
            return Err(LayoutModelError::NodeIdOverflow { current: self });
        };
        Self::new(next)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::MIN
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload-free node kind discriminator used in reason codes and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindTag {
    Section,
    Row,
    WidgetSlot,
}

impl NodeKindTag {
    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::Row => "row",
            Self::WidgetSlot => "widget_slot",
        }
    }
}

impl fmt::Display for NodeKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a Section apportions its extent among its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    /// Preferred sizes are fixed; growable children split the rest equally.
    #[default]
    EqualShare,
    /// Growable children split the rest proportionally to their preferred size.
    Weighted,
}

/// Closed set of widget types a slot can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetType {
    Text,
    Button,
    Input,
    Select,
    Checkbox,
    Image,
    Table,
    Chart,
    Form,
}

impl WidgetType {
    /// Every widget type, in flag order.
    pub const ALL: [Self; 9] = [
        Self::Text,
        Self::Button,
        Self::Input,
        Self::Select,
        Self::Checkbox,
        Self::Image,
        Self::Table,
        Self::Chart,
        Self::Form,
    ];

    /// Capability flag for this type.
    #[must_use]
    pub const fn flag(self) -> WidgetTypes {
        match self {
            Self::Text => WidgetTypes::TEXT,
            Self::Button => WidgetTypes::BUTTON,
            Self::Input => WidgetTypes::INPUT,
            Self::Select => WidgetTypes::SELECT,
            Self::Checkbox => WidgetTypes::CHECKBOX,
            Self::Image => WidgetTypes::IMAGE,
            Self::Table => WidgetTypes::TABLE,
            Self::Chart => WidgetTypes::CHART,
            Self::Form => WidgetTypes::FORM,
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Button => "button",
            Self::Input => "input",
            Self::Select => "select",
            Self::Checkbox => "checkbox",
            Self::Image => "image",
            Self::Table => "table",
            Self::Chart => "chart",
            Self::Form => "form",
        }
    }
}

impl fmt::Display for WidgetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Set of widget types, used by containers that restrict what they accept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct WidgetTypes: u16 {
        const TEXT     = 1 << 0;
        const BUTTON   = 1 << 1;
        const INPUT    = 1 << 2;
        const SELECT   = 1 << 3;
        const CHECKBOX = 1 << 4;
        const IMAGE    = 1 << 5;
        const TABLE    = 1 << 6;
        const CHART    = 1 << 7;
        const FORM     = 1 << 8;
    }
}

impl WidgetTypes {
    /// First widget type present in `self`, in [`WidgetType::ALL`] order.
    #[must_use]
    pub fn first(self) -> Option<WidgetType> {
        WidgetType::ALL
            .into_iter()
            .find(|widget_type| self.contains(widget_type.flag()))
    }
}

/// Size preference along the parent's layout axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SizePreference {
    /// Whether the node absorbs leftover space.
    pub grow: bool,
    /// Hard lower bound in pixels (shrunk only when the parent is over-constrained).
    pub min_size: u32,
    /// Requested size; fixed under equal-share, a weight under weighted.
    pub preferred_size: Option<u32>,
}

impl SizePreference {
    /// Growable with a minimum.
    #[must_use]
    pub const fn grow(min_size: u32) -> Self {
        Self {
            grow: true,
            min_size,
            preferred_size: None,
        }
    }

    /// Fixed at `size`, not growable.
    #[must_use]
    pub const fn fixed(size: u32) -> Self {
        Self {
            grow: false,
            min_size: 0,
            preferred_size: Some(size),
        }
    }

    /// Replace the preferred size.
    #[must_use]
    pub const fn with_preferred(mut self, preferred_size: u32) -> Self {
        self.preferred_size = Some(preferred_size);
        self
    }
}

impl Default for SizePreference {
    fn default() -> Self {
        Self::grow(0)
    }
}

/// Per-container admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerPolicy {
    /// Overrides the policy default for this container's kind.
    pub max_children: Option<usize>,
    /// Widget types this container accepts, directly or nested.
    pub accepted_widgets: WidgetTypes,
}

impl Default for ContainerPolicy {
    fn default() -> Self {
        Self {
            max_children: None,
            accepted_widgets: WidgetTypes::all(),
        }
    }
}

/// Section payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionSpec {
    pub distribution: DistributionPolicy,
}

/// Row payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowSpec {
    pub axis: Axis,
}

/// Widget slot payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSlotSpec {
    pub widget_type: WidgetType,
    /// Natural size depends on content; DOM measurements refine the preference.
    #[serde(default)]
    pub content_sized: bool,
    /// Last size reported by the measurement collaborator.
    #[serde(default)]
    pub measured: Option<Size>,
}

impl WidgetSlotSpec {
    #[must_use]
    pub const fn new(widget_type: WidgetType) -> Self {
        Self {
            widget_type,
            content_sized: false,
            measured: None,
        }
    }
}

/// Node payload variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Section(SectionSpec),
    Row(RowSpec),
    WidgetSlot(WidgetSlotSpec),
}

impl NodeKind {
    /// Payload-free discriminator.
    #[must_use]
    pub const fn tag(&self) -> NodeKindTag {
        match self {
            Self::Section(_) => NodeKindTag::Section,
            Self::Row(_) => NodeKindTag::Row,
            Self::WidgetSlot(_) => NodeKindTag::WidgetSlot,
        }
    }

    /// Layout axis for containers, `None` for leaves.
    #[must_use]
    pub const fn axis(&self) -> Option<Axis> {
        match self {
            Self::Section(_) => Some(Axis::Vertical),
            Self::Row(row) => Some(row.axis),
            Self::WidgetSlot(_) => None,
        }
    }
}

/// Serializable node record in the canonical schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutNode {
    pub id: NodeId,
    #[serde(default)]
    pub parent: Option<NodeId>,
    /// Display order.
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub size: SizePreference,
    #[serde(default)]
    pub policy: ContainerPolicy,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl LayoutNode {
    /// Construct a childless node record.
    #[must_use]
    pub fn new(id: NodeId, parent: Option<NodeId>, kind: NodeKind, size: SizePreference) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            size,
            policy: ContainerPolicy::default(),
            kind,
        }
    }

    #[must_use]
    pub const fn tag(&self) -> NodeKindTag {
        self.kind.tag()
    }

    #[must_use]
    pub const fn is_container(&self) -> bool {
        !matches!(self.kind, NodeKind::WidgetSlot(_))
    }

    #[must_use]
    pub const fn axis(&self) -> Option<Axis> {
        self.kind.axis()
    }

    #[must_use]
    pub const fn widget_type(&self) -> Option<WidgetType> {
        match self.kind {
            NodeKind::WidgetSlot(slot) => Some(slot.widget_type),
            _ => None,
        }
    }

    /// Size preference along `axis`, with the measured extent standing in
    /// for the preferred size of content-sized slots.
    #[must_use]
    pub fn effective_size(&self, axis: Axis) -> SizePreference {
        match self.kind {
            NodeKind::WidgetSlot(WidgetSlotSpec {
                content_sized: true,
                measured: Some(measured),
                ..
            }) => self.size.with_preferred(measured.along(axis)),
            _ => self.size,
        }
    }
}

/// Canonical serialized layout tree shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutTreeSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub root: NodeId,
    pub next_id: NodeId,
    pub nodes: Vec<LayoutNode>,
}

fn default_schema_version() -> u16 {
    LAYOUT_TREE_SCHEMA_VERSION
}

impl LayoutTreeSnapshot {
    /// Canonicalize node ordering by ID for deterministic serialization.
    pub fn canonicalize(&mut self) {
        self.nodes.sort_by_key(|node| node.id);
    }
}

/// Validated layout tree for runtime usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutTree {
    schema_version: u16,
    root: NodeId,
    next_id: NodeId,
    nodes: BTreeMap<NodeId, LayoutNode>,
}

impl Default for LayoutTree {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutTree {
    /// A root canvas with no Sections.
    ///
    /// Structurally valid, but a builder starting point only: [`crate::LayoutEngine`]
    /// rejects it until a Section is pushed.
    #[must_use]
    pub fn empty() -> Self {
        let root = NodeId::MIN;
        let mut nodes = BTreeMap::new();
        let _ = nodes.insert(
            root,
            LayoutNode::new(
                root,
                None,
                NodeKind::Section(SectionSpec::default()),
                SizePreference::default(),
            ),
        );
        Self {
            schema_version: LAYOUT_TREE_SCHEMA_VERSION,
            root,
            next_id: NodeId(root.0 + 1),
            nodes,
        }
    }

    /// A root canvas holding one Section with one empty Row.
    #[must_use]
    pub fn new() -> Self {
        let mut tree = Self::empty();
        let root = tree.root;
        let section = tree.attach_new(
            root,
            0,
            NodeKind::Section(SectionSpec::default()),
            SizePreference::default(),
        );
        let _ = tree.attach_new(
            section,
            0,
            NodeKind::Row(RowSpec::default()),
            SizePreference::default(),
        );
        tree
    }

    /// Construct and validate from a serial snapshot.
    pub fn from_snapshot(mut snapshot: LayoutTreeSnapshot) -> Result<Self, LayoutModelError> {
        if snapshot.schema_version != LAYOUT_TREE_SCHEMA_VERSION {
            return Err(LayoutModelError::UnsupportedSchemaVersion {
                version: snapshot.schema_version,
            });
        }
        snapshot.canonicalize();
        let mut nodes = BTreeMap::new();
        for node in snapshot.nodes {
            let node_id = node.id;
            if nodes.insert(node_id, node).is_some() {
                return Err(LayoutModelError::DuplicateNodeId { node_id });
            }
        }
        validate_tree(snapshot.root, snapshot.next_id, &nodes)?;
        Ok(Self {
            schema_version: snapshot.schema_version,
            root: snapshot.root,
            next_id: snapshot.next_id,
            nodes,
        })
    }

    /// Export to canonical snapshot form.
    #[must_use]
    pub fn to_snapshot(&self) -> LayoutTreeSnapshot {
        LayoutTreeSnapshot {
            schema_version: self.schema_version,
            root: self.root,
            next_id: self.next_id,
            nodes: self.nodes.values().cloned().collect(),
        }
    }

    /// Root node ID.
    #[must_use]
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Next deterministic ID value.
    #[must_use]
    pub const fn next_id(&self) -> NodeId {
        self.next_id
    }

    /// Current schema version.
    #[must_use]
    pub const fn schema_version(&self) -> u16 {
        self.schema_version
    }

    /// Lookup a node by ID.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&LayoutNode> {
        self.nodes.get(&id)
    }

    /// Iterate nodes in canonical ID order.
    pub fn nodes(&self) -> impl Iterator<Item = &LayoutNode> {
        self.nodes.values()
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always holds at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Children in display order; empty for unknown ids and leaves.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map_or(&[][..], |node| node.children.as_slice())
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|node| node.parent)
    }

    /// The canvas Sections, in display order.
    #[must_use]
    pub fn sections(&self) -> &[NodeId] {
        self.children(self.root)
    }

    /// Position of `id` inside its parent's child list.
    #[must_use]
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|child| *child == id)
    }

    /// Whether `container` may directly hold a node of kind `child`.
    #[must_use]
    pub fn accepts(&self, container: NodeId, child: NodeKindTag) -> bool {
        self.nodes
            .get(&container)
            .is_some_and(|node| kind_accepts(node.tag(), container == self.root, child))
    }

    /// True if `ancestor` is `node` or one of its ancestors.
    #[must_use]
    pub fn is_same_or_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Strict ancestors of `id`, nearest first.
    #[must_use]
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent(parent);
        }
        out
    }

    /// `id` and all its descendants in pre-order.
    #[must_use]
    pub fn subtree_ids(&self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node_id) = stack.pop() {
            out.push(node_id);
            stack.extend(self.children(node_id).iter().rev().copied());
        }
        out
    }

    /// Deepest node that is the same as or an ancestor of every id in `nodes`.
    ///
    /// Returns `None` when `nodes` is empty or names an unknown id.
    #[must_use]
    pub fn lowest_common_ancestor(&self, nodes: &BTreeSet<NodeId>) -> Option<NodeId> {
        let mut iter = nodes.iter();
        let first = *iter.next()?;
        if !self.contains(first) {
            return None;
        }
        let mut chain = vec![first];
        chain.extend(self.ancestors(first));
        chain.reverse();

        let mut depth = chain.len();
        for node in iter {
            if !self.contains(*node) {
                return None;
            }
            let mut other = vec![*node];
            other.extend(self.ancestors(*node));
            other.reverse();
            depth = depth.min(
                chain
                    .iter()
                    .zip(other.iter())
                    .take_while(|(left, right)| left == right)
                    .count(),
            );
        }
        depth.checked_sub(1).map(|index| chain[index])
    }

    /// Union of the widget types hosted by `id` and its descendants.
    #[must_use]
    pub fn widget_types_in(&self, id: NodeId) -> WidgetTypes {
        self.subtree_ids(id)
            .into_iter()
            .filter_map(|node_id| self.node(node_id).and_then(LayoutNode::widget_type))
            .fold(WidgetTypes::empty(), |acc, widget_type| {
                acc | widget_type.flag()
            })
    }

    /// Validate internal invariants.
    pub fn validate(&self) -> Result<(), LayoutModelError> {
        validate_tree(self.root, self.next_id, &self.nodes)
    }

    /// Insert a fresh childless node under `parent` at `index`.
    ///
    /// Containment rules are enforced; admission policies are not (those
    /// belong to the constraint validator).
    pub fn insert_node(
        &mut self,
        parent: NodeId,
        index: usize,
        kind: NodeKind,
        size: SizePreference,
    ) -> Result<NodeId, StructuralError> {
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or(StructuralError::MissingNode { node_id: parent })?;
        if !parent_node.is_container() {
            return Err(StructuralError::NotAContainer { node_id: parent });
        }
        if !kind_accepts(parent_node.tag(), parent == self.root, kind.tag()) {
            return Err(StructuralError::KindMismatch {
                container: parent,
                container_kind: parent_node.tag(),
                child_kind: kind.tag(),
            });
        }
        let len = parent_node.children.len();
        if index > len {
            return Err(StructuralError::IndexOutOfBounds {
                container: parent,
                index,
                len,
            });
        }
        let id = self.allocate_id()?;
        let _ = self
            .nodes
            .insert(id, LayoutNode::new(id, Some(parent), kind, size));
        self.attach(id, parent, index)?;
        Ok(id)
    }

    /// Append a Section to the canvas.
    pub fn push_section(
        &mut self,
        spec: SectionSpec,
        size: SizePreference,
    ) -> Result<NodeId, StructuralError> {
        let len = self.sections().len();
        self.insert_node(self.root, len, NodeKind::Section(spec), size)
    }

    /// Append a Row to a Section or Row.
    pub fn push_row(
        &mut self,
        parent: NodeId,
        axis: Axis,
        size: SizePreference,
    ) -> Result<NodeId, StructuralError> {
        let len = self.children(parent).len();
        self.insert_node(parent, len, NodeKind::Row(RowSpec { axis }), size)
    }

    /// Append a WidgetSlot to a Row.
    pub fn push_widget(
        &mut self,
        row: NodeId,
        widget_type: WidgetType,
        size: SizePreference,
    ) -> Result<NodeId, StructuralError> {
        let len = self.children(row).len();
        self.insert_node(
            row,
            len,
            NodeKind::WidgetSlot(WidgetSlotSpec::new(widget_type)),
            size,
        )
    }

    /// Replace a node's size preference.
    pub fn set_size(&mut self, id: NodeId, size: SizePreference) -> Result<(), StructuralError> {
        self.node_mut(id)?.size = size;
        Ok(())
    }

    /// Replace a container's admission policy.
    pub fn set_policy(&mut self, id: NodeId, policy: ContainerPolicy) -> Result<(), StructuralError> {
        let node = self.node_mut(id)?;
        if !node.is_container() {
            return Err(StructuralError::NotAContainer { node_id: id });
        }
        node.policy = policy;
        Ok(())
    }

    /// Mark a slot as content-sized.
    pub fn set_content_sized(&mut self, id: NodeId, content_sized: bool) -> Result<(), StructuralError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::WidgetSlot(slot) => {
                slot.content_sized = content_sized;
                Ok(())
            }
            _ => Err(StructuralError::NotAWidgetSlot { node_id: id }),
        }
    }

    /// Record a DOM measurement on a slot.
    pub fn set_measured(&mut self, id: NodeId, measured: Size) -> Result<(), StructuralError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::WidgetSlot(slot) => {
                slot.measured = Some(measured);
                Ok(())
            }
            _ => Err(StructuralError::NotAWidgetSlot { node_id: id }),
        }
    }

    /// Deterministic structural hash of the current tree state.
    ///
    /// Used by abort/rollback checks and operation logs.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0001_0000_01b3;

        fn mix(hash: &mut u64, byte: u8) {
            *hash ^= u64::from(byte);
            *hash = hash.wrapping_mul(PRIME);
        }

        fn mix_bytes(hash: &mut u64, bytes: &[u8]) {
            for byte in bytes {
                mix(hash, *byte);
            }
        }

        fn mix_u32(hash: &mut u64, value: u32) {
            mix_bytes(hash, &value.to_le_bytes());
        }

        fn mix_u64(hash: &mut u64, value: u64) {
            mix_bytes(hash, &value.to_le_bytes());
        }

        fn mix_opt_u64(hash: &mut u64, value: Option<u64>) {
            match value {
                Some(value) => {
                    mix(hash, 1);
                    mix_u64(hash, value);
                }
                None => mix(hash, 0),
            }
        }

        fn mix_axis(hash: &mut u64, axis: Axis) {
            mix(
                hash,
                match axis {
                    Axis::Horizontal => 1,
                    Axis::Vertical => 2,
                },
            );
        }

        let mut hash = OFFSET_BASIS;
        mix_bytes(&mut hash, &self.schema_version.to_le_bytes());
        mix_u64(&mut hash, self.root.get());
        mix_u64(&mut hash, self.next_id.get());
        mix_u64(&mut hash, self.nodes.len() as u64);

        for node in self.nodes.values() {
            mix_u64(&mut hash, node.id.get());
            mix_opt_u64(&mut hash, node.parent.map(NodeId::get));
            mix_u64(&mut hash, node.children.len() as u64);
            for child in &node.children {
                mix_u64(&mut hash, child.get());
            }
            mix(&mut hash, u8::from(node.size.grow));
            mix_u32(&mut hash, node.size.min_size);
            mix_opt_u64(&mut hash, node.size.preferred_size.map(u64::from));
            mix_opt_u64(&mut hash, node.policy.max_children.map(|max| max as u64));
            mix_bytes(&mut hash, &node.policy.accepted_widgets.bits().to_le_bytes());

            match node.kind {
                NodeKind::Section(section) => {
                    mix(&mut hash, 1);
                    mix(
                        &mut hash,
                        match section.distribution {
                            DistributionPolicy::EqualShare => 1,
                            DistributionPolicy::Weighted => 2,
                        },
                    );
                }
                NodeKind::Row(row) => {
                    mix(&mut hash, 2);
                    mix_axis(&mut hash, row.axis);
                }
                NodeKind::WidgetSlot(slot) => {
                    mix(&mut hash, 3);
                    mix_bytes(&mut hash, &slot.widget_type.flag().bits().to_le_bytes());
                    mix(&mut hash, u8::from(slot.content_sized));
                    match slot.measured {
                        Some(size) => {
                            mix(&mut hash, 1);
                            mix_u32(&mut hash, size.width);
                            mix_u32(&mut hash, size.height);
                        }
                        None => mix(&mut hash, 0),
                    }
                }
            }
        }

        hash
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut LayoutNode, StructuralError> {
        self.nodes
            .get_mut(&id)
            .ok_or(StructuralError::MissingNode { node_id: id })
    }

    pub(crate) fn allocate_id(&mut self) -> Result<NodeId, StructuralError> {
        let current = self.next_id;
        self.next_id = self
            .next_id
            .checked_next()
            .map_err(|_| StructuralError::NodeIdOverflow { current })?;
        Ok(current)
    }

    /// Insert a brand-new node without admission checks. Only used while
    /// building trees whose shape is known to be legal.
    fn attach_new(
        &mut self,
        parent: NodeId,
        index: usize,
        kind: NodeKind,
        size: SizePreference,
    ) -> NodeId {
        let id = self.next_id;
        self.next_id = NodeId(id.0 + 1);
        let _ = self
            .nodes
            .insert(id, LayoutNode::new(id, Some(parent), kind, size));
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(index, id);
        }
        id
    }

    /// Link an existing, currently detached node under `parent` at `index`.
    pub(crate) fn attach(
        &mut self,
        child: NodeId,
        parent: NodeId,
        index: usize,
    ) -> Result<(), StructuralError> {
        let parent_node = self.node_mut(parent)?;
        let len = parent_node.children.len();
        if index > len {
            return Err(StructuralError::IndexOutOfBounds {
                container: parent,
                index,
                len,
            });
        }
        parent_node.children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Unlink `id` from its parent, returning the former parent and index.
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<(NodeId, usize), StructuralError> {
        if id == self.root {
            return Err(StructuralError::CannotMoveRoot { node_id: id });
        }
        let parent = self
            .parent(id)
            .ok_or(StructuralError::MissingNode { node_id: id })?;
        let parent_node = self.node_mut(parent)?;
        let index = parent_node
            .children
            .iter()
            .position(|child| *child == id)
            .ok_or(StructuralError::ParentMismatch {
                node_id: id,
                expected_parent: parent,
            })?;
        let _ = parent_node.children.remove(index);
        self.node_mut(id)?.parent = None;
        Ok((parent, index))
    }

    /// Remove `id` and its whole subtree, returning the removed ids.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<NodeId>, StructuralError> {
        if id == self.root {
            return Err(StructuralError::CannotRemoveRoot { node_id: id });
        }
        let _ = self.detach(id)?;
        let removed = self.subtree_ids(id);
        for node_id in &removed {
            let _ = self.nodes.remove(node_id);
        }
        Ok(removed)
    }

    /// Move `node` under `container`.
    ///
    /// `index` addresses `container`'s child list as observed before the
    /// move, which is what a hit test sees; a same-parent move past the
    /// node's own slot is shifted down by one.
    pub(crate) fn move_node(
        &mut self,
        node: NodeId,
        container: NodeId,
        index: usize,
    ) -> Result<(NodeId, usize), StructuralError> {
        if self.is_same_or_ancestor(node, container) {
            return Err(StructuralError::WouldCreateCycle { node, container });
        }
        let len = self.children(container).len();
        if index > len {
            return Err(StructuralError::IndexOutOfBounds {
                container,
                index,
                len,
            });
        }
        let (old_parent, old_index) = self.detach(node)?;
        let index = if old_parent == container && old_index < index {
            index - 1
        } else {
            index
        };
        self.attach(node, container, index)?;
        Ok((old_parent, old_index))
    }
}

const fn kind_accepts(container: NodeKindTag, is_root: bool, child: NodeKindTag) -> bool {
    match container {
        NodeKindTag::Section if is_root => matches!(child, NodeKindTag::Section),
        NodeKindTag::Section => matches!(child, NodeKindTag::Row),
        NodeKindTag::Row => matches!(child, NodeKindTag::Row | NodeKindTag::WidgetSlot),
        NodeKindTag::WidgetSlot => false,
    }
}

/// Validation errors for layout tree construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutModelError {
    ZeroNodeId,
    UnsupportedSchemaVersion {
        version: u16,
    },
    DuplicateNodeId {
        node_id: NodeId,
    },
    MissingRoot {
        root: NodeId,
    },
    RootNotSection {
        root: NodeId,
        kind: NodeKindTag,
    },
    RootHasParent {
        root: NodeId,
        parent: NodeId,
    },
    MissingParent {
        node_id: NodeId,
        parent: NodeId,
    },
    MissingChild {
        parent: NodeId,
        child: NodeId,
    },
    MultipleParents {
        child: NodeId,
        first_parent: NodeId,
        second_parent: NodeId,
    },
    ParentMismatch {
        node_id: NodeId,
        expected: Option<NodeId>,
        actual: Option<NodeId>,
    },
    DuplicateChild {
        parent: NodeId,
        child: NodeId,
    },
    KindNotAccepted {
        parent: NodeId,
        parent_kind: NodeKindTag,
        child: NodeId,
        child_kind: NodeKindTag,
    },
    CycleDetected {
        node_id: NodeId,
    },
    UnreachableNode {
        node_id: NodeId,
    },
    NextIdNotGreaterThanExisting {
        next_id: NodeId,
        max_existing: NodeId,
    },
    NodeIdOverflow {
        current: NodeId,
    },
    /// The root holds no Section, so nothing can be dropped anywhere.
    NoSections {
        root: NodeId,
    },
}

impl fmt::Display for LayoutModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroNodeId => write!(f, "node id 0 is invalid"),
            Self::UnsupportedSchemaVersion { version } => write!(
                f,
                "unsupported layout schema version {version} (expected {LAYOUT_TREE_SCHEMA_VERSION})"
            ),
            Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id {node_id}"),
            Self::MissingRoot { root } => write!(f, "root node {root} not found"),
            Self::RootNotSection { root, kind } => {
                write!(f, "root node {root} must be a section, found {kind}")
            }
            Self::RootHasParent { root, parent } => {
                write!(f, "root node {root} must not have parent {parent}")
            }
            Self::MissingParent { node_id, parent } => {
                write!(f, "node {node_id} references missing parent {parent}")
            }
            Self::MissingChild { parent, child } => {
                write!(f, "node {parent} references missing child {child}")
            }
            Self::MultipleParents {
                child,
                first_parent,
                second_parent,
            } => write!(
                f,
                "node {child} has multiple parents: {first_parent} and {second_parent}"
            ),
            Self::ParentMismatch {
                node_id,
                expected,
                actual,
            } => write!(
                f,
                "node {node_id} parent mismatch: expected {:?}, got {:?}",
                expected.map(NodeId::get),
                actual.map(NodeId::get)
            ),
            Self::DuplicateChild { parent, child } => {
                write!(f, "node {parent} lists child {child} more than once")
            }
            Self::KindNotAccepted {
                parent,
                parent_kind,
                child,
                child_kind,
            } => write!(
                f,
                "{parent_kind} {parent} cannot hold {child_kind} {child}"
            ),
            Self::CycleDetected { node_id } => write!(f, "cycle detected at node {node_id}"),
            Self::UnreachableNode { node_id } => {
                write!(f, "node {node_id} is not reachable from root")
            }
            Self::NextIdNotGreaterThanExisting {
                next_id,
                max_existing,
            } => write!(
                f,
                "next_id {next_id} must be greater than max existing id {max_existing}"
            ),
            Self::NodeIdOverflow { current } => write!(f, "node id overflow after {current}"),
            Self::NoSections { root } => write!(f, "root node {root} holds no sections"),
        }
    }
}

impl std::error::Error for LayoutModelError {}

fn validate_tree(
    root: NodeId,
    next_id: NodeId,
    nodes: &BTreeMap<NodeId, LayoutNode>,
) -> Result<(), LayoutModelError> {
    let Some(root_node) = nodes.get(&root) else {
        return Err(LayoutModelError::MissingRoot { root });
    };
    if root_node.tag() != NodeKindTag::Section {
        return Err(LayoutModelError::RootNotSection {
            root,
            kind: root_node.tag(),
        });
    }
    if let Some(parent) = root_node.parent {
        return Err(LayoutModelError::RootHasParent { root, parent });
    }

    let max_existing = nodes.keys().next_back().copied().unwrap_or(root);
    if next_id <= max_existing {
        return Err(LayoutModelError::NextIdNotGreaterThanExisting {
            next_id,
            max_existing,
        });
    }

    let mut expected_parents = BTreeMap::new();
    for node in nodes.values() {
        if let Some(parent) = node.parent
            && !nodes.contains_key(&parent)
        {
            return Err(LayoutModelError::MissingParent {
                node_id: node.id,
                parent,
            });
        }

        let mut seen = BTreeSet::new();
        for child in &node.children {
            if !seen.insert(*child) {
                return Err(LayoutModelError::DuplicateChild {
                    parent: node.id,
                    child: *child,
                });
            }
            let Some(child_node) = nodes.get(child) else {
                return Err(LayoutModelError::MissingChild {
                    parent: node.id,
                    child: *child,
                });
            };
            if !kind_accepts(node.tag(), node.id == root, child_node.tag()) {
                return Err(LayoutModelError::KindNotAccepted {
                    parent: node.id,
                    parent_kind: node.tag(),
                    child: *child,
                    child_kind: child_node.tag(),
                });
            }
            if let Some(first_parent) = expected_parents.insert(*child, node.id)
                && first_parent != node.id
            {
                return Err(LayoutModelError::MultipleParents {
                    child: *child,
                    first_parent,
                    second_parent: node.id,
                });
            }
        }
    }

    for node in nodes.values() {
        let expected = if node.id == root {
            None
        } else {
            expected_parents.get(&node.id).copied()
        };
        if node.parent != expected {
            return Err(LayoutModelError::ParentMismatch {
                node_id: node.id,
                expected,
                actual: node.parent,
            });
        }
    }

    let mut visiting = BTreeSet::new();
    let mut visited = BTreeSet::new();
    dfs_validate(root, nodes, &mut visiting, &mut visited)?;

    if visited.len() != nodes.len()
        && let Some(node_id) = nodes.keys().find(|node_id| !visited.contains(node_id))
    {
        return Err(LayoutModelError::UnreachableNode { node_id: *node_id });
    }

    Ok(())
}

fn dfs_validate(
    node_id: NodeId,
    nodes: &BTreeMap<NodeId, LayoutNode>,
    visiting: &mut BTreeSet<NodeId>,
    visited: &mut BTreeSet<NodeId>,
) -> Result<(), LayoutModelError> {
    if visiting.contains(&node_id) {
        return Err(LayoutModelError::CycleDetected { node_id });
    }
    if !visited.insert(node_id) {
        return Ok(());
    }

    let _ = visiting.insert(node_id);
    if let Some(node) = nodes.get(&node_id) {
        for child in &node.children {
            dfs_validate(*child, nodes, visiting, visited)?;
        }
    }
    let _ = visiting.remove(&node_id);
    Ok(())
}
