//! Move admission over random trees with nested rows.
//!
//! Every node is proposed into every container. Whenever the kind and
//! child-limit checks admit the move, the validator must report a cycle
//! exactly when the target sits inside the moved subtree.
//!
//! Run:
//!   cargo test -p anvil-layout --test move_cycle_fuzz

use anvil_layout::{
    Axis, ContainerPolicy, InvalidReason, LayoutPolicy, LayoutTree, NodeId, ProposedEdit,
    SectionManager, SectionSpec, SizePreference, Validity, WidgetType, WidgetTypes,
};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0
    }

    fn choose_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        (self.next_u64() % len as u64) as usize
    }

    fn choose_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }
}

/// Up to three sections, rows nested under random rows, widgets scattered
/// over the rows, and the odd text-only row.
fn random_tree(seed: u64) -> LayoutTree {
    let mut rng = Lcg::new(seed);
    let mut tree = LayoutTree::new();
    let mut rows = vec![tree.children(tree.sections()[0])[0]];

    for _ in 0..rng.choose_index(3) {
        let section = tree
            .push_section(SectionSpec::default(), SizePreference::default())
            .expect("section");
        rows.push(
            tree.push_row(section, Axis::Horizontal, SizePreference::default())
                .expect("row"),
        );
    }

    for _ in 0..4 + rng.choose_index(8) {
        let axis = if rng.choose_bool() {
            Axis::Horizontal
        } else {
            Axis::Vertical
        };
        let parent = if rng.choose_bool() {
            rows[rng.choose_index(rows.len())]
        } else {
            let sections = tree.sections();
            sections[rng.choose_index(sections.len())]
        };
        rows.push(
            tree.push_row(parent, axis, SizePreference::default())
                .expect("nested row"),
        );
    }

    for _ in 0..rng.choose_index(10) {
        let row = rows[rng.choose_index(rows.len())];
        let widget_type = WidgetType::ALL[rng.choose_index(WidgetType::ALL.len())];
        let _ = tree
            .push_widget(row, widget_type, SizePreference::grow(20))
            .expect("widget");
    }

    if rng.choose_bool() {
        let row = rows[rng.choose_index(rows.len())];
        tree.set_policy(
            row,
            ContainerPolicy {
                max_children: None,
                accepted_widgets: WidgetTypes::TEXT,
            },
        )
        .expect("text-only row");
    }

    tree
}

fn all_ids(tree: &LayoutTree) -> Vec<NodeId> {
    tree.nodes().map(|node| node.id).collect()
}

/// Check every `Move { node, container }` pair of `tree` under `policy`.
/// Returns how many pairs got past the kind and limit checks.
fn check_all_moves(tree: &LayoutTree, policy: LayoutPolicy) -> Result<usize, TestCaseError> {
    let manager = SectionManager::new(policy);
    let validator = manager.validator();
    let ids = all_ids(tree);
    let mut admitted = 0;

    for &node in &ids {
        if node == tree.root() {
            continue;
        }
        let tag = tree.node(node).expect("node").tag();
        for &container in &ids {
            let Some(target) = tree.node(container) else {
                continue;
            };
            if !target.is_container() || !tree.accepts(container, tag) {
                continue;
            }
            let reorder = tree.parent(node) == Some(container);
            if !reorder
                && validator
                    .max_children(tree, container)
                    .is_some_and(|limit| target.children.len() >= limit)
            {
                continue;
            }
            admitted += 1;

            let edit = ProposedEdit::Move {
                node,
                container,
                index: 0,
            };
            let validity = validator.validate(tree, &edit);
            let cycle = matches!(
                validity,
                Validity::Invalid(InvalidReason::WouldCreateCycle { .. })
            );
            prop_assert_eq!(
                cycle,
                tree.is_same_or_ancestor(node, container),
                "move {} into {} gave {:?}",
                node,
                container,
                validity
            );
            if let Validity::Invalid(InvalidReason::WouldCreateCycle {
                node: reported,
                container: into,
            }) = validity
            {
                prop_assert_eq!(reported, node);
                prop_assert_eq!(into, container);
            }
        }
    }
    Ok(admitted)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn cycle_reported_iff_target_inside_moved_subtree(seed in any::<u64>()) {
        let tree = random_tree(seed);
        prop_assert!(tree.validate().is_ok());
        let admitted = check_all_moves(&tree, LayoutPolicy::default())?;
        prop_assert!(admitted > 0);
    }

    #[test]
    fn cycle_check_holds_under_tight_limits(seed in any::<u64>()) {
        let tree = random_tree(seed);
        let policy = LayoutPolicy {
            max_rows_per_section: Some(2),
            max_widgets_per_row: Some(2),
            rows_per_new_section: 1,
            ..LayoutPolicy::default()
        };
        let _ = check_all_moves(&tree, policy)?;
    }
}

#[test]
fn row_into_its_own_nested_row_is_a_cycle() {
    let mut tree = LayoutTree::new();
    let outer = tree.children(tree.sections()[0])[0];
    let inner = tree
        .push_row(outer, Axis::Vertical, SizePreference::default())
        .expect("inner");
    let innermost = tree
        .push_row(inner, Axis::Horizontal, SizePreference::default())
        .expect("innermost");
    let manager = SectionManager::new(LayoutPolicy::default());

    for container in [outer, inner, innermost] {
        let validity = manager.validator().validate(
            &tree,
            &ProposedEdit::Move {
                node: outer,
                container,
                index: 0,
            },
        );
        assert_eq!(
            validity,
            Validity::Invalid(InvalidReason::WouldCreateCycle {
                node: outer,
                container,
            })
        );
    }
    let outward = manager.validator().validate(
        &tree,
        &ProposedEdit::Move {
            node: innermost,
            container: outer,
            index: 0,
        },
    );
    assert_eq!(outward, Validity::Valid);
}
