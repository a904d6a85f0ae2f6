use anvil_layout::{
    AbortReason, Axis, CommitFault, ContainerPolicy, DragCoordinator, DragEffect, DragPhase,
    DragSource, DragTransition, GeometryStore, InvalidReason, LayoutEngine, LayoutError,
    LayoutInput, LayoutOutput, LayoutPolicy, LayoutRects, LayoutTree, Modifiers, NodeId, Point,
    PointerEvent, PositionCalculator, Rect, SectionManager, SectionSpec, SizePreference, WidgetDescriptor,
    WidgetType, WidgetTypes, verify_tiling,
};

const VIEWPORT: Rect = Rect::new(0, 0, 1000, 600);

/// One section with two stacked rows: `[chart | text]` above `[note]`.
/// The lower row only accepts text widgets.
struct Canvas {
    tree: LayoutTree,
    section: NodeId,
    upper: NodeId,
    lower: NodeId,
    chart: NodeId,
    text: NodeId,
    note: NodeId,
}

fn canvas() -> Canvas {
    let mut tree = LayoutTree::new();
    let section = tree.sections()[0];
    let upper = tree.children(section)[0];
    let lower = tree
        .push_row(section, Axis::Horizontal, SizePreference::default())
        .expect("lower row");
    tree.set_policy(
        lower,
        ContainerPolicy {
            max_children: None,
            accepted_widgets: WidgetTypes::TEXT,
        },
    )
    .expect("text-only row");
    let chart = tree
        .push_widget(upper, WidgetType::Chart, SizePreference::grow(40))
        .expect("chart");
    let text = tree
        .push_widget(upper, WidgetType::Text, SizePreference::grow(40))
        .expect("text");
    let note = tree
        .push_widget(lower, WidgetType::Text, SizePreference::grow(40))
        .expect("note");
    Canvas {
        tree,
        section,
        upper,
        lower,
        chart,
        text,
        note,
    }
}

struct Session {
    store: GeometryStore,
    calculator: PositionCalculator,
    coordinator: DragCoordinator,
}

impl Session {
    fn new(tree: LayoutTree) -> Self {
        let mut calculator = PositionCalculator::new();
        let rects = calculator.compute_full(&tree, VIEWPORT);
        Self {
            store: GeometryStore::new(tree, rects),
            calculator,
            coordinator: DragCoordinator::new(SectionManager::new(LayoutPolicy::default())),
        }
    }

    fn send(&mut self, event: PointerEvent<DragSource>) -> Result<DragTransition, LayoutError> {
        self.coordinator
            .handle_pointer(&mut self.store, &mut self.calculator, &event)
    }
}

#[test]
fn canvas_geometry_is_stacked_rows() {
    let c = canvas();
    let rects = PositionCalculator::new().compute_full(&c.tree, VIEWPORT);
    verify_tiling(&c.tree, &rects).expect("tiled");
    assert_eq!(rects.get(c.section), Some(VIEWPORT));
    assert_eq!(rects.get(c.upper), Some(Rect::new(0, 0, 1000, 300)));
    assert_eq!(rects.get(c.lower), Some(Rect::new(0, 300, 1000, 300)));
    assert_eq!(rects.get(c.chart), Some(Rect::new(0, 0, 500, 300)));
    assert_eq!(rects.get(c.note), Some(Rect::new(0, 300, 1000, 300)));
}

#[test]
fn chart_over_text_only_row_is_rejected_and_store_untouched() {
    let c = canvas();
    let mut session = Session::new(c.tree.clone());
    let before = session.store.snapshot();

    let _ = session
        .send(PointerEvent::down(Point::new(200, 150), DragSource::existing(c.chart)))
        .expect("start");
    let moved = session
        .send(PointerEvent::moved(Point::new(700, 450)))
        .expect("move");

    let DragEffect::TargetUpdated {
        target,
        valid,
        reason,
    } = moved.effect
    else {
        panic!("expected target update, got {:?}", moved.effect);
    };
    assert!(!valid);
    assert_eq!(target.map(|target| target.container), Some(c.lower));
    assert_eq!(
        reason,
        Some(InvalidReason::WidgetTypeRejected {
            container: c.lower,
            widget_type: WidgetType::Chart,
        })
    );
    let state = session.coordinator.state().expect("dragging");
    assert_eq!(state.reason_code(), Some("widget_type_rejected"));
    assert!(!state.is_valid());

    let up = session.send(PointerEvent::up(Point::new(700, 450))).expect("abort");
    assert_eq!(up.through, Some(DragPhase::Aborting));
    assert!(matches!(
        up.effect,
        DragEffect::Aborted {
            reason: AbortReason::InvalidDrop,
            invalid: Some(InvalidReason::WidgetTypeRejected { .. }),
        }
    ));
    assert_eq!(session.store.snapshot(), before);
    assert_eq!(session.store.tree().children(c.upper), &[c.chart, c.text]);
}

#[test]
fn abort_after_many_moves_restores_exact_state() {
    let c = canvas();
    let mut session = Session::new(c.tree.clone());
    let before = session.store.snapshot();
    let hash = before.state_hash();

    for moves in [1_i32, 7, 64, 250] {
        let _ = session
            .send(PointerEvent::down(Point::new(600, 100), DragSource::existing(c.text)))
            .expect("start");
        for step in 0..moves {
            let x = (step * 37) % 1100 - 50;
            let y = (step * 53) % 700 - 50;
            let _ = session.send(PointerEvent::moved(Point::new(x, y))).expect("move");
        }
        let cancel = session.send(PointerEvent::cancel()).expect("cancel");
        assert!(matches!(
            cancel.effect,
            DragEffect::Aborted {
                reason: AbortReason::Cancelled,
                ..
            }
        ));
        assert_eq!(session.store.tree().state_hash(), hash);
        assert_eq!(session.store.rects(), before.rects.as_ref());
        assert_eq!(session.store.revision(), 0);
        assert!(!session.coordinator.is_active());
    }
}

#[test]
fn moving_last_widget_prunes_its_row() {
    let c = canvas();
    let mut session = Session::new(c.tree.clone());

    let _ = session
        .send(PointerEvent::down(Point::new(500, 450), DragSource::existing(c.note)))
        .expect("start");
    let up = session.send(PointerEvent::up(Point::new(990, 150))).expect("commit");
    assert!(matches!(up.effect, DragEffect::Committed { revision: 1, .. }));

    let tree = session.store.tree();
    assert_eq!(tree.children(c.upper), &[c.chart, c.text, c.note]);
    assert!(!tree.contains(c.lower));
    assert_eq!(tree.children(c.section), &[c.upper]);
    verify_tiling(tree, session.store.rects()).expect("tiled");
    assert_eq!(session.store.rects().get(c.upper), Some(VIEWPORT));
}

#[test]
fn hook_veto_restores_pre_drag_snapshot() {
    let c = canvas();
    let mut session = Session::new(c.tree.clone());
    session
        .coordinator
        .set_commit_hook(|_: &LayoutTree, _: &LayoutRects| -> Result<(), String> {
            Err("persist failed".to_owned())
        });
    let before = session.store.snapshot();

    let _ = session
        .send(PointerEvent::down(Point::new(200, 150), DragSource::existing(c.chart)))
        .expect("start");
    let err = session
        .send(PointerEvent::up(Point::new(990, 150)))
        .expect_err("vetoed");
    assert!(err.to_string().contains("persist failed"));
    let LayoutError::RollbackFault {
        cause,
        restored_hash,
    } = err
    else {
        panic!("expected rollback, got {err:?}");
    };
    assert_eq!(cause, CommitFault::Hook("persist failed".to_owned()));
    assert_eq!(restored_hash, before.state_hash());
    assert_eq!(session.store.snapshot(), before);
    assert_eq!(session.coordinator.phase(), DragPhase::Idle);

    session.coordinator.clear_commit_hook();
    let _ = session
        .send(PointerEvent::down(Point::new(200, 150), DragSource::existing(c.chart)))
        .expect("start");
    let up = session.send(PointerEvent::up(Point::new(990, 150))).expect("commit");
    assert!(matches!(up.effect, DragEffect::Committed { revision: 1, .. }));
    assert_eq!(session.store.tree().children(c.upper), &[c.text, c.chart]);
}

#[test]
fn engine_defers_resize_until_drop_commits() {
    let c = canvas();
    let mut engine = LayoutEngine::new(c.tree, VIEWPORT, LayoutPolicy::default()).expect("engine");

    let started = engine
        .handle(LayoutInput::Pointer(PointerEvent::down(
            Point::new(200, 150),
            DragSource::new_widget(WidgetDescriptor::new(WidgetType::Text)),
        )))
        .expect("start");
    assert!(matches!(started, LayoutOutput::Drag(_)));

    let resized = Rect::from_size(800, 400);
    let deferred = engine.handle(LayoutInput::Viewport(resized)).expect("defer");
    assert_eq!(deferred, LayoutOutput::Deferred { queued: 1 });
    assert_eq!(engine.store().rects().viewport(), VIEWPORT);

    let dropped = engine
        .handle(LayoutInput::Pointer(PointerEvent::up(Point::new(500, 450))))
        .expect("commit");
    let LayoutOutput::Drag(transition) = dropped else {
        panic!("expected drag output, got {dropped:?}");
    };
    assert!(matches!(transition.effect, DragEffect::Committed { .. }));
    assert_eq!(engine.store().tree().children(c.lower).len(), 2);

    let replayed = engine.take_replayed();
    assert_eq!(replayed.len(), 1);
    assert!(matches!(replayed[0], Ok(LayoutOutput::Committed { .. })));
    assert_eq!(engine.deferred_len(), 0);
    assert_eq!(engine.store().rects().viewport(), resized);
    verify_tiling(engine.store().tree(), engine.store().rects()).expect("tiled");
}

/// Two sections stacked vertically: `upper` holds rows `first` and `second`,
/// `lower` holds the single row `third`.
struct TwoSections {
    tree: LayoutTree,
    upper: NodeId,
    lower: NodeId,
    first: NodeId,
    second: NodeId,
    third: NodeId,
}

fn two_sections() -> TwoSections {
    let mut tree = LayoutTree::new();
    let upper = tree.sections()[0];
    let first = tree.children(upper)[0];
    let second = tree
        .push_row(upper, Axis::Horizontal, SizePreference::default())
        .expect("second row");
    let lower = tree
        .push_section(SectionSpec::default(), SizePreference::default())
        .expect("lower section");
    let third = tree
        .push_row(lower, Axis::Horizontal, SizePreference::default())
        .expect("third row");
    TwoSections {
        tree,
        upper,
        lower,
        first,
        second,
        third,
    }
}

#[test]
fn row_dragged_into_other_section_lands_in_that_section() {
    let s = two_sections();
    let mut session = Session::new(s.tree.clone());
    assert_eq!(session.store.rects().get(s.second), Some(Rect::new(0, 150, 1000, 150)));
    assert_eq!(session.store.rects().get(s.third), Some(Rect::new(0, 300, 1000, 300)));

    let _ = session
        .send(PointerEvent::down(Point::new(500, 200), DragSource::existing(s.second)))
        .expect("start");
    let moved = session
        .send(PointerEvent::moved(Point::new(500, 500)))
        .expect("move");
    let DragEffect::TargetUpdated { target, valid, .. } = moved.effect else {
        panic!("expected target update, got {:?}", moved.effect);
    };
    assert!(valid);
    assert_eq!(target.map(|target| target.container), Some(s.lower));

    let up = session.send(PointerEvent::up(Point::new(500, 500))).expect("commit");
    assert!(matches!(up.effect, DragEffect::Committed { revision: 1, .. }));

    let tree = session.store.tree();
    assert_eq!(tree.parent(s.second), Some(s.lower));
    assert_eq!(tree.children(s.lower), &[s.third, s.second]);
    assert_eq!(tree.children(s.upper), &[s.first]);
    verify_tiling(tree, session.store.rects()).expect("tiled");
    assert_eq!(session.store.rects().get(s.first), Some(Rect::new(0, 0, 1000, 300)));
}

#[test]
fn row_dragged_with_alt_nests_in_row_under_pointer() {
    let s = two_sections();
    let mut session = Session::new(s.tree.clone());

    let _ = session
        .send(PointerEvent::down(Point::new(500, 200), DragSource::existing(s.second)))
        .expect("start");
    let up = session
        .send(PointerEvent::up(Point::new(500, 500)).with_modifiers(Modifiers::ALT))
        .expect("commit");
    assert!(matches!(up.effect, DragEffect::Committed { revision: 1, .. }));

    let tree = session.store.tree();
    assert_eq!(tree.parent(s.second), Some(s.third));
    assert_eq!(tree.children(s.third), &[s.second]);
    assert_eq!(tree.children(s.lower), &[s.third]);
    verify_tiling(tree, session.store.rects()).expect("tiled");
}

#[test]
fn palette_drop_uses_policy_default_slot_size() {
    let c = canvas();
    let policy = LayoutPolicy {
        default_slot_min_size: 200,
        ..LayoutPolicy::default()
    };
    let mut engine = LayoutEngine::new(c.tree, VIEWPORT, policy).expect("engine");

    let _ = engine
        .handle(LayoutInput::Pointer(PointerEvent::down(
            Point::new(990, 150),
            DragSource::new_widget(WidgetDescriptor::new(WidgetType::Text)),
        )))
        .expect("start");
    let dropped = engine
        .handle(LayoutInput::Pointer(PointerEvent::up(Point::new(990, 150))))
        .expect("commit");
    let LayoutOutput::Drag(transition) = dropped else {
        panic!("expected drag output, got {dropped:?}");
    };
    assert!(matches!(transition.effect, DragEffect::Committed { .. }));

    let tree = engine.store().tree();
    let children = tree.children(c.upper);
    assert_eq!(children.len(), 3);
    assert_eq!(&children[..2], &[c.chart, c.text]);
    let slot = tree.node(children[2]).expect("new slot");
    assert_eq!(slot.size, SizePreference::grow(200));
    assert!(engine.store().rects().get(children[2]).is_some_and(|rect| rect.width >= 200));
}
