use contracts::{ConnectionId, Domain, EntityId, NetRole, ProbeTier, StanceConfig, StanceState};
use stance_core::ability::{AbilityDescriptor, AbilityRegistry};
use stance_core::external::{CorruptionController, RecordComponent};
use stance_core::{
    install_stance_toggle, AbilitySlot, BodyBlueprint, CapabilityBinder, ContentCatalog,
    DeliveryPolicy, EngineContext, ExternalComponent, MemoryDiagnosticSink, NodeId, ObjectGraph,
    OverridePriority, Session, StanceLockEngine,
};

const DT: f32 = 1.0 / 60.0;

/// A single authority-side entity wired by hand around an arbitrary graph.
struct Harness {
    graph: ObjectGraph,
    roots: Vec<NodeId>,
    slot: AbilitySlot,
    binder: CapabilityBinder,
    sink: MemoryDiagnosticSink,
    engine: StanceLockEngine,
}

impl Harness {
    fn with_component(component: Box<dyn ExternalComponent>) -> Self {
        let config = StanceConfig::default();
        let mut catalog = ContentCatalog::new();
        let toggle = install_stance_toggle(&mut catalog, &config);
        let slot = AbilitySlot::new(catalog.family_variants(&config.ability_family), toggle);

        let mut graph = ObjectGraph::new();
        let body = graph.add_root("VoidSurvivorBody(Clone)");
        let model = graph.add_child(body, "ModelBase");
        graph.attach(model, component);

        let mut harness = Self {
            graph,
            roots: vec![body],
            slot,
            binder: CapabilityBinder::new(&config),
            sink: MemoryDiagnosticSink::new(),
            engine: StanceLockEngine::new(EntityId(1), NetRole::Authority, toggle, &config),
        };
        harness.with_ctx(|engine, ctx| engine.start(ctx));
        harness
    }

    fn with_ctx<R>(
        &mut self,
        f: impl FnOnce(&mut StanceLockEngine, &mut EngineContext<'_>) -> R,
    ) -> R {
        let mut ctx = EngineContext {
            graph: &mut self.graph,
            roots: &self.roots,
            slot: &mut self.slot,
            binder: &self.binder,
            diagnostics: &mut self.sink,
        };
        f(&mut self.engine, &mut ctx)
    }

    fn toggle(&mut self) -> StanceState {
        self.with_ctx(|engine, ctx| engine.toggle(ctx))
    }

    fn tick(&mut self) {
        self.graph.advance_all(DT);
        self.with_ctx(|engine, ctx| {
            engine.rebind_if_stale(ctx, DT);
            engine.track_selection(ctx.slot);
            engine.enforce_lock_tick(ctx.graph);
        });
    }

    fn record(&self) -> &RecordComponent {
        let handle = self.engine.binding().expect("bound").target;
        self.graph.downcast::<RecordComponent>(handle).expect("record")
    }
}

#[test]
fn toggle_on_fraction_meter_reaches_one_and_enters_once() {
    let mut harness = Harness::with_component(Box::new(
        RecordComponent::new("SurvivorMeter")
            .with_scalar("corruption", 0.0)
            .with_method("EnterCorruption", 0),
    ));
    assert_eq!(harness.engine.binding().map(|b| b.domain), Some(Domain::Fraction));

    assert_eq!(harness.toggle(), StanceState::Corrupted);
    assert_eq!(harness.record().scalar("corruption"), Some(1.0));
    assert_eq!(harness.record().calls("EnterCorruption"), 1);
}

#[test]
fn percent_meter_binds_by_value_and_holds_snapped_boundary() {
    let mut harness = Harness::with_component(Box::new(
        RecordComponent::new("CorruptionDisplay")
            .with_scalar("corruptionPercent", 37.5)
            .with_scalar("corruptionGainRate", 5.0)
            .with_drift("corruptionPercent", "corruptionGainRate"),
    ));
    let binding = harness.engine.binding().expect("bound");
    assert_eq!(binding.tier, ProbeTier::ValueHeuristic);
    assert_eq!(binding.domain, Domain::Percent);

    for _ in 0..30 {
        harness.tick();
        assert_eq!(harness.record().scalar("corruptionPercent"), Some(0.0));
    }
    assert_eq!(harness.record().scalar("corruptionGainRate"), Some(0.0));
    assert_eq!(harness.engine.locked_value(), Some(0.0));
}

#[test]
fn unresolved_body_dumps_once_across_ten_seconds_of_retries() {
    let (mut session, sink) =
        Session::in_memory(StanceConfig::default(), DeliveryPolicy::default());
    let id = session
        .spawn_body(
            &BodyBlueprint::void_survivor().without_controller(),
            ConnectionId::AUTHORITY,
            true,
        )
        .expect("spawn");

    session.run(600).expect("run");

    let status = session.entity_status(ConnectionId::AUTHORITY, id).expect("status");
    assert!(!status.bound);
    assert!(status.diagnostics_dumped);
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let text = reports[0].render();
    assert!(text.contains("-- ROOT: VoidSurvivorBody(Clone)"));
    assert!(text.contains("CharacterMaster"));
}

#[test]
fn duplicated_request_flips_twice_and_lands_on_original_stance() {
    let (mut session, _) = Session::in_memory(
        StanceConfig::default(),
        DeliveryPolicy {
            duplicate_requests: true,
            reverse_order: false,
        },
    );
    let observer = session.add_observer();
    let id = session
        .spawn_body(&BodyBlueprint::void_survivor(), observer, true)
        .expect("spawn");
    session.step().expect("step");
    let before = session
        .entity_status(ConnectionId::AUTHORITY, id)
        .expect("status")
        .stance;

    session.press_toggle(observer, id).expect("press");
    session.step().expect("step");

    let authority = session.participant(ConnectionId::AUTHORITY).expect("authority");
    let record = authority.entity(id).expect("record");
    assert_eq!(record.bridge().requests_applied(), 2);
    assert_eq!(record.engine().stance(), before);

    let replica = session.entity_status(observer, id).expect("status");
    assert_eq!(replica.last_result_is_corrupted, Some(before.is_corrupted()));
}

#[test]
fn selection_survives_controller_rebuild_and_relocks() {
    let (mut session, _) = Session::in_memory(StanceConfig::default(), DeliveryPolicy::default());
    let id = session
        .spawn_body(&BodyBlueprint::void_survivor(), ConnectionId::AUTHORITY, true)
        .expect("spawn");
    session.press_toggle(ConnectionId::AUTHORITY, id).expect("press");
    session.run(5).expect("run");

    let default_ability = session.default_ability();
    let authority = session.participant_mut(ConnectionId::AUTHORITY).expect("authority");
    let record = authority.entity_mut(id).expect("record");
    record.slot_mut().rebuild();
    record.slot_mut().select(default_ability);
    let old = record.spawned_controller().expect("controller");
    let new = record
        .graph_mut()
        .replace(old, Box::new(CorruptionController::new(12.0)))
        .expect("replace");

    session.run(12).expect("run");

    let status = session.entity_status(ConnectionId::AUTHORITY, id).expect("status");
    assert!(status.bound);
    assert!(status.user_chose_stance);
    assert!(status.override_registered);
    assert_eq!(status.stance, StanceState::Corrupted);

    let authority = session.participant(ConnectionId::AUTHORITY).expect("authority");
    let record = authority.entity(id).expect("record");
    assert_eq!(record.engine().binding().map(|b| b.target), Some(new));
    assert!(record
        .slot()
        .has_override(session.toggle_ability(), OverridePriority::Contextual));
    let controller = record
        .graph()
        .downcast::<CorruptionController>(new)
        .expect("controller");
    assert_eq!(controller.corruption(), 100.0);
    assert!(!controller.is_active());
    assert_eq!(controller.automatic_transforms(), 0);
}

#[test]
fn enforce_is_idempotent() {
    let mut harness = Harness::with_component(Box::new(CorruptionController::new(64.0)));
    harness.toggle();

    assert!(harness.engine.enforce_lock_tick(&mut harness.graph));
    let handle = harness.engine.binding().expect("bound").target;
    let snapshot = |graph: &ObjectGraph| {
        let c = graph.downcast::<CorruptionController>(handle).expect("controller");
        (c.corruption(), c.is_corrupted(), c.is_active())
    };
    let first = snapshot(&harness.graph);
    assert!(harness.engine.enforce_lock_tick(&mut harness.graph));
    assert_eq!(snapshot(&harness.graph), first);
    assert_eq!(harness.engine.locked_value(), Some(0.0));
}

#[test]
fn stun_blocks_toggle_until_it_expires() {
    let (mut session, _) = Session::in_memory(StanceConfig::default(), DeliveryPolicy::default());
    let id = session
        .spawn_body(&BodyBlueprint::void_survivor(), ConnectionId::AUTHORITY, true)
        .expect("spawn");

    assert!(session.stun(ConnectionId::AUTHORITY, id, 0.5).expect("stun"));
    assert_eq!(session.press_toggle(ConnectionId::AUTHORITY, id).expect("press"), None);

    session.run(31).expect("run");
    assert!(session.press_toggle(ConnectionId::AUTHORITY, id).expect("press").is_some());
    let status = session.entity_status(ConnectionId::AUTHORITY, id).expect("status");
    assert_eq!(status.stance, StanceState::Corrupted);
    assert_eq!(status.activity, "StanceToggle");
}

#[test]
fn custom_family_default_is_kept_alongside_toggle() {
    let config = StanceConfig::default();
    let mut catalog = ContentCatalog::new();
    let special = catalog.register_family(
        &config.ability_family,
        AbilityDescriptor {
            name: "VOIDSURVIVOR_SPECIAL".to_string(),
            ..AbilityDescriptor::stance_toggle(&config)
        },
    );
    let toggle = install_stance_toggle(&mut catalog, &config);
    assert_eq!(catalog.family_variants(&config.ability_family), vec![special, toggle]);
}
