use contracts::{Domain, EntityId, NetRole, ProbeTier, StanceConfig, StanceState};
use proptest::prelude::*;
use stance_core::binder::build_binding;
use stance_core::external::{CorruptionController, RecordComponent};
use stance_core::probe::is_limit_named;
use stance_core::{
    install_stance_toggle, AbilityRegistry, AbilitySlot, CapabilityBinder, ContentCatalog,
    EngineContext, MemoryDiagnosticSink, ObjectGraph, StanceLockEngine,
};

fn member_name() -> impl Strategy<Value = String> {
    let prefix = prop::sample::select(vec!["", "base", "void", "current", "passive"]);
    let stem = prop::sample::select(vec![
        "corruption",
        "Corruption",
        "corrupt",
        "health",
        "energy",
    ]);
    let word = prop::sample::select(vec![
        "Rate",
        "PerSecond",
        "Delta",
        "Min",
        "Max",
        "Threshold",
        "Limit",
        "ToTransform",
        "Percent",
        "Gain",
        "Bound",
        "Regen",
        "",
    ]);
    (prefix, stem, word, word_strategy()).prop_map(|(p, s, w, tail)| format!("{p}{s}{w}{tail}"))
}

fn word_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["", "InCombat", "WhileCorrupted", "Max", "Speed"])
}

proptest! {
    #[test]
    fn driver_fields_never_include_limits_or_primary(
        names in prop::collection::btree_set(member_name(), 1..12),
        value in 0.0_f32..=100.0,
    ) {
        let mut component = RecordComponent::new("Meter").with_scalar("corruption", value);
        for name in &names {
            if name != "corruption" {
                component = component.with_scalar(name.clone(), 1.0);
            }
        }
        let mut graph = ObjectGraph::new();
        let root = graph.add_root("Body");
        let handle = graph.attach(root, Box::new(component)).expect("attach");

        let binding = build_binding(&graph, handle, ProbeTier::Shape).expect("value member");
        prop_assert_eq!(binding.value.member(), "corruption");
        for driver in binding.driver_names() {
            prop_assert!(driver != "corruption");
            prop_assert!(!is_limit_named(&driver), "limit-named driver {}", driver);
        }
    }

    #[test]
    fn boundaries_classify_as_their_own_stance(value in -50.0_f32..250.0) {
        let domain = Domain::infer(value);
        for stance in [StanceState::Controlled, StanceState::Corrupted] {
            let boundary = domain.boundary(stance);
            prop_assert_eq!(domain.classify(boundary), stance);
            prop_assert_eq!(domain.stance_at(boundary), stance);
        }
        let clamped = domain.clamp(value);
        prop_assert!(clamped >= domain.min() && clamped <= domain.max());
    }

    #[test]
    fn toggle_is_a_pure_complement(initial in 0.0_f32..=100.0, corrupted in any::<bool>()) {
        let config = StanceConfig::default();
        let mut catalog = ContentCatalog::new();
        let toggle = install_stance_toggle(&mut catalog, &config);
        let mut slot = AbilitySlot::new(catalog.family_variants(&config.ability_family), toggle);

        let mut controller = CorruptionController::new(initial);
        if corrupted {
            controller = controller.corrupted();
        }
        let mut graph = ObjectGraph::new();
        let body = graph.add_root("VoidSurvivorBody(Clone)");
        graph.attach(body, Box::new(controller));
        let roots = vec![body];
        let binder = CapabilityBinder::new(&config);
        let mut sink = MemoryDiagnosticSink::new();
        let mut engine = StanceLockEngine::new(EntityId(1), NetRole::Authority, toggle, &config);

        let mut ctx = EngineContext {
            graph: &mut graph,
            roots: &roots,
            slot: &mut slot,
            binder: &binder,
            diagnostics: &mut sink,
        };
        engine.start(&mut ctx);
        let before = engine.stance();
        prop_assert_eq!(before, StanceState::from_corrupted(corrupted));
        prop_assert_eq!(engine.toggle(&mut ctx), before.complement());
        prop_assert_eq!(engine.toggle(&mut ctx), before);
    }
}
