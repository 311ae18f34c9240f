//! Authoritative stance lock.
//!
//! The engine owns the locked scalar and the sticky selection flag for one
//! entity. Bindings come and go as the external system rebuilds its
//! components; neither the locked stance nor the selection flag is tied to a
//! particular binding.

use contracts::{Domain, EntityId, NetRole, StanceConfig, StanceState};
use tracing::{debug, info, warn};

use crate::ability::{AbilityHandle, AbilitySlot, OverridePriority};
use crate::binder::CapabilityBinder;
use crate::binding::{AdapterBinding, Resolution};
use crate::diagnostics::DiagnosticSink;
use crate::graph::{NodeId, ObjectGraph};

/// Everything outside the engine that one engine operation touches.
pub struct EngineContext<'a> {
    pub graph: &'a mut ObjectGraph,
    pub roots: &'a [NodeId],
    pub slot: &'a mut AbilitySlot,
    pub binder: &'a CapabilityBinder,
    pub diagnostics: &'a mut dyn DiagnosticSink,
}

#[derive(Debug)]
pub struct StanceLockEngine {
    entity: EntityId,
    role: NetRole,
    toggle_ability: AbilityHandle,
    binding: Option<AdapterBinding>,
    domain: Domain,
    locked: f32,
    user_chose_stance: bool,
    override_registered: bool,
    rebind_interval: f32,
    rebind_timer: f32,
    dumped: bool,
}

impl StanceLockEngine {
    pub fn new(
        entity: EntityId,
        role: NetRole,
        toggle_ability: AbilityHandle,
        config: &StanceConfig,
    ) -> Self {
        Self {
            entity,
            role,
            toggle_ability,
            binding: None,
            domain: Domain::default(),
            locked: f32::NAN,
            user_chose_stance: false,
            override_registered: false,
            rebind_interval: config.rebind_interval_secs,
            rebind_timer: 0.0,
            dumped: false,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn toggle_ability(&self) -> AbilityHandle {
        self.toggle_ability
    }

    pub fn binding(&self) -> Option<&AdapterBinding> {
        self.binding.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn stance(&self) -> StanceState {
        self.domain.stance_at(self.locked)
    }

    pub fn locked_value(&self) -> Option<f32> {
        (!self.locked.is_nan()).then_some(self.locked)
    }

    pub fn user_chose_stance(&self) -> bool {
        self.user_chose_stance
    }

    pub fn override_registered(&self) -> bool {
        self.override_registered
    }

    pub fn diagnostics_dumped(&self) -> bool {
        self.dumped
    }

    /// Reads the initial loadout choice and performs the first bind.
    pub fn start(&mut self, ctx: &mut EngineContext<'_>) {
        self.user_chose_stance = ctx.slot.equipped() == self.toggle_ability;
        self.resolve(ctx);
    }

    /// Discards any binding and runs the binder. Returns whether a binding
    /// was obtained.
    pub fn resolve(&mut self, ctx: &mut EngineContext<'_>) -> bool {
        self.binding = None;
        match ctx.binder.resolve(ctx.graph, ctx.roots) {
            Resolution::Bound(binding) => {
                self.adopt(binding, ctx.graph);
                true
            }
            Resolution::Unresolved { scanned } => {
                debug!(entity = %self.entity, scanned, "no stance controller found");
                if !self.dumped {
                    self.dumped = true;
                    let report = ctx.binder.inventory(self.entity, ctx.graph, ctx.roots);
                    warn!(
                        entity = %self.entity,
                        components = report.component_count(),
                        "stance controller unresolved; publishing component dump"
                    );
                    if let Err(err) = ctx.diagnostics.publish(&report) {
                        warn!(entity = %self.entity, error = %err, "component dump failed");
                    }
                }
                false
            }
        }
    }

    fn adopt(&mut self, binding: AdapterBinding, graph: &ObjectGraph) {
        if self.locked.is_nan() {
            let stance = match binding.read_is_at_max(graph) {
                Some(corrupted) => StanceState::from_corrupted(corrupted),
                None => {
                    let raw = binding.read_value(graph).unwrap_or(0.0);
                    binding.domain.classify(Domain::Percent.clamp(raw))
                }
            };
            self.domain = binding.domain;
            self.locked = self.domain.boundary(stance);
            info!(entity = %self.entity, %stance, locked = self.locked, "initial stance snapped");
        } else {
            let stance = self.stance();
            self.domain = binding.domain;
            self.locked = self.domain.boundary(stance);
            debug!(
                entity = %self.entity,
                %stance,
                locked = self.locked,
                "stance carried onto new binding"
            );
        }
        self.binding = Some(binding);
    }

    /// Drops a binding whose target no longer exists and rebinds when none is
    /// held. Returns whether a new binding was made.
    pub fn ensure_bound(&mut self, ctx: &mut EngineContext<'_>) -> bool {
        if let Some(binding) = &self.binding {
            if binding.is_valid(ctx.graph) {
                return false;
            }
            info!(entity = %self.entity, target = %binding.target_type, "bound controller lost");
            self.binding = None;
        }
        self.resolve(ctx)
    }

    /// Throttled rebind check; runs on both authority and observers.
    pub fn rebind_if_stale(&mut self, ctx: &mut EngineContext<'_>, dt: f32) -> bool {
        self.rebind_timer -= dt;
        if self.rebind_timer > 0.0 {
            return false;
        }
        self.rebind_timer = self.rebind_interval;
        self.ensure_bound(ctx)
    }

    /// Keeps the selection flag sticky and the contextual override in step
    /// with it.
    pub fn track_selection(&mut self, slot: &mut AbilitySlot) {
        let toggle = self.toggle_ability;
        if slot.equipped() == toggle && !self.user_chose_stance {
            info!(entity = %self.entity, "stance toggle selected");
            self.user_chose_stance = true;
        }

        if self.user_chose_stance {
            if slot.family_contains(toggle)
                && !slot.has_override(toggle, OverridePriority::Contextual)
            {
                slot.set_override(toggle, OverridePriority::Contextual);
                debug!(entity = %self.entity, "contextual override registered");
            }
            self.override_registered = slot.has_override(toggle, OverridePriority::Contextual);
        } else if self.override_registered
            || slot.has_override(toggle, OverridePriority::Contextual)
        {
            slot.unset_override(toggle, OverridePriority::Contextual);
            self.override_registered = false;
        }
    }

    /// Flips the stance. Authority only; observers get the current stance
    /// back unchanged.
    pub fn toggle(&mut self, ctx: &mut EngineContext<'_>) -> StanceState {
        if !self.role.is_authority() {
            warn!(entity = %self.entity, "toggle called without authority");
            return self.stance();
        }

        self.ensure_bound(ctx);
        self.track_selection(ctx.slot);

        let current = self.stance();
        let Some(binding) = self.binding.as_ref() else {
            warn!(entity = %self.entity, "toggle ignored: no stance controller bound");
            return current;
        };

        let target = current.complement();
        let corrupted = target.is_corrupted();
        let value = binding.domain.boundary(target);

        binding.write_value(ctx.graph, value);
        let hooks = binding.invoke_transition(ctx.graph, corrupted);
        binding.write_is_at_max(ctx.graph, corrupted);
        binding.write_is_active(ctx.graph, false);
        // transition hooks may have rewritten the scalar
        binding.write_value(ctx.graph, value);

        self.domain = binding.domain;
        self.locked = value;
        info!(entity = %self.entity, stance = %target, value, hooks, "stance toggled");
        target
    }

    /// Reasserts the locked value over whatever the external system did
    /// since the last tick.
    pub fn enforce_lock_tick(&mut self, graph: &mut ObjectGraph) -> bool {
        if !self.role.is_authority() || !self.user_chose_stance {
            return false;
        }
        let Some(binding) = self.binding.as_ref() else {
            return false;
        };

        if self.locked.is_nan() {
            self.locked = binding.read_value(graph).unwrap_or(f32::NAN);
        }
        self.locked = binding.domain.clamp(self.locked);

        binding.write_value(graph, self.locked);
        binding.suppress_activity(graph);
        binding.zero_drivers(graph);
        true
    }

    /// Teardown: unregisters the contextual override and drops the binding.
    pub fn release(&mut self, slot: &mut AbilitySlot) {
        if self.override_registered
            || slot.has_override(self.toggle_ability, OverridePriority::Contextual)
        {
            slot.unset_override(self.toggle_ability, OverridePriority::Contextual);
        }
        self.override_registered = false;
        self.binding = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ability::{install_stance_toggle, AbilityRegistry, ContentCatalog};
    use crate::diagnostics::MemoryDiagnosticSink;
    use crate::external::{CorruptionController, RecordComponent};
    use crate::graph::{ComponentHandle, ExternalComponent};

    struct Rig {
        graph: ObjectGraph,
        roots: Vec<NodeId>,
        slot: AbilitySlot,
        binder: CapabilityBinder,
        sink: MemoryDiagnosticSink,
        engine: StanceLockEngine,
        target: Option<ComponentHandle>,
    }

    impl Rig {
        fn new(role: NetRole, component: Option<Box<dyn ExternalComponent>>, chose: bool) -> Self {
            let config = StanceConfig::default();
            let mut catalog = ContentCatalog::new();
            let toggle = install_stance_toggle(&mut catalog, &config);
            let other = catalog.register_ability(crate::ability::AbilityDescriptor {
                name: "VOID_SPECIAL".to_string(),
                ..crate::ability::AbilityDescriptor::stance_toggle(&config)
            });
            catalog.add_family_variant(&config.ability_family, other);
            let slot = AbilitySlot::new(
                catalog.family_variants(&config.ability_family),
                if chose { toggle } else { other },
            );

            let mut graph = ObjectGraph::new();
            let body = graph.add_root("VoidSurvivorBody(Clone)");
            let target = component.and_then(|c| graph.attach(body, c));
            Self {
                graph,
                roots: vec![body],
                slot,
                binder: CapabilityBinder::new(&config),
                sink: MemoryDiagnosticSink::new(),
                engine: StanceLockEngine::new(EntityId(1), role, toggle, &config),
                target,
            }
        }

        fn split(&mut self) -> (&mut StanceLockEngine, EngineContext<'_>) {
            let Rig {
                graph,
                roots,
                slot,
                binder,
                sink,
                engine,
                ..
            } = self;
            (
                engine,
                EngineContext {
                    graph,
                    roots,
                    slot,
                    binder,
                    diagnostics: sink,
                },
            )
        }

        fn start(&mut self) {
            let (engine, mut ctx) = self.split();
            engine.start(&mut ctx);
        }

        fn toggle(&mut self) -> StanceState {
            let (engine, mut ctx) = self.split();
            engine.toggle(&mut ctx)
        }

        fn tick(&mut self, dt: f32) {
            self.graph.advance_all(dt);
            let (engine, mut ctx) = self.split();
            engine.rebind_if_stale(&mut ctx, dt);
            engine.track_selection(ctx.slot);
            engine.enforce_lock_tick(ctx.graph);
        }

        fn controller(&self) -> &CorruptionController {
            self.graph
                .downcast::<CorruptionController>(self.target.expect("target"))
                .expect("controller")
        }
    }

    #[test]
    fn initial_stance_prefers_flag_over_value() {
        let mut rig = Rig::new(
            NetRole::Authority,
            Some(Box::new(CorruptionController::new(10.0).corrupted())),
            true,
        );
        rig.start();
        assert_eq!(rig.engine.stance(), StanceState::Corrupted);
        assert_eq!(rig.engine.locked_value(), Some(100.0));
    }

    #[test]
    fn locked_value_is_unset_until_first_bind() {
        let mut rig = Rig::new(NetRole::Authority, None, true);
        rig.start();
        assert_eq!(rig.engine.locked_value(), None);
        assert_eq!(rig.engine.stance(), StanceState::Controlled);
        assert!(rig.engine.diagnostics_dumped());
    }

    #[test]
    fn toggle_twice_restores_original_stance() {
        let mut rig = Rig::new(
            NetRole::Authority,
            Some(Box::new(CorruptionController::new(30.0))),
            true,
        );
        rig.start();
        let before = rig.engine.stance();
        assert_eq!(rig.toggle(), before.complement());
        assert_eq!(rig.toggle(), before);
        assert_eq!(rig.controller().corruption(), 0.0);
        assert_eq!(rig.controller().calls("EnterCorruption"), 1);
        assert_eq!(rig.controller().calls("ExitCorruption"), 1);
    }

    #[test]
    fn observer_toggle_changes_nothing() {
        let mut rig = Rig::new(
            NetRole::Observer,
            Some(Box::new(CorruptionController::new(30.0))),
            true,
        );
        rig.start();
        assert_eq!(rig.toggle(), StanceState::Controlled);
        assert_eq!(rig.controller().corruption(), 30.0);
        assert!(!rig.engine.enforce_lock_tick(&mut rig.graph));
    }

    #[test]
    fn lock_holds_against_drift_and_auto_transform() {
        let mut rig = Rig::new(
            NetRole::Authority,
            Some(Box::new(CorruptionController::new(90.0).with_rates(50.0, -50.0))),
            true,
        );
        rig.start();
        rig.toggle();
        assert_eq!(rig.engine.stance(), StanceState::Corrupted);
        for _ in 0..120 {
            rig.tick(1.0 / 60.0);
        }
        assert_eq!(rig.controller().corruption(), 100.0);
        assert!(rig.controller().is_corrupted());
        assert_eq!(rig.controller().automatic_transforms(), 0);
        assert!(!rig.controller().is_active());
    }

    #[test]
    fn no_lock_without_selection() {
        let mut rig = Rig::new(
            NetRole::Authority,
            Some(Box::new(CorruptionController::new(20.0).with_rates(10.0, 0.0))),
            false,
        );
        rig.start();
        rig.tick(1.0);
        assert!(!rig.engine.user_chose_stance());
        assert!(!rig.engine.override_registered());
        assert!(rig.controller().corruption() > 20.0);
    }

    #[test]
    fn override_is_reasserted_after_slot_rebuild_and_released_on_teardown() {
        let mut rig = Rig::new(
            NetRole::Observer,
            Some(Box::new(CorruptionController::new(20.0))),
            true,
        );
        rig.start();
        rig.engine.track_selection(&mut rig.slot);
        assert!(rig.engine.override_registered());

        rig.slot.rebuild();
        rig.engine.track_selection(&mut rig.slot);
        assert!(rig.slot.has_override(rig.slot.equipped(), OverridePriority::Contextual));

        rig.engine.release(&mut rig.slot);
        assert!(!rig.engine.override_registered());
        assert!(!rig.engine.is_bound());
    }

    #[test]
    fn failing_hooks_do_not_block_remaining_effects() {
        let record = RecordComponent::new("Shape")
            .with_scalar("corruption", 0.0)
            .with_flag("isCorrupted", false)
            .with_faulting_method("SetCorruptionActive", 1)
            .with_faulting_method("EnterCorruption", 0)
            .with_method("RequestTransformation", 1);
        let mut rig = Rig::new(NetRole::Authority, Some(Box::new(record)), true);
        rig.start();
        assert_eq!(rig.toggle(), StanceState::Corrupted);

        let record = rig
            .graph
            .downcast::<RecordComponent>(rig.target.expect("target"))
            .expect("record");
        assert_eq!(record.scalar("corruption"), Some(1.0));
        assert_eq!(record.flag("isCorrupted"), Some(true));
        assert_eq!(record.calls("EnterCorruption"), 1);
        assert_eq!(record.call_args("RequestTransformation"), &[Some(true)]);
    }

    #[test]
    fn rebind_is_throttled() {
        let mut rig = Rig::new(NetRole::Authority, None, true);
        rig.start();
        let body = rig.roots[0];
        rig.graph.attach(body, Box::new(CorruptionController::new(20.0)));

        rig.tick(0.05);
        assert!(rig.engine.is_bound(), "first tick after start checks immediately");

        let mut rig = Rig::new(NetRole::Authority, None, true);
        rig.start();
        rig.tick(0.05);
        let body = rig.roots[0];
        rig.graph.attach(body, Box::new(CorruptionController::new(20.0)));
        rig.tick(0.04);
        assert!(!rig.engine.is_bound());
        rig.tick(0.07);
        assert!(rig.engine.is_bound());
    }
}
