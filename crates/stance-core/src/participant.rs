//! One networked participant (the authority or an observer) and the entity
//! records it hosts.

use std::collections::BTreeMap;
use std::mem;

use contracts::{
    ConnectionId, EntityId, EntityStatus, Envelope, NetMessage, NetRole, StanceConfig, StanceState,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ability::{AbilityDescriptor, AbilityHandle, AbilitySlot};
use crate::activity::{ActivityMachine, InterruptPriority};
use crate::binder::CapabilityBinder;
use crate::body::BodyBlueprint;
use crate::bridge::{ReplicationBridge, ToggleDispatch};
use crate::diagnostics::{DiagnosticReport, DiagnosticSink};
use crate::engine::{EngineContext, StanceLockEngine};
use crate::graph::{ComponentHandle, NodeId, ObjectGraph};

#[derive(Debug, Error, PartialEq)]
pub enum ParticipantError {
    #[error("body {0} is not stance capable")]
    BodyRejected(String),
    #[error("{0} is already spawned")]
    DuplicateEntity(EntityId),
    #[error("{0} not found")]
    EntityNotFound(EntityId),
    #[error("{connection} does not own {entity}")]
    NotOwner {
        entity: EntityId,
        connection: ConnectionId,
    },
}

/// Long-lived per-entity record. The engine inside it survives any number of
/// controller rebuilds in `graph`.
#[derive(Debug)]
pub struct EntityRecord {
    id: EntityId,
    object_name: String,
    owner: ConnectionId,
    graph: ObjectGraph,
    roots: Vec<NodeId>,
    controller: Option<ComponentHandle>,
    slot: AbilitySlot,
    engine: StanceLockEngine,
    bridge: ReplicationBridge,
    activity: ActivityMachine,
}

impl EntityRecord {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    /// Direct access for the host side: component rebuilds, drift, removal.
    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        &mut self.graph
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Controller attached when the body was built.
    pub fn spawned_controller(&self) -> Option<ComponentHandle> {
        self.controller
    }

    pub fn slot(&self) -> &AbilitySlot {
        &self.slot
    }

    pub fn slot_mut(&mut self) -> &mut AbilitySlot {
        &mut self.slot
    }

    pub fn engine(&self) -> &StanceLockEngine {
        &self.engine
    }

    pub fn bridge(&self) -> &ReplicationBridge {
        &self.bridge
    }

    pub fn activity(&self) -> &ActivityMachine {
        &self.activity
    }

    /// Current reading of the bound value member, if bound.
    pub fn external_value(&self) -> Option<f32> {
        self.engine.binding()?.read_value(&self.graph)
    }

    pub fn status(&self, connection: ConnectionId) -> EntityStatus {
        let binding = self.engine.binding();
        EntityStatus {
            entity_id: self.id,
            connection,
            role: self.engine.role(),
            bound: binding.is_some(),
            bound_type: binding.map(|b| b.target_type.clone()),
            bound_path: binding.map(|b| b.target_path.clone()),
            tier: binding.map(|b| b.tier),
            domain: binding.map(|b| b.domain),
            driver_fields: binding.map(|b| b.driver_names()).unwrap_or_default(),
            stance: self.engine.stance(),
            locked_value: self.engine.locked_value(),
            external_value: self.external_value(),
            user_chose_stance: self.engine.user_chose_stance(),
            override_registered: self.engine.override_registered(),
            activity: self.activity.current().name().to_string(),
            diagnostics_dumped: self.engine.diagnostics_dumped(),
            last_result_is_corrupted: self.bridge.last_result().map(StanceState::is_corrupted),
        }
    }
}

pub struct Participant {
    role: NetRole,
    connection: ConnectionId,
    config: StanceConfig,
    binder: CapabilityBinder,
    toggle_ability: AbilityHandle,
    toggle_priority: InterruptPriority,
    family: Vec<AbilityHandle>,
    entities: BTreeMap<EntityId, EntityRecord>,
    diagnostics: Box<dyn DiagnosticSink>,
    outbox: Vec<Envelope>,
    elapsed: f32,
    ticks: u64,
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("role", &self.role)
            .field("connection", &self.connection)
            .field("entities", &self.entities.len())
            .field("outbox", &self.outbox.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl Participant {
    pub fn new(
        role: NetRole,
        connection: ConnectionId,
        config: StanceConfig,
        toggle_ability: AbilityHandle,
        family: Vec<AbilityHandle>,
        diagnostics: Box<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            role,
            connection,
            binder: CapabilityBinder::new(&config),
            toggle_priority: AbilityDescriptor::stance_toggle(&config).interrupt_priority,
            config,
            toggle_ability,
            family,
            entities: BTreeMap::new(),
            diagnostics,
            outbox: Vec::new(),
            elapsed: 0.0,
            ticks: 0,
        }
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut EntityRecord> {
        self.entities.get_mut(&id)
    }

    pub fn entity_status(&self, id: EntityId) -> Option<EntityStatus> {
        self.entities
            .get(&id)
            .map(|record| record.status(self.connection))
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbox.len()
    }

    /// Builds the body, attaches the stance engine and performs the first
    /// bind. Bodies that are not the stance-capable survivor are refused.
    pub fn spawn(
        &mut self,
        id: EntityId,
        owner: ConnectionId,
        blueprint: &BodyBlueprint,
        loadout: AbilityHandle,
    ) -> Result<(), ParticipantError> {
        if !blueprint.is_stance_capable(&self.config) {
            return Err(ParticipantError::BodyRejected(blueprint.object_name.clone()));
        }
        if self.entities.contains_key(&id) {
            return Err(ParticipantError::DuplicateEntity(id));
        }

        let body = blueprint.build();
        let mut record = EntityRecord {
            id,
            object_name: body.object_name,
            owner,
            graph: body.graph,
            roots: body.roots,
            controller: body.controller,
            slot: AbilitySlot::new(self.family.clone(), loadout),
            engine: StanceLockEngine::new(id, self.role, self.toggle_ability, &self.config),
            bridge: ReplicationBridge::new(id, self.role, self.connection, owner),
            activity: ActivityMachine::new(self.config.toggle_duration_secs, self.config.feedback),
        };

        let EntityRecord {
            graph,
            roots,
            slot,
            engine,
            ..
        } = &mut record;
        engine.start(&mut EngineContext {
            graph,
            roots,
            slot,
            binder: &self.binder,
            diagnostics: self.diagnostics.as_mut(),
        });

        info!(
            entity = %id,
            connection = %self.connection,
            body = %record.object_name,
            bound = record.engine.is_bound(),
            "stance engine attached"
        );
        self.entities.insert(id, record);
        Ok(())
    }

    pub fn despawn(&mut self, id: EntityId) -> Result<(), ParticipantError> {
        let mut record = self
            .entities
            .remove(&id)
            .ok_or(ParticipantError::EntityNotFound(id))?;
        record.engine.release(&mut record.slot);
        debug!(entity = %id, connection = %self.connection, "stance engine released");
        Ok(())
    }

    /// Ability activation from local input. Only the owning connection may
    /// press. `None` when the toggle is not the equipped ability or the
    /// current activity refused the interrupt.
    pub fn press_toggle(
        &mut self,
        id: EntityId,
    ) -> Result<Option<ToggleDispatch>, ParticipantError> {
        let Self {
            binder,
            diagnostics,
            entities,
            outbox,
            toggle_priority,
            connection,
            ..
        } = self;
        let record = entities
            .get_mut(&id)
            .ok_or(ParticipantError::EntityNotFound(id))?;
        if record.owner != *connection {
            return Err(ParticipantError::NotOwner {
                entity: id,
                connection: *connection,
            });
        }
        let EntityRecord {
            graph,
            roots,
            slot,
            engine,
            bridge,
            activity,
            ..
        } = record;
        let mut ctx = EngineContext {
            graph,
            roots,
            slot,
            binder,
            diagnostics: diagnostics.as_mut(),
        };
        Ok(activity.activate_toggle(*toggle_priority, engine, bridge, &mut ctx, outbox))
    }

    pub fn stun(&mut self, id: EntityId, duration: f32) -> Result<bool, ParticipantError> {
        let record = self
            .entities
            .get_mut(&id)
            .ok_or(ParticipantError::EntityNotFound(id))?;
        Ok(record.activity.stun(duration))
    }

    /// One fixed-rate tick over every hosted entity.
    pub fn fixed_tick(&mut self, dt: f32) {
        self.ticks += 1;
        self.elapsed += dt;

        let Self {
            binder,
            diagnostics,
            entities,
            ..
        } = self;
        for record in entities.values_mut() {
            let EntityRecord {
                graph,
                roots,
                slot,
                engine,
                activity,
                ..
            } = record;
            graph.advance_all(dt);

            let mut ctx = EngineContext {
                graph,
                roots,
                slot,
                binder,
                diagnostics: diagnostics.as_mut(),
            };
            engine.rebind_if_stale(&mut ctx, dt);
            engine.track_selection(ctx.slot);
            engine.enforce_lock_tick(ctx.graph);
            activity.fixed_update(dt);
        }
    }

    /// Variable-rate frame: re-asserts the lock between fixed ticks.
    pub fn frame(&mut self) {
        for record in self.entities.values_mut() {
            record.engine.enforce_lock_tick(&mut record.graph);
        }
    }

    pub fn deliver(&mut self, envelope: Envelope) -> Result<(), ParticipantError> {
        let id = envelope.message.entity_id();
        let Self {
            binder,
            diagnostics,
            entities,
            outbox,
            connection,
            ..
        } = self;
        let Some(record) = entities.get_mut(&id) else {
            warn!(entity = %id, connection = %connection, "message for unknown entity dropped");
            return Err(ParticipantError::EntityNotFound(id));
        };

        match envelope.message {
            NetMessage::ToggleRequest { .. } => {
                let EntityRecord {
                    graph,
                    roots,
                    slot,
                    engine,
                    bridge,
                    ..
                } = record;
                let mut ctx = EngineContext {
                    graph,
                    roots,
                    slot,
                    binder,
                    diagnostics: diagnostics.as_mut(),
                };
                bridge.handle_request(envelope.from, engine, &mut ctx, outbox);
            }
            NetMessage::ToggleResult {
                resulting_stance_is_corrupted,
                ..
            } => record.bridge.handle_result(resulting_stance_is_corrupted),
        }
        Ok(())
    }

    pub fn drain_outbox(&mut self) -> Vec<Envelope> {
        mem::take(&mut self.outbox)
    }

    /// Component inventory for an entity, independent of any bind failure.
    pub fn inventory(&self, id: EntityId) -> Result<DiagnosticReport, ParticipantError> {
        let record = self
            .entities
            .get(&id)
            .ok_or(ParticipantError::EntityNotFound(id))?;
        Ok(self.binder.inventory(id, &record.graph, &record.roots))
    }
}
