//! Carries toggle intent from observers to the authority.
//!
//! Requests carry no token and the authority keeps no record of what it has
//! applied, so every delivered request flips the stance once. A request that
//! the transport delivers twice flips the stance twice. Only the owning
//! connection may request a toggle.

use contracts::{ConnectionId, EntityId, Envelope, NetMessage, NetRole, Recipient, StanceState};
use tracing::{debug, info, warn};

use crate::engine::{EngineContext, StanceLockEngine};

pub trait Outbox {
    fn send(&mut self, envelope: Envelope);
}

impl Outbox for Vec<Envelope> {
    fn send(&mut self, envelope: Envelope) {
        self.push(envelope);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleDispatch {
    /// The toggle ran on this participant.
    Applied(StanceState),
    /// A request is on its way to the authority.
    Sent,
}

#[derive(Debug, Clone)]
pub struct ReplicationBridge {
    entity: EntityId,
    role: NetRole,
    connection: ConnectionId,
    owner: ConnectionId,
    requests_sent: u64,
    requests_applied: u64,
    last_result: Option<StanceState>,
}

impl ReplicationBridge {
    pub fn new(
        entity: EntityId,
        role: NetRole,
        connection: ConnectionId,
        owner: ConnectionId,
    ) -> Self {
        Self {
            entity,
            role,
            connection,
            owner,
            requests_sent: 0,
            requests_applied: 0,
            last_result: None,
        }
    }

    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    pub fn requests_applied(&self) -> u64 {
        self.requests_applied
    }

    /// Most recent advisory result received from the authority.
    pub fn last_result(&self) -> Option<StanceState> {
        self.last_result
    }

    pub fn request_toggle(
        &mut self,
        engine: &mut StanceLockEngine,
        ctx: &mut EngineContext<'_>,
        outbox: &mut dyn Outbox,
    ) -> ToggleDispatch {
        if self.role.is_authority() {
            return ToggleDispatch::Applied(engine.toggle(ctx));
        }
        outbox.send(Envelope::new(
            self.connection,
            Recipient::Authority,
            NetMessage::ToggleRequest {
                entity_id: self.entity,
            },
        ));
        self.requests_sent += 1;
        debug!(entity = %self.entity, connection = %self.connection, "toggle request sent");
        ToggleDispatch::Sent
    }

    /// Authority side of a request from `requester`. Requests from anyone
    /// but the owner are dropped. The result goes back to the requester only.
    pub fn handle_request(
        &mut self,
        requester: ConnectionId,
        engine: &mut StanceLockEngine,
        ctx: &mut EngineContext<'_>,
        outbox: &mut dyn Outbox,
    ) -> Option<StanceState> {
        if !self.role.is_authority() {
            warn!(entity = %self.entity, %requester, "toggle request delivered to non-authority");
            return None;
        }
        if requester != self.owner {
            warn!(
                entity = %self.entity,
                %requester,
                owner = %self.owner,
                "toggle request from non-owner dropped"
            );
            return None;
        }
        let stance = engine.toggle(ctx);
        self.requests_applied += 1;
        outbox.send(Envelope::new(
            self.connection,
            Recipient::Connection(requester),
            NetMessage::ToggleResult {
                entity_id: self.entity,
                resulting_stance_is_corrupted: stance.is_corrupted(),
            },
        ));
        info!(entity = %self.entity, %requester, %stance, "applied remote toggle");
        Some(stance)
    }

    pub fn handle_result(&mut self, resulting_stance_is_corrupted: bool) {
        let stance = StanceState::from_corrupted(resulting_stance_is_corrupted);
        self.last_result = Some(stance);
        info!(entity = %self.entity, %stance, "authority reported stance");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StanceConfig;

    use crate::ability::{install_stance_toggle, AbilitySlot, ContentCatalog};
    use crate::binder::CapabilityBinder;
    use crate::body::{BodyBlueprint, BodyInstance};
    use crate::diagnostics::MemoryDiagnosticSink;

    const OWNER: ConnectionId = ConnectionId(2);

    struct Rig {
        body: BodyInstance,
        slot: AbilitySlot,
        binder: CapabilityBinder,
        sink: MemoryDiagnosticSink,
        engine: StanceLockEngine,
    }

    impl Rig {
        fn new(role: NetRole) -> Self {
            let config = StanceConfig::default();
            let mut catalog = ContentCatalog::new();
            let toggle = install_stance_toggle(&mut catalog, &config);
            Self {
                body: BodyBlueprint::void_survivor().build(),
                slot: AbilitySlot::new(vec![toggle], toggle),
                binder: CapabilityBinder::new(&config),
                sink: MemoryDiagnosticSink::new(),
                engine: StanceLockEngine::new(EntityId(5), role, toggle, &config),
            }
        }

        fn handle(
            &mut self,
            bridge: &mut ReplicationBridge,
            requester: ConnectionId,
            outbox: &mut Vec<Envelope>,
        ) -> Option<StanceState> {
            let mut ctx = EngineContext {
                graph: &mut self.body.graph,
                roots: &self.body.roots,
                slot: &mut self.slot,
                binder: &self.binder,
                diagnostics: &mut self.sink,
            };
            bridge.handle_request(requester, &mut self.engine, &mut ctx, outbox)
        }
    }

    #[test]
    fn result_is_addressed_to_requester_only() {
        let mut rig = Rig::new(NetRole::Authority);
        let mut bridge =
            ReplicationBridge::new(EntityId(5), NetRole::Authority, ConnectionId::AUTHORITY, OWNER);
        let mut outbox = Vec::new();

        assert_eq!(
            rig.handle(&mut bridge, OWNER, &mut outbox),
            Some(StanceState::Corrupted)
        );
        assert_eq!(bridge.requests_applied(), 1);
        assert_eq!(
            outbox,
            vec![Envelope::new(
                ConnectionId::AUTHORITY,
                Recipient::Connection(OWNER),
                NetMessage::ToggleResult {
                    entity_id: EntityId(5),
                    resulting_stance_is_corrupted: true,
                },
            )]
        );
    }

    #[test]
    fn observer_ignores_delivered_request() {
        let mut rig = Rig::new(NetRole::Observer);
        let mut bridge = ReplicationBridge::new(EntityId(5), NetRole::Observer, OWNER, OWNER);
        let mut outbox = Vec::new();

        assert_eq!(rig.handle(&mut bridge, OWNER, &mut outbox), None);
        assert!(outbox.is_empty());
        assert_eq!(bridge.requests_applied(), 0);
        assert_eq!(rig.engine.stance(), StanceState::Controlled);
    }

    #[test]
    fn request_from_non_owner_is_dropped() {
        let mut rig = Rig::new(NetRole::Authority);
        let mut bridge =
            ReplicationBridge::new(EntityId(5), NetRole::Authority, ConnectionId::AUTHORITY, OWNER);
        let mut outbox = Vec::new();

        assert_eq!(rig.handle(&mut bridge, ConnectionId(3), &mut outbox), None);
        assert!(outbox.is_empty());
        assert_eq!(bridge.requests_applied(), 0);
        assert_eq!(rig.engine.stance(), StanceState::Controlled);
    }

    #[test]
    fn observer_request_goes_to_authority() {
        let mut rig = Rig::new(NetRole::Observer);
        let mut bridge = ReplicationBridge::new(EntityId(5), NetRole::Observer, OWNER, OWNER);
        let mut outbox = Vec::new();
        let mut ctx = EngineContext {
            graph: &mut rig.body.graph,
            roots: &rig.body.roots,
            slot: &mut rig.slot,
            binder: &rig.binder,
            diagnostics: &mut rig.sink,
        };

        assert_eq!(
            bridge.request_toggle(&mut rig.engine, &mut ctx, &mut outbox),
            ToggleDispatch::Sent
        );
        assert_eq!(bridge.requests_sent(), 1);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].from, OWNER);
        assert_eq!(outbox[0].to, Recipient::Authority);
    }
}
