//! In-process session: one authority, any number of observers and a loopback
//! transport between them.

use std::collections::BTreeMap;

use contracts::{
    ConnectionId, EntityId, EntityStatus, Envelope, NetMessage, NetRole, Recipient, SessionStatus,
    StanceConfig, SCHEMA_VERSION_V1,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ability::{
    install_stance_toggle, AbilityDescriptor, AbilityHandle, AbilityRegistry, ContentCatalog,
};
use crate::body::BodyBlueprint;
use crate::bridge::ToggleDispatch;
use crate::diagnostics::{
    DiagnosticReport, DiagnosticSink, FileDiagnosticSink, MemoryDiagnosticSink,
};
use crate::participant::{Participant, ParticipantError};

/// Upper bound on transport drain rounds within one step.
const MAX_PUMP_ROUNDS: usize = 4;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("participant {0} not found")]
    ParticipantNotFound(ConnectionId),
    #[error(transparent)]
    Participant(#[from] ParticipantError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Knobs for reproducing delivery races on the loopback link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Deliver every toggle request twice.
    pub duplicate_requests: bool,
    /// Deliver each drained batch in reverse send order.
    pub reverse_order: bool,
}

/// Carries JSON-encoded envelopes between participants.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    policy: DeliveryPolicy,
    queue: Vec<(ConnectionId, String)>,
    sent: u64,
    delivered: u64,
}

impl LoopbackTransport {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: DeliveryPolicy) {
        self.policy = policy;
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let destination = match envelope.to {
            Recipient::Authority => ConnectionId::AUTHORITY,
            Recipient::Connection(connection) => connection,
        };
        let raw = envelope.encode().map_err(TransportError::Encode)?;
        let copies = match (&envelope.message, self.policy.duplicate_requests) {
            (NetMessage::ToggleRequest { .. }, true) => 2,
            _ => 1,
        };
        for _ in 0..copies {
            self.queue.push((destination, raw.clone()));
        }
        self.sent += 1;
        Ok(())
    }

    pub fn drain(&mut self) -> Result<Vec<(ConnectionId, Envelope)>, TransportError> {
        let mut batch = std::mem::take(&mut self.queue);
        if self.policy.reverse_order {
            batch.reverse();
        }
        self.delivered += batch.len() as u64;
        batch
            .into_iter()
            .map(|(destination, raw)| {
                Envelope::decode(&raw)
                    .map(|envelope| (destination, envelope))
                    .map_err(TransportError::Decode)
            })
            .collect()
    }
}

type SinkFactory = Box<dyn Fn(ConnectionId) -> Box<dyn DiagnosticSink> + Send>;

/// What the session needs to replicate a live body onto a late joiner.
#[derive(Debug, Clone)]
struct LiveBody {
    blueprint: BodyBlueprint,
    owner: ConnectionId,
    loadout: AbilityHandle,
}

pub struct Session {
    config: StanceConfig,
    catalog: ContentCatalog,
    toggle_ability: AbilityHandle,
    default_ability: AbilityHandle,
    authority: Participant,
    observers: BTreeMap<ConnectionId, Participant>,
    bodies: BTreeMap<EntityId, LiveBody>,
    transport: LoopbackTransport,
    sinks: SinkFactory,
    next_entity: u64,
    next_connection: u32,
    tick: u64,
    elapsed: f32,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tick", &self.tick)
            .field("authority", &self.authority)
            .field("observers", &self.observers.len())
            .field("transport", &self.transport)
            .finish()
    }
}

impl Session {
    /// Session whose participants write dumps to the configured file.
    pub fn new(config: StanceConfig, policy: DeliveryPolicy) -> Self {
        let path = config.diagnostics_path();
        Self::with_sinks(
            config,
            policy,
            Box::new(move |_| {
                Box::new(FileDiagnosticSink::new(path.clone())) as Box<dyn DiagnosticSink>
            }),
        )
    }

    /// Session whose participants share one in-memory dump buffer.
    pub fn in_memory(config: StanceConfig, policy: DeliveryPolicy) -> (Self, MemoryDiagnosticSink) {
        let sink = MemoryDiagnosticSink::new();
        let shared = sink.clone();
        let session = Self::with_sinks(
            config,
            policy,
            Box::new(move |_| Box::new(shared.clone()) as Box<dyn DiagnosticSink>),
        );
        (session, sink)
    }

    pub fn with_sinks(config: StanceConfig, policy: DeliveryPolicy, sinks: SinkFactory) -> Self {
        let mut catalog = ContentCatalog::new();
        let default_ability = catalog.register_family(
            &config.ability_family,
            AbilityDescriptor {
                name: "VOIDSURVIVOR_SPECIAL".to_string(),
                name_token: "VOIDSURVIVOR_SPECIAL_NAME".to_string(),
                description_token: "VOIDSURVIVOR_SPECIAL_DESC".to_string(),
                activation_activity: "CrushCorruption".to_string(),
                ..AbilityDescriptor::stance_toggle(&config)
            },
        );
        let toggle_ability = install_stance_toggle(&mut catalog, &config);
        let family = catalog.family_variants(&config.ability_family);

        let authority = Participant::new(
            NetRole::Authority,
            ConnectionId::AUTHORITY,
            config.clone(),
            toggle_ability,
            family,
            sinks(ConnectionId::AUTHORITY),
        );
        info!(schema = SCHEMA_VERSION_V1, ?policy, "session started");

        Self {
            config,
            catalog,
            toggle_ability,
            default_ability,
            authority,
            observers: BTreeMap::new(),
            bodies: BTreeMap::new(),
            transport: LoopbackTransport::new(policy),
            sinks,
            next_entity: 1,
            next_connection: 1,
            tick: 0,
            elapsed: 0.0,
        }
    }

    pub fn config(&self) -> &StanceConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ContentCatalog {
        &self.catalog
    }

    pub fn toggle_ability(&self) -> AbilityHandle {
        self.toggle_ability
    }

    pub fn default_ability(&self) -> AbilityHandle {
        self.default_ability
    }

    pub fn transport(&self) -> &LoopbackTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut LoopbackTransport {
        &mut self.transport
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Joins a new observer and replicates every live body onto it.
    pub fn add_observer(&mut self) -> ConnectionId {
        let connection = ConnectionId(self.next_connection);
        self.next_connection += 1;
        let family = self.catalog.family_variants(&self.config.ability_family);
        let mut observer = Participant::new(
            NetRole::Observer,
            connection,
            self.config.clone(),
            self.toggle_ability,
            family,
            (self.sinks)(connection),
        );
        for (id, body) in &self.bodies {
            if let Err(err) = observer.spawn(*id, body.owner, &body.blueprint, body.loadout) {
                warn!(%connection, entity = %id, error = %err, "replica spawn failed");
            }
        }
        info!(%connection, replicas = self.bodies.len(), "observer joined");
        self.observers.insert(connection, observer);
        connection
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        std::iter::once(ConnectionId::AUTHORITY)
            .chain(self.observers.keys().copied())
            .collect()
    }

    pub fn participant(&self, connection: ConnectionId) -> Result<&Participant, SessionError> {
        if connection == ConnectionId::AUTHORITY {
            return Ok(&self.authority);
        }
        self.observers
            .get(&connection)
            .ok_or(SessionError::ParticipantNotFound(connection))
    }

    pub fn participant_mut(
        &mut self,
        connection: ConnectionId,
    ) -> Result<&mut Participant, SessionError> {
        if connection == ConnectionId::AUTHORITY {
            return Ok(&mut self.authority);
        }
        self.observers
            .get_mut(&connection)
            .ok_or(SessionError::ParticipantNotFound(connection))
    }

    /// Spawns a replicated body on every participant. `select_toggle` picks
    /// the stance toggle in the owner's loadout.
    pub fn spawn_body(
        &mut self,
        blueprint: &BodyBlueprint,
        owner: ConnectionId,
        select_toggle: bool,
    ) -> Result<EntityId, SessionError> {
        self.participant(owner)?;
        let id = EntityId(self.next_entity);
        let loadout = if select_toggle {
            self.toggle_ability
        } else {
            self.default_ability
        };

        self.authority.spawn(id, owner, blueprint, loadout)?;
        for observer in self.observers.values_mut() {
            observer.spawn(id, owner, blueprint, loadout)?;
        }
        self.bodies.insert(
            id,
            LiveBody {
                blueprint: blueprint.clone(),
                owner,
                loadout,
            },
        );
        self.next_entity += 1;
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> Result<(), SessionError> {
        self.authority.despawn(id)?;
        self.bodies.remove(&id);
        for observer in self.observers.values_mut() {
            if let Err(err) = observer.despawn(id) {
                debug!(connection = %observer.connection(), error = %err, "replica already gone");
            }
        }
        Ok(())
    }

    pub fn press_toggle(
        &mut self,
        connection: ConnectionId,
        id: EntityId,
    ) -> Result<Option<ToggleDispatch>, SessionError> {
        let dispatch = self.participant_mut(connection)?.press_toggle(id)?;
        Ok(dispatch)
    }

    pub fn stun(
        &mut self,
        connection: ConnectionId,
        id: EntityId,
        duration: f32,
    ) -> Result<bool, SessionError> {
        Ok(self.participant_mut(connection)?.stun(id, duration)?)
    }

    /// One fixed tick and one frame on every participant, then delivery of
    /// everything sent so far.
    pub fn step(&mut self) -> Result<usize, SessionError> {
        let dt = self.config.fixed_timestep_secs;
        self.tick += 1;
        self.elapsed += dt;

        self.authority.fixed_tick(dt);
        self.authority.frame();
        for observer in self.observers.values_mut() {
            observer.fixed_tick(dt);
            observer.frame();
        }
        self.pump()
    }

    pub fn run(&mut self, ticks: u64) -> Result<usize, SessionError> {
        let mut delivered = 0;
        for _ in 0..ticks {
            delivered += self.step()?;
        }
        Ok(delivered)
    }

    /// Moves outbound envelopes onto the transport and delivers them until
    /// the link is quiet. Returns how many envelopes were delivered.
    pub fn pump(&mut self) -> Result<usize, SessionError> {
        let mut delivered = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            self.collect_outbound()?;
            if self.transport.in_flight() == 0 {
                break;
            }
            for (destination, envelope) in self.transport.drain()? {
                delivered += 1;
                let participant = match self.participant_mut(destination) {
                    Ok(participant) => participant,
                    Err(err) => {
                        warn!(
                            %destination,
                            error = %err,
                            "envelope for departed participant dropped"
                        );
                        continue;
                    }
                };
                if let Err(err) = participant.deliver(envelope) {
                    warn!(%destination, error = %err, "envelope rejected");
                }
            }
        }
        Ok(delivered)
    }

    fn collect_outbound(&mut self) -> Result<(), SessionError> {
        let mut outbound = self.authority.drain_outbox();
        for observer in self.observers.values_mut() {
            outbound.extend(observer.drain_outbox());
        }
        for envelope in &outbound {
            self.transport.send(envelope)?;
        }
        Ok(())
    }

    pub fn entity_status(
        &self,
        connection: ConnectionId,
        id: EntityId,
    ) -> Result<EntityStatus, SessionError> {
        self.participant(connection)?
            .entity_status(id)
            .ok_or(SessionError::Participant(ParticipantError::EntityNotFound(id)))
    }

    pub fn inventory(
        &self,
        connection: ConnectionId,
        id: EntityId,
    ) -> Result<DiagnosticReport, SessionError> {
        Ok(self.participant(connection)?.inventory(id)?)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tick: self.tick,
            elapsed_secs: self.elapsed,
            authority_entities: self.authority.entity_ids().len(),
            observers: self.observers.keys().copied().collect(),
            in_flight_messages: self.transport.in_flight(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::StanceState;

    #[test]
    fn transport_duplicates_requests_only() {
        let mut transport = LoopbackTransport::new(DeliveryPolicy {
            duplicate_requests: true,
            reverse_order: false,
        });
        let request = Envelope::new(
            ConnectionId(1),
            Recipient::Authority,
            NetMessage::ToggleRequest {
                entity_id: EntityId(1),
            },
        );
        let result = Envelope::new(
            ConnectionId::AUTHORITY,
            Recipient::Connection(ConnectionId(1)),
            NetMessage::ToggleResult {
                entity_id: EntityId(1),
                resulting_stance_is_corrupted: true,
            },
        );
        transport.send(&request).expect("send");
        transport.send(&result).expect("send");
        assert_eq!(transport.in_flight(), 3);

        let batch = transport.drain().expect("drain");
        assert_eq!(batch[0].0, ConnectionId::AUTHORITY);
        assert_eq!(batch[1].1, request);
        assert_eq!(batch[2], (ConnectionId(1), result));
    }

    #[test]
    fn observer_toggle_round_trips_through_authority() {
        let (mut session, _) =
            Session::in_memory(StanceConfig::default(), DeliveryPolicy::default());
        let observer = session.add_observer();
        let id = session
            .spawn_body(&BodyBlueprint::void_survivor(), observer, true)
            .expect("spawn");

        assert_eq!(
            session.press_toggle(observer, id).expect("press"),
            Some(ToggleDispatch::Sent)
        );
        assert_eq!(session.step().expect("step"), 2);

        let authority = session.entity_status(ConnectionId::AUTHORITY, id).expect("status");
        assert_eq!(authority.stance, StanceState::Corrupted);
        let replica = session.entity_status(observer, id).expect("status");
        assert_eq!(replica.last_result_is_corrupted, Some(true));
        assert_eq!(session.status().in_flight_messages, 0);
    }

    #[test]
    fn unknown_participant_is_reported() {
        let (mut session, _) =
            Session::in_memory(StanceConfig::default(), DeliveryPolicy::default());
        let err = session.press_toggle(ConnectionId(9), EntityId(1)).unwrap_err();
        assert!(matches!(err, SessionError::ParticipantNotFound(ConnectionId(9))));
    }

    #[test]
    fn transport_reverses_drained_batch() {
        let mut transport = LoopbackTransport::new(DeliveryPolicy {
            duplicate_requests: false,
            reverse_order: true,
        });
        let request = |from: u32, entity: u64| {
            Envelope::new(
                ConnectionId(from),
                Recipient::Authority,
                NetMessage::ToggleRequest {
                    entity_id: EntityId(entity),
                },
            )
        };
        transport.send(&request(1, 1)).expect("send");
        transport.send(&request(2, 2)).expect("send");

        let batch = transport.drain().expect("drain");
        assert_eq!(batch[0].1, request(2, 2));
        assert_eq!(batch[1].1, request(1, 1));
    }

    #[test]
    fn reversed_requests_still_answer_each_requester() {
        let policy = DeliveryPolicy {
            duplicate_requests: false,
            reverse_order: true,
        };
        let (mut session, _) = Session::in_memory(StanceConfig::default(), policy);
        let first = session.add_observer();
        let second = session.add_observer();
        let survivor = BodyBlueprint::void_survivor();
        let first_body = session.spawn_body(&survivor, first, true).expect("spawn");
        let second_body = session.spawn_body(&survivor, second, true).expect("spawn");

        session.press_toggle(first, first_body).expect("press");
        session.press_toggle(second, second_body).expect("press");
        assert_eq!(session.step().expect("step"), 4);

        for body in [first_body, second_body] {
            let authority = session
                .entity_status(ConnectionId::AUTHORITY, body)
                .expect("status");
            assert_eq!(authority.stance, StanceState::Corrupted);
        }
        let result = |connection, body| {
            session
                .entity_status(connection, body)
                .expect("status")
                .last_result_is_corrupted
        };
        assert_eq!(result(first, first_body), Some(true));
        assert_eq!(result(first, second_body), None);
        assert_eq!(result(second, second_body), Some(true));
        assert_eq!(result(second, first_body), None);
    }

    #[test]
    fn late_observer_receives_replicas_of_live_bodies() {
        let (mut session, _) =
            Session::in_memory(StanceConfig::default(), DeliveryPolicy::default());
        let id = session
            .spawn_body(&BodyBlueprint::void_survivor(), ConnectionId::AUTHORITY, true)
            .expect("spawn");
        let gone = session
            .spawn_body(&BodyBlueprint::void_survivor(), ConnectionId::AUTHORITY, true)
            .expect("spawn");
        session.despawn(gone).expect("despawn");

        let late = session.add_observer();
        session.step().expect("step");

        let replica = session.entity_status(late, id).expect("replica");
        assert_eq!(replica.role, NetRole::Observer);
        assert!(replica.bound);
        assert!(replica.override_registered);
        assert!(session.entity_status(late, gone).is_err());
        assert!(matches!(
            session.press_toggle(late, id),
            Err(SessionError::Participant(ParticipantError::NotOwner { .. }))
        ));
    }
}
