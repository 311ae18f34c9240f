//! In-process API facade over a loopback stance session, plus the HTTP
//! inspection server built on it.

mod server;

use contracts::{
    ApiError, ConnectionId, EntityId, EntityStatus, ErrorCode, SessionStatus, StanceConfig,
};
use stance_core::{MemoryDiagnosticSink, ParticipantError, Session, SessionError};
use tracing::info;

pub use server::{serve, ServerError};
pub use stance_core::{BodyBlueprint, DeliveryPolicy, ToggleDispatch};

#[derive(Debug)]
pub struct SessionApi {
    session: Session,
    dumps: Option<MemoryDiagnosticSink>,
}

impl SessionApi {
    /// Dumps go to the configured diagnostics file.
    pub fn from_config(config: StanceConfig, policy: DeliveryPolicy) -> Self {
        Self {
            session: Session::new(config, policy),
            dumps: None,
        }
    }

    /// Dumps are kept in memory and exposed through [`Self::recorded_dumps`].
    pub fn in_memory(config: StanceConfig, policy: DeliveryPolicy) -> Self {
        let (session, sink) = Session::in_memory(config, policy);
        Self {
            session,
            dumps: Some(sink),
        }
    }

    pub fn config(&self) -> &StanceConfig {
        self.session.config()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        self.session.transport().policy()
    }

    pub fn set_delivery_policy(&mut self, policy: DeliveryPolicy) {
        info!(?policy, "delivery policy changed");
        self.session.transport_mut().set_policy(policy);
    }

    pub fn add_observer(&mut self) -> ConnectionId {
        self.session.add_observer()
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.session.connections()
    }

    pub fn spawn_body(
        &mut self,
        blueprint: &BodyBlueprint,
        owner: ConnectionId,
        select_toggle: bool,
    ) -> Result<EntityId, ApiError> {
        self.session
            .spawn_body(blueprint, owner, select_toggle)
            .map_err(to_api_error)
    }

    pub fn despawn(&mut self, entity: EntityId) -> Result<(), ApiError> {
        self.session.despawn(entity).map_err(to_api_error)
    }

    /// Presses the toggle ability for `entity` on `connection`.
    pub fn toggle(
        &mut self,
        connection: ConnectionId,
        entity: EntityId,
    ) -> Result<Option<ToggleDispatch>, ApiError> {
        self.session
            .press_toggle(connection, entity)
            .map_err(to_api_error)
    }

    pub fn stun(
        &mut self,
        connection: ConnectionId,
        entity: EntityId,
        duration_secs: f32,
    ) -> Result<bool, ApiError> {
        if !(duration_secs.is_finite() && duration_secs > 0.0) {
            return Err(ApiError::new(
                ErrorCode::InvalidRequest,
                "stun duration must be positive",
                Some(format!("duration_secs={duration_secs}")),
            ));
        }
        self.session
            .stun(connection, entity, duration_secs)
            .map_err(to_api_error)
    }

    pub fn step(&mut self, ticks: u64) -> Result<SessionStatus, ApiError> {
        self.session.run(ticks).map_err(to_api_error)?;
        Ok(self.session.status())
    }

    pub fn entity_status(
        &self,
        connection: ConnectionId,
        entity: EntityId,
    ) -> Result<EntityStatus, ApiError> {
        self.session
            .entity_status(connection, entity)
            .map_err(to_api_error)
    }

    pub fn entities(&self, connection: ConnectionId) -> Result<Vec<EntityStatus>, ApiError> {
        let participant = self.session.participant(connection).map_err(to_api_error)?;
        Ok(participant
            .entity_ids()
            .into_iter()
            .filter_map(|id| participant.entity_status(id))
            .collect())
    }

    /// Rendered component inventory for one entity.
    pub fn dump(&self, connection: ConnectionId, entity: EntityId) -> Result<String, ApiError> {
        self.session
            .inventory(connection, entity)
            .map(|report| report.render())
            .map_err(to_api_error)
    }

    /// Dumps published by bind failures so far. Empty for file-backed
    /// sessions.
    pub fn recorded_dumps(&self) -> Vec<String> {
        self.dumps
            .as_ref()
            .map(|sink| sink.reports().iter().map(|report| report.render()).collect())
            .unwrap_or_default()
    }
}

fn to_api_error(err: SessionError) -> ApiError {
    let message = err.to_string();
    match err {
        SessionError::ParticipantNotFound(connection) => ApiError::new(
            ErrorCode::ParticipantNotFound,
            message,
            Some(format!("connection={connection}")),
        ),
        SessionError::Participant(ParticipantError::EntityNotFound(entity)) => ApiError::new(
            ErrorCode::EntityNotFound,
            message,
            Some(format!("entity={entity}")),
        ),
        SessionError::Participant(ParticipantError::BodyRejected(name)) => ApiError::new(
            ErrorCode::BodyRejected,
            message,
            Some(format!("object_name={name}")),
        ),
        SessionError::Participant(ParticipantError::NotOwner { entity, connection }) => {
            ApiError::new(
                ErrorCode::NotOwner,
                message,
                Some(format!("entity={entity} connection={connection}")),
            )
        }
        SessionError::Participant(ParticipantError::DuplicateEntity(entity)) => ApiError::new(
            ErrorCode::InvalidRequest,
            message,
            Some(format!("entity={entity}")),
        ),
        SessionError::Transport(_) => ApiError::new(ErrorCode::InternalError, message, None),
    }
}
