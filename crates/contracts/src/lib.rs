//! v1 cross-boundary contracts for the stance engine, replication wire, and inspection API.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;

pub use config::{ConfigError, FeedbackProfile, StanceConfig};

pub const SCHEMA_VERSION_V1: &str = "1.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Network connection of a participant. The authority always owns
/// [`ConnectionId::AUTHORITY`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub const AUTHORITY: ConnectionId = ConnectionId(0);
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NetRole {
    Authority,
    Observer,
}

impl NetRole {
    pub fn is_authority(self) -> bool {
        matches!(self, Self::Authority)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StanceState {
    Controlled,
    Corrupted,
}

impl StanceState {
    pub fn complement(self) -> Self {
        match self {
            Self::Controlled => Self::Corrupted,
            Self::Corrupted => Self::Controlled,
        }
    }

    pub fn is_corrupted(self) -> bool {
        matches!(self, Self::Corrupted)
    }

    pub fn from_corrupted(corrupted: bool) -> Self {
        if corrupted {
            Self::Corrupted
        } else {
            Self::Controlled
        }
    }
}

impl fmt::Display for StanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Controlled => write!(f, "controlled"),
            Self::Corrupted => write!(f, "corrupted"),
        }
    }
}

/// Numeric convention of the external corruption scalar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    #[default]
    Fraction,
    Percent,
}

impl Domain {
    /// Values in `(1, 100]` are percentages; everything else, including
    /// non-finite reads, is treated as a fraction.
    pub fn infer(value: f32) -> Self {
        if value > 1.0 && value <= 100.0 {
            Self::Percent
        } else {
            Self::Fraction
        }
    }

    pub fn min(self) -> f32 {
        0.0
    }

    pub fn max(self) -> f32 {
        match self {
            Self::Fraction => 1.0,
            Self::Percent => 100.0,
        }
    }

    pub fn midpoint(self) -> f32 {
        self.max() / 2.0
    }

    pub fn clamp(self, value: f32) -> f32 {
        if value.is_nan() {
            return self.min();
        }
        value.clamp(self.min(), self.max())
    }

    pub fn boundary(self, stance: StanceState) -> f32 {
        match stance {
            StanceState::Controlled => self.min(),
            StanceState::Corrupted => self.max(),
        }
    }

    /// Classifies a raw reading against the domain bounds.
    pub fn classify(self, value: f32) -> StanceState {
        StanceState::from_corrupted(!value.is_nan() && value > self.midpoint())
    }

    /// Stance implied by a locked value: corrupted only at the maximum.
    pub fn stance_at(self, locked: f32) -> StanceState {
        StanceState::from_corrupted(!locked.is_nan() && locked >= self.max())
    }
}

/// Heuristic tier that produced a binding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProbeTier {
    ExactName,
    Shape,
    ValueHeuristic,
}

impl fmt::Display for ProbeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExactName => write!(f, "exact_name"),
            Self::Shape => write!(f, "shape"),
            Self::ValueHeuristic => write!(f, "value_heuristic"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetMessage {
    ToggleRequest {
        entity_id: EntityId,
    },
    ToggleResult {
        entity_id: EntityId,
        resulting_stance_is_corrupted: bool,
    },
}

impl NetMessage {
    pub fn entity_id(&self) -> EntityId {
        match self {
            Self::ToggleRequest { entity_id } | Self::ToggleResult { entity_id, .. } => *entity_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "connection", rename_all = "snake_case")]
pub enum Recipient {
    Authority,
    Connection(ConnectionId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub schema_version: String,
    pub from: ConnectionId,
    pub to: Recipient,
    pub message: NetMessage,
}

impl Envelope {
    pub fn new(from: ConnectionId, to: Recipient, message: NetMessage) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            from,
            to,
            message,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityStatus {
    pub entity_id: EntityId,
    pub connection: ConnectionId,
    pub role: NetRole,
    pub bound: bool,
    pub bound_type: Option<String>,
    pub bound_path: Option<String>,
    pub tier: Option<ProbeTier>,
    pub domain: Option<Domain>,
    pub driver_fields: Vec<String>,
    pub stance: StanceState,
    pub locked_value: Option<f32>,
    pub external_value: Option<f32>,
    pub user_chose_stance: bool,
    pub override_registered: bool,
    pub activity: String,
    pub diagnostics_dumped: bool,
    pub last_result_is_corrupted: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub schema_version: String,
    pub tick: u64,
    pub elapsed_secs: f32,
    pub authority_entities: usize,
    pub observers: Vec<ConnectionId>,
    pub in_flight_messages: usize,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick={} elapsed={:.2}s entities={} observers={} in_flight={}",
            self.tick,
            self.elapsed_secs,
            self.authority_entities,
            self.observers.len(),
            self.in_flight_messages
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[error("invalid_request")]
    InvalidRequest,
    #[error("participant_not_found")]
    ParticipantNotFound,
    #[error("entity_not_found")]
    EntityNotFound,
    #[error("body_rejected")]
    BodyRejected,
    #[error("not_owner")]
    NotOwner,
    #[error("session_not_found")]
    SessionNotFound,
    #[error("internal_error")]
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub schema_version: String,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            code,
            message: message.into(),
            details,
        }
    }
}
