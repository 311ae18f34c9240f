//! Stance lock controller: binds to an externally owned corruption controller,
//! locks the survivor's stance at a chosen boundary and replicates toggle
//! intent from observers to the authority.

pub mod ability;
pub mod activity;
pub mod binder;
pub mod binding;
pub mod body;
pub mod bridge;
pub mod diagnostics;
pub mod engine;
pub mod external;
pub mod graph;
pub mod participant;
pub mod probe;
pub mod session;

pub use ability::{
    install_stance_toggle, AbilityHandle, AbilityRegistry, AbilitySlot, ContentCatalog,
    OverridePriority,
};
pub use activity::{Activity, ActivityMachine, InterruptPriority};
pub use binder::CapabilityBinder;
pub use binding::{AdapterBinding, Resolution};
pub use body::{BodyBlueprint, BodyInstance};
pub use bridge::{ReplicationBridge, ToggleDispatch};
pub use diagnostics::{DiagnosticReport, DiagnosticSink, FileDiagnosticSink, MemoryDiagnosticSink};
pub use engine::{EngineContext, StanceLockEngine};
pub use graph::{ComponentHandle, ExternalComponent, NodeId, ObjectGraph};
pub use participant::{EntityRecord, Participant, ParticipantError};
pub use session::{DeliveryPolicy, LoopbackTransport, Session, SessionError, TransportError};
