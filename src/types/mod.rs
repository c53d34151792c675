//! Core types for chatlink
//!
//! Transport-agnostic types shared by the transports, the supervisor and
//! subscribers.

pub mod connection;
pub mod event;
pub mod message;
pub mod presence;
pub mod session;

// Re-export for convenience
pub use connection::{ConnectionStatus, PollingHealth};
pub use event::{DomainEvent, EventKind, Notification};
pub use message::{Message, MessageDraft};
pub use presence::PresenceStatus;
pub use session::SessionCredential;
