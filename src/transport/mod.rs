//! Transports keeping the client in sync with the chat service
//!
//! Both transports report into a single [`TransportEvent`] channel consumed
//! by the supervisor. Events from one transport keep their production order.

pub mod backoff;
pub mod http;
pub mod polling;
pub mod socket;
mod wire;

use tokio::sync::mpsc;

use crate::types::{ConnectionStatus, DomainEvent, PollingHealth};

pub use backoff::BackoffPolicy;
pub use http::{ChatApiClient, HttpPollSource, PollSource};
pub use polling::{PollingState, PollingTransport};
pub use socket::{SocketCommand, SocketTransport};

/// Which transport produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Socket,
    Polling,
}

/// Everything a transport reports upward
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The socket moved to a new status
    SocketStatus(ConnectionStatus),
    /// The polling fallback changed health
    Polling(PollingHealth),
    /// A domain event was received
    Domain {
        source: TransportKind,
        event: DomainEvent,
    },
}

/// Sending half of the transport event channel
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Queue a domain event without blocking the producer
///
/// When the queue is full the event is dropped and logged.
pub(crate) fn forward_domain(tx: &EventSender, source: TransportKind, event: DomainEvent) {
    match tx.try_send(TransportEvent::Domain { source, event }) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            tracing::warn!(?source, event = ?dropped, "event queue is full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            // Supervisor gone; nothing left to deliver to
        }
    }
}

/// Queue a status change without blocking the producer
///
/// Status changes are never dropped for lack of room: when the queue is full
/// the send is completed on a spawned task.
pub(crate) fn forward_status(tx: &EventSender, event: TransportEvent) {
    match tx.try_send(event) {
        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
    }
}
