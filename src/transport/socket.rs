//! WebSocket transport
//!
//! One background task owns the connection. It authenticates, forwards
//! translated server frames, keeps the link alive with pings and drains the
//! outgoing command queue. Commands queued while (re)connecting are sent once
//! the next connection is authenticated. Once the retry budget is spent the
//! task waits out a cooldown and starts over with a fresh budget.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::SocketConfig;
use crate::error::{Error, ErrorCode};
use crate::types::{ConnectionStatus, MessageDraft, SessionCredential};

use super::backoff::BackoffPolicy;
use super::polling::PAUSE_COOLDOWN;
use super::wire::{self, Inbound, OutgoingFrame};
use super::{forward_domain, forward_status, EventSender, TransportEvent, TransportKind};

/// Type alias for the WebSocket write half
type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
/// Type alias for the WebSocket read half
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Client action sent over the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    SendMessage { room_id: String, draft: MessageDraft },
    Typing { room_id: String, is_typing: bool },
    MarkRead { room_id: String, message_id: String },
}

/// Why a single connection ended
#[derive(Debug)]
enum SessionEnd {
    /// Server closed the connection cleanly
    Closed,
    /// Connect, read or write failed
    Failed(Error),
    /// Server refused the credential; retrying will not help
    Rejected(String),
    /// Command queue closed: the transport was dropped
    Abandoned,
}

struct Running {
    commands: mpsc::Sender<SocketCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// WebSocket connection with automatic reconnect
pub struct SocketTransport {
    url: String,
    credential: SessionCredential,
    config: SocketConfig,
    policy: BackoffPolicy,
    /// Wait after the retry budget is spent
    cooldown: Duration,
    events: EventSender,
    status: Arc<Mutex<ConnectionStatus>>,
    running: Option<Running>,
}

impl SocketTransport {
    pub fn new(
        url: impl Into<String>,
        credential: SessionCredential,
        config: SocketConfig,
        policy: BackoffPolicy,
        events: EventSender,
    ) -> Self {
        Self {
            url: url.into(),
            credential,
            config,
            policy,
            cooldown: PAUSE_COOLDOWN,
            events,
            status: Arc::new(Mutex::new(ConnectionStatus::Disconnected)),
            running: None,
        }
    }

    /// Override the cooldown between exhausted retry budgets
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Spawn the connection task; no-op when already running
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.stop();

        let (commands, command_rx) = mpsc::channel(self.config.command_queue_size.max(1));
        let cancel = CancellationToken::new();
        let link = Link {
            url: self.url.clone(),
            credential: self.credential.clone(),
            config: self.config.clone(),
            policy: self.policy,
            cooldown: self.cooldown,
            events: self.events.clone(),
            status: Arc::clone(&self.status),
        };
        let task = tokio::spawn(link.run(command_rx, cancel.clone()));

        self.running = Some(Running {
            commands,
            cancel,
            task,
        });
    }

    /// Close the connection and stop reconnecting; idempotent
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            running.task.abort();
            *self.status.lock().unwrap_or_else(PoisonError::into_inner) =
                ConnectionStatus::Disconnected;
            tracing::debug!(url = %self.url, "socket transport stopped");
        }
    }

    /// Queue a command for the server
    ///
    /// Returns `false` when the transport is not running or the queue is
    /// full.
    pub fn send(&self, command: SocketCommand) -> bool {
        let Some(running) = &self.running else {
            tracing::debug!(?command, "socket not started, dropping command");
            return false;
        };
        match running.commands.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                tracing::warn!(?command, "socket command queue is full, dropping command");
                false
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                tracing::debug!(?command, "socket task has exited, dropping command");
                false
            }
        }
    }

    pub fn join_room(&self, room_id: &str) -> bool {
        self.send(SocketCommand::JoinRoom {
            room_id: room_id.to_string(),
        })
    }

    pub fn leave_room(&self, room_id: &str) -> bool {
        self.send(SocketCommand::LeaveRoom {
            room_id: room_id.to_string(),
        })
    }

    pub fn send_message(&self, room_id: &str, draft: MessageDraft) -> bool {
        self.send(SocketCommand::SendMessage {
            room_id: room_id.to_string(),
            draft,
        })
    }

    pub fn send_typing(&self, room_id: &str, is_typing: bool) -> bool {
        self.send(SocketCommand::Typing {
            room_id: room_id.to_string(),
            is_typing,
        })
    }

    pub fn mark_read(&self, room_id: &str, message_id: &str) -> bool {
        self.send(SocketCommand::MarkRead {
            room_id: room_id.to_string(),
            message_id: message_id.to_string(),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Whether the connection task is alive (connected or retrying)
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| !running.task.is_finished())
            .unwrap_or(false)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the connection task
struct Link {
    url: String,
    credential: SessionCredential,
    config: SocketConfig,
    policy: BackoffPolicy,
    cooldown: Duration,
    events: EventSender,
    status: Arc<Mutex<ConnectionStatus>>,
}

impl Link {
    fn set_status(&self, status: ConnectionStatus) {
        {
            let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == status {
                return;
            }
            *current = status;
        }
        forward_status(&self.events, TransportEvent::SocketStatus(status));
    }

    async fn run(self, mut commands: mpsc::Receiver<SocketCommand>, cancel: CancellationToken) {
        let mut failures: u32 = 0;

        loop {
            self.set_status(ConnectionStatus::Connecting);

            let end = tokio::select! {
                _ = cancel.cancelled() => return,
                end = self.connect_and_serve(&mut commands, &mut failures) => end,
            };

            match end {
                SessionEnd::Closed => {
                    tracing::info!(url = %self.url, "socket closed by server");
                    self.set_status(ConnectionStatus::Disconnected);
                }
                SessionEnd::Failed(e) => {
                    tracing::warn!(url = %self.url, error = %e, "socket connection failed");
                    self.set_status(ConnectionStatus::Error);
                }
                SessionEnd::Rejected(reason) => {
                    tracing::error!(url = %self.url, %reason, "socket authentication rejected");
                    self.set_status(ConnectionStatus::Error);
                    return;
                }
                SessionEnd::Abandoned => return,
            }

            if !self.config.reconnect {
                return;
            }
            failures = failures.saturating_add(1);
            let delay = if self.policy.should_pause(failures) {
                tracing::warn!(
                    url = %self.url,
                    failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "too many failed socket reconnects, cooling down"
                );
                failures = 0;
                self.cooldown
            } else {
                self.policy.next_delay(failures - 1)
            };
            tracing::debug!(url = %self.url, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_and_serve(
        &self,
        commands: &mut mpsc::Receiver<SocketCommand>,
        failures: &mut u32,
    ) -> SessionEnd {
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let stream = match tokio::time::timeout(connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                return SessionEnd::Failed(Error::network(format!("WebSocket connection failed: {e}")))
            }
            Err(_) => {
                return SessionEnd::Failed(Error::new(
                    ErrorCode::Timeout,
                    format!("WebSocket connection timed out after {}s", connect_timeout.as_secs()),
                ))
            }
        };

        let (mut write, read) = stream.split();

        let auth = match OutgoingFrame::authenticate(&self.credential).to_text() {
            Ok(auth) => auth,
            Err(e) => return SessionEnd::Failed(e),
        };
        if let Err(e) = write.send(Message::Text(auth)).await {
            return SessionEnd::Failed(Error::network(format!("Failed to send auth: {e}")));
        }

        *failures = 0;
        self.set_status(ConnectionStatus::Connected);
        tracing::info!(url = %self.url, "socket connected");

        self.serve(write, read, commands).await
    }

    async fn serve(
        &self,
        mut write: WsWriter,
        mut read: WsReader,
        commands: &mut mpsc::Receiver<SocketCommand>,
    ) -> SessionEnd {
        let ping_interval = Duration::from_secs(self.config.ping_interval_secs);
        let mut ping_timer = interval_at(Instant::now() + ping_interval, ping_interval);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(end) = self.handle_text(&text) {
                                let _ = write.send(Message::Close(None)).await;
                                return end;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return SessionEnd::Failed(Error::network(format!("Failed to send pong: {e}")));
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return SessionEnd::Failed(Error::network(format!("WebSocket error: {e}")));
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return SessionEnd::Failed(Error::network(format!("Failed to send ping: {e}")));
                    }
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Abandoned;
                    };
                    let text = match OutgoingFrame::from(&command).to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(?command, error = %e, "failed to encode command");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        return SessionEnd::Failed(Error::network(format!("Failed to send command: {e}")));
                    }
                }
            }
        }
    }

    /// Returns `Some` when the frame ends the connection
    fn handle_text(&self, text: &str) -> Option<SessionEnd> {
        match wire::translate(text) {
            Ok(Inbound::Event(event)) => {
                forward_domain(&self.events, TransportKind::Socket, event);
                None
            }
            Ok(Inbound::AuthRejected(reason)) => Some(SessionEnd::Rejected(reason)),
            Ok(Inbound::Authenticated) => {
                tracing::debug!(url = %self.url, "socket authenticated");
                None
            }
            Ok(Inbound::Ignored) => None,
            Err(e) => {
                let snippet: String = text.chars().take(200).collect();
                tracing::warn!(error = %e, raw = %snippet, "dropping malformed socket frame");
                None
            }
        }
    }
}
