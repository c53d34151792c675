//! Connection supervisor
//!
//! Owns the connection status and both transports for one session. A single
//! dispatcher task consumes every [`TransportEvent`], updates the status,
//! decides whether the polling fallback should run and republishes
//! [`Notification`]s to all subscribers.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::SessionContext;
use crate::error::Result;
use crate::transport::{
    forward_domain, forward_status, BackoffPolicy, ChatApiClient, EventSender, HttpPollSource,
    PollSource, PollingTransport, SocketTransport, TransportEvent, TransportKind,
};
use crate::types::{ConnectionStatus, MessageDraft, Notification, PollingHealth, SessionCredential};

/// How many idempotency keys are remembered for de-duplication
const DEDUP_WINDOW: usize = 512;

/// Receiving end of a supervisor subscription
///
/// Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::Receiver<Notification>,
}

impl Subscription {
    /// Wait for the next notification; `None` once the supervisor is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Next notification if one is queued
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

/// State read by the supervisor and written by the dispatcher
struct Hub {
    status: RwLock<ConnectionStatus>,
    subscribers: Mutex<Vec<mpsc::Sender<Notification>>>,
    rooms: Mutex<BTreeSet<String>>,
    subscriber_queue_size: usize,
}

impl Hub {
    fn new(subscriber_queue_size: usize) -> Self {
        Self {
            status: RwLock::new(ConnectionStatus::Disconnected),
            subscribers: Mutex::new(Vec::new()),
            rooms: Mutex::new(BTreeSet::new()),
            subscriber_queue_size: subscriber_queue_size.max(1),
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the status changed
    fn set_status(&self, status: ConnectionStatus) -> bool {
        let mut current = self.status.write().unwrap_or_else(PoisonError::into_inner);
        let changed = *current != status;
        *current = status;
        changed
    }

    fn rooms(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.subscriber_queue_size);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription { rx }
    }

    /// Deliver to every subscriber, pruning the ones that went away
    fn publish(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(notification.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(?notification, "subscriber queue is full, dropping notification");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Bounded memory of recently delivered idempotency keys
struct DedupWindow {
    order: VecDeque<String>,
    keys: HashSet<String>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            keys: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns `false` if the key was already seen
    fn insert(&mut self, key: String) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        self.keys.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

/// Starts the polling transport against the joined rooms
struct Poller {
    source: Arc<dyn PollSource>,
    hub: Arc<Hub>,
    events: EventSender,
}

impl Poller {
    fn start(&self, polling: &PollingTransport) {
        let source = Arc::clone(&self.source);
        let hub = Arc::clone(&self.hub);
        let events = self.events.clone();
        polling.start(move |token: CancellationToken| {
            let source = Arc::clone(&source);
            let rooms: Vec<String> = hub.rooms().iter().cloned().collect();
            let events = events.clone();
            async move {
                if rooms.is_empty() {
                    return Ok(());
                }
                let found = source.poll(&rooms).await?;
                if token.is_cancelled() {
                    return Ok(());
                }
                for event in found {
                    forward_domain(&events, TransportKind::Polling, event);
                }
                Ok(())
            }
        });
    }
}

/// Control messages from the supervisor to its dispatcher
#[derive(Debug)]
enum Control {
    SetActive(bool),
}

/// Single consumer of transport events
struct Dispatcher {
    hub: Arc<Hub>,
    /// Shared with the session so teardown can stop it synchronously
    polling: Arc<PollingTransport>,
    /// `None` when the polling fallback is disabled
    poller: Option<Poller>,
    socket_status: ConnectionStatus,
    seen: DedupWindow,
}

impl Dispatcher {
    fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::SocketStatus(status) => {
                self.socket_status = status;
                if self.hub.set_status(status) {
                    info!(status = status.as_str(), "connection status changed");
                    self.hub.publish(Notification::Status(status));
                }
                self.apply_fallback();
            }
            TransportEvent::Polling(health) => {
                self.hub.publish(Notification::Polling(health));
                if health == PollingHealth::CooledDown && self.socket_status.is_down() {
                    if let Some(poller) = &self.poller {
                        info!("polling cooldown elapsed with socket still down, restarting");
                        poller.start(&self.polling);
                    }
                }
            }
            TransportEvent::Domain { source, event } => {
                if let Some(key) = event.idempotency_key() {
                    if !self.seen.insert(key) {
                        debug!(?source, kind = ?event.kind(), "dropping duplicate event");
                        return;
                    }
                }
                self.hub.publish(Notification::Event(event));
            }
        }
    }

    fn control(&mut self, control: Control) {
        match control {
            Control::SetActive(is_foreground) => self.polling.set_active(is_foreground),
        }
    }

    /// Polling runs only while the socket is down
    fn apply_fallback(&self) {
        let Some(poller) = &self.poller else {
            return;
        };
        match self.socket_status {
            ConnectionStatus::Connected => self.polling.stop(),
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                if !self.polling.is_running() && !self.polling.is_paused() {
                    info!("socket is down, falling back to polling");
                    poller.start(&self.polling);
                }
            }
            ConnectionStatus::Connecting => {}
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut controls: mpsc::UnboundedReceiver<Control>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                Some(control) = controls.recv() => self.control(control),
            }
        }
        self.polling.stop();
    }
}

struct ActiveSession {
    socket: SocketTransport,
    polling: Arc<PollingTransport>,
    events: EventSender,
    controls: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

/// Supervises the socket and polling transports of one session
pub struct ConnectionSupervisor {
    context: SessionContext,
    /// Replaces the REST poll source when set
    custom_source: Option<Arc<dyn PollSource>>,
    hub: Arc<Hub>,
    foreground: bool,
    /// Set by `start`, cleared by `shutdown`
    wants_running: bool,
    session: Option<ActiveSession>,
}

impl ConnectionSupervisor {
    pub fn new(context: SessionContext) -> Self {
        let hub = Arc::new(Hub::new(context.config().subscriber_queue_size));
        Self {
            context,
            custom_source: None,
            hub,
            foreground: true,
            wants_running: false,
            session: None,
        }
    }

    /// Use `source` instead of the REST API for the polling fallback
    pub fn with_poll_source(context: SessionContext, source: Arc<dyn PollSource>) -> Self {
        let mut supervisor = Self::new(context);
        supervisor.custom_source = Some(source);
        supervisor
    }

    /// Begin transport activity
    ///
    /// Without a credential the supervisor stays `disconnected` and nothing
    /// is started. Must be called within a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        self.wants_running = true;
        if self.session.is_some() {
            return Ok(());
        }
        let Some(credential) = self.context.credential().cloned() else {
            debug!("no session credential, staying disconnected");
            return Ok(());
        };
        self.session = Some(self.open_session(credential)?);
        Ok(())
    }

    fn open_session(&self, credential: SessionCredential) -> Result<ActiveSession> {
        let config = self.context.config();
        let policy = BackoffPolicy::new(&config.polling)?;
        let (events, events_rx) = mpsc::channel(config.event_queue_size.max(1));
        let (controls, controls_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let poller = if config.polling_fallback {
            let source = match &self.custom_source {
                Some(source) => Arc::clone(source),
                None => {
                    let client = ChatApiClient::new(&config.api_url, config.request_timeout())?
                        .with_token(credential.token());
                    Arc::new(HttpPollSource::new(client)) as Arc<dyn PollSource>
                }
            };
            Some(Poller {
                source,
                hub: Arc::clone(&self.hub),
                events: events.clone(),
            })
        } else {
            None
        };

        let polling = Arc::new(PollingTransport::with_health_sink(policy, events.clone()));
        if !self.foreground {
            polling.set_active(false);
        }
        let dispatcher = Dispatcher {
            hub: Arc::clone(&self.hub),
            polling: Arc::clone(&polling),
            poller,
            socket_status: ConnectionStatus::Disconnected,
            seen: DedupWindow::new(DEDUP_WINDOW),
        };
        let dispatcher = tokio::spawn(dispatcher.run(events_rx, controls_rx, cancel.clone()));

        let mut socket = SocketTransport::new(
            config.ws_url(),
            credential,
            config.socket.clone(),
            policy,
            events.clone(),
        );
        socket.start();
        info!(url = socket.url(), "session started");

        let session = ActiveSession {
            socket,
            polling,
            events,
            controls,
            cancel,
            dispatcher,
        };
        self.rejoin_rooms(&session.socket);
        Ok(session)
    }

    /// Queue joins for every tracked room
    fn rejoin_rooms(&self, socket: &SocketTransport) {
        for room_id in self.hub.rooms().iter() {
            socket.join_room(room_id);
        }
    }

    /// Release both transports; idempotent
    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.socket.stop();
            session.polling.stop();
            session.cancel.cancel();
            session.dispatcher.abort();
            info!("session stopped");
        }
        if self.hub.set_status(ConnectionStatus::Disconnected) {
            self.hub.publish(Notification::Status(ConnectionStatus::Disconnected));
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.hub.status()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Whether transports are running
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    fn with_socket(&self, command: impl FnOnce(&SocketTransport) -> bool) -> bool {
        match &self.session {
            Some(session) => command(&session.socket),
            None => {
                debug!("supervisor not running, dropping command");
                false
            }
        }
    }

    /// Join a room; it is also polled while the socket is down
    ///
    /// The room is remembered and re-joined whenever the socket restarts.
    /// Returns whether the command was accepted by a running socket.
    pub fn join_room(&self, room_id: &str) -> bool {
        self.hub.rooms().insert(room_id.to_string());
        self.with_socket(|socket| socket.join_room(room_id))
    }

    pub fn leave_room(&self, room_id: &str) -> bool {
        self.hub.rooms().remove(room_id);
        self.with_socket(|socket| socket.leave_room(room_id))
    }

    pub fn send_message(&self, room_id: &str, draft: MessageDraft) -> bool {
        self.with_socket(|socket| socket.send_message(room_id, draft))
    }

    pub fn send_typing(&self, room_id: &str, is_typing: bool) -> bool {
        self.with_socket(|socket| socket.send_typing(room_id, is_typing))
    }

    pub fn mark_read(&self, room_id: &str, message_id: &str) -> bool {
        self.with_socket(|socket| socket.mark_read(room_id, message_id))
    }

    /// Tell the polling fallback whether the host is in the foreground
    pub fn set_active(&mut self, is_foreground: bool) {
        self.foreground = is_foreground;
        if let Some(session) = &self.session {
            let _ = session.controls.send(Control::SetActive(is_foreground));
        }
    }

    /// Drop the current socket and connect again from scratch
    ///
    /// Starts the session if it is not running yet.
    pub fn force_reconnect(&mut self) -> Result<()> {
        if self.session.is_none() {
            return self.start();
        }
        info!("forcing socket reconnect");
        if let Some(session) = self.session.as_mut() {
            session.socket.stop();
            forward_status(
                &session.events,
                TransportEvent::SocketStatus(ConnectionStatus::Disconnected),
            );
            session.socket.start();
        }
        if let Some(session) = &self.session {
            self.rejoin_rooms(&session.socket);
        }
        Ok(())
    }

    /// Replace the session credential
    ///
    /// The current session is torn down immediately. With a new credential,
    /// a started supervisor starts again.
    pub fn set_credential(&mut self, credential: Option<SessionCredential>) -> Result<()> {
        self.teardown();
        self.context.set_credential(credential);
        if self.wants_running && self.context.has_credential() {
            let credential = self.context.credential().cloned();
            if let Some(credential) = credential {
                self.session = Some(self.open_session(credential)?);
            }
        }
        Ok(())
    }

    /// Stop all transport activity; idempotent
    pub fn shutdown(&mut self) {
        self.wants_running = false;
        self.teardown();
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

    use crate::config::{ChatLinkConfig, SocketConfig};
    use crate::error::Error;
    use crate::types::{DomainEvent, Message};

    const WAIT: Duration = Duration::from_secs(5);

    /// Poll source returning a fixed batch and counting calls
    struct CountingSource {
        calls: AtomicUsize,
        batch: Vec<DomainEvent>,
    }

    impl CountingSource {
        fn new(batch: Vec<DomainEvent>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                batch,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollSource for CountingSource {
        async fn poll(&self, _rooms: &[String]) -> Result<Vec<DomainEvent>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.batch.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl PollSource for FailingSource {
        async fn poll(&self, _rooms: &[String]) -> Result<Vec<DomainEvent>> {
            Err(Error::network("unreachable"))
        }
    }

    fn new_message(id: &str) -> DomainEvent {
        DomainEvent::MessageNew(Message::new(id, "7", "u2", "hello"))
    }

    fn credential() -> SessionCredential {
        SessionCredential::new("u1", "secret").unwrap()
    }

    fn dispatcher(source: Arc<dyn PollSource>, fallback: bool) -> (Dispatcher, mpsc::Receiver<TransportEvent>) {
        let (events, events_rx) = mpsc::channel(64);
        let hub = Arc::new(Hub::new(16));
        let poller = fallback.then(|| Poller {
            source,
            hub: Arc::clone(&hub),
            events: events.clone(),
        });
        let dispatcher = Dispatcher {
            hub,
            polling: Arc::new(PollingTransport::with_health_sink(BackoffPolicy::default(), events)),
            poller,
            socket_status: ConnectionStatus::Disconnected,
            seen: DedupWindow::new(DEDUP_WINDOW),
        };
        (dispatcher, events_rx)
    }

    fn drain(sub: &mut Subscription) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Some(notification) = sub.try_recv() {
            seen.push(notification);
        }
        seen
    }

    async fn next(sub: &mut Subscription) -> Notification {
        tokio::time::timeout(WAIT, sub.recv())
            .await
            .expect("timed out waiting for notification")
            .expect("subscription closed")
    }

    #[test]
    fn test_dedup_window_is_bounded() {
        let mut window = DedupWindow::new(2);
        assert!(window.insert("a".to_string()));
        assert!(!window.insert("a".to_string()));
        assert!(window.insert("b".to_string()));
        assert!(window.insert("c".to_string()));
        // "a" was evicted
        assert!(window.insert("a".to_string()));
        assert!(!window.insert("c".to_string()));
    }

    #[tokio::test]
    async fn test_no_credential_stays_disconnected() {
        let source = CountingSource::new(Vec::new());
        let context = SessionContext::new(ChatLinkConfig::default()).unwrap();
        let mut supervisor = ConnectionSupervisor::with_poll_source(context, source.clone());
        let mut sub = supervisor.subscribe();

        supervisor.start().unwrap();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.status(), ConnectionStatus::Disconnected);
        assert!(!supervisor.join_room("7"));
        assert!(!supervisor.send_message("7", MessageDraft::new("hi")));
        supervisor.force_reconnect().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 0);
        assert!(drain(&mut sub).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_fan_out_and_pruning() {
        let (mut dispatcher, _events_rx) = dispatcher(CountingSource::new(Vec::new()), false);
        let mut first = dispatcher.hub.subscribe();
        let second = dispatcher.hub.subscribe();
        drop(second);

        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Connecting));
        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Connecting));
        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Connected));

        assert_eq!(
            drain(&mut first),
            vec![
                Notification::Status(ConnectionStatus::Connecting),
                Notification::Status(ConnectionStatus::Connected),
            ]
        );
        assert_eq!(dispatcher.hub.status(), ConnectionStatus::Connected);
        assert_eq!(
            dispatcher
                .hub
                .subscribers
                .lock()
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_events_are_deduplicated() {
        let (mut dispatcher, _events_rx) = dispatcher(CountingSource::new(Vec::new()), false);
        let mut sub = dispatcher.hub.subscribe();

        let message = new_message("42");
        let typing = DomainEvent::TypingChanged {
            room_id: "7".to_string(),
            user_id: "u2".to_string(),
            is_typing: true,
        };
        for source in [TransportKind::Socket, TransportKind::Polling] {
            dispatcher.handle(TransportEvent::Domain {
                source,
                event: message.clone(),
            });
            dispatcher.handle(TransportEvent::Domain {
                source,
                event: typing.clone(),
            });
        }

        assert_eq!(
            drain(&mut sub),
            vec![
                Notification::Event(message),
                Notification::Event(typing.clone()),
                Notification::Event(typing),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstamped_updates_are_all_delivered() {
        let (mut dispatcher, _events_rx) = dispatcher(CountingSource::new(Vec::new()), false);
        let mut sub = dispatcher.hub.subscribe();

        let first = DomainEvent::MessageUpdated(Message::new("42", "7", "u2", "first edit"));
        let second = DomainEvent::MessageUpdated(Message::new("42", "7", "u2", "second edit"));
        for event in [first.clone(), second.clone()] {
            dispatcher.handle(TransportEvent::Domain {
                source: TransportKind::Socket,
                event,
            });
        }

        // A stamped edit seen through both transports is still delivered once
        let stamped = DomainEvent::MessageUpdated(
            Message::new("42", "7", "u2", "third edit").with_edited_at(chrono::Utc::now()),
        );
        for source in [TransportKind::Socket, TransportKind::Polling] {
            dispatcher.handle(TransportEvent::Domain {
                source,
                event: stamped.clone(),
            });
        }

        assert_eq!(
            drain(&mut sub),
            vec![
                Notification::Event(first),
                Notification::Event(second),
                Notification::Event(stamped),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_follows_socket_status() {
        let event = new_message("42");
        let source = CountingSource::new(vec![event.clone()]);
        let (mut dispatcher, mut events_rx) = dispatcher(source.clone(), true);
        dispatcher.hub.rooms().insert("7".to_string());
        let mut sub = dispatcher.hub.subscribe();

        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Connecting));
        assert!(!dispatcher.polling.is_running());

        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Error));
        assert!(dispatcher.polling.is_running());

        // Let the initial attempt run and feed its output back in
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 1);
        while let Ok(event) = events_rx.try_recv() {
            dispatcher.handle(event);
        }

        let seen = drain(&mut sub);
        assert!(seen.contains(&Notification::Status(ConnectionStatus::Error)));
        assert!(seen.contains(&Notification::Polling(PollingHealth::Active)));
        assert!(seen.contains(&Notification::Event(event.clone())));

        // The same message arriving over the recovered socket is not repeated
        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Connected));
        assert!(!dispatcher.polling.is_running());
        dispatcher.handle(TransportEvent::Domain {
            source: TransportKind::Socket,
            event,
        });
        while let Ok(event) = events_rx.try_recv() {
            dispatcher.handle(event);
        }
        let seen = drain(&mut sub);
        assert_eq!(
            seen,
            vec![
                Notification::Status(ConnectionStatus::Connected),
                Notification::Polling(PollingHealth::Idle),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_disabled() {
        let source = CountingSource::new(Vec::new());
        let (mut dispatcher, _events_rx) = dispatcher(source.clone(), false);
        dispatcher.hub.rooms().insert("7".to_string());

        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Error));
        assert!(!dispatcher.polling.is_running());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_polling_after_cooldown_while_socket_down() {
        let (mut dispatcher, mut events_rx) = dispatcher(Arc::new(FailingSource), true);
        dispatcher.hub.rooms().insert("7".to_string());

        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Error));

        // Five failures pause polling
        tokio::time::sleep(Duration::from_secs(60)).await;
        let mut saw_paused = false;
        while let Ok(event) = events_rx.try_recv() {
            saw_paused |= matches!(event, TransportEvent::Polling(PollingHealth::Paused));
        }
        assert!(saw_paused);
        assert!(dispatcher.polling.is_paused());

        // Further socket errors do not override the pause
        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Connecting));
        dispatcher.handle(TransportEvent::SocketStatus(ConnectionStatus::Error));
        assert!(!dispatcher.polling.is_running());

        dispatcher.handle(TransportEvent::Polling(PollingHealth::CooledDown));
        assert!(dispatcher.polling.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_active_reaches_polling() {
        let (mut dispatcher, _events_rx) = dispatcher(CountingSource::new(Vec::new()), true);
        dispatcher.control(Control::SetActive(false));
        assert!(dispatcher.polling.current_interval() >= Duration::from_millis(30000));
        dispatcher.control(Control::SetActive(true));
        assert_eq!(dispatcher.polling.current_interval(), Duration::from_millis(3000));
    }

    async fn local_server(push: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    // authenticate
                    let _ = ws.next().await;
                    if let Some(frame) = push {
                        ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
                    }
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        url
    }

    /// Server accepting any number of connections and reporting every text
    /// frame it receives
    async fn recording_server() -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/", listener.local_addr().unwrap());
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let frames_tx = frames_tx.clone();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(frame)) = ws.next().await {
                        if let WsMessage::Text(text) = frame {
                            let _ = frames_tx.send(serde_json::from_str(&text).unwrap());
                        }
                    }
                });
            }
        });
        (url, frames_rx)
    }

    async fn next_frame(frames: &mut mpsc::UnboundedReceiver<serde_json::Value>) -> serde_json::Value {
        tokio::time::timeout(WAIT, frames.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("server went away")
    }

    /// Next status notification, skipping polling health and events
    async fn next_status(sub: &mut Subscription) -> ConnectionStatus {
        loop {
            if let Notification::Status(status) = next(sub).await {
                return status;
            }
        }
    }

    fn context_for(url: String) -> SessionContext {
        let config = ChatLinkConfig::default()
            .with_socket_url(url)
            .with_socket(SocketConfig {
                reconnect: false,
                ..SocketConfig::default()
            });
        SessionContext::new(config).unwrap().with_credential(credential())
    }

    #[tokio::test]
    async fn test_end_to_end_over_socket() {
        let url = local_server(Some(
            r#"{"event": "new_message", "data": {"message": {"id": 42, "chat_id": 7, "from_user": 3, "body": "hi", "created_at": "2025-06-01T12:00:00Z"}}}"#,
        ))
        .await;
        let source = CountingSource::new(Vec::new());
        let mut supervisor = ConnectionSupervisor::with_poll_source(context_for(url), source.clone());
        let mut sub = supervisor.subscribe();

        supervisor.start().unwrap();
        assert!(supervisor.is_running());

        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Connecting));
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Connected));
        match next(&mut sub).await {
            Notification::Event(DomainEvent::MessageNew(msg)) => assert_eq!(msg.id, "42"),
            other => panic!("Expected message event, got {other:?}"),
        }
        assert!(supervisor.is_connected());
        assert!(supervisor.mark_read("7", "42"));
        assert_eq!(source.calls(), 0);

        supervisor.shutdown();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.status(), ConnectionStatus::Disconnected);
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Disconnected));
        assert!(!supervisor.send_typing("7", true));
    }

    #[tokio::test]
    async fn test_polls_while_socket_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/", listener.local_addr().unwrap());
        drop(listener);

        let event = new_message("42");
        let source = CountingSource::new(vec![event.clone()]);
        let mut supervisor = ConnectionSupervisor::with_poll_source(context_for(url), source.clone());
        let mut sub = supervisor.subscribe();
        supervisor.join_room("7");

        supervisor.start().unwrap();

        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Connecting));
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Error));
        assert_eq!(next(&mut sub).await, Notification::Polling(PollingHealth::Active));
        assert_eq!(next(&mut sub).await, Notification::Event(event));
        assert!(source.calls() >= 1);
    }

    #[tokio::test]
    async fn test_force_reconnect_rejoins_rooms() {
        let (url, mut frames) = recording_server().await;
        let mut supervisor =
            ConnectionSupervisor::with_poll_source(context_for(url), CountingSource::new(Vec::new()));
        let mut sub = supervisor.subscribe();
        supervisor.join_room("7");
        supervisor.start().unwrap();

        assert_eq!(next_status(&mut sub).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut sub).await, ConnectionStatus::Connected);
        assert_eq!(next_frame(&mut frames).await["event"], "authenticate");
        let join = next_frame(&mut frames).await;
        assert_eq!(join["event"], "join_chat");
        assert_eq!(join["data"]["chat_id"], "7");

        supervisor.force_reconnect().unwrap();
        assert!(supervisor.is_running());
        assert_eq!(next_status(&mut sub).await, ConnectionStatus::Disconnected);
        assert_eq!(next_status(&mut sub).await, ConnectionStatus::Connecting);
        assert_eq!(next_status(&mut sub).await, ConnectionStatus::Connected);

        let auth = next_frame(&mut frames).await;
        assert_eq!(auth["event"], "authenticate");
        assert_eq!(auth["data"]["token"], "secret");
        let join = next_frame(&mut frames).await;
        assert_eq!(join["event"], "join_chat");
        assert_eq!(join["data"]["chat_id"], "7");
        assert!(supervisor.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_stops_polling_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/", listener.local_addr().unwrap());
        drop(listener);

        let source = CountingSource::new(Vec::new());
        let mut supervisor = ConnectionSupervisor::with_poll_source(context_for(url), source.clone());
        let mut sub = supervisor.subscribe();
        supervisor.join_room("7");
        supervisor.start().unwrap();

        while next(&mut sub).await != Notification::Polling(PollingHealth::Active) {}
        let polling = Arc::clone(&supervisor.session.as_ref().unwrap().polling);
        assert!(polling.is_running());

        supervisor.shutdown();
        assert!(!polling.is_running());
        assert!(!polling.has_pending_timers());
    }

    #[tokio::test]
    async fn test_clearing_credential_tears_down() {
        let url = local_server(None).await;
        let mut supervisor =
            ConnectionSupervisor::with_poll_source(context_for(url), CountingSource::new(Vec::new()));
        let mut sub = supervisor.subscribe();
        supervisor.start().unwrap();
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Connecting));
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Connected));

        supervisor.set_credential(None).unwrap();
        assert!(!supervisor.is_running());
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Disconnected));

        // A new credential restarts the started supervisor
        supervisor.set_credential(Some(credential())).unwrap();
        assert!(supervisor.is_running());
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Connecting));
        assert_eq!(next(&mut sub).await, Notification::Status(ConnectionStatus::Connected));
    }
}
