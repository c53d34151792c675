//! REST client and the poll source used by the polling fallback

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use url::Url;

use crate::error::{Error, ErrorCode, Result};
use crate::types::{DomainEvent, Message};

use super::wire::MessagePage;

/// Minimal client for the chat REST API
pub struct ChatApiClient {
    http_client: Client,
    /// API root (e.g., "https://chat.example.com/api/v1")
    base_url: Url,
    token: Option<String>,
}

impl ChatApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::new(ErrorCode::InvalidArgument, format!("Invalid URL: {e}")))?;

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::new(ErrorCode::NetworkError, format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url,
            token: None,
        })
    }

    /// Authenticate requests with a bearer token (builder pattern)
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build the full URL for an endpoint below the API root
    pub fn api_url(&self, endpoint: &str) -> String {
        let endpoint = endpoint.trim_start_matches('/');
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{endpoint}")
    }

    pub async fn get(&self, endpoint: &str) -> Result<reqwest::Response> {
        let url = self.api_url(endpoint);
        let mut request = self.http_client.get(&url);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request.send().await.map_err(|e| {
            let code = if e.is_timeout() {
                ErrorCode::Timeout
            } else {
                ErrorCode::NetworkError
            };
            Error::new(code, format!("GET request failed: {e}"))
        })
    }

    /// Check the status and decode the JSON body
    pub async fn handle_response<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| Error::protocol(format!("Failed to parse response: {e}")))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(Error::new(
                ErrorCode::from_http_status(status.as_u16()),
                format!("API request failed with status {status}: {error_text}"),
            )
            .with_http_status(status.as_u16()))
        }
    }

    /// Latest page of messages in a room
    pub async fn list_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        let response = self.get(&format!("chats/{room_id}/messages/")).await?;
        let page: MessagePage = self.handle_response(response).await?;
        Ok(page.data.into_iter().map(Message::from).collect())
    }
}

/// Fetches whatever changed since the previous call
///
/// Implementations are called by the polling transport with the rooms
/// currently joined. An `Err` counts as a failed attempt.
#[async_trait]
pub trait PollSource: Send + Sync {
    async fn poll(&self, rooms: &[String]) -> Result<Vec<DomainEvent>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Seen {
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
}

/// Known messages of one room, as of the last successful fetch
#[derive(Debug, Default)]
struct RoomSnapshot {
    messages: HashMap<String, Seen>,
}

impl RoomSnapshot {
    fn seed(page: &[Message]) -> Self {
        RoomSnapshot {
            messages: page
                .iter()
                .map(|m| {
                    (
                        m.id.clone(),
                        Seen {
                            created_at: m.created_at,
                            edited_at: m.edited_at,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Replace the snapshot with `page`, returning what changed
    ///
    /// Only the latest page is fetched, so messages older than the page
    /// window are neither reported deleted nor re-reported as new.
    fn apply(&mut self, room_id: &str, mut page: Vec<Message>) -> Vec<DomainEvent> {
        page.sort_by_key(|m| m.created_at);

        let floor = self.messages.values().map(|s| s.created_at).min();
        let page_oldest = page.first().map(|m| m.created_at);
        let mut events = Vec::new();

        for message in &page {
            match self.messages.get(&message.id) {
                None if floor.map_or(true, |floor| message.created_at >= floor) => {
                    events.push(DomainEvent::MessageNew(message.clone()));
                }
                Some(seen) if seen.edited_at != message.edited_at => {
                    events.push(DomainEvent::MessageUpdated(message.clone()));
                }
                _ => {}
            }
        }

        let present: HashSet<&str> = page.iter().map(|m| m.id.as_str()).collect();
        let mut vanished: Vec<(&String, &Seen)> = self
            .messages
            .iter()
            .filter(|(id, seen)| {
                !present.contains(id.as_str())
                    && page_oldest.map_or(true, |oldest| seen.created_at >= oldest)
            })
            .collect();
        vanished.sort_by_key(|(_, seen)| seen.created_at);
        events.extend(vanished.into_iter().map(|(id, _)| DomainEvent::MessageDeleted {
            room_id: room_id.to_string(),
            message_id: id.clone(),
        }));

        *self = RoomSnapshot::seed(&page);
        events
    }
}

/// Poll source backed by the REST message list
///
/// The first fetch of a room only records what exists; later fetches report
/// new, edited and deleted messages.
pub struct HttpPollSource {
    client: ChatApiClient,
    rooms: Mutex<HashMap<String, RoomSnapshot>>,
}

impl HttpPollSource {
    pub fn new(client: ChatApiClient) -> Self {
        Self {
            client,
            rooms: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PollSource for HttpPollSource {
    async fn poll(&self, rooms: &[String]) -> Result<Vec<DomainEvent>> {
        // Fetch everything before touching the snapshots so a failed attempt
        // leaves them as they were
        let mut pages = Vec::with_capacity(rooms.len());
        for room_id in rooms {
            let page = self.client.list_messages(room_id).await?;
            pages.push((room_id, page));
        }

        let mut snapshots = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.retain(|room_id, _| rooms.contains(room_id));

        let mut events = Vec::new();
        for (room_id, page) in pages {
            match snapshots.get_mut(room_id) {
                Some(snapshot) => events.extend(snapshot.apply(room_id, page)),
                None => {
                    tracing::debug!(room_id = %room_id, known = page.len(), "seeding room snapshot");
                    snapshots.insert(room_id.clone(), RoomSnapshot::seed(&page));
                }
            }
        }
        Ok(events)
    }
}
