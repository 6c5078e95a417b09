//! Signaling-backend seam: trait, pushed events, and the production
//! HTTP + WebSocket implementation

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{CallMember, CallSession, CallState, Identity, MediaConfig, MemberRole};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

// ============================================================================
// Events
// ============================================================================

/// Session-wide events pushed by the signaling backend.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    ParticipantJoined {
        session_id: String,
        member: CallMember,
    },
    ParticipantLeft {
        session_id: String,
        user_id: String,
    },
    SessionEnded {
        session_id: String,
    },
    IncomingCall {
        call: CallSession,
    },
}

// ============================================================================
// Backend trait
// ============================================================================

/// Client-side usage contract for the opaque call-infrastructure service.
/// The wire protocol underneath (SFU, ICE negotiation) is owned by the
/// backend; this trait only covers session management.
#[async_trait]
pub trait SignalingBackend: Send + Sync {
    /// Establish the event channel. Idempotent; must complete before any
    /// pushed event can be observed.
    async fn connect_events(&self) -> Result<()>;

    /// Idempotent get-or-create: resolving an existing id must attach the
    /// member and return the same session, never fail with "already exists".
    async fn get_or_create_session(
        &self,
        session_id: &str,
        member: &CallMember,
        metadata: Option<serde_json::Value>,
    ) -> Result<CallSession>;

    /// Attach local media and confirm membership. A "not found" class
    /// rejection maps to `Error::SessionInvalid`.
    async fn join_session(&self, session_id: &str, media: &MediaConfig) -> Result<()>;

    async fn leave_session(&self, session_id: &str) -> Result<()>;

    async fn set_microphone(&self, session_id: &str, enabled: bool) -> Result<()>;

    async fn set_camera(&self, session_id: &str, enabled: bool) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;
}

// ============================================================================
// Production backend: REST for session ops, WebSocket for pushed events
// ============================================================================

pub struct HttpSignalingBackend {
    http: Client,
    base_url: String,
    ws_url: String,
    api_key: String,
    token: String,
    identity: Identity,
    ice_servers: Vec<String>,
    events: broadcast::Sender<SignalingEvent>,
    ws_out: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl HttpSignalingBackend {
    pub fn new(config: &ClientConfig, identity: Identity, token: &str) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        let (events, _) = broadcast::channel(64);

        log::debug!(
            "signaling client for {} configured with ICE servers {:?}",
            identity.user_id,
            config.ice_servers
        );

        Self {
            http,
            base_url: config.http_url(),
            ws_url: config.call_ws_url(),
            api_key: config.api_key.clone(),
            token: token.to_string(),
            identity,
            ice_servers: config.ice_servers.clone(),
            events,
            ws_out: Mutex::new(None),
        }
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
            .header("x-api-key", &self.api_key)
    }

    fn parse_session(data: &serde_json::Value) -> CallSession {
        let members = data["members"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        Some(CallMember {
                            user_id: row["userId"].as_str()?.to_string(),
                            role: MemberRole::parse(row["role"].as_str().unwrap_or(""))
                                .unwrap_or(MemberRole::Student),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        CallSession {
            session_id: data["sessionId"].as_str().unwrap_or_default().to_string(),
            kind: data["kind"].as_str().unwrap_or("default").to_string(),
            members,
            state: CallState::Idle,
        }
    }

    fn decode_event(data: &serde_json::Value) -> Option<SignalingEvent> {
        let payload = data.get("payload")?;
        match data["type"].as_str() {
            Some("participantJoined") => Some(SignalingEvent::ParticipantJoined {
                session_id: payload["sessionId"].as_str()?.to_string(),
                member: CallMember {
                    user_id: payload["userId"].as_str()?.to_string(),
                    role: MemberRole::parse(payload["role"].as_str().unwrap_or(""))
                        .unwrap_or(MemberRole::Student),
                },
            }),
            Some("participantLeft") => Some(SignalingEvent::ParticipantLeft {
                session_id: payload["sessionId"].as_str()?.to_string(),
                user_id: payload["userId"].as_str()?.to_string(),
            }),
            Some("sessionEnded") => Some(SignalingEvent::SessionEnded {
                session_id: payload["sessionId"].as_str()?.to_string(),
            }),
            Some("incomingCall") => Some(SignalingEvent::IncomingCall {
                call: Self::parse_session(payload),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl SignalingBackend for HttpSignalingBackend {
    async fn connect_events(&self) -> Result<()> {
        if self.ws_out.lock().is_some() {
            return Ok(());
        }

        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        // All outbound frames go through the channel; authentication is the
        // first of them.
        let auth_msg = json!({
            "type": "authenticate",
            "payload": {
                "apiKey": self.api_key,
                "userId": self.identity.user_id,
                "token": self.token,
                "iceServers": self.ice_servers,
            }
        });
        tx.send(auth_msg.to_string())
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        *self.ws_out.lock() = Some(tx);

        let events = self.events.clone();

        // Receive task
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&text) {
                            if let Some(event) = Self::decode_event(&data) {
                                let _ = events.send(event);
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => {
                        log::warn!("call-signaling socket closed");
                        break;
                    }
                    _ => {}
                }
            }
        });

        // Send task
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if write.send(WsMessage::Text(msg)).await.is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    async fn get_or_create_session(
        &self,
        session_id: &str,
        member: &CallMember,
        metadata: Option<serde_json::Value>,
    ) -> Result<CallSession> {
        let resp = self
            .authed(
                self.http
                    .post(format!("{}/call/sessions/{}", self.base_url, session_id)),
            )
            .json(&json!({
                "kind": "default",
                "member": member,
                "metadata": metadata,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Session(format!(
                "get-or-create for {} returned {}",
                session_id,
                resp.status()
            )));
        }

        let data: serde_json::Value = resp.json().await?;
        Ok(Self::parse_session(&data))
    }

    async fn join_session(&self, session_id: &str, media: &MediaConfig) -> Result<()> {
        let resp = self
            .authed(
                self.http
                    .post(format!("{}/call/sessions/{}/join", self.base_url, session_id)),
            )
            .json(&json!({
                "microphone": media.microphone.is_enabled(),
                "camera": media.camera.is_enabled(),
            }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 404 || status == 410 {
            return Err(Error::SessionInvalid(format!(
                "session {} no longer exists",
                session_id
            )));
        }
        if !resp.status().is_success() {
            return Err(Error::Session(format!(
                "join for {} returned {}",
                session_id,
                resp.status()
            )));
        }

        Ok(())
    }

    async fn leave_session(&self, session_id: &str) -> Result<()> {
        let resp = self
            .authed(
                self.http
                    .post(format!("{}/call/sessions/{}/leave", self.base_url, session_id)),
            )
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Session(format!(
                "leave for {} returned {}",
                session_id,
                resp.status()
            )));
        }

        Ok(())
    }

    async fn set_microphone(&self, session_id: &str, enabled: bool) -> Result<()> {
        let resp = self
            .authed(
                self.http
                    .post(format!("{}/call/sessions/{}/media", self.base_url, session_id)),
            )
            .json(&json!({ "microphone": enabled }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::MediaDevice(format!(
                "microphone toggle returned {}",
                resp.status()
            )));
        }

        Ok(())
    }

    async fn set_camera(&self, session_id: &str, enabled: bool) -> Result<()> {
        let resp = self
            .authed(
                self.http
                    .post(format!("{}/call/sessions/{}/media", self.base_url, session_id)),
            )
            .json(&json!({ "camera": enabled }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::MediaDevice(format!(
                "camera toggle returned {}",
                resp.status()
            )));
        }

        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}
