//! Chat bridge: two-party messaging channel with call origination

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{
    CallMember, ChatIdentity, ChatMessage, MemberRole, MessageContent, MessageStatus,
};
use crate::session::CallSessionController;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// Correlates a mentor/student pair with its messaging channel and lets
/// either party originate a call session without leaving the chat view.
///
/// Outgoing messages are echoed optimistically: they sit in a pending map
/// keyed by a client-generated correlation id until the server echo carries
/// the id back, and can be marked failed for resend if no confirmation comes.
pub struct ChatSessionBridge {
    http: Client,
    config: ClientConfig,
    local: ChatIdentity,
    remote: ChatIdentity,
    sessions: Arc<CallSessionController>,
    ws_out: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected: Arc<Mutex<bool>>,
    pending: Arc<Mutex<HashMap<String, ChatMessage>>>,
    incoming: Arc<Mutex<VecDeque<ChatMessage>>>,
}

impl ChatSessionBridge {
    pub async fn connect(
        config: &ClientConfig,
        local: ChatIdentity,
        remote: ChatIdentity,
        sessions: Arc<CallSessionController>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        let bridge = Self {
            http,
            config: config.clone(),
            local,
            remote,
            sessions,
            ws_out: Mutex::new(None),
            connected: Arc::new(Mutex::new(false)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            incoming: Arc::new(Mutex::new(VecDeque::new())),
        };

        bridge.connect_socket().await?;
        Ok(bridge)
    }

    async fn connect_socket(&self) -> Result<()> {
        let (ws_stream, _) = connect_async(&self.config.chat_ws_url()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        // The channel is keyed by id and role.
        let register = json!({
            "type": "register",
            "payload": {
                "userId": self.local.user_id,
                "userRole": self.local.role.as_str(),
            }
        });
        write.send(WsMessage::Text(register.to_string())).await?;

        *self.ws_out.lock() = Some(tx);
        *self.connected.lock() = true;

        let local_user_id = self.local.user_id.clone();
        let pending = self.pending.clone();
        let incoming = self.incoming.clone();
        let connected = self.connected.clone();

        // Receive task
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&text) {
                            handle_server_message(&local_user_id, &data, &pending, &incoming);
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => {
                        log::warn!("chat socket closed");
                        *connected.lock() = false;
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

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    /// Seed the chat view with prior messages before live events arrive.
    pub async fn load_history(&self) -> Result<Vec<ChatMessage>> {
        let resp = self
            .http
            .get(format!("{}/chat/history", self.config.http_url()))
            .query(&[
                ("userId", self.local.user_id.as_str()),
                ("userRole", self.local.role.as_str()),
                ("otherUserId", self.remote.user_id.as_str()),
                ("otherUserRole", self.remote.role.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "chat history returned {}",
                resp.status()
            )));
        }

        let rows: serde_json::Value = resp.json().await?;
        let messages = rows
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| parse_history_row(&self.local.user_id, row))
                    .collect()
            })
            .unwrap_or_default();

        Ok(messages)
    }

    /// Best-effort socket emit with an optimistic local echo. The returned
    /// message is `Pending` until [`poll_messages`](Self::poll_messages)
    /// yields its server confirmation.
    pub fn send_message(&self, content: MessageContent) -> Result<ChatMessage> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp_millis();

        let payload = json!({
            "type": "sendMessage",
            "payload": {
                "receiverId": self.remote.user_id,
                "receiverRole": self.remote.role.as_str(),
                "content": content.to_wire(),
                "clientId": client_id,
                "timestamp": timestamp,
            }
        });

        {
            let guard = self.ws_out.lock();
            let sender = guard
                .as_ref()
                .ok_or_else(|| Error::MessagingDelivery("chat socket not connected".into()))?;
            sender
                .send(payload.to_string())
                .map_err(|e| Error::MessagingDelivery(e.to_string()))?;
        }

        let message = ChatMessage {
            id: client_id.clone(),
            client_id: Some(client_id.clone()),
            sender_id: self.local.user_id.clone(),
            sender_role: self.local.role,
            content,
            timestamp,
            status: MessageStatus::Pending,
            is_outgoing: true,
        };
        self.pending.lock().insert(client_id, message.clone());

        Ok(message)
    }

    pub fn send_text(&self, text: &str) -> Result<ChatMessage> {
        self.send_message(MessageContent::text(text))
    }

    /// Originate a call session and announce it in the chat. The session is
    /// created (with retry) before anything is posted, so a failed creation
    /// never leaves a broken invite message behind. Returns the invite link.
    pub async fn start_call(&self) -> Result<String> {
        let session_id = format!("call-{}", chrono::Utc::now().timestamp_millis());
        let local_member = CallMember {
            user_id: self.local.user_id.clone(),
            role: self.local.role,
        };
        let metadata = json!({
            "participants": [self.local.user_id, self.remote.user_id],
        });

        let session = self
            .sessions
            .create_or_join_tagged(&session_id, &local_member, Some(metadata))
            .await?;

        let link = self.config.invite_link(&session.session_id);
        self.send_message(MessageContent::CallInvite {
            session_id: session.session_id,
            link: link.clone(),
        })?;

        Ok(link)
    }

    /// Drain messages received since the last poll: both messages from the
    /// other party and confirmations of our own optimistic sends.
    pub fn poll_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        let mut queue = self.incoming.lock();
        while let Some(msg) = queue.pop_front() {
            messages.push(msg);
        }
        messages
    }

    /// Outgoing messages still waiting for a server confirmation.
    pub fn unconfirmed(&self) -> Vec<ChatMessage> {
        self.pending.lock().values().cloned().collect()
    }

    /// Mark pending sends older than `max_age` as failed and hand them back
    /// so the UI can offer a resend.
    pub fn fail_unacknowledged(&self, max_age: Duration) -> Vec<ChatMessage> {
        let cutoff = chrono::Utc::now().timestamp_millis() - max_age.as_millis() as i64;
        let mut pending = self.pending.lock();

        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, msg)| msg.timestamp <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .map(|mut msg| {
                msg.status = MessageStatus::Failed;
                msg
            })
            .collect()
    }
}

/// Fold one socket frame into the pending map and the incoming queue.
fn handle_server_message(
    local_user_id: &str,
    data: &serde_json::Value,
    pending: &Mutex<HashMap<String, ChatMessage>>,
    incoming: &Mutex<VecDeque<ChatMessage>>,
) {
    if data["type"].as_str() != Some("receiveMessage") {
        return;
    }
    let Some(payload) = data.get("payload") else {
        return;
    };

    // Server echo of one of our own optimistic sends: confirm it.
    if let Some(client_id) = payload["clientId"].as_str() {
        if let Some(mut message) = pending.lock().remove(client_id) {
            if let Some(server_id) = payload["_id"].as_str() {
                message.id = server_id.to_string();
            }
            message.status = MessageStatus::Sent;
            incoming.lock().push_back(message);
            return;
        }
    }

    let sender_id = payload["senderId"].as_str().unwrap_or_default().to_string();
    let message = ChatMessage {
        id: payload["_id"]
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        client_id: None,
        is_outgoing: sender_id == local_user_id,
        sender_id,
        sender_role: MemberRole::parse(payload["senderRole"].as_str().unwrap_or(""))
            .unwrap_or(MemberRole::Student),
        content: MessageContent::from_wire(payload["content"].as_str().unwrap_or_default()),
        timestamp: payload["timestamp"]
            .as_i64()
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        status: MessageStatus::Sent,
    };
    incoming.lock().push_back(message);
}

fn parse_history_row(local_user_id: &str, row: &serde_json::Value) -> Option<ChatMessage> {
    let sender_id = row["senderId"].as_str()?.to_string();
    Some(ChatMessage {
        id: row["_id"].as_str().unwrap_or_default().to_string(),
        client_id: None,
        is_outgoing: sender_id == local_user_id,
        sender_id,
        sender_role: MemberRole::parse(row["senderRole"].as_str().unwrap_or(""))
            .unwrap_or(MemberRole::Student),
        content: MessageContent::from_wire(row["content"].as_str().unwrap_or_default()),
        timestamp: row["timestamp"].as_i64().unwrap_or_default(),
        status: MessageStatus::Sent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incoming_message_is_queued() {
        let pending = Mutex::new(HashMap::new());
        let incoming = Mutex::new(VecDeque::new());

        let frame = json!({
            "type": "receiveMessage",
            "payload": {
                "_id": "srv-1",
                "senderId": "mentor-7",
                "senderRole": "mentor",
                "content": "see you tomorrow",
                "timestamp": 1700000000000i64,
            }
        });
        handle_server_message("student-1", &frame, &pending, &incoming);

        let msg = incoming.lock().pop_front().expect("message queued");
        assert_eq!(msg.id, "srv-1");
        assert_eq!(msg.sender_role, MemberRole::Mentor);
        assert!(!msg.is_outgoing);
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.content, MessageContent::text("see you tomorrow"));
    }

    #[test]
    fn test_echo_confirms_pending_send() {
        let pending = Mutex::new(HashMap::new());
        let incoming = Mutex::new(VecDeque::new());

        pending.lock().insert(
            "cid-1".to_string(),
            ChatMessage {
                id: "cid-1".to_string(),
                client_id: Some("cid-1".to_string()),
                sender_id: "student-1".to_string(),
                sender_role: MemberRole::Student,
                content: MessageContent::text("hello"),
                timestamp: 1700000000000,
                status: MessageStatus::Pending,
                is_outgoing: true,
            },
        );

        let frame = json!({
            "type": "receiveMessage",
            "payload": {
                "_id": "srv-9",
                "clientId": "cid-1",
                "senderId": "student-1",
                "senderRole": "student",
                "content": "hello",
                "timestamp": 1700000000000i64,
            }
        });
        handle_server_message("student-1", &frame, &pending, &incoming);

        assert!(pending.lock().is_empty());
        let msg = incoming.lock().pop_front().expect("confirmation queued");
        assert_eq!(msg.id, "srv-9");
        assert_eq!(msg.client_id.as_deref(), Some("cid-1"));
        assert_eq!(msg.status, MessageStatus::Sent);
    }

    #[test]
    fn test_invite_message_parses_as_type_dispatch() {
        let pending = Mutex::new(HashMap::new());
        let incoming = Mutex::new(VecDeque::new());

        let invite_wire = MessageContent::CallInvite {
            session_id: "call-5".to_string(),
            link: "https://app.mentorlink.test/call/call-5".to_string(),
        }
        .to_wire();

        let frame = json!({
            "type": "receiveMessage",
            "payload": {
                "_id": "srv-2",
                "senderId": "mentor-7",
                "senderRole": "mentor",
                "content": invite_wire,
                "timestamp": 1700000000000i64,
            }
        });
        handle_server_message("student-1", &frame, &pending, &incoming);

        let msg = incoming.lock().pop_front().expect("invite queued");
        assert!(msg.content.is_call_invite());
    }

    #[test]
    fn test_unrelated_frames_are_ignored() {
        let pending = Mutex::new(HashMap::new());
        let incoming = Mutex::new(VecDeque::new());

        handle_server_message(
            "student-1",
            &json!({ "type": "typing", "payload": {} }),
            &pending,
            &incoming,
        );

        assert!(incoming.lock().is_empty());
    }

    #[test]
    fn test_history_row_parsing() {
        let row = json!({
            "_id": "srv-3",
            "senderId": "student-1",
            "senderRole": "student",
            "content": "https://app.mentorlink.test/call/call-11",
            "timestamp": 1700000000000i64,
        });

        let msg = parse_history_row("student-1", &row).expect("row parses");
        assert!(msg.is_outgoing);
        assert!(msg.content.is_call_invite());
        assert_eq!(msg.status, MessageStatus::Sent);
    }
}
