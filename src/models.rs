//! Data models for the MentorLink call core

use serde::{Deserialize, Serialize};
use url::Url;

// ============================================================================
// Identity
// ============================================================================

/// Authenticated user identity, immutable for the lifetime of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Student,
    Mentor,
    Admin,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Student => "student",
            MemberRole::Mentor => "mentor",
            MemberRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(MemberRole::Student),
            "mentor" => Some(MemberRole::Mentor),
            "admin" => Some(MemberRole::Admin),
            _ => None,
        }
    }
}

/// A user bound to a messaging channel: the channel is keyed by id and role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIdentity {
    pub user_id: String,
    pub role: MemberRole,
}

// ============================================================================
// Signaling token
// ============================================================================

/// Opaque credential for the calling backend, fetched per identity and never
/// cached across identities. Carries no expiry; see the token-refresh note in
/// DESIGN.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingToken {
    pub value: String,
    pub subject_user_id: String,
}

// ============================================================================
// Call session
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMember {
    pub user_id: String,
    pub role: MemberRole,
}

/// Call-session lifecycle.
///
/// `Joining` is entered on the first join attempt and may loop on itself up
/// to the retry bound. `Invalid` is terminal and distinct from `Left`: the
/// user never made it into the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Joining,
    Joined,
    Left,
    Invalid,
}

impl Default for CallState {
    fn default() -> Self {
        Self::Idle
    }
}

/// A named, shareable room tracked by the signaling backend.
///
/// `session_id` is caller-supplied and unique per logical call. Get-or-create
/// on an existing id resolves to the same session; the backend destroys the
/// session implicitly once all members leave.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    pub session_id: String,
    pub kind: String,
    pub members: Vec<CallMember>,
    pub state: CallState,
}

// ============================================================================
// Media
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaToggle {
    Enabled,
    Disabled,
}

impl MediaToggle {
    pub fn is_enabled(&self) -> bool {
        matches!(self, MediaToggle::Enabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConfig {
    pub microphone: MediaToggle,
    pub camera: MediaToggle,
}

// ============================================================================
// Chat messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

/// Chat message body as a tagged variant instead of bare text, so invite
/// rendering is a type dispatch rather than string sniffing. Legacy messages
/// that are exactly an invite deep link still parse as `CallInvite`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    CallInvite {
        #[serde(rename = "sessionId")]
        session_id: String,
        link: String,
    },
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        MessageContent::Text { body: body.into() }
    }

    /// Wire form: plain text stays plain so older clients render it as-is;
    /// invites go out as the tagged JSON object.
    pub fn to_wire(&self) -> String {
        match self {
            MessageContent::Text { body } => body.clone(),
            invite => serde_json::to_string(invite).unwrap_or_default(),
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        if let Ok(content) = serde_json::from_str::<MessageContent>(raw) {
            return content;
        }
        if let Some(session_id) = invite_session_id(raw) {
            return MessageContent::CallInvite {
                session_id,
                link: raw.trim().to_string(),
            };
        }
        MessageContent::Text {
            body: raw.to_string(),
        }
    }

    pub fn is_call_invite(&self) -> bool {
        matches!(self, MessageContent::CallInvite { .. })
    }
}

/// Recognize a bare invite deep link: a single http(s) URL whose last two
/// path segments are `call/<session-id>`.
fn invite_session_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return None;
    }
    let url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    match segments.as_slice() {
        [.., "call", id] if !id.is_empty() => Some((*id).to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Client-generated correlation id for optimistic sends; carried on the
    /// server echo so a pending message can be replaced by its confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub sender_id: String,
    pub sender_role: MemberRole,
    pub content: MessageContent,
    pub timestamp: i64,
    pub status: MessageStatus,
    pub is_outgoing: bool,
}

// ============================================================================
// Incoming call
// ============================================================================

/// Transient notification; consumed at most once by whichever UI is mounted
/// and listening. Never persisted.
#[derive(Debug, Clone)]
pub struct IncomingCallEvent {
    pub call: CallSession,
}
