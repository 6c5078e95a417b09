//! MentorLink Call Core
//!
//! Session-coordination layer for the mentoring platform's real-time call and
//! chat features: token acquisition, the shared signaling-client handle,
//! call-session lifecycle with bounded retry, UI-state projection,
//! incoming-call notification, and the chat bridge that originates calls as
//! clickable invites.

pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod notifier;
pub mod projection;
pub mod registry;
pub mod retry;
pub mod session;
pub mod signaling;
pub mod token;

use std::sync::Arc;

pub use chat::ChatSessionBridge;
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use models::*;
pub use notifier::IncomingCallNotifier;
pub use projection::{CallUiState, CallUiStateProjector};
pub use registry::{CallClientHandle, CallClientRegistry, ClientBinding};
pub use retry::RetryPolicy;
pub use session::CallSessionController;
pub use signaling::{HttpSignalingBackend, SignalingBackend, SignalingEvent};
pub use token::SignalingTokenFetcher;

/// Workspace-level entry point, mounted once per authenticated session.
///
/// Construction enforces the initialization order: the token is fetched
/// before the client handle exists, and the event channel is connected before
/// any session operation can run.
pub struct MentorCallClient {
    config: ClientConfig,
    handle: Arc<CallClientHandle>,
}

impl MentorCallClient {
    pub async fn connect(config: ClientConfig, identity: Identity) -> Result<Self> {
        let fetcher = SignalingTokenFetcher::new(&config);
        let token = fetcher
            .fetch_token(&identity.user_id, &identity.display_name)
            .await?;

        let binding = ClientBinding {
            api_key: config.api_key.clone(),
            identity,
            token,
        };
        let handle = CallClientRegistry::global().get_or_create(&config, binding);
        handle.backend().connect_events().await?;

        Ok(Self { config, handle })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        self.handle.identity()
    }

    /// Controller for one call screen. Each screen gets its own controller;
    /// they all share the one underlying connection.
    pub fn sessions(&self) -> CallSessionController {
        CallSessionController::new(self.handle.backend())
    }

    /// Incoming-call slot for whichever view is currently mounted.
    pub fn incoming_calls(&self) -> IncomingCallNotifier {
        IncomingCallNotifier::subscribe(self.handle.subscribe())
    }

    /// Open the messaging channel for a mentor/student pair.
    pub async fn open_chat(
        &self,
        local_role: MemberRole,
        remote: ChatIdentity,
    ) -> Result<ChatSessionBridge> {
        let local = ChatIdentity {
            user_id: self.handle.identity().user_id.clone(),
            role: local_role,
        };
        ChatSessionBridge::connect(&self.config, local, remote, Arc::new(self.sessions())).await
    }
}
