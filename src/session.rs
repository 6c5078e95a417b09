//! Call-session lifecycle controller

use crate::error::Result;
use crate::models::{CallMember, CallSession, CallState, MediaConfig};
use crate::retry::RetryPolicy;
use crate::signaling::{SignalingBackend, SignalingEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Local device enablement flags, tracked separately from the session so a
/// failed toggle can mark a device off without touching call state.
#[derive(Debug, Clone, Copy, Default)]
struct LocalMedia {
    microphone: bool,
    camera: bool,
}

/// Drives one call through `Idle → Joining → Joined → Left`, with `Invalid`
/// as the terminal state for a call the user never made it into.
///
/// Session creation and join run under the bounded retry policy; a
/// `SessionInvalid` classification bypasses the retry loop entirely.
pub struct CallSessionController {
    backend: Arc<dyn SignalingBackend>,
    retry: RetryPolicy,
    state_tx: Arc<watch::Sender<CallState>>,
    session: Mutex<Option<CallSession>>,
    local: Mutex<Option<CallMember>>,
    media: Mutex<LocalMedia>,
}

impl CallSessionController {
    pub fn new(backend: Arc<dyn SignalingBackend>) -> Self {
        Self::with_retry_policy(backend, RetryPolicy::session_default())
    }

    pub fn with_retry_policy(backend: Arc<dyn SignalingBackend>, retry: RetryPolicy) -> Self {
        let (state_tx, _) = watch::channel(CallState::Idle);
        Self {
            backend,
            retry,
            state_tx: Arc::new(state_tx),
            session: Mutex::new(None),
            local: Mutex::new(None),
            media: Mutex::new(LocalMedia::default()),
        }
    }

    pub fn state(&self) -> CallState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    pub fn current_session(&self) -> Option<CallSession> {
        self.session.lock().clone()
    }

    pub fn local_member(&self) -> Option<CallMember> {
        self.local.lock().clone()
    }

    pub fn microphone_enabled(&self) -> bool {
        self.media.lock().microphone
    }

    pub fn camera_enabled(&self) -> bool {
        self.media.lock().camera
    }

    pub fn backend(&self) -> Arc<dyn SignalingBackend> {
        self.backend.clone()
    }

    /// Idempotent get-or-create against the signaling backend, retried per
    /// the bounded policy. On success the resolved session is the only valid
    /// input to [`join`](Self::join).
    pub async fn create_or_join(
        &self,
        session_id: &str,
        local_member: &CallMember,
    ) -> Result<CallSession> {
        self.create_or_join_tagged(session_id, local_member, None)
            .await
    }

    /// Get-or-create with caller-supplied metadata attached to the session
    /// (e.g. both parties of a chat-originated call).
    pub async fn create_or_join_tagged(
        &self,
        session_id: &str,
        local_member: &CallMember,
        metadata: Option<serde_json::Value>,
    ) -> Result<CallSession> {
        self.state_tx.send_replace(CallState::Joining);

        let result = self
            .retry
            .run("session get-or-create", || {
                self.backend
                    .get_or_create_session(session_id, local_member, metadata.clone())
            })
            .await;

        match result {
            Ok(session) => {
                *self.session.lock() = Some(session.clone());
                *self.local.lock() = Some(local_member.clone());
                Ok(session)
            }
            Err(err) => {
                self.state_tx.send_replace(CallState::Invalid);
                Err(err)
            }
        }
    }

    /// Attach local media and confirm membership. Requires the concrete
    /// session resolved by [`create_or_join`](Self::create_or_join), so a
    /// join without a resolved handle is unrepresentable.
    ///
    /// A "not found" rejection surfaces immediately as `SessionInvalid`; any
    /// other failure participates in the same bounded retry band as creation.
    pub async fn join(&self, session: &CallSession, media: MediaConfig) -> Result<()> {
        // Subscribe before the join is issued: a teardown raced during the
        // join await must still be observed.
        let events = self.backend.subscribe();

        let result = self
            .retry
            .run("session join", || {
                self.backend.join_session(&session.session_id, &media)
            })
            .await;

        match result {
            Ok(()) => {
                {
                    let mut flags = self.media.lock();
                    flags.microphone = media.microphone.is_enabled();
                    flags.camera = media.camera.is_enabled();
                }
                self.state_tx.send_replace(CallState::Joined);
                self.watch_remote_end(session.session_id.clone(), events);
                Ok(())
            }
            Err(err) => {
                self.state_tx.send_replace(CallState::Invalid);
                Err(err)
            }
        }
    }

    /// Release local media and transition to `Left`. Idempotent: a no-op
    /// unless currently joined.
    pub async fn leave(&self) {
        if self.state() != CallState::Joined {
            return;
        }

        let session_id = self.session.lock().as_ref().map(|s| s.session_id.clone());
        if let Some(id) = session_id {
            if let Err(err) = self.backend.leave_session(&id).await {
                log::warn!("leave for session {} failed: {}", id, err);
            }
        }

        *self.media.lock() = LocalMedia::default();
        self.state_tx.send_replace(CallState::Left);
    }

    /// Flip local microphone enablement. A device failure must not crash the
    /// call UI: it is logged, the flag is forced off, and the call stays
    /// joined. Returns the effective enabled state.
    pub async fn toggle_microphone(&self) -> bool {
        let Some(session_id) = self.joined_session_id() else {
            return false;
        };
        let target = !self.media.lock().microphone;

        match self.backend.set_microphone(&session_id, target).await {
            Ok(()) => {
                self.media.lock().microphone = target;
                target
            }
            Err(err) => {
                log::warn!("microphone toggle failed: {}", err);
                self.media.lock().microphone = false;
                false
            }
        }
    }

    /// Flip local camera enablement; same resilience contract as the
    /// microphone toggle, and independent of it.
    pub async fn toggle_camera(&self) -> bool {
        let Some(session_id) = self.joined_session_id() else {
            return false;
        };
        let target = !self.media.lock().camera;

        match self.backend.set_camera(&session_id, target).await {
            Ok(()) => {
                self.media.lock().camera = target;
                target
            }
            Err(err) => {
                log::warn!("camera toggle failed: {}", err);
                self.media.lock().camera = false;
                false
            }
        }
    }

    fn joined_session_id(&self) -> Option<String> {
        if self.state() != CallState::Joined {
            return None;
        }
        self.session.lock().as_ref().map(|s| s.session_id.clone())
    }

    /// The backend tearing the session down mid-call counts as a hangup.
    /// `events` must have been subscribed before the join was issued.
    fn watch_remote_end(
        &self,
        session_id: String,
        mut events: broadcast::Receiver<SignalingEvent>,
    ) {
        let state_tx = self.state_tx.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SignalingEvent::SessionEnded { session_id: ended }) if ended == session_id => {
                        if *state_tx.borrow() == CallState::Joined {
                            state_tx.send_replace(CallState::Left);
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("signaling event stream lagged by {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
