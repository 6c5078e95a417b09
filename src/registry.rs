//! Process-wide registry for the shared call-client handle

use crate::config::ClientConfig;
use crate::models::{Identity, SignalingToken};
use crate::signaling::{HttpSignalingBackend, SignalingBackend, SignalingEvent};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;

/// Everything a client handle is bound to at construction time.
#[derive(Debug, Clone)]
pub struct ClientBinding {
    pub api_key: String,
    pub identity: Identity,
    pub token: SignalingToken,
}

/// The one shared connection to the signaling backend. Construction happens
/// at most once per registry; every other component only reads from it.
pub struct CallClientHandle {
    binding: ClientBinding,
    backend: Arc<dyn SignalingBackend>,
}

impl CallClientHandle {
    pub fn identity(&self) -> &Identity {
        &self.binding.identity
    }

    pub fn token(&self) -> &SignalingToken {
        &self.binding.token
    }

    pub fn backend(&self) -> Arc<dyn SignalingBackend> {
        self.backend.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.backend.subscribe()
    }
}

/// Keeps a single `CallClientHandle` per registry (one registry per process
/// via [`CallClientRegistry::global`]).
///
/// A second `get_or_create` returns the existing handle unconditionally and
/// ignores its arguments: the platform assumes one active identity per
/// process, and a second login without a full reload keeps using the first
/// identity's connection. That behavior is intentional and pinned by a test;
/// a deliberate rebind must go through [`release`](Self::release) first.
pub struct CallClientRegistry {
    slot: Mutex<Option<Arc<CallClientHandle>>>,
}

impl Default for CallClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallClientRegistry {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn global() -> &'static CallClientRegistry {
        static GLOBAL: OnceLock<CallClientRegistry> = OnceLock::new();
        GLOBAL.get_or_init(CallClientRegistry::new)
    }

    /// Get the shared handle, constructing it on first use. The construction
    /// side effect includes binding the ICE configuration from `config`.
    /// The mutex makes construct-once hold on a multi-threaded host.
    pub fn get_or_create(
        &self,
        config: &ClientConfig,
        binding: ClientBinding,
    ) -> Arc<CallClientHandle> {
        let mut slot = self.slot.lock();
        if let Some(handle) = slot.as_ref() {
            log::debug!(
                "reusing call client bound to {} (requested {})",
                handle.binding.identity.user_id,
                binding.identity.user_id
            );
            return handle.clone();
        }

        let backend = Arc::new(HttpSignalingBackend::new(
            config,
            binding.identity.clone(),
            &binding.token.value,
        ));
        let handle = Arc::new(CallClientHandle {
            binding,
            backend,
        });
        *slot = Some(handle.clone());
        handle
    }

    /// Same construct-once semantics with an externally supplied backend.
    /// Seam for hosts that bring their own transport, and for tests.
    pub fn get_or_create_with(
        &self,
        binding: ClientBinding,
        backend: Arc<dyn SignalingBackend>,
    ) -> Arc<CallClientHandle> {
        let mut slot = self.slot.lock();
        if let Some(handle) = slot.as_ref() {
            return handle.clone();
        }
        let handle = Arc::new(CallClientHandle { binding, backend });
        *slot = Some(handle.clone());
        handle
    }

    pub fn current(&self) -> Option<Arc<CallClientHandle>> {
        self.slot.lock().clone()
    }

    /// Drop the bound handle so the next `get_or_create` constructs a fresh
    /// one. The only sanctioned way to rebind identity in-process.
    pub fn release(&self) -> Option<Arc<CallClientHandle>> {
        self.slot.lock().take()
    }
}
