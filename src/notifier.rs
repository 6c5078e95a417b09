//! Incoming-call notification slot

use crate::models::IncomingCallEvent;
use crate::signaling::SignalingEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Republishes the latest incoming-call event to whichever UI is mounted.
///
/// Deliberately a slot, not a queue: a user can only meaningfully respond to
/// one incoming call, so an unconsumed notification is silently superseded by
/// a newer one (last-write-wins).
pub struct IncomingCallNotifier {
    slot: Arc<Mutex<Option<IncomingCallEvent>>>,
}

impl IncomingCallNotifier {
    /// Subscribe once to the shared client's event stream.
    pub fn subscribe(mut events: broadcast::Receiver<SignalingEvent>) -> Self {
        let slot = Arc::new(Mutex::new(None));
        // The listener holds only a weak reference: dropping the notifier
        // drops the slot, and the task exits on its next wakeup.
        let sink = Arc::downgrade(&slot);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SignalingEvent::IncomingCall { call }) => {
                        let Some(slot) = sink.upgrade() else { break };
                        *slot.lock() = Some(IncomingCallEvent { call });
                    }
                    Ok(_) => {
                        if sink.strong_count() == 0 {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("incoming-call stream lagged by {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { slot }
    }

    /// Read the pending notification without consuming it.
    pub fn incoming_call(&self) -> Option<IncomingCallEvent> {
        self.slot.lock().clone()
    }

    /// Consume the pending notification.
    pub fn take_incoming_call(&self) -> Option<IncomingCallEvent> {
        self.slot.lock().take()
    }

    pub fn set_incoming_call(&self, event: IncomingCallEvent) {
        *self.slot.lock() = Some(event);
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
