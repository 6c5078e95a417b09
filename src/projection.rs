//! Read-only projection of a live call session for rendering

use crate::models::{CallMember, CallSession, CallState};
use crate::session::CallSessionController;
use crate::signaling::SignalingEvent;
use tokio::sync::{broadcast, watch};

/// Presentation snapshot derived from the controller state and the backend
/// event stream. Purely a projection; it holds no state of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct CallUiState {
    pub calling_state: CallState,
    pub participant_count: usize,
    pub local_participant: Option<CallMember>,
    pub remote_participants: Vec<CallMember>,
}

struct Fold {
    session_id: String,
    calling_state: CallState,
    local: Option<CallMember>,
    local_present: bool,
    remotes: Vec<CallMember>,
}

impl Fold {
    fn seed(session: &CallSession, local: Option<CallMember>, state: CallState) -> Self {
        let mut fold = Self {
            session_id: session.session_id.clone(),
            calling_state: state,
            local,
            local_present: false,
            remotes: Vec::new(),
        };
        for member in &session.members {
            fold.add_member(member.clone());
        }
        fold
    }

    fn add_member(&mut self, member: CallMember) {
        if self
            .local
            .as_ref()
            .is_some_and(|l| l.user_id == member.user_id)
        {
            self.local_present = true;
            return;
        }
        if !self.remotes.iter().any(|m| m.user_id == member.user_id) {
            self.remotes.push(member);
        }
    }

    fn apply_state(&mut self, state: CallState) {
        self.calling_state = state;
        if matches!(state, CallState::Left | CallState::Invalid) {
            // Torn-down session must not retain stale membership.
            self.local_present = false;
            self.remotes.clear();
        }
    }

    fn apply_event(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::ParticipantJoined { session_id, member }
                if session_id == self.session_id =>
            {
                self.add_member(member);
            }
            SignalingEvent::ParticipantLeft {
                session_id,
                user_id,
            } if session_id == self.session_id => {
                if self
                    .local
                    .as_ref()
                    .is_some_and(|l| l.user_id == user_id)
                {
                    self.local_present = false;
                } else {
                    self.remotes.retain(|m| m.user_id != user_id);
                }
            }
            SignalingEvent::SessionEnded { session_id } if session_id == self.session_id => {
                self.local_present = false;
                self.remotes.clear();
            }
            _ => {}
        }
    }

    fn snapshot(&self) -> CallUiState {
        CallUiState {
            calling_state: self.calling_state,
            participant_count: self.remotes.len() + usize::from(self.local_present),
            local_participant: if self.local_present {
                self.local.clone()
            } else {
                None
            },
            remote_participants: self.remotes.clone(),
        }
    }
}

/// Continuously-updated view over a session: membership changes apply as
/// backend events arrive, no reload required.
pub struct CallUiStateProjector {
    rx: watch::Receiver<CallUiState>,
}

impl CallUiStateProjector {
    pub fn attach(controller: &CallSessionController, session: &CallSession) -> Self {
        Self::from_parts(
            session,
            controller.local_member(),
            controller.watch_state(),
            controller.backend().subscribe(),
        )
    }

    pub fn from_parts(
        session: &CallSession,
        local: Option<CallMember>,
        mut state_rx: watch::Receiver<CallState>,
        mut events: broadcast::Receiver<SignalingEvent>,
    ) -> Self {
        let mut fold = Fold::seed(session, local, *state_rx.borrow());
        let (tx, rx) = watch::channel(fold.snapshot());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = state_rx.changed() => match changed {
                        Ok(()) => {
                            let state = *state_rx.borrow();
                            fold.apply_state(state);
                            if tx.send(fold.snapshot()).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                    event = events.recv() => match event {
                        Ok(event) => {
                            fold.apply_event(event);
                            if tx.send(fold.snapshot()).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::debug!("projection lagged by {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Self { rx }
    }

    pub fn state(&self) -> CallUiState {
        self.rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CallUiState> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberRole;
    use std::time::Duration;

    fn member(user_id: &str, role: MemberRole) -> CallMember {
        CallMember {
            user_id: user_id.to_string(),
            role,
        }
    }

    fn session(id: &str, members: Vec<CallMember>) -> CallSession {
        CallSession {
            session_id: id.to_string(),
            kind: "default".to_string(),
            members,
            state: CallState::Idle,
        }
    }

    async fn wait_for<F>(projector: &CallUiStateProjector, mut cond: F) -> CallUiState
    where
        F: FnMut(&CallUiState) -> bool,
    {
        let mut rx = projector.watch();
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                {
                    let snapshot = rx.borrow_and_update().clone();
                    if cond(&snapshot) {
                        return snapshot;
                    }
                }
                rx.changed().await.expect("projection task ended");
            }
        })
        .await
        .expect("condition never reached")
    }

    #[tokio::test]
    async fn test_membership_changes_apply_as_events_arrive() {
        let local = member("u1", MemberRole::Student);
        let (state_tx, state_rx) = watch::channel(CallState::Joined);
        let (events_tx, events_rx) = broadcast::channel(16);

        let projector = CallUiStateProjector::from_parts(
            &session("call-1", vec![local.clone()]),
            Some(local.clone()),
            state_rx,
            events_rx,
        );

        let initial = projector.state();
        assert_eq!(initial.participant_count, 1);
        assert_eq!(initial.local_participant, Some(local.clone()));
        assert!(initial.remote_participants.is_empty());

        events_tx
            .send(SignalingEvent::ParticipantJoined {
                session_id: "call-1".to_string(),
                member: member("u2", MemberRole::Mentor),
            })
            .unwrap();
        let snapshot = wait_for(&projector, |s| s.participant_count == 2).await;
        assert_eq!(snapshot.remote_participants.len(), 1);

        // Duplicate join event must not duplicate the member.
        events_tx
            .send(SignalingEvent::ParticipantJoined {
                session_id: "call-1".to_string(),
                member: member("u2", MemberRole::Mentor),
            })
            .unwrap();
        events_tx
            .send(SignalingEvent::ParticipantLeft {
                session_id: "call-1".to_string(),
                user_id: "u2".to_string(),
            })
            .unwrap();
        let snapshot = wait_for(&projector, |s| s.participant_count == 1).await;
        assert!(snapshot.remote_participants.is_empty());

        drop(state_tx);
    }

    #[tokio::test]
    async fn test_teardown_resets_instead_of_retaining_stale_members() {
        let local = member("u1", MemberRole::Student);
        let remote = member("u2", MemberRole::Mentor);
        let (state_tx, state_rx) = watch::channel(CallState::Joined);
        let (events_tx, events_rx) = broadcast::channel(16);

        let projector = CallUiStateProjector::from_parts(
            &session("call-1", vec![local.clone(), remote]),
            Some(local),
            state_rx,
            events_rx,
        );
        assert_eq!(projector.state().participant_count, 2);

        events_tx
            .send(SignalingEvent::SessionEnded {
                session_id: "call-1".to_string(),
            })
            .unwrap();
        let snapshot = wait_for(&projector, |s| s.participant_count == 0).await;
        assert!(snapshot.remote_participants.is_empty());
        assert!(snapshot.local_participant.is_none());

        drop(state_tx);
    }

    #[tokio::test]
    async fn test_events_for_other_sessions_are_ignored() {
        let local = member("u1", MemberRole::Student);
        let (state_tx, state_rx) = watch::channel(CallState::Joined);
        let (events_tx, events_rx) = broadcast::channel(16);

        let projector = CallUiStateProjector::from_parts(
            &session("call-1", vec![local.clone()]),
            Some(local),
            state_rx,
            events_rx,
        );

        events_tx
            .send(SignalingEvent::ParticipantJoined {
                session_id: "call-other".to_string(),
                member: member("u9", MemberRole::Admin),
            })
            .unwrap();
        events_tx
            .send(SignalingEvent::ParticipantJoined {
                session_id: "call-1".to_string(),
                member: member("u2", MemberRole::Mentor),
            })
            .unwrap();

        let snapshot = wait_for(&projector, |s| s.participant_count == 2).await;
        assert_eq!(snapshot.remote_participants.len(), 1);
        assert_eq!(snapshot.remote_participants[0].user_id, "u2");

        drop(state_tx);
    }

    #[tokio::test]
    async fn test_left_state_empties_the_projection() {
        let local = member("u1", MemberRole::Student);
        let (state_tx, state_rx) = watch::channel(CallState::Joined);
        let (_events_tx, events_rx) = broadcast::channel::<SignalingEvent>(16);

        let projector = CallUiStateProjector::from_parts(
            &session("call-1", vec![local.clone()]),
            Some(local),
            state_rx,
            events_rx,
        );
        assert_eq!(projector.state().participant_count, 1);

        state_tx.send(CallState::Left).unwrap();
        let snapshot = wait_for(&projector, |s| s.calling_state == CallState::Left).await;
        assert_eq!(snapshot.participant_count, 0);
    }
}
