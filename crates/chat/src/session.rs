use parley_llm::StreamTarget;

/// Lifecycle of one send-and-receive cycle.
///
/// `Completed` and `Failed` are resting states: like `Idle`, they admit a new `Start`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Request issued, no fragment seen yet.
    Sending(StreamTarget),
    Streaming(StreamTarget),
    Completed(StreamTarget),
    Failed {
        target: StreamTarget,
        message: String,
    },
}

/// State transition input for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    Start(StreamTarget),
    /// A fragment arrived.
    Receive(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    ResetToIdle,
}

/// Rejection reason for illegal session transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransitionRejection {
    AlreadyInFlight {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveSession,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type SessionTransitionResult = Result<SessionState, SessionTransitionRejection>;

impl SessionState {
    /// Returns the in-flight target while `Sending` or `Streaming`.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Sending(target) | Self::Streaming(target) => Some(*target),
            Self::Idle | Self::Completed(_) | Self::Failed { .. } => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.active_target().is_some()
    }

    /// Returns true when an incoming event belongs to the in-flight session.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Applies one transition deterministically.
    ///
    /// Terminal transitions and `Receive` must name the in-flight session exactly.
    pub fn apply(&self, transition: SessionTransition) -> SessionTransitionResult {
        match transition {
            SessionTransition::Start(target) => self.apply_start(target),
            SessionTransition::Receive(target) => self.apply_receive(target),
            SessionTransition::Complete(target) => self.apply_complete(target),
            SessionTransition::Fail { target, message } => self.apply_fail(target, message),
            SessionTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn require_active(&self, target: StreamTarget) -> Result<(), SessionTransitionRejection> {
        match self.active_target() {
            Some(active) if active == target => Ok(()),
            Some(active) => Err(SessionTransitionRejection::SessionMismatch {
                active,
                attempted: target,
            }),
            None => Err(SessionTransitionRejection::NoActiveSession),
        }
    }

    fn apply_start(&self, target: StreamTarget) -> SessionTransitionResult {
        match self.active_target() {
            Some(active) => Err(SessionTransitionRejection::AlreadyInFlight {
                active,
                attempted: target,
            }),
            None => Ok(Self::Sending(target)),
        }
    }

    fn apply_receive(&self, target: StreamTarget) -> SessionTransitionResult {
        self.require_active(target)?;
        Ok(Self::Streaming(target))
    }

    fn apply_complete(&self, target: StreamTarget) -> SessionTransitionResult {
        self.require_active(target)?;
        Ok(Self::Completed(target))
    }

    fn apply_fail(&self, target: StreamTarget, message: String) -> SessionTransitionResult {
        self.require_active(target)?;
        Ok(Self::Failed { target, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_llm::SessionId;

    fn target(raw: u64) -> StreamTarget {
        StreamTarget::new(SessionId::new(raw))
    }

    #[test]
    fn happy_path_walks_sending_streaming_completed() {
        let state = SessionState::Idle
            .apply(SessionTransition::Start(target(1)))
            .expect("start");
        assert_eq!(state, SessionState::Sending(target(1)));

        let state = state
            .apply(SessionTransition::Receive(target(1)))
            .expect("receive");
        assert_eq!(state, SessionState::Streaming(target(1)));

        let state = state
            .apply(SessionTransition::Receive(target(1)))
            .expect("receive again");
        let state = state
            .apply(SessionTransition::Complete(target(1)))
            .expect("complete");
        assert_eq!(state, SessionState::Completed(target(1)));
        assert!(!state.is_in_flight());
    }

    #[test]
    fn failure_is_allowed_before_first_fragment() {
        let state = SessionState::Sending(target(3))
            .apply(SessionTransition::Fail {
                target: target(3),
                message: "refused".to_string(),
            })
            .expect("fail");

        assert_eq!(
            state,
            SessionState::Failed {
                target: target(3),
                message: "refused".to_string()
            }
        );
    }

    #[test]
    fn start_is_rejected_while_in_flight() {
        let rejection = SessionState::Streaming(target(1))
            .apply(SessionTransition::Start(target(2)))
            .expect_err("second start");

        assert_eq!(
            rejection,
            SessionTransitionRejection::AlreadyInFlight {
                active: target(1),
                attempted: target(2)
            }
        );
    }

    #[test]
    fn resting_states_admit_a_new_start() {
        let resting = [
            SessionState::Idle,
            SessionState::Completed(target(1)),
            SessionState::Failed {
                target: target(1),
                message: "x".to_string(),
            },
        ];

        for state in resting {
            assert_eq!(
                state.apply(SessionTransition::Start(target(2))),
                Ok(SessionState::Sending(target(2)))
            );
        }
    }

    #[test]
    fn events_for_other_sessions_are_rejected() {
        let state = SessionState::Streaming(target(4));

        assert!(state.accepts_stream_event(target(4)));
        assert!(!state.accepts_stream_event(target(3)));
        assert_eq!(
            state.apply(SessionTransition::Complete(target(3))),
            Err(SessionTransitionRejection::SessionMismatch {
                active: target(4),
                attempted: target(3)
            })
        );
        assert_eq!(
            SessionState::Idle.apply(SessionTransition::Receive(target(4))),
            Err(SessionTransitionRejection::NoActiveSession)
        );
    }

    #[test]
    fn reset_to_idle_always_succeeds() {
        assert_eq!(
            SessionState::Streaming(target(1)).apply(SessionTransition::ResetToIdle),
            Ok(SessionState::Idle)
        );
    }
}
