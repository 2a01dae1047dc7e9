//! Session status state machine.
//!
//! ```text
//!   ongoing --CheckOut--> proposed --Validate--> validated --Release--> paid
//!                            |
//!                            +------Refuse-----> refused
//! ```
//! `disputed` is terminal and only ever set by hand. No transition leaves
//! `paid`, `refused` or `disputed`.
//!
//! [`transition`] is the only place legality is decided; persistence applies
//! the result through a guarded update keyed on the `from` status.

pub use sp_db::SessionStatus;

/// The engine operations that move a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    CheckOut,
    Validate,
    Refuse,
    Release,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::CheckOut => "check_out",
            SessionAction::Validate => "validate",
            SessionAction::Refuse => "refuse",
            SessionAction::Release => "release",
        }
    }
}

/// `action` is not legal from `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SessionStatus,
    pub action: SessionAction,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot {} a session that is {}",
            self.action.as_str(),
            self.from.as_str()
        )
    }
}

impl std::error::Error for TransitionError {}

/// Target status of `action` applied to `from`.
pub fn transition(from: SessionStatus, action: SessionAction) -> Result<SessionStatus, TransitionError> {
    use SessionAction as A;
    use SessionStatus as S;

    match (from, action) {
        (S::Ongoing, A::CheckOut) => Ok(S::Proposed),
        (S::Proposed, A::Validate) => Ok(S::Validated),
        (S::Proposed, A::Refuse) => Ok(S::Refused),
        (S::Validated, A::Release) => Ok(S::Paid),
        _ => Err(TransitionError { from, action }),
    }
}

/// The status an action must start from.
pub fn required_status(action: SessionAction) -> SessionStatus {
    match action {
        SessionAction::CheckOut => SessionStatus::Ongoing,
        SessionAction::Validate | SessionAction::Refuse => SessionStatus::Proposed,
        SessionAction::Release => SessionStatus::Validated,
    }
}

pub fn is_terminal(status: SessionStatus) -> bool {
    matches!(
        status,
        SessionStatus::Paid | SessionStatus::Refused | SessionStatus::Disputed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIONS: [SessionAction; 4] = [
        SessionAction::CheckOut,
        SessionAction::Validate,
        SessionAction::Refuse,
        SessionAction::Release,
    ];

    #[test]
    fn legal_transitions() {
        assert_eq!(
            transition(SessionStatus::Proposed, SessionAction::Validate),
            Ok(SessionStatus::Validated)
        );
        assert_eq!(
            transition(SessionStatus::Proposed, SessionAction::Refuse),
            Ok(SessionStatus::Refused)
        );
        assert_eq!(
            transition(SessionStatus::Validated, SessionAction::Release),
            Ok(SessionStatus::Paid)
        );
        assert_eq!(
            transition(SessionStatus::Ongoing, SessionAction::CheckOut),
            Ok(SessionStatus::Proposed)
        );
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for s in SessionStatus::ALL.into_iter().filter(|s| is_terminal(*s)) {
            for a in ACTIONS {
                assert!(transition(s, a).is_err(), "{s} must reject {}", a.as_str());
            }
        }
    }

    #[test]
    fn release_from_proposed_is_rejected() {
        let err = transition(SessionStatus::Proposed, SessionAction::Release).unwrap_err();
        assert_eq!(err.from, SessionStatus::Proposed);
        assert_eq!(err.to_string(), "cannot release a session that is proposed");
    }

    #[test]
    fn required_status_agrees_with_table() {
        for a in ACTIONS {
            assert!(transition(required_status(a), a).is_ok());
        }
    }

    #[test]
    fn no_transition_goes_backwards_to_ongoing() {
        for s in SessionStatus::ALL {
            for a in ACTIONS {
                if let Ok(next) = transition(s, a) {
                    assert_ne!(next, SessionStatus::Ongoing);
                }
            }
        }
    }
}
