use thiserror::Error;

use super::session::SessionKey;

/// Errors raised by the scheduler.
///
/// The first group is caused by the user and is reported back to them
/// privately. `MalformedMessage` and `InternalInconsistency` mean the message
/// text and the in-memory slots no longer agree; those are logged in full and
/// only surfaced as a generic failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("A session already exists for {key}")]
    SessionExists { key: SessionKey },

    #[error("No session exists for {key}")]
    SessionNotFound { key: SessionKey },

    #[error("Slot {slot} for {date} at {location} does not exist")]
    SlotNotFound {
        slot: usize,
        date: String,
        location: String,
    },

    #[error("Slot {slot} for {date} at {location} is full")]
    SlotFull {
        slot: usize,
        date: String,
        location: String,
    },

    #[error("{user} is already signed up for {date} at {location}")]
    MultipleSignUp {
        user: String,
        date: String,
        location: String,
    },

    #[error("No answer received in time, react again to retry")]
    Timeout,

    #[error("Malformed schedule message: {0}")]
    MalformedMessage(String),

    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl SchedulerError {
    pub(crate) fn slot_not_found(key: &SessionKey, slot: usize) -> Self {
        Self::SlotNotFound {
            slot,
            date: key.date.clone(),
            location: key.location.clone(),
        }
    }

    pub(crate) fn slot_full(key: &SessionKey, slot: usize) -> Self {
        Self::SlotFull {
            slot,
            date: key.date.clone(),
            location: key.location.clone(),
        }
    }

    /// Whether the error was caused by the user rather than by the two
    /// representations of a session drifting apart.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            Self::MalformedMessage(_) | Self::InternalInconsistency(_)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn user_errors_are_told_apart() {
        let key = SessionKey::new("2024-05-01", "18:00", "20:00", "CourtA");

        assert!(SchedulerError::SessionExists { key: key.clone() }.is_user_error());
        assert!(SchedulerError::slot_full(&key, 1).is_user_error());
        assert!(SchedulerError::Timeout.is_user_error());
        assert!(!SchedulerError::MalformedMessage("x".to_string()).is_user_error());
        assert!(!SchedulerError::InternalInconsistency("x".to_string()).is_user_error());
    }

    #[test]
    fn messages_carry_context() {
        let key = SessionKey::new("2024-05-01", "18:00", "20:00", "CourtA");

        assert_eq!(
            SchedulerError::SessionExists { key }.to_string(),
            "A session already exists for 2024-05-01 from 18:00 to 20:00 at CourtA"
        );
    }
}
