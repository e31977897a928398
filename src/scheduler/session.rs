use std::fmt;

/// Maximum number of players in a slot.
pub const SLOT_CAPACITY: usize = 6;
/// Number of players at which a slot is ready to be booked.
pub const BOOKING_THRESHOLD: usize = 4;

/// Identity of a session. There are no surrogate ids: two sessions with the
/// same date, time window and location are the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub location: String,
}

impl SessionKey {
    pub fn new(
        date: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} to {} at {}",
            self.date, self.start_time, self.end_time, self.location
        )
    }
}

/// Runtime state of one slot of a session.
///
/// Who sits in the slot and who booked it only live in the message text;
/// the slot itself only tracks what the invariants need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub level: String,
    pub count: usize,
    pub booked: bool,
    /// Set the first time the slot reaches the booking threshold,
    /// when its overflow slot gets created. Never reset.
    pub overflow_created: bool,
}

impl Slot {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            count: 0,
            booked: false,
            overflow_created: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.count >= SLOT_CAPACITY
    }
}

/// Anything that can sign up to a slot. The mention token is used both to
/// display the participant and to look them up in the message text.
pub trait Participant {
    fn mention(&self) -> String;
}

impl Participant for str {
    fn mention(&self) -> String {
        self.to_string()
    }
}

impl Participant for String {
    fn mention(&self) -> String {
        self.clone()
    }
}

impl Participant for poise::serenity_prelude::User {
    fn mention(&self) -> String {
        poise::serenity_prelude::Mentionable::mention(self).to_string()
    }
}
