use std::{future::Future, time::Duration};

use log::debug;
use tokio::time::{timeout_at, Instant};

use crate::scheduler::error::SchedulerError;

pub const SLOT_QUESTION: &str = "What slot number did you book?";
pub const COURT_QUESTION: &str = "What court number did you book?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingState {
    AwaitingSlotNumber,
    AwaitingCourtNumber { slot: usize },
    Complete { slot: usize, court: String },
    TimedOut,
}

/// What the user told us they booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub slot: usize,
    pub court: String,
}

/// The two questions asked after someone reacts with the bookmark.
#[derive(Debug)]
pub struct BookingDialogue {
    state: BookingState,
}

impl Default for BookingDialogue {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingDialogue {
    pub fn new() -> Self {
        Self {
            state: BookingState::AwaitingSlotNumber,
        }
    }

    #[allow(unused)]
    pub fn state(&self) -> &BookingState {
        &self.state
    }

    /// The question to ask next, `None` once the dialogue is over.
    pub fn question(&self) -> Option<&'static str> {
        match self.state {
            BookingState::AwaitingSlotNumber => Some(SLOT_QUESTION),
            BookingState::AwaitingCourtNumber { .. } => Some(COURT_QUESTION),
            BookingState::Complete { .. } | BookingState::TimedOut => None,
        }
    }

    /// Feeds a reply to the pending question.
    /// Only numbers qualify; anything else is ignored and returns false.
    pub fn answer(&mut self, reply: &str) -> bool {
        let reply = reply.trim();
        if reply.is_empty() || !reply.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }

        match self.state {
            BookingState::AwaitingSlotNumber => {
                let Ok(slot) = reply.parse() else {
                    return false;
                };
                self.state = BookingState::AwaitingCourtNumber { slot };
            }
            BookingState::AwaitingCourtNumber { slot } => {
                self.state = BookingState::Complete {
                    slot,
                    court: reply.to_string(),
                };
            }
            BookingState::Complete { .. } | BookingState::TimedOut => return false,
        }
        true
    }

    pub fn time_out(&mut self) {
        if self.question().is_some() {
            self.state = BookingState::TimedOut;
        }
    }

    pub fn outcome(self) -> Option<Booking> {
        match self.state {
            BookingState::Complete { slot, court } => Some(Booking { slot, court }),
            _ => None,
        }
    }
}

/// A private exchange with the user who is booking.
pub trait Conversation {
    fn ask(&mut self, question: &str) -> impl Future<Output = Result<(), anyhow::Error>> + Send;

    /// Next message from the user, `None` if no more can arrive.
    fn next_reply(&mut self) -> impl Future<Output = Option<String>> + Send;
}

/// Runs the dialogue to its end. Each question waits at most `wait`;
/// ignored replies don't extend it.
pub async fn run(
    conversation: &mut impl Conversation,
    wait: Duration,
) -> Result<Booking, anyhow::Error> {
    let mut dialogue = BookingDialogue::new();

    while let Some(question) = dialogue.question() {
        conversation.ask(question).await?;
        let deadline = Instant::now() + wait;

        loop {
            match timeout_at(deadline, conversation.next_reply()).await {
                Ok(Some(reply)) => {
                    if dialogue.answer(&reply) {
                        break;
                    }
                    debug!("ignoring reply {:?} to {:?}", reply, question);
                }
                Ok(None) | Err(_) => {
                    dialogue.time_out();
                    break;
                }
            }
        }
    }

    Ok(dialogue.outcome().ok_or(SchedulerError::Timeout)?)
}
