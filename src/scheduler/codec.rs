//! Text form of a session.
//!
//! A schedule message looks like this:
//!
//! ```text
//! **__2024-05-01__**, 18:00 to 20:00 at CourtA
//! Slot 1: <@1>, <@2>
//! Level: Rookie / Amateur
//! **Status:** Awaiting more players
//! Slot 2:
//! Level: Intermediate / Advanced
//! **Status:** Awaiting more players
//! ```
//!
//! The header is the only place the session key can be recovered from, and
//! the slot lines are the only place the occupants are stored.

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;

use super::{
    error::SchedulerError,
    session::{SessionKey, Slot, BOOKING_THRESHOLD},
};

/// Header of a schedule message. Placeholders are filled in that order.
pub const HEADER_TEMPLATE: &str = "**__{date}__**, {start_time} to {end_time} at {location}";
/// Every schedule message starts with this.
pub const OPENING_MARKER: &str = "**__";

pub const WAITING_STATUS: &str = "**Status:** Awaiting more players";
pub const TO_BOOK_STATUS: &str = "**Status:** To be booked";

const SLOT_PREFIX: &str = "Slot ";
const LEVEL_PREFIX: &str = "Level: ";
const MENTION_SEPARATOR: &str = ", ";

static HEADER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&template_pattern(HEADER_TEMPLATE)).expect("header template is a valid pattern")
});

/// Turns `{name}` placeholders into named groups and escapes the rest.
/// All groups are lazy except the last one so a placeholder can't swallow
/// the literal text following it.
fn template_pattern(template: &str) -> String {
    let placeholder = Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid");
    let names: Vec<_> = placeholder.captures_iter(template).collect();

    let mut pattern = String::from("^");
    let mut last = 0;
    for (i, captures) in names.iter().enumerate() {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        pattern += &regex::escape(&template[last..whole.start()]);
        let repeat = if i + 1 == names.len() { ".+" } else { ".+?" };
        pattern += &format!("(?P<{}>{})", name.as_str(), repeat);
        last = whole.end();
    }
    pattern += &regex::escape(&template[last..]);
    pattern.push('$');

    pattern
}

pub fn render_header(key: &SessionKey) -> String {
    HEADER_TEMPLATE
        .replace("{date}", &key.date)
        .replace("{start_time}", &key.start_time)
        .replace("{end_time}", &key.end_time)
        .replace("{location}", &key.location)
}

/// Status line of a slot that hasn't been booked yet.
pub fn pending_status(count: usize) -> &'static str {
    if count >= BOOKING_THRESHOLD {
        TO_BOOK_STATUS
    } else {
        WAITING_STATUS
    }
}

pub fn booked_status(court: &str, user: &str) -> String {
    format!("**Status:** Court #{court} booked by {user}")
}

fn slot_line(number: usize, occupants: &[&str]) -> String {
    format!("{SLOT_PREFIX}{number}: {}", occupants.join(MENTION_SEPARATOR))
}

fn slot_block(number: usize, slot: &Slot) -> [String; 3] {
    [
        slot_line(number, &[]),
        format!("{LEVEL_PREFIX}{}", slot.level),
        pending_status(slot.count).to_string(),
    ]
}

/// Renders a session that has no occupants yet.
///
/// A booking confirmation only exists in the message text, so a booked
/// slot can't be rendered from its record alone.
pub fn render_session(key: &SessionKey, slots: &[Slot]) -> Result<String, SchedulerError> {
    let mut lines = vec![render_header(key)];
    for (i, slot) in slots.iter().enumerate() {
        if slot.booked {
            return Err(SchedulerError::InternalInconsistency(format!(
                "slot {} of {} is booked and can't be rendered from scratch",
                i + 1,
                key
            )));
        }
        lines.extend(slot_block(i + 1, slot));
    }

    Ok(lines.join("\n"))
}

/// Recovers the session key from the first line of a schedule message.
pub fn parse_key(text: &str) -> Result<SessionKey, SchedulerError> {
    let header = text.lines().next().unwrap_or_default();
    let captures = HEADER_REGEX.captures(header).ok_or_else(|| {
        SchedulerError::MalformedMessage(format!("not a schedule header: {header:?}"))
    })?;

    Ok(SessionKey::new(
        &captures["date"],
        &captures["start_time"],
        &captures["end_time"],
        &captures["location"],
    ))
}

/// Splits a `Slot N: ...` line into its number and its occupant list.
fn split_slot_line(line: &str) -> Option<(usize, &str)> {
    let rest = line.strip_prefix(SLOT_PREFIX)?;
    let (number, occupants) = rest.split_once(':')?;
    let number = number.parse().ok()?;

    Some((number, occupants.strip_prefix(' ').unwrap_or(occupants)))
}

/// Line offset of the `Slot {slot}: ` line, if there is one.
#[allow(unused)]
pub fn find_slot_line(text: &str, slot: usize) -> Option<usize> {
    text.lines()
        .position(|line| matches!(split_slot_line(line), Some((number, _)) if number == slot))
}

/// A schedule message split into lines, with the position of every slot
/// block indexed once.
///
/// Edits go through the index, so the slot numbering can't drift while the
/// message is being patched.
#[derive(Debug, Clone)]
pub struct ScheduleText {
    lines: Vec<String>,
    // slot number -> line of its `Slot N:` line; level and status follow it
    index: BTreeMap<usize, usize>,
}

impl ScheduleText {
    pub fn parse(text: &str) -> Result<(SessionKey, Self), SchedulerError> {
        let key = parse_key(text)?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();

        let mut index = BTreeMap::new();
        for (offset, line) in lines.iter().enumerate() {
            let Some((number, _)) = split_slot_line(line) else {
                continue;
            };
            let has_level = lines
                .get(offset + 1)
                .is_some_and(|l| l.starts_with(LEVEL_PREFIX));
            if !has_level || lines.get(offset + 2).is_none() {
                return Err(SchedulerError::MalformedMessage(format!(
                    "slot {number} of {key} is missing its level or status line"
                )));
            }
            if index.insert(number, offset).is_some() {
                return Err(SchedulerError::MalformedMessage(format!(
                    "slot {number} of {key} appears twice"
                )));
            }
        }

        Ok((key, Self { lines, index }))
    }

    fn offset(&self, slot: usize) -> Result<usize, SchedulerError> {
        self.index.get(&slot).copied().ok_or_else(|| {
            SchedulerError::MalformedMessage(format!("slot {slot} has no line in the message"))
        })
    }

    pub fn slot_count(&self) -> usize {
        self.index.len()
    }

    /// Whether the mention appears anywhere in the message.
    pub fn mentions(&self, mention: &str) -> bool {
        self.lines.iter().any(|line| line.contains(mention))
    }

    pub fn occupants(&self, slot: usize) -> Result<Vec<&str>, SchedulerError> {
        let line = &self.lines[self.offset(slot)?];
        let occupants = split_slot_line(line).map_or("", |(_, occupants)| occupants);

        Ok(occupants
            .split(MENTION_SEPARATOR)
            .filter(|o| !o.is_empty())
            .collect())
    }

    pub fn add_occupant(&mut self, slot: usize, mention: &str) -> Result<(), SchedulerError> {
        let mut occupants = self.occupants(slot)?;
        occupants.push(mention);
        let line = slot_line(slot, &occupants);

        let offset = self.offset(slot)?;
        self.lines[offset] = line;
        Ok(())
    }

    /// Removes one occurrence of the mention from the slot.
    /// Returns false if the mention wasn't in that slot.
    pub fn remove_occupant(&mut self, slot: usize, mention: &str) -> Result<bool, SchedulerError> {
        let mut occupants = self.occupants(slot)?;
        let Some(position) = occupants.iter().position(|o| *o == mention) else {
            return Ok(false);
        };
        occupants.remove(position);
        let line = slot_line(slot, &occupants);

        let offset = self.offset(slot)?;
        self.lines[offset] = line;
        Ok(true)
    }

    #[allow(unused)]
    pub fn status(&self, slot: usize) -> Result<&str, SchedulerError> {
        Ok(self.lines[self.offset(slot)? + 2].as_str())
    }

    pub fn set_status(&mut self, slot: usize, status: impl Into<String>) -> Result<(), SchedulerError> {
        let offset = self.offset(slot)? + 2;
        self.lines[offset] = status.into();
        Ok(())
    }

    /// Appends an empty slot block at the end of the message.
    pub fn push_slot(&mut self, number: usize, slot: &Slot) {
        self.index.insert(number, self.lines.len());
        self.lines.extend(slot_block(number, slot));
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}
