use log::{debug, info};
use tokio::sync::RwLock;

use self::{
    codec::{booked_status, render_header, render_session, ScheduleText, TO_BOOK_STATUS, WAITING_STATUS},
    error::SchedulerError,
    session::{Participant, SessionKey, Slot, BOOKING_THRESHOLD},
    store::{Session, SessionStore},
};

pub mod codec;
pub mod error;
pub mod session;
pub mod store;

/// Keeps the sessions and their schedule messages in sync.
///
/// Every operation takes the current text of the schedule message and
/// returns the text it should be replaced with. The text must be the last
/// one returned for that session, otherwise the operation is rejected as
/// inconsistent.
#[derive(Debug)]
pub struct Scheduler {
    levels: Vec<String>,
    store: RwLock<SessionStore>,
}

impl Scheduler {
    pub fn new(levels: Vec<String>) -> Self {
        Self {
            levels,
            store: RwLock::new(SessionStore::new()),
        }
    }

    async fn session(&self, key: &SessionKey) -> Result<Session, SchedulerError> {
        self.store.read().await.get(key)
    }

    /// Copy of the slots of a session.
    #[allow(unused)]
    pub async fn slots(&self, key: &SessionKey) -> Result<Vec<Slot>, SchedulerError> {
        let session = self.session(key).await?;
        let slots = session.lock().await;
        Ok(slots.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn create_schedule(
        &self,
        date: &str,
        start_time: &str,
        end_time: &str,
        location: &str,
    ) -> Result<String, SchedulerError> {
        let key = SessionKey::new(date, start_time, end_time, location);

        // the header is the only way back to the key, refuse anything that
        // would not survive the trip
        let parsed = codec::parse_key(&render_header(&key));
        if parsed.as_ref() != Ok(&key) {
            return Err(SchedulerError::MalformedMessage(format!(
                "{key} can't be written as a schedule header"
            )));
        }

        let slots: Vec<Slot> = self.levels.iter().map(Slot::new).collect();
        let text = render_session(&key, &slots)?;

        self.store.write().await.create(key.clone(), slots)?;
        info!("created session {}", key);

        Ok(text)
    }

    pub async fn delete_schedule(&self, text: &str) -> Result<(), SchedulerError> {
        let key = codec::parse_key(text)?;

        if self.store.write().await.delete(&key) {
            info!("deleted session {}", key);
        } else {
            debug!("session {} was already gone", key);
        }
        Ok(())
    }

    pub async fn join_slot(
        &self,
        text: &str,
        slot: usize,
        user: &(impl Participant + ?Sized),
    ) -> Result<String, SchedulerError> {
        let (key, mut doc) = ScheduleText::parse(text)?;
        let session = self.session(&key).await?;
        let mut slots = session.lock().await;
        let mention = user.mention();

        if doc.mentions(&mention) {
            return Err(SchedulerError::MultipleSignUp {
                user: mention,
                date: key.date,
                location: key.location,
            });
        }
        if slot == 0 || slot > slots.len() {
            return Err(SchedulerError::slot_not_found(&key, slot));
        }
        check_drift(&key, &doc, &slots, slot)?;
        if slots[slot - 1].is_full() {
            return Err(SchedulerError::slot_full(&key, slot));
        }

        doc.add_occupant(slot, &mention)?;
        let target = &mut slots[slot - 1];
        target.count += 1;
        debug!("{} joined slot {} of {} ({} players)", mention, slot, key, target.count);

        if target.count == BOOKING_THRESHOLD {
            if !target.booked {
                doc.set_status(slot, TO_BOOK_STATUS)?;
            }
            if !target.overflow_created {
                target.overflow_created = true;
                let overflow = Slot::new(target.level.clone());
                doc.push_slot(slots.len() + 1, &overflow);
                slots.push(overflow);
                info!("opened slot {} of {}", slots.len(), key);
            }
        }

        Ok(doc.render())
    }

    pub async fn leave_slot(
        &self,
        text: &str,
        slot: usize,
        user: &(impl Participant + ?Sized),
    ) -> Result<String, SchedulerError> {
        let (key, mut doc) = ScheduleText::parse(text)?;
        if slot == 0 {
            return Err(SchedulerError::slot_not_found(&key, slot));
        }

        let session = self.session(&key).await.map_err(|_| {
            SchedulerError::InternalInconsistency(format!("left a slot of untracked session {key}"))
        })?;
        let mut slots = session.lock().await;
        let mention = user.mention();

        // a refused join on a slot that doesn't exist comes back as a leave
        // once its reaction is removed
        if slot > slots.len() {
            debug!("{} left unknown slot {} of {}, nothing to do", mention, slot, key);
            return Ok(text.to_string());
        }
        check_drift(&key, &doc, &slots, slot)?;

        // the reaction was removed without the user ever being in the slot,
        // typically after a refused join
        if !doc.remove_occupant(slot, &mention)? {
            debug!("{} is not in slot {} of {}, nothing to do", mention, slot, key);
            return Ok(text.to_string());
        }

        // the drift check matched the count to the occupants, one was removed
        let target = &mut slots[slot - 1];
        target.count -= 1;
        debug!("{} left slot {} of {} ({} players)", mention, slot, key, target.count);

        if target.count == BOOKING_THRESHOLD - 1 && !target.booked {
            doc.set_status(slot, WAITING_STATUS)?;
        }

        Ok(doc.render())
    }

    pub async fn book_slot(
        &self,
        text: &str,
        slot: usize,
        court: &str,
        user: &(impl Participant + ?Sized),
    ) -> Result<String, SchedulerError> {
        let (key, mut doc) = ScheduleText::parse(text)?;
        let session = self.session(&key).await?;
        let mut slots = session.lock().await;
        let mention = user.mention();

        if slot == 0 || slot > slots.len() {
            return Err(SchedulerError::slot_not_found(&key, slot));
        }
        check_drift(&key, &doc, &slots, slot)?;

        doc.set_status(slot, booked_status(court, &mention))?;
        slots[slot - 1].booked = true;
        info!("{} booked court #{} for slot {} of {}", mention, court, slot, key);

        Ok(doc.render())
    }
}

/// Makes sure the message and the slots still describe the same session.
fn check_drift(
    key: &SessionKey,
    doc: &ScheduleText,
    slots: &[Slot],
    slot: usize,
) -> Result<(), SchedulerError> {
    if doc.slot_count() != slots.len() {
        return Err(SchedulerError::InternalInconsistency(format!(
            "{key} has {} slots but its message shows {}",
            slots.len(),
            doc.slot_count()
        )));
    }

    let shown = doc.occupants(slot)?.len();
    let count = slots[slot - 1].count;
    if shown != count {
        return Err(SchedulerError::InternalInconsistency(format!(
            "slot {slot} of {key} has {count} players but its message shows {shown}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{codec::parse_key, *};

    const LEVELS: [&str; 2] = ["Rookie / Amateur", "Intermediate / Advanced"];

    fn scheduler() -> Scheduler {
        Scheduler::new(LEVELS.iter().map(|l| l.to_string()).collect())
    }

    fn key() -> SessionKey {
        SessionKey::new("2024-05-01", "18:00", "20:00", "CourtA")
    }

    async fn created(scheduler: &Scheduler) -> String {
        scheduler
            .create_schedule("2024-05-01", "18:00", "20:00", "CourtA")
            .await
            .unwrap()
    }

    /// Joins `users` to `slot` one after the other and returns the final text.
    async fn join_all(scheduler: &Scheduler, mut text: String, slot: usize, users: &[&str]) -> String {
        for user in users {
            text = scheduler.join_slot(&text, slot, *user).await.unwrap();
        }
        text
    }

    fn line_of(text: &str, offset: usize) -> &str {
        text.lines().nth(offset).unwrap()
    }

    #[tokio::test]
    async fn create_round_trips_the_key() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;

        assert_eq!(parse_key(&text).unwrap(), key());
        assert_eq!(scheduler.slots(&key()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn create_one_slot_per_level() {
        let scheduler = Scheduler::new(vec!["A".into(), "B".into(), "C".into()]);
        let text = created(&scheduler).await;

        let slots = scheduler.slots(&key()).await.unwrap();
        assert_eq!(slots.iter().map(|s| s.level.as_str()).collect::<Vec<_>>(), ["A", "B", "C"]);
        assert!(slots.iter().all(|s| s.count == 0 && !s.booked && !s.overflow_created));
        assert_eq!(text.lines().filter(|l| l.starts_with("Slot ")).count(), 3);
    }

    #[tokio::test]
    async fn duplicate_session_is_refused() {
        let scheduler = scheduler();
        created(&scheduler).await;

        let err = scheduler
            .create_schedule("2024-05-01", "18:00", "20:00", "CourtA")
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::SessionExists { key: key() });
        assert_eq!(scheduler.session_count().await, 1);
    }

    #[tokio::test]
    async fn fields_that_do_not_round_trip_are_refused() {
        let scheduler = scheduler();

        for (date, start, end, location) in [
            ("2024-05-01", "6 to 7", "20:00", "CourtA"),
            ("2024-05-01", "18:00", "20:00", "Court\nA"),
            ("", "18:00", "20:00", "CourtA"),
        ] {
            let err = scheduler.create_schedule(date, start, end, location).await.unwrap_err();
            assert!(matches!(err, SchedulerError::MalformedMessage(_)), "{err:?}");
        }
        assert_eq!(scheduler.session_count().await, 0);
    }

    #[tokio::test]
    async fn join_appends_mentions() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;

        let text = join_all(&scheduler, text, 1, &["<@1>", "<@2>"]).await;
        assert_eq!(line_of(&text, 1), "Slot 1: <@1>, <@2>");
        assert_eq!(scheduler.slots(&key()).await.unwrap()[0].count, 2);
    }

    #[tokio::test]
    async fn second_sign_up_is_refused() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        let text = join_all(&scheduler, text, 1, &["<@1>"]).await;

        for slot in [1, 2] {
            let err = scheduler.join_slot(&text, slot, "<@1>").await.unwrap_err();
            assert!(matches!(err, SchedulerError::MultipleSignUp { .. }));
        }
        assert_eq!(scheduler.slots(&key()).await.unwrap()[0].count, 1);
    }

    #[tokio::test]
    async fn unknown_slot_is_refused() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;

        for slot in [0, 3, 10] {
            let err = scheduler.join_slot(&text, slot, "<@1>").await.unwrap_err();
            assert!(matches!(err, SchedulerError::SlotNotFound { .. }), "{err:?}");
        }
    }

    #[tokio::test]
    async fn seventh_player_is_refused() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        let text = join_all(&scheduler, text, 1, &["<@1>", "<@2>", "<@3>", "<@4>", "<@5>", "<@6>"]).await;

        let err = scheduler.join_slot(&text, 1, "<@7>").await.unwrap_err();
        assert!(matches!(err, SchedulerError::SlotFull { slot: 1, .. }));
        assert_eq!(scheduler.slots(&key()).await.unwrap()[0].count, 6);
    }

    #[tokio::test]
    async fn fourth_player_opens_one_overflow_slot() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        let text = join_all(&scheduler, text, 1, &["<@1>", "<@2>", "<@3>"]).await;
        assert_eq!(line_of(&text, 3), WAITING_STATUS);

        let text = join_all(&scheduler, text, 1, &["<@4>"]).await;
        assert_eq!(line_of(&text, 3), TO_BOOK_STATUS);
        let slots = scheduler.slots(&key()).await.unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(slots[2].level, LEVELS[0]);
        assert!(slots[0].overflow_created);
        assert!(text.ends_with("Slot 3: \nLevel: Rookie / Amateur\n**Status:** Awaiting more players"));

        // dropping below the threshold and crossing it again doesn't open another
        let text = scheduler.leave_slot(&text, 1, "<@4>").await.unwrap();
        let text = join_all(&scheduler, text, 1, &["<@5>"]).await;
        assert_eq!(scheduler.slots(&key()).await.unwrap().len(), 3);
        assert_eq!(text.lines().filter(|l| l.starts_with("Slot ")).count(), 3);
    }

    #[tokio::test]
    async fn leaving_below_threshold_reverts_status() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        let text = join_all(&scheduler, text, 1, &["<@1>", "<@2>", "<@3>", "<@4>"]).await;

        let text = scheduler.leave_slot(&text, 1, "<@2>").await.unwrap();
        assert_eq!(line_of(&text, 1), "Slot 1: <@1>, <@3>, <@4>");
        assert_eq!(line_of(&text, 3), WAITING_STATUS);
        assert_eq!(scheduler.slots(&key()).await.unwrap()[0].count, 3);
    }

    #[tokio::test]
    async fn leaving_a_booked_slot_keeps_the_booking() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        let text = join_all(&scheduler, text, 1, &["<@1>", "<@2>", "<@3>", "<@4>"]).await;
        let text = scheduler.book_slot(&text, 1, "2", "<@1>").await.unwrap();

        let text = scheduler.leave_slot(&text, 1, "<@4>").await.unwrap();
        assert_eq!(line_of(&text, 3), booked_status("2", "<@1>"));
        assert!(scheduler.slots(&key()).await.unwrap()[0].booked);
    }

    #[tokio::test]
    async fn leave_by_a_stranger_changes_nothing() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        let text = join_all(&scheduler, text, 1, &["<@1>"]).await;

        assert_eq!(scheduler.leave_slot(&text, 2, "<@1>").await.unwrap(), text);
        assert_eq!(scheduler.leave_slot(&text, 1, "<@9>").await.unwrap(), text);
        assert_eq!(scheduler.slots(&key()).await.unwrap()[0].count, 1);
    }

    #[tokio::test]
    async fn refused_join_on_unknown_slot_leaves_quietly() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;

        let err = scheduler.join_slot(&text, 3, "<@1>").await.unwrap_err();
        assert!(matches!(err, SchedulerError::SlotNotFound { slot: 3, .. }));

        // removing the refused reaction
        assert_eq!(scheduler.leave_slot(&text, 3, "<@1>").await.unwrap(), text);
        assert_eq!(scheduler.slots(&key()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn leave_on_an_empty_slot_keeps_it_empty() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;

        assert_eq!(scheduler.leave_slot(&text, 2, "<@1>").await.unwrap(), text);
        assert_eq!(scheduler.slots(&key()).await.unwrap()[1].count, 0);

        let text = join_all(&scheduler, text, 2, &["<@1>"]).await;
        let text = scheduler.leave_slot(&text, 2, "<@1>").await.unwrap();
        assert_eq!(line_of(&text, 4), "Slot 2: ");
        assert_eq!(scheduler.slots(&key()).await.unwrap()[1].count, 0);
        assert_eq!(scheduler.leave_slot(&text, 2, "<@1>").await.unwrap(), text);
    }

    #[tokio::test]
    async fn leave_on_untracked_session_is_inconsistent() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        let text = join_all(&scheduler, text, 1, &["<@1>"]).await;
        scheduler.delete_schedule(&text).await.unwrap();

        let err = scheduler.leave_slot(&text, 1, "<@1>").await.unwrap_err();
        assert!(matches!(err, SchedulerError::InternalInconsistency(_)));

        let err = scheduler.leave_slot(&text, 0, "<@1>").await.unwrap_err();
        assert!(matches!(err, SchedulerError::SlotNotFound { slot: 0, .. }));
    }

    #[tokio::test]
    async fn stale_text_is_inconsistent() {
        let scheduler = scheduler();
        let stale = created(&scheduler).await;
        join_all(&scheduler, stale.clone(), 1, &["<@1>"]).await;

        let err = scheduler.join_slot(&stale, 1, "<@2>").await.unwrap_err();
        assert!(matches!(err, SchedulerError::InternalInconsistency(_)));

        let err = scheduler.join_slot("random chatter", 1, "<@2>").await.unwrap_err();
        assert!(matches!(err, SchedulerError::MalformedMessage(_)));
    }

    #[tokio::test]
    async fn rebooking_overwrites_the_confirmation() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;

        let text = scheduler.book_slot(&text, 2, "3", "<@1>").await.unwrap();
        assert_eq!(line_of(&text, 6), "**Status:** Court #3 booked by <@1>");
        assert!(scheduler.slots(&key()).await.unwrap()[1].booked);

        let text = scheduler.book_slot(&text, 2, "7", "<@2>").await.unwrap();
        assert_eq!(line_of(&text, 6), "**Status:** Court #7 booked by <@2>");
        assert!(scheduler.slots(&key()).await.unwrap()[1].booked);

        let err = scheduler.book_slot(&text, 5, "1", "<@1>").await.unwrap_err();
        assert!(matches!(err, SchedulerError::SlotNotFound { slot: 5, .. }));
    }

    #[tokio::test]
    async fn delete_forgets_the_session() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;

        scheduler.delete_schedule(&text).await.unwrap();
        scheduler.delete_schedule(&text).await.unwrap();
        assert_eq!(scheduler.session_count().await, 0);

        let err = scheduler.join_slot(&text, 1, "<@1>").await.unwrap_err();
        assert_eq!(err, SchedulerError::SessionNotFound { key: key() });

        // the key is free again
        created(&scheduler).await;
    }

    #[tokio::test]
    async fn booked_slot_keeps_accepting_players() {
        let scheduler = scheduler();
        let text = created(&scheduler).await;
        assert!(text.lines().filter(|l| *l == WAITING_STATUS).count() == 2);

        let text = join_all(&scheduler, text, 1, &["<@1>", "<@2>", "<@3>", "<@4>"]).await;
        assert_eq!(line_of(&text, 3), TO_BOOK_STATUS);
        assert_eq!(scheduler.slots(&key()).await.unwrap().len(), 3);

        let text = scheduler.book_slot(&text, 1, "5", "<@3>").await.unwrap();
        assert_eq!(line_of(&text, 3), "**Status:** Court #5 booked by <@3>");

        let text = scheduler.join_slot(&text, 1, "<@5>").await.unwrap();
        assert_eq!(line_of(&text, 1), "Slot 1: <@1>, <@2>, <@3>, <@4>, <@5>");
        assert_eq!(line_of(&text, 3), "**Status:** Court #5 booked by <@3>");

        let slots = scheduler.slots(&key()).await.unwrap();
        assert_eq!(slots[0].count, 5);
        assert!(slots[0].booked);
        assert_eq!(slots.len(), 3);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let scheduler = Arc::new(scheduler());
        let mut tasks = vec![];

        for i in 0..8 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                let location = format!("Court{i}");
                let text = scheduler
                    .create_schedule("2024-05-01", "18:00", "20:00", &location)
                    .await
                    .unwrap();
                scheduler.join_slot(&text, 1, "<@1>").await
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(scheduler.session_count().await, 8);
    }

    #[tokio::test]
    async fn concurrent_joins_on_one_session_are_serialised() {
        let scheduler = Arc::new(scheduler());
        let text = created(&scheduler).await;
        let mut tasks = vec![];

        for i in 0..10 {
            let scheduler = scheduler.clone();
            let text = text.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.join_slot(&text, 1, &format!("<@{i}>")).await
            }));
        }

        let mut joined = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => joined += 1,
                Err(err) => assert!(matches!(err, SchedulerError::InternalInconsistency(_))),
            }
        }

        // every join read the same text, only the first one can apply to it
        assert_eq!(joined, 1);
        assert_eq!(scheduler.slots(&key()).await.unwrap()[0].count, 1);
    }
}
