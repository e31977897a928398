use std::{collections::HashMap, pin::Pin, sync::Arc};

use anyhow::Context as _;
use futures::{Stream, StreamExt};
use log::{debug, error, warn};
use poise::serenity_prelude::{
    self as serenity, CreateMessage, EditMessage, Message, MessageCollector, MessageId, Reaction,
    ReactionType, User, UserId,
};
use tokio::sync::{Mutex, RwLock};

use crate::{
    booking::{self, Conversation},
    bot::Data,
    scheduler::{codec::OPENING_MARKER, error::SchedulerError},
};

pub type Error = anyhow::Error;
pub type Context<'a> = poise::Context<'a, Arc<Data>, Error>;

pub const BOOKMARK_EMOJI: &str = "🔖";
const SLOT_EMOJIS: [&str; 10] = ["1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣", "🔟"];

pub const GENERIC_FAILURE: &str =
    "Something went wrong with this schedule, please ask an organiser to post a new one.";

pub fn slot_from_emoji(emoji: &str) -> Option<usize> {
    SLOT_EMOJIS.iter().position(|e| *e == emoji).map(|i| i + 1)
}

/// `team-chat` with suffix `schedule` gives `team-schedule`.
pub fn schedule_channel_name(channel: &str, suffix: &str) -> String {
    let prefix = channel.split('-').next().unwrap_or(channel);
    format!("{prefix}-{suffix}")
}

pub fn is_schedule_channel(channel: &str, suffix: &str) -> bool {
    channel.split('-').nth(1) == Some(suffix)
}

/// Last text written to every schedule message the bot posted.
///
/// Gateway events don't carry the body of deleted messages, and reactions
/// on the same message must see each other's edits, so the text the
/// scheduler works on comes from here rather than from the api.
#[derive(Debug, Default)]
pub struct ScheduleMessages {
    texts: RwLock<HashMap<MessageId, Arc<Mutex<String>>>>,
}

impl ScheduleMessages {
    /// Starts tracking a message with `text`, unless it is tracked already.
    /// Whoever tracked it first wins, their edits may already be in there.
    pub async fn track(&self, id: MessageId, text: String) -> Arc<Mutex<String>> {
        self.texts
            .write()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(text)))
            .clone()
    }

    pub async fn get(&self, id: MessageId) -> Option<Arc<Mutex<String>>> {
        self.texts.read().await.get(&id).cloned()
    }

    pub async fn forget(&self, id: MessageId) -> Option<String> {
        let text = self.texts.write().await.remove(&id)?;
        let text = text.lock().await.clone();
        Some(text)
    }
}

/// Direct messages between the bot and the user who is booking.
struct DirectConversation<'a> {
    ctx: &'a serenity::Context,
    user: &'a User,
    replies: Pin<Box<dyn Stream<Item = Message> + Send>>,
}

impl<'a> DirectConversation<'a> {
    fn new(ctx: &'a serenity::Context, user: &'a User) -> Self {
        let replies = MessageCollector::new(ctx)
            .author_id(user.id)
            .filter(|message| message.guild_id.is_none())
            .stream();

        Self {
            ctx,
            user,
            replies: Box::pin(replies),
        }
    }
}

impl Conversation for DirectConversation<'_> {
    async fn ask(&mut self, question: &str) -> Result<(), Error> {
        self.user
            .direct_message(self.ctx, CreateMessage::new().content(question))
            .await
            .context("failed to send a booking question")?;
        Ok(())
    }

    async fn next_reply(&mut self) -> Option<String> {
        self.replies.next().await.map(|message| message.content)
    }
}

/// Tells the user privately why their action failed.
async fn report(ctx: &serenity::Context, user: &User, err: &Error, text: &str) {
    let content = match err.downcast_ref::<SchedulerError>() {
        Some(err) if err.is_user_error() => {
            warn!("refused action of {}: {}", user.name, err);
            err.to_string()
        }
        _ => {
            error!(
                "schedule action of {} failed: {:?}\nmessage was:\n{}",
                user.name, err, text
            );
            GENERIC_FAILURE.to_string()
        }
    };

    if let Err(e) = user
        .direct_message(ctx, CreateMessage::new().content(content))
        .await
    {
        error!("failed to notify {}: {}", user.name, e);
    }
}

enum Action {
    Join(usize),
    Leave(usize),
    Book,
}

impl Action {
    fn from_reaction(emoji: &ReactionType, added: bool) -> Option<Self> {
        let ReactionType::Unicode(emoji) = emoji else {
            return None;
        };
        if emoji == BOOKMARK_EMOJI {
            return added.then_some(Self::Book);
        }
        let slot = slot_from_emoji(emoji)?;
        Some(if added {
            Self::Join(slot)
        } else {
            Self::Leave(slot)
        })
    }
}

async fn on_reaction(
    ctx: &serenity::Context,
    bot_id: UserId,
    data: &Data,
    reaction: &Reaction,
    added: bool,
) -> Result<(), Error> {
    let Some(user_id) = reaction.user_id else {
        return Ok(());
    };
    if user_id == bot_id {
        return Ok(());
    }
    let Some(action) = Action::from_reaction(&reaction.emoji, added) else {
        debug!("ignoring reaction {}", reaction.emoji);
        return Ok(());
    };

    let mut message = reaction
        .message(ctx)
        .await
        .context("failed to fetch the reacted message")?;
    if message.author.id != bot_id {
        return Ok(());
    }
    let channel = reaction
        .channel_id
        .name(ctx)
        .await
        .context("failed to resolve the channel name")?;
    if !is_schedule_channel(&channel, &data.config.schedule.channel_suffix) {
        debug!("ignoring reaction in #{}", channel);
        return Ok(());
    }
    let user = user_id.to_user(ctx).await.context("failed to fetch the user")?;

    // ask before locking the message, the dialogue can take a while
    let booking = match action {
        Action::Book => {
            let mut conversation = DirectConversation::new(ctx, &user);
            match booking::run(&mut conversation, data.booking_timeout).await {
                Ok(booking) => Some(booking),
                Err(err) => {
                    report(ctx, &user, &err, &message.content).await;
                    remove_reaction(ctx, reaction).await;
                    return Ok(());
                }
            }
        }
        _ => None,
    };

    // posted before a restart, or the reaction beat `schedule` to tracking it
    let tracked = match data.messages.get(message.id).await {
        Some(tracked) => tracked,
        None => data.messages.track(message.id, message.content.clone()).await,
    };
    let mut text = tracked.lock().await;

    let scheduler = &data.scheduler;
    let result = match (action, booking) {
        (Action::Join(slot), _) => scheduler.join_slot(&text, slot, &user).await,
        (Action::Leave(slot), _) => scheduler.leave_slot(&text, slot, &user).await,
        (Action::Book, Some(booking)) => {
            scheduler
                .book_slot(&text, booking.slot, &booking.court, &user)
                .await
        }
        (Action::Book, None) => return Ok(()),
    };

    match result {
        Ok(updated) => {
            let Some(content) = record(&mut text, updated) else {
                return Ok(());
            };
            if let Err(err) = message
                .edit(ctx, EditMessage::new().content(content))
                .await
                .context("failed to edit the schedule message")
            {
                report(ctx, &user, &err, &text).await;
            }
        }
        Err(err) => {
            report(ctx, &user, &Error::from(err), &text).await;
            if added {
                remove_reaction(ctx, reaction).await;
            }
        }
    }

    Ok(())
}

/// Records `updated` as the tracked text and returns what the message must
/// be edited to, if anything changed.
///
/// The slots already changed, so the tracked text follows them even if the
/// edit fails afterwards. The next edit that goes through brings the message
/// back in line.
fn record(text: &mut String, updated: String) -> Option<String> {
    if updated == *text {
        return None;
    }
    *text = updated;
    Some(text.clone())
}

async fn remove_reaction(ctx: &serenity::Context, reaction: &Reaction) {
    if let Err(e) = reaction.delete(ctx).await {
        warn!("failed to remove reaction {}: {}", reaction.emoji, e);
    }
}

async fn on_delete(data: &Data, message_id: MessageId) -> Result<(), Error> {
    let Some(text) = data.messages.forget(message_id).await else {
        return Ok(());
    };
    if !text.starts_with(OPENING_MARKER) {
        return Ok(());
    }

    if let Err(err) = data.scheduler.delete_schedule(&text).await {
        error!("failed to delete the session of message {}: {:?}\n{}", message_id, err, text);
    }
    Ok(())
}

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    framework: poise::FrameworkContext<'_, Arc<Data>, Error>,
    data: &Arc<Data>,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::ReactionAdd { add_reaction } => {
            on_reaction(ctx, framework.bot_id, data, add_reaction, true).await
        }
        serenity::FullEvent::ReactionRemove { removed_reaction } => {
            on_reaction(ctx, framework.bot_id, data, removed_reaction, false).await
        }
        serenity::FullEvent::MessageDelete {
            deleted_message_id, ..
        } => on_delete(data, *deleted_message_id).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scheduler::Scheduler;

    #[test]
    fn slot_emojis_map_to_numbers() {
        assert_eq!(slot_from_emoji("1️⃣"), Some(1));
        assert_eq!(slot_from_emoji("9️⃣"), Some(9));
        assert_eq!(slot_from_emoji("🔟"), Some(10));
        assert_eq!(slot_from_emoji("👍"), None);
        assert_eq!(slot_from_emoji(BOOKMARK_EMOJI), None);
    }

    #[test]
    fn reactions_become_actions() {
        let unicode = |e: &str| ReactionType::Unicode(e.to_string());

        assert!(matches!(Action::from_reaction(&unicode("3️⃣"), true), Some(Action::Join(3))));
        assert!(matches!(Action::from_reaction(&unicode("3️⃣"), false), Some(Action::Leave(3))));
        assert!(matches!(Action::from_reaction(&unicode(BOOKMARK_EMOJI), true), Some(Action::Book)));
        assert!(Action::from_reaction(&unicode(BOOKMARK_EMOJI), false).is_none());
        assert!(Action::from_reaction(&unicode("👍"), true).is_none());
    }

    #[test]
    fn companion_channel_names() {
        assert_eq!(schedule_channel_name("badminton-chat", "schedule"), "badminton-schedule");
        assert_eq!(schedule_channel_name("general", "schedule"), "general-schedule");

        assert!(is_schedule_channel("badminton-schedule", "schedule"));
        assert!(is_schedule_channel("badminton-schedule-old", "schedule"));
        assert!(!is_schedule_channel("badminton-chat", "schedule"));
        assert!(!is_schedule_channel("schedule", "schedule"));
    }

    #[tokio::test]
    async fn tracked_messages_are_forgotten_once() {
        let messages = ScheduleMessages::default();
        let id = MessageId::new(42);
        messages.track(id, "text".to_string()).await;

        let tracked = messages.get(id).await.unwrap();
        *tracked.lock().await = "edited".to_string();

        assert_eq!(messages.forget(id).await.as_deref(), Some("edited"));
        assert_eq!(messages.forget(id).await, None);
        assert!(messages.get(id).await.is_none());
    }

    #[tokio::test]
    async fn first_tracker_keeps_its_edits() {
        let messages = ScheduleMessages::default();
        let id = MessageId::new(7);

        // a reaction got there before the poster
        let early = messages.track(id, "posted".to_string()).await;
        *early.lock().await = "joined".to_string();

        let late = messages.track(id, "posted".to_string()).await;
        assert!(Arc::ptr_eq(&early, &late));
        assert_eq!(*messages.get(id).await.unwrap().lock().await, "joined");
    }

    #[tokio::test]
    async fn tracked_text_follows_the_slots_when_an_edit_fails() {
        let scheduler = Scheduler::new(vec!["A".to_string()]);
        let posted = scheduler.create_schedule("d", "s", "e", "l").await.unwrap();
        let mut text = posted.clone();

        let updated = scheduler.join_slot(&text, 1, "<@1>").await.unwrap();
        let content = record(&mut text, updated.clone());
        assert_eq!(content.as_deref(), Some(updated.as_str()));
        // the edit of the message fails here, the tracked text is still current
        assert_eq!(text, updated);

        let updated = scheduler.join_slot(&text, 1, "<@2>").await.unwrap();
        assert!(record(&mut text, updated).is_some());
        assert_ne!(text, posted);

        // nothing changed, nothing to edit
        let same = scheduler.leave_slot(&text, 1, "<@9>").await.unwrap();
        assert!(record(&mut text, same).is_none());
    }
}
