use anyhow::{anyhow, bail, Context as _};
use log::info;
use poise::{serenity_prelude::CreateMessage, CreateReply};

use crate::handler::{schedule_channel_name, Context, Error, BOOKMARK_EMOJI};

#[poise::command(prefix_command, slash_command)]
/// Show the available commands
pub async fn help(
    ctx: Context<'_>,
    #[description = "Command to get help for"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> Result<(), Error> {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            extra_text_at_bottom: "React to a schedule with a number (1️⃣, 2️⃣...) to join that slot.",
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}

#[poise::command(prefix_command, slash_command)]
/// Check whether the bot is alive
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("pong").await?;
    Ok(())
}

#[poise::command(prefix_command, slash_command, guild_only)]
/// Schedule a session for a date, time window and location
///
/// The schedule is posted in the matching `-schedule` channel.
/// React with a slot number (e.g. 1️⃣, 2️⃣) to join that slot,
/// and with 🔖 to record the court you booked.
pub async fn schedule(
    ctx: Context<'_>,
    #[description = "Day of the session"] date: String,
    #[description = "Start time"] start_time: String,
    #[description = "End time"] end_time: String,
    #[description = "Where the session takes place"] location: String,
) -> Result<(), Error> {
    let data = ctx.data();
    let serenity_ctx = ctx.serenity_context();

    let guild_id = ctx
        .guild_id()
        .context("schedules can only be created in a server")?;
    let channel_name = ctx
        .channel_id()
        .name(serenity_ctx)
        .await
        .context("failed to resolve the channel name")?;
    let target = schedule_channel_name(&channel_name, &data.config.schedule.channel_suffix);

    let text = data
        .scheduler
        .create_schedule(&date, &start_time, &end_time, &location)
        .await?;

    // from here on, a failure must not leave an orphan session behind
    let channels = match guild_id.channels(serenity_ctx).await {
        Ok(channels) => channels,
        Err(err) => {
            data.scheduler.delete_schedule(&text).await?;
            return Err(anyhow!(err).context("failed to list the server channels"));
        }
    };
    let Some(channel) = channels.values().find(|c| c.name == target) else {
        data.scheduler.delete_schedule(&text).await?;
        bail!("There is no #{} channel to post the schedule in", target);
    };

    let message = match channel
        .id
        .send_message(serenity_ctx, CreateMessage::new().content(&text))
        .await
    {
        Ok(message) => message,
        Err(err) => {
            data.scheduler.delete_schedule(&text).await?;
            return Err(anyhow!(err).context("failed to post the schedule"));
        }
    };
    data.messages.track(message.id, text).await;
    info!(
        "posted schedule {} in #{} ({} sessions tracked)",
        message.id,
        target,
        data.scheduler.session_count().await
    );

    ctx.send(
        CreateReply::default()
            .ephemeral(true)
            .content(format!(
                "Schedule posted in <#{}>, react with {} once a slot is booked.",
                channel.id, BOOKMARK_EMOJI
            )),
    )
    .await?;

    Ok(())
}
