use crate::handler::{self, Error, ScheduleMessages, GENERIC_FAILURE};
use crate::scheduler::{error::SchedulerError, Scheduler};
use crate::{cfg::Config, commands};
use anyhow::Context;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{error, info, warn};
use poise::serenity_prelude::{ClientBuilder, CreateMessage, GatewayIntents};
use poise::CreateReply;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::{Receiver, Sender};

// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub config: Arc<Config>,
    pub scheduler: Scheduler,
    pub messages: ScheduleMessages,
    pub booking_timeout: Duration,
}

pub struct Bot {
    pub data: Arc<Data>,
    pub shutdown: Receiver<()>,
    shutdown_send: Sender<()>,
}

/// Sends a message through `shutdown_send` when a stop signal is detected.
/// Used to start the bot stop sequence.
async fn wait_for_stop_signal(bot: Arc<Bot>) -> Result<(), Error> {
    let mut shutdown = bot.shutdown.resubscribe();
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => {
                    info!("stop signal received, shutting down");
                    bot.shutdown_send
                        .send(())
                        .context("failed to send a shutdown signal")?;
                    Ok(())
                }
                Err(err) => Err(anyhow::anyhow!(err)),
            }
        },
        _ = shutdown.recv() => { Ok(()) }
    }
}

/// What the user is told when a command fails.
/// Desync errors are only logged, the user gets a generic message.
fn describe(error: &Error) -> (String, bool) {
    match error.downcast_ref::<SchedulerError>() {
        Some(err) if !err.is_user_error() => (GENERIC_FAILURE.to_string(), false),
        _ => (error.to_string(), true),
    }
}

async fn on_error(error: poise::FrameworkError<'_, Arc<Data>, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => panic!("Failed to start bot: {:?}", error),
        poise::FrameworkError::Command { error, ctx, .. } => {
            let (content, user_error) = describe(&error);
            if user_error {
                warn!("refused command `{}`: {}", ctx.command().name, error);
            } else {
                error!(
                    "Error in command `{}` invoked as {:?}: {:?}",
                    ctx.command().name,
                    ctx.invocation_string(),
                    error
                );
            }

            // prefix commands can't answer ephemerally, use a direct message
            let sent = match ctx {
                poise::Context::Application(_) => ctx
                    .send(CreateReply::default().ephemeral(true).content(content))
                    .await
                    .map(|_| ()),
                poise::Context::Prefix(_) => ctx
                    .author()
                    .direct_message(ctx.serenity_context(), CreateMessage::new().content(content))
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = sent {
                error!("failed to report the error to {}: {}", ctx.author().name, e);
            }
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

impl Bot {
    pub async fn new(config: Arc<Config>) -> Result<Arc<Self>, Error> {
        // Theses signals are used to stop the many tasks trigered.
        // this is called by the task listening for a stop signal.
        let (shutdown_send, shutdown) = tokio::sync::broadcast::channel(1);

        config
            .schedule
            .validate()
            .context("invalid schedule configuration")?;

        let data = Arc::new(Data {
            scheduler: Scheduler::new(config.schedule.levels.clone()),
            messages: ScheduleMessages::default(),
            booking_timeout: config.schedule.booking_timeout()?,
            config,
        });

        Ok(Arc::new(Self {
            data,
            shutdown,
            shutdown_send,
        }))
    }

    pub async fn start(self: Arc<Self>) -> Result<(), Error> {
        let mut shutdown = self.shutdown.resubscribe();
        let mut tasks = FuturesUnordered::new();

        let options = poise::FrameworkOptions {
            commands: vec![commands::help(), commands::ping(), commands::schedule()],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(self.data.config.discord.prefix.clone()),
                edit_tracker: Some(Arc::new(poise::EditTracker::for_timespan(
                    Duration::from_secs(3600),
                ))),
                mention_as_prefix: true,
                ..Default::default()
            },
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |ctx, event, framework, data| {
                Box::pin(handler::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        };
        let data = self.data.clone();
        let framework = poise::Framework::builder()
            .options(options)
            .setup(move |ctx, ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    info!("logged in as {}", ready.user.name);
                    Ok(data)
                })
            })
            .build();

        // reactions, prefix commands and the booking questions asked in DMs
        let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
        let mut client = ClientBuilder::new(self.data.config.discord.token.clone(), intents)
            .framework(framework)
            .await
            .context("failed to create the discord client")?;

        tasks.push(tokio::spawn(async move {
            // wait until the bot terminates or a shutdown signal is received.
            tokio::select! {
                result = client.start_autosharded() => {
                    if let Err(err) = result {
                        error!("Client error: {}", err);
                    }
                },
                _ = shutdown.recv() => {
                    // shutdown the bot properly
                    client.shard_manager.shutdown_all().await;
                }
            };
        }));
        let self_clone = self.clone();
        tasks.push(tokio::spawn(async {
            let _ = wait_for_stop_signal(self_clone).await;
        }));

        // wait for a task to finish.
        let task = tasks
            .next()
            .await
            .context("no tasks started, illegal state")?
            .context("failed to join task");

        // when a task is finished, we must terminate all the others,
        // hence we send a signal talling all tasks to stop processing
        // and return.
        let _ = self.shutdown_send.send(());

        while let Some(operation) = tasks.next().await {
            operation.context("failed to join task")?;
        }

        task?;
        Ok(())
    }
}
