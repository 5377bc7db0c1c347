use serenity::all::{
    ActivityData, ApplicationId, ComponentInteractionDataKind, Context, EventHandler,
    GatewayIntents, GuildId, Interaction, Member, OnlineStatus, Ready, User,
};
use serenity::async_trait;
use serenity::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use bluesbot::commands::DeployOutcome;
use bluesbot::config::Config;
use bluesbot::context::AppContext;
use bluesbot::dispatcher;
use bluesbot::modules::{builtin_modules, load_modules, ModuleRegistry};
use bluesbot::store::{default_tree, ConfigStore, AUTOSAVE_INTERVAL};
use bluesbot::web::{self, WebState};
use bluesbot::logging;

const STATUS_ROTATION_INTERVAL: Duration = Duration::from_secs(15 * 60);

struct Handler {
    app: Arc<AppContext>,
    modules: Arc<ModuleRegistry>,
    ready_once: AtomicBool,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        // Gateway reconnects replay the ready event; the startup work below
        // must only run once.
        if self.ready_once.swap(true, Ordering::SeqCst) {
            info!("Gateway session resumed as '{}'", ready.user.name);
            return;
        }
        info!("Logged in as '{}'", ready.user.name);

        // Command deployment goes through the application endpoint, which
        // needs the id the gateway just told us (unless overridden).
        match self.app.config.application_id {
            Some(id) => ctx.http.set_application_id(ApplicationId::new(id)),
            None => ctx.http.set_application_id(ready.application.id),
        }

        ctx.set_presence(
            Some(ActivityData::playing(&self.app.config.status_message)),
            OnlineStatus::Online,
        );

        match self.app.commands.deploy(&ctx.http, &self.modules).await {
            DeployOutcome::Deployed(count) => info!("Deployed {count} application commands"),
            DeployOutcome::Skipped => warn!("No commands to deploy"),
            DeployOutcome::Failed => warn!("Command deployment failed, continuing without"),
        }

        {
            let app = self.app.clone();
            let ctx = ctx.clone();
            self.app.own_task(tokio::spawn(async move {
                let statuses = [
                    app.config.status_message.clone(),
                    "/help".to_string(),
                    format!("{} modules loaded", app.catalog().len()),
                ];
                let mut interval = tokio::time::interval(STATUS_ROTATION_INTERVAL);
                interval.tick().await;
                let mut index = 0usize;
                loop {
                    interval.tick().await;
                    index = (index + 1) % statuses.len();
                    ctx.set_presence(
                        Some(ActivityData::playing(&statuses[index])),
                        OnlineStatus::Online,
                    );
                }
            }));
        }

        if self.app.config.web_enabled {
            let state = WebState {
                app: self.app.clone(),
                modules: self.modules.clone(),
            };
            self.app.own_task(tokio::spawn(async move {
                if let Err(e) = web::serve(state).await {
                    error!("Dashboard API stopped: {e:#}");
                }
            }));
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                dispatcher::dispatch_command(&self.modules, &ctx, &command).await;
            }
            Interaction::Component(component) => match component.data.kind {
                ComponentInteractionDataKind::Button => {
                    dispatcher::dispatch_button(&self.modules, &ctx, &component).await;
                }
                ComponentInteractionDataKind::StringSelect { .. }
                | ComponentInteractionDataKind::UserSelect { .. }
                | ComponentInteractionDataKind::RoleSelect { .. }
                | ComponentInteractionDataKind::MentionableSelect { .. }
                | ComponentInteractionDataKind::ChannelSelect { .. } => {
                    dispatcher::dispatch_select(&self.modules, &ctx, &component).await;
                }
                _ => {}
            },
            Interaction::Modal(modal) => {
                dispatcher::dispatch_modal(&self.modules, &ctx, &modal).await;
            }
            // Pings and autocompletes have no module surface.
            _ => {}
        }
    }

    async fn guild_member_addition(&self, ctx: Context, member: Member) {
        let candidates = self.modules.with_capability(|c| c.member_events);
        dispatcher::broadcast_members(&candidates, |m| m.member_join(&ctx, &member)).await;
    }

    async fn guild_member_removal(
        &self,
        ctx: Context,
        guild_id: GuildId,
        user: User,
        _member: Option<Member>,
    ) {
        let candidates = self.modules.with_capability(|c| c.member_events);
        dispatcher::broadcast_members(&candidates, |m| m.member_leave(&ctx, guild_id, &user))
            .await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.log_dir);
    info!("Starting bot (config: {config:?})");

    let store = ConfigStore::open(&config.config_dir, default_tree(&config));
    let app = Arc::new(AppContext::new(config, store));
    let modules = Arc::new(load_modules(&app, &builtin_modules()).await);

    {
        let saver = app.clone();
        app.own_task(tokio::spawn(async move {
            let mut interval = tokio::time::interval(AUTOSAVE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = saver.store.save() {
                    warn!("Periodic config save failed: {e}");
                }
            }
        }));
    }

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS;
    let mut client = Client::builder(&app.config.discord_token, intents)
        .event_handler(Handler {
            app: app.clone(),
            modules,
            ready_once: AtomicBool::new(false),
        })
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!("Client error: {e:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
    }

    shard_manager.shutdown_all().await;
    app.shutdown();
    Ok(())
}
