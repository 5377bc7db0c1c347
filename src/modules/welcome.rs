//! Join/leave announcements with configurable channel and message templates.

use async_trait::async_trait;
use serenity::all::{
    ChannelId, CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
    GuildId, Member, Permissions, ResolvedValue, User,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::commands::CommandSpec;
use crate::config::DISCORD_EMBED_LIMIT;
use crate::context::AppContext;
use crate::modules::{Capabilities, Module};

const GREEN: u32 = 0x43B581;
const RED: u32 = 0xF04747;

pub struct WelcomeModule {
    app: Arc<AppContext>,
    enabled: AtomicBool,
}

impl WelcomeModule {
    pub fn create(app: Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>> {
        let enabled = app.store.get_bool("modules.welcome.enabled", true);
        Ok(Arc::new(Self {
            app,
            enabled: AtomicBool::new(enabled),
        }))
    }

    async fn notice_channel(&self, ctx: &Context, guild_id: GuildId) -> Option<ChannelId> {
        let Some(id) = self.app.store.get_id("welcome_channel_id") else {
            warn!("Welcome channel not configured");
            return None;
        };
        let channel = ChannelId::new(id);
        // The configured channel may have been deleted since.
        match channel.to_channel(&ctx.http).await {
            Ok(c) => match c.guild() {
                Some(g) if g.guild_id == guild_id => Some(channel),
                _ => {
                    warn!("Configured welcome channel {id} belongs to another guild");
                    None
                }
            },
            Err(_) => {
                warn!("Configured welcome channel {id} is not reachable");
                None
            }
        }
    }

    async fn handle_set_channel(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<()> {
        let mut channel_id = None;
        for option in interaction.data.options() {
            if let ResolvedValue::Channel(channel) = option.value {
                channel_id = Some(channel.id);
            }
        }
        let Some(channel_id) = channel_id else {
            anyhow::bail!("channel option missing");
        };

        self.app
            .store
            .set("welcome_channel_id", json!(channel_id.to_string()));
        if let Err(e) = self.app.store.save() {
            warn!("Failed to persist welcome channel: {e}");
        }

        reply_embed(
            ctx,
            interaction,
            CreateEmbed::new()
                .title("Welcome channel updated")
                .description(format!("Join/leave notices now go to <#{channel_id}>."))
                .color(GREEN),
            false,
        )
        .await;
        info!("Welcome channel set to {channel_id}");
        Ok(())
    }

    async fn handle_set_message(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<()> {
        let mut update = None;
        for option in interaction.data.options() {
            if let ResolvedValue::SubCommand(args) = &option.value {
                let key = match option.name {
                    "join" => "join_message",
                    "leave" => "leave_message",
                    _ => continue,
                };
                for arg in args {
                    if let ResolvedValue::String(message) = &arg.value {
                        update = Some((key, message.to_string()));
                    }
                }
            }
        }
        let Some((key, message)) = update else {
            anyhow::bail!("message option missing");
        };

        self.app
            .store
            .set(&format!("modules.welcome.{key}"), json!(message));
        if let Err(e) = self.app.store.save() {
            warn!("Failed to persist welcome message: {e}");
        }

        let preview = render_template(&message, &interaction.user.name, "this server", 0);
        reply_embed(
            ctx,
            interaction,
            CreateEmbed::new()
                .title("Welcome message updated")
                .field("Template", &message, false)
                .field("Preview", preview, false)
                .color(GREEN),
            false,
        )
        .await;
        Ok(())
    }

    async fn handle_toggle(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<()> {
        let mut enabled = None;
        for option in interaction.data.options() {
            if let ResolvedValue::Boolean(value) = option.value {
                enabled = Some(value);
            }
        }
        let Some(enabled) = enabled else {
            anyhow::bail!("enabled option missing");
        };

        self.set_enabled(enabled);
        self.app
            .store
            .set("modules.welcome.enabled", json!(enabled));
        if let Err(e) = self.app.store.save() {
            warn!("Failed to persist welcome toggle: {e}");
        }

        let (title, color) = if enabled {
            ("Welcome messages enabled", GREEN)
        } else {
            ("Welcome messages disabled", RED)
        };
        reply_embed(
            ctx,
            interaction,
            CreateEmbed::new().title(title).color(color),
            false,
        )
        .await;
        Ok(())
    }

    async fn announce(&self, ctx: &Context, guild_id: GuildId, user: &User, joined: bool) {
        let Some(channel) = self.notice_channel(ctx, guild_id).await else {
            return;
        };

        let (guild_name, member_count) = match guild_id.to_partial_guild_with_counts(&ctx.http).await
        {
            Ok(guild) => (guild.name, guild.approximate_member_count.unwrap_or(0)),
            Err(_) => ("this server".to_string(), 0),
        };

        let (key, fallback, title, color) = if joined {
            (
                "modules.welcome.join_message",
                "{username} joined {server}!",
                "Welcome!",
                GREEN,
            )
        } else {
            (
                "modules.welcome.leave_message",
                "{username} left {server}!",
                "Goodbye!",
                RED,
            )
        };

        let template = self
            .app
            .store
            .get_str(key)
            .unwrap_or_else(|| fallback.to_string());
        let mut text = render_template(&template, &user.name, &guild_name, member_count);
        clamp_to_embed_limit(&mut text);

        let embed = CreateEmbed::new()
            .title(title)
            .description(text)
            .color(color);
        if let Err(e) = channel
            .send_message(&ctx.http, CreateMessage::new().embed(embed))
            .await
        {
            warn!("Failed to send welcome notice: {e}");
        }
    }
}

#[async_trait]
impl Module for WelcomeModule {
    fn name(&self) -> &'static str {
        "welcome"
    }

    fn description(&self) -> &'static str {
        "Announces member joins and leaves"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            commands: true,
            member_events: true,
            ..Default::default()
        }
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(
                "welcome-channel",
                CreateCommand::new("welcome-channel")
                    .description("Set the channel for join/leave notices")
                    .default_member_permissions(Permissions::MANAGE_GUILD)
                    .add_option(
                        CreateCommandOption::new(
                            CommandOptionType::Channel,
                            "channel",
                            "Channel to send notices to",
                        )
                        .required(true),
                    ),
            ),
            CommandSpec::new(
                "welcome-message",
                CreateCommand::new("welcome-message")
                    .description("Set the join or leave message template")
                    .default_member_permissions(Permissions::MANAGE_GUILD)
                    .add_option(
                        CreateCommandOption::new(
                            CommandOptionType::SubCommand,
                            "join",
                            "Set the join message",
                        )
                        .add_sub_option(
                            CreateCommandOption::new(
                                CommandOptionType::String,
                                "message",
                                "Template (placeholders: {username}, {server}, {count})",
                            )
                            .required(true),
                        ),
                    )
                    .add_option(
                        CreateCommandOption::new(
                            CommandOptionType::SubCommand,
                            "leave",
                            "Set the leave message",
                        )
                        .add_sub_option(
                            CreateCommandOption::new(
                                CommandOptionType::String,
                                "message",
                                "Template (placeholders: {username}, {server}, {count})",
                            )
                            .required(true),
                        ),
                    ),
            ),
            CommandSpec::new(
                "welcome-toggle",
                CreateCommand::new("welcome-toggle")
                    .description("Enable or disable join/leave notices")
                    .default_member_permissions(Permissions::MANAGE_GUILD)
                    .add_option(
                        CreateCommandOption::new(
                            CommandOptionType::Boolean,
                            "enabled",
                            "Whether notices are sent",
                        )
                        .required(true),
                    ),
            ),
        ]
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.app.set_module_enabled_flag(self.name(), enabled);
        info!(
            "Welcome module {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    async fn start(&self) -> anyhow::Result<()> {
        if !self.enabled() {
            warn!("Welcome module is disabled");
        }
        Ok(())
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<bool> {
        match interaction.data.name.as_str() {
            "welcome-channel" => self.handle_set_channel(ctx, interaction).await?,
            "welcome-message" => self.handle_set_message(ctx, interaction).await?,
            "welcome-toggle" => self.handle_toggle(ctx, interaction).await?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    async fn member_join(&self, ctx: &Context, member: &Member) -> anyhow::Result<()> {
        if self.enabled() {
            self.announce(ctx, member.guild_id, &member.user, true).await;
        }
        Ok(())
    }

    async fn member_leave(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        user: &User,
    ) -> anyhow::Result<()> {
        if self.enabled() {
            self.announce(ctx, guild_id, user, false).await;
        }
        Ok(())
    }
}

/// Fills the first occurrence of each placeholder, mirroring how operators
/// have written templates since the channel-message era.
fn render_template(template: &str, username: &str, server: &str, count: u64) -> String {
    template
        .replacen("{username}", username, 1)
        .replacen("{server}", server, 1)
        .replacen("{count}", &count.to_string(), 1)
}

/// Trims to the embed description limit without splitting a character.
fn clamp_to_embed_limit(text: &mut String) {
    if text.len() <= DISCORD_EMBED_LIMIT {
        return;
    }
    let cut = (0..=DISCORD_EMBED_LIMIT)
        .rev()
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(0);
    text.truncate(cut);
}

pub(crate) async fn reply_embed(
    ctx: &Context,
    interaction: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .embed(embed)
            .ephemeral(ephemeral),
    );
    if let Err(e) = interaction.create_response(&ctx.http, response).await {
        warn!("Failed to reply to interaction: {e}");
    }
}
