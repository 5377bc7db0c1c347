//! Support tickets: a panel button opens a private channel visible to the
//! requester and the staff role, with a close button that tears it down.

use async_trait::async_trait;
use serenity::all::{
    ButtonStyle, ChannelId, ChannelType, CommandInteraction, CommandOptionType,
    ComponentInteraction, Context, CreateActionRow, CreateButton, CreateChannel, CreateCommand,
    CreateCommandOption, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
    CreateMessage, PermissionOverwrite, PermissionOverwriteType, Permissions, ResolvedValue,
    RoleId, UserId,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::commands::CommandSpec;
use crate::context::AppContext;
use crate::modules::welcome::reply_embed;
use crate::modules::{Capabilities, Module};

const BLURPLE: u32 = 0x5865F2;
const GREEN: u32 = 0x43B581;
const RED: u32 = 0xF04747;

/// Grace period between the close acknowledgment and the channel deletion,
/// so the requester sees the confirmation before the channel vanishes.
pub const CLOSE_GRACE_DELAY: Duration = Duration::from_secs(2);

pub struct TicketModule {
    app: Arc<AppContext>,
    enabled: AtomicBool,
    /// Open ticket channel per requester. One ticket at a time.
    active_tickets: Mutex<HashMap<UserId, ChannelId>>,
}

impl TicketModule {
    pub fn create(app: Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>> {
        let enabled = app.store.get_bool("modules.ticket.enabled", true);
        Ok(Arc::new(Self {
            app,
            enabled: AtomicBool::new(enabled),
            active_tickets: Mutex::new(HashMap::new()),
        }))
    }

    fn category_id(&self) -> Option<ChannelId> {
        self.app
            .store
            .get_id("modules.ticket.category_id")
            .map(ChannelId::new)
    }

    fn admin_role_id(&self) -> Option<RoleId> {
        self.app
            .store
            .get_id("modules.ticket.admin_role_id")
            .map(RoleId::new)
    }

    async fn handle_panel(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<()> {
        let embed = CreateEmbed::new()
            .title("Support tickets")
            .description("Press the button below to open a private ticket with the staff.")
            .color(BLURPLE);
        let row = CreateActionRow::Buttons(vec![CreateButton::new("create_ticket")
            .label("Open a ticket")
            .style(ButtonStyle::Primary)]);

        interaction
            .channel_id
            .send_message(
                &ctx.http,
                CreateMessage::new().embed(embed).components(vec![row]),
            )
            .await?;

        reply_embed(
            ctx,
            interaction,
            CreateEmbed::new().title("Ticket panel created").color(GREEN),
            true,
        )
        .await;
        Ok(())
    }

    async fn handle_set_category(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
        args: &[(&str, ResolvedValue<'_>)],
    ) -> anyhow::Result<()> {
        let channel = args.iter().find_map(|(_, value)| match value {
            ResolvedValue::Channel(channel) => Some(channel),
            _ => None,
        });
        let Some(channel) = channel else {
            anyhow::bail!("category option missing");
        };
        if channel.kind != ChannelType::Category {
            reply_embed(
                ctx,
                interaction,
                CreateEmbed::new()
                    .title("Not a category")
                    .description("Ticket channels need a channel **category** to live under.")
                    .color(RED),
                true,
            )
            .await;
            return Ok(());
        }

        self.app
            .store
            .set("modules.ticket.category_id", json!(channel.id.to_string()));
        if let Err(e) = self.app.store.save() {
            warn!("Failed to persist ticket category: {e}");
        }

        reply_embed(
            ctx,
            interaction,
            CreateEmbed::new()
                .title("Ticket category updated")
                .description(format!("New tickets open under <#{}>.", channel.id))
                .color(GREEN),
            false,
        )
        .await;
        Ok(())
    }

    async fn handle_set_admin_role(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
        args: &[(&str, ResolvedValue<'_>)],
    ) -> anyhow::Result<()> {
        let role = args.iter().find_map(|(_, value)| match value {
            ResolvedValue::Role(role) => Some(role),
            _ => None,
        });
        let Some(role) = role else {
            anyhow::bail!("role option missing");
        };

        self.app
            .store
            .set("modules.ticket.admin_role_id", json!(role.id.to_string()));
        if let Err(e) = self.app.store.save() {
            warn!("Failed to persist ticket admin role: {e}");
        }

        reply_embed(
            ctx,
            interaction,
            CreateEmbed::new()
                .title("Ticket staff role updated")
                .description(format!("Members with <@&{}> can see tickets.", role.id))
                .color(GREEN),
            false,
        )
        .await;
        Ok(())
    }

    async fn handle_create(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
    ) -> anyhow::Result<()> {
        let Some(guild_id) = interaction.guild_id else {
            component_reply(ctx, interaction, "Tickets can only be opened inside a server.").await;
            return Ok(());
        };

        let existing = self
            .active_tickets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&interaction.user.id)
            .copied();
        if let Some(channel_id) = existing {
            component_reply(
                ctx,
                interaction,
                &format!("You already have an open ticket: <#{channel_id}>."),
            )
            .await;
            return Ok(());
        }

        let mut permissions = vec![
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Role(RoleId::new(guild_id.get())),
            },
            PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(interaction.user.id),
            },
        ];
        if let Some(role_id) = self.admin_role_id() {
            permissions.push(PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Role(role_id),
            });
        }

        let mut builder = CreateChannel::new(ticket_channel_name(&interaction.user.name))
            .kind(ChannelType::Text)
            .permissions(permissions);
        if let Some(category) = self.category_id() {
            builder = builder.category(category);
        }

        let channel = guild_id.create_channel(&ctx.http, builder).await?;
        self.active_tickets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(interaction.user.id, channel.id);

        let embed = CreateEmbed::new()
            .title("Ticket opened")
            .description(format!(
                "<@{}>, describe your issue here. Staff will be with you shortly.",
                interaction.user.id
            ))
            .color(BLURPLE);
        let row = CreateActionRow::Buttons(vec![CreateButton::new("close_ticket")
            .label("Close ticket")
            .style(ButtonStyle::Danger)]);
        channel
            .send_message(
                &ctx.http,
                CreateMessage::new().embed(embed).components(vec![row]),
            )
            .await?;

        component_reply(
            ctx,
            interaction,
            &format!("Your ticket is ready: <#{}>.", channel.id),
        )
        .await;
        info!("Ticket {} opened for '{}'", channel.id, interaction.user.name);
        Ok(())
    }

    async fn handle_close(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
    ) -> anyhow::Result<()> {
        let channel_id = interaction.channel_id;

        component_reply(ctx, interaction, "This ticket will close in a moment.").await;

        self.active_tickets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, open| *open != channel_id);

        tokio::time::sleep(CLOSE_GRACE_DELAY).await;
        if let Err(e) = channel_id.delete(&ctx.http).await {
            warn!("Failed to delete ticket channel {channel_id}: {e}");
        } else {
            info!("Ticket {channel_id} closed by '{}'", interaction.user.name);
        }
        Ok(())
    }
}

#[async_trait]
impl Module for TicketModule {
    fn name(&self) -> &'static str {
        "ticket"
    }

    fn description(&self) -> &'static str {
        "Private support ticket channels"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            commands: true,
            buttons: true,
            ..Default::default()
        }
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::new(
            "ticket",
            CreateCommand::new("ticket")
                .description("Support ticket commands")
                .default_member_permissions(Permissions::MANAGE_GUILD)
                .add_option(CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "panel",
                    "Post the ticket panel in this channel",
                ))
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::SubCommand,
                        "category",
                        "Set the category ticket channels open under",
                    )
                    .add_sub_option(
                        CreateCommandOption::new(
                            CommandOptionType::Channel,
                            "category",
                            "Category for ticket channels",
                        )
                        .required(true),
                    ),
                )
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::SubCommand,
                        "admin-role",
                        "Set the staff role that can see tickets",
                    )
                    .add_sub_option(
                        CreateCommandOption::new(
                            CommandOptionType::Role,
                            "role",
                            "Staff role",
                        )
                        .required(true),
                    ),
                ),
        )]
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.app.set_module_enabled_flag(self.name(), enabled);
        info!("Ticket module {}", if enabled { "enabled" } else { "disabled" });
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<bool> {
        if interaction.data.name != "ticket" {
            return Ok(false);
        }
        if !self.enabled() {
            reply_embed(
                ctx,
                interaction,
                CreateEmbed::new()
                    .title("Module disabled")
                    .description("The ticket module is currently disabled.")
                    .color(RED),
                true,
            )
            .await;
            return Ok(true);
        }

        for option in interaction.data.options() {
            if let ResolvedValue::SubCommand(args) = &option.value {
                let args: Vec<(&str, ResolvedValue<'_>)> = args
                    .iter()
                    .map(|arg| (arg.name, arg.value.clone()))
                    .collect();
                match option.name {
                    "panel" => self.handle_panel(ctx, interaction).await?,
                    "category" => self.handle_set_category(ctx, interaction, &args).await?,
                    "admin-role" => self.handle_set_admin_role(ctx, interaction, &args).await?,
                    _ => {}
                }
            }
        }
        Ok(true)
    }

    async fn handle_button(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
    ) -> anyhow::Result<bool> {
        if !self.enabled() {
            return Ok(false);
        }
        match interaction.data.custom_id.as_str() {
            "create_ticket" => {
                self.handle_create(ctx, interaction).await?;
                Ok(true)
            }
            "close_ticket" => {
                self.handle_close(ctx, interaction).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Discord channel names are lowercase with dashes; anything else in the
/// username is dropped.
fn ticket_channel_name(username: &str) -> String {
    let cleaned: String = username
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "ticket-user".to_string()
    } else {
        format!("ticket-{cleaned}")
    }
}

async fn component_reply(ctx: &Context, interaction: &ComponentInteraction, content: &str) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    );
    if let Err(e) = interaction.create_response(&ctx.http, response).await {
        warn!("Failed to reply to component interaction: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_channel_name_sanitized() {
        assert_eq!(ticket_channel_name("Alice"), "ticket-alice");
        assert_eq!(ticket_channel_name("Bob Smith!"), "ticket-bob-smith");
        assert_eq!(ticket_channel_name("***"), "ticket-user");
    }

    #[test]
    fn test_zero_category_id_reads_as_unset() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::context::testutil::test_context(dir.path());
        app.store
            .set("modules.ticket.category_id", serde_json::json!("0"));

        let module = TicketModule {
            app,
            enabled: AtomicBool::new(true),
            active_tickets: Mutex::new(HashMap::new()),
        };
        // ChannelId::new panics on 0; a zero stored via the dashboard must
        // come back as "no category" instead.
        assert_eq!(module.category_id(), None);
        assert_eq!(module.admin_role_id(), None);
    }

    #[test]
    fn test_one_ticket_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::context::testutil::test_context(dir.path());
        let module = TicketModule {
            app,
            enabled: AtomicBool::new(true),
            active_tickets: Mutex::new(HashMap::new()),
        };

        let user = UserId::new(7);
        module
            .active_tickets
            .lock()
            .unwrap()
            .insert(user, ChannelId::new(99));
        assert!(module.active_tickets.lock().unwrap().contains_key(&user));

        // Closing by channel frees the slot.
        module
            .active_tickets
            .lock()
            .unwrap()
            .retain(|_, open| *open != ChannelId::new(99));
        assert!(!module.active_tickets.lock().unwrap().contains_key(&user));
    }
}
