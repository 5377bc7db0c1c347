//! `/help` and `/botinfo`: a module overview with a select menu drilling
//! into one module at a time.

use async_trait::async_trait;
use serenity::all::{
    CommandInteraction, ComponentInteraction, ComponentInteractionDataKind, Context,
    CreateActionRow, CreateCommand, CreateEmbed, CreateInteractionResponse,
    CreateInteractionResponseMessage, CreateSelectMenu, CreateSelectMenuKind,
    CreateSelectMenuOption,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::commands::CommandSpec;
use crate::context::AppContext;
use crate::modules::welcome::reply_embed;
use crate::modules::{Capabilities, Module};

const BLURPLE: u32 = 0x5865F2;

pub struct HelpModule {
    app: Arc<AppContext>,
    enabled: AtomicBool,
}

impl HelpModule {
    pub fn create(app: Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>> {
        let enabled = app.store.get_bool("modules.help.enabled", true);
        Ok(Arc::new(Self {
            app,
            enabled: AtomicBool::new(enabled),
        }))
    }

    fn overview(&self) -> (CreateEmbed, Option<CreateActionRow>) {
        let catalog = self.app.catalog();
        let mut embed = CreateEmbed::new()
            .title("Available modules")
            .description("Pick a module below for details.")
            .color(BLURPLE);
        for info in &catalog {
            let status = if info.enabled { "enabled" } else { "disabled" };
            embed = embed.field(
                format!("{} ({status})", info.name),
                info.description.clone(),
                false,
            );
        }

        let options: Vec<CreateSelectMenuOption> = catalog
            .iter()
            .map(|info| CreateSelectMenuOption::new(info.name.clone(), info.name.clone()))
            .collect();
        let row = if options.is_empty() {
            None
        } else {
            Some(CreateActionRow::SelectMenu(
                CreateSelectMenu::new(
                    "help_module_select",
                    CreateSelectMenuKind::String { options },
                )
                .placeholder("Select a module"),
            ))
        };
        (embed, row)
    }

    fn module_detail(&self, name: &str) -> CreateEmbed {
        match self.app.catalog().into_iter().find(|info| info.name == name) {
            Some(info) => CreateEmbed::new()
                .title(format!("Module: {}", info.name))
                .description(info.description)
                .field(
                    "Status",
                    if info.enabled { "enabled" } else { "disabled" },
                    true,
                )
                .color(BLURPLE),
            None => CreateEmbed::new()
                .title("Unknown module")
                .description(format!("No module named `{name}` is loaded."))
                .color(0xF04747),
        }
    }

    async fn handle_botinfo(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<()> {
        let catalog = self.app.catalog();
        let enabled = catalog.iter().filter(|info| info.enabled).count();
        let embed = CreateEmbed::new()
            .title("Bot status")
            .field("Uptime", format_uptime(self.app.uptime()), true)
            .field(
                "Modules",
                format!("{enabled} enabled / {} loaded", catalog.len()),
                true,
            )
            .field("Commands", self.app.commands.len().to_string(), true)
            .color(BLURPLE);
        reply_embed(ctx, interaction, embed, false).await;
        Ok(())
    }
}

#[async_trait]
impl Module for HelpModule {
    fn name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "Module overview and bot status"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            commands: true,
            selects: true,
            ..Default::default()
        }
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new(
                "help",
                CreateCommand::new("help").description("List the bot's modules"),
            ),
            CommandSpec::new(
                "botinfo",
                CreateCommand::new("botinfo").description("Show uptime and module counts"),
            ),
        ]
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.app.set_module_enabled_flag(self.name(), enabled);
        info!("Help module {}", if enabled { "enabled" } else { "disabled" });
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<bool> {
        match interaction.data.name.as_str() {
            "help" => {
                let (embed, row) = self.overview();
                let mut message = CreateInteractionResponseMessage::new().embed(embed);
                if let Some(row) = row {
                    message = message.components(vec![row]);
                }
                interaction
                    .create_response(&ctx.http, CreateInteractionResponse::Message(message))
                    .await?;
                Ok(true)
            }
            "botinfo" => {
                self.handle_botinfo(ctx, interaction).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn handle_select(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
    ) -> anyhow::Result<bool> {
        if interaction.data.custom_id != "help_module_select" {
            return Ok(false);
        }
        let selected = match &interaction.data.kind {
            ComponentInteractionDataKind::StringSelect { values } => values.first().cloned(),
            _ => None,
        };
        let Some(selected) = selected else {
            warn!("Module select arrived without a value");
            return Ok(true);
        };

        let update = CreateInteractionResponseMessage::new().embed(self.module_detail(&selected));
        interaction
            .create_response(&ctx.http, CreateInteractionResponse::UpdateMessage(update))
            .await?;
        Ok(true)
    }
}

fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
