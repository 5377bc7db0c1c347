//! Membership application forms: a prompt with two buttons, each opening a
//! modal built from configurable field lists, with an approve/reject review
//! step relayed to a staff channel.

use async_trait::async_trait;
use serenity::all::{
    ActionRowComponent, ButtonStyle, ChannelId, CommandInteraction, CommandOptionType,
    ComponentInteraction, Context, CreateActionRow, CreateButton, CreateCommand,
    CreateCommandOption, CreateEmbed, CreateInputText, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, CreateMessage,
    CreateModal, InputTextStyle,
    ModalInteraction, Permissions, ResolvedValue, RoleId, UserId,
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

/// Discord intermittently drops a follow-up sent immediately after a modal
/// acknowledgment; the gateway exposes no ready signal to wait on, so the
/// hand-off to the next form page waits a fixed delay instead.
pub const MODAL_HANDOFF_DELAY: Duration = Duration::from_millis(500);

const DEFAULT_FORM1: [&str; 4] = ["Nickname", "Age", "Region", "Gaming experience"];
const DEFAULT_FORM2: [&str; 4] = [
    "Why do you want to join?",
    "Available play hours",
    "Current guild",
    "Anything else",
];

/// In-flight application, keyed by applicant. Dropped once the second form
/// is submitted; lost on restart, which is acceptable for a form fill.
struct PendingForm {
    basic: Vec<(String, String)>,
}

pub struct RegistrationModule {
    app: Arc<AppContext>,
    enabled: AtomicBool,
    pending_forms: Mutex<HashMap<UserId, PendingForm>>,
}

impl RegistrationModule {
    pub fn create(app: Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>> {
        let enabled = app.store.get_bool("modules.registration.enabled", true);
        Ok(Arc::new(Self {
            app,
            enabled: AtomicBool::new(enabled),
            pending_forms: Mutex::new(HashMap::new()),
        }))
    }

    fn form_fields(&self, page: u8) -> Vec<String> {
        let (key, defaults): (&str, &[&str]) = if page == 1 {
            ("modules.registration.form1_fields", &DEFAULT_FORM1)
        } else {
            ("modules.registration.form2_fields", &DEFAULT_FORM2)
        };
        self.app
            .store
            .get_str_array(key)
            .filter(|fields| !fields.is_empty())
            .unwrap_or_else(|| defaults.iter().map(|s| s.to_string()).collect())
    }

    /// Part 1 answers for an in-flight application, left in place until
    /// [`Self::complete_pending`].
    fn pending_basic(&self, user: UserId) -> Option<Vec<(String, String)>> {
        self.pending_forms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user)
            .map(|pending| pending.basic.clone())
    }

    fn complete_pending(&self, user: UserId) {
        self.pending_forms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&user);
    }

    fn review_channel(&self) -> Option<ChannelId> {
        self.app
            .store
            .get_id("modules.registration.channel_id")
            .map(ChannelId::new)
    }

    async fn handle_setup(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
        args: &[(&str, ResolvedValue<'_>)],
    ) -> anyhow::Result<()> {
        let channel_id = args.iter().find_map(|(_, value)| match value {
            ResolvedValue::Channel(channel) => Some(channel.id),
            _ => None,
        });
        let Some(channel_id) = channel_id else {
            anyhow::bail!("channel option missing");
        };

        self.app.store.set(
            "modules.registration.channel_id",
            json!(channel_id.to_string()),
        );
        if let Err(e) = self.app.store.save() {
            warn!("Failed to persist registration channel: {e}");
        }

        reply_embed(
            ctx,
            interaction,
            CreateEmbed::new()
                .title("Application channel updated")
                .description(format!("Submitted applications go to <#{channel_id}>."))
                .color(GREEN),
            false,
        )
        .await;
        info!("Registration review channel set to {channel_id}");
        Ok(())
    }

    async fn handle_create_prompt(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<()> {
        if self.review_channel().is_none() {
            reply_embed(
                ctx,
                interaction,
                CreateEmbed::new()
                    .title("Setup required")
                    .description(
                        "No application channel configured. Run `/registration setup` first.",
                    )
                    .color(BLURPLE),
                true,
            )
            .await;
            return Ok(());
        }

        let embed = CreateEmbed::new()
            .title("Membership application")
            .description("Use the buttons below to fill in the application forms.")
            .field("Part 1", "Basic information", false)
            .field("Part 2", "Details, reviewed by staff", false)
            .color(BLURPLE);
        let row = CreateActionRow::Buttons(vec![
            CreateButton::new("registration_form1")
                .label("Part 1 (basics)")
                .style(ButtonStyle::Primary),
            CreateButton::new("registration_form2")
                .label("Part 2 (details)")
                .style(ButtonStyle::Success),
        ]);

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
            CreateEmbed::new()
                .title("Application prompt created")
                .color(GREEN),
            true,
        )
        .await;
        Ok(())
    }

    async fn show_form(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
        page: u8,
    ) -> anyhow::Result<()> {
        let fields = self.form_fields(page);
        let title = if page == 1 {
            "Application part 1 (basics)"
        } else {
            "Application part 2 (details)"
        };

        let rows: Vec<CreateActionRow> = fields
            .iter()
            .enumerate()
            .map(|(index, label)| {
                // Long-answer styling for the open-ended detail questions.
                let long = page == 2 && (index == 0 || index == 3);
                let style = if long {
                    InputTextStyle::Paragraph
                } else {
                    InputTextStyle::Short
                };
                let max = if long { 1000 } else { 100 };
                CreateActionRow::InputText(
                    CreateInputText::new(style, label, format!("field{}", index + 1))
                        .required(true)
                        .max_length(max),
                )
            })
            .collect();

        let modal = CreateModal::new(format!("registration_form{page}_modal"), title)
            .components(rows);
        interaction
            .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
            .await?;
        Ok(())
    }

    async fn handle_form_submit(
        &self,
        ctx: &Context,
        interaction: &ModalInteraction,
        page: u8,
    ) -> anyhow::Result<()> {
        let fields = self.form_fields(page);
        let values = collect_form_values(interaction, &fields);

        let Some(channel) = self.review_channel() else {
            modal_reply(
                ctx,
                interaction,
                "No application channel is configured. Please contact an admin.",
            )
            .await;
            return Ok(());
        };

        let mut embed = CreateEmbed::new()
            .title(if page == 1 {
                "Application part 1 (basics)"
            } else {
                "Application part 2 (details)"
            })
            .description(format!(
                "Application from {} ({})",
                interaction.user.name, interaction.user.id
            ))
            .color(BLURPLE);
        if page == 2 {
            // Attach the first page's answers when the applicant filled it
            // in this session. The entry is only dropped once the relay
            // succeeds, so a failed send keeps part 1 recoverable.
            if let Some(basic) = self.pending_basic(interaction.user.id) {
                for (label, value) in basic {
                    embed = embed.field(label, value, true);
                }
            }
        }
        for (label, value) in &values {
            embed = embed.field(label, value, page == 1);
        }

        let mut message = CreateMessage::new().embed(embed);
        if page == 2 {
            message = message.components(vec![review_buttons(interaction.user.id, false)]);
        }
        channel.send_message(&ctx.http, message).await?;

        if page == 1 {
            self.pending_forms
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(interaction.user.id, PendingForm { basic: values });
        } else {
            self.complete_pending(interaction.user.id);
        }

        modal_reply(
            ctx,
            interaction,
            if page == 1 {
                "Part 1 submitted."
            } else {
                "Part 2 submitted. Staff will review your application."
            },
        )
        .await;
        info!(
            "'{}' submitted application part {page}",
            interaction.user.name
        );

        if page == 1 {
            tokio::time::sleep(MODAL_HANDOFF_DELAY).await;
            let followup = CreateInteractionResponseFollowup::new()
                .content("Continue with **Part 2 (details)** when you are ready.")
                .ephemeral(true);
            if let Err(e) = interaction.create_followup(&ctx.http, followup).await {
                warn!("Part 2 reminder not delivered: {e}");
            }
        }
        Ok(())
    }

    fn reviewer_allowed(&self, interaction: &ComponentInteraction) -> bool {
        let Some(role_id) = self.app.store.get_id("modules.registration.approval_role_id") else {
            // No role configured: anyone who can see the review channel.
            return true;
        };
        interaction
            .member
            .as_ref()
            .map(|member| member.roles.contains(&RoleId::new(role_id)))
            .unwrap_or(false)
    }

    async fn handle_approve(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
        applicant: UserId,
    ) -> anyhow::Result<()> {
        if !self.reviewer_allowed(interaction) {
            component_reply(ctx, interaction, "You are not allowed to review applications.").await;
            return Ok(());
        }

        let update = CreateInteractionResponseMessage::new()
            .components(vec![review_buttons(applicant, true)]);
        interaction
            .create_response(&ctx.http, CreateInteractionResponse::UpdateMessage(update))
            .await?;

        notify_applicant(
            ctx,
            applicant,
            CreateEmbed::new()
                .title("Application approved")
                .description("Your membership application has been approved. Welcome!")
                .color(GREEN),
        )
        .await;
        info!(
            "Application of {applicant} approved by '{}'",
            interaction.user.name
        );
        Ok(())
    }

    async fn handle_reject(
        &self,
        ctx: &Context,
        interaction: &ComponentInteraction,
        applicant: UserId,
    ) -> anyhow::Result<()> {
        if !self.reviewer_allowed(interaction) {
            component_reply(ctx, interaction, "You are not allowed to review applications.").await;
            return Ok(());
        }

        let modal = CreateModal::new(
            format!("registration_reject_reason_{applicant}"),
            "Rejection reason",
        )
        .components(vec![CreateActionRow::InputText(
            CreateInputText::new(InputTextStyle::Paragraph, "Reason", "reason")
                .required(true)
                .max_length(1000),
        )]);
        interaction
            .create_response(&ctx.http, CreateInteractionResponse::Modal(modal))
            .await?;
        Ok(())
    }

    async fn handle_reject_reason(
        &self,
        ctx: &Context,
        interaction: &ModalInteraction,
        applicant: UserId,
    ) -> anyhow::Result<()> {
        let reason = collect_form_values(interaction, &["Reason".to_string()])
            .into_iter()
            .map(|(_, value)| value)
            .next()
            .unwrap_or_default();

        notify_applicant(
            ctx,
            applicant,
            CreateEmbed::new()
                .title("Application rejected")
                .description(format!("Reason: {reason}"))
                .color(0xF04747),
        )
        .await;

        modal_reply(ctx, interaction, "Rejection recorded and sent to the applicant.").await;
        info!(
            "Application of {applicant} rejected by '{}'",
            interaction.user.name
        );
        Ok(())
    }
}

#[async_trait]
impl Module for RegistrationModule {
    fn name(&self) -> &'static str {
        "registration"
    }

    fn description(&self) -> &'static str {
        "Membership application forms with staff review"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            commands: true,
            buttons: true,
            modals: true,
            ..Default::default()
        }
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::new(
            "registration",
            CreateCommand::new("registration")
                .description("Membership application commands")
                .default_member_permissions(Permissions::MANAGE_GUILD)
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::SubCommand,
                        "setup",
                        "Set the channel that receives applications",
                    )
                    .add_sub_option(
                        CreateCommandOption::new(
                            CommandOptionType::Channel,
                            "channel",
                            "Channel for submitted applications",
                        )
                        .required(true),
                    ),
                )
                .add_option(CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "create",
                    "Post the application prompt in this channel",
                )),
        )]
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.app.set_module_enabled_flag(self.name(), enabled);
        info!(
            "Registration module {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    async fn handle_command(
        &self,
        ctx: &Context,
        interaction: &CommandInteraction,
    ) -> anyhow::Result<bool> {
        if interaction.data.name != "registration" {
            return Ok(false);
        }
        if !self.enabled() {
            component_unavailable(ctx, interaction).await;
            return Ok(true);
        }

        for option in interaction.data.options() {
            if let ResolvedValue::SubCommand(args) = &option.value {
                let args: Vec<(&str, ResolvedValue<'_>)> = args
                    .iter()
                    .map(|arg| (arg.name, arg.value.clone()))
                    .collect();
                match option.name {
                    "setup" => self.handle_setup(ctx, interaction, &args).await?,
                    "create" => self.handle_create_prompt(ctx, interaction).await?,
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
        let custom_id = interaction.data.custom_id.as_str();
        match custom_id {
            "registration_form1" => self.show_form(ctx, interaction, 1).await?,
            "registration_form2" => self.show_form(ctx, interaction, 2).await?,
            _ => {
                if let Some(applicant) = parse_user_suffix(custom_id, "registration_approve_") {
                    self.handle_approve(ctx, interaction, applicant).await?;
                } else if let Some(applicant) =
                    parse_user_suffix(custom_id, "registration_reject_")
                {
                    self.handle_reject(ctx, interaction, applicant).await?;
                } else {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn handle_modal(
        &self,
        ctx: &Context,
        interaction: &ModalInteraction,
    ) -> anyhow::Result<bool> {
        if !self.enabled() {
            return Ok(false);
        }
        let custom_id = interaction.data.custom_id.as_str();
        match custom_id {
            "registration_form1_modal" => self.handle_form_submit(ctx, interaction, 1).await?,
            "registration_form2_modal" => self.handle_form_submit(ctx, interaction, 2).await?,
            _ => {
                if let Some(applicant) =
                    parse_user_suffix(custom_id, "registration_reject_reason_")
                {
                    self.handle_reject_reason(ctx, interaction, applicant).await?;
                } else {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

fn review_buttons(applicant: UserId, decided: bool) -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new(format!("registration_approve_{applicant}"))
            .label(if decided { "Approved" } else { "Approve" })
            .style(ButtonStyle::Success)
            .disabled(decided),
        CreateButton::new(format!("registration_reject_{applicant}"))
            .label("Reject")
            .style(ButtonStyle::Danger)
            .disabled(decided),
    ])
}

/// `<prefix><user id>` custom ids carry the applicant through the review
/// round trip. Zero is not a valid snowflake and `UserId::new` rejects it.
fn parse_user_suffix(custom_id: &str, prefix: &str) -> Option<UserId> {
    custom_id
        .strip_prefix(prefix)?
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(UserId::new)
}

/// Pairs each configured field label with the submitted `fieldN` value.
fn collect_form_values(interaction: &ModalInteraction, fields: &[String]) -> Vec<(String, String)> {
    let mut inputs: HashMap<String, String> = HashMap::new();
    for row in &interaction.data.components {
        for component in &row.components {
            if let ActionRowComponent::InputText(input) = component {
                inputs.insert(
                    input.custom_id.clone(),
                    input.value.clone().unwrap_or_default(),
                );
            }
        }
    }
    fields
        .iter()
        .enumerate()
        .map(|(index, label)| {
            let value = inputs
                .remove(&format!("field{}", index + 1))
                .or_else(|| inputs.remove("reason"))
                .unwrap_or_default();
            (label.clone(), value)
        })
        .collect()
}

async fn notify_applicant(ctx: &Context, applicant: UserId, embed: CreateEmbed) {
    let user = match applicant.to_user(&ctx.http).await {
        Ok(user) => user,
        Err(e) => {
            warn!("Applicant {applicant} not found: {e}");
            return;
        }
    };
    if let Err(e) = user
        .direct_message(&ctx.http, CreateMessage::new().embed(embed))
        .await
    {
        warn!("Could not DM applicant {applicant}: {e}");
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

async fn modal_reply(ctx: &Context, interaction: &ModalInteraction, content: &str) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    );
    if let Err(e) = interaction.create_response(&ctx.http, response).await {
        warn!("Failed to reply to modal interaction: {e}");
    }
}

async fn component_unavailable(ctx: &Context, interaction: &CommandInteraction) {
    reply_embed(
        ctx,
        interaction,
        CreateEmbed::new()
            .title("Module disabled")
            .description("The registration module is currently disabled.")
            .color(0xF04747),
        true,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_suffix() {
        assert_eq!(
            parse_user_suffix("registration_approve_42", "registration_approve_"),
            Some(UserId::new(42))
        );
        assert_eq!(
            parse_user_suffix("registration_approve_nope", "registration_approve_"),
            None
        );
        assert_eq!(parse_user_suffix("other_42", "registration_approve_"), None);
        // UserId::new panics on 0; a forged custom id must not reach it.
        assert_eq!(
            parse_user_suffix("registration_approve_0", "registration_approve_"),
            None
        );
    }

    #[test]
    fn test_form_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::context::testutil::test_context(dir.path());
        app.store
            .set("modules.registration.form1_fields", serde_json::json!([]));

        let module = RegistrationModule {
            app,
            enabled: AtomicBool::new(true),
            pending_forms: Mutex::new(HashMap::new()),
        };
        assert_eq!(module.form_fields(1), DEFAULT_FORM1.to_vec());
    }

    #[test]
    fn test_pending_form_survives_until_completed() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::context::testutil::test_context(dir.path());
        let module = RegistrationModule {
            app,
            enabled: AtomicBool::new(true),
            pending_forms: Mutex::new(HashMap::new()),
        };

        let user = UserId::new(7);
        module.pending_forms.lock().unwrap().insert(
            user,
            PendingForm {
                basic: vec![("Nickname".to_string(), "blue".to_string())],
            },
        );

        // Reading for the relay embed must not consume the entry; a failed
        // relay would otherwise lose the applicant's answers.
        let basic = module.pending_basic(user).unwrap();
        assert_eq!(basic, vec![("Nickname".to_string(), "blue".to_string())]);
        assert!(module.pending_basic(user).is_some());

        module.complete_pending(user);
        assert!(module.pending_basic(user).is_none());
    }

    #[test]
    fn test_form_fields_use_configured_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::context::testutil::test_context(dir.path());
        app.store.set(
            "modules.registration.form2_fields",
            serde_json::json!(["Motivation", "Schedule"]),
        );

        let module = RegistrationModule {
            app,
            enabled: AtomicBool::new(true),
            pending_forms: Mutex::new(HashMap::new()),
        };
        assert_eq!(module.form_fields(2), vec!["Motivation", "Schedule"]);
    }
}
