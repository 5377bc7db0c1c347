//! Routes each inbound interaction to the first module that claims it.
//!
//! All four paths share one policy core, [`route_first`]: walk the module
//! registry in registration order, stop at the first handler returning
//! `true`. The command path treats a handler error as fatal for that
//! interaction (loud, user-visible apology); button/modal/select paths log
//! the error and keep scanning (quiet, best-effort).

use serenity::all::{
    CommandInteraction, ComponentInteraction, Context, CreateInteractionResponse,
    CreateInteractionResponseMessage, ModalInteraction,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::modules::{Module, ModuleRegistry};

const ERROR_REPLY: &str = "Something went wrong while running that command. Please try again later.";
const NO_HANDLER_REPLY: &str = "No module is able to handle that command.";

#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A module claimed the interaction; the walk stopped there.
    Handled { module: &'static str },
    /// Every candidate declined.
    Unhandled,
    /// A module failed and the walk was halted (command path only).
    Failed { module: &'static str },
}

/// At-most-one-responder walk. `halt_on_error` selects the command path's
/// stop-on-failure behavior; component paths pass `false` and keep scanning
/// past a failing module.
pub async fn route_first<'a, F, Fut>(
    modules: &'a [Arc<dyn Module>],
    halt_on_error: bool,
    mut invoke: F,
) -> RouteOutcome
where
    F: FnMut(&'a Arc<dyn Module>) -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    for module in modules {
        match invoke(module).await {
            Ok(true) => {
                return RouteOutcome::Handled {
                    module: module.name(),
                }
            }
            Ok(false) => continue,
            Err(e) => {
                error!("Module '{}' handler failed: {e:#}", module.name());
                if halt_on_error {
                    return RouteOutcome::Failed {
                        module: module.name(),
                    };
                }
            }
        }
    }
    RouteOutcome::Unhandled
}

pub async fn dispatch_command(
    modules: &ModuleRegistry,
    ctx: &Context,
    interaction: &CommandInteraction,
) {
    info!(
        "'{}' invoked command '{}'",
        interaction.user.name, interaction.data.name
    );

    let candidates = modules.with_capability(|c| c.commands);
    let outcome = route_first(&candidates, true, |m| m.handle_command(ctx, interaction)).await;

    match outcome {
        RouteOutcome::Handled { module } => {
            debug!("Command '{}' handled by '{module}'", interaction.data.name);
        }
        RouteOutcome::Failed { .. } => {
            ephemeral_reply(ctx, interaction, ERROR_REPLY).await;
        }
        RouteOutcome::Unhandled => {
            warn!("No module handles command '{}'", interaction.data.name);
            ephemeral_reply(ctx, interaction, NO_HANDLER_REPLY).await;
        }
    }
}

pub async fn dispatch_button(
    modules: &ModuleRegistry,
    ctx: &Context,
    interaction: &ComponentInteraction,
) {
    let candidates = modules.with_capability(|c| c.buttons);
    let outcome = route_first(&candidates, false, |m| m.handle_button(ctx, interaction)).await;
    if outcome == RouteOutcome::Unhandled {
        debug!("Button '{}' not claimed", interaction.data.custom_id);
    }
}

pub async fn dispatch_select(
    modules: &ModuleRegistry,
    ctx: &Context,
    interaction: &ComponentInteraction,
) {
    let candidates = modules.with_capability(|c| c.selects);
    let outcome = route_first(&candidates, false, |m| m.handle_select(ctx, interaction)).await;
    if outcome == RouteOutcome::Unhandled {
        debug!("Select menu '{}' not claimed", interaction.data.custom_id);
    }
}

pub async fn dispatch_modal(
    modules: &ModuleRegistry,
    ctx: &Context,
    interaction: &ModalInteraction,
) {
    let candidates = modules.with_capability(|c| c.modals);
    let outcome = route_first(&candidates, false, |m| m.handle_modal(ctx, interaction)).await;
    if outcome == RouteOutcome::Unhandled {
        debug!("Modal '{}' not claimed", interaction.data.custom_id);
    }
}

/// Membership events are broadcast to every interested module, never
/// stopped at the first responder. A failing module does not block the rest.
pub async fn broadcast_members<'a, F, Fut>(modules: &'a [Arc<dyn Module>], mut invoke: F)
where
    F: FnMut(&'a Arc<dyn Module>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    for module in modules {
        if let Err(e) = invoke(module).await {
            error!("Module '{}' membership hook failed: {e:#}", module.name());
        }
    }
}

/// Best-effort ephemeral reply. If the interaction was already acknowledged
/// the API rejects this; that is fine, the user has seen something.
async fn ephemeral_reply(ctx: &Context, interaction: &CommandInteraction, content: &str) {
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    );
    if let Err(e) = interaction.create_response(&ctx.http, response).await {
        debug!("Fallback reply not delivered (likely already acknowledged): {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil::StubModule;
    use crate::modules::Capabilities;

    fn caps() -> Capabilities {
        Capabilities {
            commands: true,
            buttons: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_responder_wins() {
        // Two modules both claim; only the first-registered may be invoked.
        let first = Arc::new(StubModule::new("first", caps()).claiming());
        let second = Arc::new(StubModule::new("second", caps()).claiming());
        let modules: Vec<Arc<dyn Module>> = vec![first.clone(), second.clone()];

        let stubs = [first.clone(), second.clone()];
        let outcome = route_first(&modules, true, |m| {
            let stub = stubs
                .iter()
                .find(|s| s.module_name == m.name())
                .expect("stub")
                .clone();
            async move { stub.invoke() }
        })
        .await;

        assert_eq!(outcome, RouteOutcome::Handled { module: "first" });
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn test_command_path_halts_on_error() {
        let failing = Arc::new(StubModule::new("failing", caps()).failing());
        let after = Arc::new(StubModule::new("after", caps()).claiming());
        let modules: Vec<Arc<dyn Module>> = vec![failing.clone(), after.clone()];

        let stubs = [failing.clone(), after.clone()];
        let outcome = route_first(&modules, true, |m| {
            let stub = stubs
                .iter()
                .find(|s| s.module_name == m.name())
                .expect("stub")
                .clone();
            async move { stub.invoke() }
        })
        .await;

        assert_eq!(outcome, RouteOutcome::Failed { module: "failing" });
        // The error is not retried against remaining modules.
        assert_eq!(after.call_count(), 0);
    }

    #[tokio::test]
    async fn test_component_path_survives_error() {
        // A throwing button handler must not stop the scan, and the process
        // must simply carry on when nothing claims the interaction.
        let failing = Arc::new(StubModule::new("failing", caps()).failing());
        let declines = Arc::new(StubModule::new("declines", caps()));
        let modules: Vec<Arc<dyn Module>> = vec![failing.clone(), declines.clone()];

        let stubs = [failing.clone(), declines.clone()];
        let outcome = route_first(&modules, false, |m| {
            let stub = stubs
                .iter()
                .find(|s| s.module_name == m.name())
                .expect("stub")
                .clone();
            async move { stub.invoke() }
        })
        .await;

        assert_eq!(outcome, RouteOutcome::Unhandled);
        assert_eq!(failing.call_count(), 1);
        assert_eq!(declines.call_count(), 1);
    }

    #[tokio::test]
    async fn test_all_decline_is_unhandled() {
        let a = Arc::new(StubModule::new("a", caps()));
        let b = Arc::new(StubModule::new("b", caps()));
        let modules: Vec<Arc<dyn Module>> = vec![a.clone(), b.clone()];

        let stubs = [a.clone(), b.clone()];
        let outcome = route_first(&modules, true, |m| {
            let stub = stubs
                .iter()
                .find(|s| s.module_name == m.name())
                .expect("stub")
                .clone();
            async move { stub.invoke() }
        })
        .await;

        assert_eq!(outcome, RouteOutcome::Unhandled);
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_module() {
        let a = Arc::new(StubModule::new("a", caps()).failing());
        let b = Arc::new(StubModule::new("b", caps()));
        let modules: Vec<Arc<dyn Module>> = vec![a.clone(), b.clone()];

        let stubs = [a.clone(), b.clone()];
        broadcast_members(&modules, |m| {
            let stub = stubs
                .iter()
                .find(|s| s.module_name == m.name())
                .expect("stub")
                .clone();
            async move { stub.invoke().map(|_| ()) }
        })
        .await;

        // The failing module never prevents later modules from seeing the
        // membership event.
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
    }
}
