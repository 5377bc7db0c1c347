//! Feature-module framework: the `Module` trait, the name-keyed registry,
//! and the boot-time loader.

use async_trait::async_trait;
use serenity::all::{
    CommandInteraction, ComponentInteraction, Context, GuildId, Member, ModalInteraction, User,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::commands::CommandSpec;
use crate::context::{AppContext, ModuleInfo};

pub mod help;
pub mod registration;
pub mod ticket;
pub mod welcome;

/// What a module participates in. Populated once at registration time and
/// queried by the dispatcher instead of probing for handler methods.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub commands: bool,
    pub buttons: bool,
    pub modals: bool,
    pub selects: bool,
    pub member_events: bool,
}

/// An independently loadable feature unit.
///
/// Handlers return `Ok(true)` when they claimed the interaction, `Ok(false)`
/// to let the dispatcher keep walking the registry. Every handler for a
/// capability the module does not declare keeps its no-op default.
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn capabilities(&self) -> Capabilities;

    /// Slash commands this module contributes to the shared registry.
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    fn enabled(&self) -> bool {
        true
    }

    fn set_enabled(&self, _enabled: bool) {}

    /// One-shot startup hook, awaited by the loader before the next module.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_command(
        &self,
        _ctx: &Context,
        _interaction: &CommandInteraction,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn handle_button(
        &self,
        _ctx: &Context,
        _interaction: &ComponentInteraction,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn handle_select(
        &self,
        _ctx: &Context,
        _interaction: &ComponentInteraction,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn handle_modal(
        &self,
        _ctx: &Context,
        _interaction: &ModalInteraction,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn member_join(&self, _ctx: &Context, _member: &Member) -> anyhow::Result<()> {
        Ok(())
    }

    async fn member_leave(
        &self,
        _ctx: &Context,
        _guild_id: GuildId,
        _user: &User,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Name-keyed registry of loaded modules, preserving registration order.
/// Mutated only at boot; dispatch reads are lock-free clones.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. A name collision replaces the previous instance
    /// in place (keeping its dispatch position) with a warning.
    pub fn insert(&mut self, module: Arc<dyn Module>) {
        if let Some(existing) = self.modules.iter_mut().find(|m| m.name() == module.name()) {
            warn!("Module '{}' already registered, replacing", module.name());
            *existing = module;
        } else {
            self.modules.push(module);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules declaring a capability, in registration order.
    pub fn with_capability(
        &self,
        filter: impl Fn(Capabilities) -> bool,
    ) -> Vec<Arc<dyn Module>> {
        self.modules
            .iter()
            .filter(|m| filter(m.capabilities()))
            .cloned()
            .collect()
    }
}

/// Constructor for a module instance bound to the shared app context.
pub type ModuleFactory = fn(Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>>;

/// The built-in module set, in dispatch order.
pub fn builtin_modules() -> Vec<ModuleFactory> {
    vec![
        welcome::WelcomeModule::create,
        registration::RegistrationModule::create,
        ticket::TicketModule::create,
        help::HelpModule::create,
    ]
}

/// Instantiates and starts every factory. Per-module failures are isolated
/// and logged; boot continues regardless, reporting a summary count.
pub async fn load_modules(app: &Arc<AppContext>, factories: &[ModuleFactory]) -> ModuleRegistry {
    info!("Loading modules...");
    let mut registry = ModuleRegistry::new();
    let mut loaded = 0usize;
    let mut failed = 0usize;

    for factory in factories {
        let module = match factory(app.clone()) {
            Ok(module) => module,
            Err(e) => {
                error!("Module construction failed: {e:#}");
                failed += 1;
                continue;
            }
        };
        let name = module.name();
        registry.insert(module.clone());
        match module.start().await {
            Ok(()) => {
                info!("Module '{name}' loaded");
                loaded += 1;
            }
            Err(e) => {
                error!("Module '{name}' failed to start: {e:#}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        warn!("{loaded} modules loaded, {failed} failed");
    } else {
        info!("{loaded} modules loaded");
    }

    app.set_catalog(
        registry
            .iter()
            .map(|m| ModuleInfo {
                name: m.name().to_string(),
                description: m.description().to_string(),
                enabled: m.enabled(),
            })
            .collect(),
    );
    registry
}


#[cfg(test)]
mod tests {
    use super::testutil::StubModule;
    use super::*;

    fn command_caps() -> Capabilities {
        Capabilities {
            commands: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_replaces_by_name_in_place() {
        let mut registry = ModuleRegistry::new();
        registry.insert(Arc::new(StubModule::new("a", command_caps())));
        registry.insert(Arc::new(StubModule::new("b", Capabilities::default())));
        registry.insert(Arc::new(StubModule::new("a", Capabilities::default())));

        assert_eq!(registry.len(), 2);
        // Replacement keeps the original dispatch position.
        let names: Vec<&str> = registry.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        // The replacement's capabilities, not the original's.
        assert_eq!(
            registry.get("a").unwrap().capabilities(),
            Capabilities::default()
        );
    }

    #[test]
    fn test_with_capability_preserves_order() {
        let mut registry = ModuleRegistry::new();
        registry.insert(Arc::new(StubModule::new("first", command_caps())));
        registry.insert(Arc::new(StubModule::new("skip", Capabilities::default())));
        registry.insert(Arc::new(StubModule::new("second", command_caps())));

        let commands = registry.with_capability(|c| c.commands);
        let names: Vec<&str> = commands.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    fn ok_factory(_app: Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>> {
        Ok(Arc::new(StubModule::new("ok", Capabilities::default())))
    }

    fn broken_factory(_app: Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>> {
        anyhow::bail!("construction exploded")
    }

    fn broken_start_factory(_app: Arc<AppContext>) -> anyhow::Result<Arc<dyn Module>> {
        Ok(Arc::new(
            StubModule::new("unsteady", Capabilities::default()).failing_start(),
        ))
    }

    #[tokio::test]
    async fn test_loader_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let app = crate::context::testutil::test_context(dir.path());

        let registry =
            load_modules(&app, &[broken_factory, ok_factory, broken_start_factory]).await;

        // A broken factory never reaches the registry; a failed start hook
        // still leaves the module registered.
        assert!(registry.get("ok").is_some());
        assert!(registry.get("unsteady").is_some());
        assert_eq!(registry.len(), 2);

        // The catalog mirrors what actually registered.
        let names: Vec<String> = app.catalog().into_iter().map(|info| info.name).collect();
        assert_eq!(names, vec!["ok", "unsteady"]);
    }
}
