//! Shared slash-command registry: modules contribute definitions, the
//! registry deduplicates by name and publishes the merged set to Discord as
//! one atomic global replace.

use serenity::all::{Command, CreateCommand, Http};
use std::sync::RwLock;
use tracing::{error, info, warn};

use crate::modules::ModuleRegistry;

/// A named slash-command definition. Serenity's builder does not expose the
/// name it was created with, so the registry keys on this wrapper.
#[derive(Clone)]
pub struct CommandSpec {
    name: String,
    definition: CreateCommand,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, definition: CreateCommand) -> Self {
        Self {
            name: name.into(),
            definition,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &CreateCommand {
        &self.definition
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeployOutcome {
    /// All commands replaced; carries the published count.
    Deployed(usize),
    /// Nothing registered, network call skipped.
    Skipped,
    /// The bulk replace failed; the bot keeps running with whatever Discord
    /// already had.
    Failed,
}

/// Ordered, name-deduplicated command set. Mutated during boot and deploy;
/// lookups clone under a read lock.
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<Vec<CommandSpec>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts by unique name. A collision evicts the previous entry (last
    /// writer wins) with a warning.
    pub fn register(&self, spec: CommandSpec) {
        let mut commands = self.commands.write().unwrap_or_else(|e| e.into_inner());
        if commands.iter().any(|c| c.name == spec.name) {
            warn!("Command '{}' already registered, overwriting", spec.name);
            commands.retain(|c| c.name != spec.name);
        }
        info!("Command '{}' registered", spec.name);
        commands.push(spec);
    }

    pub fn register_module_commands(&self, module_name: &str, specs: Vec<CommandSpec>) {
        let count = specs.len();
        for spec in specs {
            self.register(spec);
        }
        info!("Module '{module_name}' registered {count} commands");
    }

    /// Re-collects every loaded module's command list into the registry.
    /// Runs before each deploy so a replaced module's definitions win.
    pub fn collect_from(&self, modules: &ModuleRegistry) {
        for module in modules.iter().filter(|m| m.capabilities().commands) {
            self.register_module_commands(module.name(), module.commands());
        }
    }

    pub fn find(&self, name: &str) -> Option<CommandSpec> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn all(&self) -> Vec<CommandSpec> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collects module commands, then replaces the global command catalog in
    /// one bulk call. An empty set skips the call; a failed call is logged
    /// and swallowed so the bot keeps running with stale commands.
    pub async fn deploy(&self, http: &Http, modules: &ModuleRegistry) -> DeployOutcome {
        self.collect_from(modules);

        let definitions: Vec<CreateCommand> = self
            .all()
            .into_iter()
            .map(|spec| spec.definition)
            .collect();

        if definitions.is_empty() {
            warn!("No slash commands registered, skipping deploy");
            return DeployOutcome::Skipped;
        }

        let count = definitions.len();
        info!("Deploying {count} slash commands globally...");
        match Command::set_global_commands(http, definitions).await {
            Ok(_) => {
                info!("{count} slash commands deployed");
                DeployOutcome::Deployed(count)
            }
            Err(e) => {
                error!("Slash command deploy failed: {e:?}");
                DeployOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> CommandSpec {
        CommandSpec::new(name, CreateCommand::new(name).description("test command"))
    }

    #[test]
    fn test_duplicate_name_keeps_latest() {
        let registry = CommandRegistry::new();
        registry.register(spec("ping"));
        registry.register(CommandSpec::new(
            "ping",
            CreateCommand::new("ping").description("replacement"),
        ));

        assert_eq!(registry.len(), 1);
        let found = registry.find("ping").unwrap();
        // The surviving definition is the later registration.
        let json = serde_json::to_value(found.definition()).unwrap();
        assert_eq!(json["description"], "replacement");
    }

    #[test]
    fn test_no_duplicate_names_across_modules() {
        let registry = CommandRegistry::new();
        registry.register_module_commands("a", vec![spec("ping"), spec("setup")]);
        registry.register_module_commands("b", vec![spec("ping")]);

        let names: Vec<String> = registry
            .all()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names, deduped);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_find_missing() {
        let registry = CommandRegistry::new();
        assert!(registry.find("nope").is_none());
    }

    #[tokio::test]
    async fn test_deploy_skips_when_empty() {
        let registry = CommandRegistry::new();
        let modules = ModuleRegistry::new();
        // An invalid token never matters: the deploy must bail out before
        // any network call.
        let http = Http::new("invalid");
        let outcome = registry.deploy(&http, &modules).await;
        assert_eq!(outcome, DeployOutcome::Skipped);
    }
}
