//! Shared application context, constructed once in `main` and passed as an
//! `Arc` to every module, handler, and the web dashboard.

use serde::Serialize;
use std::sync::{Mutex, RwLock};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::commands::CommandRegistry;
use crate::config::Config;
use crate::store::ConfigStore;

/// Catalog entry describing a loaded module, for `/help` and the dashboard.
#[derive(Clone, Debug, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

pub struct AppContext {
    pub config: Config,
    pub store: ConfigStore,
    pub commands: CommandRegistry,
    catalog: RwLock<Vec<ModuleInfo>>,
    started_at: Instant,
    // Background timers (autosave, status rotation, web server) are owned
    // here and aborted on shutdown instead of running fire-and-forget.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppContext {
    pub fn new(config: Config, store: ConfigStore) -> Self {
        Self {
            config,
            store,
            commands: CommandRegistry::new(),
            catalog: RwLock::new(Vec::new()),
            started_at: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn catalog(&self) -> Vec<ModuleInfo> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_catalog(&self, entries: Vec<ModuleInfo>) {
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    /// Keeps the catalog's enabled flag in step with a module toggle.
    pub fn set_module_enabled_flag(&self, name: &str, enabled: bool) {
        let mut catalog = self.catalog.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = catalog.iter_mut().find(|entry| entry.name == name) {
            entry.enabled = enabled;
        }
    }

    /// Takes ownership of a background task so shutdown can cancel it.
    pub fn own_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Cancels owned background tasks and flushes the config store.
    pub fn shutdown(&self) {
        info!("Shutting down: cancelling background tasks");
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        if let Err(e) = self.store.save() {
            warn!("Final config save failed: {e}");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_enabled_flag_sync() {
        let dir = tempfile::tempdir().unwrap();
        let app = testutil::test_context(dir.path());

        app.set_catalog(vec![ModuleInfo {
            name: "welcome".to_string(),
            description: "greets".to_string(),
            enabled: true,
        }]);

        app.set_module_enabled_flag("welcome", false);
        assert!(!app.catalog()[0].enabled);

        // Unknown names are a no-op.
        app.set_module_enabled_flag("missing", true);
        assert_eq!(app.catalog().len(), 1);
    }
}
