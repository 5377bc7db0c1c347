//! Persisted hierarchical configuration shared by all modules.
//!
//! The tree is seeded from a default tree and deep-merged with whatever was
//! previously persisted: persisted values win at leaves, default-only
//! subtrees are added wholesale. Every save snapshots the previous durable
//! file into a rotating backup set capped at [`MAX_BACKUPS`].

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;

/// Backups retained per prune, oldest evicted first.
pub const MAX_BACKUPS: usize = 10;
/// Interval between automatic background saves.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(300);

const BACKUP_PREFIX: &str = "config-backup-";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct ConfigStore {
    config_file: PathBuf,
    backup_dir: PathBuf,
    defaults: Value,
    tree: RwLock<Value>,
}

impl ConfigStore {
    /// Opens the store rooted at `dir`, creating directories as needed and
    /// loading (or seeding) the durable tree. Read or parse failures fall
    /// back to an in-memory copy of the defaults.
    pub fn open(dir: impl AsRef<Path>, defaults: Value) -> Self {
        let dir = dir.as_ref();
        let config_file = dir.join("config.json");
        let backup_dir = dir.join("backups");

        if let Err(e) = fs::create_dir_all(&backup_dir) {
            error!("Failed to create config directories: {e}");
        }

        let store = Self {
            config_file,
            backup_dir,
            tree: RwLock::new(Value::Null),
            defaults,
        };
        let loaded = store.load();
        *store.tree.write().unwrap_or_else(|e| e.into_inner()) = loaded;
        info!("Configuration loaded");
        store
    }

    fn load(&self) -> Value {
        if self.config_file.exists() {
            match fs::read_to_string(&self.config_file)
                .map_err(StoreError::from)
                .and_then(|data| Ok(serde_json::from_str::<Value>(&data)?))
            {
                Ok(loaded) => deep_merge(&self.defaults, &loaded),
                Err(e) => {
                    error!("Failed to load config, using defaults: {e}");
                    self.defaults.clone()
                }
            }
        } else {
            if let Err(e) = write_pretty(&self.config_file, &self.defaults) {
                error!("Failed to seed default config: {e}");
            }
            self.defaults.clone()
        }
    }

    /// Dotted-path lookup. Returns `None` if any segment is missing.
    pub fn get(&self, path: &str) -> Option<Value> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        let mut node = &*tree;
        for segment in path.split('.') {
            node = node.as_object()?.get(segment)?;
        }
        Some(node.clone())
    }

    /// Dotted-path lookup with a fallback for missing paths. Never fails.
    pub fn get_or(&self, path: &str, fallback: Value) -> Value {
        self.get(path).unwrap_or(fallback)
    }

    pub fn get_str(&self, path: &str) -> Option<String> {
        self.get(path)?.as_str().map(str::to_string)
    }

    pub fn get_bool(&self, path: &str, fallback: bool) -> bool {
        self.get(path).and_then(|v| v.as_bool()).unwrap_or(fallback)
    }

    /// Channel/role ids are stored as strings to survive JSON round-trips.
    /// Zero is not a valid snowflake (and the id newtypes reject it), so a
    /// stored `0` reads back as absent.
    pub fn get_id(&self, path: &str) -> Option<u64> {
        match self.get(path)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
        .filter(|id| *id != 0)
    }

    pub fn get_str_array(&self, path: &str) -> Option<Vec<String>> {
        let values = self.get(path)?;
        Some(
            values
                .as_array()?
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        )
    }

    /// Dotted-path write, creating (or overwriting) intermediate nodes as
    /// needed. Returns the store for chaining.
    pub fn set(&self, path: &str, value: Value) -> &Self {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return self;
        };

        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        let mut node = &mut *tree;
        for segment in segments {
            if !matches!(node, Value::Object(_)) {
                *node = Value::Object(Map::new());
            }
            match node {
                Value::Object(map) => {
                    node = map
                        .entry(segment.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                }
                _ => return self,
            }
        }
        if !matches!(node, Value::Object(_)) {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(map) = node {
            map.insert(last.to_string(), value);
        }
        self
    }

    /// Convenience accessor for a module's whole subtree.
    pub fn module_config(&self, module: &str) -> Value {
        self.get_or(&format!("modules.{module}"), Value::Object(Map::new()))
    }

    /// Shallow-merges `patch` onto a module's subtree.
    pub fn update_module_config(&self, module: &str, patch: Map<String, Value>) -> &Self {
        for (key, value) in patch {
            self.set(&format!("modules.{module}.{key}"), value);
        }
        self
    }

    /// Snapshot of the whole in-memory tree.
    pub fn snapshot(&self) -> Value {
        self.tree.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Backs up the current durable file, then overwrites it with the
    /// in-memory tree.
    pub fn save(&self) -> Result<(), StoreError> {
        self.create_backup();
        let tree = self.snapshot();
        write_pretty(&self.config_file, &tree)?;
        info!("Configuration saved");
        Ok(())
    }

    /// Backs up the current config, then restores the default tree.
    pub fn reset(&self) -> Result<(), StoreError> {
        {
            let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
            *tree = self.defaults.clone();
        }
        self.save()?;
        info!("Configuration reset to defaults");
        Ok(())
    }

    /// Restores a named backup. Returns `false` (leaving the in-memory tree
    /// unchanged) if the backup does not exist or cannot be parsed.
    pub fn load_backup(&self, name: &str) -> bool {
        if name.contains('/') || name.contains('\\') || !name.starts_with(BACKUP_PREFIX) {
            warn!("Rejected invalid backup name '{name}'");
            return false;
        }
        let path = self.backup_dir.join(name);
        if !path.exists() {
            error!("Backup '{name}' not found");
            return false;
        }

        let restored = match fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|data| Ok(serde_json::from_str::<Value>(&data)?))
        {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to read backup '{name}': {e}");
                return false;
            }
        };

        {
            let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
            *tree = restored;
        }
        if let Err(e) = self.save() {
            error!("Failed to persist restored config: {e}");
        }
        info!("Configuration restored from backup '{name}'");
        true
    }

    /// Backup file names, most recent first.
    pub fn backup_list(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.starts_with(BACKUP_PREFIX))
                .collect(),
            Err(e) => {
                error!("Failed to list backups: {e}");
                return Vec::new();
            }
        };
        // Timestamps embed ISO-8601 with ':' and '.' replaced, so
        // lexicographic order equals chronological order.
        names.sort();
        names.reverse();
        names
    }

    fn create_backup(&self) {
        if !self.config_file.exists() {
            return;
        }
        let stamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        let backup_path = self.backup_dir.join(format!("{BACKUP_PREFIX}{stamp}.json"));
        if let Err(e) = fs::copy(&self.config_file, &backup_path) {
            error!("Failed to create config backup: {e}");
            return;
        }
        self.prune_backups();
    }

    fn prune_backups(&self) {
        for stale in self.backup_list().into_iter().skip(MAX_BACKUPS) {
            if let Err(e) = fs::remove_file(self.backup_dir.join(&stale)) {
                warn!("Failed to prune backup '{stale}': {e}");
            }
        }
    }
}

fn write_pretty(path: &Path, value: &Value) -> Result<(), StoreError> {
    let data = serde_json::to_string_pretty(value)?;
    fs::write(path, data)?;
    Ok(())
}

/// Deep merge: for every key in `source`, objects recurse (created when
/// absent in `target`), anything else replaces the `target` value outright.
/// Loaded scalars always win over defaults; default-only subtrees survive.
pub fn deep_merge(target: &Value, source: &Value) -> Value {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            let mut output = target_map.clone();
            for (key, source_value) in source_map {
                match (target_map.get(key), source_value) {
                    (Some(target_value @ Value::Object(_)), Value::Object(_)) => {
                        output.insert(key.clone(), deep_merge(target_value, source_value));
                    }
                    _ => {
                        output.insert(key.clone(), source_value.clone());
                    }
                }
            }
            Value::Object(output)
        }
        _ => source.clone(),
    }
}

/// The default configuration tree every deployment starts from. The
/// in-memory tree is always a superset of these key paths.
pub fn default_tree(config: &Config) -> Value {
    serde_json::json!({
        "prefix": config.default_prefix,
        "welcome_channel_id": config.default_welcome_channel_id.map(|id| id.to_string()),
        "modules": {
            "welcome": {
                "enabled": true,
                "join_message": "{username} joined {server}!",
                "leave_message": "{username} left {server}!"
            },
            "registration": {
                "enabled": true,
                "channel_id": null,
                "approval_role_id": null,
                "form1_fields": ["Nickname", "Age", "Region", "Gaming experience"],
                "form2_fields": ["Why do you want to join?", "Available play hours", "Current guild", "Anything else"]
            },
            "ticket": {
                "enabled": true,
                "category_id": null,
                "admin_role_id": null
            },
            "help": {
                "enabled": true
            }
        },
        "web": {
            "host": config.web_host,
            "port": config.web_port
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_store(dir: &Path) -> ConfigStore {
        ConfigStore::open(dir, json!({"a": 1, "b": {"c": 2}}))
    }

    #[test]
    fn test_merge_precedence() {
        // Defaults fill missing keys, persisted scalars override.
        let defaults = json!({"a": 1, "b": {"c": 2}});
        let persisted = json!({"b": {"c": 5, "d": 6}});
        let merged = deep_merge(&defaults, &persisted);
        assert_eq!(merged, json!({"a": 1, "b": {"c": 5, "d": 6}}));
    }

    #[test]
    fn test_merge_keeps_default_subtrees() {
        let defaults = json!({"modules": {"welcome": {"enabled": true}}, "x": 1});
        let persisted = json!({"x": 2});
        let merged = deep_merge(&defaults, &persisted);
        assert_eq!(
            merged,
            json!({"modules": {"welcome": {"enabled": true}}, "x": 2})
        );
    }

    #[test]
    fn test_load_seeds_defaults_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert_eq!(store.get("a"), Some(json!(1)));
        // The default tree was written to disk.
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn test_load_merges_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"b": {"c": 5, "d": 6}}"#,
        )
        .unwrap();
        let store = open_store(dir.path());
        assert_eq!(store.snapshot(), json!({"a": 1, "b": {"c": 5, "d": 6}}));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{not json").unwrap();
        let store = open_store(dir.path());
        assert_eq!(store.snapshot(), json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn test_dotted_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.set("modules.foo.bar", json!(42));
        assert_eq!(store.get("modules.foo.bar"), Some(json!(42)));
        assert_eq!(
            store.get_or("modules.nonexistent.x", json!("fallback")),
            json!("fallback")
        );
    }

    #[test]
    fn test_set_chains() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.set("x", json!(1)).set("y.z", json!(2));
        assert_eq!(store.get("x"), Some(json!(1)));
        assert_eq!(store.get("y.z"), Some(json!(2)));
    }

    #[test]
    fn test_set_overwrites_scalar_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        // "a" is a scalar in the defaults; a deeper write replaces it with
        // a subtree rather than failing.
        store.set("a.deep.leaf", json!("v"));
        assert_eq!(store.get("a.deep.leaf"), Some(json!("v")));
        // And a scalar write on top of a subtree collapses it back.
        store.set("a", json!(7));
        assert_eq!(store.get("a"), Some(json!(7)));
        assert_eq!(store.get("a.deep.leaf"), None);
    }

    #[test]
    fn test_get_id_treats_zero_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.set("modules.ticket.category_id", json!("0"));
        assert_eq!(store.get_id("modules.ticket.category_id"), None);
        store.set("modules.ticket.category_id", json!(0));
        assert_eq!(store.get_id("modules.ticket.category_id"), None);
        store.set("modules.ticket.category_id", json!("42"));
        assert_eq!(store.get_id("modules.ticket.category_id"), Some(42));
    }

    #[test]
    fn test_backup_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        for i in 0..15 {
            store.set("counter", json!(i));
            store.save().unwrap();
            // Backup names have millisecond resolution; keep them distinct.
            std::thread::sleep(Duration::from_millis(3));
        }

        let backups = store.backup_list();
        assert_eq!(backups.len(), MAX_BACKUPS);
        // Most recent first; a fresh sorted copy must match.
        let mut sorted = backups.clone();
        sorted.sort();
        sorted.reverse();
        assert_eq!(backups, sorted);
    }

    #[test]
    fn test_load_missing_backup_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.set("a", json!(99));
        let before = store.snapshot();

        let ok = store.load_backup("config-backup-2024-01-01T00-00-00-000Z.json");
        assert!(!ok);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        store.set("a", json!("original"));
        store.save().unwrap();
        std::thread::sleep(Duration::from_millis(3));
        // This save snapshots the "original" file into a backup.
        store.set("a", json!("changed"));
        store.save().unwrap();

        let backups = store.backup_list();
        let latest = backups.first().unwrap();
        assert!(store.load_backup(latest));
        assert_eq!(store.get("a"), Some(json!("original")));
    }

    #[test]
    fn test_load_backup_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(!store.load_backup("../config.json"));
        assert!(!store.load_backup("config-backup-a/../../x.json"));
        assert!(!store.load_backup("random-file.json"));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.set("a", json!(123));
        store.reset().unwrap();
        assert_eq!(store.get("a"), Some(json!(1)));
    }

    #[test]
    fn test_module_config_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(
            dir.path(),
            json!({"modules": {"welcome": {"enabled": true, "join_message": "hi"}}}),
        );

        let mut patch = Map::new();
        patch.insert("join_message".to_string(), json!("hello"));
        store.update_module_config("welcome", patch);

        let module = store.module_config("welcome");
        assert_eq!(module["enabled"], json!(true));
        assert_eq!(module["join_message"], json!("hello"));
    }
}
