use dotenvy::dotenv;
use std::env;

/// Process-level configuration resolved from the environment.
///
/// Everything here is fixed for the lifetime of the process. Settings that
/// operators change at runtime (welcome messages, ticket category, module
/// toggles) live in the dynamic [`crate::store::ConfigStore`] tree instead.
#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub application_id: Option<u64>,
    pub status_message: String,
    pub default_prefix: String,
    pub default_welcome_channel_id: Option<u64>,
    pub config_dir: String,
    pub log_dir: String,
    pub web_enabled: bool,
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            application_id: env::var("APPLICATION_ID").ok().and_then(|id| id.parse().ok()),
            status_message: env::var("BOT_STATUS")
                .unwrap_or_else(|_| "Modular bot at your service".to_string()),
            default_prefix: env::var("DEFAULT_PREFIX").unwrap_or_else(|_| "!".to_string()),
            default_welcome_channel_id: env::var("DEFAULT_WELCOME_CHANNEL_ID")
                .ok()
                .and_then(|id| id.parse().ok()),
            config_dir: env::var("CONFIG_DIR").unwrap_or_else(|_| "data".to_string()),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            web_enabled: env::var("WEB_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            web_host: env::var("WEB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            web_port: env::var("WEB_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("application_id", &self.application_id)
            .field("status_message", &self.status_message)
            .field("default_prefix", &self.default_prefix)
            .field(
                "default_welcome_channel_id",
                &self.default_welcome_channel_id,
            )
            .field("config_dir", &self.config_dir)
            .field("log_dir", &self.log_dir)
            .field("web_enabled", &self.web_enabled)
            .field("web_host", &self.web_host)
            .field("web_port", &self.web_port)
            .finish()
    }
}

/// Embed description limit is 4096 characters
pub const DISCORD_EMBED_LIMIT: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing token
        env::remove_var("DISCORD_TOKEN");
        let result = Config::build();
        assert!(result.is_err(), "Should fail when DISCORD_TOKEN is missing");

        // 2. Test defaults
        env::set_var("DISCORD_TOKEN", "test_token");
        let config = Config::build().unwrap();
        assert_eq!(config.discord_token, "test_token");
        assert_eq!(config.config_dir, "data");
        assert_eq!(config.web_port, 3000);
        assert!(config.web_enabled);

        // 3. Test debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("test_token"));
        assert!(debug_output.contains("[REDACTED]"));

        // Cleanup
        env::remove_var("DISCORD_TOKEN");
    }
}
