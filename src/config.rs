use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Environment variable that overrides the location of the JSON config file.
pub const CONFIG_PATH_VAR: &str = "LOGIN_NOTIFIER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// OAuth application registered with Discord.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DiscordConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Redirect URL registered with the application, pointing at `/auth/callback`.
    pub callback_url: String,
}

/// Configuration object for login_notifier.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Interface to listen on.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    pub discord: DiscordConfig,
    /// Discord webhook that receives login notifications.
    pub webhook_url: String,
    /// Key used to sign session cookies. A random key is generated when empty.
    pub session_secret: Option<String>,
    /// Idle lifetime of a session in seconds.
    pub session_ttl_secs: u64,
    /// Upper bound on a single webhook delivery in seconds.
    pub webhook_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            discord: DiscordConfig::default(),
            webhook_url: String::new(),
            session_secret: None,
            session_ttl_secs: 3600,
            webhook_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Loads the configuration from the JSON file (if any), then `.env`, then the process environment.
    pub fn load() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", err);
        }
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(&path);
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Reads `path` as JSON, falling back to defaults if the file is missing or malformed.
    pub fn from_file(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(read) => match serde_json::from_str::<Self>(&read) {
                Ok(config) => return config,
                Err(err) => warn!(
                    "{} does not contain a valid configuration ({}), using defaults...",
                    path, err
                ),
            },
            Err(_) => debug!("No config file at {}, using defaults...", path),
        }
        Self::default()
    }

    /// Overrides fields with the recognized environment variables, read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(value) = non_empty("DISCORD_CLIENT_ID") {
            self.discord.client_id = value;
        }
        if let Some(value) = non_empty("DISCORD_CLIENT_SECRET") {
            self.discord.client_secret = value;
        }
        if let Some(value) = non_empty("DISCORD_CALLBACK_URL") {
            self.discord.callback_url = value;
        }
        if let Some(value) = non_empty("DISCORD_WEBHOOK_URL") {
            self.webhook_url = value;
        }
        if let Some(value) = non_empty("SESSION_SECRET") {
            self.session_secret = Some(value);
        }
        if let Some(value) = non_empty("BIND_HOST") {
            self.host = value;
        }
        parse_into(non_empty("PORT"), "PORT", &mut self.port);
        parse_into(
            non_empty("SESSION_TTL_SECS"),
            "SESSION_TTL_SECS",
            &mut self.session_ttl_secs,
        );
        parse_into(
            non_empty("WEBHOOK_TIMEOUT_SECS"),
            "WEBHOOK_TIMEOUT_SECS",
            &mut self.webhook_timeout_secs,
        );
    }

    /// Checks that everything needed to serve logins is present and well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.client_id.is_empty() {
            return Err(ConfigError::Missing("DISCORD_CLIENT_ID"));
        }
        if self.discord.client_secret.is_empty() {
            return Err(ConfigError::Missing("DISCORD_CLIENT_SECRET"));
        }
        if self.discord.callback_url.is_empty() {
            return Err(ConfigError::Missing("DISCORD_CALLBACK_URL"));
        }
        if self.webhook_url.is_empty() {
            return Err(ConfigError::Missing("DISCORD_WEBHOOK_URL"));
        }
        check_url("DISCORD_CALLBACK_URL", &self.discord.callback_url)?;
        check_url("DISCORD_WEBHOOK_URL", &self.webhook_url)?;
        if self.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SESSION_TTL_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.address().map(|_| ())
    }

    pub fn address(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .host
            .parse::<IpAddr>()
            .map_err(|err| ConfigError::Invalid {
                name: "BIND_HOST",
                reason: err.to_string(),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Session cookies get the `Secure` attribute when the callback is served over https.
    pub fn secure_cookies(&self) -> bool {
        self.discord.callback_url.starts_with("https://")
    }
}

fn parse_into<T: std::str::FromStr>(value: Option<String>, name: &str, target: &mut T) {
    if let Some(value) = value {
        match value.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!("Ignoring {}={:?}, it is not a valid number", name, value),
        }
    }
}

fn check_url(name: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        })
}
