//! Environment-driven configuration
//!
//! All recognized keys are read once at startup and carried in `AppState`,
//! so handlers and the dispatcher never reach into the environment
//! themselves and tests can construct a `Config` directly.

use std::env;

use crate::error::ConfigError;

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Affiliate identifier embedded in every rewritten link (required).
    pub affiliate_tag: String,

    /// Marketplace domain used when a link's own domain cannot be reused.
    pub search_domain: String,

    /// Destination channel for immediate and scheduled publication.
    /// Absence disables publication; rewriting still works.
    pub target_channel: Option<String>,

    /// Messaging-platform credential. Required only when a target
    /// channel is configured.
    pub bot_credential: Option<String>,

    /// HTTP listen port.
    pub port: u16,

    /// Path of the embedded database file.
    pub database_path: String,
}

impl Config {
    /// Reads configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `AFFILIATE_TAG` - affiliate identifier (required)
    /// - `SEARCH_DOMAIN` - fallback marketplace domain (default: "amazon.in")
    /// - `TARGET_CHANNEL` - publication destination (optional)
    /// - `BOT_CREDENTIAL` - messaging credential (required with TARGET_CHANNEL)
    /// - `PORT` - server port (default: 8080)
    /// - `DATABASE_URL` - database file path (default: "afflink.db")
    pub fn from_env() -> Result<Self, ConfigError> {
        let affiliate_tag = env::var("AFFILIATE_TAG")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingKey("AFFILIATE_TAG"))?;

        let search_domain =
            env::var("SEARCH_DOMAIN").unwrap_or_else(|_| "amazon.in".to_string());

        let target_channel = env::var("TARGET_CHANNEL").ok().filter(|v| !v.is_empty());
        let bot_credential = env::var("BOT_CREDENTIAL").ok().filter(|v| !v.is_empty());

        if target_channel.is_some() && bot_credential.is_none() {
            return Err(ConfigError::MissingKey("BOT_CREDENTIAL"));
        }

        let port_str = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let port: u16 = port_str
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                value: port_str.clone(),
            })?;

        let database_path =
            env::var("DATABASE_URL").unwrap_or_else(|_| "afflink.db".to_string());

        Ok(Config {
            affiliate_tag,
            search_domain,
            target_channel,
            bot_credential,
            port,
            database_path,
        })
    }
}
