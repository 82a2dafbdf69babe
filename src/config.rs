//! Environment-variable configuration (spec.md §6).
//!
//! Shaped after the teacher's `crates/bridge/src/config.rs` (nested
//! per-concern structs, a `validate()` pass, env-var fallback for secrets)
//! but sourced from `std::env` instead of a TOML file, since spec.md
//! specifies an environment-variable surface with no config file. A `.env`
//! file is loaded first via `dotenvy` for local dev convenience (borrowed
//! from the `advatar-RustSwiftPi` pack entry, which uses the same crate for
//! the same purpose); it silently no-ops in production when absent.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;

use crate::domain::MessengerType;

#[derive(Debug, Clone)]
pub enum DatabaseTarget {
    Postgres(String),
    Sqlite(String),
}

#[derive(Debug, Clone)]
pub struct LineConfig {
    pub channel_secret: String,
    pub channel_access_token: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub application_id: String,
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub signing_secret: String,
    pub bot_token: String,
}

#[derive(Debug, Clone)]
pub struct TeamsConfig {
    pub app_id: String,
    pub app_password: String,
}

#[derive(Debug, Clone)]
pub struct WhatsappConfig {
    pub phone_number_id: String,
    pub access_token: String,
    pub verify_token: String,
    pub app_secret: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub line: Option<LineConfig>,
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
    pub slack: Option<SlackConfig>,
    pub teams: Option<TeamsConfig>,
    pub whatsapp: Option<WhatsappConfig>,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub home_currency: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database: DatabaseTarget,
    pub enabled_messengers: Vec<MessengerType>,
    pub credentials: ProviderCredentials,
    pub ai: AiConfig,
    pub admin_api_key: String,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load from process environment, having already attempted to load a
    /// `.env` file via `dotenvy` (non-fatal if absent).
    pub fn load_from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let database = match (env_var("DATABASE_URL"), env_var("DATABASE_PATH")) {
            (Some(url), _) => DatabaseTarget::Postgres(url),
            (None, Some(path)) => DatabaseTarget::Sqlite(path),
            (None, None) => DatabaseTarget::Sqlite("chatledger.db".to_string()),
        };

        let enabled_messengers = match env_var("ENABLED_MESSENGERS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    MessengerType::parse(s)
                        .with_context(|| format!("unknown messenger in ENABLED_MESSENGERS: {s}"))
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![MessengerType::Terminal],
        };

        let mut credentials = ProviderCredentials::default();
        for messenger in &enabled_messengers {
            match messenger {
                MessengerType::Line => {
                    credentials.line = Some(LineConfig {
                        channel_secret: require_env("LINE_CHANNEL_SECRET")?,
                        channel_access_token: require_env("LINE_CHANNEL_ACCESS_TOKEN")?,
                    });
                }
                MessengerType::Telegram => {
                    credentials.telegram = Some(TelegramConfig {
                        bot_token: require_env("TELEGRAM_BOT_TOKEN")?,
                        webhook_secret: env_var("TELEGRAM_WEBHOOK_SECRET"),
                    });
                }
                MessengerType::Discord => {
                    credentials.discord = Some(DiscordConfig {
                        bot_token: require_env("DISCORD_BOT_TOKEN")?,
                        application_id: require_env("DISCORD_APPLICATION_ID")?,
                    });
                }
                MessengerType::Slack => {
                    credentials.slack = Some(SlackConfig {
                        signing_secret: require_env("SLACK_SIGNING_SECRET")?,
                        bot_token: require_env("SLACK_BOT_TOKEN")?,
                    });
                }
                MessengerType::Teams => {
                    credentials.teams = Some(TeamsConfig {
                        app_id: require_env("TEAMS_APP_ID")?,
                        app_password: require_env("TEAMS_APP_PASSWORD")?,
                    });
                }
                MessengerType::Whatsapp => {
                    credentials.whatsapp = Some(WhatsappConfig {
                        phone_number_id: require_env("WHATSAPP_PHONE_NUMBER_ID")?,
                        access_token: require_env("WHATSAPP_ACCESS_TOKEN")?,
                        verify_token: std::env::var("WHATSAPP_VERIFY_TOKEN")
                            .unwrap_or_else(|_| "verify_token".to_string()),
                        app_secret: require_env("WHATSAPP_APP_SECRET")?,
                    });
                }
                MessengerType::Terminal => {}
            }
        }

        let ai = AiConfig {
            provider: std::env::var("AI_PROVIDER").unwrap_or_else(|_| "gemini".to_string()),
            model: std::env::var("AI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
            api_key: env_var("GEMINI_API_KEY"),
            home_currency: std::env::var("HOME_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
        };

        let admin_api_key = require_env("ADMIN_API_KEY")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let config = Config {
            bind_address,
            database,
            enabled_messengers,
            credentials,
            ai,
            admin_api_key,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.admin_api_key.trim().is_empty() {
            bail!("ADMIN_API_KEY must not be empty");
        }
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            bail!("invalid BIND_ADDRESS: {}", self.bind_address);
        }
        if self.enabled_messengers.is_empty() {
            bail!("at least one messenger must be enabled");
        }
        Ok(())
    }

    /// Non-secret summary, safe to log at startup.
    pub fn summary(&self) -> HashMap<&'static str, String> {
        let mut m = HashMap::new();
        m.insert(
            "database",
            match &self.database {
                DatabaseTarget::Postgres(_) => "postgres".to_string(),
                DatabaseTarget::Sqlite(path) => format!("sqlite:{path}"),
            },
        );
        m.insert(
            "enabled_messengers",
            self.enabled_messengers
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(","),
        );
        m.insert("ai_provider", self.ai.provider.clone());
        m
    }
}

fn require_env(key: &str) -> Result<String> {
    env_var(key).with_context(|| format!("missing required environment variable {key}"))
}
