use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

use crate::platform::TelegramConfig;

/// Process configuration for the warden service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub telegram: TelegramConfig,
    pub reconciliation: ReconciliationConfig,
    pub limits: LimitsFileConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Admin API host to bind to
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory fallback)
    pub postgres_enabled: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Emit span close events with timing
    pub span_events: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub interval_secs: u64,
    /// Chats reconciled even before the ledger mentions them
    pub chat_ids: Vec<i64>,
    /// Subjects checked for a chat the ledger has no users for
    pub bootstrap: HashMap<i64, Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsFileConfig {
    pub path: PathBuf,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared key expected in the x-api-key header - MUST come from environment
    pub api_key: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/chat_warden".to_string(),
            postgres_enabled: false,
            max_connections: 10,
        }
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8088,
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                span_events: false,
            },
            telegram: TelegramConfig::default(),
            reconciliation: ReconciliationConfig {
                interval_secs: 3600,
                chat_ids: Vec::new(),
                bootstrap: HashMap::new(),
            },
            limits: LimitsFileConfig {
                path: PathBuf::from("limits.json"),
                poll_interval_secs: 10,
            },
            admin: AdminConfig {
                api_key: String::new(), // MUST be configured
            },
        }
    }
}

impl WardenConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Server configuration
        if let Some(host) = lookup("WARDEN_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("WARDEN_PORT") {
            config.server.port = parse_var("WARDEN_PORT", &port)?;
        }

        // Database configuration
        if let Some(url) = lookup("WARDEN_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        if let Some(enabled) = lookup("WARDEN_POSTGRES_ENABLED") {
            config.database.postgres_enabled = parse_var("WARDEN_POSTGRES_ENABLED", &enabled)?;
        }
        if let Some(max) = lookup("WARDEN_POSTGRES_MAX_CONNECTIONS") {
            config.database.max_connections = parse_var("WARDEN_POSTGRES_MAX_CONNECTIONS", &max)?;
        }

        // Logging configuration
        if let Some(level) = lookup("WARDEN_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(span_events) = lookup("WARDEN_LOG_SPAN_EVENTS") {
            config.logging.span_events = parse_var("WARDEN_LOG_SPAN_EVENTS", &span_events)?;
        }

        // Telegram configuration
        if let Some(api_base) = lookup("WARDEN_TELEGRAM_API_BASE") {
            config.telegram.api_base = api_base;
        }
        if let Some(token) = lookup("WARDEN_TELEGRAM_BOT_TOKEN") {
            config.telegram.bot_token = token;
        } else {
            warn!("WARDEN_TELEGRAM_BOT_TOKEN not set, enforcement runs in dry-run mode");
        }
        if let Some(timeout) = lookup("WARDEN_TELEGRAM_TIMEOUT_SECS") {
            config.telegram.timeout_secs = parse_var("WARDEN_TELEGRAM_TIMEOUT_SECS", &timeout)?;
        }

        // Reconciliation configuration
        if let Some(interval) = lookup("WARDEN_RECONCILE_INTERVAL_SECS") {
            config.reconciliation.interval_secs =
                parse_var("WARDEN_RECONCILE_INTERVAL_SECS", &interval)?;
        }
        if let Some(chats) = lookup("WARDEN_RECONCILE_CHATS") {
            config.reconciliation.chat_ids =
                parse_id_list(&chats).context("Invalid WARDEN_RECONCILE_CHATS value")?;
        }
        if let Some(bootstrap) = lookup("WARDEN_RECONCILE_BOOTSTRAP") {
            config.reconciliation.bootstrap =
                parse_bootstrap(&bootstrap).context("Invalid WARDEN_RECONCILE_BOOTSTRAP value")?;
        }

        // Limits file
        if let Some(path) = lookup("WARDEN_LIMITS_FILE") {
            config.limits.path = PathBuf::from(path);
        }
        if let Some(poll) = lookup("WARDEN_LIMITS_POLL_SECS") {
            config.limits.poll_interval_secs = parse_var("WARDEN_LIMITS_POLL_SECS", &poll)?;
        }

        config.admin.api_key = lookup("WARDEN_ADMIN_API_KEY")
            .context("WARDEN_ADMIN_API_KEY environment variable is required")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.database.postgres_enabled && self.database.postgres_url.is_empty() {
            return Err(anyhow::anyhow!(
                "PostgreSQL is enabled but WARDEN_POSTGRES_URL is empty"
            ));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("PostgreSQL max connections must be non-zero"));
        }

        if !self.telegram.api_base.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "HTTPS is required but Telegram API base is not HTTPS: {}",
                self.telegram.api_base
            ));
        }

        if self.reconciliation.interval_secs == 0 {
            return Err(anyhow::anyhow!("Reconciliation interval must be non-zero"));
        }

        if self.limits.poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("Limits poll interval must be non-zero"));
        }

        if self.admin.api_key.len() < 16 {
            return Err(anyhow::anyhow!(
                "Admin API key is too short (minimum 16 characters)"
            ));
        }

        Ok(())
    }

    /// Whether a real platform adapter can be built
    pub fn enforcement_enabled(&self) -> bool {
        !self.telegram.bot_token.is_empty()
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value", name))
}

/// Comma-separated ids, e.g. `-100123,-100456`
pub fn parse_id_list(value: &str) -> Result<Vec<i64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .with_context(|| format!("'{}' is not an id", part))
        })
        .collect()
}

/// `chat:user,user;chat:user`, e.g. `-100123:5,6;-100456:7`
pub fn parse_bootstrap(value: &str) -> Result<HashMap<i64, Vec<i64>>> {
    let mut bootstrap = HashMap::new();
    for group in value.split(';').map(str::trim).filter(|g| !g.is_empty()) {
        let (chat, users) = group
            .split_once(':')
            .with_context(|| format!("'{}' is missing ':' between chat and users", group))?;
        let chat_id: i64 = chat
            .trim()
            .parse()
            .with_context(|| format!("'{}' is not a chat id", chat.trim()))?;
        bootstrap
            .entry(chat_id)
            .or_insert_with(Vec::new)
            .extend(parse_id_list(users)?);
    }
    Ok(bootstrap)
}

/// Mask a secret for logging: at most the first and last four characters survive
pub fn sanitize_for_logging(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
