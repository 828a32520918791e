//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::database::channels::ChannelRepository;
use crate::database::ledger::LedgerRepository;
use crate::database::profiles::ProfileRepository;

pub struct DatabasePool {
    pool: PgPool,
    channels: ChannelRepository,
    ledger: LedgerRepository,
    profiles: ProfileRepository,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, String> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(connection_string)
            .await
            .map_err(|e| format!("Failed to connect to PostgreSQL: {}", e))?;

        info!(max_connections = max_connections, "Connected to PostgreSQL");

        Ok(Self {
            channels: ChannelRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool.clone()),
            profiles: ProfileRepository::new(pool.clone()),
            pool,
        })
    }

    /// Create every table and index the engine needs (idempotent)
    pub async fn init_schema(&self) -> Result<(), String> {
        info!("Initializing database schema...");

        self.channels.init_schema().await?;
        self.ledger.init_schema().await?;
        self.profiles.init_schema().await?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn channels(&self) -> &ChannelRepository {
        &self.channels
    }

    pub fn ledger(&self) -> &LedgerRepository {
        &self.ledger
    }

    pub fn profiles(&self) -> &ProfileRepository {
        &self.profiles
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
