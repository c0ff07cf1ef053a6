//! Database connection and management module
//!
//! Connection pooling for the Postgres-backed session store.

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::config::{mask_database_url, DatabaseConfig};

pub mod session_store;

pub use session_store::PgSessionStore;

/// Database connection manager
pub struct DatabaseManager {
    pool: PgPool,
    config: DatabaseConfig,
}

impl DatabaseManager {
    /// Create a new database manager with the given configuration
    pub async fn new(config: DatabaseConfig) -> Result<Self, sqlx::Error> {
        info!(
            "Connecting to database: {}",
            mask_database_url(&config.database_url)
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                warn!("Failed to connect to database: {}", e);
                e
            })?;

        info!("Database connection pool created successfully");

        Ok(Self { pool, config })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Session store sharing this pool
    pub fn session_store(&self) -> PgSessionStore {
        PgSessionStore::new(self.pool.clone(), self.config.lock_timeout)
    }

    /// Test database connectivity
    pub async fn test_connection(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
    }
}
