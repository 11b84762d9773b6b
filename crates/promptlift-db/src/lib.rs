//! # promptlift-db
//!
//! PostgreSQL persistence layer for promptlift.
//!
//! This crate provides:
//! - Connection pool management
//! - The quota ledger repository (`PgQuotaLedger`)
//! - Embedded migrations
//!
//! ## Example
//!
//! ```rust,ignore
//! use promptlift_db::Database;
//! use promptlift_core::QuotaLedger;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/promptlift").await?;
//!     db.migrate().await?;
//!
//!     db.ledger.ensure_user("user@example.com", None).await?;
//!     let check = db.ledger.check_quota("user@example.com").await?;
//!     println!("allowed: {}", check.allowed);
//!     Ok(())
//! }
//! ```

pub mod ledger;
pub mod pool;

// Test fixtures for integration tests
// Note: always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use promptlift_core::*;

pub use ledger::PgQuotaLedger;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Quota ledger repository.
    pub ledger: PgQuotaLedger,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            ledger: PgQuotaLedger::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
