//! Durable failure ledger for the Aegis supervisor
//!
//! Wraps the shared PostgreSQL pool and exposes the append-only
//! tables the recovery ladder reads: service failures, recovery
//! actions, the operator journal, and reboot events. Counters are
//! window-bounded SQL so they reflect committed state, not in-memory
//! guesses.

pub mod events;
pub mod failures;
pub mod pool;
pub mod reboot;

pub use pool::{connect_pool, ping, vacuum_analyze, PoolStats};
pub use reboot::RebootEvent;

use aegis_common::{DatabaseConfig, Result};
use sqlx::PgPool;
use std::sync::Arc;

/// Handle to the ledger tables. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    pub(crate) pool: PgPool,
    pub(crate) stats: Arc<PoolStats>,
    config: DatabaseConfig,
}

impl Ledger {
    /// Connect the shared pool and run pending migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = connect_pool(config).await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        Ok(Ledger {
            pool,
            stats: Arc::new(PoolStats::new()),
            config: config.clone(),
        })
    }

    /// Wrap an existing pool (shared with other components)
    pub fn from_pool(pool: PgPool, config: DatabaseConfig) -> Self {
        Ledger {
            pool,
            stats: Arc::new(PoolStats::new()),
            config,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn stats(&self) -> serde_json::Value {
        self.stats.snapshot()
    }

    /// Database reachable for state-save?
    pub async fn reachable(&self) -> bool {
        pool::ping(&self.pool).await
    }

    /// VACUUM on a dedicated connection, then verify the pool
    pub async fn vacuum(&self) -> Result<()> {
        vacuum_analyze(&self.config).await?;
        // The pool survives VACUUM, but verify before handing it back
        // to the loop.
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool during graceful shutdown
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
