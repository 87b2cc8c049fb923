//! PostgreSQL pool management
//!
//! One shared pool serves every component; VACUUM gets its own
//! short-lived connection because it cannot run inside a pooled
//! transaction.

use aegis_common::{retry, DatabaseConfig, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, Connection, Executor, PgConnection, PgPool};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Query counters exposed on the status surface
#[derive(Debug)]
pub struct PoolStats {
    total_queries: AtomicU64,
    total_errors: AtomicU64,
    started_at: Instant,
}

impl PoolStats {
    pub fn new() -> Self {
        PoolStats {
            total_queries: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_query(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let queries = self.total_queries.load(Ordering::Relaxed);
        let errors = self.total_errors.load(Ordering::Relaxed);
        let uptime = self.started_at.elapsed().as_secs();
        serde_json::json!({
            "total_queries": queries,
            "total_errors": errors,
            "queries_per_second": if uptime > 0 { queries as f64 / uptime as f64 } else { 0.0 },
            "uptime_seconds": uptime,
        })
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.database)
        .application_name("aegis")
}

/// Build the shared pool, retrying bring-up for co-located services
/// that may still be booting.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let statement_timeout = config.statement_timeout_ms;
    let options = connect_options(config);
    let min = config.pool_min;
    let max = config.pool_max;

    let pool = retry::retry(
        "database pool init",
        retry::RetryConfig::database_init(),
        false,
        || {
            let options = options.clone();
            async move {
                PgPoolOptions::new()
                    .min_connections(min)
                    .max_connections(max)
                    .acquire_timeout(Duration::from_secs(10))
                    .after_connect(move |conn, _meta| {
                        Box::pin(async move {
                            let set_timeout =
                                format!("SET statement_timeout = {statement_timeout}");
                            conn.execute(set_timeout.as_str()).await?;
                            Ok(())
                        })
                    })
                    .connect_with(options)
                    .await
            }
        },
    )
    .await?;

    info!(
        "Connection pool initialized: {}:{} (min={}, max={})",
        config.host, config.port, min, max
    );
    Ok(pool)
}

/// Run `VACUUM ANALYZE` on a dedicated autocommit connection.
///
/// The shared pool stays untouched; callers re-verify pool health
/// afterwards with a plain `SELECT 1`.
pub async fn vacuum_analyze(config: &DatabaseConfig) -> Result<()> {
    let mut conn: PgConnection = connect_options(config).connect().await?;
    conn.execute("VACUUM ANALYZE").await?;
    conn.close().await?;
    info!("Database VACUUM ANALYZE completed");
    Ok(())
}

/// Cheap reachability probe used by the reboot safety gate
pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
