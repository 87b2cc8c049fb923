//! Telemetry persistence (C3)
//!
//! The sampler keeps the latest sample in shared memory; on the
//! persist cadence the last buffered sample is committed as one row
//! per metric kind. Inserts are keyed by timestamp with
//! `ON CONFLICT DO NOTHING` so replays are harmless.

use aegis_common::{Result, Sample};
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Commits slower than this are counted as slow but never block the loop.
const SLOW_WRITE_MS: u128 = 500;

/// Writes buffered samples to the time-indexed metric tables
pub struct Persister {
    pool: PgPool,
    slow_writes: AtomicU64,
    total_writes: AtomicU64,
}

impl Persister {
    pub fn new(pool: PgPool) -> Self {
        Persister {
            pool,
            slow_writes: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
        }
    }

    /// Commit one sample, one row per metric kind
    pub async fn persist(&self, sample: &Sample) -> Result<()> {
        let started = Instant::now();
        let ts = sample.timestamp;

        sqlx::query(
            "INSERT INTO metrics_cpu (timestamp, value) VALUES ($1, $2)
             ON CONFLICT (timestamp) DO NOTHING",
        )
        .bind(ts)
        .bind(sample.cpu)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO metrics_ram (timestamp, value) VALUES ($1, $2)
             ON CONFLICT (timestamp) DO NOTHING",
        )
        .bind(ts)
        .bind(sample.ram)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO metrics_gpu (timestamp, value) VALUES ($1, $2)
             ON CONFLICT (timestamp) DO NOTHING",
        )
        .bind(ts)
        .bind(sample.gpu)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO metrics_temperature (timestamp, value) VALUES ($1, $2)
             ON CONFLICT (timestamp) DO NOTHING",
        )
        .bind(ts)
        .bind(sample.temperature)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO metrics_disk (timestamp, used, free, percent) VALUES ($1, $2, $3, $4)
             ON CONFLICT (timestamp) DO NOTHING",
        )
        .bind(ts)
        .bind(sample.disk.used as i64)
        .bind(sample.disk.free as i64)
        .bind(sample.disk.percent)
        .execute(&self.pool)
        .await?;

        self.total_writes.fetch_add(1, Ordering::Relaxed);
        let elapsed = started.elapsed().as_millis();
        if elapsed > SLOW_WRITE_MS {
            self.slow_writes.fetch_add(1, Ordering::Relaxed);
            warn!("Slow metrics write: {}ms", elapsed);
        } else {
            debug!(
                "Metrics written: CPU={:.1}%, RAM={:.1}%, GPU={:.1}%",
                sample.cpu, sample.ram, sample.gpu
            );
        }
        Ok(())
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.total_writes.load(Ordering::Relaxed),
            self.slow_writes.load(Ordering::Relaxed),
        )
    }
}

/// Shared handle type used by the sampler and HTTP server
pub type SharedPersister = Arc<Persister>;
