use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    bluesky::{AuthenticatedClient, SessionProvider},
    config::Config,
    error::{Result, SweepError},
    storage::{Configuration, ConfigurationStore, SweepRun},
    sweep::{
        deleter::{BatchDeleter, DeleteSummary},
        limiter::{RateLimiter, WaitHook},
        scanner::RecordScanner,
    },
};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub global_limit: u32,
    pub reset_interval: Duration,
    pub max_pages_per_account: usize,
    pub list_records_limit: usize,
    pub apply_writes_limit: usize,
    pub collection: String,
    pub dry_run: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            global_limit: config.limits.points_global,
            reset_interval: config.reset_interval(),
            max_pages_per_account: config.limits.max_pages_per_account,
            list_records_limit: config.limits.list_records_limit,
            apply_writes_limit: config.limits.apply_writes_limit,
            collection: config.bluesky.collection.clone(),
            dry_run,
        }
    }
}

/// Totals for one scheduling cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStatistics {
    pub spent_points: u64,
    #[serde(rename = "spentTime")]
    pub spent_time_ms: u64,
    pub throttled: u64,
    pub posts_deleted: u64,
    pub accounts_processed: u64,
    pub accounts_failed: u64,
    pub dry_run: bool,
    /// Record URIs a dry run would have deleted
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub would_delete: Vec<String>,
}

impl SweepStatistics {
    pub fn to_run(&self, started_at: DateTime<Utc>) -> SweepRun {
        SweepRun {
            id: 0,
            started_at,
            spent_points: self.spent_points,
            spent_time_ms: self.spent_time_ms,
            throttled: self.throttled,
            posts_deleted: self.posts_deleted,
            accounts_processed: self.accounts_processed,
            accounts_failed: self.accounts_failed,
            dry_run: self.dry_run,
        }
    }

    /// Print a formatted summary to console
    pub fn print_summary(&self) {
        println!("\n=== Sweep Summary ===");
        println!("Accounts Swept:  {} ✓", self.accounts_processed);
        println!("Accounts Failed: {} ✗", self.accounts_failed);
        println!(
            "Posts {}: {}",
            if self.dry_run { "To Delete" } else { "Deleted" },
            self.posts_deleted
        );
        println!("Points Spent:    {}", self.spent_points);
        println!("Throttled:       {} times", self.throttled);
        println!("Duration:        {}", crate::utils::format_duration_ms(self.spent_time_ms));
        if !self.would_delete.is_empty() {
            println!("Would delete:");
            for uri in &self.would_delete {
                println!("  {}", uri);
            }
        }
        println!("=====================");
    }
}

/// Runs sweep cycles over every enabled account, sharing one rate limiter per cycle.
pub struct SweepWorker<'a, P: SessionProvider> {
    store: &'a dyn ConfigurationStore,
    sessions: P,
    settings: WorkerSettings,
}

impl<'a, P: SessionProvider> SweepWorker<'a, P> {
    pub fn new(store: &'a dyn ConfigurationStore, sessions: P, settings: WorkerSettings) -> Self {
        Self {
            store,
            sessions,
            settings,
        }
    }

    /// Sweep all enabled accounts once.
    ///
    /// A failing account is logged and skipped without persisting anything for
    /// it. Cancelling `shutdown` tears the limiter down, which ends the cycle.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> Result<SweepStatistics> {
        let started = Instant::now();
        let throttled = Arc::new(AtomicU64::new(0));

        let hook: WaitHook = {
            let throttled = throttled.clone();
            Box::new(move || {
                info!("Pausing until rate limit reset interval");
                throttled.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        };

        let limiter = Arc::new(RateLimiter::new(
            self.settings.global_limit,
            self.settings.reset_interval,
            Some(hook),
        )?);

        let cycle = shutdown.child_token();
        let refill = tokio::spawn({
            let limiter = limiter.clone();
            let cycle = cycle.clone();
            async move { limiter.run(cycle).await }
        });

        let result = self.sweep_accounts(&limiter).await;

        cycle.cancel();
        if let Err(e) = refill.await {
            warn!("Rate limiter task ended abnormally: {}", e);
        }

        let mut stats = result?;
        stats.spent_points = limiter.spent_points();
        stats.spent_time_ms = started.elapsed().as_millis() as u64;
        stats.throttled = throttled.load(Ordering::Relaxed);

        info!(
            "Spent {} points in {} while being throttled {} times to delete {} posts (dry run mode {})",
            stats.spent_points,
            crate::utils::format_duration_ms(stats.spent_time_ms),
            stats.throttled,
            stats.posts_deleted,
            if stats.dry_run { "enabled" } else { "disabled" }
        );

        Ok(stats)
    }

    async fn sweep_accounts(&self, limiter: &RateLimiter) -> Result<SweepStatistics> {
        let configurations = self.store.enabled_configurations()?;
        info!(
            "Sweeping {} enabled accounts with {} points per window",
            configurations.len(),
            limiter.global_limit()
        );

        let scanner = RecordScanner::new(
            &self.settings.collection,
            self.settings.list_records_limit,
            self.settings.max_pages_per_account,
        );
        let deleter = BatchDeleter::new(
            &self.settings.collection,
            self.settings.apply_writes_limit,
            self.settings.dry_run,
        )?;

        let mut stats = SweepStatistics {
            dry_run: self.settings.dry_run,
            ..SweepStatistics::default()
        };

        for configuration in &configurations {
            match self.sweep_account(configuration, &scanner, &deleter, limiter).await {
                Ok(summary) => {
                    stats.accounts_processed += 1;
                    stats.posts_deleted += summary.records as u64;
                    stats.would_delete.extend(summary.would_delete);
                }
                Err(SweepError::Cancelled) => {
                    stats.accounts_failed += 1;
                    warn!("Sweep cancelled while processing {}, skipping remaining accounts", configuration.did);
                    break;
                }
                Err(e) => {
                    stats.accounts_failed += 1;
                    if e.is_retryable() {
                        warn!("Could not reach PDS for {}, retrying next cycle: {}", configuration.did, e);
                    } else {
                        warn!("Could not sweep {}, skipping: {}", configuration.did, e);
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Returns what was deleted, or what would have been in a dry run.
    async fn sweep_account(
        &self,
        configuration: &Configuration,
        scanner: &RecordScanner,
        deleter: &BatchDeleter,
        limiter: &RateLimiter,
    ) -> Result<DeleteSummary> {
        let AuthenticatedClient { client, session } = self.sessions.open(configuration).await?;

        let outcome = scanner
            .scan(client.as_ref(), configuration.post_ttl, &configuration.cursor, limiter)
            .await?;

        debug!(
            "Found {} posts older than {} months for {} in {} pages",
            outcome.candidates.len(),
            configuration.post_ttl,
            session.did,
            outcome.pages_fetched
        );

        let summary = deleter.delete(client.as_ref(), &outcome.candidates, limiter).await?;

        // A dry run keeps the cursor so a later live run still sees the same posts
        let cursor = if self.settings.dry_run {
            configuration.cursor.as_str()
        } else {
            outcome.cursor.as_str()
        };
        self.store
            .update_refresh_token_and_cursor(&configuration.did, cursor, &session.refresh_jwt)?;

        Ok(summary)
    }
}
