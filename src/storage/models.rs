use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-account sweep settings and resumption state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub did: String,
    /// PDS base URL
    pub service: String,
    #[serde(skip_serializing)]
    pub refresh_jwt: String,
    pub enabled: bool,
    /// Maximum post age in months
    pub post_ttl: u32,
    pub cursor: String,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of one scheduling cycle as stored in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub spent_points: u64,
    pub spent_time_ms: u64,
    pub throttled: u64,
    pub posts_deleted: u64,
    pub accounts_processed: u64,
    pub accounts_failed: u64,
    pub dry_run: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_accounts: usize,
    pub enabled_accounts: usize,
    pub total_runs: usize,
    pub total_posts_deleted: u64,
    pub total_points_spent: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}
