use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sweeper")]
#[command(about = "Automatically delete your old posts from Bluesky")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize database and show the effective configuration
    Init,

    /// Manage swept accounts
    #[command(subcommand)]
    Account(AccountCommands),

    /// Run one sweep cycle over all enabled accounts
    Run {
        /// Dry run mode (list and count, don't delete)
        #[arg(long)]
        dry_run: bool,

        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Run sweep cycles on a fixed interval until interrupted
    Auto {
        /// Seconds between cycles (defaults to worker.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Dry run mode (list and count, don't delete)
        #[arg(long)]
        dry_run: bool,
    },

    /// Preview the posts one account would lose, without deleting anything
    Scan {
        /// Account DID
        did: String,

        /// List every post found
        #[arg(long)]
        list: bool,
    },

    /// Reset stored cursors (next cycle starts from the oldest post)
    Reset {
        /// Only reset this account
        did: Option<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show statistics and recent runs
    Stats {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Log in with an app password and start sweeping the account
    Add {
        /// Handle or DID
        #[arg(short, long)]
        identifier: String,

        /// App password
        #[arg(short, long, env = "SWEEPER_APP_PASSWORD", hide_env_values = true)]
        password: String,

        /// PDS URL (defaults to bluesky.service)
        #[arg(short, long)]
        service: Option<String>,

        /// Delete posts older than this many months
        #[arg(short, long, default_value = "6")]
        ttl_months: u32,

        /// Store the account without enabling deletion
        #[arg(long)]
        disabled: bool,
    },

    /// List configured accounts
    List {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show one account
    Show {
        did: String,
    },

    /// Change an account's TTL or enable flag
    Set {
        did: String,

        #[arg(short, long)]
        ttl_months: Option<u32>,

        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,
    },

    /// Stop sweeping an account and forget its credentials
    Remove {
        did: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
