mod cli;

use clap::Parser;
use cli::{AccountCommands, Cli, Commands};
use colored::*;
use record_sweeper::{
    bluesky::{self, SessionProvider, XrpcClient, XrpcSessionProvider},
    error::{self, SweepError},
    storage::Database,
    sweep::{RateLimiter, RecordScanner, SweepStatistics, SweepWorker, WorkerSettings},
    utils, Config,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "record_sweeper=debug,sweeper=debug,info"
    } else {
        "record_sweeper=info,sweeper=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Init => initialize(&config, &cli.config).await,

        Commands::Account(command) => manage_account(&config, command).await,

        Commands::Run { dry_run, format } => {
            info!("Running sweep cycle...");
            run_once(&config, dry_run, &format).await
        }

        Commands::Auto { interval, dry_run } => {
            let interval = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.worker_interval());
            info!("Starting automated sweep service (interval: {}s)", interval.as_secs());
            run_auto_service(&config, interval, dry_run).await
        }

        Commands::Scan { did, list } => {
            info!("Scanning {} for expired posts...", did);
            scan_account(&config, &did, list).await
        }

        Commands::Reset { did, yes } => reset_cursors(&config, did.as_deref(), yes),

        Commands::Stats { format } => show_stats(&config, &format),
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {}", e).red());
        std::process::exit(1);
    }
}

/// Cancel `shutdown` on the first Ctrl-C.
fn cancel_on_ctrl_c(shutdown: &CancellationToken) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling sweep");
            shutdown.cancel();
        }
    });
}

fn session_provider(config: &Config) -> error::Result<XrpcSessionProvider> {
    let http = bluesky::build_http_client(config.request_timeout())?;
    Ok(XrpcSessionProvider::new(http))
}

async fn initialize(config: &Config, config_path: &str) -> error::Result<()> {
    println!("{}", "Initializing record sweeper...".green());
    let _db = Database::new(&config.database.path)?;
    println!("{}", "✓ Database initialized".green());

    if std::path::Path::new(config_path).exists() {
        println!("{}", "✓ Configuration loaded".green());
    } else {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| SweepError::Config(format!("Could not render configuration: {}", e)))?;
        std::fs::write(config_path, rendered)
            .map_err(|e| SweepError::Config(format!("Could not write {}: {}", config_path, e)))?;
        println!("{}", format!("✓ Wrote default configuration to {}", config_path).green());
    }

    println!("\n{}", "Configuration:".cyan());
    println!("  Service:          {}", config.bluesky.service);
    println!("  Collection:       {}", config.bluesky.collection);
    println!("  Global Points:    {} per {}s", config.limits.points_global, config.limits.reset_interval_secs);
    println!("  Pages / Account:  {}", config.limits.max_pages_per_account);
    println!("  Page Size:        {}", config.limits.list_records_limit);
    println!("  Write Batch:      {}", config.limits.apply_writes_limit);
    println!("  Dry Run:          {}", config.worker.dry_run);
    println!("  Database:         {}", config.database.path);

    println!("\n{}", "Ready to use! Try running:".cyan());
    println!("  {} to add an account", "sweeper account add -i <handle> -p <app password>".yellow());
    println!("  {} to preview a sweep", "sweeper run --dry-run".yellow());
    Ok(())
}

async fn manage_account(config: &Config, command: AccountCommands) -> error::Result<()> {
    let db = Database::new(&config.database.path)?;

    match command {
        AccountCommands::Add {
            identifier,
            password,
            service,
            ttl_months,
            disabled,
        } => {
            let service = service.unwrap_or_else(|| config.bluesky.service.clone());
            let http = bluesky::build_http_client(config.request_timeout())?;
            let session = XrpcClient::create_session(&http, &service, &identifier, &password).await?;

            let configuration =
                db.upsert_configuration(&session.did, &service, &session.refresh_jwt, !disabled, ttl_months)?;

            println!(
                "✓ Added {} ({}) with a TTL of {} months, {}",
                session.handle.cyan(),
                configuration.did,
                configuration.post_ttl,
                utils::format_enabled(configuration.enabled)
            );
        }

        AccountCommands::List { format } => {
            let configurations = db.get_configurations()?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&configurations)?);
                return Ok(());
            }

            if configurations.is_empty() {
                println!("No accounts configured");
                return Ok(());
            }

            utils::print_table_border(100);
            utils::print_table_row(&["DID", "TTL", "Status", "Cursor", "Updated"], &[34, 10, 10, 16, 24]);
            utils::print_table_border(100);
            for configuration in &configurations {
                utils::print_table_row(
                    &[
                        &utils::format_did(&configuration.did),
                        &format!("{} months", configuration.post_ttl),
                        if configuration.enabled { "enabled" } else { "disabled" },
                        if configuration.cursor.is_empty() { "-" } else { configuration.cursor.as_str() },
                        &utils::format_timestamp(&configuration.updated_at),
                    ],
                    &[34, 10, 10, 16, 24],
                );
            }
            utils::print_table_border(100);
        }

        AccountCommands::Show { did } => {
            let configuration = db
                .get_configuration(&did)?
                .ok_or_else(|| SweepError::AccountNotFound(did.clone()))?;

            println!("{}", configuration.did.cyan().bold());
            println!("  Service:  {}", configuration.service);
            println!("  Status:   {}", utils::format_enabled(configuration.enabled));
            println!("  TTL:      {} months", configuration.post_ttl);
            println!(
                "  Cursor:   {}",
                if configuration.cursor.is_empty() { "(start of collection)" } else { configuration.cursor.as_str() }
            );
            println!("  Updated:  {}", utils::format_timestamp(&configuration.updated_at));
        }

        AccountCommands::Set {
            did,
            ttl_months,
            enable,
            disable,
        } => {
            let current = db
                .get_configuration(&did)?
                .ok_or_else(|| SweepError::AccountNotFound(did.clone()))?;

            let enabled = if enable {
                true
            } else if disable {
                false
            } else {
                current.enabled
            };

            let updated = db.upsert_configuration(
                &current.did,
                &current.service,
                &current.refresh_jwt,
                enabled,
                ttl_months.unwrap_or(current.post_ttl),
            )?;

            println!(
                "✓ {} now deletes posts older than {} months, {}",
                updated.did,
                updated.post_ttl,
                utils::format_enabled(updated.enabled)
            );
        }

        AccountCommands::Remove { did, yes } => {
            if !yes && !utils::confirm_action(&format!("Remove {} and its stored credentials?", did)) {
                println!("Cancelled");
                return Ok(());
            }

            db.delete_configuration(&did)?;
            println!("✓ Removed {}", did);
        }
    }

    Ok(())
}

async fn run_cycle(config: &Config, db: &Database, dry_run: bool, shutdown: &CancellationToken) -> error::Result<SweepStatistics> {
    let started_at = chrono::Utc::now();
    let worker = SweepWorker::new(db, session_provider(config)?, WorkerSettings::from_config(config, dry_run));

    let stats = worker.run_cycle(shutdown).await?;
    db.save_sweep_run(&stats.to_run(started_at))?;
    Ok(stats)
}

async fn run_once(config: &Config, dry_run: bool, format: &str) -> error::Result<()> {
    let actual_dry_run = dry_run || config.worker.dry_run;
    let db = Database::new(&config.database.path)?;

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);

    let stats = run_cycle(config, &db, actual_dry_run, &shutdown).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    stats.print_summary();
    if actual_dry_run {
        println!("\n{}", "DRY RUN: No posts were deleted".yellow());
    }
    Ok(())
}

async fn run_auto_service(config: &Config, interval: std::time::Duration, dry_run: bool) -> error::Result<()> {
    let actual_dry_run = dry_run || config.worker.dry_run;

    println!("{}", "Starting automated sweep service...".green());
    println!("Interval: {} seconds", interval.as_secs());
    println!("Dry run: {}", actual_dry_run);

    let db = Database::new(&config.database.path)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);

    while !shutdown.is_cancelled() {
        info!("Running sweep cycle...");

        match run_cycle(config, &db, actual_dry_run, &shutdown).await {
            Ok(stats) => stats.print_summary(),
            Err(e) => warn!("Sweep cycle failed: {}", e),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    println!("{}", "Sweep service stopped".yellow());
    Ok(())
}

async fn scan_account(config: &Config, did: &str, list: bool) -> error::Result<()> {
    let db = Database::new(&config.database.path)?;
    let configuration = db
        .get_configuration(did)?
        .ok_or_else(|| SweepError::AccountNotFound(did.to_string()))?;

    let opened = session_provider(config)?.open(&configuration).await?;
    // The refresh token was rotated; the old one no longer works
    db.update_refresh_token(&configuration.did, &opened.session.refresh_jwt)?;

    let limiter = Arc::new(RateLimiter::new(config.limits.points_global, config.reset_interval(), None)?);
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(&shutdown);
    let refill = tokio::spawn({
        let limiter = limiter.clone();
        let shutdown = shutdown.clone();
        async move { limiter.run(shutdown).await }
    });

    let scanner = RecordScanner::new(
        &config.bluesky.collection,
        config.limits.list_records_limit,
        config.limits.max_pages_per_account,
    );
    let result = scanner
        .scan(opened.client.as_ref(), configuration.post_ttl, &configuration.cursor, &limiter)
        .await;

    shutdown.cancel();
    if let Err(e) = refill.await {
        warn!("Rate limiter task ended abnormally: {}", e);
    }
    let outcome = result?;

    println!("\n{}", "=== Scan Results ===".cyan().bold());
    println!("Account:        {} ({})", opened.session.handle, configuration.did);
    println!("TTL:            {} months", configuration.post_ttl);
    println!("Pages Fetched:  {}", outcome.pages_fetched);
    println!("Points Spent:   {}", limiter.spent_points());
    println!("Expired Posts:  {}", outcome.candidates.len().to_string().green());

    if list && !outcome.candidates.is_empty() {
        println!();
        utils::print_table_border(60);
        utils::print_table_row(&["Record Key", "Created"], &[20, 24]);
        utils::print_table_border(60);
        for candidate in &outcome.candidates {
            utils::print_table_row(
                &[&candidate.record_key, &utils::format_timestamp(&candidate.created_at)],
                &[20, 24],
            );
        }
        utils::print_table_border(60);
    }

    println!("\n{}", "PREVIEW: Nothing was deleted and the cursor was not advanced".yellow());
    Ok(())
}

fn reset_cursors(config: &Config, did: Option<&str>, yes: bool) -> error::Result<()> {
    let prompt = match did {
        Some(did) => format!("Reset the cursor of {}?", did),
        None => "Reset the cursors of all accounts?".to_string(),
    };
    if !yes && !utils::confirm_action(&prompt) {
        println!("Cancelled");
        return Ok(());
    }

    let db = Database::new(&config.database.path)?;
    let reset = db.reset_cursor(did)?;
    if let (Some(did), 0) = (did, reset) {
        return Err(SweepError::AccountNotFound(did.to_string()));
    }

    println!("✓ Reset {} cursor(s); the next cycle starts from the oldest post", reset);
    Ok(())
}

fn show_stats(config: &Config, format: &str) -> error::Result<()> {
    let db = Database::new(&config.database.path)?;
    let stats = db.get_stats()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "=== Record Sweeper Statistics ===".cyan().bold());
    println!("\nAccounts:");
    println!("  Total:          {}", stats.total_accounts);
    println!("  Enabled:        {}", stats.enabled_accounts.to_string().green());

    println!("\nLive Runs:");
    println!("  Total:          {}", stats.total_runs);
    println!("  Posts Deleted:  {}", stats.total_posts_deleted.to_string().cyan());
    println!("  Points Spent:   {}", stats.total_points_spent);
    if let Some(last) = stats.last_run_at {
        println!("  Last Run:       {}", utils::format_timestamp(&last));
    }

    let history = db.get_sweep_history(Some(10))?;
    if !history.is_empty() {
        println!("\n{}", "Recent Runs:".yellow());
        utils::print_table_border(90);
        utils::print_table_row(
            &["Started", "Posts", "Points", "Throttled", "Failed", "Mode"],
            &[24, 8, 8, 10, 8, 8],
        );
        utils::print_table_border(90);

        for run in history {
            utils::print_table_row(
                &[
                    &utils::format_timestamp(&run.started_at),
                    &run.posts_deleted.to_string(),
                    &run.spent_points.to_string(),
                    &run.throttled.to_string(),
                    &run.accounts_failed.to_string(),
                    if run.dry_run { "dry run" } else { "live" },
                ],
                &[24, 8, 8, 10, 8, 8],
            );
        }
        utils::print_table_border(90);
    }

    Ok(())
}
