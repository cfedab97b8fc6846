use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tally::access::{AccessDecision, AccessGate};
use tally::config::Config;
use tally::models::parse_expiry;
use tally::storage::{self, StorageError};
use tally::tracking::engine::clamp_trend_days;
use tally::tracking::{GeoResolver, TrackingEngine};

#[derive(Parser)]
#[command(name = "tally-admin")]
#[command(about = "Tally access list and maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the IP blacklist
    Blacklist {
        #[command(subcommand)]
        action: BlacklistAction,
    },
    /// Manage the IP whitelist
    Whitelist {
        #[command(subcommand)]
        action: WhitelistAction,
    },
    /// Run the access gate for an address
    Check {
        ip: String,
    },
    /// Delete all visitor records, daily statistics and presence rooms
    ClearVisitors,
    /// Delete daily statistics only
    ClearStats,
    /// Print the daily statistics trend
    Stats {
        /// Days to look back (1-90)
        #[arg(long, default_value_t = 7)]
        days: i64,
    },
}

#[derive(Subcommand)]
enum BlacklistAction {
    Add {
        ip: String,
        #[arg(long, default_value = "")]
        reason: String,
        /// Expiry as RFC 3339 or "YYYY-MM-DD HH:MM:SS" (UTC)
        #[arg(long)]
        expires: Option<String>,
    },
    Remove {
        id: i64,
    },
    List,
}

#[derive(Subcommand)]
enum WhitelistAction {
    Add {
        ip: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Remove {
        id: i64,
    },
    List,
}

fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let storage = storage::connect(&config.database).await?;

    match cli.command {
        Commands::Blacklist { action } => match action {
            BlacklistAction::Add {
                ip,
                reason,
                expires,
            } => {
                let expires_at = match expires.as_deref() {
                    Some(raw) => match parse_expiry(raw) {
                        Some(ts) => Some(ts),
                        None => bail!("Invalid expiry '{}'", raw),
                    },
                    None => None,
                };
                match storage.add_to_blacklist(&ip, &reason, expires_at).await {
                    Ok(entry) => println!("✓ Blacklisted {} (id {})", entry.ip_address, entry.id),
                    Err(StorageError::Conflict) => println!("⚠ {} is already blacklisted", ip),
                    Err(StorageError::Other(e)) => return Err(e),
                }
            }
            BlacklistAction::Remove { id } => {
                if storage.remove_from_blacklist(id).await? {
                    println!("✓ Removed blacklist entry {}", id);
                } else {
                    println!("⚠ No blacklist entry with id {}", id);
                }
            }
            BlacklistAction::List => {
                let entries = storage.list_blacklist().await?;
                if entries.is_empty() {
                    println!("Blacklist is empty.");
                } else {
                    let now = Utc::now().timestamp();
                    println!(
                        "{:<8} {:<40} {:<20} {:<8} {}",
                        "ID", "IP Address", "Expires", "Active", "Reason"
                    );
                    println!("{}", "-".repeat(100));
                    for entry in entries {
                        let expires = entry
                            .expires_at
                            .map(format_ts)
                            .unwrap_or_else(|| "never".to_string());
                        println!(
                            "{:<8} {:<40} {:<20} {:<8} {}",
                            entry.id,
                            entry.ip_address,
                            expires,
                            if entry.is_active(now) { "yes" } else { "no" },
                            entry.reason
                        );
                    }
                }
            }
        },
        Commands::Whitelist { action } => match action {
            WhitelistAction::Add { ip, description } => {
                match storage.add_to_whitelist(&ip, &description).await {
                    Ok(entry) => println!("✓ Whitelisted {} (id {})", entry.ip_address, entry.id),
                    Err(StorageError::Conflict) => println!("⚠ {} is already whitelisted", ip),
                    Err(StorageError::Other(e)) => return Err(e),
                }
            }
            WhitelistAction::Remove { id } => {
                if storage.remove_from_whitelist(id).await? {
                    println!("✓ Removed whitelist entry {}", id);
                } else {
                    println!("⚠ No whitelist entry with id {}", id);
                }
            }
            WhitelistAction::List => {
                let entries = storage.list_whitelist().await?;
                if entries.is_empty() {
                    println!("Whitelist is empty, every non-blacklisted address is allowed.");
                } else {
                    println!("{:<8} {:<40} {}", "ID", "IP Address", "Description");
                    println!("{}", "-".repeat(80));
                    for entry in entries {
                        println!(
                            "{:<8} {:<40} {}",
                            entry.id, entry.ip_address, entry.description
                        );
                    }
                }
            }
        },
        Commands::Check { ip } => {
            let gate = AccessGate::new(storage);
            match gate.check(&ip).await? {
                AccessDecision::Allowed => println!("✓ {} is allowed", ip),
                AccessDecision::Denied(reason) => println!("✗ {}: {}", ip, reason.message()),
            }
        }
        Commands::ClearVisitors => {
            storage.clear_visits().await?;
            println!("✓ Cleared visitor records, daily statistics and presence");
        }
        Commands::ClearStats => {
            storage.clear_daily_stats().await?;
            println!("✓ Cleared daily statistics");
        }
        Commands::Stats { days } => {
            let days = clamp_trend_days(Some(days));
            let engine = TrackingEngine::new(storage, GeoResolver::disabled(), &config.tracking);
            let stats = engine.trend(days, Utc::now()).await?;
            if stats.is_empty() {
                println!("No statistics in the last {} days.", days);
            } else {
                println!(
                    "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10}",
                    "Date", "Views", "Visitors", "IPs", "New", "Returning"
                );
                println!("{}", "-".repeat(68));
                for day in stats {
                    println!(
                        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10}",
                        day.stats_date,
                        day.page_views,
                        day.unique_visitors,
                        day.unique_ips,
                        day.new_visitors,
                        day.returning_visitors
                    );
                }
            }
        }
    }

    Ok(())
}
