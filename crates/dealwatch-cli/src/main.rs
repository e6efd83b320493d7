use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dealwatch_storage::PgStore;
use dealwatch_sync::{AppContext, SyncConfig, SyncOutcome};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "dealwatch")]
#[command(about = "Deal watcher: catalog sync, notifications and social broadcasts")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Commands {
    /// Run one sync cycle and exit.
    Sync,
    /// Serve the admin API and run the sync schedule.
    Serve,
    /// Post the daily digest of top deals.
    ShareDaily {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Apply database migrations.
    Migrate,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::env::var("DEALWATCH_LOG_FORMAT").as_deref() {
        Ok("json") => fmt().json().with_env_filter(filter).init(),
        _ => fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    init_logging();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => match dealwatch_sync::run_sync_once_from_env().await? {
            SyncOutcome::Completed(stats) => println!(
                "sync complete: run_id={} scanned={} created={} updated={} price_drops={} errors={}",
                stats.run_id, stats.scanned, stats.created, stats.updated, stats.price_drops, stats.errors
            ),
            SyncOutcome::Skipped => println!("sync skipped: another run is in progress"),
        },
        Commands::Serve => dealwatch_web::serve_from_env().await?,
        Commands::ShareDaily { limit } => {
            let ctx = AppContext::from_env().await?;
            let limit = limit.unwrap_or(ctx.config.digest_limit);
            let report = ctx.broadcaster.share_daily_top_deals(limit).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = PgStore::connect(&config.database_url, 2)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            info!("migrations applied");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_is_the_default_command() {
        let cli = Cli::try_parse_from(["dealwatch"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn share_daily_takes_a_limit() {
        let cli = Cli::try_parse_from(["dealwatch", "share-daily", "--limit", "3"]).unwrap();
        assert_eq!(cli.command, Some(Commands::ShareDaily { limit: Some(3) }));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(Cli::try_parse_from(["dealwatch", "publish"]).is_err());
    }
}
