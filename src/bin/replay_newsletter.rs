use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use notion_newsletter::{build_publisher, config, db};

#[derive(Debug, Parser)]
#[command(about = "Replay newsletter deliveries and maintain the delivery log")]
struct Args {
    /// Optional YAML config; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the publish pipeline for a page, as if a verified webhook arrived
    Send {
        #[arg(long)]
        page_id: String,
        /// Clear any previous delivery record first
        #[arg(long)]
        force: bool,
        /// Print the email HTML instead of sending
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recent deliveries
    List {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Delete the delivery record for a page
    Forget {
        #[arg(long)]
        page_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    let pool = db::init_pool(&cfg.app.database_url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Send {
            page_id,
            force,
            dry_run,
        } => {
            let publisher = build_publisher(&cfg, pool.clone())?;
            if dry_run {
                let item = publisher.content.fetch_by_id(&page_id).await?;
                eprintln!(
                    "status={} newsletter={} category={}",
                    item.status.as_str(),
                    item.newsletter_eligible,
                    item.category
                );
                println!("{}", publisher.render(&item).await?);
                return Ok(());
            }
            if force && db::forget_delivery(&pool, &page_id).await? {
                info!(%page_id, "cleared previous delivery record");
            }
            let outcome = publisher.publish_page(&page_id, Some("manual-replay")).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::List { limit } => {
            for rec in db::list_deliveries(&pool, limit).await? {
                println!(
                    "{}  {:<8} attempts={} broadcast={} {}{}",
                    rec.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    rec.status.as_str(),
                    rec.attempts,
                    rec.broadcast_id.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
                    rec.page_id,
                    rec.last_error.map(|e| format!("  error: {}", e)).unwrap_or_default(),
                );
            }
        }
        Command::Forget { page_id } => {
            if db::forget_delivery(&pool, &page_id).await? {
                println!("forgot delivery for {}", page_id);
            } else {
                println!("no delivery recorded for {}", page_id);
            }
        }
    }
    Ok(())
}
