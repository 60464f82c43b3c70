use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};

use notion_newsletter::{build_publisher, config, db, server};

#[derive(Debug, Parser)]
#[command(author, version, about = "Notion webhook to ConvertKit newsletter relay")]
struct Args {
    /// Optional YAML config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides server.bind_addr / BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        cfg.server.bind_addr = bind;
    }

    if cfg.notion.webhook_secret.is_none() {
        warn!("NOTION_WEBHOOK_SECRET is not set; signed webhooks will be rejected");
    }
    if cfg.notion.trust_unsigned_payloads {
        warn!("accepting unsigned relay and direct-id payloads");
    }

    let pool = db::init_pool(&cfg.app.database_url).await?;
    db::run_migrations(&pool).await?;

    let publisher = build_publisher(&cfg, pool)?;
    let listener = TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.bind_addr))?;

    info!(database = %cfg.notion.database_id, "starting newsletter service");
    server::serve(listener, server::AppState { publisher }).await
}
