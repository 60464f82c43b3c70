pub mod config;
pub mod convertkit;
pub mod db;
pub mod error;
pub mod markdown;
pub mod model;
pub mod newsletter;
pub mod notion;
pub mod server;
pub mod signature;
pub mod webhook;

use std::sync::Arc;

use crate::config::Config;
use crate::convertkit::ConvertKitClient;
use crate::newsletter::EmailSettings;
use crate::notion::NotionClient;
use crate::webhook::Publisher;

/// Build the production publisher from configuration and an open pool.
pub fn build_publisher(cfg: &Config, pool: db::Pool) -> anyhow::Result<Publisher> {
    let notion = NotionClient::from_config(cfg)?;
    let convertkit = ConvertKitClient::from_config(cfg)?;
    Ok(Publisher {
        content: Arc::new(notion),
        mailing_list: Arc::new(convertkit),
        pool,
        email: EmailSettings {
            site_url: cfg.site_url().to_string(),
            author: cfg.site.author.clone(),
        },
        webhook_secret: cfg.notion.webhook_secret.clone(),
        trust_unsigned_payloads: cfg.notion.trust_unsigned_payloads,
    })
}
