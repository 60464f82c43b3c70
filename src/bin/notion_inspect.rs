use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use notion_newsletter::config;
use notion_newsletter::notion::{ContentStore, NotionClient};

/// Properties the blog database is expected to carry.
const EXPECTED_PROPERTIES: &[(&str, &[&str])] = &[
    ("Title", &["title"]),
    ("Date", &["date"]),
    ("Category", &["select"]),
    ("Slug", &["rich_text"]),
    ("Description", &["rich_text"]),
    ("Status", &["select", "status"]),
    ("SendAsNewsletter", &["checkbox"]),
];

#[derive(Parser, Debug)]
#[command(about = "Inspect the blog database and its posts")]
struct Args {
    /// Optional YAML config; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the database schema and check the expected properties
    Schema {
        /// Database to inspect (defaults to NOTION_DATABASE_ID)
        #[arg(long)]
        db_id: Option<String>,
    },
    /// List published posts, newest first
    Published,
    /// Print a post's metadata and Markdown body
    Post {
        #[arg(long, conflicts_with = "id", required_unless_present = "id")]
        slug: Option<String>,
        #[arg(long)]
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    let client = NotionClient::from_config(&cfg)?;

    match args.command {
        Command::Schema { db_id } => {
            let db_id = db_id.unwrap_or_else(|| client.database_id().to_string());
            let db = client.retrieve_database(&db_id).await?;
            println!("Database ID: {}", db.id);
            println!("Properties:");
            for (name, prop) in &db.properties {
                println!("  {} -> {{ id: {}, type: {} }}", name, prop.id, prop.typ);
            }
            let mut ok = true;
            for (name, types) in EXPECTED_PROPERTIES {
                match db.properties.get(*name) {
                    Some(prop) if types.contains(&prop.typ.as_str()) => {}
                    Some(prop) => {
                        ok = false;
                        println!("! {} has type {}, expected one of {:?}", name, prop.typ, types);
                    }
                    None => {
                        ok = false;
                        println!("! missing property {}", name);
                    }
                }
            }
            if ok {
                println!("All expected properties present.");
            }
        }
        Command::Published => {
            for post in client.list_published().await? {
                println!(
                    "{}  {:<24} {:<20} newsletter={} {}",
                    post.date, post.slug, post.category, post.newsletter_eligible, post.title
                );
            }
        }
        Command::Post { slug, id } => {
            let post = match (slug, id) {
                (Some(slug), _) => client.fetch_by_slug(&slug).await?,
                (None, Some(id)) => client.fetch_by_id(&id).await?,
                (None, None) => anyhow::bail!("pass --slug or --id"),
            };
            println!("{}", serde_json::to_string_pretty(&post)?);
            println!();
            println!("{}", client.render_markdown(&post.id).await?);
        }
    }
    Ok(())
}
