use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};

use feedloom::feed::{build_client, parse_feed, FeedSource};
use feedloom::query::{Filter, SearchQuery};
use feedloom::service::{CATEGORY_VIEW, GLOBAL_FEED_VIEW, SUBSCRIPTION_VIEW};
use feedloom::storage::{Database, DatabaseError, NewSubscription};
use feedloom::{AggregationService, Config};

#[derive(Parser, Debug)]
#[command(name = "feedloom", version, about = "Aggregate and paginate feeds from many sources")]
struct Args {
    /// Config file (default: ~/.config/feedloom/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Pagination and search flags, forwarded as raw query parameters.
#[derive(clap::Args, Debug, Default)]
struct QueryArgs {
    #[arg(long)]
    limit: Option<String>,
    #[arg(long)]
    skip: Option<String>,
    /// Source index to resume a walk from ("null" once exhausted)
    #[arg(long = "start-index")]
    start_index: Option<String>,
    /// Comma list of fields, leading '-' for descending
    #[arg(long)]
    sort: Option<String>,
    /// Comma list of fields, leading '-' to exclude
    #[arg(long)]
    project: Option<String>,
    /// Free-text search
    #[arg(long)]
    q: Option<String>,
}

impl QueryArgs {
    fn to_query(&self) -> SearchQuery {
        let pairs = [
            ("limit", &self.limit),
            ("skip", &self.skip),
            ("startIndex", &self.start_index),
            ("sort", &self.sort),
            ("project", &self.project),
            ("q", &self.q),
        ];
        SearchQuery::from_pairs(
            pairs
                .into_iter()
                .filter_map(|(key, value)| value.clone().map(|v| (key, v))),
        )
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk a list of sources (URLs, or doc:<id> for stored feeds)
    Walk {
        #[arg(required = true)]
        sources: Vec<String>,
        /// Mark items this owner has saved
        #[arg(long)]
        owner: Option<String>,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Walk an owner's subscriptions
    Subscriptions {
        #[arg(long)]
        owner: String,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Show one live feed
    Feed {
        source: String,
        #[arg(long)]
        owner: Option<String>,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Page through a stored collection
    List {
        #[arg(value_enum)]
        collection: CollectionArg,
        /// Scope to one owner (required for saved items and subscriptions)
        #[arg(long)]
        owner: Option<String>,
        /// Only saved items whose subscription was deleted
        #[arg(long)]
        old_feed: bool,
        /// Saved items with this source link
        #[arg(long)]
        src_link: Option<String>,
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Add a subscription for an owner
    Subscribe {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        pinned: bool,
        #[arg(long = "category")]
        categories: Vec<String>,
    },
    /// Store an RSS/Atom file as a raw feed document
    Import { file: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CollectionArg {
    Categories,
    Feeds,
    Subscriptions,
    Saved,
}

fn parse_source(raw: &str) -> FeedSource {
    match raw.strip_prefix("doc:") {
        Some(id) => FeedSource::document(id),
        None => FeedSource::url(raw),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_owner(owner: Option<String>, what: &str) -> Result<String> {
    owner.with_context(|| format!("--owner is required to list {what}"))
}

async fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the database at {} is locked by another process.", path.display());
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("feedloom=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_dir = Config::default_dir();

    let config = match args.config.clone().or_else(|| config_dir.as_ref().map(|d| d.join("config.toml"))) {
        Some(path) => Config::load(&path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let db_path = args
        .database
        .clone()
        .or_else(|| config.database_path.clone())
        .or_else(|| config_dir.as_ref().map(|d| d.join("feedloom.db")))
        .context("No database path: set --database or HOME")?;
    let db = open_database(&db_path).await?;

    let client = build_client().context("Failed to build HTTP client")?;
    let service = AggregationService::from_config(db.clone(), client, &config);

    match args.command {
        Command::Walk { sources, owner, query } => {
            let sources: Vec<FeedSource> = sources.iter().map(|s| parse_source(s)).collect();
            let page = service
                .walk_sources(&sources, &query.to_query(), owner.as_deref())
                .await?;
            print_json(&page)?;
        }
        Command::Subscriptions { owner, query } => {
            let page = service.walk_subscriptions(&owner, &query.to_query()).await?;
            print_json(&page)?;
        }
        Command::Feed { source, owner, query } => {
            let feed = service
                .feed_detail(&parse_source(&source), &query.to_query(), owner.as_deref())
                .await?;
            print_json(&feed)?;
        }
        Command::List {
            collection,
            owner,
            old_feed,
            src_link,
            query,
        } => {
            let mut search = query.to_query();
            let page = match collection {
                CollectionArg::Categories => {
                    service.paginate_collection(CATEGORY_VIEW, Filter::All, &search).await?
                }
                CollectionArg::Feeds => {
                    service.paginate_collection(GLOBAL_FEED_VIEW, Filter::All, &search).await?
                }
                CollectionArg::Subscriptions => {
                    let owner = require_owner(owner, "subscriptions")?;
                    service
                        .paginate_collection(SUBSCRIPTION_VIEW, Filter::eq("owner", owner), &search)
                        .await?
                }
                CollectionArg::Saved => {
                    let owner = require_owner(owner, "saved items")?;
                    search.old_feed = old_feed.then(|| "true".to_string());
                    search.src_link = src_link;
                    service.saved_items(&owner, &search).await?
                }
            };
            print_json(&page)?;
        }
        Command::Subscribe {
            owner,
            url,
            title,
            pinned,
            categories,
        } => {
            let sub = db
                .subscribe(
                    &owner,
                    NewSubscription {
                        url,
                        title,
                        category: categories,
                        is_pinned: pinned,
                    },
                )
                .await?;
            print_json(&sub)?;
        }
        Command::Import { file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let raw = parse_feed(&bytes)
                .map_err(|e| anyhow::anyhow!("{} is not a valid feed: {}", file.display(), e))?;
            let id = db.cache_raw_feed(&raw).await?;
            tracing::info!(id = %id, items = raw.items.len(), "Stored raw feed");
            println!("doc:{id}");
        }
    }

    db.close().await;
    Ok(())
}
