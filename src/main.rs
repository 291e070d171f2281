use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use fanout::assembly::FeedService;
use fanout::bus::{spawn_consumers, EventBus, PartitionConsumer};
use fanout::collab::{Article, ArticleDirectory};
use fanout::config::Config;
use fanout::db::SqliteDatabase;
use fanout::events::{EventLog, Producer};
use fanout::fanout::Dispatcher;
use fanout::rebuild::Rebuilder;
use fanout::timeout::bounded;

/// Fanout: hybrid push/pull social feed delivery.
///
/// Records user actions, fans them out to followers' inboxes (or leaves
/// them in the actor's outbox for big accounts), and assembles feeds.
#[derive(Parser)]
#[command(name = "fanout", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Create or rename a user
    AddUser {
        id: i64,
        /// Name shown in rendered feeds
        name: String,
    },

    /// Publish an article
    Publish {
        /// Author's user ID
        author: i64,
        article: i64,
        title: String,
        /// Article body (used for feed excerpts)
        #[arg(long, default_value = "")]
        content: String,
    },

    /// Like an article
    Like { user: i64, article: i64 },

    /// Comment on an article
    Comment {
        user: i64,
        article: i64,
        /// ID of the comment being posted
        comment: i64,
        text: String,
    },

    /// Collect (bookmark) an article
    Collect { user: i64, article: i64 },

    /// Follow another user
    Follow { follower: i64, followee: i64 },

    /// Run the fan-out consumers until Ctrl-C
    Consume {
        /// Drain pending messages once and exit
        #[arg(long)]
        once: bool,
    },

    /// Show a user's feed
    Feed {
        user: i64,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Items per page (1-100)
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show a user's own recorded actions, newest first
    Activity {
        user: i64,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Rebuild a user's inbox and outbox from the event log
    Rebuild {
        user: i64,
        /// How many days of history to replay (default 30, max 90)
        #[arg(long, default_value = "30")]
        since_days: i64,
    },

    /// Show system status (event count, consumer lag)
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fanout=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing fanout database...");
            let conn = fanout::db::initialize(&config.db_path)?;
            let db = SqliteDatabase::new(conn);
            let table_count = db.table_count().await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nNext: add users with `fanout add-user <id> <name>`");
        }

        Commands::AddUser { id, name } => {
            let db = open_database(&config)?;
            db.upsert_user(id, &name).await?;
            println!("User {} is now '{}'", id, name);
        }

        Commands::Publish {
            author,
            article,
            title,
            content,
        } => {
            let db = open_database(&config)?;
            db.upsert_article(&Article {
                id: article,
                title: title.clone(),
                content,
                author_id: author,
            })
            .await?;
            let id = producer(&db).publish_article(author, article, &title).await?;
            println!("Recorded event {} (article {} published)", id, article);
        }

        Commands::Like { user, article } => {
            let db = open_database(&config)?;
            let author = article_author(&db, article, user).await?;
            let id = producer(&db).like_article(user, article, author).await?;
            println!("Recorded event {}", id);
        }

        Commands::Comment {
            user,
            article,
            comment,
            text,
        } => {
            let db = open_database(&config)?;
            let author = article_author(&db, article, user).await?;
            let id = producer(&db)
                .comment_article(user, article, author, comment, &text)
                .await?;
            println!("Recorded event {}", id);
        }

        Commands::Collect { user, article } => {
            let db = open_database(&config)?;
            let author = article_author(&db, article, user).await?;
            let id = producer(&db)
                .collect_article(user, article, author)
                .await?;
            println!("Recorded event {}", id);
        }

        Commands::Follow { follower, followee } => {
            let db = open_database(&config)?;
            if !db.add_follow(follower, followee).await? {
                println!("User {} already follows {}", follower, followee);
                return Ok(());
            }
            let id = producer(&db).follow_user(follower, followee).await?;
            println!("Recorded event {}", id);
        }

        Commands::Consume { once } => {
            let db = open_database(&config)?;
            let dispatcher = Arc::new(Dispatcher::new(
                db.clone(),
                db.clone(),
                config.fanout.clone(),
            ));

            if once {
                let mut handled = 0;
                for partition in 0..db.partitions() {
                    let consumer = PartitionConsumer::new(
                        db.clone(),
                        dispatcher.clone(),
                        partition,
                        config.bus.clone(),
                    );
                    loop {
                        let count = consumer.poll_once().await?;
                        if count == 0 {
                            break;
                        }
                        handled += count;
                    }
                }
                println!("Delivered {} pending events", handled);
                return Ok(());
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let workers = spawn_consumers(db.clone(), dispatcher, &config.bus, shutdown_rx);
            println!(
                "Consuming {} partitions as '{}'. Press Ctrl-C to stop.",
                workers.len(),
                config.bus.group
            );

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutting down consumers");
            // Receivers may already be gone if every worker exited
            let _ = shutdown_tx.send(true);
            for worker in workers {
                worker.await.context("Consumer task panicked")?;
            }
        }

        Commands::Feed {
            user,
            offset,
            limit,
        } => {
            let db = open_database(&config)?;
            let service = FeedService::new(
                db.clone(),
                db.clone(),
                db.clone(),
                db.clone(),
                config.feed.clone(),
            );
            let items = service.get_user_feed(user, offset, limit).await?;
            fanout::output::terminal::display_feed(user, &items);
            service.shutdown().await;
        }

        Commands::Activity {
            user,
            offset,
            limit,
        } => {
            let db = open_database(&config)?;
            let events = db.list_by_actor(user, offset, limit).await?;
            fanout::output::terminal::display_activity(user, &events);
        }

        Commands::Rebuild { user, since_days } => {
            let db = open_database(&config)?;
            let rebuilder = Rebuilder::new(
                db.clone(),
                db.clone(),
                db.clone(),
                config.rebuild.clone(),
            );

            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("  {spinner} {msg}")?);
            pb.set_message(format!("Rebuilding feed of user {user}..."));
            pb.enable_steady_tick(Duration::from_millis(100));

            let result = bounded(
                config.rebuild.timeout,
                "feed rebuild",
                rebuilder.rebuild_user_feed(user, since_days),
            )
            .await;
            pb.finish_and_clear();

            let report = result?;
            fanout::output::terminal::display_rebuild_report(&report);
        }

        Commands::Status => {
            if !std::path::Path::new(&config.db_path).exists() {
                println!("Database: not initialized");
                println!("\nRun `fanout init` to set up the database.");
                return Ok(());
            }
            let db = open_database(&config)?;
            fanout::status::show(db.as_ref(), db.as_ref(), &config.bus.group, &config.db_path)
                .await?;
        }
    }

    Ok(())
}

/// Open the existing database with the configured bus layout.
fn open_database(config: &Config) -> Result<Arc<SqliteDatabase>> {
    let conn = fanout::db::open(&config.db_path)?;
    Ok(Arc::new(
        SqliteDatabase::new(conn).with_partitions(config.bus.partitions),
    ))
}

fn producer(db: &Arc<SqliteDatabase>) -> Producer {
    Producer::new(db.clone(), db.clone())
}

async fn article_author(db: &SqliteDatabase, article: i64, user: i64) -> Result<i64> {
    match db.get_article(article, user).await? {
        Some(found) => Ok(found.author_id),
        None => anyhow::bail!(
            "Article {} not found. Publish it first with {}",
            article,
            "fanout publish".bold()
        ),
    }
}
