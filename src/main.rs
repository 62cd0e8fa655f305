use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedwatch::config::Config;
use feedwatch::notify::{NotificationDispatcher, SystemOpener, TracingNotifier};
use feedwatch::preferences::{Options, PreferenceManager};
use feedwatch::scheduler::Scheduler;
use feedwatch::storage::{Database, DatabaseError};
use feedwatch::sync::{
    MarkReadResult, OptionsChange, SyncContext, SyncEngine, SyncError, SyncOptions, SyncResult,
};
use feedwatch::upstream::{build_http_client, FeedlyClient};

/// Get the config directory path (~/.config/feedwatch/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedwatch"))
}

/// Create the config directory if needed and restrict it to the user.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        if let Err(e) = std::fs::set_permissions(config_dir, perms) {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedwatch",
    about = "Watch a feed-aggregation account for new entries and raise notifications"
)]
struct Args {
    /// Config file (default: ~/.config/feedwatch/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Database file (default: ~/.config/feedwatch/feedwatch.db)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll in the foreground until interrupted
    ///
    /// SIGHUP reloads options, SIGUSR1 triggers an immediate sync.
    Run,
    /// Print unread entries
    List {
        /// Sync before listing even if entries are cached
        #[arg(long)]
        force: bool,
    },
    /// Mark entries read
    MarkRead {
        #[arg(required = true, value_name = "ID")]
        ids: Vec<String>,
    },
    /// Persist an option override
    Set { key: String, value: String },
    /// Remove an option override
    Unset { key: String },
    /// Show watermark, unread count and session state
    Status,
}

fn build_engine(db: &Database, options: Options) -> Result<SyncEngine> {
    let http = build_http_client().context("Failed to build HTTP client")?;
    let client = FeedlyClient::new(
        http,
        &options.api_base_url,
        options.page_size,
        options.access_token.clone(),
    )
    .context("Invalid api_base_url")?;

    if options.access_token.is_none() {
        tracing::warn!("No access token configured; set access_token or FEEDWATCH_ACCESS_TOKEN");
    }

    let ctx = Arc::new(SyncContext::new(
        Arc::new(db.clone()),
        Arc::new(client),
        options,
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(TracingNotifier),
        Arc::new(SystemOpener),
    ));
    Ok(SyncEngine::new(ctx, dispatcher))
}

async fn load_options(config_path: &Path, db: &Database) -> Result<Options> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    let manager = match PreferenceManager::load(&config, db).await {
        Ok(manager) => manager,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load stored preferences, using config file only");
            PreferenceManager::from_config(&config)
        }
    };
    Ok(manager.into_options())
}

fn log_sync_outcome(trigger: &str, outcome: &Result<SyncResult, SyncError>) {
    match outcome {
        Ok(SyncResult::Synced { new_entries, .. }) => {
            tracing::debug!(trigger, new = new_entries.len(), "Sync finished");
        }
        Ok(SyncResult::Unauthenticated) => {
            tracing::warn!(trigger, "Not authenticated; update the access token and send SIGHUP");
        }
        Err(e) => tracing::warn!(trigger, error = %e, "Sync failed"),
    }
}

fn not_authenticated() -> anyhow::Error {
    anyhow::anyhow!(
        "Not authenticated: set access_token in the config file or FEEDWATCH_ACCESS_TOKEN"
    )
}

async fn run_daemon(engine: SyncEngine, config_path: &Path, db: &Database) -> Result<()> {
    #[cfg(unix)]
    use tokio::signal::unix::{signal, SignalKind};

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    #[cfg(unix)]
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    #[cfg(unix)]
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    let scheduler = Scheduler::new(engine.clone());
    let interval = engine.context().options().update_interval_minutes;
    log_sync_outcome("startup", &scheduler.start(interval).await);

    loop {
        // Platform-specific signal futures
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sighup_fut = sighup.recv();
        #[cfg(not(unix))]
        let sighup_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigusr1_fut = sigusr1.recv();
        #[cfg(not(unix))]
        let sigusr1_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down");
                break;
            }

            _ = sighup_fut => {
                tracing::info!("Received SIGHUP, reloading options");
                match load_options(config_path, db).await {
                    Ok(next) => {
                        let interval = next.update_interval_minutes;
                        match engine.context().replace_options(next) {
                            OptionsChange::Critical => {
                                log_sync_outcome("reload", &scheduler.reschedule(interval).await);
                            }
                            OptionsChange::Minor | OptionsChange::Unchanged => {}
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Reload failed, keeping current options"),
                }
            }

            _ = sigusr1_fut => {
                tracing::info!("Received SIGUSR1, syncing");
                let engine = engine.clone();
                tokio::spawn(async move {
                    log_sync_outcome("external", &engine.sync(SyncOptions::NOTIFY).await);
                });
            }
        }
    }

    scheduler.stop();
    Ok(())
}

async fn list_entries(engine: &SyncEngine, force: bool) -> Result<()> {
    let entries = engine.entries(force).await?;
    if !engine.context().session().is_authenticated {
        return Err(not_authenticated());
    }
    for entry in &entries {
        let published = entry
            .published_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\t{}",
            entry.id, published, entry.source_name, entry.title
        );
    }
    eprintln!("{} unread", entries.len());
    Ok(())
}

async fn mark_read(engine: &SyncEngine, ids: Vec<String>) -> Result<()> {
    let ids: HashSet<String> = ids.into_iter().collect();
    match engine.mark_as_read(&ids).await? {
        MarkReadResult::Marked { .. } => println!("Marked {} entries read", ids.len()),
        MarkReadResult::Unauthenticated => return Err(not_authenticated()),
    }
    Ok(())
}

async fn show_status(engine: &SyncEngine, db: &Database) -> Result<()> {
    let result = engine.sync(SyncOptions::SILENT).await?;
    let watermark = db.get_watermark().await?;
    let session = engine.context().session();

    match watermark.and_then(chrono::DateTime::from_timestamp_millis) {
        Some(at) => println!("Watermark:     {}", at.to_rfc3339()),
        None => println!("Watermark:     (never synced)"),
    }
    println!(
        "Authenticated: {}",
        if result.is_authenticated() { "yes" } else { "no" }
    );
    if session.is_authenticated {
        println!("Unread:        {}", session.unread_count.max(0));
        println!("Category:      {}", session.active_category_id);
    }
    Ok(())
}

async fn set_option(config_path: &Path, db: &Database, key: &str, value: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let mut manager = PreferenceManager::load(&config, db).await?;
    manager.set(db, key, value).await?;
    println!("{key} = {}", value.trim());
    println!("Send SIGHUP to a running `feedwatch run` to apply it.");
    Ok(())
}

async fn unset_option(config_path: &Path, db: &Database, key: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let mut manager = PreferenceManager::load(&config, db).await?;
    if manager.unset(&config, db, key).await? {
        println!("{key} reset to the config file value");
    } else {
        println!("{key} had no override");
    }
    Ok(())
}

async fn engine_for(config_path: &Path, db: &Database) -> Result<SyncEngine> {
    let options = load_options(config_path, db).await?;
    build_engine(db, options)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = match args.config {
        Some(path) => path,
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("config.toml")
        }
    };
    let db_path = match args.db {
        Some(path) => path,
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir.join("feedwatch.db")
        }
    };

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: the feedwatch database is locked by another process.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    match args.command {
        Command::Set { key, value } => set_option(&config_path, &db, &key, &value).await?,
        Command::Unset { key } => unset_option(&config_path, &db, &key).await?,
        Command::Run => {
            let engine = engine_for(&config_path, &db).await?;
            run_daemon(engine, &config_path, &db).await?;
        }
        Command::List { force } => {
            let engine = engine_for(&config_path, &db).await?;
            list_entries(&engine, force).await?;
        }
        Command::MarkRead { ids } => {
            let engine = engine_for(&config_path, &db).await?;
            mark_read(&engine, ids).await?;
        }
        Command::Status => {
            let engine = engine_for(&config_path, &db).await?;
            show_status(&engine, &db).await?;
        }
    }

    Ok(())
}
