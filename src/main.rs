//! Vine Helper host
//!
//! A headless context: durable storage in SQLite, the settings and list
//! registries, retention sweeps and the announcement queue. Feed messages
//! arrive as JSON lines on stdin.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vine_helper_core::brenda::{Brenda, BrendaOptions, HttpAnnounceTransport, LogNotifier};
use vine_helper_core::errors::ErrorDetails;
use vine_helper_core::feed::{FeedMessage, ProductFeed};
use vine_helper_core::list_manager::{
    HiddenProductList, ListManagerFactory, NotificationList, PinnedProductList, ProductList,
};
use vine_helper_core::persistence::spawn_retention_sweep;
use vine_helper_core::settings::{GlobalSettingsData, SettingsFactory, SidePanelSettingsData};
use vine_helper_core::storage::{SqliteStorage, Storage};
use vine_helper_core::{AppError, Config};

// List mutations and their events must not interleave across threads.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Vine Helper host");
    tracing::info!("Database path: {:?}", config.db_path);
    match config.storage_quota_bytes {
        Some(quota) => tracing::info!("Storage quota: {} bytes", quota),
        None => tracing::warn!("Storage quota disabled"),
    }

    // Initialize durable storage
    let storage: Arc<dyn Storage> =
        Arc::new(SqliteStorage::open(&config.db_path, config.storage_quota_bytes).await?);

    // Load settings
    let settings = SettingsFactory::new(Arc::clone(&storage));
    let (global, side_panel) = tokio::try_join!(
        settings.create::<GlobalSettingsData>(),
        settings.create::<SidePanelSettingsData>()
    )?;

    // Load lists
    let lists = ListManagerFactory::new(Arc::clone(&storage))
        .with_debounce(config.persist_debounce)
        .follow_external_changes(true);
    let (products, pinned, hidden, notifications) = tokio::try_join!(
        lists.create::<ProductList>(),
        lists.create::<PinnedProductList>(),
        lists.create::<HiddenProductList>(),
        lists.create::<NotificationList>()
    )?;
    tracing::info!(
        pinned = pinned.len(),
        hidden = hidden.len(),
        notifications = notifications.len(),
        "Lists loaded"
    );

    // Announcements need a token
    let brenda = match global.get().discord.guid.clone() {
        Some(guid) if !guid.is_empty() => Some(Brenda::new(
            BrendaOptions {
                guid,
                domain: config.domain.clone(),
                base_interval: config.brenda_rate_limit,
            },
            Arc::new(HttpAnnounceTransport::new(config.brenda_url.clone())),
            Arc::new(LogNotifier),
        )),
        _ => {
            tracing::info!("No Brenda token configured, announcing is disabled");
            None
        }
    };

    let feed = ProductFeed::new(products, pinned, Arc::clone(&hidden), notifications)
        .with_brenda(brenda);

    // Retention sweeps
    let hidden_retention = config.hidden_retention;
    let sweeps = vec![
        spawn_retention_sweep(&hidden, move || hidden_retention, config.gc_interval),
        spawn_retention_sweep(
            feed.products(),
            move || Duration::from_secs(side_panel.get().expire_minutes() * 60),
            config.gc_interval,
        ),
    ];

    // Feed messages
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let result = serde_json::from_str::<FeedMessage>(&line)
                        .map_err(AppError::from)
                        .and_then(|message| feed.handle(message));
                    if let Err(err) = result {
                        tracing::warn!("Rejected feed message: {}", err);
                        println!("{}", serde_json::to_string(&ErrorDetails::from(&err))?);
                    }
                }
                None => {
                    tracing::info!("Feed closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    for sweep in sweeps {
        sweep.abort();
    }
    lists.flush_all().await?;
    tracing::info!("Lists flushed");

    Ok(())
}
