//! Cross-module tests: persistence through real storage, multi-context
//! convergence and announcements against a local HTTP endpoint.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::put;
use axum::{Form, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::brenda::{
    AnnounceForm, AnnounceTransport, Brenda, BrendaOptions, HttpAnnounceTransport, Notifier,
};
use crate::errors::{AppError, AppResult};
use crate::feed::{FeedMessage, ProductFeed};
use crate::list_manager::{
    HiddenProductList, ListEvent, ListEventKind, ListManagerFactory, NotificationList,
    PinnedProductList, ProductList,
};
use crate::models::{HiddenProduct, NotificationItem, Product, ProductQueue};
use crate::persistence::spawn_retention_sweep;
use crate::settings::{GlobalSettings, GlobalSettingsData, SettingsFactory};
use crate::storage::{MemoryStorage, SqliteStorage, Storage, StorageChange, StorageUsage};

/// Memory storage that counts writes.
struct CountingStorage {
    inner: MemoryStorage,
    writes: AtomicUsize,
}

impl CountingStorage {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(),
            writes: AtomicUsize::new(0),
        })
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for CountingStorage {
    fn context_id(&self) -> Uuid {
        self.inner.context_id()
    }

    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> AppResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        self.inner.remove(key).await
    }

    async fn usage(&self) -> AppResult<StorageUsage> {
        self.inner.usage().await
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.subscribe()
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_bursts() {
    let storage = CountingStorage::new();
    let lists = ListManagerFactory::new(storage.clone()).with_debounce(Duration::from_millis(1000));
    let hidden = lists.create::<HiddenProductList>().await.unwrap();
    assert_eq!(storage.writes(), 0);

    hidden.put(HiddenProduct::new("A", 1), &[]);
    hidden.put(HiddenProduct::new("B", 2), &[]);
    tokio::time::sleep(Duration::from_millis(600)).await;
    hidden.put(HiddenProduct::new("C", 3), &[]);

    // The third put restarted the wait.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(storage.writes(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(storage.writes(), 1);
    assert_eq!(
        storage.get("hiddenProducts").await.unwrap(),
        Some(json!([
            { "asin": "A", "timestamp": 1 },
            { "asin": "B", "timestamp": 2 },
            { "asin": "C", "timestamp": 3 }
        ]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_purge_is_persisted() {
    let storage = CountingStorage::new();
    let lists = ListManagerFactory::new(storage.clone()).with_debounce(Duration::from_millis(1000));
    let hidden = lists.create::<HiddenProductList>().await.unwrap();

    let removed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&removed);
    hidden.subscribe(ListEventKind::RemovedMultiple, move |event| {
        if let ListEvent::RemovedMultiple(keys) = event {
            sink.lock().extend(keys.iter().cloned());
        }
    });

    for (asin, ts) in [("A", 1), ("B", 5), ("C", 10)] {
        hidden.put(HiddenProduct::new(asin, ts), &[]);
    }
    assert_eq!(hidden.purge(5).unwrap(), 2);
    assert_eq!(*removed.lock(), vec!["A".to_string(), "B".to_string()]);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(storage.writes(), 1);
    assert_eq!(
        storage.get("hiddenProducts").await.unwrap(),
        Some(json!([{ "asin": "C", "timestamp": 10 }]))
    );
}

#[tokio::test]
async fn test_lists_survive_restart_in_sqlite() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("vine.sqlite");

    {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&db_path, None).await.unwrap());
        let lists = ListManagerFactory::new(storage).with_debounce(Duration::from_millis(20));
        let pinned = lists.create::<PinnedProductList>().await.unwrap();
        let notifications = lists.create::<NotificationList>().await.unwrap();

        let mut product = Product::new("B001", ProductQueue::RFY, 42).with_title("Desk Lamp");
        product.pinned = true;
        pinned.put(product, &[]);
        notifications.put(NotificationItem::new("n1", "B001", 7), &[]);

        lists.flush_all().await.unwrap();
    }

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&db_path, None).await.unwrap());
    let lists = ListManagerFactory::new(storage);
    let pinned = lists.create::<PinnedProductList>().await.unwrap();
    let notifications = lists.create::<NotificationList>().await.unwrap();
    let products = lists.create::<ProductList>().await.unwrap();

    let restored = pinned.one(&"B001".to_string()).unwrap();
    assert_eq!(restored.title, "Desk Lamp");
    assert!(restored.pinned);
    assert_eq!(notifications.len(), 1);
    // The live list is never persisted.
    assert!(products.is_empty());

    // Wiring the feed brings restored pins into the live list.
    let hidden = lists.create::<HiddenProductList>().await.unwrap();
    let feed = ProductFeed::new(products, pinned, hidden, notifications);
    assert_eq!(feed.visible().len(), 1);
}

#[tokio::test]
async fn test_hidden_products_converge_across_contexts() {
    let shared = MemoryStorage::new();
    let here = ListManagerFactory::new(Arc::new(shared.context()))
        .with_debounce(Duration::from_millis(10))
        .follow_external_changes(true);
    let there = ListManagerFactory::new(Arc::new(shared.context()))
        .with_debounce(Duration::from_millis(10))
        .follow_external_changes(true);

    let hidden_here = here.create::<HiddenProductList>().await.unwrap();
    let hidden_there = there.create::<HiddenProductList>().await.unwrap();

    hidden_here.put(HiddenProduct::new("B001", 1), &[]);
    assert!(wait_until(|| hidden_there.has(&"B001".to_string())).await);

    hidden_there.remove(&"B001".to_string());
    assert!(wait_until(|| !hidden_here.has(&"B001".to_string())).await);

    // Both sides settle on the same stored snapshot.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(shared.get("hiddenProducts").await.unwrap(), Some(json!([])));
}

#[tokio::test(start_paused = true)]
async fn test_pins_stay_consistent_with_expiry_sweeps() {
    let lists = ListManagerFactory::new(Arc::new(MemoryStorage::new()));
    let feed = Arc::new(ProductFeed::new(
        lists.create::<ProductList>().await.unwrap(),
        lists.create::<PinnedProductList>().await.unwrap(),
        lists.create::<HiddenProductList>().await.unwrap(),
        lists.create::<NotificationList>().await.unwrap(),
    ));
    let asins: Vec<String> = (0..5).map(|i| format!("B00{}", i)).collect();
    fn fresh(asins: &[String], feed: &ProductFeed) -> Vec<Product> {
        asins
            .iter()
            .filter(|asin| !feed.products().has(asin))
            .map(|asin| Product::new(asin.clone(), ProductQueue::RFY, 1))
            .collect()
    }

    // Everything unpinned expires on every tick.
    let sweep = spawn_retention_sweep(feed.products(), || Duration::ZERO, Duration::from_millis(1));
    let toggler = {
        let feed = Arc::clone(&feed);
        let asins = asins.clone();
        tokio::spawn(async move {
            for round in 0..=50 {
                feed.ingest(fresh(&asins, &feed));
                for asin in &asins {
                    if round % 2 == 0 {
                        feed.pin(asin);
                    } else {
                        feed.unpin(asin);
                    }
                    tokio::task::yield_now().await;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };
    toggler.await.unwrap();
    sweep.abort();

    for product in feed.products().all().iter() {
        assert_eq!(product.pinned, feed.pinned().has(&product.asin), "{}", product.asin);
    }
    for pinned in feed.pinned().all().iter() {
        assert!(feed
            .products()
            .one(&pinned.asin)
            .map_or(false, |product| product.pinned));
    }
    assert_eq!(feed.pinned().len(), asins.len());
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_settings_merge_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set("settings", json!({ "general": { "highlightKeywords": ["lamp", "lamp"] } }))
        .await
        .unwrap();

    let first = GlobalSettings::load(storage.clone()).await.unwrap();
    let second = GlobalSettings::load(storage).await.unwrap();
    assert_eq!(first.get(), second.get());
    assert_eq!(*first.get_value(), *second.get_value());
    assert_eq!(first.get().general.highlight_keywords, vec!["lamp".to_string()]);
}

#[tokio::test]
async fn test_settings_round_trip_through_sqlite_contexts() {
    let temp_dir = TempDir::new().unwrap();
    let sqlite = SqliteStorage::open(&temp_dir.path().join("s.sqlite"), None)
        .await
        .unwrap();

    let writer = SettingsFactory::new(Arc::new(sqlite.context()));
    let reader = SettingsFactory::new(Arc::new(sqlite.context()));
    let writer = writer.create::<GlobalSettingsData>().await.unwrap();
    let reader = reader.create::<GlobalSettingsData>().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    reader.subscribe(move |snapshot| {
        let _ = tx.send(snapshot.discord.guid.clone());
    });

    writer.set_property("discord.guid", "token-42").await.unwrap();
    let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.as_deref(), Some("token-42"));
    assert_eq!(reader.get_property("discord.guid").unwrap(), Some(json!("token-42")));
    assert!(wait_until(|| writer.get().discord.guid.is_some()).await);

    // A fresh load sees the same value.
    let reloaded = GlobalSettings::load(Arc::new(sqlite.context())).await.unwrap();
    assert_eq!(reloaded.get(), writer.get());
}

// ---------------------------------------------------------------------------
// Brenda over HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct AnnounceBody {
    version: String,
    token: String,
    domain: String,
    tab: String,
    asin: String,
    etv: String,
}

#[derive(Clone, Default)]
struct MockBrenda {
    received: Arc<Mutex<Vec<AnnounceBody>>>,
    statuses: Arc<Mutex<VecDeque<u16>>>,
}

async fn announce_endpoint(
    State(mock): State<MockBrenda>,
    Form(body): Form<AnnounceBody>,
) -> StatusCode {
    mock.received.lock().push(body);
    let status = mock.statuses.lock().pop_front().unwrap_or(200);
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}

async fn spawn_mock_brenda(statuses: Vec<u16>) -> (MockBrenda, String) {
    let mock = MockBrenda {
        received: Arc::default(),
        statuses: Arc::new(Mutex::new(statuses.into())),
    };
    let app = Router::new()
        .route("/brenda/product", put(announce_endpoint))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (mock, format!("http://{}/brenda/product", addr))
}

struct ChannelNotifier(mpsc::UnboundedSender<String>);

impl Notifier for ChannelNotifier {
    fn show(&self, _title: &str, message: &str) {
        let _ = self.0.send(message.to_string());
    }
}

async fn next_toast(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("No status message")
        .expect("Notifier closed")
}

#[tokio::test]
async fn test_http_transport_sends_form() {
    let (mock, url) = spawn_mock_brenda(vec![422]).await;
    let transport = HttpAnnounceTransport::new(url);

    let form = AnnounceForm {
        version: 1,
        token: "guid".to_string(),
        domain: "amazon.ca".to_string(),
        tab: "RFY".to_string(),
        asin: "B001".to_string(),
        etv: "12.5".to_string(),
    };
    assert_eq!(transport.send(&form).await.unwrap(), 422);
    assert_eq!(transport.send(&form).await.unwrap(), 200);

    let received = mock.received.lock();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].version, "1");
    assert_eq!(received[0].domain, "amazon.ca");
    assert_eq!(received[0].etv, "12.5");
}

#[tokio::test]
async fn test_http_transport_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpAnnounceTransport::new(format!("http://{}/brenda/product", addr));
    let form = AnnounceForm {
        version: 1,
        token: String::new(),
        domain: String::new(),
        tab: String::new(),
        asin: String::new(),
        etv: String::new(),
    };
    assert!(matches!(transport.send(&form).await, Err(AppError::Http(_))));
}

#[tokio::test]
async fn test_feed_announces_through_http() {
    let (mock, url) = spawn_mock_brenda(vec![429]).await;
    let (tx, mut toasts) = mpsc::unbounded_channel();
    let brenda = Brenda::new(
        BrendaOptions {
            guid: "guid-7".to_string(),
            domain: "amazon.com".to_string(),
            base_interval: Duration::from_millis(50),
        },
        Arc::new(HttpAnnounceTransport::new(url)),
        Arc::new(ChannelNotifier(tx)),
    );

    let lists = ListManagerFactory::new(Arc::new(MemoryStorage::new()));
    let feed = ProductFeed::new(
        lists.create::<ProductList>().await.unwrap(),
        lists.create::<PinnedProductList>().await.unwrap(),
        lists.create::<HiddenProductList>().await.unwrap(),
        lists.create::<NotificationList>().await.unwrap(),
    )
    .with_brenda(Some(Arc::clone(&brenda)));

    feed.handle(FeedMessage::NewProducts {
        products: vec![Product::new("B001", ProductQueue::AI, 1).with_title("Lamp")],
    })
    .unwrap();
    // No ETV yet, nothing to announce.
    assert_eq!(feed.announce("B001"), None);

    feed.handle(FeedMessage::Etv { asin: "B001".to_string(), etv: 19.99 }).unwrap();
    feed.handle(FeedMessage::Announce { asin: "B001".to_string() }).unwrap();
    assert!(feed.products().one(&"B001".to_string()).unwrap().announced);
    // Announced products are not queued twice.
    assert_eq!(feed.announce("B001"), None);

    assert_eq!(next_toast(&mut toasts).await, "Hit rate limit, backing off, will retry.");
    assert_eq!(
        next_toast(&mut toasts).await,
        "B001 has been successfully announced to Brenda."
    );

    let received = mock.received.lock();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1].token, "guid-7");
    assert_eq!(received[1].tab, "AI");
    assert_eq!(received[1].asin, "B001");
    assert_eq!(received[1].etv, "19.99");
    assert_eq!(brenda.violation_count(), 0);
}
