use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use stockledger_api::{
    config::AppConfig,
    db,
    entities::item,
    events::{self, Event, EventSender},
    services::items::NewItem,
    AppState,
};

/// Helper harness wiring the ledger services to a file-backed SQLite
/// database in a fresh temporary directory.
pub struct TestApp {
    pub state: AppState,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a test application with fresh database state; events are
    /// drained by a background consumer.
    #[allow(dead_code)]
    pub async fn new() -> Self {
        let (app, receiver) = Self::with_event_capture().await;
        tokio::spawn(events::process_events(receiver));
        app
    }

    /// Same as [`TestApp::new`] but hands the event receiver to the caller
    /// so tests can observe emitted events.
    pub async fn with_event_capture() -> (Self, mpsc::Receiver<Event>) {
        let db_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = db_dir.path().join("stockledger_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test".to_string(),
        );
        cfg.db_max_connections = 5;
        cfg.db_min_connections = 1;
        // Keep conflict-retry backoff short so contention tests stay fast.
        cfg.retry_initial_delay_ms = 10;
        cfg.retry_max_delay_ms = 50;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to connect to test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (tx, rx) = mpsc::channel(256);
        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(tx));

        (
            Self {
                state,
                _db_dir: db_dir,
            },
            rx,
        )
    }

    /// Creates an item with sensible defaults for tests.
    pub async fn seed_item(&self, sku: &str) -> item::Model {
        self.state
            .items
            .create_item(NewItem {
                sku: sku.to_string(),
                name: format!("Test item {}", sku),
                category: None,
                unit: "pcs".to_string(),
                min_stock: 0,
            })
            .await
            .expect("failed to seed item")
    }

    /// Creates an item with a minimum-stock threshold.
    #[allow(dead_code)]
    pub async fn seed_item_with_min_stock(&self, sku: &str, min_stock: i64) -> item::Model {
        self.state
            .items
            .create_item(NewItem {
                sku: sku.to_string(),
                name: format!("Test item {}", sku),
                category: None,
                unit: "pcs".to_string(),
                min_stock,
            })
            .await
            .expect("failed to seed item")
    }
}
