//! Stockledger API Library
//!
//! Stock ledger and concurrency-control core for inventory tracking. Items
//! carry an optimistic-lock version; stock movements form an append-only
//! ledger from which balances are derived, cached with a TTL, and guarded
//! against concurrent writers by row locks plus a bounded conflict-retry
//! loop. HTTP routing, import/export, i18n, and auth are adapter concerns
//! that live outside this crate.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod retry;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub balance_cache: Arc<cache::BalanceCache>,
    pub items: services::items::ItemService,
    pub ledger: services::ledger::StockLedgerService,
}

impl AppState {
    /// Wires the services to a connection pool, one balance cache, and one
    /// event channel. Construct once per process and hand to the adapter.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let balance_cache = Arc::new(cache::BalanceCache::new(config.cache_ttl()));
        let items = services::items::ItemService::new(db.clone(), event_sender.clone());
        let ledger = services::ledger::StockLedgerService::new(
            db.clone(),
            balance_cache.clone(),
            event_sender.clone(),
            config.retry_config(),
        );

        Self {
            db,
            config,
            event_sender,
            balance_cache,
            items,
            ledger,
        }
    }
}

pub mod prelude {
    pub use crate::cache::{BalanceCache, BalanceCacheConfig};
    pub use crate::config::{load_config, AppConfig};
    pub use crate::db::{establish_connection_from_app_config, run_migrations, DbPool};
    pub use crate::entities::stock_movement::MovementType;
    pub use crate::errors::ServiceError;
    pub use crate::events::{process_events, Event, EventSender};
    pub use crate::retry::RetryConfig;
    pub use crate::services::balance::LockMode;
    pub use crate::services::items::{ItemService, NewItem};
    pub use crate::services::ledger::{
        StockAdjustment, StockIssue, StockLedgerService, StockReceipt,
    };
    pub use crate::AppState;
}
