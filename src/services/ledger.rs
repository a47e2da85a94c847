//! The public operation surface of the stock ledger.
//!
//! Every write runs the same state machine inside one transaction: lock the
//! item row, validate the business rule, append the movement, bump the
//! item's optimistic-lock version, commit. A detected conflict rolls the
//! attempt back and re-enters from the top under the bounded retry loop,
//! so item state and balance are always re-read fresh. At most one movement
//! is ever committed per logical call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::cache::BalanceCache;
use crate::db::{self, DbPool};
use crate::entities::{
    item,
    stock_movement::{self, MovementType},
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::retry::{self, ConflictRetryPolicy, RetryConfig};
use crate::services::balance::{self, LockMode};

/// Input for recording a receipt (`IN`). `qty` is a positive magnitude.
#[derive(Debug, Clone, Deserialize)]
pub struct StockReceipt {
    pub item_id: i64,
    pub qty: i64,
    pub reference: Option<String>,
}

/// Input for recording an issue (`OUT`). `qty` is a positive magnitude and
/// must not exceed the current balance.
#[derive(Debug, Clone, Deserialize)]
pub struct StockIssue {
    pub item_id: i64,
    pub qty: i64,
    pub reference: Option<String>,
}

/// Input for recording an adjustment (`ADJUST`). `qty` is signed and
/// non-zero.
#[derive(Debug, Clone, Deserialize)]
pub struct StockAdjustment {
    pub item_id: i64,
    pub qty: i64,
    pub reference: Option<String>,
}

/// Outcome of an accepted write: the appended movement, the balance after
/// it, and the item's new version.
#[derive(Debug, Clone, Serialize)]
pub struct MovementRecord {
    pub movement: stock_movement::Model,
    pub balance: i64,
    pub item_version: i32,
}

/// Snapshot returned by [`StockLedgerService::get_balance`].
#[derive(Debug, Clone, Serialize)]
pub struct BalanceSummary {
    pub item_id: i64,
    pub balance: i64,
    pub min_stock: i64,
    pub needs_restock: bool,
    pub unit: String,
    pub version: i32,
    pub as_of: DateTime<Utc>,
}

/// Filters and pagination for movement history queries.
#[derive(Debug, Clone, Deserialize)]
pub struct MovementQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub movement_type: Option<MovementType>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

impl Default for MovementQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            movement_type: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

fn default_page() -> u64 {
    1
}
fn default_per_page() -> u64 {
    100
}

/// A page of movement history, newest first, plus the filtered total.
#[derive(Debug, Clone, Serialize)]
pub struct MovementPage {
    pub movements: Vec<stock_movement::Model>,
    pub total: u64,
}

fn validate_magnitude(qty: i64) -> Result<(), ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::InvalidInput(format!(
            "quantity must be a positive integer, got {}",
            qty
        )));
    }
    Ok(())
}

fn validate_adjustment(qty: i64) -> Result<(), ServiceError> {
    if qty == 0 {
        return Err(ServiceError::InvalidInput(
            "adjustment quantity must be non-zero".to_string(),
        ));
    }
    Ok(())
}

/// Service recording stock movements and answering balance queries.
#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DbPool>,
    cache: Arc<BalanceCache>,
    event_sender: EventSender,
    retry: RetryConfig,
}

impl StockLedgerService {
    /// Creates a new stock ledger service instance
    pub fn new(
        db: Arc<DbPool>,
        cache: Arc<BalanceCache>,
        event_sender: EventSender,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            cache,
            event_sender,
            retry,
        }
    }

    /// Records a receipt of stock for an item.
    #[instrument(skip(self))]
    pub async fn record_receipt(
        &self,
        receipt: StockReceipt,
    ) -> Result<MovementRecord, ServiceError> {
        validate_magnitude(receipt.qty)?;

        let record = self
            .record_movement(
                receipt.item_id,
                MovementType::In,
                receipt.qty,
                receipt.reference,
                None,
            )
            .await?;

        self.emit(Event::StockReceived {
            item_id: receipt.item_id,
            movement_id: record.movement.id,
            qty: receipt.qty,
            balance: record.balance,
        })
        .await;

        Ok(record)
    }

    /// Records an issue of stock. Rejected with `InsufficientStock` when the
    /// item's balance, read under lock, cannot cover the quantity; the
    /// rejection appends nothing.
    #[instrument(skip(self))]
    pub async fn record_issue(&self, issue: StockIssue) -> Result<MovementRecord, ServiceError> {
        validate_magnitude(issue.qty)?;

        let record = self
            .record_movement(
                issue.item_id,
                MovementType::Out,
                issue.qty,
                issue.reference,
                None,
            )
            .await?;

        self.emit(Event::StockIssued {
            item_id: issue.item_id,
            movement_id: record.movement.id,
            qty: issue.qty,
            balance: record.balance,
        })
        .await;

        Ok(record)
    }

    /// Records a signed stock adjustment.
    #[instrument(skip(self))]
    pub async fn record_adjustment(
        &self,
        adjustment: StockAdjustment,
    ) -> Result<MovementRecord, ServiceError> {
        validate_adjustment(adjustment.qty)?;

        let meta = json!({
            "adjustment_reason": adjustment
                .reference
                .clone()
                .unwrap_or_else(|| "manual_adjustment".to_string()),
        });

        let record = self
            .record_movement(
                adjustment.item_id,
                MovementType::Adjust,
                adjustment.qty,
                adjustment.reference,
                Some(meta),
            )
            .await?;

        self.emit(Event::StockAdjusted {
            item_id: adjustment.item_id,
            movement_id: record.movement.id,
            qty: adjustment.qty,
            balance: record.balance,
        })
        .await;

        Ok(record)
    }

    /// Current balance for an item, cache-first. Never takes the item lock
    /// and never blocks writers.
    #[instrument(skip(self))]
    pub async fn get_balance(&self, item_id: i64) -> Result<BalanceSummary, ServiceError> {
        let db = self.db.as_ref();

        let item = item::Entity::find_by_id(item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("item {} not found", item_id)))?;

        let balance = match self.cache.get(item_id) {
            Some(cached) => cached,
            None => {
                let fresh = balance::item_balance(db, item_id, LockMode::None).await?;
                self.cache.set(item_id, fresh);
                fresh
            }
        };

        Ok(BalanceSummary {
            item_id,
            balance,
            min_stock: item.min_stock,
            needs_restock: balance <= item.min_stock,
            unit: item.unit,
            version: item.version,
            as_of: Utc::now(),
        })
    }

    /// Movement history for an item with date-range and type filters,
    /// newest first. Returns the page plus the filtered total.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        item_id: i64,
        query: MovementQuery,
    ) -> Result<MovementPage, ServiceError> {
        let page = query.page.max(1);
        let per_page = query.per_page.clamp(1, 1000);

        let mut select =
            stock_movement::Entity::find().filter(stock_movement::Column::ItemId.eq(item_id));

        if let Some(start) = query.start {
            select = select.filter(stock_movement::Column::MovedAt.gte(start));
        }
        if let Some(end) = query.end {
            select = select.filter(stock_movement::Column::MovedAt.lte(end));
        }
        if let Some(movement_type) = query.movement_type {
            select =
                select.filter(stock_movement::Column::MovementType.eq(movement_type.as_str()));
        }

        let paginator = select
            .order_by_desc(stock_movement::Column::MovedAt)
            .order_by_desc(stock_movement::Column::Id)
            .paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(item_id, error = %e, "Database error when counting movements");
            ServiceError::InternalError(format!("Failed to count movements: {}", e))
        })?;

        let movements = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(item_id, page, error = %e, "Database error when fetching movements");
            ServiceError::InternalError(format!("Failed to fetch movements: {}", e))
        })?;

        Ok(MovementPage { movements, total })
    }

    /// Runs one write through the retry loop and, on success, drops the
    /// cached balance so the next read reflects the new movement.
    async fn record_movement(
        &self,
        item_id: i64,
        movement_type: MovementType,
        qty: i64,
        reference: Option<String>,
        meta: Option<serde_json::Value>,
    ) -> Result<MovementRecord, ServiceError> {
        let record = retry::with_retry(&self.retry, ConflictRetryPolicy, || {
            let reference = reference.clone();
            let meta = meta.clone();
            self.attempt_movement(item_id, movement_type, qty, reference, meta)
        })
        .await?;

        self.cache.invalidate(item_id);

        info!(
            item_id,
            movement_id = record.movement.id,
            movement_type = %movement_type,
            qty,
            balance = record.balance,
            "movement recorded"
        );

        Ok(record)
    }

    /// One attempt of the write state machine, in its own transaction.
    async fn attempt_movement(
        &self,
        item_id: i64,
        movement_type: MovementType,
        qty: i64,
        reference: Option<String>,
        meta: Option<serde_json::Value>,
    ) -> Result<MovementRecord, ServiceError> {
        db::transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                // Lock: the item row is held for the rest of the transaction.
                // A missing item is fatal, not retryable.
                let item = item::Entity::find_by_id(item_id)
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(ServiceError::from_write_error)?
                    .ok_or_else(|| ServiceError::NotFound(format!("item {} not found", item_id)))?;

                // Validate: issues must not drive the balance negative. The
                // balance is read under lock so concurrent issues serialize.
                let previous_balance = if movement_type == MovementType::Out {
                    let available = balance::item_balance(txn, item_id, LockMode::ForUpdate).await?;
                    if available < qty {
                        return Err(ServiceError::InsufficientStock(format!(
                            "item {}: available {}, requested {}",
                            item_id, available, qty
                        )));
                    }
                    Some(available)
                } else {
                    None
                };

                // Append: IN/OUT store the magnitude, ADJUST stores the sign.
                let movement = stock_movement::ActiveModel {
                    item_id: Set(item_id),
                    movement_type: Set(movement_type.as_str().to_owned()),
                    qty: Set(qty),
                    reference: Set(reference),
                    meta: Set(meta),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(ServiceError::from_write_error)?;

                // Optimistic fence: bump exactly the version read under the
                // lock. Zero affected rows means another writer committed in
                // between; the attempt rolls back and is retried from the top.
                let fence = item::Entity::update_many()
                    .col_expr(item::Column::Version, Expr::value(item.version + 1))
                    .col_expr(item::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(item::Column::Id.eq(item_id))
                    .filter(item::Column::Version.eq(item.version))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::from_write_error)?;
                if fence.rows_affected == 0 {
                    return Err(ServiceError::Conflict(format!(
                        "item {} was modified concurrently",
                        item_id
                    )));
                }

                let balance = match previous_balance {
                    Some(available) => available - qty,
                    None => balance::item_balance(txn, item_id, LockMode::None).await?,
                };

                Ok(MovementRecord {
                    movement,
                    balance,
                    item_version: item.version + 1,
                })
            })
        })
        .await
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.event_sender.send(event).await {
            warn!(error = %err, "failed to publish ledger event");
        }
    }
}
