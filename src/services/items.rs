use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::db::{self, DbPool};
use crate::entities::{item, stock_movement};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::balance;

/// Input for item creation.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewItem {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub category: Option<String>,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub min_stock: i64,
}

fn default_unit() -> String {
    "pcs".to_string()
}

/// Partial update for an item; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub min_stock: Option<i64>,
}

/// An item whose balance has fallen to or below its minimum-stock threshold.
#[derive(Debug, Clone, Serialize)]
pub struct LowStockItem {
    pub item: item::Model,
    pub balance: i64,
}

/// Service for managing the item catalog.
#[derive(Clone)]
pub struct ItemService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl ItemService {
    /// Creates a new item service instance
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Creates an item. The SKU must be unique; a duplicate surfaces as a
    /// conflict before any movement can reference the item.
    #[instrument(skip(self))]
    pub async fn create_item(&self, new_item: NewItem) -> Result<item::Model, ServiceError> {
        new_item.validate()?;

        let sku = new_item.sku.trim().to_owned();
        let model = item::ActiveModel {
            sku: Set(sku.clone()),
            name: Set(new_item.name.trim().to_owned()),
            category: Set(new_item.category),
            unit: Set(new_item.unit),
            min_stock: Set(new_item.min_stock),
            ..Default::default()
        };

        let created = model.insert(self.db.as_ref()).await.map_err(|e| {
            if e.to_string().to_ascii_lowercase().contains("unique") {
                ServiceError::Conflict(format!("duplicate SKU: {}", sku))
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(item_id = created.id, sku = %created.sku, "item created");
        self.emit(Event::ItemCreated {
            item_id: created.id,
            sku: created.sku.clone(),
        })
        .await;

        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_item(&self, item_id: i64) -> Result<item::Model, ServiceError> {
        item::Entity::find_by_id(item_id)
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("item {} not found", item_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_item_by_sku(&self, sku: &str) -> Result<item::Model, ServiceError> {
        item::Entity::find()
            .filter(item::Column::Sku.eq(sku))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("item with SKU {} not found", sku)))
    }

    /// Lists items with pagination. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_items(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<item::Model>, u64), ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 200);

        let paginator = item::Entity::find().paginate(self.db.as_ref(), per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Database error when counting items");
            ServiceError::InternalError(format!("Failed to count items: {}", e))
        })?;

        let items = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(page = %page, per_page = %per_page, error = %e, "Database error when fetching items");
            ServiceError::InternalError(format!("Failed to fetch items: {}", e))
        })?;

        Ok((items, total))
    }

    /// Updates an item's attributes. `expected_version` is the version the
    /// caller read; a mismatch means another writer got there first.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        item_id: i64,
        expected_version: i32,
        patch: ItemPatch,
    ) -> Result<item::Model, ServiceError> {
        if let Some(min_stock) = patch.min_stock {
            if min_stock < 0 {
                return Err(ServiceError::InvalidInput(format!(
                    "min_stock must be >= 0, got {}",
                    min_stock
                )));
            }
        }

        let updated = db::transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let item = item::Entity::find_by_id(item_id)
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(ServiceError::from_write_error)?
                    .ok_or_else(|| ServiceError::NotFound(format!("item {} not found", item_id)))?;

                if item.version != expected_version {
                    return Err(ServiceError::Conflict(format!(
                        "item {} was modified concurrently (version {}, expected {})",
                        item_id, item.version, expected_version
                    )));
                }

                let mut active: item::ActiveModel = item.into();
                active.version = Set(expected_version + 1);
                if let Some(name) = patch.name {
                    active.name = Set(name);
                }
                if let Some(category) = patch.category {
                    active.category = Set(Some(category));
                }
                if let Some(unit) = patch.unit {
                    active.unit = Set(unit);
                }
                if let Some(min_stock) = patch.min_stock {
                    active.min_stock = Set(min_stock);
                }

                active.update(txn).await.map_err(ServiceError::from_write_error)
            })
        })
        .await?;

        info!(item_id = updated.id, version = updated.version, "item updated");
        self.emit(Event::ItemUpdated {
            item_id: updated.id,
            version: updated.version,
        })
        .await;

        Ok(updated)
    }

    /// Deletes an item together with its movement history, in one
    /// transaction. Movements never outlive their item.
    #[instrument(skip(self))]
    pub async fn delete_item(&self, item_id: i64) -> Result<(), ServiceError> {
        db::transaction(self.db.as_ref(), move |txn| {
            Box::pin(async move {
                let item = item::Entity::find_by_id(item_id)
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(ServiceError::from_write_error)?
                    .ok_or_else(|| ServiceError::NotFound(format!("item {} not found", item_id)))?;

                stock_movement::Entity::delete_many()
                    .filter(stock_movement::Column::ItemId.eq(item_id))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::from_write_error)?;

                item.delete(txn)
                    .await
                    .map_err(ServiceError::from_write_error)?;

                Ok::<(), ServiceError>(())
            })
        })
        .await?;

        info!(item_id, "item deleted");
        self.emit(Event::ItemDeleted { item_id }).await;

        Ok(())
    }

    /// Items whose current balance is at or below their minimum-stock
    /// threshold.
    #[instrument(skip(self))]
    pub async fn list_low_stock(&self) -> Result<Vec<LowStockItem>, ServiceError> {
        let db = self.db.as_ref();
        let items = item::Entity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let balances = balance::all_balances(db).await?;

        Ok(items
            .into_iter()
            .filter_map(|item| {
                let balance = balances.get(&item.id).copied().unwrap_or(0);
                (balance <= item.min_stock).then_some(LowStockItem { item, balance })
            })
            .collect())
    }

    async fn emit(&self, event: Event) {
        if let Err(err) = self.event_sender.send(event).await {
            warn!(error = %err, "failed to publish item event");
        }
    }
}
