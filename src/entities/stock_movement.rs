use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};

/// Kinds of stock movement. The set is closed and also enforced by a check
/// constraint on the `movement_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    In,
    Out,
    Adjust,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjust => "ADJUST",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Some(MovementType::In),
            "OUT" => Some(MovementType::Out),
            "ADJUST" => Some(MovementType::Adjust),
            _ => None,
        }
    }

    /// Contribution of a stored quantity to the balance fold: `IN` adds,
    /// `OUT` subtracts, `ADJUST` applies the stored signed quantity.
    pub fn signed_delta(&self, qty: i64) -> i64 {
        match self {
            MovementType::In | MovementType::Adjust => qty,
            MovementType::Out => -qty,
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only stock ledger. Rows are never updated or
/// deleted in normal operation; reversing a movement means appending a
/// compensating movement. `qty` is a positive magnitude for `IN`/`OUT`
/// and a signed non-zero quantity for `ADJUST`. The `version` column is
/// bookkeeping for retried writes and carries no business meaning.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub item_id: i64,
    pub movement_type: String,
    pub qty: i64,
    pub reference: Option<String>,
    pub meta: Option<Json>,
    pub moved_at: DateTime<Utc>,
    pub version: i32,
}

impl Model {
    pub fn movement_type(&self) -> Option<MovementType> {
        MovementType::from_str(&self.movement_type)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id"
    )]
    Item,
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if insert {
            if let ActiveValue::NotSet = active_model.moved_at {
                active_model.moved_at = Set(Utc::now());
            }
            if let ActiveValue::NotSet = active_model.version {
                active_model.version = Set(0);
            }
        }
        Ok(active_model)
    }
}
