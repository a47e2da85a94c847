//! Derivation of stock balances from the movement ledger.
//!
//! Balances are a projection: `IN` adds, `OUT` subtracts, `ADJUST` applies
//! its signed quantity. Everything here is a pure aggregation over the
//! movement table and can be recomputed at any time; an item with no
//! movements has balance 0.

use std::collections::HashMap;

use sea_orm::sea_query::{Alias, CaseStatement, Expr, SimpleExpr};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, QueryFilter, QuerySelect,
};

use crate::entities::stock_movement::{self, MovementType};
use crate::errors::ServiceError;

/// Whether the aggregation should ask the storage layer for row locks.
/// `ForUpdate` is used only by callers about to make a decision (e.g. a
/// sufficiency check) that must not race with a concurrent writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    None,
    ForUpdate,
}

/// `CASE movement_type WHEN 'IN' THEN qty WHEN 'OUT' THEN -qty ELSE qty END`
fn signed_qty_expr() -> SimpleExpr {
    CaseStatement::new()
        .case(
            Expr::col(stock_movement::Column::MovementType).eq(MovementType::In.as_str()),
            Expr::col(stock_movement::Column::Qty),
        )
        .case(
            Expr::col(stock_movement::Column::MovementType).eq(MovementType::Out.as_str()),
            Expr::col(stock_movement::Column::Qty).mul(-1),
        )
        .finally(Expr::col(stock_movement::Column::Qty))
        .into()
}

/// Summed signed quantity, cast so every backend hands back a 64-bit
/// integer (Postgres widens SUM(bigint) to numeric otherwise).
fn balance_sum_expr() -> SimpleExpr {
    Expr::expr(signed_qty_expr())
        .sum()
        .cast_as(Alias::new("BIGINT"))
}

#[derive(Debug, FromQueryResult)]
struct BalanceRow {
    item_id: i64,
    balance: Option<i64>,
}

/// Current balance for one item.
///
/// With `LockMode::ForUpdate` the movement rows are read under a row lock
/// (`SELECT ... FOR UPDATE`) and folded in memory: aggregates cannot be
/// combined with row locks on Postgres, and the fold over a single item's
/// locked rows is equivalent. Without a lock the fold runs as one SQL
/// aggregate.
pub async fn item_balance<C: ConnectionTrait>(
    conn: &C,
    item_id: i64,
    lock: LockMode,
) -> Result<i64, ServiceError> {
    match lock {
        LockMode::None => {
            let sum: Option<Option<i64>> = stock_movement::Entity::find()
                .select_only()
                .expr_as(balance_sum_expr(), "balance")
                .filter(stock_movement::Column::ItemId.eq(item_id))
                .into_tuple()
                .one(conn)
                .await
                .map_err(ServiceError::db_error)?;
            Ok(sum.flatten().unwrap_or(0))
        }
        LockMode::ForUpdate => {
            let rows: Vec<(String, i64)> = stock_movement::Entity::find()
                .select_only()
                .column(stock_movement::Column::MovementType)
                .column(stock_movement::Column::Qty)
                .filter(stock_movement::Column::ItemId.eq(item_id))
                .lock_exclusive()
                .into_tuple()
                .all(conn)
                .await
                .map_err(ServiceError::db_error)?;
            Ok(fold_rows(rows))
        }
    }
}

/// Balances for a set of items. Items without movements are absent from the
/// result; callers treat absence as 0.
pub async fn balances_for_items<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[i64],
) -> Result<HashMap<i64, i64>, ServiceError> {
    if item_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = stock_movement::Entity::find()
        .select_only()
        .column(stock_movement::Column::ItemId)
        .expr_as(balance_sum_expr(), "balance")
        .filter(stock_movement::Column::ItemId.is_in(item_ids.iter().copied()))
        .group_by(stock_movement::Column::ItemId)
        .into_model::<BalanceRow>()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(rows
        .into_iter()
        .map(|row| (row.item_id, row.balance.unwrap_or(0)))
        .collect())
}

/// Balances for every item that has at least one movement.
pub async fn all_balances<C: ConnectionTrait>(
    conn: &C,
) -> Result<HashMap<i64, i64>, ServiceError> {
    let rows = stock_movement::Entity::find()
        .select_only()
        .column(stock_movement::Column::ItemId)
        .expr_as(balance_sum_expr(), "balance")
        .group_by(stock_movement::Column::ItemId)
        .into_model::<BalanceRow>()
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(rows
        .into_iter()
        .map(|row| (row.item_id, row.balance.unwrap_or(0)))
        .collect())
}

fn fold_rows(rows: impl IntoIterator<Item = (String, i64)>) -> i64 {
    rows.into_iter()
        .map(|(ty, qty)| match MovementType::from_str(&ty) {
            Some(ty) => ty.signed_delta(qty),
            // The check constraint makes this unreachable; mirror the SQL
            // CASE's ELSE branch anyway.
            None => qty,
        })
        .sum()
}
