mod common;

use assert_matches::assert_matches;

use common::TestApp;
use stockledger_api::{
    errors::ServiceError,
    services::items::{ItemPatch, NewItem},
    services::ledger::{MovementQuery, StockReceipt},
};

fn new_item(sku: &str) -> NewItem {
    NewItem {
        sku: sku.to_string(),
        name: format!("Item {}", sku),
        category: Some("hardware".to_string()),
        unit: "pcs".to_string(),
        min_stock: 0,
    }
}

#[tokio::test]
async fn created_items_are_fetchable_by_id_and_sku() {
    let app = TestApp::new().await;

    let created = app.state.items.create_item(new_item("WIDGET-01")).await.unwrap();
    assert_eq!(created.version, 0);
    assert_eq!(created.unit, "pcs");

    let by_id = app.state.items.get_item(created.id).await.unwrap();
    assert_eq!(by_id.sku, "WIDGET-01");

    let by_sku = app.state.items.get_item_by_sku("WIDGET-01").await.unwrap();
    assert_eq!(by_sku.id, created.id);

    assert_matches!(
        app.state.items.get_item_by_sku("NOPE").await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn duplicate_skus_are_rejected() {
    let app = TestApp::new().await;

    app.state.items.create_item(new_item("DUP-01")).await.unwrap();
    let err = app
        .state
        .items
        .create_item(new_item("DUP-01"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn structurally_invalid_items_are_rejected() {
    let app = TestApp::new().await;

    let mut empty_sku = new_item("OK-01");
    empty_sku.sku = String::new();
    assert_matches!(
        app.state.items.create_item(empty_sku).await,
        Err(ServiceError::InvalidInput(_))
    );

    let mut negative_min = new_item("OK-02");
    negative_min.min_stock = -1;
    assert_matches!(
        app.state.items.create_item(negative_min).await,
        Err(ServiceError::InvalidInput(_))
    );
}

#[tokio::test]
async fn updates_require_the_current_version() {
    let app = TestApp::new().await;
    let item = app.state.items.create_item(new_item("UPD-01")).await.unwrap();

    let updated = app
        .state
        .items
        .update_item(
            item.id,
            item.version,
            ItemPatch {
                name: Some("Renamed".to_string()),
                min_stock: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.min_stock, 3);
    assert_eq!(updated.version, item.version + 1);

    // Replaying the update against the stale version loses.
    let err = app
        .state
        .items
        .update_item(
            item.id,
            item.version,
            ItemPatch {
                name: Some("Too late".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn negative_min_stock_update_is_rejected() {
    let app = TestApp::new().await;
    let item = app.state.items.create_item(new_item("UPD-02")).await.unwrap();

    let err = app
        .state
        .items
        .update_item(
            item.id,
            item.version,
            ItemPatch {
                min_stock: Some(-5),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidInput(_));
}

#[tokio::test]
async fn deleting_an_item_removes_its_movement_history() {
    let app = TestApp::new().await;
    let item = app.seed_item("DEL-01").await;

    app.state
        .ledger
        .record_receipt(StockReceipt {
            item_id: item.id,
            qty: 5,
            reference: None,
        })
        .await
        .unwrap();

    app.state.items.delete_item(item.id).await.unwrap();

    assert_matches!(
        app.state.items.get_item(item.id).await,
        Err(ServiceError::NotFound(_))
    );

    // No orphan movements survive the delete.
    let page = app
        .state
        .ledger
        .list_movements(item.id, MovementQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    assert_matches!(
        app.state.items.delete_item(item.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn listing_paginates_and_counts() {
    let app = TestApp::new().await;
    for i in 0..5 {
        app.seed_item(&format!("PAGE-{:02}", i)).await;
    }

    let (first, total) = app.state.items.list_items(1, 2).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(first.len(), 2);

    let (last, _) = app.state.items.list_items(3, 2).await.unwrap();
    assert_eq!(last.len(), 1);
}

#[tokio::test]
async fn low_stock_report_compares_balance_to_threshold() {
    let app = TestApp::new().await;

    let low = app.seed_item_with_min_stock("LOW-01", 5).await;
    let healthy = app.seed_item_with_min_stock("LOW-02", 5).await;

    app.state
        .ledger
        .record_receipt(StockReceipt {
            item_id: low.id,
            qty: 3,
            reference: None,
        })
        .await
        .unwrap();
    app.state
        .ledger
        .record_receipt(StockReceipt {
            item_id: healthy.id,
            qty: 10,
            reference: None,
        })
        .await
        .unwrap();

    let report = app.state.items.list_low_stock().await.unwrap();
    let ids: Vec<i64> = report.iter().map(|e| e.item.id).collect();
    assert!(ids.contains(&low.id));
    assert!(!ids.contains(&healthy.id));

    let entry = report.iter().find(|e| e.item.id == low.id).unwrap();
    assert_eq!(entry.balance, 3);
}
