mod common;

use futures::future::join_all;

use common::TestApp;
use stockledger_api::{
    errors::ServiceError,
    services::ledger::{MovementQuery, StockIssue, StockReceipt},
};

fn receipt(item_id: i64, qty: i64) -> StockReceipt {
    StockReceipt {
        item_id,
        qty,
        reference: None,
    }
}

fn issue(item_id: i64, qty: i64) -> StockIssue {
    StockIssue {
        item_id,
        qty,
        reference: None,
    }
}

#[tokio::test]
async fn competing_issues_admit_exactly_one_winner() {
    let app = TestApp::new().await;
    let item = app.seed_item("RACE-01").await;

    app.state.ledger.record_receipt(receipt(item.id, 3)).await.unwrap();

    // Two concurrent issues of 2 against a balance of 3: their combined
    // quantity exceeds the stock, so exactly one may be accepted.
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let ledger = app.state.ledger.clone();
        let item_id = item.id;
        tasks.push(tokio::spawn(async move {
            ledger.record_issue(issue(item_id, 2)).await
        }));
    }

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(record) => successes.push(record),
            Err(err) => failures.push(err),
        }
    }

    assert_eq!(successes.len(), 1, "exactly one issue must be accepted");
    assert_eq!(successes[0].balance, 1);

    assert_eq!(failures.len(), 1);
    assert!(
        matches!(
            failures[0],
            ServiceError::InsufficientStock(_) | ServiceError::Conflict(_)
        ),
        "loser must be rejected as insufficient stock or conflict, got: {}",
        failures[0]
    );

    // Post-condition: the balance reflects exactly the accepted issue and
    // only its movement row was appended.
    let summary = app.state.ledger.get_balance(item.id).await.unwrap();
    assert_eq!(summary.balance, 1);

    let page = app
        .state
        .ledger
        .list_movements(item.id, MovementQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 2); // the seed receipt plus one accepted issue
}

#[tokio::test]
async fn oversubscribed_issues_never_drive_the_balance_negative() {
    let app = TestApp::new().await;
    let item = app.seed_item("RACE-02").await;

    app.state.ledger.record_receipt(receipt(item.id, 10)).await.unwrap();

    // 20 concurrent single-unit issues against a balance of 10.
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let ledger = app.state.ledger.clone();
        let item_id = item.id;
        tasks.push(tokio::spawn(async move {
            ledger.record_issue(issue(item_id, 1)).await
        }));
    }

    let mut accepted = 0u64;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(_) => accepted += 1,
            Err(err) => assert!(
                matches!(
                    err,
                    ServiceError::InsufficientStock(_) | ServiceError::Conflict(_)
                ),
                "unexpected rejection: {}",
                err
            ),
        }
    }

    assert!(accepted <= 10, "more issues accepted than stock available");

    // The ledger agrees with the accepted count and holds no negative state.
    let summary = app.state.ledger.get_balance(item.id).await.unwrap();
    assert_eq!(summary.balance, 10 - accepted as i64);
    assert!(summary.balance >= 0);

    let page = app
        .state
        .ledger
        .list_movements(item.id, MovementQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, accepted + 1); // accepted issues plus the seed receipt
}

#[tokio::test]
async fn concurrent_receipts_are_all_accepted() {
    let app = TestApp::new().await;
    let item = app.seed_item("RACE-03").await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let ledger = app.state.ledger.clone();
            let item_id = item.id;
            tokio::spawn(async move { ledger.record_receipt(receipt(item_id, 2)).await })
        })
        .collect();

    for task in join_all(tasks).await {
        task.expect("task panicked")
            .expect("receipts only append and must all be accepted");
    }

    let summary = app.state.ledger.get_balance(item.id).await.unwrap();
    assert_eq!(summary.balance, 16);

    // Every accepted movement bumped the version exactly once.
    let fresh = app.state.items.get_item(item.id).await.unwrap();
    assert_eq!(fresh.version, 8);
}

#[tokio::test]
async fn operations_on_different_items_proceed_independently() {
    let app = TestApp::new().await;
    let a = app.seed_item("IND-01").await;
    let b = app.seed_item("IND-02").await;

    let mut tasks = Vec::new();
    for item_id in [a.id, b.id] {
        for _ in 0..4 {
            let ledger = app.state.ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger.record_receipt(receipt(item_id, 1)).await
            }));
        }
    }

    for task in join_all(tasks).await {
        task.expect("task panicked").expect("receipt accepted");
    }

    assert_eq!(app.state.ledger.get_balance(a.id).await.unwrap().balance, 4);
    assert_eq!(app.state.ledger.get_balance(b.id).await.unwrap().balance, 4);
}

#[tokio::test]
async fn mixed_receipts_and_issues_reconcile_with_the_ledger() {
    let app = TestApp::new().await;
    let item = app.seed_item("MIX-01").await;

    app.state.ledger.record_receipt(receipt(item.id, 5)).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let ledger = app.state.ledger.clone();
        let item_id = item.id;
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.record_receipt(receipt(item_id, 1)).await.map(|_| 1i64)
            } else {
                ledger.record_issue(issue(item_id, 1)).await.map(|_| -1i64)
            }
        }));
    }

    let mut expected_delta = 0i64;
    for task in join_all(tasks).await {
        if let Ok(delta) = task.expect("task panicked") {
            expected_delta += delta;
        }
    }

    let summary = app.state.ledger.get_balance(item.id).await.unwrap();
    assert_eq!(summary.balance, 5 + expected_delta);
    assert!(summary.balance >= 0);
}
