//! Admin surface: ledger adjustments, archival, low-stock and dashboard
//! reads, bulk operations, and the ship/deliver path.

mod common;

use rust_decimal_macros::dec;

use atelier::domain::errors::EngineError;
use atelier::domain::order::{OrderStatus, PaymentStatus};
use atelier::infrastructure::persistence::stock_ledger::{ReserveOutcome, StockLedger};

use common::{TestEnv, guest_intent, line, webhook_body};

#[tokio::test]
async fn test_try_reserve_reports_availability() {
    let env = TestEnv::new().await;
    let item = env.seed_variant(1, 11, "L-1", dec!(10.00), 3).await;

    let mut conn = env.db.pool.acquire().await.unwrap();
    assert_eq!(
        StockLedger::try_reserve(&mut conn, &item.id, 2).await.unwrap(),
        ReserveOutcome::Reserved
    );
    assert_eq!(
        StockLedger::try_reserve(&mut conn, &item.id, 2).await.unwrap(),
        ReserveOutcome::Insufficient { available: 1 }
    );
    drop(conn);

    let stock = env.stock(&item.id).await;
    assert_eq!((stock.on_hand, stock.reserved), (3, 2));
}

#[tokio::test]
async fn test_release_clamps_at_zero() {
    let env = TestEnv::new().await;
    let item = env.seed_variant(1, 11, "L-2", dec!(10.00), 3).await;

    let mut conn = env.db.pool.acquire().await.unwrap();
    StockLedger::try_reserve(&mut conn, &item.id, 1).await.unwrap();
    StockLedger::release(&mut conn, &item.id, 5).await.unwrap();
    drop(conn);

    let stock = env.stock(&item.id).await;
    assert_eq!((stock.on_hand, stock.reserved), (3, 0));
}

#[tokio::test]
async fn test_adjust_reconciles_reserved_and_rejects_undercuts() {
    let env = TestEnv::new().await;
    let item = env.seed_variant(1, 11, "L-3", dec!(10.00), 10).await;

    env.checkout
        .checkout(guest_intent(vec![line(1, Some(11), 4)]))
        .await
        .unwrap();

    // Raising stock is fine.
    let mut tx = env.db.pool.begin().await.unwrap();
    let updated = StockLedger::adjust(&mut tx, &item.id, 5).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!((updated.on_hand, updated.reserved), (15, 4));

    // Cutting below the outstanding holds trips the table CHECK.
    let mut tx = env.db.pool.begin().await.unwrap();
    let err = StockLedger::adjust(&mut tx, &item.id, -12).await.expect_err("must violate");
    tx.rollback().await.unwrap();
    assert!(matches!(err, EngineError::Integrity { .. }));

    let stock = env.stock(&item.id).await;
    assert_eq!((stock.on_hand, stock.reserved), (15, 4));
    env.assert_ledger_invariants().await;
}

#[tokio::test]
async fn test_archive_requires_no_holds() {
    let env = TestEnv::new().await;
    let item = env.seed_variant(1, 11, "L-4", dec!(10.00), 5).await;

    env.checkout
        .checkout(guest_intent(vec![line(1, Some(11), 1)]))
        .await
        .unwrap();

    let mut conn = env.db.pool.acquire().await.unwrap();
    assert!(matches!(
        StockLedger::archive(&mut conn, &item.id).await,
        Err(EngineError::Validation { .. })
    ));

    StockLedger::release(&mut conn, &item.id, 1).await.unwrap();
    sqlx::query("UPDATE reservation SET state = 'released', terminal_at = ? WHERE stock_item_id = ?")
        .bind(chrono::Utc::now())
        .bind(&item.id)
        .execute(&env.db.pool)
        .await
        .unwrap();
    StockLedger::archive(&mut conn, &item.id).await.unwrap();

    let stock = env.stock(&item.id).await;
    assert!(stock.is_archived);
}

#[tokio::test]
async fn test_low_stock_listing() {
    let env = TestEnv::new().await;
    // Threshold is 5: 4 available is low, 20 is not.
    env.seed_variant(1, 11, "LOW", dec!(10.00), 4).await;
    env.seed_variant(2, 22, "HIGH", dec!(10.00), 20).await;

    let low = env.admin.low_stock().await.unwrap();
    let skus: Vec<_> = low.iter().map(|i| i.sku.as_str()).collect();
    assert!(skus.contains(&"LOW"));
    assert!(!skus.contains(&"HIGH"));
}

#[tokio::test]
async fn test_dashboard_counters() {
    let env = TestEnv::new().await;
    env.seed_variant(1, 11, "D-1", dec!(10.00), 10).await;

    let outcome = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 3)]))
        .await
        .unwrap();
    env.expire_reservation(&outcome.reservations[0].id).await;

    let counters = env.admin.dashboard().await.unwrap();
    assert_eq!(counters.active_reservations, 1);
    assert_eq!(counters.currently_expired, 1);
    assert_eq!(counters.total_reserved_units, 3);
    assert_eq!(counters.pending_orders, 1);
    assert_eq!(counters.orders_last_24h, 1);
    assert!(counters.last_sweep.is_none());

    env.sweeper().tick().await.unwrap();
    let counters = env.admin.dashboard().await.unwrap();
    assert_eq!(counters.active_reservations, 0);
    assert!(counters.last_sweep.is_some());
}

#[tokio::test]
async fn test_bulk_cancel_skips_unguarded_orders() {
    let env = TestEnv::new().await;
    env.seed_variant(1, 11, "B-1", dec!(10.00), 10).await;

    let cancellable = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 1)]))
        .await
        .unwrap();
    let shipped = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 1)]))
        .await
        .unwrap();

    // Walk the second order to SHIPPED so the cancel guard rejects it.
    let initiated = env
        .reconciler
        .initiate_payment(&shipped.order.id, None)
        .await
        .unwrap();
    env.reconciler
        .handle_webhook(
            &webhook_body(&initiated.token, &shipped.order.id, "succeeded"),
            None,
        )
        .await
        .unwrap();
    env.admin
        .ship_order(&shipped.order.id, "BY-1".into())
        .await
        .unwrap();

    let outcome = env
        .admin
        .bulk_cancel(&[
            cancellable.order.id.clone(),
            shipped.order.id.clone(),
            "missing-order".into(),
        ])
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, vec![cancellable.order.id.clone()]);
    assert_eq!(outcome.skipped.len(), 2);
    env.assert_ledger_invariants().await;
}

#[tokio::test]
async fn test_bulk_cancel_of_paid_order_marks_refund() {
    let env = TestEnv::new().await;
    let item = env.seed_variant(1, 11, "B-2", dec!(10.00), 10).await;

    let outcome = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 2)]))
        .await
        .unwrap();
    let initiated = env
        .reconciler
        .initiate_payment(&outcome.order.id, None)
        .await
        .unwrap();
    env.reconciler
        .handle_webhook(
            &webhook_body(&initiated.token, &outcome.order.id, "paid"),
            None,
        )
        .await
        .unwrap();

    let result = env.admin.bulk_cancel(&[outcome.order.id.clone()]).await.unwrap();
    assert_eq!(result.succeeded.len(), 1);

    let detail = env.admin.order_detail(&outcome.order.id).await.unwrap();
    assert_eq!(detail.order.order_status, OrderStatus::Cancelled);
    assert_eq!(detail.order.payment_status, PaymentStatus::RefundedFull);

    // Fulfilled at payment time; cancellation does not resurrect stock.
    let stock = env.stock(&item.id).await;
    assert_eq!((stock.on_hand, stock.reserved), (8, 0));
}

#[tokio::test]
async fn test_bulk_fulfill_only_touches_paid_orders() {
    let env = TestEnv::new().await;
    let item = env.seed_variant(1, 11, "B-3", dec!(10.00), 10).await;

    let pending = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 2)]))
        .await
        .unwrap();
    let paid = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 3)]))
        .await
        .unwrap();

    // Mark the second order paid behind the engine's back, stranding its
    // ACTIVE reservations; bulk fulfill is the repair tool.
    sqlx::query("UPDATE orders SET payment_status = 'paid', order_status = 'processing' WHERE id = ?")
        .bind(&paid.order.id)
        .execute(&env.db.pool)
        .await
        .unwrap();

    let outcome = env
        .admin
        .bulk_fulfill(&[pending.order.id.clone(), paid.order.id.clone()])
        .await
        .unwrap();
    assert_eq!(outcome.succeeded, vec![paid.order.id.clone()]);
    assert_eq!(outcome.skipped.len(), 1);

    let stock = env.stock(&item.id).await;
    // Paid order's 3 fulfilled; pending order's 2 still held.
    assert_eq!((stock.on_hand, stock.reserved), (7, 2));
    env.assert_ledger_invariants().await;
}

#[tokio::test]
async fn test_ship_then_deliver_stamps_timestamps() {
    let env = TestEnv::new().await;
    env.seed_variant(1, 11, "B-4", dec!(10.00), 10).await;

    let outcome = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 1)]))
        .await
        .unwrap();
    let initiated = env
        .reconciler
        .initiate_payment(&outcome.order.id, None)
        .await
        .unwrap();
    env.reconciler
        .handle_webhook(
            &webhook_body(&initiated.token, &outcome.order.id, "succeeded"),
            None,
        )
        .await
        .unwrap();

    let shipped = env
        .admin
        .ship_order(&outcome.order.id, "BY-42".into())
        .await
        .unwrap();
    assert_eq!(shipped.order.order_status, OrderStatus::Shipped);
    assert_eq!(shipped.order.tracking_number.as_deref(), Some("BY-42"));
    assert!(shipped.order.shipped_at.is_some());

    let delivered = env.admin.deliver_order(&outcome.order.id).await.unwrap();
    assert_eq!(delivered.order.order_status, OrderStatus::Delivered);
    assert!(delivered.order.delivered_at.is_some());

    // Delivering again is a guard miss, surfaced strictly as an error.
    assert!(matches!(
        env.admin.deliver_order(&outcome.order.id).await,
        Err(EngineError::StateGuard { .. })
    ));

    // Shipping an unpaid order is likewise the operator's bug.
    let unpaid = env
        .checkout
        .checkout(guest_intent(vec![line(1, Some(11), 1)]))
        .await
        .unwrap();
    assert!(matches!(
        env.admin.ship_order(&unpaid.order.id, "BY-43".into()).await,
        Err(EngineError::StateGuard { .. })
    ));
}

#[tokio::test]
async fn test_user_active_reservations_view() {
    let env = TestEnv::new().await;
    env.seed_variant(1, 11, "B-5", dec!(10.00), 10).await;

    let mut intent = guest_intent(vec![line(1, Some(11), 2)]);
    intent.user_id = Some("user-9".into());
    intent.guest_email = None;
    env.checkout.checkout(intent).await.unwrap();

    let reservations = env.admin.active_reservations_for_user("user-9").await.unwrap();
    assert_eq!(reservations.len(), 1);
    assert!(reservations[0].minutes_remaining <= 15);
    assert!(
        env.admin
            .active_reservations_for_user("someone-else")
            .await
            .unwrap()
            .is_empty()
    );
}
