//! End-to-end checkout and settlement against the in-memory stores

use bigdecimal::BigDecimal;
use futures::future::join_all;
use order_payments_engine::api::AppState;
use order_payments_engine::config::{AmountConfig, CheckoutConfig};
use order_payments_engine::database::memory::MemoryStore;
use order_payments_engine::database::repository::{OrderStore, ProductStore};
use order_payments_engine::database::Stores;
use order_payments_engine::error::ErrorCode;
use order_payments_engine::orders::model::{
    OrderStatus, PaymentMethod, PaymentStatus, Product, ShippingAddress,
};
use order_payments_engine::payments::providers::vnpay::VNPAY_SIGNATURE_FIELD;
use order_payments_engine::payments::providers::{VnpayAdapter, VnpayConfig};
use order_payments_engine::payments::{
    AmountCodec, CallbackParams, Gateway, GatewayAdapter, GatewayRegistry, IpnDisposition,
    ProcessingPolicy,
};
use order_payments_engine::services::{
    ipn_disposition, CheckoutLine, CheckoutRequest, ReconcileStatus,
};
use order_payments_engine::workers::pending_order_expiry::{
    PendingOrderExpiryConfig, PendingOrderExpiryWorker,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const CUSTOMER: &str = "customer-42";

struct Harness {
    store: Arc<MemoryStore>,
    state: AppState,
    vnpay: Arc<VnpayAdapter>,
}

fn vnpay_adapter() -> Arc<VnpayAdapter> {
    Arc::new(VnpayAdapter::new(
        VnpayConfig {
            tmn_code: "TESTTMN1".to_string(),
            hash_secret: "integration-secret".to_string(),
            payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            return_url: "https://shop.example/payments/callback/vnpay".to_string(),
        },
        AmountCodec::from_config(&AmountConfig::default()).unwrap(),
        ProcessingPolicy::default(),
    ))
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let vnpay = vnpay_adapter();
    let registry = GatewayRegistry::new().with(vnpay.clone());
    let state = AppState::from_parts(
        Stores::from_memory(store.clone()),
        registry,
        CheckoutConfig::default(),
        &AmountConfig::default(),
        "https://shop.example/payment/result".to_string(),
    )
    .unwrap();
    Harness {
        store,
        state,
        vnpay,
    }
}

fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Tran Thi B".to_string(),
        phone: "0911222333".to_string(),
        address_line: "12 Nguyen Hue".to_string(),
        ward: Some("Ben Nghe".to_string()),
        district: Some("District 1".to_string()),
        city: "Ho Chi Minh".to_string(),
        note: None,
    }
}

async fn seed_product(store: &MemoryStore, price: i64, stock: i32) -> Product {
    let product = Product {
        id: Uuid::new_v4(),
        shop_id: Uuid::new_v4(),
        shop_name: "Saigon Books".to_string(),
        name: "Notebook".to_string(),
        image_url: None,
        price: BigDecimal::from(price),
        stock_quantity: stock,
        is_active: true,
    };
    store.insert_product(&product).await.unwrap();
    product
}

async fn stock_of(store: &MemoryStore, id: Uuid) -> i32 {
    store.find_product(id).await.unwrap().unwrap().stock_quantity
}

fn checkout(lines: &[(Uuid, i32)], method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        items: lines
            .iter()
            .map(|(product_id, quantity)| CheckoutLine {
                product_id: *product_id,
                quantity: *quantity,
                unit_price: None,
            })
            .collect(),
        shipping_address: address(),
        payment_method: method,
        client_total: None,
    }
}

fn vnpay_callback(
    adapter: &VnpayAdapter,
    order_number: &str,
    response_code: &str,
    transaction_status: &str,
    amount: i64,
) -> CallbackParams {
    let mut params = CallbackParams::new();
    params.insert("vnp_TmnCode".into(), "TESTTMN1".into());
    params.insert("vnp_TxnRef".into(), order_number.to_string());
    params.insert("vnp_Amount".into(), amount.to_string());
    params.insert("vnp_ResponseCode".into(), response_code.to_string());
    params.insert("vnp_TransactionStatus".into(), transaction_status.to_string());
    params.insert("vnp_TransactionNo".into(), "14226112".into());
    params.insert("vnp_BankCode".into(), "NCB".into());
    params.insert("vnp_PayDate".into(), "20240301153000".into());
    let signature = adapter.sign(&params);
    params.insert("vnp_SecureHashType".into(), "HmacSHA512".into());
    params.insert(VNPAY_SIGNATURE_FIELD.into(), signature);
    params
}

// 10 major units x 2 = 20 major units = 20,000,000 VND, sent as VND x 100
const TWENTY_IN_VNPAY_MINOR: i64 = 2_000_000_000;

#[tokio::test]
async fn paid_order_keeps_its_reservation_across_replays() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;

    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();
    assert_eq!(order.total_amount, BigDecimal::from(20));
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.order_status, OrderStatus::Pending);
    assert_eq!(stock_of(&h.store, product.id).await, 3);

    let params = vnpay_callback(&h.vnpay, &order.order_number, "00", "00", TWENTY_IN_VNPAY_MINOR);
    let outcome = h.vnpay.parse_callback(&params).await.unwrap();

    let first = h.state.reconciler.apply(&outcome).await.unwrap();
    assert_eq!(first.status, ReconcileStatus::Paid);
    assert_eq!(first.order.payment_status, PaymentStatus::Paid);
    assert_eq!(first.order.order_status, OrderStatus::Processing);
    let info = first.order.payment_info.clone().unwrap();
    assert_eq!(info.gateway, Some(Gateway::Vnpay));
    assert_eq!(info.transaction_id.as_deref(), Some("14226112"));
    assert!(info.paid_at.is_some());

    let replay = h.state.reconciler.apply(&outcome).await;
    assert_eq!(replay.as_ref().unwrap().status, ReconcileStatus::AlreadyPaid);
    assert_eq!(ipn_disposition(&replay), IpnDisposition::AlreadyConfirmed);
    assert_eq!(stock_of(&h.store, product.id).await, 3);
}

#[tokio::test]
async fn failed_payment_releases_stock_exactly_once() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();

    let params = vnpay_callback(&h.vnpay, &order.order_number, "51", "02", TWENTY_IN_VNPAY_MINOR);
    let outcome = h.vnpay.parse_callback(&params).await.unwrap();

    let first = h.state.reconciler.apply(&outcome).await.unwrap();
    assert_eq!(first.status, ReconcileStatus::Failed);
    assert_eq!(first.order.payment_status, PaymentStatus::Failed);
    assert_eq!(first.order.order_status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&h.store, product.id).await, 5);

    let second = h.state.reconciler.apply(&outcome).await.unwrap();
    assert_eq!(second.status, ReconcileStatus::AlreadyResolved);
    assert_eq!(stock_of(&h.store, product.id).await, 5);
}

#[tokio::test]
async fn failure_that_cannot_restock_leaves_the_order_pending_for_a_retry() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();

    // counter already at its ceiling, so adding the 2 units back cannot succeed
    let full = Product {
        stock_quantity: i32::MAX,
        ..product.clone()
    };
    h.store.insert_product(&full).await.unwrap();

    let params = vnpay_callback(&h.vnpay, &order.order_number, "51", "02", TWENTY_IN_VNPAY_MINOR);
    let outcome = h.vnpay.parse_callback(&params).await.unwrap();
    assert!(h.state.reconciler.apply(&outcome).await.is_err());

    let stored = h.store.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(stored.order_status, OrderStatus::Pending);
    assert_eq!(stock_of(&h.store, product.id).await, i32::MAX);

    let restored = Product {
        stock_quantity: 3,
        ..product.clone()
    };
    h.store.insert_product(&restored).await.unwrap();

    let retried = h.state.reconciler.apply(&outcome).await.unwrap();
    assert_eq!(retried.status, ReconcileStatus::Failed);
    assert_eq!(stock_of(&h.store, product.id).await, 5);
}

#[tokio::test]
async fn success_after_failure_is_flagged_not_applied() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();

    let failure = vnpay_callback(&h.vnpay, &order.order_number, "24", "02", TWENTY_IN_VNPAY_MINOR);
    let failure = h.vnpay.parse_callback(&failure).await.unwrap();
    h.state.reconciler.apply(&failure).await.unwrap();

    let success = vnpay_callback(&h.vnpay, &order.order_number, "00", "00", TWENTY_IN_VNPAY_MINOR);
    let success = h.vnpay.parse_callback(&success).await.unwrap();
    let result = h.state.reconciler.apply(&success).await.unwrap();

    assert_eq!(result.status, ReconcileStatus::Conflict);
    assert_eq!(result.order.payment_status, PaymentStatus::Failed);
    assert_eq!(stock_of(&h.store, product.id).await, 5);
    let reviews = h.state.reconciler.pending_reviews(10).await.unwrap();
    assert!(reviews
        .iter()
        .any(|entry| entry.order_number == order.order_number));
}

#[tokio::test]
async fn ambiguous_outcomes_leave_the_order_pending() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();

    // Charged but still under review at the bank
    let params = vnpay_callback(&h.vnpay, &order.order_number, "07", "00", TWENTY_IN_VNPAY_MINOR);
    let outcome = h.vnpay.parse_callback(&params).await.unwrap();
    assert!(outcome.ambiguous);

    let result = h.state.reconciler.apply(&outcome).await;
    assert_eq!(
        result.as_ref().unwrap_err().error_code(),
        ErrorCode::AmbiguousOutcome
    );
    assert_eq!(ipn_disposition(&result), IpnDisposition::Unknown);

    let stored = h.store.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(stock_of(&h.store, product.id).await, 3);
}

#[tokio::test]
async fn mismatched_amount_is_held_for_review() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();

    let params = vnpay_callback(&h.vnpay, &order.order_number, "00", "00", 100_000_000);
    let outcome = h.vnpay.parse_callback(&params).await.unwrap();
    let result = h.state.reconciler.apply(&outcome).await;

    assert_eq!(ipn_disposition(&result), IpnDisposition::AmountMismatch);
    let stored = h.store.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn tampered_callback_changes_nothing() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();

    let mut params =
        vnpay_callback(&h.vnpay, &order.order_number, "51", "02", TWENTY_IN_VNPAY_MINOR);
    params.insert("vnp_ResponseCode".into(), "00".into());
    params.insert("vnp_TransactionStatus".into(), "00".into());
    let outcome = h.vnpay.parse_callback(&params).await.unwrap();
    assert!(!outcome.signature_valid);

    let result = h.state.reconciler.apply(&outcome).await;
    assert_eq!(ipn_disposition(&result), IpnDisposition::SignatureInvalid);
    let stored = h.store.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(h.store.callback_log_len().await, 1);
}

#[tokio::test]
async fn insufficient_stock_rejects_without_side_effects() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;

    let err = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 6)], PaymentMethod::Cod))
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::InsufficientStock);
    assert_eq!(err.status_code(), 409);
    assert_eq!(stock_of(&h.store, product.id).await, 5);
}

#[tokio::test]
async fn partial_reservation_is_compensated() {
    let h = harness();
    let plenty = seed_product(&h.store, 10, 50).await;
    let scarce = seed_product(&h.store, 7, 1).await;

    let err = h
        .state
        .orders
        .create_order(
            CUSTOMER,
            checkout(&[(plenty.id, 3), (scarce.id, 2)], PaymentMethod::Cod),
        )
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::InsufficientStock);
    assert_eq!(stock_of(&h.store, plenty.id).await, 50);
    assert_eq!(stock_of(&h.store, scarce.id).await, 1);
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;

    let attempts = (0..8).map(|_| {
        let orders = h.state.orders.clone();
        let request = checkout(&[(product.id, 2)], PaymentMethod::Cod);
        async move { orders.create_order(CUSTOMER, request).await }
    });
    let results = join_all(attempts).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 2);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.error_code() == ErrorCode::InsufficientStock));
    assert_eq!(stock_of(&h.store, product.id).await, 1);
}

#[tokio::test]
async fn racing_success_and_failure_settle_once() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let order = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();

    let success = vnpay_callback(&h.vnpay, &order.order_number, "00", "00", TWENTY_IN_VNPAY_MINOR);
    let failure = vnpay_callback(&h.vnpay, &order.order_number, "51", "02", TWENTY_IN_VNPAY_MINOR);
    let success = h.vnpay.parse_callback(&success).await.unwrap();
    let failure = h.vnpay.parse_callback(&failure).await.unwrap();

    let (a, b) = tokio::join!(
        h.state.reconciler.apply(&success),
        h.state.reconciler.apply(&failure)
    );
    let statuses = [a.unwrap().status, b.unwrap().status];
    let stored = h.store.find_order(order.id).await.unwrap().unwrap();

    match stored.payment_status {
        PaymentStatus::Paid => {
            assert!(statuses.contains(&ReconcileStatus::Paid));
            assert_eq!(stock_of(&h.store, product.id).await, 3);
        }
        PaymentStatus::Failed => {
            assert!(statuses.contains(&ReconcileStatus::Failed));
            assert!(statuses.contains(&ReconcileStatus::Conflict));
            assert_eq!(stock_of(&h.store, product.id).await, 5);
        }
        other => panic!("unexpected payment status {:?}", other),
    }
}

#[tokio::test]
async fn cod_order_cancel_rules_follow_fulfilment() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;

    let early = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Cod))
        .await
        .unwrap();
    let cancelled = h
        .state
        .orders
        .cancel_order(CUSTOMER, early.id, None)
        .await
        .unwrap();
    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Cancelled);
    assert_eq!(
        cancelled.cancellation_reason.as_deref(),
        Some("cancelled by customer")
    );
    assert_eq!(stock_of(&h.store, product.id).await, 5);

    let late = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Cod))
        .await
        .unwrap();
    for target in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipping,
    ] {
        h.state.orders.advance_status(late.id, target).await.unwrap();
    }
    let err = h
        .state
        .orders
        .cancel_order(CUSTOMER, late.id, Some("changed my mind".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidTransition);
    assert_eq!(stock_of(&h.store, product.id).await, 3);

    let delivered = h
        .state
        .orders
        .advance_status(late.id, OrderStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn expiry_sweep_cancels_abandoned_online_orders() {
    let h = harness();
    let product = seed_product(&h.store, 10, 5).await;
    let online = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 2)], PaymentMethod::Vnpay))
        .await
        .unwrap();
    let cod = h
        .state
        .orders
        .create_order(CUSTOMER, checkout(&[(product.id, 1)], PaymentMethod::Cod))
        .await
        .unwrap();
    assert_eq!(stock_of(&h.store, product.id).await, 2);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let worker = PendingOrderExpiryWorker::new(
        h.state.orders.clone(),
        PendingOrderExpiryConfig {
            pending_ttl: Duration::ZERO,
            ..PendingOrderExpiryConfig::default()
        },
    );
    assert_eq!(worker.run_cycle().await.unwrap(), 1);

    let expired = h.store.find_order(online.id).await.unwrap().unwrap();
    assert_eq!(expired.payment_status, PaymentStatus::Cancelled);
    assert_eq!(expired.order_status, OrderStatus::Cancelled);
    let untouched = h.store.find_order(cod.id).await.unwrap().unwrap();
    assert_eq!(untouched.payment_status, PaymentStatus::Pending);
    assert_eq!(stock_of(&h.store, product.id).await, 4);

    // A late success for the expired order is a conflict, not a payment
    let params = vnpay_callback(&h.vnpay, &online.order_number, "00", "00", TWENTY_IN_VNPAY_MINOR);
    let outcome = h.vnpay.parse_callback(&params).await.unwrap();
    let result = h.state.reconciler.apply(&outcome).await.unwrap();
    assert_eq!(result.status, ReconcileStatus::Conflict);
    assert_eq!(stock_of(&h.store, product.id).await, 4);
}
