mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::entities::order::{OrderStatus, PaymentMethod, PaymentStatus};
use storefront_api::entities::Product;
use storefront_api::errors::ServiceError;
use storefront_api::services::orders::{Address, CreateOrderInput, UpdateStatusInput};
use uuid::Uuid;

fn test_address() -> Address {
    Address {
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        address: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        state: "IL".to_string(),
        zip: "62701".to_string(),
        country: "US".to_string(),
        phone: None,
    }
}

fn order_input(method: PaymentMethod) -> CreateOrderInput {
    CreateOrderInput {
        shipping_address: test_address(),
        billing_address: None,
        payment_method: method,
        discount: None,
        notes: None,
    }
}

async fn stock_of(app: &TestApp, product_id: Uuid) -> i32 {
    Product::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .stock
}

#[tokio::test]
async fn create_order_snapshots_cart_and_decrements_stock() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Fifty", dec!(50.00), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 2)
        .await
        .unwrap();

    let order = app
        .state
        .services
        .orders
        .create_order(user_id, order_input(PaymentMethod::Gateway))
        .await
        .expect("create_order failed");

    assert_eq!(order.order.order_number, "ORD-000001");
    assert_eq!(order.order.subtotal, dec!(100.00));
    assert_eq!(order.order.shipping_cost, dec!(0));
    assert_eq!(order.order.tax, dec!(8.00));
    assert_eq!(order.order.total, dec!(108.00));
    assert_eq!(order.order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.order.order_status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].name, "Fifty");
    assert_eq!(order.items[0].quantity, 2);

    // Stock was reserved and the cart emptied in the same transaction
    assert_eq!(stock_of(&app, product_id).await, 8);
    let cart = app.state.services.carts.get_cart(user_id).await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn order_numbers_are_sequential() {
    let app = TestApp::new().await;
    let product_id = app.seed_product("Item", dec!(20.00), 100).await;

    for n in 1..=3 {
        let user_id = Uuid::new_v4();
        app.state
            .services
            .carts
            .add_item(user_id, product_id, 1)
            .await
            .unwrap();
        let order = app
            .state
            .services
            .orders
            .create_order(user_id, order_input(PaymentMethod::Gateway))
            .await
            .unwrap();
        assert_eq!(order.order.order_number, format!("ORD-{:06}", n));
    }
}

#[tokio::test]
async fn cod_orders_confirm_immediately() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(30.00), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();

    let order = app
        .state
        .services
        .orders
        .create_order(user_id, order_input(PaymentMethod::CashOnDelivery))
        .await
        .unwrap();

    assert_eq!(order.order.order_status, OrderStatus::Confirmed);
    assert_eq!(order.order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.order.total, dec!(42.39));
}

#[tokio::test]
async fn discount_reduces_the_total() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(30.00), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();

    let mut input = order_input(PaymentMethod::Gateway);
    input.discount = Some(dec!(5.00));
    let order = app
        .state
        .services
        .orders
        .create_order(user_id, input)
        .await
        .unwrap();

    // 30.00 + 9.99 shipping + 2.40 tax - 5.00 discount
    assert_eq!(order.order.discount, dec!(5.00));
    assert_eq!(order.order.total, dec!(37.39));
}

#[tokio::test]
async fn bad_address_or_discount_rejected_before_any_write() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(30.00), 10).await;
    app.state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();

    let mut input = order_input(PaymentMethod::Gateway);
    input.shipping_address.city = String::new();
    let err = app
        .state
        .services
        .orders
        .create_order(user_id, input)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let mut input = order_input(PaymentMethod::Gateway);
    input.discount = Some(dec!(-1.00));
    let err = app
        .state
        .services
        .orders
        .create_order(user_id, input)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    // Nothing was reserved and the cart is intact
    assert_eq!(stock_of(&app, product_id).await, 10);
    let cart = app.state.services.carts.get_cart(user_id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let err = app
        .state
        .services
        .orders
        .create_order(user_id, order_input(PaymentMethod::Gateway))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::EmptyCart);

    // A cart that was filled and then emptied behaves the same
    let product_id = app.seed_product("Item", dec!(10.00), 5).await;
    app.state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();
    app.state.services.carts.clear(user_id).await.unwrap();

    let err = app
        .state
        .services
        .orders
        .create_order(user_id, order_input(PaymentMethod::Gateway))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::EmptyCart);
}

#[tokio::test]
async fn stock_shortfall_rolls_back_whole_order() {
    let app = TestApp::new().await;
    let plentiful = app.seed_product("Plentiful", dec!(10.00), 100).await;
    let scarce = app.seed_product("Scarce", dec!(10.00), 3).await;

    // First buyer drains the scarce product after the second added it
    let second = Uuid::new_v4();
    app.state.services.carts.add_item(second, plentiful, 2).await.unwrap();
    app.state.services.carts.add_item(second, scarce, 3).await.unwrap();

    let first = Uuid::new_v4();
    app.state.services.carts.add_item(first, scarce, 2).await.unwrap();
    app.state
        .services
        .orders
        .create_order(first, order_input(PaymentMethod::Gateway))
        .await
        .unwrap();

    let err = app
        .state
        .services
        .orders
        .create_order(second, order_input(PaymentMethod::Gateway))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // The failed checkout must not have taken any stock, not even from
    // lines that individually had enough
    assert_eq!(stock_of(&app, plentiful).await, 100);
    assert_eq!(stock_of(&app, scarce).await, 1);

    // And the second buyer's cart is untouched
    let cart = app.state.services.carts.get_cart(second).await.unwrap();
    assert_eq!(cart.items.len(), 2);
}

#[tokio::test]
async fn orders_are_owner_scoped() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(10.00), 5).await;

    app.state.services.carts.add_item(owner, product_id, 1).await.unwrap();
    let order = app
        .state
        .services
        .orders
        .create_order(owner, order_input(PaymentMethod::Gateway))
        .await
        .unwrap();

    let err = app
        .state
        .services
        .orders
        .get_order(stranger, order.order.id)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    assert!(app
        .state
        .services
        .orders
        .get_order(owner, order.order.id)
        .await
        .is_ok());
}

#[tokio::test]
async fn fulfilment_walks_the_state_machine() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(25.00), 5).await;

    app.state.services.carts.add_item(user_id, product_id, 1).await.unwrap();
    let order = app
        .state
        .services
        .orders
        .create_order(user_id, order_input(PaymentMethod::CashOnDelivery))
        .await
        .unwrap();
    let order_id = order.order.id;

    let step = |status: OrderStatus, tracking: Option<&str>| UpdateStatusInput {
        status,
        tracking_number: tracking.map(str::to_string),
        reason: None,
    };

    let order = app
        .state
        .services
        .orders
        .update_status(user_id, order_id, step(OrderStatus::Processing, None))
        .await
        .unwrap();
    assert_eq!(order.order_status, OrderStatus::Processing);

    let order = app
        .state
        .services
        .orders
        .update_status(user_id, order_id, step(OrderStatus::Shipped, Some("TRK-42")))
        .await
        .unwrap();
    assert_eq!(order.tracking_number.as_deref(), Some("TRK-42"));

    // Shipped orders cannot cancel
    let err = app
        .state
        .services
        .orders
        .update_status(user_id, order_id, step(OrderStatus::Cancelled, None))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    let order = app
        .state
        .services
        .orders
        .update_status(user_id, order_id, step(OrderStatus::Delivered, None))
        .await
        .unwrap();
    assert_eq!(order.order_status, OrderStatus::Delivered);
    assert!(order.delivered_at.is_some());
}

#[tokio::test]
async fn cancellation_restores_stock() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(25.00), 5).await;

    app.state.services.carts.add_item(user_id, product_id, 3).await.unwrap();
    let order = app
        .state
        .services
        .orders
        .create_order(user_id, order_input(PaymentMethod::CashOnDelivery))
        .await
        .unwrap();
    assert_eq!(stock_of(&app, product_id).await, 2);

    let cancelled = app
        .state
        .services
        .orders
        .update_status(
            user_id,
            order.order.id,
            UpdateStatusInput {
                status: OrderStatus::Cancelled,
                tracking_number: None,
                reason: Some("Changed my mind".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(cancelled.order_status, OrderStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(
        cancelled.cancellation_reason.as_deref(),
        Some("Changed my mind")
    );
    assert_eq!(stock_of(&app, product_id).await, 5);

    // Terminal: no further transitions
    let err = app
        .state
        .services
        .orders
        .update_status(
            user_id,
            order.order.id,
            UpdateStatusInput {
                status: OrderStatus::Confirmed,
                tracking_number: None,
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn concurrent_checkouts_of_one_cart_create_one_order() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(10.00), 50).await;
    app.state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let orders = app.state.services.orders.clone();
            tokio::spawn(async move {
                orders
                    .create_order(user_id, order_input(PaymentMethod::Gateway))
                    .await
            })
        })
        .collect();

    // One checkout wins; the loser sees an already-emptied cart (or a
    // conflict), never a second order from the same contents.
    let successes = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("checkout task panicked"))
        .filter(Result::is_ok)
        .count();
    assert_eq!(successes, 1);

    let (orders, total) = app
        .state
        .services
        .orders
        .list_orders(user_id, 1, 10)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn list_orders_paginates_newest_first() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Item", dec!(5.00), 100).await;

    for _ in 0..3 {
        app.state.services.carts.add_item(user_id, product_id, 1).await.unwrap();
        app.state
            .services
            .orders
            .create_order(user_id, order_input(PaymentMethod::Gateway))
            .await
            .unwrap();
    }

    let (page, total) = app
        .state
        .services
        .orders
        .list_orders(user_id, 1, 2)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);

    let (rest, _) = app
        .state
        .services
        .orders
        .list_orders(user_id, 2, 2)
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);

    // Another user sees nothing
    let (none, total) = app
        .state
        .services
        .orders
        .list_orders(Uuid::new_v4(), 1, 10)
        .await
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(total, 0);
}
