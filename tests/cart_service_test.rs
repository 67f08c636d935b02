mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use storefront_api::entities::{product, Product};
use storefront_api::errors::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn add_item_creates_cart_lazily() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Desk Mat", dec!(24.99), 10).await;

    let cart = app
        .state
        .services
        .carts
        .add_item(user_id, product_id, 2)
        .await
        .expect("add_item failed");

    assert_eq!(cart.user_id, user_id);
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
    assert_eq!(cart.items[0].unit_price, dec!(24.99));
    assert_eq!(cart.total, dec!(49.98));
}

#[tokio::test]
async fn add_item_merges_existing_line() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Mouse", dec!(64.50), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 2)
        .await
        .unwrap();
    let cart = app
        .state
        .services
        .carts
        .add_item(user_id, product_id, 3)
        .await
        .unwrap();

    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(cart.total, dec!(322.50));
}

#[tokio::test]
async fn add_item_rejects_merged_quantity_over_stock() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Webcam", dec!(59.00), 5).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 3)
        .await
        .unwrap();

    let err = app
        .state
        .services
        .carts
        .add_item(user_id, product_id, 3)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(_));
}

#[tokio::test]
async fn add_item_rejects_zero_quantity_and_unknown_product() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Hub", dec!(39.50), 5).await;

    let err = app
        .state
        .services
        .carts
        .add_item(user_id, product_id, 0)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .state
        .services
        .carts
        .add_item(user_id, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn inactive_product_is_invisible() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Retired Item", dec!(10.00), 5).await;

    let model = Product::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: product::ActiveModel = model.into();
    active.is_active = Set(false);
    active.update(&*app.state.db).await.unwrap();

    let err = app
        .state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn update_quantity_refreshes_price_snapshot() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Keyboard", dec!(129.00), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();

    // Catalog price changes after the line was added
    let model = Product::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: product::ActiveModel = model.into();
    active.price = Set(dec!(99.00));
    active.update(&*app.state.db).await.unwrap();

    let cart = app
        .state
        .services
        .carts
        .update_quantity(user_id, product_id, 2)
        .await
        .unwrap();

    assert_eq!(cart.items[0].unit_price, dec!(99.00));
    assert_eq!(cart.total, dec!(198.00));
}

#[tokio::test]
async fn zero_quantity_removes_line() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Charger", dec!(45.00), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 2)
        .await
        .unwrap();
    let cart = app
        .state
        .services
        .carts
        .update_quantity(user_id, product_id, 0)
        .await
        .unwrap();

    assert!(cart.items.is_empty());
    assert_eq!(cart.total, Decimal::ZERO);
}

#[tokio::test]
async fn remove_item_is_idempotent() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let in_cart = app.seed_product("Light Bar", dec!(89.99), 10).await;
    let other = app.seed_product("Stand", dec!(49.99), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, in_cart, 1)
        .await
        .unwrap();

    // Removing a product that was never added is a no-op
    let cart = app
        .state
        .services
        .carts
        .remove_item(user_id, other)
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.total, dec!(89.99));

    // So is removing the same line twice
    let cart = app
        .state
        .services
        .carts
        .remove_item(user_id, in_cart)
        .await
        .unwrap();
    assert!(cart.items.is_empty());
    let cart = app
        .state
        .services
        .carts
        .remove_item(user_id, in_cart)
        .await
        .unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.total, Decimal::ZERO);

    // Even a user with no cart yet gets a clean empty cart back
    let cart = app
        .state
        .services
        .carts
        .remove_item(Uuid::new_v4(), other)
        .await
        .unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn get_cart_for_new_user_is_empty() {
    let app = TestApp::new().await;

    let cart = app
        .state
        .services
        .carts
        .get_cart(Uuid::new_v4())
        .await
        .unwrap();

    assert!(cart.items.is_empty());
    assert_eq!(cart.total, Decimal::ZERO);
}

#[tokio::test]
async fn summary_waives_shipping_at_threshold() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Fifty", dec!(50.00), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 2)
        .await
        .unwrap();

    let summary = app.state.services.carts.get_summary(user_id).await.unwrap();
    assert_eq!(summary.item_count, 2);
    assert_eq!(summary.subtotal, dec!(100.00));
    assert_eq!(summary.shipping_cost, Decimal::ZERO);
    assert_eq!(summary.tax, dec!(8.00));
    assert_eq!(summary.total, dec!(108.00));
}

#[tokio::test]
async fn summary_charges_flat_shipping_below_threshold() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product_id = app.seed_product("Thirty", dec!(30.00), 10).await;

    app.state
        .services
        .carts
        .add_item(user_id, product_id, 1)
        .await
        .unwrap();

    let summary = app.state.services.carts.get_summary(user_id).await.unwrap();
    assert_eq!(summary.subtotal, dec!(30.00));
    assert_eq!(summary.shipping_cost, dec!(9.99));
    assert_eq!(summary.tax, dec!(2.40));
    assert_eq!(summary.total, dec!(42.39));
}

#[tokio::test]
async fn clear_empties_cart() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let a = app.seed_product("A", dec!(5.00), 10).await;
    let b = app.seed_product("B", dec!(7.00), 10).await;

    app.state.services.carts.add_item(user_id, a, 1).await.unwrap();
    app.state.services.carts.add_item(user_id, b, 2).await.unwrap();

    let cart = app.state.services.carts.clear(user_id).await.unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.total, Decimal::ZERO);
}
