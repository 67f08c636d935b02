use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::config::AppConfig;
use storefront_api::db;
use storefront_api::entities::product;
use storefront_api::errors::ServiceError;
use storefront_api::events::{self, EventSender};
use storefront_api::gateway::{GatewayOrder, GatewayOrderRequest, PaymentGateway};
use storefront_api::services::pricing::PricingConfig;
use storefront_api::services::{CartService, InventoryService, OrderService, PaymentService};
use storefront_api::{AppServices, AppState};

/// Shared secret used to sign test payment callbacks.
pub const TEST_GATEWAY_SECRET: &str = "test_gateway_secret";

/// Deterministic in-process stand-in for the payment gateway.
pub struct StaticGateway {
    counter: AtomicU64,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PaymentGateway for StaticGateway {
    async fn create_order(
        &self,
        request: GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("gw_order_{}", n),
            amount: request.amount,
            currency: request.currency,
        })
    }
}

/// Test harness wiring the full service stack onto an in-memory SQLite
/// database with a single pooled connection.
pub struct TestApp {
    pub state: Arc<AppState>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway_key_secret = TEST_GATEWAY_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let pricing = PricingConfig::from_app_config(&cfg);
        let inventory = InventoryService::new();
        let carts = CartService::new(
            db.clone(),
            event_sender.clone(),
            inventory.clone(),
            pricing.clone(),
        );
        let orders = OrderService::new(
            db.clone(),
            event_sender.clone(),
            inventory.clone(),
            pricing,
        );
        let payments = PaymentService::new(
            db.clone(),
            event_sender.clone(),
            Arc::new(StaticGateway::new()),
            orders.clone(),
            cfg.gateway_key_secret.clone(),
            cfg.default_currency.clone(),
        );

        let state = Arc::new(AppState {
            db,
            config: cfg,
            event_sender: (*event_sender).clone(),
            services: AppServices {
                carts,
                orders,
                payments,
                inventory,
            },
        });

        Self {
            state,
            _event_task: event_task,
        }
    }

    /// Inserts an active catalog product and returns its id.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            image: Set(format!("/images/{}.jpg", id)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(&*self.state.db)
            .await
            .expect("Failed to seed product");

        id
    }
}
