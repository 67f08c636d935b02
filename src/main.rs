use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use storefront_api::config::{init_tracing, load_config};
use storefront_api::db::{establish_connection_from_app_config, run_migrations};
use storefront_api::events::{process_events, EventSender};
use storefront_api::gateway::HttpPaymentGateway;
use storefront_api::services::pricing::PricingConfig;
use storefront_api::services::{CartService, InventoryService, OrderService, PaymentService};
use storefront_api::{app, AppServices, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(config.log_level(), config.log_json);

    info!(
        "Starting storefront-api v{} in {} mode",
        env!("CARGO_PKG_VERSION"),
        config.environment
    );

    let db = Arc::new(establish_connection_from_app_config(&config).await?);

    if config.auto_migrate {
        run_migrations(&db).await?;
    }

    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = Arc::new(EventSender::new(event_tx));
    tokio::spawn(process_events(event_rx));

    let pricing = PricingConfig::from_app_config(&config);
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
    let payment_gateway = Arc::new(HttpPaymentGateway::from_app_config(&config));
    let payments = PaymentService::new(
        db.clone(),
        event_sender.clone(),
        payment_gateway,
        orders.clone(),
        config.gateway_key_secret.clone(),
        config.default_currency.clone(),
    );

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        event_sender: (*event_sender).clone(),
        services: AppServices {
            carts,
            orders,
            payments,
            inventory,
        },
    });

    let router = app(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(build_cors_layer(&config.cors_allowed_origins));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn build_cors_layer(allowed_origins: &Option<String>) -> CorsLayer {
    match allowed_origins {
        Some(raw) => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin: {}", origin);
                        None
                    }
                })
                .collect();

            if origins.is_empty() {
                error!("No valid CORS origins configured, falling back to permissive CORS");
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(origins)
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
