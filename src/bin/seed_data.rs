//! Seed data script - populates the catalog with demo products
//!
//! Run with: cargo run --bin seed-data

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use sea_orm_migration::MigratorTrait;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use storefront_api::entities::product;
use storefront_api::migrator::Migrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("=== Storefront API Seed Data ===");

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://storefront.db?mode=rwc".to_string());

    let mut options = ConnectOptions::new(database_url.clone());
    options
        .max_connections(5)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10));

    info!("Connecting to database: {}", database_url);
    let db = Database::connect(options).await?;

    Migrator::up(&db, None).await?;

    info!("Creating products...");
    let count = create_products(&db).await?;
    info!("  Created {} products", count);

    info!("=== Seed Data Complete ===");
    info!("Try these API calls:");
    info!("  curl -H 'x-user-id: <uuid>' http://localhost:8080/api/v1/cart");
    info!("  curl http://localhost:8080/status");

    Ok(())
}

async fn create_products(db: &DatabaseConnection) -> anyhow::Result<usize> {
    let catalog = vec![
        ("Wireless Headphones", dec!(79.99), 120, "headphones.jpg"),
        ("Mechanical Keyboard", dec!(129.00), 45, "keyboard.jpg"),
        ("USB-C Hub", dec!(39.50), 200, "usb-hub.jpg"),
        ("Laptop Stand", dec!(49.99), 80, "laptop-stand.jpg"),
        ("Webcam 1080p", dec!(59.00), 60, "webcam.jpg"),
        ("Desk Mat", dec!(24.99), 150, "desk-mat.jpg"),
        ("Monitor Light Bar", dec!(89.99), 35, "light-bar.jpg"),
        ("Ergonomic Mouse", dec!(64.50), 95, "mouse.jpg"),
        ("Travel Charger 65W", dec!(45.00), 110, "charger.jpg"),
        ("Cable Organizer Set", dec!(12.99), 300, "organizer.jpg"),
    ];

    let count = catalog.len();
    for (name, price, stock, image) in catalog {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            image: Set(format!("/images/{}", image)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };
        model.insert(db).await?;
    }

    Ok(count)
}
