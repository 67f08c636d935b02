use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{product, Product, ProductModel};
use crate::errors::ServiceError;

/// Stock guarding for products.
///
/// Reservation is a single conditional UPDATE so concurrent checkouts cannot
/// both take the last unit. Callers run it inside their own transaction.
#[derive(Clone, Default)]
pub struct InventoryService;

impl InventoryService {
    pub fn new() -> Self {
        Self
    }

    /// Fetches a product and checks it is active with enough stock.
    ///
    /// This is a read-only precheck; `reserve` is what actually guards stock.
    #[instrument(skip(self, conn))]
    pub async fn check_availability<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<ProductModel, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if !product.is_active {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        if product.stock < quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Product '{}' has {} in stock, {} requested",
                product.name, product.stock, quantity
            )));
        }

        Ok(product)
    }

    /// Atomically decrements stock, failing when not enough remains.
    ///
    /// The decrement and the stock check happen in one statement, so two
    /// concurrent reservations can never oversell.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let result = Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(
                product::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::Stock.gte(quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            // Distinguish a missing product from an out-of-stock one
            let product = Product::find_by_id(product_id).one(conn).await?;
            return match product {
                Some(p) if p.is_active => Err(ServiceError::InsufficientStock(format!(
                    "Product '{}' has {} in stock, {} requested",
                    p.name, p.stock, quantity
                ))),
                _ => Err(ServiceError::NotFound(format!(
                    "Product {} not found",
                    product_id
                ))),
            };
        }

        info!(product_id = %product_id, quantity, "Reserved stock");
        Ok(())
    }

    /// Returns previously reserved stock, e.g. when a payment fails.
    #[instrument(skip(self, conn))]
    pub async fn release<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        Product::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(
                product::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(product::Column::Id.eq(product_id))
            .exec(conn)
            .await?;

        info!(product_id = %product_id, quantity, "Released stock");
        Ok(())
    }
}
