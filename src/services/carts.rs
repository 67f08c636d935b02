use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{cart, cart_item, Cart, CartItem, CartModel, Product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::inventory::InventoryService;
use crate::services::pricing::{self, PricingConfig};

/// Shopping cart service.
///
/// Each user has at most one open cart, created lazily on first write. Item
/// rows snapshot the product price at the time they were added; mutating an
/// item refreshes the snapshot to the current catalog price. The cart's
/// stored total is always the sum of its line totals.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    inventory: InventoryService,
    pricing: PricingConfig,
}

/// A cart joined with its items for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartItemView>,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartItemView {
    pub product_id: Uuid,
    pub name: String,
    pub image: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Checkout preview: the cart subtotal with shipping and tax applied.
#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub item_count: i32,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        inventory: InventoryService,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            inventory,
            pricing,
        }
    }

    /// Adds a product to the user's cart, merging with an existing line.
    ///
    /// The merged quantity must be coverable by current stock; the price
    /// snapshot on the line is refreshed to the product's current price.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - quantity below 1
    /// * `ServiceError::NotFound` - product missing or inactive
    /// * `ServiceError::InsufficientStock` - merged quantity exceeds stock
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = self.get_or_create_cart(&txn, user_id).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        let merged_quantity = quantity + existing.as_ref().map_or(0, |i| i.quantity);
        let product = self
            .inventory
            .check_availability(&txn, product_id, merged_quantity)
            .await?;

        if let Some(item) = existing {
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(merged_quantity);
            item.unit_price = Set(product.price);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product_id),
                quantity: Set(quantity),
                unit_price: Set(product.price),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        self.recalculate_total(&txn, cart.id).await?;
        let view = self.load_view(&txn, cart.id, user_id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
                quantity,
            })
            .await;

        info!(
            "Added item to cart {}: product {} x{}",
            cart.id, product_id, quantity
        );
        Ok(view)
    }

    /// Sets the quantity of a cart line; zero removes the line.
    ///
    /// The price snapshot is refreshed to the current catalog price.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = self.find_cart(&txn, user_id).await?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        if quantity == 0 {
            CartItem::delete_by_id(item.id).exec(&txn).await?;
        } else {
            let product = self
                .inventory
                .check_availability(&txn, product_id, quantity)
                .await?;

            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity);
            item.unit_price = Set(product.price);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        }

        self.recalculate_total(&txn, cart.id).await?;
        let view = self.load_view(&txn, cart.id, user_id).await?;
        txn.commit().await?;

        let event = if quantity == 0 {
            Event::CartItemRemoved {
                cart_id: cart.id,
                product_id,
            }
        } else {
            Event::CartItemUpdated {
                cart_id: cart.id,
                product_id,
                quantity,
            }
        };
        self.event_sender.send_or_log(event).await;

        Ok(view)
    }

    /// Removes a product's line from the cart. Idempotent: removing a
    /// product that is not in the cart leaves it unchanged.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.get_or_create_cart(&txn, user_id).await?;

        let deleted = CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        self.recalculate_total(&txn, cart.id).await?;
        let view = self.load_view(&txn, cart.id, user_id).await?;
        txn.commit().await?;

        if deleted.rows_affected > 0 {
            self.event_sender
                .send_or_log(Event::CartItemRemoved {
                    cart_id: cart.id,
                    product_id,
                })
                .await;
        }

        Ok(view)
    }

    /// Empties the user's cart. A cart that never existed is treated as
    /// already empty.
    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = self.get_or_create_cart(&txn, user_id).await?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        self.recalculate_total(&txn, cart.id).await?;
        let view = self.load_view(&txn, cart.id, user_id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;

        Ok(view)
    }

    /// Returns the user's cart with items. A user with no cart yet gets an
    /// empty view rather than an error.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?;

        match cart {
            Some(cart) => self.load_view(&*self.db, cart.id, user_id).await,
            None => Ok(CartView {
                id: Uuid::nil(),
                user_id,
                items: Vec::new(),
                total: Decimal::ZERO,
            }),
        }
    }

    /// Prices the cart as it would check out: subtotal, shipping and tax.
    #[instrument(skip(self))]
    pub async fn get_summary(&self, user_id: Uuid) -> Result<CartSummary, ServiceError> {
        let view = self.get_cart(user_id).await?;

        let item_count = view.items.iter().map(|i| i.quantity).sum();
        let subtotal: Decimal = view.items.iter().map(|i| i.line_total).sum();
        let totals = pricing::compute_totals(subtotal, &self.pricing);

        Ok(CartSummary {
            item_count,
            subtotal: money(totals.subtotal),
            shipping_cost: money(totals.shipping_cost),
            tax: money(totals.tax),
            total: money(totals.total),
        })
    }

    /// Fetches the user's cart with a row lock, serializing concurrent
    /// mutations of the same cart on backends that honor SELECT FOR UPDATE.
    async fn find_cart(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for user {} not found", user_id)))
    }

    async fn get_or_create_cart(
        &self,
        txn: &DatabaseTransaction,
        user_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        if let Some(cart) = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .lock_exclusive()
            .one(txn)
            .await?
        {
            return Ok(cart);
        }

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            total: Set(Decimal::ZERO),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        Ok(cart.insert(txn).await?)
    }

    async fn recalculate_total(
        &self,
        txn: &DatabaseTransaction,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(txn)
            .await?;

        let total: Decimal = items.iter().map(|i| i.line_total()).sum();

        let cart = Cart::find_by_id(cart_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let mut cart: cart::ActiveModel = cart.into();
        cart.total = Set(total.round_dp(2));
        cart.updated_at = Set(Utc::now());
        cart.update(txn).await?;

        Ok(())
    }

    async fn load_view<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
        user_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let rows = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .find_also_related(Product)
            .all(conn)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for (item, product) in rows {
            let product = product.ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;
            items.push(CartItemView {
                product_id: item.product_id,
                name: product.name,
                image: product.image,
                unit_price: money(item.unit_price),
                quantity: item.quantity,
                line_total: money(item.line_total()),
            });
        }

        let total = money(items.iter().map(|i| i.line_total).sum::<Decimal>());

        Ok(CartView {
            id: cart_id,
            user_id,
            items,
            total,
        })
    }
}

/// SQLite hands decimals back with trailing zeros collapsed; API money
/// fields always carry exactly two decimal places.
fn money(mut amount: Decimal) -> Decimal {
    amount.rescale(2);
    amount
}
