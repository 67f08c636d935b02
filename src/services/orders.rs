use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    cart, cart_item, order, order_item, Cart, CartItem, Order, OrderItem, OrderItemModel,
    OrderModel,
};
use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::inventory::InventoryService;
use crate::services::pricing::{self, PricingConfig};

/// Order lifecycle service.
///
/// Materializes orders from carts in a single transaction: stock is
/// reserved with conditional decrements, item prices and names are
/// snapshotted, the cart is emptied, and a sequential order number is
/// assigned. Later transitions (payment capture, fulfilment, cancellation)
/// go through a fixed state machine.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    inventory: InventoryService,
    pricing: PricingConfig,
}

/// Structured postal address captured at checkout and frozen on the order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(length(min = 1, max = 200))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20))]
    pub zip: String,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Input for creating an order from the user's cart.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Input for advancing an order through its lifecycle.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusInput {
    pub status: OrderStatus,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// An order joined with its line items for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Compact status projection for polling endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct OrderStatusView {
    pub id: Uuid,
    pub order_number: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub tracking_number: Option<String>,
}

impl OrderService {
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

    /// Creates an order from the user's cart.
    ///
    /// Runs in one transaction: every line's stock is revalidated and
    /// decremented, totals are computed from the snapshotted prices, the
    /// next sequential order number is claimed, and the cart is emptied.
    /// Cash-on-delivery orders are confirmed immediately; gateway orders
    /// stay pending until the payment callback is verified.
    ///
    /// # Errors
    ///
    /// * `ServiceError::ValidationError` - bad address or discount
    /// * `ServiceError::EmptyCart` - the cart has no items
    /// * `ServiceError::InsufficientStock` - a line can no longer be covered
    /// * `ServiceError::Conflict` - order number collision under concurrency
    #[instrument(skip(self, input))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        // Validation happens before anything is written.
        input
            .shipping_address
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if let Some(billing) = &input.billing_address {
            billing
                .validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        }
        let discount = input.discount.unwrap_or(Decimal::ZERO).round_dp(2);
        if discount.is_sign_negative() {
            return Err(ServiceError::ValidationError(
                "Discount cannot be negative".to_string(),
            ));
        }

        let shipping_address = serde_json::to_value(&input.shipping_address)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        // Billing defaults to the shipping address when the buyer omits it.
        let billing_address = match &input.billing_address {
            Some(billing) => serde_json::to_value(billing),
            None => serde_json::to_value(&input.shipping_address),
        }
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        let txn = self.db.begin().await?;

        // Lock the cart row so a concurrent checkout of the same cart waits
        // here and then finds it already emptied.
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or(ServiceError::EmptyCart)?;

        let lines = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .find_also_related(crate::entities::Product)
            .all(&txn)
            .await?;

        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        // Reserve stock line by line; any failure rolls the whole order back.
        let mut subtotal = Decimal::ZERO;
        let mut snapshots = Vec::with_capacity(lines.len());
        for (item, product) in lines {
            let product = product.ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })?;

            self.inventory
                .reserve(&txn, product.id, item.quantity)
                .await?;

            subtotal += item.line_total();
            snapshots.push((item, product));
        }

        let totals = pricing::compute_totals(subtotal, &self.pricing);
        if discount > totals.total {
            return Err(ServiceError::ValidationError(
                "Discount exceeds order total".to_string(),
            ));
        }
        let grand_total = totals.total - discount;
        let order_number = self.next_order_number(&txn).await?;
        let order_id = Uuid::new_v4();
        let now = Utc::now();

        // COD orders skip the payment session and confirm right away.
        let order_status = match input.payment_method {
            PaymentMethod::CashOnDelivery => OrderStatus::Confirmed,
            PaymentMethod::Gateway => OrderStatus::Pending,
        };

        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            order_number: Set(order_number.clone()),
            shipping_address: Set(shipping_address),
            billing_address: Set(Some(billing_address)),
            payment_method: Set(input.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(order_status),
            subtotal: Set(totals.subtotal),
            shipping_cost: Set(totals.shipping_cost),
            tax: Set(totals.tax),
            discount: Set(discount),
            total: Set(grand_total),
            gateway_order_id: Set(None),
            gateway_payment_id: Set(None),
            gateway_signature: Set(None),
            notes: Set(input.notes),
            tracking_number: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            cancellation_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let order = order.insert(&txn).await.map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                warn!(order_number = %order_number, "Order number already taken");
                ServiceError::Conflict(
                    "Order number was claimed concurrently, please retry".to_string(),
                )
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        let mut items = Vec::with_capacity(snapshots.len());
        for (line, product) in snapshots {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                name: Set(product.name),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                image: Set(product.image),
                created_at: Set(now),
            };
            items.push(item.insert(&txn).await?);
        }

        // Empty the cart in the same transaction the order commits in.
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        let mut cart: cart::ActiveModel = cart.into();
        cart.total = Set(Decimal::ZERO);
        cart.updated_at = Set(now);
        cart.update(&txn).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;
        self.event_sender.send_or_log(Event::CartCleared(user_id)).await;

        info!(
            "Created order {} ({}) for user {}: total {}",
            order_id, order.order_number, user_id, order.total
        );
        Ok(OrderWithItems { order, items })
    }

    /// Fetches one of the user's orders with its items.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_owned(user_id, order_id).await?;
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(OrderWithItems { order, items })
    }

    /// Compact status lookup for polling.
    #[instrument(skip(self))]
    pub async fn get_order_status(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderStatusView, ServiceError> {
        let order = self.find_owned(user_id, order_id).await?;

        Ok(OrderStatusView {
            id: order.id,
            order_number: order.order_number,
            order_status: order.order_status,
            payment_status: order.payment_status,
            tracking_number: order.tracking_number,
        })
    }

    /// Lists the user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((data, total))
    }

    /// Records a successful payment capture.
    ///
    /// Settles with a single conditional update keyed on the order still
    /// being pending on both axes, so a duplicated callback can never
    /// double-apply and a late capture cannot revive a cancelled order.
    /// Replaying the same capture is a no-op; anything else that already
    /// settled or cancelled is an invalid transition.
    #[instrument(skip(self, gateway_signature))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        gateway_payment_id: &str,
        gateway_signature: &str,
    ) -> Result<OrderModel, ServiceError> {
        let result = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Paid),
            )
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Confirmed),
            )
            .col_expr(
                order::Column::GatewayPaymentId,
                Expr::value(gateway_payment_id),
            )
            .col_expr(
                order::Column::GatewaySignature,
                Expr::value(gateway_signature),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::OrderStatus.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await?;

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if result.rows_affected == 0 {
            // Duplicate delivery of the same capture is fine; anything else,
            // including a callback against a cancelled order, is a
            // conflicting settle attempt.
            let same_payment = order.payment_status == PaymentStatus::Paid
                && order.gateway_payment_id.as_deref() == Some(gateway_payment_id);
            if !same_payment {
                return Err(ServiceError::InvalidTransition(format!(
                    "Order {} is {}/{} and cannot settle",
                    order_id,
                    order.payment_status.to_value(),
                    order.order_status.to_value()
                )));
            }
            return Ok(order);
        }

        self.event_sender
            .send_or_log(Event::PaymentCaptured {
                order_id,
                gateway_payment_id: gateway_payment_id.to_string(),
            })
            .await;

        info!("Order {} marked paid", order_id);
        Ok(order)
    }

    /// Records a failed payment: the order is cancelled and its stock
    /// returned. Owner-scoped; replaying the failure is a no-op.
    #[instrument(skip(self))]
    pub async fn mark_failed(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        reason: &str,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        match order.payment_status {
            PaymentStatus::Pending => {}
            PaymentStatus::Failed => return Ok(order),
            other => {
                return Err(ServiceError::InvalidTransition(format!(
                    "Order {} payment is already {}",
                    order_id,
                    other.to_value()
                )));
            }
        }

        // An order the customer already cancelled has had its stock
        // returned; failing it again would restock twice.
        if order.order_status.is_terminal() {
            return Err(ServiceError::InvalidTransition(format!(
                "Order {} is already {}",
                order_id,
                order.order_status.to_value()
            )));
        }

        self.restock_items(&txn, order_id).await?;

        let old_status = order.order_status;
        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(PaymentStatus::Failed);
        active.order_status = Set(OrderStatus::Cancelled);
        active.cancelled_at = Set(Some(Utc::now()));
        active.cancellation_reason = Set(Some(reason.to_string()));
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::PaymentFailed(order_id)).await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_value().to_string(),
                new_status: OrderStatus::Cancelled.to_value().to_string(),
            })
            .await;

        warn!("Order {} payment failed: {}", order_id, reason);
        Ok(order)
    }

    /// Advances an order along the fulfilment state machine.
    ///
    /// Cancellation from a not-yet-shipped state returns stock; delivery
    /// stamps `delivered_at`. Terminal states reject further transitions.
    #[instrument(skip(self, input))]
    pub async fn update_status(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        input: UpdateStatusInput,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let from = order.order_status;
        let to = input.status;

        if !transition_allowed(&from, &to) {
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot move order from {} to {}",
                from.to_value(),
                to.to_value()
            )));
        }

        if to == OrderStatus::Cancelled {
            self.restock_items(&txn, order_id).await?;
        }

        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.order_status = Set(to);
        match to {
            OrderStatus::Shipped => {
                if let Some(tracking) = input.tracking_number {
                    active.tracking_number = Set(Some(tracking));
                }
            }
            OrderStatus::Delivered => {
                active.delivered_at = Set(Some(now));
            }
            OrderStatus::Cancelled => {
                active.cancelled_at = Set(Some(now));
                active.cancellation_reason =
                    Set(Some(input.reason.unwrap_or_else(|| {
                        "Cancelled by customer".to_string()
                    })));
            }
            _ => {}
        }
        active.updated_at = Set(now);
        let order = active.update(&txn).await?;

        txn.commit().await?;

        if to == OrderStatus::Cancelled {
            self.event_sender.send_or_log(Event::OrderCancelled(order_id)).await;
        }
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: from.to_value().to_string(),
                new_status: to.to_value().to_string(),
            })
            .await;

        Ok(order)
    }

    /// Claims the next sequential order number within the caller's
    /// transaction. The unique index on `order_number` backstops races;
    /// the insert maps a violation to `Conflict`.
    async fn next_order_number(&self, txn: &DatabaseTransaction) -> Result<String, ServiceError> {
        let count = Order::find().count(txn).await?;
        Ok(format!("ORD-{:06}", count + 1))
    }

    async fn restock_items(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;

        for item in items {
            self.inventory
                .release(txn, item.product_id, item.quantity)
                .await?;
        }

        Ok(())
    }

    async fn find_owned(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

/// Fulfilment state machine. Cancellation is allowed up until shipment;
/// delivered orders may only come back as returns.
pub fn transition_allowed(from: &OrderStatus, to: &OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Cancelled)
            | (Confirmed, Processing)
            | (Confirmed, Cancelled)
            | (Processing, Shipped)
            | (Processing, Cancelled)
            | (Shipped, Delivered)
            | (Delivered, Returned)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_allowed() {
        use OrderStatus::*;
        for (from, to) in [
            (Pending, Confirmed),
            (Confirmed, Processing),
            (Processing, Shipped),
            (Shipped, Delivered),
            (Delivered, Returned),
        ] {
            assert!(transition_allowed(&from, &to), "{:?} -> {:?}", from, to);
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        use OrderStatus::*;
        for to in [Pending, Confirmed, Processing, Shipped, Delivered, Returned] {
            assert!(!transition_allowed(&Cancelled, &to));
            assert!(!transition_allowed(&Returned, &to));
        }
    }

    #[test]
    fn shipped_orders_cannot_cancel() {
        use OrderStatus::*;
        assert!(!transition_allowed(&Shipped, &Cancelled));
        assert!(!transition_allowed(&Delivered, &Cancelled));
    }

    #[test]
    fn no_skipping_forward() {
        use OrderStatus::*;
        assert!(!transition_allowed(&Pending, &Shipped));
        assert!(!transition_allowed(&Confirmed, &Delivered));
    }
}
