use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, PaymentMethod, PaymentStatus};
use crate::entities::{Order, OrderModel};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{GatewayOrderRequest, PaymentGateway};
use crate::services::orders::OrderService;

type HmacSha256 = Hmac<Sha256>;

/// Payment session and callback handling for gateway-paid orders.
///
/// A session mirrors the order on the gateway; the browser completes the
/// payment there and the storefront is told the outcome through a signed
/// callback. The callback signature is HMAC-SHA256 over
/// `"{gateway_order_id}|{gateway_payment_id}"` with the gateway key secret.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    key_secret: String,
    currency: String,
}

/// Session details the frontend needs to launch the gateway checkout.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
}

/// Signed callback payload posted back after a gateway payment.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

/// Payload reporting an abandoned or declined gateway payment.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentFailure {
    pub order_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderService,
        key_secret: String,
        currency: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            orders,
            key_secret,
            currency,
        }
    }

    /// Opens a payment session on the gateway for a pending order.
    ///
    /// Reopening a session (e.g. after the browser was closed) replaces the
    /// stored gateway order id, so only the latest session can settle.
    ///
    /// # Errors
    ///
    /// * `ServiceError::NotFound` - order missing or owned by someone else
    /// * `ServiceError::InvalidTransition` - order is not awaiting payment
    /// * `ServiceError::ValidationError` - order is cash-on-delivery
    /// * `ServiceError::GatewayError` - gateway rejected or timed out
    #[instrument(skip(self))]
    pub async fn open_session(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<PaymentSession, ServiceError> {
        let order = self.find_owned(user_id, order_id).await?;

        if order.payment_method != PaymentMethod::Gateway {
            return Err(ServiceError::ValidationError(
                "Cash-on-delivery orders are not paid through the gateway".to_string(),
            ));
        }
        if order.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::InvalidTransition(format!(
                "Order {} is not awaiting payment",
                order_id
            )));
        }

        let amount = to_minor_units(order.total);
        let gateway_order = self
            .gateway
            .create_order(GatewayOrderRequest {
                amount,
                currency: self.currency.clone(),
                receipt: order.order_number.clone(),
            })
            .await?;

        let mut active: order::ActiveModel = order.into();
        active.gateway_order_id = Set(Some(gateway_order.id.clone()));
        active.updated_at = Set(chrono::Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentSessionOpened {
                order_id,
                gateway_order_id: gateway_order.id.clone(),
            })
            .await;

        info!(
            "Opened payment session for order {}: gateway order {}",
            order_id, gateway_order.id
        );
        Ok(PaymentSession {
            order_id,
            gateway_order_id: gateway_order.id,
            amount,
            currency: self.currency.clone(),
        })
    }

    /// Verifies a signed gateway callback and settles the order.
    ///
    /// The signature is checked before anything else, in constant time.
    /// The callback's gateway order id must match the session stored on the
    /// order; a stale or replayed session is rejected as a mismatch.
    ///
    /// # Errors
    ///
    /// * `ServiceError::InvalidSignature` - HMAC check failed
    /// * `ServiceError::Mismatch` - callback names a different session
    /// * `ServiceError::InvalidTransition` - order already settled otherwise
    #[instrument(skip(self, callback), fields(order_id = %callback.order_id))]
    pub async fn verify_callback(
        &self,
        callback: PaymentCallback,
    ) -> Result<OrderModel, ServiceError> {
        let expected = sign_callback(
            &self.key_secret,
            &callback.gateway_order_id,
            &callback.gateway_payment_id,
        );
        if !constant_time_eq(&expected, &callback.signature) {
            warn!("Rejected payment callback with bad signature");
            return Err(ServiceError::InvalidSignature);
        }

        let order = Order::find_by_id(callback.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", callback.order_id))
            })?;

        match order.gateway_order_id.as_deref() {
            Some(stored) if stored == callback.gateway_order_id => {}
            _ => {
                warn!("Payment callback names an unknown gateway session");
                return Err(ServiceError::Mismatch(
                    "Callback does not match the order's payment session".to_string(),
                ));
            }
        }

        self.orders
            .mark_paid(
                callback.order_id,
                &callback.gateway_payment_id,
                &callback.signature,
            )
            .await
    }

    /// Records a declined or abandoned gateway payment for one of the
    /// caller's orders: the order is cancelled and its stock restored.
    #[instrument(skip(self))]
    pub async fn record_failure(
        &self,
        user_id: Uuid,
        failure: PaymentFailure,
    ) -> Result<OrderModel, ServiceError> {
        let reason = failure.reason.unwrap_or_else(|| "Payment failed".to_string());
        self.orders
            .mark_failed(user_id, failure.order_id, &reason)
            .await
    }

    async fn find_owned(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        use sea_orm::{ColumnTrait, QueryFilter};

        Order::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

/// Signs `"{gateway_order_id}|{gateway_payment_id}"` with HMAC-SHA256.
pub fn sign_callback(secret: &str, gateway_order_id: &str, gateway_payment_id: &str) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(gateway_payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Converts a decimal amount to gateway minor units (cents).
fn to_minor_units(amount: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;

    (amount * dec!(100)).round().to_i64().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_hex() {
        let sig = sign_callback("secret", "gw_order_1", "gw_pay_1");
        assert_eq!(sig, sign_callback("secret", "gw_order_1", "gw_pay_1"));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_varies_with_inputs() {
        let base = sign_callback("secret", "gw_order_1", "gw_pay_1");
        assert_ne!(base, sign_callback("other", "gw_order_1", "gw_pay_1"));
        assert_ne!(base, sign_callback("secret", "gw_order_2", "gw_pay_1"));
        assert_ne!(base, sign_callback("secret", "gw_order_1", "gw_pay_2"));
    }

    #[test]
    fn constant_time_eq_requires_exact_match() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("abc123", "abc12"));
    }

    #[test]
    fn minor_units_round_to_cents() {
        assert_eq!(to_minor_units(dec!(42.39)), 4239);
        assert_eq!(to_minor_units(dec!(108.00)), 10800);
        assert_eq!(to_minor_units(dec!(1.237)), 124);
    }
}
