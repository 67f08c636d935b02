use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument};

use crate::config::AppConfig;
use crate::errors::ServiceError;

/// Request to open an order on the payment gateway. Amounts are in minor
/// units (e.g. cents), as the gateway API requires.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayOrderRequest {
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
}

/// Gateway-side order handle returned when a payment session is opened.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

/// Outbound interface to the payment gateway.
///
/// Kept as a trait so tests can substitute a deterministic gateway without
/// network access.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens an order on the gateway and returns its handle.
    async fn create_order(&self, request: GatewayOrderRequest) -> Result<GatewayOrder, ServiceError>;
}

/// HTTP client for a Razorpay-style gateway API.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            key_id,
            key_secret,
        }
    }

    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.gateway_base_url.clone(),
            cfg.gateway_key_id.clone(),
            cfg.gateway_key_secret.clone(),
            Duration::from_secs(cfg.gateway_timeout_secs),
        )
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(receipt = %request.receipt))]
    async fn create_order(&self, request: GatewayOrderRequest) -> Result<GatewayOrder, ServiceError> {
        let url = format!("{}/orders", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Payment gateway request failed: {}", e);
                ServiceError::GatewayError(format!("Gateway request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Payment gateway returned an error: {}", body);
            return Err(ServiceError::GatewayError(format!(
                "Gateway returned status {}",
                status
            )));
        }

        response.json::<GatewayOrder>().await.map_err(|e| {
            error!("Failed to decode gateway response: {}", e);
            ServiceError::GatewayError(format!("Invalid gateway response: {}", e))
        })
    }
}
