use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::config::AppConfig;

/// Pricing knobs resolved from configuration once, as exact decimals.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub shipping_flat_rate: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.08),
            free_shipping_threshold: dec!(100),
            shipping_flat_rate: dec!(9.99),
        }
    }
}

impl PricingConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        let defaults = Self::default();
        Self {
            tax_rate: Decimal::from_f64_retain(cfg.default_tax_rate)
                .unwrap_or(defaults.tax_rate),
            free_shipping_threshold: Decimal::from_f64_retain(cfg.free_shipping_threshold)
                .unwrap_or(defaults.free_shipping_threshold),
            shipping_flat_rate: Decimal::from_f64_retain(cfg.shipping_flat_rate)
                .unwrap_or(defaults.shipping_flat_rate),
        }
    }
}

/// Monetary breakdown for a cart or order, rounded to cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Computes shipping, tax and grand total from an item subtotal.
///
/// Shipping is waived once the subtotal reaches the free-shipping threshold
/// (inclusive). Tax applies to the item subtotal only, not to shipping.
pub fn compute_totals(subtotal: Decimal, cfg: &PricingConfig) -> Totals {
    let subtotal = subtotal.round_dp(2);
    let shipping_cost = if subtotal >= cfg.free_shipping_threshold {
        Decimal::ZERO
    } else {
        cfg.shipping_flat_rate
    };
    let tax = (subtotal * cfg.tax_rate).round_dp(2);
    let total = (subtotal + shipping_cost + tax).round_dp(2);

    Totals {
        subtotal,
        shipping_cost,
        tax,
        total,
    }
}
