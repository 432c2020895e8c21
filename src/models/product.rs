use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::generate_id;

/// Consecutive failed checks after which a product is deactivated.
pub const ERROR_DEACTIVATION_CEILING: i64 = 5;

/// Default fractional drop that counts as a promotion (0.1 = 10%).
pub const DEFAULT_PROMOTION_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Product {
    pub id: String,
    pub url: String,
    pub name: String,

    // Pricing
    pub current_price: Option<f64>,
    pub last_price: Option<f64>,
    pub target_price: Option<f64>,
    pub promotion_threshold: f64,

    // Monitoring state
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub check_count: i64,
    pub error_count: i64,
    pub last_error: Option<String>,

    // Ownership (opaque, meaningful only to the notification layer)
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub user_id: Option<String>,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub url: String,
    pub name: String,
    pub target_price: Option<f64>,
    pub promotion_threshold: Option<f64>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub user_id: Option<String>,
}

/// Outcome of shifting a product's price, returned by `ProductStore::update_price`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceUpdate {
    pub old_price: Option<f64>,
    pub new_price: f64,
    pub price_change_percent: Option<f64>,
}

impl PriceUpdate {
    pub fn compute(old_price: Option<f64>, new_price: f64) -> Self {
        let price_change_percent = match old_price {
            Some(old) if old > 0.0 => Some((new_price - old) / old * 100.0),
            _ => None,
        };
        Self {
            old_price,
            new_price,
            price_change_percent,
        }
    }
}

impl Product {
    pub fn new(new_product: NewProduct) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            url: new_product.url,
            name: new_product.name,
            current_price: None,
            last_price: None,
            target_price: new_product.target_price,
            promotion_threshold: new_product
                .promotion_threshold
                .unwrap_or(DEFAULT_PROMOTION_THRESHOLD),
            is_active: true,
            last_checked_at: None,
            check_count: 0,
            error_count: 0,
            last_error: None,
            channel_id: new_product.channel_id,
            guild_id: new_product.guild_id,
            user_id: new_product.user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the product should be picked up by a scheduled check cycle.
    pub fn is_due(&self, interval_minutes: u64, now: DateTime<Utc>) -> bool {
        if !self.is_active || self.error_count >= ERROR_DEACTIVATION_CEILING {
            return false;
        }

        match self.last_checked_at {
            Some(last) => now - last >= Duration::minutes(interval_minutes as i64),
            None => true, // Never checked before
        }
    }
}
