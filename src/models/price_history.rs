use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{HistorySource, generate_id};

/// A single observed price. Records are append-only; they are never mutated
/// or reordered after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PriceHistoryRecord {
    pub id: String,
    pub product_id: String,
    pub price: f64,
    pub price_change_percent: Option<f64>,
    pub checked_at: DateTime<Utc>,
    pub source: HistorySource,
}

impl PriceHistoryRecord {
    pub fn new(
        product_id: String,
        price: f64,
        price_change_percent: Option<f64>,
        source: HistorySource,
    ) -> Self {
        Self {
            id: generate_id(),
            product_id,
            price,
            price_change_percent,
            checked_at: Utc::now(),
            source,
        }
    }
}
