use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
    Unknown,
}

impl StockStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::LowStock => "low_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_stock" => Ok(StockStatus::InStock),
            "low_stock" => Ok(StockStatus::LowStock),
            "out_of_stock" => Ok(StockStatus::OutOfStock),
            "unknown" => Ok(StockStatus::Unknown),
            other => Err(CoreError::UnknownStockStatus(other.to_string())),
        }
    }
}

/// One observation of an entity's standing within a category.
///
/// Snapshots are append-only; a series is the set of snapshots sharing an
/// `(entity_id, category_id)` pair, ordered by `observed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_id: String,
    pub category_id: String,
    /// Position in the category, 1 is best.
    pub rank: i32,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub rating: Option<Decimal>,
    #[serde(default)]
    pub review_count: Option<i32>,
    #[serde(default)]
    pub stock_status: Option<StockStatus>,
    pub observed_at: DateTime<Utc>,
}

impl Snapshot {
    #[must_use]
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.entity_id, &self.category_id)
    }
}

/// Identifies one tracked `(entity, category)` series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub entity_id: String,
    pub category_id: String,
}

impl SeriesKey {
    #[must_use]
    pub fn new(entity_id: &str, category_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            category_id: category_id.to_string(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.category_id)
    }
}
