//! Price history port.

use chrono::{DateTime, Utc};

use crate::domain::asset::AssetId;
use crate::domain::error::StocksimError;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub asset_id: AssetId,
    pub recorded_at: DateTime<Utc>,
    pub price: f64,
}

pub trait PricePort: Send + Sync {
    /// Price trades execute at. `NotFound` for an unknown asset,
    /// `PriceUnavailable` when the asset has no usable price.
    fn current_price(&self, asset_id: AssetId) -> Result<f64, StocksimError>;

    /// Most recent sample, if any.
    fn latest_historical_price(&self, asset_id: AssetId) -> Result<Option<f64>, StocksimError>;

    /// First sample recorded at or after `at`.
    fn price_at_or_after(
        &self,
        asset_id: AssetId,
        at: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, StocksimError>;

    /// Feed side: append a sample and refresh the asset's current price.
    fn record_price(
        &self,
        asset_id: AssetId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StocksimError>;
}

/// Reject non-finite or non-positive quotes before they reach the ledger.
pub fn usable_price(asset_id: AssetId, price: Option<f64>) -> Result<f64, StocksimError> {
    match price {
        Some(p) if p.is_finite() && p > 0.0 => Ok(p),
        _ => Err(StocksimError::PriceUnavailable { asset_id }),
    }
}
