//! Holdings and weighted-average cost arithmetic.
//!
//! A position row never exists with zero quantity: a sell that empties it
//! yields [`PositionChange::Closed`] and the row is deleted.

use super::asset::AssetId;
use super::error::StocksimError;
use super::portfolio::PortfolioId;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub portfolio_id: PortfolioId,
    pub asset_id: AssetId,
    pub quantity: i64,
    pub average_price: f64,
}

/// Outcome of applying a fill to an existing (or absent) position.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionChange {
    Opened(Position),
    Updated(Position),
    Closed,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity as f64 * price
    }

    pub fn cost_basis(&self) -> f64 {
        self.quantity as f64 * self.average_price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity as f64 * (price - self.average_price)
    }
}

/// (old_qty * old_avg + qty * price) / (old_qty + qty)
pub fn weighted_average(old_qty: i64, old_avg: f64, qty: i64, price: f64) -> f64 {
    let total = old_qty as f64 + qty as f64;
    (old_qty as f64 * old_avg + qty as f64 * price) / total
}

pub fn apply_buy(
    existing: Option<&Position>,
    portfolio_id: PortfolioId,
    asset_id: AssetId,
    quantity: i64,
    price: f64,
) -> Result<PositionChange, StocksimError> {
    match existing {
        Some(pos) => {
            let total = pos
                .quantity
                .checked_add(quantity)
                .ok_or_else(|| StocksimError::validation("position quantity overflow"))?;
            Ok(PositionChange::Updated(Position {
                portfolio_id,
                asset_id,
                quantity: total,
                average_price: weighted_average(pos.quantity, pos.average_price, quantity, price),
            }))
        }
        None => Ok(PositionChange::Opened(Position {
            portfolio_id,
            asset_id,
            quantity,
            average_price: price,
        })),
    }
}

/// Reduce a holding. Average cost is unchanged by a partial sell.
pub fn apply_sell(existing: Option<&Position>, quantity: i64) -> Result<PositionChange, StocksimError> {
    let held = existing.map(|p| p.quantity).unwrap_or(0);
    let pos = match existing {
        Some(pos) if pos.quantity >= quantity => pos,
        _ => {
            return Err(StocksimError::InsufficientHoldings {
                requested: quantity,
                held,
            });
        }
    };

    let remaining = pos.quantity - quantity;
    if remaining == 0 {
        Ok(PositionChange::Closed)
    } else {
        Ok(PositionChange::Updated(Position {
            quantity: remaining,
            ..pos.clone()
        }))
    }
}
