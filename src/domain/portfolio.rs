//! Portfolio cash balance and valuation.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::asset::AssetId;
use super::auth::UserId;
use super::position::Position;

pub type PortfolioId = i64;

/// Balance given to a lazily created portfolio when no config overrides it.
pub const DEFAULT_STARTING_BALANCE: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub user_id: UserId,
    pub name: String,
    pub balance: f64,
    pub created_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

/// Portfolio with its holdings, valued at the supplied prices.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSummary {
    pub portfolio: Portfolio,
    pub positions: Vec<Position>,
    pub prices: HashMap<AssetId, f64>,
}

impl PortfolioSummary {
    /// Market value of one position; falls back to average cost when unpriced.
    pub fn position_value(&self, position: &Position) -> f64 {
        let price = self
            .prices
            .get(&position.asset_id)
            .copied()
            .unwrap_or(position.average_price);
        position.market_value(price)
    }

    pub fn holdings_value(&self) -> f64 {
        self.positions.iter().map(|p| self.position_value(p)).sum()
    }

    pub fn total_equity(&self) -> f64 {
        self.portfolio.balance + self.holdings_value()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.holdings_value() - self.positions.iter().map(Position::cost_basis).sum::<f64>()
    }
}
