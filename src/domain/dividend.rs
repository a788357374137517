//! Dividend records and their state machine.
//!
//! `Pending` is the only non-terminal state: it moves to `Paid` once every
//! holder has been credited, or to `Cancelled` with no payout.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

use super::asset::AssetId;
use super::error::{Entity, StocksimError};
use super::portfolio::PortfolioId;

pub type DividendId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividendState {
    Pending,
    Paid,
    Cancelled,
}

impl DividendState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DividendState::Pending => "pending",
            DividendState::Paid => "paid",
            DividendState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DividendState::Pending)
    }
}

impl fmt::Display for DividendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DividendState {
    type Err = StocksimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DividendState::Pending),
            "paid" => Ok(DividendState::Paid),
            "cancelled" => Ok(DividendState::Cancelled),
            other => Err(StocksimError::validation(format!(
                "unknown dividend state '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dividend {
    pub id: DividendId,
    pub asset_id: AssetId,
    pub pay_date: NaiveDate,
    pub amount_per_share: f64,
    pub state: DividendState,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Dividend {
    /// Validate a move out of the current state.
    pub fn transition(&self, to: DividendState) -> Result<DividendState, StocksimError> {
        match (self.state, to) {
            (DividendState::Pending, DividendState::Paid)
            | (DividendState::Pending, DividendState::Cancelled) => Ok(to),
            (from, to) => Err(StocksimError::InvalidStateTransition {
                entity: Entity::Dividend,
                id: self.id,
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDividend {
    pub asset_id: AssetId,
    pub pay_date: NaiveDate,
    pub amount_per_share: f64,
    pub created_at: DateTime<Utc>,
}

/// One holder's credit from a distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct DividendPayout {
    pub dividend_id: DividendId,
    pub portfolio_id: PortfolioId,
    pub quantity: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionReport {
    pub dividend: Dividend,
    pub payouts: Vec<DividendPayout>,
}

impl DistributionReport {
    pub fn holders(&self) -> usize {
        self.payouts.len()
    }

    pub fn total_shares(&self) -> i64 {
        self.payouts.iter().map(|p| p.quantity).sum()
    }

    pub fn total_paid(&self) -> f64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

/// Result of one scheduled generation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationReport {
    pub created: Vec<Dividend>,
    pub skipped: Vec<AssetId>,
    pub failed: Vec<(AssetId, String)>,
}
