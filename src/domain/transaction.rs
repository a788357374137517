//! Immutable trade records.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use super::asset::AssetId;
use super::auth::UserId;
use super::error::StocksimError;
use super::portfolio::PortfolioId;

pub type TransactionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Signed quantity as stored in the ledger: buys positive, sells negative.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

impl FromStr for Side {
    type Err = StocksimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(StocksimError::validation(format!("unknown side '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub portfolio_id: PortfolioId,
    pub asset_id: AssetId,
    pub quantity: i64,
    pub price: f64,
    pub executed_at: DateTime<Utc>,
}

impl Transaction {
    pub fn side(&self) -> Side {
        if self.quantity > 0 { Side::Buy } else { Side::Sell }
    }

    /// Cash effect on the portfolio balance.
    pub fn cash_delta(&self) -> f64 {
        -(self.quantity as f64) * self.price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub portfolio_id: PortfolioId,
    pub asset_id: AssetId,
    pub quantity: i64,
    pub price: f64,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_quantity() {
        assert_eq!(Side::Buy.signed(5), 5);
        assert_eq!(Side::Sell.signed(5), -5);
    }

    #[test]
    fn side_from_signed_record() {
        let mut tx = Transaction {
            id: 1,
            user_id: 1,
            portfolio_id: 1,
            asset_id: 1,
            quantity: -3,
            price: 10.0,
            executed_at: Utc::now(),
        };
        assert_eq!(tx.side(), Side::Sell);
        assert_eq!(tx.cash_delta(), 30.0);
        tx.quantity = 3;
        assert_eq!(tx.side(), Side::Buy);
        assert_eq!(tx.cash_delta(), -30.0);
    }

    #[test]
    fn side_parses() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Sell);
        assert!("short".parse::<Side>().is_err());
    }
}
