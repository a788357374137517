//! Tradable assets and their dividend configuration.

use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

use super::error::StocksimError;

pub type AssetId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividendFrequency {
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

impl DividendFrequency {
    /// Minimum days between two dividends.
    pub fn threshold_days(&self) -> i64 {
        match self {
            DividendFrequency::Monthly => 30,
            DividendFrequency::Quarterly => 90,
            DividendFrequency::Semiannual => 180,
            DividendFrequency::Annual => 365,
        }
    }

    /// Divisor applied to the annual percentage to get one payout.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            DividendFrequency::Monthly => 12.0,
            DividendFrequency::Quarterly => 4.0,
            DividendFrequency::Semiannual => 2.0,
            DividendFrequency::Annual => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DividendFrequency::Monthly => "monthly",
            DividendFrequency::Quarterly => "quarterly",
            DividendFrequency::Semiannual => "semiannual",
            DividendFrequency::Annual => "annual",
        }
    }
}

impl fmt::Display for DividendFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DividendFrequency {
    type Err = StocksimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(DividendFrequency::Monthly),
            "quarterly" => Ok(DividendFrequency::Quarterly),
            "semiannual" | "semi-annual" => Ok(DividendFrequency::Semiannual),
            "annual" | "yearly" => Ok(DividendFrequency::Annual),
            other => Err(StocksimError::validation(format!(
                "unknown dividend frequency '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    /// Annual dividend yield in percent of the current price.
    pub dividend_pct: f64,
    pub dividend_frequency: DividendFrequency,
    pub last_dividend_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAsset {
    pub symbol: String,
    pub name: String,
    pub current_price: Option<f64>,
    pub dividend_pct: f64,
    pub dividend_frequency: DividendFrequency,
}

impl NewAsset {
    pub fn validate(&self) -> Result<(), StocksimError> {
        if self.symbol.trim().is_empty() {
            return Err(StocksimError::validation("asset symbol must not be empty"));
        }
        if let Some(price) = self.current_price {
            if !price.is_finite() || price <= 0.0 {
                return Err(StocksimError::validation("asset price must be positive"));
            }
        }
        if !self.dividend_pct.is_finite() || self.dividend_pct < 0.0 {
            return Err(StocksimError::validation(
                "dividend percentage must be non-negative",
            ));
        }
        Ok(())
    }
}

impl Asset {
    pub fn pays_dividends(&self) -> bool {
        self.dividend_pct > 0.0
    }

    /// Whether a new dividend is due on `today`.
    pub fn should_pay_dividend(&self, today: NaiveDate) -> bool {
        match self.last_dividend_date {
            None => true,
            Some(last) => {
                let elapsed = (today - last).num_days();
                elapsed >= self.dividend_frequency.threshold_days()
            }
        }
    }

    /// Cash paid per share for one period at `price`.
    pub fn dividend_amount_per_share(&self, price: f64) -> f64 {
        price * (self.dividend_pct / 100.0) / self.dividend_frequency.periods_per_year()
    }
}
