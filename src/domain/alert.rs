//! Price alerts that sell automatically once their condition holds.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use super::asset::AssetId;
use super::auth::UserId;
use super::error::{Entity, StocksimError};
use super::portfolio::PortfolioId;

pub type AlertId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCondition {
    /// price >= target
    Greater,
    /// price <= target
    Less,
}

impl AlertCondition {
    pub fn is_satisfied(&self, price: f64, target: f64) -> bool {
        match self {
            AlertCondition::Greater => price >= target,
            AlertCondition::Less => price <= target,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Greater => "greater",
            AlertCondition::Less => "less",
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCondition {
    type Err = StocksimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "greater" | ">=" | "above" => Ok(AlertCondition::Greater),
            "less" | "<=" | "below" => Ok(AlertCondition::Less),
            other => Err(StocksimError::validation(format!(
                "unknown alert condition '{other}'"
            ))),
        }
    }
}

/// Single lifecycle state. Only `Active` alerts are evaluated; `Paused` is the
/// toggled-off form of an active alert. `Triggered` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Active,
    Paused,
    Triggered,
    Cancelled,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Active => "active",
            AlertState::Paused => "paused",
            AlertState::Triggered => "triggered",
            AlertState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertState::Triggered | AlertState::Cancelled)
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = StocksimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AlertState::Active),
            "paused" => Ok(AlertState::Paused),
            "triggered" => Ok(AlertState::Triggered),
            "cancelled" => Ok(AlertState::Cancelled),
            other => Err(StocksimError::validation(format!(
                "unknown alert state '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: AlertId,
    pub user_id: UserId,
    pub portfolio_id: PortfolioId,
    pub asset_id: AssetId,
    pub target_price: f64,
    pub condition: AlertCondition,
    pub quantity: i64,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_satisfied_at(&self, price: f64) -> bool {
        self.condition.is_satisfied(price, self.target_price)
    }

    fn invalid(&self, to: AlertState) -> StocksimError {
        StocksimError::InvalidStateTransition {
            entity: Entity::Alert,
            id: self.id,
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// Active <-> Paused.
    pub fn toggled(&self) -> Result<AlertState, StocksimError> {
        match self.state {
            AlertState::Active => Ok(AlertState::Paused),
            AlertState::Paused => Ok(AlertState::Active),
            _ => Err(self.invalid(AlertState::Paused)),
        }
    }

    pub fn cancelled(&self) -> Result<AlertState, StocksimError> {
        if self.state.is_terminal() {
            return Err(self.invalid(AlertState::Cancelled));
        }
        Ok(AlertState::Cancelled)
    }

    pub fn triggered(&self) -> Result<AlertState, StocksimError> {
        match self.state {
            AlertState::Active => Ok(AlertState::Triggered),
            _ => Err(self.invalid(AlertState::Triggered)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub portfolio_id: PortfolioId,
    pub asset_id: AssetId,
    pub target_price: f64,
    pub condition: AlertCondition,
    pub quantity: i64,
}

impl NewAlert {
    pub fn validate(&self) -> Result<(), StocksimError> {
        if !self.target_price.is_finite() || self.target_price <= 0.0 {
            return Err(StocksimError::validation("target price must be positive"));
        }
        if self.quantity <= 0 {
            return Err(StocksimError::validation("alert quantity must be positive"));
        }
        Ok(())
    }
}

/// Insert payload once ownership and initial state are settled.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub user_id: UserId,
    pub alert: NewAlert,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub evaluated: usize,
    pub triggered: Vec<AlertId>,
    pub retried: Vec<(AlertId, String)>,
    pub skipped: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} evaluated, {} triggered, {} retried, {} skipped",
            self.evaluated,
            self.triggered.len(),
            self.retried.len(),
            self.skipped
        )
    }
}
