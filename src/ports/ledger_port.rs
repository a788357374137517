//! Persistence port: one repository trait per entity, composed into a unit of work.
//!
//! Every read and write goes through a [`UnitOfWork`] obtained from
//! [`LedgerPort::begin`]. A unit of work holds the store's write lock until it
//! is committed or dropped; dropping it without `commit` rolls back.

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::alert::{Alert, AlertId, AlertRecord, AlertState};
use crate::domain::asset::{Asset, AssetId, NewAsset};
use crate::domain::auth::{Role, User, UserId};
use crate::domain::dividend::{
    Dividend, DividendId, DividendPayout, DividendState, NewDividend,
};
use crate::domain::error::StocksimError;
use crate::domain::portfolio::{Portfolio, PortfolioId};
use crate::domain::position::Position;
use crate::domain::transaction::{NewTransaction, Transaction};

pub trait UserRepository {
    fn user(&mut self, id: UserId) -> Result<Option<User>, StocksimError>;

    fn user_by_name(&mut self, username: &str) -> Result<Option<User>, StocksimError>;

    fn users(&mut self) -> Result<Vec<User>, StocksimError>;

    fn insert_user(&mut self, username: &str, role: Role) -> Result<User, StocksimError>;

    fn set_user_suspended(&mut self, id: UserId, suspended: bool) -> Result<(), StocksimError>;

    /// Cascades to the user's portfolios, positions, transactions and alerts.
    fn delete_user(&mut self, id: UserId) -> Result<(), StocksimError>;
}

pub trait PortfolioRepository {
    fn portfolio(&mut self, id: PortfolioId) -> Result<Option<Portfolio>, StocksimError>;

    fn portfolios_for_user(&mut self, user_id: UserId) -> Result<Vec<Portfolio>, StocksimError>;

    fn insert_portfolio(
        &mut self,
        user_id: UserId,
        name: &str,
        balance: f64,
        created_at: DateTime<Utc>,
    ) -> Result<Portfolio, StocksimError>;

    fn set_balance(&mut self, id: PortfolioId, balance: f64) -> Result<(), StocksimError>;

    /// Add `amount` to the stored balance without a prior read.
    fn credit_balance(&mut self, id: PortfolioId, amount: f64) -> Result<(), StocksimError>;
}

pub trait PositionRepository {
    fn position(
        &mut self,
        portfolio_id: PortfolioId,
        asset_id: AssetId,
    ) -> Result<Option<Position>, StocksimError>;

    fn positions_for_portfolio(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Position>, StocksimError>;

    /// Positions in `asset_id` with quantity > 0, ordered by portfolio.
    fn holders_of(&mut self, asset_id: AssetId) -> Result<Vec<Position>, StocksimError>;

    /// Insert or replace the (portfolio, asset) row.
    fn save_position(&mut self, position: &Position) -> Result<(), StocksimError>;

    fn delete_position(
        &mut self,
        portfolio_id: PortfolioId,
        asset_id: AssetId,
    ) -> Result<(), StocksimError>;
}

pub trait TransactionRepository {
    fn append_transaction(&mut self, tx: &NewTransaction) -> Result<Transaction, StocksimError>;

    /// Oldest first.
    fn transactions_for_portfolio(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Transaction>, StocksimError>;

    /// Sum of signed quantities per asset.
    fn net_quantities(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<(AssetId, i64)>, StocksimError>;

    fn count_transactions_for_asset(&mut self, asset_id: AssetId) -> Result<i64, StocksimError>;
}

pub trait AssetRepository {
    fn asset(&mut self, id: AssetId) -> Result<Option<Asset>, StocksimError>;

    fn asset_by_symbol(&mut self, symbol: &str) -> Result<Option<Asset>, StocksimError>;

    fn assets(&mut self) -> Result<Vec<Asset>, StocksimError>;

    fn insert_asset(&mut self, asset: &NewAsset) -> Result<Asset, StocksimError>;

    fn set_last_dividend_date(&mut self, id: AssetId, date: NaiveDate)
    -> Result<(), StocksimError>;

    fn delete_asset(&mut self, id: AssetId) -> Result<(), StocksimError>;
}

pub trait DividendRepository {
    fn insert_dividend(&mut self, dividend: &NewDividend) -> Result<Dividend, StocksimError>;

    fn dividend(&mut self, id: DividendId) -> Result<Option<Dividend>, StocksimError>;

    fn dividends(&mut self, state: Option<DividendState>) -> Result<Vec<Dividend>, StocksimError>;

    fn set_dividend_state(
        &mut self,
        id: DividendId,
        state: DividendState,
        settled_at: DateTime<Utc>,
    ) -> Result<(), StocksimError>;

    fn record_payout(&mut self, payout: &DividendPayout) -> Result<(), StocksimError>;

    fn payouts(&mut self, id: DividendId) -> Result<Vec<DividendPayout>, StocksimError>;
}

pub trait AlertRepository {
    fn insert_alert(&mut self, record: &AlertRecord) -> Result<Alert, StocksimError>;

    fn alert(&mut self, id: AlertId) -> Result<Option<Alert>, StocksimError>;

    fn alerts_for_user(&mut self, user_id: UserId) -> Result<Vec<Alert>, StocksimError>;

    fn alerts_in_state(&mut self, state: AlertState) -> Result<Vec<Alert>, StocksimError>;

    fn set_alert_state(
        &mut self,
        id: AlertId,
        state: AlertState,
        triggered_at: Option<DateTime<Utc>>,
    ) -> Result<(), StocksimError>;

    fn delete_alert(&mut self, id: AlertId) -> Result<(), StocksimError>;
}

/// A single atomic batch over every repository.
pub trait UnitOfWork:
    UserRepository
    + PortfolioRepository
    + PositionRepository
    + TransactionRepository
    + AssetRepository
    + DividendRepository
    + AlertRepository
{
    fn commit(self: Box<Self>) -> Result<(), StocksimError>;
}

pub trait LedgerPort: Send + Sync {
    /// Open a unit of work. Writers are serialised: a second `begin` blocks
    /// (up to the store's busy timeout) until the first commits or rolls back.
    fn begin(&self) -> Result<Box<dyn UnitOfWork>, StocksimError>;

    /// Create tables and indexes if they do not exist.
    fn initialize_schema(&self) -> Result<(), StocksimError>;
}
