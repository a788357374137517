//! Portfolio lifecycle, valuation and history.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

use super::auth::{AuthContext, Role};
use super::error::{Entity, StocksimError};
use super::execution::owned_portfolio;
use super::portfolio::{Portfolio, PortfolioId, PortfolioSummary, DEFAULT_STARTING_BALANCE};
use super::reconcile::{self, Discrepancy};
use super::transaction::Transaction;
use crate::ports::clock_port::ClockPort;
use crate::ports::ledger_port::{LedgerPort, UnitOfWork};
use crate::ports::price_port::PricePort;

pub const DEFAULT_PORTFOLIO_NAME: &str = "Main";

#[derive(Clone)]
pub struct PortfolioService {
    ledger: Arc<dyn LedgerPort>,
    prices: Arc<dyn PricePort>,
    clock: Arc<dyn ClockPort>,
    starting_balance: f64,
    default_name: String,
}

/// Owner check that lets administrators read any portfolio.
fn readable_portfolio(
    uow: &mut dyn UnitOfWork,
    auth: &AuthContext,
    portfolio_id: PortfolioId,
) -> Result<Portfolio, StocksimError> {
    if auth.role == Role::Admin {
        auth.require_admin()?;
        return uow
            .portfolio(portfolio_id)?
            .ok_or_else(|| StocksimError::not_found(Entity::Portfolio, portfolio_id));
    }
    let user_id = auth.user_id.ok_or(StocksimError::AuthenticationRequired)?;
    owned_portfolio(uow, user_id, portfolio_id)
}

impl PortfolioService {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        prices: Arc<dyn PricePort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        PortfolioService {
            ledger,
            prices,
            clock,
            starting_balance: DEFAULT_STARTING_BALANCE,
            default_name: DEFAULT_PORTFOLIO_NAME.to_string(),
        }
    }

    pub fn with_defaults(mut self, starting_balance: f64, default_name: impl Into<String>) -> Self {
        self.starting_balance = starting_balance;
        self.default_name = default_name.into();
        self
    }

    pub fn starting_balance(&self) -> f64 {
        self.starting_balance
    }

    /// The caller's first portfolio, created on first use.
    pub fn ensure_portfolio(&self, auth: &AuthContext) -> Result<Portfolio, StocksimError> {
        let user_id = auth.require_active()?;
        let mut uow = self.ledger.begin()?;
        if let Some(existing) = uow.portfolios_for_user(user_id)?.into_iter().next() {
            return Ok(existing);
        }
        let created = uow.insert_portfolio(
            user_id,
            &self.default_name,
            self.starting_balance,
            self.clock.now(),
        )?;
        uow.commit()?;
        info!(
            "created portfolio {} for user {} with {:.2}",
            created.id, user_id, created.balance
        );
        Ok(created)
    }

    pub fn create_portfolio(
        &self,
        auth: &AuthContext,
        name: &str,
    ) -> Result<Portfolio, StocksimError> {
        let user_id = auth.require_active()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StocksimError::validation("portfolio name must not be empty"));
        }
        let mut uow = self.ledger.begin()?;
        let created = uow.insert_portfolio(user_id, name, self.starting_balance, self.clock.now())?;
        uow.commit()?;
        info!("created portfolio {} '{}' for user {}", created.id, name, user_id);
        Ok(created)
    }

    pub fn portfolios(&self, auth: &AuthContext) -> Result<Vec<Portfolio>, StocksimError> {
        let user_id = auth.user_id.ok_or(StocksimError::AuthenticationRequired)?;
        let mut uow = self.ledger.begin()?;
        uow.portfolios_for_user(user_id)
    }

    /// Balance and positions valued at current prices. Unpriced assets are
    /// valued at average cost.
    pub fn portfolio_summary(
        &self,
        auth: &AuthContext,
        portfolio_id: PortfolioId,
    ) -> Result<PortfolioSummary, StocksimError> {
        let (portfolio, positions) = {
            let mut uow = self.ledger.begin()?;
            let portfolio = readable_portfolio(uow.as_mut(), auth, portfolio_id)?;
            let positions = uow.positions_for_portfolio(portfolio_id)?;
            (portfolio, positions)
        };

        let mut prices = HashMap::new();
        for pos in &positions {
            match self.prices.current_price(pos.asset_id) {
                Ok(price) => {
                    prices.insert(pos.asset_id, price);
                }
                Err(StocksimError::PriceUnavailable { .. }) => {
                    debug!("asset {} unpriced, valued at cost", pos.asset_id);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(PortfolioSummary {
            portfolio,
            positions,
            prices,
        })
    }

    /// Immutable history, oldest first.
    pub fn transactions(
        &self,
        auth: &AuthContext,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Transaction>, StocksimError> {
        let mut uow = self.ledger.begin()?;
        readable_portfolio(uow.as_mut(), auth, portfolio_id)?;
        uow.transactions_for_portfolio(portfolio_id)
    }

    /// Assets whose position quantity disagrees with the transaction log.
    pub fn reconcile(
        &self,
        auth: &AuthContext,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Discrepancy>, StocksimError> {
        let mut uow = self.ledger.begin()?;
        readable_portfolio(uow.as_mut(), auth, portfolio_id)?;
        let net = uow.net_quantities(portfolio_id)?;
        let positions = uow.positions_for_portfolio(portfolio_id)?;
        drop(uow);

        let found = reconcile::discrepancies(&net, &positions);
        for d in &found {
            warn!(
                "portfolio {} asset {}: ledger {} vs position {}",
                portfolio_id, d.asset_id, d.ledger_quantity, d.position_quantity
            );
        }
        Ok(found)
    }
}
