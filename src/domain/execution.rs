//! Transaction engine: the single path through which balances, positions and
//! the transaction log change.
//!
//! An order is executed in two steps. [`TransactionEngine::prepare`] checks the
//! caller and quantity and resolves the execution price; [`TransactionEngine::apply`]
//! performs the balance update, the position upsert or delete, and the
//! transaction insert inside a caller-supplied unit of work. Callers that need
//! extra effects in the same atomic batch (alert triggering) open the unit of
//! work themselves; everyone else uses [`TransactionEngine::execute_transaction`].

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::Arc;

use super::asset::AssetId;
use super::auth::{AuthContext, UserId};
use super::error::{Entity, StocksimError};
use super::portfolio::{Portfolio, PortfolioId};
use super::position::{apply_buy, apply_sell, Position, PositionChange};
use super::reconcile;
use super::transaction::{NewTransaction, Side, Transaction};
use crate::ports::clock_port::ClockPort;
use crate::ports::ledger_port::{LedgerPort, UnitOfWork};
use crate::ports::price_port::PricePort;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Order {
    pub portfolio_id: PortfolioId,
    pub asset_id: AssetId,
    pub side: Side,
    pub quantity: i64,
}

impl Order {
    pub fn buy(portfolio_id: PortfolioId, asset_id: AssetId, quantity: i64) -> Self {
        Order {
            portfolio_id,
            asset_id,
            side: Side::Buy,
            quantity,
        }
    }

    pub fn sell(portfolio_id: PortfolioId, asset_id: AssetId, quantity: i64) -> Self {
        Order {
            portfolio_id,
            asset_id,
            side: Side::Sell,
            quantity,
        }
    }

    pub fn validate(&self) -> Result<(), StocksimError> {
        if self.quantity <= 0 {
            return Err(StocksimError::validation("quantity must be a positive number"));
        }
        Ok(())
    }
}

/// An order that passed the caller and price checks and is ready to apply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreparedOrder {
    pub user_id: UserId,
    pub order: Order,
    pub price: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReceipt {
    pub transaction: Transaction,
    pub balance: f64,
    /// `None` when the sell closed the position.
    pub position: Option<Position>,
}

/// Load a portfolio the caller owns. Someone else's portfolio is reported as
/// not found.
pub fn owned_portfolio(
    uow: &mut dyn UnitOfWork,
    user_id: UserId,
    portfolio_id: PortfolioId,
) -> Result<Portfolio, StocksimError> {
    uow.portfolio(portfolio_id)?
        .filter(|p| p.is_owned_by(user_id))
        .ok_or_else(|| StocksimError::not_found(Entity::Portfolio, portfolio_id))
}

#[derive(Clone)]
pub struct TransactionEngine {
    ledger: Arc<dyn LedgerPort>,
    prices: Arc<dyn PricePort>,
    clock: Arc<dyn ClockPort>,
}

impl TransactionEngine {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        prices: Arc<dyn PricePort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        TransactionEngine {
            ledger,
            prices,
            clock,
        }
    }

    /// Buy or sell at the asset's current price, atomically.
    pub fn execute_transaction(
        &self,
        auth: &AuthContext,
        order: &Order,
    ) -> Result<ExecutionReceipt, StocksimError> {
        let prepared = self.prepare(auth, order)?;
        let mut uow = self.ledger.begin()?;
        let receipt = Self::apply(uow.as_mut(), &prepared)?;
        uow.commit()?;

        info!(
            "{} {} of asset {} @ {:.2} in portfolio {} (balance {:.2})",
            order.side,
            order.quantity,
            order.asset_id,
            prepared.price,
            order.portfolio_id,
            receipt.balance
        );
        Ok(receipt)
    }

    /// Caller, quantity and price checks. Touches no ledger state, so it runs
    /// before a unit of work is opened.
    pub fn prepare(
        &self,
        auth: &AuthContext,
        order: &Order,
    ) -> Result<PreparedOrder, StocksimError> {
        let user_id = auth.require_active()?;
        order.validate()?;
        let price = self.prices.current_price(order.asset_id)?;
        Ok(PreparedOrder {
            user_id,
            order: *order,
            price,
            at: self.clock.now(),
        })
    }

    /// Apply a prepared order inside an open unit of work. Nothing is written
    /// unless every check passes; on error the caller drops the unit of work.
    pub fn apply(
        uow: &mut dyn UnitOfWork,
        prepared: &PreparedOrder,
    ) -> Result<ExecutionReceipt, StocksimError> {
        let order = &prepared.order;
        let portfolio = owned_portfolio(uow, prepared.user_id, order.portfolio_id)?;
        if uow.asset(order.asset_id)?.is_none() {
            return Err(StocksimError::not_found(Entity::Asset, order.asset_id));
        }

        let existing = uow.position(order.portfolio_id, order.asset_id)?;
        let notional = prepared.price * order.quantity as f64;

        let (balance, change) = match order.side {
            Side::Buy => {
                if portfolio.balance < notional {
                    return Err(StocksimError::InsufficientFunds {
                        required: notional,
                        available: portfolio.balance,
                    });
                }
                let change = apply_buy(
                    existing.as_ref(),
                    order.portfolio_id,
                    order.asset_id,
                    order.quantity,
                    prepared.price,
                )?;
                (portfolio.balance - notional, change)
            }
            Side::Sell => {
                let change = apply_sell(existing.as_ref(), order.quantity)?;
                (portfolio.balance + notional, change)
            }
        };

        uow.set_balance(order.portfolio_id, balance)?;
        let position = match change {
            PositionChange::Opened(pos) | PositionChange::Updated(pos) => {
                uow.save_position(&pos)?;
                Some(pos)
            }
            PositionChange::Closed => {
                uow.delete_position(order.portfolio_id, order.asset_id)?;
                None
            }
        };

        let transaction = uow.append_transaction(&NewTransaction {
            user_id: prepared.user_id,
            portfolio_id: order.portfolio_id,
            asset_id: order.asset_id,
            quantity: order.side.signed(order.quantity),
            price: prepared.price,
            executed_at: prepared.at,
        })?;

        Ok(ExecutionReceipt {
            transaction,
            balance,
            position,
        })
    }

    /// Replace a portfolio's positions with those implied by its transaction log.
    pub fn rebuild_positions(
        &self,
        auth: &AuthContext,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Position>, StocksimError> {
        auth.require_admin()?;
        let mut uow = self.ledger.begin()?;
        if uow.portfolio(portfolio_id)?.is_none() {
            return Err(StocksimError::not_found(Entity::Portfolio, portfolio_id));
        }

        let history = uow.transactions_for_portfolio(portfolio_id)?;
        let rebuilt = reconcile::replay(portfolio_id, &history)?;

        for stale in uow.positions_for_portfolio(portfolio_id)? {
            uow.delete_position(portfolio_id, stale.asset_id)?;
        }
        for pos in &rebuilt {
            uow.save_position(pos)?;
        }
        uow.commit()?;

        debug!(
            "rebuilt {} positions for portfolio {} from {} transactions",
            rebuilt.len(),
            portfolio_id,
            history.len()
        );
        Ok(rebuilt)
    }
}
