//! Alert creation, user actions, and the periodic evaluation tick.

use log::{debug, info, warn};
use std::sync::Arc;

use super::alert::{Alert, AlertId, AlertRecord, AlertState, NewAlert, TickReport};
use super::auth::{AuthContext, UserId};
use super::error::{Entity, StocksimError};
use super::execution::{owned_portfolio, ExecutionReceipt, Order, TransactionEngine};
use crate::ports::clock_port::ClockPort;
use crate::ports::job_port::PeriodicJob;
use crate::ports::ledger_port::{LedgerPort, UnitOfWork};
use crate::ports::price_port::PricePort;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertCreation {
    pub alert: Alert,
    /// Present when the condition already held and the sell ran immediately.
    pub execution: Option<ExecutionReceipt>,
}

#[derive(Clone)]
pub struct AlertEngine {
    ledger: Arc<dyn LedgerPort>,
    prices: Arc<dyn PricePort>,
    clock: Arc<dyn ClockPort>,
    trades: TransactionEngine,
}

fn owned_alert(
    uow: &mut dyn UnitOfWork,
    user_id: UserId,
    alert_id: AlertId,
) -> Result<Alert, StocksimError> {
    uow.alert(alert_id)?
        .filter(|a| a.user_id == user_id)
        .ok_or_else(|| StocksimError::not_found(Entity::Alert, alert_id))
}

impl AlertEngine {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        prices: Arc<dyn PricePort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let trades = TransactionEngine::new(ledger.clone(), prices.clone(), clock.clone());
        AlertEngine {
            ledger,
            prices,
            clock,
            trades,
        }
    }

    /// Store a new alert. If its condition already holds at the current price
    /// the sell runs in the same unit of work and the alert is stored as
    /// triggered; a failed sell fails the whole creation.
    pub fn create_alert(
        &self,
        auth: &AuthContext,
        new: &NewAlert,
    ) -> Result<AlertCreation, StocksimError> {
        let user_id = auth.require_active()?;
        new.validate()?;

        let current = match self.prices.current_price(new.asset_id) {
            Ok(price) => Some(price),
            Err(StocksimError::PriceUnavailable { .. }) => None,
            Err(e) => return Err(e),
        };

        if current.is_some_and(|price| new.condition.is_satisfied(price, new.target_price)) {
            let prepared = self.trades.prepare(
                auth,
                &Order::sell(new.portfolio_id, new.asset_id, new.quantity),
            )?;
            let mut uow = self.ledger.begin()?;
            let receipt = TransactionEngine::apply(uow.as_mut(), &prepared)?;
            let alert = uow.insert_alert(&AlertRecord {
                user_id,
                alert: new.clone(),
                state: AlertState::Triggered,
                created_at: prepared.at,
                triggered_at: Some(prepared.at),
            })?;
            uow.commit()?;

            info!(
                "alert {} triggered on creation: sold {} of asset {} @ {:.2}",
                alert.id, new.quantity, new.asset_id, prepared.price
            );
            return Ok(AlertCreation {
                alert,
                execution: Some(receipt),
            });
        }

        let mut uow = self.ledger.begin()?;
        owned_portfolio(uow.as_mut(), user_id, new.portfolio_id)?;
        if uow.asset(new.asset_id)?.is_none() {
            return Err(StocksimError::not_found(Entity::Asset, new.asset_id));
        }
        let alert = uow.insert_alert(&AlertRecord {
            user_id,
            alert: new.clone(),
            state: AlertState::Active,
            created_at: self.clock.now(),
            triggered_at: None,
        })?;
        uow.commit()?;

        debug!("alert {} stored as active", alert.id);
        Ok(AlertCreation {
            alert,
            execution: None,
        })
    }

    /// Evaluate every active alert once against its asset's latest sample.
    /// A failed sell leaves the alert active for the next tick.
    pub fn tick(&self) -> Result<TickReport, StocksimError> {
        let active: Vec<Alert> = {
            let mut uow = self.ledger.begin()?;
            uow.alerts_in_state(AlertState::Active)?
        };

        let mut report = TickReport::default();
        for alert in &active {
            report.evaluated += 1;

            let price = match self.prices.latest_historical_price(alert.asset_id) {
                Ok(Some(price)) => price,
                Ok(None) => {
                    debug!("alert {}: no price history for asset {}", alert.id, alert.asset_id);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("alert {}: price lookup failed: {}", alert.id, e);
                    report.retried.push((alert.id, e.to_string()));
                    continue;
                }
            };

            if !alert.is_satisfied_at(price) {
                continue;
            }

            match self.trigger(alert) {
                Ok(true) => report.triggered.push(alert.id),
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!("alert {}: sell failed, will retry: {}", alert.id, e);
                    report.retried.push((alert.id, e.to_string()));
                }
            }
        }

        info!("alert tick: {}", report);
        Ok(report)
    }

    /// Sell on the owner's behalf and mark the alert triggered in one unit of
    /// work. Returns `false` if the alert stopped being active meanwhile.
    fn trigger(&self, alert: &Alert) -> Result<bool, StocksimError> {
        let owner = {
            let mut uow = self.ledger.begin()?;
            uow.user(alert.user_id)?
                .ok_or_else(|| StocksimError::not_found(Entity::User, alert.user_id))?
        };
        let prepared = self.trades.prepare(
            &owner.auth_context(),
            &Order::sell(alert.portfolio_id, alert.asset_id, alert.quantity),
        )?;

        let mut uow = self.ledger.begin()?;
        let current = match uow.alert(alert.id)? {
            Some(current) if current.state == AlertState::Active => current,
            _ => return Ok(false),
        };
        let next = current.triggered()?;
        let receipt = TransactionEngine::apply(uow.as_mut(), &prepared)?;
        uow.set_alert_state(alert.id, next, Some(prepared.at))?;
        uow.commit()?;

        info!(
            "alert {} triggered: sold {} of asset {} @ {:.2} (balance {:.2})",
            alert.id, alert.quantity, alert.asset_id, prepared.price, receipt.balance
        );
        Ok(true)
    }

    /// Active <-> Paused.
    pub fn toggle_alert(&self, auth: &AuthContext, alert_id: AlertId) -> Result<Alert, StocksimError> {
        let user_id = auth.require_active()?;
        let mut uow = self.ledger.begin()?;
        let mut alert = owned_alert(uow.as_mut(), user_id, alert_id)?;
        alert.state = alert.toggled()?;
        uow.set_alert_state(alert_id, alert.state, None)?;
        uow.commit()?;
        Ok(alert)
    }

    pub fn cancel_alert(&self, auth: &AuthContext, alert_id: AlertId) -> Result<Alert, StocksimError> {
        let user_id = auth.require_active()?;
        let mut uow = self.ledger.begin()?;
        let mut alert = owned_alert(uow.as_mut(), user_id, alert_id)?;
        alert.state = alert.cancelled()?;
        uow.set_alert_state(alert_id, alert.state, None)?;
        uow.commit()?;
        Ok(alert)
    }

    pub fn delete_alert(&self, auth: &AuthContext, alert_id: AlertId) -> Result<(), StocksimError> {
        let user_id = auth.require_active()?;
        let mut uow = self.ledger.begin()?;
        owned_alert(uow.as_mut(), user_id, alert_id)?;
        uow.delete_alert(alert_id)?;
        uow.commit()
    }

    pub fn list_alerts(&self, auth: &AuthContext) -> Result<Vec<Alert>, StocksimError> {
        let user_id = auth.user_id.ok_or(StocksimError::AuthenticationRequired)?;
        let mut uow = self.ledger.begin()?;
        uow.alerts_for_user(user_id)
    }
}

impl PeriodicJob for AlertEngine {
    fn name(&self) -> &str {
        "alerts"
    }

    fn run_once(&self) -> Result<String, StocksimError> {
        self.tick().map(|report| report.to_string())
    }
}
