//! Dividend generation and distribution.
//!
//! Generation runs per asset in its own unit of work so one failing asset
//! cannot undo or block the others. Distribution credits every holder and
//! marks the dividend paid in a single unit of work.

use chrono::NaiveDate;
use log::{debug, info, warn};
use std::sync::Arc;

use super::asset::{Asset, AssetId};
use super::auth::AuthContext;
use super::dividend::{
    DistributionReport, Dividend, DividendId, DividendPayout, DividendState, GenerationReport,
    NewDividend,
};
use super::error::{Entity, StocksimError};
use crate::ports::clock_port::ClockPort;
use crate::ports::job_port::PeriodicJob;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::price_port::PricePort;

#[derive(Clone)]
pub struct DividendEngine {
    ledger: Arc<dyn LedgerPort>,
    prices: Arc<dyn PricePort>,
    clock: Arc<dyn ClockPort>,
}

impl DividendEngine {
    pub fn new(
        ledger: Arc<dyn LedgerPort>,
        prices: Arc<dyn PricePort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        DividendEngine {
            ledger,
            prices,
            clock,
        }
    }

    /// Create a pending dividend for every eligible dividend-paying asset.
    pub fn run_scheduled_generation(
        &self,
        auth: &AuthContext,
        today: NaiveDate,
    ) -> Result<GenerationReport, StocksimError> {
        auth.require_admin()?;

        let assets: Vec<Asset> = {
            let mut uow = self.ledger.begin()?;
            uow.assets()?
        };

        let mut report = GenerationReport::default();
        for asset in assets.iter().filter(|a| a.pays_dividends()) {
            if !asset.should_pay_dividend(today) {
                debug!("{}: dividend not due on {}", asset.symbol, today);
                report.skipped.push(asset.id);
                continue;
            }
            match self.generate_for(asset.id, today) {
                Ok(Some(dividend)) => {
                    info!(
                        "{}: dividend {} pending, {:.4} per share",
                        asset.symbol, dividend.id, dividend.amount_per_share
                    );
                    report.created.push(dividend);
                }
                Ok(None) => report.skipped.push(asset.id),
                Err(e) => {
                    warn!("{}: dividend generation failed: {}", asset.symbol, e);
                    report.failed.push((asset.id, e.to_string()));
                }
            }
        }

        info!(
            "dividend generation for {}: {} created, {} skipped, {} failed",
            today,
            report.created.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn generate_for(
        &self,
        asset_id: AssetId,
        today: NaiveDate,
    ) -> Result<Option<Dividend>, StocksimError> {
        let price = self.prices.current_price(asset_id)?;

        let mut uow = self.ledger.begin()?;
        let asset = uow
            .asset(asset_id)?
            .ok_or_else(|| StocksimError::not_found(Entity::Asset, asset_id))?;
        // Re-checked under the write lock: a concurrent run may have generated it.
        if !asset.pays_dividends() || !asset.should_pay_dividend(today) {
            return Ok(None);
        }

        let dividend = uow.insert_dividend(&NewDividend {
            asset_id,
            pay_date: today,
            amount_per_share: asset.dividend_amount_per_share(price),
            created_at: self.clock.now(),
        })?;
        uow.set_last_dividend_date(asset_id, today)?;
        uow.commit()?;
        Ok(Some(dividend))
    }

    /// Credit `quantity * amount_per_share` to every holder and mark the
    /// dividend paid. A dividend that is not pending is rejected, so a second
    /// call never pays twice.
    pub fn mark_paid(
        &self,
        auth: &AuthContext,
        dividend_id: DividendId,
    ) -> Result<DistributionReport, StocksimError> {
        auth.require_admin()?;
        let settled_at = self.clock.now();

        let mut uow = self.ledger.begin()?;
        let mut dividend = uow
            .dividend(dividend_id)?
            .ok_or_else(|| StocksimError::not_found(Entity::Dividend, dividend_id))?;
        let next = dividend.transition(DividendState::Paid)?;

        let mut payouts = Vec::new();
        for holder in uow.holders_of(dividend.asset_id)? {
            let payout = DividendPayout {
                dividend_id,
                portfolio_id: holder.portfolio_id,
                quantity: holder.quantity,
                amount: holder.quantity as f64 * dividend.amount_per_share,
            };
            uow.credit_balance(payout.portfolio_id, payout.amount)?;
            uow.record_payout(&payout)?;
            payouts.push(payout);
        }

        uow.set_dividend_state(dividend_id, next, settled_at)?;
        uow.commit()?;

        dividend.state = next;
        dividend.settled_at = Some(settled_at);
        let report = DistributionReport { dividend, payouts };
        info!(
            "dividend {} paid: {} holders, {} shares, {:.2} total",
            dividend_id,
            report.holders(),
            report.total_shares(),
            report.total_paid()
        );
        Ok(report)
    }

    pub fn cancel_dividend(
        &self,
        auth: &AuthContext,
        dividend_id: DividendId,
    ) -> Result<Dividend, StocksimError> {
        auth.require_admin()?;
        let settled_at = self.clock.now();

        let mut uow = self.ledger.begin()?;
        let mut dividend = uow
            .dividend(dividend_id)?
            .ok_or_else(|| StocksimError::not_found(Entity::Dividend, dividend_id))?;
        let next = dividend.transition(DividendState::Cancelled)?;
        uow.set_dividend_state(dividend_id, next, settled_at)?;
        uow.commit()?;

        dividend.state = next;
        dividend.settled_at = Some(settled_at);
        info!("dividend {} cancelled", dividend_id);
        Ok(dividend)
    }

    pub fn list_dividends(
        &self,
        state: Option<DividendState>,
    ) -> Result<Vec<Dividend>, StocksimError> {
        let mut uow = self.ledger.begin()?;
        uow.dividends(state)
    }

    pub fn payouts(&self, dividend_id: DividendId) -> Result<Vec<DividendPayout>, StocksimError> {
        let mut uow = self.ledger.begin()?;
        if uow.dividend(dividend_id)?.is_none() {
            return Err(StocksimError::not_found(Entity::Dividend, dividend_id));
        }
        uow.payouts(dividend_id)
    }
}

/// Scheduled driver: generation for the clock's current date.
pub struct DividendJob {
    engine: DividendEngine,
}

impl DividendJob {
    pub fn new(engine: DividendEngine) -> Self {
        DividendJob { engine }
    }
}

impl PeriodicJob for DividendJob {
    fn name(&self) -> &str {
        "dividends"
    }

    fn run_once(&self) -> Result<String, StocksimError> {
        let today = self.engine.clock.today();
        let report = self
            .engine
            .run_scheduled_generation(&AuthContext::system(), today)?;
        Ok(format!(
            "{} created, {} skipped, {} failed",
            report.created.len(),
            report.skipped.len(),
            report.failed.len()
        ))
    }
}
