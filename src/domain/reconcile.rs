//! Audit of positions against the append-only transaction log.

use std::collections::BTreeMap;

use super::asset::AssetId;
use super::error::StocksimError;
use super::portfolio::PortfolioId;
use super::position::{apply_buy, apply_sell, Position, PositionChange};
use super::transaction::Transaction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub asset_id: AssetId,
    pub ledger_quantity: i64,
    pub position_quantity: i64,
}

/// Pairs where the summed signed transaction quantity differs from the stored
/// position quantity (a missing position counts as zero).
pub fn discrepancies(net_quantities: &[(AssetId, i64)], positions: &[Position]) -> Vec<Discrepancy> {
    let mut by_asset: BTreeMap<AssetId, (i64, i64)> = BTreeMap::new();
    for &(asset_id, qty) in net_quantities {
        by_asset.entry(asset_id).or_default().0 += qty;
    }
    for pos in positions {
        by_asset.entry(pos.asset_id).or_default().1 += pos.quantity;
    }

    by_asset
        .into_iter()
        .filter(|(_, (ledger, held))| ledger != held)
        .map(|(asset_id, (ledger_quantity, position_quantity))| Discrepancy {
            asset_id,
            ledger_quantity,
            position_quantity,
        })
        .collect()
}

/// Rebuild positions by replaying transactions oldest first.
pub fn replay(portfolio_id: PortfolioId, history: &[Transaction]) -> Result<Vec<Position>, StocksimError> {
    let mut book: BTreeMap<AssetId, Position> = BTreeMap::new();

    for tx in history {
        let existing = book.get(&tx.asset_id);
        let change = if tx.quantity > 0 {
            apply_buy(existing, portfolio_id, tx.asset_id, tx.quantity, tx.price)?
        } else {
            apply_sell(existing, -tx.quantity).map_err(|e| {
                StocksimError::validation(format!(
                    "transaction {} cannot be replayed: {e}",
                    tx.id
                ))
            })?
        };

        match change {
            PositionChange::Opened(pos) | PositionChange::Updated(pos) => {
                book.insert(tx.asset_id, pos);
            }
            PositionChange::Closed => {
                book.remove(&tx.asset_id);
            }
        }
    }

    Ok(book.into_values().collect())
}
