//! PostgreSQL ledger and price adapter.
//!
//! Units of work run in a plain `BEGIN` transaction. Rows that a unit of work
//! reads in order to rewrite them (portfolios, alerts, dividends, assets) are
//! read `FOR UPDATE`, so concurrent writers queue on the row lock.

use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use postgres::types::ToSql;
use postgres::{NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

use crate::domain::alert::{Alert, AlertId, AlertRecord, AlertState};
use crate::domain::asset::{Asset, AssetId, NewAsset};
use crate::domain::auth::{Role, User, UserId};
use crate::domain::config_validation::DEFAULT_POOL_SIZE;
use crate::domain::dividend::{Dividend, DividendId, DividendPayout, DividendState, NewDividend};
use crate::domain::error::{Entity, StocksimError};
use crate::domain::portfolio::{Portfolio, PortfolioId};
use crate::domain::position::Position;
use crate::domain::transaction::{NewTransaction, Transaction};
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::{
    AlertRepository, AssetRepository, DividendRepository, LedgerPort, PortfolioRepository,
    PositionRepository, TransactionRepository, UnitOfWork, UserRepository,
};
use crate::ports::price_port::{usable_price, PricePort, PriceSample};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL CHECK (role IN ('user', 'admin')),
    suspended BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE TABLE IF NOT EXISTS portfolios (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    balance DOUBLE PRECISION NOT NULL CHECK (balance >= 0),
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS assets (
    id BIGSERIAL PRIMARY KEY,
    symbol TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    current_price DOUBLE PRECISION,
    dividend_pct DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (dividend_pct >= 0),
    dividend_frequency TEXT NOT NULL,
    last_dividend_date DATE
);
CREATE TABLE IF NOT EXISTS positions (
    portfolio_id BIGINT NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    asset_id BIGINT NOT NULL REFERENCES assets(id) ON DELETE RESTRICT,
    quantity BIGINT NOT NULL CHECK (quantity > 0),
    average_price DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (portfolio_id, asset_id)
);
CREATE TABLE IF NOT EXISTS transactions (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    portfolio_id BIGINT NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    asset_id BIGINT NOT NULL REFERENCES assets(id) ON DELETE RESTRICT,
    quantity BIGINT NOT NULL CHECK (quantity <> 0),
    price DOUBLE PRECISION NOT NULL,
    executed_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_portfolio ON transactions(portfolio_id);
CREATE TABLE IF NOT EXISTS dividends (
    id BIGSERIAL PRIMARY KEY,
    asset_id BIGINT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    pay_date DATE NOT NULL,
    amount_per_share DOUBLE PRECISION NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('pending', 'paid', 'cancelled')),
    created_at TIMESTAMPTZ NOT NULL,
    settled_at TIMESTAMPTZ,
    UNIQUE (asset_id, pay_date)
);
CREATE TABLE IF NOT EXISTS dividend_payouts (
    dividend_id BIGINT NOT NULL REFERENCES dividends(id) ON DELETE CASCADE,
    portfolio_id BIGINT NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    quantity BIGINT NOT NULL,
    amount DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (dividend_id, portfolio_id)
);
CREATE TABLE IF NOT EXISTS alerts (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    portfolio_id BIGINT NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    asset_id BIGINT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    target_price DOUBLE PRECISION NOT NULL,
    condition TEXT NOT NULL CHECK (condition IN ('greater', 'less')),
    quantity BIGINT NOT NULL CHECK (quantity > 0),
    state TEXT NOT NULL CHECK (state IN ('active', 'paused', 'triggered', 'cancelled')),
    created_at TIMESTAMPTZ NOT NULL,
    triggered_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS idx_alerts_state ON alerts(state);
CREATE TABLE IF NOT EXISTS price_history (
    asset_id BIGINT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    recorded_at TIMESTAMPTZ NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (asset_id, recorded_at)
);
";

type PgConnection = PooledConnection<PostgresConnectionManager<NoTls>>;
type Params<'a> = &'a [&'a (dyn ToSql + Sync)];

fn pool_err(e: r2d2::Error) -> StocksimError {
    StocksimError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: postgres::Error) -> StocksimError {
    StocksimError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn parse_col<T>(row: &Row, idx: usize) -> Result<T, StocksimError>
where
    T: std::str::FromStr<Err = StocksimError>,
{
    let text: String = row.try_get(idx).map_err(query_err)?;
    text.parse().map_err(|e: StocksimError| StocksimError::DatabaseQuery {
        reason: format!("column {idx}: {e}"),
    })
}

fn user_from_row(row: &Row) -> Result<User, StocksimError> {
    Ok(User {
        id: row.get(0),
        username: row.get(1),
        role: parse_col(row, 2)?,
        suspended: row.get(3),
    })
}

fn portfolio_from_row(row: &Row) -> Result<Portfolio, StocksimError> {
    Ok(Portfolio {
        id: row.get(0),
        user_id: row.get(1),
        name: row.get(2),
        balance: row.get(3),
        created_at: row.get(4),
    })
}

fn position_from_row(row: &Row) -> Result<Position, StocksimError> {
    Ok(Position {
        portfolio_id: row.get(0),
        asset_id: row.get(1),
        quantity: row.get(2),
        average_price: row.get(3),
    })
}

fn transaction_from_row(row: &Row) -> Result<Transaction, StocksimError> {
    Ok(Transaction {
        id: row.get(0),
        user_id: row.get(1),
        portfolio_id: row.get(2),
        asset_id: row.get(3),
        quantity: row.get(4),
        price: row.get(5),
        executed_at: row.get(6),
    })
}

fn asset_from_row(row: &Row) -> Result<Asset, StocksimError> {
    Ok(Asset {
        id: row.get(0),
        symbol: row.get(1),
        name: row.get(2),
        current_price: row.get(3),
        dividend_pct: row.get(4),
        dividend_frequency: parse_col(row, 5)?,
        last_dividend_date: row.get(6),
    })
}

fn dividend_from_row(row: &Row) -> Result<Dividend, StocksimError> {
    Ok(Dividend {
        id: row.get(0),
        asset_id: row.get(1),
        pay_date: row.get(2),
        amount_per_share: row.get(3),
        state: parse_col(row, 4)?,
        created_at: row.get(5),
        settled_at: row.get(6),
    })
}

fn alert_from_row(row: &Row) -> Result<Alert, StocksimError> {
    Ok(Alert {
        id: row.get(0),
        user_id: row.get(1),
        portfolio_id: row.get(2),
        asset_id: row.get(3),
        target_price: row.get(4),
        condition: parse_col(row, 5)?,
        quantity: row.get(6),
        state: parse_col(row, 7)?,
        created_at: row.get(8),
        triggered_at: row.get(9),
    })
}

const USER_COLUMNS: &str = "id, username, role, suspended";
const PORTFOLIO_COLUMNS: &str = "id, user_id, name, balance, created_at";
const POSITION_COLUMNS: &str = "portfolio_id, asset_id, quantity, average_price";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, portfolio_id, asset_id, quantity, price, executed_at";
const ASSET_COLUMNS: &str =
    "id, symbol, name, current_price, dividend_pct, dividend_frequency, last_dividend_date";
const DIVIDEND_COLUMNS: &str =
    "id, asset_id, pay_date, amount_per_share, state, created_at, settled_at";
const ALERT_COLUMNS: &str = "id, user_id, portfolio_id, asset_id, target_price, condition, \
     quantity, state, created_at, triggered_at";

pub struct PostgresLedger {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl PostgresLedger {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StocksimError> {
        let conninfo = config.require_string("database", "conninfo")?;
        let pool_size = config.get_int("database", "pool_size", DEFAULT_POOL_SIZE);

        let pg_config = conninfo.parse::<postgres::Config>().map_err(|e| {
            StocksimError::ConfigInvalid {
                section: "database".into(),
                key: "conninfo".into(),
                reason: e.to_string(),
            }
        })?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size.max(1) as u32)
            .build(manager)
            .map_err(pool_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PgConnection, StocksimError> {
        self.pool.get().map_err(pool_err)
    }
}

impl LedgerPort for PostgresLedger {
    fn begin(&self) -> Result<Box<dyn UnitOfWork>, StocksimError> {
        let mut conn = self.conn()?;
        conn.batch_execute("BEGIN").map_err(query_err)?;
        Ok(Box::new(PostgresUnitOfWork { conn, done: false }))
    }

    fn initialize_schema(&self) -> Result<(), StocksimError> {
        self.conn()?.batch_execute(SCHEMA).map_err(query_err)
    }
}

impl PricePort for PostgresLedger {
    fn current_price(&self, asset_id: AssetId) -> Result<f64, StocksimError> {
        let row = self
            .conn()?
            .query_opt("SELECT current_price FROM assets WHERE id = $1", &[&asset_id])
            .map_err(query_err)?;
        match row {
            None => Err(StocksimError::not_found(Entity::Asset, asset_id)),
            Some(row) => usable_price(asset_id, row.get(0)),
        }
    }

    fn latest_historical_price(&self, asset_id: AssetId) -> Result<Option<f64>, StocksimError> {
        let row = self
            .conn()?
            .query_opt(
                "SELECT price FROM price_history WHERE asset_id = $1
                 ORDER BY recorded_at DESC LIMIT 1",
                &[&asset_id],
            )
            .map_err(query_err)?;
        Ok(row.map(|r| r.get(0)))
    }

    fn price_at_or_after(
        &self,
        asset_id: AssetId,
        at: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, StocksimError> {
        let row = self
            .conn()?
            .query_opt(
                "SELECT asset_id, recorded_at, price FROM price_history
                 WHERE asset_id = $1 AND recorded_at >= $2
                 ORDER BY recorded_at ASC LIMIT 1",
                &[&asset_id, &at],
            )
            .map_err(query_err)?;
        Ok(row.map(|r| PriceSample {
            asset_id: r.get(0),
            recorded_at: r.get(1),
            price: r.get(2),
        }))
    }

    fn record_price(
        &self,
        asset_id: AssetId,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StocksimError> {
        usable_price(asset_id, Some(price))
            .map_err(|_| StocksimError::validation(format!("invalid price {price}")))?;

        let mut conn = self.conn()?;
        let mut tx = conn.transaction().map_err(query_err)?;
        let exists = tx
            .query_opt("SELECT id FROM assets WHERE id = $1 FOR UPDATE", &[&asset_id])
            .map_err(query_err)?;
        if exists.is_none() {
            return Err(StocksimError::not_found(Entity::Asset, asset_id));
        }

        tx.execute(
            "INSERT INTO price_history (asset_id, recorded_at, price) VALUES ($1, $2, $3)
             ON CONFLICT (asset_id, recorded_at) DO UPDATE SET price = excluded.price",
            &[&asset_id, &at, &price],
        )
        .map_err(query_err)?;
        tx.execute(
            "UPDATE assets SET current_price = $2 WHERE id = $1 AND NOT EXISTS (
                 SELECT 1 FROM price_history WHERE asset_id = $1 AND recorded_at > $3)",
            &[&asset_id, &price, &at],
        )
        .map_err(query_err)?;

        tx.commit().map_err(query_err)
    }
}

pub struct PostgresUnitOfWork {
    conn: PgConnection,
    done: bool,
}

impl PostgresUnitOfWork {
    fn query_vec<T>(
        &mut self,
        sql: &str,
        params: Params<'_>,
        f: fn(&Row) -> Result<T, StocksimError>,
    ) -> Result<Vec<T>, StocksimError> {
        let rows = self.conn.query(sql, params).map_err(query_err)?;
        rows.iter().map(f).collect()
    }

    fn query_opt<T>(
        &mut self,
        sql: &str,
        params: Params<'_>,
        f: fn(&Row) -> Result<T, StocksimError>,
    ) -> Result<Option<T>, StocksimError> {
        let row = self.conn.query_opt(sql, params).map_err(query_err)?;
        row.as_ref().map(f).transpose()
    }

    fn insert_returning_id(&mut self, sql: &str, params: Params<'_>) -> Result<i64, StocksimError> {
        let row = self.conn.query_one(sql, params).map_err(query_err)?;
        Ok(row.get(0))
    }

    fn execute(&mut self, sql: &str, params: Params<'_>) -> Result<u64, StocksimError> {
        self.conn.execute(sql, params).map_err(query_err)
    }

    fn update_one(
        &mut self,
        sql: &str,
        params: Params<'_>,
        entity: Entity,
        key: i64,
    ) -> Result<(), StocksimError> {
        if self.execute(sql, params)? == 0 {
            return Err(StocksimError::not_found(entity, key));
        }
        Ok(())
    }
}

impl Drop for PostgresUnitOfWork {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.conn.batch_execute("ROLLBACK") {
                warn!("rollback failed: {}", e);
            }
        }
    }
}

impl UserRepository for PostgresUnitOfWork {
    fn user(&mut self, id: UserId) -> Result<Option<User>, StocksimError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.query_opt(&sql, &[&id], user_from_row)
    }

    fn user_by_name(&mut self, username: &str) -> Result<Option<User>, StocksimError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        self.query_opt(&sql, &[&username], user_from_row)
    }

    fn users(&mut self) -> Result<Vec<User>, StocksimError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        self.query_vec(&sql, &[], user_from_row)
    }

    fn insert_user(&mut self, username: &str, role: Role) -> Result<User, StocksimError> {
        let id = self.insert_returning_id(
            "INSERT INTO users (username, role) VALUES ($1, $2) RETURNING id",
            &[&username, &role.as_str()],
        )?;
        Ok(User {
            id,
            username: username.to_string(),
            role,
            suspended: false,
        })
    }

    fn set_user_suspended(&mut self, id: UserId, suspended: bool) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE users SET suspended = $2 WHERE id = $1",
            &[&id, &suspended],
            Entity::User,
            id,
        )
    }

    fn delete_user(&mut self, id: UserId) -> Result<(), StocksimError> {
        self.update_one("DELETE FROM users WHERE id = $1", &[&id], Entity::User, id)
    }
}

impl PortfolioRepository for PostgresUnitOfWork {
    fn portfolio(&mut self, id: PortfolioId) -> Result<Option<Portfolio>, StocksimError> {
        let sql = format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE id = $1 FOR UPDATE");
        self.query_opt(&sql, &[&id], portfolio_from_row)
    }

    fn portfolios_for_user(&mut self, user_id: UserId) -> Result<Vec<Portfolio>, StocksimError> {
        let sql =
            format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE user_id = $1 ORDER BY id");
        self.query_vec(&sql, &[&user_id], portfolio_from_row)
    }

    fn insert_portfolio(
        &mut self,
        user_id: UserId,
        name: &str,
        balance: f64,
        created_at: DateTime<Utc>,
    ) -> Result<Portfolio, StocksimError> {
        let id = self.insert_returning_id(
            "INSERT INTO portfolios (user_id, name, balance, created_at)
             VALUES ($1, $2, $3, $4) RETURNING id",
            &[&user_id, &name, &balance, &created_at],
        )?;
        Ok(Portfolio {
            id,
            user_id,
            name: name.to_string(),
            balance,
            created_at,
        })
    }

    fn set_balance(&mut self, id: PortfolioId, balance: f64) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE portfolios SET balance = $2 WHERE id = $1",
            &[&id, &balance],
            Entity::Portfolio,
            id,
        )
    }

    fn credit_balance(&mut self, id: PortfolioId, amount: f64) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE portfolios SET balance = balance + $2 WHERE id = $1",
            &[&id, &amount],
            Entity::Portfolio,
            id,
        )
    }
}

impl PositionRepository for PostgresUnitOfWork {
    fn position(
        &mut self,
        portfolio_id: PortfolioId,
        asset_id: AssetId,
    ) -> Result<Option<Position>, StocksimError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE portfolio_id = $1 AND asset_id = $2"
        );
        self.query_opt(&sql, &[&portfolio_id, &asset_id], position_from_row)
    }

    fn positions_for_portfolio(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Position>, StocksimError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE portfolio_id = $1 ORDER BY asset_id"
        );
        self.query_vec(&sql, &[&portfolio_id], position_from_row)
    }

    fn holders_of(&mut self, asset_id: AssetId) -> Result<Vec<Position>, StocksimError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM positions
             WHERE asset_id = $1 AND quantity > 0 ORDER BY portfolio_id"
        );
        self.query_vec(&sql, &[&asset_id], position_from_row)
    }

    fn save_position(&mut self, position: &Position) -> Result<(), StocksimError> {
        self.execute(
            "INSERT INTO positions (portfolio_id, asset_id, quantity, average_price)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (portfolio_id, asset_id) DO UPDATE
             SET quantity = excluded.quantity, average_price = excluded.average_price",
            &[
                &position.portfolio_id,
                &position.asset_id,
                &position.quantity,
                &position.average_price,
            ],
        )?;
        Ok(())
    }

    fn delete_position(
        &mut self,
        portfolio_id: PortfolioId,
        asset_id: AssetId,
    ) -> Result<(), StocksimError> {
        self.execute(
            "DELETE FROM positions WHERE portfolio_id = $1 AND asset_id = $2",
            &[&portfolio_id, &asset_id],
        )?;
        Ok(())
    }
}

impl TransactionRepository for PostgresUnitOfWork {
    fn append_transaction(&mut self, tx: &NewTransaction) -> Result<Transaction, StocksimError> {
        let id = self.insert_returning_id(
            "INSERT INTO transactions (user_id, portfolio_id, asset_id, quantity, price, executed_at)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            &[
                &tx.user_id,
                &tx.portfolio_id,
                &tx.asset_id,
                &tx.quantity,
                &tx.price,
                &tx.executed_at,
            ],
        )?;
        Ok(Transaction {
            id,
            user_id: tx.user_id,
            portfolio_id: tx.portfolio_id,
            asset_id: tx.asset_id,
            quantity: tx.quantity,
            price: tx.price,
            executed_at: tx.executed_at,
        })
    }

    fn transactions_for_portfolio(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Transaction>, StocksimError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE portfolio_id = $1 ORDER BY executed_at, id"
        );
        self.query_vec(&sql, &[&portfolio_id], transaction_from_row)
    }

    fn net_quantities(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<(AssetId, i64)>, StocksimError> {
        let rows = self
            .conn
            .query(
                "SELECT asset_id, SUM(quantity)::BIGINT FROM transactions
                 WHERE portfolio_id = $1 GROUP BY asset_id ORDER BY asset_id",
                &[&portfolio_id],
            )
            .map_err(query_err)?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    fn count_transactions_for_asset(&mut self, asset_id: AssetId) -> Result<i64, StocksimError> {
        let row = self
            .conn
            .query_one(
                "SELECT COUNT(*) FROM transactions WHERE asset_id = $1",
                &[&asset_id],
            )
            .map_err(query_err)?;
        Ok(row.get(0))
    }
}

impl AssetRepository for PostgresUnitOfWork {
    fn asset(&mut self, id: AssetId) -> Result<Option<Asset>, StocksimError> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1 FOR UPDATE");
        self.query_opt(&sql, &[&id], asset_from_row)
    }

    fn asset_by_symbol(&mut self, symbol: &str) -> Result<Option<Asset>, StocksimError> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets WHERE symbol = $1");
        self.query_opt(&sql, &[&symbol], asset_from_row)
    }

    fn assets(&mut self) -> Result<Vec<Asset>, StocksimError> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM assets ORDER BY id");
        self.query_vec(&sql, &[], asset_from_row)
    }

    fn insert_asset(&mut self, asset: &NewAsset) -> Result<Asset, StocksimError> {
        let id = self.insert_returning_id(
            "INSERT INTO assets (symbol, name, current_price, dividend_pct, dividend_frequency)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
            &[
                &asset.symbol,
                &asset.name,
                &asset.current_price,
                &asset.dividend_pct,
                &asset.dividend_frequency.as_str(),
            ],
        )?;
        Ok(Asset {
            id,
            symbol: asset.symbol.clone(),
            name: asset.name.clone(),
            current_price: asset.current_price,
            dividend_pct: asset.dividend_pct,
            dividend_frequency: asset.dividend_frequency,
            last_dividend_date: None,
        })
    }

    fn set_last_dividend_date(&mut self, id: AssetId, date: NaiveDate) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE assets SET last_dividend_date = $2 WHERE id = $1",
            &[&id, &date],
            Entity::Asset,
            id,
        )
    }

    fn delete_asset(&mut self, id: AssetId) -> Result<(), StocksimError> {
        self.update_one("DELETE FROM assets WHERE id = $1", &[&id], Entity::Asset, id)
    }
}

impl DividendRepository for PostgresUnitOfWork {
    fn insert_dividend(&mut self, dividend: &NewDividend) -> Result<Dividend, StocksimError> {
        let id = self.insert_returning_id(
            "INSERT INTO dividends (asset_id, pay_date, amount_per_share, state, created_at)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
            &[
                &dividend.asset_id,
                &dividend.pay_date,
                &dividend.amount_per_share,
                &DividendState::Pending.as_str(),
                &dividend.created_at,
            ],
        )?;
        Ok(Dividend {
            id,
            asset_id: dividend.asset_id,
            pay_date: dividend.pay_date,
            amount_per_share: dividend.amount_per_share,
            state: DividendState::Pending,
            created_at: dividend.created_at,
            settled_at: None,
        })
    }

    fn dividend(&mut self, id: DividendId) -> Result<Option<Dividend>, StocksimError> {
        let sql = format!("SELECT {DIVIDEND_COLUMNS} FROM dividends WHERE id = $1 FOR UPDATE");
        self.query_opt(&sql, &[&id], dividend_from_row)
    }

    fn dividends(&mut self, state: Option<DividendState>) -> Result<Vec<Dividend>, StocksimError> {
        let sql = format!(
            "SELECT {DIVIDEND_COLUMNS} FROM dividends
             WHERE $1::TEXT IS NULL OR state = $1 ORDER BY id"
        );
        let state = state.map(|s| s.as_str());
        self.query_vec(&sql, &[&state], dividend_from_row)
    }

    fn set_dividend_state(
        &mut self,
        id: DividendId,
        state: DividendState,
        settled_at: DateTime<Utc>,
    ) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE dividends SET state = $2, settled_at = $3 WHERE id = $1",
            &[&id, &state.as_str(), &settled_at],
            Entity::Dividend,
            id,
        )
    }

    fn record_payout(&mut self, payout: &DividendPayout) -> Result<(), StocksimError> {
        self.execute(
            "INSERT INTO dividend_payouts (dividend_id, portfolio_id, quantity, amount)
             VALUES ($1, $2, $3, $4)",
            &[
                &payout.dividend_id,
                &payout.portfolio_id,
                &payout.quantity,
                &payout.amount,
            ],
        )?;
        Ok(())
    }

    fn payouts(&mut self, id: DividendId) -> Result<Vec<DividendPayout>, StocksimError> {
        let rows = self
            .conn
            .query(
                "SELECT dividend_id, portfolio_id, quantity, amount FROM dividend_payouts
                 WHERE dividend_id = $1 ORDER BY portfolio_id",
                &[&id],
            )
            .map_err(query_err)?;
        Ok(rows
            .iter()
            .map(|r| DividendPayout {
                dividend_id: r.get(0),
                portfolio_id: r.get(1),
                quantity: r.get(2),
                amount: r.get(3),
            })
            .collect())
    }
}

impl AlertRepository for PostgresUnitOfWork {
    fn insert_alert(&mut self, record: &AlertRecord) -> Result<Alert, StocksimError> {
        let new = &record.alert;
        let id = self.insert_returning_id(
            "INSERT INTO alerts (user_id, portfolio_id, asset_id, target_price, condition,
                                 quantity, state, created_at, triggered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id",
            &[
                &record.user_id,
                &new.portfolio_id,
                &new.asset_id,
                &new.target_price,
                &new.condition.as_str(),
                &new.quantity,
                &record.state.as_str(),
                &record.created_at,
                &record.triggered_at,
            ],
        )?;
        Ok(Alert {
            id,
            user_id: record.user_id,
            portfolio_id: new.portfolio_id,
            asset_id: new.asset_id,
            target_price: new.target_price,
            condition: new.condition,
            quantity: new.quantity,
            state: record.state,
            created_at: record.created_at,
            triggered_at: record.triggered_at,
        })
    }

    fn alert(&mut self, id: AlertId) -> Result<Option<Alert>, StocksimError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1 FOR UPDATE");
        self.query_opt(&sql, &[&id], alert_from_row)
    }

    fn alerts_for_user(&mut self, user_id: UserId) -> Result<Vec<Alert>, StocksimError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE user_id = $1 ORDER BY id");
        self.query_vec(&sql, &[&user_id], alert_from_row)
    }

    fn alerts_in_state(&mut self, state: AlertState) -> Result<Vec<Alert>, StocksimError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE state = $1 ORDER BY id");
        self.query_vec(&sql, &[&state.as_str()], alert_from_row)
    }

    fn set_alert_state(
        &mut self,
        id: AlertId,
        state: AlertState,
        triggered_at: Option<DateTime<Utc>>,
    ) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE alerts SET state = $2, triggered_at = COALESCE($3, triggered_at) WHERE id = $1",
            &[&id, &state.as_str(), &triggered_at],
            Entity::Alert,
            id,
        )
    }

    fn delete_alert(&mut self, id: AlertId) -> Result<(), StocksimError> {
        self.update_one("DELETE FROM alerts WHERE id = $1", &[&id], Entity::Alert, id)
    }
}

impl UnitOfWork for PostgresUnitOfWork {
    fn commit(mut self: Box<Self>) -> Result<(), StocksimError> {
        self.conn.batch_execute("COMMIT").map_err(query_err)?;
        self.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    #[test]
    fn from_config_missing_conninfo() {
        match PostgresLedger::from_config(&EmptyConfig) {
            Err(StocksimError::ConfigMissing { section, key }) => {
                assert_eq!(section, "database");
                assert_eq!(key, "conninfo");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }
}
