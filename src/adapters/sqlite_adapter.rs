//! SQLite ledger and price adapter.
//!
//! Every unit of work owns one pooled connection and starts with
//! `BEGIN IMMEDIATE`, so writers queue on SQLite's reserved lock (bounded by
//! the busy timeout) and a balance read inside a unit of work cannot be
//! overwritten by a concurrent one.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use log::warn;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

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

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL CHECK (role IN ('user', 'admin')),
    suspended INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS portfolios (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    balance REAL NOT NULL CHECK (balance >= 0),
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_portfolios_user ON portfolios(user_id);
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    current_price REAL,
    dividend_pct REAL NOT NULL DEFAULT 0 CHECK (dividend_pct >= 0),
    dividend_frequency TEXT NOT NULL,
    last_dividend_date TEXT
);
CREATE TABLE IF NOT EXISTS positions (
    portfolio_id INTEGER NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE RESTRICT,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    average_price REAL NOT NULL,
    PRIMARY KEY (portfolio_id, asset_id)
);
CREATE INDEX IF NOT EXISTS idx_positions_asset ON positions(asset_id);
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    portfolio_id INTEGER NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE RESTRICT,
    quantity INTEGER NOT NULL CHECK (quantity <> 0),
    price REAL NOT NULL,
    executed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transactions_portfolio ON transactions(portfolio_id);
CREATE INDEX IF NOT EXISTS idx_transactions_asset ON transactions(asset_id);
CREATE TABLE IF NOT EXISTS dividends (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    pay_date TEXT NOT NULL,
    amount_per_share REAL NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('pending', 'paid', 'cancelled')),
    created_at TEXT NOT NULL,
    settled_at TEXT,
    UNIQUE (asset_id, pay_date)
);
CREATE TABLE IF NOT EXISTS dividend_payouts (
    dividend_id INTEGER NOT NULL REFERENCES dividends(id) ON DELETE CASCADE,
    portfolio_id INTEGER NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    quantity INTEGER NOT NULL,
    amount REAL NOT NULL,
    PRIMARY KEY (dividend_id, portfolio_id)
);
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    portfolio_id INTEGER NOT NULL REFERENCES portfolios(id) ON DELETE CASCADE,
    asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    target_price REAL NOT NULL,
    condition TEXT NOT NULL CHECK (condition IN ('greater', 'less')),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    state TEXT NOT NULL CHECK (state IN ('active', 'paused', 'triggered', 'cancelled')),
    created_at TEXT NOT NULL,
    triggered_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_alerts_state ON alerts(state);
CREATE TABLE IF NOT EXISTS price_history (
    asset_id INTEGER NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL,
    price REAL NOT NULL,
    PRIMARY KEY (asset_id, recorded_at)
);
";

type SqliteConnection = PooledConnection<SqliteConnectionManager>;

fn pool_err(e: r2d2::Error) -> StocksimError {
    StocksimError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> StocksimError {
    StocksimError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn opt_timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => timestamp_col(row, idx).map(Some),
    }
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| conversion(idx, e))
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = StocksimError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion(idx, e))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        role: parsed_col(row, 2)?,
        suspended: row.get(3)?,
    })
}

fn portfolio_from_row(row: &Row<'_>) -> rusqlite::Result<Portfolio> {
    Ok(Portfolio {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        balance: row.get(3)?,
        created_at: timestamp_col(row, 4)?,
    })
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        portfolio_id: row.get(0)?,
        asset_id: row.get(1)?,
        quantity: row.get(2)?,
        average_price: row.get(3)?,
    })
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        portfolio_id: row.get(2)?,
        asset_id: row.get(3)?,
        quantity: row.get(4)?,
        price: row.get(5)?,
        executed_at: timestamp_col(row, 6)?,
    })
}

fn asset_from_row(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let last_dividend_date = match row.get::<_, Option<String>>(6)? {
        None => None,
        Some(_) => Some(date_col(row, 6)?),
    };
    Ok(Asset {
        id: row.get(0)?,
        symbol: row.get(1)?,
        name: row.get(2)?,
        current_price: row.get(3)?,
        dividend_pct: row.get(4)?,
        dividend_frequency: parsed_col(row, 5)?,
        last_dividend_date,
    })
}

fn dividend_from_row(row: &Row<'_>) -> rusqlite::Result<Dividend> {
    Ok(Dividend {
        id: row.get(0)?,
        asset_id: row.get(1)?,
        pay_date: date_col(row, 2)?,
        amount_per_share: row.get(3)?,
        state: parsed_col(row, 4)?,
        created_at: timestamp_col(row, 5)?,
        settled_at: opt_timestamp_col(row, 6)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        user_id: row.get(1)?,
        portfolio_id: row.get(2)?,
        asset_id: row.get(3)?,
        target_price: row.get(4)?,
        condition: parsed_col(row, 5)?,
        quantity: row.get(6)?,
        state: parsed_col(row, 7)?,
        created_at: timestamp_col(row, 8)?,
        triggered_at: opt_timestamp_col(row, 9)?,
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

pub struct SqliteLedger {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteLedger {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StocksimError> {
        let db_path = config.require_string("database", "path")?;
        let pool_size = config.get_int("database", "pool_size", DEFAULT_POOL_SIZE);
        Self::open(db_path, pool_size.max(1) as u32)
    }

    pub fn open<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<Self, StocksimError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory ledger. Units of work and price lookups
    /// share the one connection, so callers must not hold a unit of work
    /// across a price call.
    pub fn in_memory() -> Result<Self, StocksimError> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<SqliteConnection, StocksimError> {
        self.pool.get().map_err(pool_err)
    }
}

impl LedgerPort for SqliteLedger {
    fn begin(&self) -> Result<Box<dyn UnitOfWork>, StocksimError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(query_err)?;
        Ok(Box::new(SqliteUnitOfWork { conn, done: false }))
    }

    fn initialize_schema(&self) -> Result<(), StocksimError> {
        self.conn()?.execute_batch(SCHEMA).map_err(query_err)
    }
}

impl PricePort for SqliteLedger {
    fn current_price(&self, asset_id: AssetId) -> Result<f64, StocksimError> {
        let stored: Option<Option<f64>> = self
            .conn()?
            .query_row(
                "SELECT current_price FROM assets WHERE id = ?1",
                params![asset_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        match stored {
            None => Err(StocksimError::not_found(Entity::Asset, asset_id)),
            Some(price) => usable_price(asset_id, price),
        }
    }

    fn latest_historical_price(&self, asset_id: AssetId) -> Result<Option<f64>, StocksimError> {
        self.conn()?
            .query_row(
                "SELECT price FROM price_history WHERE asset_id = ?1
                 ORDER BY recorded_at DESC LIMIT 1",
                params![asset_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)
    }

    fn price_at_or_after(
        &self,
        asset_id: AssetId,
        at: DateTime<Utc>,
    ) -> Result<Option<PriceSample>, StocksimError> {
        self.conn()?
            .query_row(
                "SELECT asset_id, recorded_at, price FROM price_history
                 WHERE asset_id = ?1 AND recorded_at >= ?2
                 ORDER BY recorded_at ASC LIMIT 1",
                params![asset_id, timestamp(&at)],
                |row| {
                    Ok(PriceSample {
                        asset_id: row.get(0)?,
                        recorded_at: timestamp_col(row, 1)?,
                        price: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
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
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;
        let at = timestamp(&at);

        let exists: Option<i64> = tx
            .query_row("SELECT id FROM assets WHERE id = ?1", params![asset_id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(query_err)?;
        if exists.is_none() {
            return Err(StocksimError::not_found(Entity::Asset, asset_id));
        }

        tx.execute(
            "INSERT OR REPLACE INTO price_history (asset_id, recorded_at, price)
             VALUES (?1, ?2, ?3)",
            params![asset_id, at, price],
        )
        .map_err(query_err)?;
        // Late samples extend history without moving the current price back.
        tx.execute(
            "UPDATE assets SET current_price = ?2 WHERE id = ?1 AND NOT EXISTS (
                 SELECT 1 FROM price_history WHERE asset_id = ?1 AND recorded_at > ?3)",
            params![asset_id, price, at],
        )
        .map_err(query_err)?;

        tx.commit().map_err(query_err)
    }
}

pub struct SqliteUnitOfWork {
    conn: SqliteConnection,
    done: bool,
}

impl SqliteUnitOfWork {
    fn query_vec<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>, StocksimError>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql).map_err(query_err)?;
        let rows = stmt.query_map(params, f).map_err(query_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn query_opt<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>, StocksimError>
    where
        P: rusqlite::Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.conn
            .query_row(sql, params, f)
            .optional()
            .map_err(query_err)
    }

    /// Run a single-row write; zero affected rows means the row is missing.
    fn update_one<P>(&self, sql: &str, params: P, entity: Entity, key: i64) -> Result<(), StocksimError>
    where
        P: rusqlite::Params,
    {
        let changed = self.conn.execute(sql, params).map_err(query_err)?;
        if changed == 0 {
            return Err(StocksimError::not_found(entity, key));
        }
        Ok(())
    }
}

impl Drop for SqliteUnitOfWork {
    fn drop(&mut self) {
        if !self.done {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("rollback failed: {}", e);
            }
        }
    }
}

impl UserRepository for SqliteUnitOfWork {
    fn user(&mut self, id: UserId) -> Result<Option<User>, StocksimError> {
        self.query_opt(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
    }

    fn user_by_name(&mut self, username: &str) -> Result<Option<User>, StocksimError> {
        self.query_opt(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
    }

    fn users(&mut self) -> Result<Vec<User>, StocksimError> {
        self.query_vec(
            &format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"),
            [],
            user_from_row,
        )
    }

    fn insert_user(&mut self, username: &str, role: Role) -> Result<User, StocksimError> {
        self.conn
            .execute(
                "INSERT INTO users (username, role, suspended) VALUES (?1, ?2, 0)",
                params![username, role.as_str()],
            )
            .map_err(query_err)?;
        Ok(User {
            id: self.conn.last_insert_rowid(),
            username: username.to_string(),
            role,
            suspended: false,
        })
    }

    fn set_user_suspended(&mut self, id: UserId, suspended: bool) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE users SET suspended = ?2 WHERE id = ?1",
            params![id, suspended],
            Entity::User,
            id,
        )
    }

    fn delete_user(&mut self, id: UserId) -> Result<(), StocksimError> {
        self.update_one("DELETE FROM users WHERE id = ?1", params![id], Entity::User, id)
    }
}

impl PortfolioRepository for SqliteUnitOfWork {
    fn portfolio(&mut self, id: PortfolioId) -> Result<Option<Portfolio>, StocksimError> {
        self.query_opt(
            &format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE id = ?1"),
            params![id],
            portfolio_from_row,
        )
    }

    fn portfolios_for_user(&mut self, user_id: UserId) -> Result<Vec<Portfolio>, StocksimError> {
        self.query_vec(
            &format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE user_id = ?1 ORDER BY id"),
            params![user_id],
            portfolio_from_row,
        )
    }

    fn insert_portfolio(
        &mut self,
        user_id: UserId,
        name: &str,
        balance: f64,
        created_at: DateTime<Utc>,
    ) -> Result<Portfolio, StocksimError> {
        self.conn
            .execute(
                "INSERT INTO portfolios (user_id, name, balance, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, name, balance, timestamp(&created_at)],
            )
            .map_err(query_err)?;
        Ok(Portfolio {
            id: self.conn.last_insert_rowid(),
            user_id,
            name: name.to_string(),
            balance,
            created_at,
        })
    }

    fn set_balance(&mut self, id: PortfolioId, balance: f64) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE portfolios SET balance = ?2 WHERE id = ?1",
            params![id, balance],
            Entity::Portfolio,
            id,
        )
    }

    fn credit_balance(&mut self, id: PortfolioId, amount: f64) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE portfolios SET balance = balance + ?2 WHERE id = ?1",
            params![id, amount],
            Entity::Portfolio,
            id,
        )
    }
}

impl PositionRepository for SqliteUnitOfWork {
    fn position(
        &mut self,
        portfolio_id: PortfolioId,
        asset_id: AssetId,
    ) -> Result<Option<Position>, StocksimError> {
        self.query_opt(
            &format!(
                "SELECT {POSITION_COLUMNS} FROM positions WHERE portfolio_id = ?1 AND asset_id = ?2"
            ),
            params![portfolio_id, asset_id],
            position_from_row,
        )
    }

    fn positions_for_portfolio(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<Position>, StocksimError> {
        self.query_vec(
            &format!(
                "SELECT {POSITION_COLUMNS} FROM positions WHERE portfolio_id = ?1 ORDER BY asset_id"
            ),
            params![portfolio_id],
            position_from_row,
        )
    }

    fn holders_of(&mut self, asset_id: AssetId) -> Result<Vec<Position>, StocksimError> {
        self.query_vec(
            &format!(
                "SELECT {POSITION_COLUMNS} FROM positions
                 WHERE asset_id = ?1 AND quantity > 0 ORDER BY portfolio_id"
            ),
            params![asset_id],
            position_from_row,
        )
    }

    fn save_position(&mut self, position: &Position) -> Result<(), StocksimError> {
        self.conn
            .execute(
                "INSERT INTO positions (portfolio_id, asset_id, quantity, average_price)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (portfolio_id, asset_id) DO UPDATE
                 SET quantity = excluded.quantity, average_price = excluded.average_price",
                params![
                    position.portfolio_id,
                    position.asset_id,
                    position.quantity,
                    position.average_price
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn delete_position(
        &mut self,
        portfolio_id: PortfolioId,
        asset_id: AssetId,
    ) -> Result<(), StocksimError> {
        self.conn
            .execute(
                "DELETE FROM positions WHERE portfolio_id = ?1 AND asset_id = ?2",
                params![portfolio_id, asset_id],
            )
            .map_err(query_err)?;
        Ok(())
    }
}

impl TransactionRepository for SqliteUnitOfWork {
    fn append_transaction(&mut self, tx: &NewTransaction) -> Result<Transaction, StocksimError> {
        self.conn
            .execute(
                "INSERT INTO transactions
                 (user_id, portfolio_id, asset_id, quantity, price, executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tx.user_id,
                    tx.portfolio_id,
                    tx.asset_id,
                    tx.quantity,
                    tx.price,
                    timestamp(&tx.executed_at)
                ],
            )
            .map_err(query_err)?;
        Ok(Transaction {
            id: self.conn.last_insert_rowid(),
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
        self.query_vec(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions
                 WHERE portfolio_id = ?1 ORDER BY executed_at, id"
            ),
            params![portfolio_id],
            transaction_from_row,
        )
    }

    fn net_quantities(
        &mut self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<(AssetId, i64)>, StocksimError> {
        self.query_vec(
            "SELECT asset_id, SUM(quantity) FROM transactions
             WHERE portfolio_id = ?1 GROUP BY asset_id ORDER BY asset_id",
            params![portfolio_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
    }

    fn count_transactions_for_asset(&mut self, asset_id: AssetId) -> Result<i64, StocksimError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM transactions WHERE asset_id = ?1",
                params![asset_id],
                |row| row.get(0),
            )
            .map_err(query_err)
    }
}

impl AssetRepository for SqliteUnitOfWork {
    fn asset(&mut self, id: AssetId) -> Result<Option<Asset>, StocksimError> {
        self.query_opt(
            &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"),
            params![id],
            asset_from_row,
        )
    }

    fn asset_by_symbol(&mut self, symbol: &str) -> Result<Option<Asset>, StocksimError> {
        self.query_opt(
            &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE symbol = ?1"),
            params![symbol],
            asset_from_row,
        )
    }

    fn assets(&mut self) -> Result<Vec<Asset>, StocksimError> {
        self.query_vec(
            &format!("SELECT {ASSET_COLUMNS} FROM assets ORDER BY id"),
            [],
            asset_from_row,
        )
    }

    fn insert_asset(&mut self, asset: &NewAsset) -> Result<Asset, StocksimError> {
        self.conn
            .execute(
                "INSERT INTO assets (symbol, name, current_price, dividend_pct, dividend_frequency)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    asset.symbol,
                    asset.name,
                    asset.current_price,
                    asset.dividend_pct,
                    asset.dividend_frequency.as_str()
                ],
            )
            .map_err(query_err)?;
        Ok(Asset {
            id: self.conn.last_insert_rowid(),
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
            "UPDATE assets SET last_dividend_date = ?2 WHERE id = ?1",
            params![id, date.format(DATE_FORMAT).to_string()],
            Entity::Asset,
            id,
        )
    }

    fn delete_asset(&mut self, id: AssetId) -> Result<(), StocksimError> {
        self.update_one("DELETE FROM assets WHERE id = ?1", params![id], Entity::Asset, id)
    }
}

impl DividendRepository for SqliteUnitOfWork {
    fn insert_dividend(&mut self, dividend: &NewDividend) -> Result<Dividend, StocksimError> {
        self.conn
            .execute(
                "INSERT INTO dividends (asset_id, pay_date, amount_per_share, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    dividend.asset_id,
                    dividend.pay_date.format(DATE_FORMAT).to_string(),
                    dividend.amount_per_share,
                    DividendState::Pending.as_str(),
                    timestamp(&dividend.created_at)
                ],
            )
            .map_err(query_err)?;
        Ok(Dividend {
            id: self.conn.last_insert_rowid(),
            asset_id: dividend.asset_id,
            pay_date: dividend.pay_date,
            amount_per_share: dividend.amount_per_share,
            state: DividendState::Pending,
            created_at: dividend.created_at,
            settled_at: None,
        })
    }

    fn dividend(&mut self, id: DividendId) -> Result<Option<Dividend>, StocksimError> {
        self.query_opt(
            &format!("SELECT {DIVIDEND_COLUMNS} FROM dividends WHERE id = ?1"),
            params![id],
            dividend_from_row,
        )
    }

    fn dividends(&mut self, state: Option<DividendState>) -> Result<Vec<Dividend>, StocksimError> {
        self.query_vec(
            &format!(
                "SELECT {DIVIDEND_COLUMNS} FROM dividends
                 WHERE ?1 IS NULL OR state = ?1 ORDER BY id"
            ),
            params![state.map(|s| s.as_str())],
            dividend_from_row,
        )
    }

    fn set_dividend_state(
        &mut self,
        id: DividendId,
        state: DividendState,
        settled_at: DateTime<Utc>,
    ) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE dividends SET state = ?2, settled_at = ?3 WHERE id = ?1",
            params![id, state.as_str(), timestamp(&settled_at)],
            Entity::Dividend,
            id,
        )
    }

    fn record_payout(&mut self, payout: &DividendPayout) -> Result<(), StocksimError> {
        self.conn
            .execute(
                "INSERT INTO dividend_payouts (dividend_id, portfolio_id, quantity, amount)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    payout.dividend_id,
                    payout.portfolio_id,
                    payout.quantity,
                    payout.amount
                ],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn payouts(&mut self, id: DividendId) -> Result<Vec<DividendPayout>, StocksimError> {
        self.query_vec(
            "SELECT dividend_id, portfolio_id, quantity, amount FROM dividend_payouts
             WHERE dividend_id = ?1 ORDER BY portfolio_id",
            params![id],
            |row| {
                Ok(DividendPayout {
                    dividend_id: row.get(0)?,
                    portfolio_id: row.get(1)?,
                    quantity: row.get(2)?,
                    amount: row.get(3)?,
                })
            },
        )
    }
}

impl AlertRepository for SqliteUnitOfWork {
    fn insert_alert(&mut self, record: &AlertRecord) -> Result<Alert, StocksimError> {
        let new = &record.alert;
        self.conn
            .execute(
                "INSERT INTO alerts (user_id, portfolio_id, asset_id, target_price, condition,
                                     quantity, state, created_at, triggered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.user_id,
                    new.portfolio_id,
                    new.asset_id,
                    new.target_price,
                    new.condition.as_str(),
                    new.quantity,
                    record.state.as_str(),
                    timestamp(&record.created_at),
                    record.triggered_at.as_ref().map(timestamp)
                ],
            )
            .map_err(query_err)?;
        Ok(Alert {
            id: self.conn.last_insert_rowid(),
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
        self.query_opt(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
            params![id],
            alert_from_row,
        )
    }

    fn alerts_for_user(&mut self, user_id: UserId) -> Result<Vec<Alert>, StocksimError> {
        self.query_vec(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE user_id = ?1 ORDER BY id"),
            params![user_id],
            alert_from_row,
        )
    }

    fn alerts_in_state(&mut self, state: AlertState) -> Result<Vec<Alert>, StocksimError> {
        self.query_vec(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE state = ?1 ORDER BY id"),
            params![state.as_str()],
            alert_from_row,
        )
    }

    fn set_alert_state(
        &mut self,
        id: AlertId,
        state: AlertState,
        triggered_at: Option<DateTime<Utc>>,
    ) -> Result<(), StocksimError> {
        self.update_one(
            "UPDATE alerts SET state = ?2, triggered_at = COALESCE(?3, triggered_at) WHERE id = ?1",
            params![id, state.as_str(), triggered_at.as_ref().map(timestamp)],
            Entity::Alert,
            id,
        )
    }

    fn delete_alert(&mut self, id: AlertId) -> Result<(), StocksimError> {
        self.update_one("DELETE FROM alerts WHERE id = ?1", params![id], Entity::Alert, id)
    }
}

impl UnitOfWork for SqliteUnitOfWork {
    fn commit(mut self: Box<Self>) -> Result<(), StocksimError> {
        self.conn.execute_batch("COMMIT").map_err(query_err)?;
        self.done = true;
        Ok(())
    }
}
