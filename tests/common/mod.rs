#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use stocksim::adapters::sqlite_adapter::SqliteLedger;
use stocksim::cli::App;
use stocksim::domain::asset::{AssetId, DividendFrequency, NewAsset};
use stocksim::domain::auth::{AuthContext, Role};
use stocksim::domain::config_validation::{Backend, Settings};
use stocksim::domain::portfolio::PortfolioId;
use stocksim::ports::clock_port::ClockPort;
use stocksim::ports::ledger_port::LedgerPort;
use stocksim::ports::price_port::PricePort;
use tempfile::{NamedTempFile, TempDir};

pub const STARTING_BALANCE: f64 = 10_000.0;

/// Clock that only moves when a test moves it.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set_date(&self, date: NaiveDate) {
        let mut now = self.now.lock().unwrap();
        *now = date.and_hms_opt(12, 0, 0).unwrap().and_utc();
    }
}

impl ClockPort for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn settings() -> Settings {
    Settings {
        backend: Backend::Sqlite,
        starting_balance: STARTING_BALANCE,
        default_portfolio_name: "Main".into(),
        alert_interval: StdDuration::from_secs(300),
        dividend_interval: StdDuration::from_secs(86_400),
        run_alerts: true,
        run_dividends: true,
        log_level: None,
    }
}

/// A file-backed ledger with an admin already registered.
pub struct Harness {
    pub dir: TempDir,
    pub ledger: Arc<SqliteLedger>,
    pub clock: Arc<FixedClock>,
    pub app: App,
    pub admin: AuthContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_pool(4)
    }

    pub fn with_pool(pool_size: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(SqliteLedger::open(dir.path().join("ledger.db"), pool_size).unwrap());
        ledger.initialize_schema().unwrap();
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap(),
        ));
        let app = App::new(settings(), ledger.clone(), ledger.clone(), clock.clone());
        let admin = app
            .admin()
            .register_user(&AuthContext::anonymous(), "root", Role::Admin)
            .unwrap()
            .auth_context();
        Self {
            dir,
            ledger,
            clock,
            app,
            admin,
        }
    }

    pub fn user(&self, name: &str) -> AuthContext {
        self.app
            .admin()
            .register_user(&self.admin, name, Role::User)
            .unwrap()
            .auth_context()
    }

    pub fn asset(&self, symbol: &str, price: f64) -> AssetId {
        self.dividend_asset(symbol, price, 0.0, DividendFrequency::Quarterly)
    }

    pub fn dividend_asset(
        &self,
        symbol: &str,
        price: f64,
        dividend_pct: f64,
        frequency: DividendFrequency,
    ) -> AssetId {
        let asset = self
            .app
            .admin()
            .add_asset(
                &self.admin,
                &NewAsset {
                    symbol: symbol.into(),
                    name: format!("{symbol} Corp"),
                    current_price: None,
                    dividend_pct,
                    dividend_frequency: frequency,
                },
            )
            .unwrap();
        self.set_price(asset.id, price);
        asset.id
    }

    /// Record a new sample one second after the previous one.
    pub fn set_price(&self, asset_id: AssetId, price: f64) {
        self.clock.advance(Duration::seconds(1));
        self.ledger
            .record_price(asset_id, price, self.clock.now())
            .unwrap();
    }

    /// Make every insert into `table` matching `when` abort, through a
    /// separate connection on the ledger file.
    pub fn fail_inserts(&self, table: &str, when: &str) {
        let conn = rusqlite::Connection::open(self.dir.path().join("ledger.db")).unwrap();
        conn.execute_batch(&format!(
            "CREATE TRIGGER fail_{table} BEFORE INSERT ON {table} \
             WHEN {when} BEGIN SELECT RAISE(ABORT, 'boom'); END;"
        ))
        .unwrap();
    }

    pub fn portfolio(&self, auth: &AuthContext) -> PortfolioId {
        self.app.portfolios().ensure_portfolio(auth).unwrap().id
    }

    pub fn balance(&self, auth: &AuthContext, portfolio_id: PortfolioId) -> f64 {
        self.app
            .portfolios()
            .portfolio_summary(auth, portfolio_id)
            .unwrap()
            .portfolio
            .balance
    }

    pub fn quantity(&self, auth: &AuthContext, portfolio_id: PortfolioId, asset_id: AssetId) -> i64 {
        self.app
            .portfolios()
            .portfolio_summary(auth, portfolio_id)
            .unwrap()
            .positions
            .iter()
            .find(|p| p.asset_id == asset_id)
            .map(|p| p.quantity)
            .unwrap_or(0)
    }
}

pub fn write_temp_ini(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
