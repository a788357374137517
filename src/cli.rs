//! CLI definition and dispatch.
//!
//! The binary stands in for the request layer: it resolves the acting user
//! from `--user`, builds an [`AuthContext`], and calls the engines.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{error, warn, LevelFilter};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter::CsvPriceAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::scheduler::{CancellationToken, Scheduler};
use crate::adapters::system_clock::SystemClock;
use crate::domain::admin::AdminService;
use crate::domain::alert::{AlertCondition, NewAlert};
use crate::domain::alert_engine::AlertEngine;
use crate::domain::asset::{AssetId, DividendFrequency, NewAsset};
use crate::domain::auth::{AuthContext, Role};
use crate::domain::config_validation::{Backend, Settings};
use crate::domain::dividend::DividendState;
use crate::domain::dividend_engine::{DividendEngine, DividendJob};
use crate::domain::error::StocksimError;
use crate::domain::execution::{Order, TransactionEngine};
use crate::domain::portfolio::PortfolioId;
use crate::domain::portfolio_service::PortfolioService;
use crate::ports::clock_port::ClockPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::price_port::PricePort;

#[derive(Parser, Debug)]
#[command(name = "stocksim", about = "Stock-market simulation ledger")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long, global = true, default_value = "stocksim.ini")]
    pub config: PathBuf,
    /// Username to act as
    #[arg(short, long, global = true)]
    pub user: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the schema, optionally with a first administrator
    InitDb {
        #[arg(long)]
        admin: Option<String>,
    },
    /// Register a user (admin)
    AddUser {
        username: String,
        #[arg(long)]
        admin: bool,
    },
    /// List registered users (admin)
    Users,
    /// Suspend or reinstate a user (admin)
    Suspend {
        username: String,
        #[arg(long)]
        lift: bool,
    },
    /// Delete a user with everything they own (admin)
    DeleteUser { username: String },
    /// Add a tradable asset (admin)
    AddAsset {
        symbol: String,
        name: String,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long, default_value_t = 0.0)]
        dividend_pct: f64,
        #[arg(long, default_value = "quarterly")]
        frequency: String,
    },
    /// Delete an asset nobody has traded (admin)
    DeleteAsset { symbol: String },
    /// Load `<SYMBOL>.csv` price files from a directory (admin)
    ImportPrices {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Buy shares at the current price
    Buy {
        symbol: String,
        quantity: i64,
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    /// Sell shares at the current price
    Sell {
        symbol: String,
        quantity: i64,
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    /// Show balance, positions and valuation
    Portfolio {
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    /// List a portfolio's transactions
    History {
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    /// Compare positions with the transaction log
    Audit {
        #[arg(long)]
        portfolio: Option<PortfolioId>,
        /// Rebuild positions from the log (admin)
        #[arg(long)]
        rebuild: bool,
    },
    /// Dividend administration
    Dividends {
        #[command(subcommand)]
        action: DividendAction,
    },
    /// Conditional sell alerts
    Alerts {
        #[command(subcommand)]
        action: AlertAction,
    },
    /// Run the alert and dividend jobs until interrupted
    Run,
}

#[derive(Subcommand, Debug)]
pub enum DividendAction {
    /// Create pending dividends for every eligible asset (admin)
    Generate {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Credit holders and mark paid (admin)
    Pay { id: i64 },
    /// Cancel a pending dividend (admin)
    Cancel { id: i64 },
    List {
        #[arg(long)]
        state: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AlertAction {
    /// Sell QUANTITY when the price is CONDITION (greater|less) TARGET
    Create {
        symbol: String,
        condition: String,
        target: f64,
        quantity: i64,
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    List,
    Toggle { id: i64 },
    Cancel { id: i64 },
    Delete { id: i64 },
    /// Evaluate active alerts once
    Tick,
}

/// Wired-up ports and settings shared by every command.
pub struct App {
    pub settings: Settings,
    pub ledger: Arc<dyn LedgerPort>,
    pub prices: Arc<dyn PricePort>,
    pub clock: Arc<dyn ClockPort>,
}

impl App {
    pub fn new(
        settings: Settings,
        ledger: Arc<dyn LedgerPort>,
        prices: Arc<dyn PricePort>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        App {
            settings,
            ledger,
            prices,
            clock,
        }
    }

    pub fn from_config(config: &dyn ConfigPort, settings: Settings) -> Result<Self, StocksimError> {
        let (ledger, prices) = build_store(config, settings.backend)?;
        Ok(App::new(settings, ledger, prices, Arc::new(SystemClock)))
    }

    pub fn trades(&self) -> TransactionEngine {
        TransactionEngine::new(self.ledger.clone(), self.prices.clone(), self.clock.clone())
    }

    pub fn dividends(&self) -> DividendEngine {
        DividendEngine::new(self.ledger.clone(), self.prices.clone(), self.clock.clone())
    }

    pub fn alerts(&self) -> AlertEngine {
        AlertEngine::new(self.ledger.clone(), self.prices.clone(), self.clock.clone())
    }

    pub fn portfolios(&self) -> PortfolioService {
        PortfolioService::new(self.ledger.clone(), self.prices.clone(), self.clock.clone())
            .with_defaults(
                self.settings.starting_balance,
                self.settings.default_portfolio_name.clone(),
            )
    }

    pub fn admin(&self) -> AdminService {
        AdminService::new(self.ledger.clone())
    }

    /// Identity for `--user`; no user means an anonymous caller.
    pub fn acting(&self, username: Option<&str>) -> Result<AuthContext, StocksimError> {
        match username {
            None => Ok(AuthContext::anonymous()),
            Some(name) => Ok(self.admin().user_by_name(name)?.auth_context()),
        }
    }

    fn asset_id(&self, symbol: &str) -> Result<AssetId, StocksimError> {
        Ok(self.admin().asset_by_symbol(symbol)?.id)
    }

    fn portfolio_id(
        &self,
        auth: &AuthContext,
        requested: Option<PortfolioId>,
    ) -> Result<PortfolioId, StocksimError> {
        match requested {
            Some(id) => Ok(id),
            None => Ok(self.portfolios().ensure_portfolio(auth)?.id),
        }
    }

    fn symbols(&self) -> Result<HashMap<AssetId, String>, StocksimError> {
        Ok(self
            .admin()
            .assets()?
            .into_iter()
            .map(|a| (a.id, a.symbol))
            .collect())
    }
}

type Store = (Arc<dyn LedgerPort>, Arc<dyn PricePort>);

#[cfg(feature = "sqlite")]
fn sqlite_store(config: &dyn ConfigPort) -> Result<Store, StocksimError> {
    let ledger = Arc::new(crate::adapters::sqlite_adapter::SqliteLedger::from_config(config)?);
    Ok((ledger.clone(), ledger))
}

#[cfg(not(feature = "sqlite"))]
fn sqlite_store(_config: &dyn ConfigPort) -> Result<Store, StocksimError> {
    Err(missing_backend("sqlite"))
}

#[cfg(feature = "postgres")]
fn postgres_store(config: &dyn ConfigPort) -> Result<Store, StocksimError> {
    let ledger =
        Arc::new(crate::adapters::postgres_adapter::PostgresLedger::from_config(config)?);
    Ok((ledger.clone(), ledger))
}

#[cfg(not(feature = "postgres"))]
fn postgres_store(_config: &dyn ConfigPort) -> Result<Store, StocksimError> {
    Err(missing_backend("postgres"))
}

#[allow(dead_code)]
fn missing_backend(name: &str) -> StocksimError {
    StocksimError::ConfigInvalid {
        section: "database".into(),
        key: "backend".into(),
        reason: format!("built without the {name} feature"),
    }
}

fn build_store(config: &dyn ConfigPort, backend: Backend) -> Result<Store, StocksimError> {
    match backend {
        Backend::Sqlite => sqlite_store(config),
        Backend::Postgres => postgres_store(config),
    }
}

/// `RUST_LOG` wins over the configured level; the default is `info`.
pub fn init_logging(configured: Option<&str>) {
    let level = configured
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_secs();
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let _ = builder.try_init();
}

pub fn load_config(path: &Path) -> Result<(FileConfigAdapter, Settings), StocksimError> {
    let config = FileConfigAdapter::from_file(path)?;
    let settings = Settings::from_config(&config)?;
    Ok((config, settings))
}

pub fn run(cli: Cli) -> ExitCode {
    let result = load_config(&cli.config).and_then(|(config, settings)| {
        init_logging(settings.log_level.as_deref());
        let app = App::from_config(&config, settings)?;
        let stdout = io::stdout();
        let mut out = stdout.lock();
        execute(&app, cli.user.as_deref(), cli.command, &mut out)
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Run one command against a wired-up [`App`], writing its report to `out`.
pub fn execute(
    app: &App,
    user: Option<&str>,
    command: Command,
    out: &mut dyn Write,
) -> Result<(), StocksimError> {
    if let Command::InitDb { admin } = &command {
        app.ledger.initialize_schema()?;
        writeln!(out, "schema ready")?;
        if let Some(name) = admin {
            let user = app
                .admin()
                .register_user(&AuthContext::anonymous(), name, Role::Admin)?;
            writeln!(out, "admin {} created (id {})", user.username, user.id)?;
        }
        return Ok(());
    }

    let auth = app.acting(user)?;
    match command {
        Command::InitDb { .. } => Ok(()),
        Command::AddUser { username, admin } => {
            let role = if admin { Role::Admin } else { Role::User };
            let user = app.admin().register_user(&auth, &username, role)?;
            writeln!(out, "{} {} created (id {})", role, user.username, user.id)?;
            Ok(())
        }
        Command::Users => {
            for user in app.admin().users(&auth)? {
                let state = if user.suspended { "suspended" } else { "active" };
                writeln!(out, "{} {} {} {}", user.id, user.username, user.role, state)?;
            }
            Ok(())
        }
        Command::Suspend { username, lift } => {
            let target = app.admin().user_by_name(&username)?;
            let user = app.admin().set_user_suspended(&auth, target.id, !lift)?;
            let state = if user.suspended { "suspended" } else { "active" };
            writeln!(out, "{} is {}", user.username, state)?;
            Ok(())
        }
        Command::DeleteUser { username } => {
            let target = app.admin().user_by_name(&username)?;
            app.admin().delete_user(&auth, target.id)?;
            writeln!(out, "{} deleted", username)?;
            Ok(())
        }
        Command::AddAsset {
            symbol,
            name,
            price,
            dividend_pct,
            frequency,
        } => {
            let asset = app.admin().add_asset(
                &auth,
                &NewAsset {
                    symbol,
                    name,
                    current_price: price,
                    dividend_pct,
                    dividend_frequency: frequency.parse::<DividendFrequency>()?,
                },
            )?;
            writeln!(out, "asset {} added (id {})", asset.symbol, asset.id)?;
            Ok(())
        }
        Command::DeleteAsset { symbol } => {
            let asset_id = app.asset_id(&symbol)?;
            app.admin().delete_asset(&auth, asset_id)?;
            writeln!(out, "asset {} deleted", symbol)?;
            Ok(())
        }
        Command::ImportPrices { dir } => import_prices(app, &auth, &dir, out),
        Command::Buy {
            symbol,
            quantity,
            portfolio,
        } => trade(app, &auth, &symbol, quantity, portfolio, true, out),
        Command::Sell {
            symbol,
            quantity,
            portfolio,
        } => trade(app, &auth, &symbol, quantity, portfolio, false, out),
        Command::Portfolio { portfolio } => {
            let id = app.portfolio_id(&auth, portfolio)?;
            print_summary(app, &auth, id, out)
        }
        Command::History { portfolio } => {
            let id = app.portfolio_id(&auth, portfolio)?;
            let symbols = app.symbols()?;
            let history = app.portfolios().transactions(&auth, id)?;
            writeln!(out, "{:<6} {:<25} {:<5} {:<8} {:>8} {:>10}", "id", "executed", "side", "symbol", "qty", "price")?;
            for tx in history {
                writeln!(
                    out,
                    "{:<6} {:<25} {:<5} {:<8} {:>8} {:>10.2}",
                    tx.id,
                    tx.executed_at.format("%Y-%m-%d %H:%M:%S"),
                    tx.side(),
                    symbols.get(&tx.asset_id).map(String::as_str).unwrap_or("?"),
                    tx.quantity.abs(),
                    tx.price
                )?;
            }
            Ok(())
        }
        Command::Audit { portfolio, rebuild } => {
            let id = app.portfolio_id(&auth, portfolio)?;
            if rebuild {
                let rebuilt = app.trades().rebuild_positions(&auth, id)?;
                writeln!(out, "rebuilt {} positions", rebuilt.len())?;
            }
            let found = app.portfolios().reconcile(&auth, id)?;
            if found.is_empty() {
                writeln!(out, "portfolio {} is consistent", id)?;
            }
            for d in found {
                writeln!(
                    out,
                    "asset {}: ledger {} vs position {}",
                    d.asset_id, d.ledger_quantity, d.position_quantity
                )?;
            }
            Ok(())
        }
        Command::Dividends { action } => dividends(app, &auth, action, out),
        Command::Alerts { action } => alerts(app, &auth, action, out),
        Command::Run => run_scheduler(app, &auth),
    }
}

fn trade(
    app: &App,
    auth: &AuthContext,
    symbol: &str,
    quantity: i64,
    portfolio: Option<PortfolioId>,
    buy: bool,
    out: &mut dyn Write,
) -> Result<(), StocksimError> {
    let asset_id = app.asset_id(symbol)?;
    let portfolio_id = app.portfolio_id(auth, portfolio)?;
    let order = if buy {
        Order::buy(portfolio_id, asset_id, quantity)
    } else {
        Order::sell(portfolio_id, asset_id, quantity)
    };
    let receipt = app.trades().execute_transaction(auth, &order)?;
    writeln!(
        out,
        "{} {} {} @ {:.2}, balance {:.2}",
        order.side, quantity, symbol, receipt.transaction.price, receipt.balance
    )?;
    Ok(())
}

fn print_summary(
    app: &App,
    auth: &AuthContext,
    portfolio_id: PortfolioId,
    out: &mut dyn Write,
) -> Result<(), StocksimError> {
    let summary = app.portfolios().portfolio_summary(auth, portfolio_id)?;
    let symbols = app.symbols()?;
    writeln!(
        out,
        "portfolio {} '{}': balance {:.2}",
        summary.portfolio.id, summary.portfolio.name, summary.portfolio.balance
    )?;
    for pos in &summary.positions {
        writeln!(
            out,
            "  {:<8} {:>8} avg {:>10.2} value {:>12.2}",
            symbols.get(&pos.asset_id).map(String::as_str).unwrap_or("?"),
            pos.quantity,
            pos.average_price,
            summary.position_value(pos)
        )?;
    }
    writeln!(
        out,
        "equity {:.2} (unrealized {:+.2})",
        summary.total_equity(),
        summary.unrealized_pnl()
    )?;
    Ok(())
}

fn import_prices(
    app: &App,
    auth: &AuthContext,
    dir: &Path,
    out: &mut dyn Write,
) -> Result<(), StocksimError> {
    auth.require_admin()?;
    let feed = CsvPriceAdapter::new(dir.to_path_buf());
    let admin = app.admin();
    let mut imported = 0usize;

    for symbol in feed.list_symbols()? {
        let asset = match admin.asset_by_symbol(&symbol) {
            Ok(asset) => asset,
            Err(StocksimError::NotFound { .. }) => {
                warn!("skipping {}.csv: unknown asset", symbol);
                continue;
            }
            Err(e) => return Err(e),
        };
        let samples = feed.read_prices(&symbol)?;
        for sample in &samples {
            app.prices
                .record_price(asset.id, sample.price, sample.recorded_at)?;
        }
        writeln!(out, "{}: {} samples", symbol, samples.len())?;
        imported += samples.len();
    }

    writeln!(out, "imported {} samples", imported)?;
    Ok(())
}

fn dividends(
    app: &App,
    auth: &AuthContext,
    action: DividendAction,
    out: &mut dyn Write,
) -> Result<(), StocksimError> {
    let engine = app.dividends();
    match action {
        DividendAction::Generate { date } => {
            let today = date.unwrap_or_else(|| app.clock.today());
            let report = engine.run_scheduled_generation(auth, today)?;
            for d in &report.created {
                writeln!(
                    out,
                    "dividend {} for asset {}: {:.4} per share",
                    d.id, d.asset_id, d.amount_per_share
                )?;
            }
            for (asset_id, reason) in &report.failed {
                writeln!(out, "asset {} failed: {}", asset_id, reason)?;
            }
            writeln!(
                out,
                "{} created, {} skipped, {} failed",
                report.created.len(),
                report.skipped.len(),
                report.failed.len()
            )?;
        }
        DividendAction::Pay { id } => {
            let report = engine.mark_paid(auth, id)?;
            writeln!(
                out,
                "dividend {} paid: {} holders, {} shares, {:.2} total",
                id,
                report.holders(),
                report.total_shares(),
                report.total_paid()
            )?;
        }
        DividendAction::Cancel { id } => {
            let dividend = engine.cancel_dividend(auth, id)?;
            writeln!(out, "dividend {} {}", dividend.id, dividend.state)?;
        }
        DividendAction::List { state } => {
            let state = state.map(|s| s.parse::<DividendState>()).transpose()?;
            let symbols = app.symbols()?;
            for d in engine.list_dividends(state)? {
                writeln!(
                    out,
                    "{:<6} {:<8} {} {:>10.4} {}",
                    d.id,
                    symbols.get(&d.asset_id).map(String::as_str).unwrap_or("?"),
                    d.pay_date,
                    d.amount_per_share,
                    d.state
                )?;
            }
        }
    }
    Ok(())
}

fn alerts(
    app: &App,
    auth: &AuthContext,
    action: AlertAction,
    out: &mut dyn Write,
) -> Result<(), StocksimError> {
    let engine = app.alerts();
    match action {
        AlertAction::Create {
            symbol,
            condition,
            target,
            quantity,
            portfolio,
        } => {
            let new = NewAlert {
                portfolio_id: app.portfolio_id(auth, portfolio)?,
                asset_id: app.asset_id(&symbol)?,
                target_price: target,
                condition: condition.parse::<AlertCondition>()?,
                quantity,
            };
            let created = engine.create_alert(auth, &new)?;
            writeln!(out, "alert {} {}", created.alert.id, created.alert.state)?;
            if let Some(receipt) = created.execution {
                writeln!(
                    out,
                    "sold {} {} @ {:.2}, balance {:.2}",
                    quantity, symbol, receipt.transaction.price, receipt.balance
                )?;
            }
        }
        AlertAction::List => {
            let symbols = app.symbols()?;
            for a in engine.list_alerts(auth)? {
                writeln!(
                    out,
                    "{:<6} {:<8} {} {:.2} sell {} [{}]",
                    a.id,
                    symbols.get(&a.asset_id).map(String::as_str).unwrap_or("?"),
                    a.condition,
                    a.target_price,
                    a.quantity,
                    a.state
                )?;
            }
        }
        AlertAction::Toggle { id } => {
            let alert = engine.toggle_alert(auth, id)?;
            writeln!(out, "alert {} {}", alert.id, alert.state)?;
        }
        AlertAction::Cancel { id } => {
            let alert = engine.cancel_alert(auth, id)?;
            writeln!(out, "alert {} {}", alert.id, alert.state)?;
        }
        AlertAction::Delete { id } => {
            engine.delete_alert(auth, id)?;
            writeln!(out, "alert {} deleted", id)?;
        }
        AlertAction::Tick => {
            auth.require_admin()?;
            let report = engine.tick()?;
            writeln!(out, "{}", report)?;
        }
    }
    Ok(())
}

fn run_scheduler(app: &App, auth: &AuthContext) -> Result<(), StocksimError> {
    auth.require_admin()?;
    let settings = &app.settings;
    if !settings.run_alerts && !settings.run_dividends {
        warn!("both scheduler jobs are disabled, nothing to run");
        return Ok(());
    }
    let runtime = tokio::runtime::Runtime::new()?;
    let alerts = Arc::new(app.alerts());
    let dividends = Arc::new(DividendJob::new(app.dividends()));

    let mut scheduler = Scheduler::new(CancellationToken::new());
    if settings.run_alerts {
        scheduler = scheduler.with_job(alerts, settings.alert_interval);
    }
    if settings.run_dividends {
        scheduler = scheduler.with_job(dividends, settings.dividend_interval);
    }
    runtime.block_on(async move {
        scheduler.token().cancel_on_ctrl_c();
        scheduler.run().await;
    });
    Ok(())
}
