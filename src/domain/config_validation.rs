//! Configuration validation and the settings derived from it.

use std::time::Duration;

use crate::domain::error::StocksimError;
use crate::domain::portfolio::DEFAULT_STARTING_BALANCE;
use crate::domain::portfolio_service::DEFAULT_PORTFOLIO_NAME;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_ALERT_INTERVAL_SECS: i64 = 300;
pub const DEFAULT_DIVIDEND_INTERVAL_SECS: i64 = 86_400;
pub const DEFAULT_POOL_SIZE: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

/// Validated runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend: Backend,
    pub starting_balance: f64,
    pub default_portfolio_name: String,
    pub alert_interval: Duration,
    pub dividend_interval: Duration,
    pub run_alerts: bool,
    pub run_dividends: bool,
    pub log_level: Option<String>,
}

impl Settings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StocksimError> {
        validate_config(config)?;
        Ok(Settings {
            backend: backend(config)?,
            starting_balance: config.get_double(
                "portfolio",
                "starting_balance",
                DEFAULT_STARTING_BALANCE,
            ),
            default_portfolio_name: config
                .get_string("portfolio", "default_name")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PORTFOLIO_NAME.to_string()),
            alert_interval: secs(config.get_int(
                "scheduler",
                "alert_interval_secs",
                DEFAULT_ALERT_INTERVAL_SECS,
            )),
            dividend_interval: secs(config.get_int(
                "scheduler",
                "dividend_interval_secs",
                DEFAULT_DIVIDEND_INTERVAL_SECS,
            )),
            run_alerts: config.get_bool("scheduler", "run_alerts", true),
            run_dividends: config.get_bool("scheduler", "run_dividends", true),
            log_level: config.get_string("logging", "level"),
        })
    }
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(value.max(1) as u64)
}

fn invalid(section: &str, key: &str, reason: &str) -> StocksimError {
    StocksimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), StocksimError> {
    validate_database(config)?;
    validate_portfolio(config)?;
    validate_scheduler(config)?;
    validate_logging(config)?;
    Ok(())
}

fn backend(config: &dyn ConfigPort) -> Result<Backend, StocksimError> {
    match config.get_string("database", "backend") {
        None => Ok(Backend::Sqlite),
        Some(s) => match s.trim().to_lowercase().as_str() {
            "" | "sqlite" => Ok(Backend::Sqlite),
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            _ => Err(invalid(
                "database",
                "backend",
                "backend must be 'sqlite' or 'postgres'",
            )),
        },
    }
}

fn validate_database(config: &dyn ConfigPort) -> Result<(), StocksimError> {
    match backend(config)? {
        Backend::Sqlite => {
            config.require_string("database", "path")?;
            if config.get_int("database", "pool_size", DEFAULT_POOL_SIZE) < 1 {
                return Err(invalid("database", "pool_size", "pool_size must be at least 1"));
            }
        }
        Backend::Postgres => {
            config.require_string("database", "conninfo")?;
        }
    }
    Ok(())
}

fn validate_portfolio(config: &dyn ConfigPort) -> Result<(), StocksimError> {
    let balance = config.get_double("portfolio", "starting_balance", DEFAULT_STARTING_BALANCE);
    if !balance.is_finite() || balance <= 0.0 {
        return Err(invalid(
            "portfolio",
            "starting_balance",
            "starting_balance must be positive",
        ));
    }
    Ok(())
}

fn validate_scheduler(config: &dyn ConfigPort) -> Result<(), StocksimError> {
    for (key, default) in [
        ("alert_interval_secs", DEFAULT_ALERT_INTERVAL_SECS),
        ("dividend_interval_secs", DEFAULT_DIVIDEND_INTERVAL_SECS),
    ] {
        if config.get_int("scheduler", key, default) <= 0 {
            return Err(invalid("scheduler", key, "interval must be positive"));
        }
    }
    Ok(())
}

fn validate_logging(config: &dyn ConfigPort) -> Result<(), StocksimError> {
    match config.get_string("logging", "level") {
        None => Ok(()),
        Some(level) => level
            .parse::<log::LevelFilter>()
            .map(|_| ())
            .map_err(|_| invalid("logging", "level", "unknown log level")),
    }
}
