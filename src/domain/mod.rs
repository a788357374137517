//! Core domain types and the three engines.

pub mod error;
pub mod auth;
pub mod asset;
pub mod portfolio;
pub mod position;
pub mod transaction;
pub mod dividend;
pub mod alert;
pub mod reconcile;
pub mod execution;
pub mod dividend_engine;
pub mod alert_engine;
pub mod portfolio_service;
pub mod admin;
pub mod config_validation;
