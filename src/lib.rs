//! stocksim: stock-market simulation core.
//!
//! Hexagonal architecture: domain logic and the transaction, dividend and alert
//! engines in [`domain`], port traits in [`ports`], storage, clock, config and
//! scheduling implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
