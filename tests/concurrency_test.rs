//! Concurrent callers against one file-backed ledger.

#![cfg(feature = "sqlite")]

mod common;

use approx::assert_relative_eq;
use common::*;
use std::thread;
use stocksim::domain::alert::{AlertCondition, AlertState, NewAlert};
use stocksim::domain::asset::DividendFrequency;
use stocksim::domain::error::StocksimError;
use stocksim::domain::execution::Order;

const WORKERS: usize = 8;

#[test]
fn concurrent_buys_do_not_lose_updates() {
    let h = Harness::new();
    let alice = h.user("alice");
    let pid = h.portfolio(&alice);
    let acme = h.asset("ACME", 100.0);
    let trades = h.app.trades();

    thread::scope(|s| {
        for _ in 0..WORKERS {
            let trades = trades.clone();
            s.spawn(move || {
                for _ in 0..5 {
                    trades
                        .execute_transaction(&alice, &Order::buy(pid, acme, 2))
                        .unwrap();
                }
            });
        }
    });

    let bought = (WORKERS * 5 * 2) as i64;
    assert_eq!(h.quantity(&alice, pid, acme), bought);
    assert_relative_eq!(
        h.balance(&alice, pid),
        STARTING_BALANCE - bought as f64 * 100.0
    );
    assert_eq!(
        h.app.portfolios().transactions(&alice, pid).unwrap().len(),
        WORKERS * 5
    );
    assert!(h.app.portfolios().reconcile(&alice, pid).unwrap().is_empty());
}

#[test]
fn racing_buys_never_overdraw() {
    let h = Harness::new();
    let alice = h.user("alice");
    let pid = h.portfolio(&alice);
    let acme = h.asset("ACME", 1000.0);
    let trades = h.app.trades();

    let results: Vec<Result<(), StocksimError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let trades = trades.clone();
                s.spawn(move || {
                    trades
                        .execute_transaction(&alice, &Order::buy(pid, acme, 3))
                        .map(|_| ())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let filled = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(filled, 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, StocksimError::InsufficientFunds { .. })));
    assert_relative_eq!(h.balance(&alice, pid), 1000.0);
    assert_eq!(h.quantity(&alice, pid, acme), 9);
}

#[test]
fn dividend_pays_once_under_contention() {
    let h = Harness::new();
    let alice = h.user("alice");
    let pid = h.portfolio(&alice);
    let div = h.dividend_asset("DIV", 100.0, 4.0, DividendFrequency::Annual);
    h.app
        .trades()
        .execute_transaction(&alice, &Order::buy(pid, div, 10))
        .unwrap();
    let engine = h.app.dividends();
    let id = engine
        .run_scheduled_generation(&h.admin, date(2024, 1, 2))
        .unwrap()
        .created[0]
        .id;

    let paid = thread::scope(|s| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let engine = engine.clone();
                let admin = h.admin;
                s.spawn(move || engine.mark_paid(&admin, id).is_ok())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(paid, 1);
    assert_relative_eq!(h.balance(&alice, pid), 9000.0 + 40.0, epsilon = 1e-9);
    assert_eq!(engine.payouts(id).unwrap().len(), 1);
}

#[test]
fn concurrent_ticks_trigger_alert_once() {
    let h = Harness::new();
    let alice = h.user("alice");
    let pid = h.portfolio(&alice);
    let acme = h.asset("ACME", 90.0);
    h.app
        .trades()
        .execute_transaction(&alice, &Order::buy(pid, acme, 10))
        .unwrap();
    let engine = h.app.alerts();
    let id = engine
        .create_alert(
            &alice,
            &NewAlert {
                portfolio_id: pid,
                asset_id: acme,
                target_price: 100.0,
                condition: AlertCondition::Greater,
                quantity: 4,
            },
        )
        .unwrap()
        .alert
        .id;
    h.set_price(acme, 105.0);

    let triggered: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let engine = engine.clone();
                s.spawn(move || engine.tick().unwrap().triggered.len())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(triggered, 1);
    assert_eq!(h.quantity(&alice, pid, acme), 6);
    let alert = engine
        .list_alerts(&alice)
        .unwrap()
        .into_iter()
        .find(|a| a.id == id)
        .unwrap();
    assert_eq!(alert.state, AlertState::Triggered);
}
