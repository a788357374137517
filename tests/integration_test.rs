#![cfg(feature = "sqlite")]

mod common;

use approx::assert_relative_eq;
use common::*;
use stocksim::domain::alert::{AlertCondition, AlertState, NewAlert};
use stocksim::domain::asset::{DividendFrequency, NewAsset};
use stocksim::domain::auth::AuthContext;
use stocksim::domain::dividend::DividendState;
use stocksim::domain::error::{Entity, StocksimError};
use stocksim::domain::execution::Order;
use stocksim::domain::position::Position;
use stocksim::ports::ledger_port::LedgerPort;

mod trading {
    use super::*;

    #[test]
    fn buy_buy_sell_scenario() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 50.0);
        let trades = h.app.trades();

        let first = trades
            .execute_transaction(&alice, &Order::buy(pid, acme, 10))
            .unwrap();
        assert_relative_eq!(first.balance, 9500.0);
        let pos = first.position.unwrap();
        assert_eq!(pos.quantity, 10);
        assert_relative_eq!(pos.average_price, 50.0);

        h.set_price(acme, 60.0);
        let second = trades
            .execute_transaction(&alice, &Order::buy(pid, acme, 5))
            .unwrap();
        assert_relative_eq!(second.balance, 9200.0);
        let pos = second.position.unwrap();
        assert_eq!(pos.quantity, 15);
        assert_relative_eq!(pos.average_price, 800.0 / 15.0, epsilon = 1e-9);

        h.set_price(acme, 70.0);
        let third = trades
            .execute_transaction(&alice, &Order::sell(pid, acme, 15))
            .unwrap();
        assert_relative_eq!(third.balance, 10250.0);
        assert!(third.position.is_none());
        assert_eq!(h.quantity(&alice, pid, acme), 0);
        assert_relative_eq!(h.balance(&alice, pid), 10250.0);

        let history = h.app.portfolios().transactions(&alice, pid).unwrap();
        let fills: Vec<(i64, f64)> = history.iter().map(|t| (t.quantity, t.price)).collect();
        assert_eq!(fills, vec![(10, 50.0), (5, 60.0), (-15, 70.0)]);
        assert!(history.iter().all(|t| t.user_id == alice.user_id.unwrap()));
    }

    #[test]
    fn insufficient_funds_leaves_state_unchanged() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);

        let result = h
            .app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 101));
        assert!(matches!(result, Err(StocksimError::InsufficientFunds { .. })));
        assert_relative_eq!(h.balance(&alice, pid), STARTING_BALANCE);
        assert_eq!(h.quantity(&alice, pid, acme), 0);
        assert!(h.app.portfolios().transactions(&alice, pid).unwrap().is_empty());
    }

    #[test]
    fn overselling_leaves_state_unchanged() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let trades = h.app.trades();
        trades
            .execute_transaction(&alice, &Order::buy(pid, acme, 3))
            .unwrap();

        let result = trades.execute_transaction(&alice, &Order::sell(pid, acme, 4));
        match result {
            Err(StocksimError::InsufficientHoldings { requested, held }) => {
                assert_eq!((requested, held), (4, 3));
            }
            other => panic!("expected insufficient holdings, got {other:?}"),
        }
        assert_relative_eq!(h.balance(&alice, pid), 9700.0);
        assert_eq!(h.quantity(&alice, pid, acme), 3);
        assert_eq!(h.app.portfolios().transactions(&alice, pid).unwrap().len(), 1);
    }

    #[test]
    fn selling_unheld_asset_fails() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let result = h
            .app
            .trades()
            .execute_transaction(&alice, &Order::sell(pid, acme, 1));
        assert!(matches!(
            result,
            Err(StocksimError::InsufficientHoldings { held: 0, .. })
        ));
    }

    #[test]
    fn non_positive_quantity_rejected() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        for qty in [0, -5] {
            let result = h
                .app
                .trades()
                .execute_transaction(&alice, &Order::buy(pid, acme, qty));
            assert!(matches!(result, Err(StocksimError::Validation { .. })));
        }
    }

    #[test]
    fn unpriced_asset_cannot_trade() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let asset = h
            .app
            .admin()
            .add_asset(
                &h.admin,
                &NewAsset {
                    symbol: "NEW".into(),
                    name: "Newco".into(),
                    current_price: None,
                    dividend_pct: 0.0,
                    dividend_frequency: DividendFrequency::Annual,
                },
            )
            .unwrap();
        let result = h
            .app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, asset.id, 1));
        assert!(matches!(result, Err(StocksimError::PriceUnavailable { .. })));
    }

    #[test]
    fn unknown_asset_is_not_found() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let result = h
            .app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, 999, 1));
        assert!(result.is_err());
        assert_relative_eq!(h.balance(&alice, pid), STARTING_BALANCE);
    }

    #[test]
    fn failed_transaction_insert_rolls_back_buy() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        h.fail_inserts("transactions", "1");

        let result = h
            .app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 5));
        assert!(matches!(result, Err(StocksimError::DatabaseQuery { .. })));
        assert_relative_eq!(h.balance(&alice, pid), STARTING_BALANCE);
        assert_eq!(h.quantity(&alice, pid, acme), 0);
    }

    #[test]
    fn quantity_overflow_is_rejected() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let dust = h.asset("DUST", 1e-300);
        let trades = h.app.trades();
        trades
            .execute_transaction(&alice, &Order::buy(pid, dust, 1))
            .unwrap();
        let balance = h.balance(&alice, pid);

        let result = trades.execute_transaction(&alice, &Order::buy(pid, dust, i64::MAX));
        assert!(matches!(result, Err(StocksimError::Validation { .. })));
        assert_relative_eq!(h.balance(&alice, pid), balance);
        assert_eq!(h.quantity(&alice, pid, dust), 1);
    }

    #[test]
    fn portfolio_is_created_lazily_once() {
        let h = Harness::new();
        let alice = h.user("alice");
        let first = h.app.portfolios().ensure_portfolio(&alice).unwrap();
        let again = h.app.portfolios().ensure_portfolio(&alice).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(first.name, "Main");
        assert_relative_eq!(first.balance, STARTING_BALANCE);
        assert_eq!(h.app.portfolios().portfolios(&alice).unwrap().len(), 1);
    }

    #[test]
    fn summary_values_positions_at_current_price() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        h.app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 10))
            .unwrap();
        h.set_price(acme, 120.0);

        let summary = h.app.portfolios().portfolio_summary(&alice, pid).unwrap();
        assert_relative_eq!(summary.holdings_value(), 1200.0);
        assert_relative_eq!(summary.total_equity(), 10_200.0);
        assert_relative_eq!(summary.unrealized_pnl(), 200.0);
    }
}

mod access {
    use super::*;

    #[test]
    fn anonymous_caller_must_authenticate() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let result = h
            .app
            .trades()
            .execute_transaction(&AuthContext::anonymous(), &Order::buy(pid, acme, 1));
        assert!(matches!(result, Err(StocksimError::AuthenticationRequired)));
    }

    #[test]
    fn suspended_user_cannot_trade() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let suspended = h
            .app
            .admin()
            .set_user_suspended(&h.admin, alice.user_id.unwrap(), true)
            .unwrap();

        let result = h
            .app
            .trades()
            .execute_transaction(&suspended.auth_context(), &Order::buy(pid, acme, 1));
        assert!(matches!(result, Err(StocksimError::UserSuspended { .. })));
    }

    #[test]
    fn foreign_portfolio_looks_missing() {
        let h = Harness::new();
        let alice = h.user("alice");
        let bob = h.user("bob");
        let alice_pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);

        let result = h
            .app
            .trades()
            .execute_transaction(&bob, &Order::buy(alice_pid, acme, 1));
        assert!(matches!(
            result,
            Err(StocksimError::NotFound {
                entity: Entity::Portfolio,
                ..
            })
        ));
        assert_relative_eq!(h.balance(&alice, alice_pid), STARTING_BALANCE);
    }

    #[test]
    fn admin_operations_require_admin() {
        let h = Harness::new();
        let alice = h.user("alice");
        let acme = h.asset("ACME", 100.0);

        let new = NewAsset {
            symbol: "EVIL".into(),
            name: "Evil".into(),
            current_price: Some(1.0),
            dividend_pct: 0.0,
            dividend_frequency: DividendFrequency::Annual,
        };
        assert!(matches!(
            h.app.admin().add_asset(&alice, &new),
            Err(StocksimError::PermissionDenied { .. })
        ));
        assert!(matches!(
            h.app.admin().delete_asset(&alice, acme),
            Err(StocksimError::PermissionDenied { .. })
        ));
        assert!(matches!(
            h.app.dividends().run_scheduled_generation(&alice, date(2024, 1, 2)),
            Err(StocksimError::PermissionDenied { .. })
        ));
        assert!(matches!(
            h.app.dividends().mark_paid(&alice, 1),
            Err(StocksimError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn only_first_admin_registers_without_credentials() {
        let h = Harness::new();
        let result = h.app.admin().register_user(
            &AuthContext::anonymous(),
            "intruder",
            stocksim::domain::auth::Role::Admin,
        );
        assert!(result.is_err());
        assert!(h.app.admin().user_by_name("intruder").is_err());
    }

    #[test]
    fn duplicate_username_rejected() {
        let h = Harness::new();
        h.user("alice");
        let again = h.app.admin().register_user(
            &h.admin,
            "alice",
            stocksim::domain::auth::Role::User,
        );
        assert!(matches!(again, Err(StocksimError::Validation { .. })));
    }

    #[test]
    fn deleting_user_removes_their_portfolios() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        h.app
            .admin()
            .delete_user(&h.admin, alice.user_id.unwrap())
            .unwrap();

        let mut uow = h.ledger.begin().unwrap();
        assert!(uow.portfolio(pid).unwrap().is_none());
    }

    #[test]
    fn admin_cannot_delete_self() {
        let h = Harness::new();
        let result = h.app.admin().delete_user(&h.admin, h.admin.user_id.unwrap());
        assert!(matches!(result, Err(StocksimError::Validation { .. })));
    }
}

mod assets {
    use super::*;

    #[test]
    fn traded_asset_cannot_be_deleted() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        h.app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 1))
            .unwrap();

        let result = h.app.admin().delete_asset(&h.admin, acme);
        assert!(matches!(result, Err(StocksimError::Validation { .. })));
        assert!(h.app.admin().asset_by_symbol("ACME").is_ok());
    }

    #[test]
    fn untraded_asset_can_be_deleted() {
        let h = Harness::new();
        let acme = h.asset("ACME", 100.0);
        h.app.admin().delete_asset(&h.admin, acme).unwrap();
        assert!(matches!(
            h.app.admin().asset_by_symbol("ACME"),
            Err(StocksimError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_symbol_rejected() {
        let h = Harness::new();
        h.asset("ACME", 100.0);
        let again = h.app.admin().add_asset(
            &h.admin,
            &NewAsset {
                symbol: "ACME".into(),
                name: "Other".into(),
                current_price: None,
                dividend_pct: 0.0,
                dividend_frequency: DividendFrequency::Annual,
            },
        );
        assert!(matches!(again, Err(StocksimError::Validation { .. })));
    }
}

mod dividends {
    use super::*;

    #[test]
    fn generation_respects_frequency_threshold() {
        let h = Harness::new();
        let div = h.dividend_asset("DIV", 100.0, 8.0, DividendFrequency::Quarterly);
        let engine = h.app.dividends();

        let first = engine
            .run_scheduled_generation(&h.admin, date(2024, 1, 2))
            .unwrap();
        assert_eq!(first.created.len(), 1);
        assert_relative_eq!(first.created[0].amount_per_share, 2.0, epsilon = 1e-9);

        let early = engine
            .run_scheduled_generation(&h.admin, date(2024, 3, 31))
            .unwrap();
        assert!(early.created.is_empty());
        assert_eq!(early.skipped, vec![div]);

        let due = engine
            .run_scheduled_generation(&h.admin, date(2024, 4, 1))
            .unwrap();
        assert_eq!(due.created.len(), 1);
        assert_eq!(due.created[0].pay_date, date(2024, 4, 1));
    }

    #[test]
    fn monthly_dividend_divides_by_twelve() {
        let h = Harness::new();
        h.dividend_asset("MON", 100.0, 12.0, DividendFrequency::Monthly);
        let report = h
            .app
            .dividends()
            .run_scheduled_generation(&h.admin, date(2024, 1, 2))
            .unwrap();
        assert_relative_eq!(report.created[0].amount_per_share, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn non_paying_and_unpriced_assets() {
        let h = Harness::new();
        h.asset("PLAIN", 100.0);
        let unpriced = h
            .app
            .admin()
            .add_asset(
                &h.admin,
                &NewAsset {
                    symbol: "DARK".into(),
                    name: "Dark".into(),
                    current_price: None,
                    dividend_pct: 5.0,
                    dividend_frequency: DividendFrequency::Annual,
                },
            )
            .unwrap();

        let report = h
            .app
            .dividends()
            .run_scheduled_generation(&h.admin, date(2024, 1, 2))
            .unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, unpriced.id);
    }

    #[test]
    fn mark_paid_credits_holders_once() {
        let h = Harness::new();
        let alice = h.user("alice");
        let bob = h.user("bob");
        let (apid, bpid) = (h.portfolio(&alice), h.portfolio(&bob));
        let div = h.dividend_asset("DIV", 100.0, 12.0, DividendFrequency::Monthly);
        let trades = h.app.trades();
        trades
            .execute_transaction(&alice, &Order::buy(apid, div, 10))
            .unwrap();
        trades
            .execute_transaction(&bob, &Order::buy(bpid, div, 5))
            .unwrap();

        let engine = h.app.dividends();
        let generated = engine
            .run_scheduled_generation(&h.admin, date(2024, 1, 2))
            .unwrap();
        let dividend_id = generated.created[0].id;

        let report = engine.mark_paid(&h.admin, dividend_id).unwrap();
        assert_eq!(report.holders(), 2);
        assert_eq!(report.total_shares(), 15);
        assert_relative_eq!(report.total_paid(), 15.0, epsilon = 1e-9);
        for payout in &report.payouts {
            assert_relative_eq!(
                payout.amount,
                payout.quantity as f64 * report.dividend.amount_per_share
            );
        }
        assert_relative_eq!(h.balance(&alice, apid), 9010.0, epsilon = 1e-9);
        assert_relative_eq!(h.balance(&bob, bpid), 9505.0, epsilon = 1e-9);

        let second = engine.mark_paid(&h.admin, dividend_id);
        assert!(matches!(
            second,
            Err(StocksimError::InvalidStateTransition { .. })
        ));
        assert_relative_eq!(h.balance(&alice, apid), 9010.0, epsilon = 1e-9);
        assert_eq!(engine.payouts(dividend_id).unwrap().len(), 2);
    }

    #[test]
    fn failed_payout_leaves_dividend_pending() {
        let h = Harness::new();
        let alice = h.user("alice");
        let bob = h.user("bob");
        let (apid, bpid) = (h.portfolio(&alice), h.portfolio(&bob));
        let div = h.dividend_asset("DIV", 100.0, 12.0, DividendFrequency::Monthly);
        let trades = h.app.trades();
        trades
            .execute_transaction(&alice, &Order::buy(apid, div, 10))
            .unwrap();
        trades
            .execute_transaction(&bob, &Order::buy(bpid, div, 5))
            .unwrap();

        let engine = h.app.dividends();
        let id = engine
            .run_scheduled_generation(&h.admin, date(2024, 1, 2))
            .unwrap()
            .created[0]
            .id;
        h.fail_inserts("dividend_payouts", &format!("NEW.portfolio_id = {bpid}"));

        let result = engine.mark_paid(&h.admin, id);
        assert!(matches!(result, Err(StocksimError::DatabaseQuery { .. })));
        assert_relative_eq!(h.balance(&alice, apid), 9000.0);
        assert_relative_eq!(h.balance(&bob, bpid), 9500.0);
        assert!(engine.payouts(id).unwrap().is_empty());
        let pending = engine.list_dividends(Some(DividendState::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
    }

    #[test]
    fn cancelled_dividend_cannot_be_paid() {
        let h = Harness::new();
        h.dividend_asset("DIV", 100.0, 4.0, DividendFrequency::Annual);
        let engine = h.app.dividends();
        let id = engine
            .run_scheduled_generation(&h.admin, date(2024, 1, 2))
            .unwrap()
            .created[0]
            .id;

        let cancelled = engine.cancel_dividend(&h.admin, id).unwrap();
        assert_eq!(cancelled.state, DividendState::Cancelled);
        assert!(engine.mark_paid(&h.admin, id).is_err());
        assert!(engine.cancel_dividend(&h.admin, id).is_err());

        let pending = engine.list_dividends(Some(DividendState::Pending)).unwrap();
        assert!(pending.is_empty());
        assert_eq!(engine.list_dividends(None).unwrap().len(), 1);
    }

    #[test]
    fn paying_unknown_dividend_is_not_found() {
        let h = Harness::new();
        assert!(matches!(
            h.app.dividends().mark_paid(&h.admin, 42),
            Err(StocksimError::NotFound {
                entity: Entity::Dividend,
                ..
            })
        ));
    }
}

mod alerts {
    use super::*;

    fn sell_alert(pid: i64, asset: i64, condition: AlertCondition, target: f64, qty: i64) -> NewAlert {
        NewAlert {
            portfolio_id: pid,
            asset_id: asset,
            target_price: target,
            condition,
            quantity: qty,
        }
    }

    #[test]
    fn triggers_exactly_once_when_price_crosses() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 95.0);
        h.app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 10))
            .unwrap();

        let engine = h.app.alerts();
        let created = engine
            .create_alert(
                &alice,
                &sell_alert(pid, acme, AlertCondition::Greater, 100.0, 4),
            )
            .unwrap();
        assert_eq!(created.alert.state, AlertState::Active);
        assert!(created.execution.is_none());

        let quiet = engine.tick().unwrap();
        assert_eq!(quiet.evaluated, 1);
        assert!(quiet.triggered.is_empty());

        h.set_price(acme, 101.0);
        let fired = engine.tick().unwrap();
        assert_eq!(fired.triggered, vec![created.alert.id]);
        assert_eq!(h.quantity(&alice, pid, acme), 6);
        assert_relative_eq!(h.balance(&alice, pid), 9050.0 + 404.0);

        let stored = engine.list_alerts(&alice).unwrap();
        assert_eq!(stored[0].state, AlertState::Triggered);
        assert!(stored[0].triggered_at.is_some());

        h.set_price(acme, 150.0);
        let after = engine.tick().unwrap();
        assert_eq!(after.evaluated, 0);
        assert_eq!(h.quantity(&alice, pid, acme), 6);
    }

    #[test]
    fn satisfied_on_creation_sells_immediately() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        h.app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 5))
            .unwrap();

        let created = h
            .app
            .alerts()
            .create_alert(&alice, &sell_alert(pid, acme, AlertCondition::Less, 110.0, 5))
            .unwrap();
        assert_eq!(created.alert.state, AlertState::Triggered);
        let receipt = created.execution.unwrap();
        assert_relative_eq!(receipt.transaction.price, 100.0);
        assert_eq!(h.quantity(&alice, pid, acme), 0);
    }

    #[test]
    fn failed_sell_on_creation_stores_nothing() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);

        let result = h
            .app
            .alerts()
            .create_alert(&alice, &sell_alert(pid, acme, AlertCondition::Less, 110.0, 5));
        assert!(matches!(
            result,
            Err(StocksimError::InsufficientHoldings { .. })
        ));
        assert!(h.app.alerts().list_alerts(&alice).unwrap().is_empty());
    }

    #[test]
    fn failed_sell_on_tick_is_retried() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let engine = h.app.alerts();
        let created = engine
            .create_alert(&alice, &sell_alert(pid, acme, AlertCondition::Less, 90.0, 3))
            .unwrap();

        h.set_price(acme, 80.0);
        let report = engine.tick().unwrap();
        assert_eq!(report.retried.len(), 1);
        assert_eq!(report.retried[0].0, created.alert.id);
        assert_eq!(
            engine.list_alerts(&alice).unwrap()[0].state,
            AlertState::Active
        );

        h.app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 3))
            .unwrap();
        let retry = engine.tick().unwrap();
        assert_eq!(retry.triggered, vec![created.alert.id]);
        assert_eq!(h.quantity(&alice, pid, acme), 0);
    }

    #[test]
    fn paused_alerts_are_not_evaluated() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        h.app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 2))
            .unwrap();
        let engine = h.app.alerts();
        let id = engine
            .create_alert(&alice, &sell_alert(pid, acme, AlertCondition::Greater, 120.0, 2))
            .unwrap()
            .alert
            .id;

        assert_eq!(engine.toggle_alert(&alice, id).unwrap().state, AlertState::Paused);
        h.set_price(acme, 130.0);
        assert_eq!(engine.tick().unwrap().evaluated, 0);
        assert_eq!(h.quantity(&alice, pid, acme), 2);

        assert_eq!(engine.toggle_alert(&alice, id).unwrap().state, AlertState::Active);
        assert_eq!(engine.tick().unwrap().triggered, vec![id]);
    }

    #[test]
    fn terminal_alerts_reject_changes() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let engine = h.app.alerts();
        let id = engine
            .create_alert(&alice, &sell_alert(pid, acme, AlertCondition::Greater, 200.0, 1))
            .unwrap()
            .alert
            .id;

        assert_eq!(engine.cancel_alert(&alice, id).unwrap().state, AlertState::Cancelled);
        assert!(matches!(
            engine.toggle_alert(&alice, id),
            Err(StocksimError::InvalidStateTransition { .. })
        ));
        engine.delete_alert(&alice, id).unwrap();
        assert!(engine.list_alerts(&alice).unwrap().is_empty());
    }

    #[test]
    fn alerts_are_private_to_their_owner() {
        let h = Harness::new();
        let alice = h.user("alice");
        let bob = h.user("bob");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let engine = h.app.alerts();
        let id = engine
            .create_alert(&alice, &sell_alert(pid, acme, AlertCondition::Greater, 200.0, 1))
            .unwrap()
            .alert
            .id;

        assert!(engine.list_alerts(&bob).unwrap().is_empty());
        assert!(matches!(
            engine.cancel_alert(&bob, id),
            Err(StocksimError::NotFound { .. })
        ));
        assert!(matches!(
            engine.create_alert(&bob, &sell_alert(pid, acme, AlertCondition::Greater, 200.0, 1)),
            Err(StocksimError::NotFound { .. })
        ));
    }

    #[test]
    fn invalid_alerts_rejected() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let engine = h.app.alerts();
        for (target, qty) in [(0.0, 1), (-1.0, 1), (50.0, 0)] {
            assert!(matches!(
                engine.create_alert(&alice, &sell_alert(pid, acme, AlertCondition::Greater, target, qty)),
                Err(StocksimError::Validation { .. })
            ));
        }
    }
}

mod reconciliation {
    use super::*;

    #[test]
    fn consistent_ledger_has_no_discrepancies() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        let trades = h.app.trades();
        trades
            .execute_transaction(&alice, &Order::buy(pid, acme, 7))
            .unwrap();
        trades
            .execute_transaction(&alice, &Order::sell(pid, acme, 2))
            .unwrap();
        assert!(h.app.portfolios().reconcile(&alice, pid).unwrap().is_empty());
    }

    #[test]
    fn rebuild_repairs_tampered_position() {
        let h = Harness::new();
        let alice = h.user("alice");
        let pid = h.portfolio(&alice);
        let acme = h.asset("ACME", 100.0);
        h.app
            .trades()
            .execute_transaction(&alice, &Order::buy(pid, acme, 7))
            .unwrap();

        {
            let mut uow = h.ledger.begin().unwrap();
            uow.save_position(&Position {
                portfolio_id: pid,
                asset_id: acme,
                quantity: 3,
                average_price: 100.0,
            })
            .unwrap();
            uow.commit().unwrap();
        }

        let found = h.app.portfolios().reconcile(&alice, pid).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ledger_quantity, 7);
        assert_eq!(found[0].position_quantity, 3);

        assert!(matches!(
            h.app.trades().rebuild_positions(&alice, pid),
            Err(StocksimError::PermissionDenied { .. })
        ));
        let rebuilt = h.app.trades().rebuild_positions(&h.admin, pid).unwrap();
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].quantity, 7);
        assert!(h.app.portfolios().reconcile(&alice, pid).unwrap().is_empty());
    }
}
