mod common;

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use address_ledger::domain::errors::LedgerError;
use address_ledger::domain::models::{AuditCall, Fingerprint, LedgerState, BTC};
use address_ledger::domain::services::Outcome;
use address_ledger::infrastructure::lock::LockService;

use common::{payment, setup, TxBuilder, ADDRESS, EXTERNAL, NETWORK, SCRIPT_A};

fn call(name: &str) -> AuditCall {
    AuditCall::new(name, "test", json!({ "reason": name }))
}

#[tokio::test]
async fn unconfirmed_receive_then_confirmation() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    let t1 = payment("t1", "p0", ADDRESS, SCRIPT_A, 400_000);

    assert_eq!(ledger.receive(ADDRESS, &t1, 0).await.unwrap(), Outcome::Applied);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 400_000);
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 0);

    assert_eq!(ledger.receive(ADDRESS, &t1, 2).await.unwrap(), Outcome::Applied);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 0);
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 400_000);

    let utxos = &ctx.services.repositories.utxo;
    let row = utxos.find(utxos.connection(), "t1", 0).await.unwrap().unwrap();
    assert_eq!(row.utxo_type, "confirmed");
    assert!(!row.spent);
}

#[tokio::test]
async fn redelivered_receives_change_nothing() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    let t1 = payment("t1", "p0", ADDRESS, SCRIPT_A, 400_000);

    ledger.receive(ADDRESS, &t1, 0).await.unwrap();
    assert_eq!(
        ledger.receive(ADDRESS, &t1, 0).await.unwrap(),
        Outcome::AlreadyApplied
    );
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 400_000);

    ledger.receive(ADDRESS, &t1, 3).await.unwrap();
    assert_eq!(
        ledger.receive(ADDRESS, &t1, 4).await.unwrap(),
        Outcome::AlreadyApplied
    );
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 400_000);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 0);
}

#[tokio::test]
async fn confirmed_receive_without_provisional_credit() {
    let ctx = setup().await;
    let t1 = payment("t1", "p0", ADDRESS, SCRIPT_A, 250_000);

    ctx.services.ledger.receive(ADDRESS, &t1, 6).await.unwrap();

    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 250_000);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 0);
}

#[tokio::test]
async fn overstated_provisional_credit_is_corrected_on_confirmation() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    let seen = TxBuilder::new("t1")
        .input("p0", 0, EXTERNAL, 600_000)
        .output(ADDRESS, SCRIPT_A, 500_000)
        .received(ADDRESS, BTC, 500_000)
        .received(ADDRESS, "TOKEN", 10)
        .build();
    let validated = TxBuilder::new("t1")
        .input("p0", 0, EXTERNAL, 600_000)
        .output(ADDRESS, SCRIPT_A, 500_000)
        .received(ADDRESS, BTC, 500_000)
        .build();

    ledger.receive(ADDRESS, &seen, 0).await.unwrap();
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, "TOKEN").await, 10);

    ledger.receive(ADDRESS, &validated, 2).await.unwrap();
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 500_000);
    assert_eq!(ctx.balance(LedgerState::Confirmed, "TOKEN").await, 0);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, "TOKEN").await, 0);
}

#[tokio::test]
async fn send_earmarks_then_debits() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    let funding = payment("f1", "p0", ADDRESS, SCRIPT_A, 1_000);
    ledger.receive(ADDRESS, &funding, 2).await.unwrap();
    assert_eq!(ctx.held(BTC).await, 1_000);

    let spend = TxBuilder::new("s1")
        .input("f1", 0, ADDRESS, 1_000)
        .output(EXTERNAL, "76a914cc88ac", 900)
        .spent(ADDRESS, BTC, 900)
        .build();

    assert_eq!(ledger.send(ADDRESS, &spend, 0).await.unwrap(), Outcome::Applied);
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 100);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 900);
    assert_eq!(ctx.held(BTC).await, 1_000);

    // Redelivered while still in the mempool
    assert_eq!(
        ledger.send(ADDRESS, &spend, 0).await.unwrap(),
        Outcome::AlreadyApplied
    );
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 100);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 900);
    assert_eq!(ctx.held(BTC).await, 1_000);

    let utxos = &ctx.services.repositories.utxo;
    let row = utxos.find(utxos.connection(), "f1", 0).await.unwrap().unwrap();
    assert_eq!(row.utxo_type, "sending");
    assert_eq!(row.spent_txid.as_deref(), Some("s1"));

    assert_eq!(ledger.send(ADDRESS, &spend, 1).await.unwrap(), Outcome::Applied);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 0);
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 100);
    assert_eq!(ctx.held(BTC).await, 100);

    let row = utxos.find(utxos.connection(), "f1", 0).await.unwrap().unwrap();
    assert_eq!(row.utxo_type, "sent");

    assert_eq!(
        ledger.send(ADDRESS, &spend, 2).await.unwrap(),
        Outcome::AlreadyApplied
    );
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 100);
    assert_eq!(ctx.held(BTC).await, 100);
}

#[tokio::test]
async fn send_beyond_available_funds_is_refused() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    ledger
        .receive(ADDRESS, &payment("f1", "p0", ADDRESS, SCRIPT_A, 1_000), 2)
        .await
        .unwrap();

    let spend = TxBuilder::new("s1")
        .input("f1", 0, ADDRESS, 1_000)
        .spent(ADDRESS, BTC, 5_000)
        .build();

    let err = ledger.send(ADDRESS, &spend, 0).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            available: 1_000,
            requested: 5_000,
            ..
        }
    ));
    // Rolled back as a whole
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 1_000);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 0);
}

#[tokio::test]
async fn send_can_draw_on_unconfirmed_funds() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    ledger
        .receive(ADDRESS, &payment("f1", "p0", ADDRESS, SCRIPT_A, 700), 0)
        .await
        .unwrap();

    let spend = TxBuilder::new("s1")
        .input("f1", 0, ADDRESS, 700)
        .spent(ADDRESS, BTC, 600)
        .build();
    ledger.send(ADDRESS, &spend, 0).await.unwrap();
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 100);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 600);

    // The funding confirms while part of it is already being sent
    ledger
        .receive(ADDRESS, &payment("f1", "p0", ADDRESS, SCRIPT_A, 700), 2)
        .await
        .unwrap();
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 100);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 600);

    ledger.send(ADDRESS, &spend, 1).await.unwrap();
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 100);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 0);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 0);
}

#[tokio::test]
async fn invalidated_send_restores_inputs_to_their_prior_type() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    let utxos = &ctx.services.repositories.utxo;
    ledger
        .receive(ADDRESS, &payment("f1", "p0", ADDRESS, SCRIPT_A, 700), 0)
        .await
        .unwrap();

    let spend = TxBuilder::new("s1")
        .input("f1", 0, ADDRESS, 700)
        .spent(ADDRESS, BTC, 600)
        .build();
    ledger.send(ADDRESS, &spend, 0).await.unwrap();
    assert_eq!(ctx.held(BTC).await, 700);

    ledger.invalidate("s1").await.unwrap();
    let row = utxos.find(utxos.connection(), "f1", 0).await.unwrap().unwrap();
    assert_eq!(row.utxo_type, "unconfirmed");
    assert!(!row.spent);
    assert_eq!(row.spent_txid, None);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 700);
    assert_eq!(ctx.held(BTC).await, 700);

    // Spent again, and the funding confirms before the spend is retracted
    let respend = TxBuilder::new("s2")
        .input("f1", 0, ADDRESS, 700)
        .spent(ADDRESS, BTC, 600)
        .build();
    ledger.send(ADDRESS, &respend, 0).await.unwrap();
    ledger
        .receive(ADDRESS, &payment("f1", "p0", ADDRESS, SCRIPT_A, 700), 2)
        .await
        .unwrap();
    assert_eq!(ctx.held(BTC).await, 700);

    ledger.invalidate("s2").await.unwrap();
    let row = utxos.find(utxos.connection(), "f1", 0).await.unwrap().unwrap();
    assert_eq!(row.utxo_type, "confirmed");
    assert!(!row.spent);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 0);
    assert_eq!(ctx.held(BTC).await, 700);
}

#[tokio::test]
async fn invalidation_removes_every_effect() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    ledger
        .receive(ADDRESS, &payment("f1", "p0", ADDRESS, SCRIPT_A, 1_000), 2)
        .await
        .unwrap();

    let spend = TxBuilder::new("s1")
        .input("f1", 0, ADDRESS, 1_000)
        .spent(ADDRESS, BTC, 900)
        .build();
    ledger.send(ADDRESS, &spend, 0).await.unwrap();

    let outcome = ledger.invalidate("s1").await.unwrap();
    assert_eq!(outcome.addresses, vec![ADDRESS.to_string()]);
    assert!(outcome.entries_removed > 0);
    assert_eq!(outcome.utxos_restored, 1);

    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 1_000);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 0);

    let repos = &ctx.services.repositories;
    let entries = repos
        .ledger
        .entries_for_txid(repos.ledger.connection(), "s1")
        .await
        .unwrap();
    assert!(entries.is_empty());

    let row = repos
        .utxo
        .find(repos.utxo.connection(), "f1", 0)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.spent);
    assert_eq!(row.utxo_type, "confirmed");
}

#[tokio::test]
async fn invalidating_an_unknown_txid_is_harmless() {
    let ctx = setup().await;
    let outcome = ctx.services.ledger.invalidate("nope").await.unwrap();
    assert!(outcome.addresses.is_empty());
    assert_eq!(outcome.entries_removed, 0);
}

#[tokio::test]
async fn unknown_address_is_rejected() {
    let ctx = setup().await;
    let tx = payment("t1", "p0", EXTERNAL, SCRIPT_A, 1_000);
    let err = ctx.services.ledger.receive(EXTERNAL, &tx, 0).await.unwrap_err();
    assert!(matches!(err, LedgerError::MissingAddress { .. }));
}

#[tokio::test]
async fn balance_changes_wait_for_confirmations_and_apply_once() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    let dividend = Fingerprint::derive(&["dividend", "d1", ADDRESS]);

    assert_eq!(
        ledger
            .balance_change_credit(ADDRESS, NETWORK, "XCP", 50, &dividend, 1)
            .await
            .unwrap(),
        Outcome::BelowThreshold
    );
    assert_eq!(ctx.balance(LedgerState::Confirmed, "XCP").await, 0);

    assert_eq!(
        ledger
            .balance_change_credit(ADDRESS, NETWORK, "XCP", 50, &dividend, 2)
            .await
            .unwrap(),
        Outcome::Applied
    );
    assert_eq!(
        ledger
            .balance_change_credit(ADDRESS, NETWORK, "XCP", 50, &dividend, 3)
            .await
            .unwrap(),
        Outcome::AlreadyApplied
    );
    assert_eq!(ctx.balance(LedgerState::Confirmed, "XCP").await, 50);

    let escrow = Fingerprint::derive(&["order", "o1", ADDRESS]);
    ledger
        .balance_change_debit(ADDRESS, NETWORK, "XCP", 20, &escrow, 2)
        .await
        .unwrap();
    assert_eq!(ctx.balance(LedgerState::Confirmed, "XCP").await, 30);

    let too_much = Fingerprint::derive(&["order", "o2", ADDRESS]);
    let err = ledger
        .balance_change_debit(ADDRESS, NETWORK, "XCP", 31, &too_much, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let err = ledger
        .balance_change_credit(ADDRESS, NETWORK, "XCP", 0, &too_much, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuantity(_)));
}

#[tokio::test]
async fn transfer_and_consolidate_accounts() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    let addresses = &ctx.services.addresses;
    ledger
        .receive(ADDRESS, &payment("f1", "p0", ADDRESS, SCRIPT_A, 1_000), 2)
        .await
        .unwrap();
    addresses
        .create_account(ADDRESS, NETWORK, "savings", &json!({}))
        .await
        .unwrap();
    addresses
        .create_account(ADDRESS, NETWORK, "escrow", &json!({}))
        .await
        .unwrap();

    ledger
        .transfer(ADDRESS, NETWORK, "default", "savings", BTC, 300, &call("transfer"))
        .await
        .unwrap();
    ledger
        .transfer(ADDRESS, NETWORK, "default", "escrow", BTC, 200, &call("transfer"))
        .await
        .unwrap();
    assert_eq!(ctx.account_balance("default", LedgerState::Confirmed, BTC).await, 500);
    assert_eq!(ctx.account_balance("savings", LedgerState::Confirmed, BTC).await, 300);
    assert_eq!(ctx.account_balance("escrow", LedgerState::Confirmed, BTC).await, 200);

    let err = ledger
        .transfer(ADDRESS, NETWORK, "savings", "escrow", BTC, 301, &call("transfer"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let moved = ledger
        .consolidate_all_accounts(ADDRESS, NETWORK, "default", &call("consolidate"))
        .await
        .unwrap();
    assert_eq!(moved.get(LedgerState::Confirmed, BTC), 500);
    assert_eq!(ctx.account_balance("default", LedgerState::Confirmed, BTC).await, 1_000);
    assert_eq!(ctx.account_balance("savings", LedgerState::Confirmed, BTC).await, 0);
    // Address totals never change through internal moves
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 1_000);
}

#[tokio::test]
async fn close_refuses_pending_funds() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    ctx.services
        .addresses
        .create_account(ADDRESS, NETWORK, "savings", &json!({}))
        .await
        .unwrap();

    let t1 = payment("t1", "p0", ADDRESS, SCRIPT_A, 400_000);
    ledger.receive(ADDRESS, &t1, 0).await.unwrap();
    let moved = ledger
        .transfer_all_by_txid(ADDRESS, NETWORK, "default", "savings", "t1", &call("move"))
        .await
        .unwrap();
    assert_eq!(moved.get(LedgerState::Unconfirmed, BTC), 400_000);

    let err = ledger
        .close(ADDRESS, NETWORK, "savings", "default", &call("close"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountHasPendingFunds { .. }));

    // Confirmation follows the funds into the account holding them
    ledger.receive(ADDRESS, &t1, 2).await.unwrap();
    assert_eq!(
        ctx.account_balance("savings", LedgerState::Confirmed, BTC).await,
        400_000
    );

    let moved = ledger
        .close(ADDRESS, NETWORK, "savings", "default", &call("close"))
        .await
        .unwrap();
    assert_eq!(moved.get(LedgerState::Confirmed, BTC), 400_000);
    assert_eq!(
        ctx.account_balance("default", LedgerState::Confirmed, BTC).await,
        400_000
    );

    let err = ledger
        .transfer(ADDRESS, NETWORK, "default", "savings", BTC, 1, &call("transfer"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountInactive(_)));

    let err = ledger
        .close(ADDRESS, NETWORK, "default", "savings", &call("close"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CannotCloseDefault(_)));
}

#[tokio::test]
async fn pruning_keeps_balances() {
    let ctx = setup().await;
    let ledger = &ctx.services.ledger;
    for (i, sat) in [1_000, 2_000, 3_000].iter().enumerate() {
        let txid = format!("f{}", i);
        let prev = format!("p{}", i);
        ledger
            .receive(ADDRESS, &payment(&txid, &prev, ADDRESS, SCRIPT_A, *sat), 2)
            .await
            .unwrap();
    }
    let before = Utc::now() + chrono::Duration::minutes(1);
    let summary = ledger
        .prune_confirmed_history(before, &call("prune"))
        .await
        .unwrap();

    assert_eq!(summary.addresses, 1);
    assert_eq!(summary.collapsed, 1);
    assert_eq!(summary.entries_removed, 3);
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 6_000);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 0);
}

#[tokio::test]
async fn mutations_wait_for_the_address_lock() {
    let ctx = setup().await;
    let key = format!("address:{}:{}", NETWORK, ADDRESS);
    let guard = ctx
        .locks
        .acquire(&key, Duration::from_millis(50))
        .await
        .unwrap();

    let t1 = payment("t1", "p0", ADDRESS, SCRIPT_A, 1_000);
    let err = ctx.services.ledger.receive(ADDRESS, &t1, 0).await.unwrap_err();
    assert!(matches!(err, LedgerError::Lock(_)));
    assert!(err.is_transient());

    guard.release();
    ctx.services.ledger.receive(ADDRESS, &t1, 0).await.unwrap();
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 1_000);
}
