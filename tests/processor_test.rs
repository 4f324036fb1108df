mod common;

use address_ledger::domain::models::{
    BalanceChange, Fingerprint, LedgerEvent, LedgerState, BTC,
};

use common::{block, payment, setup, TxBuilder, ADDRESS, EXTERNAL, NETWORK, OTHER, SCRIPT_A};

#[tokio::test]
async fn malleated_transaction_replaces_the_one_first_seen() {
    let mut ctx = setup().await;
    let processor = &ctx.services.processor;
    let t1 = payment("t1", "p0", ADDRESS, SCRIPT_A, 400_000);
    let t2 = payment("t2", "p0", ADDRESS, SCRIPT_A, 400_000);

    processor
        .process(&LedgerEvent::Transaction {
            transaction: t1.clone(),
            confirmations: 0,
        })
        .await
        .unwrap();
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 400_000);

    processor
        .process(&LedgerEvent::Block {
            block: block(100, vec![t1.clone()]),
            confirmations: 2,
        })
        .await
        .unwrap();
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 400_000);
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 0);
    assert!(ctx.signals.try_recv().is_err());

    // A reorg confirms the malleated copy spending the same input
    processor
        .process(&LedgerEvent::Block {
            block: block(100, vec![t2]),
            confirmations: 2,
        })
        .await
        .unwrap();

    let signal = ctx.signals.try_recv().unwrap();
    assert_eq!(signal.invalid_txid, "t1");
    assert_eq!(signal.replacing_txid, "t2");
    assert_eq!(signal.affected_addresses, vec![ADDRESS.to_string()]);

    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 400_000);
    let repos = &ctx.services.repositories;
    assert!(repos
        .ledger
        .entries_for_txid(repos.ledger.connection(), "t1")
        .await
        .unwrap()
        .is_empty());
    assert!(repos
        .utxo
        .find(repos.utxo.connection(), "t1", 0)
        .await
        .unwrap()
        .is_none());
    assert!(repos
        .utxo
        .find(repos.utxo.connection(), "t2", 0)
        .await
        .unwrap()
        .is_some());
    assert!(repos
        .provisional
        .find(repos.provisional.connection(), "t1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn double_spent_mempool_transaction_is_retracted_before_the_block_applies() {
    let mut ctx = setup().await;
    let processor = &ctx.services.processor;
    processor
        .process(&LedgerEvent::Transaction {
            transaction: payment("f1", "p0", ADDRESS, SCRIPT_A, 10_000),
            confirmations: 2,
        })
        .await
        .unwrap();

    let first = TxBuilder::new("rbf1")
        .input("f1", 0, ADDRESS, 10_000)
        .output(EXTERNAL, "76a914cc88ac", 9_000)
        .spent(ADDRESS, BTC, 10_000)
        .build();
    let replacement = TxBuilder::new("rbf2")
        .input("f1", 0, ADDRESS, 10_000)
        .output(EXTERNAL, "76a914cc88ac", 8_000)
        .spent(ADDRESS, BTC, 10_000)
        .build();

    processor
        .process(&LedgerEvent::Transaction {
            transaction: first,
            confirmations: 0,
        })
        .await
        .unwrap();
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 10_000);

    processor
        .process(&LedgerEvent::Block {
            block: block(101, vec![replacement]),
            confirmations: 1,
        })
        .await
        .unwrap();

    let signal = ctx.signals.try_recv().unwrap();
    assert_eq!(signal.invalid_txid, "rbf1");
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 0);
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 0);

    let repos = &ctx.services.repositories;
    let row = repos
        .utxo
        .find(repos.utxo.connection(), "f1", 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.spent_txid.as_deref(), Some("rbf2"));
    assert_eq!(row.utxo_type, "sent");
}

#[tokio::test]
async fn retracting_a_double_spent_parent_retracts_its_mempool_children() {
    let mut ctx = setup().await;
    let processor = &ctx.services.processor;
    let parent = payment("t1", "p0", ADDRESS, SCRIPT_A, 1_000);
    let child = TxBuilder::new("t3")
        .input("t1", 0, ADDRESS, 1_000)
        .output(EXTERNAL, "76a914cc88ac", 600)
        .spent(ADDRESS, BTC, 600)
        .build();

    for transaction in [parent, child] {
        processor
            .process(&LedgerEvent::Transaction {
                transaction,
                confirmations: 0,
            })
            .await
            .unwrap();
    }
    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 400);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 600);

    // The block confirms a different spend of the parent's input
    processor
        .process(&LedgerEvent::Block {
            block: block(102, vec![payment("t2", "p0", ADDRESS, SCRIPT_A, 1_000)]),
            confirmations: 1,
        })
        .await
        .unwrap();

    let first = ctx.signals.try_recv().unwrap();
    let second = ctx.signals.try_recv().unwrap();
    assert_eq!(first.invalid_txid, "t3");
    assert_eq!(second.invalid_txid, "t1");
    assert_eq!(first.replacing_txid, "t2");
    assert_eq!(second.replacing_txid, "t2");
    assert!(ctx.signals.try_recv().is_err());

    assert_eq!(ctx.balance(LedgerState::Unconfirmed, BTC).await, 0);
    assert_eq!(ctx.balance(LedgerState::Sending, BTC).await, 0);
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 1_000);

    let repos = &ctx.services.repositories;
    for txid in ["t1", "t3"] {
        assert!(repos
            .provisional
            .find(repos.provisional.connection(), txid)
            .await
            .unwrap()
            .is_none());
    }
    assert!(repos
        .utxo
        .find(repos.utxo.connection(), "t1", 0)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn invalidation_events_retract_descendants_too() {
    let mut ctx = setup().await;
    let processor = &ctx.services.processor;
    let parent = payment("t1", "p0", ADDRESS, SCRIPT_A, 1_000);
    let child = TxBuilder::new("t3")
        .input("t1", 0, ADDRESS, 1_000)
        .output(EXTERNAL, "76a914cc88ac", 600)
        .spent(ADDRESS, BTC, 600)
        .build();

    for transaction in [parent.clone(), child] {
        processor
            .process(&LedgerEvent::Transaction {
                transaction,
                confirmations: 0,
            })
            .await
            .unwrap();
    }

    processor
        .process(&LedgerEvent::Invalidated {
            transaction: parent,
            replacing_txid: "t2".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(ctx.signals.try_recv().unwrap().invalid_txid, "t3");
    assert_eq!(ctx.signals.try_recv().unwrap().invalid_txid, "t1");
    assert!(ctx.balances_of(ADDRESS).await.is_empty());
}

#[tokio::test]
async fn transactions_between_monitored_addresses_touch_both() {
    let ctx = setup().await;
    ctx.services.addresses.register(OTHER, NETWORK).await.unwrap();
    let processor = &ctx.services.processor;
    processor
        .process(&LedgerEvent::Transaction {
            transaction: payment("f1", "p0", ADDRESS, SCRIPT_A, 5_000),
            confirmations: 3,
        })
        .await
        .unwrap();

    let internal = TxBuilder::new("i1")
        .input("f1", 0, ADDRESS, 5_000)
        .output(OTHER, common::SCRIPT_B, 3_000)
        .output(ADDRESS, SCRIPT_A, 1_500)
        .spent(ADDRESS, BTC, 5_000)
        .received(ADDRESS, BTC, 1_500)
        .received(OTHER, BTC, 3_000)
        .build();
    processor
        .process(&LedgerEvent::Transaction {
            transaction: internal,
            confirmations: 0,
        })
        .await
        .unwrap();

    let ours = ctx.balances_of(ADDRESS).await;
    assert_eq!(ours.get(LedgerState::Sending, BTC), 5_000);
    assert_eq!(ours.get(LedgerState::Unconfirmed, BTC), 1_500);
    let theirs = ctx.balances_of(OTHER).await;
    assert_eq!(theirs.get(LedgerState::Unconfirmed, BTC), 3_000);

    // Retracting it unwinds both addresses together
    let outcome = ctx.services.ledger.invalidate("i1").await.unwrap();
    assert_eq!(outcome.addresses.len(), 2);
    assert_eq!(ctx.balances_of(ADDRESS).await.get(LedgerState::Confirmed, BTC), 5_000);
    assert!(ctx.balances_of(OTHER).await.is_empty());
}

#[tokio::test]
async fn unmonitored_transactions_are_ignored() {
    let ctx = setup().await;
    ctx.services
        .processor
        .process(&LedgerEvent::Transaction {
            transaction: payment("x1", "p0", EXTERNAL, SCRIPT_A, 5_000),
            confirmations: 0,
        })
        .await
        .unwrap();

    let provisional = &ctx.services.repositories.provisional;
    assert!(provisional
        .find(provisional.connection(), "x1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn balance_change_events_credit_and_debit() {
    let ctx = setup().await;
    let processor = &ctx.services.processor;
    let change = |id: &str, quantity: i64| LedgerEvent::BalanceChange {
        change: BalanceChange {
            address: ADDRESS.to_string(),
            network: NETWORK.to_string(),
            asset: "XCP".to_string(),
            quantity,
            fingerprint: Fingerprint::derive(&["match", id]),
        },
        confirmations: 2,
    };

    processor.process(&change("m1", 40)).await.unwrap();
    processor.process(&change("m2", -15)).await.unwrap();
    processor.process(&change("m1", 40)).await.unwrap();

    assert_eq!(ctx.balance(LedgerState::Confirmed, "XCP").await, 25);
}

#[tokio::test]
async fn events_arrive_as_json_lines() {
    let line = r#"{"kind":"reconcile_address","address":"1abc","network":"mainnet"}"#;
    let event: LedgerEvent = serde_json::from_str(line).unwrap();
    assert_eq!(
        event,
        LedgerEvent::ReconcileAddress {
            address: "1abc".into(),
            network: "mainnet".into(),
        }
    );
    assert_eq!(event.describe(), "reconciliation of 1abc");
}

#[tokio::test]
async fn scheduler_queues_one_reconciliation_per_address() {
    let ctx = setup().await;
    ctx.services.addresses.register(OTHER, NETWORK).await.unwrap();
    let (queue, mut receiver) =
        address_ledger::infrastructure::queue::JobQueue::<LedgerEvent>::channel();

    let queued = address_ledger::application::scheduler::enqueue_reconciliations(
        &ctx.services,
        &queue,
        NETWORK,
    )
    .await;
    assert_eq!(queued, 2);

    let job = receiver.recv().await.unwrap();
    assert!(matches!(job.payload, LedgerEvent::ReconcileAddress { .. }));
    assert_eq!(queue.metrics().total_enqueued, 2);
}

#[tokio::test]
async fn reconcile_events_only_report() {
    let ctx = setup().await;
    ctx.services
        .processor
        .process(&LedgerEvent::Transaction {
            transaction: payment("t1", "p0", ADDRESS, SCRIPT_A, 1_000),
            confirmations: 2,
        })
        .await
        .unwrap();

    ctx.services
        .processor
        .process(&LedgerEvent::ReconcileAddress {
            address: ADDRESS.to_string(),
            network: NETWORK.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(ctx.balance(LedgerState::Confirmed, BTC).await, 1_000);
}
