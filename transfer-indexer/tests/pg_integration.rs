// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Postgres integration tests.
//!
//! These run against a real database and are ignored by default. Set
//! `TEST_DATABASE_URL` and run with `cargo test -- --ignored`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use serial_test::serial;

use transfer_indexer::aggregator::{
    DepositAggregator, RetractionOutcome, TransferKey, TransferLink, TransferPatch,
};
use transfer_indexer::config::{
    AttestationLatency, ChainConfig, ChainFamily, FinalizerConfig, IndexerConfig,
};
use transfer_indexer::finalizer::{
    AttestationClient, AttestationFinalizer, AttestationMessage, FinalizationNote,
    FinalizationPublisher,
};
use transfer_indexer::finalization::{BurnStore, UpsertOutcome};
use transfer_indexer::ingest::{IngestHandler, ScanBatch};
use transfer_indexer::metrics::IndexerMetrics;
use transfer_indexer_pg_db::{Db, DbArgs};
use transfer_indexer_schema::models::{
    NewBridgeDepositEvent, NewBridgeFillEvent, NewBurnEvent, NewMessageSentEvent,
    TransferStatus,
};
use transfer_indexer_schema::schema::{burn_events, finalizer_jobs, message_sent_events};
use transfer_indexer_schema::MIGRATIONS;

const ETH_CHAIN: i64 = 1;
const BASE_CHAIN: i64 = 8453;

async fn test_db() -> Db {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL environment variable must be set");
    let db = Db::for_write(url.parse().expect("Invalid database URL"), DbArgs::default())
        .await
        .expect("Failed to connect to test database");
    db.run_migrations(&MIGRATIONS)
        .await
        .expect("Failed to run migrations");

    let mut conn = db.connect().await.unwrap();
    diesel::sql_query(
        "TRUNCATE TABLE transfers, finalizer_jobs, burn_events, message_sent_events, \
         mint_events, message_received_events, sponsored_burn_events, bridge_deposit_events, \
         bridge_fill_events, oft_sent_events, oft_received_events, progress_store CASCADE",
    )
    .execute(&mut conn)
    .await
    .expect("Failed to truncate tables");
    drop(conn);

    db
}

fn test_config() -> Arc<IndexerConfig> {
    Arc::new(IndexerConfig {
        chains: vec![
            ChainConfig {
                chain_id: ETH_CHAIN,
                name: "ethereum".to_string(),
                family: ChainFamily::Evm,
                cctp_domain: Some(0),
                oft_eid: Some(30101),
                attestation_latency: Some(AttestationLatency {
                    fast_secs: 0,
                    standard_secs: 0,
                }),
                sponsor: None,
                start_block: 0,
            },
            ChainConfig {
                chain_id: BASE_CHAIN,
                name: "base".to_string(),
                family: ChainFamily::Evm,
                cctp_domain: Some(6),
                oft_eid: Some(30184),
                attestation_latency: Some(AttestationLatency {
                    fast_secs: 0,
                    standard_secs: 0,
                }),
                sponsor: None,
                start_block: 0,
            },
        ],
        finalizer: FinalizerConfig {
            tick_interval_secs: 1,
            retry_delay_secs: 900,
            attestation_url: "http://localhost:0".to_string(),
            publish_url: "http://localhost:0".to_string(),
        },
    })
}

fn handler(db: &Db) -> IngestHandler {
    IngestHandler::new(db.clone(), test_config(), IndexerMetrics::new_for_testing())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn burn_event(block: i64, nonce: i64, finalised: bool) -> NewBurnEvent {
    NewBurnEvent {
        chain_id: ETH_CHAIN,
        block_number: block,
        transaction_hash: format!("0xburn{}", nonce),
        log_index: 5,
        block_timestamp_ms: now_ms(),
        finalised,
        nonce,
        source_domain: 0,
        destination_domain: 6,
        amount: "1000000".to_string(),
        depositor: "0xdepositor".to_string(),
        mint_recipient: "0xrecipient".to_string(),
        burn_token: "0xusdc".to_string(),
        destination_caller: "0xcaller".to_string(),
        min_finality_threshold: 1000,
        message_sent_id: None,
    }
}

fn message_sent_event(block: i64, tx: &str, log_index: i64, finalised: bool) -> NewMessageSentEvent {
    NewMessageSentEvent {
        chain_id: ETH_CHAIN,
        block_number: block,
        transaction_hash: tx.to_string(),
        log_index,
        block_timestamp_ms: now_ms(),
        finalised,
        source_domain: 0,
        destination_domain: 6,
        message: "0xrawmessage".to_string(),
    }
}

fn deposit_event(block: i64, deposit_id: i64, finalised: bool) -> NewBridgeDepositEvent {
    NewBridgeDepositEvent {
        chain_id: ETH_CHAIN,
        block_number: block,
        transaction_hash: format!("0xdep{}", deposit_id),
        log_index: 1,
        block_timestamp_ms: now_ms(),
        finalised,
        internal_hash: String::new(),
        deposit_id,
        destination_chain_id: BASE_CHAIN,
        depositor: "0xdepositor".to_string(),
        recipient: "0xrecipient".to_string(),
        input_token: "0xweth".to_string(),
        output_token: "0xweth".to_string(),
        amount: "5000".to_string(),
    }
}

fn fill_event(block: i64, deposit_id: i64, finalised: bool) -> NewBridgeFillEvent {
    NewBridgeFillEvent {
        chain_id: BASE_CHAIN,
        block_number: block,
        transaction_hash: format!("0xfill{}", deposit_id),
        log_index: 2,
        block_timestamp_ms: now_ms(),
        finalised,
        internal_hash: String::new(),
        deposit_id,
        origin_chain_id: ETH_CHAIN,
        relayer: "0xrelayer".to_string(),
        recipient: "0xrecipient".to_string(),
        output_token: "0xweth".to_string(),
        amount: "5000".to_string(),
    }
}

// ============================================================================
// Finalization repository
// ============================================================================

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_upsert_idempotence() {
    // P3: the second identical submission is Nothing and changes no state.
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();

    let rows = vec![burn_event(100, 42, false)];
    let first = BurnStore::upsert_with_finalization(&mut conn, &rows)
        .await
        .unwrap();
    assert_eq!(first[0].0, UpsertOutcome::Inserted);

    let second = BurnStore::upsert_with_finalization(&mut conn, &rows)
        .await
        .unwrap();
    assert_eq!(second[0].0, UpsertOutcome::Nothing);
    assert_eq!(second[0].1.id, first[0].1.id);
    assert_eq!(second[0].1.amount, first[0].1.amount);

    let count: i64 = burn_events::table
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_finalisation_transition_fires_once() {
    // P4: false -> true yields Finalised exactly once, then Nothing.
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();

    let unfinalised = vec![burn_event(100, 42, false)];
    BurnStore::upsert_with_finalization(&mut conn, &unfinalised)
        .await
        .unwrap();

    let finalised = vec![burn_event(100, 42, true)];
    let second = BurnStore::upsert_with_finalization(&mut conn, &finalised)
        .await
        .unwrap();
    assert_eq!(second[0].0, UpsertOutcome::Finalised);
    assert!(second[0].1.finalised);

    let third = BurnStore::upsert_with_finalization(&mut conn, &finalised)
        .await
        .unwrap();
    assert_eq!(third[0].0, UpsertOutcome::Nothing);
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_changed_content_with_finality_flip() {
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();

    BurnStore::upsert_with_finalization(&mut conn, &[burn_event(100, 42, false)])
        .await
        .unwrap();

    let mut changed = burn_event(100, 42, true);
    changed.amount = "2000000".to_string();
    let results = BurnStore::upsert_with_finalization(&mut conn, &[changed])
        .await
        .unwrap();
    assert_eq!(results[0].0, UpsertOutcome::UpdatedAndFinalised);
    assert_eq!(results[0].1.amount, "2000000");
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_reorg_deletion_scope() {
    // P7: only unfinalised rows of the target chain below the watermark are
    // soft-deleted.
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();

    let mut other_chain = burn_event(50, 1, false);
    other_chain.chain_id = BASE_CHAIN;
    let rows = vec![
        burn_event(50, 2, false),  // below watermark, unfinalised -> swept
        burn_event(50, 3, true),   // below watermark but finalised -> kept
        burn_event(200, 4, false), // above watermark -> kept
        other_chain,               // different chain -> kept
    ];
    BurnStore::upsert_with_finalization(&mut conn, &rows)
        .await
        .unwrap();

    let retracted = BurnStore::delete_unfinalised_below(&mut conn, ETH_CHAIN, 100)
        .await
        .unwrap();
    assert_eq!(retracted.len(), 1);
    assert_eq!(retracted[0].nonce, 2);
    assert!(retracted[0].deleted_at.is_some());

    let live: i64 = burn_events::table
        .filter(burn_events::deleted_at.is_null())
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(live, 3);

    // The sweep is idempotent: a second run with the same watermark finds
    // nothing left to delete.
    let retracted = BurnStore::delete_unfinalised_below(&mut conn, ETH_CHAIN, 100)
        .await
        .unwrap();
    assert!(retracted.is_empty());
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_rescan_resurrects_soft_deleted_row() {
    // A row seen again by a live scan with changed content is undeleted.
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();

    BurnStore::upsert_with_finalization(&mut conn, &[burn_event(50, 2, false)])
        .await
        .unwrap();
    BurnStore::delete_unfinalised_below(&mut conn, ETH_CHAIN, 100)
        .await
        .unwrap();

    let mut reobserved = burn_event(50, 2, true);
    reobserved.amount = "3000000".to_string();
    let results = BurnStore::upsert_with_finalization(&mut conn, &[reobserved])
        .await
        .unwrap();
    assert_eq!(results[0].0, UpsertOutcome::UpdatedAndFinalised);
    assert!(results[0].1.deleted_at.is_none());
}

// ============================================================================
// Deposit aggregator
// ============================================================================

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_scenario_b_fill_retraction_reverts_status() {
    // Scenario B: source-only transfer is pending, destination fill flips it
    // to filled, retracting the fill reverts to pending and nulls the link.
    let db = test_db().await;
    let ingest = handler(&db);

    let deposit = deposit_event(100, 7, true);
    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 100,
            bridge_deposits: vec![deposit],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let aggregator = DepositAggregator::new(db.clone());
    let key = TransferKey::bridge(ETH_CHAIN, 7, BASE_CHAIN);
    let transfer = aggregator.get(&key).await.unwrap().unwrap();
    assert_eq!(transfer.status, "pending");
    assert!(transfer.deposit_event_id.is_some());
    assert!(transfer.fill_event_id.is_none());

    // Unfinalised fill arrives on the destination chain.
    let fill = fill_event(500, 7, false);
    ingest
        .process_batch(ScanBatch {
            chain_id: BASE_CHAIN,
            last_finalised_block: 400,
            bridge_fills: vec![fill],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let transfer = aggregator.get(&key).await.unwrap().unwrap();
    assert_eq!(transfer.status, "filled");
    assert!(transfer.fill_event_id.is_some());
    assert_eq!(transfer.depositor.as_deref(), Some("0xdepositor"));

    // The destination chain reorgs past the fill: an empty batch with a
    // higher watermark sweeps the unfinalised fill.
    ingest
        .process_batch(ScanBatch {
            chain_id: BASE_CHAIN,
            last_finalised_block: 600,
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let transfer = aggregator.get(&key).await.unwrap().unwrap();
    assert_eq!(transfer.status, "pending");
    assert!(transfer.fill_event_id.is_none());
    assert!(transfer.deposit_event_id.is_some());
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_orphan_fill_then_deposit_stays_filled() {
    // P6 end to end: the fill indexed before its deposit creates the
    // transfer as filled; the late deposit must not demote it.
    let db = test_db().await;
    let ingest = handler(&db);

    ingest
        .process_batch(ScanBatch {
            chain_id: BASE_CHAIN,
            last_finalised_block: 400,
            bridge_fills: vec![fill_event(500, 9, true)],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let aggregator = DepositAggregator::new(db.clone());
    let key = TransferKey::bridge(ETH_CHAIN, 9, BASE_CHAIN);
    let transfer = aggregator.get(&key).await.unwrap().unwrap();
    assert_eq!(transfer.status, "filled");
    assert!(transfer.deposit_event_id.is_none());

    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 100,
            bridge_deposits: vec![deposit_event(100, 9, true)],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let transfer = aggregator.get(&key).await.unwrap().unwrap();
    assert_eq!(transfer.status, "filled");
    assert!(transfer.deposit_event_id.is_some());
    // The deposit's fields merged in without clearing anything.
    assert_eq!(transfer.depositor.as_deref(), Some("0xdepositor"));
    assert_eq!(transfer.amount.as_deref(), Some("5000"));
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_retraction_of_last_link_deletes_transfer() {
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();

    let results = BurnStore::upsert_with_finalization(&mut conn, &[burn_event(100, 42, false)])
        .await
        .unwrap();
    let burn_id = results[0].1.id;
    drop(conn);

    let aggregator = DepositAggregator::new(db.clone());
    let key = TransferKey::cctp(42, 6);
    aggregator
        .apply_event(
            &key,
            TransferLink::Burn,
            burn_id,
            TransferPatch {
                origin_chain_id: Some(ETH_CHAIN),
                depositor: Some("0xdepositor".to_string()),
                block_timestamp_ms: Some(now_ms()),
                ..TransferPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(aggregator.get(&key).await.unwrap().is_some());

    let outcome = aggregator
        .apply_retraction(&key, TransferLink::Burn)
        .await
        .unwrap();
    assert_eq!(outcome, RetractionOutcome::Deleted);
    assert!(aggregator.get(&key).await.unwrap().is_none());

    // Retracting a key with no row is a no-op.
    let outcome = aggregator
        .apply_retraction(&key, TransferLink::Burn)
        .await
        .unwrap();
    assert_eq!(outcome, RetractionOutcome::Missing);
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_sparse_merge_preserves_stored_fields() {
    // P5 against the real store: a destination-only patch leaves the
    // depositor column untouched.
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();
    let results = BurnStore::upsert_with_finalization(&mut conn, &[burn_event(100, 43, false)])
        .await
        .unwrap();
    let burn_id = results[0].1.id;
    drop(conn);

    let aggregator = DepositAggregator::new(db.clone());
    let key = TransferKey::cctp(43, 6);
    aggregator
        .apply_event(
            &key,
            TransferLink::Burn,
            burn_id,
            TransferPatch {
                origin_chain_id: Some(ETH_CHAIN),
                depositor: Some("0xdepositor".to_string()),
                amount: Some("1000000".to_string()),
                block_timestamp_ms: Some(now_ms()),
                ..TransferPatch::default()
            },
        )
        .await
        .unwrap();

    let status = aggregator
        .apply_event(
            &key,
            TransferLink::Burn,
            burn_id,
            TransferPatch {
                recipient: Some("0xnewrecipient".to_string()),
                destination_chain_id: Some(BASE_CHAIN),
                ..TransferPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(status, TransferStatus::Pending);

    let transfer = aggregator.get(&key).await.unwrap().unwrap();
    assert_eq!(transfer.depositor.as_deref(), Some("0xdepositor"));
    assert_eq!(transfer.amount.as_deref(), Some("1000000"));
    assert_eq!(transfer.recipient.as_deref(), Some("0xnewrecipient"));
}

// ============================================================================
// Pair matching through ingestion
// ============================================================================

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_burn_message_pair_linked_on_ingest() {
    let db = test_db().await;
    let ingest = handler(&db);

    let mut burn = burn_event(100, 42, true);
    burn.transaction_hash = "0xpairtx".to_string();
    burn.log_index = 5;
    let message = message_sent_event(100, "0xpairtx", 3, true);

    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 100,
            burns: vec![burn],
            messages_sent: vec![message],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let mut conn = db.connect().await.unwrap();
    let stored: transfer_indexer_schema::models::BurnEvent = burn_events::table
        .filter(burn_events::nonce.eq(42))
        .first(&mut conn)
        .await
        .unwrap();
    assert!(stored.message_sent_id.is_some());

    let msg_id: i64 = message_sent_events::table
        .filter(message_sent_events::transaction_hash.eq("0xpairtx"))
        .select(message_sent_events::id)
        .first(&mut conn)
        .await
        .unwrap();
    assert_eq!(stored.message_sent_id, Some(msg_id));
}

// ============================================================================
// Attestation finalizer
// ============================================================================

#[derive(Clone, Default)]
struct MockAttestation {
    messages: Arc<Mutex<Vec<AttestationMessage>>>,
}

#[async_trait]
impl AttestationClient for MockAttestation {
    async fn fetch_attestation(
        &self,
        _domain: i64,
        _transaction_hash: &str,
    ) -> anyhow::Result<Vec<AttestationMessage>> {
        Ok(self.messages.lock().unwrap().clone())
    }
}

#[derive(Clone, Default)]
struct MockPublisher {
    notes: Arc<Mutex<Vec<FinalizationNote>>>,
}

#[async_trait]
impl FinalizationPublisher for MockPublisher {
    async fn publish(&self, note: &FinalizationNote) -> anyhow::Result<()> {
        self.notes.lock().unwrap().push(note.clone());
        Ok(())
    }
}

fn complete_message(nonce: i64, attestation: &str) -> AttestationMessage {
    AttestationMessage {
        attestation: attestation.to_string(),
        event_nonce: nonce,
        message: "0xattestedmessage".to_string(),
        status: "complete".to_string(),
    }
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_finalizer_publishes_and_records_job() {
    let db = test_db().await;
    let ingest = handler(&db);

    let mut burn = burn_event(100, 42, true);
    burn.transaction_hash = "0xfinaltx".to_string();
    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 100,
            burns: vec![burn],
            messages_sent: vec![message_sent_event(100, "0xfinaltx", 3, true)],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let attestation = MockAttestation::default();
    attestation
        .messages
        .lock()
        .unwrap()
        .push(complete_message(42, "0xattestation"));
    let publisher = MockPublisher::default();

    let finalizer = AttestationFinalizer::new(
        db.clone(),
        test_config(),
        attestation.clone(),
        publisher.clone(),
        IndexerMetrics::new_for_testing(),
    );
    finalizer.tick().await.unwrap();

    // Scenario C, ready half: latency table is zeroed, so exactly one
    // publish happened.
    {
        let notes = publisher.notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].burn_transaction_hash, "0xfinaltx");
        assert_eq!(notes[0].source_chain_id, ETH_CHAIN);
        assert_eq!(notes[0].destination_chain_id, BASE_CHAIN);
        assert_eq!(notes[0].attestation, "0xattestation");
        assert!(notes[0].sponsor_signature.is_none());
    }

    let mut conn = db.connect().await.unwrap();
    let jobs: i64 = finalizer_jobs::table
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(jobs, 1);

    // The resolved nonce landed on the message-sent row.
    let nonce: Option<i64> = message_sent_events::table
        .filter(message_sent_events::transaction_hash.eq("0xfinaltx"))
        .select(message_sent_events::nonce)
        .first(&mut conn)
        .await
        .unwrap();
    assert_eq!(nonce, Some(42));
    drop(conn);

    // A second tick finds no jobless burn events: no duplicate publish.
    finalizer.tick().await.unwrap();
    assert_eq!(publisher.notes.lock().unwrap().len(), 1);
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_finalizer_defers_pending_attestation() {
    let db = test_db().await;
    let ingest = handler(&db);

    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 100,
            burns: vec![burn_event(100, 42, true)],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let attestation = MockAttestation::default();
    let publisher = MockPublisher::default();
    let finalizer = AttestationFinalizer::new(
        db.clone(),
        test_config(),
        attestation.clone(),
        publisher.clone(),
        IndexerMetrics::new_for_testing(),
    );

    // No attestation yet: nothing is published, nothing is recorded as done.
    finalizer.tick().await.unwrap();
    assert!(publisher.notes.lock().unwrap().is_empty());
    let mut conn = db.connect().await.unwrap();
    let jobs: i64 = finalizer_jobs::table
        .count()
        .get_result(&mut conn)
        .await
        .unwrap();
    assert_eq!(jobs, 0);
    drop(conn);

    // Attestation completes: the next tick publishes.
    attestation
        .messages
        .lock()
        .unwrap()
        .push(complete_message(42, "0xattestation"));
    finalizer.tick().await.unwrap();
    assert_eq!(publisher.notes.lock().unwrap().len(), 1);
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_scenario_d_job_upsert_is_last_write_wins() {
    // Scenario D: two job writes for the same burn event leave exactly one
    // row carrying the second write's values.
    let db = test_db().await;
    let mut conn = db.connect().await.unwrap();
    let results = BurnStore::upsert_with_finalization(&mut conn, &[burn_event(100, 42, true)])
        .await
        .unwrap();
    let burn_id = results[0].1.id;
    drop(conn);

    let finalizer = AttestationFinalizer::new(
        db.clone(),
        test_config(),
        MockAttestation::default(),
        MockPublisher::default(),
        IndexerMetrics::new_for_testing(),
    );

    finalizer
        .upsert_job(burn_id, &complete_message(42, "0xfirst"), None)
        .await
        .unwrap();
    finalizer
        .upsert_job(burn_id, &complete_message(42, "0xsecond"), None)
        .await
        .unwrap();

    let mut conn = db.connect().await.unwrap();
    let jobs: Vec<transfer_indexer_schema::models::FinalizerJob> = finalizer_jobs::table
        .filter(finalizer_jobs::burn_event_id.eq(burn_id))
        .load(&mut conn)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attestation, "0xsecond");
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_retry_republishes_undelivered_jobs() {
    let db = test_db().await;
    let ingest = handler(&db);

    let mut burn = burn_event(100, 42, true);
    burn.transaction_hash = "0xretrytx".to_string();
    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 100,
            burns: vec![burn],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let attestation = MockAttestation::default();
    attestation
        .messages
        .lock()
        .unwrap()
        .push(complete_message(42, "0xattestation"));
    let publisher = MockPublisher::default();
    let finalizer = AttestationFinalizer::new(
        db.clone(),
        test_config(),
        attestation,
        publisher.clone(),
        IndexerMetrics::new_for_testing(),
    );
    finalizer.tick().await.unwrap();
    assert_eq!(publisher.notes.lock().unwrap().len(), 1);

    // Fresh job: the retry pass leaves it alone.
    finalizer.retry_tick().await.unwrap();
    assert_eq!(publisher.notes.lock().unwrap().len(), 1);

    // Age the job past the retry delay; no delivery exists, so the retry
    // pass re-publishes from the stored job row.
    let mut conn = db.connect().await.unwrap();
    diesel::sql_query("UPDATE finalizer_jobs SET updated_at = updated_at - INTERVAL '1 day'")
        .execute(&mut conn)
        .await
        .unwrap();
    drop(conn);

    finalizer.retry_tick().await.unwrap();
    {
        let notes = publisher.notes.lock().unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].attestation, "0xattestation");
    }

    // The retry refreshed updated_at, so an immediate second pass is a
    // no-op.
    finalizer.retry_tick().await.unwrap();
    assert_eq!(publisher.notes.lock().unwrap().len(), 2);
}

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_retry_suppressed_once_delivered() {
    let db = test_db().await;
    let ingest = handler(&db);

    let mut burn = burn_event(100, 42, true);
    burn.transaction_hash = "0xdeliveredtx".to_string();
    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 100,
            burns: vec![burn],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let attestation = MockAttestation::default();
    attestation
        .messages
        .lock()
        .unwrap()
        .push(complete_message(42, "0xattestation"));
    let publisher = MockPublisher::default();
    let finalizer = AttestationFinalizer::new(
        db.clone(),
        test_config(),
        attestation,
        publisher.clone(),
        IndexerMetrics::new_for_testing(),
    );
    finalizer.tick().await.unwrap();

    // The delivery lands on the destination chain.
    ingest
        .process_batch(ScanBatch {
            chain_id: BASE_CHAIN,
            last_finalised_block: 900,
            messages_received: vec![transfer_indexer_schema::models::NewMessageReceivedEvent {
                chain_id: BASE_CHAIN,
                block_number: 900,
                transaction_hash: "0xrecv".to_string(),
                log_index: 1,
                block_timestamp_ms: now_ms(),
                finalised: true,
                nonce: 42,
                source_domain: 0,
                sender: "0xsender".to_string(),
                caller: "0xcaller".to_string(),
            }],
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let mut conn = db.connect().await.unwrap();
    diesel::sql_query("UPDATE finalizer_jobs SET updated_at = updated_at - INTERVAL '1 day'")
        .execute(&mut conn)
        .await
        .unwrap();
    drop(conn);

    finalizer.retry_tick().await.unwrap();
    assert_eq!(publisher.notes.lock().unwrap().len(), 1);
}

// ============================================================================
// Progress store
// ============================================================================

#[tokio::test]
#[serial]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_watermark_recorded_per_batch() {
    let db = test_db().await;
    let ingest = handler(&db);

    ingest
        .process_batch(ScanBatch {
            chain_id: ETH_CHAIN,
            last_finalised_block: 123,
            ..ScanBatch::default()
        })
        .await
        .unwrap();

    let progress = transfer_indexer::progress::ProgressStore::new(db.clone());
    let task = transfer_indexer::progress::scan_task_name(ETH_CHAIN);
    assert_eq!(progress.get_watermark(&task).await.unwrap(), Some(123));
    assert_eq!(progress.resume_block(&task, 0).await.unwrap(), 124);

    let existing: Option<i64> = progress
        .get_watermark(&transfer_indexer::progress::scan_task_name(BASE_CHAIN))
        .await
        .unwrap();
    assert!(existing.is_none());
}
