// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan batch ingestion
//!
//! Consumes per-chain scan batches from the (external) chain scanners and
//! drives them through the core pipeline:
//!
//! ```text
//! ScanBatch
//!     │
//!     ▼ (pair matching: burn+message-sent, mint+message-received)
//! Finalization repository (classified upserts)
//!     │
//!     ▼ (Inserted / Updated / UpdatedAndFinalised outcomes only)
//! Deposit aggregator (canonical transfers)
//!     │
//!     ▼ (after all of the batch's writes)
//! Reorg sweep (soft-delete below watermark, cascade retractions)
//! ```
//!
//! Within one chain's batch, events are always persisted before the reorg
//! sweep runs, so a row can never be soft-deleted before its own finalised
//! flag from the same cycle has been applied. Across chains there is no
//! ordering guarantee; the aggregator tolerates either side arriving first.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use transfer_indexer_pg_db::Db;
use transfer_indexer_schema::models::{
    NewBridgeDepositEvent, NewBridgeFillEvent, NewBurnEvent, NewMessageReceivedEvent,
    NewMessageSentEvent, NewMintEvent, NewOftReceivedEvent, NewOftSentEvent,
    NewSponsoredBurnEvent, TransferStatus,
};

use crate::aggregator::{DepositAggregator, RetractionOutcome, TransferKey, TransferLink, TransferPatch};
use crate::config::IndexerConfig;
use crate::finalization::{
    BridgeDepositStore, BridgeFillStore, BurnStore, MessageReceivedStore, MessageSentStore,
    MintStore, OftReceivedStore, OftSentStore, SponsoredBurnStore, UpsertOutcome,
};
use crate::matcher::{match_event_pairs, UnmatchedEvent};
use crate::metrics::IndexerMetrics;
use crate::progress::{scan_task_name, ProgressStore};

/// One chain scan cycle's worth of raw protocol events plus the newly
/// observed finality watermark. The watermark must be monotonically
/// non-decreasing per chain across batches; that is the scanner's contract,
/// not something this handler defends against.
#[derive(Debug, Clone, Default)]
pub struct ScanBatch {
    pub chain_id: i64,
    pub last_finalised_block: i64,
    pub bridge_deposits: Vec<NewBridgeDepositEvent>,
    pub bridge_fills: Vec<NewBridgeFillEvent>,
    pub burns: Vec<NewBurnEvent>,
    pub messages_sent: Vec<NewMessageSentEvent>,
    pub mints: Vec<NewMintEvent>,
    pub messages_received: Vec<NewMessageReceivedEvent>,
    pub sponsored_burns: Vec<NewSponsoredBurnEvent>,
    pub oft_sent: Vec<NewOftSentEvent>,
    pub oft_received: Vec<NewOftReceivedEvent>,
}

pub struct IngestHandler {
    db: Db,
    config: Arc<IndexerConfig>,
    aggregator: DepositAggregator,
    progress: ProgressStore,
    metrics: Arc<IndexerMetrics>,
}

impl IngestHandler {
    pub fn new(db: Db, config: Arc<IndexerConfig>, metrics: Arc<IndexerMetrics>) -> Self {
        let aggregator = DepositAggregator::new(db.clone());
        let progress = ProgressStore::new(db.clone());
        Self {
            db,
            config,
            aggregator,
            progress,
            metrics,
        }
    }

    /// Process one scan batch end to end. Errors abort the batch before the
    /// watermark is recorded, so a restart re-delivers the same range and
    /// converges through the idempotent upsert contracts.
    pub async fn process_batch(&self, batch: ScanBatch) -> anyhow::Result<()> {
        let started = Instant::now();

        self.process_bridge(&batch).await?;
        self.process_cctp_source(&batch).await?;
        self.process_cctp_destination(&batch).await?;
        self.process_oft(&batch).await?;

        // The reorg sweep runs strictly after this cycle's events are stored.
        self.sweep_reorged(&batch).await?;

        self.progress
            .update_watermark(&scan_task_name(batch.chain_id), batch.last_finalised_block)
            .await?;
        let chain_label = batch.chain_id.to_string();
        self.metrics
            .last_watermark
            .with_label_values(&[chain_label.as_str()])
            .set(batch.last_finalised_block);
        self.metrics
            .ingest_batch_latency
            .observe(started.elapsed().as_secs_f64());

        Ok(())
    }

    fn record_upsert(&self, entity: &str, outcome: UpsertOutcome) {
        self.metrics
            .events_upserted
            .with_label_values(&[entity, outcome.as_str()])
            .inc();
    }

    fn record_transfer(&self, key: &TransferKey, status: TransferStatus) {
        self.metrics
            .transfers_updated
            .with_label_values(&[key.transfer_type.as_str(), status.as_str()])
            .inc();
    }

    fn record_unmatched<L, C>(&self, pair: &'static str, event: &UnmatchedEvent<'_, L, C>)
    where
        L: crate::matcher::LogPosition,
        C: crate::matcher::LogPosition,
    {
        error!(
            "[Ingest] Incomplete {} pair: side={}, tx={}, log_index={}",
            pair,
            event.side(),
            event.tx_hash(),
            event.log_index()
        );
        self.metrics
            .unmatched_events
            .with_label_values(&[pair, event.side()])
            .inc();
    }

    async fn process_bridge(&self, batch: &ScanBatch) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;

        // The internal hash is recomputed here rather than trusted from the
        // scanner: it must be identical no matter which side observed it.
        let deposits: Vec<NewBridgeDepositEvent> = batch
            .bridge_deposits
            .iter()
            .cloned()
            .map(|mut event| {
                event.internal_hash =
                    TransferKey::bridge(event.chain_id, event.deposit_id, event.destination_chain_id)
                        .unique_id;
                event
            })
            .collect();

        let results = BridgeDepositStore::upsert_with_finalization(&mut conn, &deposits).await?;
        for (outcome, row) in results {
            self.record_upsert("bridge_deposit_events", outcome);
            if !outcome.is_content_change() {
                continue;
            }
            let key = TransferKey {
                transfer_type: transfer_indexer_schema::models::TransferType::Bridge,
                unique_id: row.internal_hash.clone(),
            };
            let patch = TransferPatch {
                origin_chain_id: Some(row.chain_id),
                destination_chain_id: Some(row.destination_chain_id),
                depositor: Some(row.depositor.clone()),
                recipient: Some(row.recipient.clone()),
                amount: Some(row.amount.clone()),
                block_timestamp_ms: Some(row.block_timestamp_ms),
            };
            let status = self
                .aggregator
                .apply_event(&key, TransferLink::Deposit, row.id, patch)
                .await?;
            self.record_transfer(&key, status);
        }

        let fills: Vec<NewBridgeFillEvent> = batch
            .bridge_fills
            .iter()
            .cloned()
            .map(|mut event| {
                event.internal_hash =
                    TransferKey::bridge(event.origin_chain_id, event.deposit_id, event.chain_id)
                        .unique_id;
                event
            })
            .collect();

        let results = BridgeFillStore::upsert_with_finalization(&mut conn, &fills).await?;
        for (outcome, row) in results {
            self.record_upsert("bridge_fill_events", outcome);
            if !outcome.is_content_change() {
                continue;
            }
            let key = TransferKey {
                transfer_type: transfer_indexer_schema::models::TransferType::Bridge,
                unique_id: row.internal_hash.clone(),
            };
            let patch = TransferPatch {
                origin_chain_id: Some(row.origin_chain_id),
                destination_chain_id: Some(row.chain_id),
                recipient: Some(row.recipient.clone()),
                block_timestamp_ms: Some(row.block_timestamp_ms),
                ..TransferPatch::default()
            };
            let status = self
                .aggregator
                .apply_event(&key, TransferLink::Fill, row.id, patch)
                .await?;
            self.record_transfer(&key, status);
        }

        Ok(())
    }

    async fn process_cctp_source(&self, batch: &ScanBatch) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;

        // Correlated message rows go in first so the burn rows can carry
        // their foreign key.
        let msg_results =
            MessageSentStore::upsert_with_finalization(&mut conn, &batch.messages_sent).await?;
        let mut msg_ids = std::collections::HashMap::new();
        for (outcome, row) in &msg_results {
            self.record_upsert("message_sent_events", *outcome);
            msg_ids.insert((row.transaction_hash.clone(), row.log_index), row.id);
        }

        let pairs = match_event_pairs(&batch.burns, &batch.messages_sent, |unmatched| {
            self.record_unmatched("burn_message_sent", &unmatched)
        });
        let mut linked: std::collections::HashMap<(String, i64), i64> = std::collections::HashMap::new();
        for pair in &pairs {
            if let Some(id) = msg_ids.get(&(
                pair.correlated.transaction_hash.clone(),
                pair.correlated.log_index,
            )) {
                linked.insert(
                    (pair.leading.transaction_hash.clone(), pair.leading.log_index),
                    *id,
                );
            }
        }

        let burns: Vec<NewBurnEvent> = batch
            .burns
            .iter()
            .cloned()
            .map(|mut burn| {
                burn.message_sent_id = linked
                    .get(&(burn.transaction_hash.clone(), burn.log_index))
                    .copied();
                burn
            })
            .collect();

        let results = BurnStore::upsert_with_finalization(&mut conn, &burns).await?;
        for (outcome, row) in results {
            self.record_upsert("burn_events", outcome);
            if !outcome.is_content_change() {
                continue;
            }
            let key = TransferKey::cctp(row.nonce, row.destination_domain);
            let patch = TransferPatch {
                origin_chain_id: Some(row.chain_id),
                destination_chain_id: self.config.domain_to_chain(row.destination_domain),
                depositor: Some(row.depositor.clone()),
                recipient: Some(row.mint_recipient.clone()),
                amount: Some(row.amount.clone()),
                block_timestamp_ms: Some(row.block_timestamp_ms),
            };
            let status = self
                .aggregator
                .apply_event(&key, TransferLink::Burn, row.id, patch)
                .await?;
            self.record_transfer(&key, status);
        }

        let results =
            SponsoredBurnStore::upsert_with_finalization(&mut conn, &batch.sponsored_burns).await?;
        for (outcome, _) in results {
            self.record_upsert("sponsored_burn_events", outcome);
        }

        Ok(())
    }

    async fn process_cctp_destination(&self, batch: &ScanBatch) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;

        let msg_results =
            MessageReceivedStore::upsert_with_finalization(&mut conn, &batch.messages_received)
                .await?;
        let mut received = std::collections::HashMap::new();
        for (outcome, row) in &msg_results {
            self.record_upsert("message_received_events", *outcome);
            received.insert(
                (row.transaction_hash.clone(), row.log_index),
                (row.id, row.nonce),
            );
        }

        let pairs = match_event_pairs(&batch.mints, &batch.messages_received, |unmatched| {
            self.record_unmatched("mint_message_received", &unmatched)
        });
        let mut linked: std::collections::HashMap<(String, i64), (i64, i64)> =
            std::collections::HashMap::new();
        for pair in &pairs {
            if let Some(entry) = received.get(&(
                pair.correlated.transaction_hash.clone(),
                pair.correlated.log_index,
            )) {
                linked.insert(
                    (pair.leading.transaction_hash.clone(), pair.leading.log_index),
                    *entry,
                );
            }
        }

        let mints: Vec<NewMintEvent> = batch
            .mints
            .iter()
            .cloned()
            .map(|mut mint| {
                if let Some((id, nonce)) =
                    linked.get(&(mint.transaction_hash.clone(), mint.log_index))
                {
                    mint.message_received_id = Some(*id);
                    mint.nonce = Some(*nonce);
                }
                mint
            })
            .collect();

        let destination_domain = self.config.chain_to_domain(batch.chain_id);

        let results = MintStore::upsert_with_finalization(&mut conn, &mints).await?;
        for (outcome, row) in results {
            self.record_upsert("mint_events", outcome);
            if !outcome.is_content_change() {
                continue;
            }
            // A mint with no paired message has no nonce and therefore no
            // transfer key yet; it stays stored until a rescan pairs it.
            let Some(nonce) = row.nonce else {
                continue;
            };
            let Some(domain) = destination_domain else {
                warn!(
                    "[Ingest] Chain {} has no burn/mint domain configured; skipping mint aggregation",
                    batch.chain_id
                );
                continue;
            };
            let key = TransferKey::cctp(nonce, domain);
            let patch = TransferPatch {
                destination_chain_id: Some(row.chain_id),
                recipient: Some(row.mint_recipient.clone()),
                block_timestamp_ms: Some(row.block_timestamp_ms),
                ..TransferPatch::default()
            };
            let status = self
                .aggregator
                .apply_event(&key, TransferLink::Mint, row.id, patch)
                .await?;
            self.record_transfer(&key, status);
        }

        Ok(())
    }

    async fn process_oft(&self, batch: &ScanBatch) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;

        let results = OftSentStore::upsert_with_finalization(&mut conn, &batch.oft_sent).await?;
        for (outcome, row) in results {
            self.record_upsert("oft_sent_events", outcome);
            if !outcome.is_content_change() {
                continue;
            }
            let key = TransferKey::oft(&row.guid);
            let patch = TransferPatch {
                origin_chain_id: Some(row.chain_id),
                destination_chain_id: self.config.eid_to_chain(row.dst_eid),
                depositor: Some(row.from_address.clone()),
                amount: Some(row.amount_sent.clone()),
                block_timestamp_ms: Some(row.block_timestamp_ms),
                ..TransferPatch::default()
            };
            let status = self
                .aggregator
                .apply_event(&key, TransferLink::OftSent, row.id, patch)
                .await?;
            self.record_transfer(&key, status);
        }

        let results =
            OftReceivedStore::upsert_with_finalization(&mut conn, &batch.oft_received).await?;
        for (outcome, row) in results {
            self.record_upsert("oft_received_events", outcome);
            if !outcome.is_content_change() {
                continue;
            }
            let key = TransferKey::oft(&row.guid);
            let patch = TransferPatch {
                origin_chain_id: self.config.eid_to_chain(row.src_eid),
                destination_chain_id: Some(row.chain_id),
                recipient: Some(row.to_address.clone()),
                block_timestamp_ms: Some(row.block_timestamp_ms),
                ..TransferPatch::default()
            };
            let status = self
                .aggregator
                .apply_event(&key, TransferLink::OftReceived, row.id, patch)
                .await?;
            self.record_transfer(&key, status);
        }

        Ok(())
    }

    /// Soft-delete every unfinalised row below the batch's watermark for
    /// this chain and cascade each retraction into the aggregator. This is
    /// the sole mechanism by which a reorg reaches stored state.
    async fn sweep_reorged(&self, batch: &ScanBatch) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;
        let chain = batch.chain_id;
        let watermark = batch.last_finalised_block;

        let retracted =
            BridgeDepositStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for row in retracted {
            self.record_retraction("bridge_deposit_events");
            let key = TransferKey {
                transfer_type: transfer_indexer_schema::models::TransferType::Bridge,
                unique_id: row.internal_hash.clone(),
            };
            self.cascade_retraction(&key, TransferLink::Deposit).await?;
        }

        let retracted =
            BridgeFillStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for row in retracted {
            self.record_retraction("bridge_fill_events");
            let key = TransferKey {
                transfer_type: transfer_indexer_schema::models::TransferType::Bridge,
                unique_id: row.internal_hash.clone(),
            };
            self.cascade_retraction(&key, TransferLink::Fill).await?;
        }

        let retracted = BurnStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for row in retracted {
            self.record_retraction("burn_events");
            let key = TransferKey::cctp(row.nonce, row.destination_domain);
            self.cascade_retraction(&key, TransferLink::Burn).await?;
        }

        let destination_domain = self.config.chain_to_domain(chain);
        let retracted = MintStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for row in retracted {
            self.record_retraction("mint_events");
            let (Some(nonce), Some(domain)) = (row.nonce, destination_domain) else {
                continue;
            };
            let key = TransferKey::cctp(nonce, domain);
            self.cascade_retraction(&key, TransferLink::Mint).await?;
        }

        let retracted = OftSentStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for row in retracted {
            self.record_retraction("oft_sent_events");
            let key = TransferKey::oft(&row.guid);
            self.cascade_retraction(&key, TransferLink::OftSent).await?;
        }

        let retracted =
            OftReceivedStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for row in retracted {
            self.record_retraction("oft_received_events");
            let key = TransferKey::oft(&row.guid);
            self.cascade_retraction(&key, TransferLink::OftReceived)
                .await?;
        }

        // Message and sponsorship rows carry no transfer link; their
        // soft-delete needs no aggregator cascade.
        let retracted =
            MessageSentStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for _ in retracted {
            self.record_retraction("message_sent_events");
        }
        let retracted =
            MessageReceivedStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for _ in retracted {
            self.record_retraction("message_received_events");
        }
        let retracted =
            SponsoredBurnStore::delete_unfinalised_below(&mut conn, chain, watermark).await?;
        for _ in retracted {
            self.record_retraction("sponsored_burn_events");
        }

        Ok(())
    }

    fn record_retraction(&self, entity: &str) {
        self.metrics
            .events_retracted
            .with_label_values(&[entity])
            .inc();
    }

    async fn cascade_retraction(
        &self,
        key: &TransferKey,
        link: TransferLink,
    ) -> anyhow::Result<()> {
        match self.aggregator.apply_retraction(key, link).await? {
            RetractionOutcome::Deleted => {
                self.metrics.transfers_deleted.inc();
            }
            RetractionOutcome::Kept(status) => {
                self.record_transfer(key, status);
            }
            RetractionOutcome::Missing => {}
        }
        Ok(())
    }
}

/// Run the ingest handler as a background task consuming scan batches until
/// the channel closes or the token is cancelled. Cancellation is
/// cooperative: the current batch finishes, the next one is not started.
pub fn run_ingest_handler(
    handler: IngestHandler,
    mut batch_rx: mpsc::Receiver<ScanBatch>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[Ingest] Starting ingest handler");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Ingest] Cancelled, stopping");
                    break;
                }
                batch = batch_rx.recv() => {
                    match batch {
                        Some(batch) => {
                            let chain_id = batch.chain_id;
                            if let Err(e) = handler.process_batch(batch).await {
                                error!("[Ingest] Error processing batch for chain {}: {:?}", chain_id, e);
                            }
                        }
                        None => {
                            info!("[Ingest] Batch channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("[Ingest] Stopped");
    })
}
