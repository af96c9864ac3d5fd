// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Attestation finalizer scheduler
//!
//! Recurring task over stored burn events. Per tick, every non-retracted
//! burn event without a `finalizer_jobs` row walks the state machine
//! `NO_JOB -> JOB_PENDING_ATTESTATION -> JOB_PUBLISHED`: sponsorship pairing,
//! attestation-latency gate, attestation fetch, publish, idempotent job
//! upsert. A separate retry pass re-publishes jobs that have gone stale
//! without a corresponding delivery on the destination chain.
//!
//! Both passes are re-entrant: re-running either on the same data converges
//! to the same state. The job row is keyed by `burn_event_id`, so repeated
//! runs update rather than duplicate.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use diesel::{ExpressionMethods, JoinOnDsl, NullableExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use transfer_indexer_pg_db::Db;
use transfer_indexer_schema::models::{BurnEvent, FinalizerJob, NewFinalizerJob, SponsoredBurnEvent};
use transfer_indexer_schema::schema::{
    burn_events, finalizer_jobs, message_received_events, message_sent_events,
    sponsored_burn_events,
};

use crate::config::{AttestationLatency, ChainFamily, IndexerConfig, SponsorConfig};
use crate::error::IndexerError;
use crate::finalizer::attestation::{AttestationClient, AttestationMessage};
use crate::finalizer::publisher::{FinalizationNote, FinalizationPublisher};
use crate::metrics::IndexerMetrics;

/// Finality-threshold values at or below this are "fast" tier; anything
/// above waits for the standard attestation latency.
pub const FAST_FINALITY_THRESHOLD: i64 = 1000;

/// Attestation wait for one burn event, chosen from the chain's latency
/// table by the burn's finality threshold.
pub fn required_wait_secs(latency: &AttestationLatency, min_finality_threshold: i64) -> u64 {
    if min_finality_threshold <= FAST_FINALITY_THRESHOLD {
        latency.fast_secs
    } else {
        latency.standard_secs
    }
}

/// Whether enough wall time has passed since the burn's block for the
/// attestation service to plausibly have the attestation.
pub fn attestation_wait_elapsed(block_timestamp_ms: i64, now_ms: i64, wait_secs: u64) -> bool {
    now_ms.saturating_sub(block_timestamp_ms) >= (wait_secs as i64).saturating_mul(1000)
}

/// Find the sponsored event paired with a burn within one transaction.
///
/// The pairing rule is family-specific: on EVM chains the sponsored log
/// always trails the burn log, so only events with a greater log index
/// qualify (nearest first); Solana-style chains give no ordering guarantee,
/// so any sponsored event in the transaction qualifies.
pub fn match_sponsored<'a>(
    family: ChainFamily,
    burn_log_index: i64,
    events: &'a [SponsoredBurnEvent],
) -> Option<&'a SponsoredBurnEvent> {
    match family {
        ChainFamily::Evm => events
            .iter()
            .filter(|e| e.log_index > burn_log_index)
            .min_by_key(|e| e.log_index),
        ChainFamily::Svm => events.iter().min_by_key(|e| e.log_index),
    }
}

/// A burn is expected to be sponsored when its destination caller and mint
/// recipient both match the chain's configured sponsor peripheral.
pub fn sponsorship_expected(burn: &BurnEvent, sponsor: Option<&SponsorConfig>) -> bool {
    sponsor.is_some_and(|s| {
        burn.destination_caller
            .eq_ignore_ascii_case(&s.destination_caller)
            && burn.mint_recipient.eq_ignore_ascii_case(&s.mint_recipient)
    })
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

enum BurnTick {
    Published,
    Deferred(&'static str),
}

pub struct AttestationFinalizer<A, P> {
    db: Db,
    config: Arc<IndexerConfig>,
    attestation: A,
    publisher: P,
    metrics: Arc<IndexerMetrics>,
}

impl<A: AttestationClient + 'static, P: FinalizationPublisher + 'static> AttestationFinalizer<A, P> {
    pub fn new(
        db: Db,
        config: Arc<IndexerConfig>,
        attestation: A,
        publisher: P,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            db,
            config,
            attestation,
            publisher,
            metrics,
        }
    }

    /// Run the scheduler until cancelled. Cancellation is cooperative: the
    /// current tick finishes, the next one is not started.
    pub fn run(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "[Finalizer] Starting scheduler (tick={}s, retry_delay={}s)",
                self.config.finalizer.tick_interval_secs, self.config.finalizer.retry_delay_secs
            );

            let mut interval = tokio::time::interval(self.config.finalizer.tick_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[Finalizer] Cancelled, stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!("[Finalizer] Tick failed: {:?}", e);
                        }
                        if let Err(e) = self.retry_tick().await {
                            error!("[Finalizer] Retry pass failed: {:?}", e);
                        }
                    }
                }
            }

            info!("[Finalizer] Stopped");
        })
    }

    /// One scheduler pass over burn events with no job yet.
    ///
    /// Configuration errors abort the pass (fatal for this invocation, the
    /// next tick retries); data inconsistencies and transient upstream
    /// failures skip the item and continue with the batch.
    pub async fn tick(&self) -> anyhow::Result<()> {
        let burns = self.pending_burns().await?;
        if burns.is_empty() {
            return Ok(());
        }

        let now = now_ms();
        for burn in &burns {
            match self.process_burn(burn, now).await {
                Ok(BurnTick::Published) => {
                    self.metrics.finalizer_jobs_published.inc();
                }
                Ok(BurnTick::Deferred(reason)) => {
                    self.metrics
                        .finalizer_items_skipped
                        .with_label_values(&[reason])
                        .inc();
                }
                Err(err @ IndexerError::Config(_)) => {
                    self.metrics
                        .finalizer_errors
                        .with_label_values(&[err.error_type()])
                        .inc();
                    return Err(err.into());
                }
                Err(err) => {
                    error!(
                        "[Finalizer] Skipping burn tx {} log {}: {}",
                        burn.transaction_hash, burn.log_index, err
                    );
                    self.metrics
                        .finalizer_errors
                        .with_label_values(&[err.error_type()])
                        .inc();
                }
            }
        }

        Ok(())
    }

    async fn process_burn(&self, burn: &BurnEvent, now_ms: i64) -> Result<BurnTick, IndexerError> {
        let chain = self.config.chain(burn.chain_id).ok_or_else(|| {
            IndexerError::Config(format!("chain {} is not configured", burn.chain_id))
        })?;
        let latency = chain.attestation_latency.ok_or_else(|| {
            IndexerError::Config(format!(
                "chain {} has no attestation latency entry",
                burn.chain_id
            ))
        })?;

        let wait = required_wait_secs(&latency, burn.min_finality_threshold);
        if !attestation_wait_elapsed(burn.block_timestamp_ms, now_ms, wait) {
            return Ok(BurnTick::Deferred("attestation_latency"));
        }

        let sponsored = self
            .sponsored_events_for(burn)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        let matched = match_sponsored(chain.family, burn.log_index, &sponsored);
        if matched.is_none() && sponsorship_expected(burn, chain.sponsor.as_ref()) {
            return Err(IndexerError::DataInconsistency(format!(
                "expected sponsored event for burn tx {} log {} on chain {} but found none",
                burn.transaction_hash, burn.log_index, burn.chain_id
            )));
        }

        let messages = self
            .attestation
            .fetch_attestation(burn.source_domain, &burn.transaction_hash)
            .await
            .map_err(|e| IndexerError::Transient(e.to_string()))?;
        let Some(message) = messages.into_iter().find(AttestationMessage::is_complete) else {
            return Ok(BurnTick::Deferred("attestation_pending"));
        };

        // Resolve the nonce onto the paired message-sent row before
        // publishing, so the stored message is queryable by nonce.
        if let Some(msg_id) = burn.message_sent_id {
            self.persist_resolved_nonce(msg_id, message.event_nonce)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }

        let destination_chain_id = self
            .config
            .domain_to_chain(burn.destination_domain)
            .ok_or_else(|| {
                IndexerError::DataInconsistency(format!(
                    "no chain configured for destination domain {}",
                    burn.destination_domain
                ))
            })?;

        let note = FinalizationNote {
            burn_transaction_hash: burn.transaction_hash.clone(),
            source_chain_id: burn.chain_id,
            destination_chain_id,
            message: message.message.clone(),
            attestation: message.attestation.clone(),
            sponsor_signature: matched.map(|s| s.signature.clone()),
        };
        self.publisher
            .publish(&note)
            .await
            .map_err(|e| IndexerError::Transient(e.to_string()))?;

        self.upsert_job(burn.id, &message, matched.map(|s| s.id))
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(BurnTick::Published)
    }

    /// Re-publish stale jobs whose burn has not been delivered on the
    /// destination yet. This bounds how long a lost downstream message can
    /// block finalization.
    pub async fn retry_tick(&self) -> anyhow::Result<()> {
        let cutoff = chrono::Utc::now().naive_utc()
            - chrono::Duration::seconds(self.config.finalizer.retry_delay_secs as i64);

        let mut conn = self.db.connect().await?;
        let stale: Vec<(FinalizerJob, BurnEvent)> = finalizer_jobs::table
            .inner_join(burn_events::table)
            .filter(finalizer_jobs::updated_at.lt(cutoff))
            .load(&mut conn)
            .await?;
        drop(conn);

        for (job, burn) in stale {
            if self.is_delivered(&burn).await? {
                continue;
            }

            let Some(destination_chain_id) = self.config.domain_to_chain(burn.destination_domain)
            else {
                warn!(
                    "[Finalizer] Stale job {} has unmapped destination domain {}",
                    job.id, burn.destination_domain
                );
                continue;
            };

            let sponsor_signature = match job.sponsored_event_id {
                Some(id) => self.sponsored_signature(id).await?,
                None => None,
            };

            let note = FinalizationNote {
                burn_transaction_hash: burn.transaction_hash.clone(),
                source_chain_id: burn.chain_id,
                destination_chain_id,
                message: job.message.clone(),
                attestation: job.attestation.clone(),
                sponsor_signature,
            };
            if let Err(e) = self.publisher.publish(&note).await {
                warn!(
                    "[Finalizer] Retry publish failed for burn tx {}: {:?}",
                    burn.transaction_hash, e
                );
                continue;
            }

            self.touch_job(job.id).await?;
            self.metrics.finalizer_jobs_retried.inc();
            info!(
                "[Finalizer] Re-published finalization for burn tx {} (job {})",
                burn.transaction_hash, job.id
            );
        }

        Ok(())
    }

    async fn pending_burns(&self) -> anyhow::Result<Vec<BurnEvent>> {
        let mut conn = self.db.connect().await?;
        let burns = burn_events::table
            .left_join(
                finalizer_jobs::table.on(finalizer_jobs::burn_event_id.eq(burn_events::id)),
            )
            .filter(finalizer_jobs::burn_event_id.nullable().is_null())
            .filter(burn_events::deleted_at.is_null())
            .order(burn_events::block_number.asc())
            .select(burn_events::all_columns)
            .load::<BurnEvent>(&mut conn)
            .await?;
        Ok(burns)
    }

    async fn sponsored_events_for(&self, burn: &BurnEvent) -> anyhow::Result<Vec<SponsoredBurnEvent>> {
        let mut conn = self.db.connect().await?;
        let events = sponsored_burn_events::table
            .filter(sponsored_burn_events::chain_id.eq(burn.chain_id))
            .filter(sponsored_burn_events::transaction_hash.eq(&burn.transaction_hash))
            .filter(sponsored_burn_events::deleted_at.is_null())
            .order(sponsored_burn_events::log_index.asc())
            .load::<SponsoredBurnEvent>(&mut conn)
            .await?;
        Ok(events)
    }

    async fn sponsored_signature(&self, sponsored_id: i64) -> anyhow::Result<Option<String>> {
        let mut conn = self.db.connect().await?;
        let signature = sponsored_burn_events::table
            .filter(sponsored_burn_events::id.eq(sponsored_id))
            .select(sponsored_burn_events::signature)
            .first::<String>(&mut conn)
            .await
            .optional()?;
        Ok(signature)
    }

    async fn persist_resolved_nonce(&self, message_sent_id: i64, nonce: i64) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;
        diesel::update(
            message_sent_events::table.filter(message_sent_events::id.eq(message_sent_id)),
        )
        .set(message_sent_events::nonce.eq(Some(nonce)))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    /// Whether a message-received row exists on the destination for this
    /// burn's nonce. The check intentionally ignores the destination row's
    /// own finalised/deleted flags, matching the long-standing behavior of
    /// the finalization pipeline.
    async fn is_delivered(&self, burn: &BurnEvent) -> anyhow::Result<bool> {
        let mut conn = self.db.connect().await?;
        let existing: Option<i64> = message_received_events::table
            .filter(message_received_events::nonce.eq(burn.nonce))
            .filter(message_received_events::source_domain.eq(burn.source_domain))
            .select(message_received_events::id)
            .first(&mut conn)
            .await
            .optional()?;
        Ok(existing.is_some())
    }

    /// Insert-or-update the job row for a burn event. Keyed by
    /// `burn_event_id`, last write wins: repeated runs before completion
    /// update rather than duplicate.
    pub async fn upsert_job(
        &self,
        burn_event_id: i64,
        message: &AttestationMessage,
        sponsored_event_id: Option<i64>,
    ) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;
        let job = NewFinalizerJob {
            burn_event_id,
            attestation: message.attestation.clone(),
            message: message.message.clone(),
            sponsored_event_id,
        };
        diesel::insert_into(finalizer_jobs::table)
            .values(&job)
            .on_conflict(finalizer_jobs::burn_event_id)
            .do_update()
            .set((
                finalizer_jobs::attestation.eq(&job.attestation),
                finalizer_jobs::message.eq(&job.message),
                finalizer_jobs::sponsored_event_id.eq(job.sponsored_event_id),
                finalizer_jobs::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn touch_job(&self, job_id: i64) -> anyhow::Result<()> {
        let mut conn = self.db.connect().await?;
        diesel::update(finalizer_jobs::table.filter(finalizer_jobs::id.eq(job_id)))
            .set(finalizer_jobs::updated_at.eq(diesel::dsl::now))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latency() -> AttestationLatency {
        AttestationLatency {
            fast_secs: 8,
            standard_secs: 900,
        }
    }

    fn sponsored(log_index: i64) -> SponsoredBurnEvent {
        SponsoredBurnEvent {
            id: log_index,
            chain_id: 1,
            block_number: 100,
            transaction_hash: "0xtx".to_string(),
            log_index,
            block_timestamp_ms: 0,
            finalised: false,
            deleted_at: None,
            final_recipient: "0xfinal".to_string(),
            signature: format!("0xsig{}", log_index),
        }
    }

    fn burn(destination_caller: &str, mint_recipient: &str) -> BurnEvent {
        BurnEvent {
            id: 1,
            chain_id: 1,
            block_number: 100,
            transaction_hash: "0xtx".to_string(),
            log_index: 5,
            block_timestamp_ms: 0,
            finalised: true,
            deleted_at: None,
            nonce: 42,
            source_domain: 0,
            destination_domain: 5,
            amount: "100".to_string(),
            depositor: "0xdep".to_string(),
            mint_recipient: mint_recipient.to_string(),
            burn_token: "0xusdc".to_string(),
            destination_caller: destination_caller.to_string(),
            min_finality_threshold: 1000,
            message_sent_id: None,
        }
    }

    #[test]
    fn test_wait_tier_selection() {
        assert_eq!(required_wait_secs(&latency(), 1000), 8);
        assert_eq!(required_wait_secs(&latency(), 500), 8);
        assert_eq!(required_wait_secs(&latency(), 2000), 900);
    }

    #[test]
    fn test_latency_gate() {
        // Scenario C: 5 seconds elapsed against a fast threshold of 8
        // seconds defers; 10 seconds elapsed proceeds.
        let block_ts = 1_700_000_000_000;
        assert!(!attestation_wait_elapsed(block_ts, block_ts + 5_000, 8));
        assert!(attestation_wait_elapsed(block_ts, block_ts + 10_000, 8));
        // Exactly at the threshold proceeds.
        assert!(attestation_wait_elapsed(block_ts, block_ts + 8_000, 8));
    }

    #[test]
    fn test_latency_gate_clock_skew() {
        // A block timestamp ahead of the local clock must not underflow.
        let block_ts = 1_700_000_000_000;
        assert!(!attestation_wait_elapsed(block_ts, block_ts - 5_000, 8));
    }

    #[test]
    fn test_evm_sponsorship_requires_trailing_log() {
        let events = vec![sponsored(2), sponsored(7), sponsored(9)];
        // Burn at log 5: only logs 7 and 9 qualify, nearest wins.
        let matched = match_sponsored(ChainFamily::Evm, 5, &events).unwrap();
        assert_eq!(matched.log_index, 7);

        // Burn after every sponsored log: no match.
        assert!(match_sponsored(ChainFamily::Evm, 10, &events).is_none());
    }

    #[test]
    fn test_svm_sponsorship_ignores_ordering() {
        let events = vec![sponsored(2)];
        // Same position relationship that fails on EVM matches on SVM.
        assert!(match_sponsored(ChainFamily::Evm, 5, &events).is_none());
        assert!(match_sponsored(ChainFamily::Svm, 5, &events).is_some());
    }

    #[test]
    fn test_sponsorship_expectation() {
        let config = SponsorConfig {
            destination_caller: "0xCALLER".to_string(),
            mint_recipient: "0xRECIPIENT".to_string(),
        };

        let expected = burn("0xcaller", "0xrecipient");
        assert!(sponsorship_expected(&expected, Some(&config)));

        let other_caller = burn("0xother", "0xrecipient");
        assert!(!sponsorship_expected(&other_caller, Some(&config)));

        let no_config = burn("0xcaller", "0xrecipient");
        assert!(!sponsorship_expected(&no_config, None));
    }
}
