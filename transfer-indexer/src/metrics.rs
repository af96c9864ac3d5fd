// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, Histogram,
    IntCounter, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

const INGEST_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    /// Per-entity, per-outcome classification of finalization upserts
    pub events_upserted: IntCounterVec,
    /// Rows soft-deleted by reorg sweeps, per entity
    pub events_retracted: IntCounterVec,
    /// Same-transaction pairs the matcher could not complete
    pub unmatched_events: IntCounterVec,
    /// Transfer rows written, per protocol and resulting status
    pub transfers_updated: IntCounterVec,
    /// Transfer rows deleted because no contributing event remained
    pub transfers_deleted: IntCounter,
    /// Finalization messages published (first-time)
    pub finalizer_jobs_published: IntCounter,
    /// Finalization messages re-published by the retry pass
    pub finalizer_jobs_retried: IntCounter,
    /// Burn events skipped by the scheduler, per reason
    pub finalizer_items_skipped: IntCounterVec,
    /// Scheduler errors, per error family
    pub finalizer_errors: IntCounterVec,
    /// Wall time spent processing one scan batch
    pub ingest_batch_latency: Histogram,
    /// Last finality watermark observed per chain
    pub last_watermark: IntGaugeVec,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_upserted: register_int_counter_vec_with_registry!(
                "indexer_events_upserted_total",
                "Chain events processed by the finalization repository, by entity and outcome",
                &["entity", "outcome"],
                registry,
            )
            .unwrap(),
            events_retracted: register_int_counter_vec_with_registry!(
                "indexer_events_retracted_total",
                "Chain events soft-deleted below the finality watermark, by entity",
                &["entity"],
                registry,
            )
            .unwrap(),
            unmatched_events: register_int_counter_vec_with_registry!(
                "indexer_unmatched_events_total",
                "Same-transaction log pairs left incomplete by the matcher",
                &["pair", "side"],
                registry,
            )
            .unwrap(),
            transfers_updated: register_int_counter_vec_with_registry!(
                "indexer_transfers_updated_total",
                "Canonical transfer rows written, by protocol and status",
                &["transfer_type", "status"],
                registry,
            )
            .unwrap(),
            transfers_deleted: register_int_counter_with_registry!(
                "indexer_transfers_deleted_total",
                "Canonical transfer rows deleted after full retraction",
                registry,
            )
            .unwrap(),
            finalizer_jobs_published: register_int_counter_with_registry!(
                "indexer_finalizer_jobs_published_total",
                "Finalization messages published for burn events",
                registry,
            )
            .unwrap(),
            finalizer_jobs_retried: register_int_counter_with_registry!(
                "indexer_finalizer_jobs_retried_total",
                "Finalization messages re-published by the retry pass",
                registry,
            )
            .unwrap(),
            finalizer_items_skipped: register_int_counter_vec_with_registry!(
                "indexer_finalizer_items_skipped_total",
                "Burn events skipped by the finalizer scheduler, by reason",
                &["reason"],
                registry,
            )
            .unwrap(),
            finalizer_errors: register_int_counter_vec_with_registry!(
                "indexer_finalizer_errors_total",
                "Finalizer scheduler errors, by error family",
                &["error_type"],
                registry,
            )
            .unwrap(),
            ingest_batch_latency: register_histogram_with_registry!(
                "indexer_ingest_batch_latency_seconds",
                "Wall time spent processing one scan batch",
                INGEST_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            last_watermark: register_int_gauge_vec_with_registry!(
                "indexer_last_watermark_block",
                "Last finality watermark observed per chain",
                &["chain_id"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Arc<Self> {
        Arc::new(Self::new(&Registry::new()))
    }
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> String {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap_or_default()
}

/// Serve the prometheus registry at `/metrics` until cancelled.
pub fn start_metrics_server(
    address: SocketAddr,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(registry);

        let listener = match tokio::net::TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("[Metrics] Failed to bind {}: {:?}", address, e);
                return;
            }
        };
        info!("[Metrics] Serving on {}/metrics", address);

        let shutdown = cancel.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            tracing::error!("[Metrics] Server error: {:?}", e);
        }
    })
}
