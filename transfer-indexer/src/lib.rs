// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cross-protocol transfer indexer core
//!
//! Reconciles on-chain events from three cross-chain transfer protocols (a
//! native bridge, a burn/mint bridge and a message-based token bridge) into
//! one canonical transfer record per end-to-end movement of value.
//!
//! ```text
//! Chain scanners (external)
//!        │ (ScanBatch per cycle, with finality watermark)
//!        ▼
//! ingest::IngestHandler
//!        ├─► matcher        (same-transaction log pair correlation)
//!        ├─► finalization   (classified upserts + reorg soft-deletes)
//!        └─► aggregator     (canonical transfers, advisory-locked merges)
//!
//! finalizer::AttestationFinalizer
//!        └─► polls stored burn events, fetches attestations, publishes
//!            finalization notes, keeps idempotent job rows
//! ```
//!
//! The relational store is the single source of truth and the only
//! coordination point between concurrently running per-chain tasks.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod finalization;
pub mod finalizer;
pub mod ingest;
pub mod matcher;
pub mod metrics;
pub mod progress;
