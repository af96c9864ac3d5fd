// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the indexer core.
//!
//! Four families with distinct handling policies:
//! - [`IndexerError::Config`] is fatal for the current task invocation and is
//!   never retried within it; other chains' tasks keep running.
//! - [`IndexerError::DataInconsistency`] is logged with context and the
//!   offending item is skipped; the rest of the batch continues.
//! - [`IndexerError::Transient`] defers work to the next scheduled tick
//!   without marking anything as processed.
//! - [`IndexerError::Storage`] wraps database failures.

#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("data inconsistency: {0}")]
    DataInconsistency(String),

    #[error("transient upstream error: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl IndexerError {
    /// Returns a short string identifying the error family for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            IndexerError::Config(_) => "config",
            IndexerError::DataInconsistency(_) => "data_inconsistency",
            IndexerError::Transient(_) => "transient",
            IndexerError::Storage(_) => "storage",
        }
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;
