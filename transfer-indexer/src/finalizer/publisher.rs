// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Finalization publish transport
//!
//! Fire-and-forget from the core's perspective: the `finalizer_jobs` row is
//! the durability mechanism, not the transport. A lost downstream message is
//! recovered by the retry pass, never by transport-level acknowledgements.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use url::Url;

/// The finalization instruction handed to the external finalizer bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationNote {
    pub burn_transaction_hash: String,
    pub source_chain_id: i64,
    pub destination_chain_id: i64,
    pub message: String,
    pub attestation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sponsor_signature: Option<String>,
}

#[async_trait]
pub trait FinalizationPublisher: Send + Sync {
    async fn publish(&self, note: &FinalizationNote) -> anyhow::Result<()>;
}

/// HTTP webhook publisher posting the note as JSON.
pub struct HttpFinalizationPublisher {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpFinalizationPublisher {
    pub fn new(endpoint: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl FinalizationPublisher for HttpFinalizationPublisher {
    async fn publish(&self, note: &FinalizationNote) -> anyhow::Result<()> {
        self.client
            .post(self.endpoint.clone())
            .json(note)
            .send()
            .await?
            .error_for_status()?;
        info!(
            "[Finalizer] Published finalization for burn tx {} ({} -> {})",
            note.burn_transaction_hash, note.source_chain_id, note.destination_chain_id
        );
        Ok(())
    }
}
