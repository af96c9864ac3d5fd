// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Attestation service client
//!
//! Boundary to the external attestation service. The core treats an empty
//! message list and a non-`complete` status identically: not yet ready,
//! retry on a later tick.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use url::Url;

/// Status value marking an attestation as usable.
pub const ATTESTATION_STATUS_COMPLETE: &str = "complete";

/// One attested message for a burn transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationMessage {
    pub attestation: String,
    pub event_nonce: i64,
    pub message: String,
    pub status: String,
}

impl AttestationMessage {
    pub fn is_complete(&self) -> bool {
        self.status == ATTESTATION_STATUS_COMPLETE
    }
}

#[async_trait]
pub trait AttestationClient: Send + Sync {
    /// Fetch the attested messages for a transaction on the given burn/mint
    /// domain. An empty vec means the service has nothing yet.
    async fn fetch_attestation(
        &self,
        domain: i64,
        transaction_hash: &str,
    ) -> anyhow::Result<Vec<AttestationMessage>>;
}

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    attestation: String,
    #[serde(default)]
    event_nonce: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// HTTP client against an attestation API exposing
/// `GET /v2/messages/{domain}?transactionHash={hash}`.
pub struct HttpAttestationClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAttestationClient {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl AttestationClient for HttpAttestationClient {
    async fn fetch_attestation(
        &self,
        domain: i64,
        transaction_hash: &str,
    ) -> anyhow::Result<Vec<AttestationMessage>> {
        let mut url = self.base_url.join(&format!("v2/messages/{}", domain))?;
        url.query_pairs_mut()
            .append_pair("transactionHash", transaction_hash);

        let response = self.client.get(url).send().await?;
        // The service answers 404 for transactions it has not seen yet;
        // that is "not ready", not an error.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        let response = response.error_for_status()?;
        let body: AttestationResponse = response.json().await?;

        let mut messages = Vec::with_capacity(body.messages.len());
        for wire in body.messages {
            let event_nonce = match wire.event_nonce.parse::<i64>() {
                Ok(nonce) => nonce,
                Err(_) => {
                    warn!(
                        "[Finalizer] Unparseable event nonce '{}' for tx {}",
                        wire.event_nonce, transaction_hash
                    );
                    continue;
                }
            };
            messages.push(AttestationMessage {
                attestation: wire.attestation,
                event_nonce,
                message: wire.message,
                status: wire.status,
            });
        }
        Ok(messages)
    }
}
