// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Indexer configuration
//!
//! Loaded from a YAML file with `${ENV_VAR}` substitution. Per-chain entries
//! carry the chain family (the sponsorship-pairing ordering rule differs
//! between families), the burn/mint domain and message-bridge endpoint id
//! mappings, the attestation latency table, and the sponsor peripheral
//! addresses.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Chain execution family. The sponsored-event pairing rule is
/// family-specific: EVM sponsorship logs trail the burn log, Solana-style
/// chains have no such ordering constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Svm,
}

/// Expected attestation-service latency for one chain, per finality tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AttestationLatency {
    pub fast_secs: u64,
    pub standard_secs: u64,
}

/// Per-chain peripheral that submits sponsored burns. A burn whose
/// destination caller and mint recipient both match is expected to have a
/// sponsored event in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SponsorConfig {
    pub destination_caller: String,
    pub mint_recipient: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: i64,
    pub name: String,
    pub family: ChainFamily,
    /// Burn/mint bridge numeric domain, distinct from the chain id.
    #[serde(default)]
    pub cctp_domain: Option<i64>,
    /// Message-bridge endpoint id for this chain.
    #[serde(default)]
    pub oft_eid: Option<i64>,
    #[serde(default)]
    pub attestation_latency: Option<AttestationLatency>,
    #[serde(default)]
    pub sponsor: Option<SponsorConfig>,
    #[serde(default)]
    pub start_block: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    pub attestation_url: String,
    pub publish_url: String,
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_retry_delay_secs() -> u64 {
    900
}

impl FinalizerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
    pub finalizer: FinalizerConfig,
}

impl IndexerConfig {
    /// Load configuration from a YAML file with environment variable
    /// substitution.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read indexer config file: {:?}", path))?;
        let contents = substitute_env_vars(&contents);
        let config: IndexerConfig =
            serde_yaml::from_str(&contents).context("Failed to parse indexer config YAML")?;
        Ok(config)
    }

    pub fn chain(&self, chain_id: i64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Map a burn/mint bridge domain to its chain id.
    pub fn domain_to_chain(&self, domain: i64) -> Option<i64> {
        self.chains
            .iter()
            .find(|c| c.cctp_domain == Some(domain))
            .map(|c| c.chain_id)
    }

    /// Map a chain id to its burn/mint bridge domain.
    pub fn chain_to_domain(&self, chain_id: i64) -> Option<i64> {
        self.chain(chain_id).and_then(|c| c.cctp_domain)
    }

    /// Map a message-bridge endpoint id to its chain id.
    pub fn eid_to_chain(&self, eid: i64) -> Option<i64> {
        self.chains
            .iter()
            .find(|c| c.oft_eid == Some(eid))
            .map(|c| c.chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}. Unset
/// variables keep their placeholder.
fn substitute_env_vars(content: &str) -> String {
    use regex::Regex;

    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(var_value) = std::env::var(var_name) {
            result = result.replace(full_match, &var_value);
        } else {
            tracing::warn!(
                "Environment variable {} not found, keeping placeholder",
                var_name
            );
        }
    }

    result
}
