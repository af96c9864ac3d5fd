// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row models for the transfer indexer tables.
//!
//! Every chain-event table carries the same leading columns (the natural key
//! `(chain_id, block_number, transaction_hash, log_index)`, the block
//! timestamp, the `finalised` flag and the `deleted_at` soft-delete marker)
//! followed by protocol-specific payload columns. `New*` structs are the
//! insert/update shape (no `id`), the plain structs are the stored shape.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{
    bridge_deposit_events, bridge_fill_events, burn_events, finalizer_jobs,
    message_received_events, message_sent_events, mint_events, oft_received_events,
    oft_sent_events, sponsored_burn_events, transfers,
};

/// Which protocol a canonical transfer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferType {
    Bridge,
    Cctp,
    Oft,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Bridge => "bridge",
            TransferType::Cctp => "cctp",
            TransferType::Oft => "oft",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "bridge" => Some(TransferType::Bridge),
            "cctp" => Some(TransferType::Cctp),
            "oft" => Some(TransferType::Oft),
            _ => None,
        }
    }
}

/// Lifecycle status of a canonical transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Filled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Filled => "filled",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransferStatus::Pending),
            "filled" => Some(TransferStatus::Filled),
            _ => None,
        }
    }
}

// ============================================================================
// Native bridge events
// ============================================================================

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = bridge_deposit_events)]
pub struct BridgeDepositEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub internal_hash: String,
    pub deposit_id: i64,
    pub destination_chain_id: i64,
    pub depositor: String,
    pub recipient: String,
    pub input_token: String,
    pub output_token: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = bridge_deposit_events)]
pub struct NewBridgeDepositEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub internal_hash: String,
    pub deposit_id: i64,
    pub destination_chain_id: i64,
    pub depositor: String,
    pub recipient: String,
    pub input_token: String,
    pub output_token: String,
    pub amount: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = bridge_fill_events)]
pub struct BridgeFillEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub internal_hash: String,
    pub deposit_id: i64,
    pub origin_chain_id: i64,
    pub relayer: String,
    pub recipient: String,
    pub output_token: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = bridge_fill_events)]
pub struct NewBridgeFillEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub internal_hash: String,
    pub deposit_id: i64,
    pub origin_chain_id: i64,
    pub relayer: String,
    pub recipient: String,
    pub output_token: String,
    pub amount: String,
}

// ============================================================================
// Burn/mint bridge events
// ============================================================================

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = burn_events)]
pub struct BurnEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub nonce: i64,
    pub source_domain: i64,
    pub destination_domain: i64,
    pub amount: String,
    pub depositor: String,
    pub mint_recipient: String,
    pub burn_token: String,
    pub destination_caller: String,
    pub min_finality_threshold: i64,
    pub message_sent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = burn_events)]
pub struct NewBurnEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub nonce: i64,
    pub source_domain: i64,
    pub destination_domain: i64,
    pub amount: String,
    pub depositor: String,
    pub mint_recipient: String,
    pub burn_token: String,
    pub destination_caller: String,
    pub min_finality_threshold: i64,
    pub message_sent_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = message_sent_events)]
pub struct MessageSentEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub source_domain: i64,
    pub destination_domain: i64,
    pub nonce: Option<i64>,
    pub message: String,
}

/// `nonce` is intentionally absent here: it is resolved later by the
/// attestation finalizer and must not be clobbered by rescans.
#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = message_sent_events)]
pub struct NewMessageSentEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub source_domain: i64,
    pub destination_domain: i64,
    pub message: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = mint_events)]
pub struct MintEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub nonce: Option<i64>,
    pub source_domain: i64,
    pub mint_recipient: String,
    pub mint_token: String,
    pub amount: String,
    pub message_received_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = mint_events)]
pub struct NewMintEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub nonce: Option<i64>,
    pub source_domain: i64,
    pub mint_recipient: String,
    pub mint_token: String,
    pub amount: String,
    pub message_received_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = message_received_events)]
pub struct MessageReceivedEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub nonce: i64,
    pub source_domain: i64,
    pub sender: String,
    pub caller: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = message_received_events)]
pub struct NewMessageReceivedEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub nonce: i64,
    pub source_domain: i64,
    pub sender: String,
    pub caller: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = sponsored_burn_events)]
pub struct SponsoredBurnEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub final_recipient: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = sponsored_burn_events)]
pub struct NewSponsoredBurnEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub final_recipient: String,
    pub signature: String,
}

// ============================================================================
// Message-bridge (OFT) events
// ============================================================================

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = oft_sent_events)]
pub struct OftSentEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub guid: String,
    pub dst_eid: i64,
    pub from_address: String,
    pub amount_sent: String,
    pub amount_received: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = oft_sent_events)]
pub struct NewOftSentEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub guid: String,
    pub dst_eid: i64,
    pub from_address: String,
    pub amount_sent: String,
    pub amount_received: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = oft_received_events)]
pub struct OftReceivedEvent {
    pub id: i64,
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub deleted_at: Option<NaiveDateTime>,
    pub guid: String,
    pub src_eid: i64,
    pub to_address: String,
    pub amount_received: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = oft_received_events)]
pub struct NewOftReceivedEvent {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_timestamp_ms: i64,
    pub finalised: bool,
    pub guid: String,
    pub src_eid: i64,
    pub to_address: String,
    pub amount_received: String,
}

// ============================================================================
// Canonical transfer
// ============================================================================

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = transfers)]
pub struct Transfer {
    pub id: i64,
    pub unique_id: String,
    pub transfer_type: String,
    pub status: String,
    pub origin_chain_id: Option<i64>,
    pub destination_chain_id: Option<i64>,
    pub depositor: Option<String>,
    pub recipient: Option<String>,
    pub amount: Option<String>,
    pub block_timestamp_ms: Option<i64>,
    pub deposit_event_id: Option<i64>,
    pub fill_event_id: Option<i64>,
    pub burn_event_id: Option<i64>,
    pub mint_event_id: Option<i64>,
    pub sent_event_id: Option<i64>,
    pub received_event_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Insertable)]
#[diesel(table_name = transfers)]
pub struct NewTransfer {
    pub unique_id: String,
    pub transfer_type: String,
    pub status: String,
    pub origin_chain_id: Option<i64>,
    pub destination_chain_id: Option<i64>,
    pub depositor: Option<String>,
    pub recipient: Option<String>,
    pub amount: Option<String>,
    pub block_timestamp_ms: Option<i64>,
    pub deposit_event_id: Option<i64>,
    pub fill_event_id: Option<i64>,
    pub burn_event_id: Option<i64>,
    pub mint_event_id: Option<i64>,
    pub sent_event_id: Option<i64>,
    pub received_event_id: Option<i64>,
}

// ============================================================================
// Finalizer jobs
// ============================================================================

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = finalizer_jobs)]
pub struct FinalizerJob {
    pub id: i64,
    pub burn_event_id: i64,
    pub attestation: String,
    pub message: String,
    pub sponsored_event_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = finalizer_jobs)]
pub struct NewFinalizerJob {
    pub burn_event_id: i64,
    pub attestation: String,
    pub message: String,
    pub sponsored_event_id: Option<i64>,
}

// ============================================================================
// Progress store
// ============================================================================

#[derive(Debug, Clone, Queryable)]
pub struct ProgressRecord {
    pub task_name: String,
    pub block_number: i64,
    pub timestamp: NaiveDateTime,
}
