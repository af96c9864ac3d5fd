// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Deposit aggregator
//!
//! Folds finality-tracked events from all three protocols (and their
//! retractions) into one canonical [`Transfer`] row per logical cross-chain
//! transfer. Inputs are partial, can arrive out of order across chains
//! (orphan fills are normal), and can be retracted after the fact by a
//! reorg.
//!
//! Merging uses sparse overwrite semantics: only fields present in the
//! [`TransferPatch`] replace stored values, absent fields are left untouched.
//! A destination-only update therefore never nulls out source fields it was
//! never given.
//!
//! Every read-modify-write for one transfer key runs under a transaction
//! scoped advisory lock (`pg_advisory_xact_lock`) keyed by a stable hash of
//! the unique id, because batches for the same key can be processed
//! concurrently by different chain scanners. The lock is released on
//! commit/rollback.

use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use sha3::{Digest, Keccak256};
use tracing::debug;
use transfer_indexer_pg_db::Db;
use transfer_indexer_schema::models::{NewTransfer, Transfer, TransferStatus, TransferType};
use transfer_indexer_schema::schema::transfers;

/// Which side of a transfer an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSide {
    Source,
    Destination,
}

/// The foreign-key slot a contributing event occupies on the transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferLink {
    Deposit,
    Fill,
    Burn,
    Mint,
    OftSent,
    OftReceived,
}

impl TransferLink {
    pub fn side(&self) -> TransferSide {
        match self {
            TransferLink::Deposit | TransferLink::Burn | TransferLink::OftSent => {
                TransferSide::Source
            }
            TransferLink::Fill | TransferLink::Mint | TransferLink::OftReceived => {
                TransferSide::Destination
            }
        }
    }

    pub fn transfer_type(&self) -> TransferType {
        match self {
            TransferLink::Deposit | TransferLink::Fill => TransferType::Bridge,
            TransferLink::Burn | TransferLink::Mint => TransferType::Cctp,
            TransferLink::OftSent | TransferLink::OftReceived => TransferType::Oft,
        }
    }
}

/// Identity of one canonical transfer: protocol plus its protocol-specific
/// unique id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferKey {
    pub transfer_type: TransferType,
    pub unique_id: String,
}

impl TransferKey {
    /// Native bridge: a bridge-internal content hash over the deposit
    /// coordinates. Stable and recomputable by any reimplementation.
    pub fn bridge(origin_chain_id: i64, deposit_id: i64, destination_chain_id: i64) -> Self {
        let preimage = format!("{origin_chain_id}:{deposit_id}:{destination_chain_id}");
        let digest = Keccak256::digest(preimage.as_bytes());
        Self {
            transfer_type: TransferType::Bridge,
            unique_id: format!("0x{}", hex::encode(digest)),
        }
    }

    /// Burn/mint bridge: `nonce-destinationDomain`.
    pub fn cctp(nonce: i64, destination_domain: i64) -> Self {
        Self {
            transfer_type: TransferType::Cctp,
            unique_id: format!("{nonce}-{destination_domain}"),
        }
    }

    /// Message bridge: the protocol-assigned GUID verbatim.
    pub fn oft(guid: &str) -> Self {
        Self {
            transfer_type: TransferType::Oft,
            unique_id: guid.to_string(),
        }
    }
}

/// Sparse update for a transfer row. `None` means "not provided, leave the
/// stored value alone"; the distinction is explicit at the type level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPatch {
    pub origin_chain_id: Option<i64>,
    pub destination_chain_id: Option<i64>,
    pub depositor: Option<String>,
    pub recipient: Option<String>,
    pub amount: Option<String>,
    pub block_timestamp_ms: Option<i64>,
}

/// Outcome of a retraction, mostly of interest to tests and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractionOutcome {
    /// No transfer row existed for the key.
    Missing,
    /// The last remaining link was removed; the row was deleted.
    Deleted,
    /// The row kept at least one link; status recomputed from what remains.
    Kept(TransferStatus),
}

/// Derive the advisory-lock key for a transfer unique id: the big-endian
/// first eight bytes of keccak-256 of the id. Stable across processes.
pub fn lock_key(unique_id: &str) -> i64 {
    let digest = Keccak256::digest(unique_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

async fn acquire_transfer_lock(
    conn: &mut AsyncPgConnection,
    unique_id: &str,
) -> anyhow::Result<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<diesel::sql_types::BigInt, _>(lock_key(unique_id))
        .execute(conn)
        .await?;
    Ok(())
}

/// Status after applying an event of the given side to a transfer currently
/// in `current` status. A fill observed before its deposit must not be
/// demoted back to pending when the deposit arrives later.
pub fn next_status(current: Option<TransferStatus>, side: TransferSide) -> TransferStatus {
    match side {
        TransferSide::Destination => TransferStatus::Filled,
        TransferSide::Source => {
            if current == Some(TransferStatus::Filled) {
                TransferStatus::Filled
            } else {
                TransferStatus::Pending
            }
        }
    }
}

/// Merge a patch into a stored row. Only provided fields overwrite; the
/// block timestamp is seeded once (timestamp of the first-seen contributing
/// event) and never replaced afterwards.
pub fn merge_patch(row: &mut Transfer, patch: &TransferPatch) {
    if let Some(v) = patch.origin_chain_id {
        row.origin_chain_id = Some(v);
    }
    if let Some(v) = patch.destination_chain_id {
        row.destination_chain_id = Some(v);
    }
    if let Some(v) = &patch.depositor {
        row.depositor = Some(v.clone());
    }
    if let Some(v) = &patch.recipient {
        row.recipient = Some(v.clone());
    }
    if let Some(v) = &patch.amount {
        row.amount = Some(v.clone());
    }
    if row.block_timestamp_ms.is_none() {
        row.block_timestamp_ms = patch.block_timestamp_ms;
    }
}

/// What a retraction should do to a row, given the link being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetractionPlan {
    Delete,
    Keep {
        status: TransferStatus,
        clear_depositor: bool,
    },
}

pub(crate) fn retraction_plan(row: &Transfer, link: TransferLink) -> RetractionPlan {
    let mut cleared = row.clone();
    set_row_link(&mut cleared, link, None);

    let has_source = cleared.deposit_event_id.is_some()
        || cleared.burn_event_id.is_some()
        || cleared.sent_event_id.is_some();
    let has_destination = cleared.fill_event_id.is_some()
        || cleared.mint_event_id.is_some()
        || cleared.received_event_id.is_some();

    if !has_source && !has_destination {
        return RetractionPlan::Delete;
    }

    let status = if has_destination {
        TransferStatus::Filled
    } else {
        TransferStatus::Pending
    };
    RetractionPlan::Keep {
        status,
        // The depositor is the only scalar sourced exclusively from
        // source-side events; everything else is re-derivable from whichever
        // link remains.
        clear_depositor: link.side() == TransferSide::Source,
    }
}

fn set_row_link(row: &mut Transfer, link: TransferLink, value: Option<i64>) {
    match link {
        TransferLink::Deposit => row.deposit_event_id = value,
        TransferLink::Fill => row.fill_event_id = value,
        TransferLink::Burn => row.burn_event_id = value,
        TransferLink::Mint => row.mint_event_id = value,
        TransferLink::OftSent => row.sent_event_id = value,
        TransferLink::OftReceived => row.received_event_id = value,
    }
}

fn set_new_link(row: &mut NewTransfer, link: TransferLink, value: Option<i64>) {
    match link {
        TransferLink::Deposit => row.deposit_event_id = value,
        TransferLink::Fill => row.fill_event_id = value,
        TransferLink::Burn => row.burn_event_id = value,
        TransferLink::Mint => row.mint_event_id = value,
        TransferLink::OftSent => row.sent_event_id = value,
        TransferLink::OftReceived => row.received_event_id = value,
    }
}

async fn set_link_column(
    conn: &mut AsyncPgConnection,
    transfer_id: i64,
    link: TransferLink,
    value: Option<i64>,
) -> anyhow::Result<()> {
    use transfer_indexer_schema::schema::transfers::dsl;

    let target = dsl::transfers.filter(dsl::id.eq(transfer_id));
    match link {
        TransferLink::Deposit => {
            diesel::update(target)
                .set(dsl::deposit_event_id.eq(value))
                .execute(conn)
                .await?
        }
        TransferLink::Fill => {
            diesel::update(target)
                .set(dsl::fill_event_id.eq(value))
                .execute(conn)
                .await?
        }
        TransferLink::Burn => {
            diesel::update(target)
                .set(dsl::burn_event_id.eq(value))
                .execute(conn)
                .await?
        }
        TransferLink::Mint => {
            diesel::update(target)
                .set(dsl::mint_event_id.eq(value))
                .execute(conn)
                .await?
        }
        TransferLink::OftSent => {
            diesel::update(target)
                .set(dsl::sent_event_id.eq(value))
                .execute(conn)
                .await?
        }
        TransferLink::OftReceived => {
            diesel::update(target)
                .set(dsl::received_event_id.eq(value))
                .execute(conn)
                .await?
        }
    };
    Ok(())
}

pub struct DepositAggregator {
    db: Db,
}

impl DepositAggregator {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Find-or-create the transfer row for `key`, merge the patch sparsely,
    /// link the contributing event, and apply the status transition rule.
    /// The whole read-modify-write runs in one transaction under the
    /// advisory lock for the key.
    pub async fn apply_event(
        &self,
        key: &TransferKey,
        link: TransferLink,
        event_id: i64,
        patch: TransferPatch,
    ) -> anyhow::Result<TransferStatus> {
        let mut conn = self.db.connect().await?;
        let key = key.clone();
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            async move {
                use transfer_indexer_schema::schema::transfers::dsl;

                acquire_transfer_lock(conn, &key.unique_id).await?;

                let existing: Option<Transfer> = dsl::transfers
                    .filter(dsl::unique_id.eq(&key.unique_id))
                    .first(conn)
                    .await
                    .optional()?;

                let status = match existing {
                    None => {
                        let status = next_status(None, link.side());
                        let mut row = NewTransfer {
                            unique_id: key.unique_id.clone(),
                            transfer_type: key.transfer_type.as_str().to_string(),
                            status: status.as_str().to_string(),
                            origin_chain_id: patch.origin_chain_id,
                            destination_chain_id: patch.destination_chain_id,
                            depositor: patch.depositor.clone(),
                            recipient: patch.recipient.clone(),
                            amount: patch.amount.clone(),
                            block_timestamp_ms: patch.block_timestamp_ms,
                            ..NewTransfer::default()
                        };
                        set_new_link(&mut row, link, Some(event_id));
                        diesel::insert_into(dsl::transfers)
                            .values(&row)
                            .execute(conn)
                            .await?;
                        debug!(
                            "[Aggregator] Created transfer {} ({}) as {}",
                            key.unique_id,
                            key.transfer_type.as_str(),
                            status.as_str()
                        );
                        status
                    }
                    Some(mut row) => {
                        let current = TransferStatus::parse_str(&row.status);
                        let status = next_status(current, link.side());
                        merge_patch(&mut row, &patch);

                        diesel::update(dsl::transfers.filter(dsl::id.eq(row.id)))
                            .set((
                                dsl::status.eq(status.as_str()),
                                dsl::origin_chain_id.eq(row.origin_chain_id),
                                dsl::destination_chain_id.eq(row.destination_chain_id),
                                dsl::depositor.eq(row.depositor.clone()),
                                dsl::recipient.eq(row.recipient.clone()),
                                dsl::amount.eq(row.amount.clone()),
                                dsl::block_timestamp_ms.eq(row.block_timestamp_ms),
                            ))
                            .execute(conn)
                            .await?;
                        set_link_column(conn, row.id, link, Some(event_id)).await?;
                        debug!(
                            "[Aggregator] Merged {:?} event into transfer {} -> {}",
                            link,
                            key.unique_id,
                            status.as_str()
                        );
                        status
                    }
                };

                Ok(status)
            }
            .scope_boxed()
        })
        .await
    }

    /// Undo the contribution of a soft-deleted event: null its link, revert
    /// the status from what remains, and delete the row when nothing is
    /// linked on either side anymore.
    pub async fn apply_retraction(
        &self,
        key: &TransferKey,
        link: TransferLink,
    ) -> anyhow::Result<RetractionOutcome> {
        let mut conn = self.db.connect().await?;
        let key = key.clone();
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            async move {
                use transfer_indexer_schema::schema::transfers::dsl;

                acquire_transfer_lock(conn, &key.unique_id).await?;

                let existing: Option<Transfer> = dsl::transfers
                    .filter(dsl::unique_id.eq(&key.unique_id))
                    .first(conn)
                    .await
                    .optional()?;

                let Some(row) = existing else {
                    return Ok(RetractionOutcome::Missing);
                };

                match retraction_plan(&row, link) {
                    RetractionPlan::Delete => {
                        diesel::delete(dsl::transfers.filter(dsl::id.eq(row.id)))
                            .execute(conn)
                            .await?;
                        debug!(
                            "[Aggregator] Deleted transfer {}: no contributing events remain",
                            key.unique_id
                        );
                        Ok(RetractionOutcome::Deleted)
                    }
                    RetractionPlan::Keep {
                        status,
                        clear_depositor,
                    } => {
                        set_link_column(conn, row.id, link, None).await?;
                        if clear_depositor {
                            diesel::update(dsl::transfers.filter(dsl::id.eq(row.id)))
                                .set((
                                    dsl::status.eq(status.as_str()),
                                    dsl::depositor.eq(None::<String>),
                                ))
                                .execute(conn)
                                .await?;
                        } else {
                            diesel::update(dsl::transfers.filter(dsl::id.eq(row.id)))
                                .set(dsl::status.eq(status.as_str()))
                                .execute(conn)
                                .await?;
                        }
                        debug!(
                            "[Aggregator] Retracted {:?} link from transfer {} -> {}",
                            link,
                            key.unique_id,
                            status.as_str()
                        );
                        Ok(RetractionOutcome::Kept(status))
                    }
                }
            }
            .scope_boxed()
        })
        .await
    }

    /// Read a transfer by key. Used by tests and the (out of scope) query
    /// API surface.
    pub async fn get(&self, key: &TransferKey) -> anyhow::Result<Option<Transfer>> {
        let mut conn = self.db.connect().await?;
        let row = transfers::table
            .filter(transfers::unique_id.eq(&key.unique_id))
            .first::<Transfer>(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }
}
