// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Finalization repository
//!
//! Generic persistence primitive over chain-event tables: an idempotent
//! insert-or-update keyed by the natural key `(chain_id, block_number,
//! transaction_hash, log_index)` with a five-outcome classification of every
//! write, plus bulk reorg-safe soft-deletion of unfinalised rows below a
//! finality watermark.
//!
//! The outcome classification is the contract every caller depends on:
//! [`UpsertOutcome::is_content_change`] decides whether an event must be
//! folded forward into the deposit aggregator, while
//! [`UpsertOutcome::is_newly_finalised`] is what finality-sensitive
//! dependents (the attestation scheduler) care about.
//!
//! Reorg deletion is a soft delete (`deleted_at` is set, the row stays):
//! downstream tables hold foreign keys into these rows, so a hard delete
//! would need a coordinated multi-table transaction. The requirement that a
//! target table carries both a chain column and a `deleted_at` column is
//! enforced at compile time: the store macro references both columns by
//! name, so a table lacking them does not build.

use chrono::NaiveDateTime;

use crate::matcher::LogPosition;

/// The natural key identifying one chain event, globally unique per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey<'a> {
    pub chain_id: i64,
    pub block_number: i64,
    pub transaction_hash: &'a str,
    pub log_index: i64,
}

/// Accessors shared by stored and incoming chain-event rows.
pub trait ChainEventRecord {
    fn key(&self) -> EventKey<'_>;
    fn finalised(&self) -> bool;
}

/// An incoming row that can be upserted against a stored row of the same
/// table. `content_eq` compares the protocol-defined comparison fields only,
/// never the natural key and never `finalised`.
pub trait ChainEventUpsert: ChainEventRecord {
    type Stored: ChainEventRecord;

    fn content_eq(&self, stored: &Self::Stored) -> bool;
}

/// Classification of one `upsert_with_finalization` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for the natural key; a new row was inserted.
    Inserted,
    /// A comparison field differed; the row was updated.
    Updated,
    /// Only the finalised flag flipped false -> true; no content change.
    Finalised,
    /// Both a content change and the false -> true finalised flip.
    UpdatedAndFinalised,
    /// Neither condition held; no write was issued.
    Nothing,
}

impl UpsertOutcome {
    /// Whether this outcome carries new content that must be folded forward
    /// into the deposit aggregator.
    pub fn is_content_change(&self) -> bool {
        matches!(
            self,
            UpsertOutcome::Inserted | UpsertOutcome::Updated | UpsertOutcome::UpdatedAndFinalised
        )
    }

    /// Whether this outcome flipped the finalised flag.
    pub fn is_newly_finalised(&self) -> bool {
        matches!(
            self,
            UpsertOutcome::Finalised | UpsertOutcome::UpdatedAndFinalised
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Finalised => "finalised",
            UpsertOutcome::UpdatedAndFinalised => "updated_and_finalised",
            UpsertOutcome::Nothing => "nothing",
        }
    }
}

/// Pure classification of an incoming row against the stored row (if any).
pub fn classify_upsert<N: ChainEventUpsert>(
    existing: Option<&N::Stored>,
    incoming: &N,
) -> UpsertOutcome {
    let Some(stored) = existing else {
        return UpsertOutcome::Inserted;
    };

    let changed = !incoming.content_eq(stored);
    let just_finalised = incoming.finalised() && !stored.finalised();
    match (changed, just_finalised) {
        (true, true) => UpsertOutcome::UpdatedAndFinalised,
        (true, false) => UpsertOutcome::Updated,
        (false, true) => UpsertOutcome::Finalised,
        (false, false) => UpsertOutcome::Nothing,
    }
}

/// Generates a store type with the finalization-aware upsert and the
/// reorg soft-delete for one chain-event table. All event tables share the
/// leading column names this macro relies on.
macro_rules! chain_event_store {
    ($(#[$docs:meta])* $store:ident, $table:ident, $stored:ty, $new:ty) => {
        $(#[$docs])*
        pub struct $store;

        impl $store {
            /// Insert-or-update each row by its natural key and classify the
            /// outcome. Rows whose content and finality are unchanged are not
            /// written. Updates also clear `deleted_at`: a row seen again by
            /// a live scan is no longer orphaned.
            pub async fn upsert_with_finalization(
                conn: &mut diesel_async::AsyncPgConnection,
                rows: &[$new],
            ) -> anyhow::Result<Vec<(UpsertOutcome, $stored)>> {
                use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
                use diesel_async::RunQueryDsl;
                use transfer_indexer_schema::schema::$table::dsl;

                let mut results = Vec::with_capacity(rows.len());
                for row in rows {
                    let key = row.key();
                    let existing: Option<$stored> = dsl::$table
                        .filter(dsl::chain_id.eq(key.chain_id))
                        .filter(dsl::block_number.eq(key.block_number))
                        .filter(dsl::transaction_hash.eq(key.transaction_hash))
                        .filter(dsl::log_index.eq(key.log_index))
                        .first(conn)
                        .await
                        .optional()?;

                    let outcome = classify_upsert(existing.as_ref(), row);
                    let stored = match outcome {
                        UpsertOutcome::Inserted => {
                            diesel::insert_into(dsl::$table)
                                .values(row)
                                .get_result::<$stored>(conn)
                                .await?
                        }
                        UpsertOutcome::Nothing => existing.expect("classified against a row"),
                        _ => {
                            let id = existing.expect("classified against a row").id;
                            diesel::update(dsl::$table.filter(dsl::id.eq(id)))
                                .set((row, dsl::deleted_at.eq(None::<NaiveDateTime>)))
                                .get_result::<$stored>(conn)
                                .await?
                        }
                    };
                    results.push((outcome, stored));
                }
                Ok(results)
            }

            /// Soft-delete every unfinalised row for `chain_id` below the
            /// newly observed finality watermark. Returns the retracted rows
            /// so the caller can cascade them into the aggregator. Must run
            /// after the cycle's events have been stored, so a row is never
            /// retracted before its own finalised flag from the same cycle
            /// has been applied.
            pub async fn delete_unfinalised_below(
                conn: &mut diesel_async::AsyncPgConnection,
                chain_id: i64,
                last_finalised_block: i64,
            ) -> anyhow::Result<Vec<$stored>> {
                use diesel::{ExpressionMethods, QueryDsl};
                use diesel_async::RunQueryDsl;
                use transfer_indexer_schema::schema::$table::dsl;

                let retracted = diesel::update(
                    dsl::$table
                        .filter(dsl::chain_id.eq(chain_id))
                        .filter(dsl::block_number.lt(last_finalised_block))
                        .filter(dsl::finalised.eq(false))
                        .filter(dsl::deleted_at.is_null()),
                )
                .set(dsl::deleted_at.eq(diesel::dsl::now))
                .get_results::<$stored>(conn)
                .await?;

                Ok(retracted)
            }
        }
    };
}

use transfer_indexer_schema::models::{
    BridgeDepositEvent, BridgeFillEvent, BurnEvent, MessageReceivedEvent, MessageSentEvent,
    MintEvent, NewBridgeDepositEvent, NewBridgeFillEvent, NewBurnEvent, NewMessageReceivedEvent,
    NewMessageSentEvent, NewMintEvent, NewOftReceivedEvent, NewOftSentEvent,
    NewSponsoredBurnEvent, OftReceivedEvent, OftSentEvent, SponsoredBurnEvent,
};

chain_event_store!(
    BridgeDepositStore,
    bridge_deposit_events,
    BridgeDepositEvent,
    NewBridgeDepositEvent
);
chain_event_store!(
    BridgeFillStore,
    bridge_fill_events,
    BridgeFillEvent,
    NewBridgeFillEvent
);
chain_event_store!(BurnStore, burn_events, BurnEvent, NewBurnEvent);
chain_event_store!(
    MessageSentStore,
    message_sent_events,
    MessageSentEvent,
    NewMessageSentEvent
);
chain_event_store!(MintStore, mint_events, MintEvent, NewMintEvent);
chain_event_store!(
    MessageReceivedStore,
    message_received_events,
    MessageReceivedEvent,
    NewMessageReceivedEvent
);
chain_event_store!(
    SponsoredBurnStore,
    sponsored_burn_events,
    SponsoredBurnEvent,
    NewSponsoredBurnEvent
);
chain_event_store!(OftSentStore, oft_sent_events, OftSentEvent, NewOftSentEvent);
chain_event_store!(
    OftReceivedStore,
    oft_received_events,
    OftReceivedEvent,
    NewOftReceivedEvent
);

// ============================================================================
// Record/upsert trait implementations per event type
// ============================================================================

macro_rules! impl_chain_event_record {
    ($ty:ty) => {
        impl ChainEventRecord for $ty {
            fn key(&self) -> EventKey<'_> {
                EventKey {
                    chain_id: self.chain_id,
                    block_number: self.block_number,
                    transaction_hash: &self.transaction_hash,
                    log_index: self.log_index,
                }
            }

            fn finalised(&self) -> bool {
                self.finalised
            }
        }

        // Every chain-event record has a log position, which is what the
        // pair matcher operates on.
        impl LogPosition for $ty {
            fn tx_hash(&self) -> &str {
                &self.transaction_hash
            }

            fn log_index(&self) -> i64 {
                self.log_index
            }
        }
    };
}

impl_chain_event_record!(BridgeDepositEvent);
impl_chain_event_record!(NewBridgeDepositEvent);
impl_chain_event_record!(BridgeFillEvent);
impl_chain_event_record!(NewBridgeFillEvent);
impl_chain_event_record!(BurnEvent);
impl_chain_event_record!(NewBurnEvent);
impl_chain_event_record!(MessageSentEvent);
impl_chain_event_record!(NewMessageSentEvent);
impl_chain_event_record!(MintEvent);
impl_chain_event_record!(NewMintEvent);
impl_chain_event_record!(MessageReceivedEvent);
impl_chain_event_record!(NewMessageReceivedEvent);
impl_chain_event_record!(SponsoredBurnEvent);
impl_chain_event_record!(NewSponsoredBurnEvent);
impl_chain_event_record!(OftSentEvent);
impl_chain_event_record!(NewOftSentEvent);
impl_chain_event_record!(OftReceivedEvent);
impl_chain_event_record!(NewOftReceivedEvent);

impl ChainEventUpsert for NewBridgeDepositEvent {
    type Stored = BridgeDepositEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.internal_hash == stored.internal_hash
            && self.deposit_id == stored.deposit_id
            && self.destination_chain_id == stored.destination_chain_id
            && self.depositor == stored.depositor
            && self.recipient == stored.recipient
            && self.input_token == stored.input_token
            && self.output_token == stored.output_token
            && self.amount == stored.amount
    }
}

impl ChainEventUpsert for NewBridgeFillEvent {
    type Stored = BridgeFillEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.internal_hash == stored.internal_hash
            && self.deposit_id == stored.deposit_id
            && self.origin_chain_id == stored.origin_chain_id
            && self.relayer == stored.relayer
            && self.recipient == stored.recipient
            && self.output_token == stored.output_token
            && self.amount == stored.amount
    }
}

impl ChainEventUpsert for NewBurnEvent {
    type Stored = BurnEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        // message_sent_id only participates when the incoming row carries a
        // link: a rescan that failed to pair must not unlink a stored pair
        // (and an AsChangeset update skips the None anyway).
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.nonce == stored.nonce
            && self.source_domain == stored.source_domain
            && self.destination_domain == stored.destination_domain
            && self.amount == stored.amount
            && self.depositor == stored.depositor
            && self.mint_recipient == stored.mint_recipient
            && self.burn_token == stored.burn_token
            && self.destination_caller == stored.destination_caller
            && self.min_finality_threshold == stored.min_finality_threshold
            && (self.message_sent_id.is_none() || self.message_sent_id == stored.message_sent_id)
    }
}

impl ChainEventUpsert for NewMessageSentEvent {
    type Stored = MessageSentEvent;

    // `nonce` is excluded: it is written by the attestation finalizer, not
    // by scans, and must survive rescans of the same log.
    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.source_domain == stored.source_domain
            && self.destination_domain == stored.destination_domain
            && self.message == stored.message
    }
}

impl ChainEventUpsert for NewMintEvent {
    type Stored = MintEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.source_domain == stored.source_domain
            && self.mint_recipient == stored.mint_recipient
            && self.mint_token == stored.mint_token
            && self.amount == stored.amount
            && (self.nonce.is_none() || self.nonce == stored.nonce)
            && (self.message_received_id.is_none()
                || self.message_received_id == stored.message_received_id)
    }
}

impl ChainEventUpsert for NewMessageReceivedEvent {
    type Stored = MessageReceivedEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.nonce == stored.nonce
            && self.source_domain == stored.source_domain
            && self.sender == stored.sender
            && self.caller == stored.caller
    }
}

impl ChainEventUpsert for NewSponsoredBurnEvent {
    type Stored = SponsoredBurnEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.final_recipient == stored.final_recipient
            && self.signature == stored.signature
    }
}

impl ChainEventUpsert for NewOftSentEvent {
    type Stored = OftSentEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.guid == stored.guid
            && self.dst_eid == stored.dst_eid
            && self.from_address == stored.from_address
            && self.amount_sent == stored.amount_sent
            && self.amount_received == stored.amount_received
    }
}

impl ChainEventUpsert for NewOftReceivedEvent {
    type Stored = OftReceivedEvent;

    fn content_eq(&self, stored: &Self::Stored) -> bool {
        self.block_timestamp_ms == stored.block_timestamp_ms
            && self.guid == stored.guid
            && self.src_eid == stored.src_eid
            && self.to_address == stored.to_address
            && self.amount_received == stored.amount_received
    }
}
