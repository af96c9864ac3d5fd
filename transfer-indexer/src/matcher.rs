// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event pair matcher
//!
//! Correlates two same-transaction log streams, a *leading* stream (e.g.
//! burn-initiated) and a *correlated* stream (e.g. message-dispatched), into
//! matched pairs. The on-chain invariant encoded here is that the correlated
//! log is always emitted *before* the leading log it belongs to, within the
//! same transaction. Matching is therefore: within one transaction hash, each
//! leading event takes the nearest unconsumed correlated event with a
//! strictly smaller log index.
//!
//! Pure and stateless: no I/O, deterministic for identical input regardless
//! of input ordering (both streams are sorted by log index before matching,
//! transactions are visited in sorted order).

use std::collections::{BTreeMap, HashSet};

/// Position of a log within a chain: transaction hash plus log index.
pub trait LogPosition {
    fn tx_hash(&self) -> &str;
    fn log_index(&self) -> i64;
}

/// A matched (leading, correlated) pair scoped to one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPair<'a, L, C> {
    pub leading: &'a L,
    pub correlated: &'a C,
}

/// An event left over after matching, reported through the diagnostic
/// callback so incomplete pairs are visible for alerting without aborting
/// the batch.
#[derive(Debug, Clone, Copy)]
pub enum UnmatchedEvent<'a, L, C> {
    Leading(&'a L),
    Correlated(&'a C),
}

impl<L: LogPosition, C: LogPosition> UnmatchedEvent<'_, L, C> {
    pub fn tx_hash(&self) -> &str {
        match self {
            UnmatchedEvent::Leading(e) => e.tx_hash(),
            UnmatchedEvent::Correlated(e) => e.tx_hash(),
        }
    }

    pub fn log_index(&self) -> i64 {
        match self {
            UnmatchedEvent::Leading(e) => e.log_index(),
            UnmatchedEvent::Correlated(e) => e.log_index(),
        }
    }

    pub fn side(&self) -> &'static str {
        match self {
            UnmatchedEvent::Leading(_) => "leading",
            UnmatchedEvent::Correlated(_) => "correlated",
        }
    }
}

/// Match leading events against correlated events.
///
/// Within each transaction hash both collections are sorted by log index
/// ascending, then each leading event greedily takes the nearest unconsumed
/// correlated event with a strictly smaller log index. Every correlated log
/// index is consumed by at most one leading event. Unmatched events on either
/// side are handed to `on_unmatched`; they are never an error.
pub fn match_event_pairs<'a, L, C>(
    leading: &'a [L],
    correlated: &'a [C],
    mut on_unmatched: impl FnMut(UnmatchedEvent<'a, L, C>),
) -> Vec<EventPair<'a, L, C>>
where
    L: LogPosition,
    C: LogPosition,
{
    // Group both sides by transaction hash. BTreeMap keeps the output order
    // independent of input order.
    let mut by_tx: BTreeMap<&str, (Vec<&'a L>, Vec<&'a C>)> = BTreeMap::new();
    for event in leading {
        by_tx.entry(event.tx_hash()).or_default().0.push(event);
    }
    for event in correlated {
        by_tx.entry(event.tx_hash()).or_default().1.push(event);
    }

    let mut pairs = Vec::new();
    for (_, (mut leads, mut corrs)) in by_tx {
        leads.sort_by_key(|e| e.log_index());
        corrs.sort_by_key(|e| e.log_index());

        let mut consumed: HashSet<usize> = HashSet::new();
        for lead in leads {
            // Nearest unconsumed predecessor: the last correlated event whose
            // log index is still strictly below the leading event's.
            let mut chosen = None;
            for (idx, corr) in corrs.iter().enumerate() {
                if corr.log_index() >= lead.log_index() {
                    break;
                }
                if !consumed.contains(&idx) {
                    chosen = Some(idx);
                }
            }

            match chosen {
                Some(idx) => {
                    consumed.insert(idx);
                    pairs.push(EventPair {
                        leading: lead,
                        correlated: corrs[idx],
                    });
                }
                None => on_unmatched(UnmatchedEvent::Leading(lead)),
            }
        }

        for (idx, corr) in corrs.iter().enumerate() {
            if !consumed.contains(&idx) {
                on_unmatched(UnmatchedEvent::Correlated(corr));
            }
        }
    }

    pairs
}
