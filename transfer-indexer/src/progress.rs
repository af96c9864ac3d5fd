// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scan progress store
//!
//! Persists the last fully processed finality watermark per chain scanner
//! task in the `progress_store` table. On restart, syncing resumes from
//! `max(config_start_block, watermark + 1)`.

use anyhow::{Context, Result};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use tracing::debug;
use transfer_indexer_pg_db::Db;
use transfer_indexer_schema::schema::progress_store;

/// Task name for one chain's scan watermark.
pub fn scan_task_name(chain_id: i64) -> String {
    format!("chain_{}_scan_watermark", chain_id)
}

#[derive(Clone)]
pub struct ProgressStore {
    db: Db,
}

impl ProgressStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Get the watermark for a task. Returns None if no progress has been
    /// recorded yet.
    pub async fn get_watermark(&self, task_name: &str) -> Result<Option<i64>> {
        use progress_store::dsl;

        let mut conn = self.db.connect().await?;
        let result: Option<i64> = dsl::progress_store
            .filter(dsl::task_name.eq(task_name))
            .select(dsl::block_number)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(result)
    }

    /// Upsert the watermark for a task.
    pub async fn update_watermark(&self, task_name: &str, block_number: i64) -> Result<()> {
        use diesel::dsl::now;
        use progress_store::dsl;

        let mut conn = self.db.connect().await?;
        diesel::insert_into(dsl::progress_store)
            .values((
                dsl::task_name.eq(task_name),
                dsl::block_number.eq(block_number),
                dsl::timestamp.eq(now),
            ))
            .on_conflict(dsl::task_name)
            .do_update()
            .set((dsl::block_number.eq(block_number), dsl::timestamp.eq(now)))
            .execute(&mut conn)
            .await
            .context("Failed to update watermark")?;

        debug!(
            "[ProgressStore] Updated watermark for '{}' to {}",
            task_name, block_number
        );

        Ok(())
    }

    /// The block a scanner should resume from: never below the configured
    /// start block, otherwise one past the recorded watermark.
    pub async fn resume_block(&self, task_name: &str, config_start_block: i64) -> Result<i64> {
        let watermark = self.get_watermark(task_name).await?;
        Ok(compute_resume_block(config_start_block, watermark))
    }
}

fn compute_resume_block(config_start_block: i64, watermark: Option<i64>) -> i64 {
    let watermark_next = watermark.map(|w| w.saturating_add(1)).unwrap_or(0);
    config_start_block.max(watermark_next)
}
