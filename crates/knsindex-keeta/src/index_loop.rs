//! The main index loop: one page of ledger history per cycle.
//!
//! Each cycle:
//!   1. Load the checkpoint from the store
//!   2. Fetch the page's metadata, then the history window it points at
//!   3. Sequence the window's blocks by timestamp
//!   4. Skip the blocks up to the checkpoint; classify the rest with a
//!      one-block lookback
//!   5. Apply every mutation and the advanced checkpoint in one transaction
//!   6. Log the audit lines and dispatch post-commit handlers
//!
//! A failed cycle writes nothing; the same page is retried after
//! `failure_delay_ms`. Successful cycles are spaced by `poll_interval_ms`.
//!
//! The lookback survives across pages. After a restart it is rebuilt from
//! the checkpoint block, looked up in the current page or, failing that, in
//! the previous one.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use knsindex_core::checkpoint::Checkpoint;
use knsindex_core::classifier::{InstructionClassifier, Lookback};
use knsindex_core::error::IndexerError;
use knsindex_core::handler::HandlerRegistry;
use knsindex_core::indexer::{IndexerConfig, IndexerState};
use knsindex_core::sequencer::sequence_blocks;
use knsindex_core::store::{Mutation, PageCommit, ProjectionStore};
use knsindex_core::types::Block;

use crate::fetcher::LedgerApi;

/// Outcome of one successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Page that was fetched.
    pub page: u32,
    /// Page the next cycle will fetch.
    pub next_page: u32,
    pub total_pages: u32,
    /// Blocks classified in this cycle.
    pub processed: usize,
    /// Blocks skipped as already covered by the checkpoint.
    pub skipped: usize,
    /// Mutations that changed a row.
    pub applied: usize,
}

/// The core index loop implementation.
pub struct IndexLoop<C: LedgerApi, S: ProjectionStore> {
    config: IndexerConfig,
    client: C,
    store: S,
    classifier: InstructionClassifier,
    /// `None` until the first committed cycle of this process.
    lookback: Option<Lookback>,
    handlers: HandlerRegistry,
    state: IndexerState,
}

impl<C: LedgerApi, S: ProjectionStore> IndexLoop<C, S> {
    /// Fails only if the configured protocol patterns do not compile.
    pub fn new(
        config: IndexerConfig,
        client: C,
        store: S,
        handlers: HandlerRegistry,
    ) -> Result<Self, IndexerError> {
        Ok(Self {
            classifier: InstructionClassifier::from_config(&config)?,
            lookback: None,
            config,
            client,
            store,
            handlers,
            state: IndexerState::Idle,
        })
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Consume the loop, handing back its store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Run cycles until `cancel` fires.
    ///
    /// Cycle errors are logged and retried; they never end the loop.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), IndexerError> {
        info!("Indexer started");

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let failure_delay = Duration::from_millis(self.config.failure_delay_ms);

        loop {
            self.state = IndexerState::Polling;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.run_once() => outcome,
            };

            let delay = match outcome {
                Ok(report) => {
                    debug!(
                        page = report.page,
                        next_page = report.next_page,
                        total_pages = report.total_pages,
                        processed = report.processed,
                        skipped = report.skipped,
                        applied = report.applied,
                        "Cycle complete"
                    );
                    poll_interval
                }
                Err(e) => {
                    self.state = IndexerState::Error;
                    error!(error = %e, retry_in_ms = self.config.failure_delay_ms, "Cycle failed");
                    failure_delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state = IndexerState::Stopped;
        info!("Indexer stopped");
        Ok(())
    }

    /// Fetch, classify, and project the checkpoint's current page.
    pub async fn run_once(&mut self) -> Result<CycleReport, IndexerError> {
        let checkpoint = self.store.load_checkpoint().await?;
        let page = checkpoint.page;

        let metadata = self.client.fetch_page_metadata(page).await?;
        let history = self
            .client
            .fetch_ledger_history(metadata.start_blocks_hash.as_deref())
            .await?;
        let blocks = sequence_blocks(history);

        let skipped = checkpoint.resume_index(&blocks);
        let (seen, fresh) = blocks.split_at(skipped);

        let mut lookback = match &self.lookback {
            Some(lookback) => lookback.clone(),
            None => self.boot_lookback(&checkpoint, seen).await?,
        };
        let mut next = checkpoint.clone();
        let mut mutations = Vec::new();
        let mut processed = 0;

        for block in fresh {
            let ctx = block.context();
            for instruction in self.classifier.classify_block(block, &lookback) {
                debug!(kind = instruction.kind(), block = %block.hash, "instruction");
                mutations.push(Mutation {
                    instruction,
                    block: ctx.clone(),
                });
            }
            lookback = Lookback::from_block(block);
            next.advance_to(block);
            processed += 1;
        }
        next.advance_page(metadata.total_pages);

        let commit = PageCommit {
            mutations,
            checkpoint: next,
        };
        let applied = self.store.apply_page(&commit).await?;
        self.lookback = Some(lookback);

        for mutation in &applied {
            info!("{mutation}");
        }
        self.handlers.dispatch(&applied, page).await;

        Ok(CycleReport {
            page,
            next_page: commit.checkpoint.page,
            total_pages: metadata.total_pages,
            processed,
            skipped,
            applied: applied.len(),
        })
    }

    /// Lookback for the first cycle after boot: the operations of the
    /// checkpoint block.
    async fn boot_lookback(
        &self,
        checkpoint: &Checkpoint,
        seen: &[Block],
    ) -> Result<Lookback, IndexerError> {
        let Some(hash) = checkpoint.last_block_hash.as_deref() else {
            return Ok(Lookback::empty());
        };
        if let Some(block) = seen.iter().find(|b| b.hash == hash) {
            return Ok(Lookback::from_block(block));
        }

        // The page counter moved past the checkpoint block's page.
        if checkpoint.page > 1 {
            let metadata = self.client.fetch_page_metadata(checkpoint.page - 1).await?;
            let history = self
                .client
                .fetch_ledger_history(metadata.start_blocks_hash.as_deref())
                .await?;
            if let Some(block) = sequence_blocks(history).into_iter().find(|b| b.hash == hash) {
                debug!(hash, "lookback restored from previous page");
                return Ok(Lookback::from_block(&block));
            }
        }

        warn!(hash, "checkpoint block not found, starting with an empty lookback");
        Ok(Lookback::empty())
    }
}
