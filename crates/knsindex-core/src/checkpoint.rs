//! Checkpoint: the indexer's sole durable progress marker.
//!
//! A checkpoint stores the metadata page to fetch next and the timestamp and
//! hash of the last projected block. It is written in the same transaction
//! as the projection writes of a page, so on restart the indexer resumes
//! exactly where the last committed page left off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Block;

/// The singleton resume cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Metadata page to fetch next. Always `> 0`.
    pub page: u32,
    /// Timestamp of the last projected block.
    pub last_block_timestamp: Option<DateTime<Utc>>,
    /// Hash of the last projected block.
    pub last_block_hash: Option<String>,
}

impl Default for Checkpoint {
    /// Page 1 with an empty cursor, as created on first boot.
    fn default() -> Self {
        Self {
            page: 1,
            last_block_timestamp: None,
            last_block_hash: None,
        }
    }
}

impl Checkpoint {
    /// Number of leading blocks of a sequenced page that were already
    /// projected.
    ///
    /// `blocks` must be in the order produced by the sequencer. Every block
    /// strictly older than the checkpoint is skipped, as is every block up to
    /// and including the checkpoint block itself, so blocks sharing its
    /// timestamp but sequenced before it are never reapplied. Both cursor
    /// fields must be set for anything to be skipped.
    pub fn resume_index(&self, blocks: &[Block]) -> usize {
        let (Some(ts), Some(hash)) = (&self.last_block_timestamp, &self.last_block_hash) else {
            return 0;
        };
        let older = blocks.iter().take_while(|b| b.date < *ts).count();
        let boundary = blocks
            .iter()
            .position(|b| b.hash == *hash)
            .map_or(0, |i| i + 1);
        older.max(boundary)
    }

    /// Move the block cursor to `block`.
    pub fn advance_to(&mut self, block: &Block) {
        self.last_block_timestamp = Some(block.date);
        self.last_block_hash = Some(block.hash.clone());
    }

    /// Advance the page counter unless `page` is already the last reported page.
    ///
    /// At the tip the same page is re-fetched until new staples extend
    /// `total_pages`.
    pub fn advance_page(&mut self, total_pages: u32) {
        if self.page < total_pages {
            self.page += 1;
        }
    }
}
