//! knsindex-keeta: Keeta ledger fetcher and index loop.

pub mod builder;
pub mod fetcher;
pub mod index_loop;

pub use builder::IndexerBuilder;
pub use fetcher::{HttpLedgerClient, LedgerApi};
pub use index_loop::{CycleReport, IndexLoop};
