//! knsindex-core: foundation for the KNS name-registration indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexLoop (knsindex-keeta)
//!     ├── LedgerApi              (metadata + history fetch)
//!     ├── sequence_blocks        (flatten vote staples, order by time)
//!     ├── InstructionClassifier  (operation → Instruction, one-block lookback)
//!     ├── ProjectionStore        (page mutations + Checkpoint, one transaction)
//!     └── HandlerRegistry        (post-commit mutation handlers)
//! ```

pub mod checkpoint;
pub mod classifier;
pub mod error;
pub mod handler;
pub mod indexer;
pub mod retry;
pub mod sequencer;
pub mod store;
pub mod types;

pub use checkpoint::Checkpoint;
pub use classifier::{Instruction, InstructionClassifier, Lookback, ProtocolRules};
pub use error::IndexerError;
pub use handler::{HandlerRegistry, MutationHandler};
pub use indexer::{IndexerConfig, IndexerState};
pub use retry::{RetryConfig, RetryPolicy};
pub use sequencer::sequence_blocks;
pub use store::{
    AppliedMutation, Mutation, PageCommit, ProjectionStore, SortOrder, UsernamePage,
    UsernameQuery,
};
pub use types::{Block, BlockContext, LedgerHistory, Operation, PageMetadata, UsernameRecord};
