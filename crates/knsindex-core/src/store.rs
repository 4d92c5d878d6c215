//! Projection store trait: applies one page of instructions atomically.
//!
//! Backends live in `knsindex-storage` (memory, SQLite, PostgreSQL). Each
//! call to [`ProjectionStore::apply_page`] is a single transaction covering
//! every mutation of the page plus the new checkpoint: either all of it
//! survives a crash or none of it does.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::classifier::Instruction;
use crate::error::IndexerError;
use crate::types::{BlockContext, UsernameRecord};

/// One classified instruction together with the block it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub instruction: Instruction,
    pub block: BlockContext,
}

/// Everything one projected page writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCommit {
    /// Mutations in block order, then operation order.
    pub mutations: Vec<Mutation>,
    /// Checkpoint to persist with the mutations.
    pub checkpoint: Checkpoint,
}

/// A mutation that changed a row. Unmatched mutations produce none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppliedMutation {
    Inscribed {
        username: String,
        address: String,
        owner: String,
    },
    PrimarySet {
        username: String,
        owner: String,
    },
    CidSet {
        username: String,
        owner: String,
        cid: String,
    },
    Transferred {
        username: String,
        from: String,
        to: String,
    },
}

impl AppliedMutation {
    pub fn username(&self) -> &str {
        match self {
            Self::Inscribed { username, .. }
            | Self::PrimarySet { username, .. }
            | Self::CidSet { username, .. }
            | Self::Transferred { username, .. } => username,
        }
    }
}

/// Audit line format.
impl fmt::Display for AppliedMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inscribed { username, owner, .. } => {
                write!(f, "{owner} inscribed username {username}")
            }
            Self::PrimarySet { username, owner } => {
                write!(f, "{owner} set primary name {username}")
            }
            Self::CidSet {
                username,
                owner,
                cid,
            } => write!(f, "{owner} set CID {cid} to {username}"),
            Self::Transferred { username, from, to } => {
                write!(f, "{from} transferred username {username} to {to}")
            }
        }
    }
}

// ─── Read queries ────────────────────────────────────────────────────────────

/// Sort order by record timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(IndexerError::InvalidQuery(
                "sortOrder should be desc or asc".into(),
            )),
        }
    }
}

pub const MAX_QUERY_LIMIT: u32 = 100;

/// Paginated listing over the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsernameQuery {
    /// Restrict to one owner.
    pub owner: Option<String>,
    pub limit: u32,
    pub offset: u32,
    pub sort_order: SortOrder,
}

impl Default for UsernameQuery {
    fn default() -> Self {
        Self {
            owner: None,
            limit: MAX_QUERY_LIMIT,
            offset: 0,
            sort_order: SortOrder::Desc,
        }
    }
}

impl UsernameQuery {
    pub fn owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.limit == 0 || self.limit > MAX_QUERY_LIMIT {
            return Err(IndexerError::InvalidQuery(format!(
                "limit should be a number from 1 to {MAX_QUERY_LIMIT}"
            )));
        }
        Ok(())
    }
}

/// One page of listing results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernamePage {
    /// Matching rows across all pages.
    pub total: u64,
    pub usernames: Vec<UsernameRecord>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Durable home of the checkpoint and the username projection.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Load the checkpoint, creating the first-boot row if absent.
    async fn load_checkpoint(&self) -> Result<Checkpoint, IndexerError>;

    /// Apply a page's mutations in order and persist its checkpoint, in one
    /// transaction. Returns the mutations that changed a row.
    async fn apply_page(&self, commit: &PageCommit) -> Result<Vec<AppliedMutation>, IndexerError>;

    /// Case-insensitive lookup by username.
    async fn username(&self, username: &str) -> Result<Option<UsernameRecord>, IndexerError>;

    /// The owner's primary record, if one is set.
    async fn primary_username(&self, owner: &str)
        -> Result<Option<UsernameRecord>, IndexerError>;

    /// Paginated listing sorted by timestamp.
    async fn usernames(&self, query: &UsernameQuery) -> Result<UsernamePage, IndexerError>;
}
