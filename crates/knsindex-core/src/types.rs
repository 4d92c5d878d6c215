//! Typed ledger model, decoded once at the ingestion boundary.
//!
//! The history service returns blocks whose operations carry a numeric
//! `type` code. Only the three codes the name protocol cares about are
//! decoded into fields; everything else becomes [`Operation::Other`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Operation ───────────────────────────────────────────────────────────────

/// Numeric operation type codes as they appear on the wire.
pub mod op_code {
    pub const SEND: u64 = 0;
    pub const SET_INFO: u64 = 2;
    pub const CREATE_IDENTIFIER: u64 = 4;
}

/// One instruction inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOperation", into = "RawOperation")]
pub enum Operation {
    /// Move `amount` of `token` to `to`, with an optional free-form payload.
    Send {
        to: String,
        amount: String,
        token: String,
        extra: Option<String>,
    },
    /// Set the name/description metadata of the block's account.
    SetInfo { name: String, description: String },
    /// Create a new identifier (token) account.
    CreateIdentifier { identifier: String },
    /// Any operation the name protocol ignores.
    Other { code: u64 },
}

impl Operation {
    /// Wire type code of this operation.
    pub fn code(&self) -> u64 {
        match self {
            Self::Send { .. } => op_code::SEND,
            Self::SetInfo { .. } => op_code::SET_INFO,
            Self::CreateIdentifier { .. } => op_code::CREATE_IDENTIFIER,
            Self::Other { code } => *code,
        }
    }
}

/// Flat wire shape of an operation. Only used for (de)serialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawOperation {
    #[serde(rename = "type")]
    op_type: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identifier: Option<String>,
}

fn required(field: Option<String>, name: &str, code: u64) -> Result<String, String> {
    field.ok_or_else(|| format!("operation type {code} is missing `{name}`"))
}

impl TryFrom<RawOperation> for Operation {
    type Error = String;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        let code = raw.op_type;
        Ok(match code {
            op_code::SEND => Self::Send {
                to: required(raw.to, "to", code)?,
                amount: required(raw.amount, "amount", code)?,
                token: required(raw.token, "token", code)?,
                extra: raw.extra,
            },
            op_code::SET_INFO => Self::SetInfo {
                name: required(raw.name, "name", code)?,
                description: required(raw.description, "description", code)?,
            },
            op_code::CREATE_IDENTIFIER => Self::CreateIdentifier {
                identifier: required(raw.identifier, "identifier", code)?,
            },
            code => Self::Other { code },
        })
    }
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        let op_type = op.code();
        match op {
            Operation::Send {
                to,
                amount,
                token,
                extra,
            } => Self {
                op_type,
                to: Some(to),
                amount: Some(amount),
                token: Some(token),
                extra,
                ..Default::default()
            },
            Operation::SetInfo { name, description } => Self {
                op_type,
                name: Some(name),
                description: Some(description),
                ..Default::default()
            },
            Operation::CreateIdentifier { identifier } => Self {
                op_type,
                identifier: Some(identifier),
                ..Default::default()
            },
            Operation::Other { .. } => Self {
                op_type,
                ..Default::default()
            },
        }
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// A signed group of operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "$hash")]
    pub hash: String,
    /// Subject account the operations act on.
    pub account: String,
    /// Account that signed the block.
    pub signer: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl Block {
    pub fn context(&self) -> BlockContext {
        BlockContext {
            hash: self.hash.clone(),
            account: self.account.clone(),
            signer: self.signer.clone(),
            timestamp: self.date,
        }
    }
}

/// The parts of a block a projected mutation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub hash: String,
    pub account: String,
    pub signer: String,
    pub timestamp: DateTime<Utc>,
}

// ─── Service responses ───────────────────────────────────────────────────────

/// Response of the staple metadata service for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    /// Requested page; filled in by the client, not part of the response.
    #[serde(default, skip_serializing)]
    pub page: u32,
    pub total_pages: u32,
    /// Cursor for the matching history fetch. `None` = start of window.
    #[serde(default)]
    pub start_blocks_hash: Option<String>,
}

/// One bounded window of ledger history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHistory {
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "voteStaple")]
    pub vote_staple: VoteStaple,
}

/// A multi-block batch as produced by the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteStaple {
    pub blocks: Vec<Block>,
}

// ─── Projection ──────────────────────────────────────────────────────────────

/// A row of the username projection table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameRecord {
    /// Lower-case canonical key.
    pub username: String,
    /// Identifier (token) account carrying the inscription.
    pub address: String,
    /// Controlling account.
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub is_primary: bool,
    /// Time of the last mutation.
    pub timestamp: DateTime<Utc>,
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u128(s: &str) -> Option<u128> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u128::from_str_radix(s, 16).ok()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
