//! SQLite storage backend for the KNS indexer.
//!
//! Persists the checkpoint and the username projection to a single SQLite
//! file. Uses `sqlx` with WAL mode so a read API can query the file while the
//! indexer writes.
//!
//! # Usage
//! ```rust,no_run
//! use knsindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./kns.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use knsindex_core::checkpoint::Checkpoint;
use knsindex_core::classifier::Instruction;
use knsindex_core::error::IndexerError;
use knsindex_core::store::{
    AppliedMutation, Mutation, PageCommit, ProjectionStore, UsernamePage, UsernameQuery,
};
use knsindex_core::types::UsernameRecord;

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite-backed projection store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./kns.db"`) or a full
    /// SQLite URL (`"sqlite:./kns.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// The pool is capped at one connection since every in-memory connection
    /// is its own database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables, enable WAL mode, and seed the checkpoint row.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                id                   INTEGER PRIMARY KEY CHECK (id = 1),
                page                 INTEGER NOT NULL DEFAULT 1 CHECK (page > 0),
                last_block_timestamp TEXT,
                last_block_hash      TEXT
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS username (
                username   TEXT    PRIMARY KEY,
                address    TEXT    NOT NULL,
                owner      TEXT    NOT NULL,
                cid        TEXT,
                is_primary BOOLEAN NOT NULL DEFAULT FALSE,
                timestamp  TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_username_owner ON username (owner);")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_username_address ON username (address);")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query("INSERT OR IGNORE INTO settings (id) VALUES (1);")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<UsernameRecord, sqlx::Error> {
    Ok(UsernameRecord {
        username: row.try_get("username")?,
        address: row.try_get("address")?,
        owner: row.try_get("owner")?,
        cid: row.try_get("cid")?,
        is_primary: row.try_get("is_primary")?,
        timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
    })
}

async fn apply_mutation(
    conn: &mut SqliteConnection,
    mutation: &Mutation,
) -> Result<Vec<AppliedMutation>, sqlx::Error> {
    let block = &mutation.block;
    let applied = match &mutation.instruction {
        Instruction::Inscribe { username } => {
            let username = username.to_lowercase();
            let result = sqlx::query(
                "INSERT INTO username (username, address, owner, timestamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&username)
            .bind(&block.account)
            .bind(&block.signer)
            .bind(block.timestamp)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                vec![AppliedMutation::Inscribed {
                    username,
                    address: block.account.clone(),
                    owner: block.signer.clone(),
                }]
            } else {
                vec![]
            }
        }
        Instruction::SetPrimary { address } => {
            let promoted: Vec<String> = sqlx::query_scalar(
                "UPDATE username SET is_primary = TRUE, timestamp = ?1
                 WHERE address = ?2 AND owner = ?3
                 RETURNING username",
            )
            .bind(block.timestamp)
            .bind(address)
            .bind(&block.account)
            .fetch_all(&mut *conn)
            .await?;

            if !promoted.is_empty() {
                sqlx::query(
                    "UPDATE username SET is_primary = FALSE
                     WHERE address != ?1 AND owner = ?2",
                )
                .bind(address)
                .bind(&block.account)
                .execute(&mut *conn)
                .await?;
            }
            promoted
                .into_iter()
                .map(|username| AppliedMutation::PrimarySet {
                    username,
                    owner: block.account.clone(),
                })
                .collect()
        }
        Instruction::SetCid { address, cid } => {
            let updated: Vec<String> = sqlx::query_scalar(
                "UPDATE username SET cid = ?1, timestamp = ?2
                 WHERE address = ?3 AND owner = ?4
                 RETURNING username",
            )
            .bind(cid)
            .bind(block.timestamp)
            .bind(address)
            .bind(&block.account)
            .fetch_all(&mut *conn)
            .await?;

            updated
                .into_iter()
                .map(|username| AppliedMutation::CidSet {
                    username,
                    owner: block.account.clone(),
                    cid: cid.clone(),
                })
                .collect()
        }
        Instruction::Transfer { token, to } => {
            let moved: Vec<String> = sqlx::query_scalar(
                "UPDATE username SET owner = ?1, is_primary = FALSE, timestamp = ?2
                 WHERE address = ?3 AND owner = ?4
                 RETURNING username",
            )
            .bind(to)
            .bind(block.timestamp)
            .bind(token)
            .bind(&block.account)
            .fetch_all(&mut *conn)
            .await?;

            moved
                .into_iter()
                .map(|username| AppliedMutation::Transferred {
                    username,
                    from: block.account.clone(),
                    to: to.clone(),
                })
                .collect()
        }
    };
    Ok(applied)
}

// ─── ProjectionStore impl ────────────────────────────────────────────────────

#[async_trait]
impl ProjectionStore for SqliteStorage {
    async fn load_checkpoint(&self) -> Result<Checkpoint, IndexerError> {
        let row = sqlx::query(
            "SELECT page, last_block_timestamp, last_block_hash FROM settings WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let page: i64 = row.try_get("page").map_err(db_err)?;
        Ok(Checkpoint {
            page: u32::try_from(page)
                .map_err(|_| IndexerError::Storage(format!("invalid page {page}")))?,
            last_block_timestamp: row.try_get("last_block_timestamp").map_err(db_err)?,
            last_block_hash: row.try_get("last_block_hash").map_err(db_err)?,
        })
    }

    async fn apply_page(&self, commit: &PageCommit) -> Result<Vec<AppliedMutation>, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut applied = Vec::new();
        for mutation in &commit.mutations {
            applied.extend(apply_mutation(&mut tx, mutation).await.map_err(db_err)?);
        }

        let cp = &commit.checkpoint;
        sqlx::query(
            "UPDATE settings SET page = ?1, last_block_timestamp = ?2, last_block_hash = ?3
             WHERE id = 1",
        )
        .bind(i64::from(cp.page))
        .bind(cp.last_block_timestamp)
        .bind(&cp.last_block_hash)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(format!("commit page: {e}")))?;

        debug!(page = cp.page, applied = applied.len(), "page committed");
        Ok(applied)
    }

    async fn username(&self, username: &str) -> Result<Option<UsernameRecord>, IndexerError> {
        let row = sqlx::query(
            "SELECT username, address, owner, cid, is_primary, timestamp
             FROM username WHERE username = ?1",
        )
        .bind(username.to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(record_from_row).transpose().map_err(db_err)
    }

    async fn primary_username(
        &self,
        owner: &str,
    ) -> Result<Option<UsernameRecord>, IndexerError> {
        let row = sqlx::query(
            "SELECT username, address, owner, cid, is_primary, timestamp
             FROM username WHERE owner = ?1 AND is_primary = TRUE",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(record_from_row).transpose().map_err(db_err)
    }

    async fn usernames(&self, query: &UsernameQuery) -> Result<UsernamePage, IndexerError> {
        query.validate()?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM username WHERE (?1 IS NULL OR owner = ?1)",
        )
        .bind(&query.owner)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let sql = format!(
            "SELECT username, address, owner, cid, is_primary, timestamp
             FROM username WHERE (?1 IS NULL OR owner = ?1)
             ORDER BY timestamp {}, username
             LIMIT ?2 OFFSET ?3",
            query.sort_order.as_sql()
        );
        let rows = sqlx::query(&sql)
            .bind(&query.owner)
            .bind(i64::from(query.limit))
            .bind(i64::from(query.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let usernames = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        Ok(UsernamePage {
            total: total as u64,
            usernames,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
