//! In-memory storage backend.
//!
//! Holds the checkpoint and the username projection in RAM. A page is
//! applied to a copy of the state and swapped in only when every mutation
//! succeeded, which gives the same all-or-nothing behaviour as the SQL
//! backends. Useful for tests and short-lived indexers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use knsindex_core::checkpoint::Checkpoint;
use knsindex_core::classifier::Instruction;
use knsindex_core::error::IndexerError;
use knsindex_core::store::{
    AppliedMutation, Mutation, PageCommit, ProjectionStore, SortOrder, UsernamePage,
    UsernameQuery,
};
use knsindex_core::types::UsernameRecord;

#[derive(Debug, Clone, Default)]
struct State {
    checkpoint: Option<Checkpoint>,
    /// Keyed by lower-case username.
    usernames: BTreeMap<String, UsernameRecord>,
}

/// In-memory projection store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
    fail_next_apply: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply_page` fail after staging its writes, to exercise
    /// rollback paths.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Number of projected usernames.
    pub fn username_count(&self) -> Result<usize, IndexerError> {
        Ok(self.lock()?.usernames.len())
    }

    /// Every record, ordered by username.
    pub fn all_usernames(&self) -> Result<Vec<UsernameRecord>, IndexerError> {
        Ok(self.lock()?.usernames.values().cloned().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, IndexerError> {
        self.state
            .lock()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }
}

/// Apply one mutation to `state`, returning what changed.
fn apply(state: &mut State, mutation: &Mutation) -> Vec<AppliedMutation> {
    let block = &mutation.block;
    match &mutation.instruction {
        Instruction::Inscribe { username } => {
            let username = username.to_lowercase();
            if state.usernames.contains_key(&username) {
                return vec![];
            }
            state.usernames.insert(
                username.clone(),
                UsernameRecord {
                    username: username.clone(),
                    address: block.account.clone(),
                    owner: block.signer.clone(),
                    cid: None,
                    is_primary: false,
                    timestamp: block.timestamp,
                },
            );
            vec![AppliedMutation::Inscribed {
                username,
                address: block.account.clone(),
                owner: block.signer.clone(),
            }]
        }
        Instruction::SetPrimary { address } => {
            let owner = &block.account;
            let promoted: Vec<AppliedMutation> = state
                .usernames
                .values_mut()
                .filter(|r| r.address == *address && r.owner == *owner)
                .map(|r| {
                    r.is_primary = true;
                    r.timestamp = block.timestamp;
                    AppliedMutation::PrimarySet {
                        username: r.username.clone(),
                        owner: owner.clone(),
                    }
                })
                .collect();
            if !promoted.is_empty() {
                for r in state.usernames.values_mut() {
                    if r.owner == *owner && r.address != *address {
                        r.is_primary = false;
                    }
                }
            }
            promoted
        }
        Instruction::SetCid { address, cid } => {
            let owner = &block.account;
            state
                .usernames
                .values_mut()
                .filter(|r| r.address == *address && r.owner == *owner)
                .map(|r| {
                    r.cid = Some(cid.clone());
                    r.timestamp = block.timestamp;
                    AppliedMutation::CidSet {
                        username: r.username.clone(),
                        owner: owner.clone(),
                        cid: cid.clone(),
                    }
                })
                .collect()
        }
        Instruction::Transfer { token, to } => {
            let from = &block.account;
            state
                .usernames
                .values_mut()
                .filter(|r| r.address == *token && r.owner == *from)
                .map(|r| {
                    r.owner = to.clone();
                    r.is_primary = false;
                    r.timestamp = block.timestamp;
                    AppliedMutation::Transferred {
                        username: r.username.clone(),
                        from: from.clone(),
                        to: to.clone(),
                    }
                })
                .collect()
        }
    }
}

#[async_trait]
impl ProjectionStore for InMemoryStorage {
    async fn load_checkpoint(&self) -> Result<Checkpoint, IndexerError> {
        let mut state = self.lock()?;
        Ok(state.checkpoint.get_or_insert_with(Checkpoint::default).clone())
    }

    async fn apply_page(&self, commit: &PageCommit) -> Result<Vec<AppliedMutation>, IndexerError> {
        let mut state = self.lock()?;
        let mut staged = state.clone();

        let mut applied = Vec::new();
        for mutation in &commit.mutations {
            applied.extend(apply(&mut staged, mutation));
        }
        staged.checkpoint = Some(commit.checkpoint.clone());

        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(IndexerError::Storage("injected commit failure".into()));
        }
        *state = staged;
        Ok(applied)
    }

    async fn username(&self, username: &str) -> Result<Option<UsernameRecord>, IndexerError> {
        Ok(self.lock()?.usernames.get(&username.to_lowercase()).cloned())
    }

    async fn primary_username(
        &self,
        owner: &str,
    ) -> Result<Option<UsernameRecord>, IndexerError> {
        Ok(self
            .lock()?
            .usernames
            .values()
            .find(|r| r.owner == owner && r.is_primary)
            .cloned())
    }

    async fn usernames(&self, query: &UsernameQuery) -> Result<UsernamePage, IndexerError> {
        query.validate()?;
        let state = self.lock()?;
        let mut rows: Vec<&UsernameRecord> = state
            .usernames
            .values()
            .filter(|r| query.owner.as_ref().map_or(true, |o| r.owner == *o))
            .collect();
        rows.sort_by(|a, b| {
            let by_time = match query.sort_order {
                SortOrder::Asc => a.timestamp.cmp(&b.timestamp),
                SortOrder::Desc => b.timestamp.cmp(&a.timestamp),
            };
            by_time.then_with(|| a.username.cmp(&b.username))
        });
        Ok(UsernamePage {
            total: rows.len() as u64,
            usernames: rows
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit as usize)
                .cloned()
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use knsindex_core::types::BlockContext;

    fn ctx(account: &str, signer: &str, secs: i64) -> BlockContext {
        BlockContext {
            hash: format!("H{secs}"),
            account: account.into(),
            signer: signer.into(),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
        }
    }

    fn inscribe(name: &str, token: &str, owner: &str, secs: i64) -> Mutation {
        Mutation {
            instruction: Instruction::Inscribe {
                username: name.into(),
            },
            block: ctx(token, owner, secs),
        }
    }

    fn commit(mutations: Vec<Mutation>, page: u32) -> PageCommit {
        PageCommit {
            mutations,
            checkpoint: Checkpoint {
                page,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn first_boot_checkpoint() {
        let store = InMemoryStorage::new();
        assert_eq!(store.load_checkpoint().await.unwrap(), Checkpoint::default());
    }

    #[tokio::test]
    async fn inscribe_is_first_writer_wins() {
        let store = InMemoryStorage::new();
        let applied = store
            .apply_page(&commit(
                vec![
                    inscribe("alice", "keeta_t1", "keeta_o1", 10),
                    inscribe("alice", "keeta_t2", "keeta_o2", 20),
                ],
                2,
            ))
            .await
            .unwrap();

        assert_eq!(applied.len(), 1);
        let rec = store.username("ALICE").await.unwrap().unwrap();
        assert_eq!(rec.address, "keeta_t1");
        assert_eq!(rec.owner, "keeta_o1");
        assert_eq!(store.load_checkpoint().await.unwrap().page, 2);
    }

    #[tokio::test]
    async fn set_primary_demotes_siblings() {
        let store = InMemoryStorage::new();
        let primary = |addr: &str, secs| Mutation {
            instruction: Instruction::SetPrimary {
                address: addr.into(),
            },
            block: ctx("keeta_o1", "keeta_o1", secs),
        };
        store
            .apply_page(&commit(
                vec![
                    inscribe("a", "keeta_t1", "keeta_o1", 1),
                    inscribe("b", "keeta_t2", "keeta_o1", 2),
                    inscribe("c", "keeta_t3", "keeta_o2", 3),
                    primary("keeta_t1", 4),
                    primary("keeta_t2", 5),
                ],
                1,
            ))
            .await
            .unwrap();

        let p = store.primary_username("keeta_o1").await.unwrap().unwrap();
        assert_eq!(p.username, "b");
        assert!(!store.username("a").await.unwrap().unwrap().is_primary);
        assert!(store.primary_username("keeta_o2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dangling_references_are_noops() {
        let store = InMemoryStorage::new();
        store
            .apply_page(&commit(vec![inscribe("a", "keeta_t1", "keeta_o1", 1)], 1))
            .await
            .unwrap();

        // Right address, wrong owner.
        let applied = store
            .apply_page(&commit(
                vec![
                    Mutation {
                        instruction: Instruction::SetCid {
                            address: "keeta_t1".into(),
                            cid: "Qm".into(),
                        },
                        block: ctx("keeta_o2", "keeta_o2", 2),
                    },
                    Mutation {
                        instruction: Instruction::Transfer {
                            token: "keeta_t1".into(),
                            to: "keeta_o2".into(),
                        },
                        block: ctx("keeta_o2", "keeta_o2", 3),
                    },
                    Mutation {
                        instruction: Instruction::SetPrimary {
                            address: "keeta_nope".into(),
                        },
                        block: ctx("keeta_o1", "keeta_o1", 4),
                    },
                ],
                1,
            ))
            .await
            .unwrap();

        assert!(applied.is_empty());
        let rec = store.username("a").await.unwrap().unwrap();
        assert_eq!(rec.owner, "keeta_o1");
        assert!(rec.cid.is_none());
    }

    #[tokio::test]
    async fn transfer_clears_primary_and_bumps_timestamp() {
        let store = InMemoryStorage::new();
        store
            .apply_page(&commit(
                vec![
                    inscribe("a", "keeta_t1", "keeta_o1", 1),
                    Mutation {
                        instruction: Instruction::SetPrimary {
                            address: "keeta_t1".into(),
                        },
                        block: ctx("keeta_o1", "keeta_o1", 2),
                    },
                    Mutation {
                        instruction: Instruction::Transfer {
                            token: "keeta_t1".into(),
                            to: "keeta_o2".into(),
                        },
                        block: ctx("keeta_o1", "keeta_o1", 3),
                    },
                ],
                1,
            ))
            .await
            .unwrap();

        let rec = store.username("a").await.unwrap().unwrap();
        assert_eq!(rec.owner, "keeta_o2");
        assert!(!rec.is_primary);
        assert_eq!(rec.timestamp.timestamp(), 3);
    }

    #[tokio::test]
    async fn failed_apply_leaves_state_untouched() {
        let store = InMemoryStorage::new();
        store.fail_next_apply();
        let res = store
            .apply_page(&commit(vec![inscribe("a", "keeta_t1", "keeta_o1", 1)], 5))
            .await;

        assert!(matches!(res, Err(IndexerError::Storage(_))));
        assert_eq!(store.username_count().unwrap(), 0);
        assert_eq!(store.load_checkpoint().await.unwrap().page, 1);
    }

    #[tokio::test]
    async fn listing_sorts_filters_and_pages() {
        let store = InMemoryStorage::new();
        store
            .apply_page(&commit(
                vec![
                    inscribe("a", "keeta_t1", "keeta_o1", 1),
                    inscribe("b", "keeta_t2", "keeta_o2", 2),
                    inscribe("c", "keeta_t3", "keeta_o1", 3),
                ],
                1,
            ))
            .await
            .unwrap();

        let page = store.usernames(&UsernameQuery::default()).await.unwrap();
        assert_eq!(page.total, 3);
        let names: Vec<_> = page.usernames.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, ["c", "b", "a"]);

        let q = UsernameQuery {
            limit: 1,
            offset: 1,
            sort_order: SortOrder::Asc,
            ..UsernameQuery::owner("keeta_o1")
        };
        let page = store.usernames(&q).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.usernames[0].username, "c");

        let bad = UsernameQuery {
            limit: 500,
            ..Default::default()
        };
        assert!(store.usernames(&bad).await.is_err());
    }
}
