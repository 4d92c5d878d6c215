//! Block sequencing: flattens a page's vote staples into chronological order.

use crate::types::{Block, LedgerHistory};

/// Flatten every `history[*].voteStaple.blocks[*]` into one sequence, sorted
/// ascending by block timestamp. The sort is stable, so blocks with equal
/// timestamps keep their encounter order.
pub fn sequence_blocks(history: LedgerHistory) -> Vec<Block> {
    let mut blocks: Vec<Block> = history
        .history
        .into_iter()
        .flat_map(|entry| entry.vote_staple.blocks)
        .collect();
    blocks.sort_by_key(|b| b.date);
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistoryEntry, VoteStaple};
    use chrono::DateTime;

    fn block(hash: &str, secs: i64) -> Block {
        Block {
            hash: hash.into(),
            account: "a".into(),
            signer: "s".into(),
            date: DateTime::from_timestamp(secs, 0).unwrap(),
            operations: vec![],
        }
    }

    fn staple(blocks: Vec<Block>) -> HistoryEntry {
        HistoryEntry {
            vote_staple: VoteStaple { blocks },
        }
    }

    fn hashes(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|b| b.hash.as_str()).collect()
    }

    #[test]
    fn nested_groups_sorted_by_time() {
        let history = LedgerHistory {
            history: vec![
                staple(vec![block("t3", 30)]),
                staple(vec![block("t1", 10), block("t2", 20)]),
            ],
        };
        assert_eq!(hashes(&sequence_blocks(history)), ["t1", "t2", "t3"]);
    }

    #[test]
    fn ties_keep_encounter_order() {
        let history = LedgerHistory {
            history: vec![
                staple(vec![block("b", 10), block("late", 20)]),
                staple(vec![block("c", 10)]),
                staple(vec![block("a", 5)]),
            ],
        };
        assert_eq!(hashes(&sequence_blocks(history)), ["a", "b", "c", "late"]);
    }

    #[test]
    fn empty_history() {
        assert!(sequence_blocks(LedgerHistory::default()).is_empty());
    }
}
