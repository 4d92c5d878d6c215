//! Instruction classifier: maps ledger operations to name-protocol instructions.
//!
//! Rules are evaluated per operation, first match wins:
//!
//! 1. **Inscribe**: a set-info operation named after the protocol token whose
//!    lower-cased description is a valid username, where the *previous
//!    processed block* created the current block's account as an identifier.
//! 2. **SetPrimary / SetCid**: a send to the burn address with a free-form
//!    payload matching `set_primary_name <address>` or
//!    `set_cid <address> <cid>`. A burn send with any other payload is inert.
//! 3. **Transfer**: a send of exactly one unit of a token.
//!
//! Everything else is inert. Classification never fails.

use regex::Regex;

use crate::error::IndexerError;
use crate::indexer::IndexerConfig;
use crate::types::{parse_hex_u128, Block, Operation};

/// A protocol-level instruction extracted from one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Register `username` for the block's account, owned by the signer.
    Inscribe { username: String },
    /// Make the record at `address` the block account's primary name.
    SetPrimary { address: String },
    /// Attach a content identifier to the record at `address`.
    SetCid { address: String, cid: String },
    /// Hand the record at `token` over to `to`.
    Transfer { token: String, to: String },
}

impl Instruction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inscribe { .. } => "inscribe",
            Self::SetPrimary { .. } => "set_primary",
            Self::SetCid { .. } => "set_cid",
            Self::Transfer { .. } => "transfer",
        }
    }
}

/// Operations of the immediately preceding processed block.
///
/// Only the identifiers it created matter for classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookback {
    created_identifiers: Vec<String>,
}

impl Lookback {
    /// Context before any block was processed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context produced by processing `block`, for the block after it.
    pub fn from_block(block: &Block) -> Self {
        let created_identifiers = block
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::CreateIdentifier { identifier } => Some(identifier.clone()),
                _ => None,
            })
            .collect();
        Self { created_identifiers }
    }

    pub fn created(&self, identifier: &str) -> bool {
        self.created_identifiers.iter().any(|id| id == identifier)
    }
}

/// Protocol constants compiled from [`IndexerConfig`].
#[derive(Debug, Clone)]
pub struct ProtocolRules {
    token_name: String,
    burn_address: String,
    username: Regex,
    set_primary: Regex,
    set_cid: Regex,
}

impl ProtocolRules {
    pub fn from_config(config: &IndexerConfig) -> Result<Self, IndexerError> {
        let compile = |field: &str, pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| IndexerError::Config(format!("{field}: {e}")))
        };
        let set_primary = compile("set_primary_pattern", &config.set_primary_pattern)?;
        let set_cid = compile("set_cid_pattern", &config.set_cid_pattern)?;
        if set_primary.captures_len() < 2 {
            return Err(IndexerError::Config(
                "set_primary_pattern needs one capture group".into(),
            ));
        }
        if set_cid.captures_len() < 3 {
            return Err(IndexerError::Config(
                "set_cid_pattern needs two capture groups".into(),
            ));
        }
        Ok(Self {
            token_name: config.token_name.clone(),
            burn_address: config.burn_address.clone(),
            username: compile("username_pattern", &config.username_pattern)?,
            set_primary,
            set_cid,
        })
    }
}

/// Pure decision procedure from operation (+ context) to instruction.
#[derive(Debug, Clone)]
pub struct InstructionClassifier {
    rules: ProtocolRules,
}

impl InstructionClassifier {
    pub fn new(rules: ProtocolRules) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &IndexerConfig) -> Result<Self, IndexerError> {
        ProtocolRules::from_config(config).map(Self::new)
    }

    /// Classify one operation of `block`. `None` means inert.
    pub fn classify(
        &self,
        op: &Operation,
        block: &Block,
        lookback: &Lookback,
    ) -> Option<Instruction> {
        match op {
            Operation::SetInfo { name, description } => {
                self.inscribe(name, description, block, lookback)
            }
            Operation::Send {
                to,
                amount,
                token,
                extra,
            } => {
                if *to == self.rules.burn_address {
                    if let Some(payload) = extra.as_deref().filter(|p| !p.is_empty()) {
                        return self.burn_payload(payload);
                    }
                }
                is_single_unit(amount).then(|| Instruction::Transfer {
                    token: token.clone(),
                    to: to.clone(),
                })
            }
            Operation::CreateIdentifier { .. } | Operation::Other { .. } => None,
        }
    }

    /// Classify every operation of `block` in order, dropping inert ones.
    pub fn classify_block(&self, block: &Block, lookback: &Lookback) -> Vec<Instruction> {
        block
            .operations
            .iter()
            .filter_map(|op| self.classify(op, block, lookback))
            .collect()
    }

    fn inscribe(
        &self,
        name: &str,
        description: &str,
        block: &Block,
        lookback: &Lookback,
    ) -> Option<Instruction> {
        if name != self.rules.token_name {
            return None;
        }
        let username = description.to_lowercase();
        if !self.rules.username.is_match(&username) || !lookback.created(&block.account) {
            return None;
        }
        Some(Instruction::Inscribe { username })
    }

    fn burn_payload(&self, payload: &str) -> Option<Instruction> {
        if let Some(caps) = self.rules.set_primary.captures(payload) {
            return Some(Instruction::SetPrimary {
                address: caps.get(1)?.as_str().to_string(),
            });
        }
        let caps = self.rules.set_cid.captures(payload)?;
        Some(Instruction::SetCid {
            address: caps.get(1)?.as_str().to_string(),
            cid: caps.get(2)?.as_str().to_string(),
        })
    }
}

fn is_single_unit(amount: &str) -> bool {
    parse_hex_u128(amount) == Some(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::DEFAULT_BURN_ADDRESS;
    use chrono::DateTime;

    const TOKEN: &str = "keeta_token1";

    fn classifier() -> InstructionClassifier {
        InstructionClassifier::from_config(&IndexerConfig::default()).unwrap()
    }

    fn block(account: &str, operations: Vec<Operation>) -> Block {
        Block {
            hash: "H".into(),
            account: account.into(),
            signer: "keeta_owner1".into(),
            date: DateTime::from_timestamp(1_000, 0).unwrap(),
            operations,
        }
    }

    fn set_info(name: &str, description: &str) -> Operation {
        Operation::SetInfo {
            name: name.into(),
            description: description.into(),
        }
    }

    fn send(to: &str, amount: &str, token: &str, extra: Option<&str>) -> Operation {
        Operation::Send {
            to: to.into(),
            amount: amount.into(),
            token: token.into(),
            extra: extra.map(Into::into),
        }
    }

    fn created(identifier: &str) -> Lookback {
        Lookback::from_block(&block(
            "keeta_owner1",
            vec![Operation::CreateIdentifier {
                identifier: identifier.into(),
            }],
        ))
    }

    #[test]
    fn inscribe_requires_previous_block_creation() {
        let c = classifier();
        let op = set_info("KNS", "Alice");
        let b = block(TOKEN, vec![op.clone()]);

        assert_eq!(
            c.classify(&op, &b, &created(TOKEN)),
            Some(Instruction::Inscribe {
                username: "alice".into()
            })
        );
        assert_eq!(c.classify(&op, &b, &Lookback::empty()), None);
        assert_eq!(c.classify(&op, &b, &created("keeta_other")), None);
    }

    #[test]
    fn inscribe_in_same_block_as_creation_is_inert() {
        let c = classifier();
        let b = block(
            TOKEN,
            vec![
                Operation::CreateIdentifier {
                    identifier: TOKEN.into(),
                },
                set_info("KNS", "alice"),
            ],
        );
        assert!(c.classify_block(&b, &Lookback::empty()).is_empty());
    }

    #[test]
    fn inscribe_rejects_bad_names() {
        let c = classifier();
        let ctx = created(TOKEN);
        let too_long = "a".repeat(33);
        for (name, desc) in [
            ("OTHER", "alice"),
            ("KNS", ""),
            ("KNS", "has space"),
            ("KNS", "dash-name"),
            ("KNS", too_long.as_str()),
        ] {
            let op = set_info(name, desc);
            assert_eq!(c.classify(&op, &block(TOKEN, vec![]), &ctx), None, "{name}/{desc}");
        }
        let op = set_info("KNS", &"a".repeat(32));
        assert!(c.classify(&op, &block(TOKEN, vec![]), &ctx).is_some());
    }

    #[test]
    fn burn_payload_grammars() {
        let c = classifier();
        let b = block("keeta_owner1", vec![]);
        let ctx = Lookback::empty();

        let primary = send(DEFAULT_BURN_ADDRESS, "0x1", "keeta_base", Some("set_primary_name keeta_abc"));
        assert_eq!(
            c.classify(&primary, &b, &ctx),
            Some(Instruction::SetPrimary {
                address: "keeta_abc".into()
            })
        );

        let cid = send(DEFAULT_BURN_ADDRESS, "0x1", "keeta_base", Some("set_cid keeta_abc Qmxyz"));
        assert_eq!(
            c.classify(&cid, &b, &ctx),
            Some(Instruction::SetCid {
                address: "keeta_abc".into(),
                cid: "Qmxyz".into()
            })
        );

        let junk = send(DEFAULT_BURN_ADDRESS, "0x1", "keeta_base", Some("hello"));
        assert_eq!(c.classify(&junk, &b, &ctx), None);

        let not_keeta = send(DEFAULT_BURN_ADDRESS, "0x5", "keeta_base", Some("set_cid abc Qm"));
        assert_eq!(c.classify(&not_keeta, &b, &ctx), None);
    }

    #[test]
    fn burn_send_without_payload_falls_through_to_transfer_rule() {
        let c = classifier();
        let b = block("keeta_owner1", vec![]);
        let ctx = Lookback::empty();

        let plain = send(DEFAULT_BURN_ADDRESS, "0x2", "keeta_base", None);
        assert_eq!(c.classify(&plain, &b, &ctx), None);

        let empty = send(DEFAULT_BURN_ADDRESS, "0x1", TOKEN, Some(""));
        assert_eq!(
            c.classify(&empty, &b, &ctx),
            Some(Instruction::Transfer {
                token: TOKEN.into(),
                to: DEFAULT_BURN_ADDRESS.into()
            })
        );
    }

    #[test]
    fn transfer_requires_exactly_one_unit() {
        let c = classifier();
        let b = block("keeta_owner1", vec![]);
        let ctx = Lookback::empty();

        let one = send("keeta_owner2", "0x1", TOKEN, None);
        assert_eq!(
            c.classify(&one, &b, &ctx),
            Some(Instruction::Transfer {
                token: TOKEN.into(),
                to: "keeta_owner2".into()
            })
        );
        assert_eq!(c.classify(&send("keeta_owner2", "0x2", TOKEN, None), &b, &ctx), None);
        assert_eq!(c.classify(&send("keeta_owner2", "0x0", TOKEN, None), &b, &ctx), None);
        assert_eq!(c.classify(&send("keeta_owner2", "bogus", TOKEN, None), &b, &ctx), None);
    }

    #[test]
    fn other_operations_are_inert() {
        let c = classifier();
        let b = block("keeta_owner1", vec![]);
        assert_eq!(c.classify(&Operation::Other { code: 9 }, &b, &created(TOKEN)), None);
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let cfg = IndexerConfig {
            username_pattern: "([".into(),
            ..Default::default()
        };
        assert!(matches!(
            InstructionClassifier::from_config(&cfg),
            Err(IndexerError::Config(_))
        ));

        let cfg = IndexerConfig {
            set_cid_pattern: r"^set_cid (\w+)$".into(),
            ..Default::default()
        };
        assert!(InstructionClassifier::from_config(&cfg).is_err());
    }
}
