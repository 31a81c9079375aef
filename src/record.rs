use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Mutex;

/// Text written into a record once its identity has gone quiet for longer than
/// the inactivity timeout.
pub const INACTIVE_SENTINEL: &str = "Inactive";

/// Custom epoch for record ids: 2024-01-01 00:00:00 UTC, in milliseconds.
const EPOCH_MS: i64 = 1_704_067_200_000;

const NODE_BITS: u32 = 12;
const SEQUENCE_BITS: u32 = 10;

/// Largest node tag that fits into a [`RecordId`].
pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Identifier of a [`StatusRecord`].
///
/// Ids are snowflake-shaped: `| 42 bits: ms since epoch | 12 bits: node | 10 bits: sequence |`.
/// The node tag keeps ids minted on different nodes apart, so a record can be
/// replicated by id without colliding with a record created elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Node tag of the node that minted this id.
    pub fn node(&self) -> u16 {
        ((self.0 >> SEQUENCE_BITS) & MAX_NODE_ID as u64) as u16
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single status entry on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: RecordId,
    pub identity: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusRecord {
    pub fn new(id: RecordId, identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            identity: identity.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Key used for case-insensitive identity comparisons.
    pub fn identity_key(&self) -> String {
        identity_key(&self.identity)
    }

    pub fn is_inactive(&self) -> bool {
        self.text == INACTIVE_SENTINEL
    }
}

/// Normalise an identity so that `Alice` and `alice` compare equal.
pub fn identity_key(identity: &str) -> String {
    identity.to_lowercase()
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

/// Mints strictly increasing [`RecordId`]s for a single node.
#[derive(Debug)]
pub struct IdGenerator {
    node: u64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    /// Node tags wider than 12 bits are masked; [`crate::NodeConfig`] rejects them
    /// before they get here.
    pub fn new(node: u16) -> Self {
        Self {
            node: (node & MAX_NODE_ID) as u64,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    pub fn next_id(&self) -> RecordId {
        let now = (Utc::now().timestamp_millis() - EPOCH_MS).max(0) as u64;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now > state.last_timestamp {
            state.last_timestamp = now;
            state.sequence = 0;
        } else {
            // Same millisecond or a clock step backwards: stay on the last
            // timestamp, borrowing the next millisecond when the sequence runs out.
            state.sequence += 1;
            if state.sequence > SEQUENCE_MASK {
                state.last_timestamp += 1;
                state.sequence = 0;
            }
        }

        RecordId(
            (state.last_timestamp << (NODE_BITS + SEQUENCE_BITS))
                | (self.node << SEQUENCE_BITS)
                | state.sequence,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_increase_and_carry_node_tag() {
        let generator = IdGenerator::new(7);
        let mut last = RecordId(0);
        for _ in 0..5000 {
            let id = generator.next_id();
            assert!(id > last, "{id} is not greater than {last}");
            assert_eq!(id.node(), 7);
            last = id;
        }
    }

    #[test]
    fn nodes_never_mint_the_same_id() {
        let one = IdGenerator::new(1);
        let two = IdGenerator::new(2);
        let mut seen = HashSet::new();
        for _ in 0..2000 {
            assert!(seen.insert(one.next_id()));
            assert!(seen.insert(two.next_id()));
        }
    }

    #[test]
    fn identity_comparison_ignores_case() {
        let record = StatusRecord::new(RecordId(1), "Alice", "Busy");
        assert_eq!(record.identity_key(), identity_key("aLiCe"));
        assert!(!record.is_inactive());
    }
}
