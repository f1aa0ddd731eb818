//! # Concurrency Verdicts
//!
//! The pure half of concurrency control. Storage-aware policies in
//! `concord-sync` gather the inputs and call into these.
//!
//! ## Optimistic Check
//! ```text
//! client declared │ server current │ verdict
//! ────────────────┼────────────────┼─────────
//!       100       │      150       │ Stale   (someone wrote after the client read)
//!       150       │      150       │ Allow
//!       180       │      150       │ Allow
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{ConflictType, LockRecord, Millis};

/// Whether an operation may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    /// The client's version is older than the server's.
    Stale,
    /// Another live token holds the lock.
    Locked,
}

impl Verdict {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Maps a rejection to the conflict it raises.
    pub fn conflict_type(&self) -> Option<ConflictType> {
        match self {
            Verdict::Allow => None,
            Verdict::Stale => Some(ConflictType::Update),
            Verdict::Locked => Some(ConflictType::Lock),
        }
    }
}

/// Compares the version a client last observed with the server's.
///
/// A write is stale only when the server is strictly newer; it is never
/// silently applied over a newer server state.
#[inline]
pub fn check_version(client_last_modified: Millis, server_last_modified: Millis) -> Verdict {
    if server_last_modified > client_last_modified {
        Verdict::Stale
    } else {
        Verdict::Allow
    }
}

/// Checks an optional lock against a requester's token.
pub fn check_lock(lock: Option<&LockRecord>, requester: Option<&str>, now: Millis) -> Verdict {
    match lock {
        Some(lock) if lock.blocks(requester, now) => Verdict::Locked,
        _ => Verdict::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommonDataId, LockStatus};

    #[test]
    fn test_stale_write_is_rejected() {
        assert_eq!(check_version(100, 150), Verdict::Stale);
        assert_eq!(check_version(150, 150), Verdict::Allow);
        assert_eq!(check_version(180, 150), Verdict::Allow);
    }

    #[test]
    fn test_check_lock() {
        let lock = LockRecord {
            id: CommonDataId::new("schedule", "S1"),
            token: "mine".into(),
            limit_of_time: 2_000,
            status: LockStatus::Locked,
        };

        assert_eq!(check_lock(None, None, 0), Verdict::Allow);
        assert_eq!(check_lock(Some(&lock), Some("mine"), 1_000), Verdict::Allow);
        assert_eq!(check_lock(Some(&lock), Some("theirs"), 1_000), Verdict::Locked);
        assert_eq!(check_lock(Some(&lock), Some("theirs"), 2_500), Verdict::Allow);
    }

    #[test]
    fn test_verdict_conflict_type() {
        assert_eq!(Verdict::Allow.conflict_type(), None);
        assert_eq!(Verdict::Stale.conflict_type(), Some(ConflictType::Update));
        assert_eq!(Verdict::Locked.conflict_type(), Some(ConflictType::Lock));
    }
}
