//! Purchase lifecycle state machine
//!
//! ```text
//! Funded ──► Completed   (terminal, confirmed receipt)
//!   │
//!   └─────► Disputed ──► Resolved   (terminal, dispute outcome)
//! ```
//!
//! Transitions are guarded by explicit source-state preconditions; an
//! event arriving for a purchase not in the required source state is
//! skipped by the dispatcher, never treated as fatal.

use serde::{Deserialize, Serialize};

/// Purchase (escrow) state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PurchaseStatus {
    /// Initial state, entered on creation
    Funded = 1,
    /// Terminal: receipt confirmed, funds released
    Completed = 2,
    /// A dispute is open against the escrow
    Disputed = 3,
    /// Terminal: dispute resolved
    Resolved = 4,
}

impl PurchaseStatus {
    /// Whether `self -> to` is a legal transition
    pub fn can_transition(self, to: PurchaseStatus) -> bool {
        matches!(
            (self, to),
            (PurchaseStatus::Funded, PurchaseStatus::Completed)
                | (PurchaseStatus::Funded, PurchaseStatus::Disputed)
                | (PurchaseStatus::Disputed, PurchaseStatus::Resolved)
        )
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseStatus::Completed | PurchaseStatus::Resolved)
    }

    /// Stable tag byte for the purchase-by-status index
    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(PurchaseStatus::Funded.can_transition(PurchaseStatus::Completed));
        assert!(PurchaseStatus::Funded.can_transition(PurchaseStatus::Disputed));
        assert!(PurchaseStatus::Disputed.can_transition(PurchaseStatus::Resolved));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!PurchaseStatus::Funded.can_transition(PurchaseStatus::Resolved));
        assert!(!PurchaseStatus::Disputed.can_transition(PurchaseStatus::Completed));
        assert!(!PurchaseStatus::Completed.can_transition(PurchaseStatus::Disputed));
        assert!(!PurchaseStatus::Resolved.can_transition(PurchaseStatus::Funded));
        assert!(!PurchaseStatus::Funded.can_transition(PurchaseStatus::Funded));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PurchaseStatus::Funded.is_terminal());
        assert!(!PurchaseStatus::Disputed.is_terminal());
        assert!(PurchaseStatus::Completed.is_terminal());
        assert!(PurchaseStatus::Resolved.is_terminal());
    }
}
