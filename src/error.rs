//! Operation failure taxonomy.
//!
//! Every error is fatal to the operation that raised it and to nothing else:
//! the ledger rolls the operation back and the next one starts from a clean
//! state. `kind()` buckets the concrete variants into the five classes the
//! caller cares about.

use crate::types::{AccountId, AssetId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Issuer mismatch, wrong asset kind, insufficient balance, size limits.
    Precondition,
    /// Supply overflow, negative balance, backing cycle, symbol collision.
    Invariant,
    /// Right operation, wrong moment: settlement active, no call orders, ...
    State,
    /// A 128-bit intermediate exceeded the share-supply cap.
    Overflow,
    /// Force settle with neither a feed nor an active settlement.
    InsufficientFeeds,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("account {0:?} has insufficient balance")]
    InsufficientBalance(AccountId),

    #[error("operation issuer does not own the asset")]
    IssuerMismatch,

    #[error("required permission is not held: {0}")]
    MissingPermission(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("asset {0:?} is not market-issued")]
    NotMarketIssued(AssetId),

    #[error("asset {0:?} is market-issued")]
    MarketIssued(AssetId),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("128-bit intermediate overflow in {0}")]
    Overflow(&'static str),

    #[error("insufficient feeds: {0}")]
    InsufficientFeeds(&'static str),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InsufficientBalance(_)
            | LedgerError::IssuerMismatch
            | LedgerError::MissingPermission(_)
            | LedgerError::NotFound(_)
            | LedgerError::NotMarketIssued(_)
            | LedgerError::MarketIssued(_)
            | LedgerError::Precondition(_) => ErrorKind::Precondition,
            LedgerError::Invariant(_) => ErrorKind::Invariant,
            LedgerError::State(_) => ErrorKind::State,
            LedgerError::Overflow(_) => ErrorKind::Overflow,
            LedgerError::InsufficientFeeds(_) => ErrorKind::InsufficientFeeds,
        }
    }

    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        LedgerError::Precondition(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        LedgerError::State(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        LedgerError::Invariant(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_classified() {
        assert_eq!(LedgerError::IssuerMismatch.kind(), ErrorKind::Precondition);
        assert_eq!(LedgerError::invariant("x").kind(), ErrorKind::Invariant);
        assert_eq!(LedgerError::state("x").kind(), ErrorKind::State);
        assert_eq!(LedgerError::Overflow("x").kind(), ErrorKind::Overflow);
        assert_eq!(
            LedgerError::InsufficientFeeds("x").kind(),
            ErrorKind::InsufficientFeeds
        );
    }

    #[test]
    fn errors_render() {
        let e = LedgerError::InsufficientBalance(AccountId(7));
        assert!(e.to_string().contains("insufficient balance"));
    }
}
