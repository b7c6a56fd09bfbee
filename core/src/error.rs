//! Dispatch-level error kinds.
//!
//! Per the error-handling design: protocol mismatches and fatal invariants
//! are logged and the offending event is dropped; they never propagate
//! across session boundaries or abort dispatch of other ctids.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("conntrack NEW for ctid {0} which is already present")]
    ConntrackAlreadyPresent(u32),
    #[error("conntrack UPDATE for unknown ctid {0}")]
    ConntrackUnknownOnUpdate(u32),
    #[error("conntrack DELETE for unknown ctid {0}")]
    ConntrackUnknownOnDelete(u32),
    #[error("conntrack NEW tuple mismatch for ctid {0}")]
    ConntrackTupleMismatch(u32),
    #[error("conntrack DELETE tuple mismatch for ctid {0}")]
    ConntrackDeleteTupleMismatch(u32),
    #[error("subscriber priority {0} exceeds the dispatch ceiling")]
    PriorityCeilingExceeded(u8),
}
