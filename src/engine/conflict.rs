use crate::limits::*;
use crate::model::*;

use super::{ConflictKind, StoreError};

pub(crate) fn validate_span(span: &Span) -> Result<(), StoreError> {
    if !span.is_well_formed() {
        return Err(StoreError::LimitExceeded("span start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(StoreError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(StoreError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_purpose(purpose: Option<&str>) -> Result<(), StoreError> {
    match purpose {
        Some(p) if p.len() > MAX_PURPOSE_LEN => Err(StoreError::LimitExceeded("purpose too long")),
        _ => Ok(()),
    }
}

/// Ledgers hold only active claims, so any overlap is a conflict.
pub(crate) fn check_no_conflict(ledger: &Ledger, span: &Span, kind: ConflictKind) -> Result<(), StoreError> {
    if let Some(slot) = ledger.overlapping(span).next() {
        return Err(StoreError::Conflict { kind, with: slot.id });
    }
    if ledger.slots.len() >= MAX_SLOTS_PER_LEDGER {
        return Err(StoreError::LimitExceeded("too many active reservations"));
    }
    Ok(())
}
