use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Turn a requested window into a `Span`, or say why it cannot be booked.
/// Both ends are required, `start < end`, and `start` may not lie before `now`.
pub fn validate_window(start: Option<Ms>, end: Option<Ms>, now: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    let (Some(start), Some(end)) = (start, end) else {
        return Err(EngineError::Validation("start and end are required"));
    };
    if start >= end {
        return Err(EngineError::Validation("start must be before end"));
    }
    if start < now {
        return Err(EngineError::Validation("start is in the past"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(Span::new(start, end))
}

/// Count approved reservations in the ledger whose start or end falls inside
/// `[span.start, span.end]` (both bounds inclusive).
///
/// An approved reservation that starts before and ends after `span` is not
/// counted. Callers rely on this exact predicate, so the gap stays.
pub fn count_approved_overlaps(ledger: &ItemLedger, span: &Span) -> usize {
    // Anything starting after span.end can only match through its end, which
    // is later still.
    ledger
        .starting_until(span.end)
        .iter()
        .filter(|r| r.status == ReservationStatus::Approved)
        .filter(|r| {
            let start_inside = span.start <= r.span.start && r.span.start <= span.end;
            let end_inside = span.start <= r.span.end && r.span.end <= span.end;
            start_inside || end_inside
        })
        .count()
}

pub fn check_no_conflict(ledger: &ItemLedger, span: &Span) -> Result<(), EngineError> {
    if count_approved_overlaps(ledger, span) > 0 {
        return Err(EngineError::Validation("item is already booked for this window"));
    }
    Ok(())
}

/// Approved reservations sharing at least one instant with `span`, treating
/// both as half-open. Unlike [`count_approved_overlaps`] this also sees an
/// approved window that contains `span` or sits inside it.
pub fn count_approved_intersections(ledger: &ItemLedger, span: &Span) -> usize {
    ledger
        .starting_until(span.end)
        .iter()
        .filter(|r| r.status == ReservationStatus::Approved)
        .filter(|r| r.span.start < span.end && span.start < r.span.end)
        .count()
}

/// Guard for approval: at most one approved reservation may cover any instant.
pub fn check_approvable(ledger: &ItemLedger, span: &Span) -> Result<(), EngineError> {
    if count_approved_intersections(ledger, span) > 0 || count_approved_overlaps(ledger, span) > 0 {
        return Err(EngineError::Validation("item is already booked for this window"));
    }
    Ok(())
}
