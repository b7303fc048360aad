use ulid::Ulid;

use crate::model::*;

// ── Per-item booking summary ──────────────────────────────────────

/// Most recent reservation starting before `now` and nearest one starting
/// after it. Status is not considered: a waiting or rejected request counts
/// the same as an approved one.
///
/// A reservation starting exactly at `now` is neither last nor next.
pub fn summarize(ledger: &ItemLedger, now: Ms) -> AvailabilitySummary {
    let rows = &ledger.reservations;
    let before = rows.partition_point(|r| r.span.start < now);
    let until = rows.partition_point(|r| r.span.start <= now);

    let last = before
        .checked_sub(1)
        .and_then(|i| rows.get(i))
        .map(booking_ref);
    let next = rows.get(until).map(booking_ref);

    AvailabilitySummary { last, next }
}

/// Whether `booker_id` has an approved reservation on this item that ended
/// before `now`.
pub fn has_completed(ledger: &ItemLedger, booker_id: &Ulid, now: Ms) -> bool {
    ledger.starting_until(now).iter().any(|r| {
        r.booker_id == *booker_id && r.status == ReservationStatus::Approved && r.span.end < now
    })
}

fn booking_ref(r: &Reservation) -> BookingRef {
    BookingRef {
        id: r.id,
        booker_id: r.booker_id,
    }
}
