use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Reservation window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Waiting,
    Approved,
    Rejected,
    /// Reserved for owner/booker cancellation; nothing produces it yet.
    Canceled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Waiting => "WAITING",
            ReservationStatus::Approved => "APPROVED",
            ReservationStatus::Rejected => "REJECTED",
            ReservationStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub item_id: Ulid,
    pub booker_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
}

/// Collaborator view of a listed item: just what booking decisions need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub available: bool,
}

/// All reservations of one item, sorted by `span.start`.
///
/// The ledger is the unit of locking: anything that must observe a
/// consistent set of an item's reservations holds its lock.
#[derive(Debug, Clone)]
pub struct ItemLedger {
    pub item_id: Ulid,
    pub owner_id: Ulid,
    pub reservations: Vec<Reservation>,
}

impl ItemLedger {
    pub fn new(item_id: Ulid, owner_id: Ulid) -> Self {
        Self {
            item_id,
            owner_id,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping sort order. Equal starts keep insertion order.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations whose start is at or before `t`.
    pub fn starting_until(&self, t: Ms) -> &[Reservation] {
        let right = self.reservations.partition_point(|r| r.span.start <= t);
        &self.reservations[..right]
    }
}

/// Temporal/status segment selected by a list query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    All,
    Past,
    Future,
    Current,
    Waiting,
    Rejected,
}

impl StateFilter {
    pub fn matches(&self, r: &Reservation, now: Ms) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Past => r.span.start < now && r.status == ReservationStatus::Approved,
            StateFilter::Future => r.span.start > now,
            StateFilter::Current => r.span.start < now && r.span.end > now,
            StateFilter::Waiting => r.status == ReservationStatus::Waiting,
            StateFilter::Rejected => r.status == ReservationStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl FromStr for StateFilter {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" => Ok(StateFilter::All),
            "PAST" => Ok(StateFilter::Past),
            "FUTURE" => Ok(StateFilter::Future),
            "CURRENT" => Ok(StateFilter::Current),
            "WAITING" => Ok(StateFilter::Waiting),
            "REJECTED" => Ok(StateFilter::Rejected),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// Validated pagination parameters.
///
/// `from` selects the page `from / size`, not a row offset: `from = 5, size = 10`
/// returns the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub from: i64,
    pub size: i64,
}

impl PageRequest {
    /// `None` when `from < 0` or `size < 1`.
    pub fn new(from: i64, size: i64) -> Option<Self> {
        if from < 0 || size < 1 {
            return None;
        }
        Some(Self { from, size })
    }

    pub fn page_index(&self) -> i64 {
        self.from / self.size
    }

    /// Rows to skip before the page starts.
    pub fn skip(&self) -> usize {
        usize::try_from(self.page_index().saturating_mul(self.size)).unwrap_or(usize::MAX)
    }

    pub fn take(&self) -> usize {
        usize::try_from(self.size).unwrap_or(usize::MAX)
    }
}

/// Which side of a reservation the caller is listing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Booker,
    Owner,
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PartyRegistered {
        id: Ulid,
    },
    ItemListed {
        id: Ulid,
        owner_id: Ulid,
        available: bool,
    },
    ReservationCreated {
        id: Ulid,
        item_id: Ulid,
        owner_id: Ulid,
        booker_id: Ulid,
        span: Span,
        status: ReservationStatus,
    },
    ReservationStatusChanged {
        id: Ulid,
        item_id: Ulid,
        status: ReservationStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

/// `(reservation_id, booker_id)` pair shown next to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRef {
    pub id: Ulid,
    pub booker_id: Ulid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvailabilitySummary {
    pub last: Option<BookingRef>,
    pub next: Option<BookingRef>,
}
