use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted input; `None` when `start >= end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    /// Saturates at `Ms::MAX` for spans too wide to measure.
    pub fn duration_ms(&self) -> Ms {
        self.end.checked_sub(self.start).unwrap_or(Ms::MAX)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// The only legal moves are `Active → Cancelled` and `Active → Completed`.
    pub fn transition(self, to: ReservationStatus) -> Result<ReservationStatus, InvalidTransition> {
        match (self, to) {
            (ReservationStatus::Active, ReservationStatus::Cancelled)
            | (ReservationStatus::Active, ReservationStatus::Completed) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Active)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal status transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// A room reservation. Never deleted; cancellation only flips `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub purpose: Option<String>,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Status as seen at `now`: an active reservation whose end has passed
    /// reads as `Completed` even before the sweeper persists it.
    pub fn effective_status(&self, now: Ms) -> ReservationStatus {
        match self.status {
            ReservationStatus::Active if self.span.end <= now => ReservationStatus::Completed,
            other => other,
        }
    }

    /// Copy with the lazily derived status applied.
    pub fn as_of(&self, now: Ms) -> Reservation {
        let mut r = self.clone();
        r.status = self.effective_status(now);
        r
    }
}

/// One claimed span inside a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub id: Ulid,
    pub span: Span,
}

/// Active claims for one key (a room or a user), sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub slots: Vec<Slot>,
}

impl Ledger {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    /// Remove slot by reservation id.
    pub fn remove_slot(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    /// Return only slots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// WAL record. Replaying these in order rebuilds the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// A reservation entered the store. Compaction re-emits every record
    /// through this variant with its current status.
    ReservationCreated { reservation: Reservation },
    ReservationCancelled { id: Ulid },
    ReservationCompleted { id: Ulid },
}

impl Event {
    pub fn reservation_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } => reservation.id,
            Event::ReservationCancelled { id } | Event::ReservationCompleted { id } => *id,
        }
    }
}

// ── Directory types ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub active: bool,
}
