use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::PricePeriod;
use crate::engine::PriceTable;
use crate::schedule::ScheduleConfig;

/// Unix milliseconds (UTC). Dates and times of day only exist relative to a
/// court's time zone; see [`ScheduleConfig::timezone`].
pub type Ms = i64;

pub const MS_PER_MINUTE: Ms = 60_000;
pub const MS_PER_HOUR: Ms = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: Ms = 24 * MS_PER_HOUR;

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

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Adjacent spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Slot provisionally held while payment is in flight.
    Pending,
    Confirmed,
    Cancelled,
    /// The match was played.
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            "completed" => Ok(ReservationStatus::Completed),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// What occupies (or once occupied) a stretch of a court's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Reservation {
        player_id: String,
        status: ReservationStatus,
        price: Decimal,
        /// Payment deadline of a pending reservation.
        expires_at: Option<Ms>,
    },
    /// Club-initiated hold. Occupies like a confirmed reservation with no player.
    Block { reason: Option<String> },
}

/// A single ledger entry on a court.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Ulid,
    pub span: Span,
    pub kind: EntryKind,
}

impl Entry {
    /// Whether this entry claims its span at instant `now`. A pending
    /// reservation stops claiming once its payment deadline has passed, even
    /// before the reaper cancels it.
    pub fn is_active(&self, now: Ms) -> bool {
        match &self.kind {
            EntryKind::Block { .. } => true,
            EntryKind::Reservation { status, expires_at, .. } => match status {
                ReservationStatus::Confirmed => true,
                ReservationStatus::Pending => expires_at.is_none_or(|deadline| deadline > now),
                ReservationStatus::Cancelled | ReservationStatus::Completed => false,
            },
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, EntryKind::Block { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CourtState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Price of one hour of play before any time-of-day adjustment.
    pub hourly_rate: Decimal,
    /// A court taken out of service accepts no reservations and shows every
    /// slot as blocked until it is put back.
    pub available: bool,
    /// `None` means the court runs on [`ScheduleConfig::default`].
    pub schedule: Option<ScheduleConfig>,
    pub prices: PriceTable,
    /// Reservations (all statuses) and blocks, sorted by `span.start`.
    pub entries: Vec<Entry>,
}

impl CourtState {
    pub fn new(id: Ulid, name: Option<String>, hourly_rate: Decimal) -> Self {
        Self {
            id,
            name,
            hourly_rate,
            available: true,
            schedule: None,
            prices: PriceTable::default(),
            entries: Vec::new(),
        }
    }

    /// The config that governs this court right now. Falling back to the
    /// system default is explicit here rather than scattered null checks.
    pub fn effective_schedule(&self) -> ScheduleConfig {
        self.schedule.clone().unwrap_or_default()
    }

    /// Insert entry maintaining sort order by span.start.
    pub fn insert_entry(&mut self, entry: Entry) {
        let pos = self
            .entries
            .partition_point(|e| e.span.start <= entry.span.start);
        self.entries.insert(pos, entry);
    }

    pub fn entry(&self, id: Ulid) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: Ulid) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn remove_entry(&mut self, id: Ulid) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries whose span overlaps the query window, in start order.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Entry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }
}

// ── Slots ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    Available,
    Occupied,
    Pending,
    Blocked,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Available => "available",
            SlotState::Occupied => "occupied",
            SlotState::Pending => "pending",
            SlotState::Blocked => "blocked",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bookable interval as produced for one query. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub span: Span,
    pub base_price: Decimal,
    pub price: Decimal,
    pub state: SlotState,
}

// ── Journal events ───────────────────────────────────────────────

/// Flat event record. This is the journal format and the notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CourtRegistered {
        id: Ulid,
        name: Option<String>,
        hourly_rate: Decimal,
    },
    CourtAvailabilitySet {
        court_id: Ulid,
        available: bool,
    },
    /// `config: None` reverts the court to the default schedule.
    ScheduleSet {
        court_id: Ulid,
        config: Option<ScheduleConfig>,
    },
    PricePeriodAdded {
        court_id: Ulid,
        period: PricePeriod,
    },
    PricePeriodRemoved {
        court_id: Ulid,
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        court_id: Ulid,
        span: Span,
        player_id: String,
        price: Decimal,
        expires_at: Option<Ms>,
    },
    ReservationConfirmed {
        id: Ulid,
        court_id: Ulid,
    },
    ReservationCancelled {
        id: Ulid,
        court_id: Ulid,
    },
    ReservationCompleted {
        id: Ulid,
        court_id: Ulid,
    },
    BlockPlaced {
        id: Ulid,
        court_id: Ulid,
        span: Span,
        reason: Option<String>,
    },
    BlockReleased {
        id: Ulid,
        court_id: Ulid,
    },
}

impl Event {
    pub fn court_id(&self) -> Ulid {
        match self {
            Event::CourtRegistered { id, .. } => *id,
            Event::CourtAvailabilitySet { court_id, .. }
            | Event::ScheduleSet { court_id, .. }
            | Event::PricePeriodAdded { court_id, .. }
            | Event::PricePeriodRemoved { court_id, .. }
            | Event::ReservationCreated { court_id, .. }
            | Event::ReservationConfirmed { court_id, .. }
            | Event::ReservationCancelled { court_id, .. }
            | Event::ReservationCompleted { court_id, .. }
            | Event::BlockPlaced { court_id, .. }
            | Event::BlockReleased { court_id, .. } => *court_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourtInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub hourly_rate: Decimal,
    pub available: bool,
    pub configured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub court_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub player_id: String,
    pub price: Decimal,
    pub expires_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: Ulid,
    pub court_id: Ulid,
    pub span: Span,
    pub reason: Option<String>,
}

impl CourtState {
    pub fn reservation(&self, entry: &Entry) -> Option<Reservation> {
        match &entry.kind {
            EntryKind::Reservation {
                player_id,
                status,
                price,
                expires_at,
            } => Some(Reservation {
                id: entry.id,
                court_id: self.id,
                span: entry.span,
                status: *status,
                player_id: player_id.clone(),
                price: *price,
                expires_at: *expires_at,
            }),
            EntryKind::Block { .. } => None,
        }
    }

    pub fn block(&self, entry: &Entry) -> Option<Block> {
        match &entry.kind {
            EntryKind::Block { reason } => Some(Block {
                id: entry.id,
                court_id: self.id,
                span: entry.span,
                reason: reason.clone(),
            }),
            EntryKind::Reservation { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, end: Ms, status: ReservationStatus, expires_at: Option<Ms>) -> Entry {
        Entry {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind: EntryKind::Reservation {
                player_id: "p1".into(),
                status,
                price: Decimal::ZERO,
                expires_at,
            },
        }
    }

    #[test]
    fn span_half_open() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(!s.contains_instant(200));
    }

    #[test]
    fn adjacent_spans_do_not_overlap() {
        let a = Span::new(100, 200);
        assert!(a.overlaps(&Span::new(150, 250)));
        assert!(!a.overlaps(&Span::new(200, 300)));
        assert!(!Span::new(0, 100).overlaps(&a));
    }

    #[test]
    fn entries_stay_sorted() {
        let mut court = CourtState::new(Ulid::new(), None, Decimal::ONE_HUNDRED);
        court.insert_entry(reservation(300, 400, ReservationStatus::Confirmed, None));
        court.insert_entry(reservation(100, 200, ReservationStatus::Pending, None));
        court.insert_entry(reservation(200, 300, ReservationStatus::Cancelled, None));
        let starts: Vec<Ms> = court.entries.iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_excludes_adjacent_entries() {
        let mut court = CourtState::new(Ulid::new(), None, Decimal::ONE_HUNDRED);
        court.insert_entry(reservation(100, 200, ReservationStatus::Confirmed, None));
        court.insert_entry(reservation(450, 600, ReservationStatus::Confirmed, None));
        court.insert_entry(reservation(1000, 1100, ReservationStatus::Confirmed, None));

        let hits: Vec<_> = court.overlapping(&Span::new(200, 500)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn only_live_claims_are_active() {
        let now = 1_000;
        assert!(reservation(0, 10, ReservationStatus::Confirmed, None).is_active(now));
        assert!(reservation(0, 10, ReservationStatus::Pending, Some(now + 1)).is_active(now));
        assert!(!reservation(0, 10, ReservationStatus::Pending, Some(now)).is_active(now));
        assert!(!reservation(0, 10, ReservationStatus::Cancelled, None).is_active(now));
        assert!(!reservation(0, 10, ReservationStatus::Completed, None).is_active(now));
    }

    #[test]
    fn remove_entry_by_id() {
        let mut court = CourtState::new(Ulid::new(), None, Decimal::ONE_HUNDRED);
        let entry = reservation(100, 200, ReservationStatus::Confirmed, None);
        let id = entry.id;
        court.insert_entry(entry);
        assert!(court.remove_entry(Ulid::new()).is_none());
        assert!(court.remove_entry(id).is_some());
        assert!(court.entries.is_empty());
    }

    #[test]
    fn status_parses_wire_spelling() {
        assert_eq!("Confirmed".parse::<ReservationStatus>(), Ok(ReservationStatus::Confirmed));
        assert_eq!("canceled".parse::<ReservationStatus>(), Ok(ReservationStatus::Cancelled));
        assert!("paid".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationCreated {
            id: Ulid::new(),
            court_id: Ulid::new(),
            span: Span::new(1_000, 2_000),
            player_id: "player-7".into(),
            price: Decimal::new(115_000, 2),
            expires_at: Some(5_000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
