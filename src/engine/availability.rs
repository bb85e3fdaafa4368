use ulid::Ulid;

use crate::model::*;

// ── Slot state resolution ────────────────────────────────────────

/// Mark each candidate slot with its state. Output has the same length and
/// order as `candidates`.
///
/// Only reservations and blocks on the slot's own court count. Precedence is
/// Blocked > Occupied > Pending > Available. Cancelled and completed
/// reservations never occupy; filtering lapsed pending ones is the caller's
/// job, since that depends on the current time.
pub fn resolve(candidates: &[Slot], reservations: &[Reservation], blocks: &[Block]) -> Vec<Slot> {
    let mut out = Vec::with_capacity(candidates.len());
    let mut court = None;
    let mut claims = Claims::default();

    for slot in candidates {
        if court != Some(slot.court_id) {
            claims = Claims::for_court(slot.court_id, reservations, blocks);
            court = Some(slot.court_id);
        }
        out.push(Slot {
            state: claims.state_of(&slot.span),
            ..slot.clone()
        });
    }
    out
}

/// One court's claimed time, merged into disjoint sorted spans per state.
#[derive(Default)]
struct Claims {
    blocked: Vec<Span>,
    occupied: Vec<Span>,
    pending: Vec<Span>,
}

impl Claims {
    fn for_court(court_id: Ulid, reservations: &[Reservation], blocks: &[Block]) -> Self {
        let mut blocked: Vec<Span> = blocks
            .iter()
            .filter(|b| b.court_id == court_id)
            .map(|b| b.span)
            .collect();
        let mut occupied = Vec::new();
        let mut pending = Vec::new();
        for r in reservations.iter().filter(|r| r.court_id == court_id) {
            match r.status {
                ReservationStatus::Confirmed => occupied.push(r.span),
                ReservationStatus::Pending => pending.push(r.span),
                ReservationStatus::Cancelled | ReservationStatus::Completed => {}
            }
        }
        for spans in [&mut blocked, &mut occupied, &mut pending] {
            spans.sort_by_key(|s| s.start);
            *spans = merge_overlapping(spans);
        }
        Self {
            blocked,
            occupied,
            pending,
        }
    }

    fn state_of(&self, span: &Span) -> SlotState {
        if any_overlap(&self.blocked, span) {
            SlotState::Blocked
        } else if any_overlap(&self.occupied, span) {
            SlotState::Occupied
        } else if any_overlap(&self.pending, span) {
            SlotState::Pending
        } else {
            SlotState::Available
        }
    }
}

/// `disjoint` must be sorted and non-overlapping.
fn any_overlap(disjoint: &[Span], span: &Span) -> bool {
    let i = disjoint.partition_point(|s| s.end <= span.start);
    disjoint.get(i).is_some_and(|s| s.overlaps(span))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn slot(court_id: Ulid, start: Ms, end: Ms) -> Slot {
        Slot {
            court_id,
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
            span: Span::new(start, end),
            base_price: Decimal::ONE_HUNDRED,
            price: Decimal::ONE_HUNDRED,
            state: SlotState::Available,
        }
    }

    fn hourly(court_id: Ulid, from_h: Ms, to_h: Ms) -> Vec<Slot> {
        (from_h..to_h).map(|h| slot(court_id, h * H, (h + 1) * H)).collect()
    }

    fn reservation(court_id: Ulid, start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            court_id,
            span: Span::new(start, end),
            status,
            player_id: "p1".into(),
            price: Decimal::ONE_HUNDRED,
            expires_at: None,
        }
    }

    fn block(court_id: Ulid, start: Ms, end: Ms) -> Block {
        Block {
            id: Ulid::new(),
            court_id,
            span: Span::new(start, end),
            reason: Some("maintenance".into()),
        }
    }

    fn states(slots: &[Slot]) -> Vec<SlotState> {
        slots.iter().map(|s| s.state).collect()
    }

    // ── resolve ──────────────────────────────────────────────────

    #[test]
    fn confirmed_reservation_occupies_its_slot() {
        let court = Ulid::new();
        let candidates = hourly(court, 9, 11);
        let booked = [reservation(court, 10 * H, 11 * H, ReservationStatus::Confirmed)];
        let out = resolve(&candidates, &booked, &[]);
        assert_eq!(states(&out), vec![SlotState::Available, SlotState::Occupied]);
    }

    #[test]
    fn reservation_ending_at_slot_start_does_not_occupy() {
        let court = Ulid::new();
        let candidates = hourly(court, 10, 11);
        let booked = [reservation(court, 9 * H, 10 * H, ReservationStatus::Confirmed)];
        assert_eq!(states(&resolve(&candidates, &booked, &[])), vec![SlotState::Available]);
    }

    #[test]
    fn partial_overlap_occupies() {
        let court = Ulid::new();
        let candidates = hourly(court, 9, 12);
        let booked = [reservation(court, 9 * H + 30 * M, 10 * H + 30 * M, ReservationStatus::Confirmed)];
        assert_eq!(
            states(&resolve(&candidates, &booked, &[])),
            vec![SlotState::Occupied, SlotState::Occupied, SlotState::Available]
        );
    }

    #[test]
    fn pending_reservation_marks_pending() {
        let court = Ulid::new();
        let candidates = hourly(court, 9, 11);
        let booked = [reservation(court, 9 * H, 10 * H, ReservationStatus::Pending)];
        assert_eq!(
            states(&resolve(&candidates, &booked, &[])),
            vec![SlotState::Pending, SlotState::Available]
        );
    }

    #[test]
    fn cancelled_and_completed_never_occupy() {
        let court = Ulid::new();
        let candidates = hourly(court, 9, 11);
        let booked = [
            reservation(court, 9 * H, 10 * H, ReservationStatus::Cancelled),
            reservation(court, 10 * H, 11 * H, ReservationStatus::Completed),
        ];
        assert_eq!(
            states(&resolve(&candidates, &booked, &[])),
            vec![SlotState::Available, SlotState::Available]
        );
    }

    #[test]
    fn precedence_blocked_occupied_pending() {
        let court = Ulid::new();
        let candidates = hourly(court, 9, 12);
        let booked = [
            reservation(court, 9 * H, 11 * H, ReservationStatus::Pending),
            reservation(court, 9 * H + 30 * M, 10 * H + 30 * M, ReservationStatus::Confirmed),
        ];
        let blocks = [block(court, 9 * H, 9 * H + 15 * M)];
        assert_eq!(
            states(&resolve(&candidates, &booked, &blocks)),
            vec![SlotState::Blocked, SlotState::Occupied, SlotState::Available]
        );
    }

    #[test]
    fn other_courts_ignored() {
        let court = Ulid::new();
        let other = Ulid::new();
        let candidates = hourly(court, 9, 10);
        let booked = [reservation(other, 9 * H, 10 * H, ReservationStatus::Confirmed)];
        let blocks = [block(other, 9 * H, 10 * H)];
        assert_eq!(states(&resolve(&candidates, &booked, &blocks)), vec![SlotState::Available]);
    }

    #[test]
    fn mixed_courts_in_one_call() {
        let a = Ulid::new();
        let b = Ulid::new();
        let mut candidates = hourly(a, 9, 10);
        candidates.extend(hourly(b, 9, 10));
        let booked = [reservation(b, 9 * H, 10 * H, ReservationStatus::Confirmed)];
        assert_eq!(
            states(&resolve(&candidates, &booked, &[])),
            vec![SlotState::Available, SlotState::Occupied]
        );
    }

    #[test]
    fn preserves_order_and_idempotent() {
        let court = Ulid::new();
        let candidates = hourly(court, 8, 20);
        let booked = [
            reservation(court, 12 * H, 14 * H, ReservationStatus::Confirmed),
            reservation(court, 16 * H, 17 * H, ReservationStatus::Pending),
        ];
        let once = resolve(&candidates, &booked, &[]);
        assert_eq!(once.len(), candidates.len());
        for (a, b) in once.iter().zip(&candidates) {
            assert_eq!(a.span, b.span);
            assert_eq!(a.price, b.price);
        }
        assert_eq!(resolve(&once, &booked, &[]), once);
    }

    #[test]
    fn no_candidates() {
        assert!(resolve(&[], &[], &[]).is_empty());
    }

    // ── merge_overlapping ────────────────────────────────────────

    #[test]
    fn merge_adjacent_and_overlapping() {
        let spans = vec![
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(15, 20),
            Span::new(30, 40),
        ];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(0, 20), Span::new(30, 40)]);
    }

    #[test]
    fn merge_contained() {
        let spans = vec![Span::new(0, 100), Span::new(10, 20), Span::new(50, 60)];
        assert_eq!(merge_overlapping(&spans), vec![Span::new(0, 100)]);
    }
}
