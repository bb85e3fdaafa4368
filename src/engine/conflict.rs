use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.start >= span.end {
        return Err(EngineError::LimitExceeded("span start must be before end"));
    }
    Ok(())
}

/// Fails with the id of the first entry that claims any part of `span` at
/// instant `now`. Lapsed pending reservations no longer claim anything.
pub(crate) fn check_no_conflict(court: &CourtState, span: &Span, now: Ms) -> Result<(), EngineError> {
    match court.overlapping(span).find(|e| e.is_active(now)) {
        Some(entry) => Err(EngineError::Conflict(entry.id)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn court_with(entries: Vec<Entry>) -> CourtState {
        let mut court = CourtState::new(Ulid::new(), None, Decimal::ONE_HUNDRED);
        for e in entries {
            court.insert_entry(e);
        }
        court
    }

    fn entry(start: Ms, end: Ms, kind: EntryKind) -> Entry {
        Entry {
            id: Ulid::new(),
            span: Span::new(start, end),
            kind,
        }
    }

    fn pending(expires_at: Option<Ms>) -> EntryKind {
        EntryKind::Reservation {
            player_id: "p".into(),
            status: ReservationStatus::Pending,
            price: Decimal::ZERO,
            expires_at,
        }
    }

    #[test]
    fn overlap_with_active_entry_conflicts() {
        let block = entry(100, 200, EntryKind::Block { reason: None });
        let block_id = block.id;
        let court = court_with(vec![block]);
        assert!(matches!(
            check_no_conflict(&court, &Span::new(150, 250), 0),
            Err(EngineError::Conflict(id)) if id == block_id
        ));
        assert!(check_no_conflict(&court, &Span::new(200, 300), 0).is_ok());
        assert!(check_no_conflict(&court, &Span::new(0, 100), 0).is_ok());
    }

    #[test]
    fn lapsed_pending_does_not_conflict() {
        let court = court_with(vec![entry(100, 200, pending(Some(50)))]);
        assert!(check_no_conflict(&court, &Span::new(100, 200), 49).is_err());
        assert!(check_no_conflict(&court, &Span::new(100, 200), 50).is_ok());
    }

    #[test]
    fn span_limits() {
        let ok = Span::new(MIN_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS + 1);
        assert!(validate_span(&ok).is_ok());
        let early = Span {
            start: 0,
            end: 10,
        };
        assert!(matches!(validate_span(&early), Err(EngineError::LimitExceeded(_))));
        let inverted = Span {
            start: MIN_VALID_TIMESTAMP_MS + 10,
            end: MIN_VALID_TIMESTAMP_MS,
        };
        assert!(matches!(validate_span(&inverted), Err(EngineError::LimitExceeded(_))));
    }
}
