use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::ScheduleConfig;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::pricing::{base_price, total_price};
use super::window;
use super::{ConfigError, Engine, EngineError, JournalCommand, PricePeriod};

impl Engine {
    // ── Courts and configuration ─────────────────────────────────

    pub async fn register_court(&self, id: Ulid, name: Option<String>, hourly_rate: Decimal) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("court name too long"));
        }
        if hourly_rate < Decimal::ZERO {
            return Err(ConfigError::NegativeRate(hourly_rate).into());
        }
        if hourly_rate > Decimal::from(MAX_HOURLY_RATE) {
            return Err(ConfigError::RateTooHigh(hourly_rate).into());
        }
        // Registration is rare; holding the gate exclusively makes the
        // existence check and the insert one step.
        let _gate = self.commit_gate.write().await;
        if self.courts.len() >= MAX_COURTS_PER_CLUB {
            return Err(EngineError::LimitExceeded("too many courts"));
        }
        if self.courts.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CourtRegistered {
            id,
            name: name.clone(),
            hourly_rate,
        };
        self.journal_append(&event).await?;
        self.courts
            .insert(id, Arc::new(RwLock::new(CourtState::new(id, name, hourly_rate))));
        self.hub.send(&event);
        tracing::info!(court = %id, "court registered");
        Ok(())
    }

    /// Take a court out of service or put it back. Existing reservations
    /// are kept; only new ones are refused.
    pub async fn set_court_available(&self, court_id: Ulid, available: bool) -> Result<(), EngineError> {
        let mut court = self.lock_court(court_id).await?;
        if court.available == available {
            return Ok(());
        }
        let event = Event::CourtAvailabilitySet { court_id, available };
        self.persist_and_apply(&mut court, &event).await?;
        tracing::info!(court = %court_id, available, "court availability changed");
        Ok(())
    }

    /// Replace the court's schedule. `None` reverts to the default.
    pub async fn set_schedule(&self, court_id: Ulid, config: Option<ScheduleConfig>) -> Result<(), EngineError> {
        if let Some(ref c) = config {
            c.validate()?;
        }
        let mut court = self.lock_court(court_id).await?;
        let event = Event::ScheduleSet { court_id, config };
        self.persist_and_apply(&mut court, &event).await
    }

    pub async fn add_price_period(&self, court_id: Ulid, period: PricePeriod) -> Result<(), EngineError> {
        if let Some(ref l) = period.label
            && l.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("label too long"));
        }
        period.validate()?;
        let mut court = self.lock_court(court_id).await?;
        let claim = self.claim_id(period.id, court_id)?;
        if !court.prices.has_room() {
            return Err(EngineError::LimitExceeded("too many price periods on court"));
        }
        court.prices.check(&period)?;

        let event = Event::PricePeriodAdded { court_id, period };
        self.persist_and_apply(&mut court, &event).await?;
        claim.keep();
        Ok(())
    }

    pub async fn remove_price_period(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (court_id, mut court) = self.lock_entity(&id).await?;
        if !court.prices.contains_id(id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::PricePeriodRemoved { court_id, id };
        self.persist_and_apply(&mut court, &event).await?;
        Ok(court_id)
    }

    // ── Reservation ledger ───────────────────────────────────────

    /// Claim `span` on a court for `player_id` as a pending reservation.
    ///
    /// Runs the booking-window check, recomputes the price and re-checks
    /// overlap while holding the court's write lock. A competing claim on any
    /// part of the span fails with `Conflict`; nothing is overwritten.
    pub async fn try_reserve(
        &self,
        id: Ulid,
        court_id: Ulid,
        span: Span,
        player_id: String,
    ) -> Result<Reservation, EngineError> {
        self.try_reserve_at(id, court_id, span, player_id, now_ms()).await
    }

    pub async fn try_reserve_at(
        &self,
        id: Ulid,
        court_id: Ulid,
        span: Span,
        player_id: String,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        validate_span(&span)?;
        if player_id.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("player id too long"));
        }
        let mut court = self.lock_court(court_id).await?;
        if !court.available {
            return Err(EngineError::CourtUnavailable(court_id));
        }
        let claim = self.claim_id(id, court_id)?;
        if court.entries.len() >= MAX_ENTRIES_PER_COURT {
            return Err(EngineError::LimitExceeded("too many entries on court"));
        }

        let config = court.effective_schedule();
        let covered = window::validate_span(&config, now, span)?;
        if let Err(e) = check_no_conflict(&court, &span, now) {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(court = %court_id, start = span.start, error = %e, "reservation lost the race");
            return Err(e);
        }

        let slot_prices = covered
            .iter()
            .map(|slot| court.prices.price_for(base_price(court.hourly_rate, slot.minutes())?, slot.start))
            .collect::<Result<Vec<Decimal>, ConfigError>>()?;
        let price = total_price(slot_prices)?;
        let expires_at = self
            .options
            .payment_timeout
            .map(|t| now + t.as_millis() as Ms);

        let event = Event::ReservationCreated {
            id,
            court_id,
            span,
            player_id: player_id.clone(),
            price,
            expires_at,
        };
        self.persist_and_apply(&mut court, &event).await?;
        claim.keep();
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);

        Ok(Reservation {
            id,
            court_id,
            span,
            status: ReservationStatus::Pending,
            player_id,
            price,
            expires_at,
        })
    }

    /// Payment succeeded. Only a pending reservation whose payment window is
    /// still open can be confirmed.
    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.confirm_reservation_at(id, now_ms()).await
    }

    pub async fn confirm_reservation_at(&self, id: Ulid, now: Ms) -> Result<Ulid, EngineError> {
        let (court_id, mut court) = self.lock_entity(&id).await?;
        let entry = court.entry(id).ok_or(EngineError::NotFound(id))?;
        let EntryKind::Reservation { status, expires_at, .. } = &entry.kind else {
            return Err(EngineError::NotFound(id));
        };
        if *status != ReservationStatus::Pending {
            return Err(EngineError::InvalidTransition {
                id,
                from: *status,
                to: ReservationStatus::Confirmed,
            });
        }
        if expires_at.is_some_and(|deadline| deadline <= now) {
            return Err(EngineError::PaymentWindowClosed(id));
        }
        let event = Event::ReservationConfirmed { id, court_id };
        self.persist_and_apply(&mut court, &event).await?;
        Ok(court_id)
    }

    /// Player or club cancellation, or a rejected payment.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition(id, &[ReservationStatus::Pending, ReservationStatus::Confirmed], ReservationStatus::Cancelled)
            .await
    }

    /// The match was played.
    pub async fn complete_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        self.transition(id, &[ReservationStatus::Confirmed], ReservationStatus::Completed)
            .await
    }

    async fn transition(
        &self,
        id: Ulid,
        allowed_from: &[ReservationStatus],
        to: ReservationStatus,
    ) -> Result<Ulid, EngineError> {
        let (court_id, mut court) = self.lock_entity(&id).await?;
        let from = match court.entry(id).map(|e| &e.kind) {
            Some(EntryKind::Reservation { status, .. }) => *status,
            _ => return Err(EngineError::NotFound(id)),
        };
        if !allowed_from.contains(&from) {
            return Err(EngineError::InvalidTransition { id, from, to });
        }
        let event = match to {
            ReservationStatus::Cancelled => Event::ReservationCancelled { id, court_id },
            ReservationStatus::Completed => Event::ReservationCompleted { id, court_id },
            ReservationStatus::Confirmed => Event::ReservationConfirmed { id, court_id },
            ReservationStatus::Pending => return Err(EngineError::InvalidTransition { id, from, to }),
        };
        self.persist_and_apply(&mut court, &event).await?;
        Ok(court_id)
    }

    /// Cancel a pending reservation whose payment deadline has passed.
    /// Returns `false` if it was confirmed or cancelled in the meantime.
    pub async fn expire_reservation(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let (court_id, mut court) = self.lock_entity(&id).await?;
        let lapsed = matches!(
            court.entry(id).map(|e| &e.kind),
            Some(EntryKind::Reservation {
                status: ReservationStatus::Pending,
                expires_at: Some(deadline),
                ..
            }) if *deadline <= now
        );
        if !lapsed {
            return Ok(false);
        }
        let event = Event::ReservationCancelled { id, court_id };
        self.persist_and_apply(&mut court, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL).increment(1);
        Ok(true)
    }

    /// Pending reservations whose payment deadline is at or before `now`, as
    /// `(reservation_id, court_id)`. Courts locked by a writer are skipped
    /// and picked up on the next sweep.
    pub fn collect_lapsed_reservations(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut lapsed = Vec::new();
        for entry in self.courts.iter() {
            let court = entry.value().clone();
            if let Ok(guard) = court.try_read() {
                for e in &guard.entries {
                    if let EntryKind::Reservation {
                        status: ReservationStatus::Pending,
                        expires_at: Some(deadline),
                        ..
                    } = e.kind
                        && deadline <= now
                    {
                        lapsed.push((e.id, guard.id));
                    }
                }
            }
        }
        lapsed
    }

    // ── Blocks ───────────────────────────────────────────────────

    /// Club-initiated hold. Any span is allowed, aligned or not, but it may
    /// not overlap an active reservation or another block.
    pub async fn place_block(&self, id: Ulid, court_id: Ulid, span: Span, reason: Option<String>) -> Result<(), EngineError> {
        validate_span(&span)?;
        if let Some(ref r) = reason
            && r.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("block reason too long"));
        }
        let mut court = self.lock_court(court_id).await?;
        let claim = self.claim_id(id, court_id)?;
        if court.entries.len() >= MAX_ENTRIES_PER_COURT {
            return Err(EngineError::LimitExceeded("too many entries on court"));
        }
        check_no_conflict(&court, &span, now_ms())?;

        let event = Event::BlockPlaced {
            id,
            court_id,
            span,
            reason,
        };
        self.persist_and_apply(&mut court, &event).await?;
        claim.keep();
        Ok(())
    }

    pub async fn release_block(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (court_id, mut court) = self.lock_entity(&id).await?;
        if !court.entry(id).is_some_and(Entry::is_block) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlockReleased { id, court_id };
        self.persist_and_apply(&mut court, &event).await?;
        Ok(court_id)
    }

    // ── Journal maintenance ──────────────────────────────────────

    /// Rewrite the journal as the minimal event list that rebuilds the
    /// current state. Mutations wait while the snapshot is taken and written.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut court_ids: Vec<Ulid> = self.courts.iter().map(|e| *e.key()).collect();
        court_ids.sort();

        let mut events = Vec::new();
        for id in court_ids {
            let Some(court) = self.court(&id) else { continue };
            let guard = court.read().await;
            snapshot_court(&guard, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Events that recreate `court` from nothing.
fn snapshot_court(court: &CourtState, events: &mut Vec<Event>) {
    let court_id = court.id;
    events.push(Event::CourtRegistered {
        id: court_id,
        name: court.name.clone(),
        hourly_rate: court.hourly_rate,
    });
    if !court.available {
        events.push(Event::CourtAvailabilitySet {
            court_id,
            available: false,
        });
    }
    if court.schedule.is_some() {
        events.push(Event::ScheduleSet {
            court_id,
            config: court.schedule.clone(),
        });
    }
    for period in court.prices.periods() {
        events.push(Event::PricePeriodAdded {
            court_id,
            period: period.clone(),
        });
    }
    for entry in &court.entries {
        let id = entry.id;
        match &entry.kind {
            EntryKind::Block { reason } => events.push(Event::BlockPlaced {
                id,
                court_id,
                span: entry.span,
                reason: reason.clone(),
            }),
            EntryKind::Reservation {
                player_id,
                status,
                price,
                expires_at,
            } => {
                events.push(Event::ReservationCreated {
                    id,
                    court_id,
                    span: entry.span,
                    player_id: player_id.clone(),
                    price: *price,
                    expires_at: *expires_at,
                });
                match status {
                    ReservationStatus::Pending => {}
                    ReservationStatus::Confirmed => events.push(Event::ReservationConfirmed { id, court_id }),
                    ReservationStatus::Cancelled => events.push(Event::ReservationCancelled { id, court_id }),
                    ReservationStatus::Completed => {
                        events.push(Event::ReservationConfirmed { id, court_id });
                        events.push(Event::ReservationCompleted { id, court_id });
                    }
                }
            }
        }
    }
}
