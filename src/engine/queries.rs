use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::schedule::ScheduleConfig;

use super::availability::resolve;
use super::conflict::now_ms;
use super::pricing::base_price;
use super::slots::generate;
use super::{ConfigError, Engine, EngineError, PricePeriod, SharedCourtState};

impl Engine {
    /// Every slot of `date` on a court, priced and marked with its state.
    /// A closed day, or one with every slot taken, is a normal result.
    pub async fn slots_for(&self, court_id: Ulid, date: NaiveDate) -> Result<Vec<Slot>, EngineError> {
        self.slots_for_at(court_id, date, now_ms()).await
    }

    pub async fn slots_for_at(&self, court_id: Ulid, date: NaiveDate, now: Ms) -> Result<Vec<Slot>, EngineError> {
        let court = self.court(&court_id).ok_or(EngineError::NotFound(court_id))?;

        // Snapshot under the read lock, compute after releasing it.
        let guard = court.read().await;
        let config = guard.effective_schedule();
        let times = generate(&config, date);
        let (Some(first), Some(last)) = (times.first(), times.last()) else {
            return Ok(Vec::new());
        };
        let day = Span::new(first.span.start, last.span.end);
        let mut reservations = Vec::new();
        let mut blocks = Vec::new();
        for entry in guard.overlapping(&day).filter(|e| e.is_active(now)) {
            if let Some(r) = guard.reservation(entry) {
                reservations.push(r);
            } else if let Some(b) = guard.block(entry) {
                blocks.push(b);
            }
        }
        let prices = guard.prices.clone();
        let hourly_rate = guard.hourly_rate;
        let available = guard.available;
        drop(guard);

        let candidates = times
            .iter()
            .map(|t| -> Result<Slot, ConfigError> {
                let base = base_price(hourly_rate, t.minutes())?;
                Ok(Slot {
                    court_id,
                    date: t.date,
                    start: t.start,
                    end: t.end,
                    span: t.span,
                    base_price: base,
                    price: prices.price_for(base, t.start)?,
                    state: SlotState::Available,
                })
            })
            .collect::<Result<Vec<Slot>, ConfigError>>()?;
        let mut slots = resolve(&candidates, &reservations, &blocks);
        if !available {
            for slot in &mut slots {
                slot.state = SlotState::Blocked;
            }
        }
        Ok(slots)
    }

    pub async fn list_courts(&self) -> Vec<CourtInfo> {
        let courts: Vec<SharedCourtState> = self.courts.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(courts.len());
        for court in courts {
            let guard = court.read().await;
            out.push(CourtInfo {
                id: guard.id,
                name: guard.name.clone(),
                hourly_rate: guard.hourly_rate,
                available: guard.available,
                configured: guard.schedule.is_some(),
            });
        }
        out.sort_by_key(|c| c.id);
        out
    }

    /// The court's effective schedule and whether it was explicitly set.
    pub async fn schedule(&self, court_id: Ulid) -> Result<(ScheduleConfig, bool), EngineError> {
        let court = self.court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = court.read().await;
        Ok((guard.effective_schedule(), guard.schedule.is_some()))
    }

    pub async fn price_periods(&self, court_id: Ulid) -> Result<Vec<PricePeriod>, EngineError> {
        let court = self.court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = court.read().await;
        Ok(guard.prices.periods().to_vec())
    }

    /// All reservations on a court, every status, in start order.
    pub async fn reservations(&self, court_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let court = self.court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = court.read().await;
        Ok(guard.entries.iter().filter_map(|e| guard.reservation(e)).collect())
    }

    /// Every reservation a player holds across the club's courts, in start
    /// order.
    pub async fn reservations_for_player(&self, player_id: &str) -> Vec<Reservation> {
        let courts: Vec<SharedCourtState> = self.courts.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for court in courts {
            let guard = court.read().await;
            out.extend(
                guard
                    .entries
                    .iter()
                    .filter_map(|e| guard.reservation(e))
                    .filter(|r| r.player_id == player_id),
            );
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        out
    }

    pub async fn reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let court_id = self.court_for_entity(&id).ok_or(EngineError::NotFound(id))?;
        let court = self.court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = court.read().await;
        guard
            .entry(id)
            .and_then(|e| guard.reservation(e))
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn blocks(&self, court_id: Ulid) -> Result<Vec<Block>, EngineError> {
        let court = self.court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = court.read().await;
        Ok(guard.entries.iter().filter_map(|e| guard.block(e)).collect())
    }
}
