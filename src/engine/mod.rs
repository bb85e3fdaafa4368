mod availability;
mod conflict;
mod error;
mod mutations;
mod pricing;
mod queries;
mod slots;
mod window;

pub use availability::{merge_overlapping, resolve};
pub(crate) use conflict::now_ms;
pub use error::{BookingWindowError, ConfigError, EngineError};
pub use pricing::{adjusted_price, base_price, price_for, total_price, PricePeriod, PriceTable};
pub use slots::{generate, SlotTime};
pub use window::{validate, validate_span};

use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;
use crate::notify::{EventHub, Notice};

pub type SharedCourtState = Arc<RwLock<CourtState>>;

/// Tunables for one club's engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How long a pending reservation holds its slot while payment is in
    /// flight. `None` holds it until confirmed or cancelled.
    pub payment_timeout: Option<Duration>,
    /// Upper bound on waiting for a court's write lock.
    pub lock_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            payment_timeout: Some(Duration::from_secs(15 * 60)),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that arrive while a batch is being collected
/// share one fsync; every sender learns the outcome of its batch.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            JournalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut journal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                JournalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut journal, batch);
        if let Some(other) = deferred {
            handle_control(&mut journal, other);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::JOURNAL_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch.iter().try_for_each(|(event, _)| journal.append(event));
    // Sync even after a failed append so no half-written batch lingers in the buffer.
    let synced = journal.sync();
    if result.is_ok() {
        result = synced;
    }
    metrics::histogram!(crate::observability::JOURNAL_SYNC_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::error!(path = %journal.path().display(), error = %e, "journal append failed");
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let _ = response.send(journal.compact(&events));
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => commit_batch(journal, vec![(event, response)]),
    }
}

/// One club's courts and ledgers.
pub struct Engine {
    pub(super) courts: DashMap<Ulid, SharedCourtState>,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    pub hub: Arc<EventHub>,
    /// Reverse lookup: reservation, block or price period id → court id.
    pub(super) entity_to_court: DashMap<Ulid, Ulid>,
    /// Held shared by every mutation and exclusively by compaction, so a
    /// snapshot never misses an event written while it was being taken.
    pub(super) commit_gate: Arc<RwLock<()>>,
    pub(super) options: EngineOptions,
}

/// Exclusive access to one court for the duration of a mutation.
pub(super) struct CourtWrite {
    _gate: OwnedRwLockReadGuard<()>,
    guard: OwnedRwLockWriteGuard<CourtState>,
}

impl Deref for CourtWrite {
    type Target = CourtState;

    fn deref(&self) -> &CourtState {
        &self.guard
    }
}

impl DerefMut for CourtWrite {
    fn deref_mut(&mut self) -> &mut CourtState {
        &mut self.guard
    }
}

/// An entity id taken in the reverse map before its event is written.
/// Dropped without [`IdClaim::keep`], it gives the id back.
pub(super) struct IdClaim<'a> {
    map: &'a DashMap<Ulid, Ulid>,
    id: Ulid,
    court_id: Ulid,
    kept: bool,
}

impl IdClaim<'_> {
    pub(super) fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.map.remove_if(&self.id, |_, court| *court == self.court_id);
        }
    }
}

/// Apply an event to a court (no locking; caller holds the lock).
fn apply_to_court(court: &mut CourtState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::CourtAvailabilitySet { available, .. } => {
            court.available = *available;
        }
        Event::ScheduleSet { config, .. } => {
            court.schedule = config.clone();
        }
        Event::PricePeriodAdded { court_id, period } => {
            entity_map.insert(period.id, *court_id);
            court.prices.insert_unchecked(period.clone());
        }
        Event::PricePeriodRemoved { id, .. } => {
            court.prices.remove(*id);
            entity_map.remove(id);
        }
        Event::ReservationCreated {
            id,
            court_id,
            span,
            player_id,
            price,
            expires_at,
        } => {
            court.insert_entry(Entry {
                id: *id,
                span: *span,
                kind: EntryKind::Reservation {
                    player_id: player_id.clone(),
                    status: ReservationStatus::Pending,
                    price: *price,
                    expires_at: *expires_at,
                },
            });
            entity_map.insert(*id, *court_id);
        }
        Event::ReservationConfirmed { id, .. } => set_status(court, *id, ReservationStatus::Confirmed),
        Event::ReservationCancelled { id, .. } => set_status(court, *id, ReservationStatus::Cancelled),
        Event::ReservationCompleted { id, .. } => set_status(court, *id, ReservationStatus::Completed),
        Event::BlockPlaced {
            id,
            court_id,
            span,
            reason,
        } => {
            court.insert_entry(Entry {
                id: *id,
                span: *span,
                kind: EntryKind::Block { reason: reason.clone() },
            });
            entity_map.insert(*id, *court_id);
        }
        Event::BlockReleased { id, .. } => {
            court.remove_entry(*id);
            entity_map.remove(id);
        }
        // Handled at the DashMap level.
        Event::CourtRegistered { .. } => {}
    }
}

fn set_status(court: &mut CourtState, id: Ulid, to: ReservationStatus) {
    if let Some(entry) = court.entry_mut(id)
        && let EntryKind::Reservation {
            status, expires_at, ..
        } = &mut entry.kind
    {
        *status = to;
        if to != ReservationStatus::Pending {
            *expires_at = None;
        }
    }
}

impl Engine {
    pub fn new(journal_path: PathBuf, hub: Arc<EventHub>, options: EngineOptions) -> io::Result<Self> {
        let (journal, events) = Journal::recover(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            courts: DashMap::new(),
            journal_tx,
            hub,
            entity_to_court: DashMap::new(),
            commit_gate: Arc::new(RwLock::new(())),
            options,
        };

        // Nothing else holds these locks yet, so try_write always succeeds.
        // blocking_write would panic when called from inside the runtime.
        for event in &events {
            match event {
                Event::CourtRegistered { id, name, hourly_rate } => {
                    let court = CourtState::new(*id, name.clone(), *hourly_rate);
                    engine.courts.insert(*id, Arc::new(RwLock::new(court)));
                }
                other => {
                    let Some(court) = engine.court(&other.court_id()) else {
                        tracing::warn!(court = %other.court_id(), "journal event for unknown court skipped");
                        continue;
                    };
                    match court.try_write() {
                        Ok(mut guard) => apply_to_court(&mut guard, other, &engine.entity_to_court),
                        Err(_) => {
                            return Err(io::Error::other("court locked during replay"));
                        }
                    }
                }
            }
        }
        if !events.is_empty() {
            tracing::info!(
                path = %journal_path.display(),
                events = events.len(),
                courts = engine.courts.len(),
                "journal replayed"
            );
        }

        Ok(engine)
    }

    /// Write an event through the group-commit writer and wait until it is durable.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub fn court(&self, id: &Ulid) -> Option<SharedCourtState> {
        self.courts.get(id).map(|e| e.value().clone())
    }

    pub fn court_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_court.get(entity_id).map(|e| *e.value())
    }

    /// Take `id` for an entity on `court_id`. Ids are unique across the
    /// club, so the check and the insert happen under one map entry lock.
    pub(super) fn claim_id(&self, id: Ulid, court_id: Ulid) -> Result<IdClaim<'_>, EngineError> {
        match self.entity_to_court.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(court_id);
                Ok(IdClaim {
                    map: &self.entity_to_court,
                    id,
                    court_id,
                    kept: false,
                })
            }
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Journal first, then apply, then publish. A failed append leaves the
    /// court untouched.
    pub(super) async fn persist_and_apply(&self, court: &mut CourtState, event: &Event) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_court(court, event, &self.entity_to_court);
        tracing::debug!(notice = ?Notice::from_event(event), "event applied");
        self.hub.send(event);
        Ok(())
    }

    /// Take the commit gate and the court's write lock, giving up after
    /// `lock_timeout`.
    pub(super) async fn lock_court(&self, court_id: Ulid) -> Result<CourtWrite, EngineError> {
        let court = self.court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let gate = self.commit_gate.clone();
        let acquire = async move {
            let gate = gate.read_owned().await;
            let guard = court.write_owned().await;
            CourtWrite { _gate: gate, guard }
        };
        match tokio::time::timeout(self.options.lock_timeout, acquire).await {
            Ok(write) => Ok(write),
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                Err(EngineError::Timeout)
            }
        }
    }

    /// Lookup entity → court, then lock the court.
    pub(super) async fn lock_entity(&self, entity_id: &Ulid) -> Result<(Ulid, CourtWrite), EngineError> {
        let court_id = self
            .court_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let write = self.lock_court(court_id).await?;
        Ok((court_id, write))
    }
}
