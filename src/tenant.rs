use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::engine::{Engine, EngineOptions};
use crate::limits::*;
use crate::notify::EventHub;
use crate::reaper;

/// Background task cadence for every club.
#[derive(Debug, Clone)]
pub struct ClubSettings {
    pub engine: EngineOptions,
    pub reaper_interval: Duration,
    pub compact_threshold: u64,
    pub compact_check_interval: Duration,
}

impl Default for ClubSettings {
    fn default() -> Self {
        Self {
            engine: EngineOptions::default(),
            reaper_interval: Duration::from_secs(5),
            compact_threshold: 1000,
            compact_check_interval: Duration::from_secs(60),
        }
    }
}

/// One engine, journal, reaper and compactor per club. The club is the
/// database name of the pgwire connection.
pub struct ClubManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    settings: ClubSettings,
}

impl ClubManager {
    pub fn new(data_dir: PathBuf, settings: ClubSettings) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            settings,
        }
    }

    /// Get or lazily open the engine for `club`. Names that sanitise to the
    /// same journal file name are the same club.
    pub fn get_or_create(&self, club: &str) -> io::Result<Arc<Engine>> {
        if club.len() > MAX_CLUB_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "club name too long"));
        }
        let safe_name = journal_name(club);
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty club name"));
        }
        if let Some(engine) = self.engines.get(&safe_name) {
            return Ok(engine.value().clone());
        }

        if self.engines.len() >= MAX_CLUBS {
            return Err(io::Error::other("too many clubs"));
        }

        // The entry lock keeps two first connections from opening one journal twice.
        let engine = match self.engines.entry(safe_name.clone()) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let journal_path = self.data_dir.join(format!("{safe_name}.journal"));
                let engine = Arc::new(Engine::new(
                    journal_path,
                    Arc::new(EventHub::new()),
                    self.settings.engine.clone(),
                )?);
                tokio::spawn(reaper::run_reaper(engine.clone(), self.settings.reaper_interval));
                tokio::spawn(reaper::run_compactor(
                    engine.clone(),
                    self.settings.compact_threshold,
                    self.settings.compact_check_interval,
                ));
                slot.insert(engine.clone());
                engine
            }
        };

        metrics::gauge!(crate::observability::CLUBS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(club, journal = %safe_name, "club opened");
        Ok(engine)
    }
}

/// Only these characters reach the file system.
fn journal_name(club: &str) -> String {
    club.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}
