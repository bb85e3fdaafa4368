//! Append-only event journal.
//!
//! Each record is framed as `[u32 len][u32 crc32][bincode payload]`, little
//! endian, where `len` counts payload bytes only. A record that is cut short
//! or fails its checksum ends replay: everything before it is kept, everything
//! from it on is treated as a torn write from a crash and cut off by
//! [`Journal::recover`] before new records are appended.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const HEADER_LEN: usize = 8;

/// Records larger than this are assumed to be garbage length prefixes.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut header = [0u8; HEADER_LEN];
    header[..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4..].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    writer.write_all(&header)?;
    writer.write_all(&payload)
}

/// Read one record and its framed length. `Ok(None)` on clean end of file
/// or on a torn tail.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut header = [0u8; HEADER_LEN];
    if !read_full(reader, &mut header)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || crc32fast::hash(&payload) != crc {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|event| (event, (HEADER_LEN + len) as u64)))
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer one record. Nothing is durable until [`Journal::sync`].
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered records and fsync.
    pub fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with `events`. The snapshot is written to a
    /// sibling file, synced, then renamed over the journal.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        self.sync()?;
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                write_record(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay the journal at `path`, cut off any torn tail, and open it for
    /// appending. New records always follow the last intact one.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, intact_len) = scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > intact_len
        {
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = meta.len() - intact_len,
                "discarding torn journal tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, events))
    }

    /// Every intact record in the journal at `path`, in write order. A
    /// missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

/// Intact records plus the byte length they occupy from the start of the file.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, framed)) = read_record(&mut reader)? {
        events.push(event);
        intact_len += framed;
    }
    Ok((events, intact_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;
    use rust_decimal::Decimal;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtside_test_journal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn court(id: Ulid) -> Event {
        Event::CourtRegistered {
            id,
            name: Some("Court 1".into()),
            hourly_rate: Decimal::new(1000, 0),
        }
    }

    fn reservation(court_id: Ulid) -> Event {
        Event::ReservationCreated {
            id: Ulid::new(),
            court_id,
            span: Span::new(1_000, 2_000),
            player_id: "p1".into(),
            price: Decimal::new(115_000, 2),
            expires_at: None,
        }
    }

    #[test]
    fn append_sync_replay() {
        let path = tmp_path("append_sync_replay.journal");
        let court_id = Ulid::new();
        let events = vec![court(court_id), reservation(court_id)];
        {
            let mut journal = Journal::open(&path).unwrap();
            for e in &events {
                journal.append(e).unwrap();
            }
            assert_eq!(journal.appends_since_compact(), 2);
            journal.sync().unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.journal");
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = tmp_path("torn_tail.journal");
        let first = court(Ulid::new());
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
            journal.sync().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap(), vec![first]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn appends_after_torn_tail_survive_restart() {
        let path = tmp_path("torn_then_append.journal");
        let first = court(Ulid::new());
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
            journal.sync().unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40, 0, 0, 0, 1, 2]).unwrap();
        }

        let second = court(Ulid::new());
        {
            let (mut journal, replayed) = Journal::recover(&path).unwrap();
            assert_eq!(replayed, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), intact);
            journal.append(&second).unwrap();
            journal.sync().unwrap();
        }

        let (_, replayed) = Journal::recover(&path).unwrap();
        assert_eq!(replayed, vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_creates_missing_journal() {
        let path = tmp_path("recover_missing.journal");
        let (_, replayed) = Journal::recover(&path).unwrap();
        assert!(replayed.is_empty());
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.journal");
        let court_id = Ulid::new();
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&court(court_id)).unwrap();
            journal.append(&reservation(court_id)).unwrap();
            journal.sync().unwrap();
        }
        // Flip the last payload byte of the second record.
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        let replayed = Journal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0], court(court_id));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.journal");
        let court_id = Ulid::new();
        let mut journal = Journal::open(&path).unwrap();
        journal.append(&court(court_id)).unwrap();
        for _ in 0..20 {
            journal.append(&reservation(court_id)).unwrap();
        }
        journal.sync().unwrap();
        let before = fs::metadata(&path).unwrap().len();

        journal.compact(&[court(court_id)]).unwrap();
        assert_eq!(journal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted journal should be smaller: {after} < {before}");

        let next = reservation(court_id);
        journal.append(&next).unwrap();
        journal.sync().unwrap();
        assert_eq!(Journal::replay(&path).unwrap(), vec![court(court_id), next]);
        let _ = fs::remove_file(&path);
    }
}
