//! Durable per-venue seat collections.
//!
//! A collection is stored as a stream of newline-delimited JSON seat
//! records and is always rewritten whole. Reads stop cleanly at the first
//! malformed record so a torn tail never poisons committed seats.
//!
//! Every collection carries a revision. `save` only succeeds against the
//! revision that was loaded; a stale save fails with `RegistryConflict`
//! instead of overwriting another run's result.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

use crate::{now_s, ErrorKind, Seat, SeatError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeatCollection {
    pub seats: Vec<Seat>,
    pub revision: u64,
}

/// Result of decoding a seat record stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedRecords {
    pub seats: Vec<Seat>,
    /// Bytes dropped after the last well-formed record.
    pub discarded_bytes: usize,
}

pub fn encode_records(seats: &[Seat]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for seat in seats {
        serde_json::to_writer(&mut out, seat)?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn decode_records(bytes: &[u8]) -> DecodedRecords {
    let mut seats = Vec::new();
    let mut offset = 0;
    for line in bytes.split(|b| *b == b'\n') {
        let consumed = line.len() + 1;
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            offset += consumed;
            continue;
        }
        match serde_json::from_slice::<Seat>(line) {
            Ok(seat) => seats.push(seat),
            Err(_) => {
                return DecodedRecords {
                    seats,
                    discarded_bytes: bytes.len().saturating_sub(offset),
                }
            }
        }
        offset += consumed;
    }
    DecodedRecords {
        seats,
        discarded_bytes: 0,
    }
}

fn decode_logged(venue_id: &str, bytes: &[u8]) -> Vec<Seat> {
    let decoded = decode_records(bytes);
    if decoded.discarded_bytes > 0 {
        log::warn!(
            "venue {}: discarded {} bytes of truncated seat records after {} seats",
            venue_id,
            decoded.discarded_bytes,
            decoded.seats.len()
        );
    }
    decoded.seats
}

fn missing(venue_id: &str) -> anyhow::Error {
    SeatError::new(
        ErrorKind::RegistryMissing,
        format!("no seat data persisted for venue {}", venue_id),
    )
    .into()
}

fn conflict(venue_id: &str, expected: u64, actual: u64) -> anyhow::Error {
    SeatError::new(
        ErrorKind::RegistryConflict,
        format!(
            "venue {} seat collection changed during run (loaded revision {}, now {})",
            venue_id, expected, actual
        ),
    )
    .into()
}

pub trait SeatRegistry {
    fn load(&self, venue_id: &str) -> Result<SeatCollection>;

    /// Replace the venue's seats if `collection.revision` is still current.
    /// Returns the new revision.
    fn save(&mut self, venue_id: &str, collection: &SeatCollection) -> Result<u64>;

    /// Unconditionally install a seat set (seat provisioning).
    fn provision(&mut self, venue_id: &str, seats: &[Seat]) -> Result<u64>;
}

pub struct SqliteSeatRegistry {
    conn: Connection,
}

impl SqliteSeatRegistry {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS seat_collections (
              venue_id TEXT PRIMARY KEY,
              records BLOB NOT NULL,
              revision INTEGER NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn current_revision(&self, venue_id: &str) -> Result<Option<u64>> {
        let revision: Option<i64> = self
            .conn
            .query_row(
                "SELECT revision FROM seat_collections WHERE venue_id = ?1",
                params![venue_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(revision.map(|r| r as u64))
    }
}

fn updated_at() -> Result<i64> {
    i64::try_from(now_s()?).map_err(|_| anyhow!("timestamp exceeds i64 range"))
}

impl SeatRegistry for SqliteSeatRegistry {
    fn load(&self, venue_id: &str) -> Result<SeatCollection> {
        let row: Option<(Vec<u8>, i64)> = self
            .conn
            .query_row(
                "SELECT records, revision FROM seat_collections WHERE venue_id = ?1",
                params![venue_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((records, revision)) = row else {
            return Err(missing(venue_id));
        };
        Ok(SeatCollection {
            seats: decode_logged(venue_id, &records),
            revision: revision as u64,
        })
    }

    fn save(&mut self, venue_id: &str, collection: &SeatCollection) -> Result<u64> {
        let records = encode_records(&collection.seats)?;
        let expected = i64::try_from(collection.revision)
            .map_err(|_| anyhow!("revision exceeds i64 range"))?;
        // Compare-and-swap in a single statement; readers see old or new, never both.
        let changed = self.conn.execute(
            r#"
            UPDATE seat_collections
            SET records = ?1, revision = revision + 1, updated_at = ?2
            WHERE venue_id = ?3 AND revision = ?4
            "#,
            params![records, updated_at()?, venue_id, expected],
        )?;
        if changed == 1 {
            return Ok(collection.revision + 1);
        }
        match self.current_revision(venue_id)? {
            Some(actual) => Err(conflict(venue_id, collection.revision, actual)),
            None => Err(missing(venue_id)),
        }
    }

    fn provision(&mut self, venue_id: &str, seats: &[Seat]) -> Result<u64> {
        let records = encode_records(seats)?;
        self.conn.execute(
            r#"
            INSERT INTO seat_collections(venue_id, records, revision, updated_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(venue_id) DO UPDATE SET
              records = excluded.records,
              revision = seat_collections.revision + 1,
              updated_at = excluded.updated_at
            "#,
            params![venue_id, records, updated_at()?],
        )?;
        self.current_revision(venue_id)?
            .ok_or_else(|| anyhow!("venue {} vanished after provisioning", venue_id))
    }
}

#[derive(Clone, Debug, Default)]
struct InMemoryEntry {
    records: Vec<u8>,
    revision: u64,
}

/// Keeps encoded records so reads go through the same tolerant decoder.
#[derive(Clone, Debug, Default)]
pub struct InMemorySeatRegistry {
    venues: HashMap<String, InMemoryEntry>,
}

impl InMemorySeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install raw record bytes, e.g. a torn write.
    pub fn put_raw(&mut self, venue_id: &str, records: Vec<u8>) {
        let entry = self.venues.entry(venue_id.to_string()).or_default();
        entry.records = records;
        entry.revision += 1;
    }
}

impl SeatRegistry for InMemorySeatRegistry {
    fn load(&self, venue_id: &str) -> Result<SeatCollection> {
        let entry = self.venues.get(venue_id).ok_or_else(|| missing(venue_id))?;
        Ok(SeatCollection {
            seats: decode_logged(venue_id, &entry.records),
            revision: entry.revision,
        })
    }

    fn save(&mut self, venue_id: &str, collection: &SeatCollection) -> Result<u64> {
        let records = encode_records(&collection.seats)?;
        let entry = self
            .venues
            .get_mut(venue_id)
            .ok_or_else(|| missing(venue_id))?;
        if entry.revision != collection.revision {
            return Err(conflict(venue_id, collection.revision, entry.revision));
        }
        entry.records = records;
        entry.revision += 1;
        Ok(entry.revision)
    }

    fn provision(&mut self, venue_id: &str, seats: &[Seat]) -> Result<u64> {
        let records = encode_records(seats)?;
        self.put_raw(venue_id, records);
        Ok(self.venues[venue_id].revision)
    }
}
