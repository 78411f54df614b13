//! Event store.
//!
//! Durable, append-only SQLite log of camera events with per-kind insertion
//! policy: traffic events are only recorded inside the collection window,
//! intrusion events carry a trailing debounce. Events are never mutated or
//! deleted once stored.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::sun::CollectionPolicy;
use super::{
    from_sql_time, to_sql_time, Attributes, CoreError, CoreResult, Event, EventKind, TimeRange,
};

/// Append-only event log backed by SQLite.
///
/// The connection is guarded by a mutex: readers never observe a partial
/// write, and insertion order is the sole source of truth for id tie-breaks.
pub struct EventStore {
    conn: Mutex<Connection>,
    policy: Arc<dyn CollectionPolicy>,
    debounce: Duration,
}

impl EventStore {
    /// Opens (or creates) the event database at the given path.
    pub fn open<P: AsRef<Path>>(
        path: P,
        policy: Arc<dyn CollectionPolicy>,
        debounce_secs: i64,
    ) -> CoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;

        let store = Self {
            conn: Mutex::new(conn),
            policy,
            debounce: Duration::seconds(debounce_secs),
        };
        store.init_schema()?;
        info!("Event store initialised");
        Ok(store)
    }

    /// Creates an in-memory store (for testing).
    pub fn in_memory(policy: Arc<dyn CollectionPolicy>, debounce_secs: i64) -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            policy,
            debounce: Duration::seconds(debounce_secs),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CoreResult<()> {
        let conn = self.lock_conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'traffic',
                source TEXT NOT NULL DEFAULT '',
                attrs TEXT NOT NULL DEFAULT '{}'
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_kind_timestamp ON events (kind, timestamp);
            "#,
        )?;

        // Migrate: add columns when upgrading from an older schema.
        let existing: Vec<String> = {
            let mut stmt = conn.prepare("PRAGMA table_info(events)")?;
            let cols = stmt.query_map([], |row| row.get::<_, String>(1))?;
            cols.collect::<Result<_, _>>()?
        };
        if !existing.iter().any(|c| c == "source") {
            conn.execute("ALTER TABLE events ADD COLUMN source TEXT NOT NULL DEFAULT ''", [])?;
        }
        if !existing.iter().any(|c| c == "attrs") {
            conn.execute("ALTER TABLE events ADD COLUMN attrs TEXT NOT NULL DEFAULT '{}'", [])?;
        }
        Ok(())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means a writer panicked mid-call; the connection
        // itself is still intact for subsequent statements.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends one event with the given occurrence time.
    ///
    /// Returns `Ok(false)` when the event is skipped by the collection
    /// window or the intrusion debounce; a skip is a successful no-op,
    /// never an error.
    pub fn append(
        &self,
        kind: EventKind,
        attributes: &Attributes,
        source: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        if kind == EventKind::Traffic && !self.policy.is_collection_window(now) {
            debug!("Skipping traffic event outside collection window");
            return Ok(false);
        }

        let conn = self.lock_conn();
        let now_str = to_sql_time(now);

        if kind == EventKind::Intrusion {
            // Trailing debounce: the first event of a burst always lands,
            // later ones within the interval are dropped.
            let cutoff = to_sql_time(now - self.debounce);
            let recent: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM events WHERE kind = 'intrusion' AND timestamp > ? LIMIT 1",
                    params![cutoff],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            if recent.is_some() {
                debug!(
                    "Skipping intrusion event: another occurred within {}s",
                    self.debounce.num_seconds()
                );
                return Ok(false);
            }
        }

        let attrs_json = serde_json::to_string(attributes)?;
        conn.execute(
            "INSERT INTO events (timestamp, kind, source, attrs) VALUES (?, ?, ?, ?)",
            params![now_str, kind.as_str(), source, attrs_json],
        )?;
        info!(
            "Event recorded: kind={} source={} at {}",
            kind, source, now_str
        );
        Ok(true)
    }

    /// Returns all events of a kind inside `[range.start, range.end)`,
    /// ascending by timestamp then id.
    pub fn query(&self, kind: EventKind, range: &TimeRange) -> CoreResult<Vec<Event>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, kind, source, attrs FROM events \
             WHERE kind = ? AND timestamp >= ? AND timestamp < ? \
             ORDER BY timestamp, id",
        )?;
        let rows = stmt.query_map(
            params![kind.as_str(), to_sql_time(range.start), to_sql_time(range.end)],
            row_to_raw,
        )?;
        rows.collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(raw_to_event)
            .collect()
    }

    /// All intrusion events on a UTC calendar date, ascending.
    pub fn intrusion_events(&self, date: NaiveDate) -> CoreResult<Vec<Event>> {
        let start = date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc();
        let range = TimeRange::new(start, start + Duration::days(1));
        self.query(EventKind::Intrusion, &range)
    }

    /// Distinct UTC dates that have intrusion events, most recent first.
    pub fn intrusion_dates(&self) -> CoreResult<Vec<String>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT date(timestamp) FROM events \
             WHERE kind = 'intrusion' ORDER BY 1 DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

type RawEvent = (i64, String, String, String, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn raw_to_event((id, ts, kind, source, attrs): RawEvent) -> CoreResult<Event> {
    let timestamp = from_sql_time(&ts)
        .ok_or_else(|| CoreError::Validation(format!("malformed stored timestamp: {}", ts)))?;
    let kind = EventKind::parse(&kind)
        .ok_or_else(|| CoreError::Validation(format!("unknown stored event kind: {}", kind)))?;
    let attributes: Attributes = serde_json::from_str(&attrs)?;
    Ok(Event {
        id,
        timestamp,
        kind,
        source,
        attributes,
    })
}
