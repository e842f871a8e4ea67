//! The two durable timeline logs (§6 "On-disk formats"): every agent
//! keeps a `local.db` append log of its own `TimelineEvent`s; masters
//! additionally keep a `cluster.db` aggregating events pushed by every
//! peer, gated by a per-peer last-seen watermark (I4, §4.E point 3).
//!
//! Grounded in `nimbus_kv::embedded::Embedded`'s use of a single
//! `rusqlite::Connection` behind a `Mutex` per state file; unlike the KV
//! store these logs are queried by time range rather than by key, so
//! they get their own dedicated schema instead of reusing `KvStore`.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::HealthError;
use crate::types::TimelineEvent;

fn millis(ts: chrono::DateTime<chrono::Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
}

/// The append-only log every agent keeps of its own `TimelineEvent`s.
pub struct LocalTimeline {
    conn: Mutex<Connection>,
}

impl LocalTimeline {
    pub fn open(path: &Path) -> Result<LocalTimeline, HealthError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<LocalTimeline, HealthError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<LocalTimeline, HealthError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS local_timeline (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                kind TEXT NOT NULL,
                metadata TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS local_timeline_ts ON local_timeline(timestamp_ms)",
            [],
        )?;
        Ok(LocalTimeline {
            conn: Mutex::new(conn),
        })
    }

    /// Appends `events` in order. Rejects (I4) any event whose timestamp
    /// is earlier than the most recently appended one.
    pub fn append(&self, events: &[TimelineEvent]) -> Result<(), HealthError> {
        let conn = self.conn.lock().unwrap();
        let last: Option<i64> = conn
            .query_row(
                "SELECT MAX(timestamp_ms) FROM local_timeline",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let mut watermark = last.unwrap_or(i64::MIN);
        for event in events {
            let ts = millis(event.timestamp);
            if ts < watermark {
                return Err(HealthError::StaleEvent(event.timestamp));
            }
            conn.execute(
                "INSERT INTO local_timeline (timestamp_ms, kind, metadata) VALUES (?1, ?2, ?3)",
                params![ts, event.kind, event.metadata.to_string()],
            )?;
            watermark = ts;
        }
        Ok(())
    }

    /// Returns events with `timestamp >= since`, oldest first.
    pub fn since(&self, since: chrono::DateTime<chrono::Utc>) -> Result<Vec<TimelineEvent>, HealthError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT timestamp_ms, kind, metadata FROM local_timeline
             WHERE timestamp_ms >= ?1 ORDER BY timestamp_ms ASC",
        )?;
        let rows = stmt
            .query_map(params![millis(since)], row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimelineEvent> {
    let ts_ms: i64 = row.get(0)?;
    let kind: String = row.get(1)?;
    let metadata_text: String = row.get(2)?;
    let metadata = serde_json::from_str(&metadata_text).unwrap_or(serde_json::Value::Null);
    Ok(TimelineEvent::new(from_millis(ts_ms), kind, metadata))
}

/// The master-only aggregated log. Each peer's pushed events are
/// accepted only if strictly newer than that peer's last recorded
/// watermark; accepted events are appended and the watermark advances.
pub struct ClusterTimeline {
    conn: Mutex<Connection>,
}

impl ClusterTimeline {
    pub fn open(path: &Path) -> Result<ClusterTimeline, HealthError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<ClusterTimeline, HealthError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<ClusterTimeline, HealthError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cluster_timeline (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                peer TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                kind TEXT NOT NULL,
                metadata TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS cluster_timeline_ts ON cluster_timeline(timestamp_ms)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS peer_watermark (
                peer TEXT PRIMARY KEY,
                last_seen_ms INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(ClusterTimeline {
            conn: Mutex::new(conn),
        })
    }

    /// The watermark a peer should resend events after: the timestamp of
    /// the most recent event this master has already accepted from it,
    /// or `None` if the peer has never pushed anything.
    pub fn last_seen(&self, peer: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>, HealthError> {
        let conn = self.conn.lock().unwrap();
        let ms: Option<i64> = conn
            .query_row(
                "SELECT last_seen_ms FROM peer_watermark WHERE peer = ?1",
                params![peer],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ms.map(from_millis))
    }

    /// Accepts `events` pushed by `peer`. Any event whose timestamp is
    /// not strictly newer than the peer's stored watermark is rejected
    /// with `StaleEvent`; accepted events advance the watermark.
    pub fn accept(&self, peer: &str, events: &[TimelineEvent]) -> Result<(), HealthError> {
        let conn = self.conn.lock().unwrap();
        let watermark: Option<i64> = conn
            .query_row(
                "SELECT last_seen_ms FROM peer_watermark WHERE peer = ?1",
                params![peer],
                |row| row.get(0),
            )
            .optional()?;
        let mut watermark = watermark.unwrap_or(i64::MIN);

        for event in events {
            let ts = millis(event.timestamp);
            if ts <= watermark && watermark != i64::MIN {
                return Err(HealthError::StaleEvent(event.timestamp));
            }
            conn.execute(
                "INSERT INTO cluster_timeline (peer, timestamp_ms, kind, metadata)
                 VALUES (?1, ?2, ?3, ?4)",
                params![peer, ts, event.kind, event.metadata.to_string()],
            )?;
            watermark = ts;
        }

        conn.execute(
            "INSERT INTO peer_watermark (peer, last_seen_ms) VALUES (?1, ?2)
             ON CONFLICT(peer) DO UPDATE SET last_seen_ms = excluded.last_seen_ms",
            params![peer, watermark],
        )?;
        Ok(())
    }

    /// Returns events with `timestamp >= since`, oldest first, optionally
    /// scoped to a single `peer`.
    pub fn since(
        &self,
        since: chrono::DateTime<chrono::Utc>,
        peer: Option<&str>,
    ) -> Result<Vec<TimelineEvent>, HealthError> {
        let conn = self.conn.lock().unwrap();
        match peer {
            Some(peer) => {
                let mut stmt = conn.prepare(
                    "SELECT timestamp_ms, kind, metadata FROM cluster_timeline
                     WHERE timestamp_ms >= ?1 AND peer = ?2 ORDER BY timestamp_ms ASC",
                )?;
                Ok(stmt
                    .query_map(params![millis(since), peer], row_to_event)?
                    .collect::<Result<Vec<_>, _>>()?)
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT timestamp_ms, kind, metadata FROM cluster_timeline
                     WHERE timestamp_ms >= ?1 ORDER BY timestamp_ms ASC",
                )?;
                Ok(stmt
                    .query_map(params![millis(since)], row_to_event)?
                    .collect::<Result<Vec<_>, _>>()?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(secs: i64, kind: &str) -> TimelineEvent {
        TimelineEvent::new(
            chrono::DateTime::from_timestamp(secs, 0).unwrap(),
            kind,
            serde_json::json!({}),
        )
    }

    #[test]
    fn local_timeline_appends_in_order_and_rejects_regressions() {
        let timeline = LocalTimeline::open_in_memory().unwrap();
        timeline.append(&[event(100, "a"), event(200, "b")]).unwrap();
        let err = timeline.append(&[event(150, "c")]).unwrap_err();
        assert!(matches!(err, HealthError::StaleEvent(_)));
        let events = timeline.since(chrono::DateTime::from_timestamp(0, 0).unwrap()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn cluster_timeline_enforces_per_peer_watermark_monotonicity() {
        let timeline = ClusterTimeline::open_in_memory().unwrap();
        timeline.accept("node-1", &[event(100, "a")]).unwrap();
        assert!(timeline.accept("node-1", &[event(100, "dup")]).is_err());
        timeline.accept("node-1", &[event(200, "b")]).unwrap();
        let events = timeline
            .since(chrono::DateTime::from_timestamp(0, 0).unwrap(), Some("node-1"))
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn watermarks_are_tracked_independently_per_peer() {
        let timeline = ClusterTimeline::open_in_memory().unwrap();
        timeline.accept("node-1", &[event(500, "a")]).unwrap();
        timeline.accept("node-2", &[event(100, "b")]).unwrap();
        assert_eq!(
            timeline.last_seen("node-1").unwrap(),
            Some(chrono::DateTime::from_timestamp(500, 0).unwrap())
        );
        assert_eq!(
            timeline.last_seen("node-2").unwrap(),
            Some(chrono::DateTime::from_timestamp(100, 0).unwrap())
        );
    }
}
