use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use super::{StageAverages, TelemetryError, TelemetryRow, TelemetryStore};

// Timestamps are stored fixed-width so the window filter can compare them as text
const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS command_telemetry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        recorded_at TEXT NOT NULL,
        command_text TEXT NOT NULL,
        stage_1_ms INTEGER NOT NULL DEFAULT 0,
        stage_2_ms INTEGER NOT NULL DEFAULT 0,
        stage_3_ms INTEGER NOT NULL DEFAULT 0,
        stage_4_ms INTEGER NOT NULL DEFAULT 0,
        stage_5_ms INTEGER NOT NULL DEFAULT 0,
        stage_6_ms INTEGER NOT NULL DEFAULT 0,
        matched_count INTEGER NOT NULL,
        affected_count INTEGER NOT NULL,
        accepted INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_command_telemetry_recorded_at ON command_telemetry(recorded_at);
"#;

/// SQLite-backed telemetry store
pub struct SqliteTelemetryStore {
    conn: Mutex<Connection>,
}

impl SqliteTelemetryStore {
    /// Create a new SQLite telemetry store, creating the database file and table if needed
    pub fn new(path: &Path) -> Result<Self, TelemetryError> {
        let conn = Connection::open(path).map_err(|e| TelemetryError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| TelemetryError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| TelemetryError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite telemetry store (useful for testing)
    pub fn in_memory() -> Result<Self, TelemetryError> {
        let conn =
            Connection::open_in_memory().map_err(|e| TelemetryError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| TelemetryError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TelemetryError> {
        self.conn
            .lock()
            .map_err(|_| TelemetryError::Database("connection lock poisoned".to_string()))
    }
}

impl TelemetryStore for SqliteTelemetryStore {
    fn append(&self, row: &TelemetryRow) -> Result<i64, TelemetryError> {
        let conn = self.lock()?;
        let d = row.stage_durations_ms.map(|ms| ms as i64);

        conn.execute(
            "INSERT INTO command_telemetry (recorded_at, command_text, stage_1_ms, stage_2_ms, stage_3_ms, stage_4_ms, stage_5_ms, stage_6_ms, matched_count, affected_count, accepted) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                row.recorded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                row.command_text,
                d[0],
                d[1],
                d[2],
                d[3],
                d[4],
                d[5],
                row.matched_count as i64,
                row.affected_count as i64,
                row.accepted,
            ],
        )
        .map_err(|e| TelemetryError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn stage_averages(&self, since: DateTime<Utc>) -> Result<StageAverages, TelemetryError> {
        let conn = self.lock()?;

        // NULLIF keeps unreached stages out of the mean
        conn.query_row(
            "SELECT COUNT(*), AVG(NULLIF(stage_1_ms, 0)), AVG(NULLIF(stage_2_ms, 0)), AVG(NULLIF(stage_3_ms, 0)), AVG(NULLIF(stage_4_ms, 0)), AVG(NULLIF(stage_5_ms, 0)), AVG(NULLIF(stage_6_ms, 0)) FROM command_telemetry WHERE recorded_at >= ?",
            params![since.to_rfc3339_opts(SecondsFormat::Millis, true)],
            |row| {
                let samples: i64 = row.get(0)?;
                Ok(StageAverages {
                    means_ms: [
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ],
                    samples: samples.max(0) as u64,
                })
            },
        )
        .map_err(|e| TelemetryError::Database(e.to_string()))
    }

    fn recent(&self, limit: i64) -> Result<Vec<TelemetryRow>, TelemetryError> {
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(
                "SELECT recorded_at, command_text, stage_1_ms, stage_2_ms, stage_3_ms, stage_4_ms, stage_5_ms, stage_6_ms, matched_count, affected_count, accepted FROM command_telemetry ORDER BY id DESC LIMIT ?",
            )
            .map_err(|e| TelemetryError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit], |row| {
                let recorded_at: String = row.get(0)?;
                let mut durations = [0u64; 6];
                for (i, slot) in durations.iter_mut().enumerate() {
                    let ms: i64 = row.get(2 + i)?;
                    *slot = ms.max(0) as u64;
                }
                let matched: i64 = row.get(8)?;
                let affected: i64 = row.get(9)?;
                Ok(TelemetryRow {
                    command_text: row.get(1)?,
                    stage_durations_ms: durations,
                    matched_count: matched.max(0) as usize,
                    affected_count: affected.max(0) as usize,
                    accepted: row.get(10)?,
                    recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| TelemetryError::Database(e.to_string()))?;

        let mut out = Vec::new();
        for row_result in rows {
            out.push(row_result.map_err(|e| TelemetryError::Database(e.to_string()))?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn row(durations: [u64; 6], accepted: bool, recorded_at: DateTime<Utc>) -> TelemetryRow {
        TelemetryRow {
            command_text: "close all waiting tickets".to_string(),
            stage_durations_ms: durations,
            matched_count: 3,
            affected_count: 3,
            accepted,
            recorded_at,
        }
    }

    #[test]
    fn test_append_and_recent() {
        let store = SqliteTelemetryStore::in_memory().unwrap();
        let now = Utc::now();

        let id1 = store.append(&row([1, 2, 3, 4, 5, 6], true, now)).unwrap();
        let id2 = store.append(&row([6, 5, 4, 3, 2, 1], false, now)).unwrap();
        assert!(id2 > id1);

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].stage_durations_ms, [6, 5, 4, 3, 2, 1]);
        assert!(!recent[0].accepted);
        assert!(recent[1].accepted);
        assert_eq!(recent[1].matched_count, 3);
    }

    #[test]
    fn test_stage_averages_empty() {
        let store = SqliteTelemetryStore::in_memory().unwrap();
        let averages = store
            .stage_averages(Utc::now() - ChronoDuration::days(7))
            .unwrap();
        assert_eq!(averages.samples, 0);
        assert!(averages.means_ms.iter().all(Option::is_none));
    }

    #[test]
    fn test_stage_averages_skip_unreached_stages() {
        let store = SqliteTelemetryStore::in_memory().unwrap();
        let now = Utc::now();
        store.append(&row([100, 200, 300, 0, 0, 50], true, now)).unwrap();
        store.append(&row([300, 400, 500, 600, 700, 150], true, now)).unwrap();

        let averages = store
            .stage_averages(now - ChronoDuration::days(7))
            .unwrap();
        assert_eq!(averages.samples, 2);
        assert_eq!(averages.means_ms[0], Some(200.0));
        assert_eq!(averages.means_ms[3], Some(600.0));
        assert_eq!(averages.means_ms[4], Some(700.0));
        assert_eq!(averages.means_ms[5], Some(100.0));
    }

    #[test]
    fn test_stage_averages_respect_window() {
        let store = SqliteTelemetryStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .append(&row([9_000; 6], true, now - ChronoDuration::days(30)))
            .unwrap();
        store.append(&row([100; 6], true, now)).unwrap();

        let averages = store
            .stage_averages(now - ChronoDuration::days(7))
            .unwrap();
        assert_eq!(averages.samples, 1);
        assert_eq!(averages.means_ms[2], Some(100.0));
    }
}
