//! SQLite history of face detection events.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use openeye_core::{FaceLocation, UNKNOWN_PERSON};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

pub const MAX_LIMIT: u32 = 500;
pub const MIN_DAYS_TO_KEEP: u32 = 7;
const TIMELINE_EVENTS: u32 = 1000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS face_detection_events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id       TEXT    NOT NULL,
    person_name     TEXT    NOT NULL,
    confidence      REAL    NOT NULL,
    detected_at     TEXT    NOT NULL,
    location_top    INTEGER NOT NULL,
    location_right  INTEGER NOT NULL,
    location_bottom INTEGER NOT NULL,
    location_left   INTEGER NOT NULL,
    motion_detected INTEGER NOT NULL DEFAULT 0,
    recording_path  TEXT,
    snapshot_path   TEXT
);
CREATE INDEX IF NOT EXISTS idx_face_events_detected_at ON face_detection_events (detected_at);
CREATE INDEX IF NOT EXISTS idx_face_events_person ON face_detection_events (person_name);
";

const COLUMNS: &str = "id, camera_id, person_name, confidence, detected_at, location_top, location_right, \
                       location_bottom, location_left, motion_detected, recording_path, snapshot_path";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("limit must be between 1 and {MAX_LIMIT}, got {0}")]
    InvalidLimit(u32),
    #[error("Cannot delete data newer than {MIN_DAYS_TO_KEEP} days")]
    RetentionTooShort(u32),
    #[error("time window of {0} {1} is out of range")]
    InvalidRange(u32, &'static str),
}

/// A detection to persist.
#[derive(Debug, Clone)]
pub struct NewDetection {
    pub camera_id: String,
    pub person_name: String,
    pub confidence: f32,
    pub location: FaceLocation,
    pub motion_detected: bool,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceDetectionEvent {
    pub id: i64,
    pub camera_id: String,
    pub person_name: String,
    pub confidence: f32,
    pub detected_at: DateTime<Utc>,
    pub location: FaceLocation,
    pub motion_detected: bool,
    pub recording_path: Option<String>,
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionStatistics {
    pub total_detections: u64,
    pub unique_people: u64,
    pub most_detected_person: Option<String>,
    pub time_period_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineHour {
    /// `YYYY-MM-DD HH:00`, UTC.
    pub hour: String,
    pub total_detections: u64,
    pub unique_people: u64,
    pub known_faces: u64,
    pub unknown_faces: u64,
}

/// Filters for [`DetectionStore::recent_detections`].
#[derive(Debug, Clone, Default)]
pub struct RecentQuery {
    pub camera_id: Option<String>,
    pub person_name: Option<String>,
    pub limit: u32,
    pub hours: u32,
}

/// Fixed-width UTC timestamps so text comparison orders by time.
fn stamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Start of a window reaching `span` back from now, stamped for comparison.
fn window_start(span: Option<Duration>, amount: u32, unit: &'static str) -> Result<String, StoreError> {
    span.and_then(|span| Utc::now().checked_sub_signed(span))
        .map(|t| stamp(&t))
        .ok_or(StoreError::InvalidRange(amount, unit))
}

fn check_limit(limit: u32) -> Result<u32, StoreError> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(StoreError::InvalidLimit(limit));
    }
    Ok(limit)
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<FaceDetectionEvent> {
    let detected_at: String = row.get(4)?;
    let detected_at = DateTime::parse_from_rfc3339(&detected_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(FaceDetectionEvent {
        id: row.get(0)?,
        camera_id: row.get(1)?,
        person_name: row.get(2)?,
        confidence: row.get::<_, f64>(3)? as f32,
        detected_at,
        location: FaceLocation {
            top: row.get(5)?,
            right: row.get(6)?,
            bottom: row.get(7)?,
            left: row.get(8)?,
        },
        motion_detected: row.get(9)?,
        recording_path: row.get(10)?,
        snapshot_path: row.get(11)?,
    })
}

/// Async handle to the events database. Cheap to clone.
#[derive(Clone)]
pub struct DetectionStore {
    conn: tokio_rusqlite::Connection,
}

impl DetectionStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        tracing::info!(path = %path.display(), "opened detection history");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn record_detection(&self, det: NewDetection) -> Result<FaceDetectionEvent, StoreError> {
        let event = self
            .conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO face_detection_events (camera_id, person_name, confidence, detected_at, \
                     location_top, location_right, location_bottom, location_left, motion_detected) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        det.camera_id,
                        det.person_name,
                        det.confidence as f64,
                        stamp(&det.detected_at),
                        det.location.top,
                        det.location.right,
                        det.location.bottom,
                        det.location.left,
                        det.motion_detected,
                    ],
                )?;
                let id = c.last_insert_rowid();
                let event = c.query_row(
                    &format!("SELECT {COLUMNS} FROM face_detection_events WHERE id = ?1"),
                    [id],
                    event_from_row,
                )?;
                Ok(event)
            })
            .await?;
        tracing::debug!(id = event.id, camera = %event.camera_id, person = %event.person_name, "recorded detection");
        Ok(event)
    }

    /// Events within the last `hours`, newest first.
    pub async fn recent_detections(&self, query: RecentQuery) -> Result<Vec<FaceDetectionEvent>, StoreError> {
        let limit = check_limit(query.limit)?;
        self.recent_unchecked(query.camera_id, query.person_name, limit, query.hours).await
    }

    async fn recent_unchecked(
        &self,
        camera_id: Option<String>,
        person_name: Option<String>,
        limit: u32,
        hours: u32,
    ) -> Result<Vec<FaceDetectionEvent>, StoreError> {
        let since = window_start(Duration::try_hours(hours as i64), hours, "hours")?;
        let events = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(&format!(
                    "SELECT {COLUMNS} FROM face_detection_events \
                     WHERE detected_at >= ?1 \
                       AND (?2 IS NULL OR camera_id = ?2) \
                       AND (?3 IS NULL OR person_name = ?3) \
                     ORDER BY detected_at DESC, id DESC LIMIT ?4"
                ))?;
                let rows = stmt
                    .query_map(params![since, camera_id, person_name, limit], event_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(events)
    }

    /// Totals over the last `days`. "Unknown" faces count towards the total
    /// but not towards people.
    pub async fn statistics(&self, camera_id: Option<String>, days: u32) -> Result<DetectionStatistics, StoreError> {
        let since = window_start(Duration::try_days(days as i64), days, "days")?;
        let stats = self
            .conn
            .call(move |c| {
                let total: i64 = c.query_row(
                    "SELECT COUNT(*) FROM face_detection_events \
                     WHERE detected_at >= ?1 AND (?2 IS NULL OR camera_id = ?2)",
                    params![since, camera_id],
                    |r| r.get(0),
                )?;
                let unique: i64 = c.query_row(
                    "SELECT COUNT(DISTINCT person_name) FROM face_detection_events \
                     WHERE detected_at >= ?1 AND (?2 IS NULL OR camera_id = ?2) AND person_name != ?3",
                    params![since, camera_id, UNKNOWN_PERSON],
                    |r| r.get(0),
                )?;
                let most: Option<String> = c
                    .query_row(
                        "SELECT person_name FROM face_detection_events \
                         WHERE detected_at >= ?1 AND (?2 IS NULL OR camera_id = ?2) AND person_name != ?3 \
                         GROUP BY person_name ORDER BY COUNT(*) DESC, person_name ASC LIMIT 1",
                        params![since, camera_id, UNKNOWN_PERSON],
                        |r| r.get(0),
                    )
                    .optional()?;
                Ok(DetectionStatistics {
                    total_detections: total as u64,
                    unique_people: unique as u64,
                    most_detected_person: most,
                    time_period_days: days,
                })
            })
            .await?;
        Ok(stats)
    }

    /// Every event for one person, newest first.
    pub async fn person_history(&self, person_name: String, limit: u32) -> Result<Vec<FaceDetectionEvent>, StoreError> {
        let limit = check_limit(limit)?;
        let events = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(&format!(
                    "SELECT {COLUMNS} FROM face_detection_events WHERE person_name = ?1 \
                     ORDER BY detected_at DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![person_name, limit], event_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(events)
    }

    /// Hourly buckets over the last `hours`, oldest first.
    pub async fn timeline(&self, camera_id: Option<String>, hours: u32) -> Result<Vec<TimelineHour>, StoreError> {
        let events = self.recent_unchecked(camera_id, None, TIMELINE_EVENTS, hours).await?;
        Ok(bucket_by_hour(&events))
    }

    /// Delete events older than `days_to_keep` days. Returns the number removed.
    pub async fn cleanup(&self, days_to_keep: u32) -> Result<usize, StoreError> {
        if days_to_keep < MIN_DAYS_TO_KEEP {
            return Err(StoreError::RetentionTooShort(days_to_keep));
        }
        let cutoff = window_start(Duration::try_days(days_to_keep as i64), days_to_keep, "days")?;
        let deleted = self
            .conn
            .call(move |c| Ok(c.execute("DELETE FROM face_detection_events WHERE detected_at < ?1", [cutoff])?))
            .await?;
        tracing::info!(deleted, days_to_keep, "cleaned up detection history");
        Ok(deleted)
    }
}

fn bucket_by_hour(events: &[FaceDetectionEvent]) -> Vec<TimelineHour> {
    let mut buckets: BTreeMap<String, (TimelineHour, HashSet<&str>)> = BTreeMap::new();
    for event in events {
        let hour = event.detected_at.format("%Y-%m-%d %H:00").to_string();
        let (bucket, people) = buckets.entry(hour.clone()).or_insert_with(|| {
            (
                TimelineHour {
                    hour,
                    total_detections: 0,
                    unique_people: 0,
                    known_faces: 0,
                    unknown_faces: 0,
                },
                HashSet::new(),
            )
        });
        bucket.total_detections += 1;
        people.insert(event.person_name.as_str());
        if event.person_name == UNKNOWN_PERSON {
            bucket.unknown_faces += 1;
        } else {
            bucket.known_faces += 1;
        }
    }
    buckets
        .into_values()
        .map(|(mut bucket, people)| {
            bucket.unique_people = people.len() as u64;
            bucket
        })
        .collect()
}
