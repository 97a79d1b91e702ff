use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_mode, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{ScanSession, ScanSessionStatus},
};

const SESSION_COLUMNS: &str =
    "id, mode, status, started_at, stopped_at, known_tags, unknown_tags, total_sightings";

fn row_to_scan_session(row: &Row) -> Result<ScanSession> {
    let mode: String = row.get("mode")?;
    let status: String = row.get("status")?;
    let started_at: String = row.get("started_at")?;
    let stopped_at: Option<String> = row.get("stopped_at")?;

    Ok(ScanSession {
        id: row.get("id")?,
        mode: parse_mode(&mode)?,
        status: parse_status(&status)?,
        started_at: parse_datetime(&started_at, "started_at")?,
        stopped_at: parse_optional_datetime(stopped_at, "stopped_at")?,
        known_tags: to_u64(row.get("known_tags")?, "known_tags")?,
        unknown_tags: to_u64(row.get("unknown_tags")?, "unknown_tags")?,
        total_sightings: to_u64(row.get("total_sightings")?, "total_sightings")?,
    })
}

impl Database {
    pub async fn insert_scan_session(&self, session: &ScanSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO scan_sessions (id, mode, status, started_at, stopped_at, known_tags, unknown_tags, total_sightings)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record.mode.as_str(),
                    record.status.as_str(),
                    record.started_at.to_rfc3339(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    to_i64(record.known_tags)?,
                    to_i64(record.unknown_tags)?,
                    to_i64(record.total_sightings)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Write the final tallies and close the session.
    pub async fn finish_scan_session(&self, session: &ScanSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = ?1,
                     stopped_at = ?2,
                     known_tags = ?3,
                     unknown_tags = ?4,
                     total_sightings = ?5
                 WHERE id = ?6",
                params![
                    record.status.as_str(),
                    record.stopped_at.as_ref().map(|dt| dt.to_rfc3339()),
                    to_i64(record.known_tags)?,
                    to_i64(record.unknown_tags)?,
                    to_i64(record.total_sightings)?,
                    record.id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_scan_session(&self, session_id: &str) -> Result<Option<ScanSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM scan_sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_scan_session(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Most recent sessions first.
    pub async fn list_scan_sessions(&self, limit: u32) -> Result<Vec<ScanSession>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM scan_sessions ORDER BY started_at DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query(params![limit])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_scan_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn get_incomplete_scan_sessions(&self) -> Result<Vec<ScanSession>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM scan_sessions
                 WHERE status = 'Running'
                 ORDER BY started_at DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_scan_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn mark_scan_session_interrupted(
        &self,
        session_id: &str,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE scan_sessions
                 SET status = ?1, stopped_at = ?2
                 WHERE id = ?3",
                params![
                    ScanSessionStatus::Interrupted.as_str(),
                    stopped_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }
}
