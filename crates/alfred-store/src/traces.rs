//! One row per agent invocation — the observability trail behind every
//! proposal (and every decision not to propose).

use alfred_core::types::{Source, UserId};
use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisTrace {
    pub id: i64,
    pub user_id: UserId,
    pub channel_id: i64,
    pub source: Source,
    pub trigger_message_id: Option<i64>,
    pub intent: String,
    pub router_confidence: f64,
    pub action: String,
    pub confidence: f64,
    pub reasoning: String,
    pub status: String,
    pub details_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewTrace {
    pub user_id: UserId,
    pub channel_id: i64,
    pub source: Source,
    pub trigger_message_id: Option<i64>,
    pub intent: String,
    pub router_confidence: f64,
    pub action: String,
    pub confidence: f64,
    pub reasoning: String,
    pub status: String,
    pub details: serde_json::Value,
}

fn row_to_trace(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalysisTrace> {
    use std::str::FromStr;
    let source: String = row.get(3)?;
    Ok(AnalysisTrace {
        id: row.get(0)?,
        user_id: UserId::from(row.get::<_, String>(1)?),
        channel_id: row.get(2)?,
        source: Source::from_str(&source).unwrap_or(Source::Whatsapp),
        trigger_message_id: row.get(4)?,
        intent: row.get(5)?,
        router_confidence: row.get(6)?,
        action: row.get(7)?,
        confidence: row.get(8)?,
        reasoning: row.get(9)?,
        status: row.get(10)?,
        details_json: row.get(11)?,
        created_at: row.get(12)?,
    })
}

const TRACE_COLUMNS: &str = "id, user_id, channel_id, source_type, trigger_message_id, intent, \
     router_confidence, action, confidence, reasoning, status, details_json, created_at";

impl Store {
    pub fn insert_trace(&self, trace: NewTrace) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO analysis_traces
                 (user_id, channel_id, source_type, trigger_message_id, intent,
                  router_confidence, action, confidence, reasoning, status,
                  details_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                trace.user_id.as_str(),
                trace.channel_id,
                trace.source.as_str(),
                trace.trigger_message_id,
                trace.intent,
                trace.router_confidence,
                trace.action,
                trace.confidence,
                trace.reasoning,
                trace.status,
                trace.details.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_traces(
        &self,
        user_id: &UserId,
        channel_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<AnalysisTrace>> {
        let conn = self.conn();
        let sql = if channel_id.is_some() {
            format!(
                "SELECT {TRACE_COLUMNS} FROM analysis_traces
                 WHERE user_id = ?1 AND channel_id = ?2
                 ORDER BY created_at DESC LIMIT ?3"
            )
        } else {
            format!(
                "SELECT {TRACE_COLUMNS} FROM analysis_traces
                 WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2"
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = match channel_id {
            Some(c) => stmt.query_map(
                rusqlite::params![user_id.as_str(), c, limit as i64],
                row_to_trace,
            )?,
            None => stmt.query_map(
                rusqlite::params![user_id.as_str(), limit as i64],
                row_to_trace,
            )?,
        }
        .filter_map(|r| r.ok())
        .collect();
        Ok(rows)
    }
}
