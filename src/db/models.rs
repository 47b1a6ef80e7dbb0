//! Database row types for the `analysis_sessions` table.
//! Shared by the SQLite and PostgreSQL backends; timestamps are epoch milliseconds.
use chrono::{DateTime, Utc};
use serde_json::value::RawValue;
use sqlx::{Database, Encode, QueryBuilder, Type};

use crate::db::store::StoreError;
use crate::types::{AnalysisSession, Platform, SessionPatch, SessionStatus};

pub const SESSION_COLUMNS: &str = "id, user_id, market_url, platform, market_identifier, \
     market_question, status, started_at, completed_at, progress_events, forecast_card, \
     markdown_report, p0, p_neutral, p_aware, drivers, duration_seconds, cost, error_message";

/// Guard appended to conditional updates.
pub const OPEN_STATUS_GUARD: &str = " AND status NOT IN ('completed', 'failed', 'abandoned')";

#[derive(Debug, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub market_url: String,
    pub platform: Option<String>,
    pub market_identifier: String,
    pub market_question: Option<String>,
    pub status: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub progress_events: Option<String>,
    pub forecast_card: Option<String>,
    pub markdown_report: Option<String>,
    pub p0: Option<f64>,
    pub p_neutral: Option<f64>,
    pub p_aware: Option<f64>,
    pub drivers: Option<String>,
    pub duration_seconds: Option<i64>,
    pub cost: Option<f64>,
    pub error_message: Option<String>,
}

impl TryFrom<SessionRow> for AnalysisSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };

        let status = match row.status.as_deref() {
            None => SessionStatus::Pending,
            Some(s) => SessionStatus::parse(s).ok_or_else(|| corrupt(format!("unknown status '{s}'")))?,
        };
        let started_at = millis_to_utc(row.started_at)
            .ok_or_else(|| corrupt(format!("started_at out of range: {}", row.started_at)))?;
        let completed_at = match row.completed_at {
            Some(ms) => Some(
                millis_to_utc(ms).ok_or_else(|| corrupt(format!("completed_at out of range: {ms}")))?,
            ),
            None => None,
        };
        let progress_events = raw_json(row.progress_events.clone()).map_err(corrupt)?;
        let forecast_card = raw_json(row.forecast_card.clone()).map_err(corrupt)?;
        let drivers = raw_json(row.drivers.clone()).map_err(corrupt)?;

        Ok(AnalysisSession {
            platform: row
                .platform
                .as_deref()
                .map(Platform::from_stored)
                .unwrap_or(Platform::Polymarket),
            id: row.id,
            user_id: row.user_id,
            market_url: row.market_url,
            market_identifier: row.market_identifier,
            market_question: row.market_question,
            status,
            started_at,
            completed_at,
            progress_events,
            forecast_card,
            markdown_report: row.markdown_report,
            p0: row.p0,
            p_neutral: row.p_neutral,
            p_aware: row.p_aware,
            drivers,
            duration_seconds: row.duration_seconds,
            cost: row.cost,
            error_message: row.error_message,
        })
    }
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

fn raw_json(text: Option<String>) -> Result<Option<Box<RawValue>>, String> {
    text.map(|t| RawValue::from_string(t).map_err(|e| format!("invalid JSON column: {e}")))
        .transpose()
}

/// Append `col = value` pairs for every field present in `patch`.
///
/// `updated_at` is always written, so the SET list is never empty.
pub fn push_patch<'args, DB>(qb: &mut QueryBuilder<'args, DB>, patch: &SessionPatch, updated_at: i64)
where
    DB: Database,
    String: Encode<'args, DB> + Type<DB>,
    f64: Encode<'args, DB> + Type<DB>,
    i64: Encode<'args, DB> + Type<DB>,
{
    qb.push("updated_at = ");
    qb.push_bind(updated_at);

    if let Some(status) = patch.status {
        qb.push(", status = ");
        qb.push_bind(status.as_str().to_string());
    }
    if let Some(at) = patch.completed_at {
        qb.push(", completed_at = ");
        qb.push_bind(at.timestamp_millis());
    }
    if let Some(q) = &patch.market_question {
        qb.push(", market_question = ");
        qb.push_bind(q.clone());
    }
    if let Some(events) = &patch.progress_events {
        qb.push(", progress_events = ");
        qb.push_bind(events.get().to_string());
    }
    if let Some(card) = &patch.forecast_card {
        qb.push(", forecast_card = ");
        qb.push_bind(card.get().to_string());
    }
    if let Some(report) = &patch.markdown_report {
        qb.push(", markdown_report = ");
        qb.push_bind(report.clone());
    }
    if let Some(p) = patch.p0 {
        qb.push(", p0 = ");
        qb.push_bind(p);
    }
    if let Some(p) = patch.p_neutral {
        qb.push(", p_neutral = ");
        qb.push_bind(p);
    }
    if let Some(p) = patch.p_aware {
        qb.push(", p_aware = ");
        qb.push_bind(p);
    }
    if let Some(drivers) = &patch.drivers {
        qb.push(", drivers = ");
        qb.push_bind(drivers.get().to_string());
    }
    if let Some(secs) = patch.duration_seconds {
        qb.push(", duration_seconds = ");
        qb.push_bind(secs);
    }
    if let Some(cost) = patch.cost {
        qb.push(", cost = ");
        qb.push_bind(cost);
    }
    if let Some(msg) = &patch.error_message {
        qb.push(", error_message = ");
        qb.push_bind(msg.clone());
    }
}
