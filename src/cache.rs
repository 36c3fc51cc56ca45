use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::trace;

use crate::errors::{AppError, AppResult};
use crate::location::{LocationResult, OriginTag};

/// A previously geocoded location text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedLocation {
    pub id: i64,
    pub query_text: String,
    pub result: LocationResult,
    pub created_at: Option<DateTime<Utc>>,
}

/// Insert-only store of resolved location texts, keyed by the exact text.
pub trait LocationCache: Send + Sync {
    fn get(&self, query_text: &str) -> AppResult<Option<CachedLocation>>;

    fn insert(&self, result: &LocationResult, query_text: &str) -> AppResult<i64>;
}

pub struct SqliteLocationCache {
    db: Arc<Mutex<Connection>>,
}

impl SqliteLocationCache {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn len(&self) -> AppResult<usize> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cached_locations", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl LocationCache for SqliteLocationCache {
    fn get(&self, query_text: &str) -> AppResult<Option<CachedLocation>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, query_text, latitude, longitude, place_name, location_type, loc_origin, created_at
            FROM cached_locations
            WHERE query_text = ?1
            ORDER BY id ASC
            LIMIT 1",
            [query_text],
            parse_cached_location,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn insert(&self, result: &LocationResult, query_text: &str) -> AppResult<i64> {
        let id = {
            let conn = self.db.lock();
            conn.execute(
                "INSERT INTO cached_locations
                    (query_text, latitude, longitude, place_name, location_type, loc_origin, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, DATETIME('now'))",
                (
                    query_text,
                    result.latitude,
                    result.longitude,
                    result.place_name.as_deref(),
                    result.location_type.as_deref(),
                    result.origin.as_str(),
                ),
            )?;
            conn.last_insert_rowid()
        };

        trace!(
            target: "location_cache",
            id,
            query_text,
            origin = %result.origin,
            "cached location recorded"
        );
        Ok(id)
    }
}

fn parse_cached_location(row: &rusqlite::Row<'_>) -> rusqlite::Result<CachedLocation> {
    let id: i64 = row.get(0)?;
    let query_text: String = row.get(1)?;
    let latitude: f64 = row.get(2)?;
    let longitude: f64 = row.get(3)?;
    let place_name: Option<String> = row.get(4)?;
    let location_type: Option<String> = row.get(5)?;
    let origin: String = row.get(6)?;
    let created_at: Option<String> = row.get(7)?;

    let origin = OriginTag::from_tag(&origin).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown location origin '{origin}'").into(),
        )
    })?;

    Ok(CachedLocation {
        id,
        query_text,
        result: LocationResult {
            latitude,
            longitude,
            place_name,
            location_type,
            origin,
        },
        created_at: created_at.as_deref().and_then(parse_sqlite_timestamp),
    })
}

fn parse_sqlite_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
