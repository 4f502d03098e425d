//! Idempotent SQLite persistence for ingested observations.
//!
//! Record identity is a sha256 over (kind, city, ingestion timestamp), so
//! re-submitting the same logical observation updates the existing row in
//! place and keeps its id. Batch upserts run inside one transaction: either
//! every row in the batch becomes visible or none does.

use std::path::Path;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::source::ObservationKind;
use crate::validate::{AirQualityRecord, WeatherRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A persisted record plus its stable identifier and persistence timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub record_id: String,
    pub stored_at: i64,
    pub record: T,
}

/// Stable identity for conflict resolution, derived from the logical key.
pub fn record_id(kind: ObservationKind, city_name: &str, ingestion_timestamp: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(city_name.as_bytes());
    hasher.update(b":");
    hasher.update(ingestion_timestamp.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn open_store(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA temp_store=MEMORY;
        ",
    )?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Creates the ingestion and artifact tables. The processing path treats
/// their existence as a precondition, so every open goes through here.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS weather_ingestion_data (
            record_id TEXT PRIMARY KEY,
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            temp REAL NOT NULL,
            feels_like REAL NOT NULL,
            temp_min REAL NOT NULL,
            temp_max REAL NOT NULL,
            pressure INTEGER NOT NULL,
            humidity INTEGER NOT NULL,
            sea_level INTEGER NOT NULL,
            grnd_level INTEGER NOT NULL,
            visibility INTEGER NOT NULL,
            wind_speed REAL NOT NULL,
            wind_deg REAL NOT NULL,
            clouds INTEGER NOT NULL,
            weather_main TEXT NOT NULL,
            weather_description TEXT NOT NULL,
            sunrise INTEGER NOT NULL,
            sunset INTEGER NOT NULL,
            city_name TEXT NOT NULL,
            ingestion_timestamp INTEGER NOT NULL,
            data_source TEXT NOT NULL,
            stored_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS air_quality_ingestion_data (
            record_id TEXT PRIMARY KEY,
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            aqi INTEGER NOT NULL,
            co REAL NOT NULL,
            no REAL NOT NULL,
            no2 REAL NOT NULL,
            o3 REAL NOT NULL,
            so2 REAL NOT NULL,
            pm2_5 REAL NOT NULL,
            pm10 REAL NOT NULL,
            nh3 REAL NOT NULL,
            observed_at INTEGER NOT NULL,
            city_name TEXT NOT NULL,
            ingestion_timestamp INTEGER NOT NULL,
            data_source TEXT NOT NULL,
            stored_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_weather_ingestion_data (
            ingestion_record_id TEXT PRIMARY KEY,
            json_data TEXT NOT NULL,
            processed_timestamp INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processed_air_quality_ingestion_data (
            ingestion_record_id TEXT PRIMARY KEY,
            json_data TEXT NOT NULL,
            processed_timestamp INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS combined_processed_ingestion_data (
            weather_record_id TEXT NOT NULL,
            air_quality_record_id TEXT NOT NULL,
            json_data TEXT NOT NULL,
            processed_timestamp INTEGER NOT NULL,
            PRIMARY KEY(weather_record_id, air_quality_record_id)
        );
        ",
    )?;
    Ok(())
}

pub fn upsert_weather(
    conn: &mut Connection,
    record: &WeatherRecord,
    stored_at: i64,
) -> Result<Stored<WeatherRecord>, StoreError> {
    let mut stored = upsert_weather_batch(conn, std::slice::from_ref(record), stored_at)?;
    Ok(stored.remove(0))
}

pub fn upsert_weather_batch(
    conn: &mut Connection,
    records: &[WeatherRecord],
    stored_at: i64,
) -> Result<Vec<Stored<WeatherRecord>>, StoreError> {
    let tx = conn.transaction()?;
    let mut stored = Vec::with_capacity(records.len());
    {
        let mut stmt = tx.prepare(
            "
            INSERT INTO weather_ingestion_data (
                record_id, lat, lon, temp, feels_like, temp_min, temp_max,
                pressure, humidity, sea_level, grnd_level, visibility,
                wind_speed, wind_deg, clouds, weather_main, weather_description,
                sunrise, sunset, city_name, ingestion_timestamp, data_source,
                stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                      ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            ON CONFLICT(record_id) DO UPDATE SET
                lat = excluded.lat,
                lon = excluded.lon,
                temp = excluded.temp,
                feels_like = excluded.feels_like,
                temp_min = excluded.temp_min,
                temp_max = excluded.temp_max,
                pressure = excluded.pressure,
                humidity = excluded.humidity,
                sea_level = excluded.sea_level,
                grnd_level = excluded.grnd_level,
                visibility = excluded.visibility,
                wind_speed = excluded.wind_speed,
                wind_deg = excluded.wind_deg,
                clouds = excluded.clouds,
                weather_main = excluded.weather_main,
                weather_description = excluded.weather_description,
                sunrise = excluded.sunrise,
                sunset = excluded.sunset,
                data_source = excluded.data_source,
                stored_at = excluded.stored_at
            ",
        )?;

        for record in records {
            let id = record_id(
                ObservationKind::Weather,
                &record.city_name,
                record.ingestion_timestamp,
            );
            stmt.execute(params![
                id,
                record.lat,
                record.lon,
                record.temp,
                record.feels_like,
                record.temp_min,
                record.temp_max,
                record.pressure,
                record.humidity,
                record.sea_level,
                record.grnd_level,
                record.visibility,
                record.wind_speed,
                record.wind_deg,
                record.clouds,
                record.weather_main,
                record.weather_description,
                record.sunrise,
                record.sunset,
                record.city_name,
                record.ingestion_timestamp,
                record.data_source,
                stored_at,
            ])?;
            stored.push(Stored {
                record_id: id,
                stored_at,
                record: record.clone(),
            });
        }
    }
    tx.commit()?;

    info!(
        component = "store",
        event = "store.upsert.weather",
        rows = records.len(),
        stored_at = stored_at
    );
    Ok(stored)
}

pub fn upsert_air_quality(
    conn: &mut Connection,
    record: &AirQualityRecord,
    stored_at: i64,
) -> Result<Stored<AirQualityRecord>, StoreError> {
    let mut stored = upsert_air_quality_batch(conn, std::slice::from_ref(record), stored_at)?;
    Ok(stored.remove(0))
}

pub fn upsert_air_quality_batch(
    conn: &mut Connection,
    records: &[AirQualityRecord],
    stored_at: i64,
) -> Result<Vec<Stored<AirQualityRecord>>, StoreError> {
    let tx = conn.transaction()?;
    let mut stored = Vec::with_capacity(records.len());
    {
        let mut stmt = tx.prepare(
            "
            INSERT INTO air_quality_ingestion_data (
                record_id, lat, lon, aqi, co, no, no2, o3, so2, pm2_5, pm10,
                nh3, observed_at, city_name, ingestion_timestamp, data_source,
                stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                      ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(record_id) DO UPDATE SET
                lat = excluded.lat,
                lon = excluded.lon,
                aqi = excluded.aqi,
                co = excluded.co,
                no = excluded.no,
                no2 = excluded.no2,
                o3 = excluded.o3,
                so2 = excluded.so2,
                pm2_5 = excluded.pm2_5,
                pm10 = excluded.pm10,
                nh3 = excluded.nh3,
                observed_at = excluded.observed_at,
                data_source = excluded.data_source,
                stored_at = excluded.stored_at
            ",
        )?;

        for record in records {
            let id = record_id(
                ObservationKind::AirQuality,
                &record.city_name,
                record.ingestion_timestamp,
            );
            stmt.execute(params![
                id,
                record.lat,
                record.lon,
                record.aqi,
                record.co,
                record.no,
                record.no2,
                record.o3,
                record.so2,
                record.pm2_5,
                record.pm10,
                record.nh3,
                record.observed_at,
                record.city_name,
                record.ingestion_timestamp,
                record.data_source,
                stored_at,
            ])?;
            stored.push(Stored {
                record_id: id,
                stored_at,
                record: record.clone(),
            });
        }
    }
    tx.commit()?;

    info!(
        component = "store",
        event = "store.upsert.air_quality",
        rows = records.len(),
        stored_at = stored_at
    );
    Ok(stored)
}

pub fn fetch_weather(conn: &Connection) -> Result<Vec<Stored<WeatherRecord>>, StoreError> {
    let mut stmt = conn.prepare(
        "
        SELECT record_id, lat, lon, temp, feels_like, temp_min, temp_max,
               pressure, humidity, sea_level, grnd_level, visibility,
               wind_speed, wind_deg, clouds, weather_main, weather_description,
               sunrise, sunset, city_name, ingestion_timestamp, data_source,
               stored_at
        FROM weather_ingestion_data
        ORDER BY ingestion_timestamp DESC
        ",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(Stored {
            record_id: row.get(0)?,
            stored_at: row.get(22)?,
            record: WeatherRecord {
                lat: row.get(1)?,
                lon: row.get(2)?,
                temp: row.get(3)?,
                feels_like: row.get(4)?,
                temp_min: row.get(5)?,
                temp_max: row.get(6)?,
                pressure: row.get(7)?,
                humidity: row.get(8)?,
                sea_level: row.get(9)?,
                grnd_level: row.get(10)?,
                visibility: row.get(11)?,
                wind_speed: row.get(12)?,
                wind_deg: row.get(13)?,
                clouds: row.get(14)?,
                weather_main: row.get(15)?,
                weather_description: row.get(16)?,
                sunrise: row.get(17)?,
                sunset: row.get(18)?,
                city_name: row.get(19)?,
                ingestion_timestamp: row.get(20)?,
                data_source: row.get(21)?,
            },
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn fetch_air_quality(conn: &Connection) -> Result<Vec<Stored<AirQualityRecord>>, StoreError> {
    let mut stmt = conn.prepare(
        "
        SELECT record_id, lat, lon, aqi, co, no, no2, o3, so2, pm2_5, pm10,
               nh3, observed_at, city_name, ingestion_timestamp, data_source,
               stored_at
        FROM air_quality_ingestion_data
        ORDER BY ingestion_timestamp DESC
        ",
    )?;

    let rows = stmt.query_map([], |row| {
        Ok(Stored {
            record_id: row.get(0)?,
            stored_at: row.get(16)?,
            record: AirQualityRecord {
                lat: row.get(1)?,
                lon: row.get(2)?,
                aqi: row.get(3)?,
                co: row.get(4)?,
                no: row.get(5)?,
                no2: row.get(6)?,
                o3: row.get(7)?,
                so2: row.get(8)?,
                pm2_5: row.get(9)?,
                pm10: row.get(10)?,
                nh3: row.get(11)?,
                observed_at: row.get(12)?,
                city_name: row.get(13)?,
                ingestion_timestamp: row.get(14)?,
                data_source: row.get(15)?,
            },
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
