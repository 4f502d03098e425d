//! Per-kind ingestion runs over a configured city set.
//!
//! Cities are processed sequentially in input order. A failure for one city is
//! captured in its outcome and never interrupts the rest of the batch; only an
//! empty city set fails the run as a whole.

use chrono::Utc;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

use crate::normalize::{flatten_air_quality, flatten_weather};
use crate::source::{
    fetch_observation, City, HttpFetcher, ObservationKind, RawObservation,
    ReqwestBlockingFetcher, SourceConfig, SourceError,
};
use crate::store::{upsert_air_quality, upsert_weather, StoreError, Stored};
use crate::validate::{
    validate_air_quality, validate_weather, AirQualityRecord, ValidationError, WeatherRecord,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no cities configured for ingestion")]
    EmptyEntitySet,
    #[error("malformed city list entry: {entry:?} (expected Name,lat,lon)")]
    InvalidCityList { entry: String },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One observation kind's flatten/validate/persist pipeline.
pub trait Ingestor {
    type Record;

    fn kind(&self) -> ObservationKind;
    fn build(&self, raw: &RawObservation) -> Result<Self::Record, ValidationError>;
    fn persist(
        &self,
        conn: &mut Connection,
        record: &Self::Record,
        stored_at: i64,
    ) -> Result<Stored<Self::Record>, StoreError>;
    /// Human-readable one-liner for the batch outcome.
    fn summarize(&self, record: &Self::Record) -> String;
}

pub struct WeatherIngestor;

impl Ingestor for WeatherIngestor {
    type Record = WeatherRecord;

    fn kind(&self) -> ObservationKind {
        ObservationKind::Weather
    }

    fn build(&self, raw: &RawObservation) -> Result<WeatherRecord, ValidationError> {
        validate_weather(flatten_weather(raw))
    }

    fn persist(
        &self,
        conn: &mut Connection,
        record: &WeatherRecord,
        stored_at: i64,
    ) -> Result<Stored<WeatherRecord>, StoreError> {
        upsert_weather(conn, record, stored_at)
    }

    fn summarize(&self, record: &WeatherRecord) -> String {
        format!("{:.1}°C, {}", record.temp, record.weather_description)
    }
}

pub struct AirQualityIngestor;

impl Ingestor for AirQualityIngestor {
    type Record = AirQualityRecord;

    fn kind(&self) -> ObservationKind {
        ObservationKind::AirQuality
    }

    fn build(&self, raw: &RawObservation) -> Result<AirQualityRecord, ValidationError> {
        validate_air_quality(flatten_air_quality(raw))
    }

    fn persist(
        &self,
        conn: &mut Connection,
        record: &AirQualityRecord,
        stored_at: i64,
    ) -> Result<Stored<AirQualityRecord>, StoreError> {
        upsert_air_quality(conn, record, stored_at)
    }

    fn summarize(&self, record: &AirQualityRecord) -> String {
        format!("AQI {}", record.aqi)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success {
        record_id: String,
        ingestion_timestamp: i64,
        summary: String,
    },
    Error {
        message: String,
    },
}

/// Outcome for one city, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityOutcome {
    pub city: String,
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub kind: ObservationKind,
    pub outcomes: Vec<CityOutcome>,
}

impl BatchReport {
    pub fn success_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, OutcomeStatus::Success { .. }))
            .count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Runs one kind's ingestion over the city set. All cities share a single
/// ingestion timestamp, which the join path later relies on.
pub fn run_ingestion<I: Ingestor>(
    ingestor: &I,
    fetcher: &dyn HttpFetcher,
    cfg: &SourceConfig,
    conn: &mut Connection,
    cities: &[City],
    ingestion_timestamp: i64,
) -> Result<BatchReport, IngestError> {
    if cities.is_empty() {
        return Err(IngestError::EmptyEntitySet);
    }

    let kind = ingestor.kind();
    let total = cities.len();
    let mut outcomes = Vec::with_capacity(total);

    for (index, city) in cities.iter().enumerate() {
        info!(
            component = "ingest",
            event = "ingest.city.start",
            kind = kind.as_str(),
            city = %city.name,
            position = index + 1,
            total = total
        );

        let status = match ingest_city(ingestor, fetcher, cfg, conn, city, ingestion_timestamp) {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    component = "ingest",
                    event = "ingest.city.error",
                    kind = kind.as_str(),
                    city = %city.name,
                    error = %err
                );
                OutcomeStatus::Error {
                    message: err.to_string(),
                }
            }
        };
        outcomes.push(CityOutcome {
            city: city.name.clone(),
            status,
        });
    }

    let report = BatchReport { kind, outcomes };
    info!(
        component = "ingest",
        event = "ingest.batch.summary",
        kind = kind.as_str(),
        successful = report.success_count(),
        total = report.total()
    );
    Ok(report)
}

fn ingest_city<I: Ingestor>(
    ingestor: &I,
    fetcher: &dyn HttpFetcher,
    cfg: &SourceConfig,
    conn: &mut Connection,
    city: &City,
    ingestion_timestamp: i64,
) -> Result<OutcomeStatus, IngestError> {
    let raw = fetch_observation(fetcher, cfg, city, ingestor.kind(), ingestion_timestamp)?;
    let record = ingestor.build(&raw)?;
    let summary = ingestor.summarize(&record);
    let stored = ingestor.persist(conn, &record, Utc::now().timestamp_millis())?;

    Ok(OutcomeStatus::Success {
        record_id: stored.record_id,
        ingestion_timestamp,
        summary,
    })
}

/// Convenience entry that builds the production HTTP client and stamps the
/// batch with the current wall-clock time.
pub fn ingest_now<I: Ingestor>(
    ingestor: &I,
    cfg: &SourceConfig,
    conn: &mut Connection,
    cities: &[City],
) -> Result<BatchReport, IngestError> {
    let fetcher = ReqwestBlockingFetcher::new(cfg.timeout_ms)?;
    let ingestion_timestamp = Utc::now().timestamp_millis();
    run_ingestion(ingestor, &fetcher, cfg, conn, cities, ingestion_timestamp)
}

/// Parses a city list of the form `Name,lat,lon;Name,lat,lon`. Whitespace
/// around entries and fields is ignored; an empty string yields no cities.
pub fn parse_city_list(raw: &str) -> Result<Vec<City>, IngestError> {
    let mut cities = Vec::new();
    for entry in raw.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut parts = entry.split(',').map(str::trim);
        let (Some(name), Some(lat), Some(lon), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IngestError::InvalidCityList {
                entry: entry.to_string(),
            });
        };
        let (Ok(lat), Ok(lon)) = (lat.parse::<f64>(), lon.parse::<f64>()) else {
            return Err(IngestError::InvalidCityList {
                entry: entry.to_string(),
            });
        };
        if name.is_empty() {
            return Err(IngestError::InvalidCityList {
                entry: entry.to_string(),
            });
        }

        cities.push(City::new(name, lat, lon));
    }
    Ok(cities)
}

/// Default monitored city set.
pub fn default_cities() -> Vec<City> {
    vec![
        City::new("Stockholm", 59.3293, 18.0686),
        City::new("Gothenburg", 57.7089, 11.9746),
        City::new("Malmo", 55.6050, 13.0038),
        City::new("Uppsala", 59.8586, 17.6389),
        City::new("Vasteras", 59.6099, 16.5448),
    ]
}
