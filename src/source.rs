//! Source client for the OpenWeatherMap observation endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// A monitored location. Supplied as static configuration, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl City {
    pub fn new(name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            name: name.into(),
            lat,
            lon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObservationKind {
    Weather,
    AirQuality,
}

impl ObservationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::AirQuality => "air_quality",
        }
    }

    pub fn data_source(self) -> &'static str {
        match self {
            Self::Weather => "openweathermap",
            Self::AirQuality => "openweathermap_air_quality",
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::AirQuality => "air_pollution",
        }
    }
}

/// Decoded API response for one (city, kind) pair, with the identity stamps
/// already merged into the body. In-memory only.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub kind: ObservationKind,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Error)]
#[error("transport failure for {url}: {message}")]
pub struct TransportError {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("source unavailable for {city}: {message}")]
    Unavailable { city: String, message: String },
    #[error("failed to decode response for {city}: {message}")]
    Decode { city: String, message: String },
}

pub trait HttpFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

pub struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| SourceError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let response = self.client.get(url).send().map_err(|err| TransportError {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| TransportError {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

/// Fetches one observation and stamps identity metadata into the decoded body.
/// The stamping is part of the contract: the normalizer reads `city_name`,
/// `ingestion_timestamp` and `data_source` from the body, not from context.
pub fn fetch_observation(
    fetcher: &dyn HttpFetcher,
    cfg: &SourceConfig,
    city: &City,
    kind: ObservationKind,
    ingestion_timestamp: i64,
) -> Result<RawObservation, SourceError> {
    let url = observation_url(cfg, city, kind);
    let bytes = fetcher
        .get_bytes(&url)
        .map_err(|err| SourceError::Unavailable {
            city: city.name.clone(),
            message: err.message,
        })?;

    let mut body: Value = serde_json::from_slice(&bytes).map_err(|err| SourceError::Decode {
        city: city.name.clone(),
        message: err.to_string(),
    })?;

    let object = body.as_object_mut().ok_or_else(|| SourceError::Decode {
        city: city.name.clone(),
        message: "expected top-level JSON object".to_string(),
    })?;
    object.insert("city_name".to_string(), Value::from(city.name.clone()));
    object.insert(
        "ingestion_timestamp".to_string(),
        Value::from(ingestion_timestamp),
    );
    object.insert("data_source".to_string(), Value::from(kind.data_source()));

    info!(
        component = "source",
        event = "source.fetch.ok",
        city = %city.name,
        kind = kind.as_str(),
        ingestion_timestamp = ingestion_timestamp
    );

    Ok(RawObservation { kind, body })
}

fn observation_url(cfg: &SourceConfig, city: &City, kind: ObservationKind) -> String {
    format!(
        "{}/{}?lat={}&lon={}&appid={}&units=metric",
        cfg.base_url,
        kind.endpoint(),
        city.lat,
        city.lon,
        cfg.api_key
    )
}
