//! Required-field and domain-bound validation of flat records.
//!
//! A record that passes comes out as a fully concrete `WeatherRecord` or
//! `AirQualityRecord` and is guaranteed persistable. Checks run in a fixed
//! order: presence first (short-circuiting on the first missing field), then
//! physical bounds with inclusive comparisons on both ends.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{FlatAirQuality, FlatWeather};

pub const TEMP_MIN_C: f64 = -50.0;
pub const TEMP_MAX_C: f64 = 50.0;
pub const AQI_MIN: i64 = 1;
pub const AQI_MAX: i64 = 5;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing or null field: {0}")]
    MissingField(&'static str),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Validated weather observation, ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub lat: f64,
    pub lon: f64,
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: i64,
    pub humidity: i64,
    pub sea_level: i64,
    pub grnd_level: i64,
    pub visibility: i64,
    pub wind_speed: f64,
    pub wind_deg: f64,
    pub clouds: i64,
    pub weather_main: String,
    pub weather_description: String,
    pub sunrise: i64,
    pub sunset: i64,
    pub city_name: String,
    pub ingestion_timestamp: i64,
    pub data_source: String,
}

/// Validated air-quality observation, ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityRecord {
    pub lat: f64,
    pub lon: f64,
    pub aqi: i64,
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
    pub observed_at: i64,
    pub city_name: String,
    pub ingestion_timestamp: i64,
    pub data_source: String,
}

pub fn validate_weather(flat: FlatWeather) -> Result<WeatherRecord, ValidationError> {
    // Presence checks follow the required-field list order.
    let lat = require(flat.lat, "lat")?;
    let lon = require(flat.lon, "lon")?;
    let temp = require(flat.temp, "temp")?;
    let feels_like = require(flat.feels_like, "feels_like")?;
    let temp_min = require(flat.temp_min, "temp_min")?;
    let temp_max = require(flat.temp_max, "temp_max")?;
    let pressure = require(flat.pressure, "pressure")?;
    let humidity = require(flat.humidity, "humidity")?;
    let city_name = require(flat.city_name, "city_name")?;
    let ingestion_timestamp = require(flat.ingestion_timestamp, "ingestion_timestamp")?;

    if !(TEMP_MIN_C <= temp && temp <= TEMP_MAX_C) {
        return Err(ValidationError::OutOfRange {
            field: "temp",
            value: temp,
        });
    }

    Ok(WeatherRecord {
        lat,
        lon,
        temp,
        feels_like,
        temp_min,
        temp_max,
        pressure,
        humidity,
        sea_level: flat.sea_level,
        grnd_level: flat.grnd_level,
        visibility: flat.visibility,
        wind_speed: flat.wind_speed,
        wind_deg: flat.wind_deg,
        clouds: flat.clouds,
        weather_main: flat.weather_main,
        weather_description: flat.weather_description,
        sunrise: flat.sunrise,
        sunset: flat.sunset,
        city_name,
        ingestion_timestamp,
        data_source: flat.data_source,
    })
}

pub fn validate_air_quality(flat: FlatAirQuality) -> Result<AirQualityRecord, ValidationError> {
    let lat = require(flat.lat, "lat")?;
    let lon = require(flat.lon, "lon")?;
    let city_name = require(flat.city_name, "city_name")?;
    let ingestion_timestamp = require(flat.ingestion_timestamp, "ingestion_timestamp")?;

    if !(AQI_MIN <= flat.aqi && flat.aqi <= AQI_MAX) {
        return Err(ValidationError::OutOfRange {
            field: "aqi",
            value: flat.aqi as f64,
        });
    }

    Ok(AirQualityRecord {
        lat,
        lon,
        aqi: flat.aqi,
        co: flat.co,
        no: flat.no,
        no2: flat.no2,
        o3: flat.o3,
        so2: flat.so2,
        pm2_5: flat.pm2_5,
        pm10: flat.pm10,
        nh3: flat.nh3,
        observed_at: flat.observed_at,
        city_name,
        ingestion_timestamp,
        data_source: flat.data_source,
    })
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField(field))
}
