//! Flattening of nested API payloads into typed flat records.
//!
//! Pure functions, no I/O and no failure path. Fields with a natural zero (or
//! empty-string) default resolve to that default when absent; identity-critical
//! and bound-checked fields stay `Option` and are resolved by the validator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::RawObservation;

/// Normalized weather observation before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatWeather {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub pressure: Option<i64>,
    pub humidity: Option<i64>,
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
    pub city_name: Option<String>,
    pub ingestion_timestamp: Option<i64>,
    pub data_source: String,
}

/// Normalized air-quality observation before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatAirQuality {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
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
    pub city_name: Option<String>,
    pub ingestion_timestamp: Option<i64>,
    pub data_source: String,
}

pub fn flatten_weather(raw: &RawObservation) -> FlatWeather {
    let body = &raw.body;
    let main = body.get("main");
    let wind = body.get("wind");
    let sys = body.get("sys");
    // OpenWeatherMap wraps condition metadata in a one-element list.
    let weather = body
        .get("weather")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first());

    FlatWeather {
        lat: num_at(body.get("coord"), "lat"),
        lon: num_at(body.get("coord"), "lon"),
        temp: num_at(main, "temp"),
        feels_like: num_at(main, "feels_like"),
        temp_min: num_at(main, "temp_min"),
        temp_max: num_at(main, "temp_max"),
        pressure: int_at(main, "pressure"),
        humidity: int_at(main, "humidity"),
        sea_level: int_at(main, "sea_level").unwrap_or(0),
        grnd_level: int_at(main, "grnd_level").unwrap_or(0),
        visibility: body.get("visibility").and_then(Value::as_i64).unwrap_or(0),
        wind_speed: num_at(wind, "speed").unwrap_or(0.0),
        wind_deg: num_at(wind, "deg").unwrap_or(0.0),
        clouds: int_at(body.get("clouds"), "all").unwrap_or(0),
        weather_main: text_at(weather, "main"),
        weather_description: text_at(weather, "description"),
        sunrise: int_at(sys, "sunrise").unwrap_or(0),
        sunset: int_at(sys, "sunset").unwrap_or(0),
        city_name: body
            .get("city_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        ingestion_timestamp: body.get("ingestion_timestamp").and_then(Value::as_i64),
        data_source: body
            .get("data_source")
            .and_then(Value::as_str)
            .unwrap_or(raw.kind.data_source())
            .to_string(),
    }
}

pub fn flatten_air_quality(raw: &RawObservation) -> FlatAirQuality {
    let body = &raw.body;
    // Only the first index/time sample is used: "current conditions" semantics.
    let first = body
        .get("list")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first());
    let components = first.and_then(|entry| entry.get("components"));

    FlatAirQuality {
        lat: num_at(body.get("coord"), "lat"),
        lon: num_at(body.get("coord"), "lon"),
        aqi: first
            .and_then(|entry| entry.get("main"))
            .and_then(|main| main.get("aqi"))
            .and_then(Value::as_i64)
            .unwrap_or(0),
        co: num_at(components, "co").unwrap_or(0.0),
        no: num_at(components, "no").unwrap_or(0.0),
        no2: num_at(components, "no2").unwrap_or(0.0),
        o3: num_at(components, "o3").unwrap_or(0.0),
        so2: num_at(components, "so2").unwrap_or(0.0),
        pm2_5: num_at(components, "pm2_5").unwrap_or(0.0),
        pm10: num_at(components, "pm10").unwrap_or(0.0),
        nh3: num_at(components, "nh3").unwrap_or(0.0),
        observed_at: int_at(first, "dt").unwrap_or(0),
        city_name: body
            .get("city_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        ingestion_timestamp: body.get("ingestion_timestamp").and_then(Value::as_i64),
        data_source: body
            .get("data_source")
            .and_then(Value::as_str)
            .unwrap_or(raw.kind.data_source())
            .to_string(),
    }
}

fn num_at(parent: Option<&Value>, key: &str) -> Option<f64> {
    parent.and_then(|value| value.get(key)).and_then(Value::as_f64)
}

fn int_at(parent: Option<&Value>, key: &str) -> Option<i64> {
    parent.and_then(|value| value.get(key)).and_then(Value::as_i64)
}

fn text_at(parent: Option<&Value>, key: &str) -> String {
    parent
        .and_then(|value| value.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
