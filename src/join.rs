//! Correlation of the weather and air-quality series into combined records.
//!
//! Inner join on (city_name, ingestion_timestamp): a combined record exists
//! only where both series have a row for the pair. Entities ingested for only
//! one kind in a run are silently excluded, not errored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::Stored;
use crate::validate::{AirQualityRecord, WeatherRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinConfig {
    /// Maximum |weather ts - air-quality ts| for a match. 0 means exact
    /// equality, which is the documented default.
    pub tolerance_ms: i64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self { tolerance_ms: 0 }
    }
}

/// The joined result of one weather and one air-quality observation.
/// Identity is the (weather_record_id, air_quality_record_id) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedRecord {
    pub weather_record_id: String,
    pub air_quality_record_id: String,
    pub city_name: String,
    pub ingestion_timestamp: i64,
    pub weather: WeatherRecord,
    pub air_quality: AirQualityRecord,
}

pub fn join_observations(
    weather: &[Stored<WeatherRecord>],
    air_quality: &[Stored<AirQualityRecord>],
    cfg: &JoinConfig,
) -> Vec<CombinedRecord> {
    let mut by_city: HashMap<&str, Vec<&Stored<AirQualityRecord>>> = HashMap::new();
    for stored in air_quality {
        by_city
            .entry(stored.record.city_name.as_str())
            .or_default()
            .push(stored);
    }

    let mut combined = Vec::new();
    for stored in weather {
        let Some(candidates) = by_city.get(stored.record.city_name.as_str()) else {
            continue;
        };
        let Some(matched) = best_match(stored.record.ingestion_timestamp, candidates, cfg) else {
            continue;
        };

        combined.push(CombinedRecord {
            weather_record_id: stored.record_id.clone(),
            air_quality_record_id: matched.record_id.clone(),
            city_name: stored.record.city_name.clone(),
            ingestion_timestamp: stored.record.ingestion_timestamp,
            weather: stored.record.clone(),
            air_quality: matched.record.clone(),
        });
    }

    combined.sort_by(|a, b| b.ingestion_timestamp.cmp(&a.ingestion_timestamp));
    combined
}

fn best_match<'a>(
    weather_ts: i64,
    candidates: &[&'a Stored<AirQualityRecord>],
    cfg: &JoinConfig,
) -> Option<&'a Stored<AirQualityRecord>> {
    if cfg.tolerance_ms == 0 {
        return candidates
            .iter()
            .find(|stored| stored.record.ingestion_timestamp == weather_ts)
            .copied();
    }

    // Nearest within the window; ties prefer the earlier record.
    candidates
        .iter()
        .filter(|stored| (stored.record.ingestion_timestamp - weather_ts).abs() <= cfg.tolerance_ms)
        .min_by_key(|stored| {
            let distance = (stored.record.ingestion_timestamp - weather_ts).abs();
            (distance, stored.record.ingestion_timestamp)
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_weather(city: &str, ts: i64) -> Stored<WeatherRecord> {
        Stored {
            record_id: format!("w-{city}-{ts}"),
            stored_at: ts,
            record: WeatherRecord {
                lat: 59.33,
                lon: 18.07,
                temp: 20.0,
                feels_like: 20.0,
                temp_min: 19.0,
                temp_max: 21.0,
                pressure: 1013,
                humidity: 60,
                sea_level: 1013,
                grnd_level: 1009,
                visibility: 10_000,
                wind_speed: 3.4,
                wind_deg: 210.0,
                clouds: 40,
                weather_main: "Clouds".to_string(),
                weather_description: "scattered clouds".to_string(),
                sunrise: 0,
                sunset: 0,
                city_name: city.to_string(),
                ingestion_timestamp: ts,
                data_source: "openweathermap".to_string(),
            },
        }
    }

    fn stored_air(city: &str, ts: i64) -> Stored<AirQualityRecord> {
        Stored {
            record_id: format!("a-{city}-{ts}"),
            stored_at: ts,
            record: AirQualityRecord {
                lat: 59.33,
                lon: 18.07,
                aqi: 2,
                co: 201.9,
                no: 0.1,
                no2: 7.5,
                o3: 68.7,
                so2: 0.6,
                pm2_5: 4.3,
                pm10: 6.1,
                nh3: 0.9,
                observed_at: ts,
                city_name: city.to_string(),
                ingestion_timestamp: ts,
                data_source: "openweathermap_air_quality".to_string(),
            },
        }
    }

    #[test]
    fn exact_match_on_city_and_timestamp_joins() {
        let combined = join_observations(
            &[stored_weather("Stockholm", 100)],
            &[stored_air("Stockholm", 100)],
            &JoinConfig::default(),
        );

        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].city_name, "Stockholm");
        assert_eq!(combined[0].weather_record_id, "w-Stockholm-100");
        assert_eq!(combined[0].air_quality_record_id, "a-Stockholm-100");
    }

    #[test]
    fn mismatched_timestamp_yields_nothing() {
        let combined = join_observations(
            &[stored_weather("Stockholm", 100)],
            &[stored_air("Stockholm", 200)],
            &JoinConfig::default(),
        );
        assert!(combined.is_empty());
    }

    #[test]
    fn mismatched_city_yields_nothing() {
        let combined = join_observations(
            &[stored_weather("Stockholm", 100)],
            &[stored_air("Gothenburg", 100)],
            &JoinConfig::default(),
        );
        assert!(combined.is_empty());
    }

    #[test]
    fn unmatched_entities_are_silently_excluded() {
        let combined = join_observations(
            &[
                stored_weather("Stockholm", 100),
                stored_weather("Gothenburg", 100),
            ],
            &[stored_air("Stockholm", 100)],
            &JoinConfig::default(),
        );

        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].city_name, "Stockholm");
    }

    #[test]
    fn output_is_most_recent_first() {
        let combined = join_observations(
            &[
                stored_weather("Stockholm", 100),
                stored_weather("Stockholm", 300),
                stored_weather("Stockholm", 200),
            ],
            &[
                stored_air("Stockholm", 100),
                stored_air("Stockholm", 200),
                stored_air("Stockholm", 300),
            ],
            &JoinConfig::default(),
        );

        let timestamps: Vec<i64> = combined
            .iter()
            .map(|record| record.ingestion_timestamp)
            .collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[test]
    fn tolerance_window_picks_nearest_candidate() {
        let cfg = JoinConfig { tolerance_ms: 50 };
        let combined = join_observations(
            &[stored_weather("Stockholm", 100)],
            &[stored_air("Stockholm", 140), stored_air("Stockholm", 130)],
            &cfg,
        );

        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].air_quality_record_id, "a-Stockholm-130");

        let outside = join_observations(
            &[stored_weather("Stockholm", 100)],
            &[stored_air("Stockholm", 151)],
            &cfg,
        );
        assert!(outside.is_empty());
    }
}
