//! Derivation of ML-ready feature matrices from stored records.
//!
//! Fixed transform order: one-hot encoding (drop-first), derived combined
//! features, calendar decomposition, duplicate-row elimination. Z-score
//! normalization is a separate `Normalizer` fitted once per batch and retained
//! for application at prediction time. The data-source label never enters a
//! matrix; column names are sanitized (spaces become underscores) because the
//! artifact JSON keys are a long-lived external contract.

use std::collections::{BTreeSet, HashSet};

use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::join::CombinedRecord;
use crate::store::Stored;
use crate::validate::{AirQualityRecord, WeatherRecord};

const WEATHER_NUMERIC_COLUMNS: [&str; 16] = [
    "lat",
    "lon",
    "temp",
    "feels_like",
    "temp_min",
    "temp_max",
    "pressure",
    "humidity",
    "sea_level",
    "grnd_level",
    "visibility",
    "wind_speed",
    "wind_deg",
    "clouds",
    "sunrise",
    "sunset",
];

const AIR_QUALITY_NUMERIC_COLUMNS: [&str; 12] = [
    "lat", "lon", "aqi", "co", "no", "no2", "o3", "so2", "pm2_5", "pm10", "nh3", "observed_at",
];

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("no records to transform")]
    EmptyInput,
    #[error("invalid UTC timestamp: {0}")]
    InvalidTimestamp(i64),
}

/// Key of the record(s) a feature row was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureSource {
    Record {
        record_id: String,
    },
    Pair {
        weather_record_id: String,
        air_quality_record_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrixRow {
    pub source: FeatureSource,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureMatrixRow>,
}

impl FeatureMatrix {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| r.values[idx])
    }
}

pub fn encode_weather_features(
    records: &[Stored<WeatherRecord>],
) -> Result<FeatureMatrix, FeatureError> {
    if records.is_empty() {
        return Err(FeatureError::EmptyInput);
    }

    let mut columns: Vec<String> = WEATHER_NUMERIC_COLUMNS
        .iter()
        .map(|name| name.to_string())
        .collect();
    let mut rows: Vec<FeatureMatrixRow> = records
        .iter()
        .map(|stored| FeatureMatrixRow {
            source: FeatureSource::Record {
                record_id: stored.record_id.clone(),
            },
            values: weather_numeric_values(&stored.record),
        })
        .collect();

    append_one_hot(
        "weather_main",
        &category_values(records, |record| record.weather_main.as_str()),
        &mut columns,
        &mut rows,
    );
    append_one_hot(
        "weather_description",
        &category_values(records, |record| record.weather_description.as_str()),
        &mut columns,
        &mut rows,
    );
    append_one_hot(
        "city_name",
        &category_values(records, |record| record.city_name.as_str()),
        &mut columns,
        &mut rows,
    );

    finish_matrix("weather", columns, rows)
}

pub fn encode_air_quality_features(
    records: &[Stored<AirQualityRecord>],
) -> Result<FeatureMatrix, FeatureError> {
    if records.is_empty() {
        return Err(FeatureError::EmptyInput);
    }

    let mut columns: Vec<String> = AIR_QUALITY_NUMERIC_COLUMNS
        .iter()
        .map(|name| name.to_string())
        .collect();
    columns.extend(["day", "month", "year"].map(str::to_string));

    let mut rows = Vec::with_capacity(records.len());
    for stored in records {
        let record = &stored.record;
        let mut values = vec![
            record.lat,
            record.lon,
            record.aqi as f64,
            record.co,
            record.no,
            record.no2,
            record.o3,
            record.so2,
            record.pm2_5,
            record.pm10,
            record.nh3,
            record.observed_at as f64,
        ];
        let (day, month, year) = calendar_parts(record.ingestion_timestamp)?;
        values.extend([day, month, year]);

        rows.push(FeatureMatrixRow {
            source: FeatureSource::Record {
                record_id: stored.record_id.clone(),
            },
            values,
        });
    }

    append_one_hot(
        "city_name",
        &category_values(records, |record| record.city_name.as_str()),
        &mut columns,
        &mut rows,
    );

    finish_matrix("air_quality", columns, rows)
}

pub fn encode_combined_features(
    records: &[CombinedRecord],
) -> Result<FeatureMatrix, FeatureError> {
    if records.is_empty() {
        return Err(FeatureError::EmptyInput);
    }

    let mut columns: Vec<String> = WEATHER_NUMERIC_COLUMNS
        .iter()
        .map(|name| name.to_string())
        .collect();
    columns.extend(
        ["aqi", "co", "no", "no2", "o3", "so2", "pm2_5", "pm10", "nh3"].map(str::to_string),
    );
    columns.extend(
        [
            "pollution_weather_index",
            "temp_pollution_ratio",
            "wind_pollution_clearance",
            "environmental_stress",
        ]
        .map(str::to_string),
    );

    let mut rows = Vec::with_capacity(records.len());
    for combined in records {
        let weather = &combined.weather;
        let air = &combined.air_quality;
        let mut values = weather_numeric_values(weather);
        values.extend([
            air.aqi as f64,
            air.co,
            air.no,
            air.no2,
            air.o3,
            air.so2,
            air.pm2_5,
            air.pm10,
            air.nh3,
        ]);
        values.extend(derived_combined_values(weather, air));

        rows.push(FeatureMatrixRow {
            source: FeatureSource::Pair {
                weather_record_id: combined.weather_record_id.clone(),
                air_quality_record_id: combined.air_quality_record_id.clone(),
            },
            values,
        });
    }

    let weather_mains: Vec<&str> = records
        .iter()
        .map(|combined| combined.weather.weather_main.as_str())
        .collect();
    let descriptions: Vec<&str> = records
        .iter()
        .map(|combined| combined.weather.weather_description.as_str())
        .collect();
    let cities: Vec<&str> = records
        .iter()
        .map(|combined| combined.city_name.as_str())
        .collect();
    append_one_hot("weather_main", &weather_mains, &mut columns, &mut rows);
    append_one_hot("weather_description", &descriptions, &mut columns, &mut rows);
    append_one_hot("city_name", &cities, &mut columns, &mut rows);

    finish_matrix("combined", columns, rows)
}

fn weather_numeric_values(record: &WeatherRecord) -> Vec<f64> {
    vec![
        record.lat,
        record.lon,
        record.temp,
        record.feels_like,
        record.temp_min,
        record.temp_max,
        record.pressure as f64,
        record.humidity as f64,
        record.sea_level as f64,
        record.grnd_level as f64,
        record.visibility as f64,
        record.wind_speed,
        record.wind_deg,
        record.clouds as f64,
        record.sunrise as f64,
        record.sunset as f64,
    ]
}

fn derived_combined_values(weather: &WeatherRecord, air: &AirQualityRecord) -> [f64; 4] {
    let aqi = air.aqi as f64;
    let humidity = weather.humidity as f64;
    let pollution_weather_index = aqi * humidity / 100.0;
    let temp_pollution_ratio = weather.temp / (air.pm2_5 + 1.0);
    let wind_pollution_clearance = weather.wind_speed / (aqi + 1.0);
    let environmental_stress = aqi
        + f64::from(u8::from(weather.humidity > 80))
        + f64::from(u8::from(weather.wind_speed < 2.0))
        + f64::from(u8::from(weather.clouds > 80));

    [
        pollution_weather_index,
        temp_pollution_ratio,
        wind_pollution_clearance,
        environmental_stress,
    ]
}

fn calendar_parts(ingestion_timestamp: i64) -> Result<(f64, f64, f64), FeatureError> {
    let dt = Utc
        .timestamp_millis_opt(ingestion_timestamp)
        .single()
        .ok_or(FeatureError::InvalidTimestamp(ingestion_timestamp))?;
    Ok((dt.day() as f64, dt.month() as f64, dt.year() as f64))
}

fn category_values<'a, T, F>(records: &'a [Stored<T>], select: F) -> Vec<&'a str>
where
    F: Fn(&'a T) -> &'a str,
{
    records
        .iter()
        .map(|stored| select(&stored.record))
        .collect()
}

/// One-hot encodes a nominal field with the reference (lexicographically
/// first) category dropped, so N distinct categories yield N-1 indicators.
fn append_one_hot(
    field: &str,
    row_categories: &[&str],
    columns: &mut Vec<String>,
    rows: &mut Vec<FeatureMatrixRow>,
) {
    let distinct: BTreeSet<&str> = row_categories.iter().copied().collect();
    let retained: Vec<&str> = distinct.into_iter().skip(1).collect();

    for category in &retained {
        columns.push(format!("{field}_{category}"));
    }
    for (row, category) in rows.iter_mut().zip(row_categories) {
        for retained_category in &retained {
            row.values
                .push(if category == retained_category { 1.0 } else { 0.0 });
        }
    }
}

fn finish_matrix(
    label: &'static str,
    columns: Vec<String>,
    rows: Vec<FeatureMatrixRow>,
) -> Result<FeatureMatrix, FeatureError> {
    let mut matrix = FeatureMatrix { columns, rows };
    let duplicates_removed = dedup_rows(&mut matrix);
    sanitize_columns(&mut matrix);

    info!(
        component = "features",
        event = "features.encode.finish",
        kind = label,
        columns = matrix.columns.len(),
        rows = matrix.rows.len(),
        duplicates_removed = duplicates_removed
    );
    Ok(matrix)
}

/// Drops rows whose full encoded value vector repeats an earlier row,
/// keeping the first occurrence. Comparison is bitwise-exact.
fn dedup_rows(matrix: &mut FeatureMatrix) -> usize {
    let mut seen: HashSet<Vec<u64>> = HashSet::with_capacity(matrix.rows.len());
    let before = matrix.rows.len();
    matrix.rows.retain(|row| {
        let key: Vec<u64> = row.values.iter().map(|value| value.to_bits()).collect();
        seen.insert(key)
    });
    before - matrix.rows.len()
}

fn sanitize_columns(matrix: &mut FeatureMatrix) {
    for column in &mut matrix.columns {
        if column.contains(' ') {
            *column = column.replace(' ', "_");
        }
    }
}

/// Z-score normalization fitted once on a batch. Mean and standard deviation
/// are retained so the same scaling can be applied to prediction inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    columns: Vec<String>,
    means: Vec<f64>,
    stddevs: Vec<f64>,
}

impl Normalizer {
    /// Fits on the requested columns; names absent from the matrix are
    /// ignored, so callers can pass a superset of numeric column names.
    pub fn fit(matrix: &FeatureMatrix, columns: &[&str]) -> Result<Self, FeatureError> {
        if matrix.rows.is_empty() {
            return Err(FeatureError::EmptyInput);
        }

        let mut fitted_columns = Vec::new();
        let mut means = Vec::new();
        let mut stddevs = Vec::new();

        for name in columns {
            let Some(idx) = matrix.column_index(name) else {
                continue;
            };
            let count = matrix.rows.len() as f64;
            let mean = matrix.rows.iter().map(|row| row.values[idx]).sum::<f64>() / count;
            let variance = matrix
                .rows
                .iter()
                .map(|row| {
                    let d = row.values[idx] - mean;
                    d * d
                })
                .sum::<f64>()
                / count;

            fitted_columns.push((*name).to_string());
            means.push(mean);
            stddevs.push(variance.sqrt());
        }

        Ok(Self {
            columns: fitted_columns,
            means,
            stddevs,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn apply(&self, matrix: &mut FeatureMatrix) {
        for (pos, name) in self.columns.iter().enumerate() {
            let Some(idx) = matrix.column_index(name) else {
                continue;
            };
            let stddev = self.stddevs[pos];
            if stddev == 0.0 {
                continue;
            }
            for row in &mut matrix.rows {
                row.values[idx] = (row.values[idx] - self.means[pos]) / stddev;
            }
        }
    }

    /// Scales a single named vector in place, for prediction-time inputs.
    pub fn apply_named(&self, names: &[String], values: &mut [f64]) {
        for (pos, name) in self.columns.iter().enumerate() {
            let Some(idx) = names.iter().position(|n| n == name) else {
                continue;
            };
            let stddev = self.stddevs[pos];
            if stddev == 0.0 {
                continue;
            }
            values[idx] = (values[idx] - self.means[pos]) / stddev;
        }
    }
}
