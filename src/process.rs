//! Processing runs: stored records in, persisted feature artifacts out.
//!
//! Each processor reads its inputs from the store, encodes a feature matrix
//! and upserts the rows as JSON artifacts. Runs are idempotent for the same
//! store contents apart from the processed timestamp.

use rusqlite::Connection;
use thiserror::Error;
use tracing::info;

use crate::artifacts::{
    build_artifacts, save_air_quality_artifacts, save_combined_artifacts,
    save_weather_artifacts, ArtifactError, FeatureArtifact,
};
use crate::features::{
    encode_air_quality_features, encode_combined_features, encode_weather_features, FeatureError,
    FeatureMatrix,
};
use crate::join::{join_observations, JoinConfig};
use crate::store::{fetch_air_quality, fetch_weather, StoreError};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no stored records to process")]
    EmptyInput,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// One processing flavor: where inputs come from, how they become features,
/// and which artifact table receives them.
pub trait Processor {
    type Input;

    fn label(&self) -> &'static str;
    fn fetch(&self, conn: &Connection) -> Result<Vec<Self::Input>, ProcessError>;
    fn transform(&self, inputs: &[Self::Input]) -> Result<FeatureMatrix, FeatureError>;
    fn save(
        &self,
        conn: &mut Connection,
        artifacts: &[FeatureArtifact],
        processed_timestamp: i64,
    ) -> Result<usize, ArtifactError>;
}

pub struct WeatherProcessor;

impl Processor for WeatherProcessor {
    type Input = crate::store::Stored<crate::validate::WeatherRecord>;

    fn label(&self) -> &'static str {
        "weather"
    }

    fn fetch(&self, conn: &Connection) -> Result<Vec<Self::Input>, ProcessError> {
        Ok(fetch_weather(conn)?)
    }

    fn transform(&self, inputs: &[Self::Input]) -> Result<FeatureMatrix, FeatureError> {
        encode_weather_features(inputs)
    }

    fn save(
        &self,
        conn: &mut Connection,
        artifacts: &[FeatureArtifact],
        processed_timestamp: i64,
    ) -> Result<usize, ArtifactError> {
        save_weather_artifacts(conn, artifacts, processed_timestamp)
    }
}

pub struct AirQualityProcessor;

impl Processor for AirQualityProcessor {
    type Input = crate::store::Stored<crate::validate::AirQualityRecord>;

    fn label(&self) -> &'static str {
        "air_quality"
    }

    fn fetch(&self, conn: &Connection) -> Result<Vec<Self::Input>, ProcessError> {
        Ok(fetch_air_quality(conn)?)
    }

    fn transform(&self, inputs: &[Self::Input]) -> Result<FeatureMatrix, FeatureError> {
        encode_air_quality_features(inputs)
    }

    fn save(
        &self,
        conn: &mut Connection,
        artifacts: &[FeatureArtifact],
        processed_timestamp: i64,
    ) -> Result<usize, ArtifactError> {
        save_air_quality_artifacts(conn, artifacts, processed_timestamp)
    }
}

/// Joins the two stored series before encoding. Unmatched records are left
/// out of the run, not reported as failures.
#[derive(Default)]
pub struct CombinedProcessor {
    pub join: JoinConfig,
}

impl Processor for CombinedProcessor {
    type Input = crate::join::CombinedRecord;

    fn label(&self) -> &'static str {
        "combined"
    }

    fn fetch(&self, conn: &Connection) -> Result<Vec<Self::Input>, ProcessError> {
        let weather = fetch_weather(conn)?;
        let air_quality = fetch_air_quality(conn)?;
        Ok(join_observations(&weather, &air_quality, &self.join))
    }

    fn transform(&self, inputs: &[Self::Input]) -> Result<FeatureMatrix, FeatureError> {
        encode_combined_features(inputs)
    }

    fn save(
        &self,
        conn: &mut Connection,
        artifacts: &[FeatureArtifact],
        processed_timestamp: i64,
    ) -> Result<usize, ArtifactError> {
        save_combined_artifacts(conn, artifacts, processed_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReport {
    pub label: &'static str,
    pub input_rows: usize,
    pub matrix: FeatureMatrix,
    pub artifacts_saved: usize,
}

pub fn run_processor<P: Processor>(
    processor: &P,
    conn: &mut Connection,
    processed_timestamp: i64,
) -> Result<ProcessReport, ProcessError> {
    let inputs = processor.fetch(conn)?;
    if inputs.is_empty() {
        return Err(ProcessError::EmptyInput);
    }

    let matrix = processor.transform(&inputs)?;
    let artifacts = build_artifacts(&matrix);
    let artifacts_saved = processor.save(conn, &artifacts, processed_timestamp)?;

    info!(
        component = "process",
        event = "process.run.finish",
        label = processor.label(),
        input_rows = inputs.len(),
        feature_rows = matrix.rows.len(),
        columns = matrix.columns.len(),
        artifacts_saved = artifacts_saved
    );

    Ok(ProcessReport {
        label: processor.label(),
        input_rows: inputs.len(),
        matrix,
        artifacts_saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ensure_schema, upsert_air_quality, upsert_weather};
    use crate::validate::{AirQualityRecord, WeatherRecord};

    fn memory_store() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory sqlite");
        ensure_schema(&conn).expect("schema");
        conn
    }

    fn weather_record(city: &str, ts: i64, temp: f64) -> WeatherRecord {
        WeatherRecord {
            lat: 59.33,
            lon: 18.07,
            temp,
            feels_like: temp,
            temp_min: temp - 1.0,
            temp_max: temp + 1.0,
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
            sunrise: 1_700_000_000,
            sunset: 1_700_030_000,
            city_name: city.to_string(),
            ingestion_timestamp: ts,
            data_source: "openweathermap".to_string(),
        }
    }

    fn air_record(city: &str, ts: i64, aqi: i64) -> AirQualityRecord {
        AirQualityRecord {
            lat: 59.33,
            lon: 18.07,
            aqi,
            co: 201.9,
            no: 0.1,
            no2: 7.5,
            o3: 68.7,
            so2: 0.6,
            pm2_5: 4.3,
            pm10: 6.1,
            nh3: 0.9,
            observed_at: 1_700_000_050,
            city_name: city.to_string(),
            ingestion_timestamp: ts,
            data_source: "openweathermap_air_quality".to_string(),
        }
    }

    #[test]
    fn empty_store_fails_with_empty_input() {
        let mut conn = memory_store();
        let err = run_processor(&WeatherProcessor, &mut conn, 100).unwrap_err();
        assert!(matches!(err, ProcessError::EmptyInput));
    }

    #[test]
    fn weather_run_persists_one_artifact_per_feature_row() {
        let mut conn = memory_store();
        upsert_weather(
            &mut conn,
            &weather_record("Stockholm", 1_700_000_000_000, 20.0),
            1,
        )
        .unwrap();
        upsert_weather(
            &mut conn,
            &weather_record("Gothenburg", 1_700_000_000_000, 18.0),
            1,
        )
        .unwrap();

        let report = run_processor(&WeatherProcessor, &mut conn, 100).unwrap();
        assert_eq!(report.input_rows, 2);
        assert_eq!(report.artifacts_saved, 2);

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM processed_weather_ingestion_data",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn combined_run_joins_before_encoding() {
        let mut conn = memory_store();
        upsert_weather(
            &mut conn,
            &weather_record("Stockholm", 1_700_000_000_000, 20.0),
            1,
        )
        .unwrap();
        upsert_air_quality(
            &mut conn,
            &air_record("Stockholm", 1_700_000_000_000, 2),
            1,
        )
        .unwrap();
        // No matching weather row for this one.
        upsert_air_quality(
            &mut conn,
            &air_record("Gothenburg", 1_700_000_000_000, 3),
            1,
        )
        .unwrap();

        let report = run_processor(&CombinedProcessor::default(), &mut conn, 100).unwrap();
        assert_eq!(report.input_rows, 1);
        assert!(report
            .matrix
            .column_index("pollution_weather_index")
            .is_some());

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM combined_processed_ingestion_data",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn stores_with_no_join_overlap_fail_with_empty_input() {
        let mut conn = memory_store();
        upsert_weather(
            &mut conn,
            &weather_record("Stockholm", 1_700_000_000_000, 20.0),
            1,
        )
        .unwrap();
        upsert_air_quality(
            &mut conn,
            &air_record("Gothenburg", 1_700_000_000_000, 2),
            1,
        )
        .unwrap();

        let err = run_processor(&CombinedProcessor::default(), &mut conn, 100).unwrap_err();
        assert!(matches!(err, ProcessError::EmptyInput));
    }

    #[test]
    fn rerun_updates_artifacts_in_place() {
        let mut conn = memory_store();
        upsert_air_quality(
            &mut conn,
            &air_record("Stockholm", 1_700_000_000_000, 2),
            1,
        )
        .unwrap();

        run_processor(&AirQualityProcessor, &mut conn, 100).unwrap();
        run_processor(&AirQualityProcessor, &mut conn, 200).unwrap();

        let (count, latest): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(processed_timestamp)
                 FROM processed_air_quality_ingestion_data",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(latest, 200);
    }
}
