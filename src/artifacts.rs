//! Persistence of feature rows as JSON artifacts.
//!
//! One artifact per feature row, keyed by the originating ingestion record id
//! (or the id pair, for combined rows). Re-processing upserts: the payload and
//! processed timestamp are replaced, the key survives. Payloads hold the
//! feature columns only, so the JSON keys are exactly the sanitized matrix
//! columns.

use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::features::{FeatureMatrix, FeatureSource};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("artifact payload serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("feature row key does not fit the {table} table")]
    KeyShape { table: &'static str },
}

/// A feature row rendered for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureArtifact {
    pub source: FeatureSource,
    pub payload: Value,
}

/// Renders every row of a matrix into a column-name -> value JSON object.
pub fn build_artifacts(matrix: &FeatureMatrix) -> Vec<FeatureArtifact> {
    matrix
        .rows
        .iter()
        .map(|row| {
            let mut payload = Map::with_capacity(matrix.columns.len());
            for (column, value) in matrix.columns.iter().zip(&row.values) {
                payload.insert(column.clone(), Value::from(*value));
            }
            FeatureArtifact {
                source: row.source.clone(),
                payload: Value::Object(payload),
            }
        })
        .collect()
}

pub fn save_weather_artifacts(
    conn: &mut Connection,
    artifacts: &[FeatureArtifact],
    processed_timestamp: i64,
) -> Result<usize, ArtifactError> {
    save_single_keyed(
        conn,
        "processed_weather_ingestion_data",
        artifacts,
        processed_timestamp,
    )
}

pub fn save_air_quality_artifacts(
    conn: &mut Connection,
    artifacts: &[FeatureArtifact],
    processed_timestamp: i64,
) -> Result<usize, ArtifactError> {
    save_single_keyed(
        conn,
        "processed_air_quality_ingestion_data",
        artifacts,
        processed_timestamp,
    )
}

fn save_single_keyed(
    conn: &mut Connection,
    table: &'static str,
    artifacts: &[FeatureArtifact],
    processed_timestamp: i64,
) -> Result<usize, ArtifactError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "
            INSERT INTO {table} (ingestion_record_id, json_data, processed_timestamp)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(ingestion_record_id) DO UPDATE SET
                json_data = excluded.json_data,
                processed_timestamp = excluded.processed_timestamp
            "
        ))?;

        for artifact in artifacts {
            let FeatureSource::Record { record_id } = &artifact.source else {
                return Err(ArtifactError::KeyShape { table });
            };
            let json_data = serde_json::to_string(&artifact.payload)?;
            stmt.execute(params![record_id, json_data, processed_timestamp])?;
        }
    }
    tx.commit()?;

    info!(
        component = "artifacts",
        event = "artifacts.save",
        table = table,
        rows = artifacts.len(),
        processed_timestamp = processed_timestamp
    );
    Ok(artifacts.len())
}

pub fn save_combined_artifacts(
    conn: &mut Connection,
    artifacts: &[FeatureArtifact],
    processed_timestamp: i64,
) -> Result<usize, ArtifactError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "
            INSERT INTO combined_processed_ingestion_data (
                weather_record_id, air_quality_record_id, json_data,
                processed_timestamp
            ) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(weather_record_id, air_quality_record_id) DO UPDATE SET
                json_data = excluded.json_data,
                processed_timestamp = excluded.processed_timestamp
            ",
        )?;

        for artifact in artifacts {
            let FeatureSource::Pair {
                weather_record_id,
                air_quality_record_id,
            } = &artifact.source
            else {
                return Err(ArtifactError::KeyShape {
                    table: "combined_processed_ingestion_data",
                });
            };
            let json_data = serde_json::to_string(&artifact.payload)?;
            stmt.execute(params![
                weather_record_id,
                air_quality_record_id,
                json_data,
                processed_timestamp,
            ])?;
        }
    }
    tx.commit()?;

    info!(
        component = "artifacts",
        event = "artifacts.save",
        table = "combined_processed_ingestion_data",
        rows = artifacts.len(),
        processed_timestamp = processed_timestamp
    );
    Ok(artifacts.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureMatrixRow;
    use crate::store::ensure_schema;

    fn memory_store() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory sqlite");
        ensure_schema(&conn).expect("schema");
        conn
    }

    fn single_row_matrix(record_id: &str, temp: f64) -> FeatureMatrix {
        FeatureMatrix {
            columns: vec!["temp".to_string(), "humidity".to_string()],
            rows: vec![FeatureMatrixRow {
                source: FeatureSource::Record {
                    record_id: record_id.to_string(),
                },
                values: vec![temp, 60.0],
            }],
        }
    }

    fn weather_artifact_rows(conn: &Connection) -> Vec<(String, String, i64)> {
        let mut stmt = conn
            .prepare(
                "SELECT ingestion_record_id, json_data, processed_timestamp
                 FROM processed_weather_ingestion_data",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap();
        rows.map(|row| row.unwrap()).collect()
    }

    #[test]
    fn payload_keys_are_the_matrix_columns() {
        let artifacts = build_artifacts(&single_row_matrix("abc", 21.5));
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].payload["temp"], 21.5);
        assert_eq!(artifacts[0].payload["humidity"], 60.0);
    }

    #[test]
    fn saving_twice_keeps_one_row_with_latest_payload() {
        let mut conn = memory_store();

        let first = build_artifacts(&single_row_matrix("abc", 21.5));
        save_weather_artifacts(&mut conn, &first, 100).unwrap();

        let second = build_artifacts(&single_row_matrix("abc", 25.0));
        save_weather_artifacts(&mut conn, &second, 200).unwrap();

        let rows = weather_artifact_rows(&conn);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "abc");
        assert_eq!(rows[0].2, 200);
        let payload: Value = serde_json::from_str(&rows[0].1).unwrap();
        assert_eq!(payload["temp"], 25.0);
    }

    #[test]
    fn combined_artifacts_are_keyed_by_the_id_pair() {
        let mut conn = memory_store();
        let matrix = FeatureMatrix {
            columns: vec!["pollution_weather_index".to_string()],
            rows: vec![FeatureMatrixRow {
                source: FeatureSource::Pair {
                    weather_record_id: "w1".to_string(),
                    air_quality_record_id: "a1".to_string(),
                },
                values: vec![1.2],
            }],
        };

        let artifacts = build_artifacts(&matrix);
        save_combined_artifacts(&mut conn, &artifacts, 100).unwrap();
        save_combined_artifacts(&mut conn, &artifacts, 200).unwrap();

        let (count, latest): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(processed_timestamp)
                 FROM combined_processed_ingestion_data",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(latest, 200);
    }

    #[test]
    fn pair_key_is_rejected_by_single_keyed_tables() {
        let mut conn = memory_store();
        let artifact = FeatureArtifact {
            source: FeatureSource::Pair {
                weather_record_id: "w1".to_string(),
                air_quality_record_id: "a1".to_string(),
            },
            payload: Value::Object(Map::new()),
        };

        let err = save_weather_artifacts(&mut conn, &[artifact], 1).unwrap_err();
        assert!(matches!(err, ArtifactError::KeyShape { .. }));
    }
}
