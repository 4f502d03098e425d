use envpipe::{
    open_store, run_processor, upsert_air_quality, upsert_weather, AirQualityProcessor,
    AirQualityRecord, CombinedProcessor, ProcessError, WeatherProcessor, WeatherRecord,
};
use rusqlite::Connection;
use serde_json::Value;
use tempfile::TempDir;

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

fn seeded_store(dir: &TempDir) -> Connection {
    let mut conn = open_store(&dir.path().join("envpipe.sqlite")).expect("store");
    let ts = 1_700_000_100_000;

    upsert_weather(&mut conn, &weather_record("Stockholm", ts, 20.0), 1).expect("weather");
    upsert_weather(&mut conn, &weather_record("Gothenburg", ts, 18.0), 1).expect("weather");
    upsert_air_quality(&mut conn, &air_record("Stockholm", ts, 2), 1).expect("air");
    // Malmo has no weather counterpart, so the combined run must skip it.
    upsert_air_quality(&mut conn, &air_record("Malmo", ts, 3), 1).expect("air");
    conn
}

#[test]
fn all_three_processors_persist_artifacts_from_one_store() {
    let dir = TempDir::new().expect("temp dir");
    let mut conn = seeded_store(&dir);

    let weather = run_processor(&WeatherProcessor, &mut conn, 100).expect("weather run");
    assert_eq!(weather.input_rows, 2);
    assert_eq!(weather.artifacts_saved, 2);

    let air = run_processor(&AirQualityProcessor, &mut conn, 100).expect("air run");
    assert_eq!(air.input_rows, 2);

    let combined = run_processor(&CombinedProcessor::default(), &mut conn, 100).expect("combined");
    assert_eq!(combined.input_rows, 1);

    for (table, expected) in [
        ("processed_weather_ingestion_data", 2i64),
        ("processed_air_quality_ingestion_data", 2),
        ("combined_processed_ingestion_data", 1),
    ] {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .expect("count");
        assert_eq!(count, expected, "unexpected row count in {table}");
    }
}

#[test]
fn combined_artifact_payload_carries_derived_features_and_no_data_source() {
    let dir = TempDir::new().expect("temp dir");
    let mut conn = seeded_store(&dir);

    run_processor(&CombinedProcessor::default(), &mut conn, 100).expect("combined");

    let json_data: String = conn
        .query_row(
            "SELECT json_data FROM combined_processed_ingestion_data",
            [],
            |row| row.get(0),
        )
        .expect("artifact row");
    let payload: Value = serde_json::from_str(&json_data).expect("valid JSON");
    let object = payload.as_object().expect("object payload");

    // aqi 2 * humidity 60 / 100
    assert_eq!(object["pollution_weather_index"], 1.2);
    assert_eq!(object["wind_pollution_clearance"], 3.4 / 3.0);
    assert!(object.contains_key("environmental_stress"));
    assert!(object.contains_key("temp_pollution_ratio"));
    assert!(!object.contains_key("data_source"));
    assert!(object.keys().all(|key| !key.contains(' ')));
}

#[test]
fn reprocessing_overwrites_artifacts_in_place() {
    let dir = TempDir::new().expect("temp dir");
    let mut conn = seeded_store(&dir);

    run_processor(&WeatherProcessor, &mut conn, 100).expect("first run");
    run_processor(&WeatherProcessor, &mut conn, 200).expect("second run");

    let (count, latest): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), MAX(processed_timestamp) FROM processed_weather_ingestion_data",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("counts");
    assert_eq!(count, 2);
    assert_eq!(latest, 200);
}

#[test]
fn empty_store_fails_processing_with_empty_input() {
    let dir = TempDir::new().expect("temp dir");
    let mut conn = open_store(&dir.path().join("envpipe.sqlite")).expect("store");

    let err = run_processor(&AirQualityProcessor, &mut conn, 100).expect_err("must fail");
    assert!(matches!(err, ProcessError::EmptyInput));
}
