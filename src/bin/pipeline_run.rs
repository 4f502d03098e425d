use std::path::PathBuf;

use chrono::Utc;
use envpipe::{
    default_cities, ingest_now, init_logging, log_app_start, logging_config_from_env,
    open_store, parse_city_list, run_processor, AirQualityIngestor, AirQualityProcessor,
    BatchReport, City, CombinedProcessor, OutcomeStatus, SourceConfig, WeatherIngestor,
    WeatherProcessor,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mode = std::env::args()
        .nth(1)
        .ok_or_else(|| usage("missing mode"))?;

    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start(&mode, &logging);

    let store_path = std::env::var("ENVPIPE_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/envpipe.sqlite"));
    let mut conn = open_store(&store_path)?;

    match mode.as_str() {
        "ingest-weather" => {
            let report = ingest_now(&WeatherIngestor, &source_config()?, &mut conn, &cities()?)?;
            print_report(&report);
        }
        "ingest-air-quality" => {
            let report =
                ingest_now(&AirQualityIngestor, &source_config()?, &mut conn, &cities()?)?;
            print_report(&report);
        }
        "process-weather" => {
            let report = run_processor(&WeatherProcessor, &mut conn, now_ms())?;
            println!(
                "processed {} weather records into {} artifacts",
                report.input_rows, report.artifacts_saved
            );
        }
        "process-air-quality" => {
            let report = run_processor(&AirQualityProcessor, &mut conn, now_ms())?;
            println!(
                "processed {} air-quality records into {} artifacts",
                report.input_rows, report.artifacts_saved
            );
        }
        "process-combined" => {
            let report = run_processor(&CombinedProcessor::default(), &mut conn, now_ms())?;
            println!(
                "processed {} combined records into {} artifacts",
                report.input_rows, report.artifacts_saved
            );
        }
        other => return Err(usage(&format!("unknown mode: {other}")).into()),
    }

    Ok(())
}

fn usage(problem: &str) -> String {
    format!(
        "{problem}\nusage: pipeline_run <ingest-weather|ingest-air-quality|process-weather|process-air-quality|process-combined>"
    )
}

fn source_config() -> Result<SourceConfig, Box<dyn std::error::Error>> {
    let api_key = std::env::var("WEATHER_API_KEY")
        .map_err(|_| "WEATHER_API_KEY must be set for ingestion modes")?;
    Ok(SourceConfig {
        api_key,
        ..SourceConfig::default()
    })
}

/// `ENVPIPE_CITIES` overrides the built-in city set; entries are
/// `Name,lat,lon` separated by semicolons.
fn cities() -> Result<Vec<City>, Box<dyn std::error::Error>> {
    match std::env::var("ENVPIPE_CITIES") {
        Ok(raw) => Ok(parse_city_list(&raw)?),
        Err(_) => Ok(default_cities()),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn print_report(report: &BatchReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            OutcomeStatus::Success {
                record_id, summary, ..
            } => println!("{}: ok ({summary}) id={record_id}", outcome.city),
            OutcomeStatus::Error { message } => println!("{}: error ({message})", outcome.city),
        }
    }
    println!(
        "INGESTION SUMMARY: {}/{} cities successful",
        report.success_count(),
        report.total()
    );
}
