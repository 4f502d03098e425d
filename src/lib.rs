//! Environmental observation pipeline core crate.
//!
//! Implemented scope:
//! - ingestion of weather and air-quality observations per configured city
//! - idempotent SQLite persistence keyed by (kind, city, ingestion timestamp)
//! - inner join of the two series into combined records
//! - feature-matrix encoding and JSON artifact persistence
//! - prediction-time feature schema alignment

mod artifacts;
mod features;
mod ingest;
mod join;
mod model;
mod normalize;
mod observability;
mod process;
mod source;
mod store;
mod validate;

pub use artifacts::{
    build_artifacts, save_air_quality_artifacts, save_combined_artifacts, save_weather_artifacts,
    ArtifactError, FeatureArtifact,
};
pub use features::{
    encode_air_quality_features, encode_combined_features, encode_weather_features, FeatureError,
    FeatureMatrix, FeatureMatrixRow, FeatureSource, Normalizer,
};
pub use ingest::{
    default_cities, ingest_now, parse_city_list, run_ingestion, AirQualityIngestor, BatchReport,
    CityOutcome, IngestError, Ingestor, OutcomeStatus, WeatherIngestor,
};
pub use join::{join_observations, CombinedRecord, JoinConfig};
pub use model::{align_feature_vector, predict_named, ModelError, Predictor};
pub use normalize::{flatten_air_quality, flatten_weather, FlatAirQuality, FlatWeather};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use process::{
    run_processor, AirQualityProcessor, CombinedProcessor, ProcessError, ProcessReport, Processor,
    WeatherProcessor,
};
pub use source::{
    fetch_observation, City, HttpFetcher, ObservationKind, RawObservation,
    ReqwestBlockingFetcher, SourceConfig, SourceError, TransportError, DEFAULT_BASE_URL,
    DEFAULT_TIMEOUT_MS,
};
pub use store::{
    ensure_schema, fetch_air_quality, fetch_weather, open_store, record_id, upsert_air_quality,
    upsert_air_quality_batch, upsert_weather, upsert_weather_batch, StoreError, Stored,
};
pub use validate::{
    validate_air_quality, validate_weather, AirQualityRecord, ValidationError, WeatherRecord,
    AQI_MAX, AQI_MIN, TEMP_MAX_C, TEMP_MIN_C,
};
