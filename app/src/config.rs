//! Run configuration and the per-run policy documents.
//!
//! One TOML run configuration names the transport, the visit source and
//! three read-only documents: the data-type mapping (keyword associations
//! and transform rules), the metadata requirements (required canonical
//! fields) and the platform description (declared pipelines). Everything is
//! loaded once per run; a missing or malformed document aborts before any
//! event is sent.

use obsrun_core::ids::IdScheme;
use obsrun_core::metadata::{FieldMapping, DEFAULT_MAPPING_SUFFIX};
use obsrun_core::retry::RetryConfig;
use obsrun_core::task::cadence::config::{
    DEFAULT_EXP_TIME, DEFAULT_FILE_PATTERN, DEFAULT_ROOT_TOPIC, DEFAULT_SLEW_TIME,
};
use obsrun_core::task::readiness::config::{
    PipelineSpec, DEFAULT_LOGGING_TOPIC, DEFAULT_SETUP_TIMEOUT, DEFAULT_SHORT_SETUP_TIMEOUT,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur while loading configuration.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read or parse a configuration document.
    #[error("Failed to load configuration document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },
}

/// Loads one TOML configuration document.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    config::Config::builder()
        .add_source(config::File::from(path.to_path_buf()))
        .build()
        .and_then(config::Config::try_deserialize)
        .map_err(|source| Error::Document {
            path: path.to_path_buf(),
            source,
        })
}

/// Top-level run configuration.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct RunConfig {
    /// Identifier of this processing run.
    pub run_id: String,
    /// Event transport selection.
    pub transport: TransportOptions,
    /// Paths to the per-run policy documents.
    pub documents: DocumentOptions,
    /// Where visits come from.
    pub visits: VisitSource,
    /// Cadence timing and topics.
    #[serde(default)]
    pub cadence: CadenceOptions,
    /// Readiness gate settings.
    #[serde(default)]
    pub readiness: ReadinessOptions,
    /// Optional transport connection retry settings.
    pub retry: Option<RetryConfig>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<RunConfig, Error> {
        load(path)
    }
}

/// Event transport selection.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportOptions {
    /// In-process channel; useful for single-process runs and rehearsals.
    Local,
    /// NATS broker.
    Nats { credentials_path: PathBuf },
}

/// Paths to the three policy documents.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct DocumentOptions {
    pub datatype: PathBuf,
    pub metadata: PathBuf,
    pub platform: PathBuf,
}

/// Visit input source.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
#[allow(non_camel_case_types)]
pub enum VisitSource {
    /// Newline-delimited visit directory list files.
    list { files: Vec<PathBuf> },
    /// Named subset directories under a repository root.
    scan { root: PathBuf, subsets: Vec<String> },
}

/// Cadence timing and topic settings.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct CadenceOptions {
    #[serde(default = "default_exp_time", with = "humantime_serde")]
    pub exp_time: Duration,
    #[serde(default = "default_slew_time", with = "humantime_serde")]
    pub slew_time: Duration,
    /// Maximum number of visits to trigger (unset = unbounded).
    pub max_visits: Option<u64>,
    #[serde(default = "default_root_topic")]
    pub root_topic: String,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
}

impl Default for CadenceOptions {
    fn default() -> Self {
        CadenceOptions {
            exp_time: DEFAULT_EXP_TIME,
            slew_time: DEFAULT_SLEW_TIME,
            max_visits: None,
            root_topic: DEFAULT_ROOT_TOPIC.to_string(),
            file_pattern: DEFAULT_FILE_PATTERN.to_string(),
        }
    }
}

/// Readiness gate settings.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct ReadinessOptions {
    #[serde(default = "default_logging_topic")]
    pub logging_topic: String,
    pub production_threshold: Option<i32>,
    pub primary_pipeline: Option<String>,
    #[serde(default = "default_setup_timeout", with = "humantime_serde")]
    pub setup_timeout: Duration,
    #[serde(default = "default_short_setup_timeout", with = "humantime_serde")]
    pub short_setup_timeout: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        ReadinessOptions {
            logging_topic: DEFAULT_LOGGING_TOPIC.to_string(),
            production_threshold: None,
            primary_pipeline: None,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
            short_setup_timeout: DEFAULT_SHORT_SETUP_TIMEOUT,
        }
    }
}

/// Data-type mapping document: keyword associations and transform rules
/// for one input data collection.
#[derive(PartialEq, Clone, Debug, Default, Deserialize, Serialize)]
pub struct DatatypeDoc {
    /// Mapping lookup suffix.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Ordered post-processing rule names.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Canonical field name (plus suffix) to source keyword associations.
    #[serde(default)]
    pub mapping: FieldMapping,
    /// Bit widths for the hierarchical exposure identifiers.
    #[serde(default)]
    pub id_scheme: IdScheme,
}

/// Metadata requirements document.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct MetadataDoc {
    /// Canonical fields every published event must carry.
    pub required: Vec<String>,
}

/// Platform description document.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct PlatformDoc {
    /// Declared pipelines with launch flags and log thresholds.
    pub pipelines: Vec<PipelineSpec>,
}

fn default_exp_time() -> Duration {
    DEFAULT_EXP_TIME
}

fn default_slew_time() -> Duration {
    DEFAULT_SLEW_TIME
}

fn default_root_topic() -> String {
    DEFAULT_ROOT_TOPIC.to_string()
}

fn default_file_pattern() -> String {
    DEFAULT_FILE_PATTERN.to_string()
}

fn default_suffix() -> String {
    DEFAULT_MAPPING_SUFFIX.to_string()
}

fn default_logging_topic() -> String {
    DEFAULT_LOGGING_TOPIC.to_string()
}

fn default_setup_timeout() -> Duration {
    DEFAULT_SETUP_TIMEOUT
}

fn default_short_setup_timeout() -> Duration {
    DEFAULT_SHORT_SETUP_TIMEOUT
}
