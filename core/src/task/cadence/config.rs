//! Configuration for the visit cadence generator.

use crate::ids::IdScheme;
use crate::metadata::FieldMapping;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default exposure time per visit image.
pub const DEFAULT_EXP_TIME: Duration = Duration::from_secs(15);

/// Default telescope slew time between visits.
pub const DEFAULT_SLEW_TIME: Duration = Duration::from_secs(5);

/// Default root topic; the exposure parity suffix is appended per event.
pub const DEFAULT_ROOT_TOPIC: &str = "visit.trigger";

/// Default exposure file pattern within the `0`/`1` subdirectories.
pub const DEFAULT_FILE_PATTERN: &str = "*.json";

/// Errors that can occur during configuration validation.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("'root_topic' must not be empty")]
    MissingRootTopic,
    #[error("'required_fields' must name at least one canonical field")]
    NoRequiredFields,
}

/// Configuration for one cadence pass over a set of visits.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Subscriber {
    /// The unique name / identifier of the task.
    pub name: String,
    /// Exposure duration; the wait after the first event of a visit.
    #[serde(default = "default_exp_time", with = "humantime_serde")]
    pub exp_time: Duration,
    /// Slew duration; added to the wait after the second event of a visit.
    #[serde(default = "default_slew_time", with = "humantime_serde")]
    pub slew_time: Duration,
    /// Optional maximum number of visits before stopping (unset = unbounded).
    pub max_visits: Option<u64>,
    /// Root topic; events publish to `<root_topic>0` or `<root_topic>1`.
    #[serde(default = "default_root_topic")]
    pub root_topic: String,
    /// Glob pattern for exposure files inside the `0`/`1` subdirectories.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    /// Canonical fields every published event must carry.
    pub required_fields: Vec<String>,
    /// Keyword mapping for the input data type.
    #[serde(default)]
    pub mapping: FieldMapping,
    /// Ordered post-processing rule names for the input data type.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Mapping lookup suffix.
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Bit widths for the hierarchical exposure identifiers.
    #[serde(default)]
    pub id_scheme: IdScheme,
}

impl Subscriber {
    /// Validates the per-run invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_topic.is_empty() {
            return Err(ConfigError::MissingRootTopic);
        }
        if self.required_fields.is_empty() {
            return Err(ConfigError::NoRequiredFields);
        }
        Ok(())
    }
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
    crate::metadata::DEFAULT_MAPPING_SUFFIX.to_string()
}
