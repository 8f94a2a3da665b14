//! Configuration for the pipeline readiness gate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default budget when the primary, slow-starting pipeline is tracked.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(3000);

/// Default budget otherwise, and the fallback delay when nothing is
/// trackable.
pub const DEFAULT_SHORT_SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default control topic readiness signals arrive on.
pub const DEFAULT_LOGGING_TOPIC: &str = "pipeline.logging";

/// Highest log threshold at which a pipeline still emits the readiness
/// signal; anything coarser cannot be tracked.
pub const MAX_TRACKABLE_THRESHOLD: i32 = -1;

/// One worker pipeline as declared in the platform description.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct PipelineSpec {
    /// Pipeline name, matched against readiness signals.
    pub name: String,
    /// Whether this pipeline is launched for the run.
    #[serde(default)]
    pub launch: bool,
    /// The pipeline's own log threshold (lower is more verbose).
    pub log_threshold: Option<i32>,
}

/// Configuration for one readiness wait.
#[derive(PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct Coordinator {
    /// Identifier of the current run; signals for other runs are ignored.
    pub run_id: String,
    /// Control topic carrying pipeline status/log messages.
    #[serde(default = "default_logging_topic")]
    pub logging_topic: String,
    /// Declared pipelines; only launch-enabled ones are awaited.
    pub pipelines: Vec<PipelineSpec>,
    /// Production-wide log threshold. When verbose enough, every launched
    /// pipeline is trackable regardless of its own threshold.
    pub production_threshold: Option<i32>,
    /// Slow-starting pipeline that warrants the long setup budget.
    pub primary_pipeline: Option<String>,
    /// Budget when the primary pipeline is among the tracked set.
    #[serde(default = "default_setup_timeout", with = "humantime_serde")]
    pub setup_timeout: Duration,
    /// Budget otherwise; also the fallback delay for untrackable runs.
    #[serde(default = "default_short_setup_timeout", with = "humantime_serde")]
    pub short_setup_timeout: Duration,
}

impl Coordinator {
    /// True when the production threshold alone guarantees the readiness
    /// signal is emitted.
    pub fn production_is_verbose(&self) -> bool {
        self.production_threshold
            .is_some_and(|threshold| threshold <= MAX_TRACKABLE_THRESHOLD)
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization_defaults() {
        let config: Coordinator = serde_json::from_str(
            r#"{"run_id": "rlp0130", "pipelines": [{"name": "IPSD", "launch": true}]}"#,
        )
        .unwrap();

        assert_eq!(config.logging_topic, DEFAULT_LOGGING_TOPIC);
        assert_eq!(config.setup_timeout, DEFAULT_SETUP_TIMEOUT);
        assert_eq!(config.short_setup_timeout, DEFAULT_SHORT_SETUP_TIMEOUT);
        assert_eq!(config.production_threshold, None);
        assert_eq!(config.primary_pipeline, None);
        assert_eq!(config.pipelines.len(), 1);
        assert!(config.pipelines[0].launch);
        assert_eq!(config.pipelines[0].log_threshold, None);
    }

    #[test]
    fn test_production_is_verbose() {
        let mut config: Coordinator = serde_json::from_str(
            r#"{"run_id": "r", "pipelines": []}"#,
        )
        .unwrap();
        assert!(!config.production_is_verbose());

        config.production_threshold = Some(0);
        assert!(!config.production_is_verbose());

        config.production_threshold = Some(-3);
        assert!(config.production_is_verbose());
    }

    #[test]
    fn test_duration_strings() {
        let config: Coordinator = serde_json::from_str(
            r#"{"run_id": "r", "pipelines": [],
                "setup_timeout": "50m", "short_setup_timeout": "10s"}"#,
        )
        .unwrap();
        assert_eq!(config.setup_timeout, Duration::from_secs(3000));
        assert_eq!(config.short_setup_timeout, Duration::from_secs(10));
    }
}
