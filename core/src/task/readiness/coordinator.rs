//! Pipeline readiness gate.
//!
//! After the worker pipelines have been launched, the coordinator blocks on
//! the control topic until every trackable pipeline has reported a "start"
//! status for the current run, or the setup budget runs out. A timeout is
//! not a failure: the run proceeds in a degraded state with the stragglers
//! logged.

use super::config::MAX_TRACKABLE_THRESHOLD;
use crate::event::Event;
use crate::transport::Channel;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

/// Status field of a control message.
pub const STATUS_FIELD: &str = "STATUS";
/// Run identifier field of a control message.
pub const RUN_ID_FIELD: &str = "runId";
/// Pipeline name field of a control message.
pub const PIPELINE_FIELD: &str = "pipeline";
/// Status value a pipeline reports once it is waiting for its first event.
pub const READY_STATUS: &str = "start";

/// Errors that can occur while building or running the coordinator.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Required builder attribute was not provided.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
    /// Subscribing to the control topic failed.
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),
}

/// Terminal state of one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every tracked pipeline reported in time.
    Ready,
    /// The budget elapsed with pipelines still pending; proceeding anyway.
    Degraded,
    /// Nothing was trackable; proceeded after the fallback delay.
    Skipped,
}

/// Result of one readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    pub outcome: Outcome,
    /// Pipelines that reported readiness for this run.
    pub ready: BTreeSet<String>,
    /// Pipelines still unheard from when the wait ended.
    pub pending: BTreeSet<String>,
}

/// One-shot readiness gate over a control-topic subscription.
pub struct Coordinator {
    config: Arc<super::config::Coordinator>,
    channel: Arc<dyn Channel>,
}

impl crate::task::runner::Runner for Coordinator {
    type Output = ReadinessReport;
    type Error = Error;

    #[tracing::instrument(skip(self), name = "readiness", fields(run_id = %self.config.run_id))]
    async fn run(self) -> Result<ReadinessReport, Error> {
        let mut pending = self.trackable_pipelines();

        if pending.is_empty() {
            warn!(
                "Unable to detect when pipelines are ready; proceeding to send visit events in {}s",
                self.config.short_setup_timeout.as_secs()
            );
            time::sleep(self.config.short_setup_timeout).await;
            return Ok(ReadinessReport {
                outcome: Outcome::Skipped,
                ready: BTreeSet::new(),
                pending,
            });
        }

        // The primary pipeline is slow to set up; everything else gets the
        // short budget.
        let budget = match &self.config.primary_pipeline {
            Some(primary) if pending.contains(primary) => self.config.setup_timeout,
            _ => self.config.short_setup_timeout,
        };

        info!("Waiting for pipelines to set up (this can take a while)...");
        let mut subscription = self.channel.subscribe(&self.config.logging_topic).await?;

        let mut ready = BTreeSet::new();
        let deadline = Instant::now() + budget;

        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            // Bounded receive on the remaining budget. A quiet spell only
            // ends the wait once the deadline has actually passed.
            match subscription.recv_timeout(remaining).await {
                Some(event) => {
                    if let Some(name) = self.match_ready_signal(&event) {
                        if pending.remove(&name) {
                            debug!("{} is ready", name);
                            ready.insert(name);
                        }
                    }
                }
                None => break,
            }
        }

        let outcome = if pending.is_empty() {
            info!("All pipelines are ready");
            Outcome::Ready
        } else {
            warn!(
                "Have yet to hear back from the following pipelines: {}; \
                 proceeding to send visit events",
                pending.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            Outcome::Degraded
        };

        Ok(ReadinessReport {
            outcome,
            ready,
            pending,
        })
    }
}

impl Coordinator {
    /// Launch-enabled pipelines whose logging is verbose enough to emit the
    /// readiness signal.
    fn trackable_pipelines(&self) -> BTreeSet<String> {
        let mut pending = BTreeSet::new();
        for pipeline in &self.config.pipelines {
            if !pipeline.launch {
                continue;
            }
            if !self.config.production_is_verbose()
                && pipeline
                    .log_threshold
                    .is_some_and(|threshold| threshold > MAX_TRACKABLE_THRESHOLD)
            {
                warn!(
                    "{} pipeline's logging not verbose enough to track its readiness",
                    pipeline.name
                );
                continue;
            }
            debug!("Waiting for the {} pipeline to be ready...", pipeline.name);
            pending.insert(pipeline.name.clone());
        }
        pending
    }

    /// Returns the pipeline name when the event is a "start" signal for the
    /// current run.
    fn match_ready_signal(&self, event: &Event) -> Option<String> {
        let field = |name: &str| event.payload.get(name).and_then(serde_json::Value::as_str);

        if field(STATUS_FIELD) != Some(READY_STATUS) {
            return None;
        }
        if field(RUN_ID_FIELD) != Some(self.config.run_id.as_str()) {
            return None;
        }
        field(PIPELINE_FIELD).map(str::to_string)
    }
}

/// Builder for constructing Coordinator instances with validation.
#[derive(Default)]
pub struct CoordinatorBuilder {
    config: Option<Arc<super::config::Coordinator>>,
    channel: Option<Arc<dyn Channel>>,
}

impl CoordinatorBuilder {
    pub fn new() -> CoordinatorBuilder {
        CoordinatorBuilder {
            ..Default::default()
        }
    }

    pub fn config(mut self, config: Arc<super::config::Coordinator>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn build(self) -> Result<Coordinator, Error> {
        Ok(Coordinator {
            config: self
                .config
                .ok_or_else(|| Error::MissingRequiredAttribute("config".to_string()))?,
            channel: self
                .channel
                .ok_or_else(|| Error::MissingRequiredAttribute("channel".to_string()))?,
        })
    }
}
