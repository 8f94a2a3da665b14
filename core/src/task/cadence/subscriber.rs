//! Visit cadence generator.
//!
//! Walks a list of visit directories and publishes two canonical events per
//! visit, pacing them with the configured exposure and slew times. The
//! sleeps are intentional, observable behavior: they model the telescope's
//! exposure duration and slew to the next field, and downstream consumers
//! depend on the resulting event ordering.

use crate::event::{self, Event, EventBuilder};
use crate::metadata::{self, fields, Metadata};
use crate::reader::HeaderReader;
use crate::rules::RuleSet;
use crate::transport::Channel;
use crate::visit::{self, VisitRecord};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::time;
use tracing::{error, info, warn};

/// Errors that can occur while building or running the cadence generator.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Required builder attribute was not provided.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
    /// Invalid cadence configuration.
    #[error(transparent)]
    Config(#[from] super::config::ConfigError),
    /// Invalid rule list in the data-type mapping document.
    #[error(transparent)]
    Rules(#[from] crate::rules::Error),
    /// Invalid identifier bit widths.
    #[error(transparent)]
    IdScheme(#[from] crate::ids::Error),
    /// Visit discovery or exposure listing failed.
    #[error(transparent)]
    Visit(#[from] crate::visit::Error),
    /// Publishing an event failed; not retried here, the caller decides.
    #[error(transparent)]
    Transport(#[from] crate::transport::Error),
}

/// Reasons a single exposure is dropped while the run continues.
#[derive(thiserror::Error, Debug)]
enum ExposureError {
    #[error(transparent)]
    Header(#[from] crate::reader::Error),
    #[error(transparent)]
    Rule(#[from] crate::rules::Error),
    #[error(transparent)]
    Validation(#[from] crate::metadata::Error),
    #[error("Field '{0}' is not a non-negative integer")]
    NonIntegerField(&'static str),
    #[error(transparent)]
    Encode(#[from] crate::ids::Error),
    #[error(transparent)]
    Event(#[from] crate::event::Error),
}

/// Counters carried through one cadence pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CadenceSummary {
    /// Visits that consumed a slot, including skipped ones.
    pub visits_seen: u64,
    /// Visits skipped by the exposure-pairing integrity check.
    pub visits_skipped: u64,
    /// Events actually published.
    pub events_published: u64,
}

/// Cadenced visit event source.
pub struct Subscriber {
    config: Arc<super::config::Subscriber>,
    channel: Arc<dyn Channel>,
    reader: Arc<dyn HeaderReader>,
    visits: Vec<VisitRecord>,
    rules: RuleSet,
}

impl crate::task::runner::Runner for Subscriber {
    type Output = CadenceSummary;
    type Error = Error;

    #[tracing::instrument(skip(self), name = "cadence", fields(task = %self.config.name))]
    async fn run(self) -> Result<CadenceSummary, Error> {
        let mut summary = CadenceSummary::default();

        for visit in &self.visits {
            if let Some(max_visits) = self.config.max_visits {
                if summary.visits_seen >= max_visits {
                    info!("Maximum visit count ({}) reached; quitting.", max_visits);
                    break;
                }
            }
            // A visit consumes its slot before the pairing check, so a
            // skipped visit still counts against the cap.
            summary.visits_seen += 1;

            let (files0, files1) =
                visit::exposure_files(&visit.dir, &self.config.file_pattern)?;
            if files0.len() != files1.len() || files0.is_empty() {
                warn!(
                    "Skipping {}: wrong file count in 0 and 1",
                    visit.dir.display()
                );
                summary.visits_skipped += 1;
                continue;
            }

            // One event per exposure directory: every file in it belongs to
            // the same exposure, so the first carries the shared header.
            self.send_exposure(&files0[0], visit, &mut summary).await?;
            time::sleep(self.config.exp_time).await;
            self.send_exposure(&files1[0], visit, &mut summary).await?;
            time::sleep(self.config.exp_time + self.config.slew_time).await;
        }

        info!(
            "Cadence pass complete: {} events from {} visits ({} skipped)",
            summary.events_published, summary.visits_seen, summary.visits_skipped
        );
        Ok(summary)
    }
}

impl Subscriber {
    /// Publishes one exposure event, or drops the exposure with an error
    /// log when its metadata cannot produce a valid canonical event.
    async fn send_exposure(
        &self,
        file: &Path,
        visit: &VisitRecord,
        summary: &mut CadenceSummary,
    ) -> Result<(), Error> {
        match self.build_event(file, visit) {
            Ok(event) => {
                info!("Sending event for {}", file.display());
                self.channel.publish(&event.subject, &event).await?;
                summary.events_published += 1;
            }
            Err(e) => {
                error!("Unable to create event from {}: {}", file.display(), e);
            }
        }
        Ok(())
    }

    fn build_event(&self, file: &Path, visit: &VisitRecord) -> Result<Event, ExposureError> {
        let mut payload = self.reader.read(file)?;

        if !payload.contains_key(fields::VISIT_ID) {
            payload.insert(
                fields::VISIT_ID.to_string(),
                Value::String(visit.visit_id.clone()),
            );
        }

        metadata::transform(
            &mut payload,
            &self.config.required_fields,
            &self.config.mapping,
            &self.rules,
            &self.config.suffix,
        )?;
        metadata::validate(&payload, &self.config.required_fields)?;

        let exposure_id = self.attach_ids(&mut payload)?;

        // The topic suffix comes from the exposure parity carried in the
        // payload itself, not from the caller's loop position.
        let subject = event::exposure_topic(&self.config.root_topic, exposure_id);
        Ok(EventBuilder::new().payload(payload).subject(subject).build()?)
    }

    /// Encodes the composite identifiers into the payload and returns the
    /// exposure sequence number.
    fn attach_ids(&self, payload: &mut Metadata) -> Result<u64, ExposureError> {
        let integer = |payload: &Metadata, field: &'static str| {
            payload
                .get(field)
                .and_then(Value::as_u64)
                .ok_or(ExposureError::NonIntegerField(field))
        };

        let visit_id = integer(payload, fields::VISIT_ID)?;
        let exposure_id = integer(payload, fields::EXPOSURE_ID)?;

        let scheme = &self.config.id_scheme;
        let fpa_exposure_id = scheme.fpa_exposure_id(visit_id, exposure_id)?;
        payload.insert(fields::FPA_EXPOSURE_ID.to_string(), json!(fpa_exposure_id));

        if payload.contains_key(fields::CCD_ID) {
            let ccd_id = integer(payload, fields::CCD_ID)?;
            let ccd_exposure_id = scheme.ccd_exposure_id(fpa_exposure_id, ccd_id)?;
            payload.insert(fields::CCD_EXPOSURE_ID.to_string(), json!(ccd_exposure_id));

            if payload.contains_key(fields::AMP_ID) {
                let amp_id = integer(payload, fields::AMP_ID)?;
                let amp_exposure_id = scheme.amp_exposure_id(ccd_exposure_id, amp_id)?;
                payload.insert(fields::AMP_EXPOSURE_ID.to_string(), json!(amp_exposure_id));
            }
        }

        Ok(exposure_id)
    }
}

/// Builder for constructing cadence Subscriber instances with validation.
#[derive(Default)]
pub struct SubscriberBuilder {
    config: Option<Arc<super::config::Subscriber>>,
    channel: Option<Arc<dyn Channel>>,
    reader: Option<Arc<dyn HeaderReader>>,
    visits: Option<Vec<VisitRecord>>,
}

impl SubscriberBuilder {
    pub fn new() -> SubscriberBuilder {
        SubscriberBuilder {
            ..Default::default()
        }
    }

    pub fn config(mut self, config: Arc<super::config::Subscriber>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn reader(mut self, reader: Arc<dyn HeaderReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn visits(mut self, visits: Vec<VisitRecord>) -> Self {
        self.visits = Some(visits);
        self
    }

    pub fn build(self) -> Result<Subscriber, Error> {
        let config = self
            .config
            .ok_or_else(|| Error::MissingRequiredAttribute("config".to_string()))?;
        config.validate()?;
        config.id_scheme.validate()?;
        let rules = RuleSet::from_names(&config.rules)?;

        Ok(Subscriber {
            config,
            channel: self
                .channel
                .ok_or_else(|| Error::MissingRequiredAttribute("channel".to_string()))?,
            reader: self
                .reader
                .ok_or_else(|| Error::MissingRequiredAttribute("reader".to_string()))?,
            visits: self
                .visits
                .ok_or_else(|| Error::MissingRequiredAttribute("visits".to_string()))?,
            rules,
        })
    }
}
