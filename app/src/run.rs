//! Run driver: readiness gate, then the visit cadence.
//!
//! The worker pipelines themselves are launched out of band before the
//! driver starts; this only gates on their readiness signals and then
//! generates the visit events they consume.

use crate::config::{DatatypeDoc, MetadataDoc, PlatformDoc, RunConfig, TransportOptions, VisitSource};
use obsrun_core::client::Client as _;
use obsrun_core::reader::JsonHeaderReader;
use obsrun_core::task::runner::Runner;
use obsrun_core::task::{cadence, readiness};
use obsrun_core::transport::{Channel, LocalChannel};
use obsrun_core::visit::{self, VisitRecord};
use obsrun_nats::channel::NatsChannel;
use std::sync::Arc;
use tracing::info;

/// Errors that can occur during application execution.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading error.
    #[error(transparent)]
    Config(#[from] crate::config::Error),
    /// NATS client error.
    #[error(transparent)]
    NatsClient(#[from] obsrun_nats::client::Error),
    /// Error in the readiness coordinator.
    #[error(transparent)]
    Readiness(#[from] readiness::coordinator::Error),
    /// Error in the cadence generator.
    #[error(transparent)]
    Cadence(#[from] cadence::subscriber::Error),
    /// Visit discovery error.
    #[error(transparent)]
    Visit(#[from] visit::Error),
    /// The transport client reported success without a live connection.
    #[error("Transport client is not connected")]
    NotConnected,
}

/// Main application driving one run.
pub struct App {
    /// Global run configuration.
    pub config: RunConfig,
}

impl App {
    /// Runs the readiness gate and the cadence pass, terminating cleanly on
    /// an external interrupt.
    #[tracing::instrument(skip(self), name = "run", fields(run_id = %self.config.run_id))]
    pub async fn start(self) -> Result<(), Error> {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received; shutting down.");
                Ok(())
            }
            result = self.drive() => result,
        }
    }

    async fn drive(&self) -> Result<(), Error> {
        // Policy documents load once, before anything is published; a
        // malformed document aborts the run here.
        let datatype: DatatypeDoc = crate::config::load(&self.config.documents.datatype)?;
        let metadata: MetadataDoc = crate::config::load(&self.config.documents.metadata)?;
        let platform: PlatformDoc = crate::config::load(&self.config.documents.platform)?;

        let channel = self.connect_channel().await?;

        let report = readiness::coordinator::CoordinatorBuilder::new()
            .config(Arc::new(self.readiness_config(platform)))
            .channel(Arc::clone(&channel))
            .build()?
            .run()
            .await?;
        info!(
            "Readiness gate finished ({:?}): {} ready, {} pending",
            report.outcome,
            report.ready.len(),
            report.pending.len()
        );

        let visits = self.discover_visits()?;
        info!("Discovered {} visits", visits.len());

        let summary = cadence::subscriber::SubscriberBuilder::new()
            .config(Arc::new(self.cadence_config(datatype, metadata)))
            .channel(channel)
            .reader(Arc::new(JsonHeaderReader))
            .visits(visits)
            .build()?
            .run()
            .await?;

        info!(
            "Run {} finished: {} events published",
            self.config.run_id, summary.events_published
        );
        Ok(())
    }

    async fn connect_channel(&self) -> Result<Arc<dyn Channel>, Error> {
        match &self.config.transport {
            TransportOptions::Local => Ok(Arc::new(LocalChannel::new())),
            TransportOptions::Nats { credentials_path } => {
                let mut builder = obsrun_nats::client::ClientBuilder::new();
                builder.credentials_path(credentials_path.clone());
                if let Some(retry) = &self.config.retry {
                    builder.retry(retry.clone());
                }
                let client = builder.build()?.connect().await?;
                let nats_client = client.client.ok_or(Error::NotConnected)?;
                Ok(Arc::new(NatsChannel::new(nats_client)))
            }
        }
    }

    fn readiness_config(&self, platform: PlatformDoc) -> readiness::config::Coordinator {
        let options = &self.config.readiness;
        readiness::config::Coordinator {
            run_id: self.config.run_id.clone(),
            logging_topic: options.logging_topic.clone(),
            pipelines: platform.pipelines,
            production_threshold: options.production_threshold,
            primary_pipeline: options.primary_pipeline.clone(),
            setup_timeout: options.setup_timeout,
            short_setup_timeout: options.short_setup_timeout,
        }
    }

    fn cadence_config(
        &self,
        datatype: DatatypeDoc,
        metadata: MetadataDoc,
    ) -> cadence::config::Subscriber {
        let options = &self.config.cadence;
        cadence::config::Subscriber {
            name: format!("{}-cadence", self.config.run_id),
            exp_time: options.exp_time,
            slew_time: options.slew_time,
            max_visits: options.max_visits,
            root_topic: options.root_topic.clone(),
            file_pattern: options.file_pattern.clone(),
            required_fields: metadata.required,
            mapping: datatype.mapping,
            rules: datatype.rules,
            suffix: datatype.suffix,
            id_scheme: datatype.id_scheme,
        }
    }

    fn discover_visits(&self) -> Result<Vec<VisitRecord>, Error> {
        match &self.config.visits {
            VisitSource::list { files } => {
                let mut visits = Vec::new();
                for file in files {
                    visits.extend(visit::from_list_file(file)?);
                }
                Ok(visits)
            }
            VisitSource::scan { root, subsets } => Ok(visit::from_subsets(root, subsets)?),
        }
    }
}
