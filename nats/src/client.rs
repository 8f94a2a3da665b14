//! NATS client construction from a credentials file.

use obsrun_core::retry::RetryConfig;
use std::fs;
use std::path::PathBuf;

/// Default NATS server host.
const DEFAULT_NATS_HOST: &str = "localhost:4222";

/// NATS client credentials.
#[derive(serde::Deserialize)]
struct Credentials {
    /// nKey public key string.
    nkey: Option<String>,
    /// Optional host value, if not passed localhost:4222 will be used.
    host: Option<String>,
}

/// Errors that can occur during NATS client operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to open or read the credentials file.
    #[error(transparent)]
    OpenFile(#[from] std::io::Error),
    /// Failed to parse the credentials JSON file.
    #[error(transparent)]
    ParseCredentials(#[from] serde_json::Error),
    /// Failed to establish a connection to the server.
    #[error(transparent)]
    Connect(#[from] async_nats::ConnectError),
    /// Required configuration attribute is missing.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
}

/// NATS client handle.
#[derive(Debug)]
pub struct Client {
    /// Path to the NATS credentials file.
    credentials_path: PathBuf,
    /// Connection retry settings.
    retry: RetryConfig,
    /// Connected client, populated by `connect`.
    pub client: Option<async_nats::Client>,
}

impl obsrun_core::client::Client for Client {
    type Error = Error;

    /// Connects to the NATS server, retrying with exponential backoff.
    ///
    /// Connection establishment is the only transport operation that is
    /// retried; publish and receive failures propagate to the caller.
    async fn connect(mut self) -> Result<Self, Error> {
        let credentials: Credentials =
            serde_json::from_str(&fs::read_to_string(&self.credentials_path)?)?;

        let host = credentials.host.unwrap_or_else(|| DEFAULT_NATS_HOST.to_string());
        let nkey = credentials.nkey;

        let nats_client = tokio_retry::Retry::spawn(self.retry.strategy(), || {
            let host = host.clone();
            let nkey = nkey.clone();
            async move {
                let connect_options = match nkey {
                    Some(nkey) => async_nats::ConnectOptions::with_nkey(nkey),
                    None => async_nats::ConnectOptions::new(),
                };
                connect_options.connect(host).await
            }
        })
        .await?;

        self.client = Some(nats_client);
        Ok(self)
    }
}

/// Builder for configuring and creating NATS clients.
#[derive(Default)]
pub struct ClientBuilder {
    credentials_path: Option<PathBuf>,
    retry: Option<RetryConfig>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder::default()
    }

    /// Pass credentials file as path to the file.
    pub fn credentials_path(&mut self, credentials_path: PathBuf) -> &mut ClientBuilder {
        self.credentials_path = Some(credentials_path);
        self
    }

    /// Override the connection retry settings.
    pub fn retry(&mut self, retry: RetryConfig) -> &mut ClientBuilder {
        self.retry = Some(retry);
        self
    }

    /// Creates the unconnected client, or an error when the credentials
    /// path was not provided.
    pub fn build(&self) -> Result<Client, Error> {
        Ok(Client {
            credentials_path: self
                .credentials_path
                .clone()
                .ok_or_else(|| Error::MissingRequiredAttribute("credentials_path".to_string()))?,
            retry: self.retry.clone().unwrap_or_default(),
            client: None,
        })
    }
}
