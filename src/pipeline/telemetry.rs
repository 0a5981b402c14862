//! Delivery of telemetry events to the monitoring endpoint.

use crate::config::ApiConfig;
use crate::pipeline::error::{PipelineError, PipelineResult};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one serialized event somewhere.
#[cfg_attr(test, mockall::automock)]
pub trait EventTransport: Send + Sync {
    fn deliver(&self, body: &[u8]) -> PipelineResult<()>;
}

/// POSTs events as JSON, with basic auth when both a process id and key are set.
pub struct HttpTransport {
    client: Client,
    uri: String,
    credentials: Option<(String, String)>,
}

impl HttpTransport {
    pub fn new(api: &ApiConfig) -> PipelineResult<Self> {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Telemetry(format!("cannot build http client: {}", e)))?;

        let credentials = if api.pid.is_empty() || api.key.is_empty() {
            None
        } else {
            Some((api.pid.clone(), api.key.clone()))
        };

        Ok(Self {
            client,
            uri: api.uri.clone(),
            credentials,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

impl EventTransport for HttpTransport {
    fn deliver(&self, body: &[u8]) -> PipelineResult<()> {
        let mut request = self
            .client
            .post(&self.uri)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some((pid, key)) = &self.credentials {
            request = request.basic_auth(pid, Some(key));
        }

        let response = request
            .send()
            .map_err(|e| PipelineError::Telemetry(format!("POST {}: {}", self.uri, e)))?;

        match response.status().as_u16() {
            200 | 201 => Ok(()),
            code => Err(PipelineError::Telemetry(format!(
                "POST {} returned status {}",
                self.uri, code
            ))),
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("uri", &self.uri)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}
