//! HTTP client transports.

use async_trait::async_trait;

use super::{AsyncTransport, ClientConfig, Transport, TransportError};
use crate::version::REMOTE_REFLECT_VERSION;

const CONTENT_TYPE: &str = "text/xml";

fn user_agent() -> String {
    format!("remote-reflect/{}", REMOTE_REFLECT_VERSION)
}

/// Blocking transport over ureq.
pub struct HttpTransport {
    url: String,
    agent: ureq::Agent,
    user_agent: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .new_agent();
        Self {
            url: config.url.clone(),
            agent,
            user_agent: user_agent(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    fn exchange(&self, body: String) -> Result<String, TransportError> {
        tracing::trace!(url = %self.url, bytes = body.len(), "Sending envelope");
        let mut response = self
            .agent
            .post(&self.url)
            .header("Content-Type", CONTENT_TYPE)
            .header("User-Agent", &self.user_agent)
            .send(body)
            .map_err(|e| match e {
                ureq::Error::StatusCode(status) => TransportError::Status(status),
                other => TransportError::Blocking(other),
            })?;
        Ok(response.body_mut().read_to_string()?)
    }
}

/// Async transport over reqwest.
#[derive(Clone)]
pub struct AsyncHttpTransport {
    url: String,
    client: reqwest::Client,
}

impl AsyncHttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent()) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static(CONTENT_TYPE),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AsyncTransport for AsyncHttpTransport {
    async fn exchange(&self, body: String) -> Result<String, TransportError> {
        tracing::trace!(url = %self.url, bytes = body.len(), "Sending envelope");
        let response = self.client.post(&self.url).body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}
