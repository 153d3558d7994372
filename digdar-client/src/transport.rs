//! HTTP access to the instrument server.
//!
//! The scheduler only sees the [`Transport`] trait so tests can script the
//! server. [`HttpTransport`] is the real thing, built on `reqwest`.
//!
//! | Call | Request |
//! |------|---------|
//! | fetch | `GET {root}/data` |
//! | push | `POST {root}/data` with `{"datasets":{"params":{...}}}` |
//! | start_app | `GET {root}/bazaar?start={app_id}` |
//! | stop_app | `GET {root}/bazaar?stop=` |
//! | store_params | `POST {root}/store_params` |
//! | load_params | `GET {root}/load_params` |
//! | load_factory_params | `GET {root}/load_factory_params` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use thiserror::Error;

use digdar_core::protocol::{parse_param_document, PushRequest};
use digdar_core::{DataResponse, ParameterSet, ProtocolError};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Short status word for operator notices.
    pub fn status_text(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Http(e) if e.is_timeout() => "timeout",
            TransportError::Http(e) if e.is_decode() => "parsererror",
            TransportError::Protocol(_) => "parsererror",
            _ => "error",
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Poll for data and parameters.
    async fn fetch(&self, timeout: Duration) -> Result<DataResponse, TransportError>;

    /// Send a parameter snapshot. The server echoes its resulting state.
    async fn push(
        &self,
        params: &ParameterSet,
        timeout: Duration,
    ) -> Result<DataResponse, TransportError>;

    /// Make sure `app_id` is running on the server.
    async fn start_app(&self, app_id: &str) -> Result<DataResponse, TransportError>;

    async fn stop_app(&self) -> Result<(), TransportError>;

    async fn store_params(&self, params: &ParameterSet) -> Result<(), TransportError>;

    async fn load_params(&self) -> Result<ParameterSet, TransportError>;

    async fn load_factory_params(&self) -> Result<ParameterSet, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    root: String,
    timeout: Duration,
}

impl HttpTransport {
    /// `root` is the server base URL; `timeout` applies to the calls that
    /// do not take their own.
    pub fn new(root: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpTransport {
            client,
            root: root.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let response = request
            .header(CACHE_CONTROL, "no-cache")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Http(e)
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn get_params(&self, path: &str) -> Result<ParameterSet, TransportError> {
        let body = self.send(self.client.get(self.url(path)), self.timeout).await?;
        let text = String::from_utf8_lossy(&body);
        Ok(parse_param_document(&text)?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, timeout: Duration) -> Result<DataResponse, TransportError> {
        let body = self.send(self.client.get(self.url("data")), timeout).await?;
        log::trace!("fetch: {} bytes", body.len());
        Ok(DataResponse::from_slice(&body)?)
    }

    async fn push(
        &self,
        params: &ParameterSet,
        timeout: Duration,
    ) -> Result<DataResponse, TransportError> {
        let body = PushRequest::new(params).to_vec()?;
        let request = self
            .client
            .post(self.url("data"))
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let response = self.send(request, timeout).await?;
        Ok(DataResponse::from_slice(&response)?)
    }

    async fn start_app(&self, app_id: &str) -> Result<DataResponse, TransportError> {
        let request = self
            .client
            .get(self.url("bazaar"))
            .query(&[("start", app_id)]);
        let body = self.send(request, self.timeout).await?;
        Ok(DataResponse::from_slice(&body)?)
    }

    async fn stop_app(&self) -> Result<(), TransportError> {
        let request = self.client.get(self.url("bazaar")).query(&[("stop", "")]);
        self.send(request, self.timeout).await?;
        Ok(())
    }

    async fn store_params(&self, params: &ParameterSet) -> Result<(), TransportError> {
        let body = serde_json::to_vec(params).map_err(ProtocolError::from)?;
        let request = self
            .client
            .post(self.url("store_params"))
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.send(request, self.timeout).await?;
        Ok(())
    }

    async fn load_params(&self) -> Result<ParameterSet, TransportError> {
        self.get_params("load_params").await
    }

    async fn load_factory_params(&self) -> Result<ParameterSet, TransportError> {
        self.get_params("load_factory_params").await
    }
}
