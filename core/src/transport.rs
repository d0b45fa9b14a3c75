//! Network transport underneath the gateway
//!
//! The gateway never talks to `reqwest` directly; it goes through the
//! [`Transport`] trait so tests can substitute a scripted fake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;
use crate::{Error, Result};

/// HTTP methods the gateway issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// A request relative to the API base address
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path beginning with `/`, e.g. `/entries/region/5`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: &str, query: &[(&str, &str)]) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: None,
        }
    }

    pub fn mutation(method: Method, path: &str, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: Vec::new(),
            body,
        }
    }
}

/// Sends requests and returns the decoded JSON body
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request; a successful response with an empty body yields `Value::Null`
    async fn send(&self, request: ApiRequest) -> Result<Value>;

    /// Base address requests are resolved against
    fn base_url(&self) -> &str;
}

/// Production transport backed by a `reqwest` client with a fixed timeout
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            timeout: config.timeout,
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn classify(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.timeout)
        } else if err.is_connect() || err.is_request() {
            Error::NetworkUnavailable(err.to_string())
        } else if err.is_decode() || err.is_body() {
            Error::MalformedResponse(err.to_string())
        } else {
            Error::Http(err)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        let url = self.url_for(&request.path);
        log::debug!("{} {}", request.method.as_str(), url);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                path: request.path,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::MalformedResponse(format!("{} {}: {}", request.method.as_str(), request.path, e))
        })
    }

    fn base_url(&self) -> &str {
        self.base_url.as_str()
    }
}
