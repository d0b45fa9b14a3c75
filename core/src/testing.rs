//! Scripted transport for unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::gateway::Gateway;
use crate::transport::{ApiRequest, Transport};
use crate::{Error, Result};

pub(crate) const FAKE_BASE_URL: &str = "http://fake.test/api";

#[derive(Clone)]
enum Reply {
    Json(Value),
    Unreachable,
    Status(u16),
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, Reply>,
    delays: HashMap<String, Duration>,
    requests: Vec<ApiRequest>,
}

/// Transport answering from per-path scripts; unscripted paths return 404
#[derive(Default)]
pub(crate) struct FakeTransport {
    script: Mutex<Script>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub(crate) fn respond(&self, path: &str, body: Value) {
        self.script().replies.insert(path.to_string(), Reply::Json(body));
    }

    /// Make `path` behave as if the network were down
    pub(crate) fn fail(&self, path: &str) {
        self.script().replies.insert(path.to_string(), Reply::Unreachable);
    }

    pub(crate) fn status(&self, path: &str, status: u16) {
        self.script().replies.insert(path.to_string(), Reply::Status(status));
    }

    pub(crate) fn delay(&self, path: &str, delay: Duration) {
        self.script().delays.insert(path.to_string(), delay);
    }

    pub(crate) fn clear_delay(&self, path: &str) {
        self.script().delays.remove(path);
    }

    /// Number of requests sent for `path`, any method
    pub(crate) fn calls(&self, path: &str) -> usize {
        self.script()
            .requests
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.script().requests.len()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value> {
        let (reply, delay) = {
            let mut script = self.script();
            script.requests.push(request.clone());
            (
                script.replies.get(&request.path).cloned(),
                script.delays.get(&request.path).copied(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(Reply::Json(body)) => Ok(body),
            Some(Reply::Unreachable) => Err(Error::NetworkUnavailable(format!(
                "connection refused: {}",
                request.path
            ))),
            Some(Reply::Status(status)) => Err(Error::Status {
                status,
                path: request.path,
            }),
            None => Err(Error::Status {
                status: 404,
                path: request.path,
            }),
        }
    }

    fn base_url(&self) -> &str {
        FAKE_BASE_URL
    }
}

/// Gateway over `transport` with a five minute default expiration
pub(crate) fn gateway(transport: &Arc<FakeTransport>) -> Arc<Gateway> {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
    Arc::new(Gateway::new(transport, Duration::from_secs(300)))
}
