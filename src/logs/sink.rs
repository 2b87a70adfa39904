use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use crate::logger::Logger;
use crate::logs::error::{invalid_argument, network_error, rejected, LogsResult};
use crate::platform::runtime::spawn_detached;

/// Records emitted here are never captured for shipping, which would feed back into the sink.
pub(crate) const SHIPPING_LOGGER_NAME: &str = "@apps-script-bridge/logs";

pub(crate) static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new(SHIPPING_LOGGER_NAME));

/// Maximum entries per `PUT`, enforced by both the client and the endpoint.
pub const MAX_LOGS_PER_REQUEST: usize = 10;

/// Destination for batches of log payloads.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait LogSink: Send + Sync {
    /// Sends at most [`MAX_LOGS_PER_REQUEST`] entries.
    async fn send(&self, logs: Vec<Value>) -> LogsResult<()>;
}

/// `PUT {endpoint}` with body `{ "logs": [...] }`.
pub struct HttpLogSink {
    client: reqwest::Client,
    endpoint: Url,
    skip: bool,
}

impl HttpLogSink {
    /// `endpoint` may be relative (e.g. `/api/logs`) when `page_url` is given. Pages served
    /// from `localhost` never send.
    pub fn new(endpoint: &str, page_url: Option<&Url>) -> LogsResult<Self> {
        let endpoint = match (Url::parse(endpoint), page_url) {
            (Ok(url), _) => url,
            (Err(url::ParseError::RelativeUrlWithoutBase), Some(page)) => page
                .join(endpoint)
                .map_err(|err| invalid_argument(format!("invalid logs endpoint: {err}")))?,
            (Err(err), _) => {
                return Err(invalid_argument(format!("invalid logs endpoint: {err}")));
            }
        };
        let skip = page_url.and_then(Url::host_str) == Some("localhost");
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            skip,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn is_disabled(&self) -> bool {
        self.skip
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl LogSink for HttpLogSink {
    async fn send(&self, logs: Vec<Value>) -> LogsResult<()> {
        if self.skip || logs.is_empty() {
            return Ok(());
        }
        if logs.len() > MAX_LOGS_PER_REQUEST {
            return Err(invalid_argument(format!(
                "at most {MAX_LOGS_PER_REQUEST} logs per request, got {}",
                logs.len()
            )));
        }

        let response = self
            .client
            .put(self.endpoint.clone())
            .json(&json!({ "logs": logs }))
            .send()
            .await
            .map_err(|err| network_error(format!("failed to send logs: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejected(status.as_u16()));
        }
        Ok(())
    }
}

/// Splits log lists into request-sized batches and hands them to a [`LogSink`] in order.
#[derive(Clone)]
pub struct LogShipper {
    sink: Arc<dyn LogSink>,
}

impl LogShipper {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Sends every entry, [`MAX_LOGS_PER_REQUEST`] at a time. Failed batches are reported and
    /// dropped; the remaining batches are still sent.
    pub async fn ship(&self, logs: Vec<Value>) -> usize {
        let mut sent = 0;
        for batch in logs.chunks(MAX_LOGS_PER_REQUEST) {
            match self.sink.send(batch.to_vec()).await {
                Ok(()) => sent += batch.len(),
                Err(err) => LOGGER.error(format!("Error sending logs: {err}")),
            }
        }
        sent
    }

    /// Fire-and-forget form of [`ship`](Self::ship).
    pub fn forward(&self, logs: Vec<Value>) {
        let shipper = self.clone();
        spawn_detached(async move {
            shipper.ship(logs).await;
        });
    }
}
