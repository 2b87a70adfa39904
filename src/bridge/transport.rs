//! Iframe side of the bridge.
//!
//! The Apps Script page listens for `serverRequest` envelopes from the embedding website,
//! runs the named server function through a [`HostRpc`] and posts the outcome back to the
//! top window as a `serverResponse` carrying the same `idRequest`.

use std::sync::{Arc, LazyLock, Mutex};

use async_trait::async_trait;
use futures::channel::oneshot;
use serde_json::Value;

use crate::bridge::constants::{DEFAULT_ERROR_MESSAGE, WILDCARD_TARGET_ORIGIN};
use crate::bridge::envelope::{
    error_message, IframeMessage, ParentEnvelope, ResponsePayload, ServerRequest,
};
use crate::bridge::error::{server_error, unavailable, BridgeResult};
use crate::bridge::origin::OriginValidator;
use crate::bridge::window::{InboundMessage, WindowRef};
use crate::logger::{log_arg, LogLevel, Logger};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@apps-script-bridge/transport"));

/// Runs a server function on behalf of the parent page.
///
/// The returned value is the server function's own response object, expected to hold a
/// `result` or an `error` key. `Err` means the call itself failed.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait HostRpc: Send + Sync {
    async fn call(&self, request: &ServerRequest) -> BridgeResult<Value>;
}

pub type SuccessContinuation = Box<dyn FnOnce(Value) + Send + 'static>;
pub type FailureContinuation = Box<dyn FnOnce(String) + Send + 'static>;

type Dispatch =
    dyn Fn(ServerRequest, SuccessContinuation, FailureContinuation) + Send + Sync + 'static;

/// Adapts a continuation-style primitive (`withSuccessHandler(..).withFailureHandler(..)`)
/// to [`HostRpc`].
///
/// Only the first continuation to run counts; later calls and the other continuation are
/// ignored. Dropping both without calling either fails the request as unavailable.
#[derive(Clone)]
pub struct ContinuationHost {
    dispatch: Arc<Dispatch>,
}

impl ContinuationHost {
    pub fn new<F>(dispatch: F) -> Self
    where
        F: Fn(ServerRequest, SuccessContinuation, FailureContinuation) + Send + Sync + 'static,
    {
        Self {
            dispatch: Arc::new(dispatch),
        }
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl HostRpc for ContinuationHost {
    async fn call(&self, request: &ServerRequest) -> BridgeResult<Value> {
        let (sender, receiver) = oneshot::channel::<Result<Value, String>>();
        let slot = Arc::new(Mutex::new(Some(sender)));

        let success_slot = Arc::clone(&slot);
        let on_success: SuccessContinuation = Box::new(move |value| {
            if let Some(sender) = success_slot.lock().unwrap().take() {
                let _ = sender.send(Ok(value));
            }
        });
        let failure_slot = Arc::clone(&slot);
        let on_failure: FailureContinuation = Box::new(move |message| {
            if let Some(sender) = failure_slot.lock().unwrap().take() {
                let _ = sender.send(Err(message));
            }
        });
        drop(slot);

        (self.dispatch)(request.clone(), on_success, on_failure);

        match receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(server_error(message)),
            Err(_) => Err(unavailable(format!(
                "host dropped {} without a response",
                request.function_name
            ))),
        }
    }
}

/// Maps a host outcome to the `data` of a `serverResponse`.
///
/// Failures, a truthy `error`, and payloads without `result` all become `{error}`; the
/// message falls back to `"error"`.
///
/// `result` is forwarded as-is: `0`, `""` and `false` reach the caller unchanged rather than
/// collapsing to `null` as `result || null` would.
pub fn response_for(outcome: BridgeResult<Value>) -> ResponsePayload {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => return error_payload(Some(err.message().to_string())),
    };
    let Some(object) = response.as_object() else {
        return error_payload(None);
    };
    if let Some(error) = object.get("error") {
        if let Some(message) = error_message(error) {
            return error_payload(Some(message));
        }
    }
    match object.get("result") {
        Some(result) => ResponsePayload::Result(result.clone()),
        None => error_payload(None),
    }
}

fn error_payload(message: Option<String>) -> ResponsePayload {
    ResponsePayload::Error(
        message
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
    )
}

/// The bridge script running inside the Apps Script iframe.
#[derive(Clone)]
pub struct BridgeTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    top: WindowRef,
    host: Arc<dyn HostRpc>,
    validator: OriginValidator,
    target_origin: String,
    is_production: bool,
}

impl BridgeTransport {
    /// `parent_website` is the embedding site's origin; `allow_any` accepts any embedder and
    /// posts with the `"*"` target origin.
    pub fn new(
        top: WindowRef,
        host: Arc<dyn HostRpc>,
        parent_website: &str,
        allow_any: bool,
        is_production: bool,
    ) -> Self {
        let target_origin = if allow_any {
            WILDCARD_TARGET_ORIGIN.to_string()
        } else {
            parent_website.trim().trim_end_matches('/').to_string()
        };
        Self {
            inner: Arc::new(TransportInner {
                top,
                host,
                validator: OriginValidator::for_iframe(parent_website, allow_any),
                target_origin,
                is_production,
            }),
        }
    }

    pub fn target_origin(&self) -> &str {
        &self.inner.target_origin
    }

    /// Handles one `message` event. Returns the response that was posted, if any.
    pub async fn handle_message(&self, message: &InboundMessage) -> Option<ResponsePayload> {
        if !self.inner.validator.classify_origin(&message.origin).is_trusted() {
            LOGGER.log_with(
                LogLevel::Error,
                [log_arg("unknown message domain:"), log_arg(message.origin.as_str())],
            );
            return None;
        }

        let (id_request, request) = match ParentEnvelope::decode(&message.data) {
            Ok(ParentEnvelope::ServerRequest {
                id_request,
                request,
            }) => (id_request, request),
            Ok(ParentEnvelope::ValidateDomain) => return None,
            Err(_) => return None,
        };

        let outcome = self.inner.host.call(&request).await;
        if !self.inner.is_production {
            match &outcome {
                Ok(response) => LOGGER.log_with(
                    LogLevel::Info,
                    [log_arg("bridge received server response:"), log_arg(response)],
                ),
                Err(err) => LOGGER.log_with(
                    LogLevel::Info,
                    [
                        log_arg("bridge received server error response:"),
                        log_arg(err.message()),
                    ],
                ),
            }
        }

        let payload = response_for(outcome);
        let envelope = IframeMessage::ServerResponse {
            id_request,
            payload: payload.clone(),
        };
        if let Err(err) = self.send(&envelope) {
            LOGGER.warn(format!("failed to post serverResponse: {err}"));
        }
        Some(payload)
    }

    /// Tells the parent the app's DOM is ready.
    pub fn announce_site_inited(&self, data: Option<Value>) -> BridgeResult<()> {
        self.send(&IframeMessage::SiteInited(data))
    }

    pub fn announce_fully_loaded(&self) -> BridgeResult<()> {
        self.send(&IframeMessage::SiteFullyLoaded)
    }

    /// Posts any iframe message to the top window.
    pub fn send(&self, message: &IframeMessage) -> BridgeResult<()> {
        self.inner
            .top
            .post_message(&message.to_value(), &self.inner.target_origin)
    }
}
