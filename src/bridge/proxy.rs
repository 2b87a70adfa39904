//! Parent-side RPC client mirroring `google.script.run`.
//!
//! [`ParentProxy::call`] is the primary form: it awaits the iframe load, posts a
//! `serverRequest` and resolves with the server function's `result`. [`ScriptRun`] keeps the
//! handler-pair shape of the Apps Script client API for code written against it.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures::channel::oneshot;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::bridge::constants::{MISSING_RESULT_MESSAGE, WILDCARD_TARGET_ORIGIN};
use crate::bridge::envelope::{ParentEnvelope, ResponsePayload, ServerRequest};
use crate::bridge::error::{
    deadline_exceeded, internal_error, invalid_argument, protocol_error, server_error,
    unavailable, BridgeError, BridgeResult,
};
use crate::bridge::lifecycle::IframeLifecycleController;
use crate::bridge::registry::CallbackRegistry;
use crate::logger::Logger;
use crate::platform::runtime::{spawn_detached, with_timeout};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@apps-script-bridge/proxy"));

#[derive(Clone)]
pub struct ParentProxy {
    registry: CallbackRegistry,
    lifecycle: IframeLifecycleController,
    rpc_timeout: Option<Duration>,
}

impl ParentProxy {
    pub fn new(
        registry: CallbackRegistry,
        lifecycle: IframeLifecycleController,
        rpc_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            rpc_timeout,
        }
    }

    /// Calls the Apps Script function `method` with `args` and returns its `result`.
    ///
    /// The first call starts the iframe load if nobody has yet.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> BridgeResult<Value> {
        if method.trim().is_empty() {
            return Err(invalid_argument("method must be a non-empty string"));
        }
        let request = ServerRequest::new(method, &args)?;

        self.lifecycle.load(None).await?;
        let window = self
            .lifecycle
            .target_window()
            .ok_or_else(|| unavailable("no iframe window to send the request to"))?;

        let (sender, receiver) = oneshot::channel::<ResponsePayload>();
        let id_request = self.registry.register(move |payload| {
            let _ = sender.send(payload);
        });
        let envelope = ParentEnvelope::ServerRequest {
            id_request: id_request.clone(),
            request,
        };
        if let Err(err) = window.post_message(&envelope.to_value(), WILDCARD_TARGET_ORIGIN) {
            self.registry.cancel(&id_request);
            return Err(err);
        }

        match with_timeout(receiver, self.rpc_timeout).await {
            Ok(Ok(payload)) => decode_response(payload),
            Ok(Err(_)) => Err(unavailable(format!("{method}: response channel closed"))),
            Err(_) => {
                self.registry.cancel(&id_request);
                let millis = self.rpc_timeout.map(|t| t.as_millis()).unwrap_or_default();
                Err(deadline_exceeded(format!(
                    "{method} did not respond within {millis} ms"
                )))
            }
        }
    }

    pub async fn run(&self, method: &str, args: Vec<Value>) -> BridgeResult<Value> {
        self.call(method, args).await
    }

    /// [`call`](Self::call) with serde conversion of the argument list and the result.
    pub async fn call_typed<Req, Resp>(&self, method: &str, args: &Req) -> BridgeResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let args = match serde_json::to_value(args)
            .map_err(|err| internal_error(format!("failed to serialize arguments: {err}")))?
        {
            Value::Array(items) => items,
            other => vec![other],
        };
        let result = self.call(method, args).await?;
        serde_json::from_value(result).map_err(|err| {
            protocol_error(format!("unexpected result shape from {method}: {err}"))
        })
    }

    /// Starts a `google.script.run`-style chain.
    pub fn script_run(&self) -> ScriptRun {
        ScriptRun {
            proxy: self.clone(),
            on_success: None,
            on_failure: None,
            user_object: None,
        }
    }
}

/// Maps a response payload to the caller's result.
pub fn decode_response(payload: ResponsePayload) -> BridgeResult<Value> {
    match payload {
        ResponsePayload::Result(result) => Ok(result),
        ResponsePayload::Error(message) => Err(server_error(message)),
        ResponsePayload::Missing => Err(protocol_error(MISSING_RESULT_MESSAGE)),
    }
}

pub type SuccessHandler = Arc<dyn Fn(Value, Option<Value>) + Send + Sync + 'static>;
pub type FailureHandler = Arc<dyn Fn(BridgeError, Option<Value>) + Send + Sync + 'static>;

/// Handler-pair call builder, the `google.script.run` surface.
#[derive(Clone)]
pub struct ScriptRun {
    proxy: ParentProxy,
    on_success: Option<SuccessHandler>,
    on_failure: Option<FailureHandler>,
    user_object: Option<Value>,
}

impl ScriptRun {
    pub fn with_success_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Value, Option<Value>) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(handler));
        self
    }

    pub fn with_failure_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(BridgeError, Option<Value>) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(handler));
        self
    }

    /// Passed back as the second argument of whichever handler runs.
    pub fn with_user_object(mut self, user_object: Value) -> Self {
        self.user_object = Some(user_object);
        self
    }

    /// Captures the server function name; any name is accepted here and validated on call.
    pub fn function(self, name: impl Into<String>) -> ScriptFunction {
        ScriptFunction {
            run: self,
            name: name.into(),
        }
    }
}

pub struct ScriptFunction {
    run: ScriptRun,
    name: String,
}

impl ScriptFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Performs the call and delivers the outcome to exactly one handler.
    pub async fn invoke(self, args: Vec<Value>) {
        let ScriptFunction { run, name } = self;
        let outcome = run.proxy.call(&name, args).await;
        match outcome {
            Ok(result) => {
                if let Some(handler) = &run.on_success {
                    handler(result, run.user_object);
                }
            }
            Err(err) => match &run.on_failure {
                Some(handler) => handler(err, run.user_object),
                None => LOGGER.warn(format!("unhandled failure from {name}: {err}")),
            },
        }
    }

    /// Fire-and-forget form of [`invoke`](Self::invoke).
    pub fn spawn(self, args: Vec<Value>) {
        spawn_detached(self.invoke(args));
    }
}
