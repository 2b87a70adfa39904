//! The `postMessage` RPC bridge between the website and the Apps Script iframe.
//!
//! Parent side: [`ParentBridge`] validates inbound messages, routes iframe actions and exposes
//! [`ParentProxy`] for calling server functions. Iframe side: [`BridgeTransport`] answers
//! `serverRequest` envelopes through a [`HostRpc`].

pub mod constants;
mod context;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod origin;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod transport;
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub mod web;
pub mod window;

pub use context::{ParentBridge, ParentBridgeBuilder};
pub use envelope::{
    IframeMessage, OpenUrlRequest, ParentEnvelope, ResponsePayload, ServerRequest, TitleChange,
    UrlParamChange,
};
pub use error::{BridgeError, BridgeErrorCode, BridgeResult};
pub use lifecycle::{
    IframeLifecycleController, LifecycleEvent, LifecycleObserver, LifecycleState,
    LifecycleTimeouts, LoadSignal,
};
pub use origin::{is_framed_by, OriginValidator, OriginVerdict};
pub use proxy::{decode_response, ParentProxy, ScriptFunction, ScriptRun};
pub use registry::{CallbackRegistry, RequestIdStrategy};
pub use router::{ActionRouter, MessageObserver};
pub use transport::{response_for, BridgeTransport, ContinuationHost, HostRpc};
pub use window::{FrameWindow, IframeElement, InboundMessage, WindowRef};
