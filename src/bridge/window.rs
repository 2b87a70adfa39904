//! Seams between the bridge and the browsing contexts it talks to.
//!
//! The browser binding in [`crate::bridge::web`] implements these traits over `web_sys`;
//! tests use the in-memory doubles from `test_support`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bridge::error::BridgeResult;

/// A window (top page, iframe, popup) that can receive `postMessage` payloads.
pub trait FrameWindow: Send + Sync {
    fn post_message(&self, message: &Value, target_origin: &str) -> BridgeResult<()>;

    /// `window.parent`. A top-level window returns itself or `None`.
    fn parent(&self) -> Option<WindowRef>;

    /// Identity comparison, the equivalent of `a === b` on window proxies.
    fn is_same_window(&self, other: &dyn FrameWindow) -> bool;

    fn as_any(&self) -> &dyn Any;
}

pub type WindowRef = Arc<dyn FrameWindow>;

/// The `<iframe>` element hosting the Apps Script web app.
pub trait IframeElement: Send + Sync {
    fn set_src(&self, url: &str) -> BridgeResult<()>;

    /// Toggles the element's opacity while a load is in flight.
    fn set_visible(&self, visible: bool);

    fn content_window(&self) -> Option<WindowRef>;
}

/// A `message` event as seen by a listener: origin, source window and structured data.
#[derive(Clone)]
pub struct InboundMessage {
    pub origin: String,
    pub source: Option<WindowRef>,
    pub data: Value,
}

impl InboundMessage {
    pub fn new(origin: impl Into<String>, source: Option<WindowRef>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            source,
            data,
        }
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("origin", &self.origin)
            .field("has_source", &self.source.is_some())
            .field("data", &self.data)
            .finish()
    }
}
