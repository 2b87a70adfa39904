//! Browser binding: the window, iframe and host page seams over `web_sys`, the `message`
//! listeners for both sides of the bridge, and `google.script.run` as a [`HostRpc`].

use std::any::Any;
use std::sync::{Arc, Mutex};

use js_sys::{Array, Function, Reflect};
use serde_json::Value;
use url::Url;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Event, EventTarget, HtmlIFrameElement, MessageEvent, Window};

use crate::analytics::{GtagCommand, TagManager};
use crate::bridge::context::ParentBridge;
use crate::bridge::error::{internal_error, unavailable, BridgeResult};
use crate::bridge::lifecycle::IframeLifecycleController;
use crate::bridge::transport::{BridgeTransport, ContinuationHost, FailureContinuation};
use crate::bridge::window::{FrameWindow, IframeElement, InboundMessage, WindowRef};
use crate::page::navigation::{HostPage, WindowTarget};
use crate::platform::runtime::spawn_detached;

pub struct WebWindow {
    window: Window,
}

impl WebWindow {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    pub fn current() -> BridgeResult<Self> {
        web_sys::window()
            .map(Self::new)
            .ok_or_else(|| unavailable("no global window"))
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl FrameWindow for WebWindow {
    fn post_message(&self, message: &Value, target_origin: &str) -> BridgeResult<()> {
        let payload = value_to_js(message)?;
        self.window
            .post_message(&payload, target_origin)
            .map_err(|err| unavailable(format!("postMessage failed: {}", js_error_text(err))))
    }

    fn parent(&self) -> Option<WindowRef> {
        let parent = self.window.parent().ok()??;
        Some(Arc::new(WebWindow::new(parent)))
    }

    fn is_same_window(&self, other: &dyn FrameWindow) -> bool {
        other
            .as_any()
            .downcast_ref::<WebWindow>()
            .is_some_and(|other| js_sys::Object::is(self.window.as_ref(), other.window.as_ref()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

unsafe impl Send for WebWindow {}
unsafe impl Sync for WebWindow {}

pub struct WebIframe {
    element: HtmlIFrameElement,
}

impl WebIframe {
    pub fn new(element: HtmlIFrameElement) -> Self {
        Self { element }
    }

    /// Looks the iframe up by element id.
    pub fn by_id(document: &Document, id: &str) -> BridgeResult<Self> {
        document
            .get_element_by_id(id)
            .and_then(|element| element.dyn_into::<HtmlIFrameElement>().ok())
            .map(Self::new)
            .ok_or_else(|| unavailable(format!("no iframe with id {id}")))
    }

    pub fn element(&self) -> &HtmlIFrameElement {
        &self.element
    }
}

impl IframeElement for WebIframe {
    fn set_src(&self, url: &str) -> BridgeResult<()> {
        self.element.set_src(url);
        Ok(())
    }

    fn set_visible(&self, visible: bool) {
        let opacity = if visible { "1" } else { "0" };
        if let Err(err) = self.element.style().set_property("opacity", opacity) {
            log_js_error("style.opacity", err);
        }
    }

    fn content_window(&self) -> Option<WindowRef> {
        let window = self.element.content_window()?;
        Some(Arc::new(WebWindow::new(window)))
    }
}

unsafe impl Send for WebIframe {}
unsafe impl Sync for WebIframe {}

pub struct WebHostPage {
    window: Window,
}

impl WebHostPage {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    fn document(&self) -> Option<Document> {
        self.window.document()
    }
}

impl HostPage for WebHostPage {
    fn current_url(&self) -> BridgeResult<Url> {
        let href = self
            .window
            .location()
            .href()
            .map_err(|err| unavailable(js_error_text(err)))?;
        Url::parse(&href).map_err(|err| internal_error(format!("invalid page url {href}: {err}")))
    }

    fn title(&self) -> String {
        self.document().map(|doc| doc.title()).unwrap_or_default()
    }

    fn set_title(&self, title: &str) {
        if let Some(document) = self.document() {
            document.set_title(title);
        }
    }

    fn replace_location(&self, url: &Url) -> BridgeResult<()> {
        self.window
            .location()
            .replace(url.as_str())
            .map_err(|err| unavailable(js_error_text(err)))
    }

    fn replace_history(&self, url: &Url) -> BridgeResult<()> {
        let history = self
            .window
            .history()
            .map_err(|err| unavailable(js_error_text(err)))?;
        history
            .replace_state_with_url(&js_sys::Object::new(), &self.title(), Some(url.as_str()))
            .map_err(|err| unavailable(js_error_text(err)))
    }

    fn open_url(&self, url: &Url, target: WindowTarget) -> BridgeResult<()> {
        self.window
            .open_with_url_and_target(url.as_str(), target.as_str())
            .map(|_| ())
            .map_err(|err| unavailable(js_error_text(err)))
    }

    fn toggle_fullscreen(&self) {
        let Some(document) = self.document() else {
            return;
        };
        if document.fullscreen_element().is_some() {
            document.exit_fullscreen();
        } else if let Some(root) = document.document_element() {
            if let Err(err) = root.request_fullscreen() {
                log_js_error("requestFullscreen", err);
            }
        }
    }
}

unsafe impl Send for WebHostPage {}
unsafe impl Sync for WebHostPage {}

/// Keeps a DOM listener attached; dropping it removes the listener.
pub struct EventListenerHandle {
    target: EventTarget,
    event: &'static str,
    callback: Closure<dyn FnMut(Event)>,
}

impl EventListenerHandle {
    fn attach(
        target: EventTarget,
        event: &'static str,
        callback: Closure<dyn FnMut(Event)>,
    ) -> BridgeResult<Self> {
        target
            .add_event_listener_with_callback(event, callback.as_ref().unchecked_ref())
            .map_err(|err| unavailable(js_error_text(err)))?;
        Ok(Self {
            target,
            event,
            callback,
        })
    }
}

impl Drop for EventListenerHandle {
    fn drop(&mut self) {
        if let Err(err) = self
            .target
            .remove_event_listener_with_callback(self.event, self.callback.as_ref().unchecked_ref())
        {
            log_js_error("removeEventListener", err);
        }
    }
}

unsafe impl Send for EventListenerHandle {}
unsafe impl Sync for EventListenerHandle {}

/// Routes the page's `message` events into `bridge`.
pub fn listen_parent(window: &Window, bridge: ParentBridge) -> BridgeResult<EventListenerHandle> {
    let callback = Closure::wrap(Box::new(move |event: Event| {
        if let Some(message) = inbound_message(event) {
            bridge.handle_message(&message);
        }
    }) as Box<dyn FnMut(Event)>);
    EventListenerHandle::attach(window.clone().into(), "message", callback)
}

/// Forwards the iframe element's `load` event to the lifecycle.
pub fn listen_frame_load(
    iframe: &HtmlIFrameElement,
    lifecycle: IframeLifecycleController,
) -> BridgeResult<EventListenerHandle> {
    let callback = Closure::wrap(Box::new(move |_event: Event| {
        lifecycle.on_frame_load_event();
    }) as Box<dyn FnMut(Event)>);
    EventListenerHandle::attach(iframe.clone().into(), "load", callback)
}

/// Serves `serverRequest` envelopes inside the Apps Script page.
pub fn listen_iframe(
    window: &Window,
    transport: BridgeTransport,
) -> BridgeResult<EventListenerHandle> {
    let callback = Closure::wrap(Box::new(move |event: Event| {
        if let Some(message) = inbound_message(event) {
            let transport = transport.clone();
            spawn_detached(async move {
                transport.handle_message(&message).await;
            });
        }
    }) as Box<dyn FnMut(Event)>);
    EventListenerHandle::attach(window.clone().into(), "message", callback)
}

/// A host that sends every request through one Apps Script server function:
/// `google.script.run.withSuccessHandler(..).withFailureHandler(..)[dispatcher]({functionName, arguments})`.
///
/// Pass [`DEFAULT_SERVER_DISPATCHER`](crate::bridge::constants::DEFAULT_SERVER_DISPATCHER) (or `BridgeConfig::server_dispatcher`) unless the script
/// names its entry point differently. The dispatcher decides which functions are callable.
pub fn google_script_run_host(dispatcher: impl Into<String>) -> ContinuationHost {
    let dispatcher = dispatcher.into();
    ContinuationHost::new(move |request, on_success, on_failure| {
        let on_failure = Arc::new(Mutex::new(Some(on_failure)));
        let payload = match value_to_js(&request.to_value()) {
            Ok(payload) => payload,
            Err(err) => return fail(&on_failure, err.message().to_string()),
        };

        let success = Closure::once_into_js(move |value: JsValue| {
            on_success(js_to_value(&value));
        });
        let failure_slot = Arc::clone(&on_failure);
        let failure = Closure::once_into_js(move |err: JsValue| {
            fail(&failure_slot, js_error_text(err));
        });

        if let Err(err) = invoke_script_run(&dispatcher, &payload, &success, &failure) {
            fail(&on_failure, js_error_text(err));
        }
    })
}

fn invoke_script_run(
    dispatcher: &str,
    payload: &JsValue,
    success: &JsValue,
    failure: &JsValue,
) -> Result<(), JsValue> {
    let google = Reflect::get(&js_sys::global(), &JsValue::from_str("google"))?;
    let script = Reflect::get(&google, &JsValue::from_str("script"))?;
    let run = Reflect::get(&script, &JsValue::from_str("run"))?;

    let runner = method(&run, "withSuccessHandler")?.call1(&run, success)?;
    let runner = method(&runner, "withFailureHandler")?.call1(&runner, failure)?;
    method(&runner, dispatcher)?.call1(&runner, payload)?;
    Ok(())
}

fn fail(slot: &Arc<Mutex<Option<FailureContinuation>>>, message: String) {
    if let Some(on_failure) = slot.lock().unwrap().take() {
        on_failure(message);
    }
}

/// Mirrors every recorded gtag command into the page's `gtag` function, or its data layer
/// when `gtag` is not defined.
pub fn forward_gtag(tags: &TagManager) {
    let layer_name = tags.snapshot().data_layer_name;
    tags.set_command_hook(move |command: &GtagCommand| {
        if let Err(err) = push_gtag(&layer_name, command) {
            log_js_error("gtag", err);
        }
    });
}

fn push_gtag(layer_name: &str, command: &GtagCommand) -> Result<(), JsValue> {
    let global = js_sys::global();
    let args: Array = value_to_js(&command.to_value())
        .map_err(|err| JsValue::from_str(err.message()))?
        .dyn_into()?;

    if let Ok(gtag) = Reflect::get(&global, &JsValue::from_str("gtag"))?.dyn_into::<Function>() {
        gtag.apply(&JsValue::NULL, &args)?;
        return Ok(());
    }
    let mut layer = Reflect::get(&global, &JsValue::from_str(layer_name))?;
    if layer.is_undefined() {
        layer = Array::new().into();
        Reflect::set(&global, &JsValue::from_str(layer_name), &layer)?;
    }
    layer.dyn_into::<Array>()?.push(&args);
    Ok(())
}

fn method(target: &JsValue, name: &str) -> Result<Function, JsValue> {
    Reflect::get(target, &JsValue::from_str(name))?
        .dyn_into::<Function>()
        .map_err(|_| JsValue::from_str(&format!("{name} is not a function")))
}

fn inbound_message(event: Event) -> Option<InboundMessage> {
    let event = event.dyn_into::<MessageEvent>().ok()?;
    // Cross-origin window proxies fail `instanceof Window`.
    let source = event
        .source()
        .map(|source| Arc::new(WebWindow::new(source.unchecked_into::<Window>())) as WindowRef);
    Some(InboundMessage::new(
        event.origin(),
        source,
        js_to_value(&event.data()),
    ))
}

fn value_to_js(value: &Value) -> BridgeResult<JsValue> {
    js_sys::JSON::parse(&value.to_string())
        .map_err(|err| internal_error(format!("failed to convert message: {}", js_error_text(err))))
}

fn js_to_value(value: &JsValue) -> Value {
    if value.is_undefined() {
        return Value::Null;
    }
    js_sys::JSON::stringify(value)
        .ok()
        .and_then(|text| text.as_string())
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or(Value::Null)
}

fn js_error_text(err: JsValue) -> String {
    if let Some(message) = Reflect::get(&err, &JsValue::from_str("message"))
        .ok()
        .and_then(|message| message.as_string())
    {
        return message;
    }
    if let Some(text) = err.as_string() {
        return text;
    }
    if let Ok(stringified) = js_sys::JSON::stringify(&err) {
        if let Some(text) = stringified.as_string() {
            return text;
        }
    }
    format!("{err:?}")
}

fn log_js_error(context: &str, err: JsValue) {
    web_sys::console::error_2(&JsValue::from_str(context), &err);
}
