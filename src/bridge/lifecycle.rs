//! Load state machine for the embedded Apps Script iframe.
//!
//! `load()` assigns the iframe `src` and hands out a [`LoadSignal`] that settles when the app
//! announces `siteInited`, or fails when it does not do so in time. Two timers guard an
//! attempt. The overall timer (`load_timeout`) starts with the src assignment. The grace timer
//! (`load_event_grace`) starts when the frame's `load` event fires. Both carry the attempt
//! generation so a timer from a superseded attempt never touches the current one.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::bridge::constants::{DEFAULT_LOAD_EVENT_GRACE, DEFAULT_LOAD_TIMEOUT};
use crate::bridge::error::{load_failed, BridgeResult};
use crate::bridge::window::{IframeElement, WindowRef};
use crate::logger::Logger;
use crate::page::params::PageParams;
use crate::platform::runtime::{sleep, spawn_detached};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@apps-script-bridge/lifecycle"));

const LOAD_TIMEOUT_MESSAGE: &str = "iframe load timeout";
const LOAD_EVENT_MESSAGE: &str = "iframe loaded without announcing siteInited";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Loaded,
    FullyLoaded,
    Error,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loading => "loading",
            LifecycleState::Loaded => "loaded",
            LifecycleState::FullyLoaded => "fullyloaded",
            LifecycleState::Error => "error",
        }
    }
}

/// Notifications delivered to the page's [`LifecycleObserver`].
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    Loading,
    /// Carries the `data` the app sent with `siteInited`.
    Loaded(Option<Value>),
    FullyLoaded,
    Error(String),
}

pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> LifecycleObserver for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// Shared, cloneable completion of one load attempt.
#[derive(Clone)]
pub struct LoadSignal {
    inner: Shared<BoxFuture<'static, BridgeResult<()>>>,
}

impl LoadSignal {
    fn pending() -> (Self, oneshot::Sender<BridgeResult<()>>) {
        let (sender, receiver) = oneshot::channel::<BridgeResult<()>>();
        let future = receiver
            .map(|outcome| {
                outcome.unwrap_or_else(|_| Err(load_failed("load attempt was abandoned")))
            })
            .boxed();
        (
            Self {
                inner: future.shared(),
            },
            sender,
        )
    }

    fn ready(outcome: BridgeResult<()>) -> Self {
        Self {
            inner: futures::future::ready(outcome).boxed().shared(),
        }
    }

    /// True when both handles observe the same attempt.
    pub fn ptr_eq(&self, other: &LoadSignal) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    /// The outcome, if the attempt has settled and the signal has been polled.
    pub fn peek(&self) -> Option<BridgeResult<()>> {
        self.inner.peek().cloned()
    }
}

impl Future for LoadSignal {
    type Output = BridgeResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl fmt::Debug for LoadSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadSignal")
            .field("settled", &self.peek())
            .finish()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LifecycleTimeouts {
    pub load_timeout: Duration,
    pub load_event_grace: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            load_event_grace: DEFAULT_LOAD_EVENT_GRACE,
        }
    }
}

#[derive(Clone)]
pub struct IframeLifecycleController {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    iframe: Arc<dyn IframeElement>,
    params: Arc<Mutex<PageParams>>,
    timeouts: LifecycleTimeouts,
    default_extra: Mutex<Option<String>>,
    observer: Mutex<Option<Arc<dyn LifecycleObserver>>>,
    attempt: Mutex<Attempt>,
}

struct Attempt {
    state: LifecycleState,
    generation: u64,
    signal: Option<LoadSignal>,
    resolver: Option<oneshot::Sender<BridgeResult<()>>>,
    source_window: Option<WindowRef>,
}

impl IframeLifecycleController {
    pub fn new(
        iframe: Arc<dyn IframeElement>,
        params: Arc<Mutex<PageParams>>,
        timeouts: LifecycleTimeouts,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                iframe,
                params,
                timeouts,
                default_extra: Mutex::new(None),
                observer: Mutex::new(None),
                attempt: Mutex::new(Attempt {
                    state: LifecycleState::Unloaded,
                    generation: 0,
                    signal: None,
                    resolver: None,
                    source_window: None,
                }),
            }),
        }
    }

    /// Replaces the observer. Only one observer is kept.
    pub fn set_observer(&self, observer: Option<Arc<dyn LifecycleObserver>>) {
        let mut slot = self.inner.observer.lock().unwrap();
        if slot.is_some() && observer.is_some() {
            LOGGER.warn("Overwriting existing lifecycle observer");
        }
        *slot = observer;
    }

    /// Extra query fragment used when [`load`](Self::load) is called without one, e.g. by a
    /// lazily started RPC call.
    pub fn set_default_extra_params(&self, extra: Option<String>) {
        *self.inner.default_extra.lock().unwrap() = extra;
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.attempt.lock().unwrap().state
    }

    /// The signal of the current attempt, if one was started.
    pub fn signal(&self) -> Option<LoadSignal> {
        self.inner.attempt.lock().unwrap().signal.clone()
    }

    /// Starts loading unless an attempt is in flight or has succeeded, in which case the
    /// existing signal is returned.
    pub fn load(&self, extra_params: Option<&str>) -> LoadSignal {
        let (signal, generation) = {
            let mut attempt = self.inner.attempt.lock().unwrap();
            if matches!(
                attempt.state,
                LifecycleState::Loading | LifecycleState::Loaded | LifecycleState::FullyLoaded
            ) {
                if let Some(signal) = &attempt.signal {
                    return signal.clone();
                }
            }
            let (signal, resolver) = LoadSignal::pending();
            attempt.generation += 1;
            attempt.state = LifecycleState::Loading;
            attempt.signal = Some(signal.clone());
            attempt.resolver = Some(resolver);
            (signal, attempt.generation)
        };

        self.inner.notify(&LifecycleEvent::Loading);
        self.inner.iframe.set_visible(false);

        let extra = match extra_params {
            Some(extra) => Some(extra.to_string()),
            None => self.inner.default_extra.lock().unwrap().clone(),
        };
        let url = self.inner.params.lock().unwrap().script_url(extra.as_deref());
        LOGGER.debug(format!("loading iframe from {url}"));

        if let Err(err) = self.inner.iframe.set_src(&url) {
            LifecycleInner::fail(&self.inner, generation, err.message());
            return signal;
        }
        LifecycleInner::arm_timer(
            &self.inner,
            generation,
            self.inner.timeouts.load_timeout,
            LOAD_TIMEOUT_MESSAGE,
        );
        signal
    }

    /// The iframe element fired `load`. Without a `siteInited` inside the grace period the
    /// attempt fails.
    pub fn on_frame_load_event(&self) {
        let generation = {
            let attempt = self.inner.attempt.lock().unwrap();
            if attempt.state != LifecycleState::Loading {
                return;
            }
            attempt.generation
        };
        LifecycleInner::arm_timer(
            &self.inner,
            generation,
            self.inner.timeouts.load_event_grace,
            LOAD_EVENT_MESSAGE,
        );
    }

    /// The app announced itself. The first announcing window becomes the RPC target.
    pub fn on_site_inited(&self, data: Option<Value>, source: Option<WindowRef>) {
        let resolver = {
            let mut attempt = self.inner.attempt.lock().unwrap();
            if attempt.source_window.is_none() {
                attempt.source_window = source;
            }
            match attempt.state {
                LifecycleState::Loading => {
                    attempt.state = LifecycleState::Loaded;
                    attempt.resolver.take()
                }
                LifecycleState::Unloaded | LifecycleState::Error => {
                    attempt.state = LifecycleState::Loaded;
                    attempt.resolver = None;
                    attempt.signal = Some(LoadSignal::ready(Ok(())));
                    None
                }
                LifecycleState::Loaded | LifecycleState::FullyLoaded => None,
            }
        };

        self.inner.iframe.set_visible(true);
        if let Some(resolver) = resolver {
            let _ = resolver.send(Ok(()));
        }
        self.inner.notify(&LifecycleEvent::Loaded(data));
    }

    pub fn on_site_fully_loaded(&self) {
        let (transitioned, resolver) = {
            let mut attempt = self.inner.attempt.lock().unwrap();
            match attempt.state {
                LifecycleState::Loading => {
                    attempt.state = LifecycleState::FullyLoaded;
                    (true, attempt.resolver.take())
                }
                LifecycleState::Loaded => {
                    attempt.state = LifecycleState::FullyLoaded;
                    (true, None)
                }
                LifecycleState::FullyLoaded => (false, None),
                LifecycleState::Unloaded | LifecycleState::Error => {
                    LOGGER.warn("siteFullyLoaded received before siteInited");
                    (false, None)
                }
            }
        };
        if let Some(resolver) = resolver {
            self.inner.iframe.set_visible(true);
            let _ = resolver.send(Ok(()));
        }
        if transitioned {
            self.inner.notify(&LifecycleEvent::FullyLoaded);
        }
    }

    /// Where RPC requests go: the window that announced `siteInited`, else the iframe's own
    /// content window.
    pub fn target_window(&self) -> Option<WindowRef> {
        let source = self.inner.attempt.lock().unwrap().source_window.clone();
        source.or_else(|| self.inner.iframe.content_window())
    }
}

impl LifecycleInner {
    fn notify(&self, event: &LifecycleEvent) {
        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer.on_event(event);
        }
    }

    fn arm_timer(inner: &Arc<Self>, generation: u64, delay: Duration, message: &'static str) {
        let weak: Weak<Self> = Arc::downgrade(inner);
        spawn_detached(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                LifecycleInner::fail(&inner, generation, message);
            }
        });
    }

    /// Fails attempt `generation` if it is still the current, loading one.
    fn fail(inner: &Arc<Self>, generation: u64, message: &str) {
        let resolver = {
            let mut attempt = inner.attempt.lock().unwrap();
            if attempt.generation != generation || attempt.state != LifecycleState::Loading {
                return;
            }
            attempt.state = LifecycleState::Error;
            attempt.resolver.take()
        };

        LOGGER.error(format!("Error loading iframe content: {message}"));
        if let Some(resolver) = resolver {
            let _ = resolver.send(Err(load_failed(message)));
        }
        inner.notify(&LifecycleEvent::Error(message.to_string()));
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::bridge::error::BridgeErrorCode;
    use crate::test_support::{FakeIframe, FakeWindow};

    fn controller() -> (
        Arc<FakeIframe>,
        IframeLifecycleController,
        Arc<Mutex<Vec<LifecycleEvent>>>,
    ) {
        let iframe = FakeIframe::new(Some(FakeWindow::top()));
        let mut params = PageParams::new("AKfyc-test", None);
        params.session = "lesson1".into();
        let controller = IframeLifecycleController::new(
            iframe.clone(),
            Arc::new(Mutex::new(params)),
            LifecycleTimeouts::default(),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let observer: Arc<dyn LifecycleObserver> = Arc::new(move |event: &LifecycleEvent| {
            sink.lock().unwrap().push(event.clone());
        });
        controller.set_observer(Some(observer));
        (iframe, controller, events)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn load_is_idempotent_while_in_flight() {
        let (iframe, controller, events) = controller();
        let first = controller.load(Some("view=full"));
        let second = controller.load(None);

        assert!(first.ptr_eq(&second));
        assert_eq!(controller.state(), LifecycleState::Loading);
        assert_eq!(
            iframe.srcs(),
            vec![
                "https://script.google.com/macros/s/AKfyc-test/exec?lang=en&session=lesson1&view=full&embed=1"
                    .to_string()
            ]
        );
        assert!(!iframe.is_visible());
        assert_eq!(*events.lock().unwrap(), vec![LifecycleEvent::Loading]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn site_inited_resolves_signal_and_shows_frame() {
        let (iframe, controller, events) = controller();
        let signal = controller.load(None);
        let source = FakeWindow::top();

        let data = serde_json::json!({ "user": "a" });
        controller.on_site_inited(Some(data), Some(source.as_window()));
        assert_eq!(signal.await, Ok(()));
        assert_eq!(controller.state(), LifecycleState::Loaded);
        assert!(iframe.is_visible());
        assert!(controller
            .target_window()
            .is_some_and(|window| window.is_same_window(&*source)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(controller.state(), LifecycleState::Loaded);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                LifecycleEvent::Loading,
                LifecycleEvent::Loaded(Some(serde_json::json!({ "user": "a" })))
            ]
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn overall_timeout_fails_the_attempt_once() {
        let (_iframe, controller, events) = controller();
        let signal = controller.load(None);

        let err = signal.await.unwrap_err();
        assert_eq!(err.code, BridgeErrorCode::LoadFailed);
        assert_eq!(err.message(), "iframe load timeout");
        assert_eq!(controller.state(), LifecycleState::Error);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let errors = events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, LifecycleEvent::Error(_)))
            .count();
        assert_eq!(errors, 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn load_event_without_site_inited_fails_after_grace() {
        let (_iframe, controller, _events) = controller();
        let signal = controller.load(None);
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.on_frame_load_event();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(controller.state(), LifecycleState::Error);
        assert_eq!(
            signal.await.unwrap_err().message(),
            "iframe loaded without announcing siteInited"
        );
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn error_is_retryable_and_stale_timers_are_ignored() {
        let (iframe, controller, _events) = controller();
        let first = controller.load(None);
        controller.on_frame_load_event();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(first.await.is_err());

        let second = controller.load(None);
        assert_eq!(iframe.srcs().len(), 2);
        assert_eq!(controller.state(), LifecycleState::Loading);

        // The first attempt's 12 s timer fires here and must not fail the second attempt.
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(controller.state(), LifecycleState::Loading);

        controller.on_site_inited(None, None);
        assert_eq!(second.await, Ok(()));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn late_site_inited_recovers_from_error() {
        let (_iframe, controller, _events) = controller();
        let failed = controller.load(None);
        assert!(failed.clone().await.is_err());

        controller.on_site_inited(None, None);
        assert_eq!(controller.state(), LifecycleState::Loaded);
        let recovered = controller.load(None);
        assert!(!recovered.ptr_eq(&failed));
        assert_eq!(recovered.await, Ok(()));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fully_loaded_never_regresses() {
        let (_iframe, controller, events) = controller();
        let signal = controller.load(None);
        controller.on_site_inited(None, None);
        controller.on_site_fully_loaded();
        controller.on_site_inited(None, None);

        assert_eq!(signal.await, Ok(()));
        assert_eq!(controller.state(), LifecycleState::FullyLoaded);
        assert!(events
            .lock()
            .unwrap()
            .contains(&LifecycleEvent::FullyLoaded));
    }

    #[test]
    fn target_window_falls_back_to_content_window() {
        let (_iframe, controller, _events) = controller();
        assert!(controller.target_window().is_some());
    }
}
