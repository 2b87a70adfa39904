use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use url::Url;

use crate::bridge::error::BridgeResult;
use crate::bridge::window::{FrameWindow, IframeElement, WindowRef};
use crate::page::navigation::{HostPage, WindowTarget};

type PostHook = Arc<dyn Fn(Value, String) + Send + Sync>;

static NEXT_WINDOW_ID: AtomicUsize = AtomicUsize::new(1);

/// In-memory window: records posted messages and knows its parent.
pub struct FakeWindow {
    id: usize,
    parent: Mutex<Option<Weak<FakeWindow>>>,
    posted: Mutex<Vec<(Value, String)>>,
    on_post: Mutex<Option<PostHook>>,
}

impl FakeWindow {
    fn build(parent: Option<&Arc<FakeWindow>>, is_top: bool) -> Arc<Self> {
        Arc::new_cyclic(|weak| FakeWindow {
            id: NEXT_WINDOW_ID.fetch_add(1, Ordering::SeqCst),
            parent: Mutex::new(match (parent, is_top) {
                (Some(parent), _) => Some(Arc::downgrade(parent)),
                (None, true) => Some(weak.clone()),
                (None, false) => None,
            }),
            posted: Mutex::new(Vec::new()),
            on_post: Mutex::new(None),
        })
    }

    /// A top-level window; like a browser tab, it is its own parent.
    pub fn top() -> Arc<Self> {
        Self::build(None, true)
    }

    pub fn child_of(parent: &Arc<FakeWindow>) -> Arc<Self> {
        Self::build(Some(parent), false)
    }

    /// A window with no parent at all.
    pub fn detached() -> Arc<Self> {
        Self::build(None, false)
    }

    pub fn set_parent(&self, parent: &Arc<FakeWindow>) {
        *self.parent.lock().unwrap() = Some(Arc::downgrade(parent));
    }

    /// Runs `hook` for every message posted to this window, after it is recorded.
    pub fn on_post<F>(&self, hook: F)
    where
        F: Fn(Value, String) + Send + Sync + 'static,
    {
        *self.on_post.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Messages posted to this window with their target origins.
    pub fn posted(&self) -> Vec<(Value, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn posted_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }

    pub fn as_window(self: &Arc<Self>) -> WindowRef {
        self.clone()
    }
}

impl FrameWindow for FakeWindow {
    fn post_message(&self, message: &Value, target_origin: &str) -> BridgeResult<()> {
        self.posted
            .lock()
            .unwrap()
            .push((message.clone(), target_origin.to_string()));
        let hook = self.on_post.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(message.clone(), target_origin.to_string());
        }
        Ok(())
    }

    fn parent(&self) -> Option<WindowRef> {
        let parent = self.parent.lock().unwrap().clone()?;
        parent.upgrade().map(|window| window as WindowRef)
    }

    fn is_same_window(&self, other: &dyn FrameWindow) -> bool {
        other
            .as_any()
            .downcast_ref::<FakeWindow>()
            .is_some_and(|other| other.id == self.id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for FakeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeWindow")
            .field("id", &self.id)
            .finish()
    }
}

/// In-memory `<iframe>`: records src assignments and visibility toggles.
pub struct FakeIframe {
    window: Mutex<Option<Arc<FakeWindow>>>,
    srcs: Mutex<Vec<String>>,
    visible: Mutex<bool>,
}

impl FakeIframe {
    pub fn new(window: Option<Arc<FakeWindow>>) -> Arc<Self> {
        Arc::new(Self {
            window: Mutex::new(window),
            srcs: Mutex::new(Vec::new()),
            visible: Mutex::new(true),
        })
    }

    pub fn srcs(&self) -> Vec<String> {
        self.srcs.lock().unwrap().clone()
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.lock().unwrap()
    }
}

impl IframeElement for FakeIframe {
    fn set_src(&self, url: &str) -> BridgeResult<()> {
        self.srcs.lock().unwrap().push(url.to_string());
        Ok(())
    }

    fn set_visible(&self, visible: bool) {
        *self.visible.lock().unwrap() = visible;
    }

    fn content_window(&self) -> Option<WindowRef> {
        self.window
            .lock()
            .unwrap()
            .clone()
            .map(|window| window as WindowRef)
    }
}

/// Effects a [`RecordingHostPage`] has been asked to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageEffect {
    ReplaceLocation(String),
    ReplaceHistory(String),
    Open(String, WindowTarget),
    ToggleFullscreen,
}

pub struct RecordingHostPage {
    url: Mutex<Url>,
    title: Mutex<String>,
    effects: Mutex<Vec<PageEffect>>,
}

impl RecordingHostPage {
    pub fn new(url: &str, title: &str) -> Arc<Self> {
        Arc::new(Self {
            url: Mutex::new(Url::parse(url).expect("test page url")),
            title: Mutex::new(title.to_string()),
            effects: Mutex::new(Vec::new()),
        })
    }

    pub fn effects(&self) -> Vec<PageEffect> {
        self.effects.lock().unwrap().clone()
    }

    fn record(&self, effect: PageEffect) {
        self.effects.lock().unwrap().push(effect);
    }
}

impl HostPage for RecordingHostPage {
    fn current_url(&self) -> BridgeResult<Url> {
        Ok(self.url.lock().unwrap().clone())
    }

    fn title(&self) -> String {
        self.title.lock().unwrap().clone()
    }

    fn set_title(&self, title: &str) {
        *self.title.lock().unwrap() = title.to_string();
    }

    fn replace_location(&self, url: &Url) -> BridgeResult<()> {
        *self.url.lock().unwrap() = url.clone();
        self.record(PageEffect::ReplaceLocation(url.to_string()));
        Ok(())
    }

    fn replace_history(&self, url: &Url) -> BridgeResult<()> {
        *self.url.lock().unwrap() = url.clone();
        self.record(PageEffect::ReplaceHistory(url.to_string()));
        Ok(())
    }

    fn open_url(&self, url: &Url, target: WindowTarget) -> BridgeResult<()> {
        self.record(PageEffect::Open(url.to_string(), target));
        Ok(())
    }

    fn toggle_fullscreen(&self) {
        self.record(PageEffect::ToggleFullscreen);
    }
}
