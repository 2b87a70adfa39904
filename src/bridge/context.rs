//! The parent page's bridge: one value owning the registry, lifecycle, proxy and router.
//!
//! ```ignore
//! let bridge = ParentBridge::builder(config, own_window, iframe)
//!     .with_host_page(page)
//!     .build()?;
//! // from the window `message` listener:
//! bridge.handle_message(&event);
//! let greeting = bridge.proxy().call("demoServerFunction", vec![json!("hi")]).await?;
//! ```

use std::sync::{Arc, LazyLock, Mutex};

use url::Url;

use crate::analytics::TagManager;
use crate::bridge::envelope::IframeMessage;
use crate::bridge::error::{invalid_argument, BridgeResult};
use crate::bridge::lifecycle::{IframeLifecycleController, LifecycleObserver, LoadSignal};
use crate::bridge::origin::{OriginValidator, OriginVerdict};
use crate::bridge::proxy::ParentProxy;
use crate::bridge::registry::{CallbackRegistry, RequestIdStrategy};
use crate::bridge::router::{ActionRouter, MessageObserver};
use crate::bridge::window::{IframeElement, InboundMessage, WindowRef};
use crate::config::BridgeConfig;
use crate::logger::{log_arg, LogLevel, Logger};
use crate::logs::{HttpLogSink, LogShipper};
use crate::page::navigation::HostPage;
use crate::page::params::PageParams;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@apps-script-bridge/bridge"));

/// Cheap to clone; clones share one context.
#[derive(Clone)]
pub struct ParentBridge {
    inner: Arc<ParentInner>,
}

struct ParentInner {
    config: BridgeConfig,
    own_window: WindowRef,
    validator: OriginValidator,
    params: Arc<Mutex<PageParams>>,
    lifecycle: IframeLifecycleController,
    proxy: ParentProxy,
    router: ActionRouter,
    tags: Option<Arc<TagManager>>,
}

pub struct ParentBridgeBuilder {
    config: BridgeConfig,
    own_window: WindowRef,
    iframe: Arc<dyn IframeElement>,
    page_url: Option<Url>,
    host_page: Option<Arc<dyn HostPage>>,
    tags: Option<Arc<TagManager>>,
    log_shipper: Option<LogShipper>,
    title_suffix: Option<String>,
    id_strategy: RequestIdStrategy,
    extra_keys: Vec<String>,
}

impl ParentBridgeBuilder {
    /// URL of the embedding page. Defaults to the host page's current URL.
    pub fn page_url(mut self, url: Url) -> Self {
        self.page_url = Some(url);
        self
    }

    pub fn with_host_page(mut self, host_page: Arc<dyn HostPage>) -> Self {
        self.host_page = Some(host_page);
        self
    }

    /// Replaces the tag manager built from `gtm_id`.
    pub fn with_tags(mut self, tags: Arc<TagManager>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Replaces the HTTP sink built from `logs_endpoint`.
    pub fn with_log_shipper(mut self, shipper: LogShipper) -> Self {
        self.log_shipper = Some(shipper);
        self
    }

    pub fn with_title_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.title_suffix = Some(suffix.into());
        self
    }

    pub fn id_strategy(mut self, strategy: RequestIdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Copies this query parameter from the page URL into the iframe URL.
    pub fn forward_param(mut self, key: impl Into<String>) -> Self {
        self.extra_keys.push(key.into());
        self
    }

    pub fn build(self) -> BridgeResult<ParentBridge> {
        let config = self.config;
        if config.script_id.trim().is_empty() {
            return Err(invalid_argument("a script id is required to load the iframe"));
        }

        let page_url = match (self.page_url, &self.host_page) {
            (Some(url), _) => Some(url),
            (None, Some(page)) => Some(page.current_url()?),
            (None, None) => None,
        };

        let mut params =
            PageParams::new(config.script_id.clone(), Some(config.default_lang.as_str()));
        for key in self.extra_keys {
            params = params.allow_key(key);
        }
        if let Some(url) = &page_url {
            params.merge_verified_from_url(url, config.org_public_key.as_ref())?;
        }
        let params = Arc::new(Mutex::new(params));

        let mut validator = OriginValidator::for_parent(config.trusted_hostnames());
        if let Some(url) = &page_url {
            validator = validator.with_own_origin(url.origin().ascii_serialization());
        }

        let tags = self.tags.or_else(|| {
            config
                .gtm_id
                .clone()
                .map(|id| Arc::new(TagManager::new(Some(id))))
        });
        let log_shipper = match (self.log_shipper, &config.logs_endpoint) {
            (Some(shipper), _) => Some(shipper),
            (None, Some(endpoint)) => {
                let sink = HttpLogSink::new(endpoint, page_url.as_ref())
                    .map_err(|err| invalid_argument(err.message()))?;
                Some(LogShipper::new(Arc::new(sink)))
            }
            (None, None) => None,
        };

        let registry = CallbackRegistry::new(self.id_strategy);
        let lifecycle = IframeLifecycleController::new(
            self.iframe,
            Arc::clone(&params),
            config.lifecycle_timeouts(),
        );
        let proxy = ParentProxy::new(registry.clone(), lifecycle.clone(), config.rpc_timeout);

        let mut router = ActionRouter::new(registry, lifecycle.clone(), Arc::clone(&params));
        if let Some(page) = self.host_page {
            router = router.with_host_page(page);
        }
        if let Some(tags) = &tags {
            router = router.with_tags(Arc::clone(tags));
        }
        if let Some(shipper) = log_shipper {
            router = router.with_log_shipper(shipper);
        }
        if let Some(suffix) = self.title_suffix {
            router = router.with_title_suffix(suffix);
        }

        Ok(ParentBridge {
            inner: Arc::new(ParentInner {
                config,
                own_window: self.own_window,
                validator,
                params,
                lifecycle,
                proxy,
                router,
                tags,
            }),
        })
    }
}

impl ParentBridge {
    pub fn builder(
        config: BridgeConfig,
        own_window: WindowRef,
        iframe: Arc<dyn IframeElement>,
    ) -> ParentBridgeBuilder {
        ParentBridgeBuilder {
            config,
            own_window,
            iframe,
            page_url: None,
            host_page: None,
            tags: None,
            log_shipper: None,
            title_suffix: None,
            id_strategy: RequestIdStrategy::default(),
            extra_keys: Vec::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn proxy(&self) -> &ParentProxy {
        &self.inner.proxy
    }

    pub fn lifecycle(&self) -> &IframeLifecycleController {
        &self.inner.lifecycle
    }

    pub fn tags(&self) -> Option<&Arc<TagManager>> {
        self.inner.tags.as_ref()
    }

    /// Snapshot of the parameters forwarded to the iframe.
    pub fn params(&self) -> PageParams {
        self.inner.params.lock().unwrap().clone()
    }

    /// Starts (or joins) the iframe load.
    pub fn load(&self, extra_params: Option<&str>) -> LoadSignal {
        self.inner.lifecycle.load(extra_params)
    }

    pub fn set_lifecycle_observer(&self, observer: Option<Arc<dyn LifecycleObserver>>) {
        self.inner.lifecycle.set_observer(observer);
    }

    pub fn set_message_observer(&self, observer: Option<Arc<dyn MessageObserver>>) {
        self.inner.router.set_observer(observer);
    }

    /// Handles one window `message` event. Returns `true` when it was routed.
    pub fn handle_message(&self, message: &InboundMessage) -> bool {
        let verdict = self.inner.validator.classify(
            &message.origin,
            message.source.as_deref(),
            &*self.inner.own_window,
        );
        match verdict {
            OriginVerdict::Trusted => {}
            OriginVerdict::SameOrigin => return false,
            other => {
                LOGGER.log_with(
                    LogLevel::Warn,
                    [
                        log_arg("ignoring message from"),
                        log_arg(message.origin.as_str()),
                        log_arg(format!("{other:?}")),
                    ],
                );
                return false;
            }
        }

        let decoded = match IframeMessage::decode(&message.data) {
            Ok(decoded) => decoded,
            Err(err) => {
                LOGGER.debug(format!("dropping malformed message: {err}"));
                return false;
            }
        };
        if !self.inner.config.is_production {
            LOGGER.log_with(
                LogLevel::Debug,
                [log_arg("received"), log_arg(decoded.action())],
            );
        }
        self.inner.router.route(&decoded, message);
        true
    }
}
