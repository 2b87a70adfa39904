//! Dispatches validated iframe messages to the component that owns each action.

use std::sync::{Arc, LazyLock, Mutex};

use crate::analytics::TagManager;
use crate::bridge::envelope::{IframeMessage, ParentEnvelope};
use crate::bridge::lifecycle::IframeLifecycleController;
use crate::bridge::registry::CallbackRegistry;
use crate::bridge::window::InboundMessage;
use crate::logger::Logger;
use crate::logs::LogShipper;
use crate::page::navigation::{
    apply_to_params, apply_url_params, compose_title, open_url_target, HostPage,
};
use crate::page::params::PageParams;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@apps-script-bridge/router"));

/// Sees every routed message after its handler ran.
pub trait MessageObserver: Send + Sync {
    fn on_message(&self, message: &IframeMessage, raw: &InboundMessage);
}

impl<F> MessageObserver for F
where
    F: Fn(&IframeMessage, &InboundMessage) + Send + Sync,
{
    fn on_message(&self, message: &IframeMessage, raw: &InboundMessage) {
        self(message, raw)
    }
}

pub struct ActionRouter {
    registry: CallbackRegistry,
    lifecycle: IframeLifecycleController,
    params: Arc<Mutex<PageParams>>,
    host_page: Option<Arc<dyn HostPage>>,
    tags: Option<Arc<TagManager>>,
    logs: Option<LogShipper>,
    title_suffix: Option<String>,
    observer: Mutex<Option<Arc<dyn MessageObserver>>>,
}

impl ActionRouter {
    pub fn new(
        registry: CallbackRegistry,
        lifecycle: IframeLifecycleController,
        params: Arc<Mutex<PageParams>>,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            params,
            host_page: None,
            tags: None,
            logs: None,
            title_suffix: None,
            observer: Mutex::new(None),
        }
    }

    pub fn with_host_page(mut self, host_page: Arc<dyn HostPage>) -> Self {
        self.host_page = Some(host_page);
        self
    }

    pub fn with_tags(mut self, tags: Arc<TagManager>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_log_shipper(mut self, shipper: LogShipper) -> Self {
        self.logs = Some(shipper);
        self
    }

    /// Appended to full-title replacements, e.g. `"  |  My Site"`.
    pub fn with_title_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.title_suffix = Some(suffix.into());
        self
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn MessageObserver>>) {
        *self.observer.lock().unwrap() = observer;
    }

    pub fn route(&self, message: &IframeMessage, raw: &InboundMessage) {
        match message {
            IframeMessage::SiteInited(data) => {
                self.lifecycle.on_site_inited(data.clone(), raw.source.clone());
                if let Some(source) = &raw.source {
                    let validate = ParentEnvelope::ValidateDomain.to_value();
                    if let Err(err) = source.post_message(&validate, &raw.origin) {
                        LOGGER.warn(format!("failed to send validateDomain: {err}"));
                    }
                }
            }
            IframeMessage::SiteFullyLoaded => self.lifecycle.on_site_fully_loaded(),
            IframeMessage::ServerResponse {
                id_request,
                payload,
            } => {
                if !self.registry.resolve(id_request, payload.clone()) {
                    LOGGER.debug(format!("no pending request for idRequest {id_request}"));
                }
            }
            IframeMessage::Logs(logs) => match logs {
                Some(logs) if !logs.is_empty() => match &self.logs {
                    Some(shipper) => shipper.forward(logs.clone()),
                    None => LOGGER.debug("logs received but no log sink is configured"),
                },
                _ => LOGGER.error("Invalid logs"),
            },
            IframeMessage::AnalyticsEvent { name } => {
                if let Some(tags) = &self.tags {
                    tags.select_content(name);
                }
            }
            IframeMessage::TitleChange(change) => {
                if let Some(page) = &self.host_page {
                    let title = compose_title(&page.title(), change, self.title_suffix.as_deref());
                    page.set_title(&title);
                }
            }
            IframeMessage::UrlParamChange(change) => {
                apply_to_params(&mut self.params.lock().unwrap(), change);
                if let Some(page) = &self.host_page {
                    let outcome = page.current_url().and_then(|current| {
                        let url = apply_url_params(&current, change);
                        if change.refresh {
                            page.replace_location(&url)
                        } else {
                            page.replace_history(&url)
                        }
                    });
                    if let Err(err) = outcome {
                        LOGGER.warn(format!("urlParamChange failed: {err}"));
                    }
                }
            }
            IframeMessage::OpenUrlWithProps(request) => {
                if let Some(page) = &self.host_page {
                    let outcome = page
                        .current_url()
                        .and_then(|current| open_url_target(&current, request))
                        .and_then(|(url, target)| page.open_url(&url, target));
                    if let Err(err) = outcome {
                        LOGGER.warn(format!("openUrlWithProps failed: {err}"));
                    }
                }
            }
            IframeMessage::ToggleFullscreen => {
                if let Some(page) = &self.host_page {
                    page.toggle_fullscreen();
                }
            }
            IframeMessage::Unknown { action } => {
                LOGGER.debug(format!("ignoring unknown action {action}"));
            }
        }

        let observer = self.observer.lock().unwrap().clone();
        if let Some(observer) = observer {
            observer.on_message(message, raw);
        }
    }
}
