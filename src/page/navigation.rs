//! Host page side effects requested by the iframe: title, URL parameters and navigation.

use serde_json::Value;
use url::Url;

use crate::bridge::envelope::{OpenUrlRequest, TitleChange, UrlParamChange};
use crate::bridge::error::{invalid_argument, BridgeResult};
use crate::page::params::{set_search_param, PageParams};

pub const TITLE_SEPARATOR: &str = " - ";

/// Browsing context targeted by [`HostPage::open_url`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowTarget {
    /// `_self`
    SameTab,
    /// `_blank`
    NewTab,
}

impl WindowTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowTarget::SameTab => "_self",
            WindowTarget::NewTab => "_blank",
        }
    }
}

/// The page embedding the iframe. Implemented over `web_sys` in the browser binding.
pub trait HostPage: Send + Sync {
    fn current_url(&self) -> BridgeResult<Url>;

    fn title(&self) -> String;

    fn set_title(&self, title: &str);

    /// `location.replace(url)`: reloads the page at `url`.
    fn replace_location(&self, url: &Url) -> BridgeResult<()>;

    /// `history.replaceState({}, title, url)`: rewrites the address bar without reloading.
    fn replace_history(&self, url: &Url) -> BridgeResult<()>;

    fn open_url(&self, url: &Url, target: WindowTarget) -> BridgeResult<()>;

    fn toggle_fullscreen(&self);
}

/// Computes the document title for a `titleChange` message.
///
/// With `afterDash` only the text after the first separator is replaced; otherwise the whole
/// title is replaced and `suffix` (e.g. `"  |  Site"`) is appended when given.
pub fn compose_title(current: &str, change: &TitleChange, suffix: Option<&str>) -> String {
    if change.after_dash {
        let head = current.split(TITLE_SEPARATOR).next().unwrap_or_default();
        return format!("{head}{TITLE_SEPARATOR}{}", change.title);
    }
    match suffix {
        Some(suffix) => format!("{}{suffix}", change.title),
        None => change.title.clone(),
    }
}

/// Applies `urlParams` to `current`; `null` values delete. Returns the new URL.
pub fn apply_url_params(current: &Url, change: &UrlParamChange) -> Url {
    let mut url = current.clone();
    for (key, value) in &change.url_params {
        set_search_param(&mut url, key, param_text(value).as_deref());
    }
    url
}

/// Mirrors an applied `urlParamChange` into the clean parameter set.
pub fn apply_to_params(params: &mut PageParams, change: &UrlParamChange) {
    for (key, value) in &change.url_params {
        params.set(key, param_text(value));
    }
}

/// Resolves an `openUrlWithProps` request against the current page URL.
///
/// Empty strings and `null` delete a property.
pub fn open_url_target(current: &Url, request: &OpenUrlRequest) -> BridgeResult<(Url, WindowTarget)> {
    let mut url = current.clone();
    if let Some(pathname) = request.pathname.as_deref().filter(|path| !path.is_empty()) {
        if url.cannot_be_a_base() {
            return Err(invalid_argument(format!("cannot set pathname on {url}")));
        }
        url.set_path(pathname);
    }
    for (key, value) in &request.props {
        let text = param_text(value).filter(|text| !text.is_empty());
        set_search_param(&mut url, key, text.as_deref());
    }
    let target = if request.replace_page {
        WindowTarget::SameTab
    } else {
        WindowTarget::NewTab
    };
    Ok((url, target))
}

fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
