use std::time::Duration;

pub(crate) const TYPE_FROM_PARENT: &str = "FROM_PARENT";
pub(crate) const TYPE_FROM_IFRAME: &str = "FROM_IFRAME";
pub(crate) const TYPE_VALIDATE_DOMAIN: &str = "validateDomain";

pub(crate) const ACTION_SERVER_REQUEST: &str = "serverRequest";
pub(crate) const ACTION_SERVER_RESPONSE: &str = "serverResponse";
pub(crate) const ACTION_SITE_INITED: &str = "siteInited";
pub(crate) const ACTION_SITE_FULLY_LOADED: &str = "siteFullyLoaded";
pub(crate) const ACTION_TITLE_CHANGE: &str = "titleChange";
pub(crate) const ACTION_LOGS: &str = "logs";
pub(crate) const ACTION_ANALYTICS_EVENT: &str = "analyticsEvent";
pub(crate) const ACTION_URL_PARAM_CHANGE: &str = "urlParamChange";
pub(crate) const ACTION_OPEN_URL_WITH_PROPS: &str = "openUrlWithProps";
pub(crate) const ACTION_TOGGLE_FULLSCREEN: &str = "toggleFullscreen";

/// Outbound RPC requests are not origin-filtered; inbound responses are.
pub const WILDCARD_TARGET_ORIGIN: &str = "*";

pub const MISSING_RESULT_MESSAGE: &str = "Server response missing result";
/// Used by the iframe side when the host reports a failure without a message.
pub const DEFAULT_ERROR_MESSAGE: &str = "error";

/// Apps Script server function that receives every `{functionName, arguments}` request.
pub const DEFAULT_SERVER_DISPATCHER: &str = "processServerRequest";

pub const APPS_SCRIPT_CONTENT_SUFFIX: &str = ".googleusercontent.com";
pub const MAX_ANCESTRY_HOPS: usize = 5;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_LOAD_EVENT_GRACE: Duration = Duration::from_secs(5);
