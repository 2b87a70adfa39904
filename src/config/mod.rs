//! Deployment settings injected at build or start-up time.
//!
//! Each setting is read from a `BRIDGE_*` variable first, then from the `__BRIDGE_DEFAULTS__`
//! JSON object (camelCase keys). In the browser the defaults object may also be a global of
//! the same name.
//!
//! ```
//! use apps_script_bridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::from_lookup(|key| match key {
//!     "BRIDGE_SCRIPT_ID" => Some("AKfycb-demo".to_string()),
//!     "BRIDGE_RPC_TIMEOUT_MS" => Some("30000".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//! assert_eq!(config.script_id, "AKfycb-demo");
//! assert_eq!(config.rpc_timeout.map(|t| t.as_secs()), Some(30));
//! ```

mod error;

use std::env;
use std::time::Duration;

use serde_json::Value;

use crate::bridge::constants::{
    DEFAULT_LOAD_EVENT_GRACE, DEFAULT_LOAD_TIMEOUT, DEFAULT_SERVER_DISPATCHER,
};
use crate::bridge::lifecycle::LifecycleTimeouts;
use crate::page::params::{DEFAULT_LANGUAGE, SUPPORTED_LANGUAGES};
use crate::page::signature::PublicKeyJwk;

pub use error::{ConfigError, ConfigErrorCode, ConfigResult};
use error::{invalid_defaults, invalid_value};

pub const DEFAULTS_VARIABLE: &str = "__BRIDGE_DEFAULTS__";

const IS_PRODUCTION: (&str, &str) = ("BRIDGE_IS_PRODUCTION", "isProduction");
const ALLOW_ANY_EMBEDDING: (&str, &str) = ("BRIDGE_ALLOW_ANY_EMBEDDING", "allowAnyEmbedding");
const PARENT_WEBSITE: (&str, &str) = ("BRIDGE_PARENT_WEBSITE", "parentWebsite");
const SCRIPT_ID: (&str, &str) = ("BRIDGE_SCRIPT_ID", "scriptId");
const LOGS_ENDPOINT: (&str, &str) = ("BRIDGE_LOGS_ENDPOINT", "logsEndpoint");
const FIREBASE_PROJECT: (&str, &str) = ("BRIDGE_FIREBASE_PROJECT", "firebaseProject");
const ROOT_DOMAIN: (&str, &str) = ("BRIDGE_ROOT_DOMAIN", "rootDomain");
const GTM_ID: (&str, &str) = ("BRIDGE_GTM_ID", "gtmId");
const DEFAULT_LANG: (&str, &str) = ("BRIDGE_DEFAULT_LANG", "defaultLang");
const RPC_TIMEOUT_MS: (&str, &str) = ("BRIDGE_RPC_TIMEOUT_MS", "rpcTimeoutMs");
const LOAD_TIMEOUT_MS: (&str, &str) = ("BRIDGE_LOAD_TIMEOUT_MS", "loadTimeoutMs");
const LOAD_GRACE_MS: (&str, &str) = ("BRIDGE_LOAD_GRACE_MS", "loadGraceMs");
const PUBLIC_KEY_X: (&str, &str) = ("BRIDGE_PUBLIC_KEY_X", "publicKeyX");
const PUBLIC_KEY_Y: (&str, &str) = ("BRIDGE_PUBLIC_KEY_Y", "publicKeyY");
const SERVER_DISPATCHER: (&str, &str) = ("BRIDGE_SERVER_DISPATCHER", "serverDispatcher");

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub is_production: bool,
    /// Development-only: the iframe accepts requests from any embedding origin.
    pub allow_any_embedding: bool,
    /// Origin of the embedding website, e.g. `https://tutor.example.org`.
    pub parent_website: Option<String>,
    /// Default Apps Script deployment id (`org`).
    pub script_id: String,
    pub logs_endpoint: Option<String>,
    pub firebase_project: Option<String>,
    pub root_domain: Option<String>,
    pub gtm_id: Option<String>,
    pub default_lang: String,
    /// `None` waits for a response indefinitely.
    pub rpc_timeout: Option<Duration>,
    pub load_timeout: Duration,
    pub load_event_grace: Duration,
    /// P-256 key that signs non-default `org` values. Without it, a page URL naming an `org`
    /// is rejected.
    pub org_public_key: Option<PublicKeyJwk>,
    /// Apps Script function the iframe routes every request through.
    pub server_dispatcher: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            is_production: false,
            allow_any_embedding: false,
            parent_website: None,
            script_id: String::new(),
            logs_endpoint: None,
            firebase_project: None,
            root_domain: None,
            gtm_id: None,
            default_lang: DEFAULT_LANGUAGE.to_string(),
            rpc_timeout: None,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            load_event_grace: DEFAULT_LOAD_EVENT_GRACE,
            org_public_key: None,
            server_dispatcher: DEFAULT_SERVER_DISPATCHER.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Reads the process environment (and, in the browser, the defaults global).
    pub fn from_env() -> ConfigResult<Self> {
        let global_defaults = defaults_from_global();
        Self::from_sources(|key| env::var(key).ok(), global_defaults)
    }

    /// Like [`from_env`](Self::from_env) with a caller-supplied variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_sources(lookup, None)
    }

    /// Reads a defaults object alone, e.g. one embedded in the page.
    pub fn from_json(defaults: &Value) -> ConfigResult<Self> {
        if !defaults.is_object() {
            return Err(invalid_defaults("defaults must be a JSON object"));
        }
        Self::from_sources(|_| None, Some(defaults.clone()))
    }

    fn from_sources<F>(lookup: F, fallback_defaults: Option<Value>) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = match lookup(DEFAULTS_VARIABLE) {
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw)
                    .map_err(|err| invalid_defaults(format!("{DEFAULTS_VARIABLE}: {err}")))?;
                if !value.is_object() {
                    return Err(invalid_defaults(format!(
                        "{DEFAULTS_VARIABLE} must be a JSON object"
                    )));
                }
                Some(value)
            }
            None => fallback_defaults,
        };
        let source = Source { lookup, defaults };
        let fallback = BridgeConfig::default();

        let default_lang = source
            .text(DEFAULT_LANG)
            .unwrap_or(fallback.default_lang);
        if !SUPPORTED_LANGUAGES.contains(&default_lang.as_str()) {
            return Err(invalid_value(
                DEFAULT_LANG.0,
                &default_lang,
                "a supported language",
            ));
        }

        let org_public_key = match (source.text(PUBLIC_KEY_X), source.text(PUBLIC_KEY_Y)) {
            (Some(x), Some(y)) => Some(PublicKeyJwk::p256(x, y)),
            (None, None) => None,
            (Some(_), None) => {
                return Err(invalid_value(PUBLIC_KEY_Y.0, "", "set alongside BRIDGE_PUBLIC_KEY_X"))
            }
            (None, Some(_)) => {
                return Err(invalid_value(PUBLIC_KEY_X.0, "", "set alongside BRIDGE_PUBLIC_KEY_Y"))
            }
        };

        Ok(Self {
            is_production: source.flag(IS_PRODUCTION)?.unwrap_or(fallback.is_production),
            allow_any_embedding: source
                .flag(ALLOW_ANY_EMBEDDING)?
                .unwrap_or(fallback.allow_any_embedding),
            parent_website: source.text(PARENT_WEBSITE),
            script_id: source.text(SCRIPT_ID).unwrap_or(fallback.script_id),
            logs_endpoint: source.text(LOGS_ENDPOINT),
            firebase_project: source.text(FIREBASE_PROJECT),
            root_domain: source.text(ROOT_DOMAIN),
            gtm_id: source.text(GTM_ID),
            default_lang,
            rpc_timeout: source
                .millis(RPC_TIMEOUT_MS)?
                .filter(|timeout| !timeout.is_zero()),
            load_timeout: source
                .millis(LOAD_TIMEOUT_MS)?
                .unwrap_or(fallback.load_timeout),
            load_event_grace: source
                .millis(LOAD_GRACE_MS)?
                .unwrap_or(fallback.load_event_grace),
            org_public_key,
            server_dispatcher: source
                .text(SERVER_DISPATCHER)
                .unwrap_or(fallback.server_dispatcher),
        })
    }

    /// Hostnames the parent page accepts messages from, besides Apps Script content frames:
    /// the Firebase hosting domains, the root domain and `localhost`.
    pub fn trusted_hostnames(&self) -> Vec<String> {
        let mut hostnames = Vec::new();
        if let Some(project) = &self.firebase_project {
            hostnames.push(format!("{project}.web.app"));
            hostnames.push(format!("{project}.firebaseapp.com"));
        }
        if let Some(root) = &self.root_domain {
            hostnames.push(root.clone());
        }
        hostnames.push("localhost".to_string());
        hostnames
    }

    pub fn lifecycle_timeouts(&self) -> LifecycleTimeouts {
        LifecycleTimeouts {
            load_timeout: self.load_timeout,
            load_event_grace: self.load_event_grace,
        }
    }
}

struct Source<F> {
    lookup: F,
    defaults: Option<Value>,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, (variable, key): (&str, &str)) -> Option<String> {
        if let Some(value) = (self.lookup)(variable) {
            return Some(value);
        }
        match self.defaults.as_ref()?.get(key)? {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    fn text(&self, names: (&str, &str)) -> Option<String> {
        self.raw(names)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn flag(&self, names: (&str, &str)) -> ConfigResult<Option<bool>> {
        let Some(value) = self.raw(names) else {
            return Ok(None);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "" | "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(invalid_value(names.0, &value, "a boolean")),
        }
    }

    fn millis(&self, names: (&str, &str)) -> ConfigResult<Option<Duration>> {
        let Some(value) = self.text(names) else {
            return Ok(None);
        };
        value
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| invalid_value(names.0, &value, "a duration in milliseconds"))
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
fn defaults_from_global() -> Option<Value> {
    use wasm_bindgen::JsValue;

    let global = js_sys::global();
    let value = js_sys::Reflect::get(&global, &JsValue::from_str(DEFAULTS_VARIABLE)).ok()?;
    if value.is_null() || value.is_undefined() {
        return None;
    }
    let serialized = js_sys::JSON::stringify(&value).ok()?.as_string()?;
    serde_json::from_str::<Value>(&serialized)
        .ok()
        .filter(Value::is_object)
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
fn defaults_from_global() -> Option<Value> {
    None
}
