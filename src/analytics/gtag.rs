//! gtag data layer bookkeeping.
//!
//! The Rust side never injects the Tag Manager script itself. It records the `dataLayer`
//! commands the page would push (`js`, `config`, `event`) and forwards each one to an optional
//! hook, which the browser binding uses to call the real `window.gtag`.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@apps-script-bridge/analytics"));

const GTAG_SCRIPT_URL: &str = "https://www.googletagmanager.com/gtag/js";

/// One `gtag(...)` call as pushed onto `dataLayer`.
#[derive(Clone, Debug, PartialEq)]
pub enum GtagCommand {
    Js(DateTime<Utc>),
    Config {
        measurement_id: String,
        params: BTreeMap<String, String>,
    },
    Event {
        name: String,
        params: Map<String, Value>,
    },
}

impl GtagCommand {
    /// The argument list, e.g. `["event", "select_content", {...}]`.
    pub fn to_value(&self) -> Value {
        match self {
            GtagCommand::Js(at) => json!(["js", at.to_rfc3339_opts(SecondsFormat::Millis, true)]),
            GtagCommand::Config {
                measurement_id,
                params,
            } => json!(["config", measurement_id, params]),
            GtagCommand::Event { name, params } => json!(["event", name, params]),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GtagState {
    pub data_layer_name: String,
    pub measurement_id: Option<String>,
    /// Custom dimensions; `None` values are left out of the `config` command.
    pub dimensions: BTreeMap<String, Option<String>>,
    pub bootstrapped: bool,
    pub data_layer: Vec<GtagCommand>,
}

type CommandHook = Arc<dyn Fn(&GtagCommand) + Send + Sync + 'static>;

/// Page-wide gtag state: dimensions, bootstrap flag and the recorded data layer.
#[derive(Default)]
pub struct TagManager {
    state: Mutex<GtagState>,
    on_command: Mutex<Option<CommandHook>>,
}

impl TagManager {
    pub fn new(measurement_id: Option<String>) -> Self {
        Self {
            state: Mutex::new(GtagState {
                data_layer_name: "dataLayer".to_string(),
                measurement_id: measurement_id.filter(|id| !id.is_empty()),
                ..Default::default()
            }),
            on_command: Mutex::new(None),
        }
    }

    pub fn set_dimension(&self, name: impl Into<String>, value: Option<String>) {
        self.state
            .lock()
            .unwrap()
            .dimensions
            .insert(name.into(), value);
    }

    /// Called with every command after it is recorded.
    pub fn set_command_hook<F>(&self, hook: F)
    where
        F: Fn(&GtagCommand) + Send + Sync + 'static,
    {
        *self.on_command.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Defines `gtag` and pushes `js` plus `config` (only when some dimension is set).
    /// Runs once; later calls return `false`.
    pub fn bootstrap(&self) -> bool {
        let commands = {
            let mut state = self.state.lock().unwrap();
            if state.bootstrapped {
                return false;
            }
            state.bootstrapped = true;

            let mut commands = vec![GtagCommand::Js(Utc::now())];
            let params: BTreeMap<String, String> = state
                .dimensions
                .iter()
                .filter_map(|(name, value)| value.clone().map(|value| (name.clone(), value)))
                .collect();
            match (&state.measurement_id, params.is_empty()) {
                (Some(measurement_id), false) => commands.push(GtagCommand::Config {
                    measurement_id: measurement_id.clone(),
                    params,
                }),
                (None, false) => LOGGER.warn("custom dimensions set without a measurement id"),
                _ => {}
            }
            state.data_layer.extend(commands.iter().cloned());
            commands
        };
        for command in &commands {
            self.forward(command);
        }
        true
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.state.lock().unwrap().bootstrapped
    }

    /// Records `command`. Before [`bootstrap`](Self::bootstrap) there is no `gtag` yet and the
    /// command is dropped.
    pub fn gtag(&self, command: GtagCommand) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if !state.bootstrapped {
                return false;
            }
            state.data_layer.push(command.clone());
        }
        self.forward(&command);
        true
    }

    /// The `analyticsEvent` mapping: `select_content` with `content_type = "button"`.
    pub fn select_content(&self, item_id: &str) -> bool {
        let mut params = Map::new();
        params.insert("content_type".into(), Value::String("button".into()));
        params.insert("item_id".into(), Value::String(item_id.to_string()));
        self.gtag(GtagCommand::Event {
            name: "select_content".into(),
            params,
        })
    }

    /// URL of the Tag Manager script for the configured id.
    pub fn script_url(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .measurement_id
            .as_ref()
            .map(|id| format!("{GTAG_SCRIPT_URL}?id={id}"))
    }

    pub fn snapshot(&self) -> GtagState {
        self.state.lock().unwrap().clone()
    }

    fn forward(&self, command: &GtagCommand) {
        let hook = self.on_command.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(command);
        }
    }
}

impl std::fmt::Debug for TagManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagManager")
            .field("state", &self.snapshot())
            .finish()
    }
}

/// Whether the Tag Manager script should be injected on `hostname`.
///
/// Dotless hosts (`localhost`), IPv4 literals and machines flagged with `gtag_disabled` are
/// skipped unless `force` is set.
pub fn should_load_script(hostname: &str, disabled: bool, force: bool) -> bool {
    if force {
        return true;
    }
    let local = !hostname.contains('.') || hostname.parse::<Ipv4Addr>().is_ok();
    !(local || disabled)
}
