//! Correlates `serverRequest` ids with the resolvers waiting for their responses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::bridge::envelope::ResponsePayload;

/// Single-use continuation invoked with the response payload.
pub type Resolver = Box<dyn FnOnce(ResponsePayload) + Send + 'static>;

/// How fresh request ids are generated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestIdStrategy {
    /// Random (v4) UUIDs.
    #[default]
    Uuid,
    /// `cb_<base36 millis>_<random suffix>`, for hosts without a usable random UUID source.
    TimestampRandom,
}

impl RequestIdStrategy {
    pub fn generate(self) -> String {
        match self {
            RequestIdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            RequestIdStrategy::TimestampRandom => {
                let millis = Utc::now().timestamp_millis().max(0) as u64;
                let suffix: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(12)
                    .map(|c| char::from(c).to_ascii_lowercase())
                    .collect();
                format!("cb_{}_{}", to_base36(millis), suffix)
            }
        }
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Maps opaque request ids to pending resolvers with at-most-once delivery.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    strategy: RequestIdStrategy,
    pending: Mutex<HashMap<String, Resolver>>,
}

impl CallbackRegistry {
    pub fn new(strategy: RequestIdStrategy) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                strategy,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Stores `resolver` under a fresh id and returns the id.
    pub fn register<F>(&self, resolver: F) -> String
    where
        F: FnOnce(ResponsePayload) + Send + 'static,
    {
        let mut pending = self.inner.pending.lock().unwrap();
        let mut id = self.inner.strategy.generate();
        while pending.contains_key(&id) {
            id = self.inner.strategy.generate();
        }
        pending.insert(id.clone(), Box::new(resolver));
        id
    }

    /// Delivers `payload` to the resolver registered under `id`.
    ///
    /// The entry is removed and the lock released before the resolver runs, so a resolver
    /// may register or resolve other ids. Unknown or already consumed ids return `false`.
    pub fn resolve(&self, id: &str, payload: ResponsePayload) -> bool {
        let resolver = self.inner.pending.lock().unwrap().remove(id);
        match resolver {
            Some(resolver) => {
                resolver(payload);
                true
            }
            None => false,
        }
    }

    /// Drops a pending entry without invoking it.
    pub fn cancel(&self, id: &str) -> bool {
        self.inner.pending.lock().unwrap().remove(id).is_some()
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("strategy", &self.inner.strategy)
            .field("pending", &self.pending())
            .finish()
    }
}
