//! # apps-script-bridge
//!
//! A `postMessage` RPC bridge that lets a static website embed a Google Apps Script web app
//! in an iframe and call its server functions as if it were `google.script.run`.
//!
//! The crate covers both ends of the channel:
//!
//! - the **parent page** ([`bridge::ParentBridge`]): loads the iframe, validates inbound
//!   messages, correlates `serverRequest`/`serverResponse` pairs and routes the iframe's page
//!   actions (title, URL parameters, navigation, analytics, log shipping);
//! - the **iframe** ([`bridge::BridgeTransport`]): answers requests from the embedding site
//!   through a [`bridge::HostRpc`] and announces its lifecycle.
//!
//! Browser bindings over `web_sys` live in `bridge::web` behind the `wasm-web` feature. Every
//! other module works against traits, so the protocol runs natively in tests.
//!
//! ```
//! use apps_script_bridge::bridge::{decode_response, ResponsePayload};
//! use serde_json::json;
//!
//! let payload = ResponsePayload::from_value(&json!({ "result": "hello world" }));
//! assert_eq!(decode_response(payload).unwrap(), json!("hello world"));
//! ```

pub mod analytics;
pub mod bridge;
pub mod config;
pub mod logger;
pub mod logs;
pub mod page;
pub mod platform;

#[cfg(test)]
pub mod test_support;
