//! Test utilities shared across crate-level unit tests.

pub mod http;
pub mod window;

pub use http::start_mock_server;
pub use window::{FakeIframe, FakeWindow, PageEffect, RecordingHostPage};
