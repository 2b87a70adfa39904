//! Log capture and shipping to the site's log endpoint, plus the endpoint's own validation.

mod capture;
pub mod error;
mod handler;
mod sink;

pub use capture::{
    payload_for, ContextInjector, LogCapture, LogCaptureBuilder, DEFAULT_FLUSH_DELAY,
    DEFAULT_MODULE_LOG,
};
pub use error::{LogsError, LogsErrorCode, LogsResult};
pub use handler::{HandlerResponse, PutLogsHandler};
pub use sink::{HttpLogSink, LogShipper, LogSink, MAX_LOGS_PER_REQUEST};
