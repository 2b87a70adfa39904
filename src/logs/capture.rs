//! Captures crate log records and queues them for shipping.
//!
//! [`LogCapture::install`] registers the global user log handler. Each record becomes a
//! payload `{ message, functionName, callStack, moduleLog, timestamp, severity }`. The queue
//! is flushed shortly after the first record lands, through a [`LogShipper`].

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::logger::{set_user_log_handler, LogCallback, LogLevel, LogRecord};
use crate::logs::sink::{LogShipper, LOGGER, SHIPPING_LOGGER_NAME};
use crate::platform::runtime::{sleep, spawn_detached};

pub const DEFAULT_MODULE_LOG: &str = "frontend";
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_millis(50);
const UNKNOWN: &str = "unknown";

pub type ContextInjector = Arc<dyn Fn(&mut Map<String, Value>) + Send + Sync + 'static>;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

/// Builds the shipped payload for a record, or `None` when the record is dropped.
///
/// Debug records are dropped outside production and raised to warnings in production.
pub fn payload_for(
    record: &LogRecord,
    module_log: &str,
    is_production: bool,
) -> Option<Map<String, Value>> {
    let level = match record.level {
        LogLevel::Silent => return None,
        LogLevel::Debug if !is_production => return None,
        LogLevel::Debug => LogLevel::Warn,
        other => other,
    };

    let mut payload = Map::new();
    payload.insert(
        "message".into(),
        Value::String(format!("{module_log}: {}", record.message)),
    );
    let function_name = if record.logger_name.is_empty() {
        UNKNOWN.to_string()
    } else {
        record.logger_name.clone()
    };
    payload.insert("functionName".into(), Value::String(function_name));
    payload.insert("callStack".into(), Value::String(UNKNOWN.into()));
    payload.insert("moduleLog".into(), Value::String(module_log.into()));
    payload.insert(
        "timestamp".into(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    payload.insert("severity".into(), Value::String(level.severity().into()));
    Some(payload)
}

/// Global log capture. Dropping the handle does not uninstall; call [`LogCapture::uninstall`].
#[derive(Clone)]
pub struct LogCapture {
    inner: Arc<CaptureInner>,
}

struct CaptureInner {
    shipper: LogShipper,
    is_production: bool,
    module_log: String,
    flush_delay: Duration,
    ignored_loggers: HashSet<String>,
    context: Option<ContextInjector>,
    queue: Mutex<Vec<Value>>,
    flush_scheduled: AtomicBool,
}

pub struct LogCaptureBuilder {
    shipper: LogShipper,
    is_production: bool,
    module_log: String,
    flush_delay: Duration,
    ignored_loggers: HashSet<String>,
    context: Option<ContextInjector>,
}

impl LogCaptureBuilder {
    pub fn production(mut self, is_production: bool) -> Self {
        self.is_production = is_production;
        self
    }

    pub fn module_log(mut self, module_log: impl Into<String>) -> Self {
        self.module_log = module_log.into();
        self
    }

    pub fn flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Records from this logger are never captured.
    pub fn ignore_logger(mut self, name: impl Into<String>) -> Self {
        self.ignored_loggers.insert(name.into());
        self
    }

    /// Adds page context (user id, session, ...) to every payload.
    pub fn context<F>(mut self, inject: F) -> Self
    where
        F: Fn(&mut Map<String, Value>) + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(inject));
        self
    }

    pub fn build(self) -> LogCapture {
        let mut ignored_loggers = self.ignored_loggers;
        ignored_loggers.insert(SHIPPING_LOGGER_NAME.to_string());
        LogCapture {
            inner: Arc::new(CaptureInner {
                shipper: self.shipper,
                is_production: self.is_production,
                module_log: self.module_log,
                flush_delay: self.flush_delay,
                ignored_loggers,
                context: self.context,
                queue: Mutex::new(Vec::new()),
                flush_scheduled: AtomicBool::new(false),
            }),
        }
    }
}

impl LogCapture {
    pub fn builder(shipper: LogShipper) -> LogCaptureBuilder {
        LogCaptureBuilder {
            shipper,
            is_production: false,
            module_log: DEFAULT_MODULE_LOG.to_string(),
            flush_delay: DEFAULT_FLUSH_DELAY,
            ignored_loggers: HashSet::new(),
            context: None,
        }
    }

    /// Installs the global user log handler. Debug records are observed too, so the
    /// production rule can apply.
    pub fn install(&self) {
        let capture = self.clone();
        let callback: LogCallback = Arc::new(move |record: LogRecord| capture.capture(&record));
        set_user_log_handler(Some(callback), Some(LogLevel::Debug));
    }

    pub fn uninstall(&self) {
        set_user_log_handler(None, None);
    }

    /// Queues one record. Records produced while a capture is running on this thread are
    /// dropped.
    pub fn capture(&self, record: &LogRecord) {
        if self.inner.ignored_loggers.contains(&record.logger_name) {
            return;
        }
        if CAPTURING.with(|flag| flag.replace(true)) {
            return;
        }

        if let Some(mut payload) =
            payload_for(record, &self.inner.module_log, self.inner.is_production)
        {
            if let Some(inject) = &self.inner.context {
                inject(&mut payload);
            }
            self.inner.queue.lock().unwrap().push(Value::Object(payload));
            self.schedule_flush();
        }

        CAPTURING.with(|flag| flag.set(false));
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Drains the queue and ships every entry. Returns how many were sent.
    pub async fn flush(&self) -> usize {
        let logs = std::mem::take(&mut *self.inner.queue.lock().unwrap());
        self.inner.flush_scheduled.store(false, Ordering::SeqCst);
        if logs.is_empty() {
            return 0;
        }
        self.inner.shipper.ship(logs).await
    }

    fn schedule_flush(&self) {
        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let capture = self.clone();
        spawn_detached(async move {
            sleep(capture.inner.flush_delay).await;
            let sent = capture.flush().await;
            if sent == 0 {
                LOGGER.debug("log flush sent nothing");
            }
        });
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::logger::{Logger, TEST_GUARD};
    use crate::logs::error::LogsResult;
    use crate::logs::sink::LogSink;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<Value>>>,
    }

    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    impl LogSink for RecordingSink {
        async fn send(&self, logs: Vec<Value>) -> LogsResult<()> {
            self.batches.lock().unwrap().push(logs);
            Ok(())
        }
    }

    fn record(level: LogLevel, message: &str) -> LogRecord {
        LogRecord {
            level,
            message: message.into(),
            args: vec![json!(message)],
            logger_name: "@apps-script-bridge/capture-test".into(),
        }
    }

    #[test]
    fn payload_maps_levels_to_severity() {
        let severity = |level, production| {
            payload_for(&record(level, "m"), "frontend", production)
                .map(|payload| payload["severity"].as_str().unwrap().to_string())
        };
        assert_eq!(severity(LogLevel::Error, false).as_deref(), Some("ERROR"));
        assert_eq!(severity(LogLevel::Warn, false).as_deref(), Some("WARNING"));
        assert_eq!(severity(LogLevel::Info, false).as_deref(), Some("INFO"));
        assert_eq!(severity(LogLevel::Verbose, false).as_deref(), Some("INFO"));
        assert_eq!(severity(LogLevel::Debug, false), None);
        assert_eq!(severity(LogLevel::Debug, true).as_deref(), Some("WARNING"));
    }

    #[test]
    fn payload_carries_module_prefix_and_fields() {
        let payload = payload_for(&record(LogLevel::Error, "boom"), "frontend", false).unwrap();
        assert_eq!(payload["message"], "frontend: boom");
        assert_eq!(payload["moduleLog"], "frontend");
        assert_eq!(payload["functionName"], "@apps-script-bridge/capture-test");
        assert_eq!(payload["callStack"], "unknown");
        assert!(payload["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn captured_records_are_flushed_through_shipper() {
        let sink = Arc::new(RecordingSink::default());
        let capture = LogCapture::builder(LogShipper::new(sink.clone()))
            .flush_delay(Duration::from_secs(3600))
            .context(|payload| {
                payload.insert("userId".into(), json!("u-1"));
            })
            .build();

        for i in 0..12 {
            capture.capture(&record(LogLevel::Warn, &format!("w{i}")));
        }
        capture.capture(&record(LogLevel::Debug, "dropped"));
        assert_eq!(capture.queued(), 12);

        assert_eq!(capture.flush().await, 12);
        assert_eq!(capture.queued(), 0);
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[0][0]["message"], "frontend: w0");
        assert_eq!(batches[0][0]["userId"], "u-1");
    }

    #[test]
    fn shipping_logger_is_never_captured() {
        let capture = LogCapture::builder(LogShipper::new(Arc::new(RecordingSink::default())))
            .ignore_logger("@apps-script-bridge/noisy")
            .flush_delay(Duration::from_secs(3600))
            .build();
        let mut own = record(LogLevel::Error, "Error sending logs");
        own.logger_name = SHIPPING_LOGGER_NAME.into();
        let mut noisy = record(LogLevel::Error, "noise");
        noisy.logger_name = "@apps-script-bridge/noisy".into();

        capture.capture(&own);
        capture.capture(&noisy);
        assert_eq!(capture.queued(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn installed_capture_observes_crate_loggers() {
        let _guard = TEST_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let sink = Arc::new(RecordingSink::default());
        let capture = LogCapture::builder(LogShipper::new(sink.clone()))
            .flush_delay(Duration::from_secs(3600))
            .build();
        capture.install();

        let logger = Logger::new("@apps-script-bridge/capture-install-test");
        logger.set_log_handler(|_, _, _| {});
        logger.error("visible failure");
        capture.uninstall();
        logger.error("after uninstall");

        capture.flush().await;
        let shipped: Vec<Value> = sink
            .batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .filter(|payload| payload["functionName"] == "@apps-script-bridge/capture-install-test")
            .cloned()
            .collect();
        assert_eq!(shipped.len(), 1);
        assert_eq!(shipped[0]["message"], "frontend: visible failure");
        assert_eq!(shipped[0]["severity"], "ERROR");
    }
}
