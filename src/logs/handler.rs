//! Receiving end of the log endpoint, as deployed behind the site's hosting rewrite.

use std::sync::LazyLock;

use serde_json::Value;

use crate::logger::Logger;
use crate::logs::sink::MAX_LOGS_PER_REQUEST;

static LOGGER: LazyLock<Logger> =
    LazyLock::new(|| Logger::new("@apps-script-bridge/logs-endpoint"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: u16,
    pub body: &'static str,
}

impl HandlerResponse {
    fn ok() -> Self {
        Self {
            status: 200,
            body: "OK",
        }
    }

    fn not_allowed() -> Self {
        Self {
            status: 405,
            body: "Not Allowed",
        }
    }
}

/// Validates `PUT { logs: [...] }` requests and writes each entry as one JSON line.
#[derive(Clone, Debug, Default)]
pub struct PutLogsHandler {
    allowed_host: Option<String>,
}

impl PutLogsHandler {
    /// `allowed_host` is compared with the `x-forwarded-host` header when set.
    pub fn new(allowed_host: Option<String>) -> Self {
        Self {
            allowed_host: allowed_host.filter(|host| !host.is_empty()),
        }
    }

    pub fn handle(
        &self,
        method: &str,
        forwarded_host: Option<&str>,
        body: &Value,
    ) -> HandlerResponse {
        if let Some(allowed) = &self.allowed_host {
            if forwarded_host != Some(allowed.as_str()) {
                return HandlerResponse::not_allowed();
            }
        }
        if !method.eq_ignore_ascii_case("PUT") {
            return HandlerResponse::not_allowed();
        }
        let logs = match body.get("logs").and_then(Value::as_array) {
            Some(logs) if logs.len() <= MAX_LOGS_PER_REQUEST => logs,
            _ => return HandlerResponse::not_allowed(),
        };

        for entry in logs {
            LOGGER.info(entry.to_string());
        }
        HandlerResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HOST: &str = "https://demo-project.firebaseapp.com";

    fn handler() -> PutLogsHandler {
        PutLogsHandler::new(Some(HOST.into()))
    }

    #[test]
    fn accepts_valid_batch() {
        let body = json!({ "logs": [{ "message": "frontend: hi", "severity": "INFO" }] });
        assert_eq!(handler().handle("PUT", Some(HOST), &body), HandlerResponse::ok());
    }

    #[test]
    fn rejects_wrong_method_and_host() {
        let body = json!({ "logs": [] });
        assert_eq!(handler().handle("GET", Some(HOST), &body).status, 405);
        assert_eq!(
            handler().handle("PUT", Some("https://evil.example.com"), &body).body,
            "Not Allowed"
        );
        assert_eq!(handler().handle("PUT", None, &body).status, 405);
        assert_eq!(PutLogsHandler::default().handle("PUT", None, &body).status, 200);
    }

    #[test]
    fn rejects_malformed_or_oversized_logs() {
        assert_eq!(handler().handle("PUT", Some(HOST), &json!({})).status, 405);
        assert_eq!(
            handler().handle("PUT", Some(HOST), &json!({ "logs": "x" })).status,
            405
        );
        let eleven = json!({ "logs": vec![json!({}); 11] });
        assert_eq!(handler().handle("PUT", Some(HOST), &eleven).status, 405);
        let ten = json!({ "logs": vec![json!({}); 10] });
        assert_eq!(handler().handle("PUT", Some(HOST), &ten).status, 200);
    }
}
