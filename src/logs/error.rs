use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogsErrorCode {
    InvalidArgument,
    Network,
    /// The log endpoint answered with a non-success status.
    Rejected,
    Internal,
}

impl LogsErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogsErrorCode::InvalidArgument => "logs/invalid-argument",
            LogsErrorCode::Network => "logs/network",
            LogsErrorCode::Rejected => "logs/rejected",
            LogsErrorCode::Internal => "logs/internal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogsError {
    pub code: LogsErrorCode,
    message: String,
}

impl LogsError {
    pub fn new(code: LogsErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for LogsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for LogsError {}

pub type LogsResult<T> = Result<T, LogsError>;

pub fn invalid_argument(message: impl Into<String>) -> LogsError {
    LogsError::new(LogsErrorCode::InvalidArgument, message)
}

pub fn network_error(message: impl Into<String>) -> LogsError {
    LogsError::new(LogsErrorCode::Network, message)
}

pub fn rejected(status: u16) -> LogsError {
    LogsError::new(
        LogsErrorCode::Rejected,
        format!("Error sending logs, status: {status}"),
    )
}

pub fn internal_error(message: impl Into<String>) -> LogsError {
    LogsError::new(LogsErrorCode::Internal, message)
}
