use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeErrorCode {
    InvalidArgument,
    /// The Apps Script function reported an application error.
    Server,
    /// The response envelope did not follow the wire protocol.
    Protocol,
    LoadFailed,
    /// A non-default `org` came without a valid signature.
    InvalidSignature,
    DeadlineExceeded,
    Unavailable,
    Internal,
}

impl BridgeErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeErrorCode::InvalidArgument => "bridge/invalid-argument",
            BridgeErrorCode::Server => "bridge/server",
            BridgeErrorCode::Protocol => "bridge/protocol",
            BridgeErrorCode::LoadFailed => "bridge/load-failed",
            BridgeErrorCode::InvalidSignature => "bridge/invalid-signature",
            BridgeErrorCode::DeadlineExceeded => "bridge/deadline-exceeded",
            BridgeErrorCode::Unavailable => "bridge/unavailable",
            BridgeErrorCode::Internal => "bridge/internal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeError {
    pub code: BridgeErrorCode,
    message: String,
}

impl BridgeError {
    pub fn new(code: BridgeErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The bare message, e.g. the text the Apps Script function threw.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for BridgeError {}

pub type BridgeResult<T> = Result<T, BridgeError>;

pub fn invalid_argument(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::InvalidArgument, message)
}

pub fn server_error(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::Server, message)
}

pub fn protocol_error(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::Protocol, message)
}

pub fn load_failed(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::LoadFailed, message)
}

pub fn invalid_signature(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::InvalidSignature, message)
}

pub fn deadline_exceeded(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::DeadlineExceeded, message)
}

pub fn unavailable(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::Unavailable, message)
}

pub fn internal_error(message: impl Into<String>) -> BridgeError {
    BridgeError::new(BridgeErrorCode::Internal, message)
}
