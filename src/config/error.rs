use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigErrorCode {
    InvalidValue,
    InvalidDefaults,
}

impl ConfigErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigErrorCode::InvalidValue => "config/invalid-value",
            ConfigErrorCode::InvalidDefaults => "config/invalid-defaults",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub code: ConfigErrorCode,
    message: String,
}

impl ConfigError {
    pub fn new(code: ConfigErrorCode, message: impl Into<String>) -> Self {
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

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for ConfigError {}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub fn invalid_value(key: &str, value: &str, expected: &str) -> ConfigError {
    ConfigError::new(
        ConfigErrorCode::InvalidValue,
        format!("{key}={value:?} is not {expected}"),
    )
}

pub fn invalid_defaults(message: impl Into<String>) -> ConfigError {
    ConfigError::new(ConfigErrorCode::InvalidDefaults, message)
}
