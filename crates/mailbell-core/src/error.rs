use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum MailbellError {
    /// The file or environment could not be parsed into `MailbellConfig`.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value parsed but is unusable.
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, MailbellError>;
