use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid device id: {0}")]
    BadDeviceId(String),

    #[error("Invalid topic: {0}")]
    BadTopic(String),

    #[error("Invalid scope segment: {0}")]
    BadScope(String),

    #[error("Invalid group id: {0}")]
    BadGroupId(String),

    #[error("Invalid envelope: {0}")]
    BadEnvelope(String),

    #[error("Invalid schema string: {0}")]
    BadSchema(String),

    #[error("Invalid state transition: {0}")]
    BadTransition(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
