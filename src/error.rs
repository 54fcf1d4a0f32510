use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileEngineError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Invalid option '{name}': {details}")]
    InvalidOption { name: String, details: String },

    #[error("A verification round is already in flight")]
    RoundInFlight,

    #[error("Invalid verification transition: cannot {event} while {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProfileEngineError>;
