use thiserror::Error;

/// Every internal fault the server can raise. Protocol-level outcomes (bad
/// key, not an operator, ...) are NOT errors — they're numeric replies sent
/// straight to the offending client — so this enum stays reserved for
/// faults that aren't a normal part of the protocol: a malformed
/// persistence row, a parser that can't make sense of a line, a command
/// dispatched before registration completed.
#[derive(Error, Debug, Clone)]
pub enum IrcError {
    #[error("parsing error: {0}")]
    ParsingError(String),

    #[error("CAP pre-registration error: {0}")]
    CapPreRegistration(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("client is not registered")]
    NotRegistered,

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::persistence::PersistenceError> for IrcError {
    fn from(e: crate::persistence::PersistenceError) -> Self {
        IrcError::Persistence(e.to_string())
    }
}
