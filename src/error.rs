use crate::state::{BookingStatus, MachineStatus};
use thiserror::Error;

/// Malformed or out-of-policy request. Always recoverable by the requester.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("End time must be after start time")]
    InvalidTimeRange,

    #[error("Maximum booking duration is {max_minutes} minutes (requested {requested_ms} ms)")]
    DurationExceeded { max_minutes: u64, requested_ms: i64 },

    #[error("Justification is required for same-week exceptional bookings")]
    JustificationRequired,

    #[error("Machine {0} not found")]
    MachineNotFound(String),

    #[error("Machine {machine_id} is not available (status: {status})")]
    MachineUnavailable {
        machine_id: String,
        status: MachineStatus,
    },

    #[error("Insufficient tokens. Required: {required}, Available: {available}")]
    InsufficientTokens { required: u64, available: i64 },

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("User {0} already exists")]
    DuplicateUser(String),

    #[error("Machine {0} already exists")]
    DuplicateMachine(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("A description is required")]
    DescriptionRequired,

    #[error("{actor} is not permitted to {action}")]
    Unauthorized { actor: String, action: &'static str },
}

/// Illegal booking status change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Booking {0} not found")]
    BookingNotFound(String),

    #[error("Invalid transition: {current} -> {requested}")]
    InvalidTransition {
        current: BookingStatus,
        requested: BookingStatus,
    },

    #[error("{actor} may not move booking from {current} to {requested}")]
    NotPermitted {
        actor: String,
        current: BookingStatus,
        requested: BookingStatus,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transition rejected: {0}")]
    Transition(#[from] TransitionError),

    /// The check-and-commit could not be made atomic, or persisted records disagree.
    /// Never retried: a second attempt could double-charge.
    #[error("Persistence inconsistency: {0}")]
    PersistenceInconsistency(String),

    /// Another session appended to the command log after this one read it.
    /// Nothing was written; the caller may re-read and try again.
    #[error("Command log moved on: expected position {expected}, found {found}")]
    LogConflict { expected: u64, found: u64 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error category for callers that only need to branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Transition,
    PersistenceInconsistency,
    LogConflict,
    InvalidCommand,
    Storage,
    Unavailable,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Transition(_) => ErrorKind::Transition,
            Error::PersistenceInconsistency(_) => ErrorKind::PersistenceInconsistency,
            Error::LogConflict { .. } => ErrorKind::LogConflict,
            Error::InvalidCommand(_) => ErrorKind::InvalidCommand,
            Error::Storage(_) => ErrorKind::Storage,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// The validation error, if this is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }

    /// The transition error, if this is one.
    pub fn as_transition(&self) -> Option<&TransitionError> {
        match self {
            Error::Transition(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
