//! Uniform success/failure wrapper returned by every registry operation.
//!
//! A [`ResultEnvelope`] is a transport artifact: it is produced by a port
//! call and consumed immediately by the caller. Failed envelopes always carry
//! an [`ErrorDescriptor`]; successful envelopes may or may not carry a value
//! (an empty success is meaningful for some calls, e.g. a snapshot request
//! that returned no handle).

use serde::{Deserialize, Serialize};

/// Numeric error catalogue reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ErrorCode {
    Runtime,
    Unspecified,
    DuplicateEntity,
    UnknownEntityId,
    UnknownCommand,
    MissingCommandArgument,
    ReadOperation,
    WriteOperation,
    ResponseSerialization,
    RegistryModeAlreadySet,
    IncorrectRegistryMode,
    FailedToDeleteSnapshot,
    DuplicateFragmentReplication,
    LocalFragmentReplication,
    NonColocatedFragmentFormation,
    UniqueFragmentRemoval,
    SeedNonEmptyRegistry,
    IncorrectFragmentLocation,
    DataKeyNotFound,
    IllegalCommandArgument,
    MalformedCommandStatement,
    /// A code this client does not know about.
    Unrecognized(u32),
}

impl ErrorCode {
    /// Numeric value as sent over the wire.
    pub fn code(self) -> u32 {
        match self {
            ErrorCode::Runtime => 0,
            ErrorCode::Unspecified => 9999,
            ErrorCode::DuplicateEntity => 2100,
            ErrorCode::UnknownEntityId => 2101,
            ErrorCode::UnknownCommand => 2201,
            ErrorCode::MissingCommandArgument => 2202,
            ErrorCode::ReadOperation => 2300,
            ErrorCode::WriteOperation => 2301,
            ErrorCode::ResponseSerialization => 2350,
            ErrorCode::RegistryModeAlreadySet => 2500,
            ErrorCode::IncorrectRegistryMode => 2501,
            ErrorCode::FailedToDeleteSnapshot => 2540,
            ErrorCode::DuplicateFragmentReplication => 2601,
            ErrorCode::LocalFragmentReplication => 2602,
            ErrorCode::NonColocatedFragmentFormation => 2603,
            ErrorCode::UniqueFragmentRemoval => 2604,
            ErrorCode::SeedNonEmptyRegistry => 2605,
            ErrorCode::IncorrectFragmentLocation => 2606,
            ErrorCode::DataKeyNotFound => 3100,
            ErrorCode::IllegalCommandArgument => 4100,
            ErrorCode::MalformedCommandStatement => 4101,
            ErrorCode::Unrecognized(code) => code,
        }
    }

    /// Logical constraint violations live in `[2600, 3000)`; everything else
    /// points at a registry-side or protocol-level problem.
    pub fn is_constraint(self) -> bool {
        (2600..3000).contains(&self.code())
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        match code {
            0 => ErrorCode::Runtime,
            9999 => ErrorCode::Unspecified,
            2100 => ErrorCode::DuplicateEntity,
            2101 => ErrorCode::UnknownEntityId,
            2201 => ErrorCode::UnknownCommand,
            2202 => ErrorCode::MissingCommandArgument,
            2300 => ErrorCode::ReadOperation,
            2301 => ErrorCode::WriteOperation,
            2350 => ErrorCode::ResponseSerialization,
            2500 => ErrorCode::RegistryModeAlreadySet,
            2501 => ErrorCode::IncorrectRegistryMode,
            2540 => ErrorCode::FailedToDeleteSnapshot,
            2601 => ErrorCode::DuplicateFragmentReplication,
            2602 => ErrorCode::LocalFragmentReplication,
            2603 => ErrorCode::NonColocatedFragmentFormation,
            2604 => ErrorCode::UniqueFragmentRemoval,
            2605 => ErrorCode::SeedNonEmptyRegistry,
            2606 => ErrorCode::IncorrectFragmentLocation,
            3100 => ErrorCode::DataKeyNotFound,
            4100 => ErrorCode::IllegalCommandArgument,
            4101 => ErrorCode::MalformedCommandStatement,
            other => ErrorCode::Unrecognized(other),
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error payload carried by a failed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{}", render_descriptor(.code, .message))]
pub struct ErrorDescriptor {
    /// Registry error code, absent for client-side failures (I/O, timeouts).
    pub code: Option<ErrorCode>,
    pub message: String,
}

fn render_descriptor(code: &Option<ErrorCode>, message: &str) -> String {
    match code {
        Some(code) => format!("[{code}] {message}"),
        None => message.to_string(),
    }
}

impl ErrorDescriptor {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Descriptor for a failure that never reached the registry.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_constraint(&self) -> bool {
        self.code.map(ErrorCode::is_constraint).unwrap_or(false)
    }
}

/// Result of a single registry call.
///
/// Invariant: `error.is_some()` exactly when the call failed. The fields are
/// private so the invariant can only be established through the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope<T> {
    value: Option<T>,
    error: Option<ErrorDescriptor>,
}

impl<T> ResultEnvelope<T> {
    pub fn success(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    /// A successful call that produced no value.
    pub fn empty() -> Self {
        Self {
            value: None,
            error: None,
        }
    }

    pub fn failure(error: ErrorDescriptor) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// The value, only meaningful when the call succeeded.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorDescriptor> {
        self.error.as_ref()
    }

    /// Convert a failed envelope into an error for callers that cannot
    /// recover locally. A successful envelope yields its (optional) value.
    pub fn raise_on_error(self) -> Result<Option<T>, ErrorDescriptor> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.value),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResultEnvelope<U> {
        ResultEnvelope {
            value: self.value.map(f),
            error: self.error,
        }
    }
}

impl<T> From<Result<T, ErrorDescriptor>> for ResultEnvelope<T> {
    fn from(result: Result<T, ErrorDescriptor>) -> Self {
        match result {
            Ok(value) => ResultEnvelope::success(value),
            Err(err) => ResultEnvelope::failure(err),
        }
    }
}
