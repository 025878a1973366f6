//! Error types and boundary status codes.
//!
//! [`Error`] is what every public operation returns. [`BackendError`] is the
//! narrower vocabulary a [`Backend`](crate::backend::Backend) reports; it is
//! folded into [`Error`] at the context layer.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which cache produced a compilation failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ObjectKind {
    Pipeline,
    DepthStencil,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Pipeline => f.write_str("pipeline"),
            ObjectKind::DepthStencil => f.write_str("depth-stencil"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("a rendering context is already initialized")]
    AlreadyInitialized,

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// Backend rejected a pipeline or depth-stencil key. Never cached.
    #[error("{object} compilation failed (key {key_hash:#018x}): {reason}")]
    Compilation {
        object: ObjectKind,
        key_hash: u64,
        reason: String,
    },
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Boundary status this error reports as.
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidArgument(_) => Status::InvalidArgument,
            Error::AlreadyInitialized => Status::AlreadyInitialized,
            Error::InitializationFailed(_) | Error::Compilation { .. } => {
                Status::InitializationFailed
            }
        }
    }
}

/// Failures reported by a backend implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Compilation(String),

    #[error("{0}")]
    Resource(String),
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            BackendError::Compilation(msg) | BackendError::Resource(msg) => {
                Error::InitializationFailed(msg)
            }
        }
    }
}

/// Numeric status codes used at the host boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    AlreadyInitialized = 1,
    InvalidArgument = 2,
    InitializationFailed = 3,
}

impl Status {
    pub fn of<T>(result: &Result<T>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(err) => err.status(),
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}
