//! Error types for the host pool.

/// The result type used throughout maestro-hostspool.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur managing the host pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A mandatory parameter is missing or malformed.
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of the problem.
        message: String,
    },

    /// The host does not exist in the pool.
    #[error("host {hostname:?} not found in location {location:?}")]
    HostNotFound {
        /// The pool location.
        location: String,
        /// The missing host.
        hostname: String,
    },

    /// The host already exists in the pool.
    #[error("host {hostname:?} already exists in location {location:?}")]
    HostAlreadyExists {
        /// The pool location.
        location: String,
        /// The conflicting host.
        hostname: String,
    },

    /// The operation requires a free host.
    #[error("host {hostname:?} is {status}, operation requires a free host")]
    HostNotFree {
        /// The busy host.
        hostname: String,
        /// Its current status (wire name).
        status: String,
    },

    /// Connecting to the host failed; the pool entry moved to `Error`.
    #[error("failed to connect to host: {message}")]
    ConnectionFailure {
        /// Probe-provided detail.
        message: String,
    },

    /// A stored enum value is not a member of its enum.
    #[error("invalid {kind} value: {value}")]
    InvalidEnumValue {
        /// The enum kind.
        kind: &'static str,
        /// The offending stored value.
        value: String,
    },

    /// An error from the coordination store.
    #[error("core error: {0}")]
    Core(#[from] maestro_core::Error),
}

impl Error {
    /// Creates a bad-request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }
}
