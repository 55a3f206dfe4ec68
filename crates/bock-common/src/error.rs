//! Common error types for the Bock storage layer.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`BockError`].
pub type BockResult<T> = Result<T, BockError>;

/// Common errors across the Bock storage layer.
#[derive(Error, Diagnostic, Debug)]
pub enum BockError {
    /// The root remap option could not be parsed.
    #[error("Invalid user/group specification for root remapping: {spec:?}")]
    #[diagnostic(
        code(bock::config::invalid_remap),
        help("Use one of: user, uid, user:group, uid:gid")
    )]
    InvalidRemapSpec {
        /// The rejected specification.
        spec: String,
    },

    /// A user or group name could not be resolved.
    #[error("Error during {kind} lookup for {token:?}: {reason}")]
    #[diagnostic(code(bock::config::identity_lookup))]
    IdentityLookup {
        /// "uid" or "gid".
        kind: &'static str,
        /// The token that failed to resolve.
        token: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// Two settings cannot be used together.
    #[error("Incompatible settings: {message}")]
    #[diagnostic(code(bock::config::incompatible))]
    IncompatibleSettings {
        /// The conflict.
        message: String,
    },

    /// Root remap target is outside the remappable range.
    #[error("Cannot create ID maps: uid {uid}, gid {gid} out of remap range")]
    #[diagnostic(
        code(bock::idmap::invalid_range),
        help("The remapped root uid and gid must both be at least 1")
    )]
    InvalidIdRange {
        /// Requested uid.
        uid: u32,
        /// Requested gid.
        gid: u32,
    },

    /// An id is not covered by any range of a non-empty map.
    #[error("{direction} ID {id} cannot be mapped")]
    #[diagnostic(code(bock::idmap::unmappable))]
    UnmappableId {
        /// "Container" or "Host", the axis the id lives on.
        direction: &'static str,
        /// The id.
        id: u32,
    },

    /// A filesystem operation failed.
    #[error("Failed to {operation} {}: {source}", path.display())]
    #[diagnostic(code(bock::filesystem))]
    Filesystem {
        /// What was being done.
        operation: &'static str,
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The privilege-separated layer apply failed.
    #[error("ApplyLayer {status} stdout: {stdout} stderr: {stderr}")]
    #[diagnostic(code(bock::archive::apply_layer))]
    ApplyLayerFailed {
        /// Exit status or decode failure of the helper.
        status: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(bock::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(bock::serialization))]
    Serialization(String),

    /// Feature not supported on this platform.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(bock::unsupported),
        help("User namespace remapping requires Linux with user namespace support")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(bock::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(bock::internal),
        help("This is a bug, please report it at https://github.com/bock-containers/bock/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl BockError {
    /// Wrap an I/O error with the operation and path it came from.
    pub fn fs(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error means the path was already absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Filesystem { source, .. } | Self::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for BockError {
    fn from(err: serde_json::Error) -> Self {
        BockError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BockError::UnmappableId {
            direction: "Container",
            id: 42,
        };
        assert_eq!(err.to_string(), "Container ID 42 cannot be mapped");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BockError = io_err.into();
        assert!(matches!(err, BockError::Io(_)));
        assert!(err.is_not_found());
    }

    #[test]
    fn filesystem_error_names_path() {
        let err = BockError::fs(
            "create directory",
            "/var/lib/bock/0.0",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().starts_with("Failed to create directory /var/lib/bock/0.0"));
        assert!(!err.is_not_found());
    }
}
