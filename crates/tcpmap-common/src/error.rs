//! Error types for the tcpmap controller
//!
//! Errors carry the kind and `namespace/name` of the object involved so the
//! error policy can log something actionable. `is_retryable` decides whether
//! a failed reconcile is retried with backoff or waits for a spec change.

use thiserror::Error;

/// Main error type for tcpmap operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A patch was rejected because the object changed since it was read
    #[error("conflict updating {kind} {name}: object was modified concurrently")]
    Conflict {
        /// Kind of the object being patched (Service, ConfigMap, ...)
        kind: String,
        /// `namespace/name` of the object
        name: String,
    },

    /// The object disappeared between being read and being patched
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// `namespace/name` of the object
        name: String,
    },

    /// The resource itself is malformed
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Operator configuration is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// A state that cannot occur by construction was observed
    #[error("invariant violated: {message}")]
    Invariant {
        /// Description of the violated invariant
        message: String,
    },
}

impl Error {
    /// Create a conflict error for the given object
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error for the given object
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invariant violation with the given message
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant {
            message: msg.into(),
        }
    }

    /// Map a kube error from a write to `kind`/`name` into a typed error.
    ///
    /// 409 becomes [`Error::Conflict`] and 404 becomes [`Error::NotFound`];
    /// anything else is kept as [`Error::Kube`].
    pub fn from_write(source: kube::Error, kind: &str, name: &str) -> Self {
        match &source {
            kube::Error::Api(ae) if ae.code == 409 => Self::conflict(kind, name),
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            _ => Self::Kube { source },
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts and vanished objects clear up on a fresh attempt. Validation,
    /// configuration and invariant errors need a human.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Conflict { .. } => true,
            Error::NotFound { .. } => true,
            Error::Validation { .. } => false,
            Error::Config { .. } => false,
            Error::Invariant { .. } => false,
        }
    }
}
