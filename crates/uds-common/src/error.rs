//! Error types for the UDS egress operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the package, host, or resource it concerns so a
//! failure surfaced on a Package status or event can be acted on directly.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for egress operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for a package's egress request
    #[error("validation error for {package}: {message}")]
    Validation {
        /// Package id (`<name>-<namespace>`) with the invalid request
        package: String,
        /// Description of what's invalid
        message: String,
    },

    /// Two packages requested the same host and port with different protocols
    #[error(
        "protocol conflict for {host}:{port}: package {package} requested {requested}, \
         but package {existing_package} already uses {existing}"
    )]
    ProtocolConflict {
        /// Remote host both packages target
        host: String,
        /// Port both packages target
        port: u16,
        /// Package whose update was rejected
        package: String,
        /// Protocol the rejected package asked for
        requested: String,
        /// Package already registered for the host and port
        existing_package: String,
        /// Protocol already registered
        existing: String,
    },

    /// The egress component for a mode is not deployed in the cluster
    #[error("egress unavailable in namespace {namespace}: {message}")]
    EgressUnavailable {
        /// Namespace expected to host the egress component
        namespace: String,
        /// Description of what's missing
        message: String,
    },

    /// A shared resource could not be created or patched within the retry budget
    #[error("failed to reconcile {resource} after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// `<Kind>/<namespace>/<name>` of the shared resource
        resource: String,
        /// Number of attempts made
        attempts: u32,
        /// Last underlying error
        message: String,
    },

    /// The egress waypoint never reported Accepted and Programmed
    #[error("waypoint {namespace}/{name} not ready after {attempts} attempts")]
    WaypointTimeout {
        /// Waypoint namespace
        namespace: String,
        /// Waypoint name
        name: String,
        /// Number of polling attempts made
        attempts: u32,
    },

    /// One or more modes failed during a reconciliation pass
    #[error("egress reconciliation failed: {}", failures.join("; "))]
    Reconciliation {
        /// One message per failed mode
        failures: Vec<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "scheduler", "controller")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without package context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            package: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with package context
    pub fn validation_for(package: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            package: package.into(),
            message: msg.into(),
        }
    }

    /// Create an error for a missing egress component
    pub fn egress_unavailable(namespace: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::EgressUnavailable {
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// Check if this error is retryable
    ///
    /// Validation and conflict errors require the package to change.
    /// Kubernetes errors depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::ProtocolConflict { .. } => false,
            Error::EgressUnavailable { .. } => true,
            Error::RetriesExhausted { .. } => true,
            Error::WaypointTimeout { .. } => true,
            Error::Reconciliation { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the package id if this error is associated with a specific package
    pub fn package(&self) -> Option<&str> {
        match self {
            Error::Validation { package, .. } => Some(package),
            Error::ProtocolConflict { package, .. } => Some(package),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
