//! Error types for keel
//!
//! The taxonomy follows the reconciliation model: `Waiting` is the
//! transient "a sub-resource is not ready yet" kind that reconcilers
//! convert into a requeue, everything else is surfaced to the caller.

use thiserror::Error;

/// Main error type for keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A dependency of the current reconciler is not ready yet.
    ///
    /// Never surfaced to the operator as a failure; callers convert it
    /// into a requeue.
    #[error("waiting for {resource}")]
    Waiting {
        /// What is being waited on (e.g. "network id", "cluster endpoint")
        resource: String,
    },

    /// Validation error for CRD specs
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Infrastructure provider error that cannot be resolved by waiting
    #[error("provider error: {message}")]
    Provider {
        /// Description of what failed
        message: String,
    },

    /// Certificate issuance or parsing error
    #[error("pki error: {message}")]
    Pki {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {source}")]
    Serialization {
        /// The underlying serde error
        #[from]
        source: serde_json::Error,
    },

    /// A single resource reconciler failed inside a convergence run
    #[error("reconciling {resource}, {source}")]
    Resource {
        /// Name of the failing resource reconciler
        resource: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Every error collected from one convergence run
    #[error("{}", format_aggregate(.errors))]
    Aggregate {
        /// All task errors, not just the first
        errors: Vec<Error>,
    },
}

fn format_aggregate(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// A transient not-ready error for the named dependency
    pub fn waiting(resource: impl Into<String>) -> Self {
        Self::Waiting {
            resource: resource.into(),
        }
    }

    /// A spec validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// An irrecoverable provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// A certificate issuance/parsing error
    pub fn pki(message: impl Into<String>) -> Self {
        Self::Pki {
            message: message.into(),
        }
    }

    /// Tag an error with the resource reconciler it came from
    pub fn for_resource(resource: impl Into<String>, source: Error) -> Self {
        Self::Resource {
            resource: resource.into(),
            source: Box::new(source),
        }
    }

    /// Combine the errors of a convergence run into one aggregate.
    ///
    /// Returns `None` when the run produced no errors.
    pub fn combine(errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => Some(Error::Aggregate { errors }),
        }
    }

    /// True for the transient "waiting for sub-resources" kind
    pub fn is_waiting(&self) -> bool {
        match self {
            Error::Waiting { .. } => true,
            Error::Resource { source, .. } => source.is_waiting(),
            _ => false,
        }
    }
}

/// True when the error chain bottoms out in a network-layer transient
/// (connection refused, reset, timeout, unreachable host).
///
/// These are expected while a cluster endpoint is still coming up and are
/// treated as "waiting for sub-resources" rather than fatal.
pub fn is_network_transient(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::HostUnreachable
                    | std::io::ErrorKind::NetworkUnreachable
            ) {
                return true;
            }
        }
        current = e.source();
    }
    false
}
