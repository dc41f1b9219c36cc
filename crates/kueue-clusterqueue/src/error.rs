//! ClusterQueue controller error types

use kueue_state::StateError;

/// Errors surfaced by the ClusterQueue controller
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Kubernetes API error not covered by a more specific variant
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The object was deleted concurrently
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// The object changed since it was read
    #[error("conflict writing {kind} {name}: object has been modified")]
    Conflict {
        /// Resource kind
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// Cache or queue manager rejected the operation
    #[error("{0}")]
    State(#[from] StateError),

    /// The controller was started twice
    #[error("controller already running")]
    AlreadyRunning,
}

impl Error {
    /// Map a kube error for a named object, splitting out 404 and 409
    pub(crate) fn from_api(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
                kind,
                name: name.to_string(),
            },
            other => Error::Kube(other),
        }
    }

    /// Whether the object was already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}
