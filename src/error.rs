//! Error types for store access and page-load resolution.

use crate::resolver::ResolutionPhase;

/// Failure of a single call against an order or reservation store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store has no record under the requested id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The store could not be reached (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success status other than 404.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    /// The store answered but the body was not a usable record.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Local database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Terminal failures of a page-load resolution.
///
/// "Reference not recognised" is not an error: it is the `not_found`
/// resolution kind, so the page can show a specific message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The redirect carried no usable reference. No lookup was attempted.
    #[error("payment return is missing a reference number")]
    MissingReference,

    /// The return URL itself could not be parsed.
    #[error("invalid payment return URL: {0}")]
    InvalidRedirect(String),

    /// The caller lost interest (navigated away) before the flow finished.
    #[error("resolution abandoned during {phase:?}")]
    Abandoned { phase: ResolutionPhase },
}
