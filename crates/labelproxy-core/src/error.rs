//! Error types for the label-enforcing proxy

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Detected only at startup: overlapping routes, invalid passthrough path.
    #[error("configuration error: {0}")]
    Config(String),

    /// The tenant label parameter is missing and no static value is configured.
    #[error("the {0} parameter must be specified once")]
    TenantMissing(String),

    /// Both a static value and a request parameter were supplied for the tenant label.
    #[error("a static value for the {0} label has already been specified")]
    TenantAmbiguous(String),

    /// A query, selector, or filter expression failed to parse.
    #[error("error parsing query string {0:?}")]
    Parse(String),

    /// A pre-existing matcher conflicts with the tenant matcher under strict mode.
    #[error("tenant label {0:?} is not allowed to be set in this context")]
    IllegalMatcher(String),

    /// The tree walk or selector rewrite failed for an unexpected reason.
    #[error("error enforcing label {0:?}")]
    Enforce(String),

    /// A silence operation targets a tenant other than the caller's.
    #[error("silence does not belong to this tenant")]
    ForbiddenSilence,

    /// The upstream transport failed, or returned a status that should be propagated.
    #[error("error querying upstream: {0}")]
    Upstream(String),

    /// Generic internal error with no dedicated variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse(orig: impl Into<String>) -> Self {
        Self::Parse(orig.into())
    }

    pub fn enforce(orig: impl Into<String>) -> Self {
        Self::Enforce(orig.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
