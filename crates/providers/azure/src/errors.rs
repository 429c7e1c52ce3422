use thiserror::Error;

pub type Result<T> = std::result::Result<T, AzureBackendError>;

/// Error taxonomy surfaced by [`crate::client::AzureClient`] implementations
/// and by the lifecycle manager built on top of them.
#[derive(Debug, Error)]
pub enum AzureBackendError {
    #[error("azure authentication failed: {0}")]
    AuthFailed(String),

    #[error("azure resource not found: {0}")]
    NotFound(String),

    #[error("azure request forbidden: {0}")]
    Forbidden(String),

    #[error("azure service error ({status}): {message}")]
    ServiceError { status: u16, message: String },

    #[error("azure endpoint unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("unexpected azure API response ({status}, code={code}): {message}")]
    UnexpectedApiError {
        status: u16,
        code: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AzureBackendError {
    /// True when the failure looks like it would be resolved by granting
    /// the caller an additional role — used to attach an actionable hint
    /// rather than a bare permission error. Spec.md's permission-hint
    /// substring classification.
    pub fn looks_like_permission_issue(&self) -> bool {
        const MARKERS: &[&str] = &[
            "authorization failed",
            "permission denied",
            "forbidden",
            "access denied",
            "not authorized",
            "storage blob data owner",
        ];
        let text = self.to_string().to_lowercase();
        MARKERS.iter().any(|marker| text.contains(marker)) || matches!(self, AzureBackendError::AuthFailed(_) | AzureBackendError::Forbidden(_))
    }

    /// True for HTTP 409 responses — the assignment already exists under
    /// some id, which is the outcome the caller wanted anyway.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AzureBackendError::ServiceError { status: 409, .. } | AzureBackendError::UnexpectedApiError { status: 409, .. }
        )
    }
}
