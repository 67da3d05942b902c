use std::time::Duration;

// ============================================================================
// Dependency Errors
// ============================================================================
//
// Every outbound call is a bounded network operation. A failure is surfaced
// to the invoking trigger so that its own redelivery applies; nothing here
// is retried in-process.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order store unavailable: {0}")]
    Unavailable(String),

    #[error("order store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("order store returned an undecodable row: {0}")]
    Decode(String),
}

impl StoreError {
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(err.to_string())
    }

    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        StoreError::Decode(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("notification publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("object storage unavailable: {0}")]
    Unavailable(String),

    #[error("object metadata lookup timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum AdvanceError {
    #[error("advance request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("advance request rejected with HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

// ============================================================================
// Component Errors
// ============================================================================

/// Failure of a single transition. Precondition mismatches and irrelevant
/// inputs are outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

impl TransitionError {
    pub fn is_store(&self) -> bool {
        matches!(self, TransitionError::Store(_))
    }
}

/// Failure of a whole invocation, reported to the host trigger so that its
/// redelivery applies.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("order store unreachable for every item of the invocation ({failed} items)")]
    StoreUnreachable { failed: usize },

    /// Every item failed on a dependency, object storage included.
    #[error("dependencies unreachable for every item of the invocation ({failed} items)")]
    DependenciesUnreachable { failed: usize },
}

impl InvocationError {
    pub fn failed(&self) -> usize {
        match self {
            InvocationError::StoreUnreachable { failed }
            | InvocationError::DependenciesUnreachable { failed } => *failed,
        }
    }
}
