use crate::types::OrgId;

/// Rejections raised before a workflow starts. No events are emitted for
/// these; the caller never sees a partial stream.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("session_id must not be empty")]
    MissingSession,

    #[error("unknown or inaccessible organization: {0}")]
    UnknownOrganization(OrgId),

    #[error("temp file {file_id} is not registered for session {session_id}")]
    UnknownTempFile { session_id: String, file_id: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
