use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("missing data: {0}")]
    MissingData(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("watermark write failed for {stream}: {message}")]
    WatermarkWrite { stream: String, message: String },

    #[error("source error: {0}")]
    Source(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DocsyncError {
    /// Returns `true` for errors that abort a whole run rather than a single
    /// record or batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DocsyncError::Config(_)
                | DocsyncError::Auth(_)
                | DocsyncError::Source(_)
                | DocsyncError::Internal(_)
        )
    }
}

pub type DocsyncResult<T> = Result<T, DocsyncError>;
