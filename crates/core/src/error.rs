//! Error kinds of the ingestion and alerting path.

use thiserror::Error;

/// Classified failure of one unit of work. The variant decides the
/// recovery policy: drop-and-ack, retry, or dead-letter.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown factory slug: {0}")]
    UnknownFactory(String),

    #[error("unknown device {1} in factory {0}")]
    UnknownDevice(i64, String),

    #[error("transient store failure: {0}")]
    TransientStore(String),

    #[error("queue saturated: {0}")]
    TransientQueue(String),

    #[error("permanent store failure: {0}")]
    PermanentStore(String),

    #[error("rule evaluation failed: {0}")]
    EvaluatorBug(String),

    #[error("shutting down")]
    Shutdown,
}

impl IngestError {
    /// Whether the unit of work may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::TransientStore(_) | IngestError::TransientQueue(_)
        )
    }

    /// Whether the message is invalid and should be dropped after logging,
    /// with the broker delivery acknowledged.
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            IngestError::InvalidTopic(_)
                | IngestError::InvalidPayload(_)
                | IngestError::UnknownFactory(_)
                | IngestError::UnknownDevice(..)
        )
    }
}

/// Classify a database error: schema and constraint violations are
/// permanent, everything else (I/O, timeouts, pool exhaustion) is
/// retryable.
impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // Class 23: integrity constraint violation, class 42:
                    // syntax error or access rule violation.
                    if code.starts_with("23") || code.starts_with("42") {
                        return IngestError::PermanentStore(err.to_string());
                    }
                }
                IngestError::TransientStore(err.to_string())
            }
            sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
                IngestError::PermanentStore(err.to_string())
            }
            _ => IngestError::TransientStore(err.to_string()),
        }
    }
}
