use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("invalid action '{0}'")]
    UnknownAction(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TrackError {
    /// Whether the failure is the client's fault (no state was touched)
    pub fn is_client_error(&self) -> bool {
        matches!(self, TrackError::UnknownAction(_))
    }
}

impl From<StorageError> for TrackError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => {
                TrackError::Storage(anyhow::anyhow!("unresolved visitor-day conflict"))
            }
            StorageError::Other(err) => TrackError::Storage(err),
        }
    }
}

pub type TrackResult<T> = Result<T, TrackError>;
