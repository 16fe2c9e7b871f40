use replica_store::StoreError;

/// Errors surfaced to the application.
///
/// Only construction can fail. Once the replica is running every storage and
/// feed problem is logged and absorbed.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("replica is not running")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
