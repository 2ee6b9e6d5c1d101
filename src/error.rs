use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("node already registered: {0}")]
    AlreadyRegistered(String),

    #[error("node not registered: {0}")]
    NotRegistered(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task {task_id} is not assigned to node {node_id}")]
    TaskNotAssigned { task_id: String, node_id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DispatcherError>;

impl From<DispatcherError> for tonic::Status {
    fn from(err: DispatcherError) -> Self {
        let message = err.to_string();
        match err {
            DispatcherError::AlreadyRegistered(_) => tonic::Status::already_exists(message),
            DispatcherError::NotRegistered(_) | DispatcherError::TaskNotFound(_) => {
                tonic::Status::not_found(message)
            }
            DispatcherError::TaskNotAssigned { .. } => tonic::Status::permission_denied(message),
            DispatcherError::InvalidArgument(_) => tonic::Status::invalid_argument(message),
            DispatcherError::ShuttingDown | DispatcherError::Store(StoreError::Unavailable(_)) => {
                tonic::Status::unavailable(message)
            }
            DispatcherError::Store(_) | DispatcherError::Internal(_) => {
                tonic::Status::internal(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn structured_errors_map_to_codes() {
        let status: tonic::Status = DispatcherError::AlreadyRegistered("a".into()).into();
        assert_eq!(status.code(), Code::AlreadyExists);

        let status: tonic::Status = DispatcherError::NotRegistered("a".into()).into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("not registered"));

        let status: tonic::Status = DispatcherError::TaskNotAssigned {
            task_id: "t1".into(),
            node_id: "a".into(),
        }
        .into();
        assert_eq!(status.code(), Code::PermissionDenied);

        let status: tonic::Status = DispatcherError::ShuttingDown.into();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[test]
    fn store_failures_are_opaque() {
        let status: tonic::Status =
            DispatcherError::Store(StoreError::Other("disk full".into())).into();
        assert_eq!(status.code(), Code::Internal);

        // A NotFound leaking out of the store is still an internal failure
        let status: tonic::Status =
            DispatcherError::Store(StoreError::NotFound("a".into())).into();
        assert_eq!(status.code(), Code::Internal);

        let status: tonic::Status =
            DispatcherError::Store(StoreError::Unavailable("no quorum".into())).into();
        assert_eq!(status.code(), Code::Unavailable);
    }
}
