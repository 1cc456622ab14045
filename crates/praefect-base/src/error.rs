/// Error is the taxonomy described in spec.md §7. Each variant maps to
/// exactly one client-visible gRPC status code; callers match on the
/// kind rather than inspecting message text.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Surfaced to a back-end voter so it can abort its local write.
    /// This is deliberately distinct from a generic RPC failure: a
    /// back-end must treat it as "abort, don't retry the vote."
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Error::Internal(err.to_string())
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            Error::NotFound(msg) => tonic::Status::not_found(msg),
            Error::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            Error::Unavailable(msg) => tonic::Status::unavailable(msg),
            Error::TransactionFailed(msg) => tonic::Status::aborted(msg),
            Error::Internal(msg) => tonic::Status::internal(msg),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Internal(format!("store error: {err}"))
    }
}
