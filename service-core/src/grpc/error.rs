//! Conversion of service errors into `tonic::Status`.
//!
//! Each service implements [`IntoStatus`] for its domain error. The
//! infrastructure [`AppError`] maps as follows:
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `NotFound` | `NOT_FOUND` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `DatabaseError` | `UNAVAILABLE` |
//! | `ConfigError`, `InternalError` | `INTERNAL` |

use tonic::Status;

use crate::error::AppError;

pub trait IntoStatus {
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        match self {
            AppError::NotFound(err) => Status::not_found(err.to_string()),
            AppError::Conflict(err) => Status::already_exists(err.to_string()),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::unavailable("Database unavailable")
            }
            AppError::ConfigError(err) | AppError::InternalError(err) => {
                // Details stay in the logs
                tracing::error!(error = %err, "Internal error");
                Status::internal("Internal server error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn not_found_keeps_its_message() {
        let status: Status = AppError::NotFound(anyhow::anyhow!("Account 42 not found")).into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("Account 42 not found"));
    }

    #[test]
    fn database_details_are_hidden() {
        let err = AppError::DatabaseError(anyhow::anyhow!("password authentication failed"));
        let status: Status = err.into();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), "Database unavailable");
    }
}
