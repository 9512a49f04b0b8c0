//! Error types for the log storage service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the validator, the repository and the streaming layer can report. It
//! implements `From<Error>` for `tonic::Status` so that handlers can propagate
//! failures with `?` and the client receives the matching status code.
//!
//! ## Error Cases
//! - `InvalidArgument`: The request failed validation; carries one entry per
//!   violated rule and is surfaced with `google.rpc.BadRequest` details.
//! - `NotFound`: The requested record does not exist.
//! - `InvalidLevel`, `EmptyBatch`, `PartialInsert`: Write-path domain faults.
//! - `Internal`: A storage or driver fault, wrapping its cause.
//! - `TransactionRollback`: Work inside a transaction failed and the rollback
//!   failed too; both causes are kept.
//! - `Transport`: Reading the inbound half of a stream failed.
//! - `ChannelError`: Writing to the outbound half of a stream failed.
//! - `RequestCancelled`: The peer or the server withdrew the call.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.

use crate::types::ViolationReport;
use std::sync::Arc;
use tonic::{Code, Status};
use tonic_types::{ErrorDetails, StatusExt};

pub type Result<T> = core::result::Result<T, Error>;

/// Shareable boxed cause. `Arc` keeps [`Error`] cheap to clone across the
/// producer and consumer halves of a stream.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Unified error type for the log storage service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The request violated one or more validation rules.
    #[error("Invalid argument: {0}")]
    InvalidArgument(ViolationReport),

    /// The requested record does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// A record carried a level outside `INFO`, `WARN`, `ERROR`.
    #[error("Invalid log level {level}: should be 0 (INFO), 1 (WARN), 2 (ERROR)")]
    InvalidLevel { level: i32 },

    /// A batch insert was called with no records.
    #[error("No logs to add")]
    EmptyBatch,

    /// A batch insert returned fewer (or more) ids than records submitted.
    #[error("Inserted {inserted} logs, expected {expected}")]
    PartialInsert { expected: usize, inserted: usize },

    /// Storage or driver failure.
    #[error("{context}: {source}")]
    Internal {
        context: String,
        #[source]
        source: Cause,
    },

    /// Transactional work failed and rolling back failed as well.
    #[error("Failed to rollback transaction: {source} (rolling back after: {cause})")]
    TransactionRollback {
        cause: Box<Error>,
        #[source]
        source: Cause,
    },

    /// The inbound half of a stream yielded an error.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// The outbound half of a stream could not accept a message.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The call was cancelled by the client or by server shutdown.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Wraps a driver or infrastructure fault with a short description of the
    /// operation that failed.
    pub fn internal<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// The gRPC code this error is reported with.
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NotFound { .. } => Code::NotFound,
            Self::InvalidLevel { .. } | Self::EmptyBatch | Self::PartialInsert { .. } => {
                Code::Aborted
            }
            Self::Internal { .. }
            | Self::TransactionRollback { .. }
            | Self::Transport { .. }
            | Self::ChannelError { .. } => Code::Internal,
            Self::RequestCancelled => Code::Cancelled,
            Self::ServiceShutdown => Code::Unavailable,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument(report) => {
                let mut details = ErrorDetails::new();
                for v in report.iter() {
                    details.add_bad_request_violation(v.field.clone(), v.description.clone());
                }
                Status::with_error_details(Code::InvalidArgument, report.to_string(), details)
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_cause(msg: &str) -> std::io::Error {
        std::io::Error::other(msg.to_string())
    }

    #[test]
    fn violations_become_bad_request_details() {
        let mut report = ViolationReport::new();
        report.push("log.source", "empty");
        report.push("log.timestamp", "empty");

        let status = Status::from(Error::InvalidArgument(report));
        assert_eq!(status.code(), Code::InvalidArgument);

        let details = status.get_error_details();
        let bad_request = details.bad_request().expect("missing BadRequest details");
        let fields: Vec<_> = bad_request
            .field_violations
            .iter()
            .map(|v| v.field.as_str())
            .collect();
        assert_eq!(fields, ["log.source", "log.timestamp"]);
        assert_eq!(bad_request.field_violations[0].description, "empty");
    }

    #[test]
    fn domain_faults_map_to_aborted() {
        for err in [
            Error::InvalidLevel { level: 7 },
            Error::EmptyBatch,
            Error::PartialInsert {
                expected: 3,
                inserted: 2,
            },
        ] {
            assert_eq!(Status::from(err).code(), Code::Aborted);
        }
    }

    #[test]
    fn every_kind_has_a_status() {
        assert_eq!(Status::from(Error::not_found("log 4")).code(), Code::NotFound);
        assert_eq!(Status::from(Error::RequestCancelled).code(), Code::Cancelled);
        assert_eq!(Status::from(Error::ServiceShutdown).code(), Code::Unavailable);
        assert_eq!(
            Status::from(Error::Transport {
                context: "reset".into()
            })
            .code(),
            Code::Internal
        );
        assert_eq!(
            Status::from(Error::ChannelError {
                context: "closed".into()
            })
            .code(),
            Code::Internal
        );
    }

    #[test]
    fn internal_keeps_cause_message() {
        let err = Error::internal("failed to get log", io_cause("connection reset"));
        let status = Status::from(err);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "failed to get log: connection reset");
    }

    #[test]
    fn rollback_failure_keeps_both_causes() {
        let err = Error::TransactionRollback {
            cause: Box::new(Error::PartialInsert {
                expected: 2,
                inserted: 1,
            }),
            source: Arc::new(io_cause("broken pipe")),
        };
        let msg = err.to_string();
        assert!(msg.contains("broken pipe"));
        assert!(msg.contains("Inserted 1 logs, expected 2"));
        assert_eq!(err.code(), Code::Internal);
        assert!(std::error::Error::source(&err).is_some());
    }
}
