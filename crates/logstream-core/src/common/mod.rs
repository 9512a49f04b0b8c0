//! Protocol bindings, domain types, and the error taxonomy shared by the
//! logstream server and its clients.
//!
//! - [`proto`] - Generated Protobuf messages and the `LogsService` stubs.
//! - [`types`] - Domain types that the validator, repository, and streaming
//!   layers exchange.
//! - [`error`] - The [`Error`] enum and its mapping onto [`tonic::Status`].

pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from
/// `proto/logstream.proto`.
///
/// ## Service
///
/// - `SaveLog` / `SaveLogStream` / `SaveLogs` - write path.
/// - `ListLog` / `ListLogStream` - lookup by id.
/// - `ListLogs` / `ListLogsStream` - filtered range queries.
pub mod proto {
    tonic::include_proto!("logstream");

    /// Encoded `FileDescriptorSet` used to register gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("logstream_descriptor");
}
