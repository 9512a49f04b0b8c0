//! gRPC service implementation, request validation and call lifecycle.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`LogService`).
//! - [`validate`] - request checks producing multi-field violation reports.
//! - [`lifecycle`] - call admission and graceful shutdown.

pub mod handler;
pub mod lifecycle;
pub mod validate;
