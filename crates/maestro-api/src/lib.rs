//! # maestro-api
//!
//! The HTTP REST surface of the Maestro orchestrator.
//!
//! The API is a thin shell over the core crates: it validates requests,
//! registers tasks and translates internal errors into the wire error
//! body. All long-running work happens in the engine; handlers only ever
//! enqueue and read.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{router, AppState};
