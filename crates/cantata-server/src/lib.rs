//! HTTP server for the Cantata Composer mirror.
//!
//! Serves a local package catalog under the root paths and every configured
//! mirror under `/mirror/{alias}`, in both the v1 (provider) and v2
//! (metadata-url) Composer repository formats.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
