//! Testing utilities for Cantata.
//!
//! - [`mock_upstream`]: a wiremock-backed upstream Composer repository
//! - [`fixtures`]: version entries, root documents and configurations

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod fixtures;
pub mod mock_upstream;

pub use fixtures::Fixtures;
pub use mock_upstream::MockUpstream;
