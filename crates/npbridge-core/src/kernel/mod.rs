//! # npbridge Kernel
//!
//! Process-level pieces that do not belong to a single subsystem:
//!
//! - **Constants**: names and defaults shared by the library and the CLI host
//!   (`constants` submodule).
//! - **Error Handling**: the aggregated [`Error`](error::Error) and its
//!   `Result` alias (`error` submodule).
pub mod constants;
pub mod error;

pub use error::{Error, Result};

#[cfg(test)]
mod tests;
