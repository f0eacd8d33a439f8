//! The `utils` module provides shared definitions used across `netsub`:
//! the error types and the tracing/logging setup.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests;
