//! Disposable containers for integration tests.

mod error;

pub mod postgres;

pub use error::{Result, TestInfraError};
