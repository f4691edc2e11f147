//! Storage backends for short URL records.
//!
//! Three interchangeable implementations of the repository contract:
//! an in-memory index, an append-only JSON-lines file, and PostgreSQL.

mod error;
mod index;

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileRepository;
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use snipurl_core::repository::{BatchOutcome, ReadRepository, Repository, UrlRecord};
pub use snipurl_core::StorageError;
