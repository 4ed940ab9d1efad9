//! File store state
//!
//! This module owns everything that touches the working directory:
//! - The flat content store and its reservation guards (store.rs)
//! - The category catalog backed by SQLite (catalog.rs)
//! - Shared data structures (data.rs)
//! - The background retention sweeper (sweeper.rs)

pub mod catalog;
pub mod data;
pub mod store;
pub mod sweeper;

pub use catalog::Catalog;
pub use data::{Category, StoredFile};
pub use store::{ContentStore, StoreError};
