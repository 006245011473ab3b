//! Blob storage driver for the Depot content server.
//!
//! Storage is an opaque `category + key → bytes` store. Categories are flat
//! namespaces (`contents`, `proofs`, `pointers-scene`, ...); the driver knows
//! nothing about what the bytes mean.
//!
//! Two backends are provided:
//! - [`FileSystemStorage`]: one directory per category under a root folder
//! - [`InMemoryStorage`]: map-backed, for tests

mod backend;
mod error;

pub use backend::{ContentStorage, FileSystemStorage, InMemoryStorage};
pub use error::{Result, StorageError};
