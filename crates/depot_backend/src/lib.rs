//! Persistent collaborators for `depot_core`.
//!
//! * [`PostgresMetadataPool`] keeps upload session records in Postgres.
//! * [`ObjectStagingBackend`] stages chunk bytes in any `depot_objectstore` store.
//! * [`ObjectBlobStore`] writes assembled blobs to an object store and indexes them by filename
//!   in Postgres.
//!
//! [`BackendConfig`] wires them (or the in-memory equivalents) into a
//! [`depot_core::SessionManager`].
mod blobs;
mod config;
mod errors;
mod metadata;
mod sessions;
mod staging;

pub use blobs::ObjectBlobStore;
pub use config::{BackendConfig, PostgresBackendConfig};
pub use errors::{Error, Result};
pub use metadata::{PostgresConfig, PostgresMetadataPool};
pub use staging::ObjectStagingBackend;
