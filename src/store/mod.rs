//! Persistence of instance records.
//!
//! The [`StateStore`] trait is the only shared mutable resource the
//! reconciler touches. Implementations must make [`StateStore::update`] an
//! atomic read-modify-write for a single record so that a lease extension
//! written by an operator is never lost to a concurrent reconciliation pass.

mod file;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::instance::{InstanceId, InstanceRecord};

pub use file::FileStore;

/// Errors raised by state stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the requested record does not exist.
    #[error("instance {id} not found")]
    NotFound {
        /// Identifier that was looked up.
        id: InstanceId,
    },
    /// Raised when a write would move a lease end backwards.
    #[error("refusing to move the lease end of {id} backwards")]
    ExpiryRegression {
        /// Identifier of the rejected record.
        id: InstanceId,
    },
    /// Raised when an update tries to change the record's identifier.
    #[error("refusing to change the identifier of {id}")]
    IdChanged {
        /// Identifier of the record being updated.
        id: InstanceId,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when stored content cannot be decoded.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when records cannot be encoded.
    #[error("failed to encode instance records: {0}")]
    Encode(String),
}

/// Keyed persistence of [`InstanceRecord`]s.
pub trait StateStore {
    /// Returns every stored record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn list_all(&self) -> Result<Vec<InstanceRecord>, StoreError>;

    /// Returns the record with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such record exists.
    fn get(&self, id: &InstanceId) -> Result<InstanceRecord, StoreError>;

    /// Inserts or replaces a record keyed by its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ExpiryRegression`] when the record would move an
    /// existing lease end backwards, or an I/O error from the backing storage.
    fn save(&self, record: &InstanceRecord) -> Result<(), StoreError>;

    /// Atomically reads, mutates, and writes back one record.
    ///
    /// Nothing is written when `mutate` fails.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `mutate`, or a [`StoreError`] converted
    /// into `E` when the record is missing, the identifier would change, the
    /// lease end would move backwards, or storage fails.
    fn update<T, E, F>(&self, id: &InstanceId, mutate: F) -> Result<T, E>
    where
        F: FnOnce(&mut InstanceRecord) -> Result<T, E>,
        E: From<StoreError>;

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when no such record exists.
    fn delete(&self, id: &InstanceId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests;
