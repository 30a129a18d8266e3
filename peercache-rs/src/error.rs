//! Defines the errors reported by [Group::get](crate::group::Group::get).
//!
//! Note that failures of a peer are never reported here, as these are recovered by loading the
//! value locally. Only if the local loader fails as well, the caller will see an error.
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Enumerates the errors which can occur when fetching a value from a group.
///
/// The error is cheap to clone, as a single failed load is reported to every caller which was
/// waiting for the same key.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// An empty key was requested. Such requests never reach the cache or the loader.
    EmptyKey,

    /// The loader of the group failed to provide a value for the requested key.
    LoadError(Arc<anyhow::Error>),
}

impl CacheError {
    /// Determines if the error was caused by the caller rather than by the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(self, CacheError::EmptyKey)
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        CacheError::LoadError(Arc::new(error))
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CacheError::EmptyKey => write!(f, "key is empty"),
            CacheError::LoadError(error) => write!(f, "Failed to load value: {:#}", error),
        }
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::EmptyKey => None,
            CacheError::LoadError(error) => Some(&***error),
        }
    }
}
