//! Error types shared across the crate
//!
//! - [`TreeError`]: validation and transaction errors raised by the tree store
//! - [`MultiError`]: aggregate of every error produced by a best-effort fan-out
//!
//! Structural diff errors live in [`crate::diff::DiffError`].

use std::fmt;

use thiserror::Error;

use crate::diff::DiffError;

/// Boxed error returned by reaction operations and collected by [`MultiError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Kind of tree entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    App,
    Channel,
    Type,
    Alias,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::App => "dApp",
            EntityKind::Channel => "channel",
            EntityKind::Type => "type",
            EntityKind::Alias => "alias",
        })
    }
}

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("no transaction in progress")]
    NoTransaction,

    #[error("a transaction is already in progress")]
    TransactionInProgress,

    #[error("{kind} '{name}' not found in scope '{scope}'")]
    NotFound {
        kind: EntityKind,
        scope: String,
        name: String,
    },

    #[error("{kind} '{name}' already exists in scope '{scope}'")]
    AlreadyExists {
        kind: EntityKind,
        scope: String,
        name: String,
    },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("invalid scope '{0}'")]
    InvalidScope(String),

    #[error("invalid dApp: {0}")]
    InvalidApp(String),

    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("invalid type: {0}")]
    InvalidType(String),

    #[error("invalid alias: {0}")]
    InvalidAlias(String),

    #[error("invalid boundary: {0}")]
    InvalidBoundary(String),

    #[error("{kind} '{name}' is in use: {reason}")]
    InUse {
        kind: EntityKind,
        name: String,
        reason: String,
    },

    #[error("revision {0} is not in the history")]
    UnknownRevision(u64),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Multiple(#[from] MultiError),

    #[error(transparent)]
    Diff(#[from] DiffError),
}

impl TreeError {
    pub(crate) fn not_found(kind: EntityKind, scope: &str, name: &str) -> Self {
        TreeError::NotFound {
            kind,
            scope: String::from(scope),
            name: String::from(name),
        }
    }

    pub(crate) fn already_exists(kind: EntityKind, scope: &str, name: &str) -> Self {
        TreeError::AlreadyExists {
            kind,
            scope: String::from(scope),
            name: String::from(name),
        }
    }
}

/// Zero or more errors collected without stopping early.
///
/// An empty `MultiError` is not a failure; use [`MultiError::into_result`] to
/// turn it into `Ok(())`.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<BoxError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one error. Nested `MultiError`s are flattened by [`MultiError::merge`].
    pub fn add<E>(&mut self, err: E)
    where
        E: Into<BoxError>,
    {
        self.errors.push(err.into());
    }

    /// Record the error side of `result`, if any
    pub fn add_result<E>(&mut self, result: Result<(), E>)
    where
        E: Into<BoxError>,
    {
        if let Err(err) = result {
            self.add(err);
        }
    }

    /// Move every error of `other` into `self`
    pub fn merge(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn std::error::Error + Send + Sync + 'static)> {
        self.errors.iter().map(|e| e.as_ref())
    }

    /// `Ok(())` when empty, `Err(self)` otherwise
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

impl FromIterator<BoxError> for MultiError {
    fn from_iter<I: IntoIterator<Item = BoxError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_multi_error_is_ok() {
        let errs = MultiError::new();
        assert!(errs.is_empty());
        assert_eq!(errs.to_string(), "");
        assert!(errs.into_result().is_ok());
    }

    #[test]
    fn test_multi_error_joins_messages() {
        let mut errs = MultiError::new();
        errs.add("err1");
        errs.add(TreeError::NoTransaction);
        assert_eq!(errs.len(), 2);
        assert_eq!(errs.to_string(), "err1; no transaction in progress");
        assert!(errs.into_result().is_err());
    }

    #[test]
    fn test_add_result_skips_ok() {
        let mut errs = MultiError::new();
        errs.add_result::<TreeError>(Ok(()));
        errs.add_result(Err(TreeError::NoTransaction));
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn test_merge_flattens() {
        let mut a = MultiError::new();
        a.add("a");
        let mut b = MultiError::new();
        b.add("b");
        b.add("c");
        a.merge(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.iter().map(|e| e.to_string()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tree_error_messages() {
        let err = TreeError::not_found(EntityKind::Channel, "a.b", "ch");
        assert_eq!(err.to_string(), "channel 'ch' not found in scope 'a.b'");
        let err = TreeError::already_exists(EntityKind::App, "", "a");
        assert_eq!(err.to_string(), "dApp 'a' already exists in scope ''");
    }
}
