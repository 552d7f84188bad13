//! Operation identifiers.

use std::fmt;

use crate::error::{Error, Result};

/// An opaque, non-empty identifier for an operation, unique within a
/// pipeline. Two ids are equal iff byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(String);

impl OperationId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidId);
        }
        Ok(Self(id))
    }

    /// Build the deterministic id the resolver uses for a synthesized
    /// `create_directory` that establishes a missing `parent_dir`
    /// prerequisite.
    pub fn synth_mkdir(parent: impl AsRef<std::path::Path>) -> Self {
        Self(format!("synth:mkdir:{}", parent.as_ref().display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OperationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
