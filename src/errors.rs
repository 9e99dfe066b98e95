//! Error types for the sink.
//!
//! Store adapters report failures as [`anyhow::Error`]; the write protocol
//! tags them with the phase that failed and the keys involved so callers
//! can tell a failed write apart from a committed one with leftover
//! temporary data.

use thiserror::Error;

/// Failure while building a [`crate::config::SinkConfig`] or loading a
/// configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML or a field has the wrong type.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A required sink option is missing or empty.
    #[error("invalid sink options: {0}")]
    Invalid(String),
}

/// Outcome of a failed write, one variant per protocol phase.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The store rejected or dropped the upload of the temporary object.
    /// Whether anything exists at `temp_key` is unknown.
    #[error("upload of temporary object {temp_key} failed")]
    Upload {
        temp_key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The temporary object was uploaded but could not be copied to its
    /// content-addressed key. The temporary object is left in place.
    #[error("copy of {temp_key} to {final_key} failed")]
    Copy {
        temp_key: String,
        final_key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The object is stored at `final_key` but the temporary duplicate at
    /// `temp_key` could not be deleted.
    #[error("stored {final_key} but failed to delete temporary object {temp_key}")]
    Cleanup {
        temp_key: String,
        final_key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The write task was torn down before it resolved (runtime shutdown).
    #[error("write task did not complete: {0}")]
    Interrupted(String),
}

impl SinkError {
    /// Return the content-addressed key if the object was durably stored
    /// despite this error.
    ///
    /// Only a [`SinkError::Cleanup`] carries a committed key: the copy
    /// succeeded, so the final object is complete and readable. Callers
    /// deciding whether to retry should treat this as success.
    pub fn committed_key(&self) -> Option<&str> {
        match self {
            SinkError::Cleanup { final_key, .. } => Some(final_key),
            _ => None,
        }
    }

    /// Return the temporary key involved in the failure, if any.
    pub fn temp_key(&self) -> Option<&str> {
        match self {
            SinkError::Upload { temp_key, .. }
            | SinkError::Copy { temp_key, .. }
            | SinkError::Cleanup { temp_key, .. } => Some(temp_key),
            SinkError::Interrupted(_) => None,
        }
    }
}
