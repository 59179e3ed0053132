//! # Error Types
//!
//! Structured error handling for the extraction pipeline using thiserror
//! instead of `Box<dyn Error>` patterns.
//!
//! Errors fall into two groups: failures that propagate as `Err` (database
//! access, checkpoint corruption, configuration) and failures that are
//! recorded as data in batch/page results once processing has begun. Only
//! the former appear here; the latter travel as plain strings inside
//! [`crate::models::BatchOutcome::errors`].

use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("download failed: {url}: {message}")]
    Download { url: String, message: String },

    #[error("conversion failed: {path}: {message}")]
    Conversion { path: String, message: String },

    #[error("object storage error: {destination}: {message}")]
    Storage { destination: String, message: String },

    #[error("checkpoint error: {path}: {message}")]
    Checkpoint { path: String, message: String },

    #[error("configuration error: {field}: {message}")]
    Configuration { field: String, message: String },

    #[error("dispatch error: {message}")]
    Dispatch { message: String },

    #[error("io error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl EtlError {
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn conversion(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn storage(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            destination: destination.into(),
            message: message.into(),
        }
    }

    pub fn checkpoint(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Checkpoint {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            operation: "query".to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
