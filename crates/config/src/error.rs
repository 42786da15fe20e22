//! Configuration error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Document is not valid KDL
    #[error("Invalid KDL document: {0}")]
    Syntax(#[from] kdl::KdlError),

    /// A required node or value is missing
    #[error("Missing '{field}' in {context}")]
    Missing { context: String, field: String },

    /// A value has the wrong type or range
    #[error("Invalid value for '{field}' in {context}: {message}")]
    InvalidValue {
        context: String,
        field: String,
        message: String,
    },

    /// A node is not recognised
    #[error("Unknown node '{node}' in {context}")]
    UnknownNode { context: String, node: String },

    /// Two entries share a name that must be unique
    #[error("Duplicate {kind} '{name}' in domain '{domain}'")]
    Duplicate {
        domain: String,
        kind: &'static str,
        name: String,
    },

    /// Structural rule violated
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Field-level validation failed
    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl ConfigError {
    /// Short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Syntax(_) => "config_syntax",
            ConfigError::Missing { .. } => "config_missing",
            ConfigError::InvalidValue { .. } => "config_invalid_value",
            ConfigError::UnknownNode { .. } => "config_unknown_node",
            ConfigError::Duplicate { .. } => "config_duplicate",
            ConfigError::Invalid(_) => "config_invalid",
            ConfigError::Validation(_) => "config_validation",
        }
    }

    pub(crate) fn missing(context: impl Into<String>, field: impl Into<String>) -> Self {
        ConfigError::Missing {
            context: context.into(),
            field: field.into(),
        }
    }

    pub(crate) fn invalid_value(
        context: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            context: context.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}
