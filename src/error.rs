//! Error types for Stratum
//!
//! All modules use `StratumResult<T>` as their return type.

use crate::sourcemap::SourceLocation;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Stratum operations
pub type StratumResult<T> = Result<T, StratumError>;

/// All errors that can occur in Stratum
#[derive(Error, Debug)]
pub enum StratumError {
    // Validation errors
    #[error("invalid {subject}: {}", .problems.join("; "))]
    Validation {
        subject: String,
        problems: Vec<String>,
    },

    #[error("Invalid platform {0:?}: expected os/arch[/variant]")]
    PlatformInvalid(String),

    // Specification errors
    #[error("Failed to parse spec {path}: {reason}")]
    SpecParse { path: String, reason: String },

    #[error("Patch source {0:?} not found")]
    PatchSourceNotFound(String),

    // Collaborator errors
    #[error("Failed to get source state for {name:?}: {reason}")]
    SourceState { name: String, reason: String },

    #[error("Failed to get patched sources for {flavor} generator: {source}")]
    PatchedSources {
        flavor: String,
        #[source]
        source: Box<StratumError>,
    },

    // Deferred graph errors
    #[error("{message}{}", render_locations(.locations))]
    Deferred {
        message: String,
        locations: Vec<SourceLocation>,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StratumError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an aggregated validation error.
    pub fn validation(subject: impl Into<String>, problems: Vec<String>) -> Self {
        Self::Validation {
            subject: subject.into(),
            problems,
        }
    }

    /// Collect validation problems into one error, or `Ok` when there are none
    pub fn check(subject: impl Into<String>, problems: Vec<String>) -> StratumResult<()> {
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Self::validation(subject, problems))
        }
    }

    /// The individual problems carried by a validation error
    pub fn problems(&self) -> Vec<String> {
        match self {
            Self::Validation { subject, problems } => problems
                .iter()
                .map(|p| format!("{}: {}", subject, p))
                .collect(),
            other => vec![other.to_string()],
        }
    }

    /// Whether this error was detected before any graph construction
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::PlatformInvalid(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Validation { .. } => Some("Fix the listed problems in the spec and run: stratum validate <spec>"),
            Self::PlatformInvalid(_) => Some("Use a platform such as linux/amd64 or linux/arm64/v8"),
            Self::ConfigInvalid { .. } => Some("Fix the file or run: stratum config init --force"),
            _ => None,
        }
    }
}

/// Shared handle to an error captured inside the graph.
pub type SharedError = Arc<StratumError>;

fn render_locations(locations: &[SourceLocation]) -> String {
    if locations.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = locations
        .iter()
        .flat_map(|loc| {
            loc.ranges
                .iter()
                .map(move |r| format!("{}:{}", loc.info.filename, r))
        })
        .collect();
    format!(" (at {})", rendered.join(", "))
}
