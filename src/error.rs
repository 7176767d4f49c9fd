//! Host-side error types
//!
//! Guests only ever see [`Errno`](crate::errno::Errno). These errors are for
//! the embedder: building an instance and linking its imports.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring an instance
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("preopen {host}: {source}")]
    Preopen {
        host: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("preopen {0} is not a directory")]
    PreopenNotDirectory(PathBuf),

    #[error("preopen guest name must not be empty")]
    EmptyPreopenName,

    #[error("{what} contains a NUL byte: {value:?}")]
    NulByte { what: &'static str, value: String },

    #[error("environment key {0:?} contains '='")]
    EnvKey(String),

    #[error("handle limit {0} leaves no room for stdio and preopens")]
    HandleLimit(usize),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("reading manifest {path}: {source}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while resolving a guest import
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("unknown import module {0:?}")]
    UnknownModule(String),

    #[error("unknown function {module}::{name}")]
    UnknownFunction { module: String, name: String },

    #[error("{name} has signature {expected}, guest imports it as {found}")]
    SignatureMismatch {
        name: &'static str,
        expected: String,
        found: String,
    },
}
