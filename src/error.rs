use std::path::PathBuf;

use crate::manifest::ManifestError;
use crate::pipe::StreamError;

/// The primary error type for all operations in the `tinybundle` crate.
#[derive(Debug)]
pub enum BundleError {
    /// Resource content could not be read while it was being added.
    Ingestion { name: String, source: std::io::Error },

    /// The input is not a valid container, or header derivation failed.
    Analysis(String),

    /// The artifact could not be serialized.
    Build(String),

    /// A fault on the producer/consumer pipe.
    Stream(StreamError),

    /// An I/O error on a path outside the artifact itself (staging files, directory walks).
    Io { source: std::io::Error, path: PathBuf },

    /// An error from the `zip` crate while reading or writing a container.
    Zip(zip::result::ZipError),

    /// A manifest could not be parsed.
    Manifest(ManifestError),

    /// Invalid configuration values.
    Config(String),

    /// A wrapper for any other error that doesn't fit the specific variants.
    Other(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, BundleError>;

impl std::fmt::Display for BundleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleError::Ingestion { name, source } => write!(f, "Could not read content of resource '{}': {}", name, source),
            BundleError::Analysis(msg) => write!(f, "Analysis failed: {}", msg),
            BundleError::Build(msg) => write!(f, "Build failed: {}", msg),
            BundleError::Stream(e) => write!(f, "Stream error: {}", e),
            BundleError::Io { source, path } => write!(f, "I/O error on path '{}': {}", path.display(), source),
            BundleError::Zip(e) => write!(f, "Container error: {}", e),
            BundleError::Manifest(e) => write!(f, "Manifest error: {}", e),
            BundleError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BundleError::Other(e) => write!(f, "An unexpected error occurred: {}", e),
        }
    }
}

impl std::error::Error for BundleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BundleError::Ingestion { source, .. } => Some(source),
            BundleError::Stream(e) => Some(e),
            BundleError::Io { source, .. } => Some(source),
            BundleError::Zip(e) => Some(e),
            BundleError::Manifest(e) => Some(e),
            BundleError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<zip::result::ZipError> for BundleError {
    fn from(err: zip::result::ZipError) -> Self {
        BundleError::Zip(err)
    }
}

impl From<ManifestError> for BundleError {
    fn from(err: ManifestError) -> Self {
        BundleError::Manifest(err)
    }
}

impl From<StreamError> for BundleError {
    fn from(err: StreamError) -> Self {
        BundleError::Stream(err)
    }
}

impl From<serde_json::Error> for BundleError {
    fn from(err: serde_json::Error) -> Self {
        BundleError::Config(err.to_string())
    }
}

impl From<std::io::Error> for BundleError {
    fn from(err: std::io::Error) -> Self {
        BundleError::Io { source: err, path: PathBuf::new() } // Generic path
    }
}
