//! Assembly settings.
//!
//! Defaults cover the common case; a JSON file or `TINYBUNDLE_*` environment
//! variables can override individual fields.

use std::path::Path;

use serde::{Deserialize, Serialize};
use zip::CompressionMethod;

use crate::error::{BundleError, Result};

/// How the archive writer hands the artifact back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Stream bytes from a producer thread while the archive is still being written.
    #[default]
    Pipelined,
    /// Write everything to a temporary file first; failures surface before any stream exists.
    Buffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
    /// Smaller archives, but older JAR readers cannot open them.
    Zstd,
}

impl Compression {
    pub fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
            Compression::Zstd => CompressionMethod::Zstd,
        }
    }
}

/// Name prefixes used to sort deployment package resources into categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    pub bundle_prefix: String,
    pub localization_prefix: String,
    pub meta_inf_prefix: String,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            bundle_prefix: "bundles/".to_string(),
            localization_prefix: "OSGI-INF/l10n/".to_string(),
            meta_inf_prefix: "META-INF/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub write_mode: WriteMode,
    pub compression: Compression,
    /// Bytes per chunk sent through the streaming pipe.
    pub pipe_chunk_size: usize,
    /// Chunks that may wait in the pipe before the producer blocks.
    pub pipe_depth: usize,
    /// Cached resources at or above this size are spooled to a temp file.
    pub spool_threshold: usize,
    /// Prefix for generated symbolic names.
    pub identifier_prefix: String,
    pub classification: ClassificationRules,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            compression: Compression::default(),
            pipe_chunk_size: 64 * 1024,
            pipe_depth: 8,
            spool_threshold: 1024 * 1024,
            identifier_prefix: "BuildByTinyBundles".to_string(),
            classification: ClassificationRules::default(),
        }
    }
}

impl AssemblyConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|source| BundleError::Io { source, path: path.to_path_buf() })?;
        let config: AssemblyConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TINYBUNDLE_*` overrides from the process environment.
    pub fn from_env(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup (the environment, in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("TINYBUNDLE_WRITE_MODE") {
            self.write_mode = match mode.trim().to_ascii_lowercase().as_str() {
                "pipelined" => WriteMode::Pipelined,
                "buffered" => WriteMode::Buffered,
                other => return Err(BundleError::Config(format!("unknown write mode '{}'", other))),
            };
        }
        if let Some(kb) = parse_number(&lookup, "TINYBUNDLE_PIPE_CHUNK_KB")? {
            self.pipe_chunk_size = kb * 1024;
        }
        if let Some(depth) = parse_number(&lookup, "TINYBUNDLE_PIPE_DEPTH")? {
            self.pipe_depth = depth;
        }
        if let Some(kb) = parse_number(&lookup, "TINYBUNDLE_SPOOL_THRESHOLD_KB")? {
            self.spool_threshold = kb * 1024;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipe_chunk_size == 0 {
            return Err(BundleError::Config("pipe_chunk_size must be greater than zero".into()));
        }
        if self.pipe_depth == 0 {
            return Err(BundleError::Config("pipe_depth must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_number<F>(lookup: &F, key: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| BundleError::Config(format!("{} must be a non-negative integer, got '{}'", key, raw))),
    }
}
