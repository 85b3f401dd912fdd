//! # Header Analyzer
//!
//! Turns a container plus caller instructions into the final bundle manifest.
//!
//! Precedence, lowest to highest:
//!
//! 1. headers already present in the container's own manifest,
//! 2. headers derived by the [`DerivationEngine`] (and its plugins),
//! 3. explicit instructions.
//!
//! Afterwards `Bundle-SymbolicName` is defaulted if missing and always sanitized.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, trace};

use crate::error::{BundleError, Result};
use crate::jar::Jar;
use crate::manifest::{Headers, Manifest, DEFAULT_MANIFEST_VERSION, MANIFEST_VERSION};

pub const BUNDLE_SYMBOLICNAME: &str = "Bundle-SymbolicName";
pub const BUNDLE_MANIFESTVERSION: &str = "Bundle-ManifestVersion";
pub const BUNDLE_VERSION: &str = "Bundle-Version";
pub const EXPORT_PACKAGE: &str = "Export-Package";
pub const PRIVATE_PACKAGE: &str = "Private-Package";
/// Directive: comma separated header names to drop from the final manifest.
pub const REMOVE_HEADERS: &str = "-removeheaders";

/// Extension hook run by the engine after its own derivation and before explicit
/// instructions are applied.
pub trait AnalyzerPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, jar: &Jar, headers: &mut Headers) -> Result<()>;
}

/// Computes a full header set from a container and the caller's instructions.
pub trait DerivationEngine: Send + Sync {
    fn derive_headers(&self, jar: &Jar, instructions: &Headers, plugins: &[Arc<dyn AnalyzerPlugin>]) -> Result<Headers>;
}

/// Instruction keys starting with `-` steer the engine and never become headers.
pub fn is_directive(key: &str) -> bool {
    key.starts_with('-')
}

/// Replaces every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_symbolic_name(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let re = INVALID.get_or_init(|| Regex::new(r"[^a-zA-Z_0-9.\-]").expect("static pattern"));
    re.replace_all(name, "_").into_owned()
}

/// Default engine. Derives only what entry names reveal; no bytecode scanning.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicEngine;

impl BasicEngine {
    /// Dotted names of directories that hold `.class` entries, sorted.
    fn class_packages(jar: &Jar) -> BTreeSet<String> {
        jar.entry_names()
            .filter(|n| n.ends_with(".class"))
            .filter_map(|n| n.rsplit_once('/').map(|(dir, _)| dir))
            .filter(|dir| !dir.is_empty() && !dir.starts_with("META-INF"))
            .map(|dir| dir.replace('/', "."))
            .collect()
    }
}

impl DerivationEngine for BasicEngine {
    fn derive_headers(&self, jar: &Jar, instructions: &Headers, plugins: &[Arc<dyn AnalyzerPlugin>]) -> Result<Headers> {
        let mut headers = Headers::new();
        headers.insert(BUNDLE_MANIFESTVERSION.to_string(), "2".to_string());

        if !instructions.contains_key(EXPORT_PACKAGE) && !instructions.contains_key(PRIVATE_PACKAGE) {
            let packages = Self::class_packages(jar);
            if !packages.is_empty() {
                headers.insert(PRIVATE_PACKAGE.to_string(), packages.into_iter().collect::<Vec<_>>().join(","));
            }
        }

        for plugin in plugins {
            trace!(plugin = plugin.name(), "applying analyzer plugin");
            plugin
                .apply(jar, &mut headers)
                .map_err(|e| BundleError::Analysis(format!("plugin '{}' failed: {}", plugin.name(), e)))?;
        }

        for (key, value) in instructions {
            if !is_directive(key) {
                headers.insert(key.clone(), value.clone());
            }
        }
        Ok(headers)
    }
}

pub struct Analyzer {
    engine: Box<dyn DerivationEngine>,
    plugins: Vec<Arc<dyn AnalyzerPlugin>>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(Box::new(BasicEngine), Vec::new())
    }
}

impl Analyzer {
    pub fn new(engine: Box<dyn DerivationEngine>, plugins: Vec<Arc<dyn AnalyzerPlugin>>) -> Self {
        Self { engine, plugins }
    }

    pub fn plugins(&self) -> &[Arc<dyn AnalyzerPlugin>] {
        &self.plugins
    }

    /// Parses `content` as a ZIP container, then computes its manifest.
    pub fn compute_manifest(&self, content: &[u8], instructions: &Headers, default_name: &str) -> Result<(Manifest, Jar)> {
        let jar = Jar::from_zip_bytes(content)?;
        self.compute_for_jar(jar, instructions, default_name)
    }

    /// Computes the manifest for an already loaded container. The returned jar carries it.
    pub fn compute_for_jar(&self, mut jar: Jar, instructions: &Headers, default_name: &str) -> Result<(Manifest, Jar)> {
        let derived = self.engine.derive_headers(&jar, instructions, &self.plugins).map_err(|e| match e {
            BundleError::Analysis(_) => e,
            other => BundleError::Analysis(other.to_string()),
        })?;

        let mut manifest = jar.take_manifest().unwrap_or_default();
        for (key, value) in derived {
            if !is_directive(&key) {
                manifest.insert(key, value);
            }
        }

        if let Some(list) = instructions.get(REMOVE_HEADERS) {
            for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                manifest.remove(name);
            }
        }

        // blankness is judged trimmed, but the name is sanitized as given
        let symbolic_name = match manifest.get(BUNDLE_SYMBOLICNAME) {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => default_name.to_string(),
        };
        manifest.insert(BUNDLE_SYMBOLICNAME, sanitize_symbolic_name(&symbolic_name));
        if manifest.get(MANIFEST_VERSION).is_none() {
            manifest.insert(MANIFEST_VERSION, DEFAULT_MANIFEST_VERSION);
        }

        debug!(
            symbolic_name = manifest.get(BUNDLE_SYMBOLICNAME).unwrap_or_default(),
            headers = manifest.main_attributes().len(),
            entries = jar.len(),
            "manifest computed"
        );
        jar.set_manifest(manifest.clone());
        Ok((manifest, jar))
    }
}
