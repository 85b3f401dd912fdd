//! Deployment package assembly.
//!
//! A deployment package is a ZIP whose manifest names the package and carries one
//! `Name:` section per bundle and per resource. Entries follow a fixed order so
//! that a streaming installer can process them front to back:
//! manifest, META-INF resources, localization files, bundles, then resources.

use tracing::{debug, info};

use crate::analyzer::{is_directive, sanitize_symbolic_name, BUNDLE_SYMBOLICNAME, BUNDLE_VERSION};
use crate::cache::StreamCache;
use crate::error::{BundleError, Result};
use crate::manifest::{Headers, Manifest};
use crate::writer::{ArchivePlan, ArchiveWriter, ArtifactStream};

pub const DEPLOYMENTPACKAGE_SYMBOLICNAME: &str = "DeploymentPackage-SymbolicName";
pub const DEPLOYMENTPACKAGE_VERSION: &str = "DeploymentPackage-Version";
pub const RESOURCE_PROCESSOR: &str = "Resource-Processor";
const DEFAULT_PACKAGE_VERSION: &str = "0.0.0";

pub struct DeploymentPackage<'a, C: StreamCache + ?Sized> {
    cache: &'a C,
    headers: Headers,
}

impl<'a, C: StreamCache + ?Sized> DeploymentPackage<'a, C> {
    pub fn new(cache: &'a C, headers: Headers) -> Self {
        Self { cache, headers }
    }

    /// Builds the package manifest. `default_name` is used when no symbolic name was given.
    pub fn manifest(&self, default_name: &str) -> Manifest {
        let mut manifest = Manifest::new();
        for (key, value) in &self.headers {
            if !is_directive(key) {
                manifest.insert(key.clone(), value.clone());
            }
        }

        let name = match manifest.get(DEPLOYMENTPACKAGE_SYMBOLICNAME) {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => default_name.to_string(),
        };
        manifest.insert(DEPLOYMENTPACKAGE_SYMBOLICNAME, sanitize_symbolic_name(&name));
        if manifest.get(DEPLOYMENTPACKAGE_VERSION).map_or(true, |v| v.trim().is_empty()) {
            manifest.insert(DEPLOYMENTPACKAGE_VERSION, DEFAULT_PACKAGE_VERSION);
        }

        for bundle in self.cache.bundles() {
            let cached = self.cache.headers(&bundle);
            let mut section = Headers::new();
            if let Some(bsn) = cached.get(BUNDLE_SYMBOLICNAME) {
                // drop directives such as ";singleton:=true"
                let bare = bsn.split(';').next().unwrap_or_default().trim();
                section.insert(BUNDLE_SYMBOLICNAME.to_string(), bare.to_string());
            }
            if let Some(version) = cached.get(BUNDLE_VERSION) {
                section.insert(BUNDLE_VERSION.to_string(), version.trim().to_string());
            }
            manifest.set_section(bundle, section);
        }

        for resource in self.cache.other_resources() {
            manifest.set_section(resource, Headers::new());
        }
        for resource in self.cache.processor_resources() {
            let mut section = Headers::new();
            if let Some(pid) = self.cache.processor_of(&resource) {
                section.insert(RESOURCE_PROCESSOR.to_string(), pid);
            }
            manifest.set_section(resource, section);
        }
        manifest
    }

    /// Manifest plus every cached entry in deployment order.
    pub fn plan(&self, default_name: &str) -> Result<ArchivePlan> {
        let mut plan = ArchivePlan::new(self.manifest(default_name));
        let groups = [
            self.cache.meta_inf_resources(),
            self.cache.localization_files(),
            self.cache.bundles(),
            self.cache.other_resources(),
            self.cache.processor_resources(),
        ];
        for name in groups.into_iter().flatten() {
            let source = self
                .cache
                .source(&name)
                .ok_or_else(|| BundleError::Build(format!("cached resource '{}' disappeared", name)))?;
            plan.push(name, source);
        }
        debug!(entries = plan.entries.len(), "deployment package planned");
        Ok(plan)
    }

    pub fn write(&self, writer: &ArchiveWriter, default_name: &str) -> Result<ArtifactStream> {
        let plan = self.plan(default_name)?;
        info!(
            name = plan.manifest.get(DEPLOYMENTPACKAGE_SYMBOLICNAME).unwrap_or_default(),
            entries = plan.entries.len(),
            mode = ?writer.mode(),
            "writing deployment package"
        );
        writer.write(plan)
    }
}
