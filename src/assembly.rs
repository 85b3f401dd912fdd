//! # Assembly pipeline
//!
//! Ties the pieces together: resource store → header analysis → archive writer.
//!
//! ```no_run
//! use tinybundle::{AssemblyConfig, BundleAssembler, ResourceStore};
//! use std::io::Read;
//!
//! # fn main() -> tinybundle::Result<()> {
//! let mut store = ResourceStore::new();
//! store.add_bytes("org/demo/Main.class", vec![0xca, 0xfe, 0xba, 0xbe]);
//! store.set_header("Bundle-SymbolicName", "org.demo");
//!
//! let assembler = BundleAssembler::new(AssemblyConfig::default());
//! let mut artifact = assembler.build(&store)?;
//! let mut jar = Vec::new();
//! artifact.read_to_end(&mut jar)?;
//! artifact.finish()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{info, warn};

use crate::analyzer::{is_directive, Analyzer, AnalyzerPlugin, BasicEngine, DerivationEngine, BUNDLE_SYMBOLICNAME};
use crate::cache::StreamCache;
use crate::config::{AssemblyConfig, WriteMode};
use crate::deployment::DeploymentPackage;
use crate::error::{BundleError, Result};
use crate::ident::{IdentifierSource, SessionCounter};
use crate::jar::Jar;
use crate::manifest::{Headers, Manifest, DEFAULT_MANIFEST_VERSION, MANIFEST_VERSION};
use crate::store::ResourceStore;
use crate::writer::{ArchivePlan, ArchiveWriter, ArtifactStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStrategy {
    /// Headers are written exactly as given; nothing is derived or enforced.
    Raw,
    /// Headers go through the analyzer: derivation, plugins, mandatory symbolic name.
    #[default]
    Analyzed,
}

pub struct AssemblerBuilder {
    config: AssemblyConfig,
    engine: Option<Box<dyn DerivationEngine>>,
    plugins: Vec<Arc<dyn AnalyzerPlugin>>,
    identifiers: Option<Box<dyn IdentifierSource>>,
    strategy: BuildStrategy,
}

impl AssemblerBuilder {
    /// Registers an analyzer plugin. Plugins run in registration order.
    pub fn plugin(mut self, plugin: Arc<dyn AnalyzerPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn engine(mut self, engine: Box<dyn DerivationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn identifiers(mut self, identifiers: Box<dyn IdentifierSource>) -> Self {
        self.identifiers = Some(identifiers);
        self
    }

    pub fn strategy(mut self, strategy: BuildStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn write_mode(mut self, mode: WriteMode) -> Self {
        self.config.write_mode = mode;
        self
    }

    pub fn build(self) -> Result<BundleAssembler> {
        self.config.validate()?;
        let engine = self.engine.unwrap_or_else(|| Box::new(BasicEngine));
        let identifiers = self
            .identifiers
            .unwrap_or_else(|| Box::new(SessionCounter::new(self.config.identifier_prefix.clone())));
        Ok(BundleAssembler {
            writer: ArchiveWriter::new(&self.config),
            analyzer: Analyzer::new(engine, self.plugins),
            identifiers,
            strategy: self.strategy,
            config: self.config,
        })
    }
}

pub struct BundleAssembler {
    config: AssemblyConfig,
    analyzer: Analyzer,
    identifiers: Box<dyn IdentifierSource>,
    strategy: BuildStrategy,
    writer: ArchiveWriter,
}

impl BundleAssembler {
    pub fn builder(config: AssemblyConfig) -> AssemblerBuilder {
        AssemblerBuilder { config, engine: None, plugins: Vec::new(), identifiers: None, strategy: BuildStrategy::default() }
    }

    /// Assembler with the default engine, no plugins and a fresh identifier counter.
    ///
    /// An invalid configuration falls back to the defaults for the pipe settings, with a
    /// warning. Use [`BundleAssembler::builder`] to have it rejected instead.
    pub fn new(config: AssemblyConfig) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!(error = %e, "invalid assembly config, using default pipe settings");
                AssemblyConfig {
                    pipe_chunk_size: AssemblyConfig::default().pipe_chunk_size,
                    pipe_depth: AssemblyConfig::default().pipe_depth,
                    ..config
                }
            }
        };
        let identifiers = Box::new(SessionCounter::new(config.identifier_prefix.clone()));
        Self {
            writer: ArchiveWriter::new(&config),
            analyzer: Analyzer::default(),
            identifiers,
            strategy: BuildStrategy::default(),
            config,
        }
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn strategy(&self) -> BuildStrategy {
        self.strategy
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Next generated symbolic name for artifacts that did not set one.
    pub fn default_name(&self) -> String {
        self.identifiers.next_identifier()
    }

    /// Builds a bundle from the store's resources and its pending headers.
    pub fn build(&self, store: &ResourceStore) -> Result<ArtifactStream> {
        self.build_with(store, store.headers())
    }

    /// Builds a bundle from the store's resources using `headers` as instructions.
    pub fn build_with(&self, store: &ResourceStore, headers: &Headers) -> Result<ArtifactStream> {
        let jar = store.snapshot().map_err(|e| match e {
            BundleError::Manifest(m) => BundleError::Analysis(format!("invalid manifest resource: {}", m)),
            other => other,
        })?;
        self.emit(jar, headers)
    }

    /// Re-bundles an existing JAR blob with `headers` layered on top of its manifest.
    pub fn wrap(&self, content: &[u8], headers: &Headers) -> Result<ArtifactStream> {
        let jar = Jar::from_zip_bytes(content)?;
        self.emit(jar, headers)
    }

    /// Computes the manifest without writing anything.
    pub fn compute(&self, jar: Jar, headers: &Headers) -> Result<(Manifest, Jar)> {
        match self.strategy {
            BuildStrategy::Analyzed => self.analyzer.compute_for_jar(jar, headers, &self.default_name()),
            BuildStrategy::Raw => Ok(raw_manifest(jar, headers)),
        }
    }

    /// Writes a deployment package from a populated cache.
    pub fn deployment_package<C: StreamCache + ?Sized>(&self, cache: &C, headers: &Headers) -> Result<ArtifactStream> {
        DeploymentPackage::new(cache, headers.clone()).write(&self.writer, &self.default_name())
    }

    fn emit(&self, jar: Jar, headers: &Headers) -> Result<ArtifactStream> {
        let (manifest, jar) = self.compute(jar, headers)?;
        info!(
            symbolic_name = manifest.get(BUNDLE_SYMBOLICNAME).unwrap_or("<unset>"),
            entries = jar.len(),
            mode = ?self.writer.mode(),
            "assembling bundle"
        );
        self.writer.write(ArchivePlan::from_jar(&jar, manifest))
    }
}

fn raw_manifest(mut jar: Jar, headers: &Headers) -> (Manifest, Jar) {
    let mut manifest = jar.take_manifest().unwrap_or_default();
    for (key, value) in headers {
        if !is_directive(key) {
            manifest.insert(key.clone(), value.clone());
        }
    }
    if manifest.get(MANIFEST_VERSION).is_none() {
        manifest.insert(MANIFEST_VERSION, DEFAULT_MANIFEST_VERSION);
    }
    jar.set_manifest(manifest.clone());
    (manifest, jar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::RandomIdentifiers;

    #[test]
    fn raw_strategy_skips_analysis() {
        let assembler = BundleAssembler::builder(AssemblyConfig::default())
            .strategy(BuildStrategy::Raw)
            .build()
            .unwrap();
        let mut headers = Headers::new();
        headers.insert("X-Custom".into(), "raw value".into());
        let (m, _) = assembler.compute(Jar::new(), &headers).unwrap();
        assert_eq!(m.get("X-Custom"), Some("raw value"));
        assert_eq!(m.get(BUNDLE_SYMBOLICNAME), None);
        assert_eq!(m.get(MANIFEST_VERSION), Some("1.0"));
    }

    #[test]
    fn default_names_come_from_the_assembler() {
        let a = BundleAssembler::new(AssemblyConfig { identifier_prefix: "Session:".into(), ..AssemblyConfig::default() });
        let (m1, _) = a.compute(Jar::new(), &Headers::new()).unwrap();
        let (m2, _) = a.compute(Jar::new(), &Headers::new()).unwrap();
        assert_eq!(m1.get(BUNDLE_SYMBOLICNAME), Some("Session_0"));
        assert_eq!(m2.get(BUNDLE_SYMBOLICNAME), Some("Session_1"));

        let b = BundleAssembler::builder(AssemblyConfig::default())
            .identifiers(Box::new(RandomIdentifiers::new("rnd-")))
            .build()
            .unwrap();
        assert!(b.default_name().starts_with("rnd-"));
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = AssemblyConfig { pipe_depth: 0, ..AssemblyConfig::default() };
        assert!(matches!(BundleAssembler::builder(config).build(), Err(BundleError::Config(_))));
    }

    #[test]
    fn new_repairs_invalid_pipe_settings() {
        let config = AssemblyConfig {
            pipe_depth: 0,
            pipe_chunk_size: 0,
            identifier_prefix: "kept".into(),
            ..AssemblyConfig::default()
        };
        let assembler = BundleAssembler::new(config);
        let defaults = AssemblyConfig::default();
        assert_eq!(assembler.config().pipe_depth, defaults.pipe_depth);
        assert_eq!(assembler.config().pipe_chunk_size, defaults.pipe_chunk_size);
        assert_eq!(assembler.config().identifier_prefix, "kept");
        assert!(assembler.config().validate().is_ok());
    }
}
