//! # Category Cache
//!
//! Holds the resources of a deployment package, sorted into the partitions the
//! package layout needs (bundles, localization files, META-INF resources,
//! processor-targeted resources, everything else).
//!
//! Incoming content is copied into local storage right away because the source may
//! be short-lived. Small content stays in memory; anything at or above the spool
//! threshold goes to a temp file. Bundle manifests are read during the same call.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::{AssemblyConfig, ClassificationRules};
use crate::error::{BundleError, Result};
use crate::jar::Jar;
use crate::manifest::Headers;
use crate::store::{ContentProvider, ContentSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Bundle,
    Localization,
    MetaInf,
    Processor,
    Other,
}

/// Access to the logical partitions of a deployment package and to bundle metadata.
pub trait StreamCache {
    /// Adds module content. Its manifest headers become available through [`StreamCache::headers`].
    fn add_bundle(&mut self, name: &str, content: &mut dyn Read) -> Result<()>;

    /// Adds any other resource, optionally tagged with the resource processor that handles it.
    fn add_resource(&mut self, name: &str, content: &mut dyn Read, processor: Option<&str>) -> Result<()>;

    /// Main manifest attributes of a bundle. Empty for non-bundles and unknown names.
    fn headers(&self, name: &str) -> Headers;

    fn bundles(&self) -> Vec<String>;

    fn other_resources(&self) -> Vec<String>;

    fn localization_files(&self) -> Vec<String>;

    fn meta_inf_resources(&self) -> Vec<String>;

    fn processor_resources(&self) -> Vec<String>;

    fn processor_of(&self, name: &str) -> Option<String>;

    fn category_of(&self, name: &str) -> Option<Category>;

    /// Shareable handle on the cached content.
    fn source(&self, name: &str) -> Option<ContentSource>;

    /// A fresh reader positioned at the start of the resource.
    fn stream(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let source = self.source(name).ok_or_else(|| BundleError::Io {
            source: io::Error::new(io::ErrorKind::NotFound, "resource not cached"),
            path: PathBuf::from(name),
        })?;
        source.open().map_err(|source| BundleError::Io { source, path: PathBuf::from(name) })
    }
}

/// Temp-file content handed out as a [`ContentProvider`]; every open is an independent handle.
struct SpoolFile(Arc<NamedTempFile>);

impl ContentProvider for SpoolFile {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.0.reopen()?))
    }

    fn describe(&self) -> String {
        self.0.path().display().to_string()
    }
}

enum Spooled {
    Memory(Arc<[u8]>),
    Disk(Arc<NamedTempFile>),
}

impl Spooled {
    fn source(&self) -> ContentSource {
        match self {
            Spooled::Memory(bytes) => ContentSource::Bytes(Arc::clone(bytes)),
            Spooled::Disk(file) => ContentSource::Provider(Arc::new(SpoolFile(Arc::clone(file)))),
        }
    }
}

struct Slot {
    category: Category,
    content: Spooled,
    processor: Option<String>,
    headers: Headers,
}

pub struct SpoolCache {
    rules: ClassificationRules,
    spool_threshold: usize,
    slots: HashMap<String, Slot>,
    /// Names in insertion order; a re-added name moves to the end.
    order: Vec<String>,
}

impl SpoolCache {
    pub fn new(rules: ClassificationRules, spool_threshold: usize) -> Self {
        Self { rules, spool_threshold, slots: HashMap::new(), order: Vec::new() }
    }

    pub fn from_config(config: &AssemblyConfig) -> Self {
        Self::new(config.classification.clone(), config.spool_threshold)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Applies the classification rules in order. An explicit bundle always stays a bundle.
    pub fn classify(&self, name: &str, processor: Option<&str>, explicit_bundle: bool) -> Category {
        let has_prefix = |prefix: &str| !prefix.is_empty() && name.starts_with(prefix);
        if explicit_bundle {
            Category::Bundle
        } else if processor.is_some() {
            Category::Processor
        } else if has_prefix(&self.rules.bundle_prefix) {
            Category::Bundle
        } else if has_prefix(&self.rules.localization_prefix) {
            Category::Localization
        } else if has_prefix(&self.rules.meta_inf_prefix) {
            Category::MetaInf
        } else {
            Category::Other
        }
    }

    fn spool(&self, name: &str, content: &mut dyn Read) -> Result<Spooled> {
        let ingest_err = |source: io::Error| BundleError::Ingestion { name: name.to_string(), source };

        let mut head = Vec::new();
        Read::take(&mut *content, self.spool_threshold as u64)
            .read_to_end(&mut head)
            .map_err(ingest_err)?;
        if head.len() < self.spool_threshold {
            return Ok(Spooled::Memory(Arc::from(head)));
        }

        let mut file = NamedTempFile::new().map_err(ingest_err)?;
        file.write_all(&head).map_err(ingest_err)?;
        let rest = io::copy(content, &mut file).map_err(ingest_err)?;
        file.flush().map_err(ingest_err)?;
        debug!(resource = name, bytes = head.len() as u64 + rest, "resource spooled to disk");
        Ok(Spooled::Disk(Arc::new(file)))
    }

    fn extract_headers(name: &str, content: &Spooled) -> Headers {
        let manifest = match content {
            Spooled::Memory(bytes) => Jar::read_manifest(Cursor::new(&bytes[..])),
            Spooled::Disk(file) => file
                .reopen()
                .map_err(BundleError::from)
                .and_then(Jar::read_manifest),
        };
        match manifest {
            Ok(Some(m)) => m.main_attributes().clone(),
            Ok(None) => Headers::new(),
            Err(e) => {
                warn!(resource = name, error = %e, "bundle headers unavailable");
                Headers::new()
            }
        }
    }

    fn insert(&mut self, name: &str, content: &mut dyn Read, processor: Option<&str>, explicit_bundle: bool) -> Result<()> {
        let category = self.classify(name, processor, explicit_bundle);
        let spooled = self.spool(name, content)?;
        let headers = if category == Category::Bundle {
            Self::extract_headers(name, &spooled)
        } else {
            Headers::new()
        };

        if self.slots.contains_key(name) {
            debug!(resource = name, "replacing cached resource");
            self.order.retain(|n| n != name);
        }
        self.order.push(name.to_string());
        self.slots.insert(
            name.to_string(),
            Slot { category, content: spooled, processor: processor.map(str::to_string), headers },
        );
        Ok(())
    }

    fn names_in(&self, category: Category) -> Vec<String> {
        self.order
            .iter()
            .filter(|n| self.slots.get(n.as_str()).map(|s| s.category) == Some(category))
            .cloned()
            .collect()
    }
}

impl StreamCache for SpoolCache {
    fn add_bundle(&mut self, name: &str, content: &mut dyn Read) -> Result<()> {
        self.insert(name, content, None, true)
    }

    fn add_resource(&mut self, name: &str, content: &mut dyn Read, processor: Option<&str>) -> Result<()> {
        self.insert(name, content, processor, false)
    }

    fn headers(&self, name: &str) -> Headers {
        self.slots.get(name).map(|s| s.headers.clone()).unwrap_or_default()
    }

    fn bundles(&self) -> Vec<String> {
        self.names_in(Category::Bundle)
    }

    fn other_resources(&self) -> Vec<String> {
        self.names_in(Category::Other)
    }

    fn localization_files(&self) -> Vec<String> {
        self.names_in(Category::Localization)
    }

    fn meta_inf_resources(&self) -> Vec<String> {
        self.names_in(Category::MetaInf)
    }

    fn processor_resources(&self) -> Vec<String> {
        self.names_in(Category::Processor)
    }

    fn processor_of(&self, name: &str) -> Option<String> {
        self.slots.get(name).and_then(|s| s.processor.clone())
    }

    fn category_of(&self, name: &str) -> Option<Category> {
        self.slots.get(name).map(|s| s.category)
    }

    fn source(&self, name: &str) -> Option<ContentSource> {
        self.slots.get(name).map(|s| s.content.source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_PATH;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn bundle_bytes(manifest: &str) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(MANIFEST_PATH, SimpleFileOptions::default()).unwrap();
        zip.write_all(manifest.as_bytes()).unwrap();
        zip.start_file("org/x/X.class", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"\xca\xfe\xba\xbe").unwrap();
        zip.finish().unwrap().into_inner()
    }

    fn cache() -> SpoolCache {
        SpoolCache::new(ClassificationRules::default(), 1024)
    }

    fn read_all(cache: &SpoolCache, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        cache.stream(name).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn sorts_resources_into_buckets() {
        let mut c = cache();
        c.add_resource("OSGI-INF/l10n/bundle.properties", &mut &b"k=v"[..], None).unwrap();
        c.add_resource("META-INF/sig.SF", &mut &b"sig"[..], None).unwrap();
        c.add_resource("config/app.xml", &mut &b"<x/>"[..], None).unwrap();
        c.add_resource("bundles/b.jar", &mut &bundle_bytes("Bundle-SymbolicName: b\r\n")[..], None).unwrap();
        c.add_resource("conf/db.cfg", &mut &b"url=x"[..], Some("org.osgi.deployment.rp.autoconf")).unwrap();

        assert_eq!(c.localization_files(), vec!["OSGI-INF/l10n/bundle.properties"]);
        assert_eq!(c.meta_inf_resources(), vec!["META-INF/sig.SF"]);
        assert_eq!(c.other_resources(), vec!["config/app.xml"]);
        assert_eq!(c.bundles(), vec!["bundles/b.jar"]);
        assert_eq!(c.processor_resources(), vec!["conf/db.cfg"]);
        assert_eq!(c.processor_of("conf/db.cfg").as_deref(), Some("org.osgi.deployment.rp.autoconf"));
        assert_eq!(c.headers("bundles/b.jar").get("Bundle-SymbolicName").map(String::as_str), Some("b"));
    }

    #[test]
    fn processor_tag_wins_over_prefixes() {
        let mut c = cache();
        for name in ["META-INF/x.cfg", "OSGI-INF/l10n/x.properties", "bundles/x.jar", "x.cfg"] {
            c.add_resource(name, &mut &b"data"[..], Some("pid")).unwrap();
        }
        assert_eq!(c.processor_resources().len(), 4);
        assert!(c.bundles().is_empty());
        assert!(c.localization_files().is_empty());
        assert!(c.meta_inf_resources().is_empty());
        assert!(c.other_resources().is_empty());
    }

    #[test]
    fn bundle_headers_are_stable() {
        let mut c = cache();
        let bytes = bundle_bytes("Manifest-Version: 1.0\r\nBundle-SymbolicName: org.demo\r\nBundle-Version: 1.2.3\r\n\r\n");
        c.add_bundle("demo.jar", &mut &bytes[..]).unwrap();
        let first = c.headers("demo.jar");
        assert_eq!(first.get("Bundle-Version").map(String::as_str), Some("1.2.3"));
        assert_eq!(first, c.headers("demo.jar"));
        assert!(c.headers("missing.jar").is_empty());
    }

    #[test]
    fn invalid_bundle_has_empty_headers() {
        let mut c = cache();
        c.add_bundle("broken.jar", &mut &b"not a zip"[..]).unwrap();
        assert_eq!(c.bundles(), vec!["broken.jar"]);
        assert!(c.headers("broken.jar").is_empty());
    }

    #[test]
    fn large_content_spools_to_disk_and_rereads() {
        let mut c = SpoolCache::new(ClassificationRules::default(), 16);
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 7) as u8).collect();
        c.add_resource("big.bin", &mut &payload[..], None).unwrap();
        assert!(matches!(c.slots["big.bin"].content, Spooled::Disk(_)));
        assert_eq!(read_all(&c, "big.bin"), payload);
        assert_eq!(read_all(&c, "big.bin"), payload);

        let bundle = bundle_bytes("Bundle-SymbolicName: spooled\r\n");
        c.add_bundle("spooled.jar", &mut &bundle[..]).unwrap();
        assert_eq!(c.headers("spooled.jar").get("Bundle-SymbolicName").map(String::as_str), Some("spooled"));
    }

    #[test]
    fn readding_moves_between_buckets() {
        let mut c = cache();
        c.add_resource("a.txt", &mut &b"1"[..], None).unwrap();
        c.add_resource("b.txt", &mut &b"2"[..], None).unwrap();
        c.add_resource("a.txt", &mut &b"3"[..], Some("pid")).unwrap();
        assert_eq!(c.other_resources(), vec!["b.txt"]);
        assert_eq!(c.processor_resources(), vec!["a.txt"]);
        assert_eq!(read_all(&c, "a.txt"), b"3");
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn unknown_stream_is_an_error() {
        assert!(cache().stream("nope").is_err());
    }
}
