//! Container snapshot: named entries plus an optional manifest.
//!
//! A [`Jar`] is what the analyzer inspects and what the archive writer serializes.
//! Entry contents are shared [`ContentSource`]s, so snapshots are cheap to clone
//! and safe to hand to a producer thread.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};

use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::{BundleError, Result};
use crate::manifest::{Manifest, MANIFEST_PATH};
use crate::store::ContentSource;

#[derive(Debug, Clone, Default)]
pub struct Jar {
    entries: BTreeMap<String, ContentSource>,
    manifest: Option<Manifest>,
}

impl Jar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a jar from named sources. A `META-INF/MANIFEST.MF` entry becomes the
    /// jar's manifest instead of a regular entry.
    pub fn from_sources(mut entries: BTreeMap<String, ContentSource>) -> Result<Self> {
        let manifest = match entries.remove(MANIFEST_PATH) {
            Some(source) => {
                let bytes = source.read_all().map_err(|source| BundleError::Ingestion { name: MANIFEST_PATH.to_string(), source })?;
                Some(Manifest::parse(&bytes)?)
            }
            None => None,
        };
        Ok(Self { entries, manifest })
    }

    /// Loads every file entry of a ZIP container into memory.
    pub fn from_zip_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_zip(Cursor::new(bytes))
    }

    pub fn from_zip<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader).map_err(|e| BundleError::Analysis(format!("not a valid container: {}", e)))?;
        let mut jar = Jar::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| BundleError::Analysis(format!("unreadable entry #{}: {}", i, e)))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| BundleError::Analysis(format!("unreadable entry '{}': {}", name, e)))?;
            if name == MANIFEST_PATH {
                let manifest = Manifest::parse(&data).map_err(|e| BundleError::Analysis(format!("invalid manifest: {}", e)))?;
                jar.manifest = Some(manifest);
            } else {
                jar.entries.insert(name, ContentSource::from(data));
            }
        }
        Ok(jar)
    }

    /// Reads only the manifest of a ZIP container. `Ok(None)` when it has none.
    pub fn read_manifest<R: Read + Seek>(reader: R) -> Result<Option<Manifest>> {
        let mut archive = ZipArchive::new(reader)?;
        let mut file = match archive.by_name(MANIFEST_PATH) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(Some(Manifest::parse(&data)?))
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn set_manifest(&mut self, manifest: Manifest) {
        self.manifest = Some(manifest);
    }

    pub fn take_manifest(&mut self) -> Option<Manifest> {
        self.manifest.take()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: ContentSource) {
        self.entries.insert(name.into(), source);
    }

    pub fn get(&self, name: &str) -> Option<&ContentSource> {
        self.entries.get(name)
    }

    /// Entries in lexical order, manifest excluded.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ContentSource)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
