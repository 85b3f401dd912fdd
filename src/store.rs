//! # Resource Store
//!
//! Named content sources plus the header overrides that go with them, collected
//! for a single assembly session.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BundleError, Result};
use crate::jar::Jar;
use crate::manifest::Headers;

/// Something that can hand out a fresh reader over the same bytes, every time it is asked.
pub trait ContentProvider: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Short human-readable origin, used in log and error messages.
    fn describe(&self) -> String {
        "<provider>".to_string()
    }
}

impl<F> ContentProvider for F
where
    F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync,
{
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        self()
    }
}

/// Deferred content backed by a file on disk. The file is opened on each read.
#[derive(Debug, Clone)]
pub struct FileContent {
    path: PathBuf,
}

impl FileContent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentProvider for FileContent {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Where a resource's bytes come from. Cloning is cheap: both variants are reference counted.
#[derive(Clone)]
pub enum ContentSource {
    /// Content buffered at ingestion time.
    Bytes(Arc<[u8]>),
    /// Content fetched on demand.
    Provider(Arc<dyn ContentProvider>),
}

impl ContentSource {
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            ContentSource::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
            ContentSource::Provider(p) => p.open(),
        }
    }

    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        match self {
            ContentSource::Bytes(bytes) => Ok(bytes.to_vec()),
            ContentSource::Provider(p) => {
                let mut out = Vec::new();
                p.open()?.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ContentSource::Provider(p) => write!(f, "Provider({})", p.describe()),
        }
    }
}

impl From<Vec<u8>> for ContentSource {
    fn from(v: Vec<u8>) -> Self {
        ContentSource::Bytes(Arc::from(v))
    }
}

impl From<&[u8]> for ContentSource {
    fn from(v: &[u8]) -> Self {
        ContentSource::Bytes(Arc::from(v))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceStore {
    resources: BTreeMap<String, ContentSource>,
    headers: Headers,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, name: String, source: ContentSource) {
        if self.resources.insert(name.clone(), source).is_some() {
            debug!(resource = %name, "replacing previously added resource");
        }
    }

    /// Reads `content` to the end right away and stores the bytes.
    pub fn add_resource<R: Read>(&mut self, name: impl Into<String>, mut content: R) -> Result<()> {
        let name = name.into();
        let mut buf = Vec::new();
        if let Err(source) = content.read_to_end(&mut buf) {
            return Err(BundleError::Ingestion { name, source });
        }
        self.put(name, ContentSource::from(buf));
        Ok(())
    }

    pub fn add_bytes(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.put(name.into(), ContentSource::from(bytes.into()));
    }

    pub fn add_provider(&mut self, name: impl Into<String>, provider: Arc<dyn ContentProvider>) {
        self.put(name.into(), ContentSource::Provider(provider));
    }

    /// Registers a file whose content is read only when the artifact is written.
    pub fn add_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.add_provider(name, Arc::new(FileContent::new(path)));
    }

    /// Registers every file below `root` as a deferred resource named
    /// `prefix` + the `/`-separated relative path. Returns the number of files added.
    pub fn add_directory(&mut self, root: &Path, prefix: &str) -> Result<usize> {
        let mut added = 0;
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                BundleError::Io { source: e.into(), path }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let rel: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
            let name = format!("{}{}", prefix, rel.join("/"));
            self.add_file(name, entry.path());
            added += 1;
        }
        debug!(root = %root.display(), added, "directory added to resource store");
        Ok(added)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ContentSource> {
        self.resources.get(name)
    }

    /// Opens a fresh reader over the named resource.
    pub fn open(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let source = self.resources.get(name).ok_or_else(|| BundleError::Ingestion {
            name: name.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such resource"),
        })?;
        source.open().map_err(|source| BundleError::Ingestion { name: name.to_string(), source })
    }

    /// Resource names in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Container view of the current resources. Contents are shared, not copied.
    pub fn snapshot(&self) -> Result<Jar> {
        Jar::from_sources(self.resources.clone())
    }
}
