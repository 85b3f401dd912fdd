//! # Archive Writer
//!
//! Serializes a manifest plus an ordered list of entries into a ZIP container.
//!
//! Two modes are supported:
//!
//! - **Buffered** writes the whole archive to an anonymous temp file and only then
//!   returns a stream over it. A failure never exposes a partial archive.
//! - **Pipelined** writes on a producer thread into a [`pipe`](crate::pipe) and
//!   returns the reading end immediately. Bytes become readable entry by entry.
//!
//! Both modes run the same encoder. Entries carry data descriptors, so the output is
//! written strictly forward and pipelined memory stays at the pipe's capacity plus the
//! compressor's own buffers, whatever the entry sizes.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::rc::Rc;
use std::thread::JoinHandle;

use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{DateTime, ZipWriter};

use crate::config::{AssemblyConfig, Compression, WriteMode};
use crate::error::{BundleError, Result};
use crate::jar::Jar;
use crate::manifest::{Manifest, MANIFEST_PATH};
use crate::pipe::{pipe, spawn_producer, PipeReader};
use crate::store::ContentSource;

/// Manifest plus entries in the exact order they will appear in the archive.
#[derive(Debug, Clone)]
pub struct ArchivePlan {
    pub manifest: Manifest,
    pub entries: Vec<(String, ContentSource)>,
}

impl ArchivePlan {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest, entries: Vec::new() }
    }

    /// Appends an entry. A `META-INF/MANIFEST.MF` entry is ignored; the plan's manifest wins.
    pub fn push(&mut self, name: impl Into<String>, source: ContentSource) {
        let name = name.into();
        if name == MANIFEST_PATH {
            debug!("dropping manifest resource in favour of the computed manifest");
            return;
        }
        self.entries.push((name, source));
    }

    /// Jar entries in lexical order behind the given manifest.
    pub fn from_jar(jar: &Jar, manifest: Manifest) -> Self {
        let mut plan = Self::new(manifest);
        for (name, source) in jar.entries() {
            plan.push(name, source.clone());
        }
        plan
    }
}

/// What a finished archive contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildReport {
    /// Entries written, manifest included.
    pub entries: usize,
    /// Size of the finished archive in bytes.
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    mode: WriteMode,
    compression: Compression,
    pipe_chunk_size: usize,
    pipe_depth: usize,
}

impl ArchiveWriter {
    pub fn new(config: &AssemblyConfig) -> Self {
        Self {
            mode: config.write_mode,
            compression: config.compression,
            pipe_chunk_size: config.pipe_chunk_size,
            pipe_depth: config.pipe_depth,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    fn file_options(&self) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(self.compression.method())
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644)
    }

    pub fn write(&self, plan: ArchivePlan) -> Result<ArtifactStream> {
        match self.mode {
            WriteMode::Buffered => self.write_buffered(plan),
            WriteMode::Pipelined => self.write_pipelined(plan),
        }
    }

    pub fn write_buffered(&self, plan: ArchivePlan) -> Result<ArtifactStream> {
        let file = tempfile::tempfile().map_err(|e| BundleError::Build(format!("cannot create staging file: {}", e)))?;
        let mut writer = BufWriter::with_capacity(1024 * 1024, file);

        let report = encode(&plan, &mut writer, self.file_options(), false)?;
        let mut file = writer
            .into_inner()
            .map_err(|e| BundleError::Build(format!("cannot flush staging file: {}", e.error())))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| BundleError::Build(format!("cannot rewind staging file: {}", e)))?;

        debug!(entries = report.entries, bytes = report.bytes, "buffered artifact ready");
        Ok(ArtifactStream { kind: StreamKind::Buffered { file, report } })
    }

    pub fn write_pipelined(&self, plan: ArchivePlan) -> Result<ArtifactStream> {
        let (writer, reader) = pipe(self.pipe_chunk_size, self.pipe_depth);
        let options = self.file_options();
        let producer = spawn_producer("tinybundle-writer", writer, move |out| encode(&plan, out, options, true))?;
        Ok(ArtifactStream { kind: StreamKind::Piped { reader, producer: Some(producer) } })
    }
}

/// Writes the manifest first, then every entry of `plan`, and finalizes the central directory.
///
/// Entries are written in streaming form: sizes and CRCs follow each entry in a data
/// descriptor, so nothing already written is revisited and `sink` needs no `Seek`.
fn encode(plan: &ArchivePlan, sink: &mut dyn Write, options: SimpleFileOptions, eager: bool) -> Result<BuildReport> {
    let counted = CountingSink::new(sink, eager);
    let mut zip = ZipWriter::new_stream(counted.clone());
    let written = write_entries(&mut zip, plan, options, &counted);
    if written.is_err() {
        // keep the writer's drop-time finalization from emitting a central directory
        counted.poison();
    }
    written?;
    zip.finish().map_err(|e| build_err("central directory", e))?;
    counted.flush_downstream().map_err(|e| build_err("central directory", e))?;
    Ok(BuildReport { entries: plan.entries.len() + 1, bytes: counted.bytes() })
}

fn write_entries<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    plan: &ArchivePlan,
    options: SimpleFileOptions,
    counted: &CountingSink<'_>,
) -> Result<()> {
    zip.start_file(MANIFEST_PATH, options).map_err(|e| build_err(MANIFEST_PATH, e))?;
    let manifest = plan.manifest.to_bytes()?;
    zip.write_all(&manifest).map_err(|e| build_err(MANIFEST_PATH, e))?;

    for (name, source) in &plan.entries {
        zip.start_file(name.as_str(), options).map_err(|e| build_err(name, e))?;
        // everything up to this entry's header is readable before its content is opened
        counted.flush_downstream().map_err(|e| build_err(name, e))?;
        let mut content = source.open().map_err(|e| build_err(name, e))?;
        io::copy(&mut content, zip).map_err(|e| build_err(name, e))?;
    }
    Ok(())
}

fn build_err(what: &str, e: impl std::fmt::Display) -> BundleError {
    BundleError::Build(format!("{}: {}", what, e))
}

struct Counting<'a> {
    inner: &'a mut dyn Write,
    bytes: u64,
    /// Forward `flush` calls at entry boundaries (pipelined mode).
    eager: bool,
    poisoned: bool,
}

/// Shared handle on the archive's output. The ZIP writer owns one clone, the encoder
/// keeps another to count bytes and push finished entries downstream.
#[derive(Clone)]
struct CountingSink<'a> {
    state: Rc<RefCell<Counting<'a>>>,
}

impl<'a> CountingSink<'a> {
    fn new(inner: &'a mut dyn Write, eager: bool) -> Self {
        Self { state: Rc::new(RefCell::new(Counting { inner, bytes: 0, eager, poisoned: false })) }
    }

    fn bytes(&self) -> u64 {
        self.state.borrow().bytes
    }

    fn poison(&self) {
        self.state.borrow_mut().poisoned = true;
    }

    fn flush_downstream(&self) -> io::Result<()> {
        let mut s = self.state.borrow_mut();
        if s.eager {
            s.inner.flush()?;
        }
        Ok(())
    }
}

impl Write for CountingSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut s = self.state.borrow_mut();
        if s.poisoned {
            return Err(io::Error::new(io::ErrorKind::Other, "archive abandoned after an earlier failure"));
        }
        let n = s.inner.write(data)?;
        s.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut s = self.state.borrow_mut();
        if s.poisoned {
            return Ok(());
        }
        s.inner.flush()
    }
}

enum StreamKind {
    Buffered { file: File, report: BuildReport },
    Piped { reader: PipeReader, producer: Option<JoinHandle<Result<BuildReport>>> },
}

/// The finished (or still finishing) artifact. Read it like any other byte stream.
pub struct ArtifactStream {
    kind: StreamKind,
}

impl ArtifactStream {
    /// True when the whole archive was written before this stream was returned.
    pub fn is_buffered(&self) -> bool {
        matches!(self.kind, StreamKind::Buffered { .. })
    }

    /// Waits for the producer and returns its outcome.
    ///
    /// Unread bytes are discarded; a producer that is still writing stops with
    /// [`StreamError::ConsumerGone`](crate::pipe::StreamError::ConsumerGone).
    pub fn finish(self) -> Result<BuildReport> {
        match self.kind {
            StreamKind::Buffered { report, .. } => Ok(report),
            StreamKind::Piped { reader, mut producer } => {
                drop(reader);
                let handle = match producer.take() {
                    Some(h) => h,
                    None => return Err(BundleError::Build("producer already joined".into())),
                };
                handle.join().unwrap_or_else(|_| {
                    warn!("artifact producer thread panicked");
                    Err(BundleError::Build("producer thread panicked".into()))
                })
            }
        }
    }

    /// Reads the whole artifact and confirms the producer finished cleanly.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let read = self.read_to_end(&mut out);
        match (read, self.finish()) {
            (_, Err(producer_err)) => Err(producer_err),
            (Err(e), Ok(_)) => Err(BundleError::Build(format!("artifact stream ended early: {}", e))),
            (Ok(_), Ok(_)) => Ok(out),
        }
    }
}

impl Read for ArtifactStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            StreamKind::Buffered { file, .. } => file.read(buf),
            StreamKind::Piped { reader, .. } => reader.read(buf),
        }
    }
}
