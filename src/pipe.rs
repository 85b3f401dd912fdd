//! Bounded in-memory pipe between an archive producer thread and the caller.
//!
//! The writer groups bytes into chunks and pushes them through a bounded
//! crossbeam channel, so a slow reader blocks the producer instead of letting
//! memory grow. Every stream ends with an explicit terminal frame: `End` on
//! success, `Failed` on a producer error. A channel that disconnects without
//! one is reported to the reader as a truncated stream, never as a clean EOF.

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{BundleError, Result};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("artifact producer failed: {0}")]
    ProducerFailed(String),
    #[error("consumer closed the artifact stream")]
    ConsumerGone,
    #[error("artifact producer stopped without closing the stream")]
    Aborted,
}

enum Frame {
    Data(Vec<u8>),
    End,
    Failed(String),
}

/// Creates a connected writer/reader pair.
///
/// At most `depth` chunks of `chunk_size` bytes wait in the channel; the writer
/// and reader each hold one more chunk of their own.
pub fn pipe(chunk_size: usize, depth: usize) -> (PipeWriter, PipeReader) {
    let chunk_size = chunk_size.max(1);
    let (tx, rx) = bounded(depth.max(1));
    let writer = PipeWriter {
        tx: Some(tx),
        buf: Vec::with_capacity(chunk_size),
        chunk_size,
        written: 0,
        disconnected: false,
    };
    let reader = PipeReader {
        rx,
        current: Vec::new(),
        pos: 0,
        state: ReadState::Open,
    };
    (writer, reader)
}

pub struct PipeWriter {
    tx: Option<Sender<Frame>>,
    buf: Vec<u8>,
    chunk_size: usize,
    written: u64,
    disconnected: bool,
}

impl PipeWriter {
    /// Total bytes accepted so far (including bytes still buffered).
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// True once a send failed because the reader went away.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn send(&mut self, frame: Frame) -> io::Result<()> {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return Err(io::Error::new(io::ErrorKind::BrokenPipe, StreamError::ConsumerGone)),
        };
        if tx.send(frame).is_err() {
            self.disconnected = true;
            self.tx = None;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, StreamError::ConsumerGone));
        }
        Ok(())
    }

    fn send_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
        self.send(Frame::Data(chunk))
    }

    /// Flushes buffered bytes and signals a clean end of stream.
    pub fn close(mut self) -> std::result::Result<u64, StreamError> {
        self.send_chunk().map_err(|_| StreamError::ConsumerGone)?;
        self.send(Frame::End).map_err(|_| StreamError::ConsumerGone)?;
        self.tx = None;
        Ok(self.written)
    }

    /// Discards buffered bytes and hands `reason` to the reader as an error.
    pub fn fail(mut self, reason: impl Into<String>) {
        self.buf.clear();
        // A reader that is already gone does not need to hear about it.
        let _ = self.send(Frame::Failed(reason.into()));
        self.tx = None;
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_none() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, StreamError::ConsumerGone));
        }
        if data.is_empty() {
            return Ok(0);
        }
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        self.written += n as u64;
        if self.buf.len() == self.chunk_size {
            self.send_chunk()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_chunk()
    }
}

enum ReadState {
    Open,
    Done,
    Failed(StreamError),
}

pub struct PipeReader {
    rx: Receiver<Frame>,
    current: Vec<u8>,
    pos: usize,
    state: ReadState,
}

impl PipeReader {
    fn fill(&mut self) {
        match self.rx.recv() {
            Ok(Frame::Data(chunk)) => {
                self.current = chunk;
                self.pos = 0;
            }
            Ok(Frame::End) => self.state = ReadState::Done,
            Ok(Frame::Failed(reason)) => self.state = ReadState::Failed(StreamError::ProducerFailed(reason)),
            Err(_) => self.state = ReadState::Failed(StreamError::Aborted),
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.current.len() {
                let n = (self.current.len() - self.pos).min(out.len());
                out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match &self.state {
                ReadState::Done => return Ok(0),
                ReadState::Failed(StreamError::Aborted) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, StreamError::Aborted))
                }
                ReadState::Failed(e) => return Err(io::Error::new(io::ErrorKind::Other, e.clone())),
                ReadState::Open => self.fill(),
            }
        }
    }
}

/// Runs `job` on a named thread that owns `writer`.
///
/// On success the pipe is closed cleanly; on failure the error text is sent to
/// the reader before the channel drops. The join handle yields the job's result.
pub fn spawn_producer<T, F>(name: &str, writer: PipeWriter, job: F) -> Result<JoinHandle<Result<T>>>
where
    T: Send + 'static,
    F: FnOnce(&mut PipeWriter) -> Result<T> + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let mut writer = writer;
            match job(&mut writer) {
                Ok(value) => match writer.close() {
                    Ok(bytes) => {
                        debug!(producer = %thread_name, bytes, "artifact stream closed");
                        Ok(value)
                    }
                    Err(e) => {
                        debug!(producer = %thread_name, "consumer went away before end of stream");
                        Err(BundleError::Stream(e))
                    }
                },
                Err(_) if writer.is_disconnected() => {
                    debug!(producer = %thread_name, "consumer went away, producer stopping");
                    Err(BundleError::Stream(StreamError::ConsumerGone))
                }
                Err(e) => {
                    warn!(producer = %thread_name, error = %e, "artifact cannot be generated");
                    writer.fail(e.to_string());
                    Err(e)
                }
            }
        })
        .map_err(|e| BundleError::Build(format!("could not start producer thread: {}", e)))
}
