// pixpack/src/archive/mod.rs
//! Incremental zip output.
//!
//! [`ArchiveStreamer`] writes entries straight through to its sink as they are
//! appended; nothing but the compressor's window and the central directory
//! records stay in memory. The sink never needs to seek, so it can be the
//! response body itself (see [`ChannelSink`]).

use crate::core::ArchiveError;
use bytes::Bytes;
use std::collections::HashSet;
use std::io::{self, Write};
use tokio::sync::mpsc;
use zip::write::{SimpleFileOptions, StreamWriter};
use zip::{CompressionMethod, ZipWriter};

const MAX_COMPRESSION: i64 = 9;

pub struct ArchiveStreamer<W: Write> {
    writer: Option<ZipWriter<StreamWriter<W>>>,
    names: HashSet<String>,
    bytes_written: u64,
}

impl<W: Write> ArchiveStreamer<W> {
    pub fn open(sink: W) -> Self {
        Self {
            writer: Some(ZipWriter::new_stream(sink)),
            names: HashSet::new(),
            bytes_written: 0,
        }
    }

    /// Adds one entry. Names must be unique within the archive.
    pub fn append(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let writer = self.writer.as_mut().ok_or(ArchiveError::Finalized)?;

        if self.names.contains(name) {
            return Err(ArchiveError::DuplicateName(name.to_string()));
        }

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(MAX_COMPRESSION));

        writer
            .start_file(name, options)
            .map_err(|e| ArchiveError::Write(e.into()))?;
        writer.write_all(bytes)?;

        self.names.insert(name.to_string());
        self.bytes_written += bytes.len() as u64;

        log::debug!("Appended archive entry {} ({} bytes)", name, bytes.len());

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.writer.is_none()
    }

    /// Writes the central directory and flushes the sink. Only the first call
    /// does anything; later calls fail with [`ArchiveError::Finalized`].
    pub fn finalize(&mut self) -> Result<(), ArchiveError> {
        let writer = self.writer.take().ok_or(ArchiveError::Finalized)?;

        let mut sink = writer
            .finish()
            .map_err(|e| ArchiveError::Finalize(e.to_string()))?;
        sink.flush()
            .map_err(|e| ArchiveError::Finalize(e.to_string()))?;

        log::debug!(
            "Finalized archive with {} entries ({} bytes before compression)",
            self.names.len(),
            self.bytes_written
        );

        Ok(())
    }
}

/// Blocking [`Write`] end of an async byte channel.
///
/// Every write becomes one `Bytes` chunk on the channel, so wrap it in a
/// `BufWriter` to control chunk size. Must be driven from a blocking context
/// (`spawn_blocking`, rayon); a full channel blocks the writer until the
/// reader catches up.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<io::Result<Bytes>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Another handle onto the same channel, for pushing a terminal error
    /// after the archive side is done.
    pub fn sender(&self) -> mpsc::Sender<io::Result<Bytes>> {
        self.tx.clone()
    }
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive receiver dropped"))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
