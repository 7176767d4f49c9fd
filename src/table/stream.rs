//! Byte streams behind stdio handles
//!
//! Streams are non-blocking from the guest's point of view: a read with no
//! data pending fails with `WouldBlock` (surfaced as `again`) and waiting is
//! done through `poll_oneoff`, which asks each stream for its [`Readiness`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Pipe capacity used by [`pipe`] when none is given
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Whether a stream can make progress without blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Ready; the payload is the number of bytes that can move right now
    /// (0 when unknown)
    Ready(u64),
    /// Would block
    Pending,
    /// The other side is gone
    HangUp,
}

/// Source of bytes for a guest's input handle
pub trait InputStream: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn readiness(&self) -> Readiness;
}

/// Sink for a guest's output handle
pub trait OutputStream: Send {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn flush(&mut self) -> io::Result<()>;
    fn readiness(&self) -> Readiness;
}

// ============================================================================
// Null and in-memory streams
// ============================================================================

/// Always at end of file
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInput;

impl InputStream for NullInput {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn readiness(&self) -> Readiness {
        Readiness::Ready(0)
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

impl OutputStream for NullOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        Readiness::Ready(0)
    }
}

/// Fixed input supplied up front
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    data: VecDeque<u8>,
}

impl MemoryInput {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into().into(),
        }
    }
}

impl InputStream for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }

    fn readiness(&self) -> Readiness {
        Readiness::Ready(self.data.len() as u64)
    }
}

/// Collects output in a buffer the embedder can inspect
///
/// Clones share the buffer, so keep one and hand the other to the instance.
#[derive(Debug, Clone, Default)]
pub struct CaptureOutput {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    /// Take the output, leaving the buffer empty
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl OutputStream for CaptureOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        Readiness::Ready(0)
    }
}

// ============================================================================
// Pipes
// ============================================================================

struct PipeBuffer {
    buffer: VecDeque<u8>,
    capacity: usize,
    write_closed: bool,
    read_closed: bool,
}

impl PipeBuffer {
    fn lock(shared: &Mutex<PipeBuffer>) -> std::sync::MutexGuard<'_, PipeBuffer> {
        shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read end of a [`pipe`]
pub struct PipeReader {
    shared: Arc<Mutex<PipeBuffer>>,
}

/// Write end of a [`pipe`]
pub struct PipeWriter {
    shared: Arc<Mutex<PipeBuffer>>,
}

/// A bounded in-process byte pipe
///
/// Either end may live in the embedder; dropping an end closes it, and the
/// other end then sees end-of-file (reader) or `BrokenPipe` (writer).
pub fn pipe(capacity: usize) -> (PipeReader, PipeWriter) {
    let shared = Arc::new(Mutex::new(PipeBuffer {
        buffer: VecDeque::with_capacity(capacity.min(DEFAULT_PIPE_CAPACITY)),
        capacity,
        write_closed: false,
        read_closed: false,
    }));
    (
        PipeReader {
            shared: shared.clone(),
        },
        PipeWriter { shared },
    )
}

impl PipeReader {
    /// Read what is buffered without going through the guest
    pub fn read_available(&mut self) -> Vec<u8> {
        PipeBuffer::lock(&self.shared).buffer.drain(..).collect()
    }
}

impl InputStream for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = PipeBuffer::lock(&self.shared);
        if pipe.buffer.is_empty() {
            if pipe.write_closed {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "pipe empty"));
        }
        pipe.buffer.read(buf)
    }

    fn readiness(&self) -> Readiness {
        let pipe = PipeBuffer::lock(&self.shared);
        if !pipe.buffer.is_empty() {
            Readiness::Ready(pipe.buffer.len() as u64)
        } else if pipe.write_closed {
            Readiness::HangUp
        } else {
            Readiness::Pending
        }
    }
}

impl OutputStream for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = PipeBuffer::lock(&self.shared);
        if pipe.read_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe read end closed"));
        }
        let available = pipe.capacity - pipe.buffer.len();
        if available == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "pipe full"));
        }
        let n = buf.len().min(available);
        pipe.buffer.extend(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        let pipe = PipeBuffer::lock(&self.shared);
        if pipe.read_closed {
            return Readiness::HangUp;
        }
        match pipe.capacity - pipe.buffer.len() {
            0 => Readiness::Pending,
            n => Readiness::Ready(n as u64),
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        PipeBuffer::lock(&self.shared).read_closed = true;
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        PipeBuffer::lock(&self.shared).write_closed = true;
    }
}

// ============================================================================
// Host stdio
// ============================================================================

/// The host process's stdin
#[derive(Debug, Default)]
pub struct HostStdin;

impl InputStream for HostStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::stdin().lock().read(buf)
    }

    fn readiness(&self) -> Readiness {
        Readiness::Ready(0)
    }
}

/// The host process's stdout
#[derive(Debug, Default)]
pub struct HostStdout;

impl OutputStream for HostStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()
    }

    fn readiness(&self) -> Readiness {
        Readiness::Ready(0)
    }
}

/// The host process's stderr
#[derive(Debug, Default)]
pub struct HostStderr;

impl OutputStream for HostStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().lock().flush()
    }

    fn readiness(&self) -> Readiness {
        Readiness::Ready(0)
    }
}
