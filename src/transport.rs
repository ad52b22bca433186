//! Byte pipes to a coqtop process.
//!
//! A [`Channel`] is whatever the engine talks XML over: normally the stdin and
//! stdout of a spawned child, but any reader/writer pair works. Once handed
//! to the engine it becomes a [`Connection`], whose pipes and process handle
//! sit behind separate locks so the process can be terminated while another
//! thread is blocked reading.

use crate::error::{Error, Result};
use crate::protocol::StreamDecoder;
use log::{debug, warn};
use std::io::{Read, Write};
use std::process::Child;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Size of a single read from coqtop's output.
pub const READ_CHUNK: usize = 0x4000;

/// The reader/writer pair the protocol runs over.
pub struct Channel {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    child: Option<Child>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("child", &self.child.as_ref().map(Child::id))
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Wrap an arbitrary reader (coqtop's output) and writer (its input).
    pub fn new(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            reader,
            writer,
            child: None,
        }
    }

    /// Take over the piped stdin/stdout of a spawned coqtop.
    pub fn from_child(mut child: Child) -> Result<Self> {
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        match (stdin, stdout) {
            (Some(stdin), Some(stdout)) => Ok(Self {
                reader: Box::new(stdout),
                writer: Box::new(stdin),
                child: Some(child),
            }),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                Err(Error::Protocol(
                    "coqtop was spawned without piped stdin/stdout".to_string(),
                ))
            }
        }
    }
}

/// Pipes plus the decoder accumulating what has been read from them.
pub(crate) struct Pipes {
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    pub(crate) decoder: StreamDecoder,
    buffer: Box<[u8]>,
}

impl Pipes {
    pub(crate) fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    /// Read one chunk into the decoder. `Ok(0)` means end of stream.
    pub(crate) fn read_chunk(&mut self) -> std::io::Result<usize> {
        let n = self.reader.read(&mut self.buffer)?;
        self.decoder.push(&self.buffer[..n]);
        Ok(n)
    }
}

/// A live connection owned by the engine.
pub(crate) struct Connection {
    pipes: Mutex<Pipes>,
    process: Mutex<Option<Child>>,
}

impl Connection {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            pipes: Mutex::new(Pipes {
                reader: channel.reader,
                writer: channel.writer,
                decoder: StreamDecoder::new(),
                buffer: vec![0u8; READ_CHUNK].into_boxed_slice(),
            }),
            process: Mutex::new(channel.child),
        }
    }

    pub(crate) fn lock_pipes(&self) -> MutexGuard<'_, Pipes> {
        self.pipes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kill and reap the child process, if there is one.
    pub(crate) fn terminate(&self) {
        let child = self
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            let pid = child.id();
            if let Err(e) = child.kill() {
                debug!("[TRANSPORT] kill({}) failed: {}", pid, e);
            }
            match child.wait() {
                Ok(status) => debug!("[TRANSPORT] coqtop {} exited with {}", pid, status),
                Err(e) => warn!("[TRANSPORT] Failed to reap coqtop {}: {}", pid, e),
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.terminate();
    }
}
