//! Capture-and-forward output sink for one job execution.
//!
//! [`install`] hands the compute body a pair of [`CaptureWriter`]s in place
//! of its stdout and stderr. Every complete, non-blank line written to
//! either is appended to the job transcript, offered to the job's log
//! queue, and passed through to the original destination. The returned
//! [`SinkGuard`] detaches capture when dropped; after that the writers
//! only pass through.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::queue::LogProducer;

/// Which output destination a writer replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

struct SinkState {
    /// `None` once detached. Dropping the producer closes the queue.
    producer: Mutex<Option<LogProducer>>,
    transcript: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SinkState {
    fn capture(&self, line: &str) -> bool {
        let producer = lock(&self.producer);
        let Some(producer) = producer.as_ref() else {
            return false;
        };
        lock(&self.transcript).push(line.to_string());
        producer.offer(line);
        true
    }
}

/// Line-buffered writer standing in for one of the body's output streams.
pub struct CaptureWriter {
    stream: Stream,
    state: Arc<SinkState>,
    pending: Vec<u8>,
    original: Box<dyn Write + Send>,
}

impl CaptureWriter {
    fn emit(&mut self, raw: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(());
        }
        self.state.capture(line);
        let passed = self
            .original
            .write_all(line.as_bytes())
            .and_then(|()| self.original.write_all(b"\n"));
        if let Err(e) = passed {
            tracing::debug!(stream = ?self.stream, error = %e, "Pass-through write failed");
        }
        Ok(())
    }

    fn emit_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut self.pending);
        self.emit(&rest)
    }
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit_pending()?;
        if let Err(e) = self.original.flush() {
            tracing::debug!(stream = ?self.stream, error = %e, "Pass-through flush failed");
        }
        Ok(())
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// The two writers handed to the compute body.
pub struct CrewOutput {
    pub stdout: CaptureWriter,
    pub stderr: CaptureWriter,
}

/// Keeps capture active. Detaches on drop.
pub struct SinkGuard {
    state: Arc<SinkState>,
}

impl SinkGuard {
    /// Stop capturing and close the job's queue. Idempotent.
    pub fn detach(&self) {
        lock(&self.state.producer).take();
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state.producer).is_some()
    }

    /// The transcript captured so far, in write order.
    pub fn logs(&self) -> Vec<String> {
        lock(&self.state.transcript).clone()
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Install capture over the process's stdout and stderr.
pub fn install(producer: LogProducer) -> (SinkGuard, CrewOutput) {
    install_with(
        producer,
        Box::new(io::stdout()),
        Box::new(io::stderr()),
    )
}

/// Install capture with explicit pass-through destinations.
pub fn install_with(
    producer: LogProducer,
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
) -> (SinkGuard, CrewOutput) {
    let state = Arc::new(SinkState {
        producer: Mutex::new(Some(producer)),
        transcript: Mutex::new(Vec::new()),
    });
    let writer = |stream: Stream, original: Box<dyn Write + Send>| CaptureWriter {
        stream,
        state: Arc::clone(&state),
        pending: Vec::new(),
        original,
    };
    let output = CrewOutput {
        stdout: writer(Stream::Stdout, stdout),
        stderr: writer(Stream::Stderr, stderr),
    };
    (SinkGuard { state }, output)
}
