//! Output sinks for process stdout/stderr
//!
//! A sink is either a writer that output is copied into from the parent, or
//! a destination the child can be given directly (a file, or one of the
//! parent's standard streams). Direct destinations keep working after the
//! parent exits, which is what a background step needs.

use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::process::Stdio;
use std::sync::Arc;

#[derive(Clone)]
enum Target {
    Writer(Arc<Mutex<Box<dyn Write + Send>>>),
    File(Arc<File>),
    Stdout,
    Stderr,
}

/// Shared byte-stream sink that process output goes to
///
/// Clones share the same destination, so stdout and stderr of a step can be
/// bound to one sink and end up interleaved in a single stream.
#[derive(Clone)]
pub struct OutputSink {
    target: Target,
}

impl OutputSink {
    /// Wraps any writer; launched processes are piped and copied into it
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            target: Target::Writer(Arc::new(Mutex::new(Box::new(writer)))),
        }
    }

    /// Sink backed by an open file that launched processes write to directly
    #[must_use]
    pub fn file(file: File) -> Self {
        Self {
            target: Target::File(Arc::new(file)),
        }
    }

    /// Sink sharing the current process' stdout with launched processes
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            target: Target::Stdout,
        }
    }

    /// Sink sharing the current process' stderr with launched processes
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            target: Target::Stderr,
        }
    }

    /// Sink that drops everything
    #[must_use]
    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// Writes a chunk and flushes it
    pub fn write_chunk(&self, buf: &[u8]) -> io::Result<()> {
        match &self.target {
            Target::Writer(writer) => {
                let mut writer = writer.lock();
                writer.write_all(buf)?;
                writer.flush()
            }
            Target::File(file) => {
                let mut file: &File = file;
                file.write_all(buf)?;
                file.flush()
            }
            Target::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(buf)?;
                out.flush()
            }
            Target::Stderr => io::stderr().lock().write_all(buf),
        }
    }

    /// Returns a handle a child process can write to without the parent
    /// copying its output
    ///
    /// `None` means the sink is a plain writer and the output has to be
    /// piped and copied.
    ///
    /// # Errors
    ///
    /// Fails when a file-backed sink's descriptor cannot be duplicated.
    pub fn child_stdio(&self) -> io::Result<Option<Stdio>> {
        match &self.target {
            Target::Writer(_) => Ok(None),
            Target::File(file) => Ok(Some(Stdio::from(file.try_clone()?))),
            Target::Stdout => Ok(Some(Stdio::from(io::stdout()))),
            Target::Stderr => Ok(Some(Stdio::from(io::stderr()))),
        }
    }

    /// Returns true if both sinks write to the same destination
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (&self.target, &other.target) {
            (Target::Writer(a), Target::Writer(b)) => Arc::ptr_eq(a, b),
            (Target::File(a), Target::File(b)) => Arc::ptr_eq(a, b),
            (Target::Stdout, Target::Stdout) | (Target::Stderr, Target::Stderr) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.target {
            Target::Writer(_) => "writer",
            Target::File(_) => "file",
            Target::Stdout => "stdout",
            Target::Stderr => "stderr",
        };
        f.debug_struct("OutputSink").field("kind", &kind).finish()
    }
}

/// In-memory writer whose contents can be read back
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Creates an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer contents decoded lossily as UTF-8
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_writes_to_shared_buffer() {
        let buffer = SharedBuffer::new();
        let sink = OutputSink::new(buffer.clone());
        sink.write_chunk(b"hello ").unwrap();
        sink.clone().write_chunk(b"world").unwrap();
        assert_eq!(buffer.contents(), "hello world");
    }

    #[test]
    fn test_same_as() {
        let sink = OutputSink::discard();
        assert!(sink.same_as(&sink.clone()));
        assert!(!sink.same_as(&OutputSink::discard()));
        assert!(OutputSink::stderr().same_as(&OutputSink::stderr()));
        assert!(!OutputSink::stderr().same_as(&OutputSink::stdout()));
    }

    #[test]
    fn test_writer_sink_is_piped() {
        assert!(OutputSink::discard().child_stdio().unwrap().is_none());
    }

    #[test]
    fn test_file_sink_is_handed_to_child() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = OutputSink::file(file.reopen().unwrap());

        assert!(sink.child_stdio().unwrap().is_some());
        assert!(OutputSink::stderr().child_stdio().unwrap().is_some());

        sink.write_chunk(b"direct\n").unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "direct\n");
    }
}
