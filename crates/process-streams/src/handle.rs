//! The I/O surface of one running process

use futures::future;
use futures::sink::{Sink, SinkExt};
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::pin::Pin;

use crate::error::{Error, Result};
use crate::lines::lines;

/// A stream of elements read from a process
pub type OutputStream<R> = BoxStream<'static, Result<R>>;

/// A sink of elements written to a process's stdin
pub type InputSink<W> = Pin<Box<dyn Sink<W, Error = Error> + Send>>;

/// An element tagged with the output stream it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tagged<R> {
    /// Read from stdout
    Stdout(R),
    /// Read from stderr
    Stderr(R),
}

impl<R> Tagged<R> {
    /// Drop the tag
    pub fn into_inner(self) -> R {
        match self {
            Tagged::Stdout(r) | Tagged::Stderr(r) => r,
        }
    }

    /// Returns true if the element came from stdout
    pub fn is_stdout(&self) -> bool {
        matches!(self, Tagged::Stdout(_))
    }
}

/// A readable sequence paired with the process's input sink
pub struct Exchange<O, W> {
    /// Elements read from the process
    pub output: OutputStream<O>,
    /// Sink feeding the process's stdin
    pub input: InputSink<W>,
}

/// The stdin sink and stdout/stderr streams of one running process
///
/// All three share the lifetime of the process: once the owning
/// [`Subprocess::run`](crate::Subprocess::run) scope ends, or the process is
/// destroyed, the streams end and the sink rejects writes.
pub struct SubprocessHandle<R = Vec<u8>, W = Vec<u8>> {
    pid: Option<u32>,
    stdin: InputSink<W>,
    stdout: OutputStream<R>,
    stderr: OutputStream<R>,
}

impl<R: Send + 'static, W: Send + 'static> SubprocessHandle<R, W> {
    /// Bundle the streams of a process
    pub fn new(
        pid: Option<u32>,
        stdin: InputSink<W>,
        stdout: OutputStream<R>,
        stderr: OutputStream<R>,
    ) -> Self {
        Self {
            pid,
            stdin,
            stdout,
            stderr,
        }
    }

    /// The process ID, if the launcher reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The sink feeding the process's stdin
    pub fn stdin(&mut self) -> &mut InputSink<W> {
        &mut self.stdin
    }

    /// The process's stdout
    pub fn stdout(&mut self) -> &mut OutputStream<R> {
        &mut self.stdout
    }

    /// The process's stderr (empty when merged into stdout)
    pub fn stderr(&mut self) -> &mut OutputStream<R> {
        &mut self.stderr
    }

    /// Split into stdin, stdout and stderr
    pub fn into_parts(self) -> (InputSink<W>, OutputStream<R>, OutputStream<R>) {
        (self.stdin, self.stdout, self.stderr)
    }

    /// Interleave stdout and stderr by arrival, tagging each element
    pub fn into_exchange(self) -> Exchange<Tagged<R>, W> {
        let stdout = self.stdout.map(|r| r.map(Tagged::Stdout));
        let stderr = self.stderr.map(|r| r.map(Tagged::Stderr));
        Exchange {
            output: stream::select(stdout, stderr).boxed(),
            input: self.stdin,
        }
    }

    /// Interleave stdout and stderr by arrival without tags
    pub fn into_merged_exchange(self) -> Exchange<R, W> {
        Exchange {
            output: stream::select(self.stdout, self.stderr).boxed(),
            input: self.stdin,
        }
    }

    /// Pair stdout with the input sink
    ///
    /// Stderr stays open and is drained in the background of the returned
    /// stream, so the process cannot stall on a full stderr pipe.
    pub fn into_stdout_exchange(self) -> Exchange<R, W> {
        Exchange {
            output: with_drained(self.stdout, self.stderr),
            input: self.stdin,
        }
    }

    /// Pair stderr with the input sink, draining stdout in the background
    pub fn into_stderr_exchange(self) -> Exchange<R, W> {
        Exchange {
            output: with_drained(self.stderr, self.stdout),
            input: self.stdin,
        }
    }

    /// Transform every stdout and stderr element
    pub fn map_output<R2, F>(self, f: F) -> SubprocessHandle<R2, W>
    where
        R2: Send + 'static,
        F: FnMut(R) -> R2 + Clone + Send + 'static,
    {
        let mut on_stdout = f.clone();
        let mut on_stderr = f;
        SubprocessHandle {
            pid: self.pid,
            stdin: self.stdin,
            stdout: self.stdout.map(move |r| r.map(&mut on_stdout)).boxed(),
            stderr: self.stderr.map(move |r| r.map(&mut on_stderr)).boxed(),
        }
    }

    /// Accept a different input type, converting each element before writing
    pub fn with_input<W2, F>(self, mut f: F) -> SubprocessHandle<R, W2>
    where
        W2: Send + 'static,
        F: FnMut(W2) -> W + Send + 'static,
    {
        let stdin = self
            .stdin
            .with(move |w2| future::ready(Ok::<_, Error>(f(w2))));
        SubprocessHandle {
            pid: self.pid,
            stdin: Box::pin(stdin),
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

impl<W: Send + 'static> SubprocessHandle<Vec<u8>, W> {
    /// Decode stdout and stderr into lines
    pub fn into_lines(self) -> SubprocessHandle<String, W> {
        SubprocessHandle {
            pid: self.pid,
            stdin: self.stdin,
            stdout: lines(self.stdout),
            stderr: lines(self.stderr),
        }
    }
}

impl<R, W> fmt::Debug for SubprocessHandle<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubprocessHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

fn with_drained<R: Send + 'static>(
    kept: OutputStream<R>,
    ignored: OutputStream<R>,
) -> OutputStream<R> {
    let ignored = ignored.filter_map(|_| future::ready(None::<Result<R>>));
    stream::select(kept, ignored).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn chunks(items: &[&str]) -> OutputStream<Vec<u8>> {
        let items: Vec<Result<Vec<u8>>> = items.iter().map(|s| Ok(s.as_bytes().to_vec())).collect();
        stream::iter(items).boxed()
    }

    fn handle(stdout: &[&str], stderr: &[&str]) -> SubprocessHandle {
        let stdin: InputSink<Vec<u8>> =
            Box::pin(futures::sink::drain::<Vec<u8>>().sink_map_err(|never| match never {}));
        SubprocessHandle::new(Some(42), stdin, chunks(stdout), chunks(stderr))
    }

    #[smol_potat::test]
    async fn test_exchange_tags_both_streams() {
        let Exchange { output, .. } = handle(&["out"], &["err"]).into_exchange();
        let mut seen: Vec<Tagged<Vec<u8>>> = output.try_collect().await.unwrap();
        seen.sort_by_key(|t| !t.is_stdout());

        assert_eq!(
            seen,
            vec![Tagged::Stdout(b"out".to_vec()), Tagged::Stderr(b"err".to_vec())]
        );
    }

    #[smol_potat::test]
    async fn test_merged_exchange_keeps_every_element() {
        let Exchange { output, .. } = handle(&["a", "b"], &["c"]).into_merged_exchange();
        let mut seen: Vec<Vec<u8>> = output.try_collect().await.unwrap();
        seen.sort();

        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[smol_potat::test]
    async fn test_stderr_exchange_drops_stdout_elements() {
        let Exchange { output, .. } = handle(&["a", "b"], &["c"]).into_stderr_exchange();
        let seen: Vec<Vec<u8>> = output.try_collect().await.unwrap();

        assert_eq!(seen, vec![b"c".to_vec()]);
    }

    #[smol_potat::test]
    async fn test_map_output_and_with_input() {
        let mut handle = handle(&["x"], &[])
            .map_output(|chunk| chunk.len())
            .with_input(|line: String| line.into_bytes());

        assert_eq!(handle.pid(), Some(42));
        handle.stdin().send("ignored".to_string()).await.unwrap();
        let lens: Vec<usize> = handle.stdout().try_collect().await.unwrap();
        assert_eq!(lens, vec![1]);
    }

    #[smol_potat::test]
    async fn test_into_lines_splits_chunks() {
        let (_, stdout, _) = handle(&["one\ntw", "o\n"], &[]).into_lines().into_parts();
        let lines: Vec<String> = stdout.try_collect().await.unwrap();

        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }
}
