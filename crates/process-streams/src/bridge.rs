//! Adapters between raw OS byte streams and `Stream`/`Sink`
//!
//! Raw streams are wrapped in a [`Guarded`] slot before being handed out, so
//! the controller can close the underlying file descriptor from the outside
//! (on release or destroy) even while a consumer is parked on a read.

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use futures::sink::Sink;
use futures::stream::{self, Stream};
use futures::{FutureExt, ready};
use serde::{Deserialize, Serialize};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, Result};

/// Maximum size of a single chunk produced by [`read_source`]
pub const CHUNK_SIZE: usize = 8 * 1024;

/// When a [`read_source`] sequence ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadPolicy {
    /// Wait for data and end only at a true end-of-file
    #[default]
    UntilEof,
    /// End as soon as a pull finds no bytes immediately available
    ///
    /// A process that is merely slow to write will have its stream cut
    /// short under this policy.
    WhileAvailable,
}

/// Turn an async reader into a lazy, finite sequence of byte chunks
///
/// Each chunk holds at most [`CHUNK_SIZE`] bytes. End of input terminates the
/// sequence normally; a read error is yielded once and ends it.
pub fn read_source<R>(reader: R, policy: ReadPolicy) -> impl Stream<Item = Result<Vec<u8>>> + Send
where
    R: AsyncRead + Send + Unpin + 'static,
{
    stream::unfold(Some(reader), move |reader| async move {
        let mut reader = reader?;
        let mut buf = vec![0u8; CHUNK_SIZE];

        let read = loop {
            let read = match policy {
                ReadPolicy::UntilEof => reader.read(&mut buf).await,
                ReadPolicy::WhileAvailable => match reader.read(&mut buf).now_or_never() {
                    Some(read) => read,
                    None => return None,
                },
            };
            match read {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match read {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(reader)))
            }
            Err(e) => Some((Err(Error::Io(e)), None)),
        }
    })
}

/// Turn an async writer into a sink of byte chunks
///
/// See [`ByteSink`] for the write and flush guarantees.
pub fn write_sink<W>(writer: W) -> ByteSink<W>
where
    W: AsyncWrite + Unpin,
{
    ByteSink {
        writer,
        pending: None,
    }
}

/// Sink that writes every chunk in full and flushes it before accepting the next
///
/// Closing the sink closes the underlying writer, which the process observes
/// as end of input.
pub struct ByteSink<W> {
    writer: W,
    /// Chunk being written and how many of its bytes are already out
    pending: Option<(Vec<u8>, usize)>,
}

impl<W: AsyncWrite + Unpin> ByteSink<W> {
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        while let Some((chunk, written)) = &mut self.pending {
            if *written < chunk.len() {
                let n = ready!(Pin::new(&mut self.writer).poll_write(cx, &chunk[*written..]))
                    .map_err(Error::write_failed)?;
                if n == 0 {
                    self.pending = None;
                    return Poll::Ready(Err(Error::write_failed(io::ErrorKind::WriteZero.into())));
                }
                *written += n;
            } else {
                ready!(Pin::new(&mut self.writer).poll_flush(cx)).map_err(Error::write_failed)?;
                self.pending = None;
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite + Unpin> Sink<Vec<u8>> for ByteSink<W> {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.get_mut().poll_drain(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Vec<u8>) -> Result<()> {
        self.get_mut().pending = Some((item, 0));
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.writer)
            .poll_flush(cx)
            .map_err(Error::write_failed)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.writer)
            .poll_close(cx)
            .map_err(Error::write_failed)
    }
}

struct Slot<T> {
    io: Option<T>,
    /// Task parked on the stream, woken when the slot is closed
    waker: Option<Waker>,
}

fn lock<T>(slot: &Mutex<Slot<T>>) -> MutexGuard<'_, Slot<T>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Anything whose underlying OS stream can be closed from another task
trait Close: Send + Sync {
    fn close(&self);
}

impl<T: Send> Close for Mutex<Slot<T>> {
    fn close(&self) {
        let (io, waker) = {
            let mut slot = lock(self);
            (slot.io.take(), slot.waker.take())
        };
        drop(io);
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// A raw stream that can be closed out from under its consumer
///
/// After closing, reads report end-of-file and writes fail with a broken
/// pipe. Dropping the consumer side also closes the stream.
pub struct Guarded<T: Send + 'static> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T: Send + 'static> Guarded<T> {
    /// Wrap a stream, registering its closer in `streams`
    pub fn new(io: T, streams: &mut StreamSet) -> Self {
        let slot = Arc::new(Mutex::new(Slot {
            io: Some(io),
            waker: None,
        }));
        streams.closers.push(slot.clone());
        Self { slot }
    }

    /// A guard around a stream that does not exist
    pub fn closed() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                io: None,
                waker: None,
            })),
        }
    }

    /// Returns true once the underlying stream is gone
    pub fn is_closed(&self) -> bool {
        lock(&self.slot).io.is_none()
    }

    fn poll_io<R>(
        &self,
        cx: &mut Context<'_>,
        on_closed: impl FnOnce() -> io::Result<R>,
        poll: impl FnOnce(&mut T, &mut Context<'_>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>> {
        let mut slot = lock(&self.slot);
        let Slot { io, waker } = &mut *slot;
        match io {
            None => Poll::Ready(on_closed()),
            Some(io) => {
                let result = poll(io, cx);
                if result.is_pending() {
                    *waker = Some(cx.waker().clone());
                }
                result
            }
        }
    }
}

impl<T: Send + 'static> Drop for Guarded<T> {
    fn drop(&mut self) {
        self.slot.close();
    }
}

impl<T: AsyncRead + Send + Unpin + 'static> AsyncRead for Guarded<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_io(cx, || Ok(0), |io, cx| Pin::new(io).poll_read(cx, buf))
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "process input is closed")
}

impl<T: AsyncWrite + Send + Unpin + 'static> AsyncWrite for Guarded<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_io(
            cx,
            || Err(broken_pipe()),
            |io, cx| Pin::new(io).poll_write(cx, buf),
        )
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_io(cx, || Ok(()), |io, cx| Pin::new(io).poll_flush(cx))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = ready!(self.poll_io(cx, || Ok(()), |io, cx| Pin::new(io).poll_close(cx)));
        self.slot.close();
        Poll::Ready(result)
    }
}

/// The set of raw streams belonging to one process
///
/// Clones share the same streams; [`close_all`](Self::close_all) is
/// idempotent.
#[derive(Clone, Default)]
pub struct StreamSet {
    closers: Vec<Arc<dyn Close>>,
}

impl StreamSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Close every stream in the set, waking any parked consumer
    pub fn close_all(&self) {
        for closer in &self.closers {
            closer.close();
        }
    }
}
