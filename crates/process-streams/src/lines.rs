//! Line decoding on top of raw byte chunks

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::handle::OutputStream;

struct LineState {
    chunks: OutputStream<Vec<u8>>,
    partial: Vec<u8>,
    ready: VecDeque<String>,
    /// Error to yield once the lines before it are out
    error: Option<Error>,
    done: bool,
}

impl LineState {
    fn split_complete_lines(&mut self) {
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            self.ready.push_back(decode(line));
        }
    }

    fn flush_partial(&mut self) {
        if !self.partial.is_empty() {
            let last = std::mem::take(&mut self.partial);
            self.ready.push_back(decode(last));
        }
    }
}

fn decode(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}

/// Re-chunk a byte stream into lines
///
/// Lines split on `\n` with a trailing `\r` removed; invalid UTF-8 is
/// replaced. An unterminated last line is still emitted at end of stream,
/// and before an error, which ends the stream.
pub fn lines<S>(chunks: S) -> OutputStream<String>
where
    S: Stream<Item = Result<Vec<u8>>> + Send + 'static,
{
    let state = LineState {
        chunks: chunks.boxed(),
        partial: Vec::new(),
        ready: VecDeque::new(),
        error: None,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if let Some(e) = state.error.take() {
                return Some((Err(e), state));
            }
            if state.done {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    state.partial.extend_from_slice(&chunk);
                    state.split_complete_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.flush_partial();
                    state.error = Some(e);
                }
                None => {
                    state.done = true;
                    state.flush_partial();
                }
            }
        }
    })
    .boxed()
}
