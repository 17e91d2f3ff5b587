//! Byte stream adapters
//!
//! Backends expose bytes in different shapes: async readers, blocking readers,
//! SDK body streams and push-style upload APIs. Everything here converts those
//! into one pull-based [`ByteStream`] of bounded chunks, or drains such a stream
//! into a push-style [`ChunkSink`]. At most one chunk is buffered per stage, so a
//! transfer holds O(chunk size) memory regardless of payload size.

use std::io::Read;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::progress::{Progress, ProgressTracker};

/// Default chunk size for every backend (8 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Lazy sequence of byte chunks
///
/// Chunk boundaries carry no meaning; only the concatenated content does. A
/// failed item ends the stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Stream holding a single in-memory payload
pub fn from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    if data.is_empty() {
        Box::pin(stream::empty())
    } else {
        Box::pin(stream::once(async move { Ok(data) }))
    }
}

/// Pull chunks of exactly `chunk_size` bytes (the last may be shorter) from an
/// async reader.
pub fn from_async_read<R>(reader: R, chunk_size: usize) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let chunk_size = chunk_size.max(1);
    Box::pin(stream::try_unfold(reader, move |mut reader| async move {
        let mut buf = BytesMut::with_capacity(chunk_size);
        while buf.len() < chunk_size {
            if reader.read_buf(&mut buf).await? == 0 {
                break;
            }
        }
        if buf.is_empty() {
            Ok::<_, Error>(None)
        } else {
            Ok(Some((buf.freeze(), reader)))
        }
    }))
}

/// Drive a blocking reader on the blocking thread pool.
///
/// The reader thread hands over one chunk at a time and stops as soon as the
/// stream is dropped, which also drops (and closes) the reader. A reader that
/// panics ends the stream with an error, never with a clean end of input.
pub fn from_blocking_read<R>(reader: R, chunk_size: usize) -> ByteStream
where
    R: Read + Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes>>(1);

    let reader_task = tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        loop {
            let mut buf = vec![0u8; chunk_size];
            match read_full(&mut reader, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    if tx.blocking_send(Ok(Bytes::from(buf))).is_err() {
                        tracing::debug!("reader dropped, stopping blocking read");
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e.into()));
                    break;
                }
            }
        }
    });

    Box::pin(stream::unfold(
        (rx, Some(reader_task)),
        |(mut rx, mut reader_task)| async move {
            if let Some(item) = rx.recv().await {
                return Some((item, (rx, reader_task)));
            }
            // channel closed: only a reader that finished normally means end of input
            match reader_task.take()?.await {
                Ok(()) => None,
                Err(e) => Some((
                    Err(Error::Io(std::io::Error::other(format!(
                        "blocking reader failed: {e}"
                    )))),
                    (rx, None),
                )),
            }
        },
    ))
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Re-slice a stream into chunks of exactly `chunk_size` bytes (the last may
/// be shorter). Empty input chunks are dropped.
pub fn rechunk(source: ByteStream, chunk_size: usize) -> ByteStream {
    struct State {
        source: ByteStream,
        pending: BytesMut,
        exhausted: bool,
    }

    let chunk_size = chunk_size.max(1);
    let state = State {
        source,
        pending: BytesMut::new(),
        exhausted: false,
    };

    Box::pin(stream::try_unfold(state, move |mut state| async move {
        loop {
            if state.pending.len() >= chunk_size {
                let chunk = state.pending.split_to(chunk_size).freeze();
                return Ok::<_, Error>(Some((chunk, state)));
            }
            if state.exhausted {
                if state.pending.is_empty() {
                    return Ok(None);
                }
                let chunk = state.pending.split().freeze();
                return Ok(Some((chunk, state)));
            }
            match state.source.next().await {
                Some(chunk) => state.pending.extend_from_slice(&chunk?),
                None => state.exhausted = true,
            }
        }
    }))
}

/// Report cumulative progress as chunks pass through.
///
/// The reporter sees every chunk exactly once; the final report equals the
/// number of bytes that flowed through. A failure ends the stream without a
/// final report.
pub fn with_progress(
    source: ByteStream,
    total: Option<u64>,
    progress: Option<Progress>,
) -> ByteStream {
    let Some(reporter) = progress else {
        return source;
    };
    let tracker = ProgressTracker::new(total, reporter);

    Box::pin(stream::unfold(
        Some((source, tracker)),
        |state| async move {
            let (mut source, mut tracker) = state?;
            match source.next().await {
                Some(Ok(chunk)) => {
                    tracker.advance(chunk.len() as u64);
                    Some((Ok(chunk), Some((source, tracker))))
                }
                Some(Err(e)) => Some((Err(e), None)),
                None => {
                    tracker.finish();
                    None
                }
            }
        },
    ))
}

/// Read a whole stream into memory. Intended for small payloads and tests.
pub async fn collect(mut source: ByteStream) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = source.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Push-style destination for a stream of chunks
///
/// Implementations stage data somewhere invisible to readers and only expose it
/// on [`commit`](ChunkSink::commit).
#[async_trait]
pub trait ChunkSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()>;

    /// Make the staged content visible at its destination
    async fn commit(&mut self) -> Result<()>;

    /// Discard staged content. Must be safe to call after a failed commit.
    async fn abort(&mut self);
}

/// Feed every chunk of `source` into `sink`, then commit.
///
/// Any failure, whether from the source, a chunk write or the commit itself,
/// aborts the sink before the error is returned. Returns the byte count.
pub async fn drain_into<S>(mut source: ByteStream, sink: &mut S) -> Result<u64>
where
    S: ChunkSink + ?Sized,
{
    let mut written = 0u64;
    let pumped: Result<()> = async {
        while let Some(chunk) = source.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            sink.write_chunk(chunk).await?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = pumped {
        sink.abort().await;
        return Err(e);
    }
    if let Err(e) = sink.commit().await {
        sink.abort().await;
        return Err(e);
    }
    Ok(written)
}
