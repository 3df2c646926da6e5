//! Bounded producer/consumer stream between a chunk source and an uploader.
//!
//! A background task pulls chunks from a [`ChunkSource`] and pushes them onto
//! a bounded channel. When the channel is full the producer suspends until
//! the consumer drains it; that is the only backpressure mechanism. The
//! consumer side presents the chunks as a sequential reader that returns
//! exactly the requested number of bytes, or fewer at end of stream.
//!
//! A single [`Frame::End`] sentinel marks both normal completion and
//! producer failure. A short stream is logged as incomplete but is not an
//! error at this level; the uploader decides what to make of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use ferry_core::{ProgressEvent, ProgressSink, RelayConfig};
use ferry_store::{ChunkSource, PayloadReader, TransferFault};

use crate::error::{Result, StreamError};
use crate::progress::ProgressThrottle;

/// Geometry and pacing of one stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub chunk_size: usize,
    pub queue_capacity: usize,
    /// Producer pauses after every this many chunks. Zero disables.
    pub throttle_every_chunks: u64,
    pub throttle_pause: Duration,
    pub progress_interval: Duration,
}

impl From<&RelayConfig> for StreamOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            queue_capacity: config.queue_capacity,
            throttle_every_chunks: config.throttle_every_chunks,
            throttle_pause: config.throttle_pause,
            progress_interval: config.progress_interval,
        }
    }
}

/// What travels through the bounded channel.
enum Frame {
    Chunk(Bytes),
    /// End of stream, or producer failure.
    End,
}

/// How the producer task finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerOutcome {
    /// Bytes pushed onto the queue.
    pub bytes: u64,
    pub chunks: u64,
    pub fault: Option<TransferFault>,
}

/// A remote object exposed as a sequential read interface.
///
/// [`close`](Self::close) must be awaited once on every exit path; dropping
/// an unclosed stream aborts the producer without waiting for it.
pub struct ChunkedTransferStream {
    name: String,
    declared_size: u64,
    chunk_size: usize,
    capacity: usize,
    receiver: mpsc::Receiver<Frame>,
    producer: Option<JoinHandle<ProducerOutcome>>,
    outcome: Option<ProducerOutcome>,
    /// Bytes dequeued but not yet handed out.
    overflow: BytesMut,
    received: u64,
    delivered: u64,
    finished: bool,
    closed: bool,
    hasher: blake3::Hasher,
    started: Instant,
    throttle: ProgressThrottle,
    progress: Arc<dyn ProgressSink>,
}

impl ChunkedTransferStream {
    /// Start the producer and return the consumer end.
    pub fn open<C: ChunkSource>(
        source: C,
        name: &str,
        declared_size: u64,
        options: &StreamOptions,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let chunk_size = options.chunk_size.max(1);
        let capacity = options.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let producer = tokio::spawn(produce(
            source,
            tx,
            name.to_string(),
            declared_size,
            chunk_size,
            options.throttle_every_chunks,
            options.throttle_pause,
        ));

        debug!(
            file = name,
            declared_size,
            chunk_size,
            capacity,
            "stream opened"
        );

        Self {
            name: name.to_string(),
            declared_size,
            chunk_size,
            capacity,
            receiver: rx,
            producer: Some(producer),
            outcome: None,
            overflow: BytesMut::new(),
            received: 0,
            delivered: 0,
            finished: false,
            closed: false,
            hasher: blake3::Hasher::new(),
            started: Instant::now(),
            throttle: ProgressThrottle::new(options.progress_interval),
            progress,
        }
    }

    /// Read exactly `size` bytes, or fewer at end of stream.
    pub async fn read(&mut self, size: usize) -> Bytes {
        if self.closed {
            return Bytes::new();
        }

        while self.overflow.len() < size && !self.finished {
            match self.receiver.recv().await {
                Some(Frame::Chunk(chunk)) => {
                    self.received += chunk.len() as u64;
                    self.overflow.extend_from_slice(&chunk);
                    self.notify_progress().await;
                }
                Some(Frame::End) | None => {
                    self.finished = true;
                    if self.received < self.declared_size {
                        warn!(
                            file = %self.name,
                            received = self.received,
                            declared = self.declared_size,
                            "incomplete stream"
                        );
                    }
                }
            }
        }

        let take = size.min(self.overflow.len());
        let out = self.overflow.split_to(take).freeze();
        self.hasher.update(&out);
        self.delivered += out.len() as u64;
        out
    }

    /// Drain the stream into one buffer.
    ///
    /// Unlike [`read`](Self::read), a short stream is an error here: callers
    /// that need the whole object (document edits) cannot work on a prefix.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let mut out = BytesMut::with_capacity(self.declared_size as usize);
        loop {
            let chunk = self.read(self.chunk_size).await;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }

        if (out.len() as u64) < self.declared_size {
            self.close().await;
            return Err(StreamError::Incomplete {
                received: out.len() as u64,
                declared: self.declared_size,
                fault: self.outcome.as_ref().and_then(|o| o.fault.clone()),
            });
        }
        Ok(out.freeze())
    }

    /// Read at most `limit` bytes from the front of the stream.
    pub async fn read_prefix(&mut self, limit: u64) -> Bytes {
        let mut out = BytesMut::new();
        while (out.len() as u64) < limit {
            let want = (limit - out.len() as u64).min(self.chunk_size as u64) as usize;
            let chunk = self.read(want).await;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }

    /// Cancel the producer if it is still running and wait for it to stop.
    ///
    /// Idempotent.
    pub async fn close(&mut self) {
        self.closed = true;
        self.receiver.close();

        let Some(handle) = self.producer.take() else {
            return;
        };
        if !handle.is_finished() {
            handle.abort();
        }
        match handle.await {
            Ok(outcome) => self.outcome = Some(outcome),
            Err(e) if e.is_cancelled() => {
                debug!(file = %self.name, "producer cancelled");
            }
            Err(e) => warn!(file = %self.name, error = %e, "producer task failed"),
        }
        self.overflow.clear();
    }

    /// Chunks currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Bytes handed out by `read` so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Whether the producer has signalled end of stream.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// How the producer ended. Available after `close`.
    pub fn outcome(&self) -> Option<&ProducerOutcome> {
        self.outcome.as_ref()
    }

    /// BLAKE3 digest of the bytes handed out so far, hex encoded.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.hasher.finalize().as_bytes())
    }

    async fn notify_progress(&mut self) {
        let now = Instant::now();
        if !self.throttle.ready(now) {
            return;
        }
        let event = ProgressEvent::bytes(
            &self.name,
            self.received,
            self.declared_size,
            now.saturating_duration_since(self.started),
        );
        if let Err(e) = self.progress.report(event).await {
            debug!(error = %e, "progress update dropped");
        }
    }
}

impl Drop for ChunkedTransferStream {
    fn drop(&mut self) {
        if let Some(handle) = self.producer.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl PayloadReader for ChunkedTransferStream {
    async fn read(&mut self, size: usize) -> Bytes {
        ChunkedTransferStream::read(self, size).await
    }

    fn declared_size(&self) -> u64 {
        self.declared_size
    }
}

/// Producer loop. Never pushes more than `declared_size` bytes.
async fn produce<C: ChunkSource>(
    mut source: C,
    tx: mpsc::Sender<Frame>,
    name: String,
    declared_size: u64,
    chunk_size: usize,
    throttle_every: u64,
    throttle_pause: Duration,
) -> ProducerOutcome {
    let mut sent: u64 = 0;
    let mut chunks: u64 = 0;

    let fault = loop {
        let remaining = declared_size.saturating_sub(sent);
        if remaining == 0 {
            break None;
        }
        let want = (chunk_size as u64).min(remaining) as usize;

        match source.next_chunk(want).await {
            Ok(Some(mut chunk)) => {
                if chunk.len() as u64 > remaining {
                    chunk.truncate(remaining as usize);
                }
                sent += chunk.len() as u64;
                chunks += 1;

                if tx.send(Frame::Chunk(chunk)).await.is_err() {
                    // Consumer closed; nobody is listening for the sentinel.
                    return ProducerOutcome {
                        bytes: sent,
                        chunks,
                        fault: None,
                    };
                }

                if throttle_every > 0 && chunks % throttle_every == 0 {
                    tokio::time::sleep(throttle_pause).await;
                }
            }
            Ok(None) => break None,
            Err(fault) => {
                warn!(file = %name, error = %fault, offset = sent, "stream producer failed");
                break Some(fault);
            }
        }
    };

    let _ = tx.send(Frame::End).await;
    ProducerOutcome {
        bytes: sent,
        chunks,
        fault,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{NoopSink, ProgressSinkError};
    use ferry_store::BytesChunkSource;
    use ferry_testkit::fixtures::CollectingSink;
    use ferry_testkit::generators::stream_geometry;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn options(chunk_size: usize, queue_capacity: usize) -> StreamOptions {
        StreamOptions {
            chunk_size,
            queue_capacity,
            throttle_every_chunks: 10,
            throttle_pause: Duration::from_millis(100),
            progress_interval: Duration::from_secs(12),
        }
    }

    fn pattern(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    fn noop() -> Arc<dyn ProgressSink> {
        Arc::new(NoopSink)
    }

    /// Source that yields a scripted number of times before each chunk and
    /// may fail once a number of calls have succeeded.
    struct JitterSource {
        data: Bytes,
        yields: Vec<u8>,
        calls: usize,
        fail_after_calls: Option<usize>,
    }

    #[async_trait]
    impl ChunkSource for JitterSource {
        async fn next_chunk(&mut self, chunk_size: usize) -> ferry_store::Result<Option<Bytes>> {
            let spins = self.yields.get(self.calls % self.yields.len().max(1)).copied();
            for _ in 0..spins.unwrap_or(0) {
                tokio::task::yield_now().await;
            }
            if self.fail_after_calls.is_some_and(|n| self.calls >= n) {
                return Err(TransferFault::other("connection reset"));
            }
            self.calls += 1;
            if self.data.is_empty() {
                return Ok(None);
            }
            let take = chunk_size.min(self.data.len());
            Ok(Some(self.data.split_to(take)))
        }
    }

    /// Source whose chunk requests are counted.
    struct CountingSource {
        inner: BytesChunkSource,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChunkSource for CountingSource {
        async fn next_chunk(&mut self, chunk_size: usize) -> ferry_store::Result<Option<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.next_chunk(chunk_size).await
        }
    }

    /// Source that never returns.
    struct HangingSource {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ChunkSource for HangingSource {
        async fn next_chunk(&mut self, _chunk_size: usize) -> ferry_store::Result<Option<Bytes>> {
            std::future::pending::<()>().await;
            Ok(None)
        }
    }

    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, event: ProgressEvent) -> std::result::Result<(), ProgressSinkError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ProgressSink for FailingSink {
        async fn report(&self, _event: ProgressEvent) -> std::result::Result<(), ProgressSinkError> {
            Err(ProgressSinkError("chat message deleted".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_exact_sizes_then_short_tail() {
        let data = pattern(25);
        let source = BytesChunkSource::new(data.clone());
        let mut stream = ChunkedTransferStream::open(source, "f", 25, &options(4, 2), noop());

        assert_eq!(stream.read(10).await, data.slice(0..10));
        assert_eq!(stream.read(10).await, data.slice(10..20));
        assert_eq!(stream.read(10).await, data.slice(20..25));
        assert!(stream.read(10).await.is_empty());
        assert!(stream.is_finished());

        stream.close().await;
        let outcome = stream.outcome().cloned().unwrap();
        assert_eq!(outcome.bytes, 25);
        assert_eq!(outcome.fault, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_delivers_past_declared_size() {
        let source = BytesChunkSource::new(pattern(100));
        let mut stream = ChunkedTransferStream::open(source, "f", 40, &options(16, 2), noop());

        let all = stream.read_to_end().await.unwrap();
        assert_eq!(all.len(), 40);
        stream.close().await;
        assert_eq!(stream.outcome().unwrap().bytes, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_failure_is_short_read_not_error() {
        let source = JitterSource {
            data: pattern(30),
            yields: vec![0],
            calls: 0,
            fail_after_calls: Some(1),
        };
        let mut stream = ChunkedTransferStream::open(source, "f", 30, &options(10, 2), noop());

        let first = stream.read(100).await;
        assert_eq!(first.len(), 10);
        assert!(stream.read(1).await.is_empty());

        stream.close().await;
        assert!(stream.outcome().unwrap().fault.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_to_end_reports_incomplete() {
        let source = BytesChunkSource::new(pattern(12));
        let mut stream = ChunkedTransferStream::open(source, "f", 20, &options(4, 2), noop());

        match stream.read_to_end().await {
            Err(StreamError::Incomplete {
                received, declared, ..
            }) => {
                assert_eq!(received, 12);
                assert_eq!(declared, 20);
            }
            other => panic!("expected incomplete, got {other:?}"),
        }
        assert!(stream.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_stops_producer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            inner: BytesChunkSource::new(pattern(1000)),
            calls: Arc::clone(&calls),
        };
        let mut stream = ChunkedTransferStream::open(source, "f", 1000, &options(10, 3), noop());

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        // Three queued plus one held by the suspended send.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(stream.queued(), 3);

        let _ = stream.read(10).await;
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        stream.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_and_awaits_producer() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = HangingSource {
            dropped: Arc::clone(&dropped),
        };
        let mut stream = ChunkedTransferStream::open(source, "f", 10, &options(4, 2), noop());
        tokio::task::yield_now().await;

        stream.close().await;
        assert!(dropped.load(Ordering::SeqCst));
        assert!(stream.read(4).await.is_empty());

        // Second close is a no-op.
        stream.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_pause_every_ten_chunks() {
        let source = BytesChunkSource::new(pattern(200));
        let mut stream = ChunkedTransferStream::open(source, "f", 200, &options(10, 4), noop());

        let start = Instant::now();
        let all = stream.read_to_end().await.unwrap();
        assert_eq!(all.len(), 200);
        // 20 chunks, a 100ms pause after the 10th and the 20th.
        assert!(start.elapsed() >= Duration::from_millis(200));
        stream.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_rate_limited() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let source = BytesChunkSource::new(pattern(64));
        let mut stream = ChunkedTransferStream::open(
            source,
            "f",
            64,
            &options(8, 2),
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
        );

        let _ = stream.read_to_end().await.unwrap();
        stream.close().await;

        let events = sink.events.lock().unwrap();
        // All chunks arrive well within one interval.
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Bytes { total: 64, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_delivered_in_order_before_read_returns() {
        let sink = Arc::new(CollectingSink::new());
        let source = BytesChunkSource::new(pattern(80));
        let mut opts = options(8, 2);
        opts.progress_interval = Duration::ZERO;
        let mut stream = ChunkedTransferStream::open(
            source,
            "f",
            80,
            &opts,
            Arc::clone(&sink) as Arc<dyn ProgressSink>,
        );

        assert_eq!(stream.read_to_end().await.unwrap().len(), 80);
        // No yielding: every event must already be recorded.
        let transferred: Vec<u64> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Bytes { transferred, .. } => Some(*transferred),
                _ => None,
            })
            .collect();
        assert_eq!(transferred, (1..=10).map(|i| i * 8).collect::<Vec<u64>>());
        stream.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sink_does_not_fail_transfer() {
        let source = BytesChunkSource::new(pattern(32));
        let mut stream =
            ChunkedTransferStream::open(source, "f", 32, &options(8, 2), Arc::new(FailingSink));
        assert_eq!(stream.read_to_end().await.unwrap().len(), 32);
        stream.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_digest_matches_delivered_bytes() {
        let data = pattern(50);
        let source = BytesChunkSource::new(data.clone());
        let mut stream = ChunkedTransferStream::open(source, "f", 50, &options(7, 2), noop());
        let _ = stream.read_to_end().await.unwrap();
        stream.close().await;

        assert_eq!(stream.digest_hex(), blake3::hash(&data).to_hex().to_string());
        assert_eq!(stream.delivered(), 50);
    }

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
    }

    proptest! {
        #[test]
        fn test_full_read_is_byte_exact(
            (object_size, chunk_size, capacity) in stream_geometry(),
            read_sizes in prop::collection::vec(1usize..500, 1..16),
        ) {
            let data = pattern(object_size);
            let out = paused_runtime().block_on(async {
                let source = BytesChunkSource::new(data.clone());
                let mut stream = ChunkedTransferStream::open(
                    source,
                    "p",
                    object_size as u64,
                    &options(chunk_size, capacity),
                    noop(),
                );
                let mut out = Vec::new();
                let mut i = 0;
                loop {
                    let size = read_sizes[i % read_sizes.len()];
                    i += 1;
                    let chunk = stream.read(size).await;
                    if chunk.is_empty() {
                        break;
                    }
                    if chunk.len() < size {
                        // Only the tail may be short.
                        assert!(stream.read(1).await.is_empty());
                        out.extend_from_slice(&chunk);
                        break;
                    }
                    out.extend_from_slice(&chunk);
                }
                stream.close().await;
                out
            });
            prop_assert_eq!(&out[..], &data[..]);
        }

        #[test]
        fn test_queue_never_exceeds_capacity(
            object_size in 1usize..2000,
            chunk_size in 1usize..100,
            capacity in 1usize..6,
            producer_yields in prop::collection::vec(0u8..4, 1..8),
            consumer_yields in prop::collection::vec(0u8..4, 1..8),
        ) {
            let max_seen = paused_runtime().block_on(async {
                let source = JitterSource {
                    data: pattern(object_size),
                    yields: producer_yields,
                    calls: 0,
                    fail_after_calls: None,
                };
                let mut stream = ChunkedTransferStream::open(
                    source,
                    "q",
                    object_size as u64,
                    &options(chunk_size, capacity),
                    noop(),
                );
                let mut max_seen = 0;
                let mut i = 0;
                loop {
                    for _ in 0..consumer_yields[i % consumer_yields.len()] {
                        tokio::task::yield_now().await;
                    }
                    i += 1;
                    max_seen = max_seen.max(stream.queued());
                    if stream.read(chunk_size).await.is_empty() {
                        break;
                    }
                }
                stream.close().await;
                max_seen
            });
            prop_assert!(max_seen <= capacity);
        }
    }
}
