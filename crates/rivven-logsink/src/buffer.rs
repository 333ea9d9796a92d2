//! Generic "buffer, flush on trigger" engine
//!
//! `BatchBuffer` knows nothing about databases. It collects items, cuts a
//! generation when the capacity is reached or a flush is requested, and hands
//! each generation to an injected [`BatchHandler`].
//!
//! Locking:
//! - `state` guards the current generation and the closed flag
//! - `flush_gate` admits one flush at a time
//!
//! The gate is acquired while `state` is still held and only then is the
//! generation cut, so generations reach the handler in the order they were
//! cut. Items
//! submitted while a flush is running go into the next generation. A caller
//! cancelled while waiting for the gate leaves the generation buffered.

use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

/// Receives one generation of buffered items per call
#[async_trait]
pub trait BatchHandler<T>: Send + Sync {
    /// Flush a non-empty batch. The batch is gone afterwards whatever the
    /// outcome.
    async fn flush(&self, batch: Vec<T>) -> Result<()>;

    /// Called when a flush of `events` items was cancelled before it
    /// returned. The items are gone.
    fn abandoned(&self, events: usize) {
        let _ = events;
    }
}

/// Observable lifecycle state of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkState {
    /// Accepting items, no flush running
    Idle,
    /// A flush is running
    Flushing,
    /// Shut down; no further items are accepted
    Closed,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Flushing => write!(f, "flushing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct Generation<T> {
    items: Vec<T>,
    closed: bool,
}

/// Bounded buffer flushed through a [`BatchHandler`]
pub struct BatchBuffer<T, H> {
    state: Mutex<Generation<T>>,
    flush_gate: Arc<Mutex<()>>,
    flushing: AtomicBool,
    terminated: AtomicBool,
    capacity: usize,
    handler: H,
}

impl<T, H> BatchBuffer<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T>,
{
    /// Create a buffer that flushes every `capacity` items.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, handler: H) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(Generation {
                items: Vec::with_capacity(capacity),
                closed: false,
            }),
            flush_gate: Arc::new(Mutex::new(())),
            flushing: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            capacity,
            handler,
        }
    }

    /// Flush trigger size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The injected handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Current lifecycle state
    pub fn state(&self) -> SinkState {
        if self.terminated.load(Ordering::Acquire) {
            SinkState::Closed
        } else if self.flushing.load(Ordering::Acquire) {
            SinkState::Flushing
        } else {
            SinkState::Idle
        }
    }

    /// Number of items waiting in the current generation
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    /// Whether the current generation is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Append an item; flushes when the generation reaches capacity.
    ///
    /// Returns `Error::Closed` once shutdown has begun. The error of a
    /// capacity-triggered flush is returned to this caller.
    pub async fn submit(&self, item: T) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }

        state.items.push(item);
        if state.items.len() < self.capacity {
            return Ok(());
        }

        // a cancelled wait leaves the generation in place
        let _gate = self.flush_gate.clone().lock_owned().await;
        let batch = std::mem::replace(&mut state.items, Vec::with_capacity(self.capacity));
        drop(state);

        self.run(batch).await
    }

    /// Flush whatever is buffered. A no-op when empty.
    pub async fn flush(&self) -> Result<()> {
        let Some((batch, _gate)) = self.cut(false).await? else {
            return Ok(());
        };
        self.run(batch).await
    }

    /// Stop accepting items, wait for any running flush, then flush the
    /// final generation.
    ///
    /// Calling it again after the first shutdown completed is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let Some((batch, _gate)) = self.cut(true).await? else {
            return Ok(());
        };

        let result = if batch.is_empty() {
            Ok(())
        } else {
            self.run(batch).await
        };
        self.terminated.store(true, Ordering::Release);
        result
    }

    /// Cut the current generation and acquire the flush gate.
    ///
    /// `None` means there is nothing to do: an empty buffer for a plain
    /// flush, or a repeated shutdown.
    async fn cut(&self, close: bool) -> Result<Option<(Vec<T>, OwnedMutexGuard<()>)>> {
        let mut state = self.state.lock().await;

        if state.closed {
            if close {
                // wait for the first shutdown to finish its final flush
                drop(state);
                let _gate = self.flush_gate.lock().await;
                return Ok(None);
            }
            return Err(Error::Closed);
        }

        if !close && state.items.is_empty() {
            return Ok(None);
        }

        let gate = self.flush_gate.clone().lock_owned().await;
        if close {
            state.closed = true;
        }
        let batch = std::mem::take(&mut state.items);
        Ok(Some((batch, gate)))
    }

    async fn run(&self, batch: Vec<T>) -> Result<()> {
        let _flushing = FlushingGuard::enter(&self.flushing);
        let mut abandon = AbandonGuard::new(&self.handler, batch.len());
        let result = self.handler.flush(batch).await;
        abandon.disarm();
        result
    }
}

/// Tells the handler about a batch whose flush future was dropped
struct AbandonGuard<'a, T, H: BatchHandler<T>> {
    handler: &'a H,
    events: usize,
    armed: bool,
    _item: PhantomData<fn() -> T>,
}

impl<'a, T, H: BatchHandler<T>> AbandonGuard<'a, T, H> {
    fn new(handler: &'a H, events: usize) -> Self {
        Self {
            handler,
            events,
            armed: true,
            _item: PhantomData,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T, H: BatchHandler<T>> Drop for AbandonGuard<'_, T, H> {
    fn drop(&mut self) {
        if self.armed {
            self.handler.abandoned(self.events);
        }
    }
}

struct FlushingGuard<'a>(&'a AtomicBool);

impl<'a> FlushingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        batches: SyncMutex<Vec<Vec<u32>>>,
    }

    #[async_trait]
    impl BatchHandler<u32> for Recorder {
        async fn flush(&self, batch: Vec<u32>) -> Result<()> {
            self.batches.lock().push(batch);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_capacity_cuts_generations() {
        let buffer: BatchBuffer<u32, Recorder> = BatchBuffer::new(2, Recorder::default());
        for i in 0..5 {
            buffer.submit(i).await.unwrap();
        }

        assert_eq!(*buffer.handler().batches.lock(), vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(buffer.len().await, 1);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let buffer: BatchBuffer<u32, Recorder> = BatchBuffer::new(10, Recorder::default());
        buffer.flush().await.unwrap();

        assert!(buffer.handler().batches.lock().is_empty());
        assert_eq!(buffer.state(), SinkState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_closes() {
        let buffer: BatchBuffer<u32, Recorder> = BatchBuffer::new(10, Recorder::default());
        buffer.submit(7).await.unwrap();
        buffer.shutdown().await.unwrap();

        assert_eq!(*buffer.handler().batches.lock(), vec![vec![7]]);
        assert_eq!(buffer.state(), SinkState::Closed);
        assert!(matches!(buffer.submit(8).await, Err(Error::Closed)));
        assert!(matches!(buffer.flush().await, Err(Error::Closed)));

        // repeated shutdown is harmless
        buffer.shutdown().await.unwrap();
        assert_eq!(buffer.handler().batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_empty_goes_straight_to_closed() {
        let buffer: BatchBuffer<u32, Recorder> = BatchBuffer::new(10, Recorder::default());
        buffer.shutdown().await.unwrap();

        assert!(buffer.handler().batches.lock().is_empty());
        assert_eq!(buffer.state(), SinkState::Closed);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_one() {
        let buffer: BatchBuffer<u32, Recorder> = BatchBuffer::new(0, Recorder::default());
        buffer.submit(1).await.unwrap();

        assert_eq!(buffer.capacity(), 1);
        assert_eq!(*buffer.handler().batches.lock(), vec![vec![1]]);
    }

    #[derive(Default)]
    struct Stalled {
        abandoned: SyncMutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchHandler<u32> for Stalled {
        async fn flush(&self, _batch: Vec<u32>) -> Result<()> {
            std::future::pending().await
        }

        fn abandoned(&self, events: usize) {
            self.abandoned.lock().push(events);
        }
    }

    #[tokio::test]
    async fn test_cancelled_gate_wait_keeps_generation() {
        let buffer: BatchBuffer<u32, Recorder> = BatchBuffer::new(2, Recorder::default());
        let gate = buffer.flush_gate.clone().lock_owned().await;

        buffer.submit(1).await.unwrap();
        let filled = tokio::time::timeout(Duration::from_millis(20), buffer.submit(2)).await;
        assert!(filled.is_err());
        let closing = tokio::time::timeout(Duration::from_millis(20), buffer.shutdown()).await;
        assert!(closing.is_err());

        assert_eq!(buffer.len().await, 2);
        assert_ne!(buffer.state(), SinkState::Closed);

        drop(gate);
        buffer.shutdown().await.unwrap();
        assert_eq!(*buffer.handler().batches.lock(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_dropped_flush_is_reported_to_handler() {
        let buffer: BatchBuffer<u32, Stalled> = BatchBuffer::new(10, Stalled::default());
        buffer.submit(1).await.unwrap();
        buffer.submit(2).await.unwrap();

        let flushed = tokio::time::timeout(Duration::from_millis(20), buffer.flush()).await;
        assert!(flushed.is_err());

        assert_eq!(*buffer.handler().abandoned.lock(), vec![2]);
        assert!(buffer.is_empty().await);
        assert_eq!(buffer.state(), SinkState::Idle);
    }
}
