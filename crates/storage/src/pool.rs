//! Reusable buffers for zero-copy reads

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A shared pool of byte buffers
///
/// This is the only mutable state shared between concurrent readers, so
/// implementations serialize `acquire` and `release` internally. Callers must
/// release every buffer they acquire.
pub trait BufferPool: Debug + Send + Sync {
    /// Hand out a buffer whose length is exactly `length`
    ///
    /// `direct` is a hint that the buffer will be handed to native code; pools
    /// without such a distinction may ignore it.
    fn acquire(&self, direct: bool, length: usize) -> Vec<u8>;

    /// Return a buffer obtained from [`BufferPool::acquire`]
    fn release(&self, buffer: Vec<u8>);
}

/// Pool that keeps released buffers keyed by capacity and grows on demand
#[derive(Debug, Default)]
pub struct ElasticBufferPool {
    shelf: Mutex<BTreeMap<usize, Vec<Vec<u8>>>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl ElasticBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `acquire` calls served so far
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Number of `release` calls received so far
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers acquired and not yet returned
    pub fn outstanding(&self) -> usize {
        self.acquired().saturating_sub(self.released())
    }
}

impl BufferPool for ElasticBufferPool {
    // Heap and direct requests share one shelf; Rust buffers have no such split
    fn acquire(&self, _direct: bool, length: usize) -> Vec<u8> {
        self.acquired.fetch_add(1, Ordering::SeqCst);

        let reused = {
            let mut shelf = self
                .shelf
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let capacity = shelf.range(length..).next().map(|(capacity, _)| *capacity);
            capacity.and_then(|capacity| {
                let buffers = shelf.get_mut(&capacity)?;
                let buffer = buffers.pop();
                if buffers.is_empty() {
                    shelf.remove(&capacity);
                }
                buffer
            })
        };

        match reused {
            Some(mut buffer) => {
                buffer.clear();
                buffer.resize(length, 0);
                buffer
            }
            None => vec![0; length],
        }
    }

    fn release(&self, buffer: Vec<u8>) {
        self.released.fetch_add(1, Ordering::SeqCst);
        let mut shelf = self
            .shelf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        shelf.entry(buffer.capacity()).or_default().push(buffer);
    }
}
