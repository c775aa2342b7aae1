//! Pool of I/O execution contexts.
//!
//! Sessions are spread over a fixed set of Tokio runtime handles, picked
//! round-robin. A pool either borrows the caller's runtime (one context) or
//! owns a set of single-threaded runtimes, each driven by its own OS thread
//! until the pool is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

/// Round-robin set of runtime handles.
#[derive(Debug)]
pub struct IoPool {
    handles: Vec<Handle>,
    counter: AtomicUsize,
    workers: Vec<Worker>,
}

#[derive(Debug)]
struct Worker {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IoPool {
    /// A single context: the runtime the caller is running on.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn current() -> Self {
        Self {
            handles: vec![Handle::current()],
            counter: AtomicUsize::new(0),
            workers: Vec::new(),
        }
    }

    /// Spawn `size` dedicated single-threaded runtimes. Zero means one per
    /// available CPU.
    pub fn with_threads(size: usize) -> std::io::Result<Self> {
        let size = if size == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            size
        };

        let mut handles = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            handles.push(runtime.handle().clone());

            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            let thread = std::thread::Builder::new()
                .name(format!("relay-io-{}", index))
                .spawn(move || {
                    runtime.block_on(async {
                        let _ = stop_rx.await;
                    });
                })?;

            workers.push(Worker {
                stop: Some(stop_tx),
                thread: Some(thread),
            });
        }

        tracing::info!(contexts = size, "I/O pool started");
        Ok(Self {
            handles,
            counter: AtomicUsize::new(0),
            workers,
        })
    }

    /// Next context in rotation.
    pub fn next(&self) -> &Handle {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[index]
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            if let Some(stop) = worker.stop.take() {
                let _ = stop.send(());
            }
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_of(handle: &Handle) -> String {
        let (tx, rx) = std::sync::mpsc::channel();
        handle.spawn(async move {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });
        rx.recv().unwrap().unwrap()
    }

    #[test]
    fn rotates_through_contexts() {
        let pool = IoPool::with_threads(3).unwrap();
        assert_eq!(pool.len(), 3);

        let order: Vec<String> = (0..4).map(|_| thread_of(pool.next())).collect();
        assert_eq!(order, vec!["relay-io-0", "relay-io-1", "relay-io-2", "relay-io-0"]);
    }

    #[tokio::test]
    async fn current_pool_has_one_context() {
        let pool = IoPool::current();
        assert_eq!(pool.len(), 1);

        let result = pool.next().spawn(async { 40 + 2 }).await.unwrap();
        assert_eq!(result, 42);
    }
}
