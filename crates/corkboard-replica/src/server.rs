//! Acceptor + bounded queue + fixed worker pool.
//!
//! One thread blocks on `accept` and pushes connections into a bounded
//! `crossbeam-queue` `ArrayQueue`; when the queue is full the connection is
//! dropped rather than buffered (backpressure). A fixed pool of worker
//! threads drains the queue and runs the handler to completion — one
//! request per connection, so a worker never parks mid-request.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_queue::ArrayQueue;
use tracing::{error, info, warn};

/// Queue capacity and worker count for one listener.
#[derive(Debug, Clone, Copy)]
pub struct ServerTuning {
    /// Capacity of the bounded incoming-connection queue.
    pub queue_capacity: usize,
    /// Number of worker threads draining the queue.
    pub workers: usize,
}

impl Default for ServerTuning {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            workers: 5,
        }
    }
}

enum Work {
    Conn(TcpStream, SocketAddr),
    Shutdown,
}

/// A running listener: acceptor thread, bounded queue, worker pool.
///
/// # Lifecycle
///
/// 1. Bind a `TcpListener` (port 0 for an ephemeral port).
/// 2. [`ConnectionServer::spawn`] starts the acceptor and workers.
/// 3. [`ConnectionServer::shutdown`] stops accepting, drains the workers,
///    and joins every thread. `Drop` does the same.
pub struct ConnectionServer {
    local_addr: SocketAddr,
    queue: Arc<ArrayQueue<Work>>,
    stop: Arc<AtomicBool>,
    acceptor: Option<thread::JoinHandle<()>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ConnectionServer {
    /// Spawns the acceptor and worker threads over an already-bound
    /// listener. `name` prefixes the thread names for diagnostics.
    ///
    /// # Panics
    ///
    /// Panics if `tuning.queue_capacity` or `tuning.workers` is 0.
    pub fn spawn<H>(
        listener: TcpListener,
        tuning: ServerTuning,
        name: &str,
        handler: H,
    ) -> io::Result<Self>
    where
        H: Fn(TcpStream, SocketAddr) + Send + Sync + 'static,
    {
        assert!(tuning.queue_capacity > 0, "queue capacity must be positive");
        assert!(tuning.workers > 0, "worker count must be positive");

        let local_addr = listener.local_addr()?;
        let queue = Arc::new(ArrayQueue::new(tuning.queue_capacity));
        let stop = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(handler);

        let mut workers = Vec::with_capacity(tuning.workers);
        for i in 0..tuning.workers {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{i}"))
                .spawn(move || worker_loop(&queue, handler.as_ref()))?;
            workers.push(handle);
        }

        let acceptor = {
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("{name}-acceptor"))
                .spawn(move || accept_loop(&listener, &queue, &stop))?
        };

        info!(%local_addr, workers = tuning.workers, "listener started");

        Ok(Self {
            local_addr,
            queue,
            stop,
            acceptor: Some(acceptor),
            workers,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, drains the workers, and joins all threads.
    /// Safe to call multiple times.
    pub fn shutdown(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }

        // The acceptor blocks in accept(); a throwaway connection wakes it
        // so it can observe the stop flag.
        let _ = TcpStream::connect(self.local_addr);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }

        for _ in 0..self.workers.len() {
            let mut sentinel = Work::Shutdown;
            while let Err(returned) = self.queue.push(sentinel) {
                sentinel = returned;
                thread::yield_now();
            }
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ConnectionServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: &TcpListener, queue: &ArrayQueue<Work>, stop: &AtomicBool) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                if queue.push(Work::Conn(stream, peer)).is_err() {
                    // Queue full: shed the connection instead of buffering.
                    warn!(%peer, "connection queue full, dropping connection");
                }
            }
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                error!("accept error: {e}");
                break;
            }
        }
    }
}

fn worker_loop<H>(queue: &ArrayQueue<Work>, handler: &H)
where
    H: Fn(TcpStream, SocketAddr),
{
    loop {
        match queue.pop() {
            Some(Work::Conn(stream, peer)) => handler(stream, peer),
            Some(Work::Shutdown) => break,
            None => {
                // No work available; yield to avoid busy-spinning.
                thread::yield_now();
            }
        }
    }
}
