//! A fixed pool of event loops, one per OS thread.
//!
//! Each loop owns an `mpsc` receiver and a queue of tasks ordered by due
//! time. Work reaches a loop through a `Worker`; `ThreadPool::create_worker`
//! hands workers out round-robin, so consecutive workers land on
//! consecutive loops and a slow task only delays its own loop.
//!
//! Every task carries the `Lifetime` of the worker that scheduled it. A task
//! whose lifetime has been cancelled by the time it is due is dropped
//! without running.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use vigil_contracts::error::{VigilError, VigilResult};

use crate::lifetime::Lifetime;

/// How long an idle loop waits before re-checking the pool lifetime.
const IDLE_POLL: Duration = Duration::from_millis(50);

type Task = Box<dyn FnOnce() + Send + 'static>;

/// The body of one loop thread, handed to a `ThreadFactory`.
pub struct ThreadStart {
    pub name: String,
    run: Task,
}

impl ThreadStart {
    pub fn run(self) {
        (self.run)()
    }
}

/// Creates the OS threads the pool runs its loops on.
pub type ThreadFactory = Arc<dyn Fn(ThreadStart) -> io::Result<JoinHandle<()>> + Send + Sync>;

/// Spawns named `std::thread`s.
pub fn default_thread_factory() -> ThreadFactory {
    Arc::new(|start: ThreadStart| {
        thread::Builder::new()
            .name(start.name.clone())
            .spawn(move || start.run())
    })
}

// ── Loop internals ────────────────────────────────────────────────────────────

struct Scheduled {
    due: Instant,
    seq: u64,
    lifetime: Lifetime,
    task: Task,
}

// Min-heap on (due, seq): BinaryHeap is a max-heap, so compare reversed.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

enum Message {
    Task(Scheduled),
    Stop,
}

fn run_loop(index: usize, receiver: Receiver<Message>, master: Lifetime) {
    debug!(loop_index = index, "event loop started");
    let mut pending: BinaryHeap<Scheduled> = BinaryHeap::new();

    loop {
        if master.is_cancelled() {
            break;
        }

        let now = Instant::now();
        while pending.peek().is_some_and(|next| next.due <= now) {
            if let Some(task) = pending.pop() {
                execute(index, task);
            }
        }

        let wait = pending
            .peek()
            .map(|next| next.due.saturating_duration_since(Instant::now()).min(IDLE_POLL))
            .unwrap_or(IDLE_POLL);

        match receiver.recv_timeout(wait) {
            Ok(Message::Task(task)) => pending.push(task),
            Ok(Message::Stop) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if pending.is_empty() {
                    break;
                }
                thread::sleep(wait);
            }
        }
    }

    if !pending.is_empty() {
        debug!(loop_index = index, dropped = pending.len(), "event loop stopped with pending tasks");
    }
    debug!(loop_index = index, "event loop stopped");
}

fn execute(index: usize, scheduled: Scheduled) {
    if scheduled.lifetime.is_cancelled() {
        warn!(loop_index = index, "task skipped: lifetime cancelled");
        return;
    }
    if panic::catch_unwind(AssertUnwindSafe(scheduled.task)).is_err() {
        warn!(loop_index = index, "task panicked");
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// A fixed set of event loops.
///
/// Dropping the pool cancels its lifetime and joins every loop thread.
pub struct ThreadPool {
    senders: Vec<Sender<Message>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    counter: AtomicUsize,
    seq: Arc<AtomicU64>,
    master: Lifetime,
}

impl ThreadPool {
    /// A pool of `max(threads, 1)` loops on `std::thread`s.
    pub fn new(threads: usize) -> VigilResult<Self> {
        Self::with_factory(threads, default_thread_factory())
    }

    /// A pool of `max(threads, 1)` loops on threads created by `factory`.
    pub fn with_factory(threads: usize, factory: ThreadFactory) -> VigilResult<Self> {
        let size = threads.max(1);
        let master = Lifetime::new();
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for index in 0..size {
            let (sender, receiver) = mpsc::channel();
            let loop_master = master.clone();
            let start = ThreadStart {
                name: format!("vigil-loop-{}", index),
                run: Box::new(move || run_loop(index, receiver, loop_master)),
            };

            match factory(start) {
                Ok(handle) => {
                    senders.push(sender);
                    handles.push(handle);
                }
                Err(e) => {
                    master.cancel();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(VigilError::Runtime {
                        reason: format!("failed to start event loop {}: {}", index, e),
                    });
                }
            }
        }

        info!(threads = size, "thread pool started");
        Ok(Self {
            senders,
            threads: Mutex::new(handles),
            counter: AtomicUsize::new(0),
            seq: Arc::new(AtomicU64::new(0)),
            master,
        })
    }

    /// Number of loops.
    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// The pool's master lifetime. Cancelling it stops every loop.
    pub fn lifetime(&self) -> &Lifetime {
        &self.master
    }

    /// A worker on the next loop in round-robin order, bound to `lifetime`.
    ///
    /// The counter is advanced before it is read, so with more than one
    /// loop the first worker lands on loop 1.
    pub fn create_worker(&self, lifetime: &Lifetime) -> Worker {
        let count = self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let index = count % self.senders.len();
        Worker {
            index,
            sender: self.senders[index].clone(),
            lifetime: lifetime.join(&self.master),
            seq: Arc::clone(&self.seq),
        }
    }

    /// Cancel the master lifetime, stop every loop and join the threads.
    /// Pending tasks are dropped.
    pub fn shutdown(&self) {
        self.master.cancel();
        for sender in &self.senders {
            let _ = sender.send(Message::Stop);
        }

        let handles = match self.threads.lock() {
            Ok(mut threads) => std::mem::take(&mut *threads),
            Err(_) => return,
        };
        if handles.is_empty() {
            return;
        }

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        info!(threads = self.senders.len(), "thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.senders.len())
            .field("cancelled", &self.master.is_cancelled())
            .finish()
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Schedules tasks on one loop under one lifetime.
pub struct Worker {
    index: usize,
    sender: Sender<Message>,
    lifetime: Lifetime,
    seq: Arc<AtomicU64>,
}

impl Worker {
    /// Index of the loop this worker schedules on.
    pub fn loop_index(&self) -> usize {
        self.index
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Skip every task of this worker that has not run yet.
    pub fn cancel(&self) {
        self.lifetime.cancel();
    }

    /// Run `task` as soon as the loop is free.
    pub fn schedule<F>(&self, task: F) -> VigilResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now(), task)
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> VigilResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, task)
    }

    /// Run `task` at `due`, or as soon after as the loop is free.
    pub fn schedule_at<F>(&self, due: Instant, task: F) -> VigilResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let scheduled = Scheduled {
            due,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            lifetime: self.lifetime.clone(),
            task: Box::new(task),
        };
        self.sender
            .send(Message::Task(scheduled))
            .map_err(|_| VigilError::Runtime {
                reason: format!("event loop {} is stopped", self.index),
            })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("loop_index", &self.index)
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
