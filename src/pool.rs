//! Fixed-size worker pool
//!
//! Each worker is a long-lived OS thread with its own hand-off channel. A free
//! worker is represented by its `Worker` handle sitting on the free list; taking
//! the handle out (`get`/`try_get`) makes the worker busy, and the worker thread
//! pushes its own handle back (`put`) once the step it was given has returned.

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

use crate::task::TaskRef;

enum Message {
    Run(TaskRef),
    Stop,
}

/// Handle to one worker thread. Consumed by `assign`, so a worker can only be
/// given a task while it sits outside the free list.
pub struct Worker {
    id: usize,
    tx: mpsc::Sender<Message>,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Hand `task` to this worker. The worker returns itself to the pool afterwards.
    pub fn assign(self, task: TaskRef) {
        if let Err(mpsc::SendError(Message::Run(task))) = self.tx.send(Message::Run(task)) {
            error!(worker = self.id, conn = task.id(), "worker thread gone, task dropped");
        }
    }

    fn handle(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
        }
    }
}

struct Idle {
    workers: VecDeque<Worker>,
    busy: usize,
}

struct FreeList {
    idle: Mutex<Idle>,
    available: Condvar,
}

impl FreeList {
    fn put(&self, worker: Worker) {
        let mut idle = self.idle.lock();
        idle.workers.push_back(worker);
        idle.busy = idle.busy.saturating_sub(1);
        self.available.notify_one();
    }
}

pub struct ThreadPool {
    size: usize,
    free: Arc<FreeList>,
    stoppers: Vec<mpsc::Sender<Message>>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    /// Start `threads` workers, all initially free
    pub fn create(threads: usize) -> Result<Arc<Self>> {
        anyhow::ensure!(threads > 0, "thread pool needs at least one worker");

        let free = Arc::new(FreeList {
            idle: Mutex::new(Idle {
                workers: VecDeque::with_capacity(threads),
                busy: 0,
            }),
            available: Condvar::new(),
        });

        let mut stoppers = Vec::with_capacity(threads);
        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let (tx, rx) = mpsc::channel();
            let me = Worker { id, tx: tx.clone() };
            let list = Arc::clone(&free);
            let handle = thread::Builder::new()
                .name(format!("fileup-worker-{id}"))
                .spawn(move || work(me, rx, list))
                .with_context(|| format!("spawn worker thread {id}"))?;
            free.idle.lock().workers.push_back(Worker { id, tx: tx.clone() });
            stoppers.push(tx);
            handles.push(handle);
        }
        debug!(threads, "thread pool created");

        Ok(Arc::new(Self {
            size: threads,
            free,
            stoppers,
            threads: Mutex::new(handles),
        }))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Take a free worker, waiting until one is returned if none is free
    pub fn get(&self) -> Worker {
        let mut idle = self.free.idle.lock();
        loop {
            if let Some(worker) = idle.workers.pop_front() {
                idle.busy += 1;
                return worker;
            }
            self.free.available.wait(&mut idle);
        }
    }

    /// Take a free worker without waiting
    pub fn try_get(&self) -> Option<Worker> {
        let mut idle = self.free.idle.lock();
        let worker = idle.workers.pop_front()?;
        idle.busy += 1;
        Some(worker)
    }

    pub fn put(&self, worker: Worker) {
        self.free.put(worker);
    }

    pub fn empty(&self) -> bool {
        self.free.idle.lock().workers.is_empty()
    }

    /// Run `task` on the next free worker, waiting for one if necessary
    pub fn assign(&self, task: TaskRef) {
        self.get().assign(task);
    }

    /// Wait up to `timeout` for a worker to be free. Returns whether one is.
    pub fn wait_for_free(&self, timeout: Duration) -> bool {
        let mut idle = self.free.idle.lock();
        if idle.workers.is_empty() {
            let _ = self.free.available.wait_for(&mut idle, timeout);
        }
        !idle.workers.is_empty()
    }

    /// `(free, busy)` taken under one lock; always sums to `size()`
    pub fn counts(&self) -> (usize, usize) {
        let idle = self.free.idle.lock();
        (idle.workers.len(), idle.busy)
    }

    /// Let every worker finish its current step, then stop and join them
    pub fn shutdown(&self) {
        for tx in &self.stoppers {
            let _ = tx.send(Message::Stop);
        }
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for h in handles {
            let _ = h.join();
        }
        debug!("thread pool stopped");
    }
}

fn work(me: Worker, rx: mpsc::Receiver<Message>, free: Arc<FreeList>) {
    while let Ok(Message::Run(task)) = rx.recv() {
        let conn = task.id();
        if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
            error!(worker = me.id, conn, "task step panicked, abandoning connection");
            if catch_unwind(AssertUnwindSafe(|| task.abandon())).is_err() {
                error!(worker = me.id, conn, "abandon panicked");
            }
        }
        if catch_unwind(AssertUnwindSafe(|| task.destroy())).is_err() {
            error!(worker = me.id, conn, "task destroy panicked");
        }
        drop(task);
        free.put(me.handle());
    }
}
