//! Single dispatch thread between readiness events and the worker pool
//!
//! Producers (the reactor) append ready tasks with `assign`. The dispatch
//! thread takes the front task and hands it to a free worker. When every
//! worker is busy the task goes back to the front of the queue and the
//! thread waits a short, bounded interval for a worker to be returned.
//! The dispatch thread never calls the blocking `ThreadPool::get`.

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::pool::ThreadPool;
use crate::task::TaskRef;

// Upper bound on one saturation backoff before the front task is retried
const SATURATION_BACKOFF: Duration = Duration::from_millis(5);

pub struct TaskDispatcher {
    queue: Mutex<VecDeque<TaskRef>>,
    ready: Condvar,
    pool: Arc<ThreadPool>,
    running: AtomicBool,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TaskDispatcher {
    /// Create a pool of `workers` threads and start dispatching onto it
    pub fn init(workers: usize) -> Result<Arc<Self>> {
        let pool = ThreadPool::create(workers)?;
        Self::start(pool)
    }

    /// Start the dispatch thread over an existing pool
    pub fn start(pool: Arc<ThreadPool>) -> Result<Arc<Self>> {
        let dispatcher = Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            pool,
            running: AtomicBool::new(true),
            thread: Mutex::new(None),
        });
        let me = Arc::clone(&dispatcher);
        let handle = thread::Builder::new()
            .name("fileup-dispatch".into())
            .spawn(move || me.run())
            .context("spawn dispatch thread")?;
        *dispatcher.thread.lock() = Some(handle);
        Ok(dispatcher)
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Queue a ready task behind everything already pending
    pub fn assign(&self, task: TaskRef) {
        trace!(conn = task.id(), "task queued");
        let mut queue = self.queue.lock();
        queue.push_back(task);
        self.ready.notify_one();
    }

    /// Tasks waiting for a worker
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Give `task` to a free worker, or put it back at the front of the queue.
    /// Returns whether the task was dispatched.
    fn handle(&self, task: TaskRef) -> bool {
        match self.pool.try_get() {
            Some(worker) => {
                trace!(conn = task.id(), worker = worker.id(), "task dispatched");
                worker.assign(task);
                true
            }
            None => {
                let mut queue = self.queue.lock();
                queue.push_front(task);
                warn!(pending = queue.len(), "all worker threads are busy");
                false
            }
        }
    }

    fn run(&self) {
        debug!(workers = self.pool.size(), "dispatcher started");
        loop {
            let task = {
                let mut queue = self.queue.lock();
                while queue.is_empty() && self.running.load(Ordering::Acquire) {
                    self.ready.wait(&mut queue);
                }
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                match queue.pop_front() {
                    Some(task) => task,
                    None => continue,
                }
            };
            if !self.handle(task) {
                self.pool.wait_for_free(SATURATION_BACKOFF);
            }
        }
        debug!("dispatcher stopped");
    }

    /// Stop the dispatch thread, then the pool. Tasks still queued are dropped.
    pub fn shutdown(&self) {
        {
            let _queue = self.queue.lock();
            self.running.store(false, Ordering::Release);
            self.ready.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        self.pool.shutdown();
        self.queue.lock().clear();
    }
}
