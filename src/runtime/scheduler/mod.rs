//! Work-stealing fiber scheduler.
//!
//! A fixed pool of worker threads. Each worker owns a FIFO local queue;
//! scheduling from a worker thread pushes there, scheduling from anywhere
//! else goes through the global injection queue. Idle workers steal from
//! siblings, starting at a rotating victim, and park on a condition
//! variable when nothing is runnable.

mod global_queue;
mod stealing;
mod worker;

use crate::error::RuntimeError;
use crate::tracing_compat::debug;
use crossbeam_deque::{Steal, Stealer, Worker as Deque};
use global_queue::GlobalQueue;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering, fence};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use worker::Worker;

/// Something a worker can run.
pub(crate) trait Runnable: Send + Sync + 'static {
    /// Runs one slice of work.
    fn run_task(self: Arc<Self>);
}

static NEXT_SCHEDULER: AtomicU64 = AtomicU64::new(1);

pub(crate) struct LocalSlot {
    scheduler: u64,
    queue: Box<dyn Any>,
}

thread_local! {
    static LOCAL: RefCell<Option<LocalSlot>> = const { RefCell::new(None) };
}

pub(crate) struct Idle {
    sleeping: AtomicUsize,
    lock: Mutex<()>,
    condvar: Condvar,
}

pub(crate) struct SchedulerShared<T> {
    id: u64,
    global: GlobalQueue<Arc<T>>,
    stealers: Vec<Stealer<Arc<T>>>,
    idle: Idle,
    shutdown: AtomicBool,
    park_timeout: Duration,
}

/// Options for starting a scheduler.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerOptions {
    pub(crate) workers: usize,
    pub(crate) thread_name_prefix: String,
    pub(crate) thread_stack_size: usize,
    pub(crate) park_timeout: Duration,
}

/// A running worker pool.
pub(crate) struct Scheduler<T: Runnable> {
    shared: Arc<SchedulerShared<T>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Runnable> Scheduler<T> {
    /// Spawns the worker threads.
    pub(crate) fn start(options: &SchedulerOptions) -> Result<Self, RuntimeError> {
        let workers = options.workers.max(1);
        let deques: Vec<Deque<Arc<T>>> = (0..workers).map(|_| Deque::new_fifo()).collect();
        let shared = Arc::new(SchedulerShared {
            id: NEXT_SCHEDULER.fetch_add(1, Ordering::Relaxed),
            global: GlobalQueue::new(),
            stealers: deques.iter().map(Deque::stealer).collect(),
            idle: Idle {
                sleeping: AtomicUsize::new(0),
                lock: Mutex::new(()),
                condvar: Condvar::new(),
            },
            shutdown: AtomicBool::new(false),
            park_timeout: options.park_timeout,
        });
        let scheduler = Self {
            shared,
            threads: Mutex::new(Vec::with_capacity(workers)),
        };

        for (id, deque) in deques.into_iter().enumerate() {
            let worker = Worker::new(id, Arc::clone(&scheduler.shared));
            let spawned = thread::Builder::new()
                .name(format!("{}-{id}", options.thread_name_prefix))
                .stack_size(options.thread_stack_size)
                .spawn(move || worker.run_loop(deque));
            match spawned {
                Ok(handle) => scheduler.threads.lock().push(handle),
                Err(err) => {
                    scheduler.shutdown();
                    return Err(RuntimeError::ThreadSpawn(err));
                }
            }
        }
        debug!(workers, "scheduler started");
        Ok(scheduler)
    }

    /// Makes `task` runnable. After shutdown the task is dropped.
    pub(crate) fn schedule(&self, task: Arc<T>) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let id = self.shared.id;
        let leftover = LOCAL.with(move |slot| {
            let slot = slot.borrow();
            match slot
                .as_ref()
                .filter(|local| local.scheduler == id)
                .and_then(|local| local.queue.downcast_ref::<Deque<Arc<T>>>())
            {
                Some(queue) => {
                    queue.push(task);
                    None
                }
                None => Some(task),
            }
        });
        if let Some(task) = leftover {
            self.shared.global.push(task);
        }
        fence(Ordering::SeqCst);
        self.notify_one();
    }

    fn notify_one(&self) {
        let idle = &self.shared.idle;
        if idle.sleeping.load(Ordering::SeqCst) > 0 {
            let _guard = idle.lock.lock();
            idle.condvar.notify_one();
        }
    }

    /// Number of worker threads.
    pub(crate) fn worker_count(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Number of fibers waiting in the global queue.
    pub(crate) fn global_len(&self) -> usize {
        self.shared.global.len()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stops every worker and drops queued work. Safe to call more than
    /// once and from a worker thread (which is then not joined).
    pub(crate) fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _guard = self.shared.idle.lock.lock();
            self.shared.idle.condvar.notify_all();
        }
        let handles = std::mem::take(&mut *self.threads.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        let mut dropped = self.shared.global.clear();
        // Local queues of exited workers still share buffers with the stealers.
        for stealer in &self.shared.stealers {
            loop {
                match stealer.steal() {
                    Steal::Empty => break,
                    Steal::Success(_) => dropped += 1,
                    Steal::Retry => {}
                }
            }
        }
        if dropped > 0 {
            debug!(dropped, "scheduler stopped with queued fibers");
        }
    }
}
