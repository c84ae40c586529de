//! elastic worker pool.
//!
//! A bounded fifo queue feeds a set of os threads that grows under load and
//! shrinks back to its minimum after idling. The mutex is held only to
//! enqueue and dequeue; a task never runs under the lock.

use std::{
    collections::VecDeque,
    fmt, mem,
    sync::{Arc, Condvar, Mutex},
    thread,
    time::Duration,
};

use tracing::{debug, error};

/// How long a surplus worker may idle before it exits.
const THREAD_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Reason a task could not be queued. The caller is expected to shed the
/// connection it was about to hand over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    Shutdown,
    QueueFull,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shutdown => f.write_str("pool is shut down"),
            Self::QueueFull => f.write_str("task queue is full"),
        }
    }
}

pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    min: usize,
    max: usize,
    queue_cap: usize,
    lock: Mutex<State>,
    cond: Condvar,
}

struct State {
    queue: VecDeque<Task>,
    threads: usize,
    shutdown: bool,
    /// Every handle ever spawned, including workers that already exited
    /// after an idle timeout; all are joined at shutdown.
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Creates a pool with `min` workers running and room to grow to `max`.
    pub fn new(min: usize, max: usize) -> Self {
        let max = max.max(min);
        let inner = Arc::new(Inner {
            min,
            max,
            queue_cap: max * 2,
            lock: Mutex::new(State {
                queue: VecDeque::with_capacity(256),
                threads: 0,
                shutdown: false,
                handles: Vec::with_capacity(max),
            }),
            cond: Condvar::new(),
        });
        {
            let mut state = inner.lock.lock().unwrap();
            for _ in 0..min {
                spawn_worker(&inner, &mut state);
            }
        }
        Self { inner }
    }

    /// Queues a task for execution. Never blocks; on failure the task is
    /// dropped, which releases whatever it owns.
    pub fn dispatch(&self, task: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        let mut state = self.inner.lock.lock().unwrap();
        if state.shutdown {
            return Err(DispatchError::Shutdown);
        }
        if state.queue.len() >= self.inner.queue_cap {
            return Err(DispatchError::QueueFull);
        }
        state.queue.push_back(Box::new(task));
        if state.queue.len() > state.threads && state.threads < self.inner.max {
            spawn_worker(&self.inner, &mut state);
        }
        self.inner.cond.notify_one();
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.inner.lock.lock().unwrap().threads
    }

    /// Signals shutdown and joins every worker ever spawned. Queued tasks
    /// that no worker picked up are dropped.
    pub fn shutdown(&self) {
        let handles = {
            let mut state = self.inner.lock.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.inner.cond.notify_all();
            mem::take(&mut state.handles)
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(inner: &Arc<Inner>, state: &mut State) {
    let name = format!("emme-worker-{}", state.handles.len());
    let worker = Arc::clone(inner);
    match thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(worker))
    {
        Ok(handle) => {
            state.handles.push(handle);
            state.threads += 1;
        }
        Err(e) => error!("failed to spawn worker thread: {e}"),
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let task = {
            let mut state = inner.lock.lock().unwrap();
            loop {
                if state.shutdown {
                    state.threads -= 1;
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                let (guard, timeout) = inner
                    .cond
                    .wait_timeout(state, THREAD_IDLE_TIMEOUT)
                    .unwrap();
                state = guard;
                if timeout.timed_out() && state.queue.is_empty() && state.threads > inner.min {
                    state.threads -= 1;
                    debug!("idle timeout, worker exiting");
                    return;
                }
            }
        };
        task();
    }
}
