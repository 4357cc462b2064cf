use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
};

use crate::{QueueError, lock};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct TaskState {
    tasks: VecDeque<Task>,
    closed: bool,
}

struct Shared {
    state: Mutex<TaskState>,
    available: Condvar,
}

/// Fixed pool of worker threads consuming nullary tasks.
///
/// Dropping the pool closes the task queue, lets the workers drain whatever
/// is still queued, and joins every thread.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "worker pool needs at least one thread");
        let shared = Arc::new(Shared {
            state: Mutex::new(TaskState { tasks: VecDeque::new(), closed: false }),
            available: Condvar::new(),
        });
        let workers = (0..threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("spawn worker thread")
            })
            .collect();
        Self { shared, workers }
    }

    pub fn submit<F>(&self, task: F) -> Result<(), QueueError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.tasks.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
        Ok(())
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub fn queued(&self) -> usize {
        lock(&self.shared.state).tasks.len()
    }
}

fn worker_loop(shared: &Shared) {
    let mut state = lock(&shared.state);
    loop {
        if let Some(task) = state.tasks.pop_front() {
            drop(state);
            task();
            state = lock(&shared.state);
        } else if state.closed {
            return;
        } else {
            state = shared.available.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        lock(&self.shared.state).closed = true;
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
