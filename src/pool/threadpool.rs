//! Fixed-size worker pool draining a single FIFO task queue, grounded on
//! the `ThreadPool` the original `webserver.h` includes (commented out in
//! `original_source`, described in full in §4.5) and written in the
//! idiomatic Rust mutex+condvar shape used across the rest of the corpus
//! for this pattern (e.g. `fixed_pool.rs`'s fixed-worker-count structure,
//! here with a blocking condvar queue instead of a lock-free one, since
//! the spec explicitly calls for "condition-variable wake-up").

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    shutdown: Mutex<bool>,
}

pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(worker_count: usize) -> ThreadPool {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: Mutex::new(false),
        });

        let workers = (0..worker_count)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("reactor-httpd-worker-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        ThreadPool { shared, workers }
    }

    /// Enqueues `task` for execution on some worker thread. Never blocks:
    /// the queue is unbounded, matching §4.5.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.lock().unwrap().push_back(Box::new(task));
        self.shared.condvar.notify_one();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if *shared.shutdown.lock().unwrap() {
                    break None;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
        };
        match task {
            Some(task) => task(),
            None => break,
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn tasks_run_on_worker_threads() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        // Give workers a moment to drain; drop() below also joins them.
        std::thread::sleep(Duration::from_millis(100));
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn drop_drains_pending_tasks_before_exit() {
        let pool = ThreadPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }
}
