//! Task slots and the reconstruction worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::debug;

/// Jobs queued to the reconstruction pool.
pub type Job = Box<dyn FnOnce() + Send>;

const JOB_QUEUE_DEPTH: usize = 128;

/// Fixed set of frame-decoder slots. A slot bounds one in-flight picture;
/// acquisition spins (with a short sleep) until a slot frees up or the
/// decoder exits.
pub struct TaskSlots {
    busy: Mutex<Vec<bool>>,
}

impl TaskSlots {
    pub fn new(count: usize) -> Self {
        TaskSlots {
            busy: Mutex::new(vec![false; count]),
        }
    }

    pub fn len(&self) -> usize {
        self.busy.lock().len()
    }

    pub fn acquire(&self, exit: &AtomicBool) -> Option<usize> {
        loop {
            if exit.load(Ordering::Acquire) {
                return None;
            }
            {
                let mut busy = self.busy.lock();
                if let Some(idx) = busy.iter().position(|&b| !b) {
                    busy[idx] = true;
                    return Some(idx);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn release(&self, idx: usize) {
        let mut busy = self.busy.lock();
        busy[idx] = false;
    }
}

/// N worker threads draining a bounded job queue.
pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        let (tx, rx) = bounded::<Job>(JOB_QUEUE_DEPTH);
        let handles = (0..threads)
            .map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("avs2-rec-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                    })
                    .expect("spawn reconstruction worker")
            })
            .collect();
        WorkerPool {
            tx: Some(tx),
            handles,
        }
    }

    /// Queue a job; blocks briefly if the queue is full.
    pub fn run(&self, job: Job) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(job);
        }
    }

    /// Close the queue and join every worker. Queued jobs still run.
    pub fn shutdown(&mut self) {
        self.tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!("reconstruction pool drained");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn slots_bound_concurrency() {
        let slots = TaskSlots::new(2);
        let exit = AtomicBool::new(false);
        let a = slots.acquire(&exit).unwrap();
        let b = slots.acquire(&exit).unwrap();
        assert_ne!(a, b);

        // all busy: an exiting decoder gives up instead of spinning
        exit.store(true, Ordering::Release);
        assert!(slots.acquire(&exit).is_none());

        exit.store(false, Ordering::Release);
        slots.release(a);
        assert_eq!(slots.acquire(&exit), Some(a));
    }

    #[test]
    fn pool_runs_jobs_and_joins() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(3);
        for _ in 0..20 {
            let counter = counter.clone();
            pool.run(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }
}
