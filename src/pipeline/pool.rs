//! Worker pool with a join barrier per phase.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, unbounded};
use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("cannot start worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
    #[error("{phase} phase timed out after {secs:.1}s ({completed} of {total} jobs finished)")]
    Timeout {
        phase: String,
        secs: f64,
        completed: usize,
        total: usize,
    },
    #[error("{phase} job {job} panicked: {message}")]
    Panicked {
        phase: String,
        job: usize,
        message: String,
    },
    #[error("{phase} phase lost its workers")]
    Disconnected { phase: String },
}

/// Runs independent jobs on a thread pool and waits for all of them.
pub struct WorkerPool {
    pool: ThreadPool,
    timeout: Option<Duration>,
}

impl WorkerPool {
    /// `workers = None` uses one thread per core. `timeout` bounds every phase.
    pub fn new(workers: Option<usize>, timeout: Option<Duration>) -> Result<Self, PoolError> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("turbulence-worker-{i}"));
        if let Some(n) = workers {
            builder = builder.num_threads(n);
        }
        Ok(Self {
            pool: builder.build()?,
            timeout,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run every job and return the results in job order.
    ///
    /// Fails on the first panicking job or when the phase exceeds the
    /// timeout. Jobs still running at that point finish in the background and
    /// their results are dropped.
    pub fn run_phase<T, F>(&self, phase: &str, jobs: Vec<F>) -> Result<Vec<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let total = jobs.len();
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);
        let (tx, rx) = unbounded();

        for (index, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            self.pool.spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(job));
                // The barrier may already have given up on this phase
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
        for completed in 0..total {
            let received = match deadline {
                Some(deadline) => rx.recv_deadline(deadline).map_err(|e| match e {
                    RecvTimeoutError::Timeout => PoolError::Timeout {
                        phase: phase.to_string(),
                        secs: started.elapsed().as_secs_f64(),
                        completed,
                        total,
                    },
                    RecvTimeoutError::Disconnected => PoolError::Disconnected {
                        phase: phase.to_string(),
                    },
                })?,
                None => rx.recv().map_err(|_| PoolError::Disconnected {
                    phase: phase.to_string(),
                })?,
            };

            match received {
                (index, Ok(value)) => results[index] = Some(value),
                (job, Err(payload)) => {
                    return Err(PoolError::Panicked {
                        phase: phase.to_string(),
                        job,
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
        }

        debug!(
            "{} phase: {} jobs in {:.2}s",
            phase,
            total,
            started.elapsed().as_secs_f64()
        );

        results
            .into_iter()
            .collect::<Option<Vec<T>>>()
            .ok_or_else(|| PoolError::Disconnected {
                phase: phase.to_string(),
            })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    type Job<T> = Box<dyn FnOnce() -> T + Send>;

    #[test]
    fn test_results_in_job_order() {
        let pool = WorkerPool::new(Some(4), None).unwrap();
        assert_eq!(pool.workers(), 4);

        let jobs: Vec<Job<usize>> = (0..8usize)
            .map(|i| {
                Box::new(move || {
                    // Later jobs finish first
                    thread::sleep(Duration::from_millis(((8 - i) * 5) as u64));
                    i * 10
                }) as Job<usize>
            })
            .collect();
        let results = pool.run_phase("test", jobs).unwrap();
        assert_eq!(results, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn test_empty_phase() {
        let pool = WorkerPool::new(Some(1), None).unwrap();
        let jobs: Vec<Job<()>> = Vec::new();
        assert!(pool.run_phase("empty", jobs).unwrap().is_empty());
    }

    #[test]
    fn test_panic_is_reported() {
        let pool = WorkerPool::new(Some(2), None).unwrap();
        let jobs: Vec<Job<u32>> = vec![
            Box::new(|| 1),
            Box::new(|| -> u32 { panic!("frame exploded") }),
        ];
        match pool.run_phase("render", jobs) {
            Err(PoolError::Panicked { phase, job, message }) => {
                assert_eq!(phase, "render");
                assert_eq!(job, 1);
                assert!(message.contains("frame exploded"));
            }
            other => panic!("expected a panic error, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout() {
        let pool = WorkerPool::new(Some(2), Some(Duration::from_millis(50))).unwrap();
        let jobs: Vec<Job<()>> = vec![
            Box::new(|| ()),
            Box::new(|| thread::sleep(Duration::from_millis(1000))),
        ];
        match pool.run_phase("fetch", jobs) {
            Err(PoolError::Timeout {
                completed, total, ..
            }) => {
                assert_eq!(total, 2);
                assert!(completed <= 1);
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }
}
