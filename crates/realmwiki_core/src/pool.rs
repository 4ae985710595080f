use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::{Result, anyhow};

/// Shared stop flag. Workers check it before claiming the next item; work
/// already started runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub completed: usize,
    pub cancelled: bool,
}

/// Runs `task` over `items` on at most `workers` threads. Results are handed
/// to `on_complete` on the calling thread in completion order, so callers can
/// persist each one as soon as it exists.
pub fn run_bounded<I, T, F, C>(
    items: &[I],
    workers: usize,
    cancel: &CancellationToken,
    task: F,
    mut on_complete: C,
) -> Result<PoolOutcome>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> T + Sync,
    C: FnMut(usize, T),
{
    if items.is_empty() {
        return Ok(PoolOutcome::default());
    }
    let worker_count = workers.max(1).min(items.len());
    let next_idx = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel::<(usize, T)>();
    let mut completed = 0usize;

    thread::scope(|scope| -> Result<()> {
        let task = &task;
        let next_idx = &next_idx;
        let mut handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let sender = sender.clone();
            handles.push(scope.spawn(move || {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = next_idx.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(idx) else {
                        break;
                    };
                    if sender.send((idx, task(item))).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(sender);

        for (idx, value) in receiver {
            on_complete(idx, value);
            completed += 1;
        }

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("worker thread panicked"))?;
        }
        Ok(())
    })?;

    Ok(PoolOutcome {
        completed,
        cancelled: completed < items.len() && cancel.is_cancelled(),
    })
}
