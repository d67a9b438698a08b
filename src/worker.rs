//! Background workers.
//!
//! The engine runs two periodic tasks (GC and index dump) on dedicated OS
//! threads. Each thread sleeps on a Condvar-backed shutdown signal rather
//! than a bare `thread::sleep`, so `close()` wakes it immediately instead of
//! waiting out the interval; joining the threads then waits for any
//! in-flight tick to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::Result;

/// Cooperative shutdown flag with immediate wakeup for sleeping workers.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    flag: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown, waking every waiter.
    pub fn shutdown(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Sleep for at most `duration`, returning early (and `true`) when
    /// shutdown is signalled.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let guard = self.inner.mutex.lock().unwrap_or_else(|e| e.into_inner());
        let _unused = self
            .inner
            .condvar
            .wait_timeout(guard, duration)
            .unwrap_or_else(|e| e.into_inner());
        self.is_shutdown()
    }
}

/// A periodic background task.
pub trait BackgroundTask: Send + Sync + 'static {
    /// Task name for logging and the worker thread name.
    fn name(&self) -> &'static str;

    /// How often to run.
    fn interval(&self) -> Duration;

    /// One tick of work.
    fn execute(&self) -> Result<()>;
}

/// Owns the worker threads and their shared shutdown signal.
pub struct Scheduler {
    shutdown: ShutdownSignal,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            shutdown: ShutdownSignal::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn a worker thread for `task`. A zero interval disables the task.
    pub fn register<T: BackgroundTask>(&mut self, task: Arc<T>) {
        let interval = task.interval();
        if interval.is_zero() {
            tracing::debug!(task = task.name(), "background task disabled");
            return;
        }

        let shutdown = self.shutdown.clone();
        let builder = std::thread::Builder::new().name(format!("rosedb-{}", task.name()));
        let handle = builder.spawn(move || loop {
            if shutdown.wait_timeout(interval) {
                tracing::debug!(task = task.name(), "background task shutting down");
                break;
            }
            if let Err(e) = task.execute() {
                // Logged and retried at the next tick; never fatal.
                tracing::error!(task = task.name(), error = %e, "background task failed");
            }
        });
        match handle {
            Ok(handle) => self.handles.push(handle),
            Err(e) => tracing::error!(error = %e, "failed to spawn background task"),
        }
    }

    /// Signal every worker and wait for in-flight ticks to finish.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.shutdown.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct TickTask {
        ticks: Arc<AtomicUsize>,
        interval: Duration,
    }

    impl BackgroundTask for TickTask {
        fn name(&self) -> &'static str {
            "tick"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        fn execute(&self) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_task_runs_periodically() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.register(Arc::new(TickTask {
            ticks: ticks.clone(),
            interval: Duration::from_millis(10),
        }));

        std::thread::sleep(Duration::from_millis(80));
        scheduler.shutdown();
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_shutdown_is_prompt_and_final() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.register(Arc::new(TickTask {
            ticks: ticks.clone(),
            interval: Duration::from_secs(3600),
        }));

        // The worker is mid-wait on a huge interval; shutdown must not wait
        // it out.
        let start = Instant::now();
        scheduler.shutdown();
        assert!(start.elapsed() < Duration::from_millis(500));

        let after = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_zero_interval_disables_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        scheduler.register(Arc::new(TickTask {
            ticks: ticks.clone(),
            interval: Duration::ZERO,
        }));

        std::thread::sleep(Duration::from_millis(20));
        scheduler.shutdown();
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
