pub mod context;

pub use context::{Task, TaskContext, WorkGuard};

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::config::{ConfigOptions, WORKER_THREADS};
use crate::models::{CoreError, CoreErrorKind};
use crate::task_context;

pub type EngineResult<T> = Result<T, CoreError>;

/// One-shot callback run while no worker is active.
pub type SyncCallback = Box<dyn FnOnce(&ExecutionEngine) + Send + 'static>;

const DEFAULT_THREAD_COUNT: usize = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct WorkerId {
    pub cycle: u64,
    pub index: usize,
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cycle, self.index)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum EngineState {
    Stopped,
    Running,
    Draining,
    CallbackExecuting,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Draining,
            3 => Self::CallbackExecuting,
            _ => Self::Stopped,
        }
    }
}

/// Runs a pool of worker threads against one shared [`TaskContext`].
///
/// Every cycle spawns the configured number of workers and joins all of them
/// before a pending pause callback runs, so the callback never overlaps a
/// task. The pool is rebuilt after each drain.
pub struct ExecutionEngine {
    context: TaskContext,
    thread_count: AtomicUsize,
    running: AtomicBool,
    state: AtomicU8,
    sync_callback: Mutex<Option<SyncCallback>>,
    cycles: AtomicU64,
    active_workers: AtomicUsize,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine {
    pub fn new() -> Self {
        Self {
            context: TaskContext::new(),
            thread_count: AtomicUsize::new(DEFAULT_THREAD_COUNT),
            running: AtomicBool::new(false),
            state: AtomicU8::new(EngineState::Stopped as u8),
            sync_callback: Mutex::new(None),
            cycles: AtomicU64::new(0),
            active_workers: AtomicUsize::new(0),
        }
    }

    pub fn from_options(options: &ConfigOptions) -> Self {
        let engine = Self::new();
        let configured = options.get_integer_or(WORKER_THREADS, DEFAULT_THREAD_COUNT as i64);
        let threads = usize::try_from(configured).unwrap_or_else(|_| {
            tracing::warn!(
                configured,
                "negative worker thread count; engine will not execute tasks"
            );
            0
        });
        engine.set_thread_count(threads);
        engine
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.context.post(task);
    }

    /// Pool size for the next cycle. A pool that is already running keeps
    /// its size.
    pub fn set_thread_count(&self, threads: usize) {
        self.thread_count.store(threads, Ordering::SeqCst);
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Number of worker cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread for the engine's whole lifetime.
    pub fn start(&self) -> EngineResult<()> {
        self.running.store(true, Ordering::SeqCst);
        self.set_state(EngineState::Running);
        let _keep_alive = self.context.work_guard();
        tracing::info!(threads = self.thread_count(), "execution engine started");

        loop {
            let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
            if let Err(error) = self.run_cycle(cycle) {
                self.running.store(false, Ordering::SeqCst);
                self.set_state(EngineState::Stopped);
                return Err(error);
            }

            if let Some(callback) = self.take_callback() {
                self.set_state(EngineState::CallbackExecuting);
                tracing::debug!(cycle, "running pause callback with all workers joined");
                callback(self);
            }

            // Checked under the context lock so a stop() racing the restart
            // is never cleared by it.
            if !self.context.restart_unless(|| !self.is_running()) {
                break;
            }

            // A pause requested while the callback ran must still drain.
            if self.has_pending_callback() {
                self.context.stop();
                self.set_state(EngineState::Draining);
            } else {
                self.set_state(EngineState::Running);
            }
        }

        self.set_state(EngineState::Stopped);
        tracing::info!(cycles = self.cycles(), "execution engine stopped");
        Ok(())
    }

    /// Records `callback` and asks the workers to drain. Does not wait; a
    /// later call before the callback fires replaces it.
    pub fn pause(&self, callback: impl FnOnce(&ExecutionEngine) + Send + 'static) {
        let replaced = self.lock_callback().replace(Box::new(callback)).is_some();
        if replaced {
            tracing::debug!("pending pause callback replaced");
        }
        self.mark_draining();
        self.context.stop();
    }

    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            tracing::debug!(worker = ?task_context::current_worker(), "engine stop requested");
        }
        self.mark_draining();
        self.context.stop();
    }

    pub fn restart(&self) {
        self.context.restart();
    }

    fn run_cycle(&self, cycle: u64) -> EngineResult<()> {
        let threads = self.thread_count();
        if threads == 0 {
            tracing::warn!(
                cycle,
                "engine has no worker threads; waiting for stop or pause"
            );
            self.context.wait_stopped();
            return Ok(());
        }

        tracing::debug!(cycle, threads, "spawning worker pool");
        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(threads);
            for index in 0..threads {
                let worker = WorkerId { cycle, index };
                let spawned = thread::Builder::new()
                    .name(format!("mtc-worker-{index}"))
                    .spawn_scoped(scope, move || self.worker_loop(worker));

                match spawned {
                    Ok(handle) => workers.push((worker, handle)),
                    Err(error) => {
                        // Already spawned workers must leave before the scope joins them.
                        self.context.stop();
                        return Err(CoreError::new(
                            CoreErrorKind::ThreadSpawn,
                            format!("failed to spawn worker {worker}: {error}"),
                        ));
                    }
                }
            }

            for (worker, handle) in workers {
                if handle.join().is_err() {
                    tracing::error!(%worker, "worker thread terminated abnormally");
                }
            }
            Ok(())
        })
    }

    fn worker_loop(&self, worker: WorkerId) -> usize {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        let executed = task_context::with_worker(worker, || self.context.run());
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(%worker, executed, "worker exited");
        executed
    }

    fn take_callback(&self) -> Option<SyncCallback> {
        self.lock_callback().take()
    }

    fn has_pending_callback(&self) -> bool {
        self.lock_callback().is_some()
    }

    fn mark_draining(&self) {
        let _ = self.state.compare_exchange(
            EngineState::Running as u8,
            EngineState::Draining as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_callback(&self) -> MutexGuard<'_, Option<SyncCallback>> {
        self.sync_callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineState, ExecutionEngine};
    use crate::config::{ConfigOptions, ConfigValue, WORKER_THREADS};

    #[test]
    fn negative_configured_thread_count_degrades_to_zero() {
        let options = ConfigOptions::new().with(WORKER_THREADS, ConfigValue::Integer(-3));
        assert_eq!(ExecutionEngine::from_options(&options).thread_count(), 0);
    }

    #[test]
    fn missing_thread_count_defaults_to_one_worker() {
        let engine = ExecutionEngine::from_options(&ConfigOptions::new());
        assert_eq!(engine.thread_count(), 1);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.is_running());
    }
}
