use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::task_context::current_worker;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared run-to-completion work queue consumed by engine workers.
///
/// `run` returns once the context is stopped, or once the queue is empty with
/// nothing in flight and no [`WorkGuard`] held. Work queued while stopped is
/// kept and executed after [`TaskContext::restart`].
#[derive(Default)]
pub struct TaskContext {
    state: Mutex<ContextState>,
    signal: Condvar,
}

#[derive(Default)]
struct ContextState {
    queue: VecDeque<Task>,
    stopped: bool,
    in_flight: usize,
    work_guards: usize,
}

impl ContextState {
    fn out_of_work(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0 && self.work_guards == 0
    }
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.lock();
        state.queue.push_back(Box::new(task));
        drop(state);
        self.signal.notify_one();
    }

    /// Executes queued tasks on the calling thread and returns how many ran.
    pub fn run(&self) -> usize {
        let mut executed = 0;
        while let Some(task) = self.next_task() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(
                    worker = ?current_worker(),
                    message = %panic_message(payload.as_ref()),
                    "task panicked; continuing with next task"
                );
            }
            executed += 1;
            self.finish_task();
        }
        executed
    }

    /// Asks every active `run` to return once its current task completes.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.signal.notify_all();
    }

    pub fn restart(&self) {
        self.lock().stopped = false;
    }

    /// Restarts the context unless `halted` holds. The predicate is checked
    /// under the context lock, so a concurrent [`TaskContext::stop`] either
    /// is seen by it or lands after the restart. Returns whether the context
    /// was restarted.
    pub fn restart_unless(&self, halted: impl FnOnce() -> bool) -> bool {
        let mut state = self.lock();
        if halted() {
            return false;
        }
        state.stopped = false;
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Keeps idle `run` loops waiting for work until the guard is dropped.
    pub fn work_guard(&self) -> WorkGuard<'_> {
        self.lock().work_guards += 1;
        WorkGuard { context: self }
    }

    /// Parks the caller until the context is stopped.
    pub fn wait_stopped(&self) {
        let mut state = self.lock();
        while !state.stopped {
            state = self
                .signal
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn next_task(&self) -> Option<Task> {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(task) = state.queue.pop_front() {
                state.in_flight += 1;
                return Some(task);
            }
            if state.out_of_work() {
                return None;
            }
            state = self
                .signal
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish_task(&self) {
        let mut state = self.lock();
        state.in_flight -= 1;
        if state.out_of_work() {
            self.signal.notify_all();
        }
    }

    fn release_guard(&self) {
        let mut state = self.lock();
        state.work_guards -= 1;
        if state.out_of_work() {
            self.signal.notify_all();
        }
    }

    // Tasks never execute while the lock is held, so a poisoned lock still
    // guards consistent state.
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkGuard<'a> {
    context: &'a TaskContext,
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        self.context.release_guard();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
