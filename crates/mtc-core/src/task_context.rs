use std::cell::Cell;

use crate::engine::WorkerId;

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Identity of the engine worker executing the calling task, if any.
pub fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}

pub(crate) fn with_worker<R>(worker: WorkerId, operation: impl FnOnce() -> R) -> R {
    CURRENT_WORKER.with(|slot| {
        let previous = slot.replace(Some(worker));
        let result = operation();
        slot.set(previous);
        result
    })
}
