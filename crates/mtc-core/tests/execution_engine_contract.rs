use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use mtc_core::current_worker;
use mtc_core::engine::{EngineState, ExecutionEngine, WorkerId};

fn engine_with_threads(threads: usize) -> Arc<ExecutionEngine> {
    let engine = Arc::new(ExecutionEngine::new());
    engine.set_thread_count(threads);
    engine
}

fn post_stop(engine: &Arc<ExecutionEngine>) {
    let stopper = engine.clone();
    engine.post(move || stopper.stop());
}

#[test]
fn scheduled_tasks_complete_before_start_returns() {
    for threads in [1, 2, 4, 8] {
        let engine = engine_with_threads(threads);
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..40 {
            let completed = completed.clone();
            engine.post(move || {
                thread::sleep(Duration::from_millis(1));
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }
        post_stop(&engine);

        engine.start().unwrap();

        assert_eq!(completed.load(Ordering::SeqCst), 40, "threads = {threads}");
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.is_running());
        assert_eq!(engine.active_workers(), 0);
    }
}

#[test]
fn pause_callback_runs_once_while_no_task_is_active() {
    let engine = engine_with_threads(4);
    let active = Arc::new(AtomicUsize::new(0));
    let callback_calls = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(Mutex::new(Vec::new()));

    for index in 0..32 {
        let active = active.clone();
        let pauser = engine.clone();
        let callback_calls = callback_calls.clone();
        let observed = observed.clone();
        engine.post(move || {
            active.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));

            if index == 8 {
                let active = active.clone();
                let stopper = pauser.clone();
                pauser.pause(move |engine| {
                    callback_calls.fetch_add(1, Ordering::SeqCst);
                    observed.lock().unwrap().push((
                        active.load(Ordering::SeqCst),
                        engine.active_workers(),
                        engine.state(),
                    ));
                    engine.post(move || stopper.stop());
                });
            }

            active.fetch_sub(1, Ordering::SeqCst);
        });
    }

    engine.start().unwrap();

    assert_eq!(callback_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *observed.lock().unwrap(),
        vec![(0, 0, EngineState::CallbackExecuting)]
    );
    assert!(engine.cycles() >= 2);
}

#[test]
fn work_queued_before_pause_survives_the_drain() {
    let engine = engine_with_threads(2);
    let completed = Arc::new(AtomicUsize::new(0));

    {
        let pauser = engine.clone();
        engine.post(move || {
            let stopper = pauser.clone();
            pauser.pause(move |engine| {
                engine.post(move || stopper.stop());
            });
        });
    }
    for _ in 0..10 {
        let completed = completed.clone();
        engine.post(move || {
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    engine.start().unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 10);
}

#[test]
fn stop_inside_callback_returns_without_another_cycle() {
    let engine = engine_with_threads(3);
    let late_task_ran = Arc::new(AtomicBool::new(false));

    {
        let pauser = engine.clone();
        let late_task_ran = late_task_ran.clone();
        engine.post(move || {
            pauser.pause(move |engine| {
                let late_task_ran = late_task_ran.clone();
                engine.post(move || late_task_ran.store(true, Ordering::SeqCst));
                engine.stop();
            });
        });
    }

    engine.start().unwrap();

    assert_eq!(engine.cycles(), 1);
    assert!(!late_task_ran.load(Ordering::SeqCst));
    assert_eq!(engine.context().pending(), 1);
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn second_pause_before_drain_replaces_the_first() {
    let engine = engine_with_threads(2);
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    {
        let pauser = engine.clone();
        let first = first.clone();
        let second = second.clone();
        engine.post(move || {
            pauser.pause(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            });
            pauser.pause(move |engine| {
                second.fetch_add(1, Ordering::SeqCst);
                engine.stop();
            });
        });
    }

    engine.start().unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn pause_requested_inside_callback_runs_after_next_drain() {
    let engine = engine_with_threads(2);
    let order = Arc::new(Mutex::new(Vec::new()));

    {
        let pauser = engine.clone();
        let order = order.clone();
        engine.post(move || {
            pauser.pause(move |engine| {
                order.lock().unwrap().push("first");
                let order = order.clone();
                engine.pause(move |engine| {
                    order.lock().unwrap().push("second");
                    engine.stop();
                });
            });
        });
    }

    engine.start().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(engine.cycles(), 2);
}

#[test]
fn stop_from_another_thread_ends_an_idle_engine() {
    let engine = engine_with_threads(2);
    let stopper = engine.clone();

    let helper = thread::spawn(move || {
        while !stopper.is_running() {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(20));
        stopper.stop();
        stopper.stop();
    });

    engine.start().unwrap();
    helper.join().unwrap();

    assert!(!engine.is_running());
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[test]
fn workerless_engine_still_honours_pause_and_stop() {
    let engine = engine_with_threads(0);
    let task_ran = Arc::new(AtomicBool::new(false));
    let callback_ran = Arc::new(AtomicBool::new(false));

    {
        let task_ran = task_ran.clone();
        engine.post(move || task_ran.store(true, Ordering::SeqCst));
    }

    let pauser = engine.clone();
    let flag = callback_ran.clone();
    let helper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        pauser.pause(move |engine| {
            flag.store(true, Ordering::SeqCst);
            engine.stop();
        });
    });

    engine.start().unwrap();
    helper.join().unwrap();

    assert!(callback_ran.load(Ordering::SeqCst));
    assert!(!task_ran.load(Ordering::SeqCst));
}

#[test]
fn tasks_observe_their_worker_identity() {
    let engine = engine_with_threads(3);
    let seen: Arc<Mutex<Vec<Option<WorkerId>>>> = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..12 {
        let seen = seen.clone();
        engine.post(move || seen.lock().unwrap().push(current_worker()));
    }
    post_stop(&engine);

    engine.start().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 12);
    for worker in seen.iter() {
        let worker = worker.expect("task ran outside a worker");
        assert_eq!(worker.cycle, 1);
        assert!(worker.index < 3);
    }
    assert_eq!(current_worker(), None);
}

#[test]
fn panicking_task_does_not_take_down_the_pool() {
    let engine = engine_with_threads(1);
    let completed = Arc::new(AtomicUsize::new(0));

    engine.post(|| panic!("task failure"));
    {
        let completed = completed.clone();
        engine.post(move || {
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }
    post_stop(&engine);

    engine.start().unwrap();

    assert_eq!(completed.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_racing_the_post_callback_restart_still_ends_start() {
    for _ in 0..200 {
        let engine = engine_with_threads(2);
        let callback_done = Arc::new(AtomicBool::new(false));

        let pauser = engine.clone();
        let flag = callback_done.clone();
        let stopper = thread::spawn(move || {
            while !pauser.is_running() {
                thread::yield_now();
            }
            let done = flag.clone();
            pauser.pause(move |_| done.store(true, Ordering::SeqCst));
            while !flag.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            pauser.stop();
        });

        let (finished_tx, finished_rx) = mpsc::channel();
        let runner = engine.clone();
        thread::spawn(move || {
            let result = runner.start();
            let _ = finished_tx.send(result);
        });

        let result = finished_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("start() must return after stop()");
        result.unwrap();
        stopper.join().unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
