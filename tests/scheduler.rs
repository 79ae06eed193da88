use fiber_reactor::{Fiber, Handle, RuntimeBuilder, Scheduler, State, Task};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

fn run_closures(threads: usize, count: usize) -> Vec<usize> {
    let scheduler = Scheduler::new(threads);
    scheduler.start().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..count {
        let seen = seen.clone();
        scheduler.spawn(move || seen.lock().unwrap().push(i));
    }
    scheduler.stop();

    let seen = seen.lock().unwrap().clone();
    seen
}

#[test]
fn test_single_worker_runs_all_tasks_in_order() {
    let seen = run_closures(1, 100);

    assert_eq!(seen, (0..100).collect::<Vec<_>>(), "one worker should run tasks FIFO");
}

#[test]
fn test_many_workers_run_each_task_once() {
    let seen = run_closures(4, 1000);

    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), 1000, "every task should run");
    assert_eq!(unique.len(), 1000, "no task should run twice");
}

#[test]
fn test_tasks_submitted_from_tasks() {
    let scheduler = Scheduler::new(2);
    scheduler.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let handle = scheduler.handle();
    let counter_clone = counter.clone();

    scheduler.spawn(move || {
        for _ in 0..10 {
            let counter = counter_clone.clone();
            handle.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    scheduler.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 10, "nested tasks should run before stop returns");
}

#[test]
fn test_fiber_task_is_resumed_until_done() {
    let scheduler = Scheduler::new(2);
    scheduler.start().unwrap();

    let steps = Arc::new(AtomicUsize::new(0));
    let steps_clone = steps.clone();
    let handle = scheduler.handle();

    let fiber = Fiber::new(move || {
        for _ in 0..3 {
            steps_clone.fetch_add(1, Ordering::SeqCst);
            // Reschedule ourselves, then give the worker back.
            handle.schedule(Fiber::current());
            Fiber::yield_now();
        }
    });
    scheduler.schedule(fiber.clone());
    scheduler.stop();

    assert_eq!(steps.load(Ordering::SeqCst), 3);
    assert_eq!(fiber.state(), State::Term, "fiber should have run to completion");
}

#[test]
fn test_spawn_on_pins_to_thread() {
    let scheduler = RuntimeBuilder::new().name("pinned").threads(3).build_scheduler();
    scheduler.start().unwrap();

    let (tx, rx) = mpsc::channel();
    scheduler.spawn(move || {
        tx.send(thread::current().id()).unwrap();
    });
    let target = rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let threads = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..20 {
        let threads = threads.clone();
        scheduler.spawn_on(move || threads.lock().unwrap().push(thread::current().id()), target);
    }
    scheduler.stop();

    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 20);
    assert!(threads.iter().all(|id| *id == target), "pinned tasks must stay on their thread");
}

#[test]
fn test_worker_threads_are_named() {
    let scheduler = RuntimeBuilder::new().name("named").threads(1).build_scheduler();
    scheduler.start().unwrap();

    let (tx, rx) = mpsc::channel();
    scheduler.spawn(move || {
        tx.send(thread::current().name().map(str::to_owned)).unwrap();
    });

    let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name.as_deref(), Some("named_0"));
}

#[test]
fn test_current_inside_task() {
    let scheduler = RuntimeBuilder::new().name("current").threads(1).build_scheduler();
    scheduler.start().unwrap();

    let (tx, rx) = mpsc::channel();
    scheduler.spawn(move || {
        let current = Scheduler::current();
        let is_scheduler = matches!(current, Some(Handle::Scheduler(_)));
        tx.send((is_scheduler, current.map(|h| h.name().to_owned()))).unwrap();
    });

    let (is_scheduler, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(is_scheduler, "workers should see their scheduler");
    assert_eq!(name.as_deref(), Some("current"));
    assert!(Scheduler::current().is_none(), "the test thread works for no scheduler");
}

#[test]
fn test_use_caller_without_workers() {
    let scheduler = RuntimeBuilder::new().threads(0).use_caller(true).build_scheduler();
    scheduler.start().unwrap();

    let caller = thread::current().id();
    let threads = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..5 {
        let threads = threads.clone();
        scheduler.spawn(move || threads.lock().unwrap().push(thread::current().id()));
    }

    assert!(threads.lock().unwrap().is_empty(), "nothing runs before stop with only the caller");
    scheduler.stop();

    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 5, "stop should drain the queue on the caller");
    assert!(threads.iter().all(|id| *id == caller));
}

#[test]
fn test_use_caller_with_workers() {
    let scheduler = RuntimeBuilder::new().threads(2).use_caller(true).build_scheduler();
    scheduler.start().unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..200 {
        let counter = counter.clone();
        scheduler.submit(Task::func(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }
    scheduler.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 200);
}

#[test]
fn test_stop_is_idempotent() {
    let scheduler = Scheduler::new(2);
    scheduler.start().unwrap();

    scheduler.stop();
    scheduler.stop();

    assert!(scheduler.is_stopping());
    assert_eq!(scheduler.active_workers(), 0);
}

#[test]
fn test_drop_stops_scheduler() {
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let scheduler = Scheduler::new(2);
        scheduler.start().unwrap();
        for _ in 0..50 {
            let counter = counter.clone();
            scheduler.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    assert_eq!(counter.load(Ordering::SeqCst), 50, "dropping the owner drains the queue");
}

#[test]
fn test_idle_workers_wait_for_work() {
    let scheduler = Scheduler::new(2);
    scheduler.start().unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(scheduler.idle_workers(), 2, "workers without work should be idle");
    assert_eq!(scheduler.pending_tasks(), 0);
}
