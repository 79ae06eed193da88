use fiber_reactor::{DEFAULT_STACK_SIZE, Fiber, RuntimeBuilder, RuntimeConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

#[test]
fn test_builder_defaults() {
    let builder = RuntimeBuilder::new();
    let config = builder.config();

    assert_eq!(config.name, "reactor");
    assert_eq!(config.threads, 1);
    assert!(!config.use_caller);
    assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
    assert!(config.hook, "hooking should be on by default");
    assert_eq!(config.max_idle_timeout, Duration::from_millis(3000));
    assert_eq!(config.max_events, 256);
    assert_eq!(config.connect_timeout, Some(Duration::from_millis(5000)));
}

#[test]
fn test_builder_setters() {
    let builder = RuntimeBuilder::new()
        .name("custom")
        .threads(3)
        .use_caller(true)
        .stack_size(256 * 1024)
        .hook(false)
        .max_idle_timeout(Duration::from_millis(100))
        .max_events(16)
        .connect_timeout(None);
    let config = builder.config();

    assert_eq!(config.name, "custom");
    assert_eq!(config.threads, 3);
    assert!(config.use_caller);
    assert_eq!(config.stack_size, 256 * 1024);
    assert!(!config.hook);
    assert_eq!(config.max_idle_timeout, Duration::from_millis(100));
    assert_eq!(config.max_events, 16);
    assert_eq!(config.connect_timeout, None);
}

#[test]
fn test_config_default_matches_builder() {
    let config = RuntimeConfig::default();

    assert_eq!(config.name, RuntimeBuilder::new().config().name);
    assert_eq!(config.threads, RuntimeBuilder::new().config().threads);
}

#[test]
fn test_build_scheduler_runs_tasks() {
    let scheduler = RuntimeBuilder::new().threads(2).build_scheduler();
    scheduler.start().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let counter = counter.clone();
        scheduler.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    scheduler.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 5, "All 5 tasks should have run");
}

#[test]
fn test_build_reactor_runs_tasks() {
    let reactor = RuntimeBuilder::new().name("built").threads(2).build_reactor().unwrap();
    let state = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let state = state.clone();
        reactor.spawn(move || state.lock().unwrap().push(i));
    }
    reactor.stop();

    assert_eq!(reactor.name(), "built");
    assert_eq!(state.lock().unwrap().len(), 3, "Should have 3 values");
}

#[test]
fn test_stack_size_applies_to_task_fibers() {
    let reactor = RuntimeBuilder::new().stack_size(64 * 1024).build_reactor().unwrap();
    let (tx, rx) = mpsc::channel();

    reactor.spawn(move || {
        tx.send(Fiber::current().stack_size()).unwrap();
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 64 * 1024);
}

#[test]
fn test_multiple_instances() {
    let first = RuntimeBuilder::new().name("first").build_reactor().unwrap();
    let second = RuntimeBuilder::new().name("second").build_reactor().unwrap();
    let (tx, rx) = mpsc::channel();

    let first_tx = tx.clone();
    first.spawn(move || first_tx.send(10).unwrap());
    second.spawn(move || tx.send(20).unwrap());

    let sum: i32 = (0..2).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).sum();
    assert_eq!(sum, 30);
}

#[test]
fn test_zero_threads_without_caller_still_works() {
    let scheduler = RuntimeBuilder::new().threads(0).build_scheduler();
    scheduler.start().unwrap();
    let (tx, rx) = mpsc::channel();

    scheduler.spawn(move || tx.send(()).unwrap());

    rx.recv_timeout(Duration::from_secs(5))
        .expect("a scheduler always has at least one worker");
}
