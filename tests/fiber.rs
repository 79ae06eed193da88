use fiber_reactor::{Fiber, State};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

#[test]
fn test_fiber_runs_to_completion() {
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();

    let fiber = Fiber::new(move || {
        ran_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(fiber.state(), State::Ready, "new fiber should be ready");

    fiber.resume();

    assert_eq!(fiber.state(), State::Term, "finished fiber should be terminated");
    assert_eq!(ran.load(Ordering::SeqCst), 1, "body should run exactly once");
}

#[test]
fn test_fiber_yield_and_resume() {
    let steps = Arc::new(Mutex::new(Vec::new()));
    let steps_clone = steps.clone();

    let fiber = Fiber::new(move || {
        steps_clone.lock().unwrap().push("first");
        Fiber::yield_now();
        steps_clone.lock().unwrap().push("second");
    });

    fiber.resume();
    assert_eq!(*steps.lock().unwrap(), vec!["first"], "fiber should stop at the yield");
    assert_eq!(fiber.state(), State::Ready, "yielded fiber should be ready again");

    fiber.resume();
    assert_eq!(*steps.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(fiber.state(), State::Term);
}

#[test]
fn test_fiber_sees_itself_as_current() {
    let main_id = Fiber::current_id();
    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();

    let fiber = Fiber::new(move || {
        *seen_clone.lock().unwrap() = Some(Fiber::current_id());
    });
    fiber.resume();

    assert_eq!(*seen.lock().unwrap(), Some(fiber.id()), "inside the fiber current() is the fiber");
    assert_eq!(Fiber::current_id(), main_id, "after returning current() is the main fiber again");
    assert!(Fiber::current().is_main());
}

#[test]
fn test_fiber_ids_increase() {
    let first = Fiber::new(|| {});
    let second = Fiber::new(|| {});

    assert!(second.id() > first.id(), "fiber ids should be monotonic");

    first.resume();
    second.resume();
}

#[test]
fn test_reset_reuses_stack() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let fiber = Fiber::new(move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
    });
    let stack = fiber.stack_base();
    fiber.resume();

    let counter_clone = counter.clone();
    fiber.reset(move || {
        counter_clone.fetch_add(10, Ordering::SeqCst);
    });

    assert_eq!(fiber.state(), State::Ready, "reset fiber should be ready");
    assert_eq!(fiber.stack_base(), stack, "reset must keep the same stack");

    fiber.resume();
    assert_eq!(counter.load(Ordering::SeqCst), 11);
    assert_eq!(fiber.state(), State::Term);
}

#[test]
fn test_custom_stack_size() {
    let fiber = Fiber::with_options(|| {}, 64 * 1024, true);

    assert_eq!(fiber.stack_size(), 64 * 1024);
    assert!(fiber.stack_base().is_some(), "normal fibers own a stack");

    fiber.resume();
}

#[test]
fn test_deep_recursion_on_fiber_stack() {
    fn depth(n: u64) -> u64 {
        let frame = std::hint::black_box([n; 16]);
        if n == 0 { 0 } else { 1 + depth(frame[0] - 1) }
    }

    let result = Arc::new(AtomicUsize::new(0));
    let result_clone = result.clone();

    let fiber = Fiber::new(move || {
        result_clone.store(depth(200) as usize, Ordering::SeqCst);
    });
    fiber.resume();

    assert_eq!(result.load(Ordering::SeqCst), 200);
}

#[test]
fn test_nested_fibers_with_main_hand_off() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_clone = order.clone();

    let outer = Fiber::with_options(
        move || {
            order_clone.lock().unwrap().push(1);
            Fiber::yield_now();
            order_clone.lock().unwrap().push(3);
        },
        fiber_reactor::DEFAULT_STACK_SIZE,
        false,
    );

    outer.resume();
    order.lock().unwrap().push(2);
    outer.resume();

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
#[should_panic(expected = "invariant violated")]
fn test_resume_terminated_fiber_panics() {
    let fiber = Fiber::new(|| {});
    fiber.resume();

    fiber.resume();
}

#[test]
#[should_panic(expected = "resume() on fiber")]
fn test_resume_fiber_running_elsewhere_panics() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let fiber = Fiber::new(move || {
        started_tx.send(()).unwrap();
        // Returns once the resuming thread below has unwound.
        let _ = release_rx.recv();
    });

    let runner = fiber.clone();
    thread::spawn(move || runner.resume());
    started_rx.recv().unwrap();
    assert_eq!(fiber.state(), State::Running);

    let _release = release_tx;
    fiber.resume();
}

#[test]
#[should_panic(expected = "invariant violated")]
fn test_reset_ready_fiber_panics() {
    let fiber = Fiber::new(|| {});

    fiber.reset(|| {});
}
