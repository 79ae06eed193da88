use fiber_reactor::{Direction, Fiber, Reactor, RuntimeBuilder};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

fn socket_pair() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    let rc = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    assert_eq!(rc, 0, "socketpair failed: {}", std::io::Error::last_os_error());
    (fds[0], fds[1])
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

/// Honours `RUST_LOG` so runtime traces show up next to a failing test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_reactor_runs_tasks() {
    init_tracing();
    let reactor = Reactor::new(2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let counter = counter.clone();
        reactor.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    reactor.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 100, "stop should drain every task");
}

#[test]
fn test_readable_event_runs_callback() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();
    let (tx, rx) = mpsc::channel();

    reactor
        .add_event_with(left, Direction::Read, move || {
            tx.send(()).unwrap();
        })
        .unwrap();
    assert_eq!(reactor.pending_events(), 1);

    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err(), "nothing to read yet");

    let written = unsafe { libc::write(right, b"x".as_ptr().cast(), 1) };
    assert_eq!(written, 1);

    rx.recv_timeout(Duration::from_secs(5)).expect("callback should run once readable");
    assert_eq!(reactor.pending_events(), 0, "registrations are one-shot");

    reactor.stop();
    close(left);
    close(right);
}

#[test]
fn test_writable_event_fires_immediately() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();
    let (tx, rx) = mpsc::channel();

    reactor
        .add_event_with(left, Direction::Write, move || {
            tx.send(()).unwrap();
        })
        .unwrap();

    rx.recv_timeout(Duration::from_secs(5)).expect("empty socket is writable");

    reactor.stop();
    close(left);
    close(right);
}

#[test]
fn test_del_event_triggers_once() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();
    let counter = Arc::new(AtomicUsize::new(0));

    let counter_clone = counter.clone();
    reactor
        .add_event_with(left, Direction::Read, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(reactor.del_event(left, Direction::Read, true), "armed direction should be removed");
    assert!(!reactor.del_event(left, Direction::Read, true), "second removal finds nothing");
    reactor.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 1, "triggered waiter runs exactly once");
    close(left);
    close(right);
}

#[test]
fn test_del_event_without_trigger_drops_waiter() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();
    let counter = Arc::new(AtomicUsize::new(0));

    let counter_clone = counter.clone();
    reactor
        .add_event_with(left, Direction::Read, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(reactor.del_event(left, Direction::Read, false));
    unsafe { libc::write(right, b"x".as_ptr().cast(), 1) };
    reactor.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 0, "removed waiter must not run");
    close(left);
    close(right);
}

#[test]
fn test_cancel_all_triggers_both_directions() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();
    let counter = Arc::new(AtomicUsize::new(0));

    // Fill the send buffer so the write registration stays pending.
    let chunk = [0u8; 4096];
    while unsafe { libc::write(left, chunk.as_ptr().cast(), chunk.len()) } > 0 {}

    for direction in Direction::ALL {
        let counter = counter.clone();
        reactor
            .add_event_with(left, direction, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    assert_eq!(reactor.pending_events(), 2);

    assert!(reactor.cancel_all(left));
    assert!(!reactor.cancel_all(left), "nothing left to cancel");
    reactor.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 2, "each waiter runs once");
    assert_eq!(reactor.pending_events(), 0);
    close(left);
    close(right);
}

#[test]
fn test_fiber_parks_until_readable() {
    init_tracing();
    let reactor = Reactor::new(2).unwrap();
    let (left, right) = socket_pair();
    let (tx, rx) = mpsc::channel();
    let handle = reactor.handle();

    reactor.spawn(move || {
        handle.add_event(left, Direction::Read).unwrap();
        Fiber::yield_now();

        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(left, buf.as_mut_ptr().cast(), buf.len()) };
        tx.send(buf[..n as usize].to_vec()).unwrap();
    });

    thread::sleep(Duration::from_millis(30));
    unsafe { libc::write(right, b"wake".as_ptr().cast(), 4) };

    let data = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(data, b"wake", "fiber should resume after the descriptor became readable");

    reactor.stop();
    close(left);
    close(right);
}

#[test]
fn test_stop_wakes_parked_fiber() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();
    let (tx, rx) = mpsc::channel();
    let handle = reactor.handle();

    reactor.spawn(move || {
        handle.add_event(left, Direction::Read).unwrap();
        Fiber::yield_now();

        // Nothing was written: only shutdown can have resumed this fiber.
        let rearmed = handle.add_event(left, Direction::Read).map_err(|error| error.to_string());
        tx.send(rearmed).unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    assert_eq!(reactor.pending_events(), 1, "fiber should be parked on the descriptor");

    let start = Instant::now();
    reactor.stop();

    assert!(start.elapsed() < Duration::from_secs(2), "stop must not wait for an event that never comes");
    let rearmed = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(
        rearmed.is_err_and(|message| message.contains("shutting down")),
        "a stopping reactor refuses new registrations"
    );
    assert_eq!(reactor.pending_events(), 0);

    close(left);
    close(right);
}

#[test]
fn test_stop_runs_callback_waiters() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();
    let counter = Arc::new(AtomicUsize::new(0));

    let counter_clone = counter.clone();
    reactor
        .add_event_with(left, Direction::Read, move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    reactor.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 1, "armed callbacks are resubmitted on shutdown");
    close(left);
    close(right);
}

#[test]
fn test_channel_table_grows_for_high_descriptors() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, right) = socket_pair();

    // Duplicate onto a descriptor well past the initial table size.
    let high = unsafe { libc::fcntl(left, libc::F_DUPFD_CLOEXEC, 200) };
    assert!(high >= 200);

    let (tx, rx) = mpsc::channel();
    reactor
        .add_event_with(high, Direction::Read, move || {
            tx.send(()).unwrap();
        })
        .unwrap();

    unsafe { libc::write(right, b"x".as_ptr().cast(), 1) };
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    reactor.stop();
    close(high);
    close(left);
    close(right);
}

#[test]
fn test_use_caller_reactor() {
    init_tracing();
    let reactor = RuntimeBuilder::new()
        .name("caller_reactor")
        .threads(0)
        .use_caller(true)
        .build_reactor()
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let counter = counter.clone();
        reactor.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }

    let counter_clone = counter.clone();
    reactor.add_clock(
        Duration::from_millis(10),
        move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        },
        false,
    );

    assert!(Reactor::current().is_some(), "the building thread works for its reactor");
    reactor.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 11, "caller should run tasks and the clock");
    assert!(Reactor::current().is_none(), "stop detaches the building thread");
}

#[test]
#[should_panic(expected = "already has a Read waiter armed")]
fn test_double_registration_panics() {
    init_tracing();
    let reactor = Reactor::new(1).unwrap();
    let (left, _right) = socket_pair();

    reactor.add_event_with(left, Direction::Read, || {}).unwrap();
    let _ = reactor.add_event_with(left, Direction::Read, || {});
}
