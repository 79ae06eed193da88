use fiber_reactor::{Reactor, hook};
use std::os::fd::IntoRawFd;
use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::time::Duration;

// Kept in its own test binary: the woken reader retries on a descriptor
// number that a parallel test could otherwise reuse.
#[test]
fn test_close_wakes_parked_reader() {
    let reactor = Reactor::new(2).unwrap();
    let (left, right) = UnixStream::pair().unwrap();
    let (left, right) = (left.into_raw_fd(), right.into_raw_fd());
    let (tx, rx) = mpsc::channel();

    reactor.spawn(move || {
        let mut buf = [0u8; 8];
        let result = hook::read(left, &mut buf);
        tx.send(result.is_err()).unwrap();
    });

    let handle = reactor.handle();
    reactor.spawn(move || {
        // Wait until the reader has parked on the descriptor.
        while handle.pending_events() == 0 {
            hook::sleep(Duration::from_millis(5));
        }
        hook::close(left).unwrap();
    });

    let failed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(failed, "a read on a descriptor closed underneath it must fail");

    reactor.stop();
    assert!(hook::FdTable::global().get(left, false).is_none(), "close forgets the descriptor");
    hook::close(right).unwrap();
}
