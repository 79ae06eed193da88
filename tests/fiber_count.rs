use fiber_reactor::Fiber;

// Kept in its own test binary: the live counter is process-wide.
#[test]
fn test_live_count_tracks_fibers() {
    let main = Fiber::current();
    let base = Fiber::live_count();

    let fibers: Vec<_> = (0..8).map(|_| Fiber::new(|| {})).collect();
    assert_eq!(Fiber::live_count(), base + 8, "each fiber should be counted");

    for fiber in &fibers {
        fiber.resume();
    }
    drop(fibers);

    assert_eq!(Fiber::live_count(), base, "dropped fibers should no longer count");
    assert!(main.is_main());
}
