//! Ordered set of armed deadlines.
//!
//! A [`ClockManager`] keeps every armed [`Clock`] in a map ordered by
//! `(deadline, id)`. The id is a process-wide counter, so clocks sharing a
//! deadline still have a strict order: the one created first fires first.
//!
//! The owner of the manager (a reactor) asks for the time until the earliest
//! deadline, blocks at most that long, then drains the expired callbacks and
//! runs them as tasks. When a newly armed clock becomes the earliest one the
//! manager calls its front notifier so a blocked owner can recompute its wait.
//!
//! # Example
//! ```ignore
//! use fiber_reactor::ClockManager;
//! use std::time::Duration;
//!
//! let clocks = ClockManager::new();
//! let clock = clocks.add_clock(Duration::from_millis(10), || println!("fired"), false);
//!
//! std::thread::sleep(Duration::from_millis(20));
//! for callback in clocks.drain_expired() {
//!     callback();
//! }
//! assert!(!clock.cancel(), "a fired one-shot clock cannot be canceled");
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Callback run when a clock expires.
pub type ClockCallback = Arc<dyn Fn() + Send + Sync + 'static>;

type Notifier = Box<dyn Fn() + Send + Sync + 'static>;

static NEXT_CLOCK_ID: AtomicU64 = AtomicU64::new(0);

struct ClockState {
    period: Duration,
    deadline: Instant,
    /// `None` once the clock was canceled or a one-shot clock fired.
    callback: Option<ClockCallback>,
}

struct ClockEntry {
    id: u64,
    recurring: bool,
    state: Mutex<ClockState>,
}

struct Shared {
    clocks: RwLock<BTreeMap<(Instant, u64), Arc<ClockEntry>>>,
    /// Set once the front notifier ran; cleared when the owner reads the next deadline.
    tickled: AtomicBool,
    on_front: Option<Notifier>,
}

/// Handle to an armed deadline, returned by [`ClockManager::add_clock`].
///
/// Dropping the handle does not cancel the clock.
pub struct Clock {
    entry: Arc<ClockEntry>,
    manager: Weak<Shared>,
}

impl Clock {
    /// Disarms the clock.
    ///
    /// Returns false when the clock already fired (one-shot) or was canceled.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.manager.upgrade() else {
            return false;
        };

        let mut clocks = shared.clocks.write();
        let mut state = self.entry.state.lock();
        if state.callback.take().is_none() {
            return false;
        }

        clocks.remove(&(state.deadline, self.entry.id));
        true
    }

    /// Re-arms the clock one period from now.
    pub fn refresh(&self) -> bool {
        let Some(shared) = self.manager.upgrade() else {
            return false;
        };

        let mut clocks = shared.clocks.write();
        let mut state = self.entry.state.lock();
        if state.callback.is_none() {
            return false;
        }

        let Some(entry) = clocks.remove(&(state.deadline, self.entry.id)) else {
            return false;
        };

        state.deadline = Instant::now() + state.period;
        clocks.insert((state.deadline, self.entry.id), entry);
        true
    }

    /// Changes the period.
    ///
    /// With `from_now` the new deadline is `now + period`; otherwise it is
    /// measured from the moment the current period started.
    pub fn reset(&self, period: Duration, from_now: bool) -> bool {
        let Some(shared) = self.manager.upgrade() else {
            return false;
        };

        let at_front = {
            let mut clocks = shared.clocks.write();
            let mut state = self.entry.state.lock();
            if state.callback.is_none() {
                return false;
            }
            if period == state.period && !from_now {
                return true;
            }

            let key = (state.deadline, self.entry.id);
            let Some(entry) = clocks.remove(&key) else {
                return false;
            };

            let now = Instant::now();
            let start = if from_now {
                now
            } else {
                state.deadline.checked_sub(state.period).unwrap_or(now)
            };

            state.period = period;
            state.deadline = start + period;

            let key = (state.deadline, self.entry.id);
            clocks.insert(key, entry);
            shared.is_front(&clocks, &key)
        };

        if at_front {
            shared.notify_front();
        }

        true
    }

    pub fn period(&self) -> Duration {
        self.entry.state.lock().period
    }

    pub fn deadline(&self) -> Instant {
        self.entry.state.lock().deadline
    }

    pub fn is_recurring(&self) -> bool {
        self.entry.recurring
    }

    /// True while the clock is armed.
    pub fn is_pending(&self) -> bool {
        self.entry.state.lock().callback.is_some()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.entry.state.lock();

        f.debug_struct("Clock")
            .field("id", &self.entry.id)
            .field("period", &state.period)
            .field("recurring", &self.entry.recurring)
            .field("pending", &state.callback.is_some())
            .finish()
    }
}

impl Shared {
    fn is_front(&self, clocks: &BTreeMap<(Instant, u64), Arc<ClockEntry>>, key: &(Instant, u64)) -> bool {
        clocks.keys().next() == Some(key) && !self.tickled.swap(true, Ordering::AcqRel)
    }

    fn notify_front(&self) {
        if let Some(notify) = &self.on_front {
            notify();
        }
    }
}

/// Ordered collection of armed clocks.
pub struct ClockManager {
    shared: Arc<Shared>,
}

impl Default for ClockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockManager {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a manager that calls `on_front` whenever a clock becomes the earliest deadline.
    pub(crate) fn with_notifier<F>(on_front: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(Some(Box::new(on_front)))
    }

    fn build(on_front: Option<Notifier>) -> Self {
        Self {
            shared: Arc::new(Shared {
                clocks: RwLock::new(BTreeMap::new()),
                tickled: AtomicBool::new(false),
                on_front,
            }),
        }
    }

    /// Arms a clock expiring after `period`.
    ///
    /// # Arguments
    /// * `period` - Delay until the first expiry, and between expiries when recurring
    /// * `callback` - Run (as a task, when owned by a reactor) on every expiry
    /// * `recurring` - Re-arm at `now + period` after each expiry
    pub fn add_clock<F>(&self, period: Duration, callback: F, recurring: bool) -> Clock
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_clock_at(Instant::now() + period, period, Arc::new(callback), recurring)
    }

    /// Arms a clock whose callback only runs while `guard` is still alive.
    ///
    /// Lets the party that armed the clock give up on it by dropping the
    /// guard, without synchronizing with the thread that fires it.
    pub fn add_cond_clock<F, T>(&self, period: Duration, callback: F, guard: Weak<T>, recurring: bool) -> Clock
    where
        F: Fn() + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        self.add_clock(
            period,
            move || {
                if guard.upgrade().is_some() {
                    callback();
                }
            },
            recurring,
        )
    }

    pub(crate) fn add_clock_at(
        &self,
        deadline: Instant,
        period: Duration,
        callback: ClockCallback,
        recurring: bool,
    ) -> Clock {
        let id = NEXT_CLOCK_ID.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(ClockEntry {
            id,
            recurring,
            state: Mutex::new(ClockState {
                period,
                deadline,
                callback: Some(callback),
            }),
        });

        let at_front = {
            let mut clocks = self.shared.clocks.write();
            let key = (deadline, id);
            clocks.insert(key, Arc::clone(&entry));
            self.shared.is_front(&clocks, &key)
        };

        if at_front {
            self.shared.notify_front();
        }

        Clock {
            entry,
            manager: Arc::downgrade(&self.shared),
        }
    }

    /// Time until the earliest deadline; `None` when no clock is armed.
    ///
    /// Returns zero when a deadline already passed.
    pub fn next_deadline_delta(&self) -> Option<Duration> {
        let clocks = self.shared.clocks.read();
        self.shared.tickled.store(false, Ordering::Release);

        clocks
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()))
    }

    /// Removes every expired clock and returns their callbacks in deadline order.
    ///
    /// Recurring clocks are re-armed at `now + period`; one-shot clocks are
    /// disarmed so a later [`Clock::cancel`] returns false.
    pub fn drain_expired(&self) -> Vec<ClockCallback> {
        let now = Instant::now();
        let mut clocks = self.shared.clocks.write();

        let mut expired = Vec::new();
        while let Some(first) = clocks.first_entry() {
            if first.key().0 > now {
                break;
            }
            expired.push(first.remove());
        }

        let mut callbacks = Vec::with_capacity(expired.len());
        for entry in expired {
            let mut state = entry.state.lock();
            let Some(callback) = state.callback.clone() else {
                continue;
            };

            if entry.recurring {
                state.deadline = now + state.period;
                clocks.insert((state.deadline, entry.id), Arc::clone(&entry));
            } else {
                state.callback = None;
            }

            callbacks.push(callback);
        }

        callbacks
    }

    pub fn has_clocks(&self) -> bool {
        !self.shared.clocks.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.shared.clocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_clocks()
    }
}

impl fmt::Debug for ClockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockManager").field("clocks", &self.len()).finish()
    }
}
