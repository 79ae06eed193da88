//! Reactor internals: the scheduler core plus epoll, channels and clocks.
//!
//! Idle workers block in `epoll_wait`, bounded by the earliest clock deadline
//! and the configured idle cap. When the wait returns they:
//!
//! 1. submit the callbacks of every expired clock as tasks;
//! 2. disarm each ready direction of each reported descriptor and submit
//!    its waiter to the scheduler that registered it;
//! 3. yield back to the worker loop so the queued work runs.
//!
//! Registrations are one-shot: a direction that fired, timed out or was
//! removed must be armed again before it can fire again.
//!
//! Once stop was requested no new registrations are accepted, and every idle
//! pass disarms whatever is still armed, resuming its waiters. Parked fibers
//! then see their hooked call fail instead of keeping the reactor alive.

use crate::builder::RuntimeConfig;
use crate::error::{Error, Result};
use crate::fiber::Fiber;
use crate::reactor::ReactorHandle;
use crate::reactor::channel::{Callback, Channel, Waiter};
use crate::reactor::event::{Direction, Interest};
use crate::reactor::poller::{EpollPoller, WAKE_TOKEN, Wakeup};
use crate::runtime::Handle;
use crate::runtime::context;
use crate::runtime::core::Core;
use crate::runtime::driver::{self, Driver};
use crate::task::Task;
use crate::time::ClockManager;
use crate::utils::invariant;

use parking_lot::RwLock;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, trace};

const INITIAL_CHANNELS: usize = 32;

pub(crate) struct ReactorInner {
    core: Core,
    poller: EpollPoller,
    wakeup: Arc<Wakeup>,
    channels: RwLock<Vec<Arc<Channel>>>,
    pub(crate) clocks: ClockManager,
    /// Number of armed directions across all channels.
    pending: AtomicUsize,
}

impl ReactorInner {
    pub(crate) fn new(config: RuntimeConfig) -> Result<Self> {
        let poller = EpollPoller::new()?;
        let wakeup = Arc::new(Wakeup::new()?);

        poller
            .add(
                wakeup.as_raw_fd(),
                WAKE_TOKEN,
                (libc::EPOLLIN | libc::EPOLLET) as u32,
            )
            .map_err(|source| Error::Register {
                fd: wakeup.as_raw_fd(),
                op: "add",
                source,
            })?;

        let clocks = {
            let wakeup = Arc::clone(&wakeup);
            ClockManager::with_notifier(move || wakeup.wake())
        };

        let channels = (0..INITIAL_CHANNELS as RawFd)
            .map(|fd| Arc::new(Channel::new(fd)))
            .collect();

        Ok(Self {
            core: Core::new(config),
            poller,
            wakeup,
            channels: RwLock::new(channels),
            clocks,
            pending: AtomicUsize::new(0),
        })
    }

    pub(crate) fn pending_events(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns the channel for `fd`, growing the table when needed.
    fn channel(&self, fd: RawFd) -> Arc<Channel> {
        let index = fd as usize;
        if let Some(channel) = self.channels.read().get(index) {
            return Arc::clone(channel);
        }

        let mut channels = self.channels.write();
        if channels.len() <= index {
            let len = (index + index / 2).max(index + 1);
            let start = channels.len();
            channels.extend((start..len).map(|fd| Arc::new(Channel::new(fd as RawFd))));
        }

        Arc::clone(&channels[index])
    }

    fn lookup(&self, fd: RawFd) -> Option<Arc<Channel>> {
        if fd < 0 {
            return None;
        }

        self.channels.read().get(fd as usize).cloned()
    }

    /// Points the epoll registration of `fd` at `interest`, moving from `previous`.
    fn update(&self, fd: RawFd, previous: Interest, interest: Interest) -> Result<()> {
        let token = fd as u64;
        let (op, result) = if interest.is_empty() {
            ("del", self.poller.delete(fd))
        } else if previous.is_empty() {
            let result = self.poller.add(fd, token, interest.epoll_flags());
            // Still registered from an earlier life of the descriptor.
            match result {
                Err(error) if error.raw_os_error() == Some(libc::EEXIST) => {
                    ("mod", self.poller.modify(fd, token, interest.epoll_flags()))
                }
                other => ("add", other),
            }
        } else {
            let result = self.poller.modify(fd, token, interest.epoll_flags());
            // Closed and reopened without going through the hooked close.
            match result {
                Err(error) if error.raw_os_error() == Some(libc::ENOENT) => {
                    ("add", self.poller.add(fd, token, interest.epoll_flags()))
                }
                other => ("mod", other),
            }
        };

        result.map_err(|source| Error::Register { fd, op, source })
    }

    pub(crate) fn add_event(
        self: &Arc<Self>,
        fd: RawFd,
        direction: Direction,
        callback: Option<Box<dyn FnOnce() + Send + 'static>>,
    ) -> Result<()> {
        invariant!(fd >= 0, "add_event on invalid descriptor {fd}");
        if self.core.stop_requested() {
            return Err(Error::ShuttingDown {
                name: self.core.name().to_owned(),
            });
        }

        let callback = match callback {
            Some(function) => Callback::Func(function),
            None => {
                invariant!(
                    Fiber::in_fiber(),
                    "add_event without a callback must be called from a fiber"
                );
                Callback::Fiber(Fiber::current())
            }
        };
        let owner = context::handle().unwrap_or_else(|| self.handle());

        let channel = self.channel(fd);
        let mut slots = channel.slots.lock();
        let previous = slots.interest();
        invariant!(
            !previous.contains(direction),
            "fd {fd} already has a {direction:?} waiter armed"
        );

        if let Err(error) = self.update(fd, previous, previous | direction) {
            error!(fd, ?direction, %error, "failed to arm descriptor");
            return Err(error);
        }

        slots.arm(fd, direction, Waiter { owner, callback });
        self.pending.fetch_add(1, Ordering::AcqRel);
        trace!(fd, ?direction, "event armed");

        Ok(())
    }

    pub(crate) fn del_event(&self, fd: RawFd, direction: Direction, trigger_first: bool) -> bool {
        let Some(waiter) = self.disarm(fd, direction) else {
            return false;
        };

        trace!(fd, ?direction, trigger_first, "event removed");
        if trigger_first && let Some(waiter) = waiter {
            waiter.dispatch();
        }

        true
    }

    /// Disarms `direction` on behalf of an expired timeout.
    ///
    /// `on_expired` runs only when the direction was still armed, and before
    /// the waiter is submitted, so the resumed fiber observes its effect.
    /// Returns false when readiness already disarmed the direction.
    pub(crate) fn expire_event<F>(&self, fd: RawFd, direction: Direction, on_expired: F) -> bool
    where
        F: FnOnce(),
    {
        let Some(waiter) = self.disarm(fd, direction) else {
            return false;
        };

        trace!(fd, ?direction, "event expired");
        on_expired();
        if let Some(waiter) = waiter {
            waiter.dispatch();
        }

        true
    }

    /// Removes `direction` from the channel of `fd`.
    ///
    /// `None` when it was not armed; otherwise the waiter it held.
    fn disarm(&self, fd: RawFd, direction: Direction) -> Option<Option<Waiter>> {
        let channel = self.lookup(fd)?;
        let mut slots = channel.slots.lock();
        let previous = slots.interest();
        if !previous.contains(direction) {
            return None;
        }

        let interest = previous.without(direction.into());
        if let Err(error) = self.update(fd, previous, interest) {
            // The direction is disarmed regardless; the descriptor is likely gone.
            error!(fd, ?direction, %error, "failed to disarm descriptor");
        }

        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(slots.disarm(direction))
    }

    pub(crate) fn cancel_all(&self, fd: RawFd) -> bool {
        let Some(channel) = self.lookup(fd) else {
            return false;
        };

        let waiters = {
            let mut slots = channel.slots.lock();
            let previous = slots.interest();
            if previous.is_empty() {
                return false;
            }

            if let Err(error) = self.update(fd, previous, Interest::NONE) {
                error!(fd, %error, "failed to remove descriptor");
            }

            let waiters = slots.take_ready(Interest::BOTH);
            self.pending.fetch_sub(waiters.len(), Ordering::AcqRel);
            waiters
        };

        trace!(fd, waiters = waiters.len(), "events canceled");
        for waiter in waiters {
            waiter.dispatch();
        }

        true
    }

    /// Disarms and dispatches the directions an epoll event reports ready.
    fn trigger(&self, fd: RawFd, events: u32) {
        let Some(channel) = self.lookup(fd) else {
            return;
        };

        let waiters = {
            let mut slots = channel.slots.lock();
            let previous = slots.interest();
            let ready = Interest::from_epoll(events) & previous;
            if ready.is_empty() {
                return;
            }

            if let Err(error) = self.update(fd, previous, previous.without(ready)) {
                error!(fd, %error, "failed to re-arm descriptor after readiness");
            }

            let waiters = slots.take_ready(ready);
            self.pending.fetch_sub(waiters.len(), Ordering::AcqRel);
            waiters
        };

        trace!(fd = channel.fd(), events, "descriptor ready");
        for waiter in waiters {
            waiter.dispatch();
        }
    }

    /// Disarms every armed channel, resuming the waiters parked on them.
    fn cancel_armed(&self) {
        let armed: Vec<RawFd> = self
            .channels
            .read()
            .iter()
            .filter(|channel| !channel.slots.lock().interest().is_empty())
            .map(|channel| channel.fd())
            .collect();

        if !armed.is_empty() {
            debug!(reactor = %self.core.name(), descriptors = armed.len(), "waking parked waiters for shutdown");
        }
        for fd in armed {
            self.cancel_all(fd);
        }
    }

    fn submit_expired_clocks(&self) {
        for callback in self.clocks.drain_expired() {
            driver::submit(self, Task::func(move || callback()));
        }
    }
}

impl Driver for ReactorInner {
    fn core(&self) -> &Core {
        &self.core
    }

    fn handle(self: &Arc<Self>) -> Handle {
        Handle::Reactor(ReactorHandle::from_inner(Arc::clone(self)))
    }

    fn tickle(&self) {
        self.wakeup.wake();
    }

    fn idle(&self) {
        let config = self.core.config();
        let mut events = Vec::with_capacity(config.max_events);

        loop {
            if self.core.stop_requested() && self.pending_events() > 0 {
                self.cancel_armed();
            }

            if self.stopping() {
                debug!(reactor = %self.core.name(), "idle loop exiting");
                break;
            }

            let timeout = self
                .clocks
                .next_deadline_delta()
                .map_or(config.max_idle_timeout, |delta| delta.min(config.max_idle_timeout));

            if let Err(error) = self.poller.wait(&mut events, timeout) {
                error!(reactor = %self.core.name(), %error, "epoll_wait failed");
            }

            self.submit_expired_clocks();

            for event in &events {
                let (token, flags) = (event.u64, event.events);
                if token == WAKE_TOKEN {
                    self.wakeup.drain();
                } else {
                    self.trigger(token as RawFd, flags);
                }
            }

            Fiber::yield_now();
        }
    }

    // Armed waiters are woken by the idle loop once stop is requested, so the
    // pending count only holds shutdown until they have been resubmitted.
    fn stopping(&self) -> bool {
        self.core.stopping() && self.clocks.is_empty() && self.pending_events() == 0
    }
}
