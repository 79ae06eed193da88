//! Descriptor metadata consulted by the hooked calls.
//!
//! For every descriptor the hook layer has seen, an [`FdContext`] records
//! whether it is a socket, whether the runtime forced it into non-blocking
//! mode, whether the *user* asked for non-blocking semantics, and whether it
//! was closed. Descriptors are process-wide, so the table is shared by all
//! threads behind a reader/writer lock.
//!
//! Only negative descriptor numbers are rejected.
//!
//! A descriptor can be closed without going through the hooked `close`, and
//! its number handed out again for an unrelated file. Every lookup compares
//! the stored `(device, inode)` with a fresh `fstat`, and replaces an entry
//! that no longer describes the open file.

use crate::hook::sys::real;

use parking_lot::RwLock;
use std::mem;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::trace;

const INITIAL_CAPACITY: usize = 64;

/// `(st_dev, st_ino)` of an open file; `None` when `fstat` fails.
type Identity = Option<(u64, u64)>;

fn stat(fd: RawFd) -> Option<libc::stat> {
    let mut stat: libc::stat = unsafe { mem::zeroed() };

    (unsafe { libc::fstat(fd, &mut stat) } == 0).then_some(stat)
}

fn identity_of(stat: Option<&libc::stat>) -> Identity {
    stat.map(|stat| (stat.st_dev as u64, stat.st_ino as u64))
}

/// Hook-layer view of one descriptor.
#[derive(Debug)]
pub struct FdContext {
    fd: RawFd,
    identity: Identity,
    initialized: bool,
    socket: bool,
    sys_nonblock: bool,
    user_nonblock: AtomicBool,
    closed: AtomicBool,
}

impl FdContext {
    /// Inspects `fd` and forces sockets into non-blocking mode.
    ///
    /// A socket that was already non-blocking before the runtime saw it is
    /// recorded as user non-blocking, so hooked calls on it never park.
    fn new(fd: RawFd, stat: Option<&libc::stat>) -> Self {
        let initialized = stat.is_some();
        let socket = stat.is_some_and(|stat| (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK);

        let mut sys_nonblock = false;
        let mut user_nonblock = false;
        if socket {
            let flags = unsafe { (real().fcntl)(fd, libc::F_GETFL) };
            if flags >= 0 {
                user_nonblock = flags & libc::O_NONBLOCK != 0;
                sys_nonblock = user_nonblock
                    || unsafe { (real().fcntl)(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == 0;
            }
        }

        trace!(fd, initialized, socket, sys_nonblock, "descriptor registered");

        Self {
            fd,
            identity: identity_of(stat),
            initialized,
            socket,
            sys_nonblock,
            user_nonblock: AtomicBool::new(user_nonblock),
            closed: AtomicBool::new(false),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// True when `fstat` succeeded on the descriptor.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_socket(&self) -> bool {
        self.socket
    }

    /// True when the descriptor is non-blocking at the OS level.
    pub fn sys_nonblock(&self) -> bool {
        self.sys_nonblock
    }

    /// True when the user asked for non-blocking semantics.
    pub fn user_nonblock(&self) -> bool {
        self.user_nonblock.load(Ordering::Acquire)
    }

    pub fn set_user_nonblock(&self, nonblocking: bool) {
        self.user_nonblock.store(nonblocking, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Growable table of [`FdContext`]s indexed by descriptor number.
///
/// The hooked calls use the process-wide [`FdTable::global`] instance.
#[derive(Debug)]
pub struct FdTable {
    contexts: RwLock<Vec<Option<Arc<FdContext>>>>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(vec![None; INITIAL_CAPACITY]),
        }
    }

    /// The table shared by every hooked call in the process.
    pub fn global() -> &'static FdTable {
        static TABLE: LazyLock<FdTable> = LazyLock::new(FdTable::new);

        &TABLE
    }

    /// Looks up `fd`, registering it first when `auto_create` is set.
    ///
    /// An entry left behind by a descriptor that was closed elsewhere is
    /// marked closed and replaced (or dropped without `auto_create`).
    pub fn get(&self, fd: RawFd, auto_create: bool) -> Option<Arc<FdContext>> {
        if fd < 0 {
            return None;
        }

        let index = fd as usize;
        let stat = stat(fd);
        let identity = identity_of(stat.as_ref());
        {
            let contexts = self.contexts.read();
            match contexts.get(index) {
                Some(Some(context)) if context.identity == identity => return Some(Arc::clone(context)),
                Some(Some(_)) => {}
                _ if !auto_create => return None,
                _ => {}
            }
        }

        let mut contexts = self.contexts.write();
        if contexts.len() <= index {
            contexts.resize((index + index / 2).max(index + 1), None);
        }

        let slot = &mut contexts[index];
        if let Some(context) = slot.as_ref() {
            if context.identity == identity {
                return Some(Arc::clone(context));
            }

            trace!(fd, "descriptor was reused; dropping stale metadata");
            context.mark_closed();
        }

        if !auto_create {
            *slot = None;
            return None;
        }

        let context = Arc::new(FdContext::new(fd, stat.as_ref()));
        *slot = Some(Arc::clone(&context));
        Some(context)
    }

    /// Forgets `fd`, marking its context closed for anyone still holding it.
    pub fn remove(&self, fd: RawFd) {
        if fd < 0 {
            return;
        }

        let mut contexts = self.contexts.write();
        if let Some(context) = contexts.get_mut(fd as usize).and_then(Option::take) {
            context.mark_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::os::fd::{AsRawFd, IntoRawFd};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_negative_descriptor_is_rejected() {
        let table = FdTable::new();

        assert!(table.get(-1, true).is_none());
    }

    #[test]
    fn test_socket_is_forced_nonblocking() {
        let table = FdTable::new();
        let (left, _right) = UnixStream::pair().unwrap();

        let context = table.get(left.as_raw_fd(), true).unwrap();
        assert!(context.is_initialized());
        assert!(context.is_socket());
        assert!(context.sys_nonblock());
        assert!(!context.user_nonblock(), "user never asked for non-blocking mode");

        let flags = unsafe { libc::fcntl(left.as_raw_fd(), libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0, "the descriptor must be non-blocking at the OS level");
    }

    #[test]
    fn test_lookup_without_create_and_remove() {
        let table = FdTable::new();
        let (left, _right) = UnixStream::pair().unwrap();
        let fd = left.as_raw_fd();

        assert!(table.get(fd, false).is_none(), "unknown descriptors are not created implicitly");

        let context = table.get(fd, true).unwrap();
        table.remove(fd);

        assert!(context.is_closed(), "removal marks outstanding contexts closed");
        assert!(table.get(fd, false).is_none());
    }

    #[test]
    fn test_table_grows_for_large_descriptors() {
        let table = FdTable::new();
        let (left, _right) = UnixStream::pair().unwrap();

        // dup2 onto a number far beyond the initial capacity.
        let high = unsafe { libc::dup2(left.as_raw_fd(), 900) };
        assert_eq!(high, 900);

        assert!(table.get(high, true).unwrap().is_socket());
        unsafe { libc::close(high) };
    }

    #[test]
    fn test_reused_descriptor_gets_fresh_metadata() {
        let table = FdTable::new();
        let (left, _right) = UnixStream::pair().unwrap();
        let fd = left.into_raw_fd();

        let stale = table.get(fd, true).unwrap();
        assert!(stale.is_socket());

        // dup2 closes the socket behind the table's back and reuses its number.
        let mut pipe = [0; 2];
        assert_eq!(unsafe { libc::pipe(pipe.as_mut_ptr()) }, 0);
        assert_eq!(unsafe { libc::dup2(pipe[0], fd) }, fd);

        let context = table.get(fd, true).unwrap();
        assert!(!context.is_socket(), "a pipe must not inherit the socket's metadata");
        assert!(!context.sys_nonblock());
        assert!(!context.is_closed());
        assert!(stale.is_closed(), "the replaced entry is marked closed for its holders");

        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_eq!(flags & libc::O_NONBLOCK, 0, "the pipe keeps its blocking mode");

        unsafe {
            libc::close(fd);
            libc::close(pipe[0]);
            libc::close(pipe[1]);
        }
    }

    #[test]
    fn test_stale_entry_without_create_is_dropped() {
        let table = FdTable::new();
        let (left, _right) = UnixStream::pair().unwrap();
        let fd = left.into_raw_fd();
        let stale = table.get(fd, true).unwrap();

        let file = std::fs::File::open("/dev/null").unwrap();
        assert_eq!(unsafe { libc::dup2(file.as_raw_fd(), fd) }, fd);

        assert!(table.get(fd, false).is_none(), "stale entries are not handed out");
        assert!(stale.is_closed());
        unsafe { libc::close(fd) };
    }

    #[test]
    fn test_regular_file_is_not_a_socket() {
        let table = FdTable::new();
        let file = std::fs::File::open("/dev/null").unwrap();

        let context = table.get(file.as_raw_fd(), true).unwrap();
        assert!(context.is_initialized());
        assert!(!context.is_socket());
        assert!(!context.sys_nonblock());
    }
}
