//! C symbols shadowing libc for the whole process (`interpose` feature).
//!
//! Each export keeps the libc signature and the `-1`/`errno` convention and
//! forwards to the Rust implementation in this module's siblings. Code that
//! never enabled hooking on its thread sees the plain libc behaviour.
//!
//! `fcntl` is exported with a fixed third argument instead of C varargs. On
//! the supported ABIs a variadic caller passes that argument exactly where a
//! fixed `unsigned long` parameter is read from.

use crate::hook::io::{do_io, parking_reactor};
use crate::hook::socket::{accept_raw, connect_raw, default_connect_timeout, socket_raw};
use crate::hook::sys::real;
use crate::hook;
use crate::reactor::Direction;
use crate::utils::{into_raw, set_errno};

use libc::{
    SO_RCVTIMEO, SO_SNDTIMEO, c_int, c_uint, c_ulong, c_void, iovec, msghdr, size_t, sockaddr, socklen_t,
    ssize_t, useconds_t,
};
use std::io;
use std::time::Duration;

fn int_result(result: io::Result<c_int>) -> c_int {
    match result {
        Ok(value) => value,
        Err(error) => {
            set_errno(error.raw_os_error().unwrap_or(libc::EIO));
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    into_raw(do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe { (real().read)(fd, buf, count) }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn readv(fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
    into_raw(do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe { (real().readv)(fd, iov, iovcnt) }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn recv(fd: c_int, buf: *mut c_void, len: size_t, flags: c_int) -> ssize_t {
    into_raw(do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe {
        (real().recv)(fd, buf, len, flags)
    }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn recvfrom(
    fd: c_int,
    buf: *mut c_void,
    len: size_t,
    flags: c_int,
    address: *mut sockaddr,
    address_len: *mut socklen_t,
) -> ssize_t {
    into_raw(do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe {
        (real().recvfrom)(fd, buf, len, flags, address, address_len)
    }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn recvmsg(fd: c_int, msg: *mut msghdr, flags: c_int) -> ssize_t {
    into_raw(do_io(fd, Direction::Read, SO_RCVTIMEO, || unsafe { (real().recvmsg)(fd, msg, flags) }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    into_raw(do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe { (real().write)(fd, buf, count) }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn writev(fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
    into_raw(do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe { (real().writev)(fd, iov, iovcnt) }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn send(fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t {
    into_raw(do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe {
        (real().send)(fd, buf, len, flags)
    }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sendto(
    fd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
    address: *const sockaddr,
    address_len: socklen_t,
) -> ssize_t {
    into_raw(do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe {
        (real().sendto)(fd, buf, len, flags, address, address_len)
    }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sendmsg(fd: c_int, msg: *const msghdr, flags: c_int) -> ssize_t {
    into_raw(do_io(fd, Direction::Write, SO_SNDTIMEO, || unsafe { (real().sendmsg)(fd, msg, flags) }))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn accept(fd: c_int, address: *mut sockaddr, address_len: *mut socklen_t) -> c_int {
    int_result(unsafe { accept_raw(fd, address, address_len) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn connect(fd: c_int, address: *const sockaddr, address_len: socklen_t) -> c_int {
    int_result(unsafe { connect_raw(fd, address, address_len, default_connect_timeout()) }.map(|()| 0))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
    int_result(socket_raw(domain, ty, protocol))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    int_result(hook::close(fd).map(|()| 0))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: c_ulong) -> c_int {
    int_result(unsafe { hook::fcntl(fd, cmd, arg) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn sleep(seconds: c_uint) -> c_uint {
    if parking_reactor().is_none() {
        return unsafe { (real().sleep)(seconds) };
    }

    hook::sleep(Duration::from_secs(seconds.into()));
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn usleep(usec: useconds_t) -> c_int {
    if parking_reactor().is_none() {
        return unsafe { (real().usleep)(usec) };
    }

    hook::sleep(Duration::from_micros(usec.into()));
    0
}
