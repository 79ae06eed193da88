//! Socket address conversion and socket option helpers.

use crate::utils::cvt_int;

use libc::{sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::time::Duration;

/// Parses an `"ip:port"` string.
pub fn parse_sockaddr(address: &str) -> io::Result<SocketAddr> {
    address
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid socket address: {address}")))
}

/// Converts a Rust address into the C representation passed to `bind`, `connect` and `sendto`.
pub(crate) fn socketaddr_to_sockaddr(address: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    let len = match address {
        SocketAddr::V4(v4) => {
            let raw = sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe { (&mut storage as *mut sockaddr_storage).cast::<sockaddr_in>().write(raw) };
            size_of::<sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let raw = sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe { (&mut storage as *mut sockaddr_storage).cast::<sockaddr_in6>().write(raw) };
            size_of::<sockaddr_in6>()
        }
    };

    (storage, len as socklen_t)
}

/// Converts a kernel-filled address back; `None` for non-IP families or a truncated length.
pub(crate) fn sockaddr_to_socketaddr(storage: &sockaddr_storage, len: socklen_t) -> Option<SocketAddr> {
    let len = len as usize;

    match storage.ss_family as libc::c_int {
        libc::AF_INET if len >= size_of::<sockaddr_in>() => {
            let raw = unsafe { &*(storage as *const sockaddr_storage).cast::<sockaddr_in>() };
            let ip = Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());

            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(raw.sin_port))))
        }
        libc::AF_INET6 if len >= size_of::<sockaddr_in6>() => {
            let raw = unsafe { &*(storage as *const sockaddr_storage).cast::<sockaddr_in6>() };
            let ip = Ipv6Addr::from(raw.sin6_addr.s6_addr);

            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(raw.sin6_port),
                raw.sin6_flowinfo,
                raw.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

fn name_of(
    fd: RawFd,
    call: unsafe extern "C" fn(libc::c_int, *mut libc::sockaddr, *mut socklen_t) -> libc::c_int,
) -> io::Result<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = size_of::<sockaddr_storage>() as socklen_t;

    cvt_int(unsafe { call(fd, (&mut storage as *mut sockaddr_storage).cast(), &mut len) })?;

    sockaddr_to_socketaddr(&storage, len)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "socket has no IP address"))
}

pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    name_of(fd, libc::getsockname)
}

pub(crate) fn peer_addr(fd: RawFd) -> io::Result<SocketAddr> {
    name_of(fd, libc::getpeername)
}

pub(crate) fn set_reuse_addr(fd: RawFd) -> io::Result<()> {
    let enable: libc::c_int = 1;

    cvt_int(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            (&enable as *const libc::c_int).cast(),
            size_of::<libc::c_int>() as socklen_t,
        )
    })
    .map(drop)
}

/// Sets `SO_RCVTIMEO` or `SO_SNDTIMEO`. `None` (or zero) clears it.
pub(crate) fn set_timeout(fd: RawFd, option: libc::c_int, timeout: Option<Duration>) -> io::Result<()> {
    let timeout = timeout.unwrap_or_default();
    let value = libc::timeval {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };

    cvt_int(unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::timeval).cast(),
            size_of::<libc::timeval>() as socklen_t,
        )
    })
    .map(drop)
}
