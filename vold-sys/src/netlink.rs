// SPDX-License-Identifier: GPL-3.0-only

//! Kernel uevent netlink socket

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::{debug, warn};
use vold_types::Uevent;

use crate::error::Result;

/// Multicast group the kernel publishes uevents on.
const KERNEL_UEVENT_GROUP: u32 = 1;
const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Blocking reader of kernel hotplug events.
pub struct UeventSocket {
    fd: OwnedFd,
    buf: Vec<u8>,
}

impl UeventSocket {
    /// Open and bind the socket; `rcvbuf` sizes the kernel-side queue.
    pub fn open(rcvbuf: usize) -> Result<Self> {
        // SAFETY: plain socket(2) call, the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let size = libc::c_int::try_from(rcvbuf).unwrap_or(libc::c_int::MAX);
        // The forcing variant needs CAP_NET_ADMIN; fall back to the capped one.
        if set_int_option(&fd, libc::SO_RCVBUFFORCE, size).is_err() {
            if let Err(e) = set_int_option(&fd, libc::SO_RCVBUF, size) {
                warn!("Unable to size uevent receive buffer: {e}");
            }
        }

        // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = KERNEL_UEVENT_GROUP;

        // SAFETY: `addr` outlives the call and the length matches its type.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_nl).cast(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }

        debug!("Uevent socket bound to kernel group {KERNEL_UEVENT_GROUP}");
        Ok(Self {
            fd,
            buf: vec![0; RECV_BUFFER_LEN],
        })
    }

    /// Block until the next kernel event arrives.
    ///
    /// Messages not sent by the kernel itself, and ones that do not parse, are skipped.
    pub fn recv(&mut self) -> Result<Uevent> {
        loop {
            // SAFETY: sockaddr_nl is plain old data; all-zero is a valid value.
            let mut sender: libc::sockaddr_nl = unsafe { mem::zeroed() };
            let mut sender_len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;

            // SAFETY: buffer and address pointers are valid for the lengths passed.
            let received = unsafe {
                libc::recvfrom(
                    self.fd.as_raw_fd(),
                    self.buf.as_mut_ptr().cast(),
                    self.buf.len(),
                    0,
                    (&mut sender as *mut libc::sockaddr_nl).cast(),
                    &mut sender_len,
                )
            };

            if received < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // ENOBUFS means the kernel dropped events for us; keep reading.
                if err.raw_os_error() == Some(libc::ENOBUFS) {
                    warn!("Uevent socket overrun, some hotplug events were lost");
                    continue;
                }
                return Err(err.into());
            }

            if sender.nl_pid != 0 {
                continue;
            }

            if let Some(event) = Uevent::parse(&self.buf[..received as usize]) {
                return Ok(event);
            }
        }
    }
}

fn set_int_option(fd: &OwnedFd, option: libc::c_int, value: libc::c_int) -> io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
