//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

// Not exported by libc.
const NETLINK_GET_STRICT_CHK: c_int = 12;

// Useful type definition.
type Result<T> = std::io::Result<T>;

// Extension methods for netlink sockets.
pub trait NetlinkSocketExt: AsRawFd {
    // Sets the value of the NETLINK_GET_STRICT_CHK option for this socket,
    // making the kernel reject requests with malformed or unexpected
    // attributes instead of silently ignoring them.
    fn set_strict_check(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::SOL_NETLINK,
            NETLINK_GET_STRICT_CHK,
            &optval as *const _ as *const c_void,
            std::mem::size_of::<c_int>() as libc::socklen_t,
        )
    }
}

impl<T: AsRawFd> NetlinkSocketExt for T {}

// ===== global functions =====

fn setsockopt<F: AsRawFd + ?Sized>(
    sock: &F,
    opt: c_int,
    val: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret;

    unsafe {
        ret = libc::setsockopt(sock.as_raw_fd(), opt, val, optval, optlen);
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}
