use std::{io, os::fd::RawFd, ptr::null, time::Duration};

/// Interest of a single descriptor handed to [wait].
pub(super) fn pollfd(fd: RawFd, read: bool, write: bool) -> libc::pollfd {
    let mut events = 0;

    if read {
        events |= libc::POLLIN;
    }

    if write {
        events |= libc::POLLOUT;
    }

    libc::pollfd {
        fd,
        events,
        revents: 0,
    }
}

/// Block until one of `fds` is ready or `timeout` elapses. `None` blocks
/// indefinitely. Returns the number of descriptors with a non-empty
/// `revents`; an interrupted wait counts as zero.
pub(super) fn wait(fds: &mut [libc::pollfd], timeout: Option<Duration>) -> io::Result<usize> {
    if fds.is_empty() {
        let Some(timeout) = timeout else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "waiting indefinitely on no descriptors",
            ));
        };

        std::thread::sleep(timeout);
        return Ok(0);
    }

    let tspec = timeout.map(|t| libc::timespec {
        tv_sec: t.as_secs() as _,
        tv_nsec: t.subsec_nanos() as _,
    });

    let n = unsafe {
        libc::ppoll(
            fds.as_mut_ptr(),
            fds.len() as libc::nfds_t,
            tspec.as_ref().map_or(null(), |t| t as *const _),
            null(),
        )
    };

    if n == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(0);
        }
        return Err(err);
    }

    Ok(n as usize)
}
