//! Thin wrappers around the system calls used to talk to a video device
//!
//! Every wrapper reports failure as the last OS error (errno) and never retries.

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::{io, path::Path, time::Duration};

pub mod vidioc;

mod handle;
pub use handle::Handle;

use crate::device::Readiness;

/// A convenience wrapper around open(2).
///
/// Returns the file descriptor on success.
///
/// # Arguments
///
/// * `path` - Path to the device node
/// * `flags` - Open flags
pub fn open<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<c_int> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is a valid NUL terminated string for the duration of the call.
    let fd = unsafe { libc::open(c_path.as_ptr(), flags) };
    if fd == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// A convenience wrapper around close(2).
///
/// # Arguments
///
/// * `fd` - File descriptor of a previously opened device
pub fn close(fd: c_int) -> io::Result<()> {
    // SAFETY: closing an invalid descriptor is reported as EBADF, nothing else happens.
    let ret = unsafe { libc::close(fd) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A convenience wrapper around ioctl(2).
///
/// # Arguments
///
/// * `fd` - File descriptor
/// * `request` - IO control code (see [`vidioc`])
/// * `argp` - Pointer to memory region holding the argument type
///
/// # Safety
///
/// `argp` must point to a live value of the type `request` expects.
pub unsafe fn ioctl(fd: c_int, request: vidioc::_IOC_TYPE, argp: *mut c_void) -> io::Result<()> {
    /*
     * The libc crate (and libc itself) declares ioctl() with incompatible argument types on
     * different platforms. syscall() sidesteps that without conditional compilation, see
     * https://github.com/rust-lang/libc/issues/1036
     */
    let ret = libc::syscall(libc::SYS_ioctl, fd, request, argp);
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A convenience wrapper around mmap(2), mapping a device buffer shared and read/write.
///
/// # Arguments
///
/// * `fd` - File descriptor representing an opened device
/// * `length` - Length of the mapped region
/// * `offset` - Offset reported for the buffer by the driver
///
/// # Safety
///
/// The returned region aliases driver memory. It must be unmapped with [`munmap`] exactly once.
pub unsafe fn mmap(fd: c_int, length: usize, offset: libc::off_t) -> io::Result<*mut c_void> {
    let ret = libc::mmap(
        std::ptr::null_mut(),
        length,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED,
        fd,
        offset,
    );
    if ret == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// A convenience wrapper around munmap(2).
///
/// # Safety
///
/// `start` and `length` must describe a mapping created by [`mmap`].
pub unsafe fn munmap(start: *mut c_void, length: usize) -> io::Result<()> {
    let ret = libc::munmap(start, length);
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A convenience wrapper around read(2).
pub fn read(fd: c_int, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: the kernel writes at most `buf.len()` bytes into `buf`.
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Waits until `fd` becomes readable, using poll(2).
///
/// A signal arriving during the wait is reported as [`Readiness::Interrupted`].
pub fn poll(fd: c_int, timeout: Option<Duration>) -> io::Result<Readiness> {
    let timeout = match timeout {
        // round up, a zero timeout would turn the wait into a busy loop
        Some(t) => c_int::try_from(t.as_micros().div_ceil(1000)).unwrap_or(c_int::MAX),
        None => -1,
    };
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: `pfd` is a single valid pollfd.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout) };
    match ret {
        -1 => {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                Ok(Readiness::Interrupted)
            } else {
                Err(e)
            }
        }
        0 => Ok(Readiness::TimedOut),
        _ if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 => {
            Err(io::Error::from_raw_os_error(libc::EIO))
        }
        _ => Ok(Readiness::Ready),
    }
}
