use std::{io, ptr::NonNull, time::Duration};

use crate::buffer::{BufferInfo, Dequeued, Enqueue};
use crate::memory::Memory;
use crate::{Capabilities, Format};

/// Outcome of waiting for a device to become readable
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    Interrupted,
}

/// Access to an open video capture device
///
/// This is the seam between the capture state machine and the platform. Every method maps to one
/// request against the device (see [`crate::ioctl::Request`]) and reports failures as the raw OS
/// error. Implementations must not retry on EINTR themselves, callers do that.
///
/// The real implementation is [`crate::v4l2::Handle`].
pub trait Device {
    /// Query for device capabilities
    fn query_caps(&self) -> io::Result<Capabilities>;

    /// Returns the format currently in use
    fn format(&self) -> io::Result<Format>;

    /// Modifies the capture format and returns the format the driver actually applied
    fn set_format(&self, fmt: &Format) -> io::Result<Format>;

    /// Resets the cropping rectangle to the driver default
    fn reset_crop(&self) -> io::Result<()>;

    /// Requests `count` buffers of the given memory type, returns the number granted
    ///
    /// Requesting zero buffers frees all of them.
    fn request_buffers(&self, memory: Memory, count: u32) -> io::Result<u32>;

    /// Queries length and mapping offset of a buffer
    fn query_buffer(&self, memory: Memory, index: u32) -> io::Result<BufferInfo>;

    /// Inserts a buffer into the driver's incoming queue
    fn queue(&self, memory: Memory, buf: &Enqueue) -> io::Result<()>;

    /// Removes a filled buffer from the driver's outgoing queue
    fn dequeue(&self, memory: Memory) -> io::Result<Dequeued>;

    fn stream_on(&self) -> io::Result<()>;

    fn stream_off(&self) -> io::Result<()>;

    /// Maps a driver buffer into the process
    fn map(&self, offset: u32, length: usize) -> io::Result<NonNull<u8>>;

    /// Unmaps a region previously returned by [`Device::map`]
    ///
    /// # Safety
    ///
    /// `ptr` and `length` must describe a live mapping, which must not be accessed afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, length: usize) -> io::Result<()>;

    /// Reads a frame directly into `buf`
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Blocks until the device is readable or the timeout expires
    ///
    /// `None` waits forever.
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<Readiness>;
}
