use std::{
    cell::RefCell,
    slice,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::buffer::{Metadata, Owner};
use crate::device::{Device, Readiness};
use crate::error::{Error, Result};
use crate::io::{Lease, Pool, Transport};
use crate::ioctl::Request;

/// State of a capture loop
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Waiting for the caller to ask for a frame
    Streaming,
    /// A frame is leased to the caller
    FrameReady,
    /// The stream was stopped, no more frames
    Stopped,
}

struct Inner<D: Device> {
    pool: Pool<D>,
    lease: Option<usize>,
    state: State,
}

/// Produces frames from a started session
///
/// At most one [`Frame`] is outstanding at a time. It has to be released (or dropped) before the
/// next one can be requested, the remaining buffers stay queued with the device meanwhile.
///
/// The loop is meant to be driven from a single thread.
pub struct CaptureLoop<D: Device> {
    dev: Arc<D>,
    inner: RefCell<Inner<D>>,
}

impl<D: Device> CaptureLoop<D> {
    pub(crate) fn new(dev: Arc<D>, pool: Pool<D>) -> Self {
        CaptureLoop {
            dev,
            inner: RefCell::new(Inner {
                pool,
                lease: None,
                state: State::Streaming,
            }),
        }
    }

    /// Waits up to `timeout` for the next frame
    ///
    /// `None` waits forever. [`Error::Timeout`] leaves the loop usable, the call may simply be
    /// repeated.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use v4l_capture::{Session, Transport, FourCC};
    ///
    /// if let Ok(mut session) = Session::open("/dev/video0", Transport::MemoryMapped) {
    ///     if session.negotiate(640, 480, FourCC::YUYV).is_ok() {
    ///         if let Ok(capture) = session.start(4) {
    ///             if let Ok(mut frame) = capture.next_frame(Some(Duration::from_secs(2))) {
    ///                 println!("{} bytes", frame.len());
    ///                 frame.release().unwrap();
    ///             }
    ///         }
    ///     }
    /// }
    /// ```
    pub fn next_frame(&self, timeout: Option<Duration>) -> Result<Frame<'_, D>> {
        {
            let inner = self.borrow()?;
            match inner.state {
                State::Streaming => {}
                State::FrameReady => {
                    return Err(Error::InvalidState("previous frame has not been released"))
                }
                State::Stopped => return Err(Error::InvalidState("stream is stopped")),
            }
        }

        self.wait(timeout)?;

        let mut inner = self.borrow()?;
        let lease = inner.pool.acquire()?;
        inner.lease = Some(lease.index);
        inner.state = State::FrameReady;

        Ok(Frame {
            capture: self,
            lease,
            released: false,
        })
    }

    /// Gives a frame's buffer back to the device
    ///
    /// Same as [`Frame::release`].
    pub fn release(&self, frame: &mut Frame<'_, D>) -> Result<()> {
        frame.release()
    }

    /// Captures `count` frames, handing each to `f` before releasing it
    ///
    /// Stops at the first error, including timeouts.
    pub fn capture<F>(&self, count: usize, timeout: Option<Duration>, mut f: F) -> Result<()>
    where
        F: FnMut(&Frame<'_, D>),
    {
        for _ in 0..count {
            let mut frame = self.next_frame(timeout)?;
            f(&frame);
            frame.release()?;
        }
        Ok(())
    }

    pub fn state(&self) -> State {
        self.inner
            .try_borrow()
            .map(|inner| inner.state)
            .unwrap_or(State::FrameReady)
    }

    pub fn transport(&self) -> Transport {
        self.inner.borrow().pool.transport()
    }

    /// Number of buffer slots in the pool
    pub fn buffer_count(&self) -> usize {
        self.inner.borrow().pool.len()
    }

    /// Indices of the buffers currently queued with the device
    pub fn queued(&self) -> Vec<usize> {
        self.indices(Owner::Device)
    }

    /// Indices of the buffers currently leased to the caller
    pub fn dequeued(&self) -> Vec<usize> {
        self.indices(Owner::Caller)
    }

    fn indices(&self, owner: Owner) -> Vec<usize> {
        self.inner
            .borrow()
            .pool
            .owners()
            .iter()
            .enumerate()
            .filter(|(_, o)| **o == owner)
            .map(|(i, _)| i)
            .collect()
    }

    fn borrow(&self) -> Result<std::cell::RefMut<'_, Inner<D>>> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| Error::InvalidState("capture loop is already in use"))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.dev.wait_readable(remaining) {
                Ok(Readiness::Ready) => return Ok(()),
                Ok(Readiness::TimedOut) => return Err(Error::Timeout),
                Ok(Readiness::Interrupted) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::device(Request::Poll, e)),
            }

            tracing::trace!("readiness wait interrupted, retrying");
            if remaining == Some(Duration::ZERO) {
                return Err(Error::Timeout);
            }
        }
    }

    fn release_lease(&self, index: usize) -> Result<()> {
        let mut inner = self.borrow()?;
        if inner.lease != Some(index) {
            return Err(Error::InvalidState("frame was already released"));
        }

        // a failed queue leaves the frame leased, it may be released again
        inner.pool.release(index)?;
        inner.lease = None;
        inner.state = State::Streaming;
        Ok(())
    }

    /// Stops the stream and frees all buffers
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        let inner = self.inner.get_mut();
        inner.state = State::Stopped;
        inner.lease = None;
        inner.pool.stream_off()?;
        inner.pool.teardown()
    }
}

/// A filled buffer leased from a [`CaptureLoop`]
///
/// The data is read in place, nothing is copied. Dropping an unreleased frame releases it.
pub struct Frame<'a, D: Device> {
    capture: &'a CaptureLoop<D>,
    lease: Lease,
    released: bool,
}

impl<'a, D: Device> Frame<'a, D> {
    /// The frame data
    ///
    /// Fails with [`Error::InvalidState`] once the frame has been released.
    pub fn bytes(&self) -> Result<&[u8]> {
        if self.released {
            return Err(Error::InvalidState("frame was already released"));
        }
        // SAFETY: the buffer stays mapped/allocated for as long as the pool exists, which
        // outlives the borrow of the capture loop held by this frame. Until the frame is
        // released the buffer is owned by the process, so the device does not write to it.
        Ok(unsafe { slice::from_raw_parts(self.lease.ptr, self.lease.meta.bytesused as usize) })
    }

    /// Index of the underlying buffer slot
    pub fn index(&self) -> usize {
        self.lease.index
    }

    pub fn metadata(&self) -> &Metadata {
        &self.lease.meta
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.lease.meta.bytesused as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the buffer to the device (or discards it, for read I/O)
    ///
    /// Releasing twice fails with [`Error::InvalidState`]. If the device refuses the buffer, the
    /// frame stays leased and the release may be repeated.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::InvalidState("frame was already released"));
        }
        self.capture.release_lease(self.lease.index)?;
        self.released = true;
        Ok(())
    }
}

impl<'a, D: Device> Drop for Frame<'a, D> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                tracing::warn!(index = self.lease.index, error = %e, "failed to release frame");
            }
        }
    }
}
