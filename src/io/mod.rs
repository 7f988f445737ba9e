//! Buffer pools, one arena per transport method
//!
//! A [`Pool`] owns the buffers of a capture session and tracks which side owns each slot. The
//! three transports share the same contract: allocate, acquire a filled buffer, release it, tear
//! down. Everything touching raw memory stays inside the respective arena.

pub mod mmap;
pub mod read;
pub mod userptr;

use std::{fmt, io, str::FromStr, sync::Arc};

use thiserror::Error as ThisError;

use crate::buffer::{Metadata, Owner};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::ioctl::{self, Request};
use crate::Format;

/// How frame data moves from the device into the process
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transport {
    /// read(2) into a single scratch buffer
    Read,
    /// Driver buffers mapped into the process
    MemoryMapped,
    /// Process buffers handed to the driver
    UserPointer,
}

impl Transport {
    /// Whether the transport needs the streaming ioctls
    pub fn is_streaming(&self) -> bool {
        !matches!(self, Transport::Read)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Transport::Read => write!(f, "read"),
            Transport::MemoryMapped => write!(f, "mmap"),
            Transport::UserPointer => write!(f, "userptr"),
        }
    }
}

#[derive(Debug, ThisError)]
#[error("unknown transport {0:?}, expected one of read, mmap, userptr")]
pub struct ParseTransportError(String);

impl FromStr for Transport {
    type Err = ParseTransportError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "read" => Ok(Transport::Read),
            "mmap" => Ok(Transport::MemoryMapped),
            "userptr" => Ok(Transport::UserPointer),
            _ => Err(ParseTransportError(s.to_owned())),
        }
    }
}

/// A filled buffer handed out by an arena
///
/// `ptr` stays valid until the pool is dropped, its contents until the slot is released.
#[derive(Debug, Copy, Clone)]
pub struct Lease {
    pub index: usize,
    pub ptr: *const u8,
    pub meta: Metadata,
}

/// Ownership bookkeeping for the slots of a pool
#[derive(Debug)]
pub(crate) struct Ledger {
    owners: Vec<Owner>,
}

impl Ledger {
    /// All slots start out owned by the process
    pub fn new(count: usize) -> Self {
        Ledger {
            owners: vec![Owner::Caller; count],
        }
    }

    pub fn owners(&self) -> &[Owner] {
        &self.owners
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Records that the driver returned `index`
    pub fn claim(&mut self, index: u32) -> Result<usize> {
        let index = index as usize;
        match self.owners.get_mut(index) {
            Some(owner @ Owner::Device) => {
                *owner = Owner::Caller;
                Ok(index)
            }
            _ => Err(Error::device(
                Request::Dequeue,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("driver returned buffer {} which was not queued", index),
                ),
            )),
        }
    }

    /// Checks that `index` may be handed to the driver
    pub fn check_owned(&self, index: usize) -> Result<()> {
        match self.owners.get(index) {
            Some(Owner::Caller) => Ok(()),
            Some(Owner::Device) => Err(Error::InvalidState("buffer is already queued")),
            None => Err(Error::InvalidState("no such buffer")),
        }
    }

    /// Records that `index` was queued with the driver
    pub fn give(&mut self, index: usize) {
        if let Some(owner) = self.owners.get_mut(index) {
            *owner = Owner::Device;
        }
    }

    /// Stream-off returns every buffer to the process
    pub fn reclaim_all(&mut self) {
        self.owners.iter_mut().for_each(|o| *o = Owner::Caller);
    }
}

/// Turns a failed dequeue or read into the error reported to the caller
///
/// EAGAIN only means no frame is ready yet.
pub(crate) fn classify(request: Request, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::WouldBlock => Error::Timeout,
        _ => Error::device(request, e),
    }
}

/// Rejects fills that do not carry a complete frame
pub(crate) fn check_fill(meta: &Metadata, format: &Format, capacity: usize) -> io::Result<()> {
    let used = meta.bytesused as usize;
    let expected = (format.size as usize).min(capacity);

    if meta.flags.contains(crate::buffer::Flags::ERROR) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "driver flagged the buffer as corrupted",
        ));
    }
    if used == 0 || used > capacity {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("buffer reports {} bytes used of {}", used, capacity),
        ));
    }
    if !format.fourcc.is_compressed() && used < expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short frame: {} of {} bytes", used, expected),
        ));
    }
    Ok(())
}

/// Operations every transport provides
pub(crate) trait Arena {
    /// Obtains the next filled buffer
    fn acquire(&mut self) -> Result<Lease>;

    /// Returns a previously acquired buffer to the device
    fn release(&mut self, index: usize) -> Result<()>;

    fn ledger(&self) -> &Ledger;

    /// Stream-off took all buffers back
    fn reclaim_all(&mut self);

    /// Frees all buffers
    fn free(&mut self) -> Result<()>;
}

enum Kind<D: Device> {
    Read(read::Arena<D>),
    Mmap(mmap::Arena<D>),
    UserPtr(userptr::Arena<D>),
}

/// The buffers of a capture session
pub struct Pool<D: Device> {
    dev: Arc<D>,
    kind: Kind<D>,
    streaming: bool,
    freed: bool,
}

impl<D: Device> Pool<D> {
    /// Allocates buffers for `transport`, sized from the negotiated `format`
    ///
    /// Streaming transports have all buffers queued with the device once this returns, the
    /// stream itself is not started yet.
    pub fn allocate(dev: Arc<D>, transport: Transport, format: &Format, count: u32) -> Result<Self> {
        let kind = match transport {
            Transport::Read => Kind::Read(read::Arena::new(dev.clone(), format)?),
            Transport::MemoryMapped => Kind::Mmap(mmap::Arena::allocate(dev.clone(), format, count)?),
            Transport::UserPointer => {
                Kind::UserPtr(userptr::Arena::allocate(dev.clone(), format, count)?)
            }
        };

        Ok(Pool {
            dev,
            kind,
            streaming: false,
            freed: false,
        })
    }

    fn arena(&self) -> &dyn Arena {
        match &self.kind {
            Kind::Read(a) => a,
            Kind::Mmap(a) => a,
            Kind::UserPtr(a) => a,
        }
    }

    fn arena_mut(&mut self) -> &mut dyn Arena {
        match &mut self.kind {
            Kind::Read(a) => a,
            Kind::Mmap(a) => a,
            Kind::UserPtr(a) => a,
        }
    }

    pub fn transport(&self) -> Transport {
        match self.kind {
            Kind::Read(_) => Transport::Read,
            Kind::Mmap(_) => Transport::MemoryMapped,
            Kind::UserPtr(_) => Transport::UserPointer,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Starts the device filling queued buffers, a no-op for read I/O
    pub fn stream_on(&mut self) -> Result<()> {
        if self.freed {
            return Err(Error::InvalidState("buffers have been torn down"));
        }
        if self.streaming || !self.transport().is_streaming() {
            return Ok(());
        }

        ioctl::retry(Request::StreamOn, || self.dev.stream_on()).map_err(Error::StreamStart)?;
        self.streaming = true;
        tracing::debug!(transport = %self.transport(), "stream on");
        Ok(())
    }

    /// Stops the stream, a no-op if it is not running
    pub fn stream_off(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }

        // one attempt only, a device refusing to stop is gone for good
        self.streaming = false;
        ioctl::retry(Request::StreamOff, || self.dev.stream_off())
            .map_err(|e| Error::device(Request::StreamOff, e))?;
        self.arena_mut().reclaim_all();
        tracing::debug!(transport = %self.transport(), "stream off");
        Ok(())
    }

    pub fn acquire(&mut self) -> Result<Lease> {
        if self.freed {
            return Err(Error::InvalidState("buffers have been torn down"));
        }
        if self.transport().is_streaming() && !self.streaming {
            return Err(Error::InvalidState("stream is not running"));
        }
        self.arena_mut().acquire()
    }

    pub fn release(&mut self, index: usize) -> Result<()> {
        if self.freed {
            return Err(Error::InvalidState("buffers have been torn down"));
        }
        self.arena_mut().release(index)
    }

    /// Current owner of every slot, by index
    pub fn owners(&self) -> &[Owner] {
        self.arena().ledger().owners()
    }

    pub fn len(&self) -> usize {
        self.arena().ledger().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unmaps and frees all buffers
    ///
    /// The stream has to be stopped first: the device may still be writing into queued buffers.
    pub fn teardown(&mut self) -> Result<()> {
        if self.streaming {
            return Err(Error::InvalidState(
                "stream must be stopped before tearing down buffers",
            ));
        }
        if self.freed {
            return Ok(());
        }

        self.freed = true;
        self.arena_mut().free()
    }
}

impl<D: Device> Drop for Pool<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stream_off() {
            // The device most likely went away (ENODEV), buffers are released below regardless.
            tracing::warn!(error = %e, "failed to stop stream while dropping buffers");
        }
        if !self.freed {
            self.freed = true;
            if let Err(e) = self.arena_mut().free() {
                tracing::warn!(error = %e, "failed to free buffers");
            }
        }
    }
}
