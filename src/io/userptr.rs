use std::{io, sync::Arc};

use crate::buffer::Enqueue;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::io::{check_fill, classify, Arena as ArenaTrait, Lease, Ledger};
use crate::ioctl::{self, Request};
use crate::memory::{Memory, UserBuffer};
use crate::Format;

/// Manage userspace buffers
///
/// The arena owns the memory, the driver only ever sees pointer/length pairs while a buffer is
/// queued. The driver is told to forget all buffers before the memory is freed.
pub struct Arena<D: Device> {
    dev: Arc<D>,
    format: Format,
    bufs: Vec<UserBuffer>,
    ledger: Ledger,
    requested: bool,
}

impl<D: Device> Arena<D> {
    /// Allocates and queues `count` buffers of the negotiated image size
    ///
    /// # Arguments
    ///
    /// * `dev` - Device to register the buffers with
    /// * `format` - Negotiated format, its size determines the buffer size
    /// * `count` - Desired number of buffers
    pub fn allocate(dev: Arc<D>, format: &Format, count: u32) -> Result<Self> {
        let size = format.size as usize;
        if size == 0 {
            return Err(Error::allocation("negotiated image size is zero", None));
        }

        let mut arena = Arena {
            dev,
            format: *format,
            bufs: Vec::new(),
            ledger: Ledger::new(0),
            requested: false,
        };

        let granted = arena.request(count)?;
        if granted == 0 {
            return Err(Error::allocation("driver granted no buffers", None));
        }

        for index in 0..granted {
            let buf = UserBuffer::new(size).ok_or_else(|| {
                Error::allocation(format!("out of memory allocating buffer {}", index), None)
            })?;
            arena.bufs.push(buf);
        }

        arena.ledger = Ledger::new(arena.bufs.len());
        for index in 0..arena.bufs.len() {
            arena.queue(index).map_err(|e| {
                Error::allocation(format!("failed to queue buffer {}", index), Some(e))
            })?;
        }

        tracing::debug!(count = granted, requested = count, size, "allocated user buffers");
        Ok(arena)
    }

    fn request(&mut self, count: u32) -> Result<u32> {
        let dev = &self.dev;
        let granted = ioctl::retry(Request::RequestBuffers, || {
            dev.request_buffers(Memory::UserPtr, count)
        })
        .map_err(|e| {
            if e.raw_os_error() == Some(libc::EINVAL) {
                Error::allocation("device does not support user pointer i/o", Some(e))
            } else {
                Error::allocation("buffer request failed", Some(e))
            }
        })?;
        self.requested = true;
        Ok(granted)
    }

    fn queue(&mut self, index: usize) -> io::Result<()> {
        let dev = &self.dev;
        let buf = &self.bufs[index];
        let desc = Enqueue {
            index: index as u32,
            userptr: Some((buf.as_ptr(), buf.len())),
        };
        ioctl::retry(Request::Queue, || dev.queue(Memory::UserPtr, &desc))?;
        self.ledger.give(index);
        Ok(())
    }
}

impl<D: Device> ArenaTrait for Arena<D> {
    fn acquire(&mut self) -> Result<Lease> {
        let dev = &self.dev;
        let dq = ioctl::retry(Request::Dequeue, || dev.dequeue(Memory::UserPtr))
            .map_err(|e| classify(Request::Dequeue, e))?;
        let index = self.ledger.claim(dq.index)?;

        let buf = &self.bufs[index];
        let ptr = buf.as_ptr();
        let check = match dq.userptr {
            Some(p) if p != ptr => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("driver returned a foreign pointer for buffer {}", index),
            )),
            _ => check_fill(&dq.meta, &self.format, buf.len()),
        };
        if let Err(e) = check {
            self.queue(index)
                .map_err(|e| Error::device(Request::Queue, e))?;
            return Err(Error::device(Request::Dequeue, e));
        }

        tracing::trace!(index, bytes = dq.meta.bytesused, sequence = dq.meta.sequence, "dequeued");
        Ok(Lease {
            index,
            ptr,
            meta: dq.meta,
        })
    }

    fn release(&mut self, index: usize) -> Result<()> {
        self.ledger.check_owned(index)?;
        self.queue(index)
            .map_err(|e| Error::device(Request::Queue, e))?;
        tracing::trace!(index, "queued");
        Ok(())
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn reclaim_all(&mut self) {
        self.ledger.reclaim_all();
    }

    fn free(&mut self) -> Result<()> {
        self.ledger = Ledger::new(0);
        let res = if self.requested {
            self.requested = false;
            let dev = &self.dev;
            ioctl::retry(Request::RequestBuffers, || dev.request_buffers(Memory::UserPtr, 0))
                .map(|_| ())
                .map_err(|e| Error::device(Request::RequestBuffers, e))
        } else {
            Ok(())
        };
        self.bufs.clear();
        res
    }
}

impl<D: Device> Drop for Arena<D> {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            tracing::warn!(error = %e, "failed to free user buffers");
        }
    }
}
