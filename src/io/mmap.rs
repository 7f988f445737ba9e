use std::{io, sync::Arc};

use crate::buffer::Enqueue;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::io::{check_fill, classify, Arena as ArenaTrait, Lease, Ledger};
use crate::ioctl::{self, Request};
use crate::memory::{Mapping, Memory};
use crate::Format;

/// Manage mapped buffers
///
/// All buffers are unmapped in the Drop impl, before the driver is asked to free them.
pub struct Arena<D: Device> {
    dev: Arc<D>,
    format: Format,
    bufs: Vec<Mapping<D>>,
    ledger: Ledger,
    requested: bool,
}

impl<D: Device> Arena<D> {
    /// Requests, maps and queues `count` buffers
    ///
    /// The driver may grant a different number of buffers, but at least two are needed to keep
    /// one queued while the other is leased.
    ///
    /// # Arguments
    ///
    /// * `dev` - Device to request the buffers from
    /// * `format` - Negotiated format, used to validate fills
    /// * `count` - Desired number of buffers
    pub fn allocate(dev: Arc<D>, format: &Format, count: u32) -> Result<Self> {
        let mut arena = Arena {
            dev,
            format: *format,
            bufs: Vec::new(),
            ledger: Ledger::new(0),
            requested: false,
        };

        let granted = arena.request(count)?;
        if granted < 2 {
            return Err(Error::allocation(
                format!("insufficient buffer memory, driver granted {} buffers", granted),
                None,
            ));
        }

        // Any early return from here on drops the arena, which unmaps what was mapped so far.
        for index in 0..granted {
            let dev = &arena.dev;
            let info = ioctl::retry(Request::QueryBuffer, || dev.query_buffer(Memory::Mmap, index))
                .map_err(|e| Error::allocation(format!("failed to query buffer {}", index), Some(e)))?;

            let mapping = Mapping::new(arena.dev.clone(), info.offset, info.length as usize)
                .map_err(|e| Error::allocation(format!("failed to map buffer {}", index), Some(e)))?;
            arena.bufs.push(mapping);
        }

        arena.ledger = Ledger::new(arena.bufs.len());
        for index in 0..arena.bufs.len() {
            arena.queue(index).map_err(|e| {
                Error::allocation(format!("failed to queue buffer {}", index), Some(e))
            })?;
        }

        tracing::debug!(count = granted, requested = count, "allocated mapped buffers");
        Ok(arena)
    }

    fn request(&mut self, count: u32) -> Result<u32> {
        let dev = &self.dev;
        let granted = ioctl::retry(Request::RequestBuffers, || {
            dev.request_buffers(Memory::Mmap, count)
        })
        .map_err(|e| {
            if e.raw_os_error() == Some(libc::EINVAL) {
                Error::allocation("device does not support memory mapping", Some(e))
            } else {
                Error::allocation("buffer request failed", Some(e))
            }
        })?;
        self.requested = true;
        Ok(granted)
    }

    fn queue(&mut self, index: usize) -> io::Result<()> {
        let dev = &self.dev;
        let buf = Enqueue {
            index: index as u32,
            userptr: None,
        };
        ioctl::retry(Request::Queue, || dev.queue(Memory::Mmap, &buf))?;
        self.ledger.give(index);
        Ok(())
    }
}

impl<D: Device> ArenaTrait for Arena<D> {
    fn acquire(&mut self) -> Result<Lease> {
        let dev = &self.dev;
        let dq = ioctl::retry(Request::Dequeue, || dev.dequeue(Memory::Mmap))
            .map_err(|e| classify(Request::Dequeue, e))?;
        let index = self.ledger.claim(dq.index)?;

        let buf = &self.bufs[index];
        let ptr = buf.as_ptr();
        if let Err(e) = check_fill(&dq.meta, &self.format, buf.len()) {
            // hand the slot straight back, the frame is unusable
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
        // unmap before freeing, drivers refuse to free buffers that are still mapped
        self.bufs.clear();
        self.ledger = Ledger::new(0);

        if self.requested {
            self.requested = false;
            let dev = &self.dev;
            ioctl::retry(Request::RequestBuffers, || dev.request_buffers(Memory::Mmap, 0))
                .map_err(|e| Error::device(Request::RequestBuffers, e))?;
        }
        Ok(())
    }
}

impl<D: Device> Drop for Arena<D> {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            tracing::warn!(error = %e, "failed to free mapped buffers");
        }
    }
}
