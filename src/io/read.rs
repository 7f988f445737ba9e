use std::sync::Arc;

use crate::buffer::{Flags, Metadata, Owner};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::io::{check_fill, classify, Arena as ArenaTrait, Lease, Ledger};
use crate::ioctl::{self, Request};
use crate::Format;

/// Direct read I/O
///
/// There is no buffer exchange with the driver. Each frame is read into a single scratch buffer
/// of the negotiated image size, which counts as device-owned whenever it is not leased.
pub struct Arena<D: Device> {
    dev: Arc<D>,
    format: Format,
    scratch: Vec<u8>,
    ledger: Ledger,
    sequence: u32,
}

impl<D: Device> Arena<D> {
    pub fn new(dev: Arc<D>, format: &Format) -> Result<Self> {
        let size = format.size as usize;
        if size == 0 {
            return Err(Error::allocation("negotiated image size is zero", None));
        }

        let mut ledger = Ledger::new(1);
        ledger.give(0);

        tracing::debug!(size, "allocated read buffer");
        Ok(Arena {
            dev,
            format: *format,
            scratch: vec![0u8; size],
            ledger,
            sequence: 0,
        })
    }
}

impl<D: Device> ArenaTrait for Arena<D> {
    fn acquire(&mut self) -> Result<Lease> {
        if self.ledger.owners().first() != Some(&Owner::Device) {
            return Err(Error::InvalidState("read buffer is still leased"));
        }

        let dev = &self.dev;
        let scratch = &mut self.scratch;
        let n = ioctl::retry(Request::Read, || dev.read(&mut scratch[..]))
            .map_err(|e| classify(Request::Read, e))?;
        if n == 0 {
            return Err(Error::EndOfStream);
        }

        let meta = Metadata {
            bytesused: n as u32,
            flags: Flags::DONE,
            sequence: self.sequence,
            ..Metadata::default()
        };
        check_fill(&meta, &self.format, self.scratch.len())
            .map_err(|e| Error::device(Request::Read, e))?;

        self.ledger.claim(0)?;
        self.sequence = self.sequence.wrapping_add(1);
        tracing::trace!(bytes = n, sequence = meta.sequence, "read frame");

        Ok(Lease {
            index: 0,
            ptr: self.scratch.as_ptr(),
            meta,
        })
    }

    fn release(&mut self, index: usize) -> Result<()> {
        // nothing to hand back, the next read reuses the scratch buffer
        self.ledger.check_owned(index)?;
        self.ledger.give(index);
        Ok(())
    }

    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn reclaim_all(&mut self) {}

    fn free(&mut self) -> Result<()> {
        self.scratch = Vec::new();
        Ok(())
    }
}
