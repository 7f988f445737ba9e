use bitflags::bitflags;
use std::fmt;

use crate::Timestamp;

bitflags! {
    #[allow(clippy::unreadable_literal)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// Buffer is mapped
        const MAPPED                = 0x00000001;
        /// Buffer is queued for processing
        const QUEUED                = 0x00000002;
        /// Buffer is ready
        const DONE                  = 0x00000004;
        /// Image is a keyframe (I-frame)
        const KEYFRAME              = 0x00000008;
        /// Image is a P-frame
        const PFRAME                = 0x00000010;
        /// Image is a B-frame
        const BFRAME                = 0x00000020;
        /// Buffer is ready, but the data contained within is corrupted
        const ERROR                 = 0x00000040;
        /// Buffer is added to an unqueued request
        const IN_REQUEST            = 0x00000080;
        /// Timecode field is valid
        const TIMECODE              = 0x00000100;
        /// Buffer is prepared for queuing
        const PREPARED              = 0x00000400;
        /// Timestamp type
        const TIMESTAMP_MASK        = 0x0000e000;
        const TIMESTAMP_MONOTONIC   = 0x00002000;
        const TIMESTAMP_COPY        = 0x00004000;
        /// mem2mem encoder/decoder
        const LAST                  = 0x00100000;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl From<Flags> for u32 {
    fn from(flags: Flags) -> Self {
        flags.bits()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Buffer metadata, mostly used not to convolute the main buffer structs
#[derive(Debug, Default, Copy, Clone)]
pub struct Metadata {
    /// Number of bytes occupied by the data in the buffer
    pub bytesused: u32,
    /// Buffer flags
    pub flags: Flags,
    /// Sequence number, counting the frames
    pub sequence: u32,
    /// Time of capture (usually set by the driver)
    pub timestamp: Timestamp,
}

/// Location of a buffer allocated by the driver, as reported by a buffer query
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    /// Slot index within the pool
    pub index: u32,
    /// Length of the buffer in bytes
    pub length: u32,
    /// Offset to pass to the mapping call (memory-mapped buffers only)
    pub offset: u32,
}

/// A buffer handed to the driver's incoming queue
#[derive(Debug, Copy, Clone)]
pub struct Enqueue {
    pub index: u32,
    /// Process memory backing the buffer (user pointer buffers only)
    pub userptr: Option<(*mut u8, usize)>,
}

/// A buffer removed from the driver's outgoing queue
#[derive(Debug, Copy, Clone)]
pub struct Dequeued {
    pub index: u32,
    /// Address the buffer was queued with (user pointer buffers only)
    pub userptr: Option<*mut u8>,
    pub meta: Metadata,
}

/// Which side currently owns a buffer slot
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Queued with the device, may be written by the kernel at any time
    Device,
    /// Dequeued and leased to the caller
    Caller,
}
