use std::{
    alloc::{self, Layout},
    convert::TryFrom,
    fmt,
    ptr::NonNull,
    sync::Arc,
};

use crate::device::Device;

/// Memory used for buffer exchange
#[allow(clippy::unreadable_literal)]
#[rustfmt::skip]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memory {
    Mmap        = 1,
    UserPtr     = 2,
}

impl TryFrom<u32> for Memory {
    type Error = ();

    fn try_from(repr: u32) -> Result<Self, Self::Error> {
        match repr {
            1 => Ok(Memory::Mmap),
            2 => Ok(Memory::UserPtr),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Memory::Mmap => write!(f, "memory-mapped"),
            Memory::UserPtr => write!(f, "user pointer"),
        }
    }
}

/// Memory-mapped region
///
/// The backing memory belongs to the driver. It is mapped into the process so frames can be read
/// without copying.
///
/// The destructor automatically unmaps the memory, so a pool that fails halfway through
/// construction still releases every region mapped so far.
pub struct Mapping<D: Device> {
    dev: Arc<D>,
    ptr: NonNull<u8>,
    len: usize,
}

impl<D: Device> Mapping<D> {
    /// Maps the driver buffer at `offset` into the process
    pub fn new(dev: Arc<D>, offset: u32, len: usize) -> std::io::Result<Self> {
        let ptr = dev.map(offset, len)?;
        Ok(Mapping { dev, ptr, len })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<D: Device> Drop for Mapping<D> {
    fn drop(&mut self) {
        // SAFETY: the region was mapped in `new` and is only unmapped here.
        if let Err(e) = unsafe { self.dev.unmap(self.ptr, self.len) } {
            tracing::warn!(len = self.len, error = %e, "failed to unmap buffer");
        }
    }
}

/// Userspace memory
///
/// This memory type can be used to directly make the camera hardware write its data into the
/// user-provided buffer (which lives in userspace). The allocation is aligned to the page size,
/// which some drivers require.
pub struct UserBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl UserBuffer {
    /// Allocates `len` zeroed bytes, aligned to the system page size
    ///
    /// Returns `None` if the allocation cannot be satisfied.
    pub fn new(len: usize) -> Option<Self> {
        let layout = Layout::from_size_align(len.max(1), page_size()).ok()?;
        // SAFETY: the layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        Some(UserBuffer { ptr, layout })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for UserBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the very same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}
