use std::{
    io, mem,
    os::raw::{c_int, c_ulong, c_void},
    os::unix::fs::FileTypeExt,
    path::Path,
    ptr::NonNull,
    time::Duration,
};

use v4l2_sys::*;

use crate::buffer::{BufferInfo, Dequeued, Enqueue, Flags, Metadata};
use crate::device::{Device, Readiness};
use crate::ioctl::Request;
use crate::memory::Memory;
use crate::v4l2::{self, vidioc};
use crate::{Capabilities, Format, FourCC, Timestamp};

/// An open video device node
///
/// The node is opened non-blocking, waiting for frames happens through
/// [`Device::wait_readable`]. The descriptor is closed when the handle is dropped.
#[derive(Debug)]
pub struct Handle {
    fd: c_int,
}

impl Handle {
    /// Opens the character device at `path` for reading and writing
    pub fn open(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        if !meta.file_type().is_char_device() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is no device", path.display()),
            ));
        }

        let fd = v4l2::open(path, libc::O_RDWR | libc::O_NONBLOCK)?;
        tracing::debug!(path = %path.display(), fd, "opened device");
        Ok(Handle { fd })
    }

    /// Returns the raw file descriptor
    pub fn fd(&self) -> c_int {
        self.fd
    }

    fn ioctl<T>(&self, request: Request, arg: &mut T) -> io::Result<()> {
        let code = vidioc::code(request).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{} is no ioctl", request))
        })?;
        // SAFETY: every request is issued with the argument type its code was built from.
        unsafe { v4l2::ioctl(self.fd, code, arg as *mut T as *mut c_void) }
    }

    fn buffer(memory: Memory, index: u32) -> v4l2_buffer {
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
        buf.type_ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = memory as u32;
        buf.index = index;
        buf
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = v4l2::close(self.fd) {
            tracing::warn!(fd = self.fd, error = %e, "failed to close device");
        }
    }
}

fn pix_format(fmt: &v4l2_format) -> Format {
    // SAFETY: capture formats always use the `pix` member of the union.
    let pix = unsafe { fmt.fmt.pix };
    Format {
        width: pix.width,
        height: pix.height,
        fourcc: FourCC::from(pix.pixelformat),
        stride: pix.bytesperline,
        size: pix.sizeimage,
    }
}

impl Device for Handle {
    fn query_caps(&self) -> io::Result<Capabilities> {
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        let mut caps: v4l2_capability = unsafe { mem::zeroed() };
        self.ioctl(Request::QueryCap, &mut caps)?;

        Ok(Capabilities::new(
            &caps.driver,
            &caps.card,
            &caps.bus_info,
            caps.version,
            caps.capabilities,
            caps.device_caps,
        ))
    }

    fn format(&self) -> io::Result<Format> {
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        let mut fmt: v4l2_format = unsafe { mem::zeroed() };
        fmt.type_ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
        self.ioctl(Request::GetFormat, &mut fmt)?;
        Ok(pix_format(&fmt))
    }

    fn set_format(&self, format: &Format) -> io::Result<Format> {
        // SAFETY: all-zero is a valid bit pattern for these plain C structs.
        let mut pix: v4l2_pix_format = unsafe { mem::zeroed() };
        pix.width = format.width;
        pix.height = format.height;
        pix.pixelformat = format.fourcc.into();
        pix.field = v4l2_field_V4L2_FIELD_ANY;

        let mut fmt: v4l2_format = unsafe { mem::zeroed() };
        fmt.type_ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
        fmt.fmt.pix = pix;

        // the driver writes the format it actually applied back into `fmt`
        self.ioctl(Request::SetFormat, &mut fmt)?;
        Ok(pix_format(&fmt))
    }

    fn reset_crop(&self) -> io::Result<()> {
        // SAFETY: all-zero is a valid bit pattern for these plain C structs.
        let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
        cropcap.type_ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
        self.ioctl(Request::CropCap, &mut cropcap)?;

        let mut crop: v4l2_crop = unsafe { mem::zeroed() };
        crop.type_ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
        crop.c = cropcap.defrect;
        self.ioctl(Request::SetCrop, &mut crop)
    }

    fn request_buffers(&self, memory: Memory, count: u32) -> io::Result<u32> {
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
        req.type_ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE;
        req.memory = memory as u32;
        req.count = count;
        self.ioctl(Request::RequestBuffers, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&self, memory: Memory, index: u32) -> io::Result<BufferInfo> {
        let mut buf = Handle::buffer(memory, index);
        self.ioctl(Request::QueryBuffer, &mut buf)?;

        Ok(BufferInfo {
            index: buf.index,
            length: buf.length,
            // SAFETY: the driver fills in `offset` for memory-mapped buffers.
            offset: unsafe { buf.m.offset },
        })
    }

    fn queue(&self, memory: Memory, desc: &Enqueue) -> io::Result<()> {
        let mut buf = Handle::buffer(memory, desc.index);
        if let Some((ptr, len)) = desc.userptr {
            buf.m.userptr = ptr as c_ulong;
            buf.length = u32::try_from(len)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        }
        self.ioctl(Request::Queue, &mut buf)
    }

    fn dequeue(&self, memory: Memory) -> io::Result<Dequeued> {
        let mut buf = Handle::buffer(memory, 0);
        self.ioctl(Request::Dequeue, &mut buf)?;

        let userptr = match memory {
            // SAFETY: the driver returns the pointer the buffer was queued with.
            Memory::UserPtr => Some(unsafe { buf.m.userptr } as *mut u8),
            Memory::Mmap => None,
        };
        Ok(Dequeued {
            index: buf.index,
            userptr,
            meta: Metadata {
                bytesused: buf.bytesused,
                flags: Flags::from(buf.flags),
                sequence: buf.sequence,
                timestamp: Timestamp::new(buf.timestamp.tv_sec as i64, buf.timestamp.tv_usec as i64),
            },
        })
    }

    fn stream_on(&self) -> io::Result<()> {
        let mut typ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        self.ioctl(Request::StreamOn, &mut typ)
    }

    fn stream_off(&self) -> io::Result<()> {
        let mut typ = v4l2_buf_type_V4L2_BUF_TYPE_VIDEO_CAPTURE as c_int;
        self.ioctl(Request::StreamOff, &mut typ)
    }

    fn map(&self, offset: u32, length: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: the mapping is owned by a `Mapping`, which unmaps it exactly once.
        let ptr = unsafe { v4l2::mmap(self.fd, length, offset as libc::off_t)? };
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "driver mapped a null buffer"))
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, length: usize) -> io::Result<()> {
        v4l2::munmap(ptr.as_ptr() as *mut c_void, length)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        v4l2::read(self.fd, buf)
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<Readiness> {
        v4l2::poll(self.fd, timeout)
    }
}
