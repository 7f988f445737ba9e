use std::{fmt, io};

/// Named operations issued against a device
///
/// The raw request codes live with the platform layer (see `v4l2::vidioc`), the rest of the crate
/// only ever refers to these names.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Request {
    QueryCap,
    GetFormat,
    SetFormat,
    CropCap,
    SetCrop,
    RequestBuffers,
    QueryBuffer,
    Queue,
    Dequeue,
    StreamOn,
    StreamOff,
    /// Not an ioctl: mapping a buffer into the process
    Map,
    /// Not an ioctl: unmapping a buffer
    Unmap,
    /// Not an ioctl: direct read(2) I/O
    Read,
    /// Not an ioctl: readiness wait
    Poll,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Request::QueryCap => "VIDIOC_QUERYCAP",
            Request::GetFormat => "VIDIOC_G_FMT",
            Request::SetFormat => "VIDIOC_S_FMT",
            Request::CropCap => "VIDIOC_CROPCAP",
            Request::SetCrop => "VIDIOC_S_CROP",
            Request::RequestBuffers => "VIDIOC_REQBUFS",
            Request::QueryBuffer => "VIDIOC_QUERYBUF",
            Request::Queue => "VIDIOC_QBUF",
            Request::Dequeue => "VIDIOC_DQBUF",
            Request::StreamOn => "VIDIOC_STREAMON",
            Request::StreamOff => "VIDIOC_STREAMOFF",
            Request::Map => "mmap",
            Request::Unmap => "munmap",
            Request::Read => "read",
            Request::Poll => "poll",
        };
        write!(f, "{}", name)
    }
}

/// Runs `op` until it returns something other than EINTR.
///
/// Signal delivery interrupting a request is never reported to callers.
pub fn retry<T, F>(request: Request, mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                tracing::trace!(%request, "interrupted, retrying");
            }
            res => return res,
        }
    }
}
