use std::{io, path::PathBuf};

use thiserror::Error;

use crate::ioctl::Request;
use crate::FourCC;

/// Errors reported by capture sessions
///
/// Only [`Error::Timeout`] is recoverable. [`Error::InvalidState`] is never caused by the device,
/// it signals a call made out of order.
#[derive(Debug, Error)]
pub enum Error {
    /// The device node could not be opened
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The device lacks a capability required by the chosen transport
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The format could not be set at all (substitution is not an error)
    #[error("format rejected by device: {0}")]
    FormatRejected(#[source] io::Error),

    /// The device substituted the pixel encoding and the session policy forbids that
    #[error("device substituted encoding {negotiated} for requested {requested}")]
    EncodingSubstituted { requested: FourCC, negotiated: FourCC },

    /// Buffers could not be requested, mapped or allocated
    #[error("buffer allocation failed: {reason}")]
    BufferAllocation {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    /// The stream-on request failed
    #[error("failed to start streaming: {0}")]
    StreamStart(#[source] io::Error),

    /// No frame became available within the timeout
    #[error("timed out waiting for a frame")]
    Timeout,

    /// A request failed while streaming, e.g. because the device went away
    #[error("{request} failed: {source}")]
    Device {
        request: Request,
        #[source]
        source: io::Error,
    },

    /// A non-live source has no more data
    #[error("end of stream")]
    EndOfStream,

    /// The call is not valid in the current session state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    pub(crate) fn device(request: Request, source: io::Error) -> Self {
        Error::Device { request, source }
    }

    pub(crate) fn allocation<S: Into<String>>(reason: S, source: Option<io::Error>) -> Self {
        Error::BufferAllocation {
            reason: reason.into(),
            source,
        }
    }

    /// Whether the caller may simply try again
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Whether the session must be stopped (and possibly reopened) after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Timeout | Error::InvalidState(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::Timeout.is_recoverable());
        assert!(!Error::Timeout.is_fatal());
        assert!(!Error::InvalidState("double release").is_fatal());
        assert!(!Error::InvalidState("double release").is_recoverable());

        let err = Error::device(Request::Dequeue, io::Error::from_raw_os_error(libc::ENODEV));
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("VIDIOC_DQBUF failed"));
        assert!(Error::EndOfStream.is_fatal());
    }
}
