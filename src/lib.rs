//! Frame capture from video4linux devices
//!
//! A [`Session`] opens a capture device, negotiates a format and allocates buffers for one of
//! three transports (read I/O, memory-mapped or user pointer buffers). Once started, its
//! [`CaptureLoop`] hands out one [`Frame`] at a time, referencing the buffer in place.
//!
//! ```no_run
//! use std::time::Duration;
//! use v4l_capture::{FourCC, Session, Transport};
//!
//! let mut session = Session::open("/dev/video0", Transport::MemoryMapped)?;
//! let format = session.negotiate(640, 480, FourCC::YUYV)?;
//! println!("negotiated {}x{} {}", format.width, format.height, format.fourcc);
//!
//! let capture = session.start(4)?;
//! for _ in 0..10 {
//!     let mut frame = capture.next_frame(Some(Duration::from_secs(2)))?;
//!     println!("frame {} with {} bytes", frame.metadata().sequence, frame.len());
//!     frame.release()?;
//! }
//! session.stop()?;
//! # Ok::<(), v4l_capture::Error>(())
//! ```

#[cfg(feature = "v4l2")]
pub use v4l2_sys;

#[cfg(feature = "v4l2")]
pub mod v4l2;

pub mod buffer;
pub mod capture;
pub mod io;
pub mod ioctl;
pub mod memory;
pub mod session;

mod capability;
pub use capability::{Capabilities, Flags as CapabilityFlags};

mod config;
pub use config::{Config, EncodingPolicy};

mod device;
pub use device::{Device, Readiness};

mod error;
pub use error::{Error, Result};

mod fourcc;
pub use fourcc::FourCC;

mod format;
pub use format::Format;

mod timestamp;
pub use timestamp::Timestamp;

pub use capture::{CaptureLoop, Frame};
pub use io::Transport;
pub use session::Session;

#[cfg(test)]
mod mock;
