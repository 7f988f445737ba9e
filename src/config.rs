use std::{path::PathBuf, time::Duration};

use crate::io::Transport;
use crate::FourCC;

/// What to do when the device picks a different pixel encoding than requested
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum EncodingPolicy {
    /// Use whatever the device chose
    #[default]
    Accept,
    /// Fail negotiation with [`crate::Error::EncodingSubstituted`]
    Reject,
}

/// Capture settings
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use v4l_capture::{Config, FourCC, Transport};
///
/// let config = Config::default()
///     .device("/dev/video2")
///     .transport(Transport::UserPointer)
///     .resolution(1280, 720)
///     .fourcc(FourCC::MJPG)
///     .timeout(Duration::from_millis(500));
/// assert_eq!(config.buffers, 4);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the device node
    pub path: PathBuf,
    pub transport: Transport,
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    /// Number of buffers to request (ignored for read I/O)
    pub buffers: u32,
    /// How long to wait for each frame
    pub timeout: Duration,
    pub policy: EncodingPolicy,
    /// Reset the crop rectangle before negotiating
    pub reset_crop: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            path: PathBuf::from("/dev/video0"),
            transport: Transport::MemoryMapped,
            width: 640,
            height: 480,
            fourcc: FourCC::YUYV,
            buffers: 4,
            timeout: Duration::from_secs(2),
            policy: EncodingPolicy::Accept,
            reset_crop: true,
        }
    }
}

impl Config {
    pub fn device<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn fourcc(mut self, fourcc: FourCC) -> Self {
        self.fourcc = fourcc;
        self
    }

    pub fn buffers(mut self, count: u32) -> Self {
        self.buffers = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn encoding_policy(mut self, policy: EncodingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn reset_crop(mut self, on: bool) -> Self {
        self.reset_crop = on;
        self
    }
}
