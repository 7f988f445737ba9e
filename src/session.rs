use std::sync::Arc;

use crate::capability::Flags;
use crate::capture::CaptureLoop;
use crate::config::EncodingPolicy;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::io::{Pool, Transport};
use crate::ioctl::{self, Request};
use crate::{Capabilities, Format, FourCC};

/// Lifecycle of a [`Session`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Device is open, no format negotiated yet
    Opened,
    /// A format was negotiated, buffers may be allocated
    Negotiated,
    /// Buffers are allocated and the device is producing frames
    Streaming,
    /// The stream was stopped, the session may negotiate and start again
    Stopped,
}

/// An open capture device
///
/// The session owns the device, the negotiated format and, once started, the capture loop with
/// its buffers. Calls have to follow the order open, negotiate, start, stop. Anything else fails
/// with [`Error::InvalidState`].
pub struct Session<D: Device> {
    dev: Arc<D>,
    transport: Transport,
    caps: Capabilities,
    format: Option<Format>,
    policy: EncodingPolicy,
    reset_crop: bool,
    capture: Option<CaptureLoop<D>>,
    state: State,
}

impl<D: Device> Session<D> {
    /// Wraps an already open device
    ///
    /// The device capabilities are queried right away and checked against `transport`.
    pub fn with_device(dev: D, transport: Transport) -> Result<Self> {
        let dev = Arc::new(dev);
        let caps = query(&*dev, transport)?;
        tracing::debug!(driver = %caps.driver, card = %caps.card, %transport, "device opened");

        Ok(Session {
            dev,
            transport,
            caps,
            format: None,
            policy: EncodingPolicy::default(),
            reset_crop: true,
            capture: None,
            state: State::Opened,
        })
    }

    /// Capabilities as queried when the session was created
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Queries the capabilities again and checks them against the session's transport
    pub fn query_capabilities(&mut self) -> Result<&Capabilities> {
        self.caps = query(&*self.dev, self.transport)?;
        Ok(&self.caps)
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether negotiation may end up with a different encoding than requested
    pub fn set_encoding_policy(&mut self, policy: EncodingPolicy) {
        self.policy = policy;
    }

    /// Whether negotiation resets the crop rectangle first
    pub fn set_crop_reset(&mut self, on: bool) {
        self.reset_crop = on;
    }

    /// The format currently active on the device, without changing it
    pub fn current_format(&self) -> Result<Format> {
        ioctl::retry(Request::GetFormat, || self.dev.format())
            .map_err(|e| Error::device(Request::GetFormat, e))
    }

    /// The format returned by the last negotiation
    pub fn format(&self) -> Option<Format> {
        self.format
    }

    /// Asks the device for a format and returns what it actually chose
    ///
    /// The device may adjust width, height and encoding, the returned format is the one buffers
    /// are sized from. A changed encoding is only an error under [`EncodingPolicy::Reject`].
    ///
    /// # Arguments
    ///
    /// * `width` - Desired width in pixels
    /// * `height` - Desired height in pixels
    /// * `fourcc` - Desired pixel encoding
    pub fn negotiate(&mut self, width: u32, height: u32, fourcc: FourCC) -> Result<Format> {
        if self.state == State::Streaming {
            return Err(Error::InvalidState("cannot negotiate while streaming"));
        }

        if self.reset_crop {
            if let Err(e) = ioctl::retry(Request::SetCrop, || self.dev.reset_crop()) {
                // cropping is optional, most webcams do not support it
                tracing::trace!(error = %e, "crop reset not supported");
            }
        }

        let requested = Format::new(width, height, fourcc);
        let mut format = ioctl::retry(Request::SetFormat, || self.dev.set_format(&requested))
            .map_err(Error::FormatRejected)?;

        if format.fourcc != fourcc {
            match self.policy {
                EncodingPolicy::Accept => {
                    tracing::debug!(requested = %fourcc, negotiated = %format.fourcc, "encoding substituted")
                }
                EncodingPolicy::Reject => {
                    return Err(Error::EncodingSubstituted {
                        requested: fourcc,
                        negotiated: format.fourcc,
                    })
                }
            }
        }

        let reported = format;
        if format.fix_up() {
            tracing::warn!(
                stride = reported.stride,
                size = reported.size,
                fixed_stride = format.stride,
                fixed_size = format.size,
                "driver reported too small an image, fixed up"
            );
        }

        tracing::debug!(
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            size = format.size,
            "format negotiated"
        );
        self.format = Some(format);
        self.state = State::Negotiated;
        Ok(format)
    }

    /// Allocates `count` buffers and starts streaming
    ///
    /// `count` is a hint, the driver decides how many buffers it grants. It is ignored for read
    /// I/O. On failure the buffers allocated so far are freed again and the session stays where
    /// it was.
    pub fn start(&mut self, count: u32) -> Result<&CaptureLoop<D>> {
        match self.state {
            State::Negotiated | State::Stopped => {}
            State::Opened => return Err(Error::InvalidState("no format negotiated")),
            State::Streaming => return Err(Error::InvalidState("already streaming")),
        }
        let format = self
            .format
            .ok_or(Error::InvalidState("no format negotiated"))?;

        let mut pool = Pool::allocate(self.dev.clone(), self.transport, &format, count)?;
        pool.stream_on()?;

        self.state = State::Streaming;
        Ok(self.capture.insert(CaptureLoop::new(self.dev.clone(), pool)))
    }

    /// The running capture loop
    pub fn capture(&self) -> Result<&CaptureLoop<D>> {
        match (&self.capture, self.state) {
            (Some(capture), State::Streaming) => Ok(capture),
            _ => Err(Error::InvalidState("not streaming")),
        }
    }

    /// Stops streaming and frees all buffers
    ///
    /// Stopping a session that is not streaming does nothing.
    pub fn stop(&mut self) -> Result<()> {
        let mut capture = match self.capture.take() {
            Some(capture) => capture,
            None => return Ok(()),
        };

        self.state = State::Stopped;
        capture.shutdown()?;
        tracing::debug!("session stopped");
        Ok(())
    }

    /// Stops the session and closes the device
    pub fn close(mut self) -> Result<()> {
        self.stop()
    }
}

#[cfg(feature = "v4l2")]
impl Session<crate::v4l2::Handle> {
    /// Opens the device node at `path`
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_capture::{Session, Transport};
    ///
    /// if let Ok(session) = Session::open("/dev/video0", Transport::MemoryMapped) {
    ///     println!("{}", session.capabilities());
    /// }
    /// ```
    pub fn open<P: AsRef<std::path::Path>>(path: P, transport: Transport) -> Result<Self> {
        let handle = crate::v4l2::Handle::open(path.as_ref()).map_err(|source| Error::Open {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Session::with_device(handle, transport)
    }

    /// Opens and configures a device, ready to [`Session::start`]
    pub fn from_config(config: &crate::Config) -> Result<Self> {
        let mut session = Session::open(&config.path, config.transport)?;
        session.set_encoding_policy(config.policy);
        session.set_crop_reset(config.reset_crop);
        session.negotiate(config.width, config.height, config.fourcc)?;
        Ok(session)
    }
}

fn query<D: Device>(dev: &D, transport: Transport) -> Result<Capabilities> {
    let caps = ioctl::retry(Request::QueryCap, || dev.query_caps()).map_err(|e| {
        if e.raw_os_error() == Some(libc::EINVAL) {
            Error::UnsupportedDevice("not a video4linux device".to_owned())
        } else {
            Error::device(Request::QueryCap, e)
        }
    })?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(Error::UnsupportedDevice(format!(
            "{} is no video capture device",
            caps.card
        )));
    }

    let (needed, what) = if transport.is_streaming() {
        (Flags::STREAMING, "streaming i/o")
    } else {
        (Flags::READ_WRITE, "read i/o")
    };
    if !caps.capabilities.contains(needed) {
        return Err(Error::UnsupportedDevice(format!(
            "{} does not support {}",
            caps.card, what
        )));
    }

    Ok(caps)
}

impl<D: Device> Drop for Session<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use std::time::Duration;

    fn session(dev: &MockDevice, transport: Transport) -> Session<MockDevice> {
        Session::with_device(dev.clone(), transport).unwrap()
    }

    #[test]
    fn full_lifecycle() {
        for transport in [
            Transport::Read,
            Transport::MemoryMapped,
            Transport::UserPointer,
        ] {
            let dev = MockDevice::new();
            let mut session = session(&dev, transport);
            assert_eq!(session.state(), State::Opened);

            let format = session.negotiate(320, 240, FourCC::YUYV).unwrap();
            assert_eq!(format, Format { stride: 640, size: 640 * 240, ..Format::new(320, 240, FourCC::YUYV) });
            assert_eq!(session.state(), State::Negotiated);

            {
                let capture = session.start(4).unwrap();
                let mut frame = capture.next_frame(Some(Duration::from_secs(1))).unwrap();
                assert_eq!(frame.bytes().unwrap().len(), 640 * 240);
                frame.release().unwrap();
            }
            assert_eq!(session.state(), State::Streaming);
            assert!(session.capture().is_ok());

            session.stop().unwrap();
            assert_eq!(session.state(), State::Stopped);
            session.close().unwrap();
        }
    }

    #[test]
    fn tiny_request_is_sized_from_device_format() {
        let dev = MockDevice::new();
        dev.substitute_encoding(FourCC::YUYV);
        let mut session = session(&dev, Transport::UserPointer);

        let format = session.negotiate(1, 1, FourCC::new(b"XXXX")).unwrap();
        assert!(format.width >= 16 && format.height >= 12);
        assert_eq!(format.fourcc, FourCC::YUYV);
        assert_eq!(session.format(), Some(format));

        let capture = session.start(4).unwrap();
        let frame = capture.next_frame(None).unwrap();
        assert_eq!(frame.len(), format.size as usize);
    }

    #[test]
    fn one_byte_format_keeps_device_sizes() {
        for transport in [
            Transport::Read,
            Transport::MemoryMapped,
            Transport::UserPointer,
        ] {
            let dev = MockDevice::new();
            let mut session = session(&dev, transport);

            let format = session.negotiate(32, 48, FourCC::GREY).unwrap();
            assert_eq!(format, dev.format().unwrap());
            assert_eq!((format.stride, format.size), (32, 32 * 48));

            let capture = session.start(4).unwrap();
            for _ in 0..3 {
                let mut frame = capture.next_frame(Some(Duration::from_secs(1))).unwrap();
                assert_eq!(frame.bytes().unwrap().len(), 32 * 48);
                frame.release().unwrap();
            }
        }
    }

    #[test]
    fn substitution_can_be_rejected() {
        let dev = MockDevice::new();
        let mut session = session(&dev, Transport::MemoryMapped);
        session.set_encoding_policy(EncodingPolicy::Reject);

        match session.negotiate(640, 480, FourCC::RGB3) {
            Err(Error::EncodingSubstituted { requested, negotiated }) => {
                assert_eq!(requested, FourCC::RGB3);
                assert_eq!(negotiated, FourCC::YUYV);
            }
            other => panic!("expected EncodingSubstituted, got {:?}", other),
        }
        assert_eq!(session.state(), State::Opened);
    }

    #[test]
    fn crop_reset_failure_is_ignored() {
        let dev = MockDevice::new();
        let mut session = session(&dev, Transport::MemoryMapped);
        session.negotiate(640, 480, FourCC::YUYV).unwrap();
        assert_eq!(dev.stats().crop_resets, 1);

        session.set_crop_reset(false);
        session.negotiate(640, 480, FourCC::YUYV).unwrap();
        assert_eq!(dev.stats().crop_resets, 1);
    }

    #[test]
    fn format_rejected() {
        let dev = MockDevice::new();
        dev.fail_set_format(libc::EINVAL);
        let mut session = session(&dev, Transport::MemoryMapped);

        assert!(matches!(
            session.negotiate(640, 480, FourCC::YUYV),
            Err(Error::FormatRejected(_))
        ));
    }

    #[test]
    fn current_format_does_not_negotiate() {
        let dev = MockDevice::new();
        let session = session(&dev, Transport::MemoryMapped);
        let format = session.current_format().unwrap();

        assert_eq!(format.fourcc, FourCC::YUYV);
        assert_eq!(dev.stats().formats_set, 0);
        assert_eq!(session.format(), None);
    }

    #[test]
    fn stop_twice_is_a_no_op() {
        let dev = MockDevice::new();
        let mut session = session(&dev, Transport::MemoryMapped);
        session.negotiate(640, 480, FourCC::YUYV).unwrap();
        session.start(4).unwrap();

        session.stop().unwrap();
        session.stop().unwrap();
        assert_eq!(dev.stats().stream_off, 1);
        assert_eq!(dev.stats().unmapped, 4);
        assert_eq!(session.state(), State::Stopped);
    }

    #[test]
    fn failed_stop_still_frees_buffers() {
        let dev = MockDevice::new();
        let mut session = session(&dev, Transport::MemoryMapped);
        session.negotiate(640, 480, FourCC::YUYV).unwrap();
        session.start(4).unwrap();
        dev.fail_stream_off(libc::ENODEV);

        assert!(matches!(session.stop(), Err(Error::Device { .. })));
        assert_eq!(session.state(), State::Stopped);
        session.stop().unwrap();
        drop(session);

        let stats = dev.stats();
        assert_eq!(stats.stream_off, 1);
        assert_eq!(stats.unmapped, 4);
    }

    #[test]
    fn read_issues_no_stream_control() {
        let dev = MockDevice::new();
        let mut session = session(&dev, Transport::Read);
        session.negotiate(640, 480, FourCC::YUYV).unwrap();
        session.start(4).unwrap();
        session.stop().unwrap();

        let stats = dev.stats();
        assert_eq!(stats.stream_on, 0);
        assert_eq!(stats.stream_off, 0);
        assert!(stats.requests.is_empty());
    }

    #[test]
    fn restart_after_stop() {
        let dev = MockDevice::new();
        let mut session = session(&dev, Transport::MemoryMapped);
        session.negotiate(640, 480, FourCC::YUYV).unwrap();
        session.start(4).unwrap();
        session.stop().unwrap();

        session.negotiate(320, 240, FourCC::YUYV).unwrap();
        let capture = session.start(2).unwrap();
        assert_eq!(capture.buffer_count(), 2);
        assert_eq!(dev.stats().stream_on, 2);
    }

    #[test]
    fn calls_out_of_order() {
        let dev = MockDevice::new();
        let mut session = session(&dev, Transport::MemoryMapped);

        assert!(matches!(session.start(4), Err(Error::InvalidState(_))));
        assert!(matches!(session.capture(), Err(Error::InvalidState(_))));

        session.negotiate(640, 480, FourCC::YUYV).unwrap();
        session.start(4).unwrap();
        assert!(matches!(session.start(4), Err(Error::InvalidState(_))));
        assert!(matches!(
            session.negotiate(320, 240, FourCC::YUYV),
            Err(Error::InvalidState(_))
        ));
        assert!(session.capture().is_ok());
    }

    #[test]
    fn stream_start_failure_frees_buffers() {
        let dev = MockDevice::new();
        dev.fail_stream_on(libc::EIO);
        let mut session = session(&dev, Transport::MemoryMapped);
        session.negotiate(640, 480, FourCC::YUYV).unwrap();

        assert!(matches!(session.start(4), Err(Error::StreamStart(_))));
        assert_eq!(session.state(), State::Negotiated);
        let stats = dev.stats();
        assert_eq!(stats.unmapped, 4);
        assert_eq!(stats.requests, vec![4, 0]);
    }

    #[test]
    fn unsupported_devices() {
        let dev = MockDevice::new();
        dev.set_caps(Flags::VIDEO_OUTPUT | Flags::STREAMING);
        assert!(matches!(
            Session::with_device(dev, Transport::MemoryMapped),
            Err(Error::UnsupportedDevice(_))
        ));

        let dev = MockDevice::new();
        dev.set_caps(Flags::VIDEO_CAPTURE | Flags::READ_WRITE);
        assert!(matches!(
            Session::with_device(dev.clone(), Transport::UserPointer),
            Err(Error::UnsupportedDevice(_))
        ));
        assert!(Session::with_device(dev, Transport::Read).is_ok());

        let dev = MockDevice::new();
        dev.fail_caps(libc::EINVAL);
        assert!(matches!(
            Session::with_device(dev, Transport::Read),
            Err(Error::UnsupportedDevice(_))
        ));
    }
}
