use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// YUYV 4:2:2, packed
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    /// Motion JPEG
    pub const MJPG: FourCC = FourCC::new(b"MJPG");
    /// 24-bit RGB
    pub const RGB3: FourCC = FourCC::new(b"RGB3");
    /// 8-bit greyscale
    pub const GREY: FourCC = FourCC::new(b"GREY");
    /// Y/CbCr 4:2:0, luma plane followed by interleaved chroma
    pub const NV12: FourCC = FourCC::new(b"NV12");

    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_capture::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_capture::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// let str = fourcc.str().unwrap();
    /// ```
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }

    /// Whether frames in this encoding have a variable size
    ///
    /// Compressed frames are legitimately smaller than the negotiated image size, raw ones are
    /// not.
    pub fn is_compressed(&self) -> bool {
        matches!(
            &self.repr,
            b"MJPG" | b"JPEG" | b"dvsd" | b"MPEG" | b"H264" | b"HEVC" | b"VP80" | b"VP90"
        )
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = str::from_utf8(&self.repr);
        if let Ok(string) = string {
            write!(f, "{}", string)?;
        }
        Ok(())
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}
