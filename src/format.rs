use std::fmt;

use crate::FourCC;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Streaming format (single-planar)
///
/// When returned by the device after negotiation, every field is authoritative: buffers are
/// always sized from `size`, never from the requested dimensions.
pub struct Format {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// pixelformat code
    pub fourcc: FourCC,

    /// bytes per line
    pub stride: u32,
    /// maximum number of bytes required to store an image
    pub size: u32,
}

impl Format {
    /// Returns a capture format
    ///
    /// # Arguments
    ///
    /// * `width` - Width in pixels
    /// * `height` - Height in pixels
    /// * `fourcc` - Four character code (pixelformat)
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_capture::{Format, FourCC};
    /// let fmt = Format::new(640, 480, FourCC::new(b"YUYV"));
    /// ```
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }

    /// Repairs line and image sizes some drivers report too small
    ///
    /// Sizes are only ever raised to the minimum a known raw encoding needs, values the driver
    /// reported at or above that minimum are kept. For unknown encodings only a missing image
    /// size is filled in. Returns whether anything had to be changed.
    pub fn fix_up(&mut self) -> bool {
        if self.fourcc.is_compressed() {
            return false;
        }

        let mut changed = false;
        match layout(&self.fourcc) {
            Some((bytes, halves)) => {
                let min_stride = self.width.saturating_mul(bytes);
                if self.stride < min_stride {
                    self.stride = min_stride;
                    changed = true;
                }
                let min_size = (self.stride as u64 * self.height as u64 * halves as u64 / 2)
                    .min(u32::MAX as u64) as u32;
                if self.size < min_size {
                    self.size = min_size;
                    changed = true;
                }
            }
            None => {
                if self.size == 0 && self.stride != 0 {
                    self.size = self.stride.saturating_mul(self.height);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Bytes per pixel of the first plane, and the image size in half planes
fn layout(fourcc: &FourCC) -> Option<(u32, u32)> {
    match &fourcc.repr {
        b"GREY" | b"BA81" | b"GBRG" | b"GRBG" | b"RGGB" => Some((1, 2)),
        b"NV12" | b"NV21" | b"YU12" | b"YV12" => Some((1, 3)),
        b"NV16" | b"NV61" | b"422P" => Some((1, 4)),
        b"YUYV" | b"YVYU" | b"UYVY" | b"VYUY" | b"RGBP" | b"RGBO" | b"Y16 " => Some((2, 2)),
        b"RGB3" | b"BGR3" => Some((3, 2)),
        b"RGB4" | b"BGR4" | b"AR24" | b"XR24" | b"AB24" | b"XB24" => Some((4, 2)),
        _ => None,
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "width          : {}", self.width)?;
        writeln!(f, "height         : {}", self.height)?;
        writeln!(f, "fourcc         : {}", self.fourcc)?;
        writeln!(f, "stride         : {}", self.stride)?;
        writeln!(f, "size           : {}", self.size)?;
        Ok(())
    }
}
