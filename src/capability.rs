use bitflags::bitflags;
use std::{fmt, str};

bitflags! {
    /// Device capability flags
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const VIDEO_CAPTURE         = 0x00000001;
        const VIDEO_OUTPUT          = 0x00000002;
        const VIDEO_OVERLAY         = 0x00000004;
        const VBI_CAPTURE           = 0x00000010;
        const VBI_OUTPUT            = 0x00000020;
        const SLICED_VBI_CAPTURE    = 0x00000040;
        const SLICED_VBI_OUTPUT     = 0x00000080;
        const RDS_CAPTURE           = 0x00000100;
        const VIDEO_OUTPUT_OVERLAY  = 0x00000200;
        const HW_FREQ_SEEK          = 0x00000400;
        const RDS_OUTPUT            = 0x00000800;

        const VIDEO_CAPTURE_MPLANE  = 0x00001000;
        const VIDEO_OUTPUT_MPLANE   = 0x00002000;
        const VIDEO_M2M_MPLANE      = 0x00004000;
        const VIDEO_M2M             = 0x00008000;

        const TUNER                 = 0x00010000;
        const AUDIO                 = 0x00020000;
        const RADIO                 = 0x00040000;
        const MODULATOR             = 0x00080000;

        const SDR_CAPTURE           = 0x00100000;
        const EXT_PIX_FORMAT        = 0x00200000;
        const SDR_OUTPUT            = 0x00400000;
        const META_CAPTURE          = 0x00800000;

        const READ_WRITE            = 0x01000000;
        const ASYNC_IO              = 0x02000000;
        const STREAMING             = 0x04000000;
        const META_OUTPUT           = 0x08000000;

        const TOUCH                 = 0x10000000;
        const IO_MC                 = 0x20000000;

        const DEVICE_CAPS           = 0x80000000;
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

#[derive(Debug, Clone)]
/// Device capabilities
pub struct Capabilities {
    /// Driver name, e.g. uvc for usb video class devices
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus name, e.g. USB or PCI
    pub bus: String,
    /// Version number MAJOR.MINOR.PATCH
    pub version: (u8, u8, u8),

    /// Capability flags of the opened device node
    pub capabilities: Flags,
}

impl Capabilities {
    /// Builds the capability set from the raw fields reported by the driver
    ///
    /// When the driver advertises per-node capabilities (`DEVICE_CAPS`), those describe the opened
    /// node and are used instead of the whole-driver set.
    ///
    /// # Arguments
    ///
    /// * `driver` - NUL padded driver name
    /// * `card` - NUL padded card name
    /// * `bus` - NUL padded bus info
    /// * `version` - Kernel version the driver was built for
    /// * `caps` - Capabilities of the physical device as a whole
    /// * `device_caps` - Capabilities of the opened node
    pub fn new(
        driver: &[u8],
        card: &[u8],
        bus: &[u8],
        version: u32,
        caps: u32,
        device_caps: u32,
    ) -> Self {
        let caps = Flags::from(caps);
        let capabilities = if caps.contains(Flags::DEVICE_CAPS) {
            Flags::from(device_caps)
        } else {
            caps
        };

        Capabilities {
            driver: c_str(driver),
            card: c_str(card),
            bus: c_str(bus),
            version: (
                ((version >> 16) & 0xff) as u8,
                ((version >> 8) & 0xff) as u8,
                (version & 0xff) as u8,
            ),
            capabilities,
        }
    }
}

fn c_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver      : {}", self.driver)?;
        writeln!(f, "Card        : {}", self.card)?;
        writeln!(f, "Bus         : {}", self.bus)?;
        writeln!(
            f,
            "Version     : {}.{}.{}",
            self.version.0, self.version.1, self.version.2
        )?;
        writeln!(f, "Capabilites : {}", self.capabilities)?;
        Ok(())
    }
}
