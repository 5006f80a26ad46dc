//! Camera types and data structures.

use std::io;
use std::path::PathBuf;
use std::time::Instant;

use thiserror::Error;

/// Build a little-endian V4L2 fourcc tag from its four ASCII characters.
const fn fourcc(tag: [u8; 4]) -> u32 {
    u32::from_le_bytes(tag)
}

/// Render a fourcc tag for log and error messages, e.g. `"MJPG" (0x47504a4d)`.
pub fn fourcc_name(value: u32) -> String {
    let bytes = value.to_le_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        let tag: String = bytes.iter().map(|b| *b as char).collect();
        format!("\"{}\" (0x{:08x})", tag, value)
    } else {
        format!("0x{:08x}", value)
    }
}

/// Camera resolution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// QCIF (352x288) - the default negotiation request
    pub const QCIF: Resolution = Resolution {
        width: 352,
        height: 288,
    };

    /// VGA (640x480)
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    /// HD (1280x720)
    pub const HD: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
}

impl Default for Resolution {
    fn default() -> Self {
        Self::QCIF
    }
}

/// Pixel encodings the capture path understands.
///
/// These are the two formats the converter can normalize; anything else a
/// driver grants is rejected during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed RGB, 3 bytes per pixel (`RGB3`)
    Rgb24,
    /// Packed YUV 4:2:2, 2 bytes per pixel, chroma shared per pixel pair (`YUYV`)
    Yuyv,
}

impl PixelFormat {
    /// The V4L2 fourcc tag for this encoding.
    pub const fn as_fourcc(self) -> u32 {
        match self {
            PixelFormat::Rgb24 => fourcc(*b"RGB3"),
            PixelFormat::Yuyv => fourcc(*b"YUYV"),
        }
    }

    /// Map a driver-reported fourcc back to a supported encoding.
    pub fn from_fourcc(value: u32) -> Option<Self> {
        if value == PixelFormat::Rgb24.as_fourcc() {
            Some(PixelFormat::Rgb24)
        } else if value == PixelFormat::Yuyv.as_fourcc() {
            Some(PixelFormat::Yuyv)
        } else {
            None
        }
    }

    /// Bytes per pixel in the raw (device-side) encoding.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Yuyv => 2,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Rgb24 => write!(f, "RGB24"),
            PixelFormat::Yuyv => write!(f, "YUYV"),
        }
    }
}

/// The format negotiated with the device.
///
/// Set once during session setup and immutable afterwards. The values here
/// are what the driver granted, which may differ from what was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub pixel_format: PixelFormat,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Bytes per scanline in the raw buffer; may exceed the tight row size
    /// due to driver alignment padding. Never 0 after negotiation.
    pub stride: u32,
}

impl StreamFormat {
    /// The unpadded row size for the raw encoding.
    pub fn tight_stride(&self) -> u32 {
        self.width * self.pixel_format.bytes_per_pixel()
    }

    /// Size in bytes of one converted RGB24 frame.
    pub fn rgb_frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Capability bits reported by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverCaps {
    /// Capabilities of the physical device as a whole (legacy field)
    pub capabilities: u32,
    /// Capabilities of the opened device node, when advertised
    pub device_caps: u32,
}

impl DriverCaps {
    pub const VIDEO_CAPTURE: u32 = 0x0000_0001;
    pub const STREAMING: u32 = 0x0400_0000;
    /// Set when `device_caps` is populated and should be consulted instead
    /// of the legacy field.
    pub const DEVICE_CAPS: u32 = 0x8000_0000;

    /// The bits that apply to the opened node: the extended field when the
    /// driver advertises it, else the legacy field.
    pub fn effective(&self) -> u32 {
        if self.capabilities & Self::DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    /// Whether the node can do streaming video capture at all.
    pub fn supports_streaming_capture(&self) -> bool {
        let caps = self.effective();
        caps & Self::VIDEO_CAPTURE != 0 && caps & Self::STREAMING != 0
    }
}

/// A captured camera frame, normalized to tightly packed RGB24.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw pixel data, exactly `width * height * 3` bytes, row-major, no padding
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Timestamp when the frame was converted
    pub timestamp: Instant,
}

/// Settings for camera capture.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Capture device node
    pub device_path: PathBuf,
    /// Requested resolution; the device decides what it actually grants
    pub resolution: Resolution,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/video0"),
            resolution: Resolution::default(),
        }
    }
}

/// Errors that can occur during camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// The device node could not be opened
    #[error("cannot open video device '{path}': {source}")]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The device cannot do streaming video capture
    #[error("device does not support streaming video capture")]
    UnsupportedDevice,
    /// Negotiation ended on an encoding the converter cannot handle
    #[error("device granted unsupported pixel format {}", fourcc_name(*.0))]
    UnsupportedPixelFormat(u32),
    /// The driver granted too few buffers to pipeline capture
    #[error("insufficient capture buffers: device granted {granted}, need at least 2")]
    InsufficientBuffers { granted: u32 },
    /// The driver reported a nonsensical frame geometry
    #[error("negotiated frame size {width}x{height} is invalid")]
    InvalidFrameSize { width: u32, height: u32 },
    /// A device control operation failed
    #[error("{op} failed: {source}")]
    DeviceIo {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    /// Capture thread is already running
    #[error("capture is already running")]
    AlreadyRunning,
    /// The capture thread died before the stream came up
    #[error("failed to start camera stream: {0}")]
    StreamFailed(String),
    /// Capture bootstrap is only wired up for Linux
    #[error("camera capture is not supported on this platform")]
    UnsupportedPlatform,
}
