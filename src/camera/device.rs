//! Device session: format negotiation, buffer setup, streaming control.
//!
//! [`DeviceSession`] drives any [`VideoDevice`] through the full capture
//! lifecycle: capability check, format negotiation with fallback, buffer
//! allocation and mapping, stream start, and ordered teardown. The trait is
//! the seam between capture logic and the kernel interface, so the whole
//! sequence is exercised in tests against a scripted device.

use super::pool::{BufferPool, RawBuffer};
use super::types::{fourcc_name, CameraError, DriverCaps, PixelFormat, Resolution, StreamFormat};

/// Buffers requested from the device.
pub(crate) const BUFFER_COUNT: u32 = 4;
/// Fewest buffers that still pipeline dequeue against device fill.
pub(crate) const MIN_BUFFERS: u32 = 2;

/// A format grant as reported by the driver, fourcc not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawFormat {
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

/// A filled buffer as reported by the driver.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FilledBuffer {
    pub index: u32,
    pub bytes_used: u32,
}

/// What the capture path requires from the underlying video device.
///
/// The driver may substitute any of the values passed to `set_format`; the
/// caller must re-validate every grant.
pub(crate) trait VideoDevice {
    fn query_capabilities(&mut self) -> Result<DriverCaps, CameraError>;
    fn set_format(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<RawFormat, CameraError>;
    fn request_buffers(&mut self, count: u32) -> Result<u32, CameraError>;
    fn map_buffer(&mut self, index: u32) -> Result<RawBuffer, CameraError>;
    fn queue_buffer(&mut self, index: u32) -> Result<(), CameraError>;
    /// Non-blocking; `Ok(None)` means no filled buffer is ready yet.
    fn dequeue_buffer(&mut self) -> Result<Option<FilledBuffer>, CameraError>;
    fn set_streaming(&mut self, on: bool) -> Result<(), CameraError>;
    /// Release the device handle. Must be idempotent.
    fn close(&mut self);
}

/// Result of one non-blocking dequeue attempt.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Dequeued {
    /// No filled buffer yet; retry after a short pause
    NotReady,
    /// The driver handed back a buffer the pool could not accept; it was
    /// returned unread and the frame is skipped
    Rejected,
    /// A filled buffer, now held by the caller until `requeue`
    Filled { index: u32, bytes_used: u32 },
}

/// An open, streaming capture session.
///
/// Owns the device handle, the negotiated format, and the buffer pool.
/// Constructed streaming; torn down exactly once by [`close`](Self::close)
/// or drop.
#[derive(Debug)]
pub(crate) struct DeviceSession<D: VideoDevice> {
    device: D,
    format: StreamFormat,
    pool: BufferPool,
    streaming: bool,
    closed: bool,
}

#[cfg(target_os = "linux")]
impl DeviceSession<super::v4l2::V4l2Device> {
    /// Open the configured device node and bring the stream up.
    pub(crate) fn open(
        settings: &super::types::CameraSettings,
    ) -> Result<Self, CameraError> {
        let device = super::v4l2::V4l2Device::open(&settings.device_path)?;
        Self::initialize(device, settings.resolution)
    }
}

impl<D: VideoDevice> DeviceSession<D> {
    /// Drive the setup sequence on an already-opened device.
    ///
    /// On any failure the partial session is rolled back in order (stream
    /// off, unmap, close) before the error is returned.
    pub(crate) fn initialize(mut device: D, requested: Resolution) -> Result<Self, CameraError> {
        let mut pool = BufferPool::new();
        let mut streaming = false;
        match Self::setup(&mut device, requested, &mut pool, &mut streaming) {
            Ok(format) => Ok(Self {
                device,
                format,
                pool,
                streaming,
                closed: false,
            }),
            Err(err) => {
                if streaming {
                    let _ = device.set_streaming(false);
                }
                pool.unmap_all();
                device.close();
                Err(err)
            }
        }
    }

    fn setup(
        device: &mut D,
        requested: Resolution,
        pool: &mut BufferPool,
        streaming: &mut bool,
    ) -> Result<StreamFormat, CameraError> {
        let caps = device.query_capabilities()?;
        if !caps.supports_streaming_capture() {
            return Err(CameraError::UnsupportedDevice);
        }

        let format = Self::negotiate(device, requested)?;

        let granted = device.request_buffers(BUFFER_COUNT)?;
        if granted < MIN_BUFFERS {
            return Err(CameraError::InsufficientBuffers { granted });
        }

        for index in 0..granted {
            let buffer = device.map_buffer(index)?;
            pool.push(buffer);
            device.queue_buffer(index)?;
        }

        device.set_streaming(true)?;
        *streaming = true;

        log::info!(
            "camera stream started: {} {}x{}, stride {}, {} buffers",
            format.pixel_format,
            format.width,
            format.height,
            format.stride,
            pool.len()
        );
        Ok(format)
    }

    /// Negotiate a pixel format, preferring RGB24 and falling back to YUYV.
    ///
    /// Drivers may silently substitute another encoding, so every grant is
    /// re-validated and the granted geometry, not the requested one, is
    /// canonical.
    fn negotiate(device: &mut D, requested: Resolution) -> Result<StreamFormat, CameraError> {
        let mut grant = device.set_format(PixelFormat::Rgb24, requested.width, requested.height)?;

        if PixelFormat::from_fourcc(grant.fourcc) != Some(PixelFormat::Rgb24) {
            log::debug!(
                "driver substituted {} for RGB24, retrying with YUYV",
                fourcc_name(grant.fourcc)
            );
            grant = device.set_format(PixelFormat::Yuyv, grant.width, grant.height)?;
        }

        let pixel_format = PixelFormat::from_fourcc(grant.fourcc)
            .ok_or(CameraError::UnsupportedPixelFormat(grant.fourcc))?;

        if grant.width == 0 || grant.height == 0 {
            return Err(CameraError::InvalidFrameSize {
                width: grant.width,
                height: grant.height,
            });
        }

        let stride = if grant.stride == 0 {
            grant.width * pixel_format.bytes_per_pixel()
        } else {
            grant.stride
        };

        Ok(StreamFormat {
            pixel_format,
            width: grant.width,
            height: grant.height,
            stride,
        })
    }

    /// The negotiated stream format.
    pub(crate) fn format(&self) -> StreamFormat {
        self.format
    }

    /// Try to take the next filled buffer from the device.
    pub(crate) fn dequeue_filled(&mut self) -> Result<Dequeued, CameraError> {
        let filled = match self.device.dequeue_buffer()? {
            None => return Ok(Dequeued::NotReady),
            Some(filled) => filled,
        };

        if !self.pool.try_acquire(filled.index) {
            // The device is the source of truth for the index space; an
            // unknown or already-held index means our view is stale, so the
            // buffer goes straight back unread.
            log::warn!(
                "discarding frame from unexpected buffer index {}",
                filled.index
            );
            if let Err(err) = self.device.queue_buffer(filled.index) {
                log::debug!("requeue of rejected buffer {}: {}", filled.index, err);
            }
            return Ok(Dequeued::Rejected);
        }

        Ok(Dequeued::Filled {
            index: filled.index,
            bytes_used: filled.bytes_used,
        })
    }

    /// Readable bytes of a held buffer, with the used-length fallback rule
    /// applied.
    pub(crate) fn filled_bytes(&self, index: u32, bytes_used: u32) -> Option<&[u8]> {
        self.pool.bytes(index, bytes_used as usize)
    }

    /// Hand a held buffer back to the device's fill queue.
    ///
    /// A failure here desynchronizes the stream and is fatal to the session.
    pub(crate) fn requeue(&mut self, index: u32) -> Result<(), CameraError> {
        self.device.queue_buffer(index)?;
        self.pool.release(index);
        Ok(())
    }

    /// Tear the session down: stream off, unmap buffers, close the handle,
    /// in that order. Only the first call performs work.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.streaming {
            if let Err(err) = self.device.set_streaming(false) {
                log::debug!("stream-off during teardown: {}", err);
            }
            self.streaming = false;
        }
        self.pool.unmap_all();
        self.device.close();
        log::info!("camera stream closed");
    }
}

impl<D: VideoDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.close();
    }
}
