//! Scripted in-memory video device for exercising the capture path.
//!
//! Implements [`VideoDevice`] over heap buffers: negotiation grants, buffer
//! counts, and the sequence of dequeue results are all scripted by the test,
//! and every driver-facing call is recorded in a shared [`FakeState`] the
//! test can inspect after the session has consumed the device.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use super::device::{FilledBuffer, RawFormat, VideoDevice};
use super::pool::{BufferMemory, RawBuffer};
use super::types::{CameraError, DriverCaps};

/// One scripted answer to `dequeue_buffer`.
#[derive(Debug)]
pub(crate) enum FillEvent {
    /// Report would-block
    NotReady,
    /// Fill the buffer at `index` with `data`, then hand the index back
    Filled {
        index: u32,
        bytes_used: u32,
        data: Vec<u8>,
    },
    /// Fail fatally
    Error,
}

/// Everything the fake observed, shared with the test.
#[derive(Debug, Default)]
pub(crate) struct FakeState {
    /// Every `set_format` request as (fourcc, width, height)
    pub format_requests: Vec<(u32, u32, u32)>,
    /// Every queued buffer index, setup queues included
    pub queued: Vec<u32>,
    /// Every `set_streaming` argument, in order
    pub stream_calls: Vec<bool>,
    /// Buffers successfully mapped
    pub mapped: usize,
    /// Whether the handle was closed
    pub closed: bool,
}

#[derive(Debug)]
pub(crate) struct FakeDevice {
    pub caps: DriverCaps,
    /// Grants returned by successive `set_format` calls, in order
    pub grants: Vec<RawFormat>,
    grant_cursor: usize,
    /// Count granted by `request_buffers`
    pub buffers_granted: u32,
    /// Mapped length of every buffer
    pub buffer_len: usize,
    /// Scripted `dequeue_buffer` results; empty means would-block forever
    pub fills: VecDeque<FillEvent>,
    /// Fail `map_buffer` for this index
    pub fail_map_at: Option<u32>,
    /// Fail the streaming-on call
    pub fail_stream_on: bool,
    /// Fail the nth `queue_buffer` call (1-based, setup calls included)
    pub fail_queue_on_call: Option<usize>,
    queue_calls: usize,
    state: Arc<Mutex<FakeState>>,
    // Box keeps every mapped region alive and at a stable address; all reads
    // and writes go through the pointers handed out by map_buffer.
    backing: Vec<Box<[u8]>>,
    ptrs: Vec<(*mut u8, usize)>,
}

// Only one thread drives the device at a time (it lives inside the session);
// the raw pointers gate the auto impl, not actual sharing.
unsafe impl Send for FakeDevice {}

impl FakeDevice {
    /// A fully capable device granting 4 buffers sized for the first grant.
    pub(crate) fn new(grants: Vec<RawFormat>) -> Self {
        let buffer_len = grants
            .first()
            .map(|g| {
                let stride = if g.stride > 0 { g.stride } else { g.width * 3 };
                stride as usize * g.height as usize
            })
            .unwrap_or(0);
        Self {
            caps: DriverCaps {
                capabilities: DriverCaps::DEVICE_CAPS,
                device_caps: DriverCaps::VIDEO_CAPTURE | DriverCaps::STREAMING,
            },
            grants,
            grant_cursor: 0,
            buffers_granted: 4,
            buffer_len,
            fills: VecDeque::new(),
            fail_map_at: None,
            fail_stream_on: false,
            fail_queue_on_call: None,
            queue_calls: 0,
            state: Arc::new(Mutex::new(FakeState::default())),
            backing: Vec::new(),
            ptrs: Vec::new(),
        }
    }

    /// Handle to the observation log; survives the device being moved into
    /// a session.
    pub(crate) fn state(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }

    fn io_error(op: &'static str) -> CameraError {
        CameraError::DeviceIo {
            op,
            source: io::Error::from(io::ErrorKind::Other),
        }
    }
}

impl VideoDevice for FakeDevice {
    fn query_capabilities(&mut self) -> Result<DriverCaps, CameraError> {
        Ok(self.caps)
    }

    fn set_format(
        &mut self,
        format: super::types::PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<RawFormat, CameraError> {
        self.state
            .lock()
            .unwrap()
            .format_requests
            .push((format.as_fourcc(), width, height));
        let grant = self
            .grants
            .get(self.grant_cursor)
            .or_else(|| self.grants.last())
            .copied()
            .ok_or_else(|| Self::io_error("VIDIOC_S_FMT"))?;
        self.grant_cursor += 1;
        Ok(grant)
    }

    fn request_buffers(&mut self, _count: u32) -> Result<u32, CameraError> {
        Ok(self.buffers_granted)
    }

    fn map_buffer(&mut self, index: u32) -> Result<RawBuffer, CameraError> {
        if self.fail_map_at == Some(index) {
            return Err(Self::io_error("mmap"));
        }
        let mut region = vec![0u8; self.buffer_len].into_boxed_slice();
        let ptr = region.as_mut_ptr();
        let len = region.len();
        self.backing.push(region);
        self.ptrs.push((ptr, len));
        self.state.lock().unwrap().mapped += 1;
        Ok(RawBuffer::new(ptr, len, BufferMemory::UserPtr))
    }

    fn queue_buffer(&mut self, index: u32) -> Result<(), CameraError> {
        self.queue_calls += 1;
        if self.fail_queue_on_call == Some(self.queue_calls) {
            return Err(Self::io_error("VIDIOC_QBUF"));
        }
        self.state.lock().unwrap().queued.push(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<Option<FilledBuffer>, CameraError> {
        match self.fills.pop_front() {
            None | Some(FillEvent::NotReady) => Ok(None),
            Some(FillEvent::Error) => Err(Self::io_error("VIDIOC_DQBUF")),
            Some(FillEvent::Filled {
                index,
                bytes_used,
                data,
            }) => {
                if let Some(&(ptr, len)) = self.ptrs.get(index as usize) {
                    let n = data.len().min(len);
                    // Device-side fill: write through the same pointer the
                    // pool reads from.
                    unsafe {
                        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, n);
                    }
                }
                Ok(Some(FilledBuffer { index, bytes_used }))
            }
        }
    }

    fn set_streaming(&mut self, on: bool) -> Result<(), CameraError> {
        if on && self.fail_stream_on {
            return Err(Self::io_error("VIDIOC_STREAMON"));
        }
        self.state.lock().unwrap().stream_calls.push(on);
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
