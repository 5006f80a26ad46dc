//! Raw V4L2 backend for Linux.
//!
//! Speaks the kernel's streaming-I/O ABI directly: `#[repr(C)]` mirrors of
//! the uapi structs, ioctl request codes derived from those structs' sizes,
//! and mmap'd frame buffers. Everything here stays behind [`VideoDevice`];
//! the capture logic above never sees an fd.

// Struct names, and fields that exist only to pin the kernel layout,
// mirror the uapi headers.
#![allow(non_camel_case_types, dead_code)]

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::device::{FilledBuffer, RawFormat, VideoDevice};
use super::pool::{BufferMemory, RawBuffer};
use super::types::{CameraError, DriverCaps, PixelFormat};

const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_FIELD_ANY: u32 = 0;
const V4L2_MEMORY_MMAP: u32 = 1;

// asm-generic _IOC encoding.
const IOC_WRITE: libc::c_ulong = 1;
const IOC_READ: libc::c_ulong = 2;

const fn ioc(dir: libc::c_ulong, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    (dir << 30) | ((size as libc::c_ulong) << 16) | ((ty as libc::c_ulong) << 8) | nr as libc::c_ulong
}

// Request codes carry the struct size, so they are computed from our mirror
// structs rather than hard-coded; a size mismatch would make the kernel
// reject the call.
const VIDIOC_QUERYCAP: libc::c_ulong =
    ioc(IOC_READ, b'V', 0, mem::size_of::<v4l2_capability>());
const VIDIOC_S_FMT: libc::c_ulong =
    ioc(IOC_READ | IOC_WRITE, b'V', 5, mem::size_of::<v4l2_format>());
const VIDIOC_REQBUFS: libc::c_ulong = ioc(
    IOC_READ | IOC_WRITE,
    b'V',
    8,
    mem::size_of::<v4l2_requestbuffers>(),
);
const VIDIOC_QUERYBUF: libc::c_ulong =
    ioc(IOC_READ | IOC_WRITE, b'V', 9, mem::size_of::<v4l2_buffer>());
const VIDIOC_QBUF: libc::c_ulong =
    ioc(IOC_READ | IOC_WRITE, b'V', 15, mem::size_of::<v4l2_buffer>());
const VIDIOC_DQBUF: libc::c_ulong =
    ioc(IOC_READ | IOC_WRITE, b'V', 17, mem::size_of::<v4l2_buffer>());
const VIDIOC_STREAMON: libc::c_ulong =
    ioc(IOC_WRITE, b'V', 18, mem::size_of::<libc::c_int>());
const VIDIOC_STREAMOFF: libc::c_ulong =
    ioc(IOC_WRITE, b'V', 19, mem::size_of::<libc::c_int>());

#[repr(C)]
struct v4l2_capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_pix_format {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    private: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

// The kernel union is 200 bytes and 8-byte aligned (some arms hold
// pointers); the raw arm pins both.
#[repr(C)]
#[derive(Clone, Copy)]
union v4l2_format_fmt {
    pix: v4l2_pix_format,
    raw: [u64; 25],
}

#[repr(C)]
struct v4l2_format {
    type_: u32,
    fmt: v4l2_format_fmt,
}

#[repr(C)]
struct v4l2_requestbuffers {
    count: u32,
    type_: u32,
    memory: u32,
    reserved: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct v4l2_timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
union v4l2_buffer_m {
    offset: u32,
    userptr: libc::c_ulong,
}

#[repr(C)]
struct v4l2_buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: v4l2_timecode,
    sequence: u32,
    memory: u32,
    m: v4l2_buffer_m,
    length: u32,
    reserved2: u32,
    reserved: u32,
}

fn capture_buffer(index: u32) -> v4l2_buffer {
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
    buf.memory = V4L2_MEMORY_MMAP;
    buf.index = index;
    buf
}

/// A V4L2 capture node opened in non-blocking mode.
#[derive(Debug)]
pub(crate) struct V4l2Device {
    fd: libc::c_int,
}

impl V4l2Device {
    pub(crate) fn open(path: &Path) -> Result<Self, CameraError> {
        let unavailable = |source| CameraError::DeviceUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| unavailable(io::Error::from(io::ErrorKind::InvalidInput)))?;

        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR | libc::O_NONBLOCK) };
        if fd < 0 {
            return Err(unavailable(io::Error::last_os_error()));
        }
        Ok(Self { fd })
    }

    fn ioctl<T>(
        &self,
        op: &'static str,
        request: libc::c_ulong,
        arg: &mut T,
    ) -> Result<(), CameraError> {
        let rc = unsafe { libc::ioctl(self.fd, request, arg as *mut T) };
        if rc == -1 {
            return Err(CameraError::DeviceIo {
                op,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl VideoDevice for V4l2Device {
    fn query_capabilities(&mut self) -> Result<DriverCaps, CameraError> {
        let mut caps: v4l2_capability = unsafe { mem::zeroed() };
        self.ioctl("VIDIOC_QUERYCAP", VIDIOC_QUERYCAP, &mut caps)?;
        Ok(DriverCaps {
            capabilities: caps.capabilities,
            device_caps: caps.device_caps,
        })
    }

    fn set_format(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<RawFormat, CameraError> {
        let mut fmt: v4l2_format = unsafe { mem::zeroed() };
        fmt.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        {
            let pix = unsafe { &mut fmt.fmt.pix };
            pix.width = width;
            pix.height = height;
            pix.pixelformat = format.as_fourcc();
            pix.field = V4L2_FIELD_ANY;
        }
        self.ioctl("VIDIOC_S_FMT", VIDIOC_S_FMT, &mut fmt)?;

        let pix = unsafe { fmt.fmt.pix };
        Ok(RawFormat {
            fourcc: pix.pixelformat,
            width: pix.width,
            height: pix.height,
            stride: pix.bytesperline,
        })
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32, CameraError> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: V4L2_MEMORY_MMAP,
            reserved: [0; 2],
        };
        self.ioctl("VIDIOC_REQBUFS", VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> Result<RawBuffer, CameraError> {
        let mut buf = capture_buffer(index);
        self.ioctl("VIDIOC_QUERYBUF", VIDIOC_QUERYBUF, &mut buf)?;

        let offset = unsafe { buf.m.offset };
        let length = buf.length as usize;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                length,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CameraError::DeviceIo {
                op: "mmap",
                source: io::Error::last_os_error(),
            });
        }
        Ok(RawBuffer::new(ptr.cast(), length, BufferMemory::Mmap))
    }

    fn queue_buffer(&mut self, index: u32) -> Result<(), CameraError> {
        let mut buf = capture_buffer(index);
        self.ioctl("VIDIOC_QBUF", VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> Result<Option<FilledBuffer>, CameraError> {
        let mut buf = capture_buffer(0);
        let rc = unsafe { libc::ioctl(self.fd, VIDIOC_DQBUF, &mut buf as *mut v4l2_buffer) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            // EAGAIN: no frame yet. EINTR: interrupted, same retry path.
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(None),
                _ => Err(CameraError::DeviceIo {
                    op: "VIDIOC_DQBUF",
                    source: err,
                }),
            };
        }
        Ok(Some(FilledBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
        }))
    }

    fn set_streaming(&mut self, on: bool) -> Result<(), CameraError> {
        let mut buf_type: libc::c_int = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        if on {
            self.ioctl("VIDIOC_STREAMON", VIDIOC_STREAMON, &mut buf_type)
        } else {
            self.ioctl("VIDIOC_STREAMOFF", VIDIOC_STREAMOFF, &mut buf_type)
        }
    }

    fn close(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        VideoDevice::close(self);
    }
}
